//! Response cache configuration.
//!
//! Loaded from the `[cache]` table of `fqc.toml` or `FQC__CACHE__*` variables.

use std::num::NonZeroUsize;

use serde::Deserialize;

pub const DEFAULT_NAMESPACE: &str = "fqc:";
const DEFAULT_IN_MEMORY_CAPACITY: usize = 1000;
const DEFAULT_MAX_CONCURRENT_WRITES: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Master switch; when off every request passes straight through.
    pub enabled: bool,
    /// Prefix prepended to every key written to the store.
    pub namespace: String,
    /// Capacity of the bundled in-memory store, used when no store is supplied.
    pub in_memory_capacity: usize,
    /// Entries whose encoded size exceeds this are not written.
    pub max_entry_bytes: Option<usize>,
    /// Background writes allowed in flight; further writes are dropped.
    pub max_concurrent_writes: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            namespace: DEFAULT_NAMESPACE.to_string(),
            in_memory_capacity: DEFAULT_IN_MEMORY_CAPACITY,
            max_entry_bytes: None,
            max_concurrent_writes: DEFAULT_MAX_CONCURRENT_WRITES,
        }
    }
}

impl CacheConfig {
    /// Returns the in-memory capacity as NonZeroUsize, clamping to 1 if zero.
    pub fn in_memory_capacity_non_zero(&self) -> NonZeroUsize {
        NonZeroUsize::new(self.in_memory_capacity).unwrap_or(NonZeroUsize::MIN)
    }

    /// Returns the write concurrency limit, clamping to 1 if zero.
    pub fn max_concurrent_writes_non_zero(&self) -> NonZeroUsize {
        NonZeroUsize::new(self.max_concurrent_writes).unwrap_or(NonZeroUsize::MIN)
    }

    pub fn exceeds_entry_limit(&self, encoded_len: usize) -> bool {
        self.max_entry_bytes.is_some_and(|limit| encoded_len > limit)
    }
}
