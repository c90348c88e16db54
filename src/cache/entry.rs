//! Stored cache entry format.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use time::OffsetDateTime;

use super::policy::CacheHint;

/// Value persisted under a canonical key. Immutable once written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheEntry {
    pub data: Value,
    pub cache_policy: CacheHint,
    /// Unix timestamp in milliseconds.
    pub cache_time: i64,
}

#[derive(Debug, Error)]
pub enum EntryError {
    #[error("failed to encode cache entry: {0}")]
    Encode(#[source] serde_json::Error),
    #[error("failed to decode cache entry: {0}")]
    Decode(#[source] serde_json::Error),
}

impl CacheEntry {
    pub fn new(data: Value, cache_policy: CacheHint, stored_at: OffsetDateTime) -> Self {
        Self {
            data,
            cache_policy,
            cache_time: unix_millis(stored_at),
        }
    }

    pub fn encode(&self) -> Result<String, EntryError> {
        serde_json::to_string(self).map_err(EntryError::Encode)
    }

    pub fn decode(raw: &str) -> Result<Self, EntryError> {
        serde_json::from_str(raw).map_err(EntryError::Decode)
    }

    /// Whole seconds elapsed since the entry was stored, rounded to nearest.
    ///
    /// Clock skew between writers can place `cache_time` in the future; that
    /// reads as age zero.
    pub fn age_seconds(&self, now: OffsetDateTime) -> u64 {
        let elapsed_ms = unix_millis(now).saturating_sub(self.cache_time).max(0);
        (elapsed_ms.saturating_add(500) / 1000) as u64
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct EntryView<'a> {
    data: &'a Value,
    cache_policy: CacheHint,
    cache_time: i64,
}

/// Encode an entry without taking ownership of the response data.
pub(crate) fn encode_entry(
    data: &Value,
    cache_policy: CacheHint,
    stored_at: OffsetDateTime,
) -> Result<String, EntryError> {
    let view = EntryView {
        data,
        cache_policy,
        cache_time: unix_millis(stored_at),
    };
    serde_json::to_string(&view).map_err(EntryError::Encode)
}

fn unix_millis(at: OffsetDateTime) -> i64 {
    (at.unix_timestamp_nanos() / 1_000_000) as i64
}
