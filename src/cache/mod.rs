//! Whole-response cache for query operations.
//!
//! - **keys**: canonical key derivation with session scoping
//! - **store**: the key/value capability, namespacing and the in-memory default
//! - **policy**: whether an executed result may be stored
//! - **layer**: per-request lookup and write orchestration
//!
//! ## Configuration
//!
//! ```toml
//! [cache]
//! namespace = "fqc:"
//! in_memory_capacity = 1000
//! max_concurrent_writes = 64
//! # max_entry_bytes = 1048576
//! ```

mod config;
mod entry;
mod hooks;
mod keys;
mod layer;
mod lock;
mod policy;
mod store;
mod writer;

pub use config::{CacheConfig, DEFAULT_NAMESPACE};
pub use entry::{CacheEntry, EntryError};
pub use hooks::{
    CacheKeyResolver, OperationKeyResolver, QueryRequest, RequestPredicate, SessionResolver,
};
pub use keys::{CanonicalKey, KeyError, KeyScope, SessionMode, derive_key};
pub use layer::{CachedResponse, ResponseCache, ResponseCacheBuilder, SkipReason, WriteDecision};
pub use policy::{
    CacheHint, CacheScope, Cacheability, ExecutionResult, NotCacheable, OperationKind,
    is_cacheable,
};
pub use store::{InMemoryStore, KeyValueStore, NamespacedStore, StoreError};
pub use writer::{WriteFailure, WriteHandle};

pub mod metric_names {
    pub const METRIC_HIT_TOTAL: &str = "fqc_cache_hit_total";
    pub const METRIC_MISS_TOTAL: &str = "fqc_cache_miss_total";
    pub const METRIC_READ_ERROR_TOTAL: &str = "fqc_cache_read_error_total";
    pub const METRIC_WRITE_TOTAL: &str = "fqc_cache_write_total";
    pub const METRIC_WRITE_SKIPPED_TOTAL: &str = "fqc_cache_write_skipped_total";
    pub const METRIC_WRITE_FAILED_TOTAL: &str = "fqc_cache_write_failed_total";
}
