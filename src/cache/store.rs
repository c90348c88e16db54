//! Key/value store capability and the adapters the cache uses over it.
//!
//! `KeyValueStore` is the external capability. `NamespacedStore` prefixes every
//! key so cache entries cannot collide with other users of the same store.
//! `InMemoryStore` is the bundled default: LRU-bounded with per-entry TTL.

use std::{num::NonZeroUsize, sync::Arc, sync::RwLock, time::Duration};

use async_trait::async_trait;
use lru::LruCache;
use thiserror::Error;
use tokio::time::Instant;

use super::lock;

#[derive(Debug, Clone, Error)]
pub enum StoreError {
    #[error("store backend error: {message}")]
    Backend { message: String },
    #[error("store unavailable: {message}")]
    Unavailable { message: String },
}

impl StoreError {
    pub fn backend(message: impl Into<String>) -> Self {
        Self::Backend {
            message: message.into(),
        }
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable {
            message: message.into(),
        }
    }
}

/// External key/value capability.
///
/// `ttl_seconds == 0` asks the store to keep the value until it evicts it.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    async fn set(&self, key: &str, value: String, ttl_seconds: u64) -> Result<(), StoreError>;
}

/// Prefixing passthrough over a shared [`KeyValueStore`].
#[derive(Clone)]
pub struct NamespacedStore {
    inner: Arc<dyn KeyValueStore>,
    prefix: Arc<str>,
}

impl NamespacedStore {
    pub fn new(inner: Arc<dyn KeyValueStore>, prefix: impl Into<Arc<str>>) -> Self {
        Self {
            inner,
            prefix: prefix.into(),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    fn namespaced(&self, key: &str) -> String {
        format!("{}{}", self.prefix, key)
    }

    pub async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        self.inner.get(&self.namespaced(key)).await
    }

    pub async fn set(&self, key: &str, value: String, ttl_seconds: u64) -> Result<(), StoreError> {
        self.inner
            .set(&self.namespaced(key), value, ttl_seconds)
            .await
    }
}

struct StoredValue {
    value: String,
    expires_at: Option<Instant>,
}

impl StoredValue {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|deadline| deadline <= now)
    }
}

/// In-process store with LRU eviction and lazy TTL expiry.
pub struct InMemoryStore {
    entries: RwLock<LruCache<String, StoredValue>>,
}

impl InMemoryStore {
    pub fn new(capacity: NonZeroUsize) -> Self {
        Self {
            entries: RwLock::new(LruCache::new(capacity)),
        }
    }

    /// Number of stored values, including expired ones not yet purged.
    pub fn len(&self) -> usize {
        lock::read(&self.entries, "in_memory_len").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl KeyValueStore for InMemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let mut entries = lock::write(&self.entries, "in_memory_get");
        if let Some(stored) = entries.get(key)
            && !stored.is_expired(Instant::now())
        {
            return Ok(Some(stored.value.clone()));
        }
        // Absent or expired; expired values are purged on read.
        entries.pop(key);
        Ok(None)
    }

    async fn set(&self, key: &str, value: String, ttl_seconds: u64) -> Result<(), StoreError> {
        let expires_at =
            (ttl_seconds > 0).then(|| Instant::now() + Duration::from_secs(ttl_seconds));
        lock::write(&self.entries, "in_memory_set")
            .put(key.to_string(), StoredValue { value, expires_at });
        Ok(())
    }
}
