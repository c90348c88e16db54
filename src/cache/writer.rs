//! Detached background writes.
//!
//! The request path hands an already-encoded entry to [`BackgroundWriter`] and
//! moves on. The spawned task owns its inputs, so nothing the caller does to the
//! response afterwards reaches the store.

use std::sync::Arc;

use metrics::counter;
use tokio::{
    sync::{Semaphore, mpsc},
    task::JoinHandle,
};
use tracing::{debug, warn};

use super::{
    keys::CanonicalKey,
    metric_names::{METRIC_WRITE_FAILED_TOTAL, METRIC_WRITE_TOTAL},
    store::{NamespacedStore, StoreError},
};

/// A background write that the store rejected.
#[derive(Debug, Clone)]
pub struct WriteFailure {
    pub key: CanonicalKey,
    pub error: StoreError,
}

/// Handle to a spawned write. Dropping it leaves the write running.
#[derive(Debug)]
pub struct WriteHandle(JoinHandle<Result<(), StoreError>>);

impl WriteHandle {
    /// Wait for the write to finish. Only tests and shutdown paths need this.
    pub async fn join(self) -> Result<(), StoreError> {
        match self.0.await {
            Ok(result) => result,
            Err(err) => Err(StoreError::backend(format!("write task aborted: {err}"))),
        }
    }
}

#[derive(Clone)]
pub(crate) struct BackgroundWriter {
    store: NamespacedStore,
    permits: Arc<Semaphore>,
    failures: Option<mpsc::Sender<WriteFailure>>,
}

impl BackgroundWriter {
    pub(crate) fn new(
        store: NamespacedStore,
        max_in_flight: usize,
        failures: Option<mpsc::Sender<WriteFailure>>,
    ) -> Self {
        Self {
            store,
            permits: Arc::new(Semaphore::new(max_in_flight)),
            failures,
        }
    }

    /// Spawn `set(key, value, ttl)`; `None` when the in-flight limit is reached.
    pub(crate) fn spawn(
        &self,
        key: CanonicalKey,
        value: String,
        ttl_seconds: u64,
    ) -> Option<WriteHandle> {
        let Ok(permit) = Arc::clone(&self.permits).try_acquire_owned() else {
            debug!(cache = "write", outcome = "dropped", "write limit reached");
            return None;
        };

        let store = self.store.clone();
        let failures = self.failures.clone();
        let handle = tokio::spawn(async move {
            let _permit = permit;
            let result = store.set(key.as_str(), value, ttl_seconds).await;
            match &result {
                Ok(()) => {
                    counter!(METRIC_WRITE_TOTAL).increment(1);
                }
                Err(error) => {
                    warn!(cache = "write", key = %key, error = %error, "cache write failed");
                    counter!(METRIC_WRITE_FAILED_TOTAL).increment(1);
                    if let Some(failures) = failures
                        && failures
                            .try_send(WriteFailure {
                                key,
                                error: error.clone(),
                            })
                            .is_err()
                    {
                        debug!(cache = "write", "failure channel full or closed; report dropped");
                    }
                }
            }
            result
        });
        Some(WriteHandle(handle))
    }
}

#[cfg(test)]
mod tests {
    use std::num::NonZeroUsize;

    use async_trait::async_trait;
    use tokio::sync::Notify;

    use super::*;
    use crate::cache::{
        keys::{KeyScope, derive_key},
        store::{InMemoryStore, KeyValueStore},
    };

    struct FailingStore;

    #[async_trait]
    impl KeyValueStore for FailingStore {
        async fn get(&self, _key: &str) -> Result<Option<String>, StoreError> {
            Ok(None)
        }

        async fn set(&self, _key: &str, _value: String, _ttl: u64) -> Result<(), StoreError> {
            Err(StoreError::unavailable("connection refused"))
        }
    }

    /// Blocks every `set` until released.
    struct GatedStore {
        release: Notify,
    }

    #[async_trait]
    impl KeyValueStore for GatedStore {
        async fn get(&self, _key: &str) -> Result<Option<String>, StoreError> {
            Ok(None)
        }

        async fn set(&self, _key: &str, _value: String, _ttl: u64) -> Result<(), StoreError> {
            self.release.notified().await;
            Ok(())
        }
    }

    fn key(name: &str) -> CanonicalKey {
        derive_key(&serde_json::json!({ "name": name }), &KeyScope::NoSession).expect("key")
    }

    #[tokio::test]
    async fn successful_write_lands_in_store() {
        let backing = Arc::new(InMemoryStore::new(NonZeroUsize::new(4).expect("non-zero")));
        let writer = BackgroundWriter::new(NamespacedStore::new(backing.clone(), "fqc:"), 4, None);

        let handle = writer.spawn(key("a"), "v".to_string(), 10).expect("spawned");
        handle.join().await.expect("write succeeded");

        let stored = backing
            .get(&format!("fqc:{}", key("a")))
            .await
            .expect("get");
        assert_eq!(stored.as_deref(), Some("v"));
    }

    #[tokio::test]
    async fn failures_are_reported_on_channel() {
        let (tx, mut rx) = mpsc::channel(4);
        let writer =
            BackgroundWriter::new(NamespacedStore::new(Arc::new(FailingStore), "fqc:"), 4, Some(tx));

        let handle = writer.spawn(key("a"), "v".to_string(), 10).expect("spawned");
        assert!(handle.join().await.is_err());

        let failure = rx.recv().await.expect("failure reported");
        assert_eq!(failure.key, key("a"));
        assert!(matches!(failure.error, StoreError::Unavailable { .. }));
    }

    #[tokio::test]
    async fn full_failure_channel_drops_reports_without_blocking() {
        let (tx, mut rx) = mpsc::channel(1);
        let writer =
            BackgroundWriter::new(NamespacedStore::new(Arc::new(FailingStore), "fqc:"), 4, Some(tx));

        for name in ["a", "b", "c"] {
            let handle = writer.spawn(key(name), "v".to_string(), 10).expect("spawned");
            assert!(handle.join().await.is_err());
        }

        let first = rx.recv().await.expect("first failure reported");
        assert_eq!(first.key, key("a"));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn writes_beyond_limit_are_dropped() {
        let store = Arc::new(GatedStore {
            release: Notify::new(),
        });
        let writer = BackgroundWriter::new(NamespacedStore::new(store.clone(), "fqc:"), 1, None);

        let first = writer.spawn(key("a"), "v".to_string(), 10).expect("first spawned");
        assert!(writer.spawn(key("b"), "v".to_string(), 10).is_none());

        store.release.notify_one();
        first.join().await.expect("first write succeeded");

        assert!(writer.spawn(key("c"), "v".to_string(), 10).is_some());
    }
}
