//! Per-request lookup and write orchestration.
//!
//! For every read-only operation the session id and key data are captured up
//! front, the store is consulted in [`lookup_plan`] order, and on a miss the
//! executed result is offered to [`is_cacheable`] and written in the background.
//! Private results are only ever written under the exact session that produced
//! them.

use std::{future::Future, sync::Arc};

use axum::http::{HeaderMap, HeaderValue, header::AGE};
use metrics::counter;
use serde_json::Value;
use time::OffsetDateTime;
use tokio::sync::mpsc;
use tracing::{debug, instrument, warn};

use super::{
    config::CacheConfig,
    entry::{CacheEntry, encode_entry},
    hooks::{CacheKeyResolver, RequestPredicate, SessionResolver},
    keys::{KeyError, KeyScope, SessionMode, derive_key},
    metric_names::{
        METRIC_HIT_TOTAL, METRIC_MISS_TOTAL, METRIC_READ_ERROR_TOTAL, METRIC_WRITE_SKIPPED_TOTAL,
    },
    policy::{
        CacheHint, CacheScope, Cacheability, ExecutionResult, NotCacheable, OperationKind,
        is_cacheable,
    },
    store::{InMemoryStore, KeyValueStore, NamespacedStore, StoreError},
    writer::{BackgroundWriter, WriteFailure, WriteHandle},
};

/// Why no write was scheduled for a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Caching is disabled or the operation is not a query.
    Bypassed,
    /// Key data could not be turned into a key.
    KeyUnavailable,
    CacheHit,
    WriteGateDenied,
    NotCacheable(NotCacheable),
    /// Private result but no session hook is configured.
    PrivateWithoutSessionHook,
    /// Private result for a request without a session.
    AnonymousPrivate,
    EntryTooLarge,
    EncodeFailed,
    Backpressure,
}

impl SkipReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Bypassed => "bypassed",
            Self::KeyUnavailable => "key_unavailable",
            Self::CacheHit => "cache_hit",
            Self::WriteGateDenied => "write_gate_denied",
            Self::NotCacheable(reason) => reason.as_str(),
            Self::PrivateWithoutSessionHook => "private_without_session_hook",
            Self::AnonymousPrivate => "anonymous_private",
            Self::EntryTooLarge => "entry_too_large",
            Self::EncodeFailed => "encode_failed",
            Self::Backpressure => "backpressure",
        }
    }
}

#[derive(Debug)]
pub enum WriteDecision {
    Scheduled {
        mode: SessionMode,
        handle: WriteHandle,
    },
    Skipped(SkipReason),
}

impl WriteDecision {
    pub fn is_scheduled(&self) -> bool {
        matches!(self, Self::Scheduled { .. })
    }

    /// Wait for a scheduled write; `None` when nothing was scheduled.
    pub async fn join(self) -> Option<Result<(), StoreError>> {
        match self {
            Self::Scheduled { handle, .. } => Some(handle.join().await),
            Self::Skipped(_) => None,
        }
    }
}

/// Response handed back to the transport after the cache had its say.
#[derive(Debug)]
pub struct CachedResponse {
    /// On a hit, the stored data with its stored policy.
    pub result: ExecutionResult,
    /// Carries `age` on a hit.
    pub headers: HeaderMap,
    pub cache_hit: bool,
    pub age: Option<u64>,
    pub write: WriteDecision,
}

impl CachedResponse {
    fn passthrough(result: ExecutionResult, reason: SkipReason) -> Self {
        Self {
            result,
            headers: HeaderMap::new(),
            cache_hit: false,
            age: None,
            write: WriteDecision::Skipped(reason),
        }
    }
}

/// State owned by one in-flight request.
#[derive(Debug, Default)]
struct RequestState {
    session_id: Option<String>,
    key_data: Option<Value>,
    age: Option<u64>,
}

impl RequestState {
    fn captured_key_data(&self) -> &Value {
        match &self.key_data {
            Some(data) => data,
            None => panic!(
                "response cache write attempted before key data was captured; \
                 session scoping cannot be guaranteed"
            ),
        }
    }
}

/// Key scopes to try, highest priority first.
fn lookup_plan(session_id: Option<&str>) -> Vec<KeyScope> {
    match session_id {
        None => vec![KeyScope::NoSession],
        Some(id) => vec![KeyScope::private(id), KeyScope::AuthenticatedPublic],
    }
}

pub struct ResponseCache<R: ?Sized + Sync> {
    config: CacheConfig,
    store: NamespacedStore,
    writer: BackgroundWriter,
    session: Option<Arc<dyn SessionResolver<R>>>,
    cache_key: Arc<dyn CacheKeyResolver<R>>,
    should_read: Option<Arc<dyn RequestPredicate<R>>>,
    should_write: Option<Arc<dyn RequestPredicate<R>>>,
}

pub struct ResponseCacheBuilder<R: ?Sized + Sync> {
    config: CacheConfig,
    cache_key: Arc<dyn CacheKeyResolver<R>>,
    session: Option<Arc<dyn SessionResolver<R>>>,
    should_read: Option<Arc<dyn RequestPredicate<R>>>,
    should_write: Option<Arc<dyn RequestPredicate<R>>>,
    store: Option<Arc<dyn KeyValueStore>>,
    write_failures: Option<mpsc::Sender<WriteFailure>>,
}

impl<R: ?Sized + Sync> ResponseCacheBuilder<R> {
    pub fn config(mut self, config: CacheConfig) -> Self {
        self.config = config;
        self
    }

    pub fn session(mut self, hook: impl SessionResolver<R> + 'static) -> Self {
        self.session = Some(Arc::new(hook));
        self
    }

    pub fn should_read(mut self, gate: impl RequestPredicate<R> + 'static) -> Self {
        self.should_read = Some(Arc::new(gate));
        self
    }

    pub fn should_write(mut self, gate: impl RequestPredicate<R> + 'static) -> Self {
        self.should_write = Some(Arc::new(gate));
        self
    }

    /// Use `store` instead of a private [`InMemoryStore`].
    pub fn store(mut self, store: Arc<dyn KeyValueStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Report rejected background writes on `sender`.
    ///
    /// Reports are sent with `try_send`; when the channel is full they are dropped.
    pub fn write_failures(mut self, sender: mpsc::Sender<WriteFailure>) -> Self {
        self.write_failures = Some(sender);
        self
    }

    pub fn build(self) -> ResponseCache<R> {
        let backing: Arc<dyn KeyValueStore> = match self.store {
            Some(store) => store,
            None => Arc::new(InMemoryStore::new(self.config.in_memory_capacity_non_zero())),
        };
        let store = NamespacedStore::new(backing, self.config.namespace.as_str());
        let writer = BackgroundWriter::new(
            store.clone(),
            self.config.max_concurrent_writes_non_zero().get(),
            self.write_failures,
        );
        ResponseCache {
            config: self.config,
            store,
            writer,
            session: self.session,
            cache_key: self.cache_key,
            should_read: self.should_read,
            should_write: self.should_write,
        }
    }
}

impl<R: ?Sized + Sync> ResponseCache<R> {
    pub fn builder(cache_key: impl CacheKeyResolver<R> + 'static) -> ResponseCacheBuilder<R> {
        ResponseCacheBuilder {
            config: CacheConfig::default(),
            cache_key: Arc::new(cache_key),
            session: None,
            should_read: None,
            should_write: None,
            store: None,
            write_failures: None,
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Serve `request` from the cache or run `execute` and maybe store its result.
    ///
    /// `execute` is only called on a miss. Caching problems never surface as
    /// errors: the worst case is an uncached response.
    ///
    /// Writes are spawned onto the current tokio runtime, so this must be
    /// polled from within one. Under another executor a cache miss panics.
    #[instrument(skip_all, fields(operation = ?kind))]
    pub async fn execute<F, Fut>(
        &self,
        request: &R,
        kind: OperationKind,
        execute: F,
    ) -> CachedResponse
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = ExecutionResult>,
    {
        if !self.config.enabled || !kind.is_read_only() {
            return CachedResponse::passthrough(execute().await, SkipReason::Bypassed);
        }

        let mut state = match self.capture(request).await {
            Ok(state) => state,
            Err(err) => {
                warn!(cache = "key", error = %err, "cache key unavailable; executing uncached");
                return CachedResponse::passthrough(execute().await, SkipReason::KeyUnavailable);
            }
        };

        let read_allowed = match &self.should_read {
            Some(gate) => gate.check(request).await,
            None => true,
        };

        if read_allowed && let Some(entry) = self.lookup(&state).await {
            let age = entry.age_seconds(OffsetDateTime::now_utc());
            state.age = Some(age);
            let mut headers = HeaderMap::new();
            headers.insert(AGE, HeaderValue::from(age));
            return CachedResponse {
                result: ExecutionResult {
                    data: Some(entry.data),
                    errors: Vec::new(),
                    cache_policy: Some(entry.cache_policy),
                },
                headers,
                cache_hit: true,
                age: state.age,
                write: WriteDecision::Skipped(SkipReason::CacheHit),
            };
        }
        if !read_allowed {
            debug!(cache = "read", outcome = "skipped", "read gate denied lookup");
        }

        let result = execute().await;
        let write = self.decide_write(request, kind, &state, &result).await;
        if let WriteDecision::Skipped(reason) = &write {
            debug!(cache = "write", outcome = "skipped", reason = reason.as_str());
            counter!(METRIC_WRITE_SKIPPED_TOTAL, "reason" => reason.as_str()).increment(1);
        }

        CachedResponse {
            result,
            headers: HeaderMap::new(),
            cache_hit: false,
            age: None,
            write,
        }
    }

    /// Resolve session id and key data once, before anything else happens.
    async fn capture(&self, request: &R) -> Result<RequestState, KeyError> {
        let session_id = match &self.session {
            Some(hook) => hook.session_id(request).await,
            None => None,
        };
        let key_data = self.cache_key.key_data(request).await;
        // Reject unusable key data now rather than at write time.
        derive_key(&key_data, &KeyScope::NoSession)?;

        Ok(RequestState {
            session_id,
            key_data: Some(key_data),
            age: None,
        })
    }

    async fn lookup(&self, state: &RequestState) -> Option<CacheEntry> {
        let key_data = state.key_data.as_ref()?;
        for scope in lookup_plan(state.session_id.as_deref()) {
            let mode = scope.mode().as_str();
            let key = match derive_key(key_data, &scope) {
                Ok(key) => key,
                Err(err) => {
                    warn!(
                        cache = "read",
                        scope = mode,
                        error = %err,
                        "failed to derive lookup key"
                    );
                    continue;
                }
            };
            let raw = match self.store.get(key.as_str()).await {
                Ok(Some(raw)) => raw,
                Ok(None) => continue,
                Err(err) => {
                    // Fail open: a broken store reads as a miss.
                    warn!(cache = "read", scope = mode, error = %err, "cache read failed");
                    counter!(METRIC_READ_ERROR_TOTAL).increment(1);
                    continue;
                }
            };
            match CacheEntry::decode(&raw) {
                Ok(entry) => {
                    debug!(cache = "read", outcome = "hit", scope = mode);
                    counter!(METRIC_HIT_TOTAL, "scope" => mode).increment(1);
                    return Some(entry);
                }
                Err(err) => {
                    warn!(
                        cache = "read",
                        scope = mode,
                        error = %err,
                        "discarding unreadable entry"
                    );
                    counter!(METRIC_READ_ERROR_TOTAL).increment(1);
                }
            }
        }
        debug!(cache = "read", outcome = "miss");
        counter!(METRIC_MISS_TOTAL).increment(1);
        None
    }

    async fn decide_write(
        &self,
        request: &R,
        kind: OperationKind,
        state: &RequestState,
        result: &ExecutionResult,
    ) -> WriteDecision {
        if let Some(gate) = &self.should_write
            && !gate.check(request).await
        {
            return WriteDecision::Skipped(SkipReason::WriteGateDenied);
        }

        let hint = match is_cacheable(kind, result) {
            Cacheability::Cacheable(hint) => hint,
            Cacheability::NotCacheable(reason) => {
                return WriteDecision::Skipped(SkipReason::NotCacheable(reason));
            }
        };

        let scope = match (hint.scope, state.session_id.as_deref()) {
            (CacheScope::Private, _) if self.session.is_none() => {
                warn!(
                    cache = "write",
                    "private result cannot be cached without a session hook; configure one"
                );
                return WriteDecision::Skipped(SkipReason::PrivateWithoutSessionHook);
            }
            (CacheScope::Private, None) => {
                return WriteDecision::Skipped(SkipReason::AnonymousPrivate);
            }
            (CacheScope::Private, Some(id)) => KeyScope::private(id),
            (CacheScope::Public, None) => KeyScope::NoSession,
            (CacheScope::Public, Some(_)) => KeyScope::AuthenticatedPublic,
        };

        let Some(data) = result.data.as_ref() else {
            return WriteDecision::Skipped(SkipReason::NotCacheable(NotCacheable::NoData));
        };
        self.schedule_write(state, scope, hint, data)
    }

    /// Derive the key and encode the entry now; only the store call is deferred.
    fn schedule_write(
        &self,
        state: &RequestState,
        scope: KeyScope,
        hint: CacheHint,
        data: &Value,
    ) -> WriteDecision {
        let key_data = state.captured_key_data();
        let key = match derive_key(key_data, &scope) {
            Ok(key) => key,
            Err(err) => {
                warn!(cache = "write", error = %err, "failed to derive write key");
                return WriteDecision::Skipped(SkipReason::KeyUnavailable);
            }
        };

        let encoded = match encode_entry(data, hint, OffsetDateTime::now_utc()) {
            Ok(encoded) => encoded,
            Err(err) => {
                warn!(cache = "write", error = %err, "failed to encode cache entry");
                return WriteDecision::Skipped(SkipReason::EncodeFailed);
            }
        };
        if self.config.exceeds_entry_limit(encoded.len()) {
            return WriteDecision::Skipped(SkipReason::EntryTooLarge);
        }

        let mode = scope.mode();
        match self.writer.spawn(key, encoded, hint.max_age) {
            Some(handle) => {
                debug!(
                    cache = "write",
                    outcome = "scheduled",
                    scope = mode.as_str(),
                    ttl = hint.max_age
                );
                WriteDecision::Scheduled { mode, handle }
            }
            None => WriteDecision::Skipped(SkipReason::Backpressure),
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    struct Request;

    fn cache() -> ResponseCache<Request> {
        ResponseCache::builder(|_: &Request| json!({ "operationName": "Q" })).build()
    }

    #[test]
    fn anonymous_plan_has_single_no_session_lookup() {
        assert_eq!(lookup_plan(None), vec![KeyScope::NoSession]);
    }

    #[test]
    fn session_plan_prefers_private_then_public() {
        assert_eq!(
            lookup_plan(Some("user-1")),
            vec![KeyScope::private("user-1"), KeyScope::AuthenticatedPublic]
        );
    }

    #[test]
    #[should_panic(expected = "before key data was captured")]
    fn write_without_captured_key_panics() {
        let cache = cache();
        let state = RequestState::default();
        let _ = cache.schedule_write(
            &state,
            KeyScope::NoSession,
            CacheHint::public(10),
            &json!({ "a": 1 }),
        );
    }

    #[test]
    fn oversized_entries_are_not_written() {
        let cache = ResponseCache::<Request>::builder(|_: &Request| json!({ "operationName": "Q" }))
            .config(CacheConfig {
                max_entry_bytes: Some(16),
                ..Default::default()
            })
            .build();
        let state = RequestState {
            key_data: Some(json!({ "operationName": "Q" })),
            ..Default::default()
        };

        let decision = cache.schedule_write(
            &state,
            KeyScope::NoSession,
            CacheHint::public(10),
            &json!({ "payload": "far more than sixteen bytes of data" }),
        );
        assert!(matches!(decision, WriteDecision::Skipped(SkipReason::EntryTooLarge)));
    }
}
