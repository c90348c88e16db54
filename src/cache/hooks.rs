//! Caller-supplied hooks consulted once per request.
//!
//! Every hook is an async trait so implementations can reach out to session
//! stores or tenant lookups. Plain closures implement them through the blanket
//! impls below.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};

/// Resolves the caller's session id, `None` for anonymous requests.
#[async_trait]
pub trait SessionResolver<R: ?Sized + Sync>: Send + Sync {
    async fn session_id(&self, request: &R) -> Option<String>;
}

/// Produces the caller-chosen part of the cache key.
///
/// Must be stable: the same logical request should always yield the same value.
#[async_trait]
pub trait CacheKeyResolver<R: ?Sized + Sync>: Send + Sync {
    async fn key_data(&self, request: &R) -> Value;
}

/// Read/write gate.
#[async_trait]
pub trait RequestPredicate<R: ?Sized + Sync>: Send + Sync {
    async fn check(&self, request: &R) -> bool;
}

#[async_trait]
impl<R, F> SessionResolver<R> for F
where
    R: ?Sized + Sync,
    F: Fn(&R) -> Option<String> + Send + Sync,
{
    async fn session_id(&self, request: &R) -> Option<String> {
        self(request)
    }
}

#[async_trait]
impl<R, F> CacheKeyResolver<R> for F
where
    R: ?Sized + Sync,
    F: Fn(&R) -> Value + Send + Sync,
{
    async fn key_data(&self, request: &R) -> Value {
        self(request)
    }
}

#[async_trait]
impl<R, F> RequestPredicate<R> for F
where
    R: ?Sized + Sync,
    F: Fn(&R) -> bool + Send + Sync,
{
    async fn check(&self, request: &R) -> bool {
        self(request)
    }
}

/// Accessors [`OperationKeyResolver`] needs from a request.
pub trait QueryRequest {
    fn source(&self) -> &str;

    fn operation_name(&self) -> Option<&str>;

    fn variables(&self) -> Option<&Value>;
}

/// Key hook keyed on query text, operation name and variables.
///
/// An optional extra hook adds tenant- or header-derived data under `extra`.
pub struct OperationKeyResolver<R: ?Sized + Sync> {
    extra: Option<Arc<dyn CacheKeyResolver<R>>>,
}

impl<R: ?Sized + Sync> OperationKeyResolver<R> {
    pub fn new() -> Self {
        Self { extra: None }
    }

    pub fn with_extra(extra: Arc<dyn CacheKeyResolver<R>>) -> Self {
        Self { extra: Some(extra) }
    }
}

impl<R: ?Sized + Sync> Default for OperationKeyResolver<R> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<R> CacheKeyResolver<R> for OperationKeyResolver<R>
where
    R: QueryRequest + ?Sized + Sync,
{
    async fn key_data(&self, request: &R) -> Value {
        let mut data = Map::new();
        data.insert("source".to_string(), Value::from(request.source()));
        data.insert(
            "operationName".to_string(),
            request.operation_name().map_or(Value::Null, Value::from),
        );
        data.insert(
            "variables".to_string(),
            request.variables().cloned().unwrap_or(Value::Null),
        );
        if let Some(extra) = &self.extra {
            data.insert("extra".to_string(), extra.key_data(request).await);
        }
        Value::Object(data)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    struct Request {
        query: &'static str,
        name: Option<&'static str>,
        variables: Option<Value>,
        tenant: &'static str,
    }

    impl QueryRequest for Request {
        fn source(&self) -> &str {
            self.query
        }

        fn operation_name(&self) -> Option<&str> {
            self.name
        }

        fn variables(&self) -> Option<&Value> {
            self.variables.as_ref()
        }
    }

    fn request(tenant: &'static str) -> Request {
        Request {
            query: "query Q { me { id } }",
            name: Some("Q"),
            variables: Some(json!({ "first": 5 })),
            tenant,
        }
    }

    #[tokio::test]
    async fn closures_act_as_hooks() {
        let session = |req: &Request| Some(req.tenant.to_string());
        let gate = |req: &Request| req.tenant != "blocked";

        assert_eq!(
            SessionResolver::session_id(&session, &request("acme")).await,
            Some("acme".to_string())
        );
        assert!(!RequestPredicate::check(&gate, &request("blocked")).await);
    }

    #[tokio::test]
    async fn operation_key_includes_source_name_and_variables() {
        let resolver = OperationKeyResolver::<Request>::new();
        assert_eq!(
            resolver.key_data(&request("acme")).await,
            json!({
                "source": "query Q { me { id } }",
                "operationName": "Q",
                "variables": { "first": 5 },
            })
        );
    }

    #[tokio::test]
    async fn operation_key_extra_data_separates_tenants() {
        let extra = |req: &Request| json!({ "tenant": req.tenant });
        let resolver = OperationKeyResolver::<Request>::with_extra(Arc::new(extra));

        let acme = resolver.key_data(&request("acme")).await;
        let globex = resolver.key_data(&request("globex")).await;

        assert_eq!(acme["extra"], json!({ "tenant": "acme" }));
        assert_ne!(acme, globex);
    }
}
