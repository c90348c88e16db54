//! Cacheability of an executed operation.
//!
//! The query engine owns the cache hint; this module only reads it.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Privacy scope declared by a result's cache hint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum CacheScope {
    Public,
    Private,
}

/// Cache hint produced by the query engine for one response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheHint {
    pub scope: CacheScope,
    pub max_age: u64,
}

impl CacheHint {
    pub fn public(max_age: u64) -> Self {
        Self {
            scope: CacheScope::Public,
            max_age,
        }
    }

    pub fn private(max_age: u64) -> Self {
        Self {
            scope: CacheScope::Private,
            max_age,
        }
    }
}

/// Top-level operation type, as reported by the query engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationKind {
    Query,
    Mutation,
    Subscription,
}

impl OperationKind {
    pub fn is_read_only(self) -> bool {
        matches!(self, Self::Query)
    }
}

/// Whole-operation result handed over by the query engine.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExecutionResult {
    pub data: Option<Value>,
    pub errors: Vec<Value>,
    pub cache_policy: Option<CacheHint>,
}

impl ExecutionResult {
    pub fn data(data: Value, cache_policy: Option<CacheHint>) -> Self {
        Self {
            data: Some(data),
            errors: Vec::new(),
            cache_policy,
        }
    }
}

/// Why a result was not cacheable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotCacheable {
    NotAQuery,
    HasErrors,
    NoData,
    NoPolicy,
    ZeroMaxAge,
}

impl NotCacheable {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NotAQuery => "not_a_query",
            Self::HasErrors => "has_errors",
            Self::NoData => "no_data",
            Self::NoPolicy => "no_policy",
            Self::ZeroMaxAge => "zero_max_age",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cacheability {
    Cacheable(CacheHint),
    NotCacheable(NotCacheable),
}

/// Decide whether `result` of an operation of `kind` may be stored.
pub fn is_cacheable(kind: OperationKind, result: &ExecutionResult) -> Cacheability {
    if !kind.is_read_only() {
        return Cacheability::NotCacheable(NotCacheable::NotAQuery);
    }
    if !result.errors.is_empty() {
        return Cacheability::NotCacheable(NotCacheable::HasErrors);
    }
    if result.data.as_ref().is_none_or(Value::is_null) {
        return Cacheability::NotCacheable(NotCacheable::NoData);
    }
    match result.cache_policy {
        None => Cacheability::NotCacheable(NotCacheable::NoPolicy),
        Some(hint) if hint.max_age == 0 => Cacheability::NotCacheable(NotCacheable::ZeroMaxAge),
        Some(hint) => Cacheability::Cacheable(hint),
    }
}
