//! Whole-response caching for query engines.
//!
//! [`cache::ResponseCache`] sits between a query engine and a key/value store:
//! it derives session-scoped keys, serves hits, and stores cacheable results in
//! the background without ever sharing private data across sessions.

pub mod cache;
pub mod config;
pub mod infra;
