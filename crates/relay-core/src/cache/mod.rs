//! In-memory response cache.
//!
//! Successful GET responses are kept per URL for a fixed TTL. Expired entries
//! stay readable for stale fallback until a sweep or capacity eviction
//! removes them.

mod response_cache;

pub use response_cache::{CacheConfig, CacheEntry, ResponseCache};
