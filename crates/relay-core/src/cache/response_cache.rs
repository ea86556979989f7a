//! Bounded URL-keyed cache with insertion-order eviction.

use crate::clock::elapsed;
use crate::config::ClientConfig;
use crate::response::ApiResult;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, VecDeque};
use std::time::Duration;
use tracing::debug;

/// Configuration for cache behavior.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheConfig {
    /// Freshness window.
    pub ttl: Duration,
    /// Maximum number of entries.
    pub capacity: usize,
    /// Keep expired entries through sweeps.
    pub retain_stale: bool,
}

impl From<&ClientConfig> for CacheConfig {
    fn from(config: &ClientConfig) -> Self {
        Self {
            ttl: config.cache_ttl(),
            capacity: config.cache_capacity.max(1),
            retain_stale: config.retain_stale_for_fallback,
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self::from(&ClientConfig::default())
    }
}

/// A cached response with metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    /// The URL this entry belongs to.
    pub key: String,
    /// The last successful result for `key`.
    pub result: ApiResult,
    /// When the entry was stored.
    pub cached_at: DateTime<Utc>,
    /// Pinned for stale fallback; survives sweeps.
    pub retained: bool,
}

impl CacheEntry {
    pub fn is_expired(&self, ttl: Duration, now: DateTime<Utc>) -> bool {
        elapsed(self.cached_at, now) > ttl
    }

    /// The stored result, marked as served from cache.
    pub fn cached_result(&self) -> ApiResult {
        let mut result = self.result.clone();
        result.from_cache = true;
        result
    }
}

/// Response cache keyed by URL.
///
/// Holds at most one entry per URL and at most `capacity` entries; when full
/// the entry inserted longest ago is evicted.
#[derive(Debug)]
pub struct ResponseCache {
    config: CacheConfig,
    entries: HashMap<String, CacheEntry>,
    /// Keys, oldest insertion first.
    order: VecDeque<String>,
}

impl ResponseCache {
    pub fn new(config: CacheConfig) -> Self {
        Self {
            config,
            entries: HashMap::new(),
            order: VecDeque::new(),
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Look up `url`. Expired entries are only returned with `allow_expired`.
    pub fn get(&self, url: &str, allow_expired: bool, now: DateTime<Utc>) -> Option<&CacheEntry> {
        let entry = self.entries.get(url)?;
        if !allow_expired && entry.is_expired(self.config.ttl, now) {
            return None;
        }
        Some(entry)
    }

    /// Store `result` under `url`, replacing any previous entry.
    ///
    /// Returns the key evicted to make room, if any.
    pub fn put(&mut self, url: &str, result: ApiResult, now: DateTime<Utc>) -> Option<String> {
        let retained = match self.entries.remove(url) {
            Some(previous) => {
                self.order.retain(|k| k != url);
                previous.retained
            }
            None => false,
        };

        let mut evicted = None;
        if self.entries.len() >= self.config.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.entries.remove(&oldest);
                debug!("Cache full, evicted {}", oldest);
                evicted = Some(oldest);
            }
        }

        self.entries.insert(
            url.to_string(),
            CacheEntry {
                key: url.to_string(),
                result,
                cached_at: now,
                retained,
            },
        );
        self.order.push_back(url.to_string());
        evicted
    }

    /// Drop expired entries unless they are retained. Returns how many were removed.
    pub fn sweep(&mut self, now: DateTime<Utc>) -> usize {
        if self.config.retain_stale {
            return 0;
        }
        let ttl = self.config.ttl;
        let before = self.entries.len();
        self.entries
            .retain(|_, entry| entry.retained || !entry.is_expired(ttl, now));
        let entries = &self.entries;
        self.order.retain(|k| entries.contains_key(k));

        let removed = before - self.entries.len();
        if removed > 0 {
            debug!("Swept {} expired cache entries", removed);
        }
        removed
    }

    /// Pin or unpin `url` for stale fallback. Returns false if absent.
    pub fn retain(&mut self, url: &str, retained: bool) -> bool {
        match self.entries.get_mut(url) {
            Some(entry) => {
                entry.retained = retained;
                true
            }
            None => false,
        }
    }

    pub fn remove(&mut self, url: &str) -> Option<CacheEntry> {
        let entry = self.entries.remove(url)?;
        self.order.retain(|k| k != url);
        Some(entry)
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.order.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
