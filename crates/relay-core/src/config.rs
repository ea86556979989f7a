//! Client configuration.
//!
//! `ClientDefaults` holds the stated defaults as constants; `ClientConfig` is
//! the serde-loadable surface hosts use to override them. Durations are kept
//! as millisecond integers so a JSON config file maps one-to-one.

use crate::error::{RelayError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Default values for every configuration knob.
pub struct ClientDefaults;

impl ClientDefaults {
    pub const MAX_RETRIES: u32 = 3;
    pub const BASE_DELAY: Duration = Duration::from_millis(1_000);
    pub const MAX_DELAY: Duration = Duration::from_millis(10_000);
    pub const BACKOFF_MULTIPLIER: f64 = 2.0;
    pub const CACHE_TTL: Duration = Duration::from_millis(300_000);
    pub const CACHE_CAPACITY: usize = 100;
    pub const QUEUE_TIMEOUT: Duration = Duration::from_millis(300_000);
    pub const SWEEP_INTERVAL: Duration = Duration::from_millis(60_000);
    pub const REQUEST_TIMEOUT: Duration = Duration::from_millis(30_000);
    pub const USER_AGENT: &'static str = "relay/0.1";
}

/// Configuration for a `ResilientClient`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "snake_case")]
pub struct ClientConfig {
    /// Retry budget for recoverable failures.
    pub max_retries: u32,
    /// Delay before the first retry.
    pub base_delay_ms: u64,
    /// Upper bound on any single backoff delay.
    pub max_delay_ms: u64,
    /// Exponential base for backoff growth.
    pub backoff_multiplier: f64,
    /// Freshness window for cached responses.
    pub cache_ttl_ms: u64,
    /// Maximum number of cached URLs.
    pub cache_capacity: usize,
    /// Hard expiry for requests waiting in the offline queue.
    pub queue_timeout_ms: u64,
    /// Interval of the background cache sweep.
    pub sweep_interval_ms: u64,
    /// Timeout applied to specs built without an explicit one.
    pub default_timeout_ms: u64,
    /// Multiply each backoff delay by a random factor in `[0.5, 1.5)`.
    pub jitter: bool,
    /// Seed for the jitter source. `None` seeds from the OS.
    pub jitter_seed: Option<u64>,
    /// Base used to resolve relative request URLs.
    pub base_url: Option<String>,
    /// Keep expired entries through sweeps so they stay available for
    /// stale fallback. They are still subject to capacity eviction.
    pub retain_stale_for_fallback: bool,
    /// User agent sent by `ReqwestTransport`.
    pub user_agent: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            max_retries: ClientDefaults::MAX_RETRIES,
            base_delay_ms: ClientDefaults::BASE_DELAY.as_millis() as u64,
            max_delay_ms: ClientDefaults::MAX_DELAY.as_millis() as u64,
            backoff_multiplier: ClientDefaults::BACKOFF_MULTIPLIER,
            cache_ttl_ms: ClientDefaults::CACHE_TTL.as_millis() as u64,
            cache_capacity: ClientDefaults::CACHE_CAPACITY,
            queue_timeout_ms: ClientDefaults::QUEUE_TIMEOUT.as_millis() as u64,
            sweep_interval_ms: ClientDefaults::SWEEP_INTERVAL.as_millis() as u64,
            default_timeout_ms: ClientDefaults::REQUEST_TIMEOUT.as_millis() as u64,
            jitter: false,
            jitter_seed: None,
            base_url: None,
            retain_stale_for_fallback: false,
            user_agent: ClientDefaults::USER_AGENT.to_string(),
        }
    }
}

impl ClientConfig {
    /// Create a config with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a config from a JSON file. Missing fields take their defaults.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| RelayError::Config {
            message: format!("Failed to read {}: {}", path.display(), e),
        })?;
        let config: ClientConfig =
            serde_json::from_str(&contents).map_err(|e| RelayError::Config {
                message: format!("Failed to parse {}: {}", path.display(), e),
            })?;
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations the client cannot run with.
    pub fn validate(&self) -> Result<()> {
        if !self.backoff_multiplier.is_finite() || self.backoff_multiplier < 1.0 {
            return Err(RelayError::Config {
                message: format!(
                    "backoff_multiplier must be >= 1.0, got {}",
                    self.backoff_multiplier
                ),
            });
        }
        if self.cache_capacity == 0 {
            return Err(RelayError::Config {
                message: "cache_capacity must be at least 1".to_string(),
            });
        }
        if self.base_delay_ms > self.max_delay_ms {
            return Err(RelayError::Config {
                message: format!(
                    "base_delay_ms ({}) exceeds max_delay_ms ({})",
                    self.base_delay_ms, self.max_delay_ms
                ),
            });
        }
        if self.sweep_interval_ms == 0 {
            return Err(RelayError::Config {
                message: "sweep_interval_ms must be non-zero".to_string(),
            });
        }
        if self.default_timeout_ms == 0 {
            return Err(RelayError::Config {
                message: "default_timeout_ms must be non-zero".to_string(),
            });
        }
        if let Some(base) = &self.base_url {
            url::Url::parse(base).map_err(|e| RelayError::Config {
                message: format!("base_url {:?} is not a valid URL: {}", base, e),
            })?;
        }
        Ok(())
    }

    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    pub fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay_ms = delay.as_millis() as u64;
        self
    }

    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay_ms = delay.as_millis() as u64;
        self
    }

    pub fn with_backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl_ms = ttl.as_millis() as u64;
        self
    }

    pub fn with_cache_capacity(mut self, capacity: usize) -> Self {
        self.cache_capacity = capacity;
        self
    }

    pub fn with_queue_timeout(mut self, timeout: Duration) -> Self {
        self.queue_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval_ms = interval.as_millis() as u64;
        self
    }

    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Enable jitter drawn from a seeded source.
    pub fn with_jitter_seed(mut self, seed: u64) -> Self {
        self.jitter = true;
        self.jitter_seed = Some(seed);
        self
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    pub fn with_retain_stale(mut self, retain: bool) -> Self {
        self.retain_stale_for_fallback = retain;
        self
    }

    // Duration accessors

    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_millis(self.cache_ttl_ms)
    }

    pub fn queue_timeout(&self) -> Duration {
        Duration::from_millis(self.queue_timeout_ms)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms)
    }

    pub fn default_timeout(&self) -> Duration {
        Duration::from_millis(self.default_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_constants() {
        let config = ClientConfig::default();
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.base_delay(), Duration::from_secs(1));
        assert_eq!(config.max_delay(), Duration::from_secs(10));
        assert_eq!(config.backoff_multiplier, 2.0);
        assert_eq!(config.cache_ttl(), Duration::from_secs(300));
        assert_eq!(config.cache_capacity, 100);
        assert_eq!(config.queue_timeout(), Duration::from_secs(300));
        assert_eq!(config.sweep_interval(), Duration::from_secs(60));
        assert!(!config.jitter);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: ClientConfig =
            serde_json::from_str(r#"{"max_retries": 5, "cache_capacity": 2}"#).unwrap();
        assert_eq!(config.max_retries, 5);
        assert_eq!(config.cache_capacity, 2);
        assert_eq!(config.cache_ttl_ms, 300_000);
    }

    #[test]
    fn test_queue_timeout_independent_of_ttl() {
        let config = ClientConfig::new().with_cache_ttl(Duration::from_secs(10));
        assert_eq!(config.queue_timeout(), Duration::from_secs(300));
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        assert!(ClientConfig::new()
            .with_backoff_multiplier(0.5)
            .validate()
            .is_err());
        assert!(ClientConfig::new().with_cache_capacity(0).validate().is_err());
        assert!(ClientConfig::new()
            .with_base_delay(Duration::from_secs(20))
            .validate()
            .is_err());
        assert!(ClientConfig::new()
            .with_base_url("not a url")
            .validate()
            .is_err());
    }

    #[test]
    fn test_from_json_file_missing() {
        let err = ClientConfig::from_json_file("/nonexistent/relay.json").unwrap_err();
        assert!(matches!(err, RelayError::Config { .. }));
    }
}
