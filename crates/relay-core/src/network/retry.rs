//! Retry budget and exponential backoff.
//!
//! Provides:
//! - Deterministic exponential backoff capped at `max_delay`
//! - Optional jitter drawn from a seedable source
//! - The retry budget check shared by every category

use crate::config::ClientConfig;
use crate::network::classify::ErrorRecord;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

/// Configuration for retry behavior.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    /// Attempt budget. `should_retry` refuses once `attempt >= max_retries`.
    pub max_retries: u32,
    /// Delay after the first failed attempt.
    pub base_delay: Duration,
    /// Maximum delay cap.
    pub max_delay: Duration,
    /// Exponential base (2.0 doubles each attempt).
    pub multiplier: f64,
    /// Whether to scale delays by a random factor.
    pub jitter: bool,
    /// Seed for the jitter source.
    pub jitter_seed: Option<u64>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::from(&ClientConfig::default())
    }
}

impl From<&ClientConfig> for RetryConfig {
    fn from(config: &ClientConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            base_delay: config.base_delay(),
            max_delay: config.max_delay(),
            multiplier: config.backoff_multiplier,
            jitter: config.jitter,
            jitter_seed: config.jitter_seed,
        }
    }
}

impl RetryConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    pub fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    pub fn with_jitter_seed(mut self, seed: u64) -> Self {
        self.jitter = true;
        self.jitter_seed = Some(seed);
        self
    }
}

/// Backoff calculator and retry budget.
#[derive(Debug)]
pub struct RetryPolicy {
    config: RetryConfig,
    rng: Mutex<StdRng>,
}

impl RetryPolicy {
    pub fn new(config: RetryConfig) -> Self {
        let rng = match config.jitter_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };
        Self {
            config,
            rng: Mutex::new(rng),
        }
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    pub fn max_retries(&self) -> u32 {
        self.config.max_retries
    }

    /// Delay to wait after failed attempt `attempt` (1-indexed).
    ///
    /// `min(base * multiplier^(attempt-1), max)`, scaled by a factor in
    /// `[0.5, 1.5)` and re-capped when jitter is on.
    pub fn delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let factor = self.config.multiplier.powi(exponent);
        let max_secs = self.config.max_delay.as_secs_f64();
        let capped_secs = (self.config.base_delay.as_secs_f64() * factor).min(max_secs);

        let final_secs = if self.config.jitter {
            let mut rng = self.rng.lock().unwrap_or_else(PoisonError::into_inner);
            let jitter_factor = rng.random_range(0.5..1.5);
            (capped_secs * jitter_factor).min(max_secs)
        } else {
            capped_secs
        };

        // Round to whole milliseconds so repeated runs compare equal.
        Duration::from_millis((final_secs * 1000.0).round() as u64)
    }

    /// Whether another attempt may follow failed attempt `attempt`.
    pub fn should_retry(&self, record: &ErrorRecord, attempt: u32) -> bool {
        if attempt >= self.config.max_retries {
            return false;
        }
        record.category.is_retryable()
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(RetryConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::classify::ErrorCategory;

    fn record(category: ErrorCategory) -> ErrorRecord {
        ErrorRecord::new(category, "test")
    }

    #[test]
    fn test_delay_calculation_no_jitter() {
        let policy = RetryPolicy::default();

        assert_eq!(policy.delay(1), Duration::from_millis(1000));
        assert_eq!(policy.delay(2), Duration::from_millis(2000));
        assert_eq!(policy.delay(3), Duration::from_millis(4000));
        assert_eq!(policy.delay(4), Duration::from_millis(8000));
        // 16s capped at 10s
        assert_eq!(policy.delay(5), Duration::from_millis(10_000));
        assert_eq!(policy.delay(40), Duration::from_millis(10_000));
    }

    #[test]
    fn test_delay_matches_formula() {
        let policy = RetryPolicy::new(
            RetryConfig::new()
                .with_base_delay(Duration::from_millis(250))
                .with_max_delay(Duration::from_secs(3)),
        );
        for n in 1..10u32 {
            let expected = (250u64 * 2u64.pow(n - 1)).min(3000);
            assert_eq!(policy.delay(n), Duration::from_millis(expected), "attempt {}", n);
        }
    }

    #[test]
    fn test_delay_with_seeded_jitter_is_reproducible() {
        let config = RetryConfig::new().with_jitter_seed(42);
        let a = RetryPolicy::new(config.clone());
        let b = RetryPolicy::new(config);

        let first: Vec<Duration> = (1..6).map(|n| a.delay(n)).collect();
        let second: Vec<Duration> = (1..6).map(|n| b.delay(n)).collect();
        assert_eq!(first, second);
    }

    #[test]
    fn test_delay_with_jitter_bounds() {
        let policy = RetryPolicy::new(RetryConfig::new().with_jitter_seed(7));
        for _ in 0..20 {
            let delay = policy.delay(1);
            assert!(
                delay >= Duration::from_millis(500) && delay <= Duration::from_millis(1500),
                "Delay {:?} should be between 0.5s and 1.5s",
                delay
            );
            assert!(policy.delay(8) <= Duration::from_secs(10));
        }
    }

    #[test]
    fn test_should_retry_budget() {
        let policy = RetryPolicy::default();
        let network = record(ErrorCategory::Network);

        assert!(policy.should_retry(&network, 1));
        assert!(policy.should_retry(&network, 2));
        assert!(!policy.should_retry(&network, 3));
        assert!(!policy.should_retry(&network, 4));
    }

    #[test]
    fn test_should_retry_non_retryable() {
        let policy = RetryPolicy::default();
        assert!(!policy.should_retry(&record(ErrorCategory::Validation), 1));
        assert!(!policy.should_retry(&record(ErrorCategory::Client), 1));
        assert!(policy.should_retry(&record(ErrorCategory::Server), 1));
        assert!(policy.should_retry(&record(ErrorCategory::Unknown), 1));
    }

    #[test]
    fn test_zero_budget_never_retries() {
        let policy = RetryPolicy::new(RetryConfig::new().with_max_retries(0));
        assert!(!policy.should_retry(&record(ErrorCategory::Network), 1));
    }
}
