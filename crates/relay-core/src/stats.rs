//! Request counters.

use crate::network::{ErrorCategory, Execution};
use crate::response::ApiResult;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Running counters for one client. Only `reset` moves them backwards.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Stats {
    requests: u64,
    successes: u64,
    failures: u64,
    retries: u64,
    cache_hits: u64,
    stale_hits: u64,
    queued: u64,
    errors_by_category: BTreeMap<ErrorCategory, u64>,
}

impl Stats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_request(&mut self) {
        self.requests += 1;
    }

    /// Count the final outcome of a `request` call.
    pub fn record_outcome(&mut self, result: &ApiResult) {
        if result.success {
            self.successes += 1;
        } else {
            self.failures += 1;
        }
    }

    /// Count re-executions and every failed attempt of an execution.
    pub fn record_execution(&mut self, execution: &Execution) {
        self.retries += u64::from(execution.reexecutions());
        for record in &execution.errors {
            *self.errors_by_category.entry(record.category).or_default() += 1;
        }
    }

    pub fn record_cache_hit(&mut self) {
        self.cache_hits += 1;
    }

    pub fn record_stale_hit(&mut self) {
        self.stale_hits += 1;
    }

    pub fn record_queued(&mut self) {
        self.queued += 1;
    }

    /// `successes / requests`, or 0 before the first request.
    pub fn success_rate(&self) -> f64 {
        if self.requests == 0 {
            0.0
        } else {
            self.successes as f64 / self.requests as f64
        }
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            requests: self.requests,
            successes: self.successes,
            failures: self.failures,
            retries: self.retries,
            cache_hits: self.cache_hits,
            stale_hits: self.stale_hits,
            queued: self.queued,
            errors_by_category: self.errors_by_category.clone(),
            success_rate: self.success_rate(),
        }
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// Read-only copy of the counters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatsSnapshot {
    pub requests: u64,
    pub successes: u64,
    pub failures: u64,
    /// Attempts beyond the first, summed over all requests.
    pub retries: u64,
    pub cache_hits: u64,
    /// Failed live requests answered from an expired cache entry.
    pub stale_hits: u64,
    /// Requests that waited in the offline queue.
    pub queued: u64,
    /// Failed attempts per category.
    pub errors_by_category: BTreeMap<ErrorCategory, u64>,
    pub success_rate: f64,
}

impl StatsSnapshot {
    pub fn errors(&self, category: ErrorCategory) -> u64 {
        self.errors_by_category.get(&category).copied().unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::ErrorRecord;
    use chrono::Utc;

    fn ok() -> ApiResult {
        let mut result = ApiResult::local_failure("r", "x", Utc::now());
        result.success = true;
        result.error = None;
        result
    }

    #[test]
    fn test_success_rate() {
        let mut stats = Stats::new();
        assert_eq!(stats.success_rate(), 0.0);

        for _ in 0..4 {
            stats.record_request();
        }
        stats.record_outcome(&ok());
        stats.record_outcome(&ok());
        stats.record_outcome(&ok());
        stats.record_outcome(&ApiResult::cancelled("r", Utc::now()));

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.successes, 3);
        assert_eq!(snapshot.failures, 1);
        assert!((snapshot.success_rate - 0.75).abs() < f64::EPSILON);
    }

    #[test]
    fn test_record_execution() {
        let mut stats = Stats::new();
        let execution = Execution {
            result: ok(),
            errors: vec![
                ErrorRecord::new(ErrorCategory::Server, "503"),
                ErrorRecord::new(ErrorCategory::Network, "reset"),
            ],
            attempts: 3,
            cancelled: false,
        };
        stats.record_execution(&execution);

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.retries, 2);
        assert_eq!(snapshot.errors(ErrorCategory::Server), 1);
        assert_eq!(snapshot.errors(ErrorCategory::Network), 1);
        assert_eq!(snapshot.errors(ErrorCategory::Client), 0);
    }

    #[test]
    fn test_snapshot_serializes() {
        let mut stats = Stats::new();
        stats.record_request();
        stats.record_cache_hit();
        let json = serde_json::to_value(stats.snapshot()).unwrap();
        assert_eq!(json["cache_hits"], 1);
        assert_eq!(json["requests"], 1);
    }

    #[test]
    fn test_reset() {
        let mut stats = Stats::new();
        stats.record_request();
        stats.record_queued();
        stats.reset();
        assert_eq!(stats, Stats::new());
    }
}
