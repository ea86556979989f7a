//! Attempt loop for a single request.
//!
//! The executor owns one `request` call from first attempt to final outcome:
//! it enforces the per-attempt deadline, classifies failures, and asks the
//! recovery strategy whether to go again. It never touches the cache, queue
//! or stats; the caller folds the returned `Execution` into shared state.

use crate::cancel::CancellationToken;
use crate::clock::Clock;
use crate::config::ClientDefaults;
use crate::error::RelayError;
use crate::network::classify::{classify, ErrorRecord, Failure};
use crate::network::recovery::{RecoveryAction, RecoveryState, RecoveryStrategy};
use crate::network::transport::{NetworkTransport, TransportRequest, TransportResponse};
use crate::request::RequestSpec;
use crate::response::{decode_body, ApiResult};
use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Everything one `execute_with_retry` call produced.
#[derive(Debug, Clone)]
pub struct Execution {
    pub result: ApiResult,
    /// One record per failed attempt, oldest first.
    pub errors: Vec<ErrorRecord>,
    /// Attempts that reached the transport.
    pub attempts: u32,
    /// The call ended because its token was cancelled.
    pub cancelled: bool,
}

impl Execution {
    /// Attempts beyond the first.
    pub fn reexecutions(&self) -> u32 {
        self.attempts.saturating_sub(1)
    }
}

enum Attempt {
    Response(TransportResponse),
    Failed(Failure),
    Cancelled,
}

/// Runs a request against the transport with retry and recovery.
pub struct RequestExecutor {
    transport: Arc<dyn NetworkTransport>,
    recovery: RecoveryStrategy,
    clock: Arc<dyn Clock>,
    default_timeout: Duration,
}

impl RequestExecutor {
    pub fn new(
        transport: Arc<dyn NetworkTransport>,
        recovery: RecoveryStrategy,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            transport,
            recovery,
            clock,
            default_timeout: ClientDefaults::REQUEST_TIMEOUT,
        }
    }

    /// Deadline for specs that do not set their own.
    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    /// Execute `spec` against `url` until it succeeds or recovery gives up.
    ///
    /// `url` is the resolved form of `spec.url`.
    pub async fn execute_with_retry(
        &self,
        spec: &RequestSpec,
        url: &str,
        token: &CancellationToken,
    ) -> Execution {
        let request = TransportRequest {
            method: spec.method,
            url: url.to_string(),
            headers: spec.headers.clone(),
            body: spec.body.clone(),
            timeout: spec.effective_timeout(self.default_timeout),
        };
        let max_retries = self.recovery.policy().max_retries();

        let mut attempt: u32 = 1;
        let mut retries: u32 = 0;
        let mut errors = Vec::new();
        let mut state = RecoveryState::default();

        loop {
            if token.is_cancelled() {
                return self.cancelled(spec, errors, attempt - 1, retries);
            }

            let outcome = tokio::select! {
                _ = token.cancelled() => Attempt::Cancelled,
                outcome = self.attempt(&request) => outcome,
            };

            let failure = match outcome {
                Attempt::Cancelled => return self.cancelled(spec, errors, attempt, retries),
                Attempt::Response(response) if response.is_success() => {
                    if attempt > 1 {
                        debug!("{} succeeded on attempt {}", spec.id, attempt);
                    }
                    return Execution {
                        result: self.success(spec, response, retries),
                        errors,
                        attempts: attempt,
                        cancelled: false,
                    };
                }
                Attempt::Response(response) => Failure::Status {
                    status: response.status,
                    status_text: response.status_text.clone(),
                    message: String::new(),
                },
                Attempt::Failed(failure) => failure,
            };

            let record = classify(&failure)
                .with_context("attempt", attempt)
                .with_context("request_id", &spec.id);
            warn!(
                "{} {} attempt {} failed ({}): {}",
                spec.method, url, attempt, record.category, record.message
            );
            let budget_spent = record.category.is_retryable() && attempt >= max_retries;

            let action = self.recovery.recover(&record, attempt, &mut state).await;
            errors.push(record);

            match action {
                RecoveryAction::Retry { delay } => {
                    if !delay.is_zero() {
                        debug!("Retrying {} in {:?}", spec.id, delay);
                        tokio::select! {
                            _ = token.cancelled() => {
                                return self.cancelled(spec, errors, attempt, retries);
                            }
                            _ = tokio::time::sleep(delay) => {}
                        }
                    }
                    retries += 1;
                    attempt += 1;
                }
                RecoveryAction::GiveUp { annotation } => {
                    // An exhausted budget reports the full budget as used.
                    if budget_spent {
                        retries = retries.max(max_retries);
                    }
                    let result = self.failure(spec, &failure, errors.last(), annotation, retries);
                    return Execution {
                        result,
                        errors,
                        attempts: attempt,
                        cancelled: false,
                    };
                }
            }
        }
    }

    /// One attempt: deadline, transport call, panic isolation.
    async fn attempt(&self, request: &TransportRequest) -> Attempt {
        let after_ms = request.timeout.as_millis() as u64;
        let send = AssertUnwindSafe(self.transport.send(request)).catch_unwind();

        match tokio::time::timeout(request.timeout, send).await {
            Err(_) => Attempt::Failed(Failure::Timeout { after_ms }),
            Ok(Err(panic)) => Attempt::Failed(Failure::Panic {
                message: panic_message(panic.as_ref()),
            }),
            Ok(Ok(Err(RelayError::Timeout(_)))) => Attempt::Failed(Failure::Timeout { after_ms }),
            Ok(Ok(Err(e @ RelayError::InvalidRequest { .. }))) => {
                Attempt::Failed(Failure::Rejected {
                    message: e.to_string(),
                })
            }
            Ok(Ok(Err(e))) => Attempt::Failed(Failure::Transport {
                message: e.to_string(),
            }),
            Ok(Ok(Ok(response))) => Attempt::Response(response),
        }
    }

    fn success(&self, spec: &RequestSpec, response: TransportResponse, retries: u32) -> ApiResult {
        let (data, parse_error) = decode_body(&response.headers, &response.body);
        if let Some(err) = &parse_error {
            warn!("{}: {}", spec.id, err);
        }
        ApiResult {
            success: true,
            status: response.status,
            status_text: response.status_text,
            headers: response.headers,
            data,
            error: None,
            user_message: None,
            category: None,
            parse_error,
            original_error: None,
            timestamp: self.clock.now(),
            from_cache: false,
            from_expired_cache: false,
            retries,
            request_id: spec.id.clone(),
        }
    }

    fn failure(
        &self,
        spec: &RequestSpec,
        failure: &Failure,
        record: Option<&ErrorRecord>,
        annotation: Option<&'static str>,
        retries: u32,
    ) -> ApiResult {
        let (status, status_text) = match failure {
            Failure::Status {
                status,
                status_text,
                ..
            } => (*status, status_text.clone()),
            _ => (0, String::new()),
        };
        let mut result = ApiResult::local_failure(
            spec.id.clone(),
            annotation
                .map(str::to_string)
                .unwrap_or_else(|| failure.message()),
            self.clock.now(),
        );
        result.status = status;
        result.status_text = status_text;
        result.retries = retries;
        if let Some(record) = record {
            result.category = Some(record.category);
            result.user_message = Some(record.category.user_message().to_string());
        }
        result
    }

    fn cancelled(
        &self,
        spec: &RequestSpec,
        errors: Vec<ErrorRecord>,
        attempts: u32,
        retries: u32,
    ) -> Execution {
        debug!("{} cancelled after {} attempt(s)", spec.id, attempts);
        let mut result = ApiResult::cancelled(spec.id.clone(), self.clock.now());
        result.retries = retries;
        Execution {
            result,
            errors,
            attempts,
            cancelled: true,
        }
    }
}

/// Best-effort text of a panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;
    use crate::error::Result;
    use crate::network::classify::ErrorCategory;
    use crate::network::retry::{RetryConfig, RetryPolicy};
    use crate::response::messages;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    /// Replays a fixed script of outcomes, repeating the last one.
    struct Scripted {
        script: Mutex<VecDeque<Result<TransportResponse>>>,
        calls: AtomicU32,
    }

    impl Scripted {
        fn new(script: Vec<Result<TransportResponse>>) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(script.into()),
                calls: AtomicU32::new(0),
            })
        }
    }

    #[async_trait]
    impl NetworkTransport for Scripted {
        async fn send(&self, _request: &TransportRequest) -> Result<TransportResponse> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut script = self.script.lock().unwrap();
            if script.len() > 1 {
                script.pop_front().unwrap()
            } else {
                match script.front().unwrap() {
                    Ok(response) => Ok(response.clone()),
                    Err(e) => Err(RelayError::Other(e.to_string())),
                }
            }
        }
    }

    struct Panicking;

    #[async_trait]
    impl NetworkTransport for Panicking {
        async fn send(&self, _request: &TransportRequest) -> Result<TransportResponse> {
            panic!("transport exploded");
        }
    }

    fn executor(transport: Arc<dyn NetworkTransport>) -> RequestExecutor {
        let policy = Arc::new(RetryPolicy::new(RetryConfig::new()));
        RequestExecutor::new(
            transport,
            RecoveryStrategy::new(policy, None),
            Arc::new(SystemClock),
        )
    }

    fn ok() -> Result<TransportResponse> {
        Ok(TransportResponse::json(200, &serde_json::json!({"ok": true})))
    }

    fn status(code: u16) -> Result<TransportResponse> {
        Ok(TransportResponse::new(code, ""))
    }

    #[tokio::test]
    async fn test_success_first_attempt() {
        let transport = Scripted::new(vec![ok()]);
        let spec = RequestSpec::get("http://api.test/x");
        let exec = executor(transport.clone())
            .execute_with_retry(&spec, &spec.url, &CancellationToken::new())
            .await;

        assert!(exec.result.success);
        assert_eq!(exec.result.retries, 0);
        assert_eq!(exec.attempts, 1);
        assert_eq!(exec.result.request_id, spec.id);
        assert_eq!(exec.result.data.unwrap().as_json().unwrap()["ok"], true);
    }

    #[tokio::test(start_paused = true)]
    async fn test_server_error_then_success() {
        let transport = Scripted::new(vec![status(503), status(502), ok()]);
        let spec = RequestSpec::get("http://api.test/x");
        let exec = executor(transport.clone())
            .execute_with_retry(&spec, &spec.url, &CancellationToken::new())
            .await;

        assert!(exec.result.success);
        assert_eq!(exec.result.retries, 2);
        assert_eq!(exec.errors.len(), 2);
        assert!(exec.errors.iter().all(|e| e.category == ErrorCategory::Server));
        assert_eq!(transport.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_client_error_not_retried() {
        let transport = Scripted::new(vec![status(404)]);
        let spec = RequestSpec::get("http://api.test/missing");
        let exec = executor(transport.clone())
            .execute_with_retry(&spec, &spec.url, &CancellationToken::new())
            .await;

        assert!(!exec.result.success);
        assert_eq!(exec.result.status, 404);
        assert_eq!(exec.result.retries, 0);
        assert_eq!(exec.result.category, Some(ErrorCategory::Client));
        assert_eq!(transport.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_attempt_deadline_is_network_failure() {
        struct Slow;

        #[async_trait]
        impl NetworkTransport for Slow {
            async fn send(&self, _request: &TransportRequest) -> Result<TransportResponse> {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(TransportResponse::new(200, ""))
            }
        }

        let spec = RequestSpec::get("http://api.test/slow").with_timeout(Duration::from_millis(50));
        let exec = executor(Arc::new(Slow))
            .execute_with_retry(&spec, &spec.url, &CancellationToken::new())
            .await;

        assert!(!exec.result.success);
        assert_eq!(exec.result.category, Some(ErrorCategory::Network));
        assert_eq!(exec.result.retries, 3);
        assert_eq!(exec.attempts, 3);
        assert!(exec.result.error.unwrap().contains("timeout"));
    }

    #[tokio::test]
    async fn test_panic_becomes_unknown_and_retries_once() {
        let spec = RequestSpec::get("http://api.test/x");
        let exec = executor(Arc::new(Panicking))
            .execute_with_retry(&spec, &spec.url, &CancellationToken::new())
            .await;

        assert!(!exec.result.success);
        assert_eq!(exec.result.status, 0);
        assert_eq!(exec.result.category, Some(ErrorCategory::Unknown));
        assert_eq!(exec.attempts, 2);
        assert_eq!(exec.result.retries, 1);
        assert_eq!(exec.result.retries, exec.reexecutions());
        assert!(exec.result.error.unwrap().contains("transport exploded"));
    }

    #[tokio::test]
    async fn test_auth_failure_after_refresh_counts_one_retry() {
        struct Refresher;

        #[async_trait]
        impl crate::network::recovery::CredentialRefresher for Refresher {
            async fn refresh(&self) -> Result<()> {
                Ok(())
            }
        }

        let transport = Scripted::new(vec![status(401)]);
        let policy = Arc::new(RetryPolicy::new(RetryConfig::new()));
        let executor = RequestExecutor::new(
            transport.clone(),
            RecoveryStrategy::new(policy, Some(Arc::new(Refresher))),
            Arc::new(SystemClock),
        );
        let spec = RequestSpec::get("http://api.test/private");
        let exec = executor
            .execute_with_retry(&spec, &spec.url, &CancellationToken::new())
            .await;

        assert!(!exec.result.success);
        assert_eq!(exec.result.status, 401);
        assert_eq!(exec.result.category, Some(ErrorCategory::Authentication));
        assert_eq!(exec.attempts, 2);
        assert_eq!(exec.result.retries, 1);
    }

    #[tokio::test]
    async fn test_parse_failure_stays_success() {
        let bad = TransportResponse::new(200, "{oops").with_header("Content-Type", "application/json");
        let transport = Scripted::new(vec![Ok(bad)]);
        let spec = RequestSpec::get("http://api.test/x");
        let exec = executor(transport)
            .execute_with_retry(&spec, &spec.url, &CancellationToken::new())
            .await;

        assert!(exec.result.success);
        assert!(exec.result.data.is_none());
        assert!(exec.result.parse_error.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_during_backoff() {
        let transport = Scripted::new(vec![status(500)]);
        let executor = executor(transport.clone());
        let spec = RequestSpec::get("http://api.test/x");
        let token = CancellationToken::new();

        let canceller = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(500)).await;
            canceller.cancel();
        });

        let exec = executor.execute_with_retry(&spec, &spec.url, &token).await;
        assert!(exec.cancelled);
        assert_eq!(exec.result.error.as_deref(), Some(messages::CANCELLED));
        assert_eq!(transport.calls.load(Ordering::SeqCst), 1);
    }
}
