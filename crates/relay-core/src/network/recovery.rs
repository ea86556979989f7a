//! Recovery decisions for failed attempts.
//!
//! The strategy turns an `ErrorRecord` into "retry after this delay" or
//! "give up". Authentication failures get one credential refresh per
//! `request` call; a successful refresh earns exactly one more attempt even
//! when the retry budget is spent. Unknown failures get one immediate retry.

use crate::error::Result;
use crate::network::classify::{ErrorRecord, RecoveryKind};
use crate::network::retry::RetryPolicy;
use crate::response::messages;
use async_trait::async_trait;
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Refreshes authentication credentials (token refresh, re-login, ...).
///
/// Implemented by the host; the core only decides when to call it.
#[async_trait]
pub trait CredentialRefresher: Send + Sync {
    async fn refresh(&self) -> Result<()>;
}

/// What to do after a failed attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecoveryAction {
    /// Run another attempt after `delay`.
    Retry { delay: Duration },
    /// Surface the failure, optionally replacing its error text.
    GiveUp { annotation: Option<&'static str> },
}

/// Recovery bookkeeping for one `request` call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecoveryState {
    /// A credential refresh has been attempted.
    pub refreshed: bool,
    /// The post-refresh replay has been granted.
    pub refresh_replay: bool,
    /// The single immediate retry for UNKNOWN failures has been used.
    pub immediate_retry_used: bool,
}

/// Decides whether and how to retry.
pub struct RecoveryStrategy {
    policy: Arc<RetryPolicy>,
    refresher: Option<Arc<dyn CredentialRefresher>>,
}

impl RecoveryStrategy {
    pub fn new(policy: Arc<RetryPolicy>, refresher: Option<Arc<dyn CredentialRefresher>>) -> Self {
        Self { policy, refresher }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Decide the next step after failed attempt `attempt` (1-indexed).
    pub async fn recover(
        &self,
        record: &ErrorRecord,
        attempt: u32,
        state: &mut RecoveryState,
    ) -> RecoveryAction {
        let policy = record.category.policy();
        match policy.recovery {
            RecoveryKind::RefreshCredentials => self.refresh_and_retry(state).await,
            _ if !self.policy.should_retry(record, attempt) => {
                debug!(
                    "Not retrying {} failure after attempt {}",
                    record.category, attempt
                );
                RecoveryAction::GiveUp { annotation: None }
            }
            RecoveryKind::Backoff => RecoveryAction::Retry {
                delay: self.policy.delay(attempt),
            },
            RecoveryKind::ImmediateRetry => {
                if state.immediate_retry_used {
                    RecoveryAction::GiveUp { annotation: None }
                } else {
                    state.immediate_retry_used = true;
                    RecoveryAction::Retry {
                        delay: Duration::ZERO,
                    }
                }
            }
            RecoveryKind::None => RecoveryAction::GiveUp { annotation: None },
        }
    }

    async fn refresh_and_retry(&self, state: &mut RecoveryState) -> RecoveryAction {
        if state.refreshed {
            debug!("Credentials already refreshed for this request, giving up");
            return RecoveryAction::GiveUp { annotation: None };
        }
        state.refreshed = true;

        let Some(refresher) = &self.refresher else {
            debug!("No credential refresher configured");
            return RecoveryAction::GiveUp { annotation: None };
        };

        let outcome = AssertUnwindSafe(refresher.refresh()).catch_unwind().await;
        match outcome {
            Ok(Ok(())) => {
                info!("Credentials refreshed, replaying request");
                state.refresh_replay = true;
                RecoveryAction::Retry {
                    delay: Duration::ZERO,
                }
            }
            Ok(Err(e)) => {
                warn!("Credential refresh failed: {}", e);
                RecoveryAction::GiveUp {
                    annotation: Some(messages::CREDENTIAL_REFRESH_FAILED),
                }
            }
            Err(_) => {
                warn!("Credential refresher panicked");
                RecoveryAction::GiveUp {
                    annotation: Some(messages::CREDENTIAL_REFRESH_FAILED),
                }
            }
        }
    }
}
