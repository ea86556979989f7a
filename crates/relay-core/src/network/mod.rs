//! Network-facing resilience logic.
//!
//! This module provides:
//! - Failure classification into six categories with fixed policies
//! - Exponential backoff and the retry budget
//! - Recovery decisions, including credential refresh
//! - The attempt loop that drives a transport
//! - Connectivity signals and transition monitoring

mod classify;
mod connectivity;
mod executor;
mod recovery;
mod retry;
mod transport;

pub use classify::{
    category_for_status, classify, CategoryPolicy, ErrorCategory, ErrorRecord, Failure,
    RecoveryKind,
};
pub use connectivity::{
    ConnectivityEvent, ConnectivitySignal, ConnectivityState, ManualSignal, NetworkStateMonitor,
    ProbeConfig, ProbeSignal,
};
pub use executor::{Execution, RequestExecutor};
pub(crate) use executor::panic_message;
pub use recovery::{CredentialRefresher, RecoveryAction, RecoveryState, RecoveryStrategy};
pub use retry::{RetryConfig, RetryPolicy};
pub use transport::{NetworkTransport, ReqwestTransport, TransportRequest, TransportResponse};
