//! Relay Core - a resilient HTTP client library.
//!
//! Requests go through a single facade, `ResilientClient`, which retries
//! recoverable failures with exponential backoff, refreshes credentials on
//! authentication failures, serves stale cache entries during outages, and
//! parks requests while the host reports it is offline. Every call resolves
//! to an `ApiResult`; nothing is thrown past the facade.
//!
//! The network, connectivity signal, credential refresh and clock are all
//! injected, so the whole client runs against mocks in tests.
//!
//! # Example
//!
//! ```rust,ignore
//! use relay_core::{RequestSpec, ReqwestTransport, ResilientClient};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> relay_core::Result<()> {
//!     let client = ResilientClient::builder(Arc::new(ReqwestTransport::new()?)).build()?;
//!
//!     let result = client.request(RequestSpec::get("https://api.example.com/users")).await;
//!     if result.success {
//!         println!("{:?}", result.data);
//!     } else {
//!         eprintln!("failed after {} retries: {:?}", result.retries, result.error);
//!     }
//!
//!     println!("success rate: {:.2}", client.get_stats().success_rate);
//!     Ok(())
//! }
//! ```

pub mod cache;
pub mod cancel;
pub mod client;
pub mod clock;
pub mod config;
pub mod error;
pub mod network;
pub mod queue;
pub mod request;
pub mod response;
pub mod stats;

// Re-export commonly used types
pub use cache::{CacheConfig, CacheEntry, ResponseCache};
pub use cancel::{CancellationToken, CancelledError};
pub use client::{ClientBuilder, ResilientClient};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{ClientConfig, ClientDefaults};
pub use error::{RelayError, Result};
pub use network::{
    ConnectivityEvent, ConnectivitySignal, ConnectivityState, CredentialRefresher, ErrorCategory,
    ErrorRecord, ManualSignal, NetworkStateMonitor, NetworkTransport, ProbeConfig, ProbeSignal,
    ReqwestTransport, RetryConfig, RetryPolicy, TransportRequest, TransportResponse,
};
pub use queue::{OfflineQueue, QueuedRequest};
pub use request::{Headers, HttpMethod, RequestSpec};
pub use response::{messages, ApiResult, ResponseData};
pub use stats::{Stats, StatsSnapshot};
