//! Builder for configuring a `ResilientClient`.

use std::sync::{Arc, Mutex};

use tokio::runtime::Handle;
use tokio::sync::Notify;
use tracing::info;
use url::Url;

use crate::cache::CacheConfig;
use crate::client::state::{SharedState, StateCell};
use crate::client::{listen, sweep_loop, ClientInner, ResilientClient};
use crate::clock::{Clock, SystemClock};
use crate::config::ClientConfig;
use crate::error::{RelayError, Result};
use crate::network::{
    ConnectivitySignal, CredentialRefresher, ManualSignal, NetworkStateMonitor, NetworkTransport,
    RecoveryStrategy, RequestExecutor, RetryConfig, RetryPolicy,
};

/// Builder for configuring a `ResilientClient`.
///
/// Only the transport is required. Without a connectivity signal the client
/// assumes it is always online; without a refresher, authentication failures
/// surface immediately.
///
/// # Example
///
/// ```rust,ignore
/// use relay_core::{ClientConfig, ResilientClient, ReqwestTransport};
/// use std::sync::Arc;
///
/// let client = ResilientClient::builder(Arc::new(ReqwestTransport::new()?))
///     .config(ClientConfig::new().with_max_retries(5))
///     .connectivity(signal)
///     .credential_refresher(refresher)
///     .build()?;
/// ```
pub struct ClientBuilder {
    transport: Arc<dyn NetworkTransport>,
    config: ClientConfig,
    connectivity: Option<Arc<dyn ConnectivitySignal>>,
    refresher: Option<Arc<dyn CredentialRefresher>>,
    clock: Option<Arc<dyn Clock>>,
}

impl ClientBuilder {
    pub fn new(transport: Arc<dyn NetworkTransport>) -> Self {
        Self {
            transport,
            config: ClientConfig::default(),
            connectivity: None,
            refresher: None,
            clock: None,
        }
    }

    /// Replace the default configuration.
    pub fn config(mut self, config: ClientConfig) -> Self {
        self.config = config;
        self
    }

    /// Source of online/offline state.
    ///
    /// Default: always online
    pub fn connectivity(mut self, signal: Arc<dyn ConnectivitySignal>) -> Self {
        self.connectivity = Some(signal);
        self
    }

    /// Collaborator invoked on authentication failures.
    pub fn credential_refresher(mut self, refresher: Arc<dyn CredentialRefresher>) -> Self {
        self.refresher = Some(refresher);
        self
    }

    /// Clock used for cache freshness and timestamps.
    ///
    /// Default: `SystemClock`
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Build the client and start its background tasks.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn build(self) -> Result<ResilientClient> {
        let runtime = Handle::try_current().map_err(|e| RelayError::Config {
            message: format!("ResilientClient must be built inside a Tokio runtime: {}", e),
        })?;
        self.config.validate()?;

        let base_url = match &self.config.base_url {
            Some(base) => Some(Url::parse(base)?),
            None => None,
        };
        let clock: Arc<dyn Clock> = match self.clock {
            Some(clock) => clock,
            None => Arc::new(SystemClock),
        };
        let signal: Arc<dyn ConnectivitySignal> = match self.connectivity {
            Some(signal) => signal,
            None => Arc::new(ManualSignal::online()),
        };

        let policy = Arc::new(RetryPolicy::new(RetryConfig::from(&self.config)));
        let executor = RequestExecutor::new(
            self.transport,
            RecoveryStrategy::new(policy, self.refresher),
            Arc::clone(&clock),
        )
        .with_default_timeout(self.config.default_timeout());
        let monitor = Arc::new(NetworkStateMonitor::new(signal));
        let sweep_interval = self.config.sweep_interval();

        let inner = Arc::new(ClientInner {
            state: StateCell::new(SharedState::new(CacheConfig::from(&self.config))),
            config: self.config,
            base_url,
            executor,
            monitor: Arc::clone(&monitor),
            clock,
            drain_notify: Notify::new(),
        });

        // Subscribe before the forwarder starts so no transition is missed.
        let events = monitor.subscribe();
        let tasks = vec![
            runtime.spawn(Arc::clone(&monitor).run()),
            runtime.spawn(listen(Arc::clone(&inner), events)),
            runtime.spawn(sweep_loop(Arc::clone(&inner), sweep_interval)),
        ];

        info!(
            "Resilient client ready (max_retries={}, cache_capacity={}, online={})",
            inner.config.max_retries,
            inner.config.cache_capacity,
            monitor.is_online()
        );

        Ok(ResilientClient {
            inner,
            tasks: Mutex::new(tasks),
        })
    }
}
