//! Connectivity tracking.
//!
//! Provides:
//! - `ConnectivitySignal`, the host's view of online/offline
//! - `ManualSignal` for hosts that push state themselves (and for tests)
//! - `ProbeSignal`, which probes known endpoints in the background
//! - `NetworkStateMonitor`, which turns signal changes into transition events

use crate::error::{RelayError, Result};
use reqwest::Client;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Network connectivity state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectivityState {
    /// Network is available.
    Online = 0,
    /// Network is not available.
    Offline = 1,
    /// No signal observed yet.
    Unknown = 2,
}

impl std::fmt::Display for ConnectivityState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectivityState::Online => write!(f, "online"),
            ConnectivityState::Offline => write!(f, "offline"),
            ConnectivityState::Unknown => write!(f, "unknown"),
        }
    }
}

impl From<bool> for ConnectivityState {
    fn from(online: bool) -> Self {
        if online {
            ConnectivityState::Online
        } else {
            ConnectivityState::Offline
        }
    }
}

/// A connectivity transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectivityEvent {
    Online,
    Offline,
}

/// Atomic wrapper for ConnectivityState.
struct AtomicConnectivityState(AtomicU8);

impl AtomicConnectivityState {
    fn new(state: ConnectivityState) -> Self {
        Self(AtomicU8::new(state as u8))
    }

    fn load(&self) -> ConnectivityState {
        match self.0.load(Ordering::SeqCst) {
            0 => ConnectivityState::Online,
            1 => ConnectivityState::Offline,
            _ => ConnectivityState::Unknown,
        }
    }

    fn swap(&self, state: ConnectivityState) -> ConnectivityState {
        match self.0.swap(state as u8, Ordering::SeqCst) {
            0 => ConnectivityState::Online,
            1 => ConnectivityState::Offline,
            _ => ConnectivityState::Unknown,
        }
    }
}

/// The host platform's connectivity signal.
pub trait ConnectivitySignal: Send + Sync {
    /// Current view of connectivity.
    fn is_online(&self) -> bool;

    /// Receiver that observes every change of `is_online`.
    fn subscribe(&self) -> watch::Receiver<bool>;
}

/// Connectivity signal driven by explicit calls.
#[derive(Debug)]
pub struct ManualSignal {
    tx: watch::Sender<bool>,
}

impl ManualSignal {
    pub fn new(online: bool) -> Self {
        let (tx, _rx) = watch::channel(online);
        Self { tx }
    }

    pub fn online() -> Self {
        Self::new(true)
    }

    pub fn offline() -> Self {
        Self::new(false)
    }

    pub fn set_online(&self, online: bool) {
        self.tx.send_replace(online);
    }
}

impl ConnectivitySignal for ManualSignal {
    fn is_online(&self) -> bool {
        *self.tx.borrow()
    }

    fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }
}

/// Configuration for connectivity probing.
#[derive(Debug, Clone)]
pub struct ProbeConfig {
    /// URLs to probe for connectivity (in order of preference).
    pub probe_urls: Vec<String>,
    /// Timeout for connectivity probes.
    pub probe_timeout: Duration,
    /// How often to re-check connectivity when offline.
    pub offline_recheck_interval: Duration,
    /// How often to verify connectivity when online.
    pub online_verify_interval: Duration,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            probe_urls: Vec::new(),
            probe_timeout: Duration::from_secs(5),
            offline_recheck_interval: Duration::from_secs(30),
            online_verify_interval: Duration::from_secs(300),
        }
    }
}

/// Connectivity signal that probes endpoints with HEAD requests.
///
/// Starts out online; the first probe corrects that if needed. Dropping the
/// last handle stops background probing.
pub struct ProbeSignal {
    client: Client,
    config: ProbeConfig,
    tx: watch::Sender<bool>,
    monitoring_active: AtomicBool,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl ProbeSignal {
    pub fn new(config: ProbeConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.probe_timeout)
            .build()
            .map_err(|e| RelayError::Network {
                message: format!("Failed to create probe client: {}", e),
                cause: None,
            })?;
        let (tx, _rx) = watch::channel(true);
        Ok(Self {
            client,
            config,
            tx,
            monitoring_active: AtomicBool::new(false),
            task: Mutex::new(None),
        })
    }

    /// Probe the configured URLs and publish the outcome.
    ///
    /// With no probe URLs configured the signal stays online.
    pub async fn check_connectivity(&self) -> ConnectivityState {
        if self.config.probe_urls.is_empty() {
            return ConnectivityState::Online;
        }

        for url in &self.config.probe_urls {
            if self.probe_url(url).await {
                self.tx.send_replace(true);
                return ConnectivityState::Online;
            }
            debug!("Probe failed for {}", url);
        }

        if self.tx.send_replace(false) {
            warn!("Network connectivity lost - all probe URLs failed");
        }
        ConnectivityState::Offline
    }

    async fn probe_url(&self, url: &str) -> bool {
        match self.client.head(url).send().await {
            Ok(resp) => {
                let status = resp.status();
                // A 403 still proves the network path works.
                status.is_success() || status.is_redirection() || status.as_u16() == 403
            }
            Err(e) => {
                debug!("Probe request failed: {}", e);
                false
            }
        }
    }

    /// Start background probing.
    ///
    /// The probe task only holds a weak reference between rounds.
    pub fn start_monitoring(self: &Arc<Self>) {
        if self.monitoring_active.swap(true, Ordering::SeqCst) {
            debug!("Background probing already active");
            return;
        }

        let weak = Arc::downgrade(self);
        let handle = tokio::spawn(async move {
            info!("Starting background connectivity probing");

            loop {
                let interval = match weak.upgrade() {
                    Some(signal) if signal.monitoring_active.load(Ordering::SeqCst) => {
                        signal.next_interval()
                    }
                    _ => break,
                };

                tokio::time::sleep(interval).await;

                let Some(signal) = weak.upgrade() else {
                    break;
                };
                if !signal.monitoring_active.load(Ordering::SeqCst) {
                    break;
                }
                signal.check_connectivity().await;
            }

            info!("Background connectivity probing stopped");
        });

        let mut task = self.task.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(previous) = task.replace(handle) {
            previous.abort();
        }
    }

    fn next_interval(&self) -> Duration {
        if *self.tx.borrow() {
            self.config.online_verify_interval
        } else {
            self.config.offline_recheck_interval
        }
    }

    /// Stop background probing and abort the probe task.
    pub fn stop_monitoring(&self) {
        self.monitoring_active.store(false, Ordering::SeqCst);
        let task = self
            .task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(task) = task {
            task.abort();
        }
    }

    pub fn is_monitoring(&self) -> bool {
        self.monitoring_active.load(Ordering::SeqCst)
    }
}

impl Drop for ProbeSignal {
    fn drop(&mut self) {
        let slot = self.task.get_mut().unwrap_or_else(PoisonError::into_inner);
        if let Some(task) = slot.take() {
            task.abort();
        }
    }
}

impl ConnectivitySignal for ProbeSignal {
    fn is_online(&self) -> bool {
        *self.tx.borrow()
    }

    fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }
}

/// Observes a `ConnectivitySignal` and broadcasts transitions.
pub struct NetworkStateMonitor {
    signal: Arc<dyn ConnectivitySignal>,
    state: AtomicConnectivityState,
    events: broadcast::Sender<ConnectivityEvent>,
}

impl NetworkStateMonitor {
    pub fn new(signal: Arc<dyn ConnectivitySignal>) -> Self {
        let initial = ConnectivityState::from(signal.is_online());
        let (events, _) = broadcast::channel(16);
        Self {
            signal,
            state: AtomicConnectivityState::new(initial),
            events,
        }
    }

    /// Current connectivity, read straight from the signal.
    pub fn is_online(&self) -> bool {
        self.signal.is_online()
    }

    /// Last state this monitor observed.
    pub fn connectivity(&self) -> ConnectivityState {
        self.state.load()
    }

    /// Receive future online/offline transitions.
    pub fn subscribe(&self) -> broadcast::Receiver<ConnectivityEvent> {
        self.events.subscribe()
    }

    /// Record an observed value and emit an event if it is a transition.
    pub fn observe(&self, online: bool) -> Option<ConnectivityEvent> {
        let next = ConnectivityState::from(online);
        let previous = self.state.swap(next);
        if previous == next {
            return None;
        }

        let event = if online {
            info!("Network connectivity restored");
            ConnectivityEvent::Online
        } else {
            warn!("Network connectivity lost");
            ConnectivityEvent::Offline
        };
        // No subscribers is fine.
        let _ = self.events.send(event);
        Some(event)
    }

    /// Forward signal changes until the signal goes away.
    pub async fn run(self: Arc<Self>) {
        let mut rx = self.signal.subscribe();
        // Catch a change made between construction and subscription.
        let current = *rx.borrow_and_update();
        self.observe(current);

        while rx.changed().await.is_ok() {
            let online = *rx.borrow_and_update();
            self.observe(online);
        }
        debug!("Connectivity signal closed, monitor exiting");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manual_signal() {
        let signal = ManualSignal::online();
        let rx = signal.subscribe();
        assert!(signal.is_online());

        signal.set_online(false);
        assert!(!signal.is_online());
        assert!(!*rx.borrow());
    }

    #[test]
    fn test_observe_emits_only_transitions() {
        let signal = Arc::new(ManualSignal::online());
        let monitor = NetworkStateMonitor::new(signal);
        let mut events = monitor.subscribe();

        assert_eq!(monitor.observe(true), None);
        assert_eq!(monitor.observe(false), Some(ConnectivityEvent::Offline));
        assert_eq!(monitor.observe(false), None);
        assert_eq!(monitor.observe(true), Some(ConnectivityEvent::Online));

        assert_eq!(events.try_recv().unwrap(), ConnectivityEvent::Offline);
        assert_eq!(events.try_recv().unwrap(), ConnectivityEvent::Online);
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_run_forwards_signal_changes() {
        let signal = Arc::new(ManualSignal::offline());
        let monitor = Arc::new(NetworkStateMonitor::new(signal.clone()));
        let mut events = monitor.subscribe();
        let task = tokio::spawn(monitor.clone().run());

        tokio::task::yield_now().await;
        signal.set_online(true);

        let event = tokio::time::timeout(Duration::from_secs(1), events.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(event, ConnectivityEvent::Online);
        assert_eq!(monitor.connectivity(), ConnectivityState::Online);
        assert!(monitor.is_online());

        task.abort();
    }

    #[tokio::test]
    async fn test_probe_without_urls_stays_online() {
        let signal = ProbeSignal::new(ProbeConfig::default()).unwrap();
        assert_eq!(signal.check_connectivity().await, ConnectivityState::Online);
        assert!(signal.is_online());
        assert!(!signal.is_monitoring());
    }

    #[tokio::test]
    async fn test_probe_unreachable_goes_offline() {
        let config = ProbeConfig {
            probe_urls: vec!["http://127.0.0.1:9/".to_string()],
            probe_timeout: Duration::from_secs(2),
            ..Default::default()
        };
        let signal = ProbeSignal::new(config).unwrap();
        assert_eq!(signal.check_connectivity().await, ConnectivityState::Offline);
        assert!(!signal.is_online());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_monitoring_aborts_probe_task() {
        let signal = Arc::new(ProbeSignal::new(ProbeConfig::default()).unwrap());
        signal.start_monitoring();
        assert!(signal.is_monitoring());
        assert_eq!(Arc::strong_count(&signal), 1);

        signal.stop_monitoring();
        assert!(!signal.is_monitoring());
        assert!(signal.task.lock().unwrap().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropping_probe_signal_ends_probing() {
        let signal = Arc::new(ProbeSignal::new(ProbeConfig::default()).unwrap());
        signal.start_monitoring();
        tokio::time::sleep(Duration::from_secs(600)).await;

        let weak = Arc::downgrade(&signal);
        drop(signal);
        assert!(weak.upgrade().is_none());
    }
}
