//! The client facade.
//!
//! `ResilientClient::request` is the single entry point. It validates the
//! spec, serves fresh cache hits, parks requests while offline, and otherwise
//! hands the call to the executor. Whatever happens it returns an
//! `ApiResult`; panics raised anywhere underneath are caught here.

mod builder;
mod state;

pub use builder::ClientBuilder;

use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use futures::FutureExt;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};
use url::Url;

use crate::cancel::CancellationToken;
use crate::clock::Clock;
use crate::config::ClientConfig;
use crate::error::Result;
use crate::network::{
    panic_message, ConnectivityEvent, ErrorCategory, Execution, NetworkStateMonitor,
    NetworkTransport, RequestExecutor,
};
use crate::request::RequestSpec;
use crate::response::{messages, ApiResult};
use crate::stats::StatsSnapshot;
use state::StateCell;

/// HTTP client with retry, recovery, caching and offline queueing.
///
/// One instance is meant to be shared (behind an `Arc`) by every caller.
/// Dropping it stops its background tasks.
pub struct ResilientClient {
    inner: Arc<ClientInner>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

pub(crate) struct ClientInner {
    pub(crate) config: ClientConfig,
    pub(crate) base_url: Option<Url>,
    pub(crate) state: StateCell,
    pub(crate) executor: RequestExecutor,
    pub(crate) monitor: Arc<NetworkStateMonitor>,
    pub(crate) clock: Arc<dyn Clock>,
    /// Wakes the drainer when a request was queued after the network returned.
    pub(crate) drain_notify: Notify,
}

/// Stops a request's work and releases its registration (and queue slot)
/// when the caller finishes or goes away.
struct InFlightGuard<'a> {
    inner: &'a ClientInner,
    id: String,
    ticket: u64,
    token: CancellationToken,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.token.cancel();
        self.inner.state.lock().abandon(&self.id, self.ticket);
    }
}

impl ResilientClient {
    /// Start configuring a client around `transport`.
    pub fn builder(transport: Arc<dyn NetworkTransport>) -> ClientBuilder {
        ClientBuilder::new(transport)
    }

    /// Execute a request. Never panics and never returns an error: every
    /// outcome, including internal faults, is an `ApiResult`.
    pub async fn request(&self, spec: RequestSpec) -> ApiResult {
        let id = spec.id.clone();
        match AssertUnwindSafe(self.inner.handle(spec)).catch_unwind().await {
            Ok(result) => result,
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                error!("Request {} hit an internal fault: {}", id, message);
                let mut result = ApiResult::local_failure(
                    id,
                    format!("internal fault: {}", message),
                    self.inner.clock.now(),
                );
                result.category = Some(ErrorCategory::Unknown);
                result.user_message = Some(ErrorCategory::Unknown.user_message().to_string());
                self.inner.finish(result)
            }
        }
    }

    pub fn get_stats(&self) -> StatsSnapshot {
        self.inner.state.lock().stats.snapshot()
    }

    pub fn reset_stats(&self) {
        self.inner.state.lock().stats.reset();
    }

    pub fn clear_cache(&self) {
        self.inner.state.lock().cache.clear();
        debug!("Response cache cleared");
    }

    /// Pin or unpin a cached URL so sweeps keep it for stale fallback.
    pub fn retain_cached(&self, url: &str, retained: bool) -> bool {
        self.inner.state.lock().cache.retain(url, retained)
    }

    /// Run one cache sweep now. Returns the number of entries removed.
    pub fn sweep_expired(&self) -> usize {
        self.inner.sweep_expired()
    }

    /// Cancel one in-flight or queued request. Returns false if `id` is unknown.
    pub fn cancel(&self, id: &str) -> bool {
        let token = self
            .inner
            .state
            .lock()
            .in_flight
            .get(id)
            .map(|entry| entry.token.clone());
        match token {
            Some(token) => {
                token.cancel();
                debug!("Cancelled {}", id);
                true
            }
            None => false,
        }
    }

    /// Tear the client down.
    ///
    /// Cancels every in-flight request, resolves every queued request as
    /// cancelled, and stops the background tasks. Later calls to `request`
    /// fail with "client closed".
    pub fn cancel_all(&self) {
        let now = self.inner.clock.now();
        let (tokens, queued) = {
            let mut state = self.inner.state.lock();
            state.closed = true;
            let tokens: Vec<CancellationToken> =
                state.in_flight.drain().map(|(_, entry)| entry.token).collect();
            (tokens, state.queue.drain_all())
        };

        for token in &tokens {
            token.cancel();
        }
        let queued_count = queued.len();
        for entry in queued {
            let id = entry.id.clone();
            entry.resolve(ApiResult::cancelled(id, now));
        }
        self.stop_tasks();

        info!(
            "Client shut down: cancelled {} in-flight and {} queued request(s)",
            tokens.len(),
            queued_count
        );
    }

    pub fn is_online(&self) -> bool {
        self.inner.monitor.is_online()
    }

    /// Receive online/offline transitions as this client sees them.
    pub fn subscribe_connectivity(&self) -> broadcast::Receiver<ConnectivityEvent> {
        self.inner.monitor.subscribe()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.state.lock().closed
    }

    pub fn queue_len(&self) -> usize {
        self.inner.state.lock().queue.len()
    }

    pub fn cache_len(&self) -> usize {
        self.inner.state.lock().cache.len()
    }

    pub fn in_flight_len(&self) -> usize {
        self.inner.state.lock().in_flight.len()
    }

    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    fn stop_tasks(&self) {
        let mut tasks = self.tasks.lock().unwrap_or_else(PoisonError::into_inner);
        for task in tasks.drain(..) {
            task.abort();
        }
    }
}

impl Drop for ResilientClient {
    fn drop(&mut self) {
        self.stop_tasks();
    }
}

impl ClientInner {
    async fn handle(&self, spec: RequestSpec) -> ApiResult {
        let now = self.clock.now();
        let closed = {
            let mut state = self.state.lock();
            state.stats.record_request();
            state.closed
        };
        if closed {
            return self.finish(ApiResult::local_failure(
                spec.id.clone(),
                messages::CLIENT_CLOSED,
                now,
            ));
        }

        let url = match spec.validate().and_then(|_| self.resolve_url(&spec.url)) {
            Ok(url) => url,
            Err(e) => {
                debug!("Rejected request {}: {}", spec.id, e);
                return self.finish(ApiResult::invalid_request(spec.id.clone(), now));
            }
        };

        let registration = {
            let mut state = self.state.lock();
            let cached = if spec.cacheable() {
                state
                    .cache
                    .get(&spec.url, false, now)
                    .map(|entry| entry.result.as_cache_hit(&spec.id))
            } else {
                None
            };
            if let Some(hit) = cached {
                debug!("Cache hit for {}", spec.url);
                state.stats.record_cache_hit();
                state.stats.record_outcome(&hit);
                return hit;
            }
            state.register(&spec.id)
        };

        let Some(entry) = registration else {
            warn!("Rejected request {}: id already in flight", spec.id);
            return self.finish(ApiResult::local_failure(
                spec.id.clone(),
                messages::DUPLICATE_REQUEST,
                now,
            ));
        };
        let _guard = InFlightGuard {
            inner: self,
            id: spec.id.clone(),
            ticket: entry.ticket,
            token: entry.token.clone(),
        };

        let result = if self.monitor.is_online() {
            let execution = self
                .executor
                .execute_with_retry(&spec, &url, &entry.token)
                .await;
            self.settle(&spec, execution)
        } else {
            self.wait_offline(spec, url, &entry.token).await
        };
        self.finish(result)
    }

    /// Park a request until the drainer runs it, the caller cancels, or the
    /// queue timeout fires.
    async fn wait_offline(
        &self,
        spec: RequestSpec,
        url: String,
        token: &CancellationToken,
    ) -> ApiResult {
        let id = spec.id.clone();
        let mut handle = {
            let mut state = self.state.lock();
            state.stats.record_queued();
            state.queue.enqueue(spec, url, self.clock.now())
        };
        // Connectivity may have returned before the entry landed.
        if self.monitor.is_online() {
            self.drain_notify.notify_one();
        }

        let timeout = self.config.queue_timeout();
        tokio::select! {
            received = &mut handle => {
                return received.unwrap_or_else(|_| ApiResult::cancelled(id, self.clock.now()));
            }
            _ = token.cancelled() => {
                self.state.lock().queue.remove(&id);
                return ApiResult::cancelled(id, self.clock.now());
            }
            _ = tokio::time::sleep(timeout) => {}
        }

        let expired = self.state.lock().queue.remove(&id).is_some();
        if expired {
            warn!("Request {} expired in the offline queue after {:?}", id, timeout);
            return ApiResult::offline_timeout(id, self.clock.now());
        }
        // The drainer already took it; its result wins.
        handle
            .await
            .unwrap_or_else(|_| ApiResult::cancelled(id, self.clock.now()))
    }

    /// Fold an execution into shared state: stats, cache fill, stale fallback.
    fn settle(&self, spec: &RequestSpec, execution: Execution) -> ApiResult {
        let now = self.clock.now();
        let mut state = self.state.lock();
        state.stats.record_execution(&execution);

        let result = execution.result;
        if !spec.cacheable() || execution.cancelled {
            return result;
        }
        if result.success {
            if let Some(evicted) = state.cache.put(&spec.url, result.clone(), now) {
                debug!("Evicted {} to cache {}", evicted, spec.url);
            }
            return result;
        }

        let stale = state
            .cache
            .get(&spec.url, true, now)
            .map(|entry| entry.result.as_stale_fallback(&spec.id, result.error.clone()));
        match stale {
            Some(stale) => {
                info!("Serving stale cache entry for {} after failure", spec.url);
                state.stats.record_stale_hit();
                stale
            }
            None => result,
        }
    }

    fn finish(&self, result: ApiResult) -> ApiResult {
        self.state.lock().stats.record_outcome(&result);
        result
    }

    /// Re-submit queued requests, oldest first, while online.
    async fn drain_queue(&self) {
        let mut drained = 0usize;
        loop {
            if !self.monitor.is_online() {
                break;
            }
            let (entry, registration) = {
                let mut state = self.state.lock();
                if state.closed {
                    break;
                }
                let Some(entry) = state.queue.pop_front() else {
                    break;
                };
                if entry.is_abandoned() {
                    continue;
                }
                let registration = state
                    .in_flight
                    .get(&entry.id)
                    .map(|f| (f.token.clone(), f.ticket));
                if let Some((_, ticket)) = &registration {
                    state.set_draining(&entry.id, *ticket, true);
                }
                (entry, registration)
            };
            let Some((token, ticket)) = registration else {
                continue;
            };

            debug!("Draining queued request {}", entry.id);
            let execution = self
                .executor
                .execute_with_retry(&entry.spec, &entry.url, &token)
                .await;
            let result = self.settle(&entry.spec, execution);

            let id = entry.id.clone();
            self.state.lock().set_draining(&id, ticket, false);
            if !entry.resolve(result) {
                debug!("Caller for {} left before its queued request finished", id);
                self.state.lock().release(&id, ticket);
            }
            drained += 1;
        }
        if drained > 0 {
            info!("Drained {} queued request(s)", drained);
        }
    }

    fn sweep_expired(&self) -> usize {
        let now = self.clock.now();
        self.state.lock().cache.sweep(now)
    }

    fn resolve_url(&self, raw: &str) -> Result<String> {
        match &self.base_url {
            Some(base) if Url::parse(raw) == Err(url::ParseError::RelativeUrlWithoutBase) => {
                Ok(base.join(raw)?.to_string())
            }
            _ => Ok(raw.to_string()),
        }
    }
}

/// Drain the offline queue whenever connectivity returns.
pub(crate) async fn listen(
    inner: Arc<ClientInner>,
    mut events: broadcast::Receiver<ConnectivityEvent>,
) {
    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(ConnectivityEvent::Online) => inner.drain_queue().await,
                Ok(ConnectivityEvent::Offline) => {}
                Err(RecvError::Lagged(skipped)) => {
                    debug!("Connectivity listener skipped {} event(s)", skipped);
                    inner.drain_queue().await;
                }
                Err(RecvError::Closed) => break,
            },
            _ = inner.drain_notify.notified() => inner.drain_queue().await,
        }
    }
}

/// Periodically drop expired cache entries.
pub(crate) async fn sweep_loop(inner: Arc<ClientInner>, period: Duration) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick completes immediately.
    ticker.tick().await;
    loop {
        ticker.tick().await;
        inner.sweep_expired();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::{ManualSignal, TransportRequest, TransportResponse};
    use async_trait::async_trait;

    struct Echo;

    #[async_trait]
    impl NetworkTransport for Echo {
        async fn send(&self, request: &TransportRequest) -> Result<TransportResponse> {
            Ok(TransportResponse::new(200, request.url.clone())
                .with_header("Content-Type", "text/plain"))
        }
    }

    #[tokio::test]
    async fn test_relative_urls_resolve_against_base() {
        let client = ResilientClient::builder(Arc::new(Echo))
            .config(ClientConfig::new().with_base_url("https://api.example.com/v1/"))
            .build()
            .unwrap();

        let result = client.request(RequestSpec::get("users?limit=5")).await;
        assert_eq!(
            result.data.unwrap().as_text(),
            Some("https://api.example.com/v1/users?limit=5")
        );

        let result = client.request(RequestSpec::get("http://other.test/x")).await;
        assert_eq!(result.data.unwrap().as_text(), Some("http://other.test/x"));
    }

    #[tokio::test]
    async fn test_guard_releases_registration() {
        let client = ResilientClient::builder(Arc::new(Echo))
            .connectivity(Arc::new(ManualSignal::online()))
            .build()
            .unwrap();
        client.request(RequestSpec::post("/x").with_id("p1")).await;
        assert_eq!(client.in_flight_len(), 0);
        assert!(!client.cancel("p1"));
    }

    #[test]
    fn test_build_requires_runtime() {
        let err = ResilientClient::builder(Arc::new(Echo)).build().err().unwrap();
        assert!(err.to_string().contains("Tokio runtime"));
    }
}
