//! FIFO holding area for requests issued while offline.
//!
//! Each entry carries the oneshot sender its caller is waiting on. Whoever
//! removes an entry from the queue owns resolving it.

use crate::request::RequestSpec;
use crate::response::ApiResult;
use chrono::{DateTime, Utc};
use std::collections::VecDeque;
use tokio::sync::oneshot;
use tracing::debug;

/// A request parked until connectivity returns.
#[derive(Debug)]
pub struct QueuedRequest {
    pub id: String,
    pub spec: RequestSpec,
    /// `spec.url` after base URL resolution.
    pub url: String,
    pub enqueued_at: DateTime<Utc>,
    responder: oneshot::Sender<ApiResult>,
}

impl QueuedRequest {
    /// Hand the final result to the waiting caller.
    ///
    /// Returns false if the caller has already gone away.
    pub fn resolve(self, result: ApiResult) -> bool {
        self.responder.send(result).is_ok()
    }

    /// Whether the caller stopped waiting.
    pub fn is_abandoned(&self) -> bool {
        self.responder.is_closed()
    }
}

/// Offline request queue.
#[derive(Debug, Default)]
pub struct OfflineQueue {
    entries: VecDeque<QueuedRequest>,
}

impl OfflineQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Park `spec` and return the handle its caller awaits.
    pub fn enqueue(
        &mut self,
        spec: RequestSpec,
        url: String,
        now: DateTime<Utc>,
    ) -> oneshot::Receiver<ApiResult> {
        let (responder, handle) = oneshot::channel();
        debug!("Queued {} ({} waiting)", spec.id, self.entries.len() + 1);
        self.entries.push_back(QueuedRequest {
            id: spec.id.clone(),
            spec,
            url,
            enqueued_at: now,
            responder,
        });
        handle
    }

    pub fn pop_front(&mut self) -> Option<QueuedRequest> {
        self.entries.pop_front()
    }

    /// Take the entry for `id` out of the queue, if it is still queued.
    pub fn remove(&mut self, id: &str) -> Option<QueuedRequest> {
        let index = self.entries.iter().position(|q| q.id == id)?;
        self.entries.remove(index)
    }

    /// Empty the queue, oldest first.
    pub fn drain_all(&mut self) -> Vec<QueuedRequest> {
        self.entries.drain(..).collect()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.entries.iter().any(|q| q.id == id)
    }

    pub fn ids(&self) -> Vec<String> {
        self.entries.iter().map(|q| q.id.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
