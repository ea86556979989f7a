//! Mutable state shared by every caller of one client.

use crate::cache::{CacheConfig, ResponseCache};
use crate::cancel::CancellationToken;
use crate::queue::OfflineQueue;
use crate::stats::Stats;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// A registered in-flight request.
#[derive(Debug, Clone)]
pub(crate) struct InFlight {
    pub(crate) token: CancellationToken,
    /// Distinguishes reuse of the same id after `cancel_all`.
    pub(crate) ticket: u64,
    /// The drainer is executing this request; it releases the entry.
    pub(crate) draining: bool,
}

/// Everything behind the client's single lock.
#[derive(Debug)]
pub(crate) struct SharedState {
    pub(crate) cache: ResponseCache,
    pub(crate) queue: OfflineQueue,
    pub(crate) stats: Stats,
    pub(crate) in_flight: HashMap<String, InFlight>,
    pub(crate) next_ticket: u64,
    pub(crate) closed: bool,
}

impl SharedState {
    pub(crate) fn new(cache: CacheConfig) -> Self {
        Self {
            cache: ResponseCache::new(cache),
            queue: OfflineQueue::new(),
            stats: Stats::new(),
            in_flight: HashMap::new(),
            next_ticket: 0,
            closed: false,
        }
    }

    /// Register `id` as in flight. `None` if it already is.
    pub(crate) fn register(&mut self, id: &str) -> Option<InFlight> {
        if self.in_flight.contains_key(id) {
            return None;
        }
        self.next_ticket += 1;
        let entry = InFlight {
            token: CancellationToken::new(),
            ticket: self.next_ticket,
            draining: false,
        };
        self.in_flight.insert(id.to_string(), entry.clone());
        Some(entry)
    }

    /// Release `id` if it is still held under `ticket`.
    pub(crate) fn release(&mut self, id: &str, ticket: u64) {
        if self.in_flight.get(id).is_some_and(|e| e.ticket == ticket) {
            self.in_flight.remove(id);
            // Dropping a queued entry closes its channel.
            self.queue.remove(id);
        }
    }

    /// Release on behalf of a departing caller.
    ///
    /// An entry the drainer is executing stays registered until the drainer
    /// finishes with it, so the id cannot start a second attempt meanwhile.
    pub(crate) fn abandon(&mut self, id: &str, ticket: u64) {
        match self.in_flight.get(id) {
            Some(entry) if entry.ticket == ticket && entry.draining => {}
            _ => self.release(id, ticket),
        }
    }

    /// Mark `id` as taken or finished by the drainer.
    pub(crate) fn set_draining(&mut self, id: &str, ticket: u64, draining: bool) {
        if let Some(entry) = self.in_flight.get_mut(id) {
            if entry.ticket == ticket {
                entry.draining = draining;
            }
        }
    }
}

/// Lock wrapper that shrugs off poisoning.
///
/// Every critical section leaves the state consistent before it can panic,
/// so a poisoned lock is still safe to use.
#[derive(Debug)]
pub(crate) struct StateCell(Mutex<SharedState>);

impl StateCell {
    pub(crate) fn new(state: SharedState) -> Self {
        Self(Mutex::new(state))
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, SharedState> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
