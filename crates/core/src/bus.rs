// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! In-process typed pub/sub with bounded, non-blocking delivery.
//!
//! Publishers never block: each subscriber owns a bounded queue and a full
//! queue drops the event for that subscriber only, bumping a counter. Event
//! loss under overload is preferable to stalling the lifecycle.

use crate::event::{Event, EventKind};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Per-subscriber queue capacity.
pub const SUBSCRIBER_QUEUE_CAPACITY: usize = 100;

struct SubscriberEntry {
    id: u64,
    filter: Option<HashSet<EventKind>>,
    tx: mpsc::Sender<Event>,
    dropped: Arc<AtomicU64>,
}

#[derive(Default)]
struct BusInner {
    next_id: u64,
    subscribers: Vec<SubscriberEntry>,
}

/// Event bus shared by every component of the daemon.
///
/// Cloning is cheap; all clones publish into the same subscriber set.
#[derive(Clone, Default)]
pub struct EventBus {
    inner: Arc<Mutex<BusInner>>,
    dropped_total: Arc<AtomicU64>,
}

/// Receiving side of one subscription.
///
/// Dropping the subscription (or calling [`Subscription::close`]) detaches
/// it from the bus; both are idempotent and safe against concurrent
/// publishes.
pub struct Subscription {
    id: u64,
    rx: mpsc::Receiver<Event>,
    dropped: Arc<AtomicU64>,
    bus: Arc<Mutex<BusInner>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to every event kind.
    pub fn subscribe(&self) -> Subscription {
        self.subscribe_inner(None)
    }

    /// Subscribe to a subset of event kinds.
    pub fn subscribe_filtered(&self, kinds: impl IntoIterator<Item = EventKind>) -> Subscription {
        self.subscribe_inner(Some(kinds.into_iter().collect()))
    }

    fn subscribe_inner(&self, filter: Option<HashSet<EventKind>>) -> Subscription {
        let (tx, rx) = mpsc::channel(SUBSCRIBER_QUEUE_CAPACITY);
        let dropped = Arc::new(AtomicU64::new(0));
        let mut inner = self.inner.lock();
        let id = inner.next_id;
        inner.next_id += 1;
        inner.subscribers.push(SubscriberEntry {
            id,
            filter,
            tx,
            dropped: Arc::clone(&dropped),
        });
        Subscription {
            id,
            rx,
            dropped,
            bus: Arc::clone(&self.inner),
        }
    }

    /// Deliver an event to every matching subscriber without blocking.
    ///
    /// A subscriber whose queue is full loses this event; the loss is
    /// counted on the subscription and on the bus total.
    pub fn publish(&self, event: Event) {
        let mut inner = self.inner.lock();
        // Sweep subscribers whose receiver is gone while we're here.
        inner.subscribers.retain(|s| !s.tx.is_closed());
        for sub in &inner.subscribers {
            if let Some(filter) = &sub.filter {
                if !filter.contains(&event.kind()) {
                    continue;
                }
            }
            if let Err(mpsc::error::TrySendError::Full(_)) = sub.tx.try_send(event.clone()) {
                sub.dropped.fetch_add(1, Ordering::Relaxed);
                self.dropped_total.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(subscriber = sub.id, kind = ?event.kind(), "subscriber queue full, event dropped");
            }
        }
    }

    /// Total events dropped across all subscribers since creation.
    pub fn dropped_total(&self) -> u64 {
        self.dropped_total.load(Ordering::Relaxed)
    }

    /// Number of live subscriptions.
    pub fn subscriber_count(&self) -> usize {
        let mut inner = self.inner.lock();
        inner.subscribers.retain(|s| !s.tx.is_closed());
        inner.subscribers.len()
    }
}

impl Subscription {
    /// Receive the next event. Returns `None` once closed and drained.
    pub async fn recv(&mut self) -> Option<Event> {
        self.rx.recv().await
    }

    /// Non-blocking receive for drain loops and tests.
    pub fn try_recv(&mut self) -> Option<Event> {
        self.rx.try_recv().ok()
    }

    /// Events dropped for this subscriber because its queue was full.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Detach from the bus. Idempotent; already-queued events stay readable.
    pub fn close(&mut self) {
        let mut inner = self.bus.lock();
        inner.subscribers.retain(|s| s.id != self.id);
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
#[path = "bus_tests.rs"]
mod tests;
