//! Status Publisher
//!
//! Fan-out of aggregate queue counts to interested listeners. Subscription
//! returns a disposer handle; the registry is copied before iteration so a
//! subscriber unsubscribing during notification cannot corrupt the walk,
//! and a panicking subscriber is isolated from the rest.

use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tracing::warn;

/// Aggregate counts published after every state-affecting transition.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueueStatus {
    pub pending: usize,
    pub in_flight: usize,
    pub completed: usize,
    pub failed: usize,
    pub online: bool,
    pub sync_in_progress: bool,
}

type Callback = Arc<dyn Fn(&QueueStatus) + Send + Sync>;

#[derive(Default)]
struct Registry {
    subscribers: Mutex<HashMap<u64, Callback>>,
    next_id: AtomicU64,
}

/// Observer registry broadcasting `QueueStatus` snapshots.
#[derive(Clone, Default)]
pub struct StatusPublisher {
    registry: Arc<Registry>,
}

impl StatusPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a listener. Dropping the returned handle unsubscribes.
    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&QueueStatus) + Send + Sync + 'static,
    {
        let id = self.registry.next_id.fetch_add(1, Ordering::Relaxed);
        self.registry
            .subscribers
            .lock()
            .insert(id, Arc::new(callback));
        Subscription {
            id,
            registry: Arc::downgrade(&self.registry),
        }
    }

    /// Notify every subscriber synchronously.
    pub fn publish(&self, status: &QueueStatus) {
        // Copy before iterating so subscriber callbacks may unsubscribe.
        let callbacks: Vec<Callback> = self.registry.subscribers.lock().values().cloned().collect();
        for callback in callbacks {
            if catch_unwind(AssertUnwindSafe(|| callback(status))).is_err() {
                warn!("Status subscriber panicked during notification");
            }
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.registry.subscribers.lock().len()
    }
}

/// Capability handle for one subscription.
pub struct Subscription {
    id: u64,
    registry: Weak<Registry>,
}

impl Subscription {
    pub fn unsubscribe(self) {
        // Drop does the work.
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            registry.subscribers.lock().remove(&self.id);
        }
    }
}
