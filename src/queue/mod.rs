//! Durable Operation Queue
//!
//! One generalized pattern, two instantiations: the entity-operation sync
//! queue ([`sync::SyncQueue`]) and the notification delivery queue
//! ([`delivery::DeliveryQueue`]). Both drain pending items in FIFO order
//! under a single-flight guard, retry transient failures with exponential
//! backoff, and persist every state transition back to the durable store.

pub mod delivery;
pub mod sync;

pub use delivery::{DeliveryConfig, DeliveryQueue};
pub use sync::{SyncConfig, SyncQueue};

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// Counters for one `sync_now`/`flush_now` call (possibly several passes).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainSummary {
    pub attempted: usize,
    pub completed: usize,
    pub failed: usize,
    pub retried: usize,
    pub conflicts: usize,
}

/// Exponential backoff: `multiplier ^ retry_count` seconds, clamped.
pub fn backoff_delay(multiplier: f64, retry_count: u32, max_secs: u64) -> Duration {
    let retry_count = i32::try_from(retry_count).unwrap_or(i32::MAX);
    let secs = multiplier.max(0.0).powi(retry_count);
    Duration::from_secs_f64(secs.min(max_secs as f64))
}

/// Single-flight guard over a drain run. Acquire-or-bail: a second caller
/// gets `None` instead of waiting.
pub(crate) struct DrainGuard<'a> {
    flag: &'a AtomicBool,
}

impl<'a> DrainGuard<'a> {
    pub fn try_acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self { flag })
    }
}

impl Drop for DrainGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}
