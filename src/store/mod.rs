//! Durable Store
//!
//! Crash-safe persistence for the operation and delivery queues. The store
//! owns persisted state; schedulers keep a transient in-memory working copy
//! synchronized back here after every state transition.

pub mod persistence;

pub use persistence::SledQueueStore;

use crate::error::StorageError;
use crate::message::DeliveryMessage;
use crate::operation::{ConflictRecord, Operation};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

/// A record family the durable store can persist.
pub trait QueueRecord: Clone + Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Stable 16-byte key (UUIDv7, so keys sort by creation time).
    fn key(&self) -> [u8; 16];

    /// Timestamp used to restore enqueue order at load time.
    fn enqueued_at(&self) -> DateTime<Utc>;
}

impl QueueRecord for Operation {
    fn key(&self) -> [u8; 16] {
        self.id.as_bytes()
    }

    fn enqueued_at(&self) -> DateTime<Utc> {
        self.enqueued_at
    }
}

impl QueueRecord for DeliveryMessage {
    fn key(&self) -> [u8; 16] {
        self.id.as_bytes()
    }

    fn enqueued_at(&self) -> DateTime<Utc> {
        self.enqueued_at
    }
}

impl QueueRecord for ConflictRecord {
    fn key(&self) -> [u8; 16] {
        *self.id.as_bytes()
    }

    fn enqueued_at(&self) -> DateTime<Utc> {
        self.recorded_at
    }
}

/// Durable Store interface
///
/// The whole record set is small (bounded by the queue capacity), so
/// whole-set atomic replace is the only transaction the schedulers need.
pub trait QueueStore<R: QueueRecord>: Send + Sync {
    /// Add a new record. Fails only if storage is unavailable.
    fn append(&self, record: &R) -> Result<(), StorageError>;

    /// Atomically overwrite the full persisted set.
    fn replace_all(&self, records: &[R]) -> Result<(), StorageError>;

    /// Load every persisted record, sorted by enqueue time.
    fn load_all(&self) -> Result<Vec<R>, StorageError>;

    /// Flush pending writes to disk.
    fn flush(&self) -> Result<(), StorageError>;
}

/// In-memory store used by tests and as an injectable fake collaborator.
pub struct MemoryQueueStore<R> {
    records: Mutex<Vec<R>>,
    writes: AtomicUsize,
    unavailable: AtomicBool,
}

impl<R: QueueRecord> MemoryQueueStore<R> {
    pub fn new() -> Self {
        Self {
            records: Mutex::new(Vec::new()),
            writes: AtomicUsize::new(0),
            unavailable: AtomicBool::new(false),
        }
    }

    /// Number of mutating calls observed (append + replace_all).
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    /// Simulate storage going away; subsequent calls fail.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check_available(&self) -> Result<(), StorageError> {
        if self.unavailable.load(Ordering::SeqCst) {
            Err(StorageError::Unavailable("memory store offline".to_string()))
        } else {
            Ok(())
        }
    }
}

impl<R: QueueRecord> Default for MemoryQueueStore<R> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R: QueueRecord> QueueStore<R> for MemoryQueueStore<R> {
    fn append(&self, record: &R) -> Result<(), StorageError> {
        self.check_available()?;
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.records.lock().push(record.clone());
        Ok(())
    }

    fn replace_all(&self, records: &[R]) -> Result<(), StorageError> {
        self.check_available()?;
        self.writes.fetch_add(1, Ordering::SeqCst);
        *self.records.lock() = records.to_vec();
        Ok(())
    }

    fn load_all(&self) -> Result<Vec<R>, StorageError> {
        self.check_available()?;
        let mut records = self.records.lock().clone();
        records.sort_by_key(|r| (r.enqueued_at(), r.key()));
        Ok(records)
    }

    fn flush(&self) -> Result<(), StorageError> {
        self.check_available()
    }
}
