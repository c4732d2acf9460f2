//! Persistence layer for the durable queues
//!
//! Sled-backed implementation. Each record family (operations, conflicts,
//! delivery messages) lives in its own named tree of one shared database.
//! Records are stored as JSON because payloads are arbitrary JSON values.

use crate::error::StorageError;
use crate::store::{QueueRecord, QueueStore};
use std::collections::HashSet;
use std::marker::PhantomData;
use std::path::Path;

/// Sled-based implementation of `QueueStore`.
pub struct SledQueueStore<R> {
    tree: sled::Tree,
    _record: PhantomData<fn() -> R>,
}

impl<R: QueueRecord> SledQueueStore<R> {
    /// Open a named tree in an already-open database.
    pub fn open(db: &sled::Db, name: &str) -> Result<Self, StorageError> {
        let tree = db.open_tree(name)?;
        Ok(Self {
            tree,
            _record: PhantomData,
        })
    }

    /// Convenience constructor opening a standalone database at `path`.
    pub fn open_at<P: AsRef<Path>>(path: P, name: &str) -> Result<Self, StorageError> {
        let db = sled::open(path)?;
        Self::open(&db, name)
    }

    fn serialize(record: &R) -> Result<Vec<u8>, StorageError> {
        serde_json::to_vec(record)
            .map_err(|e| StorageError::Corrupt(format!("Failed to serialize record: {}", e)))
    }

    fn deserialize(value: &[u8]) -> Result<R, StorageError> {
        serde_json::from_slice(value)
            .map_err(|e| StorageError::Corrupt(format!("Failed to deserialize record: {}", e)))
    }
}

impl<R: QueueRecord> QueueStore<R> for SledQueueStore<R> {
    fn append(&self, record: &R) -> Result<(), StorageError> {
        let value = Self::serialize(record)?;
        self.tree.insert(record.key(), value)?;
        self.tree.flush()?;
        Ok(())
    }

    fn replace_all(&self, records: &[R]) -> Result<(), StorageError> {
        let keep: HashSet<[u8; 16]> = records.iter().map(QueueRecord::key).collect();

        let mut batch = sled::Batch::default();
        for item in self.tree.iter() {
            let (key, _) = item?;
            if key.len() != 16 || !keep.contains(key.as_ref()) {
                batch.remove(key);
            }
        }
        for record in records {
            batch.insert(&record.key(), Self::serialize(record)?);
        }

        self.tree.apply_batch(batch)?;
        self.tree.flush()?;
        Ok(())
    }

    fn load_all(&self) -> Result<Vec<R>, StorageError> {
        let mut records = Vec::new();
        for item in self.tree.iter() {
            let (_, value) = item?;
            records.push(Self::deserialize(&value)?);
        }
        records.sort_by_key(|r| (r.enqueued_at(), r.key()));
        Ok(records)
    }

    fn flush(&self) -> Result<(), StorageError> {
        self.tree.flush()?;
        Ok(())
    }
}
