//! Sync Scheduler / Processor
//!
//! Drives pending operations to completion against the remote authority.
//! Only one drain run is active system-wide; a second trigger while
//! draining is a no-op. Every status transition is persisted back to the
//! durable store before the next item is touched, so a crash mid-sync
//! loses no queued work.

use crate::connectivity::ConnectivityMonitor;
use crate::error::SyncError;
use crate::operation::{ConflictRecord, EntityKind, Operation, OperationKind};
use crate::queue::{backoff_delay, DrainGuard, DrainSummary};
use crate::remote::{RemoteAuthority, RemoteOutcome};
use crate::report::{FailureReport, FailureReporter, FailureSource};
use crate::resolver::{ConflictResolver, ResolutionDecision};
use crate::status::{QueueStatus, StatusPublisher, Subscription};
use crate::store::QueueStore;
use crate::types::{ItemStatus, OperationId};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Configuration for the sync scheduler.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Maximum retry attempts per operation before it fails permanently.
    pub max_retries: u32,
    /// Base of the exponential backoff (`multiplier ^ retry_count` seconds).
    pub backoff_multiplier: f64,
    /// Upper bound on a single backoff delay.
    pub max_backoff_secs: u64,
    /// Queue capacity; settled items are evicted beyond this, oldest first.
    pub max_queue_size: usize,
    /// Period of the timer that forces a pass with no connectivity edge.
    pub sync_interval_secs: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff_multiplier: 2.0,
            max_backoff_secs: 300,
            max_queue_size: 1000,
            sync_interval_secs: 30,
        }
    }
}

/// The entity-operation instantiation of the durable queue.
pub struct SyncQueue {
    store: Arc<dyn QueueStore<Operation>>,
    conflict_store: Arc<dyn QueueStore<ConflictRecord>>,
    remote: Arc<dyn RemoteAuthority>,
    connectivity: Arc<ConnectivityMonitor>,
    resolver: ConflictResolver,
    reporter: Arc<dyn FailureReporter>,
    publisher: StatusPublisher,
    config: SyncConfig,
    /// Transient working copy; the store remains the owner of record.
    operations: Mutex<Vec<Operation>>,
    sync_in_progress: AtomicBool,
    tasks: Mutex<Vec<tokio::task::JoinHandle<()>>>,
}

impl SyncQueue {
    /// Restore the queue from the durable store.
    ///
    /// An in-flight record means the process died mid-sync with the attempt
    /// outcome unknown, so it goes back to pending.
    pub fn new(
        store: Arc<dyn QueueStore<Operation>>,
        conflict_store: Arc<dyn QueueStore<ConflictRecord>>,
        remote: Arc<dyn RemoteAuthority>,
        connectivity: Arc<ConnectivityMonitor>,
        resolver: ConflictResolver,
        reporter: Arc<dyn FailureReporter>,
        config: SyncConfig,
    ) -> Result<Arc<Self>, SyncError> {
        let mut operations = store.load_all()?;
        let mut recovered = 0usize;
        for op in &mut operations {
            if op.status == ItemStatus::InFlight {
                op.status = ItemStatus::Pending;
                recovered += 1;
            }
        }
        if recovered > 0 {
            store.replace_all(&operations)?;
        }
        info!(
            count = operations.len(),
            recovered, "Restored operation queue"
        );

        Ok(Arc::new(Self {
            store,
            conflict_store,
            remote,
            connectivity,
            resolver,
            reporter,
            publisher: StatusPublisher::new(),
            config,
            operations: Mutex::new(operations),
            sync_in_progress: AtomicBool::new(false),
            tasks: Mutex::new(Vec::new()),
        }))
    }

    /// Accept a local mutation into the queue.
    ///
    /// The caller gets no synchronous success/failure signal beyond
    /// acceptance; the final outcome is observed through subscription.
    pub fn enqueue(
        self: &Arc<Self>,
        kind: OperationKind,
        entity: EntityKind,
        payload: Value,
    ) -> Result<OperationId, SyncError> {
        let operation = Operation::new(kind, entity, payload);
        let id = operation.id;

        // The store write happens under the queue lock so it serializes
        // with a concurrent drain's whole-set writes.
        {
            let mut ops = self.operations.lock();
            let mut evicted = false;
            if ops.len() >= self.config.max_queue_size {
                evicted = Self::evict_oldest_settled(&mut ops);
            }
            ops.push(operation.clone());
            if evicted {
                self.store.replace_all(&ops)?;
            } else {
                self.store.append(&operation)?;
            }
        }

        debug!(
            operation_id = %id,
            entity = %operation.entity,
            kind = ?operation.kind,
            "Enqueued operation"
        );
        self.publish_status();

        if self.connectivity.is_online() && !self.sync_in_progress.load(Ordering::Acquire) {
            self.trigger();
        }
        Ok(id)
    }

    /// Kick off a background drain; a no-op if one is already running.
    pub fn trigger(self: &Arc<Self>) {
        let queue = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(error) = queue.sync_now().await {
                warn!(%error, "Background sync pass failed");
            }
        });
    }

    /// Drain pending operations until none remain, retries are exhausted,
    /// or connectivity drops. Returns immediately if a drain is already
    /// running or the monitor reports offline.
    pub async fn sync_now(&self) -> Result<DrainSummary, SyncError> {
        let Some(_guard) = DrainGuard::try_acquire(&self.sync_in_progress) else {
            debug!("Sync already in progress; trigger ignored");
            return Ok(DrainSummary::default());
        };

        let mut summary = DrainSummary::default();
        loop {
            if !self.connectivity.is_online() {
                break;
            }

            // Snapshot pending ids in enqueue order; items arriving
            // mid-pass are picked up by the next pass.
            let batch: Vec<OperationId> = {
                let ops = self.operations.lock();
                ops.iter()
                    .filter(|op| op.status == ItemStatus::Pending)
                    .map(|op| op.id)
                    .collect()
            };
            if batch.is_empty() {
                break;
            }
            info!(pending = batch.len(), "Starting drain pass");

            let count = batch.len();
            for (index, id) in batch.into_iter().enumerate() {
                // Going offline does not abort the in-flight call, it only
                // suppresses starting new ones.
                if !self.connectivity.is_online() {
                    break;
                }
                // Backoff spaces out the next dispatch; the batch tail has
                // nothing behind it to throttle.
                let throttle = index + 1 < count;
                self.process_operation(id, throttle, &mut summary).await?;
            }

            self.purge_completed()?;
        }
        Ok(summary)
    }

    async fn process_operation(
        &self,
        id: OperationId,
        throttle: bool,
        summary: &mut DrainSummary,
    ) -> Result<(), SyncError> {
        let Some(operation) = self.operations.lock().iter().find(|op| op.id == id).cloned()
        else {
            return Ok(());
        };
        if operation.status != ItemStatus::Pending {
            return Ok(());
        }
        summary.attempted += 1;

        if operation.retry_count >= self.config.max_retries {
            self.mark_failed(&operation, "retry budget exhausted".to_string())?;
            summary.failed += 1;
            return Ok(());
        }

        let Some(in_flight) = self.update_operation(id, |op| op.status = ItemStatus::InFlight)?
        else {
            return Ok(());
        };
        debug!(
            operation_id = %id,
            entity = %in_flight.entity,
            attempt = in_flight.retry_count + 1,
            "Dispatching operation"
        );

        match self.remote.apply(&in_flight).await {
            Ok(RemoteOutcome::Applied) => {
                self.update_operation(id, |op| {
                    op.status = ItemStatus::Completed;
                    op.last_error = None;
                })?;
                info!(operation_id = %id, "Operation completed");
                summary.completed += 1;
            }
            Ok(RemoteOutcome::Conflict { remote_payload }) => {
                summary.conflicts += 1;
                self.handle_conflict(&in_flight, remote_payload, throttle, summary)
                    .await?;
            }
            Err(error) => {
                self.retry_later(id, error.to_string(), throttle, summary)
                    .await?;
            }
        }
        Ok(())
    }

    async fn handle_conflict(
        &self,
        operation: &Operation,
        remote_payload: Value,
        throttle: bool,
        summary: &mut DrainSummary,
    ) -> Result<(), SyncError> {
        let decision = self.resolver.decide(&operation.payload, &remote_payload);
        let resolution = decision.resolution();
        match decision {
            ResolutionDecision::AcceptRemote => {
                self.update_operation(operation.id, |op| {
                    op.status = ItemStatus::Completed;
                    op.conflict_resolution = resolution;
                    op.last_error = None;
                })?;
                info!(
                    operation_id = %operation.id,
                    "Conflict resolved by accepting remote state"
                );
                summary.completed += 1;
            }
            ResolutionDecision::ManualReview => {
                let record = ConflictRecord::manual(operation, remote_payload);
                self.conflict_store.append(&record)?;
                self.mark_failed(operation, "conflict held for manual review".to_string())?;
                summary.failed += 1;
            }
            ResolutionDecision::Resubmit(merged) => {
                // Fresh attempt with the merged payload; does not consume
                // the retry budget.
                let Some(resubmit) = self.update_operation(operation.id, |op| {
                    op.payload = merged.clone();
                    op.conflict_resolution = resolution;
                })?
                else {
                    return Ok(());
                };

                match self.remote.apply(&resubmit).await {
                    Ok(RemoteOutcome::Applied) => {
                        self.update_operation(operation.id, |op| {
                            op.status = ItemStatus::Completed;
                            op.last_error = None;
                        })?;
                        info!(
                            operation_id = %operation.id,
                            "Conflict resolved with merged payload"
                        );
                        summary.completed += 1;
                    }
                    Ok(RemoteOutcome::Conflict { .. }) => {
                        // The target moved again between merge and resubmit;
                        // retry the merged payload later.
                        self.retry_later(
                            operation.id,
                            "conflict persisted after merge".to_string(),
                            throttle,
                            summary,
                        )
                        .await?;
                    }
                    Err(error) => {
                        self.retry_later(operation.id, error.to_string(), throttle, summary)
                            .await?;
                    }
                }
            }
        }
        Ok(())
    }

    async fn retry_later(
        &self,
        id: OperationId,
        error: String,
        throttle: bool,
        summary: &mut DrainSummary,
    ) -> Result<(), SyncError> {
        let updated = self.update_operation(id, |op| {
            op.retry_count += 1;
            op.status = ItemStatus::Pending;
            op.last_error = Some(error);
        })?;
        summary.retried += 1;

        if let Some(op) = updated {
            let delay = backoff_delay(
                self.config.backoff_multiplier,
                op.retry_count,
                self.config.max_backoff_secs,
            );
            warn!(
                operation_id = %id,
                retry_count = op.retry_count,
                delay_ms = delay.as_millis() as u64,
                error = op.last_error.as_deref().unwrap_or(""),
                "Operation failed transiently; backing off"
            );
            // Throttles retry storms; unrelated pending operations are
            // still attempted afterwards within the same run.
            if throttle {
                tokio::time::sleep(delay).await;
            }
        }
        Ok(())
    }

    fn mark_failed(&self, operation: &Operation, error: String) -> Result<(), SyncError> {
        self.update_operation(operation.id, |op| {
            op.status = ItemStatus::Failed;
            op.last_error = Some(error.clone());
        })?;
        self.reporter.report(&FailureReport {
            source: FailureSource::Sync,
            item_id: operation.id.to_string(),
            subject: operation.entity.to_string(),
            retry_count: operation.retry_count,
            error,
        });
        Ok(())
    }

    /// Apply a mutation, persist the whole set, publish status.
    fn update_operation<F>(&self, id: OperationId, f: F) -> Result<Option<Operation>, SyncError>
    where
        F: FnOnce(&mut Operation),
    {
        let updated = {
            let mut ops = self.operations.lock();
            let updated = ops.iter_mut().find(|op| op.id == id).map(|op| {
                f(op);
                op.clone()
            });
            // Write while holding the lock: a snapshot persisted after
            // release could clobber a concurrent enqueue's append.
            self.store.replace_all(&ops)?;
            updated
        };
        self.publish_status();
        Ok(updated)
    }

    fn purge_completed(&self) -> Result<(), SyncError> {
        let purged = {
            let mut ops = self.operations.lock();
            let before = ops.len();
            ops.retain(|op| op.status != ItemStatus::Completed);
            if ops.len() != before {
                debug!(remaining = ops.len(), "Purged completed operations");
                self.store.replace_all(&ops)?;
                true
            } else {
                false
            }
        };
        if purged {
            self.publish_status();
        }
        Ok(())
    }

    /// Pending and in-flight work is never dropped; among settled items the
    /// oldest goes first.
    fn evict_oldest_settled(ops: &mut Vec<Operation>) -> bool {
        let candidate = ops
            .iter()
            .enumerate()
            .filter(|(_, op)| op.status.is_terminal())
            .min_by_key(|(_, op)| (op.enqueued_at, op.id))
            .map(|(index, _)| index);
        match candidate {
            Some(index) => {
                let evicted = ops.remove(index);
                warn!(
                    operation_id = %evicted.id,
                    status = ?evicted.status,
                    "Queue at capacity; evicted settled operation"
                );
                true
            }
            None => false,
        }
    }

    /// Spawn the reconnect-edge listener and the periodic timer.
    pub fn start(self: &Arc<Self>) {
        let mut tasks = self.tasks.lock();
        if !tasks.is_empty() {
            return;
        }

        let queue = Arc::clone(self);
        let mut edges = self.connectivity.subscribe();
        tasks.push(tokio::spawn(async move {
            while edges.changed().await.is_ok() {
                let online = *edges.borrow_and_update();
                if online {
                    if let Err(error) = queue.sync_now().await {
                        warn!(%error, "Reconnect sync pass failed");
                    }
                }
            }
        }));

        let queue = Arc::clone(self);
        let period = Duration::from_secs(self.config.sync_interval_secs.max(1));
        tasks.push(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if let Err(error) = queue.sync_now().await {
                    warn!(%error, "Periodic sync pass failed");
                }
            }
        }));

        info!("Sync scheduler started");
    }

    pub fn stop(&self) {
        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
    }

    /// Re-queue a terminally failed operation for another round of attempts.
    pub fn retry_failed(self: &Arc<Self>, id: OperationId) -> Result<bool, SyncError> {
        let eligible = self
            .operations
            .lock()
            .iter()
            .any(|op| op.id == id && op.status == ItemStatus::Failed);
        if !eligible {
            return Ok(false);
        }
        self.update_operation(id, |op| {
            op.status = ItemStatus::Pending;
            op.retry_count = 0;
            op.last_error = None;
        })?;
        if self.connectivity.is_online() {
            self.trigger();
        }
        Ok(true)
    }

    pub fn operation(&self, id: OperationId) -> Option<Operation> {
        self.operations.lock().iter().find(|op| op.id == id).cloned()
    }

    pub fn pending_operations(&self) -> Vec<Operation> {
        self.operations
            .lock()
            .iter()
            .filter(|op| op.status == ItemStatus::Pending)
            .cloned()
            .collect()
    }

    pub fn failed_operations(&self) -> Vec<Operation> {
        self.operations
            .lock()
            .iter()
            .filter(|op| op.status == ItemStatus::Failed)
            .cloned()
            .collect()
    }

    /// Conflicts retained for operator review.
    pub fn conflict_records(&self) -> Result<Vec<ConflictRecord>, SyncError> {
        Ok(self.conflict_store.load_all()?)
    }

    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&QueueStatus) + Send + Sync + 'static,
    {
        self.publisher.subscribe(callback)
    }

    pub fn status(&self) -> QueueStatus {
        let mut status = QueueStatus {
            online: self.connectivity.is_online(),
            sync_in_progress: self.sync_in_progress.load(Ordering::Acquire),
            ..QueueStatus::default()
        };
        for op in self.operations.lock().iter() {
            match op.status {
                ItemStatus::Pending => status.pending += 1,
                ItemStatus::InFlight => status.in_flight += 1,
                ItemStatus::Completed => status.completed += 1,
                ItemStatus::Failed => status.failed += 1,
            }
        }
        status
    }

    fn publish_status(&self) {
        let status = self.status();
        self.publisher.publish(&status);
    }
}
