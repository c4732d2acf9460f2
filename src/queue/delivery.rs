//! Delivery Queue
//!
//! The notification instantiation of the durable queue. Follows the same
//! single-flight drain, retry, and persistence discipline as the sync
//! scheduler, with two differences: messages go to per-channel providers
//! instead of the remote authority, and there is no conflict path. A
//! missing or unconfigured provider fails the message permanently without
//! consuming retries.

use crate::connectivity::ConnectivityMonitor;
use crate::error::SyncError;
use crate::message::DeliveryMessage;
use crate::provider::ProviderRegistry;
use crate::queue::{backoff_delay, DrainGuard, DrainSummary};
use crate::report::{FailureReport, FailureReporter, FailureSource};
use crate::status::{QueueStatus, StatusPublisher, Subscription};
use crate::store::QueueStore;
use crate::types::{ItemStatus, MessageId};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Configuration for the delivery queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeliveryConfig {
    pub max_retries: u32,
    pub backoff_multiplier: f64,
    pub max_backoff_secs: u64,
    pub max_queue_size: usize,
    pub drain_interval_secs: u64,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff_multiplier: 2.0,
            max_backoff_secs: 300,
            max_queue_size: 1000,
            drain_interval_secs: 60,
        }
    }
}

pub struct DeliveryQueue {
    store: Arc<dyn QueueStore<DeliveryMessage>>,
    providers: ProviderRegistry,
    connectivity: Arc<ConnectivityMonitor>,
    reporter: Arc<dyn FailureReporter>,
    publisher: StatusPublisher,
    config: DeliveryConfig,
    messages: Mutex<Vec<DeliveryMessage>>,
    drain_in_progress: AtomicBool,
    tasks: Mutex<Vec<tokio::task::JoinHandle<()>>>,
}

impl DeliveryQueue {
    /// Restore the queue from the durable store, returning any in-flight
    /// message to pending.
    pub fn new(
        store: Arc<dyn QueueStore<DeliveryMessage>>,
        providers: ProviderRegistry,
        connectivity: Arc<ConnectivityMonitor>,
        reporter: Arc<dyn FailureReporter>,
        config: DeliveryConfig,
    ) -> Result<Arc<Self>, SyncError> {
        let mut messages = store.load_all()?;
        let mut recovered = 0usize;
        for message in &mut messages {
            if message.status == ItemStatus::InFlight {
                message.status = ItemStatus::Pending;
                recovered += 1;
            }
        }
        if recovered > 0 {
            store.replace_all(&messages)?;
        }
        info!(count = messages.len(), recovered, "Restored delivery queue");

        Ok(Arc::new(Self {
            store,
            providers,
            connectivity,
            reporter,
            publisher: StatusPublisher::new(),
            config,
            messages: Mutex::new(messages),
            drain_in_progress: AtomicBool::new(false),
            tasks: Mutex::new(Vec::new()),
        }))
    }

    pub fn enqueue(self: &Arc<Self>, message: DeliveryMessage) -> Result<MessageId, SyncError> {
        let id = message.id;

        // The store write happens under the queue lock so it serializes
        // with a concurrent drain's whole-set writes.
        {
            let mut messages = self.messages.lock();
            let mut evicted = false;
            if messages.len() >= self.config.max_queue_size {
                evicted = Self::evict_oldest_settled(&mut messages);
            }
            messages.push(message.clone());
            if evicted {
                self.store.replace_all(&messages)?;
            } else {
                self.store.append(&message)?;
            }
        }

        debug!(
            message_id = %id,
            channel = message.channel.as_str(),
            category = ?message.category,
            "Enqueued delivery message"
        );
        self.publish_status();

        if self.connectivity.is_online() && !self.drain_in_progress.load(Ordering::Acquire) {
            self.trigger();
        }
        Ok(id)
    }

    pub fn trigger(self: &Arc<Self>) {
        let queue = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(error) = queue.drain_now().await {
                warn!(%error, "Background delivery pass failed");
            }
        });
    }

    /// Drain pending messages until none remain, retries are exhausted, or
    /// connectivity drops.
    pub async fn drain_now(&self) -> Result<DrainSummary, SyncError> {
        let Some(_guard) = DrainGuard::try_acquire(&self.drain_in_progress) else {
            debug!("Delivery drain already in progress; trigger ignored");
            return Ok(DrainSummary::default());
        };

        let mut summary = DrainSummary::default();
        loop {
            if !self.connectivity.is_online() {
                break;
            }

            let batch: Vec<MessageId> = {
                let messages = self.messages.lock();
                messages
                    .iter()
                    .filter(|m| m.status == ItemStatus::Pending)
                    .map(|m| m.id)
                    .collect()
            };
            if batch.is_empty() {
                break;
            }
            info!(pending = batch.len(), "Starting delivery pass");

            let count = batch.len();
            for (index, id) in batch.into_iter().enumerate() {
                if !self.connectivity.is_online() {
                    break;
                }
                // Backoff spaces out the next dispatch; the batch tail has
                // nothing behind it to throttle.
                let throttle = index + 1 < count;
                self.process_message(id, throttle, &mut summary).await?;
            }

            self.purge_completed()?;
        }
        Ok(summary)
    }

    async fn process_message(
        &self,
        id: MessageId,
        throttle: bool,
        summary: &mut DrainSummary,
    ) -> Result<(), SyncError> {
        let Some(message) = self.messages.lock().iter().find(|m| m.id == id).cloned() else {
            return Ok(());
        };
        if message.status != ItemStatus::Pending {
            return Ok(());
        }
        summary.attempted += 1;

        if message.retry_count >= self.config.max_retries {
            self.mark_failed(&message, "retry budget exhausted".to_string())?;
            summary.failed += 1;
            return Ok(());
        }

        // Provider problems are permanent per channel; retrying would only
        // fail the same way.
        let Some(provider) = self.providers.for_channel(message.channel) else {
            self.mark_failed(
                &message,
                format!("no provider registered for {}", message.channel.as_str()),
            )?;
            summary.failed += 1;
            return Ok(());
        };
        if !provider.is_configured() {
            self.mark_failed(
                &message,
                format!("provider {} is not configured", provider.name()),
            )?;
            summary.failed += 1;
            return Ok(());
        }

        let Some(in_flight) = self.update_message(id, |m| m.status = ItemStatus::InFlight)? else {
            return Ok(());
        };
        debug!(
            message_id = %id,
            provider = provider.name(),
            attempt = in_flight.retry_count + 1,
            "Dispatching message"
        );

        match provider.send(&in_flight).await {
            Ok(()) => {
                self.update_message(id, |m| {
                    m.status = ItemStatus::Completed;
                    m.last_error = None;
                })?;
                info!(message_id = %id, provider = provider.name(), "Message delivered");
                summary.completed += 1;
            }
            Err(error @ SyncError::ProviderNotConfigured(_)) => {
                self.mark_failed(&message, error.to_string())?;
                summary.failed += 1;
            }
            Err(error) => {
                let updated = self.update_message(id, |m| {
                    m.retry_count += 1;
                    m.status = ItemStatus::Pending;
                    m.last_error = Some(error.to_string());
                })?;
                summary.retried += 1;

                if let Some(m) = updated {
                    let delay = backoff_delay(
                        self.config.backoff_multiplier,
                        m.retry_count,
                        self.config.max_backoff_secs,
                    );
                    warn!(
                        message_id = %id,
                        retry_count = m.retry_count,
                        delay_ms = delay.as_millis() as u64,
                        %error,
                        "Delivery failed transiently; backing off"
                    );
                    if throttle {
                        tokio::time::sleep(delay).await;
                    }
                }
            }
        }
        Ok(())
    }

    fn mark_failed(&self, message: &DeliveryMessage, error: String) -> Result<(), SyncError> {
        self.update_message(message.id, |m| {
            m.status = ItemStatus::Failed;
            m.last_error = Some(error.clone());
        })?;
        self.reporter.report(&FailureReport {
            source: FailureSource::Delivery,
            item_id: message.id.to_string(),
            subject: message.channel.as_str().to_string(),
            retry_count: message.retry_count,
            error,
        });
        Ok(())
    }

    fn update_message<F>(&self, id: MessageId, f: F) -> Result<Option<DeliveryMessage>, SyncError>
    where
        F: FnOnce(&mut DeliveryMessage),
    {
        let updated = {
            let mut messages = self.messages.lock();
            let updated = messages.iter_mut().find(|m| m.id == id).map(|m| {
                f(m);
                m.clone()
            });
            // Write while holding the lock: a snapshot persisted after
            // release could clobber a concurrent enqueue's append.
            self.store.replace_all(&messages)?;
            updated
        };
        self.publish_status();
        Ok(updated)
    }

    fn purge_completed(&self) -> Result<(), SyncError> {
        let purged = {
            let mut messages = self.messages.lock();
            let before = messages.len();
            messages.retain(|m| m.status != ItemStatus::Completed);
            if messages.len() != before {
                debug!(remaining = messages.len(), "Purged delivered messages");
                self.store.replace_all(&messages)?;
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

    fn evict_oldest_settled(messages: &mut Vec<DeliveryMessage>) -> bool {
        let candidate = messages
            .iter()
            .enumerate()
            .filter(|(_, m)| m.status.is_terminal())
            .min_by_key(|(_, m)| (m.enqueued_at, m.id))
            .map(|(index, _)| index);
        match candidate {
            Some(index) => {
                let evicted = messages.remove(index);
                warn!(
                    message_id = %evicted.id,
                    status = ?evicted.status,
                    "Queue at capacity; evicted settled message"
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
                    if let Err(error) = queue.drain_now().await {
                        warn!(%error, "Reconnect delivery pass failed");
                    }
                }
            }
        }));

        let queue = Arc::clone(self);
        let period = Duration::from_secs(self.config.drain_interval_secs.max(1));
        tasks.push(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if let Err(error) = queue.drain_now().await {
                    warn!(%error, "Periodic delivery pass failed");
                }
            }
        }));

        info!("Delivery scheduler started");
    }

    pub fn stop(&self) {
        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
    }

    pub fn retry_failed(self: &Arc<Self>, id: MessageId) -> Result<bool, SyncError> {
        let eligible = self
            .messages
            .lock()
            .iter()
            .any(|m| m.id == id && m.status == ItemStatus::Failed);
        if !eligible {
            return Ok(false);
        }
        self.update_message(id, |m| {
            m.status = ItemStatus::Pending;
            m.retry_count = 0;
            m.last_error = None;
        })?;
        if self.connectivity.is_online() {
            self.trigger();
        }
        Ok(true)
    }

    pub fn message(&self, id: MessageId) -> Option<DeliveryMessage> {
        self.messages.lock().iter().find(|m| m.id == id).cloned()
    }

    pub fn pending_messages(&self) -> Vec<DeliveryMessage> {
        self.messages
            .lock()
            .iter()
            .filter(|m| m.status == ItemStatus::Pending)
            .cloned()
            .collect()
    }

    pub fn failed_messages(&self) -> Vec<DeliveryMessage> {
        self.messages
            .lock()
            .iter()
            .filter(|m| m.status == ItemStatus::Failed)
            .cloned()
            .collect()
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
            sync_in_progress: self.drain_in_progress.load(Ordering::Acquire),
            ..QueueStatus::default()
        };
        for message in self.messages.lock().iter() {
            match message.status {
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
