//! Shared fixtures for the integration tests

use async_trait::async_trait;
use backhaul::connectivity::ConnectivityMonitor;
use backhaul::error::SyncError;
use backhaul::message::{Channel, DeliveryMessage, MessageCategory, MessagePriority};
use backhaul::operation::{ConflictRecord, Operation};
use backhaul::provider::MessageProvider;
use backhaul::queue::sync::{SyncConfig, SyncQueue};
use backhaul::remote::{RemoteAuthority, RemoteOutcome};
use backhaul::report::LogReporter;
use backhaul::resolver::{ConflictPolicy, ConflictResolver};
use backhaul::store::persistence::SledQueueStore;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tempfile::TempDir;

/// Remote authority fake that plays back a script of outcomes, then
/// returns `Applied` for every further call.
pub struct ScriptedRemote {
    script: Mutex<VecDeque<Result<RemoteOutcome, SyncError>>>,
    calls: AtomicUsize,
    payloads: Mutex<Vec<Value>>,
}

impl ScriptedRemote {
    pub fn new(script: Vec<Result<RemoteOutcome, SyncError>>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.into()),
            calls: AtomicUsize::new(0),
            payloads: Mutex::new(Vec::new()),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn payloads(&self) -> Vec<Value> {
        self.payloads.lock().clone()
    }
}

#[async_trait]
impl RemoteAuthority for ScriptedRemote {
    async fn apply(&self, operation: &Operation) -> Result<RemoteOutcome, SyncError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.payloads.lock().push(operation.payload.clone());
        self.script
            .lock()
            .pop_front()
            .unwrap_or(Ok(RemoteOutcome::Applied))
    }
}

/// Delivery provider fake with a scripted send outcome per call.
pub struct ScriptedProvider {
    configured: bool,
    script: Mutex<VecDeque<Result<(), SyncError>>>,
    sent: Mutex<Vec<DeliveryMessage>>,
}

impl ScriptedProvider {
    pub fn new(configured: bool, script: Vec<Result<(), SyncError>>) -> Arc<Self> {
        Arc::new(Self {
            configured,
            script: Mutex::new(script.into()),
            sent: Mutex::new(Vec::new()),
        })
    }

    pub fn sent(&self) -> Vec<DeliveryMessage> {
        self.sent.lock().clone()
    }
}

#[async_trait]
impl MessageProvider for ScriptedProvider {
    fn is_configured(&self) -> bool {
        self.configured
    }

    async fn send(&self, message: &DeliveryMessage) -> Result<(), SyncError> {
        let outcome = self.script.lock().pop_front().unwrap_or(Ok(()));
        if outcome.is_ok() {
            self.sent.lock().push(message.clone());
        }
        outcome
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

/// A sync queue backed by sled trees in a fresh temp directory.
pub fn sled_sync_queue(
    dir: &TempDir,
    remote: Arc<dyn RemoteAuthority>,
    policy: ConflictPolicy,
    config: SyncConfig,
    online: bool,
) -> (Arc<SyncQueue>, Arc<ConnectivityMonitor>) {
    let db = sled::open(dir.path().join("queues")).unwrap();
    let store = Arc::new(SledQueueStore::<Operation>::open(&db, "operations").unwrap());
    let conflicts = Arc::new(SledQueueStore::<ConflictRecord>::open(&db, "conflicts").unwrap());
    let connectivity = Arc::new(ConnectivityMonitor::new(online));
    let queue = SyncQueue::new(
        store,
        conflicts,
        remote,
        Arc::clone(&connectivity),
        ConflictResolver::new(policy),
        Arc::new(LogReporter),
        config,
    )
    .unwrap();
    (queue, connectivity)
}

/// Configuration with no real backoff so retry tests run instantly.
pub fn fast_sync_config() -> SyncConfig {
    SyncConfig {
        backoff_multiplier: 0.0,
        ..SyncConfig::default()
    }
}

pub fn attendance_message() -> DeliveryMessage {
    DeliveryMessage::new(
        "parent@example.com",
        Channel::Primary,
        MessagePriority::High,
        MessageCategory::Attendance,
        "Attendance recorded",
        "S1 checked in at 08:55",
    )
}
