//! Engine Composition
//!
//! Wires the durable stores, connectivity monitor, schedulers, and
//! providers into one running engine. Both queues share a single sled
//! database (one tree per queue) and the same connectivity monitor, so a
//! reconnect edge wakes both of them.

use crate::config::BackhaulConfig;
use crate::connectivity::{spawn_probe, ConnectivityMonitor, HttpProbe};
use crate::error::SyncError;
use crate::message::{Channel, DeliveryMessage};
use crate::operation::{ConflictRecord, Operation};
use crate::provider::{HttpEmailProvider, HttpSmsProvider, MessageProvider, ProviderRegistry};
use crate::queue::delivery::DeliveryQueue;
use crate::queue::sync::SyncQueue;
use crate::remote::{HttpRemoteAuthority, RemoteAuthority};
use crate::report::{FailureReporter, LogReporter};
use crate::resolver::ConflictResolver;
use crate::store::persistence::SledQueueStore;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

const OPERATIONS_TREE: &str = "operations";
const CONFLICTS_TREE: &str = "conflicts";
const MESSAGES_TREE: &str = "messages";

const PROBE_INTERVAL: Duration = Duration::from_secs(15);
const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// A fully wired engine: both queue instantiations plus the shared
/// connectivity monitor.
pub struct Engine {
    connectivity: Arc<ConnectivityMonitor>,
    sync: Arc<SyncQueue>,
    delivery: Arc<DeliveryQueue>,
    probe_task: parking_lot::Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl Engine {
    /// Build an engine against explicit remote and provider implementations.
    ///
    /// Opens (or creates) the sled database under `config.storage.path`
    /// and restores both queues from it.
    pub fn open(
        config: &BackhaulConfig,
        remote: Arc<dyn RemoteAuthority>,
        providers: ProviderRegistry,
    ) -> Result<Self, SyncError> {
        config.validate().map_err(|errors| {
            let rendered: Vec<String> = errors.iter().map(|e| e.to_string()).collect();
            SyncError::Config(format!(
                "Configuration validation failed:\n{}",
                rendered.join("\n")
            ))
        })?;

        let db = sled::open(&config.storage.path).map_err(crate::error::StorageError::from)?;
        let operations = Arc::new(SledQueueStore::<Operation>::open(&db, OPERATIONS_TREE)?);
        let conflicts = Arc::new(SledQueueStore::<ConflictRecord>::open(&db, CONFLICTS_TREE)?);
        let messages = Arc::new(SledQueueStore::<DeliveryMessage>::open(&db, MESSAGES_TREE)?);

        let connectivity = Arc::new(ConnectivityMonitor::new(false));
        let reporter: Arc<dyn FailureReporter> = Arc::new(LogReporter);

        let sync = SyncQueue::new(
            operations,
            conflicts,
            remote,
            Arc::clone(&connectivity),
            ConflictResolver::new(config.conflict_policy),
            Arc::clone(&reporter),
            config.sync.clone(),
        )?;
        let delivery = DeliveryQueue::new(
            messages,
            providers,
            Arc::clone(&connectivity),
            reporter,
            config.delivery.clone(),
        )?;

        info!(
            path = %config.storage.path.display(),
            "Engine opened"
        );
        Ok(Self {
            connectivity,
            sync,
            delivery,
            probe_task: parking_lot::Mutex::new(None),
        })
    }

    /// Build an engine entirely from configuration, with the HTTP remote
    /// authority and the HTTP email/SMS providers.
    pub fn from_config(config: &BackhaulConfig) -> Result<Self, SyncError> {
        let remote: Arc<dyn RemoteAuthority> = Arc::new(HttpRemoteAuthority::new(&config.remote)?);

        let email: Arc<dyn MessageProvider> =
            Arc::new(HttpEmailProvider::new(config.providers.primary.clone())?);
        let sms: Arc<dyn MessageProvider> =
            Arc::new(HttpSmsProvider::new(config.providers.secondary.clone())?);
        let providers = ProviderRegistry::new()
            .register(Channel::Primary, email)
            .register(Channel::Secondary, sms);

        Self::open(config, remote, providers)
    }

    /// Start both schedulers and the connectivity probe against the remote
    /// authority's health endpoint.
    pub fn start(&self, config: &BackhaulConfig) -> Result<(), SyncError> {
        self.sync.start();
        self.delivery.start();

        let mut probe_task = self.probe_task.lock();
        if probe_task.is_none() {
            let url = format!(
                "{}/api/health",
                config.remote.base_url.trim_end_matches('/')
            );
            let probe = Arc::new(HttpProbe::new(url, PROBE_TIMEOUT)?);
            *probe_task = Some(spawn_probe(
                Arc::clone(&self.connectivity),
                probe,
                PROBE_INTERVAL,
            ));
        }
        Ok(())
    }

    /// Stop the probe and both schedulers. Queue contents remain on disk.
    pub fn shutdown(&self) {
        if let Some(task) = self.probe_task.lock().take() {
            task.abort();
        }
        self.sync.stop();
        self.delivery.stop();
        info!("Engine stopped");
    }

    pub fn connectivity(&self) -> &Arc<ConnectivityMonitor> {
        &self.connectivity
    }

    pub fn sync_queue(&self) -> &Arc<SyncQueue> {
        &self.sync
    }

    pub fn delivery_queue(&self) -> &Arc<DeliveryQueue> {
        &self.delivery
    }
}
