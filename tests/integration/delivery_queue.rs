//! End-to-end delivery queue behavior over durable storage

use crate::integration::test_utils::{attendance_message, ScriptedProvider};
use backhaul::connectivity::ConnectivityMonitor;
use backhaul::error::SyncError;
use backhaul::message::{Channel, DeliveryMessage};
use backhaul::provider::ProviderRegistry;
use backhaul::queue::delivery::{DeliveryConfig, DeliveryQueue};
use backhaul::report::LogReporter;
use backhaul::store::persistence::SledQueueStore;
use backhaul::types::ItemStatus;
use std::sync::Arc;
use tempfile::TempDir;

fn sled_delivery_queue(
    dir: &TempDir,
    providers: ProviderRegistry,
    config: DeliveryConfig,
    online: bool,
) -> (Arc<DeliveryQueue>, Arc<ConnectivityMonitor>) {
    let db = sled::open(dir.path().join("queues")).unwrap();
    let store = Arc::new(SledQueueStore::<DeliveryMessage>::open(&db, "messages").unwrap());
    let connectivity = Arc::new(ConnectivityMonitor::new(online));
    let queue = DeliveryQueue::new(
        store,
        providers,
        Arc::clone(&connectivity),
        Arc::new(LogReporter),
        config,
    )
    .unwrap();
    (queue, connectivity)
}

fn fast_config() -> DeliveryConfig {
    DeliveryConfig {
        backoff_multiplier: 0.0,
        ..DeliveryConfig::default()
    }
}

#[tokio::test]
async fn offline_messages_deliver_on_reconnect() {
    let dir = TempDir::new().unwrap();
    let provider = ScriptedProvider::new(true, vec![]);
    let registry = ProviderRegistry::new().register(Channel::Primary, provider.clone());
    let (queue, connectivity) = sled_delivery_queue(&dir, registry, fast_config(), false);

    queue.enqueue(attendance_message()).unwrap();
    queue.enqueue(attendance_message()).unwrap();
    assert!(provider.sent().is_empty());

    connectivity.set_online(true);
    let summary = queue.drain_now().await.unwrap();

    assert_eq!(summary.completed, 2);
    assert_eq!(provider.sent().len(), 2);
    assert_eq!(queue.status().pending, 0);
}

#[tokio::test]
async fn undelivered_messages_survive_restart() {
    let dir = TempDir::new().unwrap();
    let id = {
        let provider = ScriptedProvider::new(true, vec![]);
        let registry = ProviderRegistry::new().register(Channel::Primary, provider);
        let (queue, _connectivity) = sled_delivery_queue(&dir, registry, fast_config(), false);
        queue.enqueue(attendance_message()).unwrap()
    };

    let provider = ScriptedProvider::new(true, vec![]);
    let registry = ProviderRegistry::new().register(Channel::Primary, provider.clone());
    let (queue, connectivity) = sled_delivery_queue(&dir, registry, fast_config(), false);

    assert_eq!(queue.message(id).unwrap().status, ItemStatus::Pending);
    connectivity.set_online(true);
    queue.drain_now().await.unwrap();
    assert_eq!(provider.sent().len(), 1);
    assert!(queue.message(id).is_none());
}

#[tokio::test]
async fn transient_gateway_failure_retries_then_delivers() {
    let dir = TempDir::new().unwrap();
    let provider = ScriptedProvider::new(
        true,
        vec![Err(SyncError::Transient("gateway 503".to_string()))],
    );
    let registry = ProviderRegistry::new().register(Channel::Primary, provider.clone());
    let (queue, connectivity) = sled_delivery_queue(&dir, registry, fast_config(), false);

    queue.enqueue(attendance_message()).unwrap();
    connectivity.set_online(true);
    let summary = queue.drain_now().await.unwrap();

    assert_eq!(summary.retried, 1);
    assert_eq!(summary.completed, 1);
    assert_eq!(provider.sent().len(), 1);
}

#[tokio::test]
async fn unconfigured_channel_fails_without_retries() {
    let dir = TempDir::new().unwrap();
    let provider = ScriptedProvider::new(false, vec![]);
    let registry = ProviderRegistry::new().register(Channel::Primary, provider.clone());
    let (queue, connectivity) = sled_delivery_queue(&dir, registry, fast_config(), false);

    let id = queue.enqueue(attendance_message()).unwrap();
    connectivity.set_online(true);
    let summary = queue.drain_now().await.unwrap();

    assert_eq!(summary.failed, 1);
    assert_eq!(summary.retried, 0);
    let message = queue.message(id).unwrap();
    assert_eq!(message.status, ItemStatus::Failed);
    assert_eq!(message.retry_count, 0);
    assert!(provider.sent().is_empty());
}

#[tokio::test]
async fn channels_are_independent() {
    let dir = TempDir::new().unwrap();
    let email = ScriptedProvider::new(true, vec![]);
    // No secondary provider registered at all.
    let registry = ProviderRegistry::new().register(Channel::Primary, email.clone());
    let (queue, connectivity) = sled_delivery_queue(&dir, registry, fast_config(), false);

    let primary_id = queue.enqueue(attendance_message()).unwrap();
    let mut sms = attendance_message();
    sms.channel = Channel::Secondary;
    let secondary_id = queue.enqueue(sms).unwrap();

    connectivity.set_online(true);
    queue.drain_now().await.unwrap();

    assert!(queue.message(primary_id).is_none(), "primary delivered");
    assert_eq!(
        queue.message(secondary_id).unwrap().status,
        ItemStatus::Failed,
        "secondary failed without blocking the primary channel"
    );
}
