//! Crash and restart behavior of the durable stores

use crate::integration::test_utils::{fast_sync_config, sled_sync_queue, ScriptedRemote};
use backhaul::message::DeliveryMessage;
use backhaul::operation::{EntityKind, Operation, OperationKind};
use backhaul::resolver::ConflictPolicy;
use backhaul::store::persistence::SledQueueStore;
use backhaul::store::QueueStore;
use backhaul::types::ItemStatus;
use serde_json::json;
use tempfile::TempDir;

use crate::integration::test_utils::attendance_message;

#[tokio::test]
async fn pending_operations_survive_restart() {
    let dir = TempDir::new().unwrap();

    let first_ids = {
        let remote = ScriptedRemote::new(vec![]);
        let (queue, _connectivity) = sled_sync_queue(
            &dir,
            remote,
            ConflictPolicy::LastWriteWins,
            fast_sync_config(),
            false,
        );
        (0..3)
            .map(|n| {
                queue
                    .enqueue(
                        OperationKind::Create,
                        EntityKind::Attendance,
                        json!({"studentId": format!("S{}", n)}),
                    )
                    .unwrap()
            })
            .collect::<Vec<_>>()
        // Queue dropped here without draining: simulated shutdown.
    };

    let remote = ScriptedRemote::new(vec![]);
    let (queue, connectivity) = sled_sync_queue(
        &dir,
        remote.clone(),
        ConflictPolicy::LastWriteWins,
        fast_sync_config(),
        false,
    );
    let restored = queue.pending_operations();
    assert_eq!(
        restored.iter().map(|op| op.id).collect::<Vec<_>>(),
        first_ids,
        "restore preserves enqueue order"
    );

    connectivity.set_online(true);
    queue.sync_now().await.unwrap();
    assert_eq!(remote.calls(), 3);
}

#[tokio::test]
async fn in_flight_marker_is_recovered_as_pending() {
    let dir = TempDir::new().unwrap();
    let id = {
        let db = sled::open(dir.path().join("queues")).unwrap();
        let store = SledQueueStore::<Operation>::open(&db, "operations").unwrap();
        let mut op = Operation::new(
            OperationKind::Update,
            EntityKind::Student,
            json!({"id": "S1"}),
        );
        // The process died after marking the attempt but before its outcome.
        op.status = ItemStatus::InFlight;
        store.append(&op).unwrap();
        op.id
    };

    let remote = ScriptedRemote::new(vec![]);
    let (queue, _connectivity) = sled_sync_queue(
        &dir,
        remote,
        ConflictPolicy::LastWriteWins,
        fast_sync_config(),
        false,
    );

    let op = queue.operation(id).unwrap();
    assert_eq!(op.status, ItemStatus::Pending);

    // The recovery is written back, not just held in memory.
    let persisted = {
        drop(queue);
        let db = sled::open(dir.path().join("queues")).unwrap();
        let store = SledQueueStore::<Operation>::open(&db, "operations").unwrap();
        store.load_all().unwrap()
    };
    assert_eq!(persisted.len(), 1);
    assert_eq!(persisted[0].status, ItemStatus::Pending);
}

#[tokio::test]
async fn terminal_failures_survive_restart() {
    let dir = TempDir::new().unwrap();
    let id = {
        let remote = ScriptedRemote::new(vec![Err(backhaul::error::SyncError::Transient(
            "server 500".to_string(),
        ))]);
        let config = backhaul::queue::sync::SyncConfig {
            max_retries: 1,
            ..fast_sync_config()
        };
        let (queue, connectivity) =
            sled_sync_queue(&dir, remote, ConflictPolicy::LastWriteWins, config, false);
        let id = queue
            .enqueue(OperationKind::Create, EntityKind::Notification, json!({}))
            .unwrap();
        connectivity.set_online(true);
        queue.sync_now().await.unwrap();
        assert_eq!(queue.operation(id).unwrap().status, ItemStatus::Failed);
        id
    };

    let remote = ScriptedRemote::new(vec![]);
    let (queue, _connectivity) = sled_sync_queue(
        &dir,
        remote,
        ConflictPolicy::LastWriteWins,
        fast_sync_config(),
        false,
    );
    let failed = queue.failed_operations();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].id, id);
    assert!(failed[0].last_error.is_some());
}

#[test]
fn message_store_round_trips_through_reopen() {
    let dir = TempDir::new().unwrap();
    let message = attendance_message();

    {
        let db = sled::open(dir.path().join("queues")).unwrap();
        let store = SledQueueStore::<DeliveryMessage>::open(&db, "messages").unwrap();
        store.append(&message).unwrap();
    }

    let db = sled::open(dir.path().join("queues")).unwrap();
    let store = SledQueueStore::<DeliveryMessage>::open(&db, "messages").unwrap();
    let restored = store.load_all().unwrap();
    assert_eq!(restored.len(), 1);
    assert_eq!(restored[0].id, message.id);
    assert_eq!(restored[0].recipient, message.recipient);
    assert_eq!(restored[0].subject, message.subject);
}

#[test]
fn replace_all_is_a_whole_set_swap() {
    let dir = TempDir::new().unwrap();
    let db = sled::open(dir.path().join("queues")).unwrap();
    let store = SledQueueStore::<Operation>::open(&db, "operations").unwrap();

    let ops: Vec<Operation> = (0..4)
        .map(|n| {
            Operation::new(
                OperationKind::Create,
                EntityKind::Attendance,
                json!({"n": n}),
            )
        })
        .collect();
    for op in &ops {
        store.append(op).unwrap();
    }

    // Keep the middle two only.
    store.replace_all(&ops[1..3]).unwrap();
    let remaining = store.load_all().unwrap();
    assert_eq!(
        remaining.iter().map(|op| op.id).collect::<Vec<_>>(),
        vec![ops[1].id, ops[2].id]
    );
}
