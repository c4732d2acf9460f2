//! End-to-end sync scheduler behavior over durable storage

use crate::integration::test_utils::{fast_sync_config, sled_sync_queue, ScriptedRemote};
use backhaul::error::SyncError;
use backhaul::operation::{EntityKind, OperationKind};
use backhaul::queue::sync::SyncConfig;
use backhaul::remote::RemoteOutcome;
use backhaul::resolver::ConflictPolicy;
use backhaul::types::ItemStatus;
use parking_lot::Mutex;
use serde_json::json;
use std::sync::Arc;
use tempfile::TempDir;

#[tokio::test]
async fn offline_work_drains_on_reconnect() {
    let dir = TempDir::new().unwrap();
    let remote = ScriptedRemote::new(vec![]);
    let (queue, connectivity) = sled_sync_queue(
        &dir,
        remote.clone(),
        ConflictPolicy::LastWriteWins,
        fast_sync_config(),
        false,
    );

    for n in 0..3 {
        queue
            .enqueue(
                OperationKind::Create,
                EntityKind::Attendance,
                json!({"studentId": format!("S{}", n)}),
            )
            .unwrap();
    }
    assert_eq!(queue.status().pending, 3);
    assert_eq!(remote.calls(), 0, "nothing is sent while offline");

    connectivity.set_online(true);
    let summary = queue.sync_now().await.unwrap();

    assert_eq!(summary.attempted, 3);
    assert_eq!(summary.completed, 3);
    assert_eq!(remote.calls(), 3);
    assert_eq!(queue.status().pending, 0);
    assert!(queue.pending_operations().is_empty());
}

#[tokio::test]
async fn drain_preserves_enqueue_order() {
    let dir = TempDir::new().unwrap();
    let remote = ScriptedRemote::new(vec![]);
    let (queue, connectivity) = sled_sync_queue(
        &dir,
        remote.clone(),
        ConflictPolicy::LastWriteWins,
        fast_sync_config(),
        false,
    );

    for n in 0..5 {
        queue
            .enqueue(
                OperationKind::Update,
                EntityKind::Student,
                json!({"id": "S1", "seq": n}),
            )
            .unwrap();
    }
    connectivity.set_online(true);
    queue.sync_now().await.unwrap();

    let sequence: Vec<u64> = remote
        .payloads()
        .iter()
        .map(|p| p["seq"].as_u64().unwrap())
        .collect();
    assert_eq!(sequence, vec![0, 1, 2, 3, 4]);
}

#[tokio::test]
async fn status_events_track_the_drain() {
    let dir = TempDir::new().unwrap();
    let remote = ScriptedRemote::new(vec![]);
    let (queue, connectivity) = sled_sync_queue(
        &dir,
        remote.clone(),
        ConflictPolicy::LastWriteWins,
        fast_sync_config(),
        false,
    );

    let observed = Arc::new(Mutex::new(Vec::new()));
    let subscription = {
        let observed = Arc::clone(&observed);
        queue.subscribe(move |status| observed.lock().push(*status))
    };

    queue
        .enqueue(OperationKind::Create, EntityKind::Attendance, json!({}))
        .unwrap();
    connectivity.set_online(true);
    queue.sync_now().await.unwrap();

    let events = observed.lock().clone();
    assert!(events.first().is_some_and(|s| s.pending == 1));
    assert!(
        events.iter().any(|s| s.in_flight == 1),
        "the in-flight transition is published"
    );
    assert!(events.last().is_some_and(|s| s.pending == 0 && s.in_flight == 0));

    // A dropped subscription stops receiving events.
    subscription.unsubscribe();
    let seen = observed.lock().len();
    queue
        .enqueue(OperationKind::Create, EntityKind::Attendance, json!({}))
        .unwrap();
    assert_eq!(observed.lock().len(), seen);
}

#[tokio::test]
async fn transient_failure_is_retried_to_success() {
    let dir = TempDir::new().unwrap();
    let remote = ScriptedRemote::new(vec![
        Err(SyncError::Transient("connection reset".to_string())),
        Err(SyncError::Transient("connection reset".to_string())),
    ]);
    let (queue, connectivity) = sled_sync_queue(
        &dir,
        remote.clone(),
        ConflictPolicy::LastWriteWins,
        fast_sync_config(),
        false,
    );

    queue
        .enqueue(OperationKind::Create, EntityKind::Notification, json!({}))
        .unwrap();
    connectivity.set_online(true);
    let summary = queue.sync_now().await.unwrap();

    assert_eq!(summary.retried, 2);
    assert_eq!(summary.completed, 1);
    assert_eq!(remote.calls(), 3);
    assert_eq!(queue.status().failed, 0);
}

#[tokio::test]
async fn exhausted_retries_leave_inspectable_failure() {
    let dir = TempDir::new().unwrap();
    let script: Vec<_> = (0..10)
        .map(|_| Err(SyncError::Transient("server 500".to_string())))
        .collect();
    let remote = ScriptedRemote::new(script);
    let config = SyncConfig {
        max_retries: 2,
        ..fast_sync_config()
    };
    let (queue, connectivity) = sled_sync_queue(
        &dir,
        remote.clone(),
        ConflictPolicy::LastWriteWins,
        config,
        false,
    );

    let id = queue
        .enqueue(OperationKind::Delete, EntityKind::FaceReference, json!({"id": "F1"}))
        .unwrap();
    connectivity.set_online(true);
    queue.sync_now().await.unwrap();

    let failed = queue.failed_operations();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].id, id);
    assert_eq!(failed[0].retry_count, 2);
    assert_eq!(failed[0].status, ItemStatus::Failed);

    // A failed operation can be re-queued by an operator.
    assert!(queue.retry_failed(id).unwrap());
    let op = queue.operation(id).unwrap();
    assert_eq!(op.status, ItemStatus::Pending);
    assert_eq!(op.retry_count, 0);
}

#[tokio::test]
async fn conflict_outcome_is_counted() {
    let dir = TempDir::new().unwrap();
    let remote = ScriptedRemote::new(vec![Ok(RemoteOutcome::Conflict {
        remote_payload: json!({"id": "A1", "status": "absent"}),
    })]);
    let (queue, connectivity) = sled_sync_queue(
        &dir,
        remote.clone(),
        ConflictPolicy::LastWriteWins,
        fast_sync_config(),
        false,
    );

    queue
        .enqueue(
            OperationKind::Update,
            EntityKind::Attendance,
            json!({"id": "A1", "status": "present"}),
        )
        .unwrap();
    connectivity.set_online(true);
    let summary = queue.sync_now().await.unwrap();

    assert_eq!(summary.conflicts, 1);
    assert_eq!(summary.completed, 1);
}
