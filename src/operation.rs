//! Operation model
//!
//! An `Operation` is one queued local mutation awaiting remote confirmation.
//! The queue treats its payload as opaque JSON; only the remote authority
//! and the conflict resolver ever look inside it.

use crate::types::{ItemStatus, OperationId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Verb carried by an operation, mapped to the remote request style.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OperationKind {
    Create,
    Update,
    Delete,
}

/// Domain type tag for the entity an operation mutates.
///
/// Closed set: the attendance client only ever syncs these record families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EntityKind {
    Attendance,
    Student,
    FaceReference,
    Notification,
}

impl EntityKind {
    /// Path segment used by the remote authority's API.
    pub fn api_path(self) -> &'static str {
        match self {
            EntityKind::Attendance => "attendance",
            EntityKind::Student => "students",
            EntityKind::FaceReference => "faces",
            EntityKind::Notification => "notifications",
        }
    }
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.api_path())
    }
}

/// How a conflict was resolved for an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConflictResolution {
    Local,
    Remote,
    Merged,
}

/// One queued local mutation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Operation {
    pub id: OperationId,
    pub kind: OperationKind,
    pub entity: EntityKind,
    pub payload: Value,
    pub enqueued_at: DateTime<Utc>,
    pub retry_count: u32,
    pub status: ItemStatus,
    pub conflict_resolution: Option<ConflictResolution>,
    pub last_error: Option<String>,
}

impl Operation {
    pub fn new(kind: OperationKind, entity: EntityKind, payload: Value) -> Self {
        Self {
            id: OperationId::new(),
            kind,
            entity,
            payload,
            enqueued_at: Utc::now(),
            retry_count: 0,
            status: ItemStatus::Pending,
            conflict_resolution: None,
            last_error: None,
        }
    }

    /// Identifier of the remote entity this operation targets.
    ///
    /// Update and delete requests address the target by the payload's own
    /// `id` field; create requests fall back to the operation id.
    pub fn target_id(&self) -> String {
        self.payload
            .get("id")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| self.id.to_string())
    }
}

/// Snapshot produced when the remote authority reports divergence.
///
/// `resolution` is `None` while the record awaits manual review.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConflictRecord {
    pub id: Uuid,
    pub operation_id: OperationId,
    pub local_payload: Value,
    pub remote_payload: Value,
    pub resolution: Option<ConflictResolution>,
    pub recorded_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
}

impl ConflictRecord {
    /// Record a conflict awaiting manual review.
    pub fn manual(operation: &Operation, remote_payload: Value) -> Self {
        Self {
            id: Uuid::now_v7(),
            operation_id: operation.id,
            local_payload: operation.payload.clone(),
            remote_payload,
            resolution: None,
            recorded_at: Utc::now(),
            resolved_at: None,
        }
    }

}
