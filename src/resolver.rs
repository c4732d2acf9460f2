//! Conflict Resolver
//!
//! Decides what happens when the remote authority reports that an
//! operation's target entity has diverged. The policy is configured once
//! for the whole queue, not per operation.

use crate::operation::ConflictResolution;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Configured conflict handling policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConflictPolicy {
    /// Discard the local payload and accept the remote state as final.
    LastWriteWins,
    /// Merge the payloads shallowly and resubmit once.
    VersionedMerge,
    /// Persist a conflict record for operator review; never auto-resolve.
    Manual,
}

impl Default for ConflictPolicy {
    fn default() -> Self {
        ConflictPolicy::LastWriteWins
    }
}

/// What the drain loop should do with a conflicted operation.
#[derive(Debug, Clone, PartialEq)]
pub enum ResolutionDecision {
    /// Mark completed without resending; remote state stands.
    AcceptRemote,
    /// Resubmit the merged payload as a fresh attempt.
    Resubmit(Value),
    /// Record the conflict and fail the operation for operator review.
    ManualReview,
}

impl ResolutionDecision {
    pub fn resolution(&self) -> Option<ConflictResolution> {
        match self {
            ResolutionDecision::AcceptRemote => Some(ConflictResolution::Remote),
            ResolutionDecision::Resubmit(_) => Some(ConflictResolution::Merged),
            ResolutionDecision::ManualReview => None,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ConflictResolver {
    policy: ConflictPolicy,
}

impl ConflictResolver {
    pub fn new(policy: ConflictPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> ConflictPolicy {
        self.policy
    }

    pub fn decide(&self, local: &Value, remote: &Value) -> ResolutionDecision {
        match self.policy {
            ConflictPolicy::LastWriteWins => ResolutionDecision::AcceptRemote,
            ConflictPolicy::VersionedMerge => {
                ResolutionDecision::Resubmit(merge_payloads(local, remote))
            }
            ConflictPolicy::Manual => ResolutionDecision::ManualReview,
        }
    }
}

/// Shallow field merge: remote fields take precedence, fields unique to the
/// local payload are kept. Non-object payloads resolve to the remote value.
///
/// This is deliberately a weak guarantee; there is no vector clock or causal
/// ordering behind it.
pub fn merge_payloads(local: &Value, remote: &Value) -> Value {
    match (local, remote) {
        (Value::Object(local_map), Value::Object(remote_map)) => {
            let mut merged = remote_map.clone();
            for (key, value) in local_map {
                merged.entry(key.clone()).or_insert_with(|| value.clone());
            }
            Value::Object(merged)
        }
        _ => remote.clone(),
    }
}
