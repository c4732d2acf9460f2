//! Remote authority contract
//!
//! The remote side accepts one operation at a time: a request identified by
//! entity type, carrying the operation id and enqueue timestamp as
//! idempotency metadata, with the verb mapped from the operation kind.
//! A conflict is a distinct outcome, not a generic failure; every other
//! non-success is transient and eligible for retry.

use crate::error::SyncError;
use crate::operation::{Operation, OperationKind};
use async_trait::async_trait;
use reqwest::{Client, Method, StatusCode};
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;

/// Result of presenting one operation to the remote authority.
#[derive(Debug, Clone, PartialEq)]
pub enum RemoteOutcome {
    /// The operation was accepted.
    Applied,
    /// The target entity has diverged; the body is the remote's snapshot.
    Conflict { remote_payload: Value },
}

#[async_trait]
pub trait RemoteAuthority: Send + Sync {
    async fn apply(&self, operation: &Operation) -> Result<RemoteOutcome, SyncError>;
}

/// Connection settings for the HTTP remote authority.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    pub base_url: String,
    pub connect_timeout_secs: u64,
    pub request_timeout_secs: u64,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8000".to_string(),
            connect_timeout_secs: 10,
            request_timeout_secs: 30,
        }
    }
}

/// HTTP implementation of the remote contract.
pub struct HttpRemoteAuthority {
    client: Client,
    base_url: String,
}

#[derive(Deserialize)]
struct ConflictBody {
    remote: Option<Value>,
}

impl HttpRemoteAuthority {
    pub fn new(config: &RemoteConfig) -> Result<Self, SyncError> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| SyncError::Config(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }

    fn request_for(&self, operation: &Operation) -> (Method, String) {
        let entity = operation.entity.api_path();
        match operation.kind {
            OperationKind::Create => (Method::POST, format!("{}/api/{}", self.base_url, entity)),
            OperationKind::Update => (
                Method::PUT,
                format!("{}/api/{}/{}", self.base_url, entity, operation.target_id()),
            ),
            OperationKind::Delete => (
                Method::DELETE,
                format!("{}/api/{}/{}", self.base_url, entity, operation.target_id()),
            ),
        }
    }
}

#[async_trait]
impl RemoteAuthority for HttpRemoteAuthority {
    async fn apply(&self, operation: &Operation) -> Result<RemoteOutcome, SyncError> {
        let (method, url) = self.request_for(operation);

        let mut request = self
            .client
            .request(method, &url)
            .header("X-Operation-Id", operation.id.to_string())
            .header("X-Enqueued-At", operation.enqueued_at.to_rfc3339());
        if operation.kind != OperationKind::Delete {
            request = request.json(&operation.payload);
        }

        let response = request
            .send()
            .await
            .map_err(|e| SyncError::Transient(format!("Request to {} failed: {}", url, e)))?;

        let status = response.status();
        if status.is_success() {
            return Ok(RemoteOutcome::Applied);
        }

        if status == StatusCode::CONFLICT {
            let body = response.text().await.unwrap_or_default();
            let remote_payload = serde_json::from_str::<ConflictBody>(&body)
                .ok()
                .and_then(|b| b.remote)
                .or_else(|| serde_json::from_str(&body).ok())
                .unwrap_or(Value::Null);
            return Ok(RemoteOutcome::Conflict { remote_payload });
        }

        let body = response.text().await.unwrap_or_default();
        Err(SyncError::Transient(format!(
            "Remote returned {} for {}: {}",
            status.as_u16(),
            url,
            body.trim()
        )))
    }
}
