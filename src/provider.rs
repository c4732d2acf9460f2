//! Message Provider Abstraction
//!
//! Pluggable backends for the delivery queue. A provider is selected by the
//! message channel at construction time. `is_configured()` is checked before
//! every attempt: an unconfigured provider is a permanent per-channel
//! failure, surfaced distinctly from transient network failures.

use crate::error::SyncError;
use crate::message::{Channel, DeliveryMessage};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

const PROVIDER_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const PROVIDER_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Delivery backend contract.
#[async_trait]
pub trait MessageProvider: Send + Sync {
    /// Whether the provider has the credentials it needs to send at all.
    fn is_configured(&self) -> bool;

    /// Deliver one message. Errors other than
    /// `SyncError::ProviderNotConfigured` are treated as transient.
    async fn send(&self, message: &DeliveryMessage) -> Result<(), SyncError>;

    fn name(&self) -> &str;
}

/// Endpoint + credential pair for one HTTP-backed provider.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderSettings {
    pub endpoint: Option<String>,
    pub api_key: Option<String>,
}

impl ProviderSettings {
    fn is_configured(&self) -> bool {
        self.endpoint.as_deref().is_some_and(|e| !e.is_empty())
            && self.api_key.as_deref().is_some_and(|k| !k.is_empty())
    }
}

fn build_provider_client() -> Result<Client, SyncError> {
    Client::builder()
        .connect_timeout(PROVIDER_CONNECT_TIMEOUT)
        .timeout(PROVIDER_REQUEST_TIMEOUT)
        .build()
        .map_err(|e| SyncError::Config(format!("Failed to create HTTP client: {}", e)))
}

async fn post_json(
    client: &Client,
    settings: &ProviderSettings,
    provider: &str,
    body: serde_json::Value,
) -> Result<(), SyncError> {
    let endpoint = settings
        .endpoint
        .as_deref()
        .ok_or_else(|| SyncError::ProviderNotConfigured(provider.to_string()))?;
    let api_key = settings
        .api_key
        .as_deref()
        .ok_or_else(|| SyncError::ProviderNotConfigured(provider.to_string()))?;

    let response = client
        .post(endpoint)
        .bearer_auth(api_key)
        .json(&body)
        .send()
        .await
        .map_err(|e| SyncError::Transient(format!("{} request failed: {}", provider, e)))?;

    if response.status().is_success() {
        Ok(())
    } else {
        let status = response.status();
        let text = response.text().await.unwrap_or_default();
        Err(SyncError::Transient(format!(
            "{} returned {}: {}",
            provider,
            status.as_u16(),
            text.trim()
        )))
    }
}

/// Email gateway speaking a JSON webhook API.
pub struct HttpEmailProvider {
    client: Client,
    settings: ProviderSettings,
}

impl HttpEmailProvider {
    pub fn new(settings: ProviderSettings) -> Result<Self, SyncError> {
        Ok(Self {
            client: build_provider_client()?,
            settings,
        })
    }
}

#[async_trait]
impl MessageProvider for HttpEmailProvider {
    fn is_configured(&self) -> bool {
        self.settings.is_configured()
    }

    async fn send(&self, message: &DeliveryMessage) -> Result<(), SyncError> {
        post_json(
            &self.client,
            &self.settings,
            self.name(),
            json!({
                "to": message.recipient,
                "subject": message.subject,
                "body": message.body,
                "category": message.category,
            }),
        )
        .await
    }

    fn name(&self) -> &str {
        "email"
    }
}

/// SMS gateway speaking a JSON webhook API.
pub struct HttpSmsProvider {
    client: Client,
    settings: ProviderSettings,
}

impl HttpSmsProvider {
    pub fn new(settings: ProviderSettings) -> Result<Self, SyncError> {
        Ok(Self {
            client: build_provider_client()?,
            settings,
        })
    }
}

#[async_trait]
impl MessageProvider for HttpSmsProvider {
    fn is_configured(&self) -> bool {
        self.settings.is_configured()
    }

    async fn send(&self, message: &DeliveryMessage) -> Result<(), SyncError> {
        post_json(
            &self.client,
            &self.settings,
            self.name(),
            json!({
                "to": message.recipient,
                "message": format!("{}: {}", message.subject, message.body),
            }),
        )
        .await
    }

    fn name(&self) -> &str {
        "sms"
    }
}

/// Per-channel provider selection, fixed at construction time.
#[derive(Default)]
pub struct ProviderRegistry {
    providers: HashMap<Channel, Arc<dyn MessageProvider>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(mut self, channel: Channel, provider: Arc<dyn MessageProvider>) -> Self {
        self.providers.insert(channel, provider);
        self
    }

    pub fn for_channel(&self, channel: Channel) -> Option<Arc<dyn MessageProvider>> {
        self.providers.get(&channel).cloned()
    }
}
