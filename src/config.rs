//! Configuration System
//!
//! Layered configuration with defaults, an optional TOML file, and
//! environment variable overrides, plus runtime validation. Higher layers
//! win: environment over file over defaults.

use crate::logging::LoggingConfig;
use crate::provider::ProviderSettings;
use crate::queue::delivery::DeliveryConfig;
use crate::queue::sync::SyncConfig;
use crate::remote::RemoteConfig;
use crate::resolver::ConflictPolicy;
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Root configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BackhaulConfig {
    /// Local durable storage
    pub storage: StorageConfig,

    /// Operation sync scheduler
    pub sync: SyncConfig,

    /// Notification delivery queue
    pub delivery: DeliveryConfig,

    /// Remote authority endpoint
    pub remote: RemoteConfig,

    /// Per-channel delivery providers
    pub providers: ProvidersConfig,

    /// Conflict resolution policy for rejected operations
    pub conflict_policy: ConflictPolicy,

    /// Logging configuration
    pub logging: LoggingConfig,
}

/// Durable storage paths
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Directory holding the queue database
    pub path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from(".backhaul/queues"),
        }
    }
}

/// Settings for the two delivery channels
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ProvidersConfig {
    pub primary: ProviderSettings,
    pub secondary: ProviderSettings,
}

/// Configuration validation errors
#[derive(Debug, Clone)]
pub enum ValidationError {
    Storage(String),
    Sync(String),
    Delivery(String),
    Remote(String),
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ValidationError::Storage(msg) => write!(f, "Storage: {}", msg),
            ValidationError::Sync(msg) => write!(f, "Sync: {}", msg),
            ValidationError::Delivery(msg) => write!(f, "Delivery: {}", msg),
            ValidationError::Remote(msg) => write!(f, "Remote: {}", msg),
        }
    }
}

impl std::error::Error for ValidationError {}

impl BackhaulConfig {
    /// Load configuration from an optional TOML file plus environment
    /// overrides. `BACKHAUL_SYNC__MAX_RETRIES=5` overrides
    /// `[sync] max_retries`.
    pub fn load(file: Option<&Path>) -> Result<Self, crate::error::SyncError> {
        let mut builder = Config::builder();
        if let Some(path) = file {
            builder = builder.add_source(File::from(path).required(true));
        }
        let config = builder
            .add_source(
                Environment::with_prefix("BACKHAUL")
                    // `separator` would otherwise double up the prefix
                    // separator too, so no BACKHAUL_* variable ever matched.
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;
        Ok(config.try_deserialize()?)
    }

    /// Validate the entire configuration
    pub fn validate(&self) -> Result<(), Vec<ValidationError>> {
        let mut errors = Vec::new();

        if self.storage.path.as_os_str().is_empty() {
            errors.push(ValidationError::Storage(
                "Storage path cannot be empty".to_string(),
            ));
        }

        if self.sync.max_queue_size == 0 {
            errors.push(ValidationError::Sync(
                "max_queue_size must be at least 1".to_string(),
            ));
        }
        if self.sync.backoff_multiplier < 1.0 {
            errors.push(ValidationError::Sync(
                "backoff_multiplier must be at least 1.0".to_string(),
            ));
        }
        if self.sync.sync_interval_secs == 0 {
            errors.push(ValidationError::Sync(
                "sync_interval_secs must be at least 1".to_string(),
            ));
        }

        if self.delivery.max_queue_size == 0 {
            errors.push(ValidationError::Delivery(
                "max_queue_size must be at least 1".to_string(),
            ));
        }
        if self.delivery.backoff_multiplier < 1.0 {
            errors.push(ValidationError::Delivery(
                "backoff_multiplier must be at least 1.0".to_string(),
            ));
        }

        if self.remote.base_url.is_empty() {
            errors.push(ValidationError::Remote(
                "base_url cannot be empty".to_string(),
            ));
        } else if !self.remote.base_url.starts_with("http://")
            && !self.remote.base_url.starts_with("https://")
        {
            errors.push(ValidationError::Remote(format!(
                "base_url must be an http(s) URL, got '{}'",
                self.remote.base_url
            )));
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}
