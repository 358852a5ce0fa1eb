//! Startup configuration.
//!
//! ```json
//! {
//!   "transaction_mode": "resource_local",
//!   "termination_timeout_ms": 5000,
//!   "marshalling": "json",
//!   "queue_capacity": 1024,
//!   "broker_ids": ["default"]
//! }
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::dispatch::{DispatchError, MarshallingScheme};
use crate::message::DEFAULT_BROKER;
use crate::store::StoreError;
use crate::transaction::TransactionMode;

pub const ENV_TRANSACTION_MODE: &str = "OUTBOX_TRANSACTION_MODE";
pub const ENV_TERMINATION_TIMEOUT_MS: &str = "OUTBOX_TERMINATION_TIMEOUT_MS";
pub const ENV_MARSHALLING: &str = "OUTBOX_MARSHALLING";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid configuration: {0}")]
    Invalid(String),
    #[error("could not parse configuration: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("could not read configuration: {0}")]
    Io(#[from] std::io::Error),
    #[error("broker {broker} unavailable: {reason}")]
    BrokerUnavailable { broker: String, reason: String },
    #[error("configured for {configured} transactions but the coordinator runs {actual}")]
    ModeMismatch {
        configured: TransactionMode,
        actual: TransactionMode,
    },
    #[error(transparent)]
    Dispatch(#[from] DispatchError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Outbox settings, read once at startup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutboxConfig {
    pub transaction_mode: TransactionMode,
    /// How long shutdown waits for queued batches to drain.
    pub termination_timeout_ms: u64,
    pub marshalling: MarshallingScheme,
    /// Batches the dispatch queue holds before `submit` reports it full.
    pub queue_capacity: usize,
    /// Brokers that must resolve before the first dispatch.
    pub broker_ids: Vec<String>,
}

impl Default for OutboxConfig {
    fn default() -> Self {
        Self {
            transaction_mode: TransactionMode::ResourceLocal,
            termination_timeout_ms: 5000,
            marshalling: MarshallingScheme::Native,
            queue_capacity: 1024,
            broker_ids: vec![DEFAULT_BROKER.to_string()],
        }
    }
}

impl OutboxConfig {
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    /// Apply `OUTBOX_*` environment variables on top of this configuration.
    pub fn with_env_overrides(self) -> Result<Self, ConfigError> {
        self.with_overrides(|name| std::env::var(name).ok())
    }

    /// Apply overrides from any variable lookup.
    pub fn with_overrides<F>(mut self, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(mode) = lookup(ENV_TRANSACTION_MODE) {
            self.transaction_mode = parse_name(ENV_TRANSACTION_MODE, &mode)?;
        }
        if let Some(ms) = lookup(ENV_TERMINATION_TIMEOUT_MS) {
            self.termination_timeout_ms = ms.trim().parse().map_err(|_| {
                ConfigError::Invalid(format!("{} is not a number: {}", ENV_TERMINATION_TIMEOUT_MS, ms))
            })?;
        }
        if let Some(scheme) = lookup(ENV_MARSHALLING) {
            self.marshalling = parse_name(ENV_MARSHALLING, &scheme)?;
        }
        Ok(self)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.queue_capacity == 0 {
            return Err(ConfigError::Invalid("queue_capacity must be at least 1".into()));
        }
        if self.broker_ids.is_empty() {
            return Err(ConfigError::Invalid("at least one broker id is required".into()));
        }
        if self.broker_ids.iter().any(|id| id.trim().is_empty()) {
            return Err(ConfigError::Invalid("broker ids must not be blank".into()));
        }
        Ok(())
    }

    pub fn termination_timeout(&self) -> Duration {
        Duration::from_millis(self.termination_timeout_ms)
    }
}

// the enums' serde names double as the accepted variable values
fn parse_name<T: serde::de::DeserializeOwned>(variable: &str, value: &str) -> Result<T, ConfigError> {
    let normalized = value.trim().to_lowercase().replace('-', "_");
    serde_json::from_value(serde_json::Value::String(normalized))
        .map_err(|_| ConfigError::Invalid(format!("{} has unknown value {}", variable, value)))
}
