//! Work manager configuration.

use serde::{Deserialize, Serialize};
use std::path::Path;
use workman_core::StartTimeout;
use workman_execution::{PoolConfig, PoolError};

/// Errors that can occur while loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Values that parse but make no sense
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Configuration for a [`WorkManager`](crate::WorkManager).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ManagerConfig {
    /// Worker pool sizing
    pub pool: PoolConfig,

    /// Reject work declaring whole-method locking on `run`/`release`
    pub enforce_entry_point_contract: bool,

    /// Start timeout for submissions that do not set one
    /// (None = wait indefinitely, 0 = immediate)
    pub default_start_timeout_ms: Option<u64>,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            pool: PoolConfig::default(),
            enforce_entry_point_contract: true,
            default_start_timeout_ms: None,
        }
    }
}

impl ManagerConfig {
    /// Create a new config with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set pool configuration.
    pub fn with_pool(mut self, pool: PoolConfig) -> Self {
        self.pool = pool;
        self
    }

    /// Turn the entry point contract check on or off.
    pub fn with_contract_enforcement(mut self, enforce: bool) -> Self {
        self.enforce_entry_point_contract = enforce;
        self
    }

    /// Set the default start timeout.
    pub fn with_default_start_timeout(mut self, timeout: StartTimeout) -> Self {
        self.default_start_timeout_ms = timeout.as_duration().map(|d| d.as_millis() as u64);
        self
    }

    /// Default start timeout as a typed value.
    pub fn default_start_timeout(&self) -> StartTimeout {
        match self.default_start_timeout_ms {
            Some(ms) => StartTimeout::from_millis(ms),
            None => StartTimeout::Indefinite,
        }
    }

    /// Check the configuration is coherent.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.pool.validate().map_err(|e| match e {
            PoolError::InvalidConfig(msg) => ConfigError::Invalid(msg),
            other => ConfigError::Invalid(other.to_string()),
        })
    }

    /// Parse and validate a JSON document.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a JSON file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json_str(&content)
    }

    /// Serialize as pretty JSON.
    pub fn to_json_pretty(&self) -> Result<String, ConfigError> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}
