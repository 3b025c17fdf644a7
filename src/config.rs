//! Configuration management for dbeaver-bridge.
//!
//! Handles loading configuration from a TOML file. Every setting is
//! optional; command-line flags and environment variables override it.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::db::DEFAULT_MAX_ROWS;
use crate::error::{BridgeError, Result};
use crate::query::{ExecutionOptions, DEFAULT_TIMEOUT};
use crate::secrets::{CredentialResolver, KeyringResolver, NoCredentials};
use crate::store::{ConfigLocator, SchemaVersion, StoreSource};

/// Main configuration structure for dbeaver-bridge.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Where the DBeaver store lives.
    #[serde(default)]
    pub store: StoreConfig,

    /// Limits applied to every query.
    #[serde(default)]
    pub execution: ExecutionConfig,

    /// Password fallback.
    #[serde(default)]
    pub credentials: CredentialsConfig,
}

/// Connection store location.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Workspace root to use instead of the well-known locations.
    pub path: Option<PathBuf>,

    /// Layout of the store at `path`; detected when unset.
    pub schema: Option<SchemaVersion>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionConfig {
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    #[serde(default = "default_max_rows")]
    pub max_rows: usize,
}

fn default_timeout_secs() -> u64 {
    DEFAULT_TIMEOUT.as_secs()
}

fn default_max_rows() -> usize {
    DEFAULT_MAX_ROWS
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
            max_rows: default_max_rows(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CredentialsConfig {
    /// Look up missing passwords in the OS keyring.
    #[serde(default)]
    pub keyring: bool,
}

impl Config {
    /// Returns the default config file path for the current platform.
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("dbeaver-bridge")
            .join("config.toml")
    }

    /// Loads configuration from a TOML file. A missing file yields defaults.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)
            .map_err(|e| BridgeError::config(format!("Failed to read config file: {e}")))?;

        Self::parse_toml(&content, path)
    }

    fn parse_toml(content: &str, path: &Path) -> Result<Self> {
        let config: Self = toml::from_str(content).map_err(|e| {
            BridgeError::config(format!(
                "Configuration error in {}:\n  {}",
                path.display(),
                e
            ))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Rejects settings that would make every query fail.
    pub fn validate(&self) -> Result<()> {
        if self.execution.timeout_secs == 0 {
            return Err(BridgeError::config("execution.timeout_secs must be at least 1"));
        }
        if self.execution.max_rows == 0 {
            return Err(BridgeError::config("execution.max_rows must be at least 1"));
        }
        if self.store.schema.is_some() && self.store.path.is_none() {
            return Err(BridgeError::config("store.schema requires store.path"));
        }
        Ok(())
    }

    /// The locator for the configured store.
    pub fn locator(&self) -> ConfigLocator {
        match &self.store.path {
            Some(path) => ConfigLocator::with_override(path, self.store.schema),
            None => ConfigLocator::default(),
        }
    }

    pub fn store_source(&self) -> StoreSource {
        StoreSource::new(self.locator())
    }

    pub fn execution_options(&self) -> ExecutionOptions {
        ExecutionOptions {
            timeout: Duration::from_secs(self.execution.timeout_secs),
            max_rows: self.execution.max_rows,
        }
    }

    pub fn credential_resolver(&self) -> Arc<dyn CredentialResolver> {
        if self.credentials.keyring {
            Arc::new(KeyringResolver::default())
        } else {
            Arc::new(NoCredentials)
        }
    }
}
