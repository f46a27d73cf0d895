//! Bridge configuration.
//!
//! Loaded from TOML, then overridden by `THINGSVERSE_*` environment
//! variables, then by CLI flags in `main`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::BridgeError;
use crate::store::DEFAULT_MAX_SAMPLES_PER_TYPE;

pub const ENV_LISTEN_ADDR: &str = "THINGSVERSE_LISTEN_ADDR";
pub const ENV_STORE_TIMEOUT_MS: &str = "THINGSVERSE_STORE_TIMEOUT_MS";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    pub feed: FeedSection,
    pub storage: StorageSection,
    pub logging: LoggingSection,
}

/// Where broker plugins connect.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeedSection {
    pub listen_addr: String,
    pub max_connections: usize,
    /// Capacity of the inbound event queue and the outbound frame buffer.
    pub event_buffer: usize,
}

impl Default for FeedSection {
    fn default() -> Self {
        Self {
            listen_addr: "127.0.0.1:1884".to_string(),
            max_connections: 8,
            event_buffer: 1024,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageSection {
    /// Upper bound on any single persistence call.
    pub timeout_ms: u64,
    /// Samples kept per agent and metric type before the oldest is evicted.
    pub max_samples_per_type: usize,
}

impl Default for StorageSection {
    fn default() -> Self {
        Self {
            timeout_ms: 5_000,
            max_samples_per_type: DEFAULT_MAX_SAMPLES_PER_TYPE,
        }
    }
}

impl StorageSection {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSection {
    /// Default filter when `RUST_LOG` is unset.
    pub level: String,
    pub json: bool,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

impl BridgeConfig {
    /// `<config dir>/thingsverse/bridge.toml`
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("thingsverse").join("bridge.toml"))
    }

    pub fn from_toml_str(s: &str) -> Result<Self, BridgeError> {
        toml::from_str(s).map_err(|e| BridgeError::Config(e.to_string()))
    }

    /// Load from `path`, or from [`Self::default_path`] when it exists,
    /// or fall back to defaults. An explicit path that cannot be read is an error.
    pub fn load(path: Option<&Path>) -> Result<Self, BridgeError> {
        let path = match path {
            Some(p) => p.to_path_buf(),
            None => match Self::default_path().filter(|p| p.exists()) {
                Some(p) => p,
                None => return Ok(Self::default()),
            },
        };
        let contents = std::fs::read_to_string(&path)
            .map_err(|e| BridgeError::Config(format!("cannot read {}: {e}", path.display())))?;
        Self::from_toml_str(&contents)
    }

    pub fn apply_env(&mut self) -> Result<(), BridgeError> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides from any key lookup (the process environment in `main`).
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), BridgeError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(addr) = lookup(ENV_LISTEN_ADDR).filter(|v| !v.trim().is_empty()) {
            self.feed.listen_addr = addr;
        }
        if let Some(raw) = lookup(ENV_STORE_TIMEOUT_MS) {
            self.storage.timeout_ms = raw
                .trim()
                .parse()
                .map_err(|e| BridgeError::Config(format!("{ENV_STORE_TIMEOUT_MS}='{raw}': {e}")))?;
        }
        self.validate()
    }

    pub fn validate(&self) -> Result<(), BridgeError> {
        if self.feed.listen_addr.trim().is_empty() {
            return Err(BridgeError::Config("feed.listen_addr must not be empty".into()));
        }
        if self.storage.timeout_ms == 0 {
            return Err(BridgeError::Config("storage.timeout_ms must be positive".into()));
        }
        if self.storage.max_samples_per_type == 0 {
            return Err(BridgeError::Config(
                "storage.max_samples_per_type must be positive".into(),
            ));
        }
        Ok(())
    }
}
