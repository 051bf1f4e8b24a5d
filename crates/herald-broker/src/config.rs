//! Broker configuration loading.

use std::path::Path;
use std::time::Duration;

use herald_common::ConfigError;
use serde::{Deserialize, Serialize};
use tracing::info;

/// Broker tunables. Every field has a serde default, so a partial (or empty)
/// TOML file is valid.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerConfig {
    /// Maximum messages kept pending per registration; the oldest entry is
    /// evicted once the bound is exceeded.
    #[serde(default = "default_max_pending_messages")]
    pub max_pending_messages: usize,

    /// Watchdog timeout for a wake-lock lease, in milliseconds.
    #[serde(default = "default_watchdog_timeout_ms")]
    pub watchdog_timeout_ms: u64,
}

fn default_max_pending_messages() -> usize {
    5
}

fn default_watchdog_timeout_ms() -> u64 {
    30_000
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            max_pending_messages: default_max_pending_messages(),
            watchdog_timeout_ms: default_watchdog_timeout_ms(),
        }
    }
}

impl BrokerConfig {
    pub fn watchdog_timeout(&self) -> Duration {
        Duration::from_millis(self.watchdog_timeout_ms)
    }

    /// Parse config from a TOML string. Missing fields fall back to defaults.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content)
            .map_err(|e| ConfigError::ParseError(format!("failed to parse TOML: {e}")))
    }

    /// Load config from a specific TOML file path.
    pub fn load_from_path(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::FileNotFound(path.to_path_buf()));
        }

        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ParseError(format!("failed to read {}: {e}", path.display())))?;

        let config = Self::from_toml_str(&content)?;
        info!("loaded broker config from {}", path.display());
        Ok(config)
    }
}
