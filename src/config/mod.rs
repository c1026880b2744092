//! # Dispatch Configuration
//!
//! Tunables for the dispatch channel, expiry sweep, status tracker, and
//! delegate routing. Values come from optional TOML files and
//! `DELEGATE_DISPATCH__*` environment variables; see [`ConfigManager`].
//!
//! ```rust,no_run
//! use delegate_dispatch::config::ConfigManager;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let manager = ConfigManager::load()?;
//! let sweep = manager.config().sweep_interval();
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod loader;

use serde::{Deserialize, Serialize};
use std::time::Duration;

pub use error::{ConfigResult, ConfigurationError};
pub use loader::ConfigManager;

/// Delegate selection strategy for capability routing
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionStrategy {
    /// Delegate with the fewest in-flight tasks
    #[default]
    LeastLoad,
    /// Delegate with the most spare capacity
    CapacityBased,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// Timeout applied by request builders handed out by the channel
    pub default_timeout_ms: u64,
    /// Upper bound on any request timeout; larger requests are rejected
    pub max_timeout_ms: u64,
    pub sweep_interval_ms: u64,
    pub status_poll_interval_ms: u64,
    /// How long terminal status records stay queryable
    pub record_retention_seconds: u64,
    pub delegate_heartbeat_timeout_seconds: u64,
    pub delegate_selection: SelectionStrategy,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            default_timeout_ms: 30_000,
            max_timeout_ms: 3_600_000,
            sweep_interval_ms: 1_000,
            status_poll_interval_ms: 250,
            record_retention_seconds: 600,
            delegate_heartbeat_timeout_seconds: 60,
            delegate_selection: SelectionStrategy::LeastLoad,
        }
    }
}

impl DispatchConfig {
    pub fn default_timeout(&self) -> Duration {
        Duration::from_millis(self.default_timeout_ms)
    }

    pub fn max_timeout(&self) -> Duration {
        Duration::from_millis(self.max_timeout_ms)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms)
    }

    pub fn status_poll_interval(&self) -> Duration {
        Duration::from_millis(self.status_poll_interval_ms)
    }

    pub fn record_retention(&self) -> Duration {
        Duration::from_secs(self.record_retention_seconds)
    }

    pub fn delegate_heartbeat_timeout(&self) -> Duration {
        Duration::from_secs(self.delegate_heartbeat_timeout_seconds)
    }

    pub fn validate(&self) -> ConfigResult<()> {
        if self.default_timeout_ms == 0 {
            return Err(ConfigurationError::invalid_value(
                "default_timeout_ms",
                self.default_timeout_ms,
                "timeout must be greater than 0",
            ));
        }

        if self.default_timeout_ms > self.max_timeout_ms {
            return Err(ConfigurationError::invalid_value(
                "default_timeout_ms",
                self.default_timeout_ms,
                format!("must not exceed max_timeout_ms ({})", self.max_timeout_ms),
            ));
        }

        if self.sweep_interval_ms == 0 {
            return Err(ConfigurationError::invalid_value(
                "sweep_interval_ms",
                self.sweep_interval_ms,
                "interval must be greater than 0",
            ));
        }

        if self.status_poll_interval_ms == 0 {
            return Err(ConfigurationError::invalid_value(
                "status_poll_interval_ms",
                self.status_poll_interval_ms,
                "interval must be greater than 0",
            ));
        }

        if self.delegate_heartbeat_timeout_seconds == 0 {
            return Err(ConfigurationError::invalid_value(
                "delegate_heartbeat_timeout_seconds",
                self.delegate_heartbeat_timeout_seconds,
                "heartbeat timeout must be greater than 0",
            ));
        }

        Ok(())
    }
}
