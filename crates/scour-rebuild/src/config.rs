//! TOML configuration for the rebuild pipeline.
//!
//! Every field has a default, so an empty file (or no file) is valid.

use std::path::Path;
use std::time::Duration;

use scour_net::MAX_OBJECTS_PER_REQUEST;
use scour_placement::DEFAULT_VNODES_PER_TARGET;
use serde::Deserialize;

/// Errors loading a configuration file.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),

    /// The file is not valid TOML for [`RebuildConfig`].
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Top-level configuration, parsed from TOML.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RebuildConfig {
    /// Scanner tuning.
    pub scan: ScanSection,
    /// Shipper tuning.
    pub ship: ShipSection,
    /// Placement ring parameters.
    pub placement: PlacementSection,
    /// Network parameters.
    pub net: NetSection,
}

/// `[scan]` section.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ScanSection {
    /// Maximum number of scanner tasks running at once.
    pub contexts: usize,
}

impl Default for ScanSection {
    fn default() -> Self {
        Self { contexts: 8 }
    }
}

/// `[ship]` section.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ShipSection {
    /// Facts per batch. Clamped to `1..=512`.
    pub send_limit: usize,
    /// First retry delay in milliseconds.
    pub retry_base_ms: u64,
    /// Retry delay cap in milliseconds.
    pub retry_max_ms: u64,
}

impl Default for ShipSection {
    fn default() -> Self {
        Self {
            send_limit: MAX_OBJECTS_PER_REQUEST,
            retry_base_ms: 50,
            retry_max_ms: 5_000,
        }
    }
}

/// `[placement]` section.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PlacementSection {
    /// Virtual nodes per target on the placement ring.
    pub vnodes_per_target: u16,
}

impl Default for PlacementSection {
    fn default() -> Self {
        Self {
            vnodes_per_target: DEFAULT_VNODES_PER_TARGET,
        }
    }
}

/// `[net]` section.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NetSection {
    /// Per-RPC timeout in milliseconds.
    pub rpc_timeout_ms: u64,
}

impl Default for NetSection {
    fn default() -> Self {
        Self {
            rpc_timeout_ms: 10_000,
        }
    }
}

impl RebuildConfig {
    /// Load config from a TOML file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Parse config from a TOML string.
    pub fn from_toml(s: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(s)?)
    }

    /// Effective number of concurrent scanner tasks (at least 1).
    pub fn contexts(&self) -> usize {
        self.scan.contexts.max(1)
    }

    /// Effective batch size.
    pub fn send_limit(&self) -> usize {
        self.ship.send_limit.clamp(1, MAX_OBJECTS_PER_REQUEST)
    }

    /// First retry delay.
    pub fn retry_base(&self) -> Duration {
        Duration::from_millis(self.ship.retry_base_ms)
    }

    /// Retry delay cap (never below the base).
    pub fn retry_max(&self) -> Duration {
        Duration::from_millis(self.ship.retry_max_ms.max(self.ship.retry_base_ms))
    }

    /// Per-RPC timeout.
    pub fn rpc_timeout(&self) -> Duration {
        Duration::from_millis(self.net.rpc_timeout_ms)
    }
}
