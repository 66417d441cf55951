//! Fleet configuration.
//!
//! Everything is optional in YAML; missing fields take their defaults.
//!
//! ```yaml
//! session:
//!   connect_retries: 3
//!   connect_timeout: 5000
//! dfu:
//!   settle_delay: 5000
//!   upload_timeout: 300000
//! endpoints:
//!   shell:
//!     bootloader: dfu
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use vns_session::config::duration_ms;
use vns_session::{EndpointTable, RunnerConfig, SessionConfig};

use crate::error::{FleetError, Result};

/// Firmware update settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DfuConfig {
    /// Pause after the bootloader reboot, once per batch.
    #[serde(with = "duration_ms")]
    pub settle_delay: Duration,
    /// Connection attempts when reconnecting to the bootloader.
    pub reconnect_retries: u32,
    /// Deadline for each reconnection attempt.
    #[serde(with = "duration_ms")]
    pub reconnect_timeout: Duration,
    /// Deadline for the whole image upload to one device.
    #[serde(with = "duration_ms")]
    pub upload_timeout: Duration,
    /// Image slot to upload into.
    pub image_slot: u32,
    /// Progress events buffered before new ones are dropped.
    pub progress_capacity: usize,
}

impl Default for DfuConfig {
    fn default() -> Self {
        DfuConfig {
            settle_delay: Duration::from_secs(5),
            reconnect_retries: 3,
            reconnect_timeout: Duration::from_secs(5),
            upload_timeout: Duration::from_secs(300),
            image_slot: 0,
            progress_capacity: 256,
        }
    }
}

/// Complete configuration for an [`Orchestrator`](crate::Orchestrator).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FleetConfig {
    /// Per-session worker settings.
    pub runner: RunnerConfig,
    /// Per-session timeouts and retries.
    pub session: SessionConfig,
    /// Firmware update settings.
    pub dfu: DfuConfig,
    /// Fixed identifiers handed to transports.
    pub endpoints: EndpointTable,
}

impl FleetConfig {
    /// Parse a YAML document.
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml).map_err(|e| FleetError::Config(e.to_string()))
    }

    /// Load a YAML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_yaml_is_default() {
        let config = FleetConfig::from_yaml_str("{}").unwrap();
        assert_eq!(config, FleetConfig::default());
        assert_eq!(config.dfu.settle_delay, Duration::from_secs(5));
        assert_eq!(config.endpoints.shell.bond_name, "vns");
    }

    #[test]
    fn test_nested_overrides() {
        let yaml = "session:\n  connect_retries: 1\ndfu:\n  settle_delay: 250\n  image_slot: 1\n";
        let config = FleetConfig::from_yaml_str(yaml).unwrap();
        assert_eq!(config.session.connect_retries, 1);
        assert_eq!(config.session.operation_timeout, Duration::from_secs(5));
        assert_eq!(config.dfu.settle_delay, Duration::from_millis(250));
        assert_eq!(config.dfu.image_slot, 1);
    }

    #[test]
    fn test_invalid_yaml() {
        let err = FleetConfig::from_yaml_str("session: [1, 2").unwrap_err();
        assert!(matches!(err, FleetError::Config(_)));
    }

    #[test]
    fn test_load_missing_file() {
        let err = FleetConfig::load("/nonexistent/fleet.yaml").unwrap_err();
        assert!(matches!(err, FleetError::Io(_)));
    }
}
