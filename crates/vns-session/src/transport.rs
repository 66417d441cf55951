//! Transport abstraction and the value types that cross it.
//!
//! A [`Transport`] is one link to one device. Both the BLE adapter
//! ([`GattTransport`](crate::GattTransport)) and the serial adapter
//! ([`ShellTransport`](crate::ShellTransport)) implement it, so sessions and
//! capabilities never care which link they are driving.

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::error::Result;

/// Opaque transport-level identifier: a serial port path or a BLE address.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceAddress(String);

impl DeviceAddress {
    /// Wrap an address string.
    pub fn new(address: impl Into<String>) -> Self {
        DeviceAddress(address.into())
    }

    /// Get the address as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeviceAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DeviceAddress {
    fn from(s: &str) -> Self {
        DeviceAddress::new(s)
    }
}

impl From<String> for DeviceAddress {
    fn from(s: String) -> Self {
        DeviceAddress(s)
    }
}

/// Encoded configuration, passed unchanged between the device and the external codec.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct ConfigBlob(Vec<u8>);

impl ConfigBlob {
    /// Wrap encoded bytes.
    pub fn new(bytes: Vec<u8>) -> Self {
        ConfigBlob(bytes)
    }

    /// Borrow the encoded bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Take the encoded bytes.
    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }

    /// Encoded length in bytes.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the blob is empty.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Vec<u8>> for ConfigBlob {
    fn from(bytes: Vec<u8>) -> Self {
        ConfigBlob(bytes)
    }
}

/// Out-of-band pairing key. Never interpreted, only moved between devices.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct OobKey(String);

impl OobKey {
    /// Wrap a key token.
    pub fn new(key: impl Into<String>) -> Self {
        OobKey(key.into())
    }

    /// Get the key token.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

// Keys are credentials; keep them out of logs.
impl fmt::Debug for OobKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "OobKey(<{} chars>)", self.0.len())
    }
}

/// Well-known data endpoints shared by every session.
///
/// Each transport resolves an endpoint through the identifiers it was built
/// with, usually taken from an [`EndpointTable`](crate::EndpointTable): a
/// characteristic UUID on BLE or a shell command on serial.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Endpoint {
    /// System configuration blob.
    SystemConfig,
    /// Stimulation configuration blob (read side).
    StimConfig,
    /// Tagged stimulation command sink (write-only).
    StimControl,
    /// Telemetry notification stream.
    Telemetry,
    /// Battery level in percent.
    Battery,
    /// Firmware version string.
    Version,
}

impl Endpoint {
    /// Get a short name for logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            Endpoint::SystemConfig => "system_config",
            Endpoint::StimConfig => "stim_config",
            Endpoint::StimControl => "stim_control",
            Endpoint::Telemetry => "telemetry",
            Endpoint::Battery => "battery",
            Endpoint::Version => "version",
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// In-order stream of notification payloads for one endpoint.
pub type Notifications = mpsc::Receiver<Vec<u8>>;

/// A link to one device.
///
/// Implementations are driven from a single session worker, one call at a time.
/// Calls may be dropped mid-flight when the caller's deadline passes.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Establish the link.
    async fn connect(&self) -> Result<()>;

    /// Tear down the link.
    async fn disconnect(&self) -> Result<()>;

    /// Read the current value of an endpoint.
    async fn read(&self, endpoint: Endpoint) -> Result<Vec<u8>>;

    /// Write a value to an endpoint.
    async fn write(&self, endpoint: Endpoint, payload: &[u8]) -> Result<()>;

    /// Start notifications on an endpoint.
    async fn subscribe(&self, endpoint: Endpoint) -> Result<Notifications>;

    /// Stop notifications on an endpoint.
    async fn unsubscribe(&self, endpoint: Endpoint) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_oob_key_debug_hides_value() {
        let key = OobKey::new("0123456789abcdef");
        let shown = format!("{key:?}");
        assert!(!shown.contains("0123"));
        assert!(shown.contains("16"));
    }

    #[test]
    fn test_device_address_display() {
        let addr = DeviceAddress::from("/dev/ttyACM0");
        assert_eq!(addr.to_string(), "/dev/ttyACM0");
        assert_eq!(addr.as_str(), "/dev/ttyACM0");
    }

    #[test]
    fn test_endpoint_names_are_distinct() {
        let all = [
            Endpoint::SystemConfig,
            Endpoint::StimConfig,
            Endpoint::StimControl,
            Endpoint::Telemetry,
            Endpoint::Battery,
            Endpoint::Version,
        ];
        let names: std::collections::HashSet<_> = all.iter().map(Endpoint::as_str).collect();
        assert_eq!(names.len(), all.len());
    }
}
