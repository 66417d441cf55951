//! Shared helpers for fleet integration tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::time::Duration;

use vns_fleet::{Connector, Orchestrator};
use vns_session::sim::{SimDevice, SimShellClient};
use vns_session::{
    DeviceAddress, DeviceError, EndpointTable, RunnerConfig, SessionConfig, ShellTransport,
    TransportError,
};

/// Connector that resolves addresses to simulated serial devices.
pub struct SimConnector {
    devices: HashMap<DeviceAddress, SimDevice>,
}

impl Connector for SimConnector {
    type Link = ShellTransport<SimShellClient>;

    fn link(
        &self,
        address: &DeviceAddress,
        endpoints: &EndpointTable,
    ) -> vns_session::Result<Self::Link> {
        let device = self.devices.get(address).ok_or_else(|| {
            DeviceError::Transport(TransportError::Connection(format!("no such port: {address}")))
        })?;
        // The simulated firmware answers to the same words the host sends.
        let client = device.shell_with(endpoints.shell.clone());
        Ok(ShellTransport::from_table(client, endpoints))
    }
}

/// A set of simulated devices behind numbered serial ports.
pub struct FakeFleet {
    pub devices: Vec<SimDevice>,
}

impl FakeFleet {
    /// Create `count` healthy devices.
    pub fn new(count: usize) -> Self {
        let devices = (1..=count)
            .map(|i| SimDevice::new(format!("/dev/ttySIM{i}")))
            .collect();
        FakeFleet { devices }
    }

    /// Addresses in device order.
    pub fn addresses(&self) -> Vec<DeviceAddress> {
        self.devices.iter().map(SimDevice::address).collect()
    }

    /// Device `n`, counting from 1.
    pub fn device(&self, n: usize) -> &SimDevice {
        &self.devices[n - 1]
    }

    /// Connector over these devices.
    pub fn connector(&self) -> SimConnector {
        let devices = self
            .devices
            .iter()
            .map(|device| (device.address(), device.clone()))
            .collect();
        SimConnector { devices }
    }

    /// Orchestrator over these devices.
    pub fn orchestrator(&self, session: SessionConfig) -> Orchestrator<SimConnector> {
        Orchestrator::new(self.connector(), RunnerConfig::default(), session)
    }
}

/// Session settings with short deadlines so failures show up quickly.
pub fn quick_session() -> SessionConfig {
    SessionConfig {
        connect_retries: 2,
        connect_timeout: Duration::from_millis(100),
        operation_timeout: Duration::from_millis(200),
        disconnect_timeout: Duration::from_millis(100),
    }
}
