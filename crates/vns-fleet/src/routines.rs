//! Everyday multi-device routines built on [`Orchestrator::run_all`].

use chrono::NaiveDateTime;
use tracing::info;
use vns_session::{
    BatteryCapable, ClockUpdate, ConfigBlob, ConfigCapable, ConfigKind, DeviceAddress,
    DeviceSession, Management,
};

use crate::orchestrator::{Batch, Connector, Orchestrator};

impl<C: Connector> Orchestrator<C> {
    /// Battery level of every device, in percent.
    pub fn battery_levels(&self, addresses: &[DeviceAddress]) -> Batch<u8> {
        self.run_all(addresses, |session| session.battery_level())
    }

    /// Read one configuration blob from a single device.
    pub fn get_config(&self, address: &DeviceAddress, kind: ConfigKind) -> vns_session::Result<ConfigBlob> {
        let session = self.connect(address)?;
        session.config(kind)
    }

    /// Write one configuration blob to a single device.
    pub fn set_config(
        &self,
        address: &DeviceAddress,
        kind: ConfigKind,
        blob: &ConfigBlob,
    ) -> vns_session::Result<()> {
        let session = self.connect(address)?;
        session.set_config(kind, blob)?;
        info!(%address, %kind, bytes = blob.len(), "configuration written");
        Ok(())
    }
}

impl<C: Connector> Orchestrator<C>
where
    DeviceSession<C::Link>: Management,
{
    /// Firmware version of every device.
    pub fn versions(&self, addresses: &[DeviceAddress]) -> Batch<String> {
        self.run_all(addresses, |session| session.version())
    }

    /// Reset every device.
    pub fn reboot(&self, addresses: &[DeviceAddress]) -> Batch<()> {
        self.run_all(addresses, |session| session.reboot())
    }

    /// Erase storage on every device, then reset it.
    pub fn factory_reset(&self, addresses: &[DeviceAddress]) -> Batch<()> {
        self.run_all(addresses, |session| session.factory_reset())
    }

    /// Set every device's clock to `time`.
    pub fn set_time(&self, addresses: &[DeviceAddress], time: NaiveDateTime) -> Batch<ClockUpdate> {
        self.run_all(addresses, |session| session.set_time(time))
    }
}
