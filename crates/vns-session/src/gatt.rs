//! BLE adapter: maps endpoints onto GATT characteristics.

use async_trait::async_trait;
use tracing::trace;
use uuid::Uuid;

use crate::error::{DeviceError, Result, TransportError};
use crate::profile::{EndpointTable, GattProfile};
use crate::transport::{Endpoint, Notifications, Transport};

/// Characteristic-level access to one BLE peripheral, provided by the BLE stack.
#[async_trait]
pub trait GattClient: Send + Sync + 'static {
    /// Connect to the peripheral.
    async fn connect(&self) -> std::result::Result<(), TransportError>;

    /// Disconnect from the peripheral.
    async fn disconnect(&self) -> std::result::Result<(), TransportError>;

    /// Read a characteristic value.
    async fn read_characteristic(&self, uuid: Uuid) -> std::result::Result<Vec<u8>, TransportError>;

    /// Write a characteristic value with response.
    async fn write_characteristic(
        &self,
        uuid: Uuid,
        value: &[u8],
    ) -> std::result::Result<(), TransportError>;

    /// Enable notifications and return the in-order payload stream.
    async fn start_notify(&self, uuid: Uuid) -> std::result::Result<Notifications, TransportError>;

    /// Disable notifications.
    async fn stop_notify(&self, uuid: Uuid) -> std::result::Result<(), TransportError>;
}

/// [`Transport`] over a [`GattClient`].
#[derive(Debug)]
pub struct GattTransport<G> {
    client: G,
    profile: GattProfile,
}

impl<G: GattClient> GattTransport<G> {
    /// Wrap a client with the characteristic table to use.
    pub fn new(client: G, profile: GattProfile) -> Self {
        GattTransport { client, profile }
    }

    /// Wrap a client with the characteristics from `endpoints`.
    pub fn from_table(client: G, endpoints: &EndpointTable) -> Self {
        Self::new(client, endpoints.gatt.clone())
    }

    /// Get the underlying client.
    pub fn client(&self) -> &G {
        &self.client
    }

    fn characteristic(&self, endpoint: Endpoint) -> Result<Uuid> {
        self.profile
            .characteristic(endpoint)
            .ok_or_else(|| DeviceError::Unsupported(format!("{endpoint} over BLE")))
    }
}

#[async_trait]
impl<G: GattClient> Transport for GattTransport<G> {
    async fn connect(&self) -> Result<()> {
        Ok(self.client.connect().await?)
    }

    async fn disconnect(&self) -> Result<()> {
        Ok(self.client.disconnect().await?)
    }

    async fn read(&self, endpoint: Endpoint) -> Result<Vec<u8>> {
        // The control characteristic reads back the stim config; reading it as a
        // command sink makes no sense.
        if endpoint == Endpoint::StimControl {
            return Err(DeviceError::Unsupported("reading stim_control".to_string()));
        }
        let uuid = self.characteristic(endpoint)?;
        trace!(%endpoint, %uuid, "gatt read");
        Ok(self.client.read_characteristic(uuid).await?)
    }

    async fn write(&self, endpoint: Endpoint, payload: &[u8]) -> Result<()> {
        // Stim config changes must be wrapped as a tagged command.
        if endpoint == Endpoint::StimConfig {
            return Err(DeviceError::Unsupported(
                "writing stim_config over BLE; send a stim command".to_string(),
            ));
        }
        let uuid = self.characteristic(endpoint)?;
        trace!(%endpoint, %uuid, len = payload.len(), "gatt write");
        Ok(self.client.write_characteristic(uuid, payload).await?)
    }

    async fn subscribe(&self, endpoint: Endpoint) -> Result<Notifications> {
        let uuid = self.characteristic(endpoint)?;
        Ok(self.client.start_notify(uuid).await?)
    }

    async fn unsubscribe(&self, endpoint: Endpoint) -> Result<()> {
        let uuid = self.characteristic(endpoint)?;
        Ok(self.client.stop_notify(uuid).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::{SimDevice, SimGatt};

    fn transport(device: &SimDevice) -> GattTransport<SimGatt> {
        GattTransport::new(device.gatt(), GattProfile::default())
    }

    #[tokio::test]
    async fn test_read_battery_characteristic() {
        let device = SimDevice::new("AA:BB");
        device.update(|s| s.battery = 64);
        let link = transport(&device);
        link.connect().await.unwrap();
        assert_eq!(link.read(Endpoint::Battery).await.unwrap(), vec![64]);
    }

    #[tokio::test]
    async fn test_version_unsupported() {
        let device = SimDevice::new("AA:BB");
        let link = transport(&device);
        link.connect().await.unwrap();
        assert!(matches!(
            link.read(Endpoint::Version).await,
            Err(DeviceError::Unsupported(_))
        ));
    }

    #[tokio::test]
    async fn test_stim_config_write_rejected() {
        let device = SimDevice::new("AA:BB");
        let link = transport(&device);
        link.connect().await.unwrap();
        assert!(matches!(
            link.write(Endpoint::StimConfig, &[1]).await,
            Err(DeviceError::Unsupported(_))
        ));
        assert_eq!(device.write_count(), 0);
    }

    #[tokio::test]
    async fn test_read_requires_connection() {
        let device = SimDevice::new("AA:BB");
        let link = transport(&device);
        assert_eq!(
            link.read(Endpoint::SystemConfig).await,
            Err(DeviceError::Transport(TransportError::NotConnected))
        );
    }
}
