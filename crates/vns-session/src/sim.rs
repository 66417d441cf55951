//! In-process simulated devices.
//!
//! A [`SimDevice`] is the shared state of one fake device. It hands out a
//! serial management client ([`SimShellClient`]) and a BLE client ([`SimGatt`])
//! that both talk to that state, so sessions can be exercised end to end
//! without hardware. Faults (refused connections, hangs, going offline after
//! a reset, broken uploads) are scripted through [`SimBehavior`].
//!
//! The shell client answers with the default [`CommandNames`] and the GATT
//! client serves the default [`GattProfile`] characteristics.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use uuid::Uuid;
use vns_shell_protocol::{encode_payload, CommandNames, ConfigKind, ShellCommand, OK_PREFIX};

use crate::error::TransportError;
use crate::gatt::GattClient;
use crate::profile::GattProfile;
use crate::serial::SmpClient;
use crate::transport::{DeviceAddress, Notifications};

/// Which image the simulated device is running.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimMode {
    /// Normal firmware with the shell.
    Application,
    /// Bootloader accepting image uploads.
    Bootloader,
}

/// Observable state of a simulated device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimDeviceState {
    /// Raw battery reading served on both links.
    pub battery: u8,
    /// Firmware version string (`version`).
    pub version: String,
    /// Stored configuration blobs (`cfg get` / `cfg set`).
    pub configs: HashMap<ConfigKind, Vec<u8>>,
    /// This device's own pairing key (`bond get`).
    pub oob_key: Option<String>,
    /// The stored peer key (`bond set` / `bond del`).
    pub peer_key: Option<String>,
    /// Image the device is running.
    pub mode: SimMode,
    /// Set by `dfu`; the next reset boots the bootloader.
    pub bootloader_requested: bool,
    /// Bytes received by the last upload.
    pub image: Vec<u8>,
    /// Device clock as last written, in the device's text format.
    pub clock: Option<String>,
    /// Storage erases performed.
    pub erases: u32,
    /// Resets performed.
    pub resets: u32,
}

impl SimDeviceState {
    fn new(address: &DeviceAddress) -> Self {
        SimDeviceState {
            battery: 100,
            version: "1.0.0".to_string(),
            configs: HashMap::new(),
            oob_key: Some(format!("oob-{address}")),
            peer_key: None,
            mode: SimMode::Application,
            bootloader_requested: false,
            image: Vec::new(),
            clock: None,
            erases: 0,
            resets: 0,
        }
    }
}

/// Scripted faults.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimBehavior {
    /// Number of upcoming connection attempts to refuse.
    pub connect_failures: u32,
    /// Delay before each connection attempt resolves.
    pub connect_delay: Duration,
    /// Device does not answer at all.
    pub offline: bool,
    /// Device disappears after its next reset (fails to re-enumerate).
    pub offline_after_reset: bool,
    /// Delay before every request is answered.
    pub command_delay: Duration,
    /// Requests never complete.
    pub hang_commands: bool,
    /// Bytes accepted per upload chunk.
    pub chunk_size: usize,
    /// Upload fails once it reaches this offset.
    pub fail_upload_at: Option<usize>,
    /// Upload never advances its offset.
    pub stall_upload: bool,
}

impl Default for SimBehavior {
    fn default() -> Self {
        SimBehavior {
            connect_failures: 0,
            connect_delay: Duration::ZERO,
            offline: false,
            offline_after_reset: false,
            command_delay: Duration::ZERO,
            hang_commands: false,
            chunk_size: 256,
            fail_upload_at: None,
            stall_upload: false,
        }
    }
}

struct SimInner {
    address: DeviceAddress,
    state: SimDeviceState,
    behavior: SimBehavior,
    connected: bool,
    connect_attempts: u32,
    commands: Vec<Vec<String>>,
    writes: usize,
    gatt_writes: Vec<(Uuid, Vec<u8>)>,
    notify: HashMap<Uuid, mpsc::Sender<Vec<u8>>>,
}

/// Handle to one simulated device. Clones share the same device.
#[derive(Clone)]
pub struct SimDevice {
    inner: Arc<Mutex<SimInner>>,
}

impl SimDevice {
    /// Create a device in application mode with a full battery.
    pub fn new(address: impl Into<DeviceAddress>) -> Self {
        let address = address.into();
        SimDevice {
            inner: Arc::new(Mutex::new(SimInner {
                state: SimDeviceState::new(&address),
                address,
                behavior: SimBehavior::default(),
                connected: false,
                connect_attempts: 0,
                commands: Vec::new(),
                writes: 0,
                gatt_writes: Vec::new(),
                notify: HashMap::new(),
            })),
        }
    }

    /// Get the device address.
    pub fn address(&self) -> DeviceAddress {
        self.inner.lock().address.clone()
    }

    /// Serial management client for this device.
    pub fn shell(&self) -> SimShellClient {
        self.shell_with(CommandNames::default())
    }

    /// Serial management client whose shell answers to `names`.
    pub fn shell_with(&self, names: CommandNames) -> SimShellClient {
        SimShellClient {
            device: self.clone(),
            names,
        }
    }

    /// BLE client for this device.
    pub fn gatt(&self) -> SimGatt {
        SimGatt {
            device: self.clone(),
            profile: GattProfile::default(),
        }
    }

    /// Modify the device state.
    pub fn update(&self, f: impl FnOnce(&mut SimDeviceState)) {
        f(&mut self.inner.lock().state);
    }

    /// Modify the scripted behavior.
    pub fn configure(&self, f: impl FnOnce(&mut SimBehavior)) {
        f(&mut self.inner.lock().behavior);
    }

    /// Snapshot of the device state.
    pub fn state(&self) -> SimDeviceState {
        self.inner.lock().state.clone()
    }

    /// Take the device off the air (or bring it back).
    pub fn set_offline(&self, offline: bool) {
        self.inner.lock().behavior.offline = offline;
    }

    /// Whether a client currently holds the link.
    pub fn is_connected(&self) -> bool {
        self.inner.lock().connected
    }

    /// Number of connection attempts seen.
    pub fn connect_attempts(&self) -> u32 {
        self.inner.lock().connect_attempts
    }

    /// Every shell token list received, in order.
    pub fn commands(&self) -> Vec<Vec<String>> {
        self.inner.lock().commands.clone()
    }

    /// Number of requests that changed device state.
    pub fn write_count(&self) -> usize {
        self.inner.lock().writes
    }

    /// Every characteristic write received, in order.
    pub fn gatt_writes(&self) -> Vec<(Uuid, Vec<u8>)> {
        self.inner.lock().gatt_writes.clone()
    }

    /// Push a notification on a characteristic. Returns false if nobody is listening.
    pub fn notify(&self, uuid: Uuid, payload: Vec<u8>) -> bool {
        let inner = self.inner.lock();
        match inner.notify.get(&uuid) {
            Some(tx) => tx.try_send(payload).is_ok(),
            None => false,
        }
    }

    async fn link_up(&self) -> Result<(), TransportError> {
        let delay = self.inner.lock().behavior.connect_delay;
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        let mut inner = self.inner.lock();
        inner.connect_attempts += 1;
        if inner.behavior.offline {
            return Err(TransportError::Connection(format!("{} not found", inner.address)));
        }
        if inner.behavior.connect_failures > 0 {
            inner.behavior.connect_failures -= 1;
            return Err(TransportError::Connection(format!(
                "{} refused the connection",
                inner.address
            )));
        }
        inner.connected = true;
        Ok(())
    }

    async fn link_down(&self) -> Result<(), TransportError> {
        let hang = self.inner.lock().behavior.hang_commands;
        if hang {
            std::future::pending::<()>().await;
        }
        let mut inner = self.inner.lock();
        inner.connected = false;
        inner.notify.clear();
        Ok(())
    }

    /// Apply scripted delays and faults to a request.
    async fn gate(&self) -> Result<(), TransportError> {
        let (delay, hang) = {
            let inner = self.inner.lock();
            (inner.behavior.command_delay, inner.behavior.hang_commands)
        };
        if hang {
            std::future::pending::<()>().await;
        }
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        let inner = self.inner.lock();
        if inner.behavior.offline {
            return Err(TransportError::Io(format!("{} is not responding", inner.address)));
        }
        if !inner.connected {
            return Err(TransportError::NotConnected);
        }
        Ok(())
    }
}

impl std::fmt::Debug for SimDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("SimDevice")
            .field("address", &inner.address)
            .field("connected", &inner.connected)
            .field("mode", &inner.state.mode)
            .finish()
    }
}

// ============================================================================
// Serial
// ============================================================================

/// Simulated serial management client.
#[derive(Debug, Clone)]
pub struct SimShellClient {
    device: SimDevice,
    names: CommandNames,
}

impl SimShellClient {
    fn answer(inner: &mut SimInner, command: ShellCommand) -> String {
        if command.is_write() {
            inner.writes += 1;
        }
        let state = &mut inner.state;
        match command {
            ShellCommand::BondGet => match &state.oob_key {
                Some(key) => format!("{OK_PREFIX}{key}"),
                None => "ERR no key".to_string(),
            },
            ShellCommand::BondSet { key } => {
                state.peer_key = Some(key);
                OK_PREFIX.to_string()
            }
            ShellCommand::BondDel => {
                state.peer_key = None;
                OK_PREFIX.to_string()
            }
            ShellCommand::CfgGet { kind } => match state.configs.get(&kind) {
                Some(blob) => format!("{OK_PREFIX}{}", encode_payload(blob)),
                None => format!("ERR no {kind} config"),
            },
            ShellCommand::CfgSet { kind, payload } => {
                state.configs.insert(kind, payload);
                OK_PREFIX.to_string()
            }
            ShellCommand::Battery => format!("{OK_PREFIX}{}", state.battery),
            ShellCommand::Version => format!("{OK_PREFIX}{}", state.version),
            ShellCommand::EnterBootloader => {
                state.bootloader_requested = true;
                OK_PREFIX.to_string()
            }
            ShellCommand::Raw { argv } => format!("ERR unknown command: {}", argv.join(" ")),
        }
    }
}

#[async_trait]
impl SmpClient for SimShellClient {
    async fn connect(&self) -> Result<(), TransportError> {
        self.device.link_up().await
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        self.device.link_down().await
    }

    async fn execute(&self, argv: &[String]) -> Result<String, TransportError> {
        self.device.gate().await?;
        let mut inner = self.device.inner.lock();
        inner.commands.push(argv.to_vec());
        let reply = match ShellCommand::parse(argv, &self.names) {
            Ok(command) => Self::answer(&mut inner, command),
            Err(e) => format!("ERR {e}"),
        };
        Ok(reply)
    }

    async fn reset(&self) -> Result<(), TransportError> {
        self.device.gate().await?;
        let mut inner = self.device.inner.lock();
        inner.connected = false;
        inner.state.resets += 1;
        inner.state.mode = if inner.state.bootloader_requested {
            SimMode::Bootloader
        } else {
            SimMode::Application
        };
        inner.state.bootloader_requested = false;
        if inner.behavior.offline_after_reset {
            inner.behavior.offline = true;
        }
        Ok(())
    }

    async fn erase_storage(&self) -> Result<(), TransportError> {
        self.device.gate().await?;
        let mut inner = self.device.inner.lock();
        inner.writes += 1;
        inner.state.erases += 1;
        inner.state.configs.clear();
        inner.state.peer_key = None;
        Ok(())
    }

    async fn read_datetime(&self) -> Result<Option<String>, TransportError> {
        self.device.gate().await?;
        Ok(self.device.inner.lock().state.clock.clone())
    }

    async fn write_datetime(&self, datetime: &str) -> Result<(), TransportError> {
        self.device.gate().await?;
        let mut inner = self.device.inner.lock();
        inner.writes += 1;
        inner.state.clock = Some(datetime.to_string());
        Ok(())
    }

    async fn upload_chunk(
        &self,
        image: &[u8],
        _slot: u32,
        offset: usize,
    ) -> Result<usize, TransportError> {
        self.device.gate().await?;
        let mut inner = self.device.inner.lock();
        if inner.state.mode != SimMode::Bootloader {
            return Err(TransportError::Io("image upload needs the bootloader".to_string()));
        }
        if let Some(at) = inner.behavior.fail_upload_at {
            if offset >= at {
                inner.connected = false;
                return Err(TransportError::Io(format!("link lost at offset {offset}")));
            }
        }
        if inner.behavior.stall_upload {
            return Ok(offset);
        }
        if offset == 0 {
            inner.state.image.clear();
        }
        let end = (offset + inner.behavior.chunk_size.max(1)).min(image.len());
        inner.state.image.extend_from_slice(&image[offset..end]);
        Ok(end)
    }
}

// ============================================================================
// BLE
// ============================================================================

/// Simulated BLE client.
#[derive(Debug, Clone)]
pub struct SimGatt {
    device: SimDevice,
    profile: GattProfile,
}

#[async_trait]
impl GattClient for SimGatt {
    async fn connect(&self) -> Result<(), TransportError> {
        self.device.link_up().await
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        self.device.link_down().await
    }

    async fn read_characteristic(&self, uuid: Uuid) -> Result<Vec<u8>, TransportError> {
        self.device.gate().await?;
        let inner = self.device.inner.lock();
        let state = &inner.state;
        if uuid == self.profile.system_config {
            Ok(state.configs.get(&ConfigKind::Sys).cloned().unwrap_or_default())
        } else if uuid == self.profile.stim_control {
            Ok(state.configs.get(&ConfigKind::Stim).cloned().unwrap_or_default())
        } else if uuid == self.profile.battery_level {
            Ok(vec![state.battery])
        } else {
            Err(TransportError::Io(format!("no readable characteristic {uuid}")))
        }
    }

    async fn write_characteristic(&self, uuid: Uuid, value: &[u8]) -> Result<(), TransportError> {
        self.device.gate().await?;
        let mut inner = self.device.inner.lock();
        inner.writes += 1;
        inner.gatt_writes.push((uuid, value.to_vec()));
        if uuid == self.profile.system_config {
            inner.state.configs.insert(ConfigKind::Sys, value.to_vec());
        }
        Ok(())
    }

    async fn start_notify(&self, uuid: Uuid) -> Result<Notifications, TransportError> {
        self.device.gate().await?;
        let (tx, rx) = mpsc::channel(64);
        self.device.inner.lock().notify.insert(uuid, tx);
        Ok(rx)
    }

    async fn stop_notify(&self, uuid: Uuid) -> Result<(), TransportError> {
        self.device.gate().await?;
        self.device.inner.lock().notify.remove(&uuid);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn argv(tokens: &[&str]) -> Vec<String> {
        tokens.iter().map(|t| t.to_string()).collect()
    }

    #[tokio::test]
    async fn test_reset_enters_requested_bootloader() {
        let device = SimDevice::new("COM9");
        let client = device.shell();
        client.connect().await.unwrap();
        assert_eq!(client.execute(&argv(&["dfu"])).await.unwrap(), "OK:");
        client.reset().await.unwrap();
        assert!(!device.is_connected());
        assert_eq!(device.state().mode, SimMode::Bootloader);

        client.connect().await.unwrap();
        client.reset().await.unwrap();
        assert_eq!(device.state().mode, SimMode::Application);
    }

    #[tokio::test]
    async fn test_offline_after_reset() {
        let device = SimDevice::new("COM9");
        device.configure(|b| b.offline_after_reset = true);
        let client = device.shell();
        client.connect().await.unwrap();
        client.reset().await.unwrap();
        assert!(matches!(
            client.connect().await,
            Err(TransportError::Connection(_))
        ));
    }

    #[tokio::test]
    async fn test_unknown_command_rejected() {
        let device = SimDevice::new("COM9");
        let client = device.shell();
        client.connect().await.unwrap();
        let reply = client.execute(&argv(&["led", "on"])).await.unwrap();
        assert!(!reply.starts_with(OK_PREFIX));
        assert_eq!(device.write_count(), 0);
    }

    #[tokio::test]
    async fn test_upload_outside_bootloader_fails() {
        let device = SimDevice::new("COM9");
        let client = device.shell();
        client.connect().await.unwrap();
        assert!(client.upload_chunk(&[1, 2, 3], 0, 0).await.is_err());
    }
}
