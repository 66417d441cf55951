//! Device capabilities and the device types composed from them.
//!
//! Rather than a base-device/tracker/stimulator hierarchy, each ability is a
//! trait with default methods built on [`SessionHandle`]. A device type picks
//! the capabilities its firmware offers:
//!
//! | Type | Capabilities |
//! |------|--------------|
//! | [`Tracker`] | config, battery, telemetry |
//! | [`Stimulator`] | tracker + stimulation control |
//! | [`ManagedDevice`] | config, battery, management (serial only) |

use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDateTime;
use tracing::{debug, info};
use vns_shell_protocol::{ConfigKind, ShellCommand};

use crate::error::{CodecError, DeviceError, Result};
use crate::serial::{ShellTransport, SmpClient};
use crate::session::DeviceSession;
use crate::transport::{ConfigBlob, Endpoint, OobKey, Transport};

/// Format the device clock expects: ISO-8601, millisecond precision, no zone.
const DEVICE_TIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.3f";

/// Highest valid battery reading, in percent.
const MAX_BATTERY_LEVEL: u8 = 100;

// ============================================================================
// Capabilities
// ============================================================================

/// Access to the session a device type is built on.
pub trait SessionHandle {
    /// Transport under the session.
    type Link: Transport;

    /// Get the session.
    fn session(&self) -> &DeviceSession<Self::Link>;
}

impl<T: Transport> SessionHandle for DeviceSession<T> {
    type Link = T;

    fn session(&self) -> &DeviceSession<T> {
        self
    }
}

fn config_endpoint(kind: ConfigKind) -> Endpoint {
    match kind {
        ConfigKind::Sys => Endpoint::SystemConfig,
        ConfigKind::Stim => Endpoint::StimConfig,
    }
}

/// Read and write configuration blobs.
pub trait ConfigCapable: SessionHandle {
    /// Read a configuration blob.
    fn config(&self, kind: ConfigKind) -> Result<ConfigBlob> {
        let session = self.session();
        let bytes = session.read_value(config_endpoint(kind), session.session_config().operation_timeout)?;
        Ok(ConfigBlob::new(bytes))
    }

    /// Write a configuration blob.
    fn set_config(&self, kind: ConfigKind, blob: &ConfigBlob) -> Result<()> {
        let session = self.session();
        session.write_value(
            config_endpoint(kind),
            blob.as_bytes(),
            session.session_config().operation_timeout,
        )
    }

    /// Read the system configuration.
    fn system_config(&self) -> Result<ConfigBlob> {
        self.config(ConfigKind::Sys)
    }

    /// Write the system configuration.
    fn set_system_config(&self, blob: &ConfigBlob) -> Result<()> {
        self.set_config(ConfigKind::Sys, blob)
    }

    /// Read the stimulation configuration.
    fn stim_config(&self) -> Result<ConfigBlob> {
        self.config(ConfigKind::Stim)
    }
}

/// Read the battery level.
pub trait BatteryCapable: SessionHandle {
    /// Battery level in percent, `0..=100`.
    fn battery_level(&self) -> Result<u8> {
        let session = self.session();
        let bytes = session.read_value(Endpoint::Battery, session.session_config().operation_timeout)?;
        let level = bytes
            .first()
            .copied()
            .ok_or_else(|| DeviceError::Malformed("empty battery level".to_string()))?;
        if level > MAX_BATTERY_LEVEL {
            return Err(DeviceError::Malformed(format!(
                "battery level {level} out of range"
            )));
        }
        Ok(level)
    }
}

/// Receive telemetry notifications.
pub trait NotifiableCapable: SessionHandle {
    /// Start delivering telemetry payloads to `handler`, in arrival order.
    fn start_telemetry<H>(&self, handler: H) -> Result<()>
    where
        H: FnMut(Vec<u8>) + Send + 'static,
    {
        let session = self.session();
        session.subscribe(Endpoint::Telemetry, handler, session.session_config().operation_timeout)
    }

    /// Stop telemetry notifications.
    fn stop_telemetry(&self) -> Result<()> {
        let session = self.session();
        session.unsubscribe(Endpoint::Telemetry, session.session_config().operation_timeout)
    }
}

impl<T: Transport> ConfigCapable for DeviceSession<T> {}
impl<T: Transport> BatteryCapable for DeviceSession<T> {}

// ============================================================================
// Stimulation
// ============================================================================

/// Tagged command accepted by the stimulation control endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StimCommand {
    /// Replace the stimulation configuration.
    SetConfig(ConfigBlob),
    /// Step the intensity up.
    IncreaseIntensity,
    /// Step the intensity down.
    DecreaseIntensity,
}

/// External configuration codec.
///
/// This layer never looks inside a [`ConfigBlob`]; anything that needs the
/// schema goes through here.
pub trait StimCodec: Send + Sync {
    /// Encode a command for the stimulation control endpoint.
    fn encode_command(&self, command: &StimCommand) -> std::result::Result<Vec<u8>, CodecError>;

    /// Return `config` with its trigger duration replaced.
    fn with_trigger(
        &self,
        config: &ConfigBlob,
        duration_ms: u32,
    ) -> std::result::Result<ConfigBlob, CodecError>;
}

/// Drive stimulation.
pub trait StimControlCapable: ConfigCapable {
    /// Codec used to build control payloads.
    fn stim_codec(&self) -> &dyn StimCodec;

    /// Send a tagged command to the control endpoint.
    fn send_stim_command(&self, command: &StimCommand) -> Result<()> {
        let payload = self.stim_codec().encode_command(command)?;
        let session = self.session();
        debug!(address = %session.address(), ?command, "stim command");
        session.write_value(
            Endpoint::StimControl,
            &payload,
            session.session_config().operation_timeout,
        )
    }

    /// Replace the stimulation configuration.
    fn set_stim_config(&self, blob: &ConfigBlob) -> Result<()> {
        self.send_stim_command(&StimCommand::SetConfig(blob.clone()))
    }

    /// Step the intensity up.
    fn increase_intensity(&self) -> Result<()> {
        self.send_stim_command(&StimCommand::IncreaseIntensity)
    }

    /// Step the intensity down.
    fn decrease_intensity(&self) -> Result<()> {
        self.send_stim_command(&StimCommand::DecreaseIntensity)
    }

    /// Stimulate for `duration_ms` by rewriting the trigger field of the current config.
    fn trigger(&self, duration_ms: u32) -> Result<()> {
        let current = self.stim_config()?;
        let updated = self.stim_codec().with_trigger(&current, duration_ms)?;
        self.set_stim_config(&updated)
    }
}

// ============================================================================
// Device types
// ============================================================================

/// Sensor device: configuration, battery and telemetry.
#[derive(Debug)]
pub struct Tracker<T: Transport> {
    session: DeviceSession<T>,
}

impl<T: Transport> Tracker<T> {
    /// Wrap a session.
    pub fn new(session: DeviceSession<T>) -> Self {
        Tracker { session }
    }

    /// Give the session back.
    pub fn into_session(self) -> DeviceSession<T> {
        self.session
    }
}

impl<T: Transport> SessionHandle for Tracker<T> {
    type Link = T;

    fn session(&self) -> &DeviceSession<T> {
        &self.session
    }
}

impl<T: Transport> ConfigCapable for Tracker<T> {}
impl<T: Transport> BatteryCapable for Tracker<T> {}
impl<T: Transport> NotifiableCapable for Tracker<T> {}

/// Stimulation device: everything a tracker does, plus stimulation control.
pub struct Stimulator<T: Transport> {
    session: DeviceSession<T>,
    codec: Arc<dyn StimCodec>,
}

impl<T: Transport> Stimulator<T> {
    /// Wrap a session with the codec for its control payloads.
    pub fn new(session: DeviceSession<T>, codec: Arc<dyn StimCodec>) -> Self {
        Stimulator { session, codec }
    }

    /// Give the session back.
    pub fn into_session(self) -> DeviceSession<T> {
        self.session
    }
}

impl<T: Transport> std::fmt::Debug for Stimulator<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Stimulator")
            .field("session", &self.session)
            .finish_non_exhaustive()
    }
}

impl<T: Transport> SessionHandle for Stimulator<T> {
    type Link = T;

    fn session(&self) -> &DeviceSession<T> {
        &self.session
    }
}

impl<T: Transport> ConfigCapable for Stimulator<T> {}
impl<T: Transport> BatteryCapable for Stimulator<T> {}
impl<T: Transport> NotifiableCapable for Stimulator<T> {}

impl<T: Transport> StimControlCapable for Stimulator<T> {
    fn stim_codec(&self) -> &dyn StimCodec {
        self.codec.as_ref()
    }
}

// ============================================================================
// Management (serial)
// ============================================================================

/// A device reached over the serial management link.
pub type ManagedDevice<C> = DeviceSession<ShellTransport<C>>;

/// Device clock before and after [`Management::set_time`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClockUpdate {
    /// Clock reading before the write, if the clock was set.
    pub previous: Option<String>,
    /// Clock reading after the write.
    pub current: Option<String>,
}

/// Management commands only the serial link offers.
pub trait Management {
    /// Firmware version string.
    fn version(&self) -> Result<String>;

    /// Reset the device. The link drops; reconnect with a new session.
    fn reboot(&self) -> Result<()>;

    /// Erase persistent storage, then reset.
    fn factory_reset(&self) -> Result<()>;

    /// Ask the device to boot into its bootloader on next reset.
    fn enter_bootloader(&self) -> Result<()>;

    /// Set the device clock to `time` and read it back.
    fn set_time(&self, time: NaiveDateTime) -> Result<ClockUpdate>;

    /// This device's out-of-band pairing key.
    fn bond_key(&self) -> Result<OobKey>;

    /// Store a peer's out-of-band pairing key.
    fn set_bond_key(&self, key: &OobKey) -> Result<()>;

    /// Delete the stored peer key.
    fn delete_bond_key(&self) -> Result<()>;

    /// Upload a firmware image in chunks, calling `progress` with each new offset.
    ///
    /// Offsets are strictly increasing and end at the image length. The whole
    /// upload is bounded by `timeout`.
    fn upload_image<P>(
        &self,
        image: Arc<[u8]>,
        slot: u32,
        timeout: Duration,
        progress: P,
    ) -> Result<()>
    where
        P: FnMut(usize) + Send + 'static;
}

fn run_shell<C: SmpClient>(device: &ManagedDevice<C>, command: ShellCommand) -> Result<String> {
    device.call(
        device.session_config().operation_timeout,
        move |link, _| async move { link.shell(&command).await },
    )
}

impl<C: SmpClient> Management for ManagedDevice<C> {
    fn version(&self) -> Result<String> {
        run_shell(self, ShellCommand::Version)
    }

    fn reboot(&self) -> Result<()> {
        self.call(self.session_config().operation_timeout, |link, _| async move {
            link.client().reset().await.map_err(DeviceError::from)
        })?;
        self.mark_link_down();
        info!(address = %self.address(), "reboot requested");
        Ok(())
    }

    fn factory_reset(&self) -> Result<()> {
        self.call(self.session_config().operation_timeout, |link, _| async move {
            link.client().erase_storage().await?;
            link.client().reset().await?;
            Ok::<_, DeviceError>(())
        })?;
        self.mark_link_down();
        info!(address = %self.address(), "factory reset");
        Ok(())
    }

    fn enter_bootloader(&self) -> Result<()> {
        run_shell(self, ShellCommand::EnterBootloader)?;
        debug!(address = %self.address(), "bootloader requested");
        Ok(())
    }

    fn set_time(&self, time: NaiveDateTime) -> Result<ClockUpdate> {
        let stamp = time.format(DEVICE_TIME_FORMAT).to_string();
        let update = self.call(self.session_config().operation_timeout, move |link, _| async move {
            let client = link.client();
            let previous = client.read_datetime().await?;
            client.write_datetime(&stamp).await?;
            let current = client.read_datetime().await?;
            Ok::<_, DeviceError>(ClockUpdate { previous, current })
        })?;
        debug!(
            address = %self.address(),
            previous = ?update.previous,
            current = ?update.current,
            "device clock set"
        );
        Ok(update)
    }

    fn bond_key(&self) -> Result<OobKey> {
        let key = run_shell(self, ShellCommand::BondGet)?;
        if key.is_empty() {
            return Err(DeviceError::Malformed("device returned an empty bond key".to_string()));
        }
        Ok(OobKey::new(key))
    }

    fn set_bond_key(&self, key: &OobKey) -> Result<()> {
        run_shell(
            self,
            ShellCommand::BondSet {
                key: key.as_str().to_string(),
            },
        )?;
        Ok(())
    }

    fn delete_bond_key(&self) -> Result<()> {
        run_shell(self, ShellCommand::BondDel)?;
        Ok(())
    }

    fn upload_image<P>(
        &self,
        image: Arc<[u8]>,
        slot: u32,
        timeout: Duration,
        mut progress: P,
    ) -> Result<()>
    where
        P: FnMut(usize) + Send + 'static,
    {
        if image.is_empty() {
            return Err(DeviceError::Malformed("firmware image is empty".to_string()));
        }
        let total = image.len();
        info!(address = %self.address(), total, slot, "uploading image");

        self.call(timeout, move |link, cancel| async move {
            let mut offset = 0;
            while offset < total {
                if cancel.is_cancelled() {
                    return Err(DeviceError::Cancelled);
                }
                let next = link.client().upload_chunk(&image, slot, offset).await?;
                if next <= offset || next > total {
                    return Err(DeviceError::Malformed(format!(
                        "upload offset went from {offset} to {next} (image is {total} bytes)"
                    )));
                }
                offset = next;
                progress(offset);
            }
            Ok::<_, DeviceError>(())
        })
    }
}
