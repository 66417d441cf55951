//! SmartVNS device sessions.
//!
//! A [`DeviceSession`] is a blocking handle to one tracker or stimulator. Every
//! session owns a [`SessionRunner`]: a dedicated thread running a single-threaded
//! tokio event loop that executes the session's transport operations one at a
//! time. Callers block on a reply channel with a deadline; when the deadline
//! passes the operation is cancelled on the worker at its next await point.
//!
//! Transports are external collaborators reached through two seams:
//!
//! - [`GattClient`]: characteristic-level BLE access, adapted by [`GattTransport`].
//! - [`SmpClient`]: the serial management client, adapted by [`ShellTransport`]
//!   using the shell convention from `vns-shell-protocol`.
//!
//! Device types are composed from capability traits in [`devices`] rather than
//! an inheritance chain: a [`Tracker`] is config + battery + telemetry, a
//! [`Stimulator`] adds stimulation control, and a serial [`ManagedDevice`] adds
//! management commands (reboot, bond keys, image upload).

pub mod config;
pub mod devices;
pub mod error;
pub mod gatt;
pub mod profile;
pub mod runner;
pub mod serial;
pub mod session;
pub mod sim;
pub mod transport;

pub use config::{RunnerConfig, SessionConfig};
pub use devices::{
    BatteryCapable, ClockUpdate, ConfigCapable, Management, ManagedDevice, NotifiableCapable,
    SessionHandle, StimCodec, StimCommand, StimControlCapable, Stimulator, Tracker,
};
pub use error::{CodecError, DeviceError, Result, RunnerError, TransportError};
pub use gatt::{GattClient, GattTransport};
pub use profile::{EndpointTable, GattProfile};
pub use runner::{CancelToken, SessionRunner};
pub use serial::{ShellTransport, SmpClient};
pub use session::{DeviceSession, SessionState};
pub use transport::{ConfigBlob, DeviceAddress, Endpoint, Notifications, OobKey, Transport};
pub use vns_shell_protocol::{CommandNames, ConfigKind};
