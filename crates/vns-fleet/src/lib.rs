//! SmartVNS fleet operations.
//!
//! This crate runs device operations across many SmartVNS devices at once on
//! top of `vns-session`:
//!
//! - [`Orchestrator`]: concurrent fan-out with one session and one thread per
//!   device; results come back as an ordered [`Batch`].
//! - [`pairing`]: two-party out-of-band key exchange that never writes a
//!   partial bond.
//! - [`dfu`]: firmware update through the bootloader, with progress events.
//!
//! Failures are collected per device. Nothing in a batch aborts the other
//! devices; use [`Batch::ensure_all_ok`] to turn any failure into an error.
//!
//! # Example
//!
//! ```rust,ignore
//! use vns_fleet::{FleetConfig, Orchestrator};
//!
//! let config = FleetConfig::load("fleet.yaml")?;
//! let fleet = Orchestrator::from_config(open_serial_port, &config);
//! let levels = fleet.battery_levels(&addresses);
//! for (address, level) in levels.successes() {
//!     println!("{address}: {level}%");
//! }
//! levels.ensure_all_ok()?;
//! ```

pub mod config;
pub mod dfu;
pub mod error;
pub mod orchestrator;
pub mod pairing;
mod routines;

pub use config::{DfuConfig, FleetConfig};
pub use dfu::{DfuJob, DfuPhase, DfuProgress, DfuReport, DfuSequencer};
pub use error::{FleetError, Result};
pub use orchestrator::{fan_out, Batch, Connector, Orchestrator};
pub use pairing::{pair_sessions, unpair_sessions, PairingPhase};
