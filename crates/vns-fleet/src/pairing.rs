//! Two-party out-of-band key exchange.
//!
//! ```text
//! FetchBoth --both ok--> Validate --> ExchangeBoth --> Done
//!     |
//!     +--either failed--> abort (nothing written)
//! ```
//!
//! Keys are fetched from both devices concurrently. Only when both fetches
//! succeed is each key written into the other device, again concurrently.
//! Unpairing deletes the stored peer key on both devices with no validation;
//! each side's outcome stands on its own.

use std::fmt;

use tracing::{debug, info, warn};
use vns_session::{DeviceAddress, DeviceSession, Management, OobKey, Transport};

use crate::error::{FleetError, Result};
use crate::orchestrator::{fan_out, Batch, Connector, Orchestrator};

/// Pairing protocol phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PairingPhase {
    /// Reading both devices' keys.
    FetchBoth,
    /// Checking that both keys were read.
    Validate,
    /// Writing each key into the other device.
    ExchangeBoth,
    /// Both devices hold the other's key.
    Done,
}

impl fmt::Display for PairingPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PairingPhase::FetchBoth => "fetch",
            PairingPhase::Validate => "validate",
            PairingPhase::ExchangeBoth => "exchange",
            PairingPhase::Done => "done",
        };
        f.write_str(s)
    }
}

/// Exchange keys between two connected devices.
///
/// Returns [`FleetError::Pairing`] without writing anything if either key
/// cannot be read. If the exchange itself fails on one side, the other side's
/// write is kept and [`FleetError::PartialFailure`] names the failed device.
pub fn pair_sessions<T>(first: &DeviceSession<T>, second: &DeviceSession<T>) -> Result<()>
where
    T: Transport,
    DeviceSession<T>: Management,
{
    let devices = [first, second];
    let addresses = [first.address().clone(), second.address().clone()];

    debug!(first = %addresses[0], second = %addresses[1], phase = %PairingPhase::FetchBoth, "pairing");
    let fetched = fan_out(&devices, |_, device| device.bond_key());

    debug!(phase = %PairingPhase::Validate, "pairing");
    let mut keys: Vec<OobKey> = Vec::with_capacity(2);
    let mut problems = Vec::new();
    for (address, outcome) in addresses.iter().zip(fetched) {
        match outcome {
            Ok(key) => keys.push(key),
            Err(e) => problems.push(format!("{address}: {e}")),
        }
    }
    let (key_first, key_second) = match (keys.pop(), keys.pop()) {
        (Some(second_key), Some(first_key)) if problems.is_empty() => (first_key, second_key),
        _ => {
            let reason = format!("could not read bond key ({})", problems.join("; "));
            warn!(first = %addresses[0], second = %addresses[1], %reason, "pairing aborted");
            return Err(FleetError::Pairing(reason));
        }
    };

    debug!(phase = %PairingPhase::ExchangeBoth, "pairing");
    // Each device receives the other's key.
    let swapped = [key_second, key_first];
    let written = fan_out(&devices, |index, device| device.set_bond_key(&swapped[index]));
    let batch = Batch::new(&addresses, written);
    if !batch.is_all_ok() {
        batch.log_failures("bond set");
        batch.ensure_all_ok()?;
    }

    info!(first = %addresses[0], second = %addresses[1], phase = %PairingPhase::Done, "paired");
    Ok(())
}

/// Delete the stored peer key on every device, concurrently.
pub fn unpair_sessions<T>(devices: &[DeviceSession<T>]) -> Batch<()>
where
    T: Transport,
    DeviceSession<T>: Management,
{
    let addresses: Vec<DeviceAddress> = devices.iter().map(|d| d.address().clone()).collect();
    let outcomes = fan_out(devices, |_, device| device.delete_bond_key());
    let batch = Batch::new(&addresses, outcomes);
    batch.log_failures("bond del");
    batch
}

impl<C: Connector> Orchestrator<C>
where
    DeviceSession<C::Link>: Management,
{
    /// Connect to both devices and exchange their keys.
    ///
    /// A device that cannot be reached aborts the pairing before any key is read.
    pub fn pair(&self, first: &DeviceAddress, second: &DeviceAddress) -> Result<()> {
        let sessions = self
            .connect_all(&[first.clone(), second.clone()])
            .ensure_all_ok()
            .map_err(|e| FleetError::Pairing(e.to_string()))?;
        let outcome = match sessions.as_slice() {
            [a, b] => pair_sessions(a, b),
            _ => Err(FleetError::Pairing("expected exactly two sessions".to_string())),
        };
        fan_out(&sessions, |_, session| session.close());
        outcome
    }

    /// Remove the bond on both devices. Each side succeeds or fails on its own.
    pub fn unpair(&self, first: &DeviceAddress, second: &DeviceAddress) -> Batch<()> {
        self.run_all(&[first.clone(), second.clone()], |session| {
            session.delete_bond_key()
        })
    }
}
