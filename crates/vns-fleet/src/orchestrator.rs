//! Multi-device fan-out.
//!
//! The [`Orchestrator`] runs one logical operation against many devices at once.
//! Each device gets its own thread and its own [`DeviceSession`], so a device
//! that hangs or fails only ever affects its own slot. Results come back as a
//! [`Batch`] in the same order as the input addresses.

use std::thread;
use std::time::Duration;

use tracing::{debug, info, warn};
use vns_session::{
    DeviceAddress, DeviceError, DeviceSession, EndpointTable, RunnerConfig, SessionConfig,
    Transport,
};

use crate::config::FleetConfig;
use crate::error::FleetError;

// ============================================================================
// Fan-out primitive
// ============================================================================

/// Run `op` on every item concurrently, one thread per item.
///
/// The output has one entry per item, in input order. Each slot is produced by
/// exactly one thread and collected by joining that thread.
pub fn fan_out<I, R, F>(items: &[I], op: F) -> Vec<R>
where
    I: Sync,
    R: Send,
    F: Fn(usize, &I) -> R + Sync,
{
    let op = &op;
    thread::scope(|scope| {
        let handles: Vec<_> = items
            .iter()
            .enumerate()
            .map(|(index, item)| scope.spawn(move || op(index, item)))
            .collect();
        handles
            .into_iter()
            .map(|handle| match handle.join() {
                Ok(result) => result,
                Err(panic) => std::panic::resume_unwind(panic),
            })
            .collect()
    })
}

// ============================================================================
// Batch results
// ============================================================================

/// Per-device outcomes of a fan-out, in input order.
#[derive(Debug)]
pub struct Batch<T> {
    results: Vec<(DeviceAddress, Result<T, DeviceError>)>,
}

impl<T> Batch<T> {
    /// Pair addresses with their outcomes. Both must be in input order.
    pub fn new(addresses: &[DeviceAddress], outcomes: Vec<Result<T, DeviceError>>) -> Self {
        debug_assert_eq!(addresses.len(), outcomes.len());
        Batch {
            results: addresses.iter().cloned().zip(outcomes).collect(),
        }
    }

    /// Number of slots.
    pub fn len(&self) -> usize {
        self.results.len()
    }

    /// Whether the batch has no slots.
    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    /// Iterate slots in input order.
    pub fn iter(&self) -> impl Iterator<Item = &(DeviceAddress, Result<T, DeviceError>)> {
        self.results.iter()
    }

    /// Outcome for slot `index`.
    pub fn get(&self, index: usize) -> Option<&Result<T, DeviceError>> {
        self.results.get(index).map(|(_, outcome)| outcome)
    }

    /// Whether every device succeeded.
    pub fn is_all_ok(&self) -> bool {
        self.results.iter().all(|(_, outcome)| outcome.is_ok())
    }

    /// Failed slots, in input order.
    pub fn failures(&self) -> Vec<(&DeviceAddress, &DeviceError)> {
        self.results
            .iter()
            .filter_map(|(address, outcome)| outcome.as_ref().err().map(|e| (address, e)))
            .collect()
    }

    /// Successful slots, in input order.
    pub fn successes(&self) -> Vec<(&DeviceAddress, &T)> {
        self.results
            .iter()
            .filter_map(|(address, outcome)| outcome.as_ref().ok().map(|v| (address, v)))
            .collect()
    }

    /// Apply `f` to every successful value.
    pub fn map<U>(self, mut f: impl FnMut(T) -> U) -> Batch<U> {
        Batch {
            results: self
                .results
                .into_iter()
                .map(|(address, outcome)| (address, outcome.map(&mut f)))
                .collect(),
        }
    }

    /// All values, or [`FleetError::PartialFailure`] naming every failed device.
    pub fn ensure_all_ok(self) -> Result<Vec<T>, FleetError> {
        let total = self.results.len();
        let failed: Vec<DeviceAddress> = self
            .failures()
            .into_iter()
            .map(|(address, _)| address.clone())
            .collect();
        if !failed.is_empty() {
            return Err(FleetError::PartialFailure { failed, total });
        }
        Ok(self
            .results
            .into_iter()
            .filter_map(|(_, outcome)| outcome.ok())
            .collect())
    }

    /// Log every failure at `warn` level.
    pub fn log_failures(&self, operation: &str) {
        for (address, error) in self.failures() {
            warn!(%address, operation, %error, "device failed");
        }
    }

    /// Take the slots.
    pub fn into_results(self) -> Vec<(DeviceAddress, Result<T, DeviceError>)> {
        self.results
    }
}

impl<T> IntoIterator for Batch<T> {
    type Item = (DeviceAddress, Result<T, DeviceError>);
    type IntoIter = std::vec::IntoIter<Self::Item>;

    fn into_iter(self) -> Self::IntoIter {
        self.results.into_iter()
    }
}

// ============================================================================
// Orchestrator
// ============================================================================

/// Builds the transport for a device address.
pub trait Connector: Sync {
    /// Transport produced for each device.
    type Link: Transport;

    /// Create an unconnected transport for `address` that speaks `endpoints`.
    fn link(
        &self,
        address: &DeviceAddress,
        endpoints: &EndpointTable,
    ) -> vns_session::Result<Self::Link>;
}

impl<F, T> Connector for F
where
    F: Fn(&DeviceAddress, &EndpointTable) -> vns_session::Result<T> + Sync,
    T: Transport,
{
    type Link = T;

    fn link(&self, address: &DeviceAddress, endpoints: &EndpointTable) -> vns_session::Result<T> {
        self(address, endpoints)
    }
}

/// Runs operations across many devices concurrently.
#[derive(Debug)]
pub struct Orchestrator<C> {
    connector: C,
    runner: RunnerConfig,
    session: SessionConfig,
    endpoints: EndpointTable,
}

impl<C: Connector> Orchestrator<C> {
    /// Create an orchestrator with explicit runner and session settings and
    /// the default endpoint table.
    pub fn new(connector: C, runner: RunnerConfig, session: SessionConfig) -> Self {
        Orchestrator {
            connector,
            runner,
            session,
            endpoints: EndpointTable::default(),
        }
    }

    /// Create an orchestrator from a fleet configuration.
    pub fn from_config(connector: C, config: &FleetConfig) -> Self {
        Self::new(connector, config.runner.clone(), config.session.clone())
            .with_endpoints(config.endpoints.clone())
    }

    /// Replace the endpoint table handed to the connector.
    pub fn with_endpoints(mut self, endpoints: EndpointTable) -> Self {
        self.endpoints = endpoints;
        self
    }

    /// Get the endpoint table handed to the connector.
    pub fn endpoints(&self) -> &EndpointTable {
        &self.endpoints
    }

    /// Get the connector.
    pub fn connector(&self) -> &C {
        &self.connector
    }

    /// Get the session settings used for every device.
    pub fn session_config(&self) -> &SessionConfig {
        &self.session
    }

    /// Open a session to one device and connect it with the session's retry policy.
    pub fn connect(&self, address: &DeviceAddress) -> vns_session::Result<DeviceSession<C::Link>> {
        self.connect_with(address, self.session.connect_retries, self.session.connect_timeout)
    }

    /// Open a session to one device and connect it with an explicit retry policy.
    pub fn connect_with(
        &self,
        address: &DeviceAddress,
        retries: u32,
        per_attempt_timeout: Duration,
    ) -> vns_session::Result<DeviceSession<C::Link>> {
        let link = self.connector.link(address, &self.endpoints)?;
        let session = DeviceSession::open(
            address.clone(),
            link,
            self.session.clone(),
            &self.runner,
        )?;
        session.connect(retries, per_attempt_timeout)?;
        Ok(session)
    }

    /// Connect to every device concurrently.
    pub fn connect_all(&self, addresses: &[DeviceAddress]) -> Batch<DeviceSession<C::Link>> {
        debug!(devices = addresses.len(), "connecting batch");
        let outcomes = fan_out(addresses, |_, address| self.connect(address));
        let batch = Batch::new(addresses, outcomes);
        batch.log_failures("connect");
        batch
    }

    /// Connect to every device and run `op` on each, concurrently.
    ///
    /// Each slot connects, runs `op`, then disconnects, independently of the
    /// others. A slot that cannot connect holds the connection error.
    pub fn run_all<R, F>(&self, addresses: &[DeviceAddress], op: F) -> Batch<R>
    where
        R: Send,
        F: Fn(&DeviceSession<C::Link>) -> vns_session::Result<R> + Sync,
    {
        info!(devices = addresses.len(), "fan-out started");
        let outcomes = fan_out(addresses, |_, address| {
            let session = self.connect(address)?;
            let outcome = op(&session);
            session.close();
            outcome
        });
        let batch = Batch::new(addresses, outcomes);
        info!(
            devices = batch.len(),
            failed = batch.failures().len(),
            "fan-out finished"
        );
        batch.log_failures("fan-out");
        batch
    }

    /// Run `op` concurrently on sessions that are already connected.
    pub fn run_sessions<R, F>(&self, sessions: &[DeviceSession<C::Link>], op: F) -> Batch<R>
    where
        R: Send,
        F: Fn(&DeviceSession<C::Link>) -> vns_session::Result<R> + Sync,
    {
        let addresses: Vec<DeviceAddress> =
            sessions.iter().map(|s| s.address().clone()).collect();
        let outcomes = fan_out(sessions, |_, session| op(session));
        Batch::new(&addresses, outcomes)
    }
}
