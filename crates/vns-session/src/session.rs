//! Device session: one device, one transport, one worker.
//!
//! A [`DeviceSession`] owns its [`SessionRunner`] and its transport. Every
//! transport call is submitted to the runner, so calls against one session run
//! one at a time in submission order, each bounded by the caller's deadline.
//!
//! ## Lifecycle
//!
//! ```text
//! Disconnected --connect--> Connecting --ok--> Connected
//!      ^                        |                  |
//!      +-------all failed-------+                  |
//!      +-----------------disconnect----------------+
//! (any) --close--> Closed   (terminal; every later call fails fast)
//! ```

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::AbortHandle;
use tracing::{debug, info, trace, warn};

use crate::config::{RunnerConfig, SessionConfig};
use crate::error::{DeviceError, Result};
use crate::runner::{CancelToken, SessionRunner};
use crate::transport::{DeviceAddress, Endpoint, Transport};

/// Connection state of a [`DeviceSession`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    /// No link.
    Disconnected,
    /// A connection attempt is in progress.
    Connecting,
    /// The link is up.
    Connected,
    /// The session was closed; its worker is gone.
    Closed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SessionState::Disconnected => "disconnected",
            SessionState::Connecting => "connecting",
            SessionState::Connected => "connected",
            SessionState::Closed => "closed",
        };
        f.write_str(s)
    }
}

/// Blocking handle to one device.
pub struct DeviceSession<T: Transport> {
    address: DeviceAddress,
    transport: Arc<T>,
    runner: SessionRunner,
    state: Mutex<SessionState>,
    subscriptions: Mutex<HashMap<Endpoint, AbortHandle>>,
    config: SessionConfig,
}

impl<T: Transport> DeviceSession<T> {
    /// Create a disconnected session and start its worker.
    pub fn open(
        address: DeviceAddress,
        transport: T,
        config: SessionConfig,
        runner: &RunnerConfig,
    ) -> Result<Self> {
        let runner = SessionRunner::start(&runner.named(address.as_str()))?;
        debug!(%address, "session opened");
        Ok(DeviceSession {
            address,
            transport: Arc::new(transport),
            runner,
            state: Mutex::new(SessionState::Disconnected),
            subscriptions: Mutex::new(HashMap::new()),
            config,
        })
    }

    /// Get the device address.
    pub fn address(&self) -> &DeviceAddress {
        &self.address
    }

    /// Get the session configuration.
    pub fn session_config(&self) -> &SessionConfig {
        &self.config
    }

    /// Get the transport.
    pub fn transport(&self) -> &Arc<T> {
        &self.transport
    }

    /// Get the current state.
    pub fn state(&self) -> SessionState {
        *self.state.lock()
    }

    /// Whether the link is up.
    pub fn is_connected(&self) -> bool {
        self.state() == SessionState::Connected
    }

    fn set_state(&self, state: SessionState) {
        *self.state.lock() = state;
    }

    /// Connect, trying up to `retries` times with no pause between attempts.
    ///
    /// Each attempt is bounded by `per_attempt_timeout`. When every attempt
    /// fails, the last failure is returned inside [`DeviceError::Connection`].
    pub fn connect(&self, retries: u32, per_attempt_timeout: Duration) -> Result<()> {
        match self.state() {
            SessionState::Connected => return Ok(()),
            SessionState::Closed => return Err(DeviceError::InvalidState(SessionState::Closed)),
            SessionState::Disconnected | SessionState::Connecting => {}
        }
        self.set_state(SessionState::Connecting);

        let attempts = retries.max(1);
        let mut last = None;
        for attempt in 1..=attempts {
            debug!(address = %self.address, attempt, attempts, "connecting");
            let transport = self.transport.clone();
            let outcome = self
                .runner
                .submit(per_attempt_timeout, move |_| async move {
                    transport.connect().await
                })
                .map_err(DeviceError::from)
                .and_then(|result| result);

            match outcome {
                Ok(()) => {
                    self.set_state(SessionState::Connected);
                    info!(address = %self.address, attempt, "connected");
                    return Ok(());
                }
                Err(e) => {
                    warn!(address = %self.address, attempt, error = %e, "connection attempt failed");
                    last = Some(e);
                }
            }
        }

        self.set_state(SessionState::Disconnected);
        Err(DeviceError::Connection {
            attempts,
            source: Box::new(last.unwrap_or(DeviceError::Cancelled)),
        })
    }

    /// Connect with the configured retry count and per-attempt timeout.
    pub fn connect_default(&self) -> Result<()> {
        self.connect(self.config.connect_retries, self.config.connect_timeout)
    }

    /// Tear down the link. Failures are logged, never returned.
    pub fn disconnect(&self, timeout: Duration) {
        self.stop_all_pumps();

        match self.state() {
            SessionState::Connected | SessionState::Connecting => {}
            SessionState::Disconnected | SessionState::Closed => return,
        }

        let transport = self.transport.clone();
        let outcome = self
            .runner
            .submit(timeout, move |_| async move { transport.disconnect().await })
            .map_err(DeviceError::from)
            .and_then(|result| result);
        if let Err(e) = outcome {
            warn!(address = %self.address, error = %e, "disconnect failed");
        } else {
            debug!(address = %self.address, "disconnected");
        }
        self.set_state(SessionState::Disconnected);
    }

    /// Run an operation against the transport on this session's worker.
    ///
    /// Fails fast with [`DeviceError::InvalidState`] unless the session is
    /// connected. The operation receives a [`CancelToken`] that fires when
    /// `timeout` passes.
    pub fn call<F, Fut, R>(&self, timeout: Duration, op: F) -> Result<R>
    where
        F: FnOnce(Arc<T>, CancelToken) -> Fut + Send + 'static,
        Fut: Future<Output = Result<R>> + 'static,
        R: Send + 'static,
    {
        let state = self.state();
        if state != SessionState::Connected {
            return Err(DeviceError::InvalidState(state));
        }
        let transport = self.transport.clone();
        self.runner
            .submit(timeout, move |cancel| op(transport, cancel))
            .map_err(|e| {
                let e = DeviceError::from(e);
                if e.is_timeout() {
                    warn!(address = %self.address, ?timeout, "device operation timed out");
                }
                e
            })?
    }

    /// Read an endpoint.
    pub fn read_value(&self, endpoint: Endpoint, timeout: Duration) -> Result<Vec<u8>> {
        trace!(address = %self.address, %endpoint, "read");
        self.call(timeout, move |transport, _| async move {
            transport.read(endpoint).await
        })
    }

    /// Write an endpoint.
    pub fn write_value(&self, endpoint: Endpoint, payload: &[u8], timeout: Duration) -> Result<()> {
        trace!(address = %self.address, %endpoint, len = payload.len(), "write");
        let payload = payload.to_vec();
        self.call(timeout, move |transport, _| async move {
            transport.write(endpoint, &payload).await
        })
    }

    /// Deliver notifications on `endpoint` to `handler`, in arrival order.
    ///
    /// The handler runs on the session worker between operations; it must not
    /// block. Subscribing again to the same endpoint replaces the previous handler.
    pub fn subscribe<H>(&self, endpoint: Endpoint, handler: H, timeout: Duration) -> Result<()>
    where
        H: FnMut(Vec<u8>) + Send + 'static,
    {
        let pump = self.call(timeout, move |transport, _| async move {
            let mut stream = transport.subscribe(endpoint).await?;
            let mut handler = handler;
            let task = tokio::task::spawn_local(async move {
                while let Some(payload) = stream.recv().await {
                    handler(payload);
                }
                trace!(%endpoint, "notification stream ended");
            });
            Ok::<_, DeviceError>(task.abort_handle())
        })?;

        if let Some(previous) = self.subscriptions.lock().insert(endpoint, pump) {
            previous.abort();
        }
        debug!(address = %self.address, %endpoint, "subscribed");
        Ok(())
    }

    /// Stop notifications on `endpoint`.
    pub fn unsubscribe(&self, endpoint: Endpoint, timeout: Duration) -> Result<()> {
        if let Some(pump) = self.subscriptions.lock().remove(&endpoint) {
            pump.abort();
        }
        self.call(timeout, move |transport, _| async move {
            transport.unsubscribe(endpoint).await
        })?;
        debug!(address = %self.address, %endpoint, "unsubscribed");
        Ok(())
    }

    /// Record that the device dropped the link on its own (reset, power loss).
    pub(crate) fn mark_link_down(&self) {
        self.stop_all_pumps();
        let mut state = self.state.lock();
        if *state != SessionState::Closed {
            *state = SessionState::Disconnected;
        }
    }

    fn stop_all_pumps(&self) {
        for (_, pump) in self.subscriptions.lock().drain() {
            pump.abort();
        }
    }

    /// Disconnect and stop the worker. Every later call fails with
    /// [`DeviceError::InvalidState`]. Idempotent.
    pub fn close(&self) {
        if self.state() == SessionState::Closed {
            return;
        }
        self.disconnect(self.config.disconnect_timeout);
        self.runner.terminate();
        self.set_state(SessionState::Closed);
        debug!(address = %self.address, "session closed");
    }
}

impl<T: Transport> Drop for DeviceSession<T> {
    fn drop(&mut self) {
        self.close();
    }
}

impl<T: Transport> fmt::Debug for DeviceSession<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceSession")
            .field("address", &self.address)
            .field("state", &self.state())
            .finish()
    }
}
