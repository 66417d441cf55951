//! Error types for runners, transports and device sessions.

use std::time::Duration;

use thiserror::Error;
use vns_shell_protocol::ShellError;

use crate::session::SessionState;

/// Errors raised by a [`SessionRunner`](crate::SessionRunner).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RunnerError {
    /// The worker did not come up.
    #[error("session worker failed to start: {0}")]
    Startup(String),

    /// The worker has been terminated or has exited.
    #[error("session worker is not running")]
    NotRunning,

    /// The caller's deadline passed; the operation was cancelled on the worker.
    #[error("operation timed out after {0:?}")]
    Timeout(Duration),

    /// Too many operations are already queued on this worker.
    #[error("session queue is full ({0} operations in flight)")]
    QueueFull(usize),

    /// The operation was dropped by the worker before producing a result.
    #[error("operation was cancelled")]
    Cancelled,
}

/// Errors reported by the external transport collaborators.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// A link could not be established or was lost.
    #[error("connection error: {0}")]
    Connection(String),

    /// A request failed to reach the device or its reply was lost.
    #[error("I/O error: {0}")]
    Io(String),

    /// The operation needs an established link.
    #[error("not connected")]
    NotConnected,
}

/// Error from the external configuration codec.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("codec error: {0}")]
pub struct CodecError(pub String);

/// Errors from single-device operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeviceError {
    /// Every connection attempt failed; carries the last failure.
    #[error("connection failed after {attempts} attempt(s): {source}")]
    Connection {
        /// Number of attempts made.
        attempts: u32,
        /// Failure of the final attempt.
        #[source]
        source: Box<DeviceError>,
    },

    /// The operation did not finish before its deadline.
    #[error("operation timed out after {0:?}")]
    Timeout(Duration),

    /// The transport failed to carry the request.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The device answered, but not with a success.
    #[error("protocol error: {0}")]
    Protocol(#[from] ShellError),

    /// The device answered with data this layer cannot use.
    #[error("malformed response: {0}")]
    Malformed(String),

    /// The endpoint or command is not available on this transport.
    #[error("unsupported: {0}")]
    Unsupported(String),

    /// The session is not in a state that allows the operation.
    #[error("session is {0}")]
    InvalidState(SessionState),

    /// The session worker refused the operation.
    #[error(transparent)]
    Runner(RunnerError),

    /// The operation was cancelled before completing.
    #[error("operation was cancelled")]
    Cancelled,

    /// The configuration codec failed.
    #[error(transparent)]
    Codec(#[from] CodecError),
}

impl From<RunnerError> for DeviceError {
    fn from(err: RunnerError) -> Self {
        match err {
            RunnerError::Timeout(after) => DeviceError::Timeout(after),
            RunnerError::Cancelled => DeviceError::Cancelled,
            other => DeviceError::Runner(other),
        }
    }
}

impl DeviceError {
    /// Whether the device answered and refused (as opposed to being unreachable).
    pub fn is_protocol(&self) -> bool {
        matches!(self, DeviceError::Protocol(_) | DeviceError::Malformed(_))
    }

    /// Whether the error came from a deadline.
    pub fn is_timeout(&self) -> bool {
        match self {
            DeviceError::Timeout(_) => true,
            DeviceError::Connection { source, .. } => source.is_timeout(),
            _ => false,
        }
    }
}

/// Result type alias for device operations.
pub type Result<T> = std::result::Result<T, DeviceError>;
