//! Error types for the shell protocol.

use thiserror::Error;

/// Errors that can occur when working with the shell protocol.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ShellError {
    /// The device answered without the `OK:` success marker.
    ///
    /// Carries the raw response text for diagnostics.
    #[error("device rejected command: {0}")]
    Rejected(String),

    /// A binary payload was not valid base64.
    #[error("invalid base64 payload: {0}")]
    InvalidPayload(String),

    /// A token list could not be understood as a command.
    #[error("invalid command: {0}")]
    InvalidCommand(String),

    /// An `OK:` payload could not be interpreted.
    #[error("failed to parse payload: {0}")]
    ParseError(String),
}

/// Result type alias for shell operations.
pub type ShellResult<T> = Result<T, ShellError>;
