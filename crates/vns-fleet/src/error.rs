//! Error types for fleet operations.

use thiserror::Error;
use vns_session::DeviceAddress;

/// Errors from multi-device operations.
///
/// Per-device failures stay inside a [`Batch`](crate::Batch); these errors only
/// appear when a caller asks for an aggregate verdict or a protocol aborts.
#[derive(Debug, Error)]
pub enum FleetError {
    /// Some devices in a batch failed.
    #[error("{} of {total} device(s) failed: {}", .failed.len(), join_addresses(.failed))]
    PartialFailure {
        /// Addresses whose slot holds an error, in input order.
        failed: Vec<DeviceAddress>,
        /// Batch size.
        total: usize,
    },

    /// Pairing aborted before anything was written.
    #[error("pairing aborted: {0}")]
    Pairing(String),

    /// Invalid fleet configuration.
    #[error("configuration error: {0}")]
    Config(String),

    /// Reading configuration failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

fn join_addresses(addresses: &[DeviceAddress]) -> String {
    addresses
        .iter()
        .map(DeviceAddress::as_str)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Result type alias for fleet operations.
pub type Result<T> = std::result::Result<T, FleetError>;
