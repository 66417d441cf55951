//! Response parsing for the shell protocol.
//!
//! A response that reached the host is classified by a single rule: text that
//! starts with `OK:` is a success and the remainder is the payload; anything
//! else is an error that keeps the raw text.

use crate::codec::decode_payload;
use crate::error::{ShellError, ShellResult};

/// Prefix the firmware puts in front of every successful response.
pub const OK_PREFIX: &str = "OK:";

/// Parsed response from the device shell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShellResponse {
    /// Application-level success; the `OK:` prefix and surrounding whitespace are stripped.
    Ok(String),

    /// Application-level failure; raw (trimmed) response text.
    Error(String),
}

impl ShellResponse {
    /// Classify a response string.
    pub fn parse(text: &str) -> ShellResponse {
        let text = text.trim();
        match text.strip_prefix(OK_PREFIX) {
            Some(payload) => ShellResponse::Ok(payload.trim().to_string()),
            None => ShellResponse::Error(text.to_string()),
        }
    }

    /// Check if this is a success response.
    pub fn is_ok(&self) -> bool {
        matches!(self, ShellResponse::Ok(_))
    }

    /// Get the payload if this is a success response.
    pub fn payload(&self) -> Option<&str> {
        match self {
            ShellResponse::Ok(p) => Some(p),
            ShellResponse::Error(_) => None,
        }
    }

    /// Convert into the payload, or [`ShellError::Rejected`] with the raw text.
    pub fn into_result(self) -> ShellResult<String> {
        match self {
            ShellResponse::Ok(p) => Ok(p),
            ShellResponse::Error(raw) => Err(ShellError::Rejected(raw)),
        }
    }

    /// Convert into a base64-decoded binary payload.
    pub fn into_bytes(self) -> ShellResult<Vec<u8>> {
        let payload = self.into_result()?;
        decode_payload(&payload)
    }

    /// Convert into an integer payload.
    pub fn into_integer(self) -> ShellResult<i64> {
        let payload = self.into_result()?;
        payload
            .parse()
            .map_err(|_| ShellError::ParseError(format!("expected integer, got {payload:?}")))
    }
}
