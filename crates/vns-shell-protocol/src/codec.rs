//! Binary payload codec for shell arguments and responses.
//!
//! Shell tokens are text, so binary payloads (configuration blobs) travel as
//! standard base64 with padding in both directions.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;

use crate::error::{ShellError, ShellResult};

/// Encode a binary payload into a shell token.
pub fn encode_payload(payload: &[u8]) -> String {
    STANDARD.encode(payload)
}

/// Decode a shell token or response payload back into bytes.
///
/// Surrounding whitespace is ignored; the device terminates lines with `\r\n`.
pub fn decode_payload(text: &str) -> ShellResult<Vec<u8>> {
    STANDARD
        .decode(text.trim())
        .map_err(|e| ShellError::InvalidPayload(format!("{e} in {:?}", text.trim())))
}
