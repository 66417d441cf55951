//! SmartVNS Shell Protocol
//!
//! This crate provides types and utilities for talking to SmartVNS trackers and
//! stimulators through the shell service of their serial management link. The
//! management transport itself (framing, retransmission) lives elsewhere; this
//! crate only deals with what goes inside a shell request and what comes back.
//!
//! # Protocol Overview
//!
//! - **Requests** (host → device): a list of string tokens, e.g. `["cfg", "get", "sys"]`.
//!   Binary arguments are base64 encoded before they become a token.
//! - **Responses** (device → host): plain text. A response starting with `OK:` is an
//!   application-level success and the remainder is the payload. Anything else is
//!   an application-level error and the raw text is kept as a diagnostic.
//!
//! Transport-level failures (the request never reached the device) are reported
//! by the transport and never reach this crate. A transport success carrying a
//! non-`OK:` body is still a failure and is reported as [`ShellError::Rejected`].
//!
//! # Example
//!
//! ```rust,ignore
//! use vns_shell_protocol::{CommandNames, ConfigKind, ShellCommand, ShellResponse};
//!
//! let argv = ShellCommand::CfgGet { kind: ConfigKind::Sys }.argv(&CommandNames::default());
//! let blob = ShellResponse::parse("OK:CAE=").into_result()?;
//! ```

mod codec;
mod commands;
mod error;
mod responses;

pub use codec::*;
pub use commands::*;
pub use error::*;
pub use responses::*;
