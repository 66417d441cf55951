//! Commands that can be sent to the device shell.
//!
//! The shell supports a small set of command groups:
//! - Configuration get/set (`cfg`)
//! - Out-of-band bond key management (`bond`)
//! - Device information (`batt`, `version`)
//! - Bootloader entry (`dfu`)
//!
//! Command words are not hard-coded; they come from a [`CommandNames`] table so
//! a firmware variant with different spellings only needs a different table.

use serde::{Deserialize, Serialize};

use crate::codec::{decode_payload, encode_payload};
use crate::error::{ShellError, ShellResult};

/// Configuration blob selector used by `cfg get` / `cfg set`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfigKind {
    /// System configuration (sensors, dispatcher).
    Sys,
    /// Stimulation configuration.
    Stim,
}

impl ConfigKind {
    /// Get the token used in commands.
    pub fn as_str(&self) -> &'static str {
        match self {
            ConfigKind::Sys => "sys",
            ConfigKind::Stim => "stim",
        }
    }

    /// Parse a config kind from its token.
    pub fn parse(s: &str) -> Option<ConfigKind> {
        match s {
            "sys" => Some(ConfigKind::Sys),
            "stim" => Some(ConfigKind::Stim),
            _ => None,
        }
    }
}

impl std::fmt::Display for ConfigKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Command words understood by the device shell.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CommandNames {
    /// Configuration group (`cfg`).
    pub config: String,
    /// Bond key group (`bond`).
    pub bond: String,
    /// Name under which the peer key is stored (`vns`).
    pub bond_name: String,
    /// Battery level query (`batt`).
    pub battery: String,
    /// Firmware version query (`version`).
    pub version: String,
    /// Reboot-into-bootloader request (`dfu`).
    pub bootloader: String,
}

impl Default for CommandNames {
    fn default() -> Self {
        CommandNames {
            config: "cfg".to_string(),
            bond: "bond".to_string(),
            bond_name: "vns".to_string(),
            battery: "batt".to_string(),
            version: "version".to_string(),
            bootloader: "dfu".to_string(),
        }
    }
}

/// A shell command that can be sent to the device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShellCommand {
    /// Read the local out-of-band key (`bond get`).
    BondGet,
    /// Store a peer's out-of-band key (`bond set <name> <key>`).
    BondSet {
        /// Peer key token, passed through untouched.
        key: String,
    },
    /// Delete the stored peer key (`bond del <name>`).
    BondDel,
    /// Read a configuration blob (`cfg get <kind>`).
    CfgGet {
        /// Which configuration to read.
        kind: ConfigKind,
    },
    /// Write a configuration blob (`cfg set <kind> <base64>`).
    CfgSet {
        /// Which configuration to write.
        kind: ConfigKind,
        /// Opaque encoded configuration.
        payload: Vec<u8>,
    },
    /// Read the battery level (`batt`).
    Battery,
    /// Read the firmware version (`version`).
    Version,
    /// Ask the device to boot into its bootloader on next reset (`dfu`).
    EnterBootloader,
    /// Arbitrary token list, sent as-is.
    Raw {
        /// Tokens to send.
        argv: Vec<String>,
    },
}

impl ShellCommand {
    /// Build the token list for this command.
    pub fn argv(&self, names: &CommandNames) -> Vec<String> {
        match self {
            ShellCommand::BondGet => vec![names.bond.clone(), "get".to_string()],
            ShellCommand::BondSet { key } => vec![
                names.bond.clone(),
                "set".to_string(),
                names.bond_name.clone(),
                key.clone(),
            ],
            ShellCommand::BondDel => vec![
                names.bond.clone(),
                "del".to_string(),
                names.bond_name.clone(),
            ],
            ShellCommand::CfgGet { kind } => vec![
                names.config.clone(),
                "get".to_string(),
                kind.as_str().to_string(),
            ],
            ShellCommand::CfgSet { kind, payload } => vec![
                names.config.clone(),
                "set".to_string(),
                kind.as_str().to_string(),
                encode_payload(payload),
            ],
            ShellCommand::Battery => vec![names.battery.clone()],
            ShellCommand::Version => vec![names.version.clone()],
            ShellCommand::EnterBootloader => vec![names.bootloader.clone()],
            ShellCommand::Raw { argv } => argv.clone(),
        }
    }

    /// Render the command as a single line, for logs.
    ///
    /// Binary payloads are summarized by length instead of being printed.
    pub fn describe(&self, names: &CommandNames) -> String {
        match self {
            ShellCommand::CfgSet { kind, payload } => {
                format!("{} set {} <{} bytes>", names.config, kind, payload.len())
            }
            ShellCommand::BondSet { .. } => {
                format!("{} set {} <key>", names.bond, names.bond_name)
            }
            other => other.argv(names).join(" "),
        }
    }

    /// Whether the command changes device state.
    pub fn is_write(&self) -> bool {
        matches!(
            self,
            ShellCommand::BondSet { .. }
                | ShellCommand::BondDel
                | ShellCommand::CfgSet { .. }
                | ShellCommand::EnterBootloader
        )
    }

    /// Parse a token list back into a command.
    ///
    /// This is the device-side view of [`ShellCommand::argv`]; unknown token lists
    /// are returned as [`ShellCommand::Raw`].
    pub fn parse(argv: &[String], names: &CommandNames) -> ShellResult<ShellCommand> {
        let tokens: Vec<&str> = argv.iter().map(String::as_str).collect();
        let Some((&head, rest)) = tokens.split_first() else {
            return Err(ShellError::InvalidCommand("empty token list".to_string()));
        };

        if head == names.bond {
            return match rest {
                ["get"] => Ok(ShellCommand::BondGet),
                ["set", name, key] if *name == names.bond_name => Ok(ShellCommand::BondSet {
                    key: key.to_string(),
                }),
                ["del", name] if *name == names.bond_name => Ok(ShellCommand::BondDel),
                _ => Err(ShellError::InvalidCommand(argv.join(" "))),
            };
        }

        if head == names.config {
            return match rest {
                ["get", kind] => {
                    let kind = parse_kind(kind)?;
                    Ok(ShellCommand::CfgGet { kind })
                }
                ["set", kind, payload] => {
                    let kind = parse_kind(kind)?;
                    let payload = decode_payload(payload)?;
                    Ok(ShellCommand::CfgSet { kind, payload })
                }
                _ => Err(ShellError::InvalidCommand(argv.join(" "))),
            };
        }

        if rest.is_empty() {
            if head == names.battery {
                return Ok(ShellCommand::Battery);
            }
            if head == names.version {
                return Ok(ShellCommand::Version);
            }
            if head == names.bootloader {
                return Ok(ShellCommand::EnterBootloader);
            }
        }

        Ok(ShellCommand::Raw {
            argv: argv.to_vec(),
        })
    }
}

fn parse_kind(token: &str) -> ShellResult<ConfigKind> {
    ConfigKind::parse(token)
        .ok_or_else(|| ShellError::InvalidCommand(format!("unknown config kind: {token}")))
}
