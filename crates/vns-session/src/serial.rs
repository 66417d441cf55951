//! Serial adapter: maps endpoints onto shell commands.
//!
//! Results come back in two layers. The [`SmpClient`] reports whether the
//! request reached the device at all ([`TransportError`]); the shell's reply text
//! then says whether the device accepted it (`OK:` convention). A delivered
//! reply without the success marker becomes [`DeviceError::Protocol`], never a
//! transport error.

use async_trait::async_trait;
use tracing::{trace, warn};
use vns_shell_protocol::{CommandNames, ConfigKind, ShellCommand, ShellResponse};

use crate::error::{DeviceError, Result, TransportError};
use crate::profile::EndpointTable;
use crate::transport::{Endpoint, Notifications, Transport};

/// Serial management client for one port, provided by the SMP stack.
#[async_trait]
pub trait SmpClient: Send + Sync + 'static {
    /// Open the port and establish the management session.
    async fn connect(&self) -> std::result::Result<(), TransportError>;

    /// Close the port.
    async fn disconnect(&self) -> std::result::Result<(), TransportError>;

    /// Run a shell command and return its raw reply text.
    async fn execute(&self, argv: &[String]) -> std::result::Result<String, TransportError>;

    /// Reset the device.
    async fn reset(&self) -> std::result::Result<(), TransportError>;

    /// Erase persistent storage.
    async fn erase_storage(&self) -> std::result::Result<(), TransportError>;

    /// Read the device clock (ISO-8601 without zone), if set.
    async fn read_datetime(&self) -> std::result::Result<Option<String>, TransportError>;

    /// Set the device clock (ISO-8601 without zone).
    async fn write_datetime(&self, datetime: &str) -> std::result::Result<(), TransportError>;

    /// Send the image chunk starting at `offset`; returns the offset the device
    /// expects next.
    async fn upload_chunk(
        &self,
        image: &[u8],
        slot: u32,
        offset: usize,
    ) -> std::result::Result<usize, TransportError>;
}

/// [`Transport`] over an [`SmpClient`] shell.
#[derive(Debug)]
pub struct ShellTransport<C> {
    client: C,
    names: CommandNames,
}

impl<C: SmpClient> ShellTransport<C> {
    /// Wrap a client with the command words to use.
    pub fn new(client: C, names: CommandNames) -> Self {
        ShellTransport { client, names }
    }

    /// Wrap a client with the shell words from `endpoints`.
    pub fn from_table(client: C, endpoints: &EndpointTable) -> Self {
        Self::new(client, endpoints.shell.clone())
    }

    /// Get the underlying client.
    pub fn client(&self) -> &C {
        &self.client
    }

    /// Get the command words.
    pub fn names(&self) -> &CommandNames {
        &self.names
    }

    /// Run a shell command and return the payload of an `OK:` reply.
    pub async fn shell(&self, command: &ShellCommand) -> Result<String> {
        let argv = command.argv(&self.names);
        trace!(command = %command.describe(&self.names), "shell request");
        let reply = self.client.execute(&argv).await?;
        ShellResponse::parse(&reply).into_result().map_err(|e| {
            warn!(command = %command.describe(&self.names), reply = %reply.trim(), "shell rejected");
            DeviceError::Protocol(e)
        })
    }

    async fn read_config(&self, kind: ConfigKind) -> Result<Vec<u8>> {
        let payload = self.shell(&ShellCommand::CfgGet { kind }).await?;
        Ok(ShellResponse::Ok(payload).into_bytes()?)
    }

    async fn read_battery(&self) -> Result<Vec<u8>> {
        let payload = self.shell(&ShellCommand::Battery).await?;
        let level = ShellResponse::Ok(payload).into_integer()?;
        let level = u8::try_from(level)
            .map_err(|_| DeviceError::Malformed(format!("battery level {level} out of range")))?;
        Ok(vec![level])
    }
}

fn config_kind(endpoint: Endpoint) -> Option<ConfigKind> {
    match endpoint {
        Endpoint::SystemConfig => Some(ConfigKind::Sys),
        Endpoint::StimConfig => Some(ConfigKind::Stim),
        _ => None,
    }
}

#[async_trait]
impl<C: SmpClient> Transport for ShellTransport<C> {
    async fn connect(&self) -> Result<()> {
        Ok(self.client.connect().await?)
    }

    async fn disconnect(&self) -> Result<()> {
        Ok(self.client.disconnect().await?)
    }

    async fn read(&self, endpoint: Endpoint) -> Result<Vec<u8>> {
        if let Some(kind) = config_kind(endpoint) {
            return self.read_config(kind).await;
        }
        match endpoint {
            Endpoint::Battery => self.read_battery().await,
            Endpoint::Version => Ok(self.shell(&ShellCommand::Version).await?.into_bytes()),
            other => Err(DeviceError::Unsupported(format!("reading {other} over serial"))),
        }
    }

    async fn write(&self, endpoint: Endpoint, payload: &[u8]) -> Result<()> {
        let kind = config_kind(endpoint)
            .ok_or_else(|| DeviceError::Unsupported(format!("writing {endpoint} over serial")))?;
        self.shell(&ShellCommand::CfgSet {
            kind,
            payload: payload.to_vec(),
        })
        .await?;
        Ok(())
    }

    async fn subscribe(&self, endpoint: Endpoint) -> Result<Notifications> {
        Err(DeviceError::Unsupported(format!(
            "notifications on {endpoint} over serial"
        )))
    }

    async fn unsubscribe(&self, endpoint: Endpoint) -> Result<()> {
        Err(DeviceError::Unsupported(format!(
            "notifications on {endpoint} over serial"
        )))
    }
}
