//! Runner and session configuration.
//!
//! Durations are written as integer milliseconds when (de)serialized, so a YAML
//! config reads `connect_timeout: 5000`.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for a [`SessionRunner`](crate::SessionRunner).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunnerConfig {
    /// Name used for the worker thread (`session-<name>`).
    pub name: String,
    /// How long `start()` waits for the worker to report ready.
    #[serde(with = "duration_ms")]
    pub startup_timeout: Duration,
    /// Grace period for joining the worker on `terminate()`.
    #[serde(with = "duration_ms")]
    pub join_timeout: Duration,
    /// Maximum number of operations waiting behind the one the worker is running.
    pub queue_depth: usize,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        RunnerConfig {
            name: "device".to_string(),
            startup_timeout: Duration::from_secs(2),
            join_timeout: Duration::from_secs(2),
            queue_depth: 16,
        }
    }
}

impl RunnerConfig {
    /// Same configuration with a different worker name.
    pub fn named(&self, name: impl Into<String>) -> RunnerConfig {
        RunnerConfig {
            name: name.into(),
            ..self.clone()
        }
    }
}

/// Timeouts and retry policy for a [`DeviceSession`](crate::DeviceSession).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Connection attempts before giving up.
    pub connect_retries: u32,
    /// Deadline for each connection attempt.
    #[serde(with = "duration_ms")]
    pub connect_timeout: Duration,
    /// Deadline for reads, writes and subscriptions.
    #[serde(with = "duration_ms")]
    pub operation_timeout: Duration,
    /// Deadline for the best-effort disconnect.
    #[serde(with = "duration_ms")]
    pub disconnect_timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        SessionConfig {
            connect_retries: 3,
            connect_timeout: Duration::from_secs(5),
            operation_timeout: Duration::from_secs(5),
            disconnect_timeout: Duration::from_secs(5),
        }
    }
}

/// Serde adapter storing a [`Duration`] as whole milliseconds.
pub mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    /// Serialize a duration as milliseconds.
    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    /// Deserialize a duration from milliseconds.
    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
