//! Client tuning knobs.

use crate::error::ConfigLoadError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Client configuration.
///
/// Durations are written in milliseconds in configuration files:
///
/// ```toml
/// connect_retry = 3
/// connect_interval = 3000
/// heartbeat_interval = 5000
/// auto_reconnect = true
/// ```
///
/// Changing the configuration of a connected client has no effect on the
/// link already in flight.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Log every frame sent and received at debug level instead of trace.
    pub debug_mode: bool,
    /// Dial attempts the transport retries silently before giving up.
    pub connect_retry: u32,
    /// Delay between transport dial attempts.
    #[serde(with = "millis")]
    pub connect_interval: Duration,
    /// Deadline for a connect attempt, retries included.
    #[serde(with = "millis")]
    pub connect_timeout: Duration,
    /// Age after which a pending request is reported as timed out.
    #[serde(with = "millis")]
    pub protocol_timeout: Duration,
    /// Silence after which the link is considered dead.
    #[serde(with = "millis")]
    pub heartbeat_timeout: Duration,
    #[serde(with = "millis")]
    pub heartbeat_interval: Duration,
    /// Period of the liveness check.
    #[serde(with = "millis")]
    pub tick_interval: Duration,
    /// Reconnect automatically after an established link is lost.
    pub auto_reconnect: bool,
    /// PEM file with extra trust anchors for `wss://` addresses.
    pub ca_cert: Option<PathBuf>,
    /// Age after which a pending request is dropped. Zero keeps requests
    /// pending until the link goes away.
    #[serde(with = "millis")]
    pub pending_eviction: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            debug_mode: false,
            connect_retry: 3,
            connect_interval: Duration::from_millis(3000),
            connect_timeout: Duration::from_millis(10_000),
            protocol_timeout: Duration::from_millis(10_000),
            heartbeat_timeout: Duration::from_millis(15_000),
            heartbeat_interval: Duration::from_millis(5000),
            tick_interval: Duration::from_millis(500),
            auto_reconnect: true,
            ca_cert: None,
            pending_eviction: Duration::from_millis(60_000),
        }
    }
}

impl ClientConfig {
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigLoadError> {
        Ok(toml::from_str(s)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigLoadError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    /// Tick period, never zero.
    pub(crate) fn tick_period(&self) -> Duration {
        self.tick_interval.max(Duration::from_millis(1))
    }
}

mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(u64::try_from(value.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
