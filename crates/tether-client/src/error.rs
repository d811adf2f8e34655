//! Client error types.

use crate::events::DisconnectReason;
use std::time::Duration;
use tether_core::{CodecError, ErrorCode, ProtocolError};

/// Failures of the physical link.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("websocket error: {0}")]
    WebSocket(String),
    #[error("cannot load trust anchors: {0}")]
    Certificate(String),
    #[error("connection closed")]
    Closed,
    #[error("refusing to send an empty frame")]
    EmptyFrame,
}

/// Why a connect attempt did not end in the Connected state.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConnectError {
    #[error("no protocol configuration loaded")]
    NotConfigured,
    #[error("a connection attempt is already in flight")]
    AlreadyConnecting,
    #[error("connection failed: {0}")]
    Failed(DisconnectReason),
    /// The client was reset before the attempt settled.
    #[error("connection attempt abandoned")]
    Abandoned,
}

impl ConnectError {
    pub fn code(&self) -> Option<ErrorCode> {
        match self {
            ConnectError::NotConfigured => Some(ErrorCode::CallBeforeConfig),
            ConnectError::AlreadyConnecting => Some(ErrorCode::ConnectingRepeat),
            ConnectError::Failed(DisconnectReason::ConnectTimeout)
            | ConnectError::Failed(DisconnectReason::ReconnectTimeout) => {
                Some(ErrorCode::ConnectTimeout)
            }
            ConnectError::Failed(DisconnectReason::HeartbeatTimeout) => {
                Some(ErrorCode::HeartbeatTimeout)
            }
            _ => None,
        }
    }
}

/// Why a request produced no response.
#[derive(Debug, thiserror::Error)]
pub enum RequestError {
    #[error("not connected")]
    NotConnected,
    #[error("still connecting")]
    Connecting,
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error(transparent)]
    Transport(#[from] TransportError),
    /// Heartbeat messages are sent by the client itself.
    #[error("{0} is reserved for the heartbeat")]
    Reserved(String),
    #[error("request {seq_id} evicted after {elapsed:?} without a response")]
    Evicted { seq_id: u32, elapsed: Duration },
    /// The link went away before a response arrived.
    #[error("request abandoned")]
    Abandoned,
}

impl RequestError {
    pub fn code(&self) -> Option<ErrorCode> {
        match self {
            RequestError::Connecting => Some(ErrorCode::ConnectingNow),
            RequestError::Protocol(e) => Some(e.code()),
            RequestError::Codec(e) => Some(e.code()),
            RequestError::Evicted { .. } => Some(ErrorCode::ProtocolTimeout),
            RequestError::Reserved(_) => Some(ErrorCode::RouteMissing),
            RequestError::NotConnected | RequestError::Transport(_) | RequestError::Abandoned => None,
        }
    }
}

/// Failure to read a [`ClientConfig`](crate::ClientConfig) file.
#[derive(Debug, thiserror::Error)]
pub enum ConfigLoadError {
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Toml(#[from] toml::de::Error),
}
