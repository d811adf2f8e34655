//! Lifecycle notifications published by the client.

use std::fmt;
use std::time::Duration;
use tether_core::{ConnectionState, Response};

/// Why a link went down.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DisconnectReason {
    ConnectTimeout,
    ReconnectTimeout,
    HeartbeatTimeout,
    ReconnectFailed,
    ManualClose,
    TransportError,
    TransportClose,
}

impl DisconnectReason {
    /// Numeric reason code.
    pub fn code(self) -> u32 {
        match self {
            DisconnectReason::ConnectTimeout => 1,
            DisconnectReason::ReconnectTimeout => 2,
            DisconnectReason::HeartbeatTimeout => 3,
            DisconnectReason::ReconnectFailed => 10,
            DisconnectReason::ManualClose => 11,
            DisconnectReason::TransportError => 12,
            DisconnectReason::TransportClose => 13,
        }
    }
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            DisconnectReason::ConnectTimeout => "connect timeout",
            DisconnectReason::ReconnectTimeout => "reconnect timeout",
            DisconnectReason::HeartbeatTimeout => "heartbeat timeout",
            DisconnectReason::ReconnectFailed => "reconnect failed",
            DisconnectReason::ManualClose => "closed",
            DisconnectReason::TransportError => "transport error",
            DisconnectReason::TransportClose => "transport closed",
        };
        write!(f, "{text} ({})", self.code())
    }
}

/// Whether a connection is the first one or a reconnect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectKind {
    Fresh,
    Reconnected,
}

impl ConnectKind {
    pub fn code(self) -> u32 {
        match self {
            ConnectKind::Fresh => 1,
            ConnectKind::Reconnected => 2,
        }
    }
}

/// Events observable through [`Client::subscribe`](crate::Client::subscribe).
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    StateChanged {
        from: ConnectionState,
        to: ConnectionState,
    },
    Connected {
        kind: ConnectKind,
    },
    Disconnected {
        reason: DisconnectReason,
        /// Whether the client will reconnect on its own.
        will_retry: bool,
        detail: String,
    },
    ReconnectStarted,
    ReconnectFinished {
        success: bool,
    },
    /// A request outlived the protocol timeout. It stays pending.
    ProtocolTimeout {
        seq_id: u32,
        msg_name: String,
        elapsed: Duration,
    },
    /// A heartbeat response arrived.
    Heartbeat(Response),
}
