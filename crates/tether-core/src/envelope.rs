//! The fixed outer frame wrapped around every payload.
//!
//! Field numbers are part of the wire contract:
//!
//! | tag | field            | type    |
//! |-----|------------------|---------|
//! | 1   | command kind     | int32   |
//! | 2   | protocol switch  | int32   |
//! | 3   | route id         | int32   |
//! | 4   | response status  | sint32  |
//! | 5   | diagnostic       | string  |
//! | 6   | payload          | bytes   |
//! | 7   | sequence id      | uint32  |

use prost::Message;

/// Request type of the heartbeat pair.
pub const HEARTBEAT_REQUEST: &str = "PingReq";
/// Response type of the heartbeat pair.
pub const HEARTBEAT_RESPONSE: &str = "PingResp";

/// What an envelope carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandKind {
    /// Liveness probe; always paired with route id 0.
    Heartbeat,
    /// Routed business message.
    Application,
}

impl CommandKind {
    pub fn from_raw(raw: i32) -> Self {
        if raw == 0 {
            CommandKind::Heartbeat
        } else {
            CommandKind::Application
        }
    }

    pub fn as_raw(self) -> i32 {
        match self {
            CommandKind::Heartbeat => 0,
            CommandKind::Application => 1,
        }
    }
}

/// One frame on the wire.
#[derive(Clone, PartialEq, Message)]
pub struct Envelope {
    #[prost(int32, tag = "1")]
    pub command_kind: i32,
    /// Reserved.
    #[prost(int32, tag = "2")]
    pub protocol_switch: i32,
    #[prost(int32, tag = "3")]
    pub route_id: i32,
    /// 0 means success.
    #[prost(sint32, tag = "4")]
    pub status: i32,
    #[prost(string, tag = "5")]
    pub diagnostic: String,
    #[prost(bytes = "vec", tag = "6")]
    pub payload: Vec<u8>,
    #[prost(uint32, tag = "7")]
    pub sequence_id: u32,
}

impl Envelope {
    /// Build an outbound envelope.
    pub fn request(kind: CommandKind, route_id: i32, sequence_id: u32, payload: Vec<u8>) -> Self {
        Self {
            command_kind: kind.as_raw(),
            route_id,
            sequence_id,
            payload,
            ..Default::default()
        }
    }

    pub fn kind(&self) -> CommandKind {
        CommandKind::from_raw(self.command_kind)
    }

    pub fn is_heartbeat(&self) -> bool {
        self.kind() == CommandKind::Heartbeat
    }

    /// The diagnostic string, if the peer sent a non-empty one.
    pub fn diagnostic(&self) -> Option<&str> {
        (!self.diagnostic.is_empty()).then_some(self.diagnostic.as_str())
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        self.encode_to_vec()
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, prost::DecodeError> {
        Self::decode(bytes)
    }
}
