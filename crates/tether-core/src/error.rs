//! Error types and the numeric error-code catalogue.

use std::fmt;

/// Numeric codes reported alongside client-side failures.
///
/// `1xxxxx` codes concern the connection, `2xxxxx` codes concern protocol
/// handling (descriptor, routing and payload serialization).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum ErrorCode {
    /// `connect` was called before a protocol configuration was loaded.
    CallBeforeConfig = 100_000,
    /// `connect` was called while a connection attempt was in flight.
    ConnectingRepeat = 100_001,
    /// The connection was not established within the connect timeout.
    ConnectTimeout = 100_002,
    /// A request got no response within the protocol timeout.
    ProtocolTimeout = 100_003,
    /// No heartbeat response arrived within the heartbeat timeout.
    HeartbeatTimeout = 100_004,
    /// A heartbeat response carried a non-zero status.
    HeartbeatFailed = 100_005,
    /// `send` was called while the client was still connecting.
    ConnectingNow = 100_006,
    /// The protocol descriptor could not be parsed or is inconsistent.
    ProtoParse = 200_000,
    /// An inbound route id has no routing entry.
    RouteUnknown = 200_001,
    /// A routing entry has no response type.
    RouteNoResponse = 200_002,
    /// An outbound message name has no routing entry.
    RouteMissing = 200_003,
    /// A message type is not declared in the descriptor.
    MessageNotFound = 200_004,
    /// Serializing a payload or envelope failed.
    EncodeFailed = 200_005,
    /// Deserializing a payload or envelope failed.
    DecodeFailed = 200_006,
}

impl ErrorCode {
    pub fn as_u32(self) -> u32 {
        self as u32
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_u32())
    }
}

/// Problems with the protocol descriptor or the routing table.
///
/// These are configuration errors: the operation that hit one fails fast and
/// is never retried.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to parse protocol descriptor: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("failed to read protocol descriptor: {0}")]
    Io(#[from] std::io::Error),
    #[error("route id {0} is reserved for the heartbeat pair")]
    ReservedRouteId(i32),
    #[error("route id {0} is declared more than once")]
    DuplicateRouteId(i32),
    #[error("request type {0} is routed more than once")]
    DuplicateRequestType(String),
    #[error("route {route_id} has no request type")]
    MissingRequest { route_id: i32 },
    #[error("route {route_id} has no response type")]
    MissingResponse { route_id: i32 },
    #[error("message type {0} is declared more than once")]
    DuplicateMessage(String),
    #[error("field {field} of {message} has unknown type {ty}")]
    UnknownFieldType {
        message: String,
        field: String,
        ty: String,
    },
    #[error("route id {0} is not configured")]
    RouteNotFound(i32),
    #[error("message {0} has no route")]
    MessageNotRouted(String),
}

impl ConfigError {
    pub fn code(&self) -> ErrorCode {
        match self {
            ConfigError::RouteNotFound(_) => ErrorCode::RouteUnknown,
            ConfigError::MissingResponse { .. } => ErrorCode::RouteNoResponse,
            ConfigError::MessageNotRouted(_) => ErrorCode::RouteMissing,
            _ => ErrorCode::ProtoParse,
        }
    }
}

/// Failure to turn a payload into bytes or back.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CodecError {
    #[error("message type {0} is not declared")]
    MessageNotFound(String),
    #[error("cannot encode {type_name}: {reason}")]
    Encode { type_name: String, reason: String },
    #[error("cannot decode {type_name}: {reason}")]
    Decode { type_name: String, reason: String },
}

impl CodecError {
    pub fn encode(type_name: &str, reason: impl fmt::Display) -> Self {
        CodecError::Encode {
            type_name: type_name.to_string(),
            reason: reason.to_string(),
        }
    }

    pub fn decode(type_name: &str, reason: impl fmt::Display) -> Self {
        CodecError::Decode {
            type_name: type_name.to_string(),
            reason: reason.to_string(),
        }
    }

    pub fn code(&self) -> ErrorCode {
        match self {
            CodecError::MessageNotFound(_) => ErrorCode::MessageNotFound,
            CodecError::Encode { .. } => ErrorCode::EncodeFailed,
            CodecError::Decode { .. } => ErrorCode::DecodeFailed,
        }
    }
}

/// Anything that prevents the envelope codec from producing or consuming a frame.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error("malformed envelope: {0}")]
    Envelope(#[from] prost::DecodeError),
}

impl ProtocolError {
    pub fn code(&self) -> ErrorCode {
        match self {
            ProtocolError::Config(e) => e.code(),
            ProtocolError::Codec(e) => e.code(),
            ProtocolError::Envelope(_) => ErrorCode::DecodeFailed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_match_catalogue() {
        assert_eq!(ErrorCode::CallBeforeConfig.as_u32(), 100000);
        assert_eq!(ErrorCode::ConnectingNow.as_u32(), 100006);
        assert_eq!(ErrorCode::DecodeFailed.to_string(), "200006");
    }

    #[test]
    fn routing_errors_map_to_routing_codes() {
        assert_eq!(ConfigError::RouteNotFound(7).code(), ErrorCode::RouteUnknown);
        assert_eq!(
            ConfigError::MessageNotRouted("LoginReq".into()).code(),
            ErrorCode::RouteMissing
        );
        assert_eq!(ConfigError::DuplicateRouteId(1).code(), ErrorCode::ProtoParse);
    }
}
