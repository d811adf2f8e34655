//! Protocol primitives for Tether.
//!
//! This crate has no I/O. It defines the envelope every frame travels in, the
//! routing table mapping message names to route ids, the protocol descriptor,
//! and the codec seam payload serialization goes through.

mod codec;
mod descriptor;
mod envelope;
mod error;
mod response;
mod routing;
mod schema_codec;

pub use codec::{EnvelopeCodec, PayloadCodec, normalize_wide_integers};
pub use descriptor::{EnumSchema, EnumValue, FieldRule, FieldSchema, MessageSchema, ProtoConfig};
pub use envelope::{CommandKind, Envelope, HEARTBEAT_REQUEST, HEARTBEAT_RESPONSE};
pub use error::{CodecError, ConfigError, ErrorCode, ProtocolError};
pub use response::Response;
pub use routing::{Route, RouteEntry, RouteTable};
pub use schema_codec::SchemaCodec;

/// Connection lifecycle state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// Never connected, or reset.
    #[default]
    Idle,
    /// Dialing and waiting for the link to open.
    Connecting,
    /// Link open; requests may be sent.
    Connected,
    /// Link lost or closed.
    Disconnected,
}
