//! Payload serialization seam and the envelope codec.

use crate::descriptor::ProtoConfig;
use crate::envelope::{CommandKind, Envelope, HEARTBEAT_REQUEST, HEARTBEAT_RESPONSE};
use crate::error::{CodecError, ConfigError, ProtocolError};
use crate::routing::{Route, RouteTable};
use crate::schema_codec::SchemaCodec;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

/// Turns payload objects into bytes and back, by message type name.
///
/// This is the only contact point with the structured-serialization backend.
pub trait PayloadCodec: Send + Sync {
    fn encode(&self, type_name: &str, payload: &Value) -> Result<Vec<u8>, CodecError>;
    fn decode(&self, type_name: &str, bytes: &[u8]) -> Result<Value, CodecError>;

    /// Whether decoded 64-bit integers come back as `{low, high, unsigned}`
    /// objects that [`EnvelopeCodec::decode_payload`] has to join.
    fn splits_wide_integers(&self) -> bool {
        false
    }
}

/// Maps (message name, sequence id, payload) to wire frames and back.
///
/// Inbound frames are decoded lazily: [`decode_inbound`](Self::decode_inbound)
/// only parses the envelope, the payload is decoded on demand with
/// [`decode_payload`](Self::decode_payload).
#[derive(Clone)]
pub struct EnvelopeCodec {
    routes: RouteTable,
    payloads: Arc<dyn PayloadCodec>,
}

impl fmt::Debug for EnvelopeCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EnvelopeCodec")
            .field("routes", &self.routes.len())
            .finish_non_exhaustive()
    }
}

impl EnvelopeCodec {
    pub fn new(routes: RouteTable, payloads: Arc<dyn PayloadCodec>) -> Self {
        Self { routes, payloads }
    }

    /// Routing table and [`SchemaCodec`] straight from a descriptor.
    pub fn from_config(config: &ProtoConfig) -> Result<Self, ConfigError> {
        let routes = config.route_table()?;
        let payloads = SchemaCodec::new(config)?;
        Ok(Self::new(routes, Arc::new(payloads)))
    }

    pub fn routes(&self) -> &RouteTable {
        &self.routes
    }

    pub fn payloads(&self) -> &Arc<dyn PayloadCodec> {
        &self.payloads
    }

    /// Serialize `payload` as `msg_name` and wrap it in an envelope.
    ///
    /// The heartbeat pair bypasses the routing table and always travels as
    /// command kind 0, route 0.
    pub fn encode_outbound(
        &self,
        msg_name: &str,
        sequence_id: u32,
        payload: &Value,
    ) -> Result<Vec<u8>, ProtocolError> {
        let (kind, route_id) = if is_heartbeat_type(msg_name) {
            (CommandKind::Heartbeat, 0)
        } else {
            (CommandKind::Application, self.routes.route_id(msg_name)?)
        };
        let body = self.payloads.encode(msg_name, payload)?;
        Ok(Envelope::request(kind, route_id, sequence_id, body).to_bytes())
    }

    pub fn decode_inbound(&self, bytes: &[u8]) -> Result<Envelope, ProtocolError> {
        Ok(Envelope::from_bytes(bytes)?)
    }

    /// Request/response pair an inbound envelope belongs to.
    pub fn resolve_route(&self, envelope: &Envelope) -> Result<Route<'_>, ConfigError> {
        match envelope.kind() {
            CommandKind::Heartbeat => Ok(Route::HEARTBEAT),
            CommandKind::Application => self.routes.route(envelope.route_id),
        }
    }

    /// Decode a payload. Wide integers reach the caller as native numbers.
    pub fn decode_payload(&self, type_name: &str, raw: &[u8]) -> Result<Value, CodecError> {
        let mut value = self.payloads.decode(type_name, raw)?;
        if self.payloads.splits_wide_integers() {
            normalize_wide_integers(&mut value);
        }
        Ok(value)
    }
}

fn is_heartbeat_type(msg_name: &str) -> bool {
    msg_name == HEARTBEAT_REQUEST || msg_name == HEARTBEAT_RESPONSE
}

/// Collapse `{low, high, unsigned}` 64-bit split representations into plain
/// JSON integers, recursively.
pub fn normalize_wide_integers(value: &mut Value) {
    if let Some(joined) = join_split_integer(value) {
        *value = joined;
        return;
    }
    match value {
        Value::Array(items) => items.iter_mut().for_each(normalize_wide_integers),
        Value::Object(map) => map.values_mut().for_each(normalize_wide_integers),
        _ => {}
    }
}

fn join_split_integer(value: &Value) -> Option<Value> {
    let map = value.as_object()?;
    if map.len() != 3 {
        return None;
    }
    let low = map.get("low")?.as_i64()?;
    let high = map.get("high")?.as_i64()?;
    let unsigned = map.get("unsigned")?.as_bool()?;
    let bits = ((high as u64 & 0xffff_ffff) << 32) | (low as u64 & 0xffff_ffff);
    Some(if unsigned {
        Value::from(bits)
    } else {
        Value::from(bits as i64)
    })
}
