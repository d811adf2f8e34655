//! Descriptor-driven payload codec built on prost's wire primitives.
//!
//! Payloads are JSON objects keyed by declared field names. Values map as:
//! 64-bit integers to JSON integers (strings of digits are accepted on
//! encode), `bytes` to arrays of octets (plain strings are accepted on
//! encode), enums to their numeric value (names are accepted on encode),
//! nested messages to objects and repeated fields to arrays.

use crate::codec::PayloadCodec;
use crate::descriptor::{FieldRule, ProtoConfig};
use crate::envelope::{HEARTBEAT_REQUEST, HEARTBEAT_RESPONSE};
use crate::error::{CodecError, ConfigError};
use bytes::{Buf, BufMut};
use prost::encoding::{WireType, decode_key, decode_varint, encode_key, encode_varint};
use serde_json::{Map, Number, Value};
use std::collections::HashMap;

const MAX_DEPTH: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Scalar {
    Double,
    Float,
    Int32,
    Int64,
    Uint32,
    Uint64,
    Sint32,
    Sint64,
    Fixed32,
    Fixed64,
    Sfixed32,
    Sfixed64,
    Bool,
    String,
    Bytes,
}

impl Scalar {
    fn parse(name: &str) -> Option<Self> {
        Some(match name {
            "double" => Scalar::Double,
            "float" => Scalar::Float,
            "int32" => Scalar::Int32,
            "int64" => Scalar::Int64,
            "uint32" => Scalar::Uint32,
            "uint64" => Scalar::Uint64,
            "sint32" => Scalar::Sint32,
            "sint64" => Scalar::Sint64,
            "fixed32" => Scalar::Fixed32,
            "fixed64" => Scalar::Fixed64,
            "sfixed32" => Scalar::Sfixed32,
            "sfixed64" => Scalar::Sfixed64,
            "bool" => Scalar::Bool,
            "string" => Scalar::String,
            "bytes" => Scalar::Bytes,
            _ => return None,
        })
    }

    fn wire_type(self) -> WireType {
        match self {
            Scalar::Double | Scalar::Fixed64 | Scalar::Sfixed64 => WireType::SixtyFourBit,
            Scalar::Float | Scalar::Fixed32 | Scalar::Sfixed32 => WireType::ThirtyTwoBit,
            Scalar::String | Scalar::Bytes => WireType::LengthDelimited,
            _ => WireType::Varint,
        }
    }
}

#[derive(Debug, Clone)]
enum Kind {
    Scalar(Scalar),
    Enum(String),
    Message(String),
}

#[derive(Debug, Clone)]
struct Field {
    name: String,
    id: u32,
    repeated: bool,
    kind: Kind,
}

impl Field {
    fn wire_type(&self) -> WireType {
        match &self.kind {
            Kind::Scalar(s) => s.wire_type(),
            Kind::Enum(_) => WireType::Varint,
            Kind::Message(_) => WireType::LengthDelimited,
        }
    }

    /// Whether a repeated field of this kind may arrive packed.
    fn packable(&self) -> bool {
        self.repeated && self.wire_type() != WireType::LengthDelimited
    }
}

#[derive(Debug, Clone, Default)]
struct Layout {
    fields: Vec<Field>,
}

impl Layout {
    fn field(&self, id: u32) -> Option<&Field> {
        self.fields.iter().find(|f| f.id == id)
    }
}

/// [`PayloadCodec`] driven by the message schemas of a [`ProtoConfig`].
#[derive(Debug, Clone, Default)]
pub struct SchemaCodec {
    messages: HashMap<String, Layout>,
    enums: HashMap<String, HashMap<String, i32>>,
}

impl SchemaCodec {
    /// Compile the descriptor's message schemas.
    ///
    /// The heartbeat pair is added with its standard layout unless the
    /// descriptor declares it.
    pub fn new(config: &ProtoConfig) -> Result<Self, ConfigError> {
        let package_prefix = format!("{}.", config.package);
        let local = |ty: &str| -> String {
            let ty = ty.trim_start_matches('.');
            ty.strip_prefix(package_prefix.as_str()).unwrap_or(ty).to_string()
        };

        let enums: HashMap<String, HashMap<String, i32>> = config
            .enums
            .iter()
            .map(|e| {
                let values = e.values.iter().map(|v| (v.name.clone(), v.id)).collect();
                (e.name.clone(), values)
            })
            .collect();

        let mut declared = std::collections::HashSet::new();
        for message in &config.messages {
            if !declared.insert(message.name.as_str()) {
                return Err(ConfigError::DuplicateMessage(message.name.clone()));
            }
        }

        let mut messages = HashMap::new();
        for message in &config.messages {
            let mut layout = Layout::default();
            for field in &message.fields {
                let ty = local(&field.ty);
                let kind = if let Some(scalar) = Scalar::parse(&ty) {
                    Kind::Scalar(scalar)
                } else if enums.contains_key(&ty) {
                    Kind::Enum(ty)
                } else if declared.contains(ty.as_str()) {
                    Kind::Message(ty)
                } else {
                    return Err(ConfigError::UnknownFieldType {
                        message: message.name.clone(),
                        field: field.name.clone(),
                        ty: field.ty.clone(),
                    });
                };
                layout.fields.push(Field {
                    name: field.name.clone(),
                    id: field.id,
                    repeated: field.rule == FieldRule::Repeated,
                    kind,
                });
            }
            messages.insert(message.name.clone(), layout);
        }

        messages
            .entry(HEARTBEAT_REQUEST.to_string())
            .or_insert_with(|| Layout {
                fields: vec![int64_field("clientTime", 1)],
            });
        messages
            .entry(HEARTBEAT_RESPONSE.to_string())
            .or_insert_with(|| Layout {
                fields: vec![int64_field("clientTime", 1), int64_field("serverTime", 2)],
            });

        Ok(Self { messages, enums })
    }

    fn layout(&self, type_name: &str) -> Result<&Layout, CodecError> {
        self.messages
            .get(type_name)
            .ok_or_else(|| CodecError::MessageNotFound(type_name.to_string()))
    }

    fn encode_message(
        &self,
        type_name: &str,
        value: &Value,
        buf: &mut Vec<u8>,
        depth: usize,
    ) -> Result<(), CodecError> {
        if depth > MAX_DEPTH {
            return Err(CodecError::encode(type_name, "message nesting is too deep"));
        }
        let layout = self.layout(type_name)?;
        let object = match value {
            Value::Null => return Ok(()),
            Value::Object(object) => object,
            other => {
                return Err(CodecError::encode(
                    type_name,
                    format!("expected an object, got {other}"),
                ));
            }
        };

        for field in &layout.fields {
            let Some(value) = object.get(&field.name).filter(|v| !v.is_null()) else {
                continue;
            };
            if field.repeated {
                let Value::Array(items) = value else {
                    return Err(CodecError::encode(
                        type_name,
                        format!("field {} must be an array", field.name),
                    ));
                };
                for item in items {
                    self.encode_field(type_name, field, item, buf, depth)?;
                }
            } else {
                self.encode_field(type_name, field, value, buf, depth)?;
            }
        }
        Ok(())
    }

    fn encode_field(
        &self,
        type_name: &str,
        field: &Field,
        value: &Value,
        buf: &mut Vec<u8>,
        depth: usize,
    ) -> Result<(), CodecError> {
        let mismatch = |expected: &str| {
            CodecError::encode(
                type_name,
                format!("field {} expects {expected}, got {value}", field.name),
            )
        };
        match &field.kind {
            Kind::Scalar(scalar) => {
                encode_scalar(*scalar, field.id, value, buf).ok_or_else(|| mismatch("a scalar of its declared type"))
            }
            Kind::Enum(name) => {
                let number = self
                    .enum_number(name, value)
                    .ok_or_else(|| mismatch("a declared enum value"))?;
                encode_key(field.id, WireType::Varint, buf);
                encode_varint(number as i64 as u64, buf);
                Ok(())
            }
            Kind::Message(name) => {
                let mut nested = Vec::new();
                self.encode_message(name, value, &mut nested, depth + 1)?;
                encode_key(field.id, WireType::LengthDelimited, buf);
                encode_varint(nested.len() as u64, buf);
                buf.extend_from_slice(&nested);
                Ok(())
            }
        }
    }

    fn enum_number(&self, enum_name: &str, value: &Value) -> Option<i32> {
        match value {
            Value::String(name) => self.enums.get(enum_name)?.get(name).copied(),
            other => i32::try_from(as_i64(other)?).ok(),
        }
    }

    fn decode_message(&self, type_name: &str, mut buf: &[u8], depth: usize) -> Result<Value, CodecError> {
        if depth > MAX_DEPTH {
            return Err(CodecError::decode(type_name, "message nesting is too deep"));
        }
        let layout = self.layout(type_name)?;
        let mut object = Map::new();

        while buf.has_remaining() {
            let (tag, wire_type) = decode_key(&mut buf).map_err(|e| CodecError::decode(type_name, e))?;
            let Some(field) = layout.field(tag) else {
                skip_field(wire_type, &mut buf).map_err(|e| CodecError::decode(type_name, e))?;
                continue;
            };

            if field.packable() && wire_type == WireType::LengthDelimited {
                let mut packed = take_delimited(&mut buf).map_err(|e| CodecError::decode(type_name, e))?;
                while packed.has_remaining() {
                    let value = self.decode_value(type_name, field, field.wire_type(), &mut packed, depth)?;
                    push_repeated(&mut object, &field.name, value);
                }
                continue;
            }

            let value = self.decode_value(type_name, field, wire_type, &mut buf, depth)?;
            if field.repeated {
                push_repeated(&mut object, &field.name, value);
            } else {
                object.insert(field.name.clone(), value);
            }
        }
        Ok(Value::Object(object))
    }

    fn decode_value(
        &self,
        type_name: &str,
        field: &Field,
        wire_type: WireType,
        buf: &mut &[u8],
        depth: usize,
    ) -> Result<Value, CodecError> {
        if wire_type != field.wire_type() {
            return Err(CodecError::decode(
                type_name,
                format!(
                    "field {} arrived as {wire_type:?}, expected {:?}",
                    field.name,
                    field.wire_type()
                ),
            ));
        }
        let at_field = |reason: String| CodecError::decode(type_name, format!("field {}: {reason}", field.name));
        match &field.kind {
            Kind::Scalar(scalar) => decode_scalar(*scalar, buf).map_err(at_field),
            Kind::Enum(_) => {
                let raw = decode_varint(buf).map_err(|e| at_field(e.to_string()))?;
                Ok(Value::from(raw as i32))
            }
            Kind::Message(name) => {
                let nested = take_delimited(buf).map_err(at_field)?;
                self.decode_message(name, nested, depth + 1)
            }
        }
    }
}

impl PayloadCodec for SchemaCodec {
    fn encode(&self, type_name: &str, payload: &Value) -> Result<Vec<u8>, CodecError> {
        let mut buf = Vec::new();
        self.encode_message(type_name, payload, &mut buf, 0)?;
        Ok(buf)
    }

    fn decode(&self, type_name: &str, bytes: &[u8]) -> Result<Value, CodecError> {
        self.decode_message(type_name, bytes, 0)
    }
}

fn int64_field(name: &str, id: u32) -> Field {
    Field {
        name: name.to_string(),
        id,
        repeated: false,
        kind: Kind::Scalar(Scalar::Int64),
    }
}

fn push_repeated(object: &mut Map<String, Value>, name: &str, value: Value) {
    let slot = object
        .entry(name.to_string())
        .or_insert_with(|| Value::Array(Vec::new()));
    if let Value::Array(items) = slot {
        items.push(value);
    }
}

fn as_i64(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn as_u64(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n.as_u64().or_else(|| {
            n.as_f64()
                .filter(|f| f.fract() == 0.0 && *f >= 0.0)
                .map(|f| f as u64)
        }),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn as_bytes(value: &Value) -> Option<Vec<u8>> {
    match value {
        Value::String(s) => Some(s.as_bytes().to_vec()),
        Value::Array(items) => items
            .iter()
            .map(|item| item.as_u64().and_then(|b| u8::try_from(b).ok()))
            .collect(),
        _ => None,
    }
}

/// Writes key and value, or nothing when `value` does not fit `scalar`.
fn encode_scalar(scalar: Scalar, tag: u32, value: &Value, buf: &mut Vec<u8>) -> Option<()> {
    let key = |buf: &mut Vec<u8>| encode_key(tag, scalar.wire_type(), buf);
    match scalar {
        Scalar::Int32 => {
            let v = i32::try_from(as_i64(value)?).ok()?;
            key(buf);
            encode_varint(v as i64 as u64, buf);
        }
        Scalar::Int64 => {
            let v = as_i64(value)?;
            key(buf);
            encode_varint(v as u64, buf);
        }
        Scalar::Uint32 => {
            let v = u32::try_from(as_u64(value)?).ok()?;
            key(buf);
            encode_varint(u64::from(v), buf);
        }
        Scalar::Uint64 => {
            let v = as_u64(value)?;
            key(buf);
            encode_varint(v, buf);
        }
        Scalar::Sint32 => {
            let v = i32::try_from(as_i64(value)?).ok()?;
            key(buf);
            encode_varint(u64::from(((v << 1) ^ (v >> 31)) as u32), buf);
        }
        Scalar::Sint64 => {
            let v = as_i64(value)?;
            key(buf);
            encode_varint(((v << 1) ^ (v >> 63)) as u64, buf);
        }
        Scalar::Fixed32 => {
            let v = u32::try_from(as_u64(value)?).ok()?;
            key(buf);
            buf.put_u32_le(v);
        }
        Scalar::Sfixed32 => {
            let v = i32::try_from(as_i64(value)?).ok()?;
            key(buf);
            buf.put_i32_le(v);
        }
        Scalar::Fixed64 => {
            let v = as_u64(value)?;
            key(buf);
            buf.put_u64_le(v);
        }
        Scalar::Sfixed64 => {
            let v = as_i64(value)?;
            key(buf);
            buf.put_i64_le(v);
        }
        Scalar::Float => {
            let v = value.as_f64()? as f32;
            key(buf);
            buf.put_f32_le(v);
        }
        Scalar::Double => {
            let v = value.as_f64()?;
            key(buf);
            buf.put_f64_le(v);
        }
        Scalar::Bool => {
            let v = value.as_bool()?;
            key(buf);
            encode_varint(u64::from(v), buf);
        }
        Scalar::String => {
            let v = value.as_str()?;
            key(buf);
            encode_varint(v.len() as u64, buf);
            buf.extend_from_slice(v.as_bytes());
        }
        Scalar::Bytes => {
            let v = as_bytes(value)?;
            key(buf);
            encode_varint(v.len() as u64, buf);
            buf.extend_from_slice(&v);
        }
    }
    Some(())
}

fn decode_scalar(scalar: Scalar, buf: &mut &[u8]) -> Result<Value, String> {
    let varint = |buf: &mut &[u8]| decode_varint(buf).map_err(|e| e.to_string());
    Ok(match scalar {
        Scalar::Int32 => Value::from(varint(buf)? as i32),
        Scalar::Int64 => Value::from(varint(buf)? as i64),
        Scalar::Uint32 => Value::from(varint(buf)? as u32),
        Scalar::Uint64 => Value::from(varint(buf)?),
        Scalar::Sint32 => {
            let n = varint(buf)? as u32;
            Value::from(((n >> 1) as i32) ^ -((n & 1) as i32))
        }
        Scalar::Sint64 => {
            let n = varint(buf)?;
            Value::from(((n >> 1) as i64) ^ -((n & 1) as i64))
        }
        Scalar::Bool => Value::from(varint(buf)? != 0),
        Scalar::Fixed32 => {
            ensure(buf, 4)?;
            Value::from(buf.get_u32_le())
        }
        Scalar::Sfixed32 => {
            ensure(buf, 4)?;
            Value::from(buf.get_i32_le())
        }
        Scalar::Fixed64 => {
            ensure(buf, 8)?;
            Value::from(buf.get_u64_le())
        }
        Scalar::Sfixed64 => {
            ensure(buf, 8)?;
            Value::from(buf.get_i64_le())
        }
        Scalar::Float => {
            ensure(buf, 4)?;
            float(f64::from(buf.get_f32_le()))
        }
        Scalar::Double => {
            ensure(buf, 8)?;
            float(buf.get_f64_le())
        }
        Scalar::String => {
            let raw = take_delimited(buf)?;
            let text = std::str::from_utf8(raw).map_err(|e| e.to_string())?;
            Value::from(text)
        }
        Scalar::Bytes => {
            let raw = take_delimited(buf)?;
            Value::Array(raw.iter().map(|b| Value::from(*b)).collect())
        }
    })
}

fn float(v: f64) -> Value {
    Number::from_f64(v).map_or(Value::Null, Value::Number)
}

fn ensure(buf: &&[u8], len: usize) -> Result<(), String> {
    if buf.len() < len {
        return Err(format!("needs {len} bytes, {} left", buf.len()));
    }
    Ok(())
}

fn take_delimited<'a>(buf: &mut &'a [u8]) -> Result<&'a [u8], String> {
    let len = decode_varint(buf).map_err(|e| e.to_string())?;
    let len = usize::try_from(len).map_err(|e| e.to_string())?;
    ensure(buf, len)?;
    let whole: &'a [u8] = *buf;
    let (head, tail) = whole.split_at(len);
    *buf = tail;
    Ok(head)
}

fn skip_field(wire_type: WireType, buf: &mut &[u8]) -> Result<(), String> {
    match wire_type {
        WireType::Varint => {
            decode_varint(buf).map_err(|e| e.to_string())?;
        }
        WireType::SixtyFourBit => {
            ensure(buf, 8)?;
            buf.advance(8);
        }
        WireType::ThirtyTwoBit => {
            ensure(buf, 4)?;
            buf.advance(4);
        }
        WireType::LengthDelimited => {
            take_delimited(buf)?;
        }
        WireType::StartGroup | WireType::EndGroup => {
            return Err("groups are not supported".to_string());
        }
    }
    Ok(())
}
