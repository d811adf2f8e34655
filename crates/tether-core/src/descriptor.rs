//! Protocol descriptor: message schemas plus the routing table.

use crate::error::ConfigError;
use crate::routing::{RouteEntry, RouteTable};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Static protocol configuration, loaded once before connecting.
///
/// ```json
/// {
///   "package": "game.protobuf",
///   "messages": [{ "name": "LoginReq", "fields": [
///     { "rule": "optional", "type": "string", "name": "accountId", "id": 1 }
///   ]}],
///   "routes": [[1, "LoginReq", "LoginResp"]]
/// }
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProtoConfig {
    pub package: String,
    #[serde(default)]
    pub messages: Vec<MessageSchema>,
    #[serde(default)]
    pub enums: Vec<EnumSchema>,
    #[serde(default, alias = "configs")]
    pub routes: Vec<RouteEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageSchema {
    pub name: String,
    #[serde(default)]
    pub fields: Vec<FieldSchema>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldSchema {
    #[serde(default)]
    pub rule: FieldRule,
    /// Scalar type name (`int64`, `string`, ...) or a declared message/enum name.
    #[serde(rename = "type")]
    pub ty: String,
    pub name: String,
    pub id: u32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldRule {
    #[default]
    Optional,
    Required,
    Repeated,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnumSchema {
    pub name: String,
    #[serde(default)]
    pub values: Vec<EnumValue>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnumValue {
    pub name: String,
    pub id: i32,
}

impl ProtoConfig {
    pub fn from_json_str(s: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(s)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    pub fn route_table(&self) -> Result<RouteTable, ConfigError> {
        RouteTable::new(self.routes.iter().cloned())
    }

    pub fn message(&self, name: &str) -> Option<&MessageSchema> {
        self.messages.iter().find(|m| m.name == name)
    }
}
