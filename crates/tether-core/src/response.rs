//! The value handed to request callers and notification listeners.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A decoded inbound message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Response {
    /// Envelope status; 0 means success.
    pub code: i32,
    /// Decoded payload.
    pub data: Value,
    /// Response type name the payload was decoded as.
    pub msg_name: String,
    /// Optional diagnostic text sent by the peer.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diagnostic: Option<String>,
}

impl Response {
    pub fn is_success(&self) -> bool {
        self.code == 0
    }

    /// Deserialize the payload into a concrete message type.
    pub fn data_as<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        T::deserialize(&self.data)
    }
}
