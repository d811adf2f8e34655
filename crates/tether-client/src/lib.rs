//! Persistent request/response and notification client for Tether.
//!
//! A [`Client`] keeps one link to a server alive: it dials with retries,
//! probes liveness with heartbeats, correlates responses with requests by
//! sequence id, fans notifications out to listeners, and reconnects after an
//! established link is lost.
//!
//! ```no_run
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! use tether_client::{Client, ClientConfig};
//! use tether_core::{EnvelopeCodec, ProtoConfig};
//!
//! let client = Client::new(ClientConfig::default())?;
//! let proto = ProtoConfig::load("proto.json")?;
//! client.set_proto_config(EnvelopeCodec::from_config(&proto)?);
//! client.connect("ws://127.0.0.1:8001").await?;
//!
//! let response = client
//!     .send("LoginReq", serde_json::json!({ "accountId": "a1" }))
//!     .await?;
//! println!("{}: {}", response.msg_name, response.data);
//! # Ok(())
//! # }
//! ```

mod client;
mod config;
mod error;
mod events;
mod listeners;
mod transport;

#[cfg(test)]
mod testing;

pub use client::{Client, PendingConnect, PendingResponse, Status};
pub use config::ClientConfig;
pub use error::{ConfigLoadError, ConnectError, RequestError, TransportError};
pub use events::{ClientEvent, ConnectKind, DisconnectReason};
pub use listeners::{Listener, ListenerId};
pub use transport::{Dialer, FrameSink, FrameStream, Link, WsDialer};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
