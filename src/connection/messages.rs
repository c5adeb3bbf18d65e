//! Real-time channel message types.
//!
//! Every frame on the channel is a `{type, payload}` JSON envelope; payloads
//! are carried as JSON values so the envelope stays stable as payloads evolve.

use serde::{Deserialize, Serialize};

use crate::notifications::ValidationError;

/// Server -> client envelope.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServerMessage {
    /// Message type identifier (e.g. "connected", "notification").
    #[serde(rename = "type")]
    pub msg_type: String,
    #[serde(default)]
    pub payload: serde_json::Value,
}

impl ServerMessage {
    pub fn new(msg_type: impl Into<String>, payload: impl Serialize) -> Self {
        Self {
            msg_type: msg_type.into(),
            payload: serde_json::to_value(payload).unwrap_or(serde_json::Value::Null),
        }
    }

    /// Parses a raw text frame. Malformed frames are a `ValidationError` for
    /// the caller to drop and log; they never tear down the channel.
    pub fn parse(raw: &str) -> Result<Self, ValidationError> {
        Ok(serde_json::from_str(raw)?)
    }
}

/// Client -> server envelope.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClientMessage {
    #[serde(rename = "type")]
    pub msg_type: String,
    #[serde(default)]
    pub payload: serde_json::Value,
}

impl ClientMessage {
    pub fn new(msg_type: impl Into<String>, payload: impl Serialize) -> Self {
        Self {
            msg_type: msg_type.into(),
            payload: serde_json::to_value(payload).unwrap_or(serde_json::Value::Null),
        }
    }

    pub fn empty(msg_type: impl Into<String>) -> Self {
        Self {
            msg_type: msg_type.into(),
            payload: serde_json::Value::Null,
        }
    }
}

/// Reserved message type constants.
pub mod msg_types {
    /// Client handshake, sent first after the websocket upgrade.
    pub const HELLO: &str = "hello";
    /// Server handshake acknowledgment.
    pub const CONNECTED: &str = "connected";
    /// Notification record push (server -> client).
    pub const NOTIFICATION: &str = "notification";
    /// Heartbeat request (either direction).
    pub const PING: &str = "ping";
    /// Heartbeat response.
    pub const PONG: &str = "pong";
    /// Server error report.
    pub const ERROR: &str = "error";
}

/// System-level payloads used by the channel infrastructure itself.
pub mod system {
    use serde::{Deserialize, Serialize};

    /// Client handshake payload.
    #[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
    #[serde(rename_all = "camelCase")]
    pub struct Hello {
        pub session_id: String,
        pub user_id: String,
        pub client_version: String,
    }

    /// Server handshake acknowledgment. The channel is usable once this
    /// arrives within the handshake timeout.
    #[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
    #[serde(rename_all = "camelCase")]
    pub struct Connected {
        pub session_id: String,
        pub server_version: String,
    }

    /// Server error payload. Informational; the transport close is what
    /// drives reconnection.
    #[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
    pub struct Error {
        pub code: String,
        pub message: String,
    }
}
