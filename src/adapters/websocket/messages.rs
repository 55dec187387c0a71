//! WebSocket message types for real-time account updates.
//!
//! Defines the protocol between server and connected clients:
//! - Server → Client: `{type, data, timestamp}` envelopes (welcome, heartbeat,
//!   connection_status, account_update, pong, error, and relayed bus events)
//! - Client → Server: ping, subscribe, unsubscribe

use serde::{Deserialize, Serialize};
use serde_json::{json, Value as JsonValue};

use crate::domain::foundation::{event_types, ConnectionId, Event, Timestamp};

/// Version reported in the welcome message.
pub const SERVER_VERSION: &str = env!("CARGO_PKG_VERSION");

// ============================================
// Server → Client Messages
// ============================================

/// Outbound message types produced by the server itself.
pub mod message_types {
    pub const WELCOME: &str = "welcome";
    pub const HEARTBEAT: &str = "heartbeat";
    pub const PONG: &str = "pong";
    pub const ERROR: &str = "error";
}

/// Envelope for every message sent to a client.
///
/// The type set is open: events relayed from the bus keep their own type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerMessage {
    #[serde(rename = "type")]
    pub message_type: String,
    pub data: JsonValue,
    pub timestamp: Timestamp,
}

impl ServerMessage {
    /// Creates a message stamped now.
    pub fn new(message_type: impl Into<String>, data: JsonValue) -> Self {
        Self {
            message_type: message_type.into(),
            data,
            timestamp: Timestamp::now(),
        }
    }

    /// Greeting sent once to each accepted client.
    pub fn welcome(connection_id: ConnectionId) -> Self {
        Self::new(
            message_types::WELCOME,
            json!({
                "message": "Connected to account relay",
                "server_version": SERVER_VERSION,
                "connection_id": connection_id.to_string(),
            }),
        )
    }

    /// Periodic liveness ping.
    pub fn heartbeat(connections: usize) -> Self {
        Self::new(message_types::HEARTBEAT, json!({ "connections": connections }))
    }

    /// Reply to a client `ping`.
    pub fn pong() -> Self {
        Self::new(message_types::PONG, json!({ "message": "pong" }))
    }

    /// Error report for the client.
    pub fn error(code: &str, message: impl Into<String>) -> Self {
        Self::new(
            message_types::ERROR,
            json!({ "code": code, "message": message.into() }),
        )
    }

    /// Current data-source liveness.
    pub fn connection_status(connected: bool, message: impl Into<String>) -> Self {
        Self::new(
            event_types::CONNECTION_STATUS,
            json!({
                "status": if connected { "connected" } else { "disconnected" },
                "connected": connected,
                "message": message.into(),
            }),
        )
    }

    /// Relays a bus event, keeping its type, payload and timestamp.
    pub fn from_event(event: &Event) -> Self {
        Self {
            message_type: event.event_type.clone(),
            data: event.payload.clone(),
            timestamp: event.occurred_at,
        }
    }

    /// Serializes to the JSON text frame.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

// ============================================
// Client → Server Messages
// ============================================

/// All message types that can be received from client.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Heartbeat request.
    Ping,

    /// Register interest in a channel.
    Subscribe { channel: String },

    /// Drop interest in a channel.
    Unsubscribe { channel: String },
}

const KNOWN_CLIENT_TYPES: [&str; 3] = ["ping", "subscribe", "unsubscribe"];

/// Why an inbound frame was dropped.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum InboundError {
    /// The frame is not a JSON object of a known shape.
    #[error("malformed message: {0}")]
    Malformed(String),

    /// The frame names a type the server does not handle.
    #[error("unknown message type: {0}")]
    UnknownType(String),
}

impl ClientMessage {
    /// Parses a raw text frame.
    ///
    /// Distinguishes unparseable input from well-formed messages of an
    /// unknown type so they can be logged differently.
    pub fn parse(raw: &str) -> Result<Self, InboundError> {
        let value: JsonValue =
            serde_json::from_str(raw).map_err(|e| InboundError::Malformed(e.to_string()))?;

        let message_type = match value.get("type") {
            Some(JsonValue::String(t)) => t.clone(),
            Some(_) => return Err(InboundError::Malformed("type must be a string".to_string())),
            None if value.is_object() => return Err(InboundError::UnknownType("unknown".to_string())),
            None => return Err(InboundError::Malformed("expected a JSON object".to_string())),
        };

        if !KNOWN_CLIENT_TYPES.contains(&message_type.as_str()) {
            return Err(InboundError::UnknownType(message_type));
        }

        serde_json::from_value(value).map_err(|e| InboundError::Malformed(e.to_string()))
    }
}
