//! Bridge from the event bus (and external channels) to WebSocket clients.
//!
//! # Event Flow
//!
//! ```text
//! EventBus event ──▶ ClientFanout::handle ──▶ ConnectionManager::enqueue
//! external channel ──▶ ClientFanout::on_message ──┘        │
//!                                                          ▼
//!                                                drain task broadcasts
//! ```
//!
//! Handlers only enqueue, so a slow client never holds up the bus.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value as JsonValue;

use crate::adapters::events::EventBus;
use crate::domain::foundation::{event_types, DomainError, Event, Timestamp};
use crate::ports::{ChannelHandler, EventHandler};

use super::connections::ConnectionManager;
use super::messages::ServerMessage;

/// Event types that connected clients receive.
pub const CLIENT_EVENT_TYPES: &[&str] = &[
    event_types::ACCOUNT_UPDATE,
    event_types::CONNECTION_STATUS,
    event_types::MONITOR_ERROR,
];

/// Forwards bus events and inbound external messages to every client.
pub struct ClientFanout {
    connections: Arc<ConnectionManager>,
}

impl ClientFanout {
    /// Create a new fanout over the given connection manager.
    pub fn new(connections: Arc<ConnectionManager>) -> Self {
        Self { connections }
    }

    /// Create as an Arc (for sharing with the bus and the external bridge).
    pub fn new_shared(connections: Arc<ConnectionManager>) -> Arc<Self> {
        Arc::new(Self::new(connections))
    }

    /// Subscribe to every client-relevant event type on `bus`.
    ///
    /// Returns the handler so the caller can unsubscribe later.
    pub fn register(self: &Arc<Self>, bus: &EventBus) -> Arc<dyn EventHandler> {
        let handler: Arc<dyn EventHandler> = self.clone();
        bus.subscribe_all(CLIENT_EVENT_TYPES, Arc::clone(&handler));
        handler
    }

    /// Build the client message for an external payload.
    ///
    /// Payloads already shaped as `{type, data, timestamp}` keep their type
    /// and data; anything else is relayed under the channel name.
    fn from_external(channel: &str, payload: JsonValue) -> ServerMessage {
        let message_type = payload
            .get("type")
            .and_then(JsonValue::as_str)
            .map(String::from);

        match (message_type, payload.get("data")) {
            (Some(message_type), Some(data)) => ServerMessage {
                message_type,
                data: data.clone(),
                timestamp: payload
                    .get("timestamp")
                    .cloned()
                    .and_then(|t| serde_json::from_value::<Timestamp>(t).ok())
                    .unwrap_or_else(Timestamp::now),
            },
            _ => ServerMessage::new(channel, payload),
        }
    }
}

#[async_trait]
impl EventHandler for ClientFanout {
    async fn handle(&self, event: &Event) -> Result<(), DomainError> {
        self.connections.enqueue(ServerMessage::from_event(event));
        Ok(())
    }

    fn name(&self) -> &'static str {
        "ClientFanout"
    }
}

#[async_trait]
impl ChannelHandler for ClientFanout {
    async fn on_message(&self, channel: &str, payload: JsonValue) -> Result<(), DomainError> {
        self.connections.enqueue(Self::from_external(channel, payload));
        Ok(())
    }

    fn name(&self) -> &'static str {
        "ClientFanout"
    }
}
