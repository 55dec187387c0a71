//! Event type distributed through the in-process bus.
//!
//! Events are produced by the account monitor, by the external bridge
//! (inbound channels) and by client message handlers. They are immutable once
//! built: consumers only ever see `&Event` or a clone.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use super::{EventId, Timestamp};

/// Well-known event types.
pub mod event_types {
    pub const ACCOUNT_UPDATE: &str = "account_update";
    pub const CONNECTION_STATUS: &str = "connection_status";
    pub const MONITOR_ERROR: &str = "monitor_error";
    pub const MARKET_DATA: &str = "market_data";
    pub const POSITION_UPDATE: &str = "position_update";
    pub const ORDER_UPDATE: &str = "order_update";
}

/// A typed payload stamped with the moment it was emitted.
///
/// Serializes as `{event_id, type, data, timestamp, source}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub event_id: EventId,

    #[serde(rename = "type")]
    pub event_type: String,

    #[serde(rename = "data")]
    pub payload: JsonValue,

    #[serde(rename = "timestamp")]
    pub occurred_at: Timestamp,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

impl Event {
    /// Creates an event stamped with the current time.
    pub fn new(event_type: impl Into<String>, payload: JsonValue) -> Self {
        Self {
            event_id: EventId::new(),
            event_type: event_type.into(),
            payload,
            occurred_at: Timestamp::now(),
            source: None,
        }
    }

    /// Sets the producer name.
    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    /// Sets the producer name from an optional value.
    pub fn with_optional_source(mut self, source: Option<String>) -> Self {
        self.source = source;
        self
    }

    /// Returns true if this event has the given type.
    pub fn is(&self, event_type: &str) -> bool {
        self.event_type == event_type
    }
}
