//! WebSocket adapters for real-time account updates.
//!
//! This module provides the infrastructure for pushing account events
//! to connected clients via WebSocket connections.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                         EventBus                                     │
//! │   account_update │ connection_status │ monitor_error                 │
//! └─────────────────────────────────────────────────────────────────────┘
//!                                     │
//!                                     │ subscribes
//!                                     ▼
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                        ClientFanout                                  │
//! │   - Turns events (and inbound external messages) into envelopes      │
//! │   - Enqueues them on the ConnectionManager                           │
//! └─────────────────────────────────────────────────────────────────────┘
//!                                     │
//!                                     │ drain task broadcasts
//!                                     ▼
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                      ConnectionManager                               │
//! │   client-a    client-b    client-c    (heartbeat every 30s)          │
//! └─────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Components
//!
//! - [`messages`] - WebSocket message protocol types
//! - [`connections`] - Connection set, send/broadcast, heartbeat and drain tasks
//! - [`handler`] - Axum WebSocket upgrade handler
//! - [`event_bridge`] - Bridge between the event bus and connected clients

pub mod connections;
pub mod event_bridge;
pub mod handler;
pub mod messages;

pub use connections::{
    ClientInfo, ConnectionManager, ConnectionManagerConfig, ConnectionSnapshot, ConnectionStats,
};
pub use event_bridge::{ClientFanout, CLIENT_EVENT_TYPES};
pub use handler::{websocket_router, ws_handler, WebSocketState, WsTransport};
pub use messages::{message_types, ClientMessage, InboundError, ServerMessage, SERVER_VERSION};
