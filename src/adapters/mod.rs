//! Adapters - Implementations of port interfaces.
//!
//! Adapters connect the relay to external systems:
//! - `events` - In-process event bus and closure handlers
//! - `resilience` - Circuit breaker, retry and timeout wrappers
//! - `websocket` - Client connections, protocol messages and the `/ws` route
//! - `pubsub` - External bridge with Redis and in-memory backends
//! - `terminal` - HTTP gateway to the trading terminal
//! - `http` - Health routes and the assembled application router

pub mod events;
pub mod http;
pub mod pubsub;
pub mod resilience;
pub mod terminal;
pub mod websocket;

pub use events::{handler_fn, EventBus, EventBusConfig};
pub use http::app_router;
pub use pubsub::{ExternalBridge, ExternalBridgeConfig, InMemoryPubSub, RedisPubSub};
pub use resilience::{InMemoryCircuitBreaker, ResiliencePolicy, RetryPolicy};
pub use terminal::{HttpTerminalSource, TerminalSourceConfig};
pub use websocket::{ClientFanout, ConnectionManager, ConnectionManagerConfig};
