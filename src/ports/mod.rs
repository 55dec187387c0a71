//! Ports - Interfaces for external dependencies.
//!
//! Following hexagonal architecture, ports define the contracts between
//! the core and the outside world. Adapters implement these ports.
//!
//! ## Event Ports
//!
//! - `EventHandler` - Handler that processes events delivered by the bus
//!
//! ## Upstream Ports
//!
//! - `AccountSource` - Trading terminal the monitor samples
//! - `PubSubBackend` - External publish/subscribe transport
//! - `ChannelHandler` - Receiver of inbound external messages
//!
//! ## Client Ports
//!
//! - `ClientTransport` - Outbound half of a client connection
//!
//! ## Resilience Ports
//!
//! - `CircuitBreaker` - Upstream dependency resilience pattern

mod account_source;
mod circuit_breaker;
mod client_transport;
mod event_handler;
mod pubsub;

pub use account_source::{AccountSource, SourceError};
pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerMetrics, CircuitState};
pub use client_transport::{ClientTransport, TransportError};
pub use event_handler::EventHandler;
pub use pubsub::{ChannelHandler, PubSubBackend, PubSubError};
