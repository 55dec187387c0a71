//! EventHandler port - Interface for consuming bus events.
//!
//! Handlers register interest in event types on the bus without knowing
//! who produces the events.

use async_trait::async_trait;

use crate::domain::foundation::{DomainError, Event};

/// Handler for processing events delivered by the bus.
///
/// Implementations should be:
/// - **Quick** - the bus invokes handlers for one event sequentially
/// - **Isolated** - a returned error is logged and never reaches other handlers
///
/// # Example
///
/// ```ignore
/// struct ClientFanout { connections: Arc<ConnectionManager> }
///
/// #[async_trait]
/// impl EventHandler for ClientFanout {
///     async fn handle(&self, event: &Event) -> Result<(), DomainError> {
///         self.connections.enqueue(ServerMessage::from_event(event));
///         Ok(())
///     }
///
///     fn name(&self) -> &'static str {
///         "ClientFanout"
///     }
/// }
/// ```
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Process an event.
    async fn handle(&self, event: &Event) -> Result<(), DomainError>;

    /// Handler name for logging.
    fn name(&self) -> &'static str;
}
