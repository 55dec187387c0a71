//! ClientTransport port - Outbound half of one client connection.
//!
//! The connection manager owns transports but never knows whether it is
//! writing to a websocket, a test double, or something else.

use async_trait::async_trait;

/// Port for writing to a single connected client.
#[async_trait]
pub trait ClientTransport: Send + Sync {
    /// Write one text frame.
    async fn send_text(&self, text: String) -> Result<(), TransportError>;

    /// Write a transport-level liveness check. Transports without one do nothing.
    async fn send_ping(&self) -> Result<(), TransportError> {
        Ok(())
    }

    /// Close the transport. Must be safe to call more than once.
    async fn close(&self);
}

/// Errors that can occur writing to a client.
#[derive(Debug, Clone, thiserror::Error)]
pub enum TransportError {
    /// The peer went away.
    #[error("transport closed")]
    Closed,

    /// The write did not complete within the send timeout.
    #[error("send timed out")]
    Timeout,

    /// The write failed.
    #[error("send failed: {0}")]
    Io(String),
}
