//! PubSub ports - External publish/subscribe bus.
//!
//! `PubSubBackend` is the raw transport (Redis in production, broadcast
//! channels in tests). `ChannelHandler` receives messages arriving on a
//! subscribed channel.

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde_json::Value as JsonValue;

use crate::domain::foundation::DomainError;

/// Port for the external message bus transport.
///
/// Channel names passed to the backend are already fully qualified
/// (`<prefix>:<channel>`).
#[async_trait]
pub trait PubSubBackend: Send + Sync {
    /// Check the bus is reachable.
    async fn ping(&self) -> Result<(), PubSubError>;

    /// Publish a payload. Returns the number of receivers reported by the bus.
    async fn publish(&self, channel: &str, payload: String) -> Result<u64, PubSubError>;

    /// Open a dedicated listener for one channel.
    ///
    /// The stream ends when the underlying connection closes. Dropping the
    /// stream releases the subscription.
    async fn listen(&self, channel: &str) -> Result<BoxStream<'static, String>, PubSubError>;

    /// Release pooled connections.
    async fn close(&self) {}
}

/// Receiver of messages published on an external channel.
#[async_trait]
pub trait ChannelHandler: Send + Sync {
    /// Process one inbound message.
    async fn on_message(&self, channel: &str, payload: JsonValue) -> Result<(), DomainError>;

    /// Handler name for logging.
    fn name(&self) -> &'static str;
}

/// Errors that can occur on the external bus.
#[derive(Debug, Clone, thiserror::Error)]
pub enum PubSubError {
    /// The bus could not be reached.
    #[error("pub/sub unavailable: {0}")]
    Unavailable(String),

    /// The bus rejected a command.
    #[error("pub/sub command failed: {0}")]
    Command(String),

    /// A payload could not be serialized.
    #[error("pub/sub serialization failed: {0}")]
    Serialization(String),
}
