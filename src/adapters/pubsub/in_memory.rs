//! In-memory pub/sub backend for testing and single-process deployments.
//!
//! Each channel is a `tokio::sync::broadcast` channel created on first use.
//! The backend can be switched to "unavailable" to simulate a bus outage,
//! and a recording backend keeps every published payload for inspection.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use futures::stream::{self, BoxStream};
use futures::StreamExt;
use tokio::sync::broadcast;

use crate::ports::{PubSubBackend, PubSubError};

const CHANNEL_CAPACITY: usize = 256;

/// In-memory pub/sub backend.
pub struct InMemoryPubSub {
    channels: Mutex<HashMap<String, broadcast::Sender<String>>>,
    history: Option<Mutex<Vec<(String, String)>>>,
    available: AtomicBool,
}

impl InMemoryPubSub {
    /// Create a reachable backend.
    pub fn new() -> Self {
        Self {
            channels: Mutex::new(HashMap::new()),
            history: None,
            available: AtomicBool::new(true),
        }
    }

    /// Create a reachable backend that remembers every publish.
    ///
    /// The history is unbounded; meant for tests.
    pub fn recording() -> Self {
        Self {
            history: Some(Mutex::new(Vec::new())),
            ..Self::new()
        }
    }

    /// Create a backend that refuses every operation.
    pub fn unavailable() -> Self {
        let backend = Self::new();
        backend.set_available(false);
        backend
    }

    /// Simulate the bus going away or coming back.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Every `(channel, payload)` published so far, in order.
    ///
    /// Always empty unless the backend was created with `recording()`.
    pub fn published(&self) -> Vec<(String, String)> {
        self.history
            .as_ref()
            .map(|history| history.lock().unwrap_or_else(|p| p.into_inner()).clone())
            .unwrap_or_default()
    }

    /// End every open listener stream on `channel`, as a dropped bus
    /// connection would.
    pub fn close_channel(&self, channel: &str) {
        self.channels
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .remove(channel);
    }

    /// Number of open listeners on `channel`.
    pub fn listener_count(&self, channel: &str) -> usize {
        self.channels
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .get(channel)
            .map(|s| s.receiver_count())
            .unwrap_or(0)
    }

    fn check_available(&self) -> Result<(), PubSubError> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(PubSubError::Unavailable("in-memory bus offline".to_string()))
        }
    }

    fn sender(&self, channel: &str) -> broadcast::Sender<String> {
        self.channels
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .entry(channel.to_string())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .clone()
    }
}

impl Default for InMemoryPubSub {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PubSubBackend for InMemoryPubSub {
    async fn ping(&self) -> Result<(), PubSubError> {
        self.check_available()
    }

    async fn publish(&self, channel: &str, payload: String) -> Result<u64, PubSubError> {
        self.check_available()?;

        if let Some(history) = &self.history {
            history
                .lock()
                .unwrap_or_else(|p| p.into_inner())
                .push((channel.to_string(), payload.clone()));
        }

        // No receivers is not an error
        let receivers = self.sender(channel).send(payload).unwrap_or(0);
        Ok(receivers as u64)
    }

    async fn listen(&self, channel: &str) -> Result<BoxStream<'static, String>, PubSubError> {
        self.check_available()?;

        let receiver = self.sender(channel).subscribe();
        let channel = channel.to_string();

        let stream = stream::unfold(receiver, move |mut receiver| {
            let channel = channel.clone();
            async move {
                loop {
                    match receiver.recv().await {
                        Ok(payload) => return Some((payload, receiver)),
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            tracing::warn!(channel = %channel, skipped, "Listener lagged, messages dropped");
                        }
                        Err(broadcast::error::RecvError::Closed) => return None,
                    }
                }
            }
        })
        .boxed();

        Ok(stream)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn publish_reaches_listener() {
        let bus = InMemoryPubSub::new();
        let mut stream = bus.listen("mt5:market_data").await.unwrap();

        let receivers = bus.publish("mt5:market_data", "hello".to_string()).await.unwrap();

        assert_eq!(receivers, 1);
        assert_eq!(stream.next().await, Some("hello".to_string()));
    }

    #[tokio::test]
    async fn publish_without_listeners_reports_zero() {
        let bus = InMemoryPubSub::recording();
        assert_eq!(bus.publish("mt5:nobody", "x".to_string()).await.unwrap(), 0);
        assert_eq!(bus.published(), vec![("mt5:nobody".to_string(), "x".to_string())]);
    }

    #[tokio::test]
    async fn unavailable_backend_refuses_everything() {
        let bus = InMemoryPubSub::unavailable();

        assert!(bus.ping().await.is_err());
        assert!(bus.publish("c", "x".to_string()).await.is_err());
        assert!(bus.listen("c").await.is_err());
        assert!(bus.published().is_empty());
    }

    #[tokio::test]
    async fn closing_a_channel_ends_its_streams() {
        let bus = InMemoryPubSub::new();
        let mut stream = bus.listen("mt5:market_data").await.unwrap();

        bus.close_channel("mt5:market_data");

        assert_eq!(stream.next().await, None);
        assert_eq!(bus.listener_count("mt5:market_data"), 0);
    }

    #[tokio::test]
    async fn plain_backend_keeps_no_history() {
        let bus = InMemoryPubSub::new();
        for n in 0..10 {
            bus.publish("mt5:account_update", n.to_string()).await.unwrap();
        }
        assert!(bus.published().is_empty());
    }

    #[tokio::test]
    async fn dropping_stream_releases_listener() {
        let bus = InMemoryPubSub::new();
        let stream = bus.listen("c").await.unwrap();
        assert_eq!(bus.listener_count("c"), 1);

        drop(stream);
        assert_eq!(bus.listener_count("c"), 0);
    }
}
