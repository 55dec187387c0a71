//! ExternalBridge - republishes events to an external pub/sub bus.
//!
//! # States
//!
//! ```text
//! Disconnected ──connect ok──▶ Connected ──disconnect──▶ Disconnected
//!      │
//!      └──connect failed──▶ Degraded (publish fails fast, subscribe is a no-op)
//! ```
//!
//! Nothing on this type ever returns an error to its caller: publishing is
//! best effort and the rest of the process keeps running without the bus.
//!
//! # Listeners
//!
//! One listener task per channel, shared by every handler subscribed to that
//! channel. The task is stopped once the last handler unsubscribes. When the
//! bus closes a listener's stream the task re-opens it after
//! `resubscribe_delay`, retrying until it succeeds or is stopped.

use std::collections::{HashMap, HashSet};
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::{FutureExt, StreamExt};
use serde::Serialize;
use serde_json::{json, Value as JsonValue};
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;

use crate::adapters::events::EventBus;
use crate::adapters::resilience::{InMemoryCircuitBreaker, ResilienceError, ResiliencePolicy};
use crate::domain::foundation::{event_types, DomainError, Event, Timestamp};
use crate::ports::{
    ChannelHandler, CircuitBreaker, CircuitBreakerConfig, CircuitState, EventHandler,
    PubSubBackend,
};

/// Event types republished from the bus to the external channel.
pub const REPUBLISHED_EVENT_TYPES: &[&str] = &[
    event_types::ACCOUNT_UPDATE,
    event_types::CONNECTION_STATUS,
];

/// Configuration for the ExternalBridge.
#[derive(Debug, Clone)]
pub struct ExternalBridgeConfig {
    /// Prefix for every channel name (`<prefix>:<channel>`).
    pub channel_prefix: String,

    /// Upper bound for a single publish.
    pub publish_timeout: Duration,

    /// Breaker guarding publishes.
    pub breaker: CircuitBreakerConfig,

    /// How long to wait for a listener task to stop.
    pub stop_timeout: Duration,

    /// Pause before re-opening a listener whose stream ended.
    pub resubscribe_delay: Duration,
}

impl Default for ExternalBridgeConfig {
    fn default() -> Self {
        Self {
            channel_prefix: "mt5".to_string(),
            publish_timeout: Duration::from_secs(5),
            breaker: CircuitBreakerConfig::for_message_bus(),
            stop_timeout: Duration::from_secs(1),
            resubscribe_delay: Duration::from_secs(1),
        }
    }
}

impl ExternalBridgeConfig {
    /// Create config with custom channel prefix.
    pub fn with_channel_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.channel_prefix = prefix.into();
        self
    }

    /// Create config with custom publish timeout.
    pub fn with_publish_timeout(mut self, timeout: Duration) -> Self {
        self.publish_timeout = timeout;
        self
    }

    /// Create config with custom breaker settings.
    pub fn with_breaker(mut self, breaker: CircuitBreakerConfig) -> Self {
        self.breaker = breaker;
        self
    }

    /// Create config with custom listener re-open delay.
    pub fn with_resubscribe_delay(mut self, delay: Duration) -> Self {
        self.resubscribe_delay = delay;
        self
    }
}

/// Connection state of the bridge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BridgeState {
    Disconnected,
    Connected,
    Degraded,
}

/// Bridge statistics.
///
/// `active_subscriptions` counts channels whose listener is attached to the
/// bus; a channel waiting to re-open its stream is listed but not active.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BridgeStats {
    pub connected: bool,
    pub degraded: bool,
    pub active_subscriptions: usize,
    pub total_subscribers: usize,
    pub channels: Vec<String>,
}

type Subscribers = Arc<RwLock<HashMap<String, Vec<Arc<dyn ChannelHandler>>>>>;
type Detached = Arc<RwLock<HashSet<String>>>;

struct Listener {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

/// Bridge between the in-process event flow and an external pub/sub bus.
pub struct ExternalBridge {
    backend: Arc<dyn PubSubBackend>,
    config: ExternalBridgeConfig,
    state: RwLock<BridgeState>,
    subscribers: Subscribers,
    detached: Detached,
    listeners: Mutex<HashMap<String, Listener>>,
    breaker: Arc<InMemoryCircuitBreaker>,
    policy: ResiliencePolicy,
}

impl ExternalBridge {
    /// Create a disconnected bridge over `backend`.
    pub fn new(backend: Arc<dyn PubSubBackend>, config: ExternalBridgeConfig) -> Self {
        let breaker = Arc::new(InMemoryCircuitBreaker::new("pubsub", config.breaker.clone()));
        let policy = ResiliencePolicy::new()
            .with_timeout(config.publish_timeout)
            .with_circuit_breaker(breaker.clone());

        Self {
            backend,
            config,
            state: RwLock::new(BridgeState::Disconnected),
            subscribers: Arc::new(RwLock::new(HashMap::new())),
            detached: Arc::new(RwLock::new(HashSet::new())),
            listeners: Mutex::new(HashMap::new()),
            breaker,
            policy,
        }
    }

    /// Create as an Arc (for sharing with the event bus).
    pub fn new_shared(backend: Arc<dyn PubSubBackend>, config: ExternalBridgeConfig) -> Arc<Self> {
        Arc::new(Self::new(backend, config))
    }

    /// Check the bus is reachable.
    ///
    /// The check is bounded by `publish_timeout`. On failure or timeout the
    /// bridge becomes degraded and stays degraded until `disconnect()`.
    /// Returns whether the bridge is connected.
    pub async fn connect(&self) -> bool {
        match self.state() {
            BridgeState::Connected => return true,
            BridgeState::Degraded => return false,
            BridgeState::Disconnected => {}
        }

        let outcome = tokio::time::timeout(self.config.publish_timeout, self.backend.ping()).await;
        match outcome {
            Ok(Ok(())) => {
                self.set_state(BridgeState::Connected);
                tracing::info!(prefix = %self.config.channel_prefix, "Connected to external pub/sub");
                true
            }
            Ok(Err(e)) => {
                self.set_state(BridgeState::Degraded);
                tracing::warn!(error = %e, "External pub/sub unavailable, running degraded");
                false
            }
            Err(_) => {
                self.set_state(BridgeState::Degraded);
                tracing::warn!(
                    timeout_ms = self.config.publish_timeout.as_millis() as u64,
                    "External pub/sub did not answer, running degraded"
                );
                false
            }
        }
    }

    /// Stop every listener, forget all subscribers and release the backend.
    pub async fn disconnect(&self) {
        let listeners: Vec<(String, Listener)> = self.listeners.lock().await.drain().collect();
        for (channel, listener) in listeners {
            self.stop_listener(&channel, listener).await;
        }
        self.write_subscribers().clear();
        self.detached.write().unwrap_or_else(|p| p.into_inner()).clear();

        self.backend.close().await;
        self.set_state(BridgeState::Disconnected);
        tracing::info!("Disconnected from external pub/sub");
    }

    /// Publish `data` on `<prefix>:<channel>`.
    ///
    /// Objects and arrays are sent as JSON, strings as-is. Returns false on
    /// any failure, including when the bridge is not connected.
    pub async fn publish(&self, channel: &str, data: &JsonValue) -> bool {
        if !self.is_connected() {
            tracing::debug!(channel = %channel, "External pub/sub not connected, cannot publish");
            return false;
        }

        let full_channel = self.full_channel(channel);
        let message = match data {
            JsonValue::String(s) => s.clone(),
            other => other.to_string(),
        };
        let size = message.len();

        let backend = &self.backend;
        let result = self
            .policy
            .run(|| backend.publish(&full_channel, message.clone()))
            .await;

        match result {
            Ok(receivers) => {
                tracing::debug!(channel = %full_channel, bytes = size, receivers, "Published message");
                true
            }
            Err(ResilienceError::CircuitOpen) => {
                tracing::debug!(channel = %full_channel, "Publish rejected, circuit open");
                false
            }
            Err(e) => {
                tracing::error!(channel = %full_channel, error = %e, "Failed to publish");
                false
            }
        }
    }

    /// Publish an account update envelope.
    pub async fn publish_account_update(&self, account: JsonValue) -> bool {
        self.publish(event_types::ACCOUNT_UPDATE, &envelope(event_types::ACCOUNT_UPDATE, account))
            .await
    }

    /// Publish a market data envelope for one symbol.
    pub async fn publish_market_data(&self, symbol: &str, data: JsonValue) -> bool {
        let mut message = envelope(event_types::MARKET_DATA, data);
        message["symbol"] = JsonValue::String(symbol.to_string());
        self.publish(event_types::MARKET_DATA, &message).await
    }

    /// Publish a position update envelope.
    pub async fn publish_position_update(&self, position: JsonValue) -> bool {
        self.publish(event_types::POSITION_UPDATE, &envelope(event_types::POSITION_UPDATE, position))
            .await
    }

    /// Publish an order update envelope.
    pub async fn publish_order_update(&self, order: JsonValue) -> bool {
        self.publish(event_types::ORDER_UPDATE, &envelope(event_types::ORDER_UPDATE, order))
            .await
    }

    /// Publish a connection status envelope.
    pub async fn publish_connection_status(&self, status: JsonValue) -> bool {
        self.publish(
            event_types::CONNECTION_STATUS,
            &envelope(event_types::CONNECTION_STATUS, status),
        )
        .await
    }

    /// Register `handler` for messages on `<prefix>:<channel>`.
    ///
    /// Starts the channel's listener on its first subscriber. Returns false
    /// (and registers nothing) when the bridge is not connected or the
    /// listener could not be opened.
    pub async fn subscribe(&self, channel: &str, handler: Arc<dyn ChannelHandler>) -> bool {
        if !self.is_connected() {
            tracing::debug!(channel = %channel, "External pub/sub not connected, subscribe ignored");
            return false;
        }

        let full_channel = self.full_channel(channel);
        let mut listeners = self.listeners.lock().await;

        if listeners
            .get(&full_channel)
            .is_some_and(|listener| listener.handle.is_finished())
        {
            tracing::warn!(channel = %full_channel, "Listener task exited, restarting");
            listeners.remove(&full_channel);
        }

        if !listeners.contains_key(&full_channel) {
            let stream = match self.backend.listen(&full_channel).await {
                Ok(stream) => stream,
                Err(e) => {
                    tracing::error!(channel = %full_channel, error = %e, "Failed to subscribe");
                    return false;
                }
            };

            let (shutdown_tx, shutdown_rx) = watch::channel(false);
            let handle = tokio::spawn(listen_loop(
                ListenerContext {
                    channel: channel.to_string(),
                    full_channel: full_channel.clone(),
                    backend: Arc::clone(&self.backend),
                    subscribers: Arc::clone(&self.subscribers),
                    detached: Arc::clone(&self.detached),
                    resubscribe_delay: self.config.resubscribe_delay,
                },
                stream,
                shutdown_rx,
            ));
            listeners.insert(
                full_channel.clone(),
                Listener {
                    shutdown: shutdown_tx,
                    handle,
                },
            );
        }

        self.write_subscribers()
            .entry(full_channel.clone())
            .or_default()
            .push(handler);

        tracing::info!(channel = %full_channel, "Subscribed to external channel");
        true
    }

    /// Remove one handler, or every handler when `handler` is `None`.
    ///
    /// The channel's listener is stopped once no handler remains.
    pub async fn unsubscribe(&self, channel: &str, handler: Option<&Arc<dyn ChannelHandler>>) {
        let full_channel = self.full_channel(channel);
        let mut listeners = self.listeners.lock().await;

        let now_empty = {
            let mut subscribers = self.write_subscribers();
            let Some(list) = subscribers.get_mut(&full_channel) else {
                return;
            };

            match handler {
                Some(handler) => {
                    if let Some(pos) = list.iter().position(|h| same_handler(h, handler)) {
                        list.remove(pos);
                    }
                }
                None => list.clear(),
            }

            if list.is_empty() {
                subscribers.remove(&full_channel);
                true
            } else {
                false
            }
        };

        if now_empty {
            if let Some(listener) = listeners.remove(&full_channel) {
                self.stop_listener(&full_channel, listener).await;
            }
            self.detached
                .write()
                .unwrap_or_else(|p| p.into_inner())
                .remove(&full_channel);
            tracing::info!(channel = %full_channel, "Unsubscribed from external channel");
        }
    }

    /// Subscribe this bridge to the bus event types it republishes.
    pub fn register(self: &Arc<Self>, bus: &EventBus) -> Arc<dyn EventHandler> {
        let handler: Arc<dyn EventHandler> = self.clone();
        bus.subscribe_all(REPUBLISHED_EVENT_TYPES, Arc::clone(&handler));
        handler
    }

    /// Current state.
    pub fn state(&self) -> BridgeState {
        *self.state.read().unwrap_or_else(|p| p.into_inner())
    }

    /// Whether the bus is reachable.
    pub fn is_connected(&self) -> bool {
        self.state() == BridgeState::Connected
    }

    /// Whether the bridge gave up on the bus.
    pub fn is_degraded(&self) -> bool {
        self.state() == BridgeState::Degraded
    }

    /// State of the publish circuit breaker.
    pub fn breaker_state(&self) -> CircuitState {
        self.breaker.state()
    }

    /// Number of handlers registered on `channel`.
    pub fn subscriber_count(&self, channel: &str) -> usize {
        self.read_subscribers()
            .get(&self.full_channel(channel))
            .map(Vec::len)
            .unwrap_or(0)
    }

    /// Bridge statistics.
    pub fn stats(&self) -> BridgeStats {
        let subscribers = self.read_subscribers();
        let detached = self.detached.read().unwrap_or_else(|p| p.into_inner());
        let mut channels: Vec<String> = subscribers.keys().cloned().collect();
        channels.sort();

        BridgeStats {
            connected: self.is_connected(),
            degraded: self.is_degraded(),
            active_subscriptions: channels.iter().filter(|c| !detached.contains(*c)).count(),
            total_subscribers: subscribers.values().map(Vec::len).sum(),
            channels,
        }
    }

    // === Internals ===

    fn full_channel(&self, channel: &str) -> String {
        format!("{}:{}", self.config.channel_prefix, channel)
    }

    fn set_state(&self, state: BridgeState) {
        *self.state.write().unwrap_or_else(|p| p.into_inner()) = state;
    }

    fn read_subscribers(
        &self,
    ) -> std::sync::RwLockReadGuard<'_, HashMap<String, Vec<Arc<dyn ChannelHandler>>>> {
        self.subscribers.read().unwrap_or_else(|p| p.into_inner())
    }

    fn write_subscribers(
        &self,
    ) -> std::sync::RwLockWriteGuard<'_, HashMap<String, Vec<Arc<dyn ChannelHandler>>>> {
        self.subscribers.write().unwrap_or_else(|p| p.into_inner())
    }

    async fn stop_listener(&self, channel: &str, listener: Listener) {
        let Listener {
            shutdown,
            mut handle,
        } = listener;
        let _ = shutdown.send(true);
        if tokio::time::timeout(self.config.stop_timeout, &mut handle)
            .await
            .is_err()
        {
            tracing::warn!(channel = %channel, "Listener did not stop in time, aborting");
            handle.abort();
        }
    }
}

#[async_trait]
impl EventHandler for ExternalBridge {
    async fn handle(&self, event: &Event) -> Result<(), DomainError> {
        // Best effort: a failed publish is already logged
        match event.event_type.as_str() {
            event_types::ACCOUNT_UPDATE => {
                self.publish_account_update(event.payload.clone()).await;
            }
            event_types::CONNECTION_STATUS => {
                self.publish_connection_status(event.payload.clone()).await;
            }
            other => {
                self.publish(other, &envelope(other, event.payload.clone())).await;
            }
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "ExternalBridge"
    }
}

/// Wrap `data` in the `{type, data, timestamp}` envelope used on the bus.
fn envelope(message_type: &str, data: JsonValue) -> JsonValue {
    json!({
        "type": message_type,
        "data": data,
        "timestamp": Timestamp::now(),
    })
}

fn same_handler(a: &Arc<dyn ChannelHandler>, b: &Arc<dyn ChannelHandler>) -> bool {
    Arc::as_ptr(a) as *const () == Arc::as_ptr(b) as *const ()
}

/// Decode an inbound payload. Non-JSON text is delivered as a JSON string.
fn decode_payload(raw: String) -> JsonValue {
    serde_json::from_str(&raw).unwrap_or(JsonValue::String(raw))
}

struct ListenerContext {
    channel: String,
    full_channel: String,
    backend: Arc<dyn PubSubBackend>,
    subscribers: Subscribers,
    detached: Detached,
    resubscribe_delay: Duration,
}

impl ListenerContext {
    fn set_detached(&self, detached: bool) {
        let mut set = self.detached.write().unwrap_or_else(|p| p.into_inner());
        if detached {
            set.insert(self.full_channel.clone());
        } else {
            set.remove(&self.full_channel);
        }
    }

    /// Re-open the channel until it succeeds. `None` means shutdown was requested.
    async fn reopen(
        &self,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Option<BoxStream<'static, String>> {
        loop {
            tokio::select! {
                biased;

                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        return None;
                    }
                }

                _ = tokio::time::sleep(self.resubscribe_delay) => {
                    match self.backend.listen(&self.full_channel).await {
                        Ok(stream) => {
                            tracing::info!(channel = %self.full_channel, "Listener re-opened");
                            return Some(stream);
                        }
                        Err(e) => {
                            tracing::warn!(channel = %self.full_channel, error = %e, "Failed to re-open listener");
                        }
                    }
                }
            }
        }
    }
}

async fn listen_loop(
    context: ListenerContext,
    mut stream: BoxStream<'static, String>,
    mut shutdown: watch::Receiver<bool>,
) {
    tracing::info!(channel = %context.full_channel, "Started listener");

    loop {
        tokio::select! {
            biased;

            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }

            next = stream.next() => match next {
                Some(raw) => {
                    dispatch(
                        &context.channel,
                        &context.full_channel,
                        decode_payload(raw),
                        &context.subscribers,
                    )
                    .await
                }
                None => {
                    tracing::warn!(channel = %context.full_channel, "Listener stream ended");
                    context.set_detached(true);
                    match context.reopen(&mut shutdown).await {
                        Some(reopened) => {
                            stream = reopened;
                            context.set_detached(false);
                        }
                        None => break,
                    }
                }
            },
        }
    }

    tracing::info!(channel = %context.full_channel, "Listener stopped");
}

async fn dispatch(channel: &str, full_channel: &str, payload: JsonValue, subscribers: &Subscribers) {
    let handlers: Vec<Arc<dyn ChannelHandler>> = subscribers
        .read()
        .unwrap_or_else(|p| p.into_inner())
        .get(full_channel)
        .cloned()
        .unwrap_or_default();

    for handler in handlers {
        let outcome = AssertUnwindSafe(handler.on_message(channel, payload.clone()))
            .catch_unwind()
            .await;

        match outcome {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                tracing::error!(
                    channel = %full_channel,
                    handler = handler.name(),
                    error = %e,
                    "Channel handler failed"
                );
            }
            Err(_) => {
                tracing::error!(
                    channel = %full_channel,
                    handler = handler.name(),
                    "Channel handler panicked"
                );
            }
        }
    }
}
