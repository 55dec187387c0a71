//! ConnectionManager - tracks live clients and fans messages out to them.
//!
//! # Lifecycle
//!
//! ```text
//! 0 connections ──accept──▶ 1 connection   start heartbeat + drain tasks
//! 1 connection ──disconnect──▶ 0           signal both tasks to stop
//! ```
//!
//! Queued messages are tagged with the number of stops seen so far. Anything
//! queued before the last stop is discarded instead of reaching the next
//! generation of clients.
//!
//! Both transitions happen under the connection-set write lock, so the
//! background tasks start and stop exactly once per transition no matter how
//! many clients come and go in between.
//!
//! # Sending
//!
//! The connection set lock is never held across a write. Broadcast takes a
//! snapshot of transports, writes to all of them concurrently with a
//! per-send timeout, then disconnects the ones that failed.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use futures::future::join_all;
use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

use crate::domain::foundation::{ConnectionId, Timestamp};
use crate::ports::{ClientTransport, TransportError};

use super::messages::{ClientMessage, InboundError, ServerMessage};

/// Configuration for the ConnectionManager.
#[derive(Debug, Clone)]
pub struct ConnectionManagerConfig {
    /// Interval between heartbeat broadcasts.
    pub heartbeat_interval: Duration,

    /// Upper bound for a single write to one client.
    pub send_timeout: Duration,

    /// How long `shutdown()` waits for each background task.
    pub stop_timeout: Duration,
}

impl Default for ConnectionManagerConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(30),
            send_timeout: Duration::from_secs(5),
            stop_timeout: Duration::from_secs(2),
        }
    }
}

impl ConnectionManagerConfig {
    /// Create config with custom heartbeat interval.
    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    /// Create config with custom send timeout.
    pub fn with_send_timeout(mut self, timeout: Duration) -> Self {
        self.send_timeout = timeout;
        self
    }
}

/// What the client told us about itself when connecting.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ClientInfo {
    pub remote_addr: Option<String>,
    pub user_agent: Option<String>,
}

struct Connection {
    transport: Arc<dyn ClientTransport>,
    client_info: ClientInfo,
    connected_at: Timestamp,
    message_count: u64,
    last_activity: Timestamp,
    subscriptions: HashSet<String>,
}

/// Point-in-time view of one connection.
#[derive(Debug, Clone, Serialize)]
pub struct ConnectionSnapshot {
    pub id: ConnectionId,
    pub client_info: ClientInfo,
    pub connected_at: Timestamp,
    pub message_count: u64,
    pub last_activity: Timestamp,
}

/// Aggregate connection statistics.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ConnectionStats {
    pub total_connections: usize,
    pub average_duration_secs: f64,
    pub total_messages: u64,
    pub average_messages_per_connection: f64,
}

/// A broadcast waiting for the drain task, tagged with its generation.
type Queued = (u64, ServerMessage);

struct BackgroundTasks {
    shutdown: watch::Sender<bool>,
    heartbeat: JoinHandle<()>,
    drain: JoinHandle<()>,
}

/// Owns the set of live client connections.
///
/// Shared as `Arc<ConnectionManager>`; accepting a client may spawn
/// background tasks that hold a clone of that `Arc`.
pub struct ConnectionManager {
    connections: RwLock<HashMap<ConnectionId, Connection>>,
    count: AtomicUsize,
    queue_tx: mpsc::UnboundedSender<Queued>,
    queue_rx: Arc<tokio::sync::Mutex<mpsc::UnboundedReceiver<Queued>>>,
    tasks: Mutex<Option<BackgroundTasks>>,
    heartbeat_starts: AtomicU64,
    heartbeat_stops: AtomicU64,
    config: ConnectionManagerConfig,
}

impl ConnectionManager {
    /// Create a manager with default configuration.
    pub fn new() -> Self {
        Self::with_config(ConnectionManagerConfig::default())
    }

    /// Create a manager with custom configuration.
    pub fn with_config(config: ConnectionManagerConfig) -> Self {
        let (queue_tx, queue_rx) = mpsc::unbounded_channel();
        Self {
            connections: RwLock::new(HashMap::new()),
            count: AtomicUsize::new(0),
            queue_tx,
            queue_rx: Arc::new(tokio::sync::Mutex::new(queue_rx)),
            tasks: Mutex::new(None),
            heartbeat_starts: AtomicU64::new(0),
            heartbeat_stops: AtomicU64::new(0),
            config,
        }
    }

    /// Registers a new client and sends it the welcome message.
    ///
    /// Starts the heartbeat and drain tasks if this is the first client.
    pub async fn accept(
        self: &Arc<Self>,
        transport: Arc<dyn ClientTransport>,
        client_info: ClientInfo,
    ) -> ConnectionId {
        let id = ConnectionId::new();
        let now = Timestamp::now();

        let total = {
            let mut connections = self.write_connections();
            connections.insert(
                id,
                Connection {
                    transport,
                    client_info,
                    connected_at: now,
                    message_count: 0,
                    last_activity: now,
                    subscriptions: HashSet::new(),
                },
            );
            let total = connections.len();
            self.count.store(total, Ordering::SeqCst);
            if total == 1 {
                self.start_background_tasks();
            }
            total
        };

        tracing::info!(connection_id = %id, total, "Client connected");

        self.send(id, &ServerMessage::welcome(id)).await;
        id
    }

    /// Removes a client and closes its transport.
    ///
    /// Returns false if the connection was already gone.
    pub async fn disconnect(&self, id: ConnectionId, reason: &str) -> bool {
        let (removed, remaining) = {
            let mut connections = self.write_connections();
            let removed = connections.remove(&id);
            let remaining = connections.len();
            self.count.store(remaining, Ordering::SeqCst);
            if removed.is_some() && remaining == 0 {
                self.signal_background_tasks();
            }
            (removed, remaining)
        };

        let Some(connection) = removed else {
            return false;
        };

        connection.transport.close().await;
        tracing::info!(
            connection_id = %id,
            reason,
            duration_secs = connection.connected_at.elapsed_secs(),
            messages = connection.message_count,
            remaining,
            "Client disconnected"
        );
        true
    }

    /// Sends one message to one client.
    ///
    /// A failed or timed-out write disconnects that client and returns false.
    pub async fn send(&self, id: ConnectionId, message: &ServerMessage) -> bool {
        let text = match message.to_json() {
            Ok(text) => text,
            Err(e) => {
                tracing::error!(error = %e, message_type = %message.message_type, "Failed to serialize message");
                return false;
            }
        };

        let Some(transport) = self.transport(id) else {
            return false;
        };

        match self.timed_send(&transport, text).await {
            Ok(()) => {
                self.record_sent(&[id]);
                true
            }
            Err(e) => {
                tracing::warn!(connection_id = %id, error = %e, "Send failed");
                self.disconnect(id, &format!("Send error: {}", e)).await;
                false
            }
        }
    }

    /// Sends one message to every client not in `exclude`.
    ///
    /// Returns the number of successful sends. Clients whose write failed are
    /// disconnected after all writes have completed.
    pub async fn broadcast(&self, message: &ServerMessage, exclude: &[ConnectionId]) -> usize {
        let text = match message.to_json() {
            Ok(text) => text,
            Err(e) => {
                tracing::error!(error = %e, message_type = %message.message_type, "Failed to serialize message");
                return 0;
            }
        };

        let targets: Vec<(ConnectionId, Arc<dyn ClientTransport>)> = self
            .read_connections()
            .iter()
            .filter(|(id, _)| !exclude.contains(id))
            .map(|(id, c)| (*id, Arc::clone(&c.transport)))
            .collect();

        if targets.is_empty() {
            return 0;
        }

        let attempted = targets.len();
        let results = join_all(targets.into_iter().map(|(id, transport)| {
            let text = text.clone();
            async move { (id, self.timed_send(&transport, text).await) }
        }))
        .await;

        let mut delivered = Vec::with_capacity(results.len());
        let mut failed = Vec::new();
        for (id, result) in results {
            match result {
                Ok(()) => delivered.push(id),
                Err(e) => failed.push((id, e)),
            }
        }

        self.record_sent(&delivered);

        for (id, e) in failed {
            tracing::warn!(connection_id = %id, error = %e, "Broadcast send failed");
            self.disconnect(id, &format!("Send error: {}", e)).await;
        }

        tracing::debug!(
            message_type = %message.message_type,
            sent = delivered.len(),
            attempted,
            "Broadcast complete"
        );
        delivered.len()
    }

    /// Queues a message for the drain task to broadcast.
    ///
    /// Messages queued while nobody is connected are dropped, as are those
    /// still queued when the last client leaves.
    pub fn enqueue(&self, message: ServerMessage) {
        if self.connection_count() == 0 {
            tracing::trace!(message_type = %message.message_type, "No clients connected, dropping message");
            return;
        }
        if self.queue_tx.send((self.generation(), message)).is_err() {
            tracing::warn!("Broadcast queue closed, dropping message");
        }
    }

    /// Handles one text frame received from a client.
    ///
    /// Bad frames are logged and dropped; the connection stays open.
    pub async fn handle_inbound(&self, id: ConnectionId, raw: &str) -> Result<(), InboundError> {
        self.touch(id);

        let message = match ClientMessage::parse(raw) {
            Ok(message) => message,
            Err(InboundError::UnknownType(t)) => {
                tracing::warn!(connection_id = %id, message_type = %t, "Unknown client message type");
                return Err(InboundError::UnknownType(t));
            }
            Err(e) => {
                tracing::warn!(connection_id = %id, error = %e, "Invalid client message");
                return Err(e);
            }
        };

        match message {
            ClientMessage::Ping => {
                tracing::trace!(connection_id = %id, "Received ping");
                self.send(id, &ServerMessage::pong()).await;
            }
            ClientMessage::Subscribe { channel } => {
                tracing::info!(connection_id = %id, channel = %channel, "Client subscribed to channel");
                if let Some(c) = self.write_connections().get_mut(&id) {
                    c.subscriptions.insert(channel);
                }
            }
            ClientMessage::Unsubscribe { channel } => {
                tracing::info!(connection_id = %id, channel = %channel, "Client unsubscribed from channel");
                if let Some(c) = self.write_connections().get_mut(&id) {
                    c.subscriptions.remove(&channel);
                }
            }
        }
        Ok(())
    }

    /// Refreshes `last_activity` for a client.
    pub fn touch(&self, id: ConnectionId) {
        if let Some(c) = self.write_connections().get_mut(&id) {
            c.last_activity = Timestamp::now();
        }
    }

    /// Number of live connections.
    pub fn connection_count(&self) -> usize {
        self.count.load(Ordering::SeqCst)
    }

    /// Whether `id` is still connected.
    pub fn is_connected(&self, id: ConnectionId) -> bool {
        self.read_connections().contains_key(&id)
    }

    /// Channels a client asked to follow.
    pub fn subscriptions(&self, id: ConnectionId) -> Option<HashSet<String>> {
        self.read_connections()
            .get(&id)
            .map(|c| c.subscriptions.clone())
    }

    /// Snapshot of one connection's metadata.
    pub fn connection_info(&self, id: ConnectionId) -> Option<ConnectionSnapshot> {
        self.read_connections().get(&id).map(|c| ConnectionSnapshot {
            id,
            client_info: c.client_info.clone(),
            connected_at: c.connected_at,
            message_count: c.message_count,
            last_activity: c.last_activity,
        })
    }

    /// Aggregate statistics over live connections.
    pub fn stats(&self) -> ConnectionStats {
        let connections = self.read_connections();
        if connections.is_empty() {
            return ConnectionStats::default();
        }

        let n = connections.len();
        let total_duration: f64 = connections.values().map(|c| c.connected_at.elapsed_secs()).sum();
        let total_messages: u64 = connections.values().map(|c| c.message_count).sum();

        ConnectionStats {
            total_connections: n,
            average_duration_secs: total_duration / n as f64,
            total_messages,
            average_messages_per_connection: total_messages as f64 / n as f64,
        }
    }

    /// Times the heartbeat task has been started.
    pub fn heartbeat_starts(&self) -> u64 {
        self.heartbeat_starts.load(Ordering::SeqCst)
    }

    /// Times the heartbeat task has been stopped.
    pub fn heartbeat_stops(&self) -> u64 {
        self.heartbeat_stops.load(Ordering::SeqCst)
    }

    /// Whether the heartbeat and drain tasks are running.
    pub fn background_tasks_running(&self) -> bool {
        self.lock_tasks().is_some()
    }

    /// Stops background tasks, closes every transport and forgets all clients.
    pub async fn shutdown(&self) {
        tracing::info!("Cleaning up connection manager");

        let tasks = self.lock_tasks().take();
        if let Some(tasks) = tasks {
            self.heartbeat_stops.fetch_add(1, Ordering::SeqCst);
            let _ = tasks.shutdown.send(true);
            for (name, mut handle) in [("heartbeat", tasks.heartbeat), ("drain", tasks.drain)] {
                if tokio::time::timeout(self.config.stop_timeout, &mut handle)
                    .await
                    .is_err()
                {
                    tracing::warn!(task = name, "Background task did not stop in time, aborting");
                    handle.abort();
                }
            }
        }

        let drained: Vec<Arc<dyn ClientTransport>> = {
            let mut connections = self.write_connections();
            self.count.store(0, Ordering::SeqCst);
            connections.drain().map(|(_, c)| c.transport).collect()
        };
        for transport in drained {
            transport.close().await;
        }

        tracing::info!("Connection manager cleanup complete");
    }

    // === Internals ===

    fn generation(&self) -> u64 {
        self.heartbeat_stops.load(Ordering::SeqCst)
    }

    fn is_stale(&self, generation: u64) -> bool {
        generation < self.generation()
    }

    fn read_connections(&self) -> std::sync::RwLockReadGuard<'_, HashMap<ConnectionId, Connection>> {
        self.connections.read().unwrap_or_else(|p| p.into_inner())
    }

    fn write_connections(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<ConnectionId, Connection>> {
        self.connections.write().unwrap_or_else(|p| p.into_inner())
    }

    fn lock_tasks(&self) -> std::sync::MutexGuard<'_, Option<BackgroundTasks>> {
        self.tasks.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn transport(&self, id: ConnectionId) -> Option<Arc<dyn ClientTransport>> {
        self.read_connections()
            .get(&id)
            .map(|c| Arc::clone(&c.transport))
    }

    async fn timed_send(
        &self,
        transport: &Arc<dyn ClientTransport>,
        text: String,
    ) -> Result<(), TransportError> {
        match tokio::time::timeout(self.config.send_timeout, transport.send_text(text)).await {
            Ok(result) => result,
            Err(_) => Err(TransportError::Timeout),
        }
    }

    fn record_sent(&self, ids: &[ConnectionId]) {
        if ids.is_empty() {
            return;
        }
        let now = Timestamp::now();
        let mut connections = self.write_connections();
        for id in ids {
            if let Some(c) = connections.get_mut(id) {
                c.message_count += 1;
                c.last_activity = now;
            }
        }
    }

    /// Called with the connection-set write lock held.
    fn start_background_tasks(self: &Arc<Self>) {
        let mut tasks = self.lock_tasks();
        if tasks.is_some() {
            return;
        }

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let heartbeat = tokio::spawn(heartbeat_loop(Arc::clone(self), shutdown_rx.clone()));
        let drain = tokio::spawn(drain_loop(Arc::clone(self), shutdown_rx));

        self.heartbeat_starts.fetch_add(1, Ordering::SeqCst);
        *tasks = Some(BackgroundTasks {
            shutdown: shutdown_tx,
            heartbeat,
            drain,
        });
        tracing::info!("Heartbeat and broadcast tasks started");
    }

    /// Called with the connection-set write lock held.
    ///
    /// Signals without awaiting: the caller may be one of the tasks.
    fn signal_background_tasks(&self) {
        if let Some(tasks) = self.lock_tasks().take() {
            self.heartbeat_stops.fetch_add(1, Ordering::SeqCst);
            let _ = tasks.shutdown.send(true);
            tracing::info!("Heartbeat and broadcast tasks stopped");
        }
    }
}

impl Default for ConnectionManager {
    fn default() -> Self {
        Self::new()
    }
}

fn stop_requested(changed: Result<(), watch::error::RecvError>, shutdown: &watch::Receiver<bool>) -> bool {
    changed.is_err() || *shutdown.borrow()
}

async fn heartbeat_loop(manager: Arc<ConnectionManager>, mut shutdown: watch::Receiver<bool>) {
    let period = manager.config.heartbeat_interval;
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;

            changed = shutdown.changed() => {
                if stop_requested(changed, &shutdown) {
                    break;
                }
            }

            _ = ticker.tick() => {
                let connections = manager.connection_count();
                if connections > 0 {
                    manager.broadcast(&ServerMessage::heartbeat(connections), &[]).await;
                }
            }
        }
    }
    tracing::debug!("Heartbeat loop exited");
}

async fn drain_loop(manager: Arc<ConnectionManager>, mut shutdown: watch::Receiver<bool>) {
    let receiver = Arc::clone(&manager.queue_rx);
    let mut queue = tokio::select! {
        guard = receiver.lock() => guard,
        _ = shutdown.changed() => return,
    };

    loop {
        tokio::select! {
            biased;

            changed = shutdown.changed() => {
                if stop_requested(changed, &shutdown) {
                    break;
                }
            }

            next = queue.recv() => match next {
                Some((generation, message)) => {
                    if manager.is_stale(generation) {
                        tracing::trace!(message_type = %message.message_type, "Discarding message queued for departed clients");
                        continue;
                    }
                    manager.broadcast(&message, &[]).await;
                }
                None => break,
            },
        }
    }

    let mut discarded = 0usize;
    while let Ok((generation, message)) = queue.try_recv() {
        if manager.is_stale(generation) {
            discarded += 1;
        } else {
            manager.broadcast(&message, &[]).await;
        }
    }
    if discarded > 0 {
        tracing::debug!(discarded, "Cleared broadcast queue");
    }
    tracing::debug!("Broadcast drain loop exited");
}
