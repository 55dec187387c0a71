//! ServiceContainer - Owns and wires every long-lived component.
//!
//! ```text
//!  AccountMonitor ──emit──▶ EventBus ──▶ ClientFanout ──▶ ConnectionManager
//!                              │
//!                              └──────▶ ExternalBridge ──▶ pub/sub backend
//!                                             │
//!  inbound channels ◀─────────────────────────┘──▶ ClientFanout
//! ```
//!
//! Startup order is bus, source, bridge, subscriptions, monitor. Shutdown
//! runs in reverse and awaits every background task. A source or bridge that
//! cannot connect degrades its feature without aborting startup.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use serde::Serialize;

use crate::adapters::events::EventBus;
use crate::adapters::pubsub::{ExternalBridge, ExternalBridgeConfig, REPUBLISHED_EVENT_TYPES};
use crate::adapters::websocket::{
    ClientFanout, ConnectionManager, ConnectionManagerConfig, WebSocketState, CLIENT_EVENT_TYPES,
};
use crate::config::AppConfig;
use crate::ports::{AccountSource, ChannelHandler, CircuitBreakerConfig, EventHandler, PubSubBackend};

use super::monitor::{AccountMonitor, MonitorConfig, MonitorStatus};

/// Operational snapshot served by `GET /health`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HealthStatus {
    pub status: &'static str,
    pub connected_clients: usize,
    pub dispatcher_running: bool,
    pub bridge_connected: bool,
    pub monitor_error_count: u32,
    pub monitor_running: bool,
    pub source_connected: bool,
    pub uptime_secs: u64,
}

impl HealthStatus {
    pub fn is_healthy(&self) -> bool {
        self.status == "healthy"
    }
}

#[derive(Default)]
struct Registrations {
    bus: Vec<(&'static [&'static str], Arc<dyn EventHandler>)>,
    channels: Vec<(String, Arc<dyn ChannelHandler>)>,
}

/// Explicitly owned set of services, shared by `Arc`.
pub struct ServiceContainer {
    bus: Arc<EventBus>,
    connections: Arc<ConnectionManager>,
    bridge: Arc<ExternalBridge>,
    monitor: AccountMonitor,
    source: Arc<dyn AccountSource>,
    fanout: Arc<ClientFanout>,
    inbound_channels: Vec<String>,
    registrations: Mutex<Registrations>,
    started: AtomicBool,
    created_at: Instant,
}

impl ServiceContainer {
    /// Wire every component from configuration. Nothing runs until `start()`.
    pub fn build(
        config: &AppConfig,
        source: Arc<dyn AccountSource>,
        pubsub: Arc<dyn PubSubBackend>,
    ) -> Self {
        let realtime = &config.realtime;

        let bus = Arc::new(EventBus::new());

        let connections = Arc::new(ConnectionManager::with_config(
            ConnectionManagerConfig::default()
                .with_heartbeat_interval(realtime.heartbeat_interval())
                .with_send_timeout(realtime.send_timeout()),
        ));

        let bridge = ExternalBridge::new_shared(
            pubsub,
            ExternalBridgeConfig::default()
                .with_channel_prefix(realtime.channel_prefix.clone())
                .with_publish_timeout(config.redis.timeout())
                .with_breaker(CircuitBreakerConfig::new(
                    config.redis.breaker_failure_threshold,
                    config.redis.breaker_timeout(),
                )),
        );

        let monitor = AccountMonitor::with_config(
            Arc::clone(&source),
            Arc::clone(&bus),
            MonitorConfig::default()
                .with_interval(realtime.monitor_interval())
                .with_max_errors(realtime.monitor_max_errors)
                .with_fetch_timeout(realtime.fetch_timeout()),
        );

        let fanout = ClientFanout::new_shared(Arc::clone(&connections));

        Self {
            bus,
            connections,
            bridge,
            monitor,
            source,
            fanout,
            inbound_channels: realtime.inbound_channels_list(),
            registrations: Mutex::new(Registrations::default()),
            started: AtomicBool::new(false),
            created_at: Instant::now(),
        }
    }

    /// Start every service. Does nothing if already started.
    pub async fn start(&self) {
        if self.started.swap(true, Ordering::SeqCst) {
            return;
        }

        self.bus.start();

        match self.source.connect().await {
            Ok(true) => tracing::info!("Account source connected"),
            Ok(false) => tracing::warn!("Account source rejected the connection"),
            Err(e) => tracing::warn!(error = %e, "Account source unavailable at startup"),
        }

        if !self.bridge.connect().await {
            tracing::warn!("External bus unavailable, running in degraded mode");
        }

        let client_handler = self.fanout.register(&self.bus);
        let bridge_handler = self.bridge.register(&self.bus);

        let mut channels = Vec::new();
        for channel in &self.inbound_channels {
            let handler: Arc<dyn ChannelHandler> = self.fanout.clone();
            if self.bridge.subscribe(channel, Arc::clone(&handler)).await {
                channels.push((channel.clone(), handler));
            }
        }

        {
            let mut registrations = self.registrations.lock().unwrap_or_else(|p| p.into_inner());
            registrations.bus = vec![
                (CLIENT_EVENT_TYPES, client_handler),
                (REPUBLISHED_EVENT_TYPES, bridge_handler),
            ];
            registrations.channels = channels;
        }

        self.monitor.start();
        tracing::info!("Services started");
    }

    /// Stop every service in reverse order. Safe to call when stopped.
    pub async fn stop(&self) {
        if !self.started.swap(false, Ordering::SeqCst) {
            return;
        }

        self.monitor.stop().await;

        let registrations = std::mem::take(
            &mut *self.registrations.lock().unwrap_or_else(|p| p.into_inner()),
        );
        for (channel, handler) in &registrations.channels {
            self.bridge.unsubscribe(channel, Some(handler)).await;
        }
        for (event_types, handler) in &registrations.bus {
            for event_type in event_types.iter() {
                self.bus.unsubscribe(event_type, handler);
            }
        }

        self.bridge.disconnect().await;
        self.bus.stop().await;
        self.connections.shutdown().await;
        self.source.disconnect().await;

        tracing::info!("Services stopped");
    }

    /// Synchronous health snapshot.
    pub fn health_status(&self) -> HealthStatus {
        let dispatcher_running = self.bus.is_running();
        let source_connected = self.monitor.source_connected();

        HealthStatus {
            status: if dispatcher_running && source_connected {
                "healthy"
            } else {
                "degraded"
            },
            connected_clients: self.connections.connection_count(),
            dispatcher_running,
            bridge_connected: self.bridge.is_connected(),
            monitor_error_count: self.monitor.error_count(),
            monitor_running: self.monitor.is_running(),
            source_connected,
            uptime_secs: self.created_at.elapsed().as_secs(),
        }
    }

    pub fn monitor_status(&self) -> MonitorStatus {
        self.monitor.status()
    }

    /// State for the websocket routes.
    pub fn websocket_state(&self) -> WebSocketState {
        WebSocketState::new(Arc::clone(&self.connections), Some(Arc::clone(&self.source)))
    }

    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    pub fn connections(&self) -> &Arc<ConnectionManager> {
        &self.connections
    }

    pub fn bridge(&self) -> &Arc<ExternalBridge> {
        &self.bridge
    }

    pub fn monitor(&self) -> &AccountMonitor {
        &self.monitor
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }
}
