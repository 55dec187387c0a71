//! EventBus - In-process publish/subscribe with a single ordered queue.
//!
//! Producers call [`EventBus::emit`], which stamps an [`Event`] and pushes it
//! onto an unbounded FIFO queue without waiting. One background dispatch task
//! drains the queue and invokes every handler registered for the event's
//! type, one after another, in subscription order.
//!
//! ## Delivery rules
//!
//! - Handlers are looked up when the event is dequeued, so a subscription
//!   added after that point does not see the event.
//! - A handler that returns an error or panics is logged and skipped; the
//!   remaining handlers and later events are unaffected.
//! - Events emitted before `start()` (or while stopped) wait in the queue.
//!
//! ## Lifecycle
//!
//! `start()` and `stop()` are idempotent. `stop()` signals the dispatch task
//! and waits up to `stop_timeout` for an in-flight delivery before aborting it.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use futures::FutureExt;
use serde_json::Value as JsonValue;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::domain::foundation::Event;
use crate::ports::EventHandler;

type HandlerMap = HashMap<String, Vec<Arc<dyn EventHandler>>>;

/// Configuration for the EventBus.
#[derive(Debug, Clone)]
pub struct EventBusConfig {
    /// How long `stop()` waits for the dispatch task before aborting it.
    pub stop_timeout: Duration,
}

impl Default for EventBusConfig {
    fn default() -> Self {
        Self {
            stop_timeout: Duration::from_secs(1),
        }
    }
}

impl EventBusConfig {
    /// Create config with custom stop timeout.
    pub fn with_stop_timeout(mut self, timeout: Duration) -> Self {
        self.stop_timeout = timeout;
        self
    }
}

struct DispatchTask {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

/// Process-wide event bus, shared by `Arc`.
///
/// # Example
///
/// ```ignore
/// let bus = Arc::new(EventBus::new());
/// bus.subscribe(event_types::ACCOUNT_UPDATE, fanout);
/// bus.start();
///
/// bus.emit(event_types::ACCOUNT_UPDATE, json!({"balance": 100.0}), Some("monitor_service"));
/// ```
pub struct EventBus {
    handlers: Arc<RwLock<HandlerMap>>,
    sender: mpsc::UnboundedSender<Event>,
    receiver: Arc<tokio::sync::Mutex<mpsc::UnboundedReceiver<Event>>>,
    task: Mutex<Option<DispatchTask>>,
    running: Arc<AtomicBool>,
    config: EventBusConfig,
}

impl EventBus {
    /// Creates a stopped bus with default configuration.
    pub fn new() -> Self {
        Self::with_config(EventBusConfig::default())
    }

    /// Creates a stopped bus with custom configuration.
    pub fn with_config(config: EventBusConfig) -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        Self {
            handlers: Arc::new(RwLock::new(HashMap::new())),
            sender,
            receiver: Arc::new(tokio::sync::Mutex::new(receiver)),
            task: Mutex::new(None),
            running: Arc::new(AtomicBool::new(false)),
            config,
        }
    }

    /// Registers `handler` for `event_type`.
    ///
    /// Registering the same handler twice makes it run twice per event.
    pub fn subscribe(&self, event_type: &str, handler: Arc<dyn EventHandler>) {
        let mut handlers = self.handlers.write().unwrap_or_else(|p| p.into_inner());
        handlers
            .entry(event_type.to_string())
            .or_default()
            .push(handler);
        tracing::debug!(event_type, "Subscribed handler");
    }

    /// Registers the same handler for several event types.
    pub fn subscribe_all(&self, event_types: &[&str], handler: Arc<dyn EventHandler>) {
        for event_type in event_types {
            self.subscribe(event_type, Arc::clone(&handler));
        }
    }

    /// Removes one registration of `handler` for `event_type`.
    ///
    /// Identity is the `Arc` allocation. Unknown handlers are ignored.
    pub fn unsubscribe(&self, event_type: &str, handler: &Arc<dyn EventHandler>) {
        let mut handlers = self.handlers.write().unwrap_or_else(|p| p.into_inner());
        if let Some(list) = handlers.get_mut(event_type) {
            if let Some(pos) = list.iter().position(|h| same_handler(h, handler)) {
                list.remove(pos);
                tracing::debug!(event_type, "Unsubscribed handler");
            }
            if list.is_empty() {
                handlers.remove(event_type);
            }
        }
    }

    /// Stamps an event with the current time and queues it.
    ///
    /// Never waits on handlers.
    pub fn emit(&self, event_type: &str, payload: JsonValue, source: Option<&str>) {
        let event = Event::new(event_type, payload).with_optional_source(source.map(String::from));
        self.publish(event);
    }

    /// Queues an already built event.
    pub fn publish(&self, event: Event) {
        tracing::trace!(event_type = %event.event_type, event_id = %event.event_id, "Event queued");
        if let Err(e) = self.sender.send(event) {
            // Receiver lives as long as the bus, so this only happens mid-drop.
            tracing::warn!(event_type = %e.0.event_type, "Event queue closed, dropping event");
        }
    }

    /// Number of registrations for `event_type`.
    pub fn subscriber_count(&self, event_type: &str) -> usize {
        self.handlers
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .get(event_type)
            .map(Vec::len)
            .unwrap_or(0)
    }

    /// Whether the dispatch task is running.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Spawns the dispatch task. Does nothing if already running.
    pub fn start(&self) {
        let mut task = self.task.lock().unwrap_or_else(|p| p.into_inner());
        if task.is_some() {
            return;
        }

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(dispatch_loop(
            Arc::clone(&self.handlers),
            Arc::clone(&self.receiver),
            Arc::clone(&self.running),
            shutdown_rx,
        ));

        self.running.store(true, Ordering::SeqCst);
        *task = Some(DispatchTask {
            shutdown: shutdown_tx,
            handle,
        });
        tracing::info!("Event bus started");
    }

    /// Stops the dispatch task. Safe to call when not running.
    pub async fn stop(&self) {
        let task = self.task.lock().unwrap_or_else(|p| p.into_inner()).take();
        let Some(DispatchTask { shutdown, mut handle }) = task else {
            return;
        };

        let _ = shutdown.send(true);
        if tokio::time::timeout(self.config.stop_timeout, &mut handle)
            .await
            .is_err()
        {
            tracing::warn!("Event dispatch task did not stop in time, aborting");
            handle.abort();
        }

        self.running.store(false, Ordering::SeqCst);
        tracing::info!("Event bus stopped");
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

fn same_handler(a: &Arc<dyn EventHandler>, b: &Arc<dyn EventHandler>) -> bool {
    Arc::as_ptr(a) as *const () == Arc::as_ptr(b) as *const ()
}

async fn dispatch_loop(
    handlers: Arc<RwLock<HandlerMap>>,
    receiver: Arc<tokio::sync::Mutex<mpsc::UnboundedReceiver<Event>>>,
    running: Arc<AtomicBool>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut receiver = receiver.lock().await;

    loop {
        tokio::select! {
            biased;

            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }

            next = receiver.recv() => match next {
                Some(event) => deliver(&handlers, event).await,
                None => break,
            },
        }
    }

    running.store(false, Ordering::SeqCst);
    tracing::debug!("Event dispatch loop exited");
}

async fn deliver(handlers: &RwLock<HandlerMap>, event: Event) {
    // Clone handlers to release lock before await points
    let targets: Vec<Arc<dyn EventHandler>> = handlers
        .read()
        .unwrap_or_else(|p| p.into_inner())
        .get(&event.event_type)
        .cloned()
        .unwrap_or_default();

    if targets.is_empty() {
        tracing::trace!(event_type = %event.event_type, "No subscribers for event");
        return;
    }

    for handler in targets {
        match AssertUnwindSafe(handler.handle(&event)).catch_unwind().await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                tracing::error!(
                    handler = handler.name(),
                    event_type = %event.event_type,
                    error = %e,
                    "Event handler failed"
                );
            }
            Err(_) => {
                tracing::error!(
                    handler = handler.name(),
                    event_type = %event.event_type,
                    "Event handler panicked"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::events::handler_fn;
    use crate::domain::foundation::DomainError;
    use async_trait::async_trait;
    use proptest::prelude::*;
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;

    /// Records `(tag, event_type)` for each invocation.
    struct RecordingHandler {
        tag: usize,
        log: Arc<Mutex<Vec<(usize, String)>>>,
    }

    #[async_trait]
    impl EventHandler for RecordingHandler {
        async fn handle(&self, event: &Event) -> Result<(), DomainError> {
            self.log
                .lock()
                .unwrap()
                .push((self.tag, event.event_type.clone()));
            Ok(())
        }
        fn name(&self) -> &'static str {
            "RecordingHandler"
        }
    }

    struct FailingHandler;

    #[async_trait]
    impl EventHandler for FailingHandler {
        async fn handle(&self, _: &Event) -> Result<(), DomainError> {
            Err(DomainError::internal("Handler failed"))
        }
        fn name(&self) -> &'static str {
            "FailingHandler"
        }
    }

    struct PanickingHandler;

    #[async_trait]
    impl EventHandler for PanickingHandler {
        async fn handle(&self, _: &Event) -> Result<(), DomainError> {
            panic!("handler blew up");
        }
        fn name(&self) -> &'static str {
            "PanickingHandler"
        }
    }

    fn counting(counter: &Arc<AtomicUsize>) -> Arc<dyn EventHandler> {
        let counter = counter.clone();
        handler_fn("counting", move |_event| {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Ok(()) }
        })
    }

    async fn wait_for(counter: &AtomicUsize, expected: usize) {
        for _ in 0..200 {
            if counter.load(Ordering::SeqCst) >= expected {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    async fn wait_for_len(log: &Arc<Mutex<Vec<(usize, String)>>>, expected: usize) {
        for _ in 0..200 {
            if log.lock().unwrap().len() >= expected {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    #[tokio::test]
    async fn delivers_in_subscription_order() {
        let bus = EventBus::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        for tag in 0..3 {
            bus.subscribe(
                "account_update",
                Arc::new(RecordingHandler { tag, log: log.clone() }),
            );
        }

        bus.start();
        bus.emit("account_update", json!({}), None);
        wait_for_len(&log, 3).await;
        bus.stop().await;

        let tags: Vec<usize> = log.lock().unwrap().iter().map(|(t, _)| *t).collect();
        assert_eq!(tags, vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn only_matching_type_is_delivered() {
        let bus = EventBus::new();
        let counter = Arc::new(AtomicUsize::new(0));
        bus.subscribe_all(&["type.a", "type.b"], counting(&counter));

        bus.start();
        bus.emit("type.a", json!({}), None);
        bus.emit("type.b", json!({}), None);
        bus.emit("type.c", json!({}), None);
        wait_for(&counter, 2).await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        bus.stop().await;

        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn failing_and_panicking_handlers_are_isolated() {
        let bus = EventBus::new();
        let counter = Arc::new(AtomicUsize::new(0));
        bus.subscribe("tick", Arc::new(FailingHandler));
        bus.subscribe("tick", Arc::new(PanickingHandler));
        bus.subscribe("tick", counting(&counter));

        bus.start();
        bus.emit("tick", json!({}), None);
        bus.emit("tick", json!({}), None);
        wait_for(&counter, 2).await;

        assert_eq!(counter.load(Ordering::SeqCst), 2);
        assert!(bus.is_running());
        bus.stop().await;
    }

    #[tokio::test]
    async fn duplicate_subscription_runs_twice_and_unsubscribe_removes_one() {
        let bus = EventBus::new();
        let counter = Arc::new(AtomicUsize::new(0));
        let handler = counting(&counter);
        bus.subscribe("tick", handler.clone());
        bus.subscribe("tick", handler.clone());
        assert_eq!(bus.subscriber_count("tick"), 2);

        bus.start();
        bus.emit("tick", json!({}), None);
        wait_for(&counter, 2).await;
        assert_eq!(counter.load(Ordering::SeqCst), 2);

        bus.unsubscribe("tick", &handler);
        assert_eq!(bus.subscriber_count("tick"), 1);
        bus.emit("tick", json!({}), None);
        wait_for(&counter, 3).await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        bus.stop().await;

        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn unsubscribe_unknown_handler_is_noop() {
        let bus = EventBus::new();
        let counter = Arc::new(AtomicUsize::new(0));
        bus.subscribe("tick", counting(&counter));

        bus.unsubscribe("tick", &counting(&counter));
        bus.unsubscribe("other", &counting(&counter));

        assert_eq!(bus.subscriber_count("tick"), 1);
    }

    #[tokio::test]
    async fn events_emitted_before_start_are_delivered_after_start() {
        let bus = EventBus::new();
        let counter = Arc::new(AtomicUsize::new(0));
        bus.subscribe("tick", counting(&counter));

        bus.emit("tick", json!({}), None);
        assert_eq!(counter.load(Ordering::SeqCst), 0);

        bus.start();
        wait_for(&counter, 1).await;
        bus.stop().await;

        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn stop_is_idempotent_and_safe_before_start() {
        let bus = EventBus::new();
        bus.stop().await;
        assert!(!bus.is_running());

        bus.start();
        bus.start();
        assert!(bus.is_running());

        bus.stop().await;
        bus.stop().await;
        assert!(!bus.is_running());

        // restart picks the queue back up
        let counter = Arc::new(AtomicUsize::new(0));
        bus.subscribe("tick", counting(&counter));
        bus.start();
        bus.emit("tick", json!({}), None);
        wait_for(&counter, 1).await;
        bus.stop().await;
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn stop_abandons_stuck_handler_within_timeout() {
        let bus = EventBus::with_config(
            EventBusConfig::default().with_stop_timeout(Duration::from_millis(50)),
        );
        let started = Arc::new(AtomicUsize::new(0));
        let flag = started.clone();
        bus.subscribe(
            "slow",
            handler_fn("slow", move |_event| {
                flag.fetch_add(1, Ordering::SeqCst);
                async {
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                    Ok(())
                }
            }),
        );

        bus.start();
        bus.emit("slow", json!({}), None);
        wait_for(&started, 1).await;

        let begun = std::time::Instant::now();
        bus.stop().await;
        assert!(begun.elapsed() < Duration::from_secs(5));
        assert!(!bus.is_running());
    }

    #[tokio::test]
    async fn emit_sets_source_and_type() {
        let bus = EventBus::new();
        let seen = Arc::new(Mutex::new(None));
        let slot = seen.clone();
        bus.subscribe(
            "account_update",
            handler_fn("capture", move |event| {
                *slot.lock().unwrap() = Some(event);
                async { Ok(()) }
            }),
        );

        bus.start();
        bus.emit("account_update", json!({"equity": 1.0}), Some("monitor_service"));
        for _ in 0..200 {
            if seen.lock().unwrap().is_some() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        bus.stop().await;

        let event = seen.lock().unwrap().clone().unwrap();
        assert_eq!(event.event_type, "account_update");
        assert_eq!(event.source.as_deref(), Some("monitor_service"));
        assert_eq!(event.payload["equity"], 1.0);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        #[test]
        fn every_subscriber_sees_every_event_once_in_order(
            subscribers in 1usize..6,
            events in 1usize..20,
        ) {
            let runtime = tokio::runtime::Builder::new_multi_thread()
                .worker_threads(2)
                .enable_all()
                .build()
                .unwrap();

            let log = runtime.block_on(async {
                let bus = EventBus::new();
                let log = Arc::new(Mutex::new(Vec::new()));
                for tag in 0..subscribers {
                    bus.subscribe("tick", Arc::new(RecordingHandler { tag, log: log.clone() }));
                }

                bus.start();
                for _ in 0..events {
                    bus.emit("tick", json!({}), None);
                }
                wait_for_len(&log, subscribers * events).await;
                bus.stop().await;

                let entries = log.lock().unwrap().clone();
                entries
            });

            prop_assert_eq!(log.len(), subscribers * events);
            for (i, (tag, _)) in log.iter().enumerate() {
                prop_assert_eq!(*tag, i % subscribers);
            }
        }
    }
}
