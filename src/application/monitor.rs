//! AccountMonitor - Polls the account source and emits changes onto the bus.
//!
//! Each iteration:
//! 1. Checks source liveness and emits `connection_status` on a transition
//! 2. When live, fetches the account and compares it with the last snapshot
//! 3. Emits `account_update` and replaces the snapshot if anything changed
//!
//! A failed iteration bumps a consecutive error counter; a successful one
//! resets it. When the counter reaches `max_errors` the loop emits
//! `monitor_error` and halts. It stays halted until `start()` is called again.
//!
//! ## Configuration
//!
//! | Setting | Default | Description |
//! |---------|---------|-------------|
//! | `interval` | 1s | Pause between iterations |
//! | `max_errors` | 5 | Consecutive failures before halting |
//! | `fetch_timeout` | 15s | Bound on each call to the source |

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::Serialize;
use serde_json::json;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::adapters::events::EventBus;
use crate::domain::account::AccountSnapshot;
use crate::domain::foundation::event_types;
use crate::ports::{AccountSource, SourceError};

/// Producer name stamped on every event the monitor emits.
pub const MONITOR_SOURCE: &str = "account_monitor";

/// Configuration for the AccountMonitor.
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// Pause between iterations.
    pub interval: Duration,

    /// Consecutive failed iterations before the loop halts.
    pub max_errors: u32,

    /// Bound on each source call.
    pub fetch_timeout: Duration,

    /// How long `stop()` waits for the loop before aborting it.
    pub stop_timeout: Duration,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(1),
            max_errors: 5,
            fetch_timeout: Duration::from_secs(15),
            stop_timeout: Duration::from_secs(1),
        }
    }
}

impl MonitorConfig {
    /// Create config with custom poll interval.
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Create config with custom error threshold.
    pub fn with_max_errors(mut self, max_errors: u32) -> Self {
        self.max_errors = max_errors;
        self
    }

    /// Create config with custom fetch timeout.
    pub fn with_fetch_timeout(mut self, timeout: Duration) -> Self {
        self.fetch_timeout = timeout;
        self
    }
}

/// Why a monitor iteration failed.
#[derive(Debug, Error)]
pub enum MonitorError {
    #[error(transparent)]
    Source(#[from] SourceError),

    #[error("account fetch timed out after {0:?}")]
    Timeout(Duration),

    #[error("account could not be encoded: {0}")]
    Encode(#[from] serde_json::Error),
}

/// What one iteration observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    /// Source not live; nothing fetched.
    Disconnected,
    /// Source live, account unchanged or not reported.
    Unchanged,
    /// Source live and an `account_update` was emitted.
    Updated,
}

/// Point-in-time monitor status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MonitorStatus {
    pub monitoring: bool,
    pub source_connected: bool,
    pub error_count: u32,
    pub max_errors: u32,
    pub has_snapshot: bool,
}

struct MonitorInner {
    source: Arc<dyn AccountSource>,
    bus: Arc<EventBus>,
    config: MonitorConfig,
    snapshot: Mutex<Option<AccountSnapshot>>,
    source_connected: AtomicBool,
    error_count: AtomicU32,
    running: AtomicBool,
}

struct MonitorTask {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

/// Change-detection loop over an [`AccountSource`].
pub struct AccountMonitor {
    inner: Arc<MonitorInner>,
    task: Mutex<Option<MonitorTask>>,
}

impl AccountMonitor {
    /// Create a stopped monitor with default configuration.
    pub fn new(source: Arc<dyn AccountSource>, bus: Arc<EventBus>) -> Self {
        Self::with_config(source, bus, MonitorConfig::default())
    }

    /// Create a stopped monitor with custom configuration.
    pub fn with_config(
        source: Arc<dyn AccountSource>,
        bus: Arc<EventBus>,
        config: MonitorConfig,
    ) -> Self {
        Self {
            inner: Arc::new(MonitorInner {
                source,
                bus,
                config,
                snapshot: Mutex::new(None),
                source_connected: AtomicBool::new(false),
                error_count: AtomicU32::new(0),
                running: AtomicBool::new(false),
            }),
            task: Mutex::new(None),
        }
    }

    /// Spawn the polling loop.
    ///
    /// Does nothing while the loop runs. Restarts a halted loop with the
    /// error counter reset.
    pub fn start(&self) {
        let mut task = self.task.lock().unwrap_or_else(|p| p.into_inner());
        if let Some(existing) = task.as_ref() {
            if !existing.handle.is_finished() {
                tracing::warn!("Account monitor already running");
                return;
            }
        }

        self.inner.error_count.store(0, Ordering::SeqCst);
        self.inner.running.store(true, Ordering::SeqCst);

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(monitor_loop(Arc::clone(&self.inner), shutdown_rx));
        *task = Some(MonitorTask {
            shutdown: shutdown_tx,
            handle,
        });

        tracing::info!(
            interval_ms = self.inner.config.interval.as_millis() as u64,
            max_errors = self.inner.config.max_errors,
            "Account monitor started"
        );
    }

    /// Stop the loop and wait for it to exit. Safe to call when stopped.
    pub async fn stop(&self) {
        let task = self.task.lock().unwrap_or_else(|p| p.into_inner()).take();
        let Some(MonitorTask { shutdown, mut handle }) = task else {
            return;
        };

        let _ = shutdown.send(true);
        if tokio::time::timeout(self.inner.config.stop_timeout, &mut handle)
            .await
            .is_err()
        {
            tracing::warn!("Account monitor did not stop in time, aborting");
            handle.abort();
        }

        self.inner.running.store(false, Ordering::SeqCst);
        tracing::info!("Account monitor stopped");
    }

    /// Run exactly one iteration and update the error counter.
    pub async fn poll_once(&self) -> Result<PollOutcome, MonitorError> {
        self.inner.poll_counted().await
    }

    /// Whether the polling loop is active.
    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }

    /// Consecutive failed iterations.
    pub fn error_count(&self) -> u32 {
        self.inner.error_count.load(Ordering::SeqCst)
    }

    /// Liveness seen by the last iteration.
    pub fn source_connected(&self) -> bool {
        self.inner.source_connected.load(Ordering::SeqCst)
    }

    /// The last stored snapshot, if any.
    pub fn snapshot(&self) -> Option<AccountSnapshot> {
        self.inner
            .snapshot
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
    }

    pub fn status(&self) -> MonitorStatus {
        MonitorStatus {
            monitoring: self.is_running(),
            source_connected: self.source_connected(),
            error_count: self.error_count(),
            max_errors: self.inner.config.max_errors,
            has_snapshot: self.snapshot().is_some(),
        }
    }
}

impl MonitorInner {
    async fn poll_counted(&self) -> Result<PollOutcome, MonitorError> {
        match self.iteration().await {
            Ok(outcome) => {
                self.error_count.store(0, Ordering::SeqCst);
                Ok(outcome)
            }
            Err(e) => {
                let count = self.error_count.fetch_add(1, Ordering::SeqCst) + 1;
                tracing::error!(error = %e, error_count = count, "Account monitor iteration failed");
                Err(e)
            }
        }
    }

    async fn iteration(&self) -> Result<PollOutcome, MonitorError> {
        let live = tokio::time::timeout(self.config.fetch_timeout, self.source.is_connected())
            .await
            .unwrap_or(false);

        self.track_liveness(live);
        if !live {
            return Ok(PollOutcome::Disconnected);
        }

        let account = tokio::time::timeout(self.config.fetch_timeout, self.source.fetch_state())
            .await
            .map_err(|_| MonitorError::Timeout(self.config.fetch_timeout))??;

        let Some(account) = account else {
            return Ok(PollOutcome::Unchanged);
        };

        let snapshot = account.snapshot();
        {
            let mut stored = self.snapshot.lock().unwrap_or_else(|p| p.into_inner());
            if stored.as_ref() == Some(&snapshot) {
                return Ok(PollOutcome::Unchanged);
            }
            *stored = Some(snapshot);
        }

        tracing::debug!(login = account.login, "Account changed, emitting update");
        self.bus.emit(
            event_types::ACCOUNT_UPDATE,
            serde_json::to_value(&account)?,
            Some(MONITOR_SOURCE),
        );
        Ok(PollOutcome::Updated)
    }

    fn track_liveness(&self, live: bool) {
        let was_live = self.source_connected.swap(live, Ordering::SeqCst);
        match (was_live, live) {
            (true, false) => {
                tracing::warn!("Terminal connection lost");
                self.emit_connection_status(false, "Terminal connection lost");
            }
            (false, true) => {
                tracing::info!("Terminal connection restored");
                self.error_count.store(0, Ordering::SeqCst);
                self.emit_connection_status(true, "Terminal connection restored");
            }
            _ => {}
        }
    }

    fn emit_connection_status(&self, connected: bool, message: &str) {
        let status = if connected { "connected" } else { "disconnected" };
        self.bus.emit(
            event_types::CONNECTION_STATUS,
            json!({
                "status": status,
                "connected": connected,
                "message": message,
            }),
            Some(MONITOR_SOURCE),
        );
    }

    fn emit_halted(&self, error_count: u32) {
        self.bus.emit(
            event_types::MONITOR_ERROR,
            json!({
                "error": format!("Monitor stopped due to {} consecutive errors", error_count),
                "error_count": error_count,
            }),
            Some(MONITOR_SOURCE),
        );
    }
}

async fn monitor_loop(inner: Arc<MonitorInner>, mut shutdown: watch::Receiver<bool>) {
    loop {
        let polled = tokio::select! {
            biased;

            _ = shutdown.changed() => break,
            result = inner.poll_counted() => result,
        };

        if polled.is_err() {
            let count = inner.error_count.load(Ordering::SeqCst);
            if count >= inner.config.max_errors {
                tracing::error!(error_count = count, "Too many consecutive errors, account monitor halted");
                inner.emit_halted(count);
                break;
            }
        }

        tokio::select! {
            biased;

            _ = shutdown.changed() => break,
            _ = tokio::time::sleep(inner.config.interval) => {}
        }
    }

    inner.running.store(false, Ordering::SeqCst);
    tracing::debug!("Account monitor loop exited");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::events::handler_fn;
    use crate::domain::account::{sample_account, AccountInfo};
    use crate::domain::foundation::Event;
    use async_trait::async_trait;
    use std::collections::VecDeque;

    /// Source whose liveness is a flag and whose fetches follow a script.
    /// An exhausted script repeats the last successful account.
    struct ScriptedSource {
        live: AtomicBool,
        script: Mutex<VecDeque<Result<Option<AccountInfo>, SourceError>>>,
        last: Mutex<Option<AccountInfo>>,
        fetches: AtomicU32,
    }

    impl ScriptedSource {
        fn new(live: bool) -> Arc<Self> {
            Arc::new(Self {
                live: AtomicBool::new(live),
                script: Mutex::new(VecDeque::new()),
                last: Mutex::new(None),
                fetches: AtomicU32::new(0),
            })
        }

        fn push(&self, step: Result<Option<AccountInfo>, SourceError>) {
            self.script.lock().unwrap().push_back(step);
        }

        fn set_live(&self, live: bool) {
            self.live.store(live, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl AccountSource for ScriptedSource {
        async fn connect(&self) -> Result<bool, SourceError> {
            Ok(self.live.load(Ordering::SeqCst))
        }

        async fn is_connected(&self) -> bool {
            self.live.load(Ordering::SeqCst)
        }

        async fn fetch_state(&self) -> Result<Option<AccountInfo>, SourceError> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            match self.script.lock().unwrap().pop_front() {
                Some(Ok(Some(account))) => {
                    *self.last.lock().unwrap() = Some(account.clone());
                    Ok(Some(account))
                }
                Some(other) => other,
                None => Ok(self.last.lock().unwrap().clone()),
            }
        }

        async fn disconnect(&self) {
            self.live.store(false, Ordering::SeqCst);
        }
    }

    /// Source that never answers.
    struct HangingSource;

    #[async_trait]
    impl AccountSource for HangingSource {
        async fn connect(&self) -> Result<bool, SourceError> {
            Ok(true)
        }
        async fn is_connected(&self) -> bool {
            true
        }
        async fn fetch_state(&self) -> Result<Option<AccountInfo>, SourceError> {
            std::future::pending().await
        }
        async fn disconnect(&self) {}
    }

    fn recorded_bus() -> (Arc<EventBus>, Arc<Mutex<Vec<Event>>>) {
        let bus = Arc::new(EventBus::new());
        let log = Arc::new(Mutex::new(Vec::new()));
        let sink = log.clone();
        bus.subscribe_all(
            &[
                event_types::ACCOUNT_UPDATE,
                event_types::CONNECTION_STATUS,
                event_types::MONITOR_ERROR,
            ],
            handler_fn("recorder", move |event| {
                sink.lock().unwrap().push(event);
                async { Ok(()) }
            }),
        );
        bus.start();
        (bus, log)
    }

    async fn settle(log: &Arc<Mutex<Vec<Event>>>, expected: usize) -> Vec<Event> {
        for _ in 0..200 {
            if log.lock().unwrap().len() >= expected {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        log.lock().unwrap().clone()
    }

    fn types(events: &[Event]) -> Vec<String> {
        events.iter().map(|e| e.event_type.clone()).collect()
    }

    #[tokio::test]
    async fn unchanged_account_emits_one_update() {
        let source = ScriptedSource::new(true);
        source.push(Ok(Some(sample_account())));
        let (bus, log) = recorded_bus();
        let monitor = AccountMonitor::new(source.clone(), bus.clone());

        assert_eq!(monitor.poll_once().await.unwrap(), PollOutcome::Updated);
        assert_eq!(monitor.poll_once().await.unwrap(), PollOutcome::Unchanged);
        assert_eq!(monitor.poll_once().await.unwrap(), PollOutcome::Unchanged);

        let events = settle(&log, 2).await;
        bus.stop().await;

        assert_eq!(
            types(&events),
            vec![event_types::CONNECTION_STATUS, event_types::ACCOUNT_UPDATE]
        );
        assert_eq!(events[1].source.as_deref(), Some(MONITOR_SOURCE));
        assert_eq!(events[1].payload["login"], 5_001_234);
    }

    #[tokio::test]
    async fn each_change_emits_once_and_replaces_snapshot() {
        let source = ScriptedSource::new(true);
        let first = sample_account();
        let mut second = sample_account();
        second.balance += 250.0;
        source.push(Ok(Some(first.clone())));
        source.push(Ok(Some(first)));
        source.push(Ok(Some(second.clone())));

        let (bus, log) = recorded_bus();
        let monitor = AccountMonitor::new(source, bus.clone());
        for _ in 0..4 {
            monitor.poll_once().await.unwrap();
        }

        let events = settle(&log, 3).await;
        bus.stop().await;

        let updates: Vec<_> = events
            .iter()
            .filter(|e| e.is(event_types::ACCOUNT_UPDATE))
            .collect();
        assert_eq!(updates.len(), 2);
        assert_eq!(monitor.snapshot(), Some(second.snapshot()));
    }

    #[tokio::test]
    async fn refreshed_timestamp_is_not_a_change() {
        let source = ScriptedSource::new(true);
        source.push(Ok(Some(sample_account().touched())));
        source.push(Ok(Some(sample_account().touched())));
        let (bus, _log) = recorded_bus();
        let monitor = AccountMonitor::new(source, bus.clone());

        assert_eq!(monitor.poll_once().await.unwrap(), PollOutcome::Updated);
        assert_eq!(monitor.poll_once().await.unwrap(), PollOutcome::Unchanged);
        bus.stop().await;
    }

    #[tokio::test]
    async fn connection_status_once_per_transition() {
        let source = ScriptedSource::new(false);
        let (bus, log) = recorded_bus();
        let monitor = AccountMonitor::new(source.clone(), bus.clone());

        assert_eq!(monitor.poll_once().await.unwrap(), PollOutcome::Disconnected);
        source.set_live(true);
        monitor.poll_once().await.unwrap();
        monitor.poll_once().await.unwrap();
        source.set_live(false);
        monitor.poll_once().await.unwrap();
        monitor.poll_once().await.unwrap();

        let events = settle(&log, 2).await;
        bus.stop().await;

        let statuses: Vec<_> = events
            .iter()
            .filter(|e| e.is(event_types::CONNECTION_STATUS))
            .map(|e| e.payload.clone())
            .collect();
        assert_eq!(statuses.len(), 2);
        assert_eq!(statuses[0]["status"], "connected");
        assert_eq!(statuses[0]["connected"], true);
        assert_eq!(statuses[1]["status"], "disconnected");
        assert_eq!(statuses[1]["message"], "Terminal connection lost");
        assert!(!monitor.source_connected());
    }

    #[tokio::test]
    async fn disconnected_source_is_not_fetched() {
        let source = ScriptedSource::new(false);
        let (bus, _log) = recorded_bus();
        let monitor = AccountMonitor::new(source.clone(), bus.clone());

        monitor.poll_once().await.unwrap();
        bus.stop().await;

        assert_eq!(source.fetches.load(Ordering::SeqCst), 0);
        assert_eq!(monitor.error_count(), 0);
    }

    #[tokio::test]
    async fn errors_count_and_success_resets() {
        let source = ScriptedSource::new(true);
        source.push(Ok(Some(sample_account())));
        source.push(Err(SourceError::Request("503".into())));
        source.push(Err(SourceError::Request("503".into())));
        let (bus, _log) = recorded_bus();
        let monitor = AccountMonitor::new(source, bus.clone());

        monitor.poll_once().await.unwrap();
        assert!(monitor.poll_once().await.is_err());
        assert!(monitor.poll_once().await.is_err());
        assert_eq!(monitor.error_count(), 2);

        monitor.poll_once().await.unwrap();
        assert_eq!(monitor.error_count(), 0);
        bus.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn fetch_timeout_is_an_error() {
        let (bus, _log) = recorded_bus();
        let monitor = AccountMonitor::with_config(
            Arc::new(HangingSource),
            bus.clone(),
            MonitorConfig::default().with_fetch_timeout(Duration::from_millis(50)),
        );

        let err = monitor.poll_once().await.unwrap_err();
        assert!(matches!(err, MonitorError::Timeout(_)));
        assert_eq!(monitor.error_count(), 1);
        bus.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn halts_after_max_errors_and_restarts() {
        let source = ScriptedSource::new(true);
        for _ in 0..3 {
            source.push(Err(SourceError::InvalidResponse("garbage".into())));
        }
        source.push(Ok(Some(sample_account())));

        let (bus, log) = recorded_bus();
        let monitor = AccountMonitor::with_config(
            source.clone(),
            bus.clone(),
            MonitorConfig::default()
                .with_interval(Duration::from_millis(100))
                .with_max_errors(3),
        );

        monitor.start();
        for _ in 0..50 {
            if !monitor.is_running() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        assert!(!monitor.is_running());
        assert_eq!(monitor.error_count(), 3);
        assert_eq!(source.fetches.load(Ordering::SeqCst), 3);

        let events = settle(&log, 2).await;
        let halted = events
            .iter()
            .find(|e| e.is(event_types::MONITOR_ERROR))
            .expect("monitor_error emitted");
        assert_eq!(halted.payload["error_count"], 3);
        assert_eq!(
            halted.payload["error"],
            "Monitor stopped due to 3 consecutive errors"
        );

        // Halted loop stays halted
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(source.fetches.load(Ordering::SeqCst), 3);

        monitor.start();
        assert_eq!(monitor.error_count(), 0);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(monitor.status().has_snapshot);

        monitor.stop().await;
        bus.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn start_and_stop_are_idempotent() {
        let source = ScriptedSource::new(true);
        source.push(Ok(Some(sample_account())));
        let (bus, _log) = recorded_bus();
        let monitor = AccountMonitor::new(source, bus.clone());

        monitor.stop().await;
        monitor.start();
        monitor.start();
        assert!(monitor.is_running());

        tokio::time::sleep(Duration::from_millis(10)).await;
        monitor.stop().await;
        monitor.stop().await;
        assert!(!monitor.is_running());

        let status = monitor.status();
        assert!(!status.monitoring);
        assert!(status.source_connected);
        assert_eq!(status.max_errors, 5);
        assert!(status.has_snapshot);
        bus.stop().await;
    }
}
