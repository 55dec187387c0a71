//! HTTP terminal source - AccountSource over a terminal gateway.
//!
//! The gateway fronts the trading terminal with a small JSON API:
//!
//! | Method | Path          | Body / Response                               |
//! |--------|---------------|-----------------------------------------------|
//! | POST   | `/connect`    | `{login, password, server}` → `{connected, message}` |
//! | GET    | `/terminal`   | terminal info object, or `null` when offline  |
//! | GET    | `/account`    | account object, or `null` when unavailable    |
//! | POST   | `/disconnect` | empty                                         |
//!
//! Connect, reconnect and disconnect are serialized behind a single async
//! lock so two callers never log in concurrently.
//!
//! Once `connect()` has been called the source keeps itself connected: a
//! liveness check on a lost connection logs in again after
//! `reconnect_delay`. At most `max_reconnect_attempts` failed logins are
//! made in a row; after that the source waits out the breaker recovery
//! timeout before trying again. `disconnect()` turns reconnection off.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Mutex as StdMutex, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tokio::sync::{Mutex, MutexGuard};
use tokio::time::Instant;

use crate::adapters::resilience::{guarded, InMemoryCircuitBreaker, ResilienceError};
use crate::config::TerminalConfig;
use crate::domain::account::AccountInfo;
use crate::ports::{AccountSource, CircuitBreaker, CircuitBreakerConfig, CircuitState, SourceError};

/// Configuration for the HTTP terminal source.
#[derive(Debug, Clone)]
pub struct TerminalSourceConfig {
    /// Gateway base URL (no trailing slash).
    pub gateway_url: String,
    pub login: i64,
    password: SecretString,
    pub server: String,
    /// Upper bound for every gateway request.
    pub request_timeout: Duration,
    /// Failed logins in a row before pausing for the breaker timeout.
    pub max_reconnect_attempts: u32,
    /// Pause before each automatic reconnect.
    pub reconnect_delay: Duration,
    pub breaker: CircuitBreakerConfig,
}

impl TerminalSourceConfig {
    /// Creates a configuration with default limits.
    pub fn new(
        gateway_url: impl Into<String>,
        login: i64,
        password: impl Into<String>,
        server: impl Into<String>,
    ) -> Self {
        Self {
            gateway_url: gateway_url.into().trim_end_matches('/').to_string(),
            login,
            password: SecretString::new(password.into()),
            server: server.into(),
            request_timeout: Duration::from_secs(10),
            max_reconnect_attempts: 3,
            reconnect_delay: Duration::from_secs(2),
            breaker: CircuitBreakerConfig::for_terminal(),
        }
    }

    /// Sets the request timeout.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Sets the reconnect limit.
    pub fn with_max_reconnect_attempts(mut self, attempts: u32) -> Self {
        self.max_reconnect_attempts = attempts;
        self
    }

    /// Sets the pause before each automatic reconnect.
    pub fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }

    /// Sets the breaker thresholds.
    pub fn with_breaker(mut self, breaker: CircuitBreakerConfig) -> Self {
        self.breaker = breaker;
        self
    }
}

impl From<&TerminalConfig> for TerminalSourceConfig {
    fn from(config: &TerminalConfig) -> Self {
        Self {
            gateway_url: config.gateway_url.trim_end_matches('/').to_string(),
            login: config.login,
            password: config.password.clone(),
            server: config.server.clone(),
            request_timeout: config.request_timeout(),
            max_reconnect_attempts: config.max_reconnect_attempts,
            reconnect_delay: config.reconnect_delay(),
            breaker: CircuitBreakerConfig::new(
                config.breaker_failure_threshold,
                config.breaker_timeout(),
            ),
        }
    }
}

#[derive(Serialize)]
struct ConnectRequest<'a> {
    login: i64,
    password: &'a str,
    server: &'a str,
}

#[derive(Deserialize)]
struct ConnectResponse {
    connected: bool,
    #[serde(default)]
    message: String,
}

/// AccountSource backed by an HTTP terminal gateway.
pub struct HttpTerminalSource {
    config: TerminalSourceConfig,
    client: Client,
    connect_lock: Mutex<()>,
    connected: AtomicBool,
    auto_reconnect: AtomicBool,
    attempts: AtomicU32,
    last_attempt: StdMutex<Option<Instant>>,
    last_account: RwLock<Option<AccountInfo>>,
    breaker: InMemoryCircuitBreaker,
}

impl HttpTerminalSource {
    /// Creates a disconnected source.
    pub fn new(config: TerminalSourceConfig) -> Result<Self, SourceError> {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| SourceError::Request(format!("Failed to create HTTP client: {}", e)))?;
        let breaker = InMemoryCircuitBreaker::new("terminal", config.breaker.clone());

        Ok(Self {
            config,
            client,
            connect_lock: Mutex::new(()),
            connected: AtomicBool::new(false),
            auto_reconnect: AtomicBool::new(false),
            attempts: AtomicU32::new(0),
            last_attempt: StdMutex::new(None),
            last_account: RwLock::new(None),
            breaker,
        })
    }

    /// Failed connects since the last successful one.
    pub fn connection_attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }

    /// State of the terminal circuit breaker.
    pub fn breaker_state(&self) -> CircuitState {
        self.breaker.state()
    }

    /// Last account value successfully read.
    pub fn last_account(&self) -> Option<AccountInfo> {
        self.last_account
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.gateway_url, path)
    }

    fn map_reqwest(&self, e: reqwest::Error) -> SourceError {
        if e.is_timeout() {
            SourceError::Timeout
        } else if e.is_connect() {
            SourceError::NotConnected(format!("Connection failed: {}", e))
        } else if e.is_decode() {
            SourceError::InvalidResponse(e.to_string())
        } else {
            SourceError::Request(e.to_string())
        }
    }

    /// GET `path` and decode the body, treating `null`/404 as `None`.
    async fn get_optional<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
    ) -> Result<Option<T>, SourceError> {
        let response = self
            .client
            .get(self.url(path))
            .send()
            .await
            .map_err(|e| self.map_reqwest(e))?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SourceError::Request(format!("Status {}: {}", status, body)));
        }

        let body: JsonValue = response.json().await.map_err(|e| self.map_reqwest(e))?;
        if body.is_null() {
            return Ok(None);
        }
        serde_json::from_value(body)
            .map(Some)
            .map_err(|e| SourceError::InvalidResponse(e.to_string()))
    }

    async fn login(&self) -> Result<ConnectResponse, SourceError> {
        let request = ConnectRequest {
            login: self.config.login,
            password: self.config.password.expose_secret(),
            server: &self.config.server,
        };

        let response = self
            .client
            .post(self.url("/connect"))
            .json(&request)
            .send()
            .await
            .map_err(|e| self.map_reqwest(e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SourceError::Request(format!("Status {}: {}", status, body)));
        }

        response.json().await.map_err(|e| self.map_reqwest(e))
    }

    fn mark_lost(&self, reason: &str) {
        if self.connected.swap(false, Ordering::SeqCst) {
            tracing::warn!(reason, "Terminal connection lost");
        }
    }

    /// Ask the gateway whether the terminal is up, marking the connection lost if not.
    async fn check_terminal(&self) -> bool {
        match guarded(&self.breaker, || self.get_optional::<JsonValue>("/terminal")).await {
            Ok(Some(_)) => true,
            Ok(None) => {
                self.mark_lost("terminal info unavailable");
                false
            }
            Err(e) => {
                self.mark_lost(&unwrap_breaker(e).to_string());
                false
            }
        }
    }

    /// Whether another login may be made, refilling the budget once the
    /// breaker recovery timeout has passed since the last attempt.
    fn attempt_allowed(&self) -> bool {
        let attempts = self.attempts.load(Ordering::SeqCst);
        if attempts < self.config.max_reconnect_attempts {
            return true;
        }

        let last_attempt = *self.last_attempt.lock().unwrap_or_else(|p| p.into_inner());
        let cooled_down = last_attempt
            .map(|at| at.elapsed() > self.config.breaker.recovery_timeout)
            .unwrap_or(true);
        if cooled_down {
            tracing::info!(attempts, "Reconnect budget restored");
            self.attempts.store(0, Ordering::SeqCst);
        }
        cooled_down
    }

    fn attempts_exhausted(&self) -> SourceError {
        SourceError::NotConnected(format!(
            "Max reconnection attempts ({}) reached",
            self.config.max_reconnect_attempts
        ))
    }

    /// Log in. The caller holds `connect_lock`.
    async fn login_locked(&self, _lock: &MutexGuard<'_, ()>) -> Result<bool, SourceError> {
        *self.last_attempt.lock().unwrap_or_else(|p| p.into_inner()) = Some(Instant::now());

        match guarded(&self.breaker, || self.login()).await {
            Ok(response) if response.connected => {
                self.connected.store(true, Ordering::SeqCst);
                self.attempts.store(0, Ordering::SeqCst);
                tracing::info!(login = self.config.login, server = %self.config.server, "Connected to terminal");
                Ok(true)
            }
            Ok(response) => {
                self.attempts.fetch_add(1, Ordering::SeqCst);
                tracing::error!(message = %response.message, "Terminal login rejected");
                Ok(false)
            }
            Err(ResilienceError::CircuitOpen) => {
                tracing::debug!("Terminal breaker open, login skipped");
                Err(SourceError::CircuitOpen)
            }
            Err(e) => {
                self.attempts.fetch_add(1, Ordering::SeqCst);
                let e = unwrap_breaker(e);
                tracing::error!(error = %e, "Terminal connect failed");
                Err(e)
            }
        }
    }

    /// Log in again after `reconnect_delay`.
    ///
    /// Returns `Ok(true)` without a new login if another caller reconnected
    /// first.
    pub async fn reconnect(&self) -> Result<bool, SourceError> {
        let lock = self.connect_lock.lock().await;

        if self.connected.load(Ordering::SeqCst) {
            return Ok(true);
        }
        if !self.attempt_allowed() {
            tracing::debug!("Reconnect skipped, attempt budget spent");
            return Err(self.attempts_exhausted());
        }

        tracing::info!(
            attempt = self.attempts.load(Ordering::SeqCst) + 1,
            max_attempts = self.config.max_reconnect_attempts,
            "Attempting to reconnect to terminal"
        );
        tokio::time::sleep(self.config.reconnect_delay).await;
        self.login_locked(&lock).await
    }
}

fn unwrap_breaker(e: ResilienceError<SourceError>) -> SourceError {
    match e {
        ResilienceError::CircuitOpen => SourceError::CircuitOpen,
        ResilienceError::Timeout(_) => SourceError::Timeout,
        ResilienceError::Inner(e) => e,
    }
}

#[async_trait]
impl AccountSource for HttpTerminalSource {
    async fn connect(&self) -> Result<bool, SourceError> {
        let lock = self.connect_lock.lock().await;
        self.auto_reconnect.store(true, Ordering::SeqCst);

        if self.connected.load(Ordering::SeqCst) && self.check_terminal().await {
            return Ok(true);
        }

        if !self.attempt_allowed() {
            let e = self.attempts_exhausted();
            tracing::error!(error = %e, "Terminal connect refused");
            return Err(e);
        }

        self.login_locked(&lock).await
    }

    async fn is_connected(&self) -> bool {
        if self.connected.load(Ordering::SeqCst) {
            return self.check_terminal().await;
        }
        if !self.auto_reconnect.load(Ordering::SeqCst) {
            return false;
        }
        matches!(self.reconnect().await, Ok(true))
    }

    async fn fetch_state(&self) -> Result<Option<AccountInfo>, SourceError> {
        if !self.connected.load(Ordering::SeqCst) {
            tracing::warn!("Cannot read account: terminal not connected");
            return Ok(self.last_account());
        }

        let account = guarded(&self.breaker, || self.get_optional::<AccountInfo>("/account"))
            .await
            .map_err(unwrap_breaker)?;

        match account {
            Some(account) => {
                if let Err(e) = account.validate() {
                    tracing::warn!(error = %e, "Terminal reported inconsistent account state");
                }
                let account = account.touched();
                *self.last_account.write().unwrap_or_else(|p| p.into_inner()) = Some(account.clone());
                Ok(Some(account))
            }
            None => {
                tracing::debug!("Terminal returned no account data, using last known value");
                Ok(self.last_account())
            }
        }
    }

    async fn disconnect(&self) {
        let _guard = self.connect_lock.lock().await;
        self.auto_reconnect.store(false, Ordering::SeqCst);

        if !self.connected.swap(false, Ordering::SeqCst) {
            return;
        }

        if let Err(e) = self.client.post(self.url("/disconnect")).send().await {
            tracing::error!(error = %e, "Error during terminal disconnect");
        }
        *self.last_account.write().unwrap_or_else(|p| p.into_inner()) = None;
        tracing::info!("Disconnected from terminal");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::account::sample_account;
    use mockito::{Matcher, Server, ServerGuard};

    fn config(server: &ServerGuard) -> TerminalSourceConfig {
        TerminalSourceConfig::new(server.url(), 5_001_234, "hunter2", "Broker-Demo")
            .with_reconnect_delay(Duration::ZERO)
    }

    async fn source(server: &ServerGuard) -> HttpTerminalSource {
        HttpTerminalSource::new(config(server)).unwrap()
    }

    async fn mock_login(server: &mut ServerGuard, connected: bool) -> mockito::Mock {
        login_mock(server, connected).create_async().await
    }

    async fn expect_logins(server: &mut ServerGuard, connected: bool, hits: usize) -> mockito::Mock {
        login_mock(server, connected).expect(hits).create_async().await
    }

    fn login_mock(server: &mut ServerGuard, connected: bool) -> mockito::Mock {
        server
            .mock("POST", "/connect")
            .match_body(Matcher::PartialJson(serde_json::json!({
                "login": 5_001_234,
                "password": "hunter2",
                "server": "Broker-Demo",
            })))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(serde_json::json!({"connected": connected, "message": "ok"}).to_string())
    }

    async fn mock_terminal(server: &mut ServerGuard, body: &str) -> mockito::Mock {
        server
            .mock("GET", "/terminal")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(body)
            .create_async()
            .await
    }

    #[test]
    fn config_trims_trailing_slash_and_hides_password() {
        let config = TerminalSourceConfig::new("http://gw:8700/", 1, "secret", "s");
        assert_eq!(config.gateway_url, "http://gw:8700");
        assert!(!format!("{:?}", config).contains("secret"));
    }

    #[test]
    fn converts_from_app_config() {
        let app = TerminalConfig {
            gateway_url: "https://gw.example.com/".to_string(),
            login: 42,
            password: SecretString::new("pw".to_string()),
            server: "Live-1".to_string(),
            max_reconnect_attempts: 7,
            breaker_failure_threshold: 2,
            ..Default::default()
        };

        let config = TerminalSourceConfig::from(&app);
        assert_eq!(config.gateway_url, "https://gw.example.com");
        assert_eq!(config.login, 42);
        assert_eq!(config.password.expose_secret(), "pw");
        assert_eq!(config.max_reconnect_attempts, 7);
        assert_eq!(config.breaker.failure_threshold, 2);
        assert_eq!(config.request_timeout, Duration::from_secs(10));
        assert_eq!(config.reconnect_delay, Duration::from_secs(2));
    }

    #[tokio::test]
    async fn connect_logs_in_with_credentials() {
        let mut server = Server::new_async().await;
        let login = mock_login(&mut server, true).await;
        let source = source(&server).await;

        assert!(source.connect().await.unwrap());
        assert_eq!(source.connection_attempts(), 0);
        login.assert_async().await;
    }

    #[tokio::test]
    async fn rejected_login_counts_an_attempt() {
        let mut server = Server::new_async().await;
        mock_login(&mut server, false).await;
        let source = source(&server).await;

        assert!(!source.connect().await.unwrap());
        assert_eq!(source.connection_attempts(), 1);

        // the liveness check logs in again and is rejected again
        assert!(!source.is_connected().await);
        assert_eq!(source.connection_attempts(), 2);
    }

    #[tokio::test]
    async fn connect_gives_up_after_max_attempts() {
        let mut server = Server::new_async().await;
        mock_login(&mut server, false).await;
        let source = source(&server).await;

        for _ in 0..3 {
            assert!(!source.connect().await.unwrap());
        }
        assert!(matches!(source.connect().await, Err(SourceError::NotConnected(_))));
    }

    #[tokio::test]
    async fn is_connected_checks_terminal() {
        let mut server = Server::new_async().await;
        mock_login(&mut server, true).await;
        mock_terminal(&mut server, r#"{"build": 4000}"#).await;
        let source = source(&server).await;

        source.connect().await.unwrap();
        assert!(source.is_connected().await);
    }

    #[tokio::test]
    async fn null_terminal_marks_connection_lost_then_logs_in_again() {
        let mut server = Server::new_async().await;
        let login = expect_logins(&mut server, true, 2).await;
        mock_terminal(&mut server, "null").await;
        let source = source(&server).await;

        source.connect().await.unwrap();
        assert!(!source.is_connected().await);
        assert!(source.is_connected().await);

        login.assert_async().await;
    }

    #[tokio::test]
    async fn transient_terminal_error_recovers() {
        let mut server = Server::new_async().await;
        mock_login(&mut server, true).await;
        server
            .mock("GET", "/terminal")
            .with_status(500)
            .expect(1)
            .create_async()
            .await;
        mock_terminal(&mut server, r#"{"build": 4000}"#).await;
        let source = source(&server).await;
        source.connect().await.unwrap();

        let mut checks = Vec::new();
        for _ in 0..10 {
            checks.push(source.is_connected().await);
        }

        assert!(!checks[0]);
        assert!(checks[1..].iter().all(|live| *live), "checks: {:?}", checks);
        assert_eq!(source.connection_attempts(), 0);
    }

    #[tokio::test]
    async fn gateway_down_at_startup_is_retried() {
        let mut server = Server::new_async().await;
        server
            .mock("POST", "/connect")
            .with_status(503)
            .expect(1)
            .create_async()
            .await;
        mock_login(&mut server, true).await;
        let source = source(&server).await;

        assert!(source.connect().await.is_err());
        assert_eq!(source.connection_attempts(), 1);

        assert!(source.is_connected().await);
        assert_eq!(source.connection_attempts(), 0);
    }

    #[tokio::test]
    async fn spent_budget_waits_for_breaker_timeout() {
        let mut server = Server::new_async().await;
        let login = expect_logins(&mut server, false, 3).await;
        let source = HttpTerminalSource::new(
            config(&server)
                .with_max_reconnect_attempts(2)
                .with_breaker(CircuitBreakerConfig::new(10, Duration::from_millis(200))),
        )
        .unwrap();

        assert!(!source.connect().await.unwrap());
        assert!(!source.is_connected().await);
        assert_eq!(source.connection_attempts(), 2);

        // budget spent: no login is attempted
        assert!(!source.is_connected().await);
        assert!(matches!(source.reconnect().await, Err(SourceError::NotConnected(_))));

        tokio::time::sleep(Duration::from_millis(250)).await;
        assert!(!source.is_connected().await);
        assert_eq!(source.connection_attempts(), 1);

        login.assert_async().await;
    }

    #[tokio::test]
    async fn never_connected_source_does_not_dial() {
        let mut server = Server::new_async().await;
        let login = expect_logins(&mut server, true, 0).await;
        let source = source(&server).await;

        assert!(!source.is_connected().await);
        login.assert_async().await;
    }

    #[tokio::test]
    async fn disconnect_stops_reconnecting() {
        let mut server = Server::new_async().await;
        let login = expect_logins(&mut server, true, 1).await;
        server
            .mock("POST", "/disconnect")
            .with_status(200)
            .create_async()
            .await;
        let source = source(&server).await;
        source.connect().await.unwrap();

        source.disconnect().await;

        assert!(!source.is_connected().await);
        login.assert_async().await;
    }

    #[tokio::test]
    async fn fetch_state_decodes_and_caches_account() {
        let mut server = Server::new_async().await;
        mock_login(&mut server, true).await;
        let account = sample_account();
        server
            .mock("GET", "/account")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(serde_json::to_string(&account).unwrap())
            .create_async()
            .await;
        let source = source(&server).await;
        source.connect().await.unwrap();

        let fetched = source.fetch_state().await.unwrap().unwrap();

        assert_eq!(fetched.snapshot(), account.snapshot());
        assert!(fetched.last_update.is_some());
        assert_eq!(source.last_account().map(|a| a.login), Some(account.login));
    }

    #[tokio::test]
    async fn null_account_returns_last_known_value() {
        let mut server = Server::new_async().await;
        mock_login(&mut server, true).await;
        let source = source(&server).await;
        source.connect().await.unwrap();

        server
            .mock("GET", "/account")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body("null")
            .create_async()
            .await;

        assert!(source.fetch_state().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn server_error_is_reported() {
        let mut server = Server::new_async().await;
        mock_login(&mut server, true).await;
        server
            .mock("GET", "/account")
            .with_status(503)
            .with_body("terminal busy")
            .create_async()
            .await;
        let source = source(&server).await;
        source.connect().await.unwrap();

        assert!(matches!(source.fetch_state().await, Err(SourceError::Request(_))));
    }

    #[tokio::test]
    async fn malformed_account_is_invalid_response() {
        let mut server = Server::new_async().await;
        mock_login(&mut server, true).await;
        server
            .mock("GET", "/account")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"balance": "lots"}"#)
            .create_async()
            .await;
        let source = source(&server).await;
        source.connect().await.unwrap();

        assert!(matches!(
            source.fetch_state().await,
            Err(SourceError::InvalidResponse(_))
        ));
    }

    #[tokio::test]
    async fn disconnect_calls_gateway_once() {
        let mut server = Server::new_async().await;
        mock_login(&mut server, true).await;
        let disconnect = server
            .mock("POST", "/disconnect")
            .with_status(200)
            .expect(1)
            .create_async()
            .await;
        let source = source(&server).await;
        source.connect().await.unwrap();

        source.disconnect().await;
        source.disconnect().await;

        disconnect.assert_async().await;
        assert!(source.last_account().is_none());
    }

    #[tokio::test]
    async fn unreachable_gateway_fails_connect() {
        let source = HttpTerminalSource::new(
            TerminalSourceConfig::new("http://127.0.0.1:1", 1, "x", "s")
                .with_request_timeout(Duration::from_secs(2)),
        )
        .unwrap();

        assert!(source.connect().await.is_err());
        assert_eq!(source.connection_attempts(), 1);
    }
}
