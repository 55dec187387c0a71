//! Trading terminal gateway configuration

use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use std::time::Duration;

use super::error::ValidationError;

/// Terminal gateway configuration
#[derive(Debug, Clone, Deserialize)]
pub struct TerminalConfig {
    /// Base URL of the terminal gateway
    #[serde(default = "default_gateway_url")]
    pub gateway_url: String,

    /// Account login number
    #[serde(default)]
    pub login: i64,

    /// Account password
    #[serde(default = "default_password")]
    pub password: SecretString,

    /// Broker server name
    #[serde(default)]
    pub server: String,

    /// Per-request timeout in seconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Failed connects allowed before pausing for the breaker timeout
    #[serde(default = "default_max_reconnect_attempts")]
    pub max_reconnect_attempts: u32,

    /// Pause before each reconnect attempt, in seconds
    #[serde(default = "default_reconnect_delay")]
    pub reconnect_delay_secs: u64,

    /// Consecutive failures before the breaker opens
    #[serde(default = "default_breaker_threshold")]
    pub breaker_failure_threshold: u32,

    /// Seconds the breaker stays open before a trial call
    #[serde(default = "default_breaker_timeout")]
    pub breaker_timeout_secs: u64,
}

impl TerminalConfig {
    /// Get request timeout as Duration
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Get breaker recovery timeout as Duration
    pub fn breaker_timeout(&self) -> Duration {
        Duration::from_secs(self.breaker_timeout_secs)
    }

    /// Get reconnect delay as Duration
    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_secs(self.reconnect_delay_secs)
    }

    /// Longest a single liveness check can take: a reconnect pause plus one request.
    pub fn slowest_check_secs(&self) -> u64 {
        self.reconnect_delay_secs.saturating_add(self.request_timeout_secs)
    }

    /// Validate terminal configuration
    pub fn validate(&self) -> Result<(), ValidationError> {
        if !self.gateway_url.starts_with("http://") && !self.gateway_url.starts_with("https://") {
            return Err(ValidationError::InvalidGatewayUrl);
        }
        if self.login <= 0 {
            return Err(ValidationError::MissingRequired("TERMINAL__LOGIN"));
        }
        if self.password.expose_secret().is_empty() {
            return Err(ValidationError::MissingRequired("TERMINAL__PASSWORD"));
        }
        if self.server.is_empty() {
            return Err(ValidationError::MissingRequired("TERMINAL__SERVER"));
        }
        if self.request_timeout_secs == 0 {
            return Err(ValidationError::MustBePositive("terminal.request_timeout_secs"));
        }
        if self.breaker_failure_threshold == 0 {
            return Err(ValidationError::MustBePositive("terminal.breaker_failure_threshold"));
        }
        Ok(())
    }
}

impl Default for TerminalConfig {
    fn default() -> Self {
        Self {
            gateway_url: default_gateway_url(),
            login: 0,
            password: default_password(),
            server: String::new(),
            request_timeout_secs: default_request_timeout(),
            max_reconnect_attempts: default_max_reconnect_attempts(),
            reconnect_delay_secs: default_reconnect_delay(),
            breaker_failure_threshold: default_breaker_threshold(),
            breaker_timeout_secs: default_breaker_timeout(),
        }
    }
}

fn default_gateway_url() -> String {
    "http://localhost:8700".to_string()
}

fn default_password() -> SecretString {
    SecretString::new(String::new())
}

fn default_request_timeout() -> u64 {
    10
}

fn default_max_reconnect_attempts() -> u32 {
    3
}

fn default_reconnect_delay() -> u64 {
    2
}

fn default_breaker_threshold() -> u32 {
    5
}

fn default_breaker_timeout() -> u64 {
    60
}
