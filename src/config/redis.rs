//! Redis configuration

use serde::Deserialize;
use std::time::Duration;

use super::error::ValidationError;

/// Redis configuration (external pub/sub bus)
#[derive(Debug, Clone, Deserialize)]
pub struct RedisConfig {
    /// Redis connection URL
    #[serde(default = "default_url")]
    pub url: String,

    /// Publish timeout in seconds
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,

    /// Consecutive publish failures before the breaker opens
    #[serde(default = "default_breaker_threshold")]
    pub breaker_failure_threshold: u32,

    /// Seconds the breaker stays open before a trial publish
    #[serde(default = "default_breaker_timeout")]
    pub breaker_timeout_secs: u64,
}

impl RedisConfig {
    /// Get timeout as Duration
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Get breaker recovery timeout as Duration
    pub fn breaker_timeout(&self) -> Duration {
        Duration::from_secs(self.breaker_timeout_secs)
    }

    /// Validate Redis configuration
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.url.is_empty() {
            return Err(ValidationError::MissingRequired("REDIS__URL"));
        }
        if !self.url.starts_with("redis://") && !self.url.starts_with("rediss://") {
            return Err(ValidationError::InvalidRedisUrl);
        }
        if self.timeout_secs == 0 {
            return Err(ValidationError::MustBePositive("redis.timeout_secs"));
        }
        if self.breaker_failure_threshold == 0 {
            return Err(ValidationError::MustBePositive("redis.breaker_failure_threshold"));
        }
        Ok(())
    }
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: default_url(),
            timeout_secs: default_timeout(),
            breaker_failure_threshold: default_breaker_threshold(),
            breaker_timeout_secs: default_breaker_timeout(),
        }
    }
}

fn default_url() -> String {
    "redis://localhost:6379/0".to_string()
}

fn default_timeout() -> u64 {
    5
}

fn default_breaker_threshold() -> u32 {
    3
}

fn default_breaker_timeout() -> u64 {
    30
}
