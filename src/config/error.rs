//! Configuration error types

use thiserror::Error;

/// Errors that can occur during configuration loading
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration loading failed: {0}")]
    LoadError(#[from] config::ConfigError),

    #[error("Validation failed: {0}")]
    ValidationFailed(#[from] ValidationError),
}

/// Errors that can occur during configuration validation
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Required configuration missing: {0}")]
    MissingRequired(&'static str),

    #[error("Invalid port number")]
    InvalidPort,

    #[error("Invalid log format (expected \"pretty\" or \"json\")")]
    InvalidLogFormat,

    #[error("Invalid Redis URL format")]
    InvalidRedisUrl,

    #[error("Invalid terminal gateway URL format")]
    InvalidGatewayUrl,

    #[error("Invalid value for {0}: must be greater than zero")]
    MustBePositive(&'static str),

    #[error("Channel prefix must not be empty or contain ':'")]
    InvalidChannelPrefix,

    #[error("realtime.fetch_timeout_secs ({fetch_secs}) must exceed the terminal's slowest check ({slowest_check_secs}s)")]
    FetchTimeoutTooShort {
        fetch_secs: u64,
        slowest_check_secs: u64,
    },
}
