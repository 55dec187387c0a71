//! Tracing subscriber setup.

use tracing_subscriber::EnvFilter;

use crate::config::{LogFormat, ServerConfig};

/// Builds the filter: `RUST_LOG` wins, otherwise the configured level.
pub fn env_filter(config: &ServerConfig) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("info"))
    })
}

/// Installs the global subscriber. Returns false if one was already set.
pub fn init(config: &ServerConfig) -> bool {
    let builder = tracing_subscriber::fmt().with_env_filter(env_filter(config));

    let result = match config.log_format {
        LogFormat::Json => builder.json().with_current_span(false).try_init(),
        LogFormat::Pretty => builder.with_target(true).try_init(),
    };

    result.is_ok()
}
