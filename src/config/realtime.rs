//! Real-time distribution configuration

use serde::Deserialize;
use std::time::Duration;

use super::error::ValidationError;

/// Real-time fanout, monitor and channel settings
#[derive(Debug, Clone, Deserialize)]
pub struct RealtimeConfig {
    /// Prefix for external channel names (`<prefix>:<channel>`)
    #[serde(default = "default_channel_prefix")]
    pub channel_prefix: String,

    /// Seconds between heartbeat broadcasts
    #[serde(default = "default_heartbeat_interval")]
    pub heartbeat_interval_secs: u64,

    /// Upper bound for one client write, in seconds
    #[serde(default = "default_send_timeout")]
    pub send_timeout_secs: u64,

    /// Milliseconds between monitor polls
    #[serde(default = "default_monitor_interval")]
    pub monitor_interval_ms: u64,

    /// Consecutive monitor errors before it halts
    #[serde(default = "default_monitor_max_errors")]
    pub monitor_max_errors: u32,

    /// Upper bound for one terminal check or fetch, in seconds
    ///
    /// Must exceed the terminal's slowest check (reconnect delay plus request
    /// timeout) so in-flight gateway calls finish on their own.
    #[serde(default = "default_fetch_timeout")]
    pub fetch_timeout_secs: u64,

    /// External channels relayed to clients (comma-separated)
    #[serde(default = "default_inbound_channels")]
    pub inbound_channels: String,
}

impl RealtimeConfig {
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }

    pub fn send_timeout(&self) -> Duration {
        Duration::from_secs(self.send_timeout_secs)
    }

    pub fn monitor_interval(&self) -> Duration {
        Duration::from_millis(self.monitor_interval_ms)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }

    /// Get inbound channels as a vector
    pub fn inbound_channels_list(&self) -> Vec<String> {
        self.inbound_channels
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect()
    }

    /// Validate real-time configuration
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.channel_prefix.is_empty() || self.channel_prefix.contains(':') {
            return Err(ValidationError::InvalidChannelPrefix);
        }
        if self.heartbeat_interval_secs == 0 {
            return Err(ValidationError::MustBePositive("realtime.heartbeat_interval_secs"));
        }
        if self.send_timeout_secs == 0 {
            return Err(ValidationError::MustBePositive("realtime.send_timeout_secs"));
        }
        if self.monitor_interval_ms == 0 {
            return Err(ValidationError::MustBePositive("realtime.monitor_interval_ms"));
        }
        if self.monitor_max_errors == 0 {
            return Err(ValidationError::MustBePositive("realtime.monitor_max_errors"));
        }
        if self.fetch_timeout_secs == 0 {
            return Err(ValidationError::MustBePositive("realtime.fetch_timeout_secs"));
        }
        Ok(())
    }
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            channel_prefix: default_channel_prefix(),
            heartbeat_interval_secs: default_heartbeat_interval(),
            send_timeout_secs: default_send_timeout(),
            monitor_interval_ms: default_monitor_interval(),
            monitor_max_errors: default_monitor_max_errors(),
            fetch_timeout_secs: default_fetch_timeout(),
            inbound_channels: default_inbound_channels(),
        }
    }
}

fn default_channel_prefix() -> String {
    "mt5".to_string()
}

fn default_heartbeat_interval() -> u64 {
    30
}

fn default_send_timeout() -> u64 {
    5
}

fn default_monitor_interval() -> u64 {
    1000
}

fn default_monitor_max_errors() -> u32 {
    5
}

fn default_fetch_timeout() -> u64 {
    15
}

fn default_inbound_channels() -> String {
    "market_data,position_update,order_update".to_string()
}
