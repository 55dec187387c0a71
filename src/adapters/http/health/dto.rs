//! Data Transfer Objects for health endpoints.

use serde::Serialize;

use crate::adapters::pubsub::BridgeStats;
use crate::adapters::websocket::ConnectionStats;
use crate::application::{HealthStatus, MonitorStatus};

/// Response for `GET /status`.
#[derive(Debug, Clone, Serialize)]
pub struct StatusResponse {
    pub health: HealthStatus,
    pub monitor: MonitorStatus,
    pub bridge: BridgeStats,
    pub connections: ConnectionStats,
}

/// Standard error response.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorResponse {
    pub code: String,
    pub message: String,
}

impl ErrorResponse {
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self {
            code: "SERVICE_UNAVAILABLE".to_string(),
            message: message.into(),
        }
    }
}
