//! HTTP handlers for health endpoints.

use std::sync::Arc;

use axum::extract::{Json, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;

use crate::application::ServiceContainer;

use super::dto::{ErrorResponse, StatusResponse};

/// Shared state for health handlers.
#[derive(Clone)]
pub struct HealthAppState {
    pub container: Arc<ServiceContainer>,
}

impl HealthAppState {
    pub fn new(container: Arc<ServiceContainer>) -> Self {
        Self { container }
    }
}

/// GET /health - Liveness plus dependency summary.
///
/// Always 200; `status` says whether the relay is healthy or degraded.
pub async fn get_health(State(state): State<HealthAppState>) -> impl IntoResponse {
    Json(state.container.health_status())
}

/// GET /status - Detailed view of every service.
pub async fn get_status(State(state): State<HealthAppState>) -> impl IntoResponse {
    let container = &state.container;
    if !container.is_started() {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(ErrorResponse::unavailable("Services are not running")),
        )
            .into_response();
    }

    Json(StatusResponse {
        health: container.health_status(),
        monitor: container.monitor_status(),
        bridge: container.bridge().stats(),
        connections: container.connections().stats(),
    })
    .into_response()
}
