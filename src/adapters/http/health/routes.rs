//! HTTP routes for health endpoints.

use axum::routing::get;
use axum::Router;

use super::handlers::{get_health, get_status, HealthAppState};

/// Creates the health router with all routes.
pub fn health_routes(state: HealthAppState) -> Router {
    Router::new()
        // GET /health
        .route("/health", get(get_health))
        // GET /status
        .route("/status", get(get_status))
        .with_state(state)
}
