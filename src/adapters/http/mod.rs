//! HTTP adapters - Routes served by the relay.
//!
//! - `health` - `GET /health` and `GET /status`
//! - `/ws` - WebSocket upgrade, served by the websocket adapter

pub mod health;

use std::sync::Arc;

use axum::http::{header, HeaderValue, Method};
use axum::Router;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::adapters::websocket::websocket_router;
use crate::application::ServiceContainer;

pub use health::{health_routes, HealthAppState};

/// CORS layer for the configured origins.
///
/// An empty or fully unparsable list allows any origin.
pub fn cors_layer(origins: &[String]) -> CorsLayer {
    let parsed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| origin.parse().ok())
        .collect();

    let allow_origin = if parsed.is_empty() {
        tracing::warn!("No valid CORS origins configured, allowing any origin");
        AllowOrigin::any()
    } else {
        tracing::info!(origins = parsed.len(), "CORS configured");
        AllowOrigin::list(parsed)
    };

    CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods([Method::GET, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE])
}

/// Full application router: health routes plus the websocket endpoint.
pub fn app_router(container: Arc<ServiceContainer>, cors_origins: &[String]) -> Router {
    let ws_state = container.websocket_state();

    Router::new()
        .merge(health_routes(HealthAppState::new(container)))
        .merge(websocket_router().with_state(ws_state))
        .layer(TraceLayer::new_for_http())
        .layer(cors_layer(cors_origins))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::pubsub::InMemoryPubSub;
    use crate::config::AppConfig;
    use crate::domain::account::AccountInfo;
    use crate::ports::{AccountSource, SourceError};
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    struct OfflineSource;

    #[async_trait]
    impl AccountSource for OfflineSource {
        async fn connect(&self) -> Result<bool, SourceError> {
            Ok(false)
        }
        async fn is_connected(&self) -> bool {
            false
        }
        async fn fetch_state(&self) -> Result<Option<AccountInfo>, SourceError> {
            Ok(None)
        }
        async fn disconnect(&self) {}
    }

    fn app(origins: &[String]) -> Router {
        let container = Arc::new(ServiceContainer::build(
            &AppConfig::default(),
            Arc::new(OfflineSource),
            Arc::new(InMemoryPubSub::new()),
        ));
        app_router(container, origins)
    }

    #[tokio::test]
    async fn health_and_ws_are_mounted() {
        let origins = vec!["http://localhost:3000".to_string()];

        let health = app(&origins)
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(health.status(), StatusCode::OK);

        // Plain GET without upgrade headers is rejected, but the route exists
        let ws = app(&origins)
            .oneshot(Request::builder().uri("/ws").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_ne!(ws.status(), StatusCode::NOT_FOUND);
        assert!(ws.status().is_client_error());
    }

    #[tokio::test]
    async fn unknown_route_is_not_found() {
        let response = app(&[])
            .oneshot(Request::builder().uri("/nope").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn cors_allows_configured_origin() {
        let origins = vec!["http://localhost:3000".to_string()];

        let response = app(&origins)
            .oneshot(
                Request::builder()
                    .uri("/health")
                    .header(header::ORIGIN, "http://localhost:3000")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(
            response.headers().get(header::ACCESS_CONTROL_ALLOW_ORIGIN).unwrap(),
            "http://localhost:3000"
        );
    }
}
