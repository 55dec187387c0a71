use std::net::SocketAddr;
use std::sync::Arc;

use tracing::{error, info, warn};

use account_relay::adapters::{app_router, HttpTerminalSource, InMemoryPubSub, RedisPubSub, TerminalSourceConfig};
use account_relay::application::{registry, ServiceContainer};
use account_relay::config::AppConfig;
use account_relay::ports::PubSubBackend;
use account_relay::telemetry;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::load()?;
    telemetry::init(&config.server);

    if let Err(e) = config.validate() {
        error!(error = %e, "Invalid configuration");
        return Err(e.into());
    }

    info!(
        environment = ?config.server.environment,
        version = env!("CARGO_PKG_VERSION"),
        "Starting account relay"
    );

    let pubsub: Arc<dyn PubSubBackend> = match RedisPubSub::new(&config.redis.url) {
        Ok(redis) => Arc::new(redis.with_connect_timeout(config.redis.timeout())),
        Err(e) => {
            warn!(error = %e, "Redis client unavailable, using in-process pub/sub");
            Arc::new(InMemoryPubSub::new())
        }
    };

    let source = Arc::new(HttpTerminalSource::new(TerminalSourceConfig::from(
        &config.terminal,
    ))?);

    let container = Arc::new(ServiceContainer::build(&config, source, pubsub));
    container.start().await;
    registry::install(Arc::clone(&container))?;

    let addr = config.server.socket_addr()?;
    let app = app_router(Arc::clone(&container), &config.server.cors_origins_list());

    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "Listening");
    info!("WebSocket available at ws://{}/ws", addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    info!("Server shutdown initiated, stopping services...");
    container.stop().await;
    info!("Account relay stopped");

    Ok(())
}

/// Resolves on Ctrl+C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            warn!("Received Ctrl+C, initiating graceful shutdown...");
        }
        _ = terminate => {
            warn!("Received SIGTERM, initiating graceful shutdown...");
        }
    }
}
