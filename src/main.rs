//! Bridge server entry point.
//!
//! Loads configuration, logs the admin session into the XMPP server and
//! serves the WebSocket endpoints until interrupted.

use std::sync::Arc;

use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use xmpp_ws_bridge::adapters::{bridge_router, InMemoryConnectionDirectory, WebSocketState, XmppBackend};
use xmpp_ws_bridge::application::{BridgeSettings, SessionBridge};
use xmpp_ws_bridge::config::AppConfig;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::load()?;
    init_tracing(&config);
    config.validate()?;

    let addr = config.server.socket_addr()?;
    tracing::info!(
        environment = ?config.server.environment,
        xmpp_host = %config.xmpp.host,
        xmpp_domain = %config.xmpp.domain,
        "Starting bridge"
    );

    let backend = match XmppBackend::start(&config.xmpp).await {
        Ok(backend) => Arc::new(backend),
        Err(e) => {
            tracing::error!(error = %e, "Admin session could not be established");
            return Err(e.into());
        }
    };

    let bridge = SessionBridge::new(
        backend.clone(),
        Arc::new(InMemoryConnectionDirectory::new()),
        BridgeSettings::from_config(&config),
    );
    let app = bridge_router(WebSocketState::new(bridge)).layer(TraceLayer::new_for_http());

    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "Listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    backend.shutdown().await;
    tracing::info!("Shut down");
    Ok(())
}

fn init_tracing(config: &AppConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.server.log_level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true);

    let _ = if config.is_production() {
        builder.json().try_init()
    } else {
        builder.compact().try_init()
    };
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown requested");
}
