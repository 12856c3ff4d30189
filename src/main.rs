//! Quote server
//!
//! Maintains live order books for the configured exchange products and
//! serves price quotes over HTTP. Bootstrap failures (REST unreachable,
//! feed handshake failed, a book that never loads) exit non-zero.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{error, info, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use quote_server::config::Config;
use quote_server::feed::Feed;
use quote_server::orderbook::Registry;
use quote_server::rest::ApiClient;
use quote_server::{server, AppState};

/// How long the books get to reach running before bootstrap fails
const STARTUP_DEADLINE: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer().json())
        .with(EnvFilter::from_default_env().add_directive(Level::INFO.into()))
        .init();

    info!("starting quote server");

    let config = Config::load()?;
    info!(products = ?config.products, "configuration loaded");

    let api = ApiClient::new(
        &config.api_url,
        Duration::from_secs(config.request_timeout_secs),
    )
    .map_err(|e| {
        error!(error = %e, "error creating REST API client");
        anyhow::anyhow!(e)
    })?;

    let feed = Feed::open(
        &config.websocket_url,
        &config.products,
        config.feed_buffer,
        Duration::from_millis(config.send_timeout_ms),
    )
    .await
    .map_err(|e| {
        error!(error = %e, "error establishing feed connection");
        anyhow::anyhow!(e)
    })?;

    let (shutdown, shutdown_rx) = watch::channel(false);

    let registry = Registry::open(&config, api, &feed, shutdown_rx)
        .await
        .map_err(|e| {
            error!(error = %e, "error while establishing order books");
            anyhow::anyhow!(e)
        })?;
    registry.spawn_error_drains().map_err(|e| anyhow::anyhow!(e))?;

    registry
        .wait_until_running(STARTUP_DEADLINE)
        .await
        .map_err(|e| {
            error!(error = %e, "order books failed to synchronize");
            anyhow::anyhow!(e)
        })?;
    info!(books = registry.len(), "order books running");

    let listen_port = config.listen_port;
    let state = Arc::new(AppState { registry, config });
    let app = server::router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], listen_port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(addr = %addr, "listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutting down");
            feed.close();
            let _ = shutdown.send(true);
        })
        .await?;

    Ok(())
}
