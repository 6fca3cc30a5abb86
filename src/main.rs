//! # Genoma diagnostic server
//!
//! Binary entry point: loads configuration, starts the framed TCP/TLS
//! listener and the HTTP metrics endpoint, and shuts both down on Ctrl+C.
//!
//! ## Features
//! - Plain or TLS listener using `tokio-rustls`
//! - Per-IP admission rate limiting
//! - Graceful shutdown with a grace period
//! - Environment-based configuration loading
//! - Health monitoring via HTTP metrics endpoint

use std::sync::Arc;

use genoma_server::{
    config::ServerConfig,
    registry::Registries,
    server::{health, Acceptor, ServerState},
};
use tokio::{signal, sync::watch};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// Entry point for the diagnostic server.
///
/// # Errors
/// Returns an error if configuration validation fails or if the server fails to bind to a port.
#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    let _ = dotenv::dotenv();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = ServerConfig::from_env()?;
    config.validate()?;

    let state = ServerState::new(Arc::new(config), Registries::in_memory())?;
    let acceptor = Acceptor::bind(Arc::clone(&state)).await?;

    let (metrics_stop, metrics_rx) = watch::channel(false);
    let metrics_task = if state.config.metrics_port != 0 {
        let state = Arc::clone(&state);
        Some(tokio::spawn(async move {
            if let Err(e) = health::serve_metrics_http(state, metrics_rx).await {
                error!("Metrics endpoint failed: {}", e);
            }
        }))
    } else {
        None
    };

    acceptor.run(shutdown_signal()).await?;

    let _ = metrics_stop.send(true);
    if let Some(task) = metrics_task {
        let _ = task.await;
    }
    info!("Server stopped");
    Ok(())
}

/// Resolves on Ctrl+C. If the signal handler cannot be installed the server
/// runs until killed.
async fn shutdown_signal() {
    match signal::ctrl_c().await {
        Ok(()) => info!("Shutdown signal received"),
        Err(e) => {
            error!("Failed to listen for shutdown signal: {}", e);
            std::future::pending::<()>().await
        }
    }
}
