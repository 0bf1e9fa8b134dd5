//! FHIR Relay - Web Server Entry Point
//!
//! Starts the HTTP server that accepts forward trigger events.

use anyhow::Context;
use relay::{api::create_router, config::Config, logging, state::AppState, Error};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration first to get logging settings
    let config = Config::load().context("Failed to load configuration")?;

    config
        .validate()
        .map_err(Error::Configuration)
        .context("Invalid configuration")?;

    let _telemetry_guard =
        logging::init_logging(&config.logging).context("Failed to initialize logging/telemetry")?;

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        environment = config.logging.deployment_environment,
        "Starting FHIR Relay"
    );

    let addr = config
        .socket_addr()
        .context("Failed to determine socket address")?;

    tracing::info!(
        primary = %config.sources.primary_url,
        destination = %config.destination.url,
        max_concurrent_requests = config.forwarding.max_concurrent_requests,
        listen_addr = %addr,
        "Configuration loaded"
    );

    let state = AppState::new(config).context("Failed to initialize application state")?;

    let app = create_router(state);

    tracing::info!("FHIR Relay listening on http://{}", addr);
    tracing::info!("Health check: http://{}/health", addr);
    tracing::info!("Trigger endpoint: http://{}/forwarder/_event", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind TCP listener on {addr}"))?;

    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
    {
        tracing::error!(error = %e, "Server terminated unexpectedly");
        logging::shutdown_telemetry();
        return Err(e.into());
    }

    tracing::info!("Server shutdown complete");

    // Also happens via Drop on _telemetry_guard
    logging::shutdown_telemetry();

    Ok(())
}

/// Wait for SIGTERM (Docker) or SIGINT (Ctrl+C)
#[cfg(unix)]
async fn shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let sigint = tokio::signal::ctrl_c();
    match signal(SignalKind::terminate()) {
        Ok(mut sigterm) => {
            tokio::select! {
                _ = sigint => {
                    tracing::info!("SIGINT received, starting graceful shutdown...");
                }
                _ = sigterm.recv() => {
                    tracing::info!("SIGTERM received, starting graceful shutdown...");
                }
            }
        }
        Err(e) => {
            tracing::warn!(error = %e, "Failed to install SIGTERM handler, waiting for SIGINT only");
            let _ = sigint.await;
            tracing::info!("SIGINT received, starting graceful shutdown...");
        }
    }
}

#[cfg(not(unix))]
async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for CTRL+C");
    }
    tracing::info!("Shutdown signal received, starting graceful shutdown...");
}
