use anyhow::{Context, Result};
use axum::http::HeaderName;
use tokio::net::TcpListener;
use tokio::signal;
use tokio_util::sync::CancellationToken;

use notify_core::configs;
use notify_core::gateway::{self, GatewayState};
use notify_core::loggers;
use notify_core::{Hub, Watcher};

const APP_NAME: &str = "notify_gateway";

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();

    let config = configs::load_config();
    let log_path = loggers::setup_logging(&config.log_dir, &config.log_level, APP_NAME)?;
    log::info!("Logging to {}", log_path.display());

    let identity_header = HeaderName::try_from(config.identity_header.as_str())
        .with_context(|| format!("invalid identity header name `{}`", config.identity_header))?;

    let (hub, hub_task) = Hub::spawn();

    let watcher = Watcher::connect(&config.broker_settings(), hub.clone())
        .await
        .context("failed to set up the notification queue consumer")?;
    let consumer = watcher.start().await.context("failed to start consuming")?;
    log::info!("Watching queue {}", watcher.queue_name());

    let state = GatewayState {
        hub: hub.clone(),
        outbound_capacity: config.outbound_capacity,
        allow_legacy_identity: config.allow_legacy_identity,
    };
    let app = gateway::router(state, identity_header);

    let listener = TcpListener::bind(("0.0.0.0", config.port))
        .await
        .with_context(|| format!("failed to bind port {}", config.port))?;
    log::info!("Notification gateway listening on {}", listener.local_addr()?);

    let shutdown = CancellationToken::new();
    tokio::spawn(wait_for_signal(shutdown.clone()));

    let server = tokio::spawn(
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown.clone().cancelled_owned())
            .into_future(),
    );

    shutdown.cancelled().await;

    // Stop intake first so nothing is acked after the hub is gone.
    if let Err(e) = watcher.close().await {
        log::warn!("Error closing the queue consumer: {}", e);
    }
    match consumer.await {
        Ok(summary) => log::info!(
            "Consumer stopped: {} forwarded, {} rejected, {} requeued",
            summary.forwarded,
            summary.rejected,
            summary.requeued
        ),
        Err(e) => log::error!("Consumer task failed: {}", e),
    }

    // Tearing down the hub closes every live socket.
    let _ = hub.shutdown();
    if let Err(e) = hub_task.await {
        log::error!("Hub task failed: {}", e);
    }

    match server.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => log::error!("Server error: {}", e),
        Err(e) => log::error!("Server task failed: {}", e),
    }

    log::info!("Shutdown complete.");
    Ok(())
}

async fn wait_for_signal(shutdown: CancellationToken) {
    tokio::select! {
        _ = signal::ctrl_c() => {
            log::info!("Ctrl-C received, initiating shutdown.");
        }
        _ = terminate() => {
            log::info!("SIGTERM received, initiating shutdown.");
        }
    }
    shutdown.cancel();
}

#[cfg(unix)]
async fn terminate() {
    match signal::unix::signal(signal::unix::SignalKind::terminate()) {
        Ok(mut term_signal) => {
            term_signal.recv().await;
        }
        Err(e) => {
            log::warn!("Cannot listen for SIGTERM: {}", e);
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(not(unix))]
async fn terminate() {
    std::future::pending::<()>().await;
}
