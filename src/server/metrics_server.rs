// src/server/metrics_server.rs

use crate::core::metrics::{self, gather_metrics};
use crate::core::state::RelayState;
use axum::{Router, http::StatusCode, response::IntoResponse, routing::get};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{error, info};

/// Handles HTTP requests to the /metrics endpoint.
///
/// It updates the registry gauges before gathering all registered metrics
/// and encoding them in the Prometheus text format.
async fn metrics_handler(state: Arc<RelayState>) -> impl IntoResponse {
    let snapshot = state.registry.snapshot();
    metrics::WAITING_HOSTS.set(snapshot.waiting.len() as f64);
    metrics::ACTIVE_ASSIGNMENTS.set(snapshot.active_assignments() as f64);
    metrics::COMMAND_CHANNEL_CONNECTED.set(if snapshot.command_channel.is_some() {
        1.0
    } else {
        0.0
    });

    let body = gather_metrics();
    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4")],
        body,
    )
}

/// Runs a simple HTTP server to expose Prometheus metrics on /metrics.
pub async fn run_metrics_server(state: Arc<RelayState>, mut shutdown_rx: broadcast::Receiver<()>) {
    let port = state.config.metrics.port;

    let app = Router::new().route("/metrics", get(move || metrics_handler(state.clone())));

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!(
        "Prometheus metrics server listening on http://{}/metrics",
        addr
    );

    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(l) => l,
        Err(e) => {
            error!("Failed to bind metrics server on port {}: {}", port, e);
            return;
        }
    };

    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_rx.recv().await.ok();
            info!("Metrics server shutting down.");
        })
        .await
    {
        error!("Metrics server failed: {}", e);
    }
}
