//! Axum HTTP server for the metrics endpoint

use std::net::SocketAddr;

use axum::{http::StatusCode, routing::get, Router};
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::{Error, Result};

/// Metrics endpoint handler
async fn metrics_handler() -> (StatusCode, String) {
    use prometheus_client::encoding::text::encode;
    let mut buffer = String::new();
    match encode(&mut buffer, &crate::controller::metrics::REGISTRY) {
        Ok(()) => (StatusCode::OK, buffer),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}

async fn healthz() -> &'static str {
    "ok"
}

pub fn router() -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/metrics", get(metrics_handler))
        .layer(TraceLayer::new_for_http())
}

/// Serve metrics on `addr` until `shutdown` is cancelled
pub async fn run_server(addr: SocketAddr, shutdown: CancellationToken) -> Result<()> {
    info!("Metrics server listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| Error::ConfigError(format!("Failed to bind to {}: {}", addr, e)))?;

    axum::serve(listener, router())
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
        .map_err(|e| Error::ConfigError(format!("Server error: {}", e)))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_metrics_handler_encodes_registry() {
        crate::controller::metrics::inc_trigger_dropped();
        let (status, body) = metrics_handler().await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.contains("kubeedge_trigger_events_dropped_total"));
    }

    #[tokio::test]
    async fn test_healthz() {
        assert_eq!(healthz().await, "ok");
    }
}
