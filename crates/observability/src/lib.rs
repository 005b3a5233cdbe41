//! # gateway-observability
//!
//! Observability-Crate fuer das Gateway:
//! - Prometheus-kompatible Metriken (`/metrics`)
//! - Health-Check-Endpunkt (`/health`)
//! - Structured Logging via tracing-subscriber

pub mod health;
pub mod logging;
pub mod metrics;
pub mod middleware;

pub use health::{health_router, HealthResponse, HealthState, HealthStatus};
pub use logging::{log_format_gueltig, log_level_gueltig, logging_initialisieren};
pub use metrics::{metrics_router, GatewayMetrics};

use anyhow::Result;
use axum::Router;
use std::net::SocketAddr;
use tokio::sync::watch;

/// Baut den HTTP-Router mit `/health` und `/metrics`
pub fn observability_router(state: HealthState, metriken: GatewayMetrics) -> Router {
    Router::new()
        .merge(metrics_router(metriken.clone()))
        .merge(health_router(state))
        .layer(axum::middleware::from_fn_with_state(
            metriken,
            middleware::timing_middleware,
        ))
}

/// Startet den Observability-HTTP-Server und laeuft bis zum Shutdown-Signal
///
/// Endpunkte:
/// - `GET /metrics` – Prometheus scrape format
/// - `GET /health`  – Health-Check JSON
pub async fn observability_server_starten(
    bind_addr: SocketAddr,
    state: HealthState,
    metriken: GatewayMetrics,
    mut shutdown_rx: watch::Receiver<bool>,
) -> Result<()> {
    let app = observability_router(state, metriken);

    let listener = tokio::net::TcpListener::bind(bind_addr).await?;
    tracing::info!(addr = %bind_addr, "Observability-Server gestartet");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown_rx.changed().await;
        })
        .await?;
    Ok(())
}
