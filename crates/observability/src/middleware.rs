//! Request-Middleware fuer den HTTP-Endpunkt
//!
//! Misst jede Anfrage, loggt sie strukturiert und zaehlt sie in
//! `gateway_http_requests_total`.

use axum::{
    body::Body,
    extract::State,
    http::{Request, Response},
    middleware::Next,
};
use std::time::Instant;

use crate::metrics::GatewayMetrics;

/// Verwendung:
/// ```ignore
/// Router::new()
///     .route("/", get(handler))
///     .layer(axum::middleware::from_fn_with_state(metriken, timing_middleware))
/// ```
pub async fn timing_middleware(
    State(metriken): State<GatewayMetrics>,
    req: Request<Body>,
    next: Next,
) -> Response<Body> {
    let methode = req.method().to_string();
    let pfad = req.uri().path().to_string();
    let start = Instant::now();

    let response = next.run(req).await;

    let status = response.status().as_u16();
    let status_text = status.to_string();
    metriken
        .http_requests_total
        .with_label_values(&[methode.as_str(), pfad.as_str(), status_text.as_str()])
        .inc();

    tracing::debug!(
        method = %methode,
        path = %pfad,
        status,
        duration_ms = start.elapsed().as_millis(),
        "HTTP-Anfrage abgeschlossen"
    );

    response
}
