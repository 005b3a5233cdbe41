//! Prometheus-kompatible Metriken fuer das Gateway
//!
//! Registrierte Metriken:
//! - `gateway_connected_clients` – Gauge: Clients in der Registry
//! - `gateway_handshakes_total` – Counter: Handshakes nach Ergebnis (`result`)
//! - `gateway_outbound_drops_total` – Counter: verworfene Nachrichten wegen voller Ausgangs-Queue
//! - `gateway_event_drops_total` – Counter: verworfene Event-Zustellungen an Abonnenten
//! - `gateway_events_published_total` – Counter: auf dem EventBus veroeffentlichte Events
//! - `gateway_idle_evictions_total` – Counter: wegen Inaktivitaet geschlossene Verbindungen
//! - `gateway_frames_received_total` – Counter: empfangene Frames
//! - `gateway_http_requests_total` – Counter: HTTP-Anfragen (method, path, status)

use anyhow::Result;
use axum::{extract::State, response::IntoResponse, routing::get, Router};
use prometheus::{Encoder, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};
use std::sync::Arc;

/// Alle Gateway-Metriken in einer eigenen Registry
///
/// Klonen ist billig; alle Klone zaehlen in dieselben Metriken.
#[derive(Clone)]
pub struct GatewayMetrics {
    pub registry: Arc<Registry>,

    // Verbindungen
    pub connected_clients: IntGauge,
    pub handshakes_total: IntCounterVec,
    pub idle_evictions_total: IntCounter,
    pub frames_received_total: IntCounter,

    // Backpressure
    pub outbound_drops_total: IntCounter,
    pub event_drops_total: IntCounter,
    pub events_published_total: IntCounter,

    // HTTP
    pub http_requests_total: IntCounterVec,
}

impl GatewayMetrics {
    /// Erstellt und registriert alle Metriken in einer neuen Registry
    pub fn neu() -> Result<Self> {
        let registry = Registry::new();

        let connected_clients = IntGauge::with_opts(Opts::new(
            "gateway_connected_clients",
            "Anzahl Clients in der Registry",
        ))?;
        registry.register(Box::new(connected_clients.clone()))?;

        let handshakes_total = IntCounterVec::new(
            Opts::new("gateway_handshakes_total", "Handshakes nach Ergebnis"),
            &["result"],
        )?;
        registry.register(Box::new(handshakes_total.clone()))?;

        let idle_evictions_total = IntCounter::with_opts(Opts::new(
            "gateway_idle_evictions_total",
            "Wegen Inaktivitaet geschlossene Verbindungen",
        ))?;
        registry.register(Box::new(idle_evictions_total.clone()))?;

        let frames_received_total = IntCounter::with_opts(Opts::new(
            "gateway_frames_received_total",
            "Empfangene Frames (alle Typen)",
        ))?;
        registry.register(Box::new(frames_received_total.clone()))?;

        let outbound_drops_total = IntCounter::with_opts(Opts::new(
            "gateway_outbound_drops_total",
            "Verworfene Nachrichten wegen voller Ausgangs-Queue",
        ))?;
        registry.register(Box::new(outbound_drops_total.clone()))?;

        let event_drops_total = IntCounter::with_opts(Opts::new(
            "gateway_event_drops_total",
            "Verworfene Event-Zustellungen an Abonnenten",
        ))?;
        registry.register(Box::new(event_drops_total.clone()))?;

        let events_published_total = IntCounter::with_opts(Opts::new(
            "gateway_events_published_total",
            "Auf dem EventBus veroeffentlichte Events",
        ))?;
        registry.register(Box::new(events_published_total.clone()))?;

        let http_requests_total = IntCounterVec::new(
            Opts::new("gateway_http_requests_total", "Gesamtanzahl HTTP-Anfragen"),
            &["method", "path", "status"],
        )?;
        registry.register(Box::new(http_requests_total.clone()))?;

        Ok(Self {
            registry: Arc::new(registry),
            connected_clients,
            handshakes_total,
            idle_evictions_total,
            frames_received_total,
            outbound_drops_total,
            event_drops_total,
            events_published_total,
            http_requests_total,
        })
    }

    /// Zaehlt einen Handshake mit Ergebnis-Label (`ok` oder Fehlercode)
    pub fn handshake_zaehlen(&self, ergebnis: &str) {
        self.handshakes_total.with_label_values(&[ergebnis]).inc();
    }

    /// Exportiert alle Metriken im Prometheus-Textformat
    pub fn exportieren(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }
}

/// Axum-Router fuer den `/metrics`-Endpunkt
pub fn metrics_router(metriken: GatewayMetrics) -> Router {
    Router::new()
        .route("/metrics", get(metrics_handler))
        .with_state(metriken)
}

async fn metrics_handler(State(metriken): State<GatewayMetrics>) -> impl IntoResponse {
    match metriken.exportieren() {
        Ok(text) => (
            axum::http::StatusCode::OK,
            [(axum::http::header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            text,
        )
            .into_response(),
        Err(err) => {
            tracing::error!("Metriken-Export fehlgeschlagen: {err}");
            axum::http::StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metriken_erstellen_erfolgreich() {
        let metriken = GatewayMetrics::neu().unwrap();
        assert!(!metriken.registry.gather().is_empty());
    }

    #[test]
    fn klone_teilen_zaehler() {
        let metriken = GatewayMetrics::neu().unwrap();
        let klon = metriken.clone();
        klon.outbound_drops_total.inc();
        klon.outbound_drops_total.inc_by(2);
        assert_eq!(metriken.outbound_drops_total.get(), 3);
    }

    #[test]
    fn handshake_labels() {
        let metriken = GatewayMetrics::neu().unwrap();
        metriken.handshake_zaehlen("ok");
        metriken.handshake_zaehlen("ok");
        metriken.handshake_zaehlen("INVALID_TOKEN");
        assert_eq!(metriken.handshakes_total.with_label_values(&["ok"]).get(), 2);
        assert_eq!(
            metriken.handshakes_total.with_label_values(&["INVALID_TOKEN"]).get(),
            1
        );
    }

    #[test]
    fn zwei_instanzen_sind_unabhaengig() {
        // Keine globale Registry: Tests koennen eigene Instanzen bauen
        let a = GatewayMetrics::neu().unwrap();
        let b = GatewayMetrics::neu().unwrap();
        a.connected_clients.set(5);
        assert_eq!(b.connected_clients.get(), 0);
    }

    #[test]
    fn metriken_export_prometheus_format() {
        let metriken = GatewayMetrics::neu().unwrap();
        metriken.connected_clients.set(5);
        metriken.events_published_total.inc();

        let output = metriken.exportieren().unwrap();
        assert!(output.contains("gateway_connected_clients 5"));
        assert!(output.contains("gateway_events_published_total 1"));
        assert!(output.contains("# HELP"));
        assert!(output.contains("# TYPE"));
    }
}
