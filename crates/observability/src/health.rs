//! Health-Check-Endpunkt des Gateways
//!
//! Endpoint: `GET /health`
//! Response: `{"status":"ok","gateway_id":"...","uptime_sek":12,"connected_clients":3}`

use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Json, Router};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use crate::metrics::GatewayMetrics;

/// Status des Health-Checks
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Ok,
    ShuttingDown,
}

/// Antwort des Health-Check-Endpunkts
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: HealthStatus,
    pub gateway_id: String,
    pub uptime_sek: u64,
    pub connected_clients: i64,
}

/// Geteilter Zustand fuer den Health-Check-Handler
#[derive(Clone)]
pub struct HealthState {
    pub start_time: Arc<Instant>,
    pub gateway_id: Arc<str>,
    beendend: Arc<AtomicBool>,
    metriken: GatewayMetrics,
}

impl HealthState {
    pub fn neu(gateway_id: impl Into<String>, metriken: GatewayMetrics) -> Self {
        Self {
            start_time: Arc::new(Instant::now()),
            gateway_id: Arc::from(gateway_id.into()),
            beendend: Arc::new(AtomicBool::new(false)),
            metriken,
        }
    }

    pub fn uptime_sek(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    /// Markiert das Gateway als herunterfahrend (`/health` liefert dann 503)
    pub fn beenden_markieren(&self) {
        self.beendend.store(true, Ordering::Relaxed);
    }

    pub fn ist_beendend(&self) -> bool {
        self.beendend.load(Ordering::Relaxed)
    }

    /// Baut die aktuelle Antwort samt HTTP-Status
    pub fn antwort(&self) -> (StatusCode, HealthResponse) {
        let (http_status, status) = if self.ist_beendend() {
            (StatusCode::SERVICE_UNAVAILABLE, HealthStatus::ShuttingDown)
        } else {
            (StatusCode::OK, HealthStatus::Ok)
        };

        let response = HealthResponse {
            status,
            gateway_id: self.gateway_id.to_string(),
            uptime_sek: self.uptime_sek(),
            connected_clients: self.metriken.connected_clients.get(),
        };
        (http_status, response)
    }
}

/// Axum-Router fuer den `/health`-Endpunkt
pub fn health_router(state: HealthState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .with_state(state)
}

/// `GET /health` – gibt den Gateway-Status zurueck
async fn health_handler(State(state): State<HealthState>) -> impl IntoResponse {
    let (http_status, response) = state.antwort();
    (http_status, Json(response))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state() -> HealthState {
        HealthState::neu("gw-test", GatewayMetrics::neu().unwrap())
    }

    #[test]
    fn frischer_zustand_ist_ok() {
        let (code, antwort) = state().antwort();
        assert_eq!(code, StatusCode::OK);
        assert_eq!(antwort.status, HealthStatus::Ok);
        assert_eq!(antwort.gateway_id, "gw-test");
        assert!(antwort.uptime_sek < 5);
    }

    #[test]
    fn clients_aus_metriken() {
        let metriken = GatewayMetrics::neu().unwrap();
        let state = HealthState::neu("gw", metriken.clone());
        metriken.connected_clients.set(3);
        assert_eq!(state.antwort().1.connected_clients, 3);
    }

    #[test]
    fn beendend_liefert_503() {
        let state = state();
        state.beenden_markieren();
        let (code, antwort) = state.antwort();
        assert_eq!(code, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(antwort.status, HealthStatus::ShuttingDown);
    }

    #[test]
    fn health_response_serialisierung() {
        let response = HealthResponse {
            status: HealthStatus::Ok,
            gateway_id: "gw-1".to_string(),
            uptime_sek: 3600,
            connected_clients: 2,
        };

        let json = serde_json::to_string(&response).unwrap();
        assert!(json.contains("\"status\":\"ok\""));
        assert!(json.contains("\"gateway_id\":\"gw-1\""));
        assert!(json.contains("\"uptime_sek\":3600"));
    }

    #[tokio::test]
    async fn handler_antwortet_mit_json() {
        let antwort = health_handler(State(state())).await.into_response();
        assert_eq!(antwort.status(), StatusCode::OK);
    }
}
