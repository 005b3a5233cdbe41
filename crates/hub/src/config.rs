//! Konfiguration fuer Hub und Heartbeat
//!
//! Beide Werte werden einmal beim Prozessstart gebaut und explizit an die
//! Konstruktoren uebergeben. Es gibt keinen globalen Zustand.

use gateway_core::GatewayId;
use gateway_protocol::{events, DEFAULT_MAX_NACHRICHT};
use std::time::Duration;

/// Konfiguration des Connection-Hubs
#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Identitaet dieser Gateway-Instanz
    pub gateway_id: GatewayId,
    /// Workspace-Tag im Handshake und in Snapshots
    pub workspace: String,
    /// Maximale Groesse eingehender Frames in Bytes
    pub max_frame_groesse: usize,
    /// Kapazitaet der Ausgangs-Queue pro Verbindung
    pub ausgangs_queue: usize,
    /// Frist fuer das Schreiben eines einzelnen Frames
    pub schreib_timeout: Duration,
    /// Intervall fuer Keepalive-Pings auf Transportebene
    pub keepalive_intervall: Duration,
    /// Zeit bis zum `connect` nach dem Accept
    pub handshake_timeout: Duration,
    /// Kapazitaet der Zustell-Queue pro EventBus-Abonnement
    pub event_queue: usize,
    /// Eventtypen, die der Hub an verbundene Clients weiterleitet
    pub weitergeleitete_events: Vec<String>,
    /// Intervall fuer `state.update`-Snapshots, `Duration::ZERO` deaktiviert
    pub snapshot_intervall: Duration,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            gateway_id: GatewayId::new(),
            workspace: "default".to_string(),
            max_frame_groesse: DEFAULT_MAX_NACHRICHT,
            ausgangs_queue: 256,
            schreib_timeout: Duration::from_secs(10),
            keepalive_intervall: Duration::from_secs(54),
            handshake_timeout: Duration::from_secs(10),
            event_queue: 256,
            weitergeleitete_events: events::standard_weiterleitung(),
            snapshot_intervall: Duration::from_secs(30),
        }
    }
}

/// Konfiguration des Heartbeat-Managers
#[derive(Debug, Clone)]
pub struct HeartbeatConfig {
    /// Intervall der Protokoll-Probes an aktive Clients
    pub probe_intervall: Duration,
    /// Intervall der Leerlauf-Pruefung
    pub pruef_intervall: Duration,
    /// Inaktivitaet, nach der eine Verbindung geschlossen wird
    pub idle_timeout: Duration,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            probe_intervall: Duration::from_secs(54),
            pruef_intervall: Duration::from_secs(60),
            idle_timeout: Duration::from_secs(5 * 60),
        }
    }
}
