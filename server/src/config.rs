//! Server-Konfiguration
//!
//! Wird beim Start aus einer TOML-Datei geladen. Alle Felder haben
//! sinnvolle Standardwerte, sodass das Gateway ohne Konfigurationsdatei
//! lauffaehig ist. Der Hub selbst sieht nur die daraus gebauten
//! `HubConfig`/`HeartbeatConfig`-Werte.

use gateway_core::{GatewayError, GatewayId, Result};
use gateway_hub::{HeartbeatConfig, HubConfig, StatischePolicy};
use gateway_observability::{log_format_gueltig, log_level_gueltig};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::time::Duration;

/// Vollstaendige Server-Konfiguration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Listener und Prozess
    pub server: ServerEinstellungen,
    /// HTTP-Oberflaeche fuer `/health` und `/metrics`
    pub health: HealthEinstellungen,
    /// Hub-Parameter
    pub gateway: GatewayEinstellungen,
    /// Probes und Leerlauf-Eviction
    pub heartbeat: HeartbeatEinstellungen,
    /// Token- und Geraete-Pruefung im Handshake
    pub auth: AuthEinstellungen,
    /// Logging-Einstellungen
    pub logging: LoggingEinstellungen,
}

/// Listener und Prozess
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerEinstellungen {
    /// Bind-Adresse des TCP-Listeners
    pub host: String,
    /// Port des TCP-Listeners
    pub port: u16,
    /// Maximale Anzahl gleichzeitiger Verbindungen (0 = unbegrenzt)
    pub max_clients: usize,
    /// Frist fuer den Graceful Shutdown
    pub shutdown_timeout_sek: u64,
}

impl Default for ServerEinstellungen {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 18790,
            max_clients: 0,
            shutdown_timeout_sek: 10,
        }
    }
}

/// HTTP-Oberflaeche
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthEinstellungen {
    pub aktiviert: bool,
    /// Bind-Adresse, z.B. `127.0.0.1:18791`
    pub bind: String,
}

impl Default for HealthEinstellungen {
    fn default() -> Self {
        Self {
            aktiviert: true,
            bind: "127.0.0.1:18791".into(),
        }
    }
}

/// Hub-Parameter
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayEinstellungen {
    /// Leer = zufaellige ID beim Start
    pub gateway_id: String,
    pub workspace: String,
    pub max_frame_size: usize,
    pub outbound_queue: usize,
    pub event_queue: usize,
    pub write_timeout_sek: u64,
    pub handshake_timeout_sek: u64,
    pub keepalive_sek: u64,
    /// 0 = kein periodisches `state.update`
    pub snapshot_intervall_sek: u64,
    /// Eventtypen, die an Clients weitergeleitet werden
    pub weitergeleitete_events: Vec<String>,
}

impl Default for GatewayEinstellungen {
    fn default() -> Self {
        let hub = HubConfig::default();
        Self {
            gateway_id: String::new(),
            workspace: hub.workspace,
            max_frame_size: hub.max_frame_groesse,
            outbound_queue: hub.ausgangs_queue,
            event_queue: hub.event_queue,
            write_timeout_sek: hub.schreib_timeout.as_secs(),
            handshake_timeout_sek: hub.handshake_timeout.as_secs(),
            keepalive_sek: hub.keepalive_intervall.as_secs(),
            snapshot_intervall_sek: hub.snapshot_intervall.as_secs(),
            weitergeleitete_events: hub.weitergeleitete_events,
        }
    }
}

/// Probes und Leerlauf-Eviction
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HeartbeatEinstellungen {
    pub probe_intervall_sek: u64,
    pub pruef_intervall_sek: u64,
    pub idle_timeout_sek: u64,
}

impl Default for HeartbeatEinstellungen {
    fn default() -> Self {
        let hb = HeartbeatConfig::default();
        Self {
            probe_intervall_sek: hb.probe_intervall.as_secs(),
            pruef_intervall_sek: hb.pruef_intervall.as_secs(),
            idle_timeout_sek: hb.idle_timeout.as_secs(),
        }
    }
}

/// Token- und Geraete-Pruefung
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthEinstellungen {
    pub enabled: bool,
    pub token_required: bool,
    pub tokens: Vec<String>,
    pub device_check: bool,
    pub allowed_device_ids: Vec<String>,
}

/// Logging-Einstellungen
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingEinstellungen {
    /// Log-Level (trace, debug, info, warn, error)
    pub level: String,
    /// Log-Format (text, json)
    pub format: String,
}

impl Default for LoggingEinstellungen {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: "text".into(),
        }
    }
}

impl ServerConfig {
    /// Laedt die Konfiguration aus einer TOML-Datei.
    /// Gibt die Standardkonfiguration zurueck wenn die Datei nicht existiert.
    pub fn laden(pfad: &str) -> Result<Self> {
        match std::fs::read_to_string(pfad) {
            Ok(inhalt) => Self::aus_toml(&inhalt).map_err(|e| match e {
                GatewayError::Konfiguration(msg) => {
                    GatewayError::konfiguration(format!("'{pfad}': {msg}"))
                }
                andere => andere,
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::warn!(
                    pfad = pfad,
                    "Konfigurationsdatei nicht gefunden, verwende Standardwerte"
                );
                Ok(Self::default())
            }
            Err(e) => Err(GatewayError::konfiguration(format!(
                "Datei '{pfad}' nicht lesbar: {e}"
            ))),
        }
    }

    /// Parst und validiert einen TOML-String
    pub fn aus_toml(inhalt: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(inhalt).map_err(|e| GatewayError::konfiguration(e.to_string()))?;
        config.validieren()?;
        Ok(config)
    }

    /// Prueft Werte, die der Hub nicht sinnvoll verarbeiten kann
    pub fn validieren(&self) -> Result<()> {
        let g = &self.gateway;
        if g.max_frame_size == 0 {
            return Err(GatewayError::konfiguration("gateway.max_frame_size muss > 0 sein"));
        }
        if g.outbound_queue == 0 || g.event_queue == 0 {
            return Err(GatewayError::konfiguration("Queue-Kapazitaeten muessen > 0 sein"));
        }
        if g.write_timeout_sek == 0 || g.handshake_timeout_sek == 0 || g.keepalive_sek == 0 {
            return Err(GatewayError::konfiguration(
                "gateway.write/handshake/keepalive muessen > 0 sein",
            ));
        }

        let h = &self.heartbeat;
        if h.probe_intervall_sek == 0 || h.pruef_intervall_sek == 0 || h.idle_timeout_sek == 0 {
            return Err(GatewayError::konfiguration("heartbeat-Intervalle muessen > 0 sein"));
        }

        if self.auth.enabled && self.auth.token_required && self.auth.tokens.is_empty() {
            return Err(GatewayError::konfiguration(
                "auth.token_required ohne auth.tokens sperrt alle Clients aus",
            ));
        }

        if !log_level_gueltig(&self.logging.level) {
            return Err(GatewayError::konfiguration(format!(
                "unbekanntes Log-Level '{}'",
                self.logging.level
            )));
        }
        if !log_format_gueltig(&self.logging.format) {
            return Err(GatewayError::konfiguration(format!(
                "unbekanntes Log-Format '{}'",
                self.logging.format
            )));
        }

        self.tcp_bind_adresse()?;
        if self.health.aktiviert {
            self.health_bind_adresse()?;
        }
        Ok(())
    }

    /// Adresse des TCP-Listeners
    pub fn tcp_bind_adresse(&self) -> Result<SocketAddr> {
        adresse_parsen(&format!("{}:{}", self.server.host, self.server.port))
    }

    /// Adresse der HTTP-Oberflaeche
    pub fn health_bind_adresse(&self) -> Result<SocketAddr> {
        adresse_parsen(&self.health.bind)
    }

    pub fn shutdown_frist(&self) -> Duration {
        Duration::from_secs(self.server.shutdown_timeout_sek)
    }

    /// Baut die Hub-Konfiguration
    pub fn hub_config(&self) -> HubConfig {
        let g = &self.gateway;
        HubConfig {
            gateway_id: GatewayId::aus_konfig(&g.gateway_id),
            workspace: g.workspace.clone(),
            max_frame_groesse: g.max_frame_size,
            ausgangs_queue: g.outbound_queue,
            schreib_timeout: Duration::from_secs(g.write_timeout_sek),
            keepalive_intervall: Duration::from_secs(g.keepalive_sek),
            handshake_timeout: Duration::from_secs(g.handshake_timeout_sek),
            event_queue: g.event_queue,
            weitergeleitete_events: g.weitergeleitete_events.clone(),
            snapshot_intervall: Duration::from_secs(g.snapshot_intervall_sek),
        }
    }

    pub fn heartbeat_config(&self) -> HeartbeatConfig {
        HeartbeatConfig {
            probe_intervall: Duration::from_secs(self.heartbeat.probe_intervall_sek),
            pruef_intervall: Duration::from_secs(self.heartbeat.pruef_intervall_sek),
            idle_timeout: Duration::from_secs(self.heartbeat.idle_timeout_sek),
        }
    }

    /// Auth-Policy aus dem `[auth]`-Abschnitt
    pub fn auth_policy(&self) -> StatischePolicy {
        let a = &self.auth;
        StatischePolicy {
            aktiviert: a.enabled,
            token_erforderlich: a.token_required,
            tokens: a.tokens.iter().cloned().collect(),
            geraete_pruefung: a.device_check,
            erlaubte_geraete: a.allowed_device_ids.iter().cloned().collect(),
        }
    }
}

fn adresse_parsen(adresse: &str) -> Result<SocketAddr> {
    adresse
        .parse()
        .map_err(|e: std::net::AddrParseError| GatewayError::UngueltigeAdresse {
            adresse: adresse.to_string(),
            grund: e.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use gateway_hub::AuthPolicy;

    #[test]
    fn standard_config_ist_valide() {
        let cfg = ServerConfig::default();
        cfg.validieren().unwrap();
        assert_eq!(cfg.server.port, 18790);
        assert_eq!(cfg.server.shutdown_timeout_sek, 10);
        assert_eq!(cfg.gateway.max_frame_size, 8192);
        assert_eq!(cfg.logging.level, "info");
        assert!(!cfg.auth.enabled);
    }

    #[test]
    fn bind_adressen() {
        let cfg = ServerConfig::default();
        assert_eq!(cfg.tcp_bind_adresse().unwrap().to_string(), "127.0.0.1:18790");
        assert_eq!(cfg.health_bind_adresse().unwrap().port(), 18791);
    }

    #[test]
    fn config_aus_toml_string() {
        let toml = r#"
            [server]
            port = 20000
            max_clients = 100

            [gateway]
            gateway_id = "gw-test"
            handshake_timeout_sek = 3
        "#;
        let cfg = ServerConfig::aus_toml(toml).unwrap();
        assert_eq!(cfg.server.port, 20000);
        assert_eq!(cfg.server.max_clients, 100);
        // Nicht angegebene Felder behalten Standardwerte
        assert_eq!(cfg.server.host, "127.0.0.1");
        assert_eq!(cfg.gateway.outbound_queue, 256);

        let hub = cfg.hub_config();
        assert_eq!(hub.gateway_id.as_str(), "gw-test");
        assert_eq!(hub.handshake_timeout, Duration::from_secs(3));
        assert_eq!(hub.ausgangs_queue, 256);
    }

    #[test]
    fn leere_gateway_id_wird_generiert() {
        let hub = ServerConfig::default().hub_config();
        assert!(hub.gateway_id.as_str().starts_with("gateway-"));
    }

    #[test]
    fn ungueltige_werte_werden_abgelehnt() {
        assert!(ServerConfig::aus_toml("[gateway]\noutbound_queue = 0").is_err());
        assert!(ServerConfig::aus_toml("[heartbeat]\nidle_timeout_sek = 0").is_err());
        assert!(ServerConfig::aus_toml("[logging]\nlevel = \"laut\"").is_err());
        assert!(ServerConfig::aus_toml("[server]\nhost = \"kein host\"").is_err());
        assert!(ServerConfig::aus_toml("[auth]\nenabled = true\ntoken_required = true").is_err());
        assert!(ServerConfig::aus_toml("[server]\nport = \"x\"").is_err());
    }

    #[test]
    fn health_adresse_nur_wenn_aktiviert() {
        let toml = "[health]\naktiviert = false\nbind = \"nix\"";
        assert!(ServerConfig::aus_toml(toml).is_ok());
    }

    #[test]
    fn auth_abschnitt_wird_zur_policy() {
        let toml = r#"
            [auth]
            enabled = true
            token_required = true
            tokens = ["abc"]
            device_check = true
            allowed_device_ids = ["d1"]
        "#;
        let policy = ServerConfig::aus_toml(toml).unwrap().auth_policy();
        assert!(policy.token_validieren(Some("abc")));
        assert!(!policy.token_validieren(Some("xyz")));
        assert!(!policy.token_validieren(None));
        assert!(policy.geraet_erlaubt("d1"));
        assert!(!policy.geraet_erlaubt("d2"));
    }

    #[test]
    fn fehlende_datei_liefert_standard() {
        let cfg = ServerConfig::laden("/nicht/vorhanden/gateway.toml").unwrap();
        assert_eq!(cfg.server.port, 18790);
    }

    #[test]
    fn heartbeat_umrechnung() {
        let cfg = ServerConfig::aus_toml("[heartbeat]\nidle_timeout_sek = 90").unwrap();
        let hb = cfg.heartbeat_config();
        assert_eq!(hb.idle_timeout, Duration::from_secs(90));
        assert_eq!(hb.pruef_intervall, Duration::from_secs(60));
    }
}
