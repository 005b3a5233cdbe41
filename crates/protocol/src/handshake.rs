//! Handshake-Typen: `connect`-Parameter, Hello-Antwort und Zustands-Snapshot

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::message::ErrorCode;

/// Methodenname der Handshake-Anfrage
pub const CONNECT_METHODE: &str = "connect";

/// Protokollversion, die das Gateway aushandelt
pub const PROTOKOLL_VERSION: &str = "1.0";

/// Art des verbundenen Clients
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClientType {
    Agent,
    Node,
    Web,
    Mobile,
}

/// Parameter der `connect`-Anfrage
///
/// Wird beim Dekodieren vollstaendig validiert, danach sind
/// `device_id` und `version` garantiert nicht leer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectParams {
    #[serde(default)]
    pub device_id: String,
    #[serde(default)]
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    /// Nicht angegeben = unbekannt
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_type: Option<ClientType>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub capabilities: Vec<String>,
}

/// Grund fuer die Ablehnung eines Handshakes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeAblehnung {
    pub code: ErrorCode,
    pub detail: Option<String>,
}

impl HandshakeAblehnung {
    pub fn neu(code: ErrorCode) -> Self {
        Self { code, detail: None }
    }

    pub fn mit_detail(code: ErrorCode, detail: impl Into<String>) -> Self {
        Self {
            code,
            detail: Some(detail.into()),
        }
    }

    /// Text fuer das `error`-Feld der Antwort
    pub fn meldung(&self) -> String {
        self.code.meldung(self.detail.as_deref())
    }
}

impl ConnectParams {
    /// Parst und validiert die rohen `params` einer `connect`-Anfrage
    ///
    /// Fehlende Params sind `InvalidParams`, ein fehlendes oder leeres
    /// Geraet im Params-Objekt ist `MissingDeviceId`.
    pub fn aus_params(params: Option<&Value>) -> Result<Self, HandshakeAblehnung> {
        let params: ConnectParams = match params {
            None | Some(Value::Null) => {
                return Err(HandshakeAblehnung::mit_detail(ErrorCode::InvalidParams, "missing params"))
            }
            Some(v) => serde_json::from_value(v.clone())
                .map_err(|e| HandshakeAblehnung::mit_detail(ErrorCode::InvalidParams, e.to_string()))?,
        };

        if params.device_id.trim().is_empty() {
            return Err(HandshakeAblehnung::neu(ErrorCode::MissingDeviceId));
        }
        if params.version.trim().is_empty() {
            return Err(HandshakeAblehnung::mit_detail(
                ErrorCode::InvalidParams,
                "missing version",
            ));
        }

        Ok(params)
    }
}

/// Unveraenderliche, versionierte Sicht auf den Gateway-Zustand
///
/// Wird bei Bedarf neu erzeugt und immer als Ganzes ersetzt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateSnapshot {
    pub version: u64,
    pub gateway_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    pub workspace: String,
    pub timestamp: DateTime<Utc>,
    pub client_count: usize,
}

/// Payload der erfolgreichen Handshake-Antwort
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HelloPayload {
    pub protocol_version: String,
    pub device_id: String,
    pub session_id: String,
    pub client_id: String,
    pub workspace: String,
    pub state: StateSnapshot,
}
