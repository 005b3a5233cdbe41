//! Nachrichten-Umschlag des Gateway-Protokolls
//!
//! Jede Nachricht auf der Leitung ist ein JSON-Objekt mit einem `kind`-Feld:
//!
//! ```json
//! { "kind": "request",  "id": "1", "method": "connect", "params": { ... } }
//! { "kind": "response", "id": "1", "ok": true, "payload": { ... } }
//! { "kind": "response", "id": "2", "ok": false, "error": "unknown method: x" }
//! { "kind": "event", "event_name": "client.connected", "data": { ... }, "sequence": 7 }
//! ```
//!
//! Die Bodies (`params`, `payload`, `data`) sind fuer das Gateway opak und
//! gehoeren dem jeweiligen Handler.

use serde::{Deserialize, Serialize};
use serde_json::Value;

// ---------------------------------------------------------------------------
// Nachrichtenart
// ---------------------------------------------------------------------------

/// Art einer Protokoll-Nachricht
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    Request,
    Response,
    Event,
}

impl MessageKind {
    /// Parst den Wire-Namen; unbekannte Werte ergeben `None`
    pub fn parsen(s: &str) -> Option<Self> {
        match s {
            "request" => Some(Self::Request),
            "response" => Some(Self::Response),
            "event" => Some(Self::Event),
            _ => None,
        }
    }

    pub fn als_str(&self) -> &'static str {
        match self {
            Self::Request => "request",
            Self::Response => "response",
            Self::Event => "event",
        }
    }
}

impl std::fmt::Display for MessageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.als_str())
    }
}

// ---------------------------------------------------------------------------
// Fehlercodes
// ---------------------------------------------------------------------------

/// Maschinenlesbare Fehlercodes des Gateways
///
/// Auf der Leitung erscheint der Code als lesbarer Text im `error`-Feld
/// einer Antwort (siehe [`ErrorCode::meldung`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // Handshake
    HandshakeRequired,
    InvalidToken,
    DeviceNotAllowed,
    MissingDeviceId,
    InvalidParams,
    AlreadyConnected,
    HandshakeTimeout,
    // Dispatch
    UnknownMethod,
    HandlerFailed,
    ShuttingDown,
}

impl ErrorCode {
    /// Stabiler Code-Name (z.B. `INVALID_TOKEN`) fuer Logs und Metriken
    pub fn als_str(&self) -> &'static str {
        match self {
            Self::HandshakeRequired => "HANDSHAKE_REQUIRED",
            Self::InvalidToken => "INVALID_TOKEN",
            Self::DeviceNotAllowed => "DEVICE_NOT_ALLOWED",
            Self::MissingDeviceId => "MISSING_DEVICE_ID",
            Self::InvalidParams => "INVALID_PARAMS",
            Self::AlreadyConnected => "ALREADY_CONNECTED",
            Self::HandshakeTimeout => "HANDSHAKE_TIMEOUT",
            Self::UnknownMethod => "UNKNOWN_METHOD",
            Self::HandlerFailed => "HANDLER_FAILED",
            Self::ShuttingDown => "SHUTTING_DOWN",
        }
    }

    fn basis(&self) -> &'static str {
        match self {
            Self::HandshakeRequired => "handshake required",
            Self::InvalidToken => "invalid token",
            Self::DeviceNotAllowed => "device not allowed",
            Self::MissingDeviceId => "missing device id",
            Self::InvalidParams => "invalid params",
            Self::AlreadyConnected => "already connected",
            Self::HandshakeTimeout => "handshake timeout",
            Self::UnknownMethod => "unknown method",
            Self::HandlerFailed => "handler failed",
            Self::ShuttingDown => "shutting down",
        }
    }

    /// Baut den Text fuer das `error`-Feld, z.B. `unknown method: foo`
    pub fn meldung(&self, detail: Option<&str>) -> String {
        match detail {
            Some(d) if !d.is_empty() => format!("{}: {}", self.basis(), d),
            _ => self.basis().to_string(),
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.als_str())
    }
}

// ---------------------------------------------------------------------------
// Umschlag
// ---------------------------------------------------------------------------

/// Der Wire-Umschlag fuer alle Nachrichten
///
/// Welche Felder belegt sind, haengt von `kind` ab. Die Konstruktoren
/// (`request`, `response_ok`, `response_error`, `event`) halten diese
/// Zuordnung ein; der Codec prueft beim Dekodieren nur die Struktur.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProtocolMessage {
    pub kind: MessageKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ok: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sequence: Option<u64>,
}

impl ProtocolMessage {
    fn leer(kind: MessageKind) -> Self {
        Self {
            kind,
            id: None,
            method: None,
            params: None,
            ok: None,
            payload: None,
            error: None,
            event_name: None,
            data: None,
            sequence: None,
        }
    }

    /// Erstellt eine Anfrage
    pub fn request(id: impl Into<String>, method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            id: Some(id.into()),
            method: Some(method.into()),
            params,
            ..Self::leer(MessageKind::Request)
        }
    }

    /// Erstellt eine erfolgreiche Antwort
    pub fn response_ok(id: impl Into<String>, payload: Value) -> Self {
        Self {
            id: Some(id.into()),
            ok: Some(true),
            payload: Some(payload),
            ..Self::leer(MessageKind::Response)
        }
    }

    /// Erstellt eine Fehlerantwort; eine leere ID wird weggelassen
    pub fn response_error(id: impl Into<String>, error: impl Into<String>) -> Self {
        let id: String = id.into();
        Self {
            id: (!id.is_empty()).then_some(id),
            ok: Some(false),
            error: Some(error.into()),
            ..Self::leer(MessageKind::Response)
        }
    }

    /// Erstellt eine Fehlerantwort aus einem Fehlercode
    pub fn response_code(id: impl Into<String>, code: ErrorCode, detail: Option<&str>) -> Self {
        Self::response_error(id, code.meldung(detail))
    }

    /// Erstellt ein Event mit Bus-Sequenznummer
    pub fn event(event_name: impl Into<String>, data: Value, sequence: u64) -> Self {
        Self {
            event_name: Some(event_name.into()),
            data: Some(data),
            sequence: Some(sequence),
            ..Self::leer(MessageKind::Event)
        }
    }

    /// Korrelations-ID oder leerer String
    pub fn korrelations_id(&self) -> &str {
        self.id.as_deref().unwrap_or("")
    }

    /// Methodenname einer Anfrage oder leerer String
    pub fn methode(&self) -> &str {
        self.method.as_deref().unwrap_or("")
    }

    pub fn ist_anfrage(&self) -> bool {
        self.kind == MessageKind::Request
    }

    /// true fuer eine Antwort mit `ok == true`
    pub fn ist_erfolg(&self) -> bool {
        self.kind == MessageKind::Response && self.ok == Some(true)
    }

    /// Serialisiert die Nachricht zu einem JSON-String
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    /// Deserialisiert eine Nachricht ohne strukturelle Pruefung
    ///
    /// Fuer validiertes Dekodieren von der Leitung `ProtocolCodec::decode`
    /// verwenden.
    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }
}
