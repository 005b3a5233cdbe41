//! Eventnamen und Event-Bodies, die das Gateway selbst erzeugt

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::handshake::ClientType;

pub const CLIENT_CONNECTED: &str = "client.connected";
pub const CLIENT_DISCONNECTED: &str = "client.disconnected";
pub const CLIENT_UPDATE: &str = "client.update";
pub const SESSION_CREATED: &str = "session.created";
pub const SESSION_CLOSED: &str = "session.closed";
pub const SESSION_UPDATE: &str = "session.update";
pub const STATE_UPDATE: &str = "state.update";
pub const CUSTOM: &str = "custom";

/// Eventtypen, die standardmaessig an verbundene Clients weitergeleitet werden
pub fn standard_weiterleitung() -> Vec<String> {
    [
        CLIENT_CONNECTED,
        CLIENT_DISCONNECTED,
        CLIENT_UPDATE,
        SESSION_CREATED,
        SESSION_CLOSED,
        STATE_UPDATE,
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

/// Body von `client.connected`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientConnectedDaten {
    pub client_id: String,
    pub device_id: String,
    pub session_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_type: Option<ClientType>,
    pub connected_at: DateTime<Utc>,
}

/// Body von `client.disconnected`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientDisconnectedDaten {
    pub client_id: String,
    pub device_id: String,
    pub session_id: String,
    /// Kurzname des Schliessgrunds, z.B. `idle_timeout`
    pub reason: String,
    pub disconnected_at: DateTime<Utc>,
}
