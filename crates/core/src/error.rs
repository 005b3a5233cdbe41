//! Fehlertypen fuer das Gateway
//!
//! Zentraler Fehler-Enum fuer prozessweite Fehler (Konfiguration, Start).
//! Die Crates `gateway-protocol` und `gateway-hub` definieren eigene
//! Fehler fuer ihre Schichten.

use thiserror::Error;

/// Globaler Result-Alias fuer das Gateway
pub type Result<T> = std::result::Result<T, GatewayError>;

/// Prozessweite Fehler des Gateways
#[derive(Debug, Error)]
pub enum GatewayError {
    // --- Konfiguration ---
    #[error("Konfigurationsfehler: {0}")]
    Konfiguration(String),

    #[error("Ungueltige Adresse '{adresse}': {grund}")]
    UngueltigeAdresse { adresse: String, grund: String },

    // --- Netzwerk ---
    #[error("Bind fehlgeschlagen ({adresse}): {quelle}")]
    Bind {
        adresse: String,
        #[source]
        quelle: std::io::Error,
    },
}

impl GatewayError {
    /// Erstellt einen Konfigurationsfehler
    pub fn konfiguration(msg: impl Into<String>) -> Self {
        Self::Konfiguration(msg.into())
    }
}
