//! Fehlertypen fuer den Connection-Hub

use gateway_core::ConnectionId;
use gateway_protocol::CodecFehler;
use thiserror::Error;

/// Fehlertyp fuer den Connection-Hub
#[derive(Debug, Error)]
pub enum HubFehler {
    /// IO-Fehler (Socket, Listener)
    #[error("IO-Fehler: {0}")]
    Io(#[from] std::io::Error),

    /// Kodieren/Dekodieren fehlgeschlagen
    #[error("Codec-Fehler: {0}")]
    Codec(#[from] CodecFehler),

    /// Keine Verbindung mit dieser ID in der Registry
    #[error("Client nicht gefunden: {0}")]
    ClientNichtGefunden(ConnectionId),

    /// Client hat den Handshake noch nicht abgeschlossen oder schliesst bereits
    #[error("Client nicht aktiv: {0}")]
    NichtAktiv(ConnectionId),

    /// Ausgangs-Queue voll, Nachricht verworfen
    #[error("Ausgangs-Queue voll: {0}")]
    QueueVoll(ConnectionId),

    /// Ausgangs-Queue geschlossen (Verbindung beendet)
    #[error("Verbindung geschlossen: {0}")]
    Geschlossen(ConnectionId),

    /// Hub nimmt keine Verbindungen mehr an
    #[error("Hub wird heruntergefahren")]
    Heruntergefahren,

    /// Methodenname ist fuer das Gateway reserviert
    #[error("Methode '{0}' ist reserviert")]
    ReservierteMethode(String),

    /// Graceful Shutdown hat die Frist ueberschritten
    #[error("Shutdown-Frist ueberschritten: {verbindungen} Verbindungen und {tasks} Tasks zwangsweise beendet")]
    ShutdownTimeout { verbindungen: usize, tasks: usize },
}

impl HubFehler {
    /// true fuer Backpressure-Fehler, die nie zum Schliessen fuehren
    pub fn ist_backpressure(&self) -> bool {
        matches!(self, Self::QueueVoll(_))
    }
}

/// Result-Typ fuer den Connection-Hub
pub type HubResult<T> = Result<T, HubFehler>;
