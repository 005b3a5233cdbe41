//! Client – geteilte Sicht auf eine Verbindung
//!
//! Der Hub besitzt den Registry-Eintrag (`Arc<Client>`), die Verbindung
//! besitzt Socket und Queue-Empfaenger. Der Client haelt nur den Sender der
//! Ausgangs-Queue, Zeitstempel und den Zustand.
//!
//! ## State Machine
//! ```text
//! Verbindend --connect ok--> Aktiv --Fehler/Leerlauf/Shutdown--> Schliessend --> Geschlossen
//!     |                                                                              ^
//!     +---------------- Handshake-Fehler / Handshake-Timeout -----------------------+
//! ```

use bytes::Bytes;
use chrono::{DateTime, Utc};
use gateway_core::{ConnectionId, SessionId};
use gateway_protocol::{ClientType, Frame};
use parking_lot::Mutex;
use std::sync::OnceLock;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::task::AbortHandle;
use tokio_util::sync::CancellationToken;

use crate::error::{HubFehler, HubResult};

// ---------------------------------------------------------------------------
// Verbindungszustand
// ---------------------------------------------------------------------------

/// Zustand einer Verbindung
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerbindungsZustand {
    /// Angenommen, Handshake steht aus
    Verbindend,
    /// Handshake erfolgreich
    Aktiv,
    /// Schliessen angestossen, Loops laufen aus
    Schliessend,
    /// Terminal, nicht mehr in der Registry
    Geschlossen,
}

/// Grund fuer das Schliessen einer Verbindung
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchliessGrund {
    PeerGeschlossen,
    Protokollfehler,
    HandshakeFehlgeschlagen,
    HandshakeTimeout,
    Leerlauf,
    SchreibTimeout,
    TransportFehler,
    Shutdown,
}

impl SchliessGrund {
    /// Kurzname fuer Logs und `client.disconnected`
    pub fn als_str(&self) -> &'static str {
        match self {
            Self::PeerGeschlossen => "peer_closed",
            Self::Protokollfehler => "protocol_error",
            Self::HandshakeFehlgeschlagen => "handshake_failed",
            Self::HandshakeTimeout => "handshake_timeout",
            Self::Leerlauf => "idle_timeout",
            Self::SchreibTimeout => "write_timeout",
            Self::TransportFehler => "transport_error",
            Self::Shutdown => "shutdown",
        }
    }
}

impl std::fmt::Display for SchliessGrund {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.als_str())
    }
}

// ---------------------------------------------------------------------------
// Sitzung
// ---------------------------------------------------------------------------

/// Ergebnis eines erfolgreichen Handshakes, danach unveraenderlich
#[derive(Debug, Clone)]
pub struct Sitzung {
    pub session_id: SessionId,
    pub device_id: String,
    pub client_type: Option<ClientType>,
    pub version: String,
    pub capabilities: Vec<String>,
    pub verbunden_am: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// Registry-Eintrag einer Verbindung
pub struct Client {
    id: ConnectionId,
    sitzung: OnceLock<Sitzung>,
    zustand: Mutex<VerbindungsZustand>,
    grund: OnceLock<SchliessGrund>,
    erstellt: Instant,
    erstellt_am: DateTime<Utc>,
    letzte_aktivitaet: Mutex<Instant>,
    ausgang: mpsc::Sender<Frame>,
    abbruch: CancellationToken,
    tasks: Mutex<Vec<AbortHandle>>,
}

impl Client {
    pub(crate) fn neu(id: ConnectionId, ausgang: mpsc::Sender<Frame>, abbruch: CancellationToken) -> Self {
        let jetzt = Instant::now();
        Self {
            id,
            sitzung: OnceLock::new(),
            zustand: Mutex::new(VerbindungsZustand::Verbindend),
            grund: OnceLock::new(),
            erstellt: jetzt,
            erstellt_am: Utc::now(),
            letzte_aktivitaet: Mutex::new(jetzt),
            ausgang,
            abbruch,
            tasks: Mutex::new(Vec::new()),
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn zustand(&self) -> VerbindungsZustand {
        *self.zustand.lock()
    }

    pub fn ist_aktiv(&self) -> bool {
        self.zustand() == VerbindungsZustand::Aktiv
    }

    /// Sitzung nach erfolgreichem Handshake
    pub fn sitzung(&self) -> Option<&Sitzung> {
        self.sitzung.get()
    }

    pub fn session_id(&self) -> Option<SessionId> {
        self.sitzung().map(|s| s.session_id)
    }

    pub fn device_id(&self) -> Option<&str> {
        self.sitzung().map(|s| s.device_id.as_str())
    }

    pub fn erstellt_am(&self) -> DateTime<Utc> {
        self.erstellt_am
    }

    /// Verbindungsdauer seit dem Accept
    pub fn alter(&self) -> Duration {
        self.erstellt.elapsed()
    }

    pub fn schliess_grund(&self) -> Option<SchliessGrund> {
        self.grund.get().copied()
    }

    // --- Aktivitaet ---

    /// Zeitpunkt des letzten eingehenden Frames
    pub fn letzte_aktivitaet(&self) -> Instant {
        *self.letzte_aktivitaet.lock()
    }

    /// Zeit seit dem letzten eingehenden Frame
    pub fn leerlauf(&self) -> Duration {
        self.letzte_aktivitaet().elapsed()
    }

    pub(crate) fn aktivitaet_melden(&self) {
        *self.letzte_aktivitaet.lock() = Instant::now();
    }

    /// true solange weder Schliessen angestossen noch die Queue zu ist
    pub fn ist_lebendig(&self) -> bool {
        !self.abbruch.is_cancelled() && !self.ausgang.is_closed()
    }

    // --- Ausgang ---

    /// Reiht eine kodierte Nachricht nicht-blockierend ein
    ///
    /// Bei voller Queue wird die Nachricht verworfen und `QueueVoll` gemeldet.
    pub fn senden(&self, nachricht: Bytes) -> HubResult<()> {
        self.frame_senden(Frame::Daten(nachricht))
    }

    pub(crate) fn frame_senden(&self, frame: Frame) -> HubResult<()> {
        match self.ausgang.try_send(frame) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::warn!(client_id = %self.id, "Ausgangs-Queue voll – Nachricht verworfen");
                Err(HubFehler::QueueVoll(self.id))
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                tracing::debug!(client_id = %self.id, "Ausgangs-Queue geschlossen (Client getrennt)");
                Err(HubFehler::Geschlossen(self.id))
            }
        }
    }

    // --- Zustandsuebergaenge ---

    /// Stoesst das Schliessen an; der erste Grund gewinnt
    pub fn schliessen(&self, grund: SchliessGrund) {
        let mut zustand = self.zustand.lock();
        if *zustand == VerbindungsZustand::Aktiv {
            *zustand = VerbindungsZustand::Schliessend;
        }
        let _ = self.grund.set(grund);
        self.abbruch.cancel();
    }

    /// Weist einen noch verbindenden Client mit einer letzten Antwort ab
    ///
    /// Antwort einreihen und Schliessen passieren unter derselben Sperre,
    /// damit ein parallel erfolgreicher Handshake nicht abgewiesen wird.
    pub(crate) fn abweisen(&self, antwort: Bytes, grund: SchliessGrund) -> bool {
        let zustand = self.zustand.lock();
        if *zustand != VerbindungsZustand::Verbindend || self.abbruch.is_cancelled() {
            return false;
        }
        let _ = self.ausgang.try_send(Frame::Daten(antwort));
        let _ = self.grund.set(grund);
        self.abbruch.cancel();
        true
    }

    /// Verbindend -> Aktiv; setzt die Sitzung genau einmal
    ///
    /// Die Handshake-Antwort wird unter der Zustandssperre eingereiht, damit
    /// kein Broadcast vor ihr in der Queue landet.
    pub(crate) fn aktivieren(&self, sitzung: Sitzung, antwort: Bytes) -> bool {
        let mut zustand = self.zustand.lock();
        if *zustand != VerbindungsZustand::Verbindend || self.abbruch.is_cancelled() {
            return false;
        }
        if self.sitzung.set(sitzung).is_err() {
            return false;
        }
        *zustand = VerbindungsZustand::Aktiv;
        if self.ausgang.try_send(Frame::Daten(antwort)).is_err() {
            tracing::warn!(client_id = %self.id, "Handshake-Antwort nicht einreihbar");
        }
        true
    }

    /// Terminaler Uebergang, gibt den vorherigen Zustand zurueck
    pub(crate) fn abschliessen(&self) -> VerbindungsZustand {
        let mut zustand = self.zustand.lock();
        std::mem::replace(&mut *zustand, VerbindungsZustand::Geschlossen)
    }

    pub(crate) fn abbruch_token(&self) -> &CancellationToken {
        &self.abbruch
    }

    // --- Tasks ---

    pub(crate) fn tasks_registrieren(&self, handles: impl IntoIterator<Item = AbortHandle>) {
        self.tasks.lock().extend(handles);
    }

    /// Bricht Lese- und Schreib-Task hart ab (Socket wird dabei freigegeben)
    pub(crate) fn tasks_abbrechen(&self) {
        for handle in self.tasks.lock().drain(..) {
            handle.abort();
        }
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("id", &self.id)
            .field("zustand", &self.zustand())
            .field("device_id", &self.device_id())
            .field("session_id", &self.session_id())
            .finish()
    }
}
