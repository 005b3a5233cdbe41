//! ConnectionHub – Registry, Handshake, Dispatch und Zustellung
//!
//! ## Registry-Disziplin
//! Die Client-Registry ist die einzige Struktur mit mehreren schreibenden
//! Parteien. Sie liegt hinter genau einem `RwLock`:
//! - Lesen (Lookup, Broadcast-Ziele kopieren) unter der Lese-Sperre
//! - Eintragen und Entfernen unter der Schreib-Sperre
//! - Handler-Aufrufe, Netzwerk-I/O und Event-Zustellung nie unter einer Sperre
//!
//! Entfernen aus der Registry und der terminale Zustandsuebergang passieren
//! in derselben kritischen Sektion, nachdem beide Loops beendet sind.

use chrono::Utc;
use gateway_core::{ConnectionId, SessionId};
use gateway_observability::GatewayMetrics;
use gateway_protocol::events::{self, ClientConnectedDaten, ClientDisconnectedDaten};
use gateway_protocol::{
    ConnectParams, ErrorCode, HandshakeAblehnung, HelloPayload, MessageKind, ProtocolCodec,
    ProtocolMessage, StateSnapshot, CONNECT_METHODE, PROTOKOLL_VERSION,
};
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::auth::AuthPolicy;
use crate::broadcast::{self, SendeBericht};
use crate::client::{Client, SchliessGrund, Sitzung, VerbindungsZustand};
use crate::config::HubConfig;
use crate::connection;
use crate::dispatcher::{FnHandler, HandlerFehler, HandlerKontext, MethodHandler, MethodRegistry};
use crate::error::{HubFehler, HubResult};
use crate::event_bus::EventBus;

// ---------------------------------------------------------------------------
// ConnectionHub
// ---------------------------------------------------------------------------

/// Zentraler Hub fuer alle Verbindungen
pub struct ConnectionHub {
    config: HubConfig,
    codec: ProtocolCodec,
    auth: Arc<dyn AuthPolicy>,
    metriken: GatewayMetrics,
    event_bus: EventBus,
    methoden: MethodRegistry,
    clients: RwLock<HashMap<ConnectionId, Arc<Client>>>,
    snapshot_version: AtomicU64,
    abbruch: CancellationToken,
    tracker: TaskTracker,
    gestartet: AtomicBool,
}

impl ConnectionHub {
    /// Erstellt einen Hub mit den eingebauten Methoden `ping` und `state`
    pub fn neu(config: HubConfig, auth: Arc<dyn AuthPolicy>, metriken: GatewayMetrics) -> Arc<Self> {
        Arc::new_cyclic(|schwach| Self {
            codec: ProtocolCodec::with_max_size(config.max_frame_groesse),
            event_bus: EventBus::neu(config.event_queue, metriken.clone()),
            methoden: MethodRegistry::mit_eingebauten(schwach.clone()),
            config,
            auth,
            metriken,
            clients: RwLock::new(HashMap::new()),
            snapshot_version: AtomicU64::new(0),
            abbruch: CancellationToken::new(),
            tracker: TaskTracker::new(),
            gestartet: AtomicBool::new(false),
        })
    }

    /// Startet Event-Bruecke und Snapshot-Pusher (idempotent)
    pub fn starten(self: &Arc<Self>) {
        if self.gestartet.swap(true, Ordering::SeqCst) {
            return;
        }
        broadcast::event_bruecke_starten(self);
        broadcast::snapshot_pusher_starten(self);
        tracing::info!(
            gateway_id = %self.config.gateway_id,
            workspace = %self.config.workspace,
            "ConnectionHub gestartet"
        );
    }

    // -----------------------------------------------------------------------
    // Accept
    // -----------------------------------------------------------------------

    /// Uebernimmt einen rohen Duplex-Stream als neue Verbindung
    ///
    /// Der Client startet im Zustand `Verbindend`. Nach Beginn des Shutdowns
    /// wird der Stream sofort verworfen.
    pub fn annehmen<S>(self: &Arc<Self>, stream: S) -> HubResult<ConnectionId>
    where
        S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        if self.abbruch.is_cancelled() {
            tracing::debug!("Verbindung abgelehnt, Hub wird heruntergefahren");
            return Err(HubFehler::Heruntergefahren);
        }

        let id = ConnectionId::new();
        let (tx, rx) = mpsc::channel(self.config.ausgangs_queue.max(1));
        let client = Arc::new(Client::neu(id, tx, self.abbruch.child_token()));

        {
            let mut clients = self.clients.write();
            clients.insert(id, Arc::clone(&client));
            self.metriken.connected_clients.set(clients.len() as i64);
        }

        tracing::debug!(client_id = %id, "Verbindung angenommen");
        self.tracker
            .spawn(connection::verbindung_betreiben(Arc::clone(self), client, stream, rx));
        Ok(id)
    }

    // -----------------------------------------------------------------------
    // Dispatch
    // -----------------------------------------------------------------------

    /// Einziger Einstiegspunkt fuer eingehende Nachrichten einer Verbindung
    pub(crate) async fn eingehend_verarbeiten(&self, client: &Arc<Client>, nachricht: ProtocolMessage) {
        if self.abbruch.is_cancelled() {
            self.im_shutdown_ablehnen(client, &nachricht);
            return;
        }
        match client.zustand() {
            VerbindungsZustand::Verbindend => self.handshake(client, nachricht),
            VerbindungsZustand::Aktiv => self.aktiv_verarbeiten(client, nachricht).await,
            VerbindungsZustand::Schliessend | VerbindungsZustand::Geschlossen => {
                tracing::trace!(client_id = %client.id(), "Nachricht nach Schliessen ignoriert");
            }
        }
    }

    /// Nach Beginn des Shutdowns wird nichts mehr dispatcht
    fn im_shutdown_ablehnen(&self, client: &Client, nachricht: &ProtocolMessage) {
        if !nachricht.ist_anfrage() {
            return;
        }
        let id = nachricht.korrelations_id().to_string();
        match client.zustand() {
            VerbindungsZustand::Verbindend => self.handshake_ablehnen(
                client,
                &id,
                HandshakeAblehnung::neu(ErrorCode::ShuttingDown),
                SchliessGrund::Shutdown,
            ),
            VerbindungsZustand::Aktiv | VerbindungsZustand::Schliessend => {
                let antwort = ProtocolMessage::response_code(id, ErrorCode::ShuttingDown, None);
                let _ = self.nachricht_zustellen(client, &antwort);
            }
            VerbindungsZustand::Geschlossen => {}
        }
    }

    fn handshake(&self, client: &Client, nachricht: ProtocolMessage) {
        let id = nachricht.korrelations_id().to_string();

        if !(nachricht.ist_anfrage() && nachricht.methode() == CONNECT_METHODE) {
            let erhalten = if nachricht.ist_anfrage() {
                nachricht.methode()
            } else {
                nachricht.kind.als_str()
            };
            let ablehnung = HandshakeAblehnung::mit_detail(
                ErrorCode::HandshakeRequired,
                format!("expected '{CONNECT_METHODE}', got '{erhalten}'"),
            );
            self.handshake_ablehnen(client, &id, ablehnung, SchliessGrund::HandshakeFehlgeschlagen);
            return;
        }

        let params = match ConnectParams::aus_params(nachricht.params.as_ref()) {
            Ok(p) => p,
            Err(ablehnung) => {
                self.handshake_ablehnen(client, &id, ablehnung, SchliessGrund::HandshakeFehlgeschlagen);
                return;
            }
        };
        if !self.auth.token_validieren(params.token.as_deref()) {
            let ablehnung = HandshakeAblehnung::neu(ErrorCode::InvalidToken);
            self.handshake_ablehnen(client, &id, ablehnung, SchliessGrund::HandshakeFehlgeschlagen);
            return;
        }
        if !self.auth.geraet_erlaubt(&params.device_id) {
            let ablehnung = HandshakeAblehnung::mit_detail(ErrorCode::DeviceNotAllowed, &params.device_id);
            self.handshake_ablehnen(client, &id, ablehnung, SchliessGrund::HandshakeFehlgeschlagen);
            return;
        }

        let session_id = SessionId::new();
        let hello = HelloPayload {
            protocol_version: PROTOKOLL_VERSION.to_string(),
            device_id: params.device_id.clone(),
            session_id: session_id.to_string(),
            client_id: client.id().to_string(),
            workspace: self.config.workspace.clone(),
            state: (*self.zustand_snapshot(Some(session_id))).clone(),
        };
        let antwort = match self
            .codec
            .response_mit_body(id, &hello)
            .and_then(|m| self.codec.encode(&m))
        {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::error!(client_id = %client.id(), fehler = %e, "Handshake-Antwort nicht kodierbar");
                client.schliessen(SchliessGrund::HandshakeFehlgeschlagen);
                return;
            }
        };

        let sitzung = Sitzung {
            session_id,
            device_id: params.device_id,
            client_type: params.client_type,
            version: params.version,
            capabilities: params.capabilities,
            verbunden_am: Utc::now(),
        };
        if !client.aktivieren(sitzung, antwort) {
            tracing::debug!(client_id = %client.id(), "Handshake verworfen, Verbindung schliesst bereits");
            return;
        }
        self.metriken.handshake_zaehlen("ok");

        let Some(sitzung) = client.sitzung() else {
            return;
        };
        tracing::info!(
            client_id = %client.id(),
            device_id = %sitzung.device_id,
            session_id = %sitzung.session_id,
            client_type = ?sitzung.client_type,
            "Handshake erfolgreich"
        );

        let daten = ClientConnectedDaten {
            client_id: client.id().to_string(),
            device_id: sitzung.device_id.clone(),
            session_id: sitzung.session_id.to_string(),
            client_type: sitzung.client_type,
            connected_at: sitzung.verbunden_am,
        };
        if let Err(e) = self
            .event_bus
            .veroeffentlichen_serialisiert(events::CLIENT_CONNECTED, "", &daten)
        {
            tracing::error!(fehler = %e, "client.connected nicht veroeffentlicht");
        }
    }

    /// Antwortet mit einem Fehlercode und schliesst die Verbindung
    fn handshake_ablehnen(&self, client: &Client, id: &str, ablehnung: HandshakeAblehnung, grund: SchliessGrund) {
        self.metriken.handshake_zaehlen(ablehnung.code.als_str());
        tracing::warn!(
            client_id = %client.id(),
            code = ablehnung.code.als_str(),
            detail = ablehnung.detail.as_deref().unwrap_or(""),
            "Handshake abgelehnt"
        );

        let antwort = ProtocolMessage::response_error(id, ablehnung.meldung());
        match self.codec.encode(&antwort) {
            Ok(bytes) => {
                client.abweisen(bytes, grund);
            }
            Err(e) => {
                tracing::error!(fehler = %e, "Ablehnung nicht kodierbar");
                client.schliessen(grund);
            }
        }
    }

    /// Handshake-Frist abgelaufen
    pub(crate) fn handshake_abgelaufen(&self, client: &Client) {
        self.handshake_ablehnen(
            client,
            "",
            HandshakeAblehnung::neu(ErrorCode::HandshakeTimeout),
            SchliessGrund::HandshakeTimeout,
        );
    }

    async fn aktiv_verarbeiten(&self, client: &Arc<Client>, nachricht: ProtocolMessage) {
        let Some(sitzung) = client.sitzung() else {
            return;
        };

        match nachricht.kind {
            MessageKind::Request => {
                let id = nachricht.korrelations_id().to_string();
                let methode = nachricht.methode().to_string();

                if methode == CONNECT_METHODE {
                    let antwort = ProtocolMessage::response_code(id, ErrorCode::AlreadyConnected, None);
                    let _ = self.nachricht_zustellen(client, &antwort);
                    return;
                }

                let Some(handler) = self.methoden.holen(&methode) else {
                    tracing::debug!(client_id = %client.id(), methode = %methode, "Unbekannte Methode");
                    let antwort =
                        ProtocolMessage::response_code(id, ErrorCode::UnknownMethod, Some(&methode));
                    let _ = self.nachricht_zustellen(client, &antwort);
                    return;
                };

                let ctx = HandlerKontext {
                    client_id: client.id(),
                    session_id: sitzung.session_id,
                    device_id: sitzung.device_id.clone(),
                    client_type: sitzung.client_type,
                    event_bus: self.event_bus.clone(),
                };
                let antwort = match handler.aufrufen(ctx, nachricht.params).await {
                    Ok(payload) => ProtocolMessage::response_ok(id, payload),
                    Err(e) => {
                        tracing::debug!(
                            client_id = %client.id(),
                            methode = %methode,
                            fehler = %e,
                            "Handler-Fehler"
                        );
                        ProtocolMessage::response_code(id, ErrorCode::HandlerFailed, Some(&e.to_string()))
                    }
                };
                let _ = self.nachricht_zustellen(client, &antwort);
            }
            MessageKind::Event => {
                let name = nachricht.event_name.unwrap_or_default();
                if name.is_empty() {
                    tracing::debug!(client_id = %client.id(), "Event ohne Namen ignoriert");
                    return;
                }
                self.event_bus.veroeffentlichen(
                    &name,
                    &sitzung.device_id,
                    nachricht.data.unwrap_or(Value::Null),
                );
            }
            MessageKind::Response => {
                tracing::trace!(
                    client_id = %client.id(),
                    id = nachricht.korrelations_id(),
                    ok = nachricht.ist_erfolg(),
                    "Antwort vom Client"
                );
            }
        }
    }

    // -----------------------------------------------------------------------
    // Zustellung
    // -----------------------------------------------------------------------

    /// Reiht kodierte Bytes ein und zaehlt Verwerfungen
    fn zustellen(&self, client: &Client, bytes: bytes::Bytes) -> HubResult<()> {
        let ergebnis = client.senden(bytes);
        if ergebnis.as_ref().is_err_and(HubFehler::ist_backpressure) {
            self.metriken.outbound_drops_total.inc();
        }
        ergebnis
    }

    pub(crate) fn nachricht_zustellen(&self, client: &Client, nachricht: &ProtocolMessage) -> HubResult<()> {
        let bytes = self.codec.encode(nachricht)?;
        self.zustellen(client, bytes)
    }

    /// Sendet an alle aktiven Clients (best effort, hoechstens einmal)
    pub fn an_alle_senden(&self, nachricht: &ProtocolMessage) -> HubResult<SendeBericht> {
        self.gefiltert_senden(|_| true, nachricht)
    }

    /// Sendet an alle aktiven Clients, fuer die `praedikat` zutrifft
    ///
    /// Unter der Lese-Sperre werden nur Referenzen kopiert; Praedikat und
    /// Zustellung laufen ohne Sperre.
    pub fn gefiltert_senden<F>(&self, praedikat: F, nachricht: &ProtocolMessage) -> HubResult<SendeBericht>
    where
        F: Fn(&Client) -> bool,
    {
        let bytes = self.codec.encode(nachricht)?;
        let ziele = self.aktive_clients();

        let mut bericht = SendeBericht::default();
        for client in &ziele {
            if !praedikat(client) {
                continue;
            }
            match self.zustellen(client, bytes.clone()) {
                Ok(()) => bericht.zugestellt += 1,
                Err(_) => bericht.verworfen += 1,
            }
        }

        if bericht.verworfen > 0 {
            tracing::debug!(
                zugestellt = bericht.zugestellt,
                verworfen = bericht.verworfen,
                "Broadcast teilweise verworfen"
            );
        }
        Ok(bericht)
    }

    /// Sendet an genau einen aktiven Client
    pub fn an_client_senden(&self, id: &ConnectionId, nachricht: &ProtocolMessage) -> HubResult<()> {
        let client = self.client(id).ok_or(HubFehler::ClientNichtGefunden(*id))?;
        if !client.ist_aktiv() {
            return Err(HubFehler::NichtAktiv(*id));
        }
        self.nachricht_zustellen(&client, nachricht)
    }

    // -----------------------------------------------------------------------
    // Lebenszyklus
    // -----------------------------------------------------------------------

    /// Letzter Schritt einer Verbindung, nachdem beide Loops beendet sind
    ///
    /// Nur wer den Eintrag tatsaechlich entfernt, veroeffentlicht
    /// `client.disconnected`.
    pub(crate) fn verbindung_abschliessen(&self, client: &Arc<Client>) {
        let (entfernt, vorher) = {
            let mut clients = self.clients.write();
            let entfernt = clients.remove(&client.id()).is_some();
            let vorher = client.abschliessen();
            self.metriken.connected_clients.set(clients.len() as i64);
            (entfernt, vorher)
        };
        if entfernt {
            self.getrennt_melden(client, vorher);
        }
    }

    fn getrennt_melden(&self, client: &Client, vorher: VerbindungsZustand) {
        let grund = client.schliess_grund().unwrap_or(SchliessGrund::PeerGeschlossen);
        tracing::info!(
            client_id = %client.id(),
            device_id = client.device_id().unwrap_or("-"),
            grund = %grund,
            zustand = ?vorher,
            dauer_sek = client.alter().as_secs(),
            "Verbindung geschlossen"
        );

        let Some(sitzung) = client.sitzung() else {
            return;
        };
        let daten = ClientDisconnectedDaten {
            client_id: client.id().to_string(),
            device_id: sitzung.device_id.clone(),
            session_id: sitzung.session_id.to_string(),
            reason: grund.als_str().to_string(),
            disconnected_at: Utc::now(),
        };
        if let Err(e) = self
            .event_bus
            .veroeffentlichen_serialisiert(events::CLIENT_DISCONNECTED, "", &daten)
        {
            tracing::error!(fehler = %e, "client.disconnected nicht veroeffentlicht");
        }
    }

    /// Graceful Shutdown mit Frist
    ///
    /// Nimmt keine Verbindungen mehr an, schliesst alle und wartet bis alle
    /// Tasks beendet sind. Nach Ablauf der Frist werden die verbleibenden
    /// Verbindungen hart abgebrochen und aus der Registry entfernt.
    pub async fn herunterfahren(&self, frist: Duration) -> HubResult<()> {
        tracing::info!(
            frist_ms = frist.as_millis() as u64,
            verbindungen = self.client_anzahl(),
            "ConnectionHub wird heruntergefahren"
        );

        // Grund zuerst setzen, sonst meldet ein schneller Abbau `peer_closed`
        for client in self.clients() {
            client.schliessen(SchliessGrund::Shutdown);
        }
        self.abbruch.cancel();
        // Zwischen Schleife und Abbruch angenommene Verbindungen
        for client in self.clients() {
            client.schliessen(SchliessGrund::Shutdown);
        }
        self.tracker.close();

        if tokio::time::timeout(frist, self.tracker.wait()).await.is_ok() {
            tracing::info!("ConnectionHub sauber beendet");
            return Ok(());
        }

        let offen: Vec<(Arc<Client>, VerbindungsZustand)> = {
            let mut clients = self.clients.write();
            let offen = clients
                .drain()
                .map(|(_, client)| {
                    client.tasks_abbrechen();
                    let vorher = client.abschliessen();
                    (client, vorher)
                })
                .collect();
            self.metriken.connected_clients.set(0);
            offen
        };
        for (client, vorher) in &offen {
            self.getrennt_melden(client, *vorher);
        }

        let tasks = self.tracker.len();
        tracing::warn!(
            verbindungen = offen.len(),
            tasks,
            "Shutdown-Frist ueberschritten, Verbindungen zwangsweise beendet"
        );
        Err(HubFehler::ShutdownTimeout {
            verbindungen: offen.len(),
            tasks,
        })
    }

    pub fn ist_heruntergefahren(&self) -> bool {
        self.abbruch.is_cancelled()
    }

    // -----------------------------------------------------------------------
    // Snapshot und Abfragen
    // -----------------------------------------------------------------------

    /// Erzeugt einen neuen, unveraenderlichen Zustands-Snapshot
    pub fn zustand_snapshot(&self, session_id: Option<SessionId>) -> Arc<StateSnapshot> {
        Arc::new(StateSnapshot {
            version: self.snapshot_version.fetch_add(1, Ordering::SeqCst) + 1,
            gateway_id: self.config.gateway_id.to_string(),
            session_id: session_id.map(|s| s.to_string()),
            workspace: self.config.workspace.clone(),
            timestamp: Utc::now(),
            client_count: self.aktive_clients().len(),
        })
    }

    pub fn client(&self, id: &ConnectionId) -> Option<Arc<Client>> {
        self.clients.read().get(id).cloned()
    }

    /// Alle Registry-Eintraege unabhaengig vom Zustand
    pub fn clients(&self) -> Vec<Arc<Client>> {
        self.clients.read().values().cloned().collect()
    }

    pub fn aktive_clients(&self) -> Vec<Arc<Client>> {
        self.clients
            .read()
            .values()
            .filter(|c| c.ist_aktiv())
            .cloned()
            .collect()
    }

    pub fn client_anzahl(&self) -> usize {
        self.clients.read().len()
    }

    // -----------------------------------------------------------------------
    // Methoden
    // -----------------------------------------------------------------------

    /// Registriert einen Methoden-Handler; `connect` ist reserviert
    pub fn methode_registrieren(&self, name: &str, handler: Arc<dyn MethodHandler>) -> HubResult<()> {
        self.methoden.registrieren(name, handler)
    }

    /// Registriert eine Closure als Methoden-Handler
    pub fn methode_registrieren_fn<F, Fut>(&self, name: &str, f: F) -> HubResult<()>
    where
        F: Fn(HandlerKontext, Option<Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, HandlerFehler>> + Send + 'static,
    {
        self.methoden.registrieren(name, Arc::new(FnHandler::neu(f)))
    }

    pub fn methoden(&self) -> &MethodRegistry {
        &self.methoden
    }

    // -----------------------------------------------------------------------
    // Zugriff
    // -----------------------------------------------------------------------

    pub fn config(&self) -> &HubConfig {
        &self.config
    }

    pub fn codec(&self) -> ProtocolCodec {
        self.codec
    }

    pub fn event_bus(&self) -> &EventBus {
        &self.event_bus
    }

    pub fn metriken(&self) -> &GatewayMetrics {
        &self.metriken
    }

    /// Token, das beim Shutdown ausgeloest wird
    pub fn abbruch_token(&self) -> CancellationToken {
        self.abbruch.clone()
    }

    /// Startet einen Task, auf den der Shutdown wartet
    pub(crate) fn task_spawnen<F>(&self, future: F) -> JoinHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        self.tracker.spawn(future)
    }
}

impl std::fmt::Debug for ConnectionHub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionHub")
            .field("gateway_id", &self.config.gateway_id)
            .field("clients", &self.client_anzahl())
            .field("heruntergefahren", &self.ist_heruntergefahren())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::OffenePolicy;

    fn test_hub() -> Arc<ConnectionHub> {
        ConnectionHub::neu(
            HubConfig::default(),
            Arc::new(OffenePolicy),
            GatewayMetrics::neu().unwrap(),
        )
    }

    #[test]
    fn snapshot_version_steigt() {
        let hub = test_hub();
        let a = hub.zustand_snapshot(None);
        let b = hub.zustand_snapshot(None);
        assert!(b.version > a.version);
        assert_eq!(a.workspace, "default");
        assert_eq!(a.client_count, 0);
        assert!(a.gateway_id.starts_with("gateway-"));
    }

    #[test]
    fn eingebaute_methoden_registriert() {
        let hub = test_hub();
        assert!(hub.methoden().holen("ping").is_some());
        assert!(hub.methoden().holen("state").is_some());
        assert!(hub.methode_registrieren_fn("connect", |_, _| async { Ok(Value::Null) }).is_err());
    }

    #[test]
    fn unicast_an_unbekannten_client() {
        let hub = test_hub();
        let id = ConnectionId::new();
        let err = hub
            .an_client_senden(&id, &ProtocolMessage::event("x", Value::Null, 1))
            .unwrap_err();
        assert!(matches!(err, HubFehler::ClientNichtGefunden(_)));
    }

    #[test]
    fn broadcast_ohne_clients() {
        let hub = test_hub();
        let bericht = hub
            .an_alle_senden(&ProtocolMessage::event("x", Value::Null, 1))
            .unwrap();
        assert_eq!(bericht, SendeBericht::default());
    }

    #[tokio::test]
    async fn kein_annehmen_nach_shutdown() {
        let hub = test_hub();
        hub.herunterfahren(Duration::from_secs(1)).await.unwrap();
        let (_a, b) = tokio::io::duplex(64);
        assert!(matches!(hub.annehmen(b), Err(HubFehler::Heruntergefahren)));
        assert_eq!(hub.client_anzahl(), 0);
    }

    #[tokio::test]
    async fn angenommener_client_ist_verbindend() {
        let hub = test_hub();
        let (_a, b) = tokio::io::duplex(1024);
        let id = hub.annehmen(b).unwrap();

        let client = hub.client(&id).unwrap();
        assert_eq!(client.zustand(), VerbindungsZustand::Verbindend);
        assert!(hub.aktive_clients().is_empty());
        assert_eq!(hub.metriken().connected_clients.get(), 1);

        let err = hub
            .an_client_senden(&id, &ProtocolMessage::event("x", Value::Null, 1))
            .unwrap_err();
        assert!(matches!(err, HubFehler::NichtAktiv(_)));

        hub.herunterfahren(Duration::from_secs(2)).await.unwrap();
        assert_eq!(hub.client_anzahl(), 0);
        assert_eq!(hub.metriken().connected_clients.get(), 0);
    }

    // --- Anfragen nach Beginn des Shutdowns ---

    fn losgeloester_client() -> (Arc<Client>, mpsc::Receiver<gateway_protocol::Frame>) {
        let (tx, rx) = mpsc::channel(4);
        let client = Client::neu(ConnectionId::new(), tx, CancellationToken::new());
        (Arc::new(client), rx)
    }

    fn antwort_lesen(rx: &mut mpsc::Receiver<gateway_protocol::Frame>) -> ProtocolMessage {
        match rx.try_recv() {
            Ok(gateway_protocol::Frame::Daten(bytes)) => serde_json::from_slice(&bytes).unwrap(),
            andere => panic!("Antwort erwartet, bekommen: {andere:?}"),
        }
    }

    #[tokio::test]
    async fn anfrage_im_shutdown_wird_abgelehnt() {
        let hub = test_hub();
        let (client, mut rx) = losgeloester_client();
        let sitzung = Sitzung {
            session_id: SessionId::new(),
            device_id: "d1".into(),
            client_type: None,
            version: "1.0".into(),
            capabilities: vec![],
            verbunden_am: Utc::now(),
        };
        assert!(client.aktivieren(sitzung, bytes::Bytes::from_static(b"{}")));
        let _hello = rx.try_recv().unwrap();

        hub.abbruch.cancel();
        hub.eingehend_verarbeiten(&client, ProtocolMessage::request("1", "ping", None))
            .await;

        let antwort = antwort_lesen(&mut rx);
        assert_eq!(antwort.id.as_deref(), Some("1"));
        assert_eq!(antwort.ok, Some(false));
        assert_eq!(antwort.error.as_deref(), Some("shutting down"));

        // Events loesen keine Antwort aus
        hub.eingehend_verarbeiten(&client, ProtocolMessage::event("x", Value::Null, 1))
            .await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn handshake_im_shutdown_wird_abgelehnt() {
        let hub = test_hub();
        let (client, mut rx) = losgeloester_client();

        hub.abbruch.cancel();
        let connect = ProtocolMessage::request(
            "c-1",
            CONNECT_METHODE,
            Some(serde_json::json!({"device_id": "d1", "version": "1.0"})),
        );
        hub.eingehend_verarbeiten(&client, connect).await;

        let antwort = antwort_lesen(&mut rx);
        assert_eq!(antwort.id.as_deref(), Some("c-1"));
        assert_eq!(antwort.error.as_deref(), Some("shutting down"));
        assert_eq!(client.zustand(), VerbindungsZustand::Verbindend);
        assert_eq!(client.schliess_grund(), Some(SchliessGrund::Shutdown));
        assert!(client.sitzung().is_none());
    }
}
