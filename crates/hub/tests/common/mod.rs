//! Gemeinsame Hilfen fuer die Integrationstests des Hubs

#![allow(dead_code)]

use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use gateway_core::ConnectionId;
use gateway_hub::{AuthPolicy, ConnectionHub, HubConfig, OffenePolicy};
use gateway_observability::GatewayMetrics;
use gateway_protocol::{Frame, FrameCodec, HelloPayload, MessageKind, ProtocolMessage};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::DuplexStream;
use tokio_util::codec::Framed;

/// Wartezeit, nach der ein Test als haengend gilt
pub const WARTEN: Duration = Duration::from_secs(3);

pub fn logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("gateway_hub=debug")
        .with_test_writer()
        .try_init();
}

pub fn hub_mit(config: HubConfig, auth: Arc<dyn AuthPolicy>) -> Arc<ConnectionHub> {
    logging();
    let metriken = GatewayMetrics::neu().expect("Metriken");
    ConnectionHub::neu(config, auth, metriken)
}

pub fn test_hub() -> Arc<ConnectionHub> {
    hub_mit(HubConfig::default(), Arc::new(OffenePolicy))
}

/// Client-Seite einer Verbindung ueber `tokio::io::duplex`
pub struct TestClient {
    framed: Framed<DuplexStream, FrameCodec>,
    zaehler: u64,
}

impl TestClient {
    pub fn verbinden(hub: &Arc<ConnectionHub>) -> (Self, ConnectionId) {
        Self::verbinden_mit_puffer(hub, 64 * 1024)
    }

    /// Kleiner Puffer simuliert einen langsamen Leser
    pub fn verbinden_mit_puffer(hub: &Arc<ConnectionHub>, puffer: usize) -> (Self, ConnectionId) {
        let (client_seite, server_seite) = tokio::io::duplex(puffer);
        let id = hub.annehmen(server_seite).expect("annehmen");
        let client = Self {
            framed: Framed::new(client_seite, FrameCodec::new()),
            zaehler: 0,
        };
        (client, id)
    }

    pub async fn frame_senden(&mut self, frame: Frame) {
        self.framed.send(frame).await.expect("Frame senden");
    }

    pub async fn roh_senden(&mut self, json: &str) {
        self.frame_senden(Frame::Daten(Bytes::from(json.to_string()))).await;
    }

    pub async fn senden(&mut self, nachricht: &ProtocolMessage) {
        let json = nachricht.to_json().expect("kodieren");
        self.roh_senden(&json).await;
    }

    /// Naechster Frame mit Zeitlimit; `None` bei Close oder Verbindungsende
    pub async fn frame_empfangen(&mut self) -> Option<Frame> {
        match tokio::time::timeout(WARTEN, self.framed.next()).await {
            Ok(Some(Ok(Frame::Close))) | Ok(None) | Ok(Some(Err(_))) => None,
            Ok(Some(Ok(frame))) => Some(frame),
            Err(_) => panic!("Zeitlimit beim Empfangen"),
        }
    }

    /// Naechste Protokoll-Nachricht als rohes JSON, Keepalives uebersprungen
    pub async fn wert_empfangen(&mut self) -> Option<Value> {
        loop {
            match self.frame_empfangen().await? {
                Frame::Daten(bytes) => {
                    return Some(serde_json::from_slice(&bytes).expect("gueltiges JSON"));
                }
                Frame::Ping(p) => self.frame_senden(Frame::Pong(p)).await,
                Frame::Pong(_) | Frame::Close => {}
            }
        }
    }

    pub async fn empfangen(&mut self) -> Option<ProtocolMessage> {
        let wert = self.wert_empfangen().await?;
        Some(serde_json::from_value(wert).expect("gueltige Nachricht"))
    }

    /// Naechste Antwort; Events und Server-Anfragen werden uebersprungen
    pub async fn naechste_antwort(&mut self) -> ProtocolMessage {
        loop {
            let msg = self.empfangen().await.expect("Verbindung offen");
            if msg.kind == MessageKind::Response {
                return msg;
            }
        }
    }

    /// Naechstes Event mit dem gegebenen Namen
    pub async fn naechstes_event(&mut self, name: &str) -> ProtocolMessage {
        loop {
            let msg = self.empfangen().await.expect("Verbindung offen");
            if msg.kind == MessageKind::Event && msg.event_name.as_deref() == Some(name) {
                return msg;
            }
        }
    }

    pub async fn anfrage(&mut self, methode: &str, params: Option<Value>) -> ProtocolMessage {
        self.zaehler += 1;
        let id = format!("t-{}", self.zaehler);
        self.senden(&ProtocolMessage::request(id.clone(), methode, params)).await;
        let antwort = self.naechste_antwort().await;
        assert_eq!(antwort.id.as_deref(), Some(id.as_str()));
        antwort
    }

    pub async fn handshake(&mut self, device_id: &str) -> HelloPayload {
        let antwort = self
            .anfrage("connect", Some(json!({"device_id": device_id, "version": "1.0"})))
            .await;
        assert!(antwort.ist_erfolg(), "Handshake fehlgeschlagen: {:?}", antwort.error);
        serde_json::from_value(antwort.payload.expect("payload")).expect("HelloPayload")
    }

    /// true wenn die Gegenseite die Verbindung beendet (verbleibende Nachrichten werden gelesen)
    pub async fn ist_geschlossen(&mut self) -> bool {
        loop {
            match tokio::time::timeout(WARTEN, self.framed.next()).await {
                Ok(Some(Ok(Frame::Close))) | Ok(None) | Ok(Some(Err(_))) => return true,
                Ok(Some(Ok(_))) => continue,
                Err(_) => return false,
            }
        }
    }
}

/// Wartet bis `bedingung` gilt oder das Zeitlimit erreicht ist
pub async fn warten_bis<F: Fn() -> bool>(bedingung: F) -> bool {
    let ende = tokio::time::Instant::now() + WARTEN;
    while tokio::time::Instant::now() < ende {
        if bedingung() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    bedingung()
}
