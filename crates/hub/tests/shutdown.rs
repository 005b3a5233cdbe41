//! Graceful Shutdown mit Frist

mod common;

use common::{hub_mit, test_hub, TestClient};
use gateway_hub::{HandlerFehler, HeartbeatConfig, HeartbeatManager, HubConfig, HubFehler, OffenePolicy};
use gateway_protocol::{events, ProtocolMessage};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::{Duration, Instant};

#[tokio::test]
async fn sauberer_shutdown_schliesst_alle() {
    let hub = test_hub();
    hub.starten();
    let heartbeat = HeartbeatManager::neu(hub.clone(), HeartbeatConfig::default());
    heartbeat.starten();

    let mut abo = hub.event_bus().abonnieren("", [events::CLIENT_DISCONNECTED]);

    let mut clients = Vec::new();
    for i in 0..3 {
        let (mut c, _) = TestClient::verbinden(&hub);
        c.handshake(&format!("d{i}")).await;
        clients.push(c);
    }
    let (mut wartend, _) = TestClient::verbinden(&hub);

    let start = Instant::now();
    hub.herunterfahren(Duration::from_secs(5)).await.unwrap();
    assert!(start.elapsed() < Duration::from_secs(2));
    assert_eq!(hub.client_anzahl(), 0);
    assert!(hub.ist_heruntergefahren());

    for c in &mut clients {
        assert!(c.ist_geschlossen().await);
    }
    assert!(wartend.ist_geschlossen().await);

    // Nur Clients mit Sitzung melden client.disconnected
    let mut gruende = Vec::new();
    while let Some(e) = abo.try_empfangen() {
        gruende.push(e.daten["reason"].as_str().unwrap().to_string());
    }
    assert_eq!(gruende, vec!["shutdown"; 3]);
}

#[tokio::test]
async fn haengende_verbindung_loest_shutdown_timeout_aus() {
    let config = HubConfig {
        ausgangs_queue: 4,
        schreib_timeout: Duration::from_secs(30),
        ..Default::default()
    };
    let hub = hub_mit(config, Arc::new(OffenePolicy));

    let mut abo = hub.event_bus().abonnieren("", [events::CLIENT_DISCONNECTED]);

    // Kleiner Puffer und kein Lesen: der Schreib-Loop steckt im Senden
    let (mut client, id) = TestClient::verbinden_mit_puffer(&hub, 256);
    client.handshake("haengt").await;

    let fueller = ProtocolMessage::event("fueller", json!({"x": "y".repeat(64)}), 0);
    let mut voll = false;
    for _ in 0..1000 {
        match hub.an_client_senden(&id, &fueller) {
            Ok(()) => tokio::time::sleep(Duration::from_millis(1)).await,
            Err(HubFehler::QueueVoll(_)) => {
                voll = true;
                break;
            }
            Err(e) => panic!("unerwarteter Fehler: {e}"),
        }
    }
    assert!(voll, "Schreib-Loop blockiert nicht");

    let start = Instant::now();
    let ergebnis = hub.herunterfahren(Duration::from_millis(500)).await;
    let dauer = start.elapsed();

    match ergebnis {
        Err(HubFehler::ShutdownTimeout { verbindungen, .. }) => assert_eq!(verbindungen, 1),
        andere => panic!("ShutdownTimeout erwartet, bekommen: {andere:?}"),
    }
    assert!(dauer >= Duration::from_millis(500));
    assert!(dauer < Duration::from_secs(2));
    assert_eq!(hub.client_anzahl(), 0);
    assert_eq!(hub.metriken().connected_clients.get(), 0);

    // Socket ist zwangsweise geschlossen
    assert!(client.ist_geschlossen().await);

    // Genau ein client.disconnected, auch nach dem Auslaufen des Supervisors
    tokio::time::sleep(Duration::from_millis(100)).await;
    let event = abo.try_empfangen().unwrap();
    assert_eq!(event.daten["device_id"], "haengt");
    assert_eq!(event.daten["reason"], "shutdown");
    assert!(abo.try_empfangen().is_none());
}

#[tokio::test]
async fn haengender_handler_blockiert_shutdown_nicht() {
    let hub = test_hub();
    hub.methode_registrieren_fn("haengen", |_, _| async {
        std::future::pending::<Result<Value, HandlerFehler>>().await
    })
    .unwrap();

    let (mut client, _) = TestClient::verbinden(&hub);
    client.handshake("haengt").await;
    client
        .senden(&ProtocolMessage::request("1", "haengen", None))
        .await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    let start = Instant::now();
    hub.herunterfahren(Duration::from_secs(5)).await.unwrap();
    assert!(start.elapsed() < Duration::from_secs(2));
    assert_eq!(hub.client_anzahl(), 0);
    assert!(client.ist_geschlossen().await);
}

#[tokio::test]
async fn shutdown_ohne_verbindungen() {
    let hub = test_hub();
    hub.starten();
    hub.herunterfahren(Duration::from_millis(200)).await.unwrap();
}
