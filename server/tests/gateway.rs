//! Ende-zu-Ende-Tests: Konfiguration -> Server -> TCP-Client

use futures_util::{SinkExt, StreamExt};
use gateway_core::GatewayError;
use gateway_protocol::{Frame, FrameCodec, ProtocolMessage};
use gateway_server::{config::ServerConfig, Server};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_util::codec::Framed;

struct Laufend {
    adresse: SocketAddr,
    stopp: oneshot::Sender<()>,
    task: JoinHandle<anyhow::Result<()>>,
}

async fn server_starten(toml: &str) -> Laufend {
    let mut config = ServerConfig::aus_toml(toml).unwrap();
    config.server.port = 0;
    let server = Server::neu(config).unwrap();
    let listener = server.binden().await.unwrap();
    let adresse = listener.local_addr().unwrap();

    let (stopp, stopp_rx) = oneshot::channel::<()>();
    let task = tokio::spawn(server.laufen(listener, async move {
        let _ = stopp_rx.await;
    }));
    Laufend { adresse, stopp, task }
}

async fn verbinden(adresse: SocketAddr) -> Framed<TcpStream, FrameCodec> {
    Framed::new(TcpStream::connect(adresse).await.unwrap(), FrameCodec::new())
}

async fn anfrage(
    framed: &mut Framed<TcpStream, FrameCodec>,
    id: &str,
    methode: &str,
    params: Option<Value>,
) -> Option<ProtocolMessage> {
    let msg = ProtocolMessage::request(id, methode, params);
    framed
        .send(Frame::Daten(msg.to_json().unwrap().into()))
        .await
        .ok()?;
    loop {
        match tokio::time::timeout(Duration::from_secs(3), framed.next()).await.ok()?? {
            Ok(Frame::Daten(bytes)) => {
                let antwort: ProtocolMessage = serde_json::from_slice(&bytes).ok()?;
                if antwort.id.as_deref() == Some(id) {
                    return Some(antwort);
                }
            }
            Ok(Frame::Close) | Err(_) => return None,
            Ok(_) => continue,
        }
    }
}

async fn geschlossen(framed: &mut Framed<TcpStream, FrameCodec>) -> bool {
    loop {
        match tokio::time::timeout(Duration::from_secs(3), framed.next()).await {
            Err(_) => return false,
            Ok(None) | Ok(Some(Err(_))) | Ok(Some(Ok(Frame::Close))) => return true,
            Ok(Some(Ok(_))) => continue,
        }
    }
}

const OHNE_HTTP: &str = "[health]\naktiviert = false\n";

#[tokio::test]
async fn handshake_und_methoden_ueber_tcp() {
    let laufend = server_starten(&format!("{OHNE_HTTP}[gateway]\nworkspace = \"ws-1\"\n")).await;
    let mut client = verbinden(laufend.adresse).await;

    let hello = anfrage(
        &mut client,
        "1",
        "connect",
        Some(json!({"device_id": "d1", "version": "1.0"})),
    )
    .await
    .unwrap();
    assert!(hello.ist_erfolg());
    let payload = hello.payload.unwrap();
    assert_eq!(payload["workspace"], "ws-1");
    let session_id = payload["session_id"].as_str().unwrap().to_string();

    let ping = anfrage(&mut client, "2", "ping", None).await.unwrap();
    assert_eq!(ping.payload.unwrap()["pong"], true);

    let state = anfrage(&mut client, "3", "state", None).await.unwrap();
    assert_eq!(state.payload.unwrap()["session_id"], session_id.as_str());

    // channel.send ist registriert, aber kein Adapter dieses Namens
    let send = anfrage(
        &mut client,
        "4",
        "channel.send",
        Some(json!({"channel": "telegram", "target": "x", "content": "hi"})),
    )
    .await
    .unwrap();
    assert_eq!(send.ok, Some(false));
    assert_eq!(send.error.as_deref(), Some("handler failed: not found: telegram"));

    laufend.stopp.send(()).unwrap();
    laufend.task.await.unwrap().unwrap();
    assert!(geschlossen(&mut client).await);
}

#[tokio::test]
async fn token_aus_konfiguration() {
    let toml = format!(
        "{OHNE_HTTP}[auth]\nenabled = true\ntoken_required = true\ntokens = [\"geheim\"]\n"
    );
    let laufend = server_starten(&toml).await;

    let mut falsch = verbinden(laufend.adresse).await;
    let antwort = anfrage(
        &mut falsch,
        "1",
        "connect",
        Some(json!({"device_id": "d1", "version": "1.0", "token": "falsch"})),
    )
    .await
    .unwrap();
    assert_eq!(antwort.error.as_deref(), Some("invalid token"));
    assert!(geschlossen(&mut falsch).await);

    let mut richtig = verbinden(laufend.adresse).await;
    let antwort = anfrage(
        &mut richtig,
        "1",
        "connect",
        Some(json!({"device_id": "d1", "version": "1.0", "token": "geheim"})),
    )
    .await
    .unwrap();
    assert!(antwort.ist_erfolg());

    laufend.stopp.send(()).unwrap();
    laufend.task.await.unwrap().unwrap();
}

#[tokio::test]
async fn health_endpunkt() {
    // Freien Port reservieren und wieder freigeben
    let port = std::net::TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port();
    let toml = format!("[health]\nbind = \"127.0.0.1:{port}\"\n[gateway]\ngateway_id = \"gw-e2e\"\n");
    let laufend = server_starten(&toml).await;

    let mut antwort = String::new();
    for _ in 0..50 {
        if let Ok(mut stream) = TcpStream::connect(("127.0.0.1", port)).await {
            stream
                .write_all(b"GET /health HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n")
                .await
                .unwrap();
            stream.read_to_string(&mut antwort).await.unwrap();
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(antwort.starts_with("HTTP/1.1 200"), "{antwort}");
    assert!(antwort.contains("\"gateway_id\":\"gw-e2e\""));

    laufend.stopp.send(()).unwrap();
    laufend.task.await.unwrap().unwrap();
}

#[tokio::test]
async fn belegter_port_meldet_bind_fehler() {
    let belegt = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let mut config = ServerConfig::default();
    config.server.port = belegt.local_addr().unwrap().port();
    config.health.aktiviert = false;

    let server = Server::neu(config).unwrap();
    match server.binden().await {
        Err(GatewayError::Bind { adresse, .. }) => assert!(adresse.starts_with("127.0.0.1:")),
        andere => panic!("Bind-Fehler erwartet, bekommen: {:?}", andere.map(|_| ())),
    }
}

#[test]
fn ungueltige_konfiguration_verhindert_start() {
    let mut config = ServerConfig::default();
    config.gateway.outbound_queue = 0;
    assert!(Server::neu(config).is_err());
}
