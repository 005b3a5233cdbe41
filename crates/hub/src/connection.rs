//! Connection – Lese- und Schreib-Loop einer Verbindung
//!
//! Jede Verbindung laeuft als drei Tasks im `TaskTracker` des Hubs:
//!
//! ```text
//! Supervisor ──┬── Lese-Loop:    Frame -> ProtocolCodec -> Hub::eingehend_verarbeiten
//!              └── Schreib-Loop: Ausgangs-Queue / Keepalive-Ping -> Socket
//! ```
//!
//! Der Supervisor ueberwacht die Handshake-Frist und meldet das Ende der
//! Verbindung genau einmal an den Hub, nachdem beide Loops beendet sind.
//! Beide Loops haengen am `CancellationToken` des Clients; wer zuerst
//! endet, stoesst ueber `Client::schliessen` das Ende des anderen an.

use bytes::Bytes;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use gateway_protocol::{CodecFehler, Frame, FrameCodec};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio::time::{interval_at, timeout, Instant, MissedTickBehavior};
use tokio_util::codec::Framed;

use crate::client::{Client, SchliessGrund, VerbindungsZustand};
use crate::hub::ConnectionHub;

type FrameSink<S> = SplitSink<Framed<S, FrameCodec>, Frame>;
type FrameStream<S> = SplitStream<Framed<S, FrameCodec>>;

/// Kleinstes Intervall fuer Keepalive-Pings
const MIN_KEEPALIVE: Duration = Duration::from_millis(10);

// ---------------------------------------------------------------------------
// Supervisor
// ---------------------------------------------------------------------------

/// Betreibt eine angenommene Verbindung bis zu ihrem Ende
pub(crate) async fn verbindung_betreiben<S>(
    hub: Arc<ConnectionHub>,
    client: Arc<Client>,
    stream: S,
    ausgang_rx: mpsc::Receiver<Frame>,
) where
    S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    let config = hub.config();
    let framed = Framed::new(stream, FrameCodec::with_max_size(config.max_frame_groesse));
    let (sink, stream) = framed.split();

    let mut lesen = hub.task_spawnen(lese_loop(Arc::clone(&hub), Arc::clone(&client), stream));
    let mut schreiben = hub.task_spawnen(schreib_loop(
        Arc::clone(&client),
        sink,
        ausgang_rx,
        config.schreib_timeout,
        config.keepalive_intervall.max(MIN_KEEPALIVE),
    ));
    client.tasks_registrieren([lesen.abort_handle(), schreiben.abort_handle()]);

    let handshake_frist = tokio::time::sleep(config.handshake_timeout);
    tokio::pin!(handshake_frist);

    let mut frist_vorbei = false;
    let mut lesen_fertig = false;
    let mut schreiben_fertig = false;

    while !(lesen_fertig && schreiben_fertig) {
        tokio::select! {
            _ = &mut handshake_frist, if !frist_vorbei => {
                frist_vorbei = true;
                if client.zustand() == VerbindungsZustand::Verbindend {
                    hub.handshake_abgelaufen(&client);
                }
            }
            ergebnis = &mut lesen, if !lesen_fertig => {
                lesen_fertig = true;
                if let Err(e) = ergebnis {
                    tracing::debug!(client_id = %client.id(), fehler = %e, "Lese-Task abgebrochen");
                    client.schliessen(SchliessGrund::TransportFehler);
                }
            }
            ergebnis = &mut schreiben, if !schreiben_fertig => {
                schreiben_fertig = true;
                if let Err(e) = ergebnis {
                    tracing::debug!(client_id = %client.id(), fehler = %e, "Schreib-Task abgebrochen");
                    client.schliessen(SchliessGrund::TransportFehler);
                }
            }
        }
    }

    hub.verbindung_abschliessen(&client);
}

// ---------------------------------------------------------------------------
// Lese-Loop
// ---------------------------------------------------------------------------

async fn lese_loop<S>(hub: Arc<ConnectionHub>, client: Arc<Client>, mut stream: FrameStream<S>)
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let token = client.abbruch_token().clone();
    let codec = hub.codec();
    // Hoechstens ein Frame, der waehrend eines laufenden Handlers gelesen wurde
    let mut vorgelesen: Option<Frame> = None;

    loop {
        let frame = match vorgelesen.take() {
            Some(frame) => frame,
            None => {
                let gelesen = tokio::select! {
                    biased;
                    _ = token.cancelled() => return,
                    gelesen = stream.next() => gelesen,
                };
                match frame_annehmen(&hub, &client, gelesen) {
                    Some(frame) => frame,
                    None => return,
                }
            }
        };

        match frame {
            Frame::Daten(bytes) => {
                let nachricht = match codec.decode(&bytes) {
                    Ok(nachricht) => nachricht,
                    Err(e) => {
                        tracing::warn!(
                            client_id = %client.id(),
                            fehler = %e,
                            art = e.art(),
                            "Ungueltige Nachricht"
                        );
                        client.schliessen(SchliessGrund::Protokollfehler);
                        return;
                    }
                };

                // Ein haengender Handler darf weder Abbruch noch EOF verdecken
                let verarbeitung = hub.eingehend_verarbeiten(&client, nachricht);
                tokio::pin!(verarbeitung);
                loop {
                    tokio::select! {
                        biased;
                        _ = token.cancelled() => return,
                        _ = &mut verarbeitung => break,
                        gelesen = stream.next(), if vorgelesen.is_none() => {
                            match frame_annehmen(&hub, &client, gelesen) {
                                Some(frame) => vorgelesen = Some(frame),
                                None => return,
                            }
                        }
                    }
                }
            }
            Frame::Ping(payload) => {
                let _ = client.frame_senden(Frame::Pong(payload));
            }
            Frame::Pong(_) => {
                tracing::trace!(client_id = %client.id(), "Keepalive bestaetigt");
            }
            // Wird schon in `frame_annehmen` behandelt
            Frame::Close => return,
        }
    }
}

/// Wertet ein Leseergebnis aus; `None` beendet den Lese-Loop
///
/// Jeder empfangene Frame zaehlt sofort als Aktivitaet, auch wenn er erst
/// nach einem laufenden Handler verarbeitet wird.
fn frame_annehmen(
    hub: &ConnectionHub,
    client: &Client,
    gelesen: Option<Result<Frame, CodecFehler>>,
) -> Option<Frame> {
    let frame = match gelesen {
        Some(Ok(frame)) => frame,
        Some(Err(e)) => {
            tracing::warn!(client_id = %client.id(), fehler = %e, art = e.art(), "Frame-Lesefehler");
            client.schliessen(SchliessGrund::Protokollfehler);
            return None;
        }
        None => {
            tracing::debug!(client_id = %client.id(), "Verbindung vom Client getrennt");
            client.schliessen(SchliessGrund::PeerGeschlossen);
            return None;
        }
    };

    client.aktivitaet_melden();
    hub.metriken().frames_received_total.inc();

    if let Frame::Close = frame {
        tracing::debug!(client_id = %client.id(), "Close-Frame empfangen");
        client.schliessen(SchliessGrund::PeerGeschlossen);
        return None;
    }
    Some(frame)
}

// ---------------------------------------------------------------------------
// Schreib-Loop
// ---------------------------------------------------------------------------

async fn schreib_loop<S>(
    client: Arc<Client>,
    mut sink: FrameSink<S>,
    mut rx: mpsc::Receiver<Frame>,
    schreib_timeout: Duration,
    keepalive: Duration,
) where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let token = client.abbruch_token().clone();
    let mut keepalive_takt = interval_at(Instant::now() + keepalive, keepalive);
    keepalive_takt.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut ping_zaehler: u64 = 0;

    loop {
        let frame = tokio::select! {
            biased;
            _ = token.cancelled() => break,
            frame = rx.recv() => match frame {
                Some(frame) => frame,
                None => break,
            },
            _ = keepalive_takt.tick() => {
                ping_zaehler = ping_zaehler.wrapping_add(1);
                Frame::Ping(Bytes::copy_from_slice(&ping_zaehler.to_be_bytes()))
            }
        };

        if let Err(grund) = frame_schreiben(&client, &mut sink, frame, schreib_timeout).await {
            client.schliessen(grund);
            return;
        }
    }

    // Bereits eingereihte Frames (z.B. eine Handshake-Ablehnung) noch ausliefern
    rx.close();
    while let Ok(frame) = rx.try_recv() {
        if frame_schreiben(&client, &mut sink, frame, schreib_timeout).await.is_err() {
            return;
        }
    }
    if frame_schreiben(&client, &mut sink, Frame::Close, schreib_timeout)
        .await
        .is_ok()
    {
        let _ = timeout(schreib_timeout, sink.close()).await;
    }
}

/// Schreibt einen Frame mit Frist
async fn frame_schreiben<S>(
    client: &Client,
    sink: &mut FrameSink<S>,
    frame: Frame,
    frist: Duration,
) -> Result<(), SchliessGrund>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    match timeout(frist, sink.send(frame)).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => {
            tracing::debug!(client_id = %client.id(), fehler = %e, "Senden fehlgeschlagen");
            Err(SchliessGrund::TransportFehler)
        }
        Err(_) => {
            tracing::warn!(
                client_id = %client.id(),
                frist_ms = frist.as_millis() as u64,
                "Schreib-Timeout"
            );
            Err(SchliessGrund::SchreibTimeout)
        }
    }
}
