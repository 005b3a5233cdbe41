//! Broadcast – Event-Bruecke und Snapshot-Pusher
//!
//! Die Event-Bruecke abonniert den eigenen EventBus und leitet passende
//! Events als `event`-Nachrichten an aktive Clients weiter:
//! - leerer Kanal: an alle aktiven Clients
//! - sonst: an aktive Clients, deren Device-ID dem Kanal entspricht
//!
//! Die Sequenznummer des Busses wird unveraendert uebernommen. Da die
//! Bruecke ein einzelner Task ist, sieht jeder Client steigende Nummern.

use gateway_protocol::{events, ProtocolMessage};
use std::sync::Arc;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

use crate::event_bus::Event;
use crate::hub::ConnectionHub;

/// Ergebnis einer Mehrfach-Zustellung
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SendeBericht {
    /// Erfolgreich eingereiht
    pub zugestellt: usize,
    /// Wegen voller oder geschlossener Queue verworfen
    pub verworfen: usize,
}

/// Startet die Event-Bruecke; eine leere Typliste deaktiviert sie
pub(crate) fn event_bruecke_starten(hub: &Arc<ConnectionHub>) {
    let typen = hub.config().weitergeleitete_events.clone();
    if typen.is_empty() {
        tracing::debug!("Event-Bruecke deaktiviert");
        return;
    }

    let mut abo = hub.event_bus().abonnieren("", typen);
    let token = hub.abbruch_token();
    let bruecke_hub = Arc::clone(hub);

    hub.task_spawnen(async move {
        loop {
            tokio::select! {
                biased;
                _ = token.cancelled() => break,
                event = abo.empfangen() => match event {
                    Some(event) => weiterleiten(&bruecke_hub, &event),
                    None => break,
                },
            }
        }
        tracing::debug!("Event-Bruecke beendet");
    });
}

fn weiterleiten(hub: &ConnectionHub, event: &Event) {
    let nachricht = ProtocolMessage::event(event.typ.clone(), event.daten.clone(), event.sequenz);
    let kanal = event.kanal.as_str();

    match hub.gefiltert_senden(
        |c| kanal.is_empty() || c.device_id() == Some(kanal),
        &nachricht,
    ) {
        Ok(bericht) => tracing::trace!(
            typ = %event.typ,
            sequenz = event.sequenz,
            zugestellt = bericht.zugestellt,
            verworfen = bericht.verworfen,
            "Event weitergeleitet"
        ),
        Err(e) => tracing::warn!(typ = %event.typ, fehler = %e, "Event nicht weiterleitbar"),
    }
}

/// Startet den periodischen `state.update`; Intervall null deaktiviert ihn
pub(crate) fn snapshot_pusher_starten(hub: &Arc<ConnectionHub>) {
    let intervall = hub.config().snapshot_intervall;
    if intervall.is_zero() {
        return;
    }

    let token = hub.abbruch_token();
    let pusher_hub = Arc::clone(hub);

    hub.task_spawnen(async move {
        let mut takt = interval_at(Instant::now() + intervall, intervall);
        takt.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                biased;
                _ = token.cancelled() => break,
                _ = takt.tick() => {
                    let snapshot = pusher_hub.zustand_snapshot(None);
                    if let Err(e) = pusher_hub
                        .event_bus()
                        .veroeffentlichen_serialisiert(events::STATE_UPDATE, "", &*snapshot)
                    {
                        tracing::warn!(fehler = %e, "Snapshot nicht veroeffentlicht");
                    }
                }
            }
        }
        tracing::debug!("Snapshot-Pusher beendet");
    });
}
