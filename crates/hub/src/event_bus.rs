//! EventBus – In-Process Publish/Subscribe
//!
//! Jedes Abonnement hat eine eigene, begrenzte Zustell-Queue. Ein Event
//! passt auf ein Abonnement, wenn
//! (Kanal-Filter leer ODER gleich dem Event-Kanal) UND
//! (Typ-Filter leer ODER enthaelt den Event-Typ).
//!
//! ## Sequenznummern
//! Die Sequenz ist pro Bus, nicht pro Abonnent. Vergabe und Zustellung
//! passieren unter derselben Sperre, daher sieht jeder Abonnent streng
//! steigende Nummern. Luecken entstehen nur durch volle Queues und sind
//! fuer Clients das Signal, einen Snapshot nachzuladen.

use chrono::{DateTime, Utc};
use gateway_observability::GatewayMetrics;
use gateway_protocol::CodecFehler;
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Weak};
use tokio::sync::mpsc;

use crate::error::HubResult;

/// Aufeinanderfolgende Verwerfungen, nach denen ein Abonnement als tot gilt
const MAX_VERWORFEN_IN_FOLGE: u32 = 1024;

// ---------------------------------------------------------------------------
// Event
// ---------------------------------------------------------------------------

/// Ein veroeffentlichtes Event
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Event {
    #[serde(rename = "type")]
    pub typ: String,
    #[serde(rename = "channel")]
    pub kanal: String,
    #[serde(rename = "data")]
    pub daten: Value,
    #[serde(rename = "seq")]
    pub sequenz: u64,
    #[serde(rename = "timestamp")]
    pub zeitstempel: DateTime<Utc>,
}

/// Filter eines Abonnements
#[derive(Debug, Clone, Default)]
pub struct EventFilter {
    kanal: String,
    typen: HashSet<String>,
}

impl EventFilter {
    pub fn neu<I, S>(kanal: &str, typen: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            kanal: kanal.to_string(),
            typen: typen.into_iter().map(Into::into).collect(),
        }
    }

    /// Filter ohne Einschraenkung
    pub fn alle() -> Self {
        Self::default()
    }

    pub fn passt(&self, event: &Event) -> bool {
        (self.kanal.is_empty() || self.kanal == event.kanal)
            && (self.typen.is_empty() || self.typen.contains(&event.typ))
    }
}

// ---------------------------------------------------------------------------
// EventBus
// ---------------------------------------------------------------------------

/// Publish/Subscribe-Register des Gateways
///
/// Clone teilt den inneren Zustand.
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<BusInner>,
}

struct BusInner {
    zustand: Mutex<BusZustand>,
    queue_groesse: usize,
    metriken: GatewayMetrics,
}

#[derive(Default)]
struct BusZustand {
    sequenz: u64,
    naechste_id: u64,
    abos: HashMap<u64, AboEintrag>,
}

struct AboEintrag {
    filter: EventFilter,
    tx: mpsc::Sender<Arc<Event>>,
    verworfen_in_folge: u32,
}

impl EventBus {
    /// Erstellt einen Bus mit der gegebenen Queue-Groesse pro Abonnement
    pub fn neu(queue_groesse: usize, metriken: GatewayMetrics) -> Self {
        Self {
            inner: Arc::new(BusInner {
                zustand: Mutex::new(BusZustand::default()),
                queue_groesse: queue_groesse.max(1),
                metriken,
            }),
        }
    }

    /// Legt ein Abonnement an
    ///
    /// Leerer `kanal` und leere `typen` bedeuten jeweils "alle".
    pub fn abonnieren<I, S>(&self, kanal: &str, typen: I) -> Subscription
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.abonnieren_mit_filter(EventFilter::neu(kanal, typen))
    }

    pub fn abonnieren_mit_filter(&self, filter: EventFilter) -> Subscription {
        let (tx, rx) = mpsc::channel(self.inner.queue_groesse);
        let mut zustand = self.inner.zustand.lock();
        zustand.naechste_id += 1;
        let id = zustand.naechste_id;
        zustand.abos.insert(
            id,
            AboEintrag {
                filter,
                tx,
                verworfen_in_folge: 0,
            },
        );
        tracing::debug!(abo_id = id, "EventBus-Abonnement angelegt");

        Subscription {
            id,
            rx,
            bus: Arc::downgrade(&self.inner),
        }
    }

    /// Veroeffentlicht ein Event und gibt seine Sequenznummer zurueck
    ///
    /// Blockiert nie: volle Abonnenten-Queues verlieren nur ihre eigene
    /// Zustellung.
    pub fn veroeffentlichen(&self, typ: &str, kanal: &str, daten: Value) -> u64 {
        let mut verworfen = 0u64;
        let mut zustand = self.inner.zustand.lock();
        zustand.sequenz += 1;
        let event = Arc::new(Event {
            typ: typ.to_string(),
            kanal: kanal.to_string(),
            daten,
            sequenz: zustand.sequenz,
            zeitstempel: Utc::now(),
        });

        let mut tote = Vec::new();
        for (id, abo) in zustand.abos.iter_mut() {
            if !abo.filter.passt(&event) {
                continue;
            }
            match abo.tx.try_send(Arc::clone(&event)) {
                Ok(()) => abo.verworfen_in_folge = 0,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    verworfen += 1;
                    abo.verworfen_in_folge += 1;
                    if abo.verworfen_in_folge >= MAX_VERWORFEN_IN_FOLGE {
                        tote.push(*id);
                    }
                }
                Err(mpsc::error::TrySendError::Closed(_)) => tote.push(*id),
            }
        }
        for id in &tote {
            zustand.abos.remove(id);
        }
        let sequenz = event.sequenz;
        drop(zustand);

        self.inner.metriken.events_published_total.inc();
        if verworfen > 0 {
            self.inner.metriken.event_drops_total.inc_by(verworfen);
            tracing::warn!(typ, sequenz, verworfen, "Event-Zustellung verworfen (Queue voll)");
        }
        if !tote.is_empty() {
            tracing::info!(anzahl = tote.len(), "Tote Abonnements entfernt");
        }
        sequenz
    }

    /// Veroeffentlicht einen beliebigen serialisierbaren Body
    pub fn veroeffentlichen_serialisiert<T: Serialize>(
        &self,
        typ: &str,
        kanal: &str,
        daten: &T,
    ) -> HubResult<u64> {
        let wert = serde_json::to_value(daten).map_err(CodecFehler::UnserializableBody)?;
        Ok(self.veroeffentlichen(typ, kanal, wert))
    }

    /// Entfernt ein Abonnement und schliesst seine Queue
    pub fn abbestellen(&self, abo: Subscription) {
        tracing::debug!(abo_id = abo.id, "EventBus-Abonnement beendet");
        drop(abo);
    }

    pub fn abonnenten_anzahl(&self) -> usize {
        self.inner.zustand.lock().abos.len()
    }

    /// Zuletzt vergebene Sequenznummer
    pub fn letzte_sequenz(&self) -> u64 {
        self.inner.zustand.lock().sequenz
    }
}

// ---------------------------------------------------------------------------
// Subscription
// ---------------------------------------------------------------------------

/// Handle auf ein Abonnement mit privater Zustell-Queue
///
/// Drop entfernt das Abonnement vom Bus.
pub struct Subscription {
    id: u64,
    rx: mpsc::Receiver<Arc<Event>>,
    bus: Weak<BusInner>,
}

impl Subscription {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Wartet auf das naechste Event; `None` wenn das Abonnement beendet wurde
    pub async fn empfangen(&mut self) -> Option<Arc<Event>> {
        self.rx.recv().await
    }

    /// Nicht-blockierender Empfang
    pub fn try_empfangen(&mut self) -> Option<Arc<Event>> {
        self.rx.try_recv().ok()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(bus) = self.bus.upgrade() {
            bus.zustand.lock().abos.remove(&self.id);
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish()
    }
}
