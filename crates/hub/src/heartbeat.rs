//! Heartbeat-Manager – Probes und Leerlauf-Eviction
//!
//! Zwei unabhaengige Loops auf der Registry des Hubs:
//! - Probe-Loop: sendet jedem aktiven, lebendigen Client eine `ping`-Anfrage
//!   (`id = hb-<n>`). Fehlgeschlagene Probes werden nur geloggt.
//! - Leerlauf-Loop: schliesst aktive Clients, deren letzte Aktivitaet laenger
//!   als `idle_timeout` zurueckliegt.
//!
//! Aktivitaet ist jeder eingehende Frame (Daten, Ping, Pong, Probe-Antwort);
//! es gibt genau einen Zeitstempel pro Client.

use gateway_core::ConnectionId;
use gateway_protocol::ProtocolMessage;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::client::SchliessGrund;
use crate::config::HeartbeatConfig;
use crate::hub::ConnectionHub;

/// Kleinstes zulaessiges Loop-Intervall
const MIN_INTERVALL: Duration = Duration::from_millis(1);

/// Momentaufnahme fuer Status-Endpunkte
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct HeartbeatStatistik {
    /// Clients in der Registry
    pub gesamt: usize,
    /// Aktive Clients
    pub aktiv: usize,
    /// Aktive Clients, die laenger als die halbe Leerlauf-Frist still sind
    pub leerlauf: usize,
}

/// Ueberwacht die Lebendigkeit aller aktiven Verbindungen
pub struct HeartbeatManager {
    hub: Arc<ConnectionHub>,
    config: HeartbeatConfig,
    abbruch: CancellationToken,
    probe_zaehler: AtomicU64,
    gestartet: AtomicBool,
}

impl HeartbeatManager {
    /// Der Manager endet spaetestens mit dem Shutdown des Hubs
    pub fn neu(hub: Arc<ConnectionHub>, config: HeartbeatConfig) -> Arc<Self> {
        let abbruch = hub.abbruch_token().child_token();
        Arc::new(Self {
            hub,
            config,
            abbruch,
            probe_zaehler: AtomicU64::new(0),
            gestartet: AtomicBool::new(false),
        })
    }

    /// Startet Probe- und Leerlauf-Loop (idempotent)
    pub fn starten(self: &Arc<Self>) {
        if self.gestartet.swap(true, Ordering::SeqCst) {
            return;
        }

        let probe = Arc::clone(self);
        self.hub.task_spawnen(async move { probe.probe_loop().await });
        let leerlauf = Arc::clone(self);
        self.hub.task_spawnen(async move { leerlauf.leerlauf_loop().await });

        tracing::info!(
            probe_sek = self.config.probe_intervall.as_secs(),
            pruef_sek = self.config.pruef_intervall.as_secs(),
            idle_timeout_sek = self.config.idle_timeout.as_secs(),
            "Heartbeat-Manager gestartet"
        );
    }

    /// Beendet beide Loops
    pub fn stoppen(&self) {
        self.abbruch.cancel();
    }

    async fn probe_loop(&self) {
        let periode = self.config.probe_intervall.max(MIN_INTERVALL);
        let mut takt = interval_at(Instant::now() + periode, periode);
        takt.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                biased;
                _ = self.abbruch.cancelled() => break,
                _ = takt.tick() => {
                    self.probe_runde();
                }
            }
        }
        tracing::debug!("Probe-Loop beendet");
    }

    async fn leerlauf_loop(&self) {
        let periode = self.config.pruef_intervall.max(MIN_INTERVALL);
        let mut takt = interval_at(Instant::now() + periode, periode);
        takt.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                biased;
                _ = self.abbruch.cancelled() => break,
                _ = takt.tick() => {
                    self.leerlauf_runde();
                }
            }
        }
        tracing::debug!("Leerlauf-Loop beendet");
    }

    /// Sendet eine Probe an jeden aktiven, lebendigen Client
    ///
    /// Gibt die Anzahl eingereihter Probes zurueck.
    pub fn probe_runde(&self) -> usize {
        let mut gesendet = 0;
        for client in self.hub.aktive_clients() {
            if !client.ist_lebendig() {
                continue;
            }
            let n = self.probe_zaehler.fetch_add(1, Ordering::Relaxed) + 1;
            let probe = ProtocolMessage::request(format!("hb-{n}"), "ping", None);
            match self.hub.nachricht_zustellen(&client, &probe) {
                Ok(()) => gesendet += 1,
                Err(e) => {
                    tracing::debug!(client_id = %client.id(), fehler = %e, "Probe nicht zugestellt");
                }
            }
        }
        tracing::trace!(gesendet, "Probe-Runde");
        gesendet
    }

    /// Schliesst alle aktiven Clients ueber der Leerlauf-Frist
    ///
    /// Gibt die Anzahl geschlossener Clients zurueck.
    pub fn leerlauf_runde(&self) -> usize {
        let mut geschlossen = 0;
        for client in self.hub.aktive_clients() {
            let leerlauf = client.leerlauf();
            if leerlauf <= self.config.idle_timeout {
                continue;
            }
            tracing::info!(
                client_id = %client.id(),
                device_id = client.device_id().unwrap_or("-"),
                leerlauf_ms = leerlauf.as_millis() as u64,
                "Leerlauf-Timeout, Verbindung wird geschlossen"
            );
            self.hub.metriken().idle_evictions_total.inc();
            client.schliessen(SchliessGrund::Leerlauf);
            geschlossen += 1;
        }
        geschlossen
    }

    pub fn statistik(&self) -> HeartbeatStatistik {
        let clients = self.hub.clients();
        let halbe_frist = self.config.idle_timeout / 2;

        let mut statistik = HeartbeatStatistik {
            gesamt: clients.len(),
            ..Default::default()
        };
        for client in clients.iter().filter(|c| c.ist_aktiv()) {
            statistik.aktiv += 1;
            if client.leerlauf() > halbe_frist {
                statistik.leerlauf += 1;
            }
        }
        statistik
    }

    /// true wenn der Client aktiv ist und innerhalb der Frist Aktivitaet zeigte
    pub fn ist_lebendig(&self, id: &ConnectionId) -> bool {
        self.hub
            .client(id)
            .map(|c| c.ist_aktiv() && c.leerlauf() <= self.config.idle_timeout)
            .unwrap_or(false)
    }
}
