//! gateway-server – Bibliotheks-Root
//!
//! Verdrahtet Hub, Heartbeat, TCP-Listener und HTTP-Oberflaeche und stellt
//! den Einstiegspunkt fuer Integrationstests bereit.

pub mod config;

use anyhow::Result;
use config::ServerConfig;
use gateway_core::GatewayError;
use gateway_hub::{AdapterRegistry, ConnectionHub, GatewayServer, HeartbeatManager};
use gateway_observability::{observability_server_starten, GatewayMetrics, HealthState};
use std::future::Future;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;

/// Haelt den laufenden Server-Zustand zusammen
pub struct Server {
    config: ServerConfig,
    metriken: GatewayMetrics,
    hub: Arc<ConnectionHub>,
    heartbeat: Arc<HeartbeatManager>,
    adapter: Arc<AdapterRegistry>,
}

impl Server {
    /// Baut alle Komponenten aus der validierten Konfiguration
    pub fn neu(config: ServerConfig) -> Result<Self> {
        config.validieren()?;

        let metriken = GatewayMetrics::neu()?;
        let hub = ConnectionHub::neu(
            config.hub_config(),
            Arc::new(config.auth_policy()),
            metriken.clone(),
        );
        let heartbeat = HeartbeatManager::neu(hub.clone(), config.heartbeat_config());

        let adapter = AdapterRegistry::neu();
        adapter.an_hub_anbinden(&hub)?;

        Ok(Self {
            config,
            metriken,
            hub,
            heartbeat,
            adapter,
        })
    }

    pub fn hub(&self) -> &Arc<ConnectionHub> {
        &self.hub
    }

    pub fn metriken(&self) -> &GatewayMetrics {
        &self.metriken
    }

    /// Kanal-Adapter; Registrierung vor `laufen`
    pub fn adapter(&self) -> &Arc<AdapterRegistry> {
        &self.adapter
    }

    /// Bindet den TCP-Listener an die konfigurierte Adresse
    pub async fn binden(&self) -> gateway_core::Result<TcpListener> {
        let adresse = self.config.tcp_bind_adresse()?;
        TcpListener::bind(adresse)
            .await
            .map_err(|quelle| GatewayError::Bind {
                adresse: adresse.to_string(),
                quelle,
            })
    }

    /// Startet alle Subsysteme und laeuft bis Ctrl-C
    pub async fn starten(self) -> Result<()> {
        let listener = self.binden().await?;
        self.laufen(listener, async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(fehler = %e, "Signal-Handler nicht installierbar");
            }
        })
        .await
    }

    /// Laeuft auf `listener` bis `signal` fertig ist, dann Graceful Shutdown
    ///
    /// Reihenfolge beim Start:
    /// 1. Event-Bruecke und Snapshot-Pusher
    /// 2. Heartbeat
    /// 3. Kanal-Adapter
    /// 4. TCP-Accept-Loop
    /// 5. HTTP-Oberflaeche (`/health`, `/metrics`)
    pub async fn laufen<F>(self, listener: TcpListener, signal: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        let tcp_adresse = listener.local_addr()?;
        tracing::info!(
            gateway_id = %self.hub.config().gateway_id,
            workspace = %self.hub.config().workspace,
            tcp = %tcp_adresse,
            "Gateway startet"
        );

        self.hub.starten();
        self.heartbeat.starten();
        let adapter_gestartet = self.adapter.alle_starten(&self.hub).await;
        if adapter_gestartet > 0 {
            tracing::info!(anzahl = adapter_gestartet, "Kanal-Adapter gestartet");
        }

        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let tcp_server = GatewayServer::neu(self.hub.clone(), tcp_adresse, self.config.server.max_clients);
        let tcp_task = tokio::spawn(tcp_server.mit_listener(listener, shutdown_rx.clone()));

        let health_state = HealthState::neu(self.hub.config().gateway_id.to_string(), self.metriken.clone());
        let http_task = if self.config.health.aktiviert {
            let adresse = self.config.health_bind_adresse()?;
            Some(tokio::spawn(observability_server_starten(
                adresse,
                health_state.clone(),
                self.metriken.clone(),
                shutdown_rx,
            )))
        } else {
            None
        };

        tracing::info!("Gateway laeuft. Warte auf Shutdown-Signal...");
        signal.await;
        tracing::info!("Shutdown-Signal empfangen, Gateway wird beendet");

        // ----------------------------------------------------------------
        // Graceful Shutdown
        // ----------------------------------------------------------------
        health_state.beenden_markieren();
        let _ = shutdown_tx.send(true);
        self.heartbeat.stoppen();
        self.adapter.alle_stoppen().await;

        let ergebnis = self.hub.herunterfahren(self.config.shutdown_frist()).await;

        match tcp_task.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::warn!(fehler = %e, "TCP-Listener mit Fehler beendet"),
            Err(e) => tracing::warn!(fehler = %e, "TCP-Task abgebrochen"),
        }
        if let Some(task) = http_task {
            match task.await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => tracing::warn!(fehler = %e, "HTTP-Oberflaeche mit Fehler beendet"),
                Err(e) => tracing::warn!(fehler = %e, "HTTP-Task abgebrochen"),
            }
        }

        match ergebnis {
            Ok(()) => {
                tracing::info!("Gateway sauber beendet");
                Ok(())
            }
            Err(e) => {
                tracing::warn!(fehler = %e, "Shutdown-Frist ueberschritten");
                Err(e.into())
            }
        }
    }
}
