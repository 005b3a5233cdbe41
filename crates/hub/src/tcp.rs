//! TCP-Listener – bindet den Socket und uebergibt Streams an den Hub
//!
//! Jeder akzeptierte Stream wird mit `TCP_NODELAY` an
//! `ConnectionHub::annehmen` uebergeben. Die Accept-Loop endet mit dem
//! Shutdown-Signal oder dem Shutdown des Hubs.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::watch;

use crate::hub::ConnectionHub;

/// TCP-Server des Gateways
pub struct GatewayServer {
    hub: Arc<ConnectionHub>,
    bind_addr: SocketAddr,
    /// 0 = unbegrenzt
    max_clients: usize,
}

impl GatewayServer {
    pub fn neu(hub: Arc<ConnectionHub>, bind_addr: SocketAddr, max_clients: usize) -> Self {
        Self {
            hub,
            bind_addr,
            max_clients,
        }
    }

    /// Bindet den Socket und laeuft bis `shutdown_rx` `true` meldet
    pub async fn starten(self, shutdown_rx: watch::Receiver<bool>) -> std::io::Result<()> {
        let listener = TcpListener::bind(self.bind_addr).await?;
        self.mit_listener(listener, shutdown_rx).await
    }

    /// Accept-Loop auf einem bereits gebundenen Listener
    pub async fn mit_listener(
        self,
        listener: TcpListener,
        mut shutdown_rx: watch::Receiver<bool>,
    ) -> std::io::Result<()> {
        let lokale_addr = listener.local_addr()?;
        let hub_abbruch = self.hub.abbruch_token();

        tracing::info!(adresse = %lokale_addr, "TCP-Gateway gestartet");

        loop {
            tokio::select! {
                ergebnis = listener.accept() => {
                    match ergebnis {
                        Ok((stream, peer_addr)) => {
                            if self.max_clients > 0 && self.hub.client_anzahl() >= self.max_clients {
                                tracing::warn!(
                                    peer = %peer_addr,
                                    max = self.max_clients,
                                    "Gateway voll, Verbindung abgelehnt"
                                );
                                drop(stream);
                                continue;
                            }

                            if let Err(e) = stream.set_nodelay(true) {
                                tracing::debug!(peer = %peer_addr, fehler = %e, "TCP_NODELAY nicht gesetzt");
                            }

                            match self.hub.annehmen(stream) {
                                Ok(client_id) => {
                                    tracing::debug!(peer = %peer_addr, client_id = %client_id, "Verbindung akzeptiert");
                                }
                                Err(e) => {
                                    tracing::debug!(peer = %peer_addr, fehler = %e, "Verbindung verworfen");
                                }
                            }
                        }
                        Err(e) => {
                            tracing::error!(fehler = %e, "TCP-Accept-Fehler");
                            tokio::time::sleep(Duration::from_millis(10)).await;
                        }
                    }
                }

                Ok(()) = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        tracing::info!("TCP-Gateway: Shutdown-Signal empfangen");
                        break;
                    }
                }

                _ = hub_abbruch.cancelled() => {
                    tracing::info!("TCP-Gateway: Hub beendet");
                    break;
                }
            }
        }

        tracing::info!("TCP-Gateway gestoppt");
        Ok(())
    }

    pub fn bind_addr(&self) -> SocketAddr {
        self.bind_addr
    }
}
