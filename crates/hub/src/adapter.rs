//! Channel-Adapter – Bruecken zu externen Kanaelen
//!
//! Ein Adapter bringt Nachrichten eines externen Kanals ueber
//! `AdapterKontext::eingang` auf den EventBus (Kanal = Adaptername) und
//! nimmt ausgehende Nachrichten ueber `senden` entgegen. Clients erreichen
//! Adapter ueber die Methode `channel.send`.

use async_trait::async_trait;
use dashmap::DashMap;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::{Arc, Weak};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::dispatcher::{HandlerFehler, HandlerKontext, MethodHandler};
use crate::error::HubResult;
use crate::event_bus::EventBus;
use crate::hub::ConnectionHub;

/// Methodenname fuer ausgehende Adapter-Nachrichten
pub const CHANNEL_SEND_METHODE: &str = "channel.send";

// ---------------------------------------------------------------------------
// Fehler
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum AdapterFehler {
    #[error("Adapter nicht gefunden: {0}")]
    NichtGefunden(String),

    #[error("Adapter bereits registriert: {0}")]
    BereitsRegistriert(String),

    #[error("Adapter nicht gestartet: {0}")]
    NichtGestartet(String),

    #[error("Senden fehlgeschlagen: {0}")]
    Senden(String),

    #[error("Interner Adapter-Fehler: {0}")]
    Intern(String),
}

// ---------------------------------------------------------------------------
// Kontext und Trait
// ---------------------------------------------------------------------------

/// Was ein Adapter vom Gateway bekommt
#[derive(Clone)]
pub struct AdapterKontext {
    name: String,
    event_bus: EventBus,
    abbruch: CancellationToken,
}

impl AdapterKontext {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Veroeffentlicht eingehenden Verkehr mit Kanal = Adaptername
    pub fn eingang(&self, typ: &str, daten: Value) -> u64 {
        self.event_bus.veroeffentlichen(typ, &self.name, daten)
    }

    /// Wird beim Stoppen oder beim Shutdown des Hubs ausgeloest
    pub fn abbruch(&self) -> &CancellationToken {
        &self.abbruch
    }
}

/// Faehigkeiten eines Kanal-Adapters
#[async_trait]
pub trait ChannelAdapter: Send + Sync {
    fn name(&self) -> &str;

    async fn starten(&self, ctx: AdapterKontext) -> Result<(), AdapterFehler>;

    async fn stoppen(&self) -> Result<(), AdapterFehler>;

    async fn senden(&self, ziel: &str, inhalt: &str) -> Result<(), AdapterFehler>;

    fn laeuft(&self) -> bool;
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

struct AdapterEintrag {
    adapter: Arc<dyn ChannelAdapter>,
    abbruch: Option<CancellationToken>,
}

/// Registrierte Adapter, nach Name
#[derive(Default)]
pub struct AdapterRegistry {
    adapter: DashMap<String, AdapterEintrag>,
}

impl AdapterRegistry {
    pub fn neu() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn registrieren(&self, adapter: Arc<dyn ChannelAdapter>) -> Result<(), AdapterFehler> {
        let name = adapter.name().to_string();
        if self.adapter.contains_key(&name) {
            return Err(AdapterFehler::BereitsRegistriert(name));
        }
        tracing::info!(adapter = %name, "Adapter registriert");
        self.adapter.insert(name, AdapterEintrag { adapter, abbruch: None });
        Ok(())
    }

    pub fn holen(&self, name: &str) -> Option<Arc<dyn ChannelAdapter>> {
        self.adapter.get(name).map(|e| Arc::clone(&e.adapter))
    }

    /// Registrierte Adapternamen, sortiert
    pub fn namen(&self) -> Vec<String> {
        let mut namen: Vec<String> = self.adapter.iter().map(|e| e.key().clone()).collect();
        namen.sort();
        namen
    }

    /// Startet alle Adapter; Fehler einzelner Adapter werden geloggt
    ///
    /// Gibt die Anzahl erfolgreich gestarteter Adapter zurueck.
    pub async fn alle_starten(&self, hub: &ConnectionHub) -> usize {
        // Arcs sammeln, damit keine Map-Sperre ueber ein await gehalten wird
        let adapter: Vec<(String, Arc<dyn ChannelAdapter>)> = self
            .adapter
            .iter()
            .map(|e| (e.key().clone(), Arc::clone(&e.adapter)))
            .collect();

        let mut gestartet = 0;
        for (name, adapter) in adapter {
            let abbruch = hub.abbruch_token().child_token();
            let ctx = AdapterKontext {
                name: name.clone(),
                event_bus: hub.event_bus().clone(),
                abbruch: abbruch.clone(),
            };
            match adapter.starten(ctx).await {
                Ok(()) => {
                    if let Some(mut eintrag) = self.adapter.get_mut(&name) {
                        eintrag.abbruch = Some(abbruch);
                    }
                    tracing::info!(adapter = %name, "Adapter gestartet");
                    gestartet += 1;
                }
                Err(e) => tracing::warn!(adapter = %name, fehler = %e, "Adapter-Start fehlgeschlagen"),
            }
        }
        gestartet
    }

    /// Stoppt alle Adapter
    pub async fn alle_stoppen(&self) {
        let adapter: Vec<(String, Arc<dyn ChannelAdapter>, Option<CancellationToken>)> = self
            .adapter
            .iter_mut()
            .map(|mut e| (e.key().clone(), Arc::clone(&e.adapter), e.abbruch.take()))
            .collect();

        for (name, adapter, abbruch) in adapter {
            if let Some(abbruch) = abbruch {
                abbruch.cancel();
            }
            if let Err(e) = adapter.stoppen().await {
                tracing::warn!(adapter = %name, fehler = %e, "Adapter-Stopp fehlgeschlagen");
            }
        }
    }

    /// Sendet ueber den benannten Adapter
    pub async fn senden(&self, kanal: &str, ziel: &str, inhalt: &str) -> Result<(), AdapterFehler> {
        let adapter = self
            .holen(kanal)
            .ok_or_else(|| AdapterFehler::NichtGefunden(kanal.to_string()))?;
        if !adapter.laeuft() {
            return Err(AdapterFehler::NichtGestartet(kanal.to_string()));
        }
        adapter.senden(ziel, inhalt).await
    }

    /// Registriert `channel.send` am Hub
    pub fn an_hub_anbinden(self: &Arc<Self>, hub: &ConnectionHub) -> HubResult<()> {
        hub.methode_registrieren(
            CHANNEL_SEND_METHODE,
            Arc::new(ChannelSendHandler {
                registry: Arc::downgrade(self),
            }),
        )
    }
}

// ---------------------------------------------------------------------------
// channel.send
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct ChannelSendParams {
    channel: String,
    target: String,
    content: String,
}

struct ChannelSendHandler {
    registry: Weak<AdapterRegistry>,
}

#[async_trait]
impl MethodHandler for ChannelSendHandler {
    async fn aufrufen(&self, ctx: HandlerKontext, params: Option<Value>) -> Result<Value, HandlerFehler> {
        let params: ChannelSendParams = serde_json::from_value(params.unwrap_or(Value::Null))?;
        let registry = self
            .registry
            .upgrade()
            .ok_or_else(|| HandlerFehler::NichtVerfuegbar("adapters stopped".into()))?;

        tracing::debug!(
            client_id = %ctx.client_id,
            kanal = %params.channel,
            ziel = %params.target,
            "channel.send"
        );

        registry
            .senden(&params.channel, &params.target, &params.content)
            .await
            .map_err(|e| match e {
                AdapterFehler::NichtGefunden(name) => HandlerFehler::NichtGefunden(name),
                andere => HandlerFehler::Fehlgeschlagen(andere.to_string()),
            })?;

        Ok(json!({ "sent": true, "channel": params.channel }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::OffenePolicy;
    use crate::config::HubConfig;
    use gateway_core::{ConnectionId, SessionId};
    use gateway_observability::GatewayMetrics;
    use gateway_protocol::ClientType;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[derive(Default)]
    struct TestAdapter {
        laeuft: AtomicBool,
        gesendet: Mutex<Vec<(String, String)>>,
        kontext: Mutex<Option<AdapterKontext>>,
    }

    #[async_trait]
    impl ChannelAdapter for TestAdapter {
        fn name(&self) -> &str {
            "test"
        }

        async fn starten(&self, ctx: AdapterKontext) -> Result<(), AdapterFehler> {
            *self.kontext.lock() = Some(ctx);
            self.laeuft.store(true, Ordering::SeqCst);
            Ok(())
        }

        async fn stoppen(&self) -> Result<(), AdapterFehler> {
            self.laeuft.store(false, Ordering::SeqCst);
            Ok(())
        }

        async fn senden(&self, ziel: &str, inhalt: &str) -> Result<(), AdapterFehler> {
            self.gesendet.lock().push((ziel.to_string(), inhalt.to_string()));
            Ok(())
        }

        fn laeuft(&self) -> bool {
            self.laeuft.load(Ordering::SeqCst)
        }
    }

    fn test_hub() -> Arc<ConnectionHub> {
        ConnectionHub::neu(
            HubConfig::default(),
            Arc::new(OffenePolicy),
            GatewayMetrics::neu().unwrap(),
        )
    }

    fn kontext(hub: &ConnectionHub) -> HandlerKontext {
        HandlerKontext {
            client_id: ConnectionId::new(),
            session_id: SessionId::new(),
            device_id: "d1".into(),
            client_type: Some(ClientType::Agent),
            event_bus: hub.event_bus().clone(),
        }
    }

    #[test]
    fn doppelte_registrierung() {
        let reg = AdapterRegistry::neu();
        reg.registrieren(Arc::new(TestAdapter::default())).unwrap();
        let err = reg.registrieren(Arc::new(TestAdapter::default())).unwrap_err();
        assert!(matches!(err, AdapterFehler::BereitsRegistriert(_)));
        assert_eq!(reg.namen(), vec!["test".to_string()]);
    }

    #[tokio::test]
    async fn senden_erfordert_gestarteten_adapter() {
        let reg = AdapterRegistry::neu();
        reg.registrieren(Arc::new(TestAdapter::default())).unwrap();

        let err = reg.senden("test", "ziel", "hallo").await.unwrap_err();
        assert!(matches!(err, AdapterFehler::NichtGestartet(_)));

        let err = reg.senden("fehlt", "ziel", "hallo").await.unwrap_err();
        assert!(matches!(err, AdapterFehler::NichtGefunden(_)));
    }

    #[tokio::test]
    async fn eingang_landet_auf_dem_bus() {
        let hub = test_hub();
        let reg = AdapterRegistry::neu();
        let adapter = Arc::new(TestAdapter::default());
        reg.registrieren(adapter.clone()).unwrap();

        let mut abo = hub.event_bus().abonnieren("test", Vec::<String>::new());
        assert_eq!(reg.alle_starten(&hub).await, 1);

        let ctx = adapter.kontext.lock().clone().unwrap();
        ctx.eingang("custom", json!({"text": "hallo"}));

        let event = abo.try_empfangen().unwrap();
        assert_eq!(event.kanal, "test");
        assert_eq!(event.daten["text"], "hallo");

        reg.alle_stoppen().await;
        assert!(!adapter.laeuft());
        assert!(ctx.abbruch().is_cancelled());
    }

    #[tokio::test]
    async fn channel_send_routet_zum_adapter() {
        let hub = test_hub();
        let reg = AdapterRegistry::neu();
        let adapter = Arc::new(TestAdapter::default());
        reg.registrieren(adapter.clone()).unwrap();
        reg.an_hub_anbinden(&hub).unwrap();
        reg.alle_starten(&hub).await;

        let handler = hub.methoden().holen(CHANNEL_SEND_METHODE).unwrap();
        let antwort = handler
            .aufrufen(
                kontext(&hub),
                Some(json!({"channel": "test", "target": "chat-1", "content": "hi"})),
            )
            .await
            .unwrap();

        assert_eq!(antwort["sent"], true);
        assert_eq!(
            adapter.gesendet.lock().as_slice(),
            &[("chat-1".to_string(), "hi".to_string())]
        );
    }

    #[tokio::test]
    async fn channel_send_mit_ungueltigen_params() {
        let hub = test_hub();
        let reg = AdapterRegistry::neu();
        reg.an_hub_anbinden(&hub).unwrap();

        let handler = hub.methoden().holen(CHANNEL_SEND_METHODE).unwrap();
        let err = handler
            .aufrufen(kontext(&hub), Some(json!({"channel": "test"})))
            .await
            .unwrap_err();
        assert!(matches!(err, HandlerFehler::UngueltigeParameter(_)));

        let err = handler
            .aufrufen(
                kontext(&hub),
                Some(json!({"channel": "fehlt", "target": "x", "content": "y"})),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, HandlerFehler::NichtGefunden(_)));
    }
}
