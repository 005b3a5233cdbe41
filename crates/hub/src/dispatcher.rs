//! Methoden-Dispatcher
//!
//! Externe Module registrieren Handler unter einem Methodennamen. Der Hub
//! ruft sie fuer Anfragen aktiver Clients auf, immer ausserhalb jeder
//! Registry-Sperre.

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use gateway_core::{ConnectionId, SessionId};
use gateway_protocol::{ClientType, CONNECT_METHODE};
use serde_json::{json, Value};
use std::future::Future;
use std::sync::{Arc, Weak};
use thiserror::Error;

use crate::error::{HubFehler, HubResult};
use crate::event_bus::EventBus;
use crate::hub::ConnectionHub;

// ---------------------------------------------------------------------------
// Fehler
// ---------------------------------------------------------------------------

/// Fehler eines Methoden-Handlers
///
/// Die Anzeige wird unveraendert als `error` der Antwort uebertragen.
#[derive(Debug, Error)]
pub enum HandlerFehler {
    #[error("{0}")]
    Fehlgeschlagen(String),

    #[error("invalid params: {0}")]
    UngueltigeParameter(String),

    #[error("not found: {0}")]
    NichtGefunden(String),

    #[error("unavailable: {0}")]
    NichtVerfuegbar(String),
}

impl HandlerFehler {
    pub fn fehlgeschlagen(msg: impl Into<String>) -> Self {
        Self::Fehlgeschlagen(msg.into())
    }
}

impl From<serde_json::Error> for HandlerFehler {
    fn from(e: serde_json::Error) -> Self {
        Self::UngueltigeParameter(e.to_string())
    }
}

// ---------------------------------------------------------------------------
// Kontext und Trait
// ---------------------------------------------------------------------------

/// Kontext eines Handler-Aufrufs
#[derive(Clone)]
pub struct HandlerKontext {
    pub client_id: ConnectionId,
    pub session_id: SessionId,
    pub device_id: String,
    pub client_type: Option<ClientType>,
    pub event_bus: EventBus,
}

/// Handler fuer eine Methode
#[async_trait]
pub trait MethodHandler: Send + Sync {
    async fn aufrufen(&self, ctx: HandlerKontext, params: Option<Value>) -> Result<Value, HandlerFehler>;
}

/// Adapter fuer Closures als Handler
///
/// ```ignore
/// hub.methode_registrieren_fn("echo", |_ctx, params| async move {
///     Ok(params.unwrap_or(Value::Null))
/// })?;
/// ```
pub struct FnHandler<F> {
    f: F,
}

impl<F> FnHandler<F> {
    pub fn neu<Fut>(f: F) -> Self
    where
        F: Fn(HandlerKontext, Option<Value>) -> Fut + Send + Sync,
        Fut: Future<Output = Result<Value, HandlerFehler>> + Send,
    {
        Self { f }
    }
}

#[async_trait]
impl<F, Fut> MethodHandler for FnHandler<F>
where
    F: Fn(HandlerKontext, Option<Value>) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value, HandlerFehler>> + Send,
{
    async fn aufrufen(&self, ctx: HandlerKontext, params: Option<Value>) -> Result<Value, HandlerFehler> {
        (self.f)(ctx, params).await
    }
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// Zuordnung Methodenname -> Handler
#[derive(Default)]
pub struct MethodRegistry {
    handler: DashMap<String, Arc<dyn MethodHandler>>,
}

impl MethodRegistry {
    pub fn neu() -> Self {
        Self::default()
    }

    /// Registry mit den eingebauten Methoden `ping` und `state`
    pub(crate) fn mit_eingebauten(hub: Weak<ConnectionHub>) -> Self {
        let reg = Self::neu();
        reg.handler.insert("ping".to_string(), Arc::new(PingHandler));
        reg.handler.insert("state".to_string(), Arc::new(StateHandler { hub }));
        reg
    }

    /// Registriert einen Handler; ein vorhandener wird ersetzt
    pub fn registrieren(&self, name: &str, handler: Arc<dyn MethodHandler>) -> HubResult<()> {
        if name == CONNECT_METHODE {
            return Err(HubFehler::ReservierteMethode(name.to_string()));
        }
        if self.handler.insert(name.to_string(), handler).is_some() {
            tracing::debug!(methode = name, "Handler ersetzt");
        }
        Ok(())
    }

    /// Handler zum Aufruf ausserhalb der Map-Sperre
    pub fn holen(&self, name: &str) -> Option<Arc<dyn MethodHandler>> {
        self.handler.get(name).map(|h| Arc::clone(h.value()))
    }

    pub fn entfernen(&self, name: &str) -> bool {
        self.handler.remove(name).is_some()
    }

    /// Registrierte Methodennamen, sortiert
    pub fn methoden(&self) -> Vec<String> {
        let mut namen: Vec<String> = self.handler.iter().map(|e| e.key().clone()).collect();
        namen.sort();
        namen
    }
}

// ---------------------------------------------------------------------------
// Eingebaute Methoden
// ---------------------------------------------------------------------------

/// `ping` – Antwort mit Serverzeit in Millisekunden
pub(crate) struct PingHandler;

#[async_trait]
impl MethodHandler for PingHandler {
    async fn aufrufen(&self, _ctx: HandlerKontext, _params: Option<Value>) -> Result<Value, HandlerFehler> {
        Ok(json!({ "pong": true, "time": Utc::now().timestamp_millis() }))
    }
}

/// `state` – aktueller Snapshot fuer die Sitzung des Aufrufers
pub(crate) struct StateHandler {
    hub: Weak<ConnectionHub>,
}

#[async_trait]
impl MethodHandler for StateHandler {
    async fn aufrufen(&self, ctx: HandlerKontext, _params: Option<Value>) -> Result<Value, HandlerFehler> {
        let hub = self
            .hub
            .upgrade()
            .ok_or_else(|| HandlerFehler::NichtVerfuegbar("hub stopped".into()))?;
        let snapshot = hub.zustand_snapshot(Some(ctx.session_id));
        Ok(serde_json::to_value(&*snapshot)?)
    }
}
