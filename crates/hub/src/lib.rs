//! gateway-hub – Connection-Hub, EventBus und Heartbeat
//!
//! ## Architektur
//! ```text
//! TcpListener / duplex ──> ConnectionHub::annehmen
//!                               │
//!            ┌──────────────────┼────────────────────┐
//!            v                  v                    v
//!       Connection         EventBus            HeartbeatManager
//!   (Lese-/Schreib-Loop)  (Pub/Sub, Seq)     (Probes, Leerlauf)
//!            │                  │
//!            v                  v
//!   Handshake / Dispatch   Event-Bruecke ──> aktive Clients
//! ```
//!
//! Jede Verbindung startet als `Verbindend` und muss als erste Nachricht
//! `connect` senden. Ausgehende Zustellung ist nicht-blockierend: volle
//! Queues verlieren Nachrichten, statt Sender aufzuhalten.

pub mod adapter;
pub mod auth;
pub mod broadcast;
pub mod client;
pub mod config;
mod connection;
pub mod dispatcher;
pub mod error;
pub mod event_bus;
pub mod heartbeat;
pub mod hub;
pub mod tcp;

pub use adapter::{AdapterFehler, AdapterKontext, AdapterRegistry, ChannelAdapter};
pub use auth::{AuthPolicy, OffenePolicy, StatischePolicy};
pub use broadcast::SendeBericht;
pub use client::{Client, SchliessGrund, Sitzung, VerbindungsZustand};
pub use config::{HeartbeatConfig, HubConfig};
pub use dispatcher::{FnHandler, HandlerFehler, HandlerKontext, MethodHandler, MethodRegistry};
pub use error::{HubFehler, HubResult};
pub use event_bus::{Event, EventBus, EventFilter, Subscription};
pub use heartbeat::{HeartbeatManager, HeartbeatStatistik};
pub use hub::ConnectionHub;
pub use tcp::GatewayServer;
