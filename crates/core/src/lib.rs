//! gateway-core – Gemeinsame Typen und Fehlertypen
//!
//! Dieses Crate stellt die Bausteine bereit, die von allen anderen
//! Gateway-Crates gemeinsam genutzt werden: typisierte IDs und der
//! zentrale Fehler-Enum.

pub mod error;
pub mod types;

// Re-Exporte fuer bequemen Zugriff
pub use error::{GatewayError, Result};
pub use types::{ConnectionId, GatewayId, SessionId};
