//! ProtocolCodec – Dekodieren und Kodieren des Nachrichten-Umschlags
//!
//! Prueft ausschliesslich strukturelle Invarianten (Groesse, JSON-Objekt,
//! `kind`, Korrelations-ID bei Anfragen). Methodennamen, Eventnamen und
//! Bodies werden nicht interpretiert; das ist Aufgabe des Dispatchers.

use bytes::Bytes;
use serde::Serialize;
use serde_json::Value;

use crate::error::{CodecFehler, CodecResult};
use crate::message::{MessageKind, ProtocolMessage};

/// Maximale Groesse einer eingehenden Nachricht (8 KiB)
pub const DEFAULT_MAX_NACHRICHT: usize = 8 * 1024;

/// Zustandsloser Codec fuer `ProtocolMessage`
#[derive(Debug, Clone, Copy)]
pub struct ProtocolCodec {
    max_groesse: usize,
}

impl ProtocolCodec {
    /// Codec mit Standard-Limit (8 KiB)
    pub fn new() -> Self {
        Self {
            max_groesse: DEFAULT_MAX_NACHRICHT,
        }
    }

    /// Codec mit eigenem Limit fuer eingehende Nachrichten
    pub fn with_max_size(max_groesse: usize) -> Self {
        Self { max_groesse }
    }

    pub fn max_groesse(&self) -> usize {
        self.max_groesse
    }

    /// Dekodiert einen Frame-Payload zu einer `ProtocolMessage`
    ///
    /// Pruefreihenfolge: Groesse, JSON-Struktur, `kind`, Korrelations-ID.
    pub fn decode(&self, bytes: &[u8]) -> CodecResult<ProtocolMessage> {
        if bytes.len() > self.max_groesse {
            return Err(CodecFehler::FrameTooLarge {
                groesse: bytes.len(),
                maximum: self.max_groesse,
            });
        }

        let wert: Value = serde_json::from_slice(bytes)
            .map_err(|e| CodecFehler::MalformedEnvelope(e.to_string()))?;

        let objekt = wert
            .as_object()
            .ok_or_else(|| CodecFehler::MalformedEnvelope("envelope is not an object".into()))?;

        match objekt.get("kind") {
            Some(Value::String(k)) if MessageKind::parsen(k).is_some() => {}
            Some(Value::String(k)) => return Err(CodecFehler::InvalidKind(k.clone())),
            Some(andere) => return Err(CodecFehler::InvalidKind(andere.to_string())),
            None => return Err(CodecFehler::InvalidKind(String::new())),
        }

        let msg: ProtocolMessage = serde_json::from_value(wert)
            .map_err(|e| CodecFehler::MalformedEnvelope(e.to_string()))?;

        if msg.kind == MessageKind::Request && msg.korrelations_id().is_empty() {
            return Err(CodecFehler::MissingCorrelationId);
        }

        Ok(msg)
    }

    /// Kodiert eine Nachricht zu JSON-Bytes
    ///
    /// Schlaegt nur fehl, wenn ein vom Aufrufer gelieferter Body nicht
    /// serialisierbar ist.
    pub fn encode(&self, msg: &ProtocolMessage) -> CodecResult<Bytes> {
        serde_json::to_vec(msg)
            .map(Bytes::from)
            .map_err(CodecFehler::UnserializableBody)
    }

    /// Erstellt eine Erfolgsantwort aus einem beliebigen serialisierbaren Body
    pub fn response_mit_body<T: Serialize>(
        &self,
        id: impl Into<String>,
        body: &T,
    ) -> CodecResult<ProtocolMessage> {
        let payload = serde_json::to_value(body).map_err(CodecFehler::UnserializableBody)?;
        Ok(ProtocolMessage::response_ok(id, payload))
    }
}

impl Default for ProtocolCodec {
    fn default() -> Self {
        Self::new()
    }
}
