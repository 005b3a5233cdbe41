//! Fehlertypen der Protokollschicht
//!
//! Alle Fehler hier sind Framing-Fehler: eine Verbindung, die einen davon
//! ausloest, wird geschlossen.

use std::io;
use thiserror::Error;

/// Result-Alias fuer Codec-Operationen
pub type CodecResult<T> = std::result::Result<T, CodecFehler>;

/// Fehler beim Kodieren oder Dekodieren von Nachrichten und Frames
#[derive(Debug, Error)]
pub enum CodecFehler {
    /// Payload ist kein wohlgeformtes JSON-Objekt
    #[error("malformed envelope: {0}")]
    MalformedEnvelope(String),

    /// `kind` fehlt oder ist keiner der drei bekannten Werte
    #[error("invalid kind: '{0}'")]
    InvalidKind(String),

    /// Anfrage ohne (oder mit leerer) Korrelations-ID
    #[error("missing correlation id")]
    MissingCorrelationId,

    /// Frame ueberschreitet die konfigurierte Maximalgroesse
    #[error("frame too large: {groesse} bytes (max {maximum})")]
    FrameTooLarge { groesse: usize, maximum: usize },

    /// Vom Aufrufer gelieferter Body ist nicht serialisierbar
    #[error("unserializable body: {0}")]
    UnserializableBody(#[source] serde_json::Error),

    /// Unbekannter Frame-Typ auf Transportebene
    #[error("unknown frame type: 0x{0:02x}")]
    UnbekannterFrameTyp(u8),

    #[error("I/O-Fehler: {0}")]
    Io(#[from] io::Error),
}

impl CodecFehler {
    /// Kurzer, stabiler Name fuer Logs und Metrik-Labels
    pub fn art(&self) -> &'static str {
        match self {
            Self::MalformedEnvelope(_) => "malformed_envelope",
            Self::InvalidKind(_) => "invalid_kind",
            Self::MissingCorrelationId => "missing_correlation_id",
            Self::FrameTooLarge { .. } => "frame_too_large",
            Self::UnserializableBody(_) => "unserializable_body",
            Self::UnbekannterFrameTyp(_) => "unknown_frame_type",
            Self::Io(_) => "io",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_too_large_anzeige() {
        let e = CodecFehler::FrameTooLarge {
            groesse: 9000,
            maximum: 8192,
        };
        assert_eq!(e.to_string(), "frame too large: 9000 bytes (max 8192)");
        assert_eq!(e.art(), "frame_too_large");
    }

    #[test]
    fn io_fehler_konvertierung() {
        let e: CodecFehler = io::Error::new(io::ErrorKind::BrokenPipe, "weg").into();
        assert!(matches!(e, CodecFehler::Io(_)));
    }
}
