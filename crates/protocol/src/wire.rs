//! Wire-Format fuer Byte-Stream-Transporte
//!
//! Frame-basiertes Protokoll: Laenge(u32 big-endian) + Frame-Typ(u8) + Payload.
//!
//! ## Frame-Format
//!
//! ```text
//! +--------+--------+--------+--------+--------+----...----+
//! | Laenge (u32 BE)                   | Typ    | Payload    |
//! +--------+--------+--------+--------+--------+----...----+
//! ```
//!
//! Die Laenge zaehlt nur die Payload-Bytes. Typen:
//!
//! | Typ    | Bedeutung                                 |
//! |--------|-------------------------------------------|
//! | `0x01` | Daten (eine kodierte `ProtocolMessage`)   |
//! | `0x02` | Ping (Keepalive auf Transportebene)       |
//! | `0x03` | Pong (Antwort auf Ping, Payload gespiegelt)|
//! | `0x04` | Close                                      |
//!
//! Die maximale Payload-Groesse gilt fuer eingehende Frames (Standard 8 KiB)
//! und wird geprueft, bevor der Payload gepuffert wird.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::codec::DEFAULT_MAX_NACHRICHT;
use crate::error::CodecFehler;

// ---------------------------------------------------------------------------
// Konstanten
// ---------------------------------------------------------------------------

/// Groesse des Headers (Laenge + Typ) in Bytes
pub const HEADER_SIZE: usize = 5;

const TYP_DATEN: u8 = 0x01;
const TYP_PING: u8 = 0x02;
const TYP_PONG: u8 = 0x03;
const TYP_CLOSE: u8 = 0x04;

// ---------------------------------------------------------------------------
// Frame
// ---------------------------------------------------------------------------

/// Ein Frame auf Transportebene
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// Kodierte Protokoll-Nachricht
    Daten(Bytes),
    /// Keepalive-Probe
    Ping(Bytes),
    /// Bestaetigung einer Probe
    Pong(Bytes),
    /// Gegenstelle beendet die Verbindung
    Close,
}

impl Frame {
    fn typ(&self) -> u8 {
        match self {
            Self::Daten(_) => TYP_DATEN,
            Self::Ping(_) => TYP_PING,
            Self::Pong(_) => TYP_PONG,
            Self::Close => TYP_CLOSE,
        }
    }

    fn payload(&self) -> &[u8] {
        match self {
            Self::Daten(b) | Self::Ping(b) | Self::Pong(b) => b,
            Self::Close => &[],
        }
    }
}

// ---------------------------------------------------------------------------
// FrameCodec
// ---------------------------------------------------------------------------

/// tokio-util Codec fuer das Frame-Format
///
/// # Beispiel
///
/// ```rust,no_run
/// use tokio_util::codec::Framed;
/// use gateway_protocol::wire::FrameCodec;
///
/// // let stream = TcpStream::connect(...).await?;
/// // let framed = Framed::new(stream, FrameCodec::new());
/// ```
#[derive(Debug, Clone)]
pub struct FrameCodec {
    max_frame_size: usize,
}

impl FrameCodec {
    /// Erstellt einen neuen `FrameCodec` mit Standard-Limit (8 KiB)
    pub fn new() -> Self {
        Self {
            max_frame_size: DEFAULT_MAX_NACHRICHT,
        }
    }

    /// Erstellt einen `FrameCodec` mit benutzerdefinierter maximaler Payload-Groesse
    pub fn with_max_size(max_frame_size: usize) -> Self {
        Self { max_frame_size }
    }

    pub fn max_frame_size(&self) -> usize {
        self.max_frame_size
    }
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for FrameCodec {
    type Item = Frame;
    type Error = CodecFehler;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.len() < HEADER_SIZE {
            return Ok(None);
        }

        let laenge = u32::from_be_bytes([src[0], src[1], src[2], src[3]]) as usize;
        let typ = src[4];

        if laenge > self.max_frame_size {
            return Err(CodecFehler::FrameTooLarge {
                groesse: laenge,
                maximum: self.max_frame_size,
            });
        }

        let gesamt = HEADER_SIZE + laenge;
        if src.len() < gesamt {
            src.reserve(gesamt - src.len());
            return Ok(None);
        }

        src.advance(HEADER_SIZE);
        let payload = src.split_to(laenge).freeze();

        let frame = match typ {
            TYP_DATEN => Frame::Daten(payload),
            TYP_PING => Frame::Ping(payload),
            TYP_PONG => Frame::Pong(payload),
            TYP_CLOSE => Frame::Close,
            unbekannt => return Err(CodecFehler::UnbekannterFrameTyp(unbekannt)),
        };

        Ok(Some(frame))
    }
}

impl Encoder<Frame> for FrameCodec {
    type Error = CodecFehler;

    fn encode(&mut self, item: Frame, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let payload = item.payload();
        dst.reserve(HEADER_SIZE + payload.len());
        dst.put_u32(payload.len() as u32);
        dst.put_u8(item.typ());
        dst.put_slice(payload);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
