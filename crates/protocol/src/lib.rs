//! gateway-protocol – Wire-Protokoll des Gateways
//!
//! Dieses Crate definiert den Nachrichten-Umschlag (`ProtocolMessage`),
//! den `ProtocolCodec` fuer dessen Validierung, das Frame-Format fuer
//! Byte-Streams (`FrameCodec`) sowie die Handshake- und Event-Typen.

pub mod codec;
pub mod error;
pub mod events;
pub mod handshake;
pub mod message;
pub mod wire;

pub use codec::{ProtocolCodec, DEFAULT_MAX_NACHRICHT};
pub use error::{CodecFehler, CodecResult};
pub use handshake::{
    ClientType, ConnectParams, HandshakeAblehnung, HelloPayload, StateSnapshot, CONNECT_METHODE,
    PROTOKOLL_VERSION,
};
pub use message::{ErrorCode, MessageKind, ProtocolMessage};
pub use wire::{Frame, FrameCodec};
