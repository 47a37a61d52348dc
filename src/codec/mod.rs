//! Codec module - turning packet payloads into typed values.
//!
//! Every inbound packet is decoded by the codec registered for its command
//! id in a [`CodecRegistry`]. Commands nobody registered fall back to
//! [`RawCodec`] and keep their bytes, so adding a command never requires
//! touching the engine.
//!
//! - [`RawCodec`] - Pass-through for raw bytes (zero-copy)
//! - [`TaggedCodec`] - Schema-less Tars fields
//! - [`TarsCodec`] - Typed Tars record via [`TarsStruct`]
//! - [`MsgPackCodec`] - MessagePack helper for local secrets blobs
//!
//! # Example
//!
//! ```ignore
//! let mut registry = CodecRegistry::new();
//! registry.register_tars::<SvcRespRegister>("StatSvc.register");
//!
//! let packet = registry.decode(&incoming)?;
//! let resp: &SvcRespRegister = packet.decoded().unwrap();
//! ```

mod msgpack;
mod raw;
mod tagged;

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use bytes::Bytes;

use crate::error::{Result, WireError};
use crate::protocol::{CommandId, IncomingPacket};
use crate::tars::{TarsFields, TarsStruct};

pub use msgpack::MsgPackCodec;
pub use raw::RawCodec;
pub use tagged::{TaggedCodec, TarsCodec};

/// Decodes the payload of one command.
pub trait PacketCodec: Send + Sync + 'static {
    fn decode(&self, packet: &IncomingPacket) -> Result<PacketBody>;
}

/// Decoded payload.
#[derive(Clone)]
pub enum PacketBody {
    /// Undecoded bytes.
    Raw(Bytes),
    /// Schema-less Tars fields.
    Fields(TarsFields),
    /// A typed value; recover it with [`Packet::decoded`].
    Decoded(Arc<dyn Any + Send + Sync>),
}

impl fmt::Debug for PacketBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PacketBody::Raw(b) => f.debug_tuple("Raw").field(&b.len()).finish(),
            PacketBody::Fields(fields) => f.debug_tuple("Fields").field(fields).finish(),
            PacketBody::Decoded(_) => f.write_str("Decoded(..)"),
        }
    }
}

/// A decoded inbound packet, as handed to callers and the notice pipeline.
#[derive(Debug, Clone)]
pub struct Packet {
    pub command: CommandId,
    pub sequence_id: u32,
    pub return_code: i32,
    pub body: PacketBody,
}

impl Packet {
    /// The typed value, if the codec produced a `T`.
    pub fn decoded<T: Any + Send + Sync>(&self) -> Option<&T> {
        match &self.body {
            PacketBody::Decoded(v) => v.downcast_ref(),
            _ => None,
        }
    }

    pub fn raw(&self) -> Option<&Bytes> {
        match &self.body {
            PacketBody::Raw(b) => Some(b),
            _ => None,
        }
    }

    pub fn fields(&self) -> Option<&TarsFields> {
        match &self.body {
            PacketBody::Fields(f) => Some(f),
            _ => None,
        }
    }
}

/// Command id to codec table.
///
/// Built once per bot and shared read-only afterwards.
pub struct CodecRegistry {
    codecs: HashMap<CommandId, Arc<dyn PacketCodec>>,
    fallback: Arc<dyn PacketCodec>,
}

impl CodecRegistry {
    pub fn new() -> Self {
        Self {
            codecs: HashMap::new(),
            fallback: Arc::new(RawCodec),
        }
    }

    /// Register `codec` for `command`, replacing any earlier one.
    pub fn register<C: PacketCodec>(&mut self, command: impl Into<CommandId>, codec: C) -> &mut Self {
        let command = command.into();
        if self.codecs.insert(command.clone(), Arc::new(codec)).is_some() {
            tracing::debug!(%command, "codec replaced");
        }
        self
    }

    /// Register a typed Tars record for `command`.
    pub fn register_tars<T>(&mut self, command: impl Into<CommandId>) -> &mut Self
    where
        T: TarsStruct + Send + Sync + 'static,
    {
        self.register(command, TarsCodec::<T>::new())
    }

    /// Codec for commands with no registration.
    pub fn set_fallback<C: PacketCodec>(&mut self, codec: C) -> &mut Self {
        self.fallback = Arc::new(codec);
        self
    }

    pub fn contains(&self, command: &CommandId) -> bool {
        self.codecs.contains_key(command)
    }

    pub fn len(&self) -> usize {
        self.codecs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.codecs.is_empty()
    }

    /// Decode with the registered codec, or the fallback.
    pub fn decode(&self, incoming: &IncomingPacket) -> Result<Packet> {
        let codec = self.codecs.get(&incoming.command).unwrap_or(&self.fallback);
        Self::finish(incoming, codec.decode(incoming)?)
    }

    /// Decode, failing with [`WireError::UnknownCommand`] when nothing is
    /// registered for the command.
    pub fn decode_strict(&self, incoming: &IncomingPacket) -> Result<Packet> {
        let codec = self
            .codecs
            .get(&incoming.command)
            .ok_or_else(|| WireError::UnknownCommand(incoming.command.to_string()))?;
        Self::finish(incoming, codec.decode(incoming)?)
    }

    fn finish(incoming: &IncomingPacket, body: PacketBody) -> Result<Packet> {
        Ok(Packet {
            command: incoming.command.clone(),
            sequence_id: incoming.sequence_id,
            return_code: incoming.return_code,
            body,
        })
    }
}

impl Default for CodecRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for CodecRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CodecRegistry")
            .field("commands", &self.codecs.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::protocol::EncryptionMode;
    use crate::tars::{self, FieldKind, FieldSpec, Fields, TarsWriter};
    use crate::error::TarsError;

    pub(crate) fn incoming(command: &str, payload: Bytes) -> IncomingPacket {
        IncomingPacket {
            command: CommandId::from(command),
            sequence_id: 3,
            encryption: EncryptionMode::None,
            return_code: 0,
            sender: String::new(),
            extra: Bytes::new(),
            session_id: Bytes::new(),
            payload,
        }
    }

    #[derive(Debug, PartialEq)]
    struct Notice {
        from: i64,
        text: String,
    }

    impl TarsStruct for Notice {
        const FIELDS: &'static [FieldSpec] = &[
            FieldSpec::required(0, "from", FieldKind::Integer),
            FieldSpec::optional(1, "text", FieldKind::String),
        ];

        fn write_fields(&self, w: &mut TarsWriter) {
            w.write_i64(0, self.from);
            w.write_string(1, &self.text);
        }

        fn from_fields(f: Fields) -> std::result::Result<Self, TarsError> {
            Ok(Self {
                from: f.i64(0)?,
                text: f.string(1)?,
            })
        }
    }

    #[test]
    fn test_unregistered_falls_back_to_raw() {
        let registry = CodecRegistry::new();
        let packet = registry
            .decode(&incoming("OnlinePush.Unknown", Bytes::from_static(b"\x01\x02")))
            .unwrap();
        assert_eq!(packet.raw().unwrap().as_ref(), b"\x01\x02");
        assert_eq!(packet.sequence_id, 3);
    }

    #[test]
    fn test_typed_codec() {
        let mut registry = CodecRegistry::new();
        registry.register_tars::<Notice>("OnlinePush.Notice");
        let payload = tars::to_bytes(&Notice {
            from: 10001,
            text: "hi".into(),
        });

        let packet = registry.decode(&incoming("OnlinePush.Notice", payload)).unwrap();
        let notice: &Notice = packet.decoded().unwrap();
        assert_eq!(notice.from, 10001);
        assert!(packet.decoded::<String>().is_none());
        assert!(packet.raw().is_none());
    }

    #[test]
    fn test_decode_error_propagates() {
        let mut registry = CodecRegistry::new();
        registry.register_tars::<Notice>("OnlinePush.Notice");
        let result = registry.decode(&incoming("OnlinePush.Notice", Bytes::from_static(&[0x16, 9])));
        assert!(matches!(result, Err(WireError::Tars(_))));
    }

    #[test]
    fn test_strict_rejects_unknown() {
        let registry = CodecRegistry::new();
        let result = registry.decode_strict(&incoming("x.y", Bytes::new()));
        assert!(matches!(result, Err(WireError::UnknownCommand(c)) if c == "x.y"));
    }

    #[test]
    fn test_fallback_override() {
        let mut registry = CodecRegistry::new();
        registry.set_fallback(TaggedCodec);
        let payload = tars::to_bytes(&Notice {
            from: 1,
            text: String::new(),
        });
        let packet = registry.decode(&incoming("any.thing", payload)).unwrap();
        assert_eq!(packet.fields().unwrap().len(), 2);
        assert!(registry.is_empty());
    }
}
