//! Raw codec - pass-through for payloads nobody decodes.
//!
//! The registry's default fallback. The payload `Bytes` is handed on
//! as-is, so no copy is made.

use bytes::Bytes;

use super::{PacketBody, PacketCodec};
use crate::error::Result;
use crate::protocol::IncomingPacket;

/// Codec that leaves the payload untouched.
#[derive(Debug, Default, Clone, Copy)]
pub struct RawCodec;

impl RawCodec {
    /// Payload bytes for an outgoing packet (copies into `Bytes`).
    #[inline]
    pub fn serialize(data: &[u8]) -> Bytes {
        Bytes::copy_from_slice(data)
    }
}

impl PacketCodec for RawCodec {
    #[inline]
    fn decode(&self, packet: &IncomingPacket) -> Result<PacketBody> {
        Ok(PacketBody::Raw(packet.payload.clone()))
    }
}
