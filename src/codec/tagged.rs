//! Tars-backed packet codecs.

use std::marker::PhantomData;
use std::sync::Arc;

use super::{PacketBody, PacketCodec};
use crate::error::Result;
use crate::protocol::IncomingPacket;
use crate::tars::{self, TarsStruct};

/// Decodes the payload as a typed record `T`.
pub struct TarsCodec<T> {
    _phantom: PhantomData<fn() -> T>,
}

impl<T> TarsCodec<T> {
    pub fn new() -> Self {
        Self {
            _phantom: PhantomData,
        }
    }
}

impl<T> Default for TarsCodec<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> PacketCodec for TarsCodec<T>
where
    T: TarsStruct + Send + Sync + 'static,
{
    fn decode(&self, packet: &IncomingPacket) -> Result<PacketBody> {
        let value: T = tars::from_bytes(&packet.payload)?;
        Ok(PacketBody::Decoded(Arc::new(value)))
    }
}

/// Decodes the payload into schema-less fields.
#[derive(Debug, Default, Clone, Copy)]
pub struct TaggedCodec;

impl PacketCodec for TaggedCodec {
    fn decode(&self, packet: &IncomingPacket) -> Result<PacketBody> {
        Ok(PacketBody::Fields(tars::decode_fields(&packet.payload)?))
    }
}
