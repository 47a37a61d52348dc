//! Protocol module - wire format, framing, and packet types.
//!
//! This module implements the binary packet layer:
//! - Length-prefixed outer frames with a plain routing header
//! - SSO head and payload inside the (optionally encrypted) body
//! - Frame buffer for accumulating partial reads
//! - Pluggable [`WireLayout`] with the default [`SsoLayout`]
//! - Sequence id allocation

pub mod compress;
mod frame;
mod frame_buffer;
mod layout;
mod sequence;
pub mod wire_format;

pub use frame::{CommandId, EncodedFrame, Frame, IncomingPacket, OutgoingPacket};
pub use frame_buffer::FrameBuffer;
pub use layout::{SsoLayout, WireLayout};
pub use sequence::{SequenceAllocator, DEFAULT_SEQUENCE_LIMIT};
pub use wire_format::{
    Compression, EncryptionMode, FrameHeader, PacketKind, SsoHead, DEFAULT_MAX_FRAME_SIZE,
    LENGTH_PREFIX_SIZE, MIN_FRAME_SIZE, SESSION_EXPIRED_CODE,
};
