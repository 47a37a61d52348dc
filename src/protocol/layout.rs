//! Pluggable frame layouts.
//!
//! The exact byte layout of a frame differs between protocol revisions. A
//! [`WireLayout`] owns that knowledge; the rest of the engine only sees
//! [`OutgoingPacket`], [`Frame`] and [`IncomingPacket`]. [`SsoLayout`] is
//! the default revision described in [`wire_format`](super::wire_format).

use std::fmt;

use bytes::{Bytes, BytesMut};

use super::compress;
use super::frame::{CommandId, EncodedFrame, Frame, IncomingPacket, OutgoingPacket};
use super::wire_format::{put_lv, Compression, EncryptionMode, FrameHeader, SsoHead};
use crate::crypto::{tea, Key};
use crate::error::{Result, WireError};

/// Encoding and decoding of one protocol revision's frames.
///
/// Implementations must be symmetric: anything `encode` produces, `split`
/// followed by `open` with the same key must turn back into an equivalent
/// [`IncomingPacket`].
pub trait WireLayout: Send + Sync + fmt::Debug {
    /// Short name for logs.
    fn name(&self) -> &'static str;

    /// Frame and seal `packet`. `key` must be present unless the packet's
    /// encryption mode is [`EncryptionMode::None`].
    fn encode(&self, packet: &OutgoingPacket, key: Option<&Key>) -> Result<EncodedFrame>;

    /// Parse the plain header of one complete frame.
    ///
    /// Errors here are [`WireError::Desync`]; the stream is unusable after.
    fn split(&self, frame: Bytes) -> Result<Frame>;

    /// Decrypt and decode a frame body. Errors affect this frame only.
    fn open(&self, frame: Frame, key: Option<&Key>) -> Result<IncomingPacket>;
}

fn require_key(mode: EncryptionMode, key: Option<&Key>) -> Result<Option<&Key>> {
    match (mode, key) {
        (EncryptionMode::None, _) => Ok(None),
        (_, Some(k)) => Ok(Some(k)),
        (mode, None) => Err(WireError::Protocol(format!("no key available for {:?}", mode))),
    }
}

/// The default SSO frame layout.
#[derive(Debug, Default, Clone, Copy)]
pub struct SsoLayout;

impl WireLayout for SsoLayout {
    fn name(&self) -> &'static str {
        "sso"
    }

    fn encode(&self, packet: &OutgoingPacket, key: Option<&Key>) -> Result<EncodedFrame> {
        let key = require_key(packet.encryption, key)?;

        let payload = match packet.compression {
            Compression::None => packet.payload.clone(),
            Compression::Zlib => Bytes::from(compress::deflate(&packet.payload)?),
            Compression::Prefixed => {
                let mut wrapped = BytesMut::with_capacity(packet.payload.len() + 4);
                put_lv(&mut wrapped, &packet.payload);
                wrapped.freeze()
            }
        };
        let head = SsoHead {
            return_code: packet.return_code,
            extra: Bytes::new(),
            command: packet.command.to_string(),
            session_id: packet.session_id.clone(),
            compression: packet.compression,
        };
        let plain = head.encode_with_payload(&payload);
        let body = match key {
            Some(k) => Bytes::from(tea::encrypt(k, &plain)),
            None => plain.freeze(),
        };

        let mut header = FrameHeader {
            total_length: 0,
            kind: packet.encryption.packet_kind(),
            encryption: packet.encryption,
            sequence_id: packet.sequence_id,
            extra: packet.extra.clone(),
            sender: packet.sender.clone(),
        };
        let total = header.encoded_len() + body.len();
        header.total_length = u32::try_from(total)
            .map_err(|_| WireError::Protocol(format!("frame of {} bytes too large", total)))?;

        let mut head_buf = BytesMut::with_capacity(header.encoded_len());
        header.encode_into(&mut head_buf);
        Ok(EncodedFrame {
            head: head_buf.freeze(),
            body,
        })
    }

    fn split(&self, frame: Bytes) -> Result<Frame> {
        let (header, consumed) = FrameHeader::decode(&frame)?;
        Ok(Frame {
            header,
            body: frame.slice(consumed..),
        })
    }

    fn open(&self, frame: Frame, key: Option<&Key>) -> Result<IncomingPacket> {
        let key = require_key(frame.header.encryption, key)?;
        let plain = match key {
            Some(k) => Bytes::from(tea::decrypt(k, &frame.body)?),
            None => frame.body,
        };

        let (head, payload) = SsoHead::decode_with_payload(plain)?;
        let payload = match head.compression {
            Compression::None => payload,
            Compression::Zlib => Bytes::from(compress::inflate(&payload)?),
            Compression::Prefixed => {
                let mut p = payload;
                super::wire_format::get_lv(&mut p)
                    .ok_or_else(|| WireError::Protocol("prefixed payload overruns body".into()))?
            }
        };

        Ok(IncomingPacket {
            command: CommandId::parse(&head.command),
            sequence_id: frame.header.sequence_id,
            encryption: frame.header.encryption,
            return_code: head.return_code,
            sender: frame.header.sender,
            extra: frame.header.extra,
            session_id: head.session_id,
            payload,
        })
    }
}
