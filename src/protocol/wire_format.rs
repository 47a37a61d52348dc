//! Wire format of the default SSO frame layout.
//!
//! ```text
//! Outer frame (plain):
//! ┌──────────┬──────────┬─────┬──────────┬──────────────┬────┬────────────┬──────────┐
//! │ total    │ kind     │ enc │ sequence │ extra LV     │ 00 │ sender LV  │ body     │
//! │ u32 BE   │ u32 BE   │ u8  │ u32 BE   │ (kind 0x0A)  │ u8 │ u32 + utf8 │ ...      │
//! └──────────┴──────────┴─────┴──────────┴──────────────┴────┴────────────┴──────────┘
//!
//! Body (after decryption):
//! ┌──────────────────────────────────────────────────────────────┬────────────┐
//! │ SSO head LV: i32 code │ extra LV │ command LV │ session LV │ u32 compress │ payload LV │
//! └──────────────────────────────────────────────────────────────┴────────────┘
//! ```
//!
//! Every LV length prefix is a big-endian `u32` that counts itself, as does
//! the outer `total` field.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{Result, WireError};

/// Size of the leading total-length field.
pub const LENGTH_PREFIX_SIZE: usize = 4;

/// Smallest possible frame: fixed fields plus an empty sender.
pub const MIN_FRAME_SIZE: usize = 4 + 4 + 1 + 4 + 1 + 4;

/// Default upper bound on a single frame.
pub const DEFAULT_MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// Server return code meaning the session key is no longer valid.
pub const SESSION_EXPIRED_CODE: i32 = -10008;

/// Outer packet kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum PacketKind {
    /// Handshake traffic; carries the extra-data field.
    Login = 0x0A,
    /// Everything else.
    Simple = 0x0B,
}

impl PacketKind {
    pub fn from_u32(v: u32) -> Option<Self> {
        match v {
            0x0A => Some(PacketKind::Login),
            0x0B => Some(PacketKind::Simple),
            _ => None,
        }
    }
}

/// Which key protects a frame body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum EncryptionMode {
    None = 0,
    /// Key issued by the server after login.
    SessionKey = 1,
    /// Key agreed through ECDH during the handshake.
    ShareKey = 2,
}

impl EncryptionMode {
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(EncryptionMode::None),
            1 => Some(EncryptionMode::SessionKey),
            2 => Some(EncryptionMode::ShareKey),
            _ => None,
        }
    }

    /// The packet kind frames in this mode are sent as.
    #[inline]
    pub fn packet_kind(self) -> PacketKind {
        match self {
            EncryptionMode::ShareKey => PacketKind::Login,
            _ => PacketKind::Simple,
        }
    }
}

/// Payload compression flag carried in the SSO head.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u32)]
pub enum Compression {
    #[default]
    None = 0,
    Zlib = 1,
    /// Uncompressed, wrapped in one more length prefix.
    Prefixed = 8,
}

impl Compression {
    pub fn from_u32(v: u32) -> Option<Self> {
        match v {
            0 => Some(Compression::None),
            1 => Some(Compression::Zlib),
            8 => Some(Compression::Prefixed),
            _ => None,
        }
    }
}

/// Write `data` with a self-inclusive `u32` length prefix.
#[inline]
pub fn put_lv(buf: &mut BytesMut, data: &[u8]) {
    buf.put_u32((data.len() + 4) as u32);
    buf.put_slice(data);
}

/// Size `data` occupies once written with [`put_lv`].
#[inline]
pub fn lv_len(data: &[u8]) -> usize {
    data.len() + 4
}

/// Read a self-inclusive LV field, advancing `buf`.
pub fn get_lv(buf: &mut Bytes) -> Option<Bytes> {
    if buf.remaining() < 4 {
        return None;
    }
    let len = (&buf[..4]).get_u32() as usize;
    if len < 4 || len > buf.remaining() {
        return None;
    }
    buf.advance(4);
    Some(buf.split_to(len - 4))
}

/// Read the total-length field without consuming anything.
#[inline]
pub fn peek_length(buf: &[u8]) -> Option<u32> {
    if buf.len() < LENGTH_PREFIX_SIZE {
        return None;
    }
    Some(u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]))
}

/// Plain outer header of a frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameHeader {
    /// Length of the whole frame, this field included.
    pub total_length: u32,
    pub kind: PacketKind,
    pub encryption: EncryptionMode,
    pub sequence_id: u32,
    /// Handshake-only extra data (the sender's ECDH public key).
    pub extra: Bytes,
    /// Sender identity (the account number as a decimal string).
    pub sender: String,
}

impl FrameHeader {
    /// Bytes the header occupies on the wire.
    pub fn encoded_len(&self) -> usize {
        let mut len = 4 + 4 + 1 + 4 + 1 + lv_len(self.sender.as_bytes());
        if self.kind == PacketKind::Login {
            len += lv_len(&self.extra);
        }
        len
    }

    /// Append the header to `buf`.
    pub fn encode_into(&self, buf: &mut BytesMut) {
        buf.put_u32(self.total_length);
        buf.put_u32(self.kind as u32);
        buf.put_u8(self.encryption as u8);
        buf.put_u32(self.sequence_id);
        if self.kind == PacketKind::Login {
            put_lv(buf, &self.extra);
        }
        buf.put_u8(0);
        put_lv(buf, self.sender.as_bytes());
    }

    /// Parse the header at the start of `frame`.
    ///
    /// Any inconsistency is a [`WireError::Desync`]: once the header cannot
    /// be trusted, neither can the position of the next frame.
    pub fn decode(frame: &Bytes) -> Result<(Self, usize)> {
        let desync = |what: &str| WireError::Desync(what.to_string());
        let mut buf = frame.clone();
        if buf.remaining() < MIN_FRAME_SIZE {
            return Err(desync("frame shorter than minimum header"));
        }

        let total_length = buf.get_u32();
        if total_length as usize != frame.len() {
            return Err(WireError::Desync(format!(
                "declared length {} but frame has {} bytes",
                total_length,
                frame.len()
            )));
        }
        let kind = PacketKind::from_u32(buf.get_u32()).ok_or_else(|| desync("unknown packet kind"))?;
        let encryption =
            EncryptionMode::from_u8(buf.get_u8()).ok_or_else(|| desync("unknown encryption mode"))?;
        let sequence_id = buf.get_u32();
        let extra = if kind == PacketKind::Login {
            get_lv(&mut buf).ok_or_else(|| desync("extra data overruns frame"))?
        } else {
            Bytes::new()
        };
        if buf.remaining() < 1 || buf.get_u8() != 0 {
            return Err(desync("missing header separator"));
        }
        let sender = get_lv(&mut buf).ok_or_else(|| desync("sender overruns frame"))?;
        let sender = String::from_utf8(sender.to_vec()).map_err(|_| desync("sender is not UTF-8"))?;

        let header = Self {
            total_length,
            kind,
            encryption,
            sequence_id,
            extra,
            sender,
        };
        let consumed = frame.len() - buf.remaining();
        Ok((header, consumed))
    }
}

/// Routing head inside the (decrypted) body.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SsoHead {
    pub return_code: i32,
    pub extra: Bytes,
    pub command: String,
    pub session_id: Bytes,
    pub compression: Compression,
}

impl SsoHead {
    fn encoded_len(&self) -> usize {
        4 + 4 + lv_len(&self.extra) + lv_len(self.command.as_bytes()) + lv_len(&self.session_id) + 4
    }

    /// Append the head (as one LV) followed by `payload` (as another LV).
    pub fn encode_with_payload(&self, payload: &[u8]) -> BytesMut {
        let mut buf = BytesMut::with_capacity(self.encoded_len() + lv_len(payload));
        buf.put_u32(self.encoded_len() as u32);
        buf.put_i32(self.return_code);
        put_lv(&mut buf, &self.extra);
        put_lv(&mut buf, self.command.as_bytes());
        put_lv(&mut buf, &self.session_id);
        buf.put_u32(self.compression as u32);
        put_lv(&mut buf, payload);
        buf
    }

    /// Parse a decrypted body into its head and (still compressed) payload.
    pub fn decode_with_payload(body: Bytes) -> Result<(Self, Bytes)> {
        let malformed = |what: &str| WireError::Protocol(format!("malformed SSO head: {}", what));
        let mut body = body;
        let mut head = get_lv(&mut body).ok_or_else(|| malformed("head overruns body"))?;

        if head.remaining() < 4 {
            return Err(malformed("missing return code"));
        }
        let return_code = head.get_i32();
        let extra = get_lv(&mut head).ok_or_else(|| malformed("extra"))?;
        let command = get_lv(&mut head).ok_or_else(|| malformed("command"))?;
        let command = String::from_utf8(command.to_vec()).map_err(|_| malformed("command is not UTF-8"))?;
        let session_id = get_lv(&mut head).ok_or_else(|| malformed("session id"))?;
        if head.remaining() < 4 {
            return Err(malformed("missing compression flag"));
        }
        let compression = Compression::from_u32(head.get_u32()).ok_or_else(|| malformed("compression flag"))?;

        let payload = get_lv(&mut body).ok_or_else(|| malformed("payload overruns body"))?;
        Ok((
            Self {
                return_code,
                extra,
                command,
                session_id,
                compression,
            },
            payload,
        ))
    }
}
