//! Frame and packet types.

use std::fmt;

use bytes::Bytes;

use super::wire_format::{Compression, EncryptionMode, FrameHeader, SESSION_EXPIRED_CODE};

/// Identifies a server command: a dotted service name or a legacy numeric
/// id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum CommandId {
    Name(String),
    Numeric(u16),
}

impl CommandId {
    /// Parse the on-wire form. `0x`-prefixed four-digit hex is numeric.
    pub fn parse(s: &str) -> Self {
        if let Some(hex) = s.strip_prefix("0x") {
            if hex.len() == 4 {
                if let Ok(id) = u16::from_str_radix(hex, 16) {
                    return CommandId::Numeric(id);
                }
            }
        }
        CommandId::Name(s.to_string())
    }

    /// The leading service namespace (`"wtlogin"` for `"wtlogin.login"`).
    pub fn service(&self) -> Option<&str> {
        match self {
            CommandId::Name(name) => name.split('.').next(),
            CommandId::Numeric(_) => None,
        }
    }
}

impl fmt::Display for CommandId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommandId::Name(name) => f.write_str(name),
            CommandId::Numeric(id) => write!(f, "0x{:04x}", id),
        }
    }
}

impl From<&str> for CommandId {
    fn from(s: &str) -> Self {
        CommandId::parse(s)
    }
}

impl From<String> for CommandId {
    fn from(s: String) -> Self {
        CommandId::parse(&s)
    }
}

impl From<u16> for CommandId {
    fn from(id: u16) -> Self {
        CommandId::Numeric(id)
    }
}

/// A packet ready to be framed.
#[derive(Debug, Clone)]
pub struct OutgoingPacket {
    pub command: CommandId,
    pub sequence_id: u32,
    pub encryption: EncryptionMode,
    pub sender: String,
    /// Handshake-only extra data.
    pub extra: Bytes,
    pub session_id: Bytes,
    pub compression: Compression,
    pub return_code: i32,
    pub payload: Bytes,
}

impl OutgoingPacket {
    pub fn new(
        command: impl Into<CommandId>,
        sequence_id: u32,
        encryption: EncryptionMode,
        payload: Bytes,
    ) -> Self {
        Self {
            command: command.into(),
            sequence_id,
            encryption,
            sender: String::new(),
            extra: Bytes::new(),
            session_id: Bytes::new(),
            compression: Compression::None,
            return_code: 0,
            payload,
        }
    }

    pub fn with_sender(mut self, sender: impl Into<String>) -> Self {
        self.sender = sender.into();
        self
    }

    pub fn with_extra(mut self, extra: Bytes) -> Self {
        self.extra = extra;
        self
    }

    pub fn with_session_id(mut self, session_id: Bytes) -> Self {
        self.session_id = session_id;
        self
    }

    pub fn with_compression(mut self, compression: Compression) -> Self {
        self.compression = compression;
        self
    }

    /// Server-side replies carry a return code.
    pub fn with_return_code(mut self, code: i32) -> Self {
        self.return_code = code;
        self
    }
}

/// A frame split into its plain header and still-encrypted body.
#[derive(Debug, Clone)]
pub struct Frame {
    pub header: FrameHeader,
    pub body: Bytes,
}

impl Frame {
    #[inline]
    pub fn sequence_id(&self) -> u32 {
        self.header.sequence_id
    }

    #[inline]
    pub fn encryption(&self) -> EncryptionMode {
        self.header.encryption
    }
}

/// A fully decrypted and decompressed inbound packet.
#[derive(Debug, Clone)]
pub struct IncomingPacket {
    pub command: CommandId,
    pub sequence_id: u32,
    pub encryption: EncryptionMode,
    pub return_code: i32,
    pub sender: String,
    pub extra: Bytes,
    pub session_id: Bytes,
    pub payload: Bytes,
}

impl IncomingPacket {
    #[inline]
    pub fn is_session_expired(&self) -> bool {
        self.return_code == SESSION_EXPIRED_CODE
    }

    #[inline]
    pub fn is_ok(&self) -> bool {
        self.return_code == 0
    }
}

/// An encoded frame: plain header and sealed body, kept apart so the
/// writer can hand both to a single vectored write.
#[derive(Debug, Clone)]
pub struct EncodedFrame {
    pub head: Bytes,
    pub body: Bytes,
}

impl EncodedFrame {
    /// Total size on the wire.
    #[inline]
    pub fn size(&self) -> usize {
        self.head.len() + self.body.len()
    }

    /// Concatenate into one buffer.
    pub fn to_vec(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.size());
        out.extend_from_slice(&self.head);
        out.extend_from_slice(&self.body);
        out
    }
}
