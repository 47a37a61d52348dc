//! Error types for the protocol engine.
//!
//! Each layer has its own error enum so callers can match on the failure
//! class that matters to them; everything folds into [`WireError`].

use std::sync::Arc;

use thiserror::Error;

/// Failures of the symmetric cipher and key agreement.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CryptoError {
    /// Trailing zero padding was not intact after decryption.
    #[error("cipher padding invalid")]
    PaddingInvalid,

    /// Ciphertext length is not a positive multiple of the block size.
    #[error("invalid ciphertext length: {0}")]
    InvalidLength(usize),

    /// Peer public key has the wrong size.
    #[error("invalid peer public key")]
    InvalidPublicKey,
}

/// Failures of the tagged binary codec.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TarsError {
    #[error("unexpected end of input")]
    UnexpectedEof,

    #[error("unknown type code: {0}")]
    UnknownType(u8),

    #[error("field {tag}: expected {expected}, found {found}")]
    TypeMismatch {
        tag: u8,
        expected: &'static str,
        found: &'static str,
    },

    #[error("required field {0} missing")]
    MissingField(u8),

    #[error("invalid length: {0}")]
    InvalidLength(i64),

    #[error("string is not valid UTF-8")]
    Utf8,

    #[error("map entry `{0}` not found")]
    MissingEntry(String),

    #[error("nesting deeper than {0} levels")]
    NestingTooDeep(usize),
}

/// Terminal authentication failures.
///
/// None of these are retried by the engine; they surface to the session
/// owner, which decides whether to ask for new credentials.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    #[error("wrong password: {0}")]
    WrongPassword(String),

    #[error("account is frozen or blocked")]
    AccountFrozen,

    #[error("protocol version rejected: {0}")]
    VersionRejected(String),

    #[error("server asked to retry later: {0}")]
    RetryLater(String),

    #[error("{0} challenge not solved within the retry limit")]
    ChallengeRetriesExhausted(&'static str),

    #[error("unsupported challenge: {0}")]
    UnsupportedChallenge(String),

    #[error("handshake crypto failure: {0}")]
    Handshake(CryptoError),

    #[error("login requires a solver but none is configured")]
    NoSolver,

    #[error("QR code login cancelled")]
    QrCodeCancelled,

    #[error("QR code expired before confirmation")]
    QrCodeTimeout,

    #[error("unexpected login reply: {0}")]
    Unexpected(String),
}

/// Main error type for the engine.
#[derive(Debug, Error)]
pub enum WireError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),

    #[error("tars error: {0}")]
    Tars(#[from] TarsError),

    #[error("authentication failed: {0}")]
    Auth(#[from] AuthError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("MsgPack encode error: {0}")]
    MsgPackEncode(#[from] rmp_serde::encode::Error),

    #[error("MsgPack decode error: {0}")]
    MsgPackDecode(#[from] rmp_serde::decode::Error),

    /// Malformed frame body; affects one frame only.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Frame header cannot be trusted; the stream must be abandoned.
    #[error("framing desync: {0}")]
    Desync(String),

    #[error("server returned code {code} for {command}")]
    ServerCode { command: String, code: i32 },

    #[error("session expired")]
    SessionExpired,

    #[error("handler is not connected")]
    NotConnected,

    #[error("request {command} (seq {sequence_id}) timed out")]
    Timeout { command: String, sequence_id: u32 },

    #[error("connection closed: {0}")]
    ConnectionClosed(String),

    #[error("heartbeat failed")]
    HeartbeatFailed,

    #[error("operation cancelled")]
    Cancelled,

    /// No codec registered for a command that requires one.
    #[error("no codec registered for {0}")]
    UnknownCommand(String),

    #[error("backpressure timeout")]
    BackpressureTimeout,

    #[error("gave up after {0} reconnection attempts")]
    RetriesExhausted(u32),

    /// A failure shared between several waiters (state observers, closed
    /// handlers).
    #[error("{0}")]
    Shared(Arc<WireError>),
}

impl WireError {
    /// Whether a new connection attempt could cure this failure.
    pub fn is_recoverable(&self) -> bool {
        match self {
            WireError::Io(_)
            | WireError::Desync(_)
            | WireError::SessionExpired
            | WireError::Timeout { .. }
            | WireError::ConnectionClosed(_)
            | WireError::HeartbeatFailed
            | WireError::NotConnected
            | WireError::BackpressureTimeout
            | WireError::Protocol(_)
            | WireError::Tars(_)
            | WireError::ServerCode { .. } => true,
            WireError::Shared(inner) => inner.is_recoverable(),
            _ => false,
        }
    }

    /// Whether this is an authentication failure, possibly wrapped.
    pub fn is_auth(&self) -> bool {
        match self {
            WireError::Auth(_) => true,
            WireError::Shared(inner) => inner.is_auth(),
            _ => false,
        }
    }
}

/// Result type alias using WireError.
pub type Result<T> = std::result::Result<T, WireError>;
