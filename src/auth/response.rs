//! Interpretation of `wtlogin.login` replies.

use std::fmt;
use std::time::Duration;

use bytes::Bytes;

use super::packets::LoginReply;
use crate::crypto::Key;
use crate::error::AuthError;

/// Session issued by a successful login.
#[derive(Clone, PartialEq, Eq)]
pub struct SessionGrant {
    pub session_key: Key,
    pub session_ticket: Bytes,
    pub expires_in: Duration,
}

impl fmt::Debug for SessionGrant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionGrant")
            .field("session_ticket_len", &self.session_ticket.len())
            .field("expires_in", &self.expires_in)
            .finish_non_exhaustive()
    }
}

/// Kinds of out-of-band input the server may ask for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChallengeKind {
    PictureCaptcha,
    SliderCaptcha,
    UnsafeDevice,
    DeviceLock,
    Sms,
    QrCode,
}

impl ChallengeKind {
    pub fn name(self) -> &'static str {
        match self {
            ChallengeKind::PictureCaptcha => "picture captcha",
            ChallengeKind::SliderCaptcha => "slider captcha",
            ChallengeKind::UnsafeDevice => "unsafe device",
            ChallengeKind::DeviceLock => "device lock",
            ChallengeKind::Sms => "sms",
            ChallengeKind::QrCode => "qr code",
        }
    }
}

impl fmt::Display for ChallengeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// What one login step achieved.
#[derive(Debug, Clone, PartialEq)]
pub enum LoginResponse {
    Success(SessionGrant),
    WrongPassword(String),
    PictureCaptcha { sign: Bytes, image: Bytes },
    SliderCaptcha { url: String },
    AccountFrozen,
    UnsafeDevice { url: String },
    DeviceLock { url: String },
    SmsRequired { phone: String },
    VersionRejected(String),
    RetryLater(String),
    Unexpected { code: i32, message: String },
}

impl LoginResponse {
    pub fn from_reply(reply: LoginReply) -> Self {
        match reply.result {
            0 => match Key::try_from(reply.session_key.as_ref()) {
                Ok(session_key) => LoginResponse::Success(SessionGrant {
                    session_key,
                    session_ticket: reply.session_ticket,
                    expires_in: Duration::from_secs(reply.expires_in.max(0) as u64),
                }),
                Err(_) => LoginResponse::Unexpected {
                    code: 0,
                    message: format!("session key of {} bytes", reply.session_key.len()),
                },
            },
            1 => LoginResponse::WrongPassword(reply.message),
            2 if !reply.captcha_image.is_empty() => LoginResponse::PictureCaptcha {
                sign: reply.captcha_sign,
                image: reply.captcha_image,
            },
            2 => LoginResponse::SliderCaptcha { url: reply.url },
            40 => LoginResponse::AccountFrozen,
            160 => LoginResponse::UnsafeDevice { url: reply.url },
            204 => LoginResponse::DeviceLock { url: reply.url },
            239 => LoginResponse::SmsRequired { phone: reply.phone },
            235 => LoginResponse::VersionRejected(reply.message),
            _ if reply.message.contains("0x9a") => LoginResponse::RetryLater(reply.message),
            code => LoginResponse::Unexpected {
                code,
                message: reply.message,
            },
        }
    }

    /// The terminal error this response represents, if any.
    pub fn into_error(self) -> Option<AuthError> {
        Some(match self {
            LoginResponse::WrongPassword(m) => AuthError::WrongPassword(m),
            LoginResponse::AccountFrozen => AuthError::AccountFrozen,
            LoginResponse::VersionRejected(m) => AuthError::VersionRejected(m),
            LoginResponse::RetryLater(m) => AuthError::RetryLater(m),
            LoginResponse::Unexpected { code, message } => {
                AuthError::Unexpected(format!("code {}: {}", code, message))
            }
            _ => return None,
        })
    }
}
