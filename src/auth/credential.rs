//! Account identity and credentials.

use std::fmt;
use std::sync::Arc;

use crate::crypto::{md5, Key};
use crate::error::Result;
use crate::BoxFuture;

/// How the account proves its identity.
#[derive(Clone)]
pub enum Credential {
    Password(String),
    /// MD5 of the password, for callers that never hold the plaintext.
    PasswordMd5(Key),
    QrCode,
    /// A callback that picks the method at login time.
    External(Arc<dyn ExternalAuthorizer>),
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Credential::Password(_) => f.write_str("Password(..)"),
            Credential::PasswordMd5(_) => f.write_str("PasswordMd5(..)"),
            Credential::QrCode => f.write_str("QrCode"),
            Credential::External(_) => f.write_str("External(..)"),
        }
    }
}

/// Concrete method chosen by an [`ExternalAuthorizer`].
#[derive(Clone, PartialEq, Eq)]
pub enum AuthMethod {
    PasswordMd5(Key),
    QrCode,
}

impl fmt::Debug for AuthMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthMethod::PasswordMd5(_) => f.write_str("PasswordMd5(..)"),
            AuthMethod::QrCode => f.write_str("QrCode"),
        }
    }
}

/// Caller-supplied authorization.
///
/// Invoked once per full login; `first_attempt` is false when the previous
/// session could not be resumed.
pub trait ExternalAuthorizer: Send + Sync {
    fn authorize(&self, uin: i64, first_attempt: bool) -> BoxFuture<'_, Result<AuthMethod>>;
}

/// Immutable bot identity.
#[derive(Debug, Clone)]
pub struct BotAccount {
    uin: i64,
    credential: Credential,
}

impl BotAccount {
    pub fn new(uin: i64, credential: Credential) -> Self {
        Self { uin, credential }
    }

    pub fn with_password(uin: i64, password: impl Into<String>) -> Self {
        Self::new(uin, Credential::Password(password.into()))
    }

    pub fn with_qr_code(uin: i64) -> Self {
        Self::new(uin, Credential::QrCode)
    }

    pub fn uin(&self) -> i64 {
        self.uin
    }

    pub fn credential(&self) -> &Credential {
        &self.credential
    }

    /// Resolve the credential to a method, asking the external authorizer
    /// if there is one.
    pub async fn resolve(&self, first_attempt: bool) -> Result<AuthMethod> {
        Ok(match &self.credential {
            Credential::Password(p) => AuthMethod::PasswordMd5(md5(p.as_bytes())),
            Credential::PasswordMd5(h) => AuthMethod::PasswordMd5(*h),
            Credential::QrCode => AuthMethod::QrCode,
            Credential::External(auth) => auth.authorize(self.uin, first_attempt).await?,
        })
    }
}
