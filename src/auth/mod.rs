//! Authentication: the SSO handshake that turns a fresh connection into a
//! usable session.
//!
//! One [`SsoProcessor`] per bot. It negotiates the share key, submits the
//! account's credential, walks the server through any challenges with the
//! help of a [`LoginSolver`], and installs the resulting
//! [`SessionKeyMaterial`] into the shared [`KeyRing`]. It talks to the
//! server only through a [`PacketChannel`], which the network handler
//! provides while the connection is still loading.

mod credential;
pub mod packets;
mod processor;
mod qrcode;
mod response;
mod session;
mod solver;

use bytes::Bytes;

use crate::error::{AuthError, Result, WireError};
use crate::protocol::{EncryptionMode, IncomingPacket};
use crate::BoxFuture;

pub use credential::{AuthMethod, BotAccount, Credential, ExternalAuthorizer};
pub use processor::SsoProcessor;
pub use qrcode::{QrCodeState, QrConfirmation};
pub use response::{ChallengeKind, LoginResponse, SessionGrant};
pub use session::{KeyRing, MemorySecretsStore, SecretsStore, SessionKeyMaterial};
pub use solver::LoginSolver;

/// Request path used during login.
///
/// Unlike the public request API this works before the connection is
/// `Ok`; replies with a non-zero return code come back as errors.
pub trait PacketChannel: Send + Sync {
    /// Send and wait for the matching reply.
    fn request(
        &self,
        command: &'static str,
        mode: EncryptionMode,
        payload: Bytes,
    ) -> BoxFuture<'_, Result<IncomingPacket>>;

    /// Send without waiting for a reply.
    fn post(&self, command: &'static str, mode: EncryptionMode, payload: Bytes) -> BoxFuture<'_, Result<()>>;
}

/// Login lifecycle notifications for the session owner.
#[derive(Debug, Clone)]
pub enum AuthEvent {
    ChallengeIssued { uin: i64, kind: ChallengeKind },
    Succeeded { uin: i64, fast: bool },
    /// `auth` is set when the failure is a terminal authentication error.
    Failed {
        uin: i64,
        auth: Option<AuthError>,
        message: String,
    },
}

impl AuthEvent {
    pub(crate) fn failed(uin: i64, error: &WireError) -> Self {
        let auth = match error {
            WireError::Auth(a) => Some(a.clone()),
            WireError::Shared(inner) => match inner.as_ref() {
                WireError::Auth(a) => Some(a.clone()),
                _ => None,
            },
            _ => None,
        };
        AuthEvent::Failed {
            uin,
            auth,
            message: error.to_string(),
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::protocol::CommandId;
    use std::sync::Mutex;

    type Script = Box<dyn Fn(&str, Bytes) -> Result<Bytes> + Send + Sync>;

    /// A [`PacketChannel`] that answers from a closure and records calls.
    pub(crate) struct ScriptedChannel {
        script: Script,
        calls: Mutex<Vec<(String, EncryptionMode, Bytes)>>,
        posts: Mutex<Vec<(String, EncryptionMode, Bytes)>>,
    }

    impl ScriptedChannel {
        pub(crate) fn new(
            script: impl Fn(&str, Bytes) -> Result<Bytes> + Send + Sync + 'static,
        ) -> Self {
            Self {
                script: Box::new(script),
                calls: Mutex::new(Vec::new()),
                posts: Mutex::new(Vec::new()),
            }
        }

        pub(crate) fn calls(&self) -> Vec<(String, EncryptionMode, Bytes)> {
            self.calls.lock().unwrap().clone()
        }

        pub(crate) fn posts(&self) -> Vec<(String, EncryptionMode, Bytes)> {
            self.posts.lock().unwrap().clone()
        }
    }

    impl PacketChannel for ScriptedChannel {
        fn request(
            &self,
            command: &'static str,
            mode: EncryptionMode,
            payload: Bytes,
        ) -> BoxFuture<'_, Result<IncomingPacket>> {
            self.calls
                .lock()
                .unwrap()
                .push((command.to_string(), mode, payload.clone()));
            let result = (self.script)(command, payload).map(|reply| IncomingPacket {
                command: CommandId::from(command),
                sequence_id: 0,
                encryption: mode,
                return_code: 0,
                sender: String::new(),
                extra: Bytes::new(),
                session_id: Bytes::new(),
                payload: reply,
            });
            Box::pin(async move { result })
        }

        fn post(&self, command: &'static str, mode: EncryptionMode, payload: Bytes) -> BoxFuture<'_, Result<()>> {
            self.posts
                .lock()
                .unwrap()
                .push((command.to_string(), mode, payload));
            Box::pin(async { Ok(()) })
        }
    }
}
