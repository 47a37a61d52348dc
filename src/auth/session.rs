//! Session key material and its storage.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use super::response::SessionGrant;
use crate::codec::MsgPackCodec;
use crate::crypto::ecdh::PUBLIC_KEY_SIZE;
use crate::crypto::{EcdhKeyPair, Key};
use crate::error::{CryptoError, Result, WireError};
use crate::protocol::EncryptionMode;
use crate::BoxFuture;

/// Everything needed to seal and open frames for one account.
///
/// Values are never edited in place: each step of the handshake builds a
/// new material and swaps it into the [`KeyRing`] whole.
#[derive(Debug, Clone)]
pub struct SessionKeyMaterial {
    ecdh: EcdhKeyPair,
    server_public_key: Option<[u8; PUBLIC_KEY_SIZE]>,
    share_key: Option<Key>,
    session_key: Option<Key>,
    session_ticket: Bytes,
    /// Unix seconds.
    expires_at: Option<u64>,
    version: u32,
}

impl SessionKeyMaterial {
    /// Fresh material with a new key pair and nothing negotiated.
    pub fn new() -> Self {
        Self {
            ecdh: EcdhKeyPair::generate(),
            server_public_key: None,
            share_key: None,
            session_key: None,
            session_ticket: Bytes::new(),
            expires_at: None,
            version: 0,
        }
    }

    /// Derive the share key against the server's public key.
    pub fn with_server_key(&self, server_public: &[u8]) -> std::result::Result<Self, CryptoError> {
        let share = self.ecdh.shared_secret(server_public)?;
        let mut server = [0u8; PUBLIC_KEY_SIZE];
        server.copy_from_slice(server_public);
        Ok(Self {
            server_public_key: Some(server),
            share_key: Some(share),
            ..self.clone()
        })
    }

    /// Install a freshly granted session.
    pub fn with_session(&self, grant: &SessionGrant, now: SystemTime) -> Self {
        Self {
            session_key: Some(grant.session_key),
            session_ticket: grant.session_ticket.clone(),
            expires_at: Some(unix_secs(now).saturating_add(grant.expires_in.as_secs())),
            version: self.version.wrapping_add(1),
            ..self.clone()
        }
    }

    /// Drop the session, keeping the negotiated share key.
    pub fn without_session(&self) -> Self {
        Self {
            session_key: None,
            session_ticket: Bytes::new(),
            expires_at: None,
            ..self.clone()
        }
    }

    pub fn ecdh(&self) -> &EcdhKeyPair {
        &self.ecdh
    }

    pub fn client_public_key(&self) -> [u8; PUBLIC_KEY_SIZE] {
        self.ecdh.public_key()
    }

    pub fn server_public_key(&self) -> Option<&[u8; PUBLIC_KEY_SIZE]> {
        self.server_public_key.as_ref()
    }

    pub fn share_key(&self) -> Option<&Key> {
        self.share_key.as_ref()
    }

    pub fn session_key(&self) -> Option<&Key> {
        self.session_key.as_ref()
    }

    pub fn session_ticket(&self) -> &Bytes {
        &self.session_ticket
    }

    pub fn expires_at(&self) -> Option<SystemTime> {
        self.expires_at.map(|s| UNIX_EPOCH + Duration::from_secs(s))
    }

    /// Bumped every time a session is granted.
    pub fn version(&self) -> u32 {
        self.version
    }

    pub fn has_share_key(&self) -> bool {
        self.share_key.is_some()
    }

    /// Whether a stored ticket can be tried for fast login at `now`.
    pub fn has_valid_ticket(&self, now: SystemTime) -> bool {
        !self.session_ticket.is_empty()
            && self.session_key.is_some()
            && self.expires_at.map_or(false, |at| at > unix_secs(now))
    }

    /// Key used for frames of `mode`.
    pub fn key_for(&self, mode: EncryptionMode) -> Option<&Key> {
        match mode {
            EncryptionMode::None => None,
            EncryptionMode::SessionKey => self.session_key.as_ref(),
            EncryptionMode::ShareKey => self.share_key.as_ref(),
        }
    }

    /// Serialize for an external store.
    pub fn export(&self, uin: i64) -> Result<Vec<u8>> {
        MsgPackCodec::encode(&SecretsBlob {
            uin,
            ecdh_secret: self.ecdh.secret_bytes().to_vec(),
            server_public_key: self.server_public_key.map(|k| k.to_vec()),
            share_key: self.share_key.map(|k| k.to_vec()),
            session_key: self.session_key.map(|k| k.to_vec()),
            session_ticket: self.session_ticket.to_vec(),
            expires_at: self.expires_at,
            version: self.version,
        })
    }

    /// Restore what [`export`](Self::export) wrote for the same account.
    pub fn import(blob: &[u8], uin: i64) -> Result<Self> {
        let blob: SecretsBlob = MsgPackCodec::decode(blob)?;
        if blob.uin != uin {
            return Err(WireError::Protocol(format!(
                "secrets belong to {}, not {}",
                blob.uin, uin
            )));
        }
        let secret: [u8; PUBLIC_KEY_SIZE] = fixed(&blob.ecdh_secret, "ecdh secret")?;
        Ok(Self {
            ecdh: EcdhKeyPair::from_secret(secret),
            server_public_key: blob
                .server_public_key
                .as_deref()
                .map(|k| fixed(k, "server public key"))
                .transpose()?,
            share_key: blob.share_key.as_deref().map(|k| fixed(k, "share key")).transpose()?,
            session_key: blob
                .session_key
                .as_deref()
                .map(|k| fixed(k, "session key"))
                .transpose()?,
            session_ticket: Bytes::from(blob.session_ticket),
            expires_at: blob.expires_at,
            version: blob.version,
        })
    }
}

impl Default for SessionKeyMaterial {
    fn default() -> Self {
        Self::new()
    }
}

fn unix_secs(t: SystemTime) -> u64 {
    t.duration_since(UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or(0)
}

fn fixed<const N: usize>(raw: &[u8], what: &str) -> Result<[u8; N]> {
    <[u8; N]>::try_from(raw)
        .map_err(|_| WireError::Protocol(format!("{} must be {} bytes, got {}", what, N, raw.len())))
}

#[derive(Serialize, Deserialize)]
struct SecretsBlob {
    uin: i64,
    #[serde(with = "serde_bytes")]
    ecdh_secret: Vec<u8>,
    #[serde(with = "serde_bytes", default)]
    server_public_key: Option<Vec<u8>>,
    #[serde(with = "serde_bytes", default)]
    share_key: Option<Vec<u8>>,
    #[serde(with = "serde_bytes", default)]
    session_key: Option<Vec<u8>>,
    #[serde(with = "serde_bytes", default)]
    session_ticket: Vec<u8>,
    #[serde(default)]
    expires_at: Option<u64>,
    #[serde(default)]
    version: u32,
}

/// Shared slot holding the current [`SessionKeyMaterial`].
///
/// Readers take a cheap `Arc` snapshot; the auth processor is the only
/// writer and always replaces the whole value.
#[derive(Debug, Default)]
pub struct KeyRing {
    current: RwLock<Arc<SessionKeyMaterial>>,
}

impl KeyRing {
    pub fn new(material: SessionKeyMaterial) -> Self {
        Self {
            current: RwLock::new(Arc::new(material)),
        }
    }

    pub fn current(&self) -> Arc<SessionKeyMaterial> {
        match self.current.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn replace(&self, material: SessionKeyMaterial) {
        let material = Arc::new(material);
        match self.current.write() {
            Ok(mut guard) => *guard = material,
            Err(poisoned) => *poisoned.into_inner() = material,
        }
    }

    pub fn key_for(&self, mode: EncryptionMode) -> Option<Key> {
        self.current().key_for(mode).copied()
    }
}

/// External persistence for exported secrets.
pub trait SecretsStore: Send + Sync {
    fn load(&self, uin: i64) -> BoxFuture<'_, Result<Option<Vec<u8>>>>;
    fn save(&self, uin: i64, blob: Vec<u8>) -> BoxFuture<'_, Result<()>>;
}

/// In-memory [`SecretsStore`].
#[derive(Debug, Default)]
pub struct MemorySecretsStore {
    blobs: Mutex<HashMap<i64, Vec<u8>>>,
}

impl MemorySecretsStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_blobs<R>(&self, f: impl FnOnce(&mut HashMap<i64, Vec<u8>>) -> R) -> R {
        match self.blobs.lock() {
            Ok(mut guard) => f(&mut guard),
            Err(poisoned) => f(&mut poisoned.into_inner()),
        }
    }
}

impl SecretsStore for MemorySecretsStore {
    fn load(&self, uin: i64) -> BoxFuture<'_, Result<Option<Vec<u8>>>> {
        let blob = self.with_blobs(|b| b.get(&uin).cloned());
        Box::pin(async move { Ok(blob) })
    }

    fn save(&self, uin: i64, blob: Vec<u8>) -> BoxFuture<'_, Result<()>> {
        self.with_blobs(|b| b.insert(uin, blob));
        Box::pin(async { Ok(()) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grant() -> SessionGrant {
        SessionGrant {
            session_key: [7; 16],
            session_ticket: Bytes::from_static(b"ticket"),
            expires_in: Duration::from_secs(3600),
        }
    }

    fn negotiated() -> SessionKeyMaterial {
        let server = EcdhKeyPair::generate();
        SessionKeyMaterial::new()
            .with_server_key(&server.public_key())
            .unwrap()
    }

    #[test]
    fn test_share_key_matches_server_side() {
        let server = EcdhKeyPair::generate();
        let client = SessionKeyMaterial::new()
            .with_server_key(&server.public_key())
            .unwrap();
        let server_side = server.shared_secret(&client.client_public_key()).unwrap();
        assert_eq!(client.share_key(), Some(&server_side));
    }

    #[test]
    fn test_bad_server_key() {
        assert_eq!(
            SessionKeyMaterial::new().with_server_key(&[1, 2, 3]).unwrap_err(),
            CryptoError::InvalidPublicKey
        );
    }

    #[test]
    fn test_key_for_modes() {
        let now = SystemTime::now();
        let m = negotiated();
        assert!(m.key_for(EncryptionMode::None).is_none());
        assert!(m.key_for(EncryptionMode::SessionKey).is_none());
        assert!(m.key_for(EncryptionMode::ShareKey).is_some());

        let m = m.with_session(&grant(), now);
        assert_eq!(m.key_for(EncryptionMode::SessionKey), Some(&[7; 16]));
        assert_eq!(m.version(), 1);
    }

    #[test]
    fn test_ticket_validity() {
        let now = SystemTime::now();
        let m = negotiated();
        assert!(!m.has_valid_ticket(now));

        let m = m.with_session(&grant(), now);
        assert!(m.has_valid_ticket(now));
        assert!(!m.has_valid_ticket(now + Duration::from_secs(7200)));
        assert!(!m.without_session().has_valid_ticket(now));
        assert!(m.without_session().has_share_key());
    }

    #[test]
    fn test_export_import() {
        let m = negotiated().with_session(&grant(), SystemTime::now());
        let blob = m.export(10001).unwrap();
        let back = SessionKeyMaterial::import(&blob, 10001).unwrap();

        assert_eq!(back.client_public_key(), m.client_public_key());
        assert_eq!(back.share_key(), m.share_key());
        assert_eq!(back.session_key(), m.session_key());
        assert_eq!(back.session_ticket(), m.session_ticket());
        assert_eq!(back.expires_at(), m.expires_at());
        assert_eq!(back.version(), 1);
    }

    #[test]
    fn test_export_import_without_keys() {
        let m = SessionKeyMaterial::new();
        let back = SessionKeyMaterial::import(&m.export(7).unwrap(), 7).unwrap();

        assert_eq!(back.client_public_key(), m.client_public_key());
        assert!(back.server_public_key().is_none());
        assert!(back.share_key().is_none());
        assert!(back.session_key().is_none());
    }

    #[test]
    fn test_import_other_account() {
        let blob = negotiated().export(1).unwrap();
        assert!(matches!(
            SessionKeyMaterial::import(&blob, 2),
            Err(WireError::Protocol(_))
        ));
    }

    #[test]
    fn test_keyring_replace() {
        let ring = KeyRing::default();
        let before = ring.current();
        assert!(ring.key_for(EncryptionMode::ShareKey).is_none());

        ring.replace(negotiated());
        assert!(ring.key_for(EncryptionMode::ShareKey).is_some());
        // snapshots taken earlier are unaffected
        assert!(!before.has_share_key());
    }

    #[tokio::test]
    async fn test_memory_store() {
        let store = MemorySecretsStore::new();
        assert!(store.load(5).await.unwrap().is_none());
        store.save(5, vec![1, 2]).await.unwrap();
        assert_eq!(store.load(5).await.unwrap(), Some(vec![1, 2]));
    }
}
