//! X25519 key agreement producing the 16-byte handshake share key.

use std::fmt;

use rand::rngs::OsRng;
use x25519_dalek::{PublicKey, StaticSecret};

use crate::crypto::{md5, Key};
use crate::error::CryptoError;

/// Size of an X25519 public or secret key.
pub const PUBLIC_KEY_SIZE: usize = 32;

/// One side's key pair for the handshake key agreement.
///
/// A `StaticSecret` is kept (rather than an ephemeral one) so the pair can
/// be exported with the rest of the session and reused on reconnect.
#[derive(Clone)]
pub struct EcdhKeyPair {
    secret: StaticSecret,
    public: PublicKey,
}

impl EcdhKeyPair {
    /// Generate a new random key pair.
    pub fn generate() -> Self {
        Self::from_secret(StaticSecret::random_from_rng(OsRng).to_bytes())
    }

    /// Rebuild a key pair from exported secret bytes.
    pub fn from_secret(secret: [u8; PUBLIC_KEY_SIZE]) -> Self {
        let secret = StaticSecret::from(secret);
        let public = PublicKey::from(&secret);
        Self { secret, public }
    }

    /// Public half, sent to the peer.
    pub fn public_key(&self) -> [u8; PUBLIC_KEY_SIZE] {
        self.public.to_bytes()
    }

    /// Secret half, for export to a secrets store.
    pub fn secret_bytes(&self) -> [u8; PUBLIC_KEY_SIZE] {
        self.secret.to_bytes()
    }

    /// Agree on a share key with `peer_public`: `md5` of the raw X25519
    /// output.
    pub fn shared_secret(&self, peer_public: &[u8]) -> Result<Key, CryptoError> {
        let peer: [u8; PUBLIC_KEY_SIZE] = peer_public
            .try_into()
            .map_err(|_| CryptoError::InvalidPublicKey)?;
        let agreed = self.secret.diffie_hellman(&PublicKey::from(peer));
        Ok(md5(agreed.as_bytes()))
    }
}

impl fmt::Debug for EcdhKeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EcdhKeyPair")
            .field("public", &hex::encode(self.public.as_bytes()))
            .field("secret", &"[REDACTED]")
            .finish()
    }
}
