//! Crypto primitives: MD5, the TEA block cipher and X25519 key agreement.
//!
//! Everything here is a pure function of its inputs. Malformed ciphertext
//! or key material yields a [`CryptoError`](crate::error::CryptoError),
//! never a panic.

pub mod ecdh;
pub mod tea;

use md5::{Digest, Md5};

pub use ecdh::EcdhKeyPair;

/// Size of every symmetric key and digest produced by this module.
pub const KEY_SIZE: usize = 16;

/// A 16-byte symmetric key.
pub type Key = [u8; KEY_SIZE];

/// Hash `data` with MD5.
///
/// # Example
///
/// ```
/// use sso_wire::crypto::md5;
///
/// assert_eq!(hex::encode(md5(b"")), "d41d8cd98f00b204e9800998ecf8427e");
/// ```
pub fn md5(data: &[u8]) -> Key {
    let mut hasher = Md5::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// Hash the concatenation of several slices without an intermediate buffer.
pub fn md5_concat(parts: &[&[u8]]) -> Key {
    let mut hasher = Md5::new();
    for part in parts {
        hasher.update(part);
    }
    hasher.finalize().into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_md5_known_vector() {
        assert_eq!(
            hex::encode(md5(b"The quick brown fox jumps over the lazy dog")),
            "9e107d9d372bb6826bd81d3542a419d6"
        );
    }

    #[test]
    fn test_md5_concat_matches_single() {
        assert_eq!(md5_concat(&[b"abc", b"def"]), md5(b"abcdef"));
        assert_eq!(md5_concat(&[]), md5(b""));
    }
}
