//! TEA block cipher in the chained, randomly padded form used by the SSO
//! protocol.
//!
//! # Layout
//!
//! Plaintext is padded before encryption so the total is a multiple of the
//! 8-byte block size:
//!
//! ```text
//! ┌──────────┬───────────────┬──────────┬───────────┬──────────────┐
//! │ 1 byte   │ fill × random │ 2×random │ plaintext │ 7 × 0x00     │
//! │ rnd|fill │ (0..=7 bytes) │          │           │              │
//! └──────────┴───────────────┴──────────┴───────────┴──────────────┘
//! ```
//!
//! The low three bits of the first byte carry `fill`. Blocks are chained
//! with the previous plaintext and ciphertext block, so a corrupted byte
//! anywhere garbles every following block, including the trailing zeros
//! that [`decrypt`] verifies.

use rand::RngCore;

use crate::crypto::Key;
use crate::error::CryptoError;

/// Cipher block size in bytes.
pub const BLOCK_SIZE: usize = 8;

/// Bytes of fixed overhead added by padding (header byte, salt, zero tail).
pub const PADDING_OVERHEAD: usize = 10;

/// Number of trailing zero bytes verified on decrypt.
const ZERO_TAIL: usize = 7;

const ROUNDS: u32 = 16;
const DELTA: u32 = 0x9e37_79b9;

/// Length of the ciphertext produced for `plaintext_len` input bytes.
#[inline]
pub fn encrypted_len(plaintext_len: usize) -> usize {
    plaintext_len + fill_len(plaintext_len) + PADDING_OVERHEAD
}

#[inline]
fn fill_len(plaintext_len: usize) -> usize {
    match (plaintext_len + PADDING_OVERHEAD) % BLOCK_SIZE {
        0 => 0,
        rem => BLOCK_SIZE - rem,
    }
}

fn schedule(key: &Key) -> [u32; 4] {
    let mut k = [0u32; 4];
    for (i, word) in k.iter_mut().enumerate() {
        *word = u32::from_be_bytes([key[i * 4], key[i * 4 + 1], key[i * 4 + 2], key[i * 4 + 3]]);
    }
    k
}

fn encipher(block: u64, k: &[u32; 4]) -> u64 {
    let mut v0 = (block >> 32) as u32;
    let mut v1 = block as u32;
    let mut sum = 0u32;
    for _ in 0..ROUNDS {
        sum = sum.wrapping_add(DELTA);
        v0 = v0.wrapping_add(
            (v1 << 4).wrapping_add(k[0]) ^ v1.wrapping_add(sum) ^ (v1 >> 5).wrapping_add(k[1]),
        );
        v1 = v1.wrapping_add(
            (v0 << 4).wrapping_add(k[2]) ^ v0.wrapping_add(sum) ^ (v0 >> 5).wrapping_add(k[3]),
        );
    }
    ((v0 as u64) << 32) | v1 as u64
}

fn decipher(block: u64, k: &[u32; 4]) -> u64 {
    let mut v0 = (block >> 32) as u32;
    let mut v1 = block as u32;
    let mut sum = DELTA.wrapping_mul(ROUNDS);
    for _ in 0..ROUNDS {
        v1 = v1.wrapping_sub(
            (v0 << 4).wrapping_add(k[2]) ^ v0.wrapping_add(sum) ^ (v0 >> 5).wrapping_add(k[3]),
        );
        v0 = v0.wrapping_sub(
            (v1 << 4).wrapping_add(k[0]) ^ v1.wrapping_add(sum) ^ (v1 >> 5).wrapping_add(k[1]),
        );
        sum = sum.wrapping_sub(DELTA);
    }
    ((v0 as u64) << 32) | v1 as u64
}

#[inline]
fn read_block(buf: &[u8]) -> u64 {
    let mut b = [0u8; BLOCK_SIZE];
    b.copy_from_slice(&buf[..BLOCK_SIZE]);
    u64::from_be_bytes(b)
}

/// Encrypt `plaintext` with a fresh random salt.
///
/// # Example
///
/// ```
/// use sso_wire::crypto::tea;
///
/// let key = [7u8; 16];
/// let sealed = tea::encrypt(&key, b"hello world");
/// assert_eq!(tea::decrypt(&key, &sealed).unwrap(), b"hello world");
/// ```
pub fn encrypt(key: &Key, plaintext: &[u8]) -> Vec<u8> {
    encrypt_with_rng(key, plaintext, &mut rand::thread_rng())
}

/// Encrypt `plaintext`, drawing padding salt from `rng`.
pub fn encrypt_with_rng<R: RngCore + ?Sized>(key: &Key, plaintext: &[u8], rng: &mut R) -> Vec<u8> {
    let fill = fill_len(plaintext.len());
    let mut buf = vec![0u8; encrypted_len(plaintext.len())];

    rng.fill_bytes(&mut buf[..fill + 3]);
    buf[0] = (buf[0] & 0xF8) | fill as u8;
    buf[fill + 3..fill + 3 + plaintext.len()].copy_from_slice(plaintext);

    let k = schedule(key);
    let mut prev_plain = 0u64;
    let mut prev_cipher = 0u64;
    for chunk in buf.chunks_exact_mut(BLOCK_SIZE) {
        let mixed = read_block(chunk) ^ prev_cipher;
        let sealed = encipher(mixed, &k) ^ prev_plain;
        chunk.copy_from_slice(&sealed.to_be_bytes());
        prev_plain = mixed;
        prev_cipher = sealed;
    }
    buf
}

/// Decrypt a buffer produced by [`encrypt`].
///
/// Fails with [`CryptoError::InvalidLength`] when the input cannot be a
/// ciphertext at all and [`CryptoError::PaddingInvalid`] when the padding
/// does not check out, which is what a wrong key or a corrupted byte
/// produces.
pub fn decrypt(key: &Key, ciphertext: &[u8]) -> Result<Vec<u8>, CryptoError> {
    if ciphertext.len() < 2 * BLOCK_SIZE || ciphertext.len() % BLOCK_SIZE != 0 {
        return Err(CryptoError::InvalidLength(ciphertext.len()));
    }

    let k = schedule(key);
    let mut out = vec![0u8; ciphertext.len()];
    let mut prev_plain = 0u64;
    let mut prev_cipher = 0u64;
    for (src, dst) in ciphertext
        .chunks_exact(BLOCK_SIZE)
        .zip(out.chunks_exact_mut(BLOCK_SIZE))
    {
        let sealed = read_block(src);
        let mixed = decipher(sealed ^ prev_plain, &k);
        dst.copy_from_slice(&(mixed ^ prev_cipher).to_be_bytes());
        prev_plain = mixed;
        prev_cipher = sealed;
    }

    let start = (out[0] & 0x07) as usize + 3;
    let end = out.len() - ZERO_TAIL;
    if start > end || out[end..].iter().any(|&b| b != 0) {
        return Err(CryptoError::PaddingInvalid);
    }

    out.truncate(end);
    out.drain(..start);
    Ok(out)
}
