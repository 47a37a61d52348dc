//! Zlib helpers for compressed SSO payloads.

use std::io::{Read, Write};

use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression as Level;

use crate::error::{Result, WireError};

/// Upper bound on an inflated payload.
pub const MAX_INFLATED_SIZE: u64 = 64 * 1024 * 1024;

pub fn deflate(data: &[u8]) -> Result<Vec<u8>> {
    let mut enc = ZlibEncoder::new(Vec::new(), Level::default());
    enc.write_all(data)?;
    Ok(enc.finish()?)
}

pub fn inflate(data: &[u8]) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    ZlibDecoder::new(data)
        .take(MAX_INFLATED_SIZE + 1)
        .read_to_end(&mut out)
        .map_err(|e| WireError::Protocol(format!("zlib: {}", e)))?;
    if out.len() as u64 > MAX_INFLATED_SIZE {
        return Err(WireError::Protocol("inflated payload too large".into()));
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roundtrip() {
        let data = b"hello hello hello hello".repeat(20);
        let packed = deflate(&data).unwrap();
        assert!(packed.len() < data.len());
        assert_eq!(inflate(&packed).unwrap(), data);
    }

    #[test]
    fn test_garbage_is_protocol_error() {
        assert!(matches!(
            inflate(b"definitely not zlib"),
            Err(WireError::Protocol(_))
        ));
    }
}
