//! MsgPack codec using `rmp-serde`, for blobs that never reach the server.
//!
//! Session secrets are exported as MsgPack so an external store can keep
//! them as one opaque value. Structs are written with `to_vec_named`
//! (struct-as-map) so a blob written by an older build still decodes after
//! fields are added with `#[serde(default)]`.
//!
//! # Example
//!
//! ```
//! use sso_wire::codec::MsgPackCodec;
//! use serde::{Serialize, Deserialize};
//!
//! #[derive(Serialize, Deserialize, PartialEq, Debug)]
//! struct Cached {
//!     uin: i64,
//!     nick: String,
//! }
//!
//! let value = Cached { uin: 10001, nick: "bot".to_string() };
//! let encoded = MsgPackCodec::encode(&value).unwrap();
//! let decoded: Cached = MsgPackCodec::decode(&encoded).unwrap();
//! assert_eq!(decoded, value);
//! ```

use crate::error::Result;

/// MessagePack codec for locally persisted data.
pub struct MsgPackCodec;

impl MsgPackCodec {
    /// Encode as MsgPack with struct fields named.
    #[inline]
    pub fn encode<T: serde::Serialize>(value: &T) -> Result<Vec<u8>> {
        Ok(rmp_serde::to_vec_named(value)?)
    }

    #[inline]
    pub fn decode<T: serde::de::DeserializeOwned>(bytes: &[u8]) -> Result<T> {
        Ok(rmp_serde::from_slice(bytes)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::WireError;
    use serde::{Deserialize, Serialize};

    #[derive(Serialize, Deserialize, PartialEq, Debug)]
    struct V1 {
        uin: i64,
        #[serde(with = "serde_bytes")]
        key: Vec<u8>,
    }

    #[derive(Serialize, Deserialize, PartialEq, Debug)]
    struct V2 {
        uin: i64,
        #[serde(with = "serde_bytes")]
        key: Vec<u8>,
        #[serde(default)]
        expires_at: u64,
    }

    #[test]
    fn test_struct_written_as_map() {
        let encoded = MsgPackCodec::encode(&V1 {
            uin: 1,
            key: vec![0; 4],
        })
        .unwrap();
        // fixmap with 2 entries, not fixarray
        assert_eq!(encoded[0], 0x82);
    }

    #[test]
    fn test_bytes_field_is_bin() {
        let encoded = MsgPackCodec::encode(&serde_bytes::Bytes::new(&[1, 2, 3])).unwrap();
        assert_eq!(encoded[0], 0xc4);
    }

    #[test]
    fn test_older_blob_decodes_into_newer_struct() {
        let old = V1 {
            uin: 10001,
            key: vec![9; 16],
        };
        let encoded = MsgPackCodec::encode(&old).unwrap();
        let new: V2 = MsgPackCodec::decode(&encoded).unwrap();
        assert_eq!(new.uin, 10001);
        assert_eq!(new.key, vec![9; 16]);
        assert_eq!(new.expires_at, 0);
    }

    #[test]
    fn test_decode_error_on_invalid_data() {
        let result: Result<V1> = MsgPackCodec::decode(b"not valid msgpack");
        assert!(matches!(result, Err(WireError::MsgPackDecode(_))));
    }
}
