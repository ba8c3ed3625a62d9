//! # Canonical Binary Codec
//!
//! Every byte that gets hashed, signed, gossiped or persisted goes through
//! here. The encoding is bincode with a pinned configuration:
//!
//! - big-endian, fixed-width integers (no varints: the same value always
//!   takes the same bytes, which keeps ids stable across versions),
//! - enum variants as a `u32` index in declaration order,
//! - sequences and byte strings prefixed with a `u64` length,
//! - trailing bytes rejected, total size capped at [`MAX_ENCODED_SIZE`].
//!
//! Do not reorder struct fields or enum variants. Doing so changes every
//! transaction id on the chain.

use bincode::Options;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::config::MAX_ENCODED_SIZE;

/// Encoding or decoding failure.
#[derive(Debug, thiserror::Error)]
#[error("codec error: {0}")]
pub struct CodecError(String);

fn options() -> impl Options {
    bincode::DefaultOptions::new()
        .with_big_endian()
        .with_fixint_encoding()
        .with_limit(MAX_ENCODED_SIZE)
}

/// Encodes `value` canonically.
pub fn encode<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>, CodecError> {
    options()
        .serialize(value)
        .map_err(|e| CodecError(e.to_string()))
}

/// Decodes a value, rejecting trailing bytes.
pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, CodecError> {
    options()
        .deserialize(bytes)
        .map_err(|e| CodecError(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Sample {
        a: u64,
        b: Vec<u8>,
    }

    #[test]
    fn integers_are_big_endian_fixed_width() {
        let bytes = encode(&1u64).unwrap();
        assert_eq!(bytes, vec![0, 0, 0, 0, 0, 0, 0, 1]);
    }

    #[test]
    fn rejects_trailing_bytes() {
        let mut bytes = encode(&Sample { a: 1, b: vec![2, 3] }).unwrap();
        bytes.push(0);
        assert!(decode::<Sample>(&bytes).is_err());
    }

    #[test]
    fn rejects_oversized_length_prefix() {
        // A length prefix claiming u64::MAX elements must not allocate.
        let mut bytes = 0u64.to_be_bytes().to_vec();
        bytes.extend_from_slice(&u64::MAX.to_be_bytes());
        assert!(decode::<Sample>(&bytes).is_err());
    }
}
