//! # Fixed-Width Identifiers
//!
//! Block ids, transaction ids, content keys and account addresses are all
//! plain byte arrays. They get their own types so the compiler stops us from
//! handing a content key to something expecting a transaction id, which is
//! exactly the kind of bug that survives code review.
//!
//! ## Serialization
//!
//! - Human-readable formats (JSON genesis files, API payloads): `0x`-prefixed
//!   lowercase hex strings.
//! - The canonical binary codec: raw fixed-width bytes, no length prefix.

use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// Failure to parse an identifier from hex or a byte slice.
#[derive(Debug, thiserror::Error)]
pub enum ParseIdError {
    #[error("invalid hex: {0}")]
    Hex(#[from] hex::FromHexError),

    #[error("expected {expected} bytes, got {got}")]
    Length { expected: usize, got: usize },
}

macro_rules! fixed_bytes {
    ($(#[$meta:meta])* $name:ident, $len:expr) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(pub [u8; $len]);

        impl $name {
            /// Width in bytes.
            pub const LEN: usize = $len;

            /// The all-zero value, used as a sentinel.
            pub const fn zero() -> Self {
                Self([0u8; $len])
            }

            pub fn is_zero(&self) -> bool {
                self.0 == [0u8; $len]
            }

            pub fn as_bytes(&self) -> &[u8; $len] {
                &self.0
            }

            /// Copies a slice of exactly the right width.
            pub fn from_slice(slice: &[u8]) -> Result<Self, ParseIdError> {
                let bytes: [u8; $len] = slice.try_into().map_err(|_| ParseIdError::Length {
                    expected: $len,
                    got: slice.len(),
                })?;
                Ok(Self(bytes))
            }

            /// `0x`-prefixed lowercase hex.
            pub fn to_hex(&self) -> String {
                format!("0x{}", hex::encode(self.0))
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.to_hex())
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), self.to_hex())
            }
        }

        impl FromStr for $name {
            type Err = ParseIdError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let trimmed = s
                    .strip_prefix("0x")
                    .or_else(|| s.strip_prefix("0X"))
                    .unwrap_or(s);
                Self::from_slice(&hex::decode(trimmed)?)
            }
        }

        impl AsRef<[u8]> for $name {
            fn as_ref(&self) -> &[u8] {
                &self.0
            }
        }

        impl From<[u8; $len]> for $name {
            fn from(bytes: [u8; $len]) -> Self {
                Self(bytes)
            }
        }

        impl Serialize for $name {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                if serializer.is_human_readable() {
                    serializer.serialize_str(&self.to_hex())
                } else {
                    self.0.serialize(serializer)
                }
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                if deserializer.is_human_readable() {
                    let s = String::deserialize(deserializer)?;
                    s.parse().map_err(de::Error::custom)
                } else {
                    <[u8; $len]>::deserialize(deserializer).map(Self)
                }
            }
        }
    };
}

fixed_bytes!(
    /// A 32-byte identifier: the BLAKE3 hash of a block's or transaction's
    /// canonical bytes.
    Id,
    32
);

fixed_bytes!(
    /// Content key of a stored value: keccak256 of the value bytes.
    ContentKey,
    32
);

fixed_bytes!(
    /// Account address: the last 20 bytes of keccak256 of the signer's
    /// Ed25519 public key.
    Address,
    20
);

/// Identity of a block.
pub type BlockId = Id;

/// Identity of a signed transaction.
pub type TxId = Id;

/// Serde adapter for byte payloads: hex in JSON, length-prefixed raw bytes
/// in the binary codec.
pub mod hex_bytes {
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        if serializer.is_human_readable() {
            serializer.serialize_str(&format!("0x{}", hex::encode(bytes)))
        } else {
            serializer.serialize_bytes(bytes)
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        if deserializer.is_human_readable() {
            let s = String::deserialize(deserializer)?;
            let trimmed = s.strip_prefix("0x").unwrap_or(&s);
            hex::decode(trimmed).map_err(de::Error::custom)
        } else {
            Vec::<u8>::deserialize(deserializer)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_round_trip() {
        let id = Id([0xab; 32]);
        let parsed: Id = id.to_hex().parse().unwrap();
        assert_eq!(parsed, id);
        assert!(id.to_hex().starts_with("0xabab"));
    }

    #[test]
    fn parse_accepts_missing_prefix_and_upper_case() {
        let addr: Address = "0XDEADBEEFDEADBEEFDEADBEEFDEADBEEFDEADBEEF".parse().unwrap();
        let bare: Address = "deadbeefdeadbeefdeadbeefdeadbeefdeadbeef".parse().unwrap();
        assert_eq!(addr, bare);
    }

    #[test]
    fn parse_rejects_wrong_width() {
        let err = "0x0102".parse::<Address>().unwrap_err();
        assert!(matches!(err, ParseIdError::Length { expected: 20, got: 2 }));
    }

    #[test]
    fn json_uses_hex_strings() {
        let key = ContentKey([1u8; 32]);
        let json = serde_json::to_string(&key).unwrap();
        assert_eq!(json, format!("\"{}\"", key.to_hex()));
        let back: ContentKey = serde_json::from_str(&json).unwrap();
        assert_eq!(back, key);
    }

    #[test]
    fn zero_sentinel() {
        assert!(ContentKey::zero().is_zero());
        assert!(!ContentKey([1u8; 32]).is_zero());
    }
}
