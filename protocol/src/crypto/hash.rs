//! # Hashing Utilities
//!
//! Two hash functions, two jobs:
//!
//! - **keccak256** names content. A value's content key is its keccak256
//!   digest, and account addresses are the tail of the keccak256 of a public
//!   key. Clients in the Ethereum tooling ecosystem can compute both without
//!   linking anything exotic.
//!
//! - **BLAKE3** names chain objects. Block ids and transaction ids are the
//!   BLAKE3 digest of their canonical bytes. Nobody outside the node needs to
//!   recompute them from scratch, so we take the fast one.

use sha3::{Digest, Keccak256};

use crate::types::ContentKey;

/// Keccak-256 (the pre-standard SHA-3 variant used by Ethereum).
pub fn keccak256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Keccak256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// Keccak-256 over the concatenation of `parts`, without allocating the
/// concatenation.
pub fn keccak256_concat(parts: &[&[u8]]) -> [u8; 32] {
    let mut hasher = Keccak256::new();
    for part in parts {
        hasher.update(part);
    }
    hasher.finalize().into()
}

/// BLAKE3 digest as a fixed-size array.
pub fn blake3_hash(data: &[u8]) -> [u8; 32] {
    *blake3::hash(data).as_bytes()
}

/// The content key under which `value` is stored.
pub fn value_hash(value: &[u8]) -> ContentKey {
    ContentKey(keccak256(value))
}
