//! # Cryptographic Primitives
//!
//! Thin wrappers over audited implementations:
//!
//! - **keccak256** (`sha3`) for content keys and addresses.
//! - **BLAKE3** for block and transaction ids.
//! - **Ed25519** (`ed25519-dalek`) for transaction signatures.

pub mod hash;
pub mod keys;

pub use hash::{blake3_hash, keccak256, keccak256_concat, value_hash};
pub use keys::{address_from_public_key, KeyError, Keypair, Signature};
