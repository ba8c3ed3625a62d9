//! # Key Management
//!
//! Ed25519 keypairs and the signature envelope that lets the chain
//! "recover" a signer address from a signature.
//!
//! Ed25519 has no public-key recovery, so the envelope carries the public
//! key next to the signature:
//!
//! ```text
//! +----------------------+----------------------------------+
//! | public key (32 B)    | ed25519 signature (64 B)         |
//! +----------------------+----------------------------------+
//! ```
//!
//! Recovery is "verify the signature under the embedded key, then derive
//! the address from that key". A forged envelope fails verification; a
//! valid one can only name the key that produced it.
//!
//! ## Security considerations
//!
//! - Verification uses `verify_strict`, which rejects small-order keys and
//!   non-canonical signatures. Malleable signatures would otherwise give a
//!   single intent several transaction ids.
//! - Key bytes are never logged. `Debug` prints the address only.

use ed25519_dalek::{Signature as DalekSignature, Signer, SigningKey, VerifyingKey};
use rand::rngs::OsRng;
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use thiserror::Error;

use super::hash::keccak256;
use crate::types::Address;

/// Public key bytes at the front of the envelope.
pub const PUBLIC_KEY_LENGTH: usize = 32;

/// Raw Ed25519 signature length.
pub const RAW_SIGNATURE_LENGTH: usize = 64;

/// Full envelope length: public key followed by signature.
pub const SIGNATURE_LENGTH: usize = PUBLIC_KEY_LENGTH + RAW_SIGNATURE_LENGTH;

/// Errors that can occur during key operations.
#[derive(Debug, Error)]
pub enum KeyError {
    #[error("invalid secret key bytes")]
    InvalidSecretKey,

    #[error("invalid public key bytes: not a valid Ed25519 point")]
    InvalidPublicKey,

    #[error("signature envelope must be {SIGNATURE_LENGTH} bytes, got {0}")]
    InvalidLength(usize),

    #[error("signature does not verify against the embedded public key")]
    VerificationFailed,
}

/// Derives the account address owned by an Ed25519 public key.
pub fn address_from_public_key(public_key: &[u8; PUBLIC_KEY_LENGTH]) -> Address {
    let digest = keccak256(public_key);
    let mut out = [0u8; 20];
    out.copy_from_slice(&digest[12..]);
    Address(out)
}

/// An Ed25519 keypair. Signs transaction digests.
///
/// Intentionally not `Serialize`: exporting secret material should be a
/// deliberate call to [`Keypair::secret_key_bytes`].
pub struct Keypair {
    signing_key: SigningKey,
}

impl Keypair {
    /// Fresh keypair from the OS RNG.
    pub fn generate() -> Self {
        Self {
            signing_key: SigningKey::generate(&mut OsRng),
        }
    }

    /// Deterministic keypair from a 32-byte seed. Test fixtures and key
    /// files use this.
    pub fn from_seed(seed: &[u8; 32]) -> Self {
        Self {
            signing_key: SigningKey::from_bytes(seed),
        }
    }

    /// Loads a keypair from a hex-encoded 32-byte secret.
    pub fn from_hex(hex_str: &str) -> Result<Self, KeyError> {
        let trimmed = hex_str.trim().trim_start_matches("0x");
        let bytes = hex::decode(trimmed).map_err(|_| KeyError::InvalidSecretKey)?;
        let seed: [u8; 32] = bytes
            .as_slice()
            .try_into()
            .map_err(|_| KeyError::InvalidSecretKey)?;
        Ok(Self::from_seed(&seed))
    }

    pub fn public_key_bytes(&self) -> [u8; PUBLIC_KEY_LENGTH] {
        self.signing_key.verifying_key().to_bytes()
    }

    /// The address this key controls.
    pub fn address(&self) -> Address {
        address_from_public_key(&self.public_key_bytes())
    }

    /// Exports the raw secret. Handle with care.
    pub fn secret_key_bytes(&self) -> [u8; 32] {
        self.signing_key.to_bytes()
    }

    /// Signs a 32-byte digest and wraps the result in an envelope.
    pub fn sign_digest(&self, digest: &[u8; 32]) -> Signature {
        let sig = self.signing_key.sign(digest);
        let mut bytes = Vec::with_capacity(SIGNATURE_LENGTH);
        bytes.extend_from_slice(&self.public_key_bytes());
        bytes.extend_from_slice(&sig.to_bytes());
        Signature(bytes)
    }
}

impl Clone for Keypair {
    fn clone(&self) -> Self {
        Self::from_seed(&self.signing_key.to_bytes())
    }
}

impl fmt::Debug for Keypair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Keypair(address={})", self.address())
    }
}

/// Signature envelope: public key followed by the Ed25519 signature.
///
/// Stored as `Vec<u8>` so a malformed envelope off the wire still decodes;
/// the length is checked by [`Signature::recover`].
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Signature(Vec<u8>);

impl Signature {
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        format!("0x{}", hex::encode(&self.0))
    }

    pub fn from_hex(s: &str) -> Result<Self, hex::FromHexError> {
        hex::decode(s.trim_start_matches("0x")).map(Self)
    }

    /// Verifies the envelope over `digest` and returns the signer address.
    pub fn recover(&self, digest: &[u8; 32]) -> Result<Address, KeyError> {
        if self.0.len() != SIGNATURE_LENGTH {
            return Err(KeyError::InvalidLength(self.0.len()));
        }
        let (pk, sig) = self.0.split_at(PUBLIC_KEY_LENGTH);

        let mut pk_bytes = [0u8; PUBLIC_KEY_LENGTH];
        pk_bytes.copy_from_slice(pk);
        let verifying_key =
            VerifyingKey::from_bytes(&pk_bytes).map_err(|_| KeyError::InvalidPublicKey)?;

        let mut sig_bytes = [0u8; RAW_SIGNATURE_LENGTH];
        sig_bytes.copy_from_slice(sig);
        let signature = DalekSignature::from_bytes(&sig_bytes);

        verifying_key
            .verify_strict(digest, &signature)
            .map_err(|_| KeyError::VerificationFailed)?;

        Ok(address_from_public_key(&pk_bytes))
    }
}

impl fmt::Debug for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Signature({})", self.to_hex())
    }
}

impl Serialize for Signature {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        if serializer.is_human_readable() {
            serializer.serialize_str(&self.to_hex())
        } else {
            serializer.serialize_bytes(&self.0)
        }
    }
}

impl<'de> Deserialize<'de> for Signature {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        if deserializer.is_human_readable() {
            let s = String::deserialize(deserializer)?;
            Self::from_hex(&s).map_err(de::Error::custom)
        } else {
            Vec::<u8>::deserialize(deserializer).map(Self)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sign_and_recover() {
        let kp = Keypair::from_seed(&[7u8; 32]);
        let digest = keccak256(b"set 1KiB of bytes");
        let sig = kp.sign_digest(&digest);

        assert_eq!(sig.as_bytes().len(), SIGNATURE_LENGTH);
        assert_eq!(sig.recover(&digest).unwrap(), kp.address());
    }

    #[test]
    fn recover_rejects_other_digest() {
        let kp = Keypair::generate();
        let sig = kp.sign_digest(&keccak256(b"a"));
        assert!(matches!(
            sig.recover(&keccak256(b"b")),
            Err(KeyError::VerificationFailed)
        ));
    }

    #[test]
    fn recover_rejects_swapped_public_key() {
        let alice = Keypair::from_seed(&[1u8; 32]);
        let mallory = Keypair::from_seed(&[2u8; 32]);
        let digest = keccak256(b"transfer");

        let mut forged = mallory.public_key_bytes().to_vec();
        forged.extend_from_slice(&alice.sign_digest(&digest).as_bytes()[PUBLIC_KEY_LENGTH..]);

        assert!(Signature::from_bytes(forged).recover(&digest).is_err());
    }

    #[test]
    fn recover_rejects_short_envelope() {
        let sig = Signature::from_bytes(vec![0u8; 10]);
        assert!(matches!(
            sig.recover(&[0u8; 32]),
            Err(KeyError::InvalidLength(10))
        ));
    }

    #[test]
    fn seeded_keys_are_deterministic() {
        let a = Keypair::from_seed(&[9u8; 32]);
        let b = Keypair::from_hex(&hex::encode([9u8; 32])).unwrap();
        assert_eq!(a.address(), b.address());
        assert_eq!(a.clone().secret_key_bytes(), a.secret_key_bytes());
    }

    #[test]
    fn debug_does_not_leak_secret() {
        let kp = Keypair::from_seed(&[0xaa; 32]);
        let dbg = format!("{:?}", kp);
        assert!(!dbg.contains(&hex::encode([0xaa; 32])));
    }
}
