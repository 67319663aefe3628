//! Centralized cryptographic operations for Tally.
//!
//! **All** Ed25519 signing, verification, and SHA-256 hashing go through this
//! module and [`crate::identity`]. One audit surface for cryptographic
//! correctness.
//!
//! # Primitives
//!
//! | Primitive   | Algorithm       | Purpose                                     |
//! |-------------|-----------------|---------------------------------------------|
//! | Hash        | SHA-256 (32 B)  | Transaction ids, attachment ids, contract ids |
//! | Signature   | Ed25519 (64 B)  | Command signing, timestamp witnessing       |

use crate::types::{PubKey, SecureHash, SigBytes};
use sha2::{Digest, Sha256};

/// Compute the SHA-256 content hash of arbitrary bytes.
///
/// Used for: transaction ids over canonical wire bytes, attachment ids,
/// contract code hashes.
#[inline]
pub fn sha256(data: &[u8]) -> SecureHash {
    let digest: [u8; 32] = Sha256::digest(data).into();
    SecureHash::Sha256(digest)
}

/// Verify an Ed25519 signature over a message.
///
/// Signature invalidity is a normal, propagated failure — never a panic.
pub fn verify_signature(
    pubkey: &PubKey,
    message: &[u8],
    signature: &SigBytes,
) -> Result<(), CryptoError> {
    use ed25519_dalek::Verifier;
    let vk = verifying_key(pubkey)?;
    let sig = ed25519_dalek::Signature::from_bytes(&signature.0);
    vk.verify(message, &sig)
        .map_err(|_| CryptoError::SignatureInvalid)
}

/// Deserialize a `PubKey` into an Ed25519 `VerifyingKey`.
///
/// Fails if the 32 bytes are not a valid curve point.
pub fn verifying_key(pubkey: &PubKey) -> Result<ed25519_dalek::VerifyingKey, CryptoError> {
    ed25519_dalek::VerifyingKey::from_bytes(&pubkey.0).map_err(|_| CryptoError::InvalidPublicKey)
}

/// Cryptographic operation error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CryptoError {
    #[error("invalid Ed25519 signature")]
    SignatureInvalid,

    #[error("invalid Ed25519 public key")]
    InvalidPublicKey,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::KeyPair;

    #[test]
    fn sha256_known_vector() {
        // SHA-256("abc")
        let h = sha256(b"abc");
        assert_eq!(
            format!("{}", h),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn sign_verify_round_trip() {
        let kp = KeyPair::generate();
        let sig = kp.sign(b"hello");
        assert!(verify_signature(&kp.public_key(), b"hello", &sig.bytes).is_ok());
        assert_eq!(
            verify_signature(&kp.public_key(), b"tampered", &sig.bytes),
            Err(CryptoError::SignatureInvalid)
        );
    }
}
