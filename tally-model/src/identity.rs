//! Keys, parties, and signatures
//!
//! A [`KeyPair`] is an Ed25519 signing identity:
//! - Private key: stored locally (never shared)
//! - Public key: identifies the signer on the wire (32 bytes)
//!
//! A [`Party`] binds a legal name to an owning public key. A
//! [`PartySignature`] is a signature that additionally carries the signer's
//! party, for counterparties that must know *who* signed, not just which key.

use crate::crypto::{verify_signature, CryptoError};
use crate::types::{PubKey, SigBytes};
use ed25519_dalek::{Signer, SigningKey};
use rand::rngs::OsRng;
use std::collections::HashMap;
use std::fs;
use std::io::{self, Write};
use std::path::Path;
use thiserror::Error;

/// Errors from key storage operations.
#[derive(Error, Debug)]
pub enum KeyError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("invalid key length: expected 32 bytes, got {0}")]
    InvalidKeyLength(usize),
}

/// An Ed25519 signing identity.
#[derive(Clone)]
pub struct KeyPair {
    signing_key: SigningKey,
}

impl KeyPair {
    /// Generate a new random keypair.
    pub fn generate() -> Self {
        let signing_key = SigningKey::generate(&mut OsRng);
        Self { signing_key }
    }

    /// Load a keypair from a key file, or generate and save if it doesn't exist.
    pub fn load_or_generate(path: impl AsRef<Path>) -> Result<Self, KeyError> {
        let path = path.as_ref();
        if path.exists() {
            Self::load(path)
        } else {
            let kp = Self::generate();
            kp.save(path)?;
            Ok(kp)
        }
    }

    /// Load a keypair from a key file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, KeyError> {
        use zeroize::Zeroizing;

        // Read into a Zeroizing wrapper so heap memory is wiped
        let bytes = Zeroizing::new(fs::read(path)?);

        if bytes.len() != 32 {
            return Err(KeyError::InvalidKeyLength(bytes.len()));
        }

        let mut key_bytes = Zeroizing::new([0u8; 32]);
        key_bytes.copy_from_slice(&bytes);

        let signing_key = SigningKey::from_bytes(&key_bytes);
        Ok(Self { signing_key })
    }

    /// Save the private key to a file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), KeyError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut file = fs::File::create(path)?;
        file.write_all(self.signing_key.as_bytes())?;
        Ok(())
    }

    /// The public half, used as the signer's identity on the wire.
    pub fn public_key(&self) -> PubKey {
        PubKey::from(self.signing_key.verifying_key().to_bytes())
    }

    /// Sign a message.
    pub fn sign(&self, message: &[u8]) -> DigitalSignature {
        let sig = self.signing_key.sign(message);
        DigitalSignature {
            by: self.public_key(),
            bytes: SigBytes::from(sig.to_bytes()),
        }
    }
}

impl std::fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyPair")
            .field("public_key", &self.public_key())
            .finish_non_exhaustive()
    }
}

/// A signature together with the public key that produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DigitalSignature {
    pub by: PubKey,
    pub bytes: SigBytes,
}

impl DigitalSignature {
    /// Verify this signature over the given message.
    pub fn verify(&self, message: &[u8]) -> Result<(), CryptoError> {
        verify_signature(&self.by, message, &self.bytes)
    }
}

/// A legal entity: a name bound to an owning public key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Party {
    pub name: String,
    pub owning_key: PubKey,
}

impl Party {
    pub fn new(name: impl Into<String>, owning_key: PubKey) -> Self {
        Self { name: name.into(), owning_key }
    }
}

impl std::fmt::Display for Party {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name)
    }
}

/// A legally-identifiable signature: carries the signer's [`Party`].
///
/// Only constructible when the signature's key equals the party's owning key;
/// a mismatch is a caller bug, not a runtime condition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartySignature {
    party: Party,
    sig: DigitalSignature,
}

impl PartySignature {
    /// Bind a signature to the party that produced it.
    ///
    /// # Panics
    ///
    /// Panics if `sig.by` is not `party.owning_key`.
    pub fn new(party: Party, sig: DigitalSignature) -> Self {
        assert_eq!(
            sig.by, party.owning_key,
            "signature key does not belong to party {}",
            party.name
        );
        Self { party, sig }
    }

    pub fn party(&self) -> &Party {
        &self.party
    }

    pub fn signature(&self) -> &DigitalSignature {
        &self.sig
    }

    /// Verify this signature over the given message.
    pub fn verify(&self, message: &[u8]) -> Result<(), CryptoError> {
        self.sig.verify(message)
    }
}

/// Best-effort map from public keys to known legal identities.
///
/// Transactions signed by keys with no known identity still pass
/// verification; the signer is simply recorded by key alone.
#[derive(Debug, Clone, Default)]
pub struct IdentityMap {
    parties: HashMap<PubKey, Party>,
}

impl IdentityMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, party: Party) {
        self.parties.insert(party.owning_key, party);
    }

    pub fn lookup(&self, key: &PubKey) -> Option<&Party> {
        self.parties.get(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keypair_save_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("identity.key");
        let kp = KeyPair::generate();
        kp.save(&path).unwrap();
        let loaded = KeyPair::load(&path).unwrap();
        assert_eq!(kp.public_key(), loaded.public_key());
    }

    #[test]
    fn load_or_generate_is_stable() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("identity.key");
        let first = KeyPair::load_or_generate(&path).unwrap();
        let second = KeyPair::load_or_generate(&path).unwrap();
        assert_eq!(first.public_key(), second.public_key());
    }

    #[test]
    fn party_signature_requires_owning_key() {
        let kp = KeyPair::generate();
        let party = Party::new("Mini Corp", kp.public_key());
        let sig = kp.sign(b"payload");
        let ps = PartySignature::new(party, sig);
        assert!(ps.verify(b"payload").is_ok());
    }

    #[test]
    #[should_panic(expected = "does not belong to party")]
    fn party_signature_rejects_foreign_key() {
        let kp = KeyPair::generate();
        let other = KeyPair::generate();
        let party = Party::new("Mini Corp", other.public_key());
        let sig = kp.sign(b"payload");
        let _ = PartySignature::new(party, sig);
    }

    #[test]
    fn identity_map_is_best_effort() {
        let kp = KeyPair::generate();
        let mut map = IdentityMap::new();
        assert!(map.lookup(&kp.public_key()).is_none());
        map.register(Party::new("Alice", kp.public_key()));
        assert_eq!(map.lookup(&kp.public_key()).unwrap().name, "Alice");
    }
}
