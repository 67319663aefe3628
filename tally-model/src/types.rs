//! Core value types
//!
//! The algorithm-tagged [`SecureHash`] that content-addresses transactions,
//! attachments, and contract code, plus the key and signature byte wrappers
//! the rest of the model builds on. Each carries exactly the conversions the
//! workspace needs; the canonical serializer ([`crate::wire`]) moves them as
//! raw bytes, so there is no serde surface here.

use std::fmt;

/// A cryptographic hash tagged with its algorithm.
///
/// Today only SHA-256 exists; the tag leaves room for future algorithms
/// without changing every call site that carries a hash around.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SecureHash {
    Sha256([u8; 32]),
}

impl SecureHash {
    pub const ZERO: SecureHash = SecureHash::Sha256([0u8; 32]);

    /// Returns the inner digest bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        match self {
            SecureHash::Sha256(bytes) => bytes,
        }
    }

    /// Wire tag for the algorithm, preserved by the canonical serializer.
    pub fn algorithm_tag(&self) -> u32 {
        match self {
            SecureHash::Sha256(_) => 1,
        }
    }

    /// Rebuild from a wire tag and digest bytes.
    pub fn from_tagged(tag: u32, bytes: &[u8]) -> Result<Self, String> {
        match tag {
            1 => {
                let arr: [u8; 32] = bytes
                    .try_into()
                    .map_err(|_| format!("expected 32 digest bytes, got {}", bytes.len()))?;
                Ok(SecureHash::Sha256(arr))
            }
            other => Err(format!("unknown hash algorithm tag {}", other)),
        }
    }

    /// Parse from a hex string (SHA-256 assumed, the only algorithm today).
    pub fn from_hex(hex_str: &str) -> Result<Self, String> {
        let bytes = hex::decode(hex_str).map_err(|e| format!("invalid hex: {}", e))?;
        let arr: [u8; 32] = bytes
            .try_into()
            .map_err(|v: Vec<u8>| format!("expected 64 hex characters, got {}", v.len() * 2))?;
        Ok(SecureHash::Sha256(arr))
    }

    /// Upper-case hex form, used for attachment file names on disk.
    pub fn to_upper_hex(&self) -> String {
        self.as_bytes().iter().map(|b| format!("{:02X}", b)).collect()
    }
}

impl AsRef<[u8]> for SecureHash {
    fn as_ref(&self) -> &[u8] {
        self.as_bytes()
    }
}

impl fmt::Display for SecureHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::LowerHex::fmt(self, f)
    }
}

impl fmt::LowerHex for SecureHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in self.as_bytes() {
            write!(f, "{:02x}", byte)?;
        }
        Ok(())
    }
}

impl fmt::Debug for SecureHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SecureHash(")?;
        fmt::Display::fmt(self, f)?;
        write!(f, ")")
    }
}

/// An Ed25519 public key in its role as ledger identity: the owner of a
/// state, a required signer of a command, or the key behind a [`Party`].
///
/// Orderable and hashable so signer sets and consumption maps can key on it.
///
/// [`Party`]: crate::identity::Party
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PubKey(pub [u8; 32]);

impl PubKey {
    /// Copy out for a wire message's bytes field.
    pub fn to_vec(&self) -> Vec<u8> {
        self.0.to_vec()
    }
}

impl From<[u8; 32]> for PubKey {
    fn from(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }
}

impl TryFrom<Vec<u8>> for PubKey {
    type Error = Vec<u8>;

    fn try_from(vec: Vec<u8>) -> Result<Self, Self::Error> {
        match <[u8; 32]>::try_from(vec.as_slice()) {
            Ok(arr) => Ok(Self(arr)),
            Err(_) => Err(vec),
        }
    }
}

// Keys turn up in contract rejections and traces constantly; eight hex
// chars identify one in context without drowning the message.
impl fmt::Display for PubKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0[..4] {
            write!(f, "{:02x}", byte)?;
        }
        write!(f, "…")
    }
}

impl fmt::Debug for PubKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PubKey(")?;
        for byte in &self.0 {
            write!(f, "{:02x}", byte)?;
        }
        write!(f, ")")
    }
}

/// Detached Ed25519 signature bytes.
///
/// Which key produced them travels alongside in
/// [`crate::identity::DigitalSignature`]; bare bytes are never verified on
/// their own.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct SigBytes(pub [u8; 64]);

impl SigBytes {
    /// Copy out for a wire message's bytes field.
    pub fn to_vec(&self) -> Vec<u8> {
        self.0.to_vec()
    }
}

impl From<[u8; 64]> for SigBytes {
    fn from(bytes: [u8; 64]) -> Self {
        Self(bytes)
    }
}

impl TryFrom<Vec<u8>> for SigBytes {
    type Error = Vec<u8>;

    fn try_from(vec: Vec<u8>) -> Result<Self, Self::Error> {
        match <[u8; 64]>::try_from(vec.as_slice()) {
            Ok(arr) => Ok(Self(arr)),
            Err(_) => Err(vec),
        }
    }
}

impl fmt::Debug for SigBytes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SigBytes(")?;
        for byte in &self.0[..4] {
            write!(f, "{:02x}", byte)?;
        }
        write!(f, "…)")
    }
}

// --- Tests ---
