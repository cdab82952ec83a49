//! SHA-256 fingerprints for equality checks and file-naming tokens
//!
//! Fingerprints are integrity markers, not secrets, so comparison is a plain
//! byte comparison.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// 256-bit SHA-256 digest of a plaintext value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct IntegrityHash([u8; 32]);

impl IntegrityHash {
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Parse 64 hex characters; anything else yields `None`.
    pub fn from_hex(s: &str) -> Option<Self> {
        let mut bytes = [0u8; 32];
        hex::decode_to_slice(s.trim(), &mut bytes).ok()?;
        Some(Self(bytes))
    }
}

impl fmt::Display for IntegrityHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl From<IntegrityHash> for String {
    fn from(hash: IntegrityHash) -> Self {
        hash.to_hex()
    }
}

impl TryFrom<String> for IntegrityHash {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::from_hex(&s).ok_or_else(|| format!("invalid SHA-256 hex digest: {s:?}"))
    }
}

pub fn fingerprint(value: &[u8]) -> IntegrityHash {
    IntegrityHash(Sha256::digest(value).into())
}

pub fn verify(value: &[u8], expected: &IntegrityHash) -> bool {
    fingerprint(value) == *expected
}

/// Compare against a hex digest. Malformed or wrong-length input is a
/// mismatch, never an error.
pub fn verify_hex(value: &[u8], expected_hex: &str) -> bool {
    IntegrityHash::from_hex(expected_hex).is_some_and(|expected| verify(value, &expected))
}

/// Deterministic, non-reversible token for naming stored files.
pub fn naming_token(value: &[u8]) -> String {
    fingerprint(value).to_hex()
}
