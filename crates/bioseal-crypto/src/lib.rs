//! bioseal-crypto: protection layer for biometric (face image) data
//!
//! Key hierarchy:
//! ```text
//! Master Secret (256-bit random, one file per deployment, mode 0600)
//!   └── Working Key (per purpose + subject, never persisted)
//!         salt = SHA-256(purpose ":" subject)
//!         key  = PBKDF2-HMAC-SHA256(master, salt, 100_000 iterations, 32 bytes)
//!         └── AES-256-GCM (nonce=random 128-bit)
//!               payloads: AAD="biometric-data"   image files: no AAD
//! ```
//!
//! Encrypted file format:
//! ```text
//! [16 bytes: nonce][16 bytes: GCM tag][N bytes: ciphertext]
//! ```
//!
//! Every key creation, rotation, derivation, and encrypt/decrypt call appends
//! exactly one JSON line to the audit trail.

pub mod aead;
pub mod audit;
pub mod file;
pub mod fingerprint;
pub mod fsutil;
pub mod kdf;
pub mod master;
pub mod vault;

pub use aead::{decrypt, encrypt, EncryptedBlob};
pub use audit::{AuditRecord, AuditTrail};
pub use file::{decrypt_file, encrypt_file};
pub use fingerprint::{fingerprint, verify, IntegrityHash};
pub use kdf::{KeyDerivationService, WorkingKey};
pub use master::{IntegrityStatus, MasterKeyStore, MasterSecret};
pub use vault::BiometricVault;

/// Size of the master secret and every working key in bytes (256-bit)
pub const KEY_SIZE: usize = 32;

/// Size of the AES-GCM nonce (128-bit)
pub const NONCE_SIZE: usize = 16;

/// Size of the GCM authentication tag
pub const TAG_SIZE: usize = 16;

/// Associated data bound to every in-memory payload
pub const AAD: &[u8] = b"biometric-data";

/// Suffix appended to an encrypted image's file name
pub const ENCRYPTED_SUFFIX: &str = ".enc";
