//! Working-key derivation: master secret + (purpose, subject) → PBKDF2 key

use pbkdf2::pbkdf2_hmac;
use sha2::{Digest, Sha256};
use std::num::NonZeroU32;
use std::sync::Arc;
use zeroize::{Zeroize, ZeroizeOnDrop};

use bioseal_core::config::MIN_KDF_ITERATIONS;
use bioseal_core::types::{KeyContext, Operation};
use bioseal_core::BiosealResult;

use crate::audit::{AuditRecord, AuditTrail};
use crate::master::{MasterKeyStore, MasterSecret};
use crate::KEY_SIZE;

/// A context-bound 256-bit key. Exists only for the duration of one
/// encrypt/decrypt call; zeroized on drop and never logged.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct WorkingKey {
    bytes: [u8; KEY_SIZE],
}

impl WorkingKey {
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self { bytes }
    }

    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.bytes
    }
}

impl std::fmt::Debug for WorkingKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkingKey")
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

/// `SHA-256(purpose ":" subject)`
pub fn derivation_salt(context: &KeyContext) -> [u8; 32] {
    Sha256::digest(context.salt_input().as_bytes()).into()
}

/// PBKDF2-HMAC-SHA256 over the master secret with the context salt.
///
/// Pure and deterministic: the same secret, context, and iteration count
/// always produce the same key.
pub fn derive_from_secret(
    secret: &MasterSecret,
    context: &KeyContext,
    iterations: NonZeroU32,
) -> WorkingKey {
    let salt = derivation_salt(context);
    let mut key = [0u8; KEY_SIZE];
    pbkdf2_hmac::<Sha256>(secret.as_bytes(), &salt, iterations.get(), &mut key);
    WorkingKey::from_bytes(key)
}

/// Derives working keys on demand; never stores them.
#[derive(Debug, Clone)]
pub struct KeyDerivationService {
    store: Arc<MasterKeyStore>,
    audit: Arc<AuditTrail>,
    iterations: NonZeroU32,
}

impl KeyDerivationService {
    pub fn new(store: Arc<MasterKeyStore>, audit: Arc<AuditTrail>) -> Self {
        Self {
            store,
            audit,
            iterations: NonZeroU32::new(MIN_KDF_ITERATIONS).unwrap_or(NonZeroU32::MIN),
        }
    }

    /// Override the PBKDF2 cost. Keys are only reproducible under the same
    /// count, so this must match whatever count encrypted the data.
    pub fn with_iterations(mut self, iterations: NonZeroU32) -> Self {
        self.iterations = iterations;
        self
    }

    pub fn iterations(&self) -> u32 {
        self.iterations.get()
    }

    /// Derive the key for `(purpose, subject)`.
    ///
    /// Inputs are opaque; only a master-secret storage failure can fail this.
    pub fn derive_working_key(&self, purpose: &str, subject: &str) -> BiosealResult<WorkingKey> {
        self.derive(&KeyContext::new(purpose, subject))
    }

    pub fn derive(&self, context: &KeyContext) -> BiosealResult<WorkingKey> {
        let secret = self.store.get_or_create_master_secret()?;
        let key = derive_from_secret(&secret, context, self.iterations);

        tracing::debug!(purpose = %context.purpose, subject = %context.subject, "working key derived");
        self.audit.append(
            AuditRecord::new(Operation::KeyDerived)
                .detail("purpose", &context.purpose)
                .detail("subject", &context.subject)
                .detail("iterations", self.iterations),
        );
        Ok(key)
    }
}
