//! `BiometricVault`: the caller-facing composition of key store, derivation,
//! sealing, and audit
//!
//! Every payload/file operation holds a read guard on `key_ops` for the whole
//! derive + cipher sequence; rotation takes the write guard, so no operation
//! can straddle two master secrets.

use std::num::NonZeroU32;
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard};

use bioseal_core::config::BiosealConfig;
use bioseal_core::types::{KeyContext, Operation, Severity};
use bioseal_core::{BiosealError, BiosealResult};

use crate::aead::{self, EncryptedBlob};
use crate::audit::{AuditRecord, AuditTrail};
use crate::file;
use crate::fsutil;
use crate::kdf::KeyDerivationService;
use crate::master::{IntegrityStatus, MasterKeyStore};

#[derive(Debug)]
pub struct BiometricVault {
    store: Arc<MasterKeyStore>,
    kdf: KeyDerivationService,
    audit: Arc<AuditTrail>,
    image_dir: PathBuf,
    key_ops: RwLock<()>,
}

impl BiometricVault {
    /// Build a vault from validated configuration.
    pub fn open(config: &BiosealConfig) -> BiosealResult<Self> {
        config.validate()?;
        let iterations = NonZeroU32::new(config.keys.kdf_iterations).ok_or_else(|| {
            BiosealError::Config("keys.kdf_iterations must be non-zero".into())
        })?;

        let audit = Arc::new(AuditTrail::from_config(&config.audit));
        let store = Arc::new(MasterKeyStore::new(
            &config.keys.master_secret_path,
            audit.clone(),
        ));
        let kdf =
            KeyDerivationService::new(store.clone(), audit.clone()).with_iterations(iterations);

        Ok(Self::new(store, kdf, audit, &config.storage.image_dir))
    }

    /// Assemble a vault from already-constructed parts. `kdf` must draw from
    /// `store`.
    pub fn new(
        store: Arc<MasterKeyStore>,
        kdf: KeyDerivationService,
        audit: Arc<AuditTrail>,
        image_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            store,
            kdf,
            audit,
            image_dir: image_dir.into(),
            key_ops: RwLock::new(()),
        }
    }

    pub fn store(&self) -> &MasterKeyStore {
        &self.store
    }

    pub fn audit(&self) -> &AuditTrail {
        &self.audit
    }

    pub fn image_dir(&self) -> &Path {
        &self.image_dir
    }

    /// Secure the key, audit, and image directories and make sure a master
    /// secret exists. Safe to run repeatedly.
    pub fn initialize(&self) -> BiosealResult<()> {
        let _guard = self.read_guard();

        for path in [self.store.path(), self.audit.path()] {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                fsutil::secure_directory(parent).map_err(|e| {
                    BiosealError::storage(format!("securing {}", parent.display()), e)
                })?;
            }
        }
        self.secure_image_directory()?;
        self.store.get_or_create_master_secret()?;

        tracing::info!(
            master_secret = %self.store.path().display(),
            audit_log = %self.audit.path().display(),
            image_dir = %self.image_dir.display(),
            "biometric vault initialized"
        );
        Ok(())
    }

    pub fn secure_image_directory(&self) -> BiosealResult<()> {
        fsutil::secure_directory(&self.image_dir).map_err(|e| {
            BiosealError::storage(format!("securing {}", self.image_dir.display()), e)
        })
    }

    pub fn encrypt(
        &self,
        purpose: &str,
        subject: &str,
        plaintext: &[u8],
    ) -> BiosealResult<EncryptedBlob> {
        let context = KeyContext::new(purpose, subject);
        let _guard = self.read_guard();

        let result = self
            .kdf
            .derive(&context)
            .and_then(|key| aead::encrypt(plaintext, &key));

        self.audit_outcome(
            &context,
            AuditRecord::new(Operation::PayloadEncrypted).detail("bytes", plaintext.len()),
            result.as_ref().err(),
        );
        result
    }

    /// Decrypt a blob sealed under the same `(purpose, subject)`.
    ///
    /// A wrong context, a rotated master secret, and tampering all surface as
    /// [`BiosealError::IntegrityViolation`] and are audited as critical.
    pub fn decrypt(
        &self,
        purpose: &str,
        subject: &str,
        blob: &EncryptedBlob,
    ) -> BiosealResult<Vec<u8>> {
        let context = KeyContext::new(purpose, subject);
        let _guard = self.read_guard();

        let result = self
            .kdf
            .derive(&context)
            .and_then(|key| aead::decrypt(blob, &key));

        self.audit_outcome(
            &context,
            AuditRecord::new(Operation::PayloadDecrypted).detail("bytes", blob.ciphertext.len()),
            result.as_ref().err(),
        );
        result
    }

    /// Seal the image at `path` as `<path>.enc` and wipe the original.
    pub fn encrypt_file(
        &self,
        purpose: &str,
        subject: &str,
        path: &Path,
    ) -> BiosealResult<PathBuf> {
        let context = KeyContext::new(purpose, subject);
        let _guard = self.read_guard();
        let replaced = file::encrypted_path(path).exists();

        let result = self
            .kdf
            .derive(&context)
            .and_then(|key| file::encrypt_file(path, &key));

        self.audit_outcome(
            &context,
            AuditRecord::new(Operation::FileEncrypted)
                .detail("path", path.display())
                .detail("replaced", replaced),
            result.as_ref().err(),
        );
        result
    }

    pub fn decrypt_file(
        &self,
        purpose: &str,
        subject: &str,
        path: &Path,
    ) -> BiosealResult<Vec<u8>> {
        let context = KeyContext::new(purpose, subject);
        let _guard = self.read_guard();

        let result = self
            .kdf
            .derive(&context)
            .and_then(|key| file::decrypt_file(path, &key));

        self.audit_outcome(
            &context,
            AuditRecord::new(Operation::FileDecrypted).detail("path", path.display()),
            result.as_ref().err(),
        );
        result
    }

    /// Replace the master secret, waiting for in-flight operations to finish.
    ///
    /// Returns the backup path of the archived secret, if one existed. Data
    /// sealed before rotation is not re-encrypted and can no longer be opened
    /// through this vault.
    pub fn rotate_master_secret(&self) -> BiosealResult<Option<PathBuf>> {
        let _guard = self.key_ops.write().unwrap_or_else(PoisonError::into_inner);
        let (_secret, backup) = self.store.rotate_archived()?;
        Ok(backup)
    }

    pub fn verify_integrity(&self) -> bool {
        self.store.verify_integrity()
    }

    pub fn inspect_integrity(&self) -> IntegrityStatus {
        self.store.inspect()
    }

    pub fn forget_cached_secret(&self) {
        let _guard = self.key_ops.write().unwrap_or_else(PoisonError::into_inner);
        self.store.clear_cache();
    }

    fn read_guard(&self) -> RwLockReadGuard<'_, ()> {
        self.key_ops.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn audit_outcome(&self, context: &KeyContext, record: AuditRecord, error: Option<&BiosealError>) {
        let operation = record.operation;
        let record = record
            .detail("purpose", &context.purpose)
            .detail("subject", &context.subject);

        let record = match error {
            None => record.detail("outcome", "ok"),
            Some(e) if e.is_security_event() => {
                tracing::warn!(%operation, %context, "security event: {e}");
                record.severity(Severity::Critical).detail("outcome", e.kind())
            }
            Some(e) => {
                tracing::warn!(%operation, %context, "operation failed: {e}");
                record.severity(Severity::Warning).detail("outcome", e.kind())
            }
        };
        self.audit.append(record);
    }
}
