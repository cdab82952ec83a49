//! Master key store: the single 256-bit root secret of a deployment
//!
//! The secret lives in one file (exactly 32 raw bytes, mode 0600). It is
//! created lazily on first use and only ever replaced by an explicit
//! [`MasterKeyStore::rotate`].

use rand::rngs::OsRng;
use rand::RngCore;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use zeroize::{Zeroize, ZeroizeOnDrop};

use bioseal_core::types::{Operation, Severity};
use bioseal_core::{BiosealError, BiosealResult};

use crate::audit::{AuditRecord, AuditTrail};
use crate::fsutil;
use crate::KEY_SIZE;

/// The deployment's root secret. Zeroized on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct MasterSecret {
    bytes: [u8; KEY_SIZE],
}

impl MasterSecret {
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self { bytes }
    }

    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.bytes
    }

    /// 256 bits from the operating system CSPRNG.
    pub fn generate() -> Self {
        let mut bytes = [0u8; KEY_SIZE];
        OsRng.fill_bytes(&mut bytes);
        Self { bytes }
    }
}

impl std::fmt::Debug for MasterSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MasterSecret")
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

/// Outcome of inspecting the persisted master secret
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IntegrityStatus {
    Healthy,
    Missing,
    WrongLength { actual: u64 },
    PermissionDrift { mode: u32 },
    Unreadable(String),
}

impl IntegrityStatus {
    pub fn is_healthy(&self) -> bool {
        matches!(self, IntegrityStatus::Healthy)
    }

    /// Convert to an error for callers that treat drift as fatal.
    pub fn into_result(self, path: &Path) -> BiosealResult<()> {
        match self {
            IntegrityStatus::Healthy => Ok(()),
            IntegrityStatus::Missing => Err(BiosealError::NotFound(path.to_path_buf())),
            IntegrityStatus::WrongLength { actual } => Err(BiosealError::StorageUnavailable(
                format!("master secret {} is {actual} bytes, expected {KEY_SIZE}", path.display()),
            )),
            IntegrityStatus::PermissionDrift { mode } => Err(BiosealError::PermissionDrift {
                path: path.to_path_buf(),
                mode,
            }),
            IntegrityStatus::Unreadable(e) => Err(BiosealError::storage(
                format!("master secret {}", path.display()),
                e,
            )),
        }
    }

    fn reason(&self) -> String {
        match self {
            IntegrityStatus::Healthy => "ok".into(),
            IntegrityStatus::Missing => "missing".into(),
            IntegrityStatus::WrongLength { actual } => format!("wrong_length:{actual}"),
            IntegrityStatus::PermissionDrift { mode } => format!("permission_drift:{mode:o}"),
            IntegrityStatus::Unreadable(e) => format!("unreadable:{e}"),
        }
    }
}

/// Owns the master secret file and an in-memory copy of it.
///
/// Constructed once per process and shared (`Arc`) with the derivation
/// service. Rotation must be serialized against every other key operation
/// by the caller; [`crate::BiometricVault`] does this.
#[derive(Debug)]
pub struct MasterKeyStore {
    path: PathBuf,
    audit: Arc<AuditTrail>,
    cached: Mutex<Option<MasterSecret>>,
}

impl MasterKeyStore {
    pub fn new(path: impl Into<PathBuf>, audit: Arc<AuditTrail>) -> Self {
        Self {
            path: path.into(),
            audit,
            cached: Mutex::new(None),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the persisted secret, creating it on first use.
    ///
    /// Creation publishes the new secret with an exclusive hard link, so when
    /// several processes start cold at once exactly one secret wins and the
    /// others load it. Storage failures are fatal: no fallback key exists.
    pub fn get_or_create_master_secret(&self) -> BiosealResult<MasterSecret> {
        let mut cached = self.cached.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(secret) = cached.as_ref() {
            return Ok(secret.clone());
        }

        let secret = match self.load()? {
            Some(secret) => {
                tracing::info!(path = %self.path.display(), "loaded biometric master secret");
                secret
            }
            None => self.create()?,
        };
        *cached = Some(secret.clone());
        Ok(secret)
    }

    /// Drop the in-memory copy; the next access re-reads the file.
    pub fn clear_cache(&self) {
        let mut cached = self.cached.lock().unwrap_or_else(PoisonError::into_inner);
        *cached = None;
        tracing::debug!("master secret cache cleared");
    }

    /// Check existence, exact length, and owner-only mode of the secret file.
    pub fn inspect(&self) -> IntegrityStatus {
        let meta = match std::fs::metadata(&self.path) {
            Ok(meta) => meta,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return IntegrityStatus::Missing,
            Err(e) => return IntegrityStatus::Unreadable(e.to_string()),
        };
        if meta.len() != KEY_SIZE as u64 {
            return IntegrityStatus::WrongLength { actual: meta.len() };
        }
        match fsutil::file_mode(&self.path) {
            Ok(mode) if mode & !fsutil::OWNER_ONLY_FILE != 0 => {
                IntegrityStatus::PermissionDrift { mode }
            }
            Ok(_) => IntegrityStatus::Healthy,
            Err(e) => IntegrityStatus::Unreadable(e.to_string()),
        }
    }

    /// Like [`inspect`](Self::inspect), reduced to a bool. Never errors;
    /// every violation is written to the audit trail at warning severity.
    pub fn verify_integrity(&self) -> bool {
        let status = self.inspect();
        let record = AuditRecord::new(Operation::IntegrityCheck)
            .detail("path", self.path.display())
            .detail("status", status.reason());

        if status.is_healthy() {
            self.audit.append(record);
            true
        } else {
            tracing::warn!(
                path = %self.path.display(),
                status = %status.reason(),
                "master secret integrity check failed"
            );
            self.audit.append(record.severity(Severity::Warning));
            false
        }
    }

    /// Archive the current secret and replace it with a fresh one.
    ///
    /// Existing encrypted blobs are NOT re-encrypted. Their working keys
    /// derive from the archived secret, so they stay decryptable only by
    /// restoring that backup.
    pub fn rotate(&self) -> BiosealResult<MasterSecret> {
        self.rotate_archived().map(|(secret, _)| secret)
    }

    /// Rotate and write exactly one `master_secret_rotated` record: critical
    /// on success, warning with the failure kind otherwise.
    pub(crate) fn rotate_archived(&self) -> BiosealResult<(MasterSecret, Option<PathBuf>)> {
        let mut cached = self.cached.lock().unwrap_or_else(PoisonError::into_inner);

        tracing::info!(path = %self.path.display(), "rotating biometric master secret");
        let record = AuditRecord::new(Operation::MasterSecretRotated)
            .detail("path", self.path.display());

        match self.replace_secret() {
            Ok((secret, backup)) => {
                *cached = Some(secret.clone());
                tracing::warn!(
                    "master secret rotated; data encrypted under the previous secret is not re-encrypted"
                );
                self.audit.append(
                    record
                        .severity(Severity::Critical)
                        .detail("outcome", "ok")
                        .detail(
                            "backup",
                            backup
                                .as_deref()
                                .map_or_else(|| "none".to_string(), |p| p.display().to_string()),
                        ),
                );
                Ok((secret, backup))
            }
            Err(e) => {
                tracing::error!(path = %self.path.display(), "master secret rotation failed: {e}");
                self.audit.append(
                    record
                        .severity(Severity::Warning)
                        .detail("outcome", e.kind())
                        .detail("error", &e),
                );
                Err(e)
            }
        }
    }

    fn replace_secret(&self) -> BiosealResult<(MasterSecret, Option<PathBuf>)> {
        let backup = self.archive_current()?;

        let secret = MasterSecret::generate();
        fsutil::ensure_private_parent(&self.path)
            .and_then(|()| fsutil::replace_atomic(&self.path, secret.as_bytes()))
            .map_err(|e| {
                BiosealError::storage(format!("writing master secret {}", self.path.display()), e)
            })?;
        Ok((secret, backup))
    }

    /// Archived secrets (`<name>.backup.<unix-millis>`), oldest first.
    pub fn backups(&self) -> BiosealResult<Vec<PathBuf>> {
        let parent = match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        let prefix = format!("{}.backup.", self.file_name());

        let entries = match std::fs::read_dir(parent) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(BiosealError::storage("listing key backups", e)),
        };

        let mut backups: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_name().to_string_lossy().starts_with(&prefix))
            .map(|entry| entry.path())
            .collect();
        backups.sort();
        Ok(backups)
    }

    fn load(&self) -> BiosealResult<Option<MasterSecret>> {
        let mut bytes = match std::fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(BiosealError::storage(
                    format!("reading master secret {}", self.path.display()),
                    e,
                ))
            }
        };

        if bytes.len() != KEY_SIZE {
            let len = bytes.len();
            bytes.zeroize();
            return Err(BiosealError::StorageUnavailable(format!(
                "master secret {} is {len} bytes, expected {KEY_SIZE}",
                self.path.display()
            )));
        }

        let mut key = [0u8; KEY_SIZE];
        key.copy_from_slice(&bytes);
        bytes.zeroize();
        Ok(Some(MasterSecret::from_bytes(key)))
    }

    fn create(&self) -> BiosealResult<MasterSecret> {
        let storage_err = |e: std::io::Error| {
            BiosealError::storage(format!("creating master secret {}", self.path.display()), e)
        };

        fsutil::ensure_private_parent(&self.path).map_err(storage_err)?;

        let candidate = MasterSecret::generate();
        if fsutil::publish_exclusive(&self.path, candidate.as_bytes()).map_err(storage_err)? {
            tracing::info!(path = %self.path.display(), "created biometric master secret");
            self.audit.append(
                AuditRecord::new(Operation::MasterSecretCreated)
                    .severity(Severity::Critical)
                    .detail("path", self.path.display()),
            );
            return Ok(candidate);
        }

        // Another process published first; adopt its secret
        tracing::info!(
            path = %self.path.display(),
            "master secret created concurrently by another process, loading it"
        );
        self.load()?.ok_or_else(|| {
            BiosealError::StorageUnavailable(format!(
                "master secret {} vanished after concurrent creation",
                self.path.display()
            ))
        })
    }

    fn archive_current(&self) -> BiosealResult<Option<PathBuf>> {
        let mut current = match std::fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(BiosealError::storage(
                    format!("reading master secret {}", self.path.display()),
                    e,
                ))
            }
        };

        let stamp = chrono::Utc::now().timestamp_millis();
        let base = format!("{}.backup.{stamp}", self.path.display());
        let mut attempt = 0u32;
        let result = loop {
            let candidate = if attempt == 0 {
                PathBuf::from(&base)
            } else {
                PathBuf::from(format!("{base}.{attempt}"))
            };
            match fsutil::write_new_synced(&candidate, &current) {
                Ok(()) => break Ok(candidate),
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => attempt += 1,
                Err(e) => break Err(BiosealError::storage("archiving master secret", e)),
            }
        };
        current.zeroize();

        let backup = result?;
        tracing::info!(backup = %backup.display(), "master secret archived");
        Ok(Some(backup))
    }

    fn file_name(&self) -> String {
        self.path
            .file_name()
            .unwrap_or_default()
            .to_string_lossy()
            .into_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::read_records;

    fn store_in(dir: &Path) -> MasterKeyStore {
        let audit = Arc::new(AuditTrail::new(dir.join("logs/audit.log"), "test"));
        MasterKeyStore::new(dir.join("keys/biometric.key"), audit)
    }

    #[test]
    fn test_creates_secret_on_first_use() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(dir.path());
        assert!(!store.path().exists());

        let secret = store.get_or_create_master_secret().unwrap();

        assert_eq!(std::fs::read(store.path()).unwrap(), secret.as_bytes());
        let records = read_records(&dir.path().join("logs/audit.log")).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].operation, Operation::MasterSecretCreated);
    }

    #[test]
    fn test_repeated_calls_return_same_secret() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(dir.path());

        let first = store.get_or_create_master_secret().unwrap();
        let second = store.get_or_create_master_secret().unwrap();
        assert_eq!(first.as_bytes(), second.as_bytes());

        // A second store over the same file (another process) loads it too
        let other = store_in(dir.path());
        let third = other.get_or_create_master_secret().unwrap();
        assert_eq!(first.as_bytes(), third.as_bytes());
    }

    #[test]
    fn test_clear_cache_reloads_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(dir.path());
        store.get_or_create_master_secret().unwrap();

        std::fs::write(store.path(), [9u8; KEY_SIZE]).unwrap();
        store.clear_cache();

        let reloaded = store.get_or_create_master_secret().unwrap();
        assert_eq!(reloaded.as_bytes(), &[9u8; KEY_SIZE]);
    }

    #[test]
    fn test_wrong_length_file_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(dir.path());
        std::fs::create_dir_all(store.path().parent().unwrap()).unwrap();
        std::fs::write(store.path(), [1u8; 16]).unwrap();

        let err = store.get_or_create_master_secret().unwrap_err();
        assert!(matches!(err, BiosealError::StorageUnavailable(_)));
        // The short file is never replaced with a fresh secret
        assert_eq!(std::fs::read(store.path()).unwrap().len(), 16);
    }

    #[test]
    fn test_unwritable_location_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("not-a-dir");
        std::fs::write(&blocker, b"file").unwrap();
        let audit = Arc::new(AuditTrail::new(dir.path().join("audit.log"), "test"));
        let store = MasterKeyStore::new(blocker.join("biometric.key"), audit);

        let err = store.get_or_create_master_secret().unwrap_err();
        assert!(matches!(err, BiosealError::StorageUnavailable(_)));
    }

    #[test]
    fn test_concurrent_cold_start_agrees_on_one_secret() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().to_path_buf();

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let root = root.clone();
                std::thread::spawn(move || {
                    let store = store_in(&root);
                    *store.get_or_create_master_secret().unwrap().as_bytes()
                })
            })
            .collect();

        let secrets: Vec<[u8; KEY_SIZE]> =
            handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert!(secrets.windows(2).all(|w| w[0] == w[1]));
        assert_eq!(std::fs::read(root.join("keys/biometric.key")).unwrap(), secrets[0]);

        let created = read_records(&root.join("logs/audit.log"))
            .unwrap()
            .into_iter()
            .filter(|r| r.operation == Operation::MasterSecretCreated)
            .count();
        assert_eq!(created, 1);
    }

    #[test]
    fn test_verify_integrity_missing() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(dir.path());

        assert_eq!(store.inspect(), IntegrityStatus::Missing);
        assert!(!store.verify_integrity());

        let records = read_records(&dir.path().join("logs/audit.log")).unwrap();
        assert_eq!(records.last().unwrap().severity, Severity::Warning);
    }

    #[test]
    fn test_verify_integrity_wrong_length() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(dir.path());
        std::fs::create_dir_all(store.path().parent().unwrap()).unwrap();
        fsutil::write_new_synced(store.path(), &[0u8; 31]).unwrap();

        assert_eq!(store.inspect(), IntegrityStatus::WrongLength { actual: 31 });
        assert!(!store.verify_integrity());
    }

    #[cfg(unix)]
    #[test]
    fn test_verify_integrity_detects_permission_drift() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(dir.path());
        store.get_or_create_master_secret().unwrap();
        assert!(store.verify_integrity());

        fsutil::set_mode(store.path(), 0o644).unwrap();

        assert_eq!(store.inspect(), IntegrityStatus::PermissionDrift { mode: 0o644 });
        assert!(!store.verify_integrity());
        let err = store.inspect().into_result(store.path()).unwrap_err();
        assert!(matches!(err, BiosealError::PermissionDrift { mode: 0o644, .. }));

        // Drift is reported, not enforced: the secret is still usable
        assert!(store.get_or_create_master_secret().is_ok());
    }

    #[cfg(unix)]
    #[test]
    fn test_secret_file_is_owner_only() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(dir.path());
        store.get_or_create_master_secret().unwrap();

        assert_eq!(fsutil::file_mode(store.path()).unwrap(), 0o600);
        assert_eq!(
            fsutil::file_mode(store.path().parent().unwrap()).unwrap(),
            0o700
        );
    }

    #[test]
    fn test_rotate_archives_and_replaces() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(dir.path());
        let old = store.get_or_create_master_secret().unwrap();

        let new = store.rotate().unwrap();

        assert_ne!(old.as_bytes(), new.as_bytes());
        assert_eq!(std::fs::read(store.path()).unwrap(), new.as_bytes());
        assert_eq!(
            store.get_or_create_master_secret().unwrap().as_bytes(),
            new.as_bytes()
        );

        let backups = store.backups().unwrap();
        assert_eq!(backups.len(), 1);
        assert_eq!(std::fs::read(&backups[0]).unwrap(), old.as_bytes());
        assert!(store.verify_integrity());
    }

    #[test]
    fn test_rotate_twice_keeps_both_backups() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(dir.path());
        store.get_or_create_master_secret().unwrap();

        store.rotate().unwrap();
        store.rotate().unwrap();

        assert_eq!(store.backups().unwrap().len(), 2);
        let rotations = read_records(&dir.path().join("logs/audit.log"))
            .unwrap()
            .into_iter()
            .filter(|r| r.operation == Operation::MasterSecretRotated)
            .count();
        assert_eq!(rotations, 2);
    }

    #[test]
    fn test_rotate_without_existing_secret_creates_one() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(dir.path());

        let secret = store.rotate().unwrap();

        assert!(store.backups().unwrap().is_empty());
        assert_eq!(std::fs::read(store.path()).unwrap(), secret.as_bytes());
    }

    #[test]
    fn test_failed_rotation_is_audited_once() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(dir.path());
        std::fs::create_dir_all(store.path()).unwrap();

        let err = store.rotate().unwrap_err();
        assert!(matches!(err, BiosealError::StorageUnavailable(_)));

        let records = read_records(&dir.path().join("logs/audit.log")).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].operation, Operation::MasterSecretRotated);
        assert_eq!(records[0].severity, Severity::Warning);
        assert_eq!(records[0].details["outcome"], "storage_unavailable");
        assert!(store.backups().unwrap().is_empty());
    }

    #[test]
    fn test_debug_is_redacted() {
        let secret = MasterSecret::from_bytes([0xAB; KEY_SIZE]);
        let debug = format!("{secret:?}");
        assert!(debug.contains("REDACTED"));
        assert!(!debug.contains("171"));
    }
}
