//! Append-only JSON-lines audit trail
//!
//! Record format (one per line):
//! ```text
//! {"timestamp":"2026-10-17T09:12:44.120Z","operation":"key_derived",
//!  "component":"biometric-key-manager","severity":"info",
//!  "details":{"purpose":"face-recognition","subject":"emp-7"}}
//! ```
//!
//! Appending never fails the caller. When the sink is unavailable the record
//! is emitted through `tracing::error!` instead and the operation proceeds.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use bioseal_core::config::AuditConfig;
use bioseal_core::types::{Operation, Severity};
use bioseal_core::{BiosealError, BiosealResult};

use crate::fsutil;

/// One immutable audit entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub timestamp: DateTime<Utc>,
    pub operation: Operation,
    pub component: String,
    pub severity: Severity,
    #[serde(default)]
    pub details: BTreeMap<String, String>,
}

impl AuditRecord {
    pub fn new(operation: Operation) -> Self {
        Self {
            timestamp: Utc::now(),
            operation,
            component: String::new(),
            severity: Severity::Info,
            details: BTreeMap::new(),
        }
    }

    pub fn severity(mut self, severity: Severity) -> Self {
        self.severity = severity;
        self
    }

    pub fn detail(mut self, key: &str, value: impl ToString) -> Self {
        self.details.insert(key.to_string(), value.to_string());
        self
    }
}

/// Owner-only, append-only audit log
#[derive(Debug)]
pub struct AuditTrail {
    path: PathBuf,
    component: String,
    write_lock: Mutex<()>,
}

impl AuditTrail {
    pub fn new(path: impl Into<PathBuf>, component: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            component: component.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn from_config(config: &AuditConfig) -> Self {
        Self::new(&config.log_path, &config.component)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append an info-severity record with the given details.
    pub fn record(&self, operation: Operation, details: BTreeMap<String, String>) {
        let mut record = AuditRecord::new(operation);
        record.details = details;
        self.append(record);
    }

    /// Stamp the component and append `record`.
    pub fn append(&self, mut record: AuditRecord) {
        record.component.clone_from(&self.component);

        let line = match serde_json::to_string(&record) {
            Ok(line) => line,
            Err(e) => {
                tracing::error!(
                    target: "bioseal::audit",
                    operation = %record.operation,
                    "audit record serialization failed: {e}"
                );
                return;
            }
        };

        match record.severity {
            Severity::Info => {
                tracing::info!(target: "bioseal::audit", operation = %record.operation, "{line}")
            }
            Severity::Warning | Severity::Critical => {
                tracing::warn!(target: "bioseal::audit", operation = %record.operation, "{line}")
            }
        }

        let _guard = self
            .write_lock
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Err(e) = self.write_line(&line) {
            tracing::error!(
                target: "bioseal::audit",
                sink = %self.path.display(),
                record = %line,
                "audit sink unavailable: {e}"
            );
        }
    }

    fn write_line(&self, line: &str) -> std::io::Result<()> {
        fsutil::ensure_private_parent(&self.path)?;
        let mut file = fsutil::open_owner_only_append(&self.path)?;
        // Single write so concurrent appenders never interleave within a line
        let mut buf = Vec::with_capacity(line.len() + 1);
        buf.extend_from_slice(line.as_bytes());
        buf.push(b'\n');
        file.write_all(&buf)
    }
}

/// Parse every record in a JSON-lines audit log.
///
/// Blank lines are skipped; a malformed line is an error since it indicates
/// the log was edited outside this subsystem.
pub fn read_records(path: &Path) -> BiosealResult<Vec<AuditRecord>> {
    let file = std::fs::File::open(path).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            BiosealError::NotFound(path.to_path_buf())
        } else {
            BiosealError::storage(format!("opening audit log {}", path.display()), e)
        }
    })?;

    let mut records = Vec::new();
    for (idx, line) in BufReader::new(file).lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let record = serde_json::from_str(&line).map_err(|e| {
            BiosealError::Other(anyhow::anyhow!(
                "{}:{}: malformed audit record: {e}",
                path.display(),
                idx + 1
            ))
        })?;
        records.push(record);
    }
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_append_and_read_back() {
        let dir = tempfile::tempdir().unwrap();
        let trail = AuditTrail::new(dir.path().join("logs/key_operations.log"), "test-component");

        trail.append(
            AuditRecord::new(Operation::KeyDerived)
                .detail("purpose", "face-recognition")
                .detail("subject", "emp-7"),
        );
        trail.append(AuditRecord::new(Operation::IntegrityCheck).severity(Severity::Warning));

        let records = read_records(trail.path()).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].operation, Operation::KeyDerived);
        assert_eq!(records[0].component, "test-component");
        assert_eq!(records[0].details["subject"], "emp-7");
        assert_eq!(records[1].severity, Severity::Warning);
        assert!(records[0].timestamp <= records[1].timestamp);
    }

    #[test]
    fn test_record_with_detail_map() {
        let dir = tempfile::tempdir().unwrap();
        let trail = AuditTrail::new(dir.path().join("audit.log"), "c");

        let mut details = BTreeMap::new();
        details.insert("path".to_string(), "/faces/emp-7.jpg".to_string());
        trail.record(Operation::FileEncrypted, details);

        let records = read_records(trail.path()).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].severity, Severity::Info);
        assert_eq!(records[0].details["path"], "/faces/emp-7.jpg");
    }

    #[test]
    fn test_unavailable_sink_does_not_panic() {
        let dir = tempfile::tempdir().unwrap();
        // A directory cannot be opened for appending
        let trail = AuditTrail::new(dir.path(), "c");

        trail.append(AuditRecord::new(Operation::PayloadEncrypted));
        assert!(dir.path().is_dir());
    }

    #[test]
    fn test_read_missing_log_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let err = read_records(&dir.path().join("nope.log")).unwrap_err();
        assert!(matches!(err, BiosealError::NotFound(_)));
    }

    #[test]
    fn test_malformed_line_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.log");
        std::fs::write(&path, "{not json}\n").unwrap();

        assert!(read_records(&path).is_err());
    }

    #[cfg(unix)]
    #[test]
    fn test_log_is_owner_only() {
        let dir = tempfile::tempdir().unwrap();
        let trail = AuditTrail::new(dir.path().join("logs/audit.log"), "c");
        trail.append(AuditRecord::new(Operation::KeyDerived));

        assert_eq!(fsutil::file_mode(trail.path()).unwrap(), fsutil::OWNER_ONLY_FILE);
        assert_eq!(
            fsutil::file_mode(&dir.path().join("logs")).unwrap(),
            fsutil::OWNER_ONLY_DIR
        );
    }
}
