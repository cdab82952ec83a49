use std::path::PathBuf;
use thiserror::Error;

pub type BiosealResult<T> = Result<T, BiosealError>;

#[derive(Debug, Error)]
pub enum BiosealError {
    /// The master secret or an encrypted output could not be read or written.
    /// Fatal: the operation must halt rather than fall back to another key.
    #[error("storage unavailable: {0}")]
    StorageUnavailable(String),

    #[error("not found: {}", .0.display())]
    NotFound(PathBuf),

    /// Authentication tag verification failed. Callers should alert, not retry.
    #[error("integrity violation: {0}")]
    IntegrityViolation(String),

    #[error("permission drift on {}: mode {mode:o}, expected 600", path.display())]
    PermissionDrift { path: PathBuf, mode: u32 },

    /// The file to seal is not a plain file with a single link, so wiping it
    /// could destroy data reachable through another name.
    #[error("refusing to seal {}: {reason}", path.display())]
    InvalidSource { path: PathBuf, reason: String },

    #[error("config error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl BiosealError {
    pub fn storage(context: impl std::fmt::Display, err: impl std::fmt::Display) -> Self {
        Self::StorageUnavailable(format!("{context}: {err}"))
    }

    /// Stable snake_case name, used as the audit `outcome` detail.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::StorageUnavailable(_) => "storage_unavailable",
            Self::NotFound(_) => "not_found",
            Self::IntegrityViolation(_) => "integrity_violation",
            Self::PermissionDrift { .. } => "permission_drift",
            Self::InvalidSource { .. } => "invalid_source",
            Self::Config(_) => "config",
            Self::Io(_) => "io",
            Self::Other(_) => "other",
        }
    }

    /// True for failures that indicate tampering or a key mismatch.
    pub fn is_security_event(&self) -> bool {
        matches!(
            self,
            Self::IntegrityViolation(_) | Self::PermissionDrift { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_security_event_classification() {
        assert!(BiosealError::IntegrityViolation("tag".into()).is_security_event());
        assert!(BiosealError::PermissionDrift {
            path: PathBuf::from("/k"),
            mode: 0o644
        }
        .is_security_event());
        assert!(!BiosealError::StorageUnavailable("disk".into()).is_security_event());
        assert!(!BiosealError::NotFound(PathBuf::from("/x")).is_security_event());
    }

    #[test]
    fn test_permission_drift_message_is_octal() {
        let err = BiosealError::PermissionDrift {
            path: PathBuf::from("/keys/biometric.key"),
            mode: 0o644,
        };
        assert_eq!(
            err.to_string(),
            "permission drift on /keys/biometric.key: mode 644, expected 600"
        );
    }

    #[test]
    fn test_invalid_source_is_not_a_security_event() {
        let err = BiosealError::InvalidSource {
            path: PathBuf::from("/faces/link.jpg"),
            reason: "symbolic link".into(),
        };
        assert_eq!(err.kind(), "invalid_source");
        assert!(!err.is_security_event());
        assert_eq!(err.to_string(), "refusing to seal /faces/link.jpg: symbolic link");
    }
}
