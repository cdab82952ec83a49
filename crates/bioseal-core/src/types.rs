use serde::{Deserialize, Serialize};
use std::fmt;

/// Deterministic input to working-key derivation.
///
/// Not persisted. Two equal contexts always derive the same key; the
/// subject identifier must therefore stay stable for a physical subject.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct KeyContext {
    pub purpose: String,
    pub subject: String,
}

impl KeyContext {
    pub fn new(purpose: impl Into<String>, subject: impl Into<String>) -> Self {
        Self {
            purpose: purpose.into(),
            subject: subject.into(),
        }
    }

    /// `purpose:subject`, the preimage of the derivation salt.
    pub fn salt_input(&self) -> String {
        format!("{}:{}", self.purpose, self.subject)
    }
}

impl fmt::Display for KeyContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.purpose, self.subject)
    }
}

/// Severity attached to every audit record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Critical => "critical",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

/// Operations recorded by the audit trail
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    MasterSecretCreated,
    MasterSecretRotated,
    IntegrityCheck,
    KeyDerived,
    PayloadEncrypted,
    PayloadDecrypted,
    FileEncrypted,
    FileDecrypted,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::MasterSecretCreated => "master_secret_created",
            Operation::MasterSecretRotated => "master_secret_rotated",
            Operation::IntegrityCheck => "integrity_check",
            Operation::KeyDerived => "key_derived",
            Operation::PayloadEncrypted => "payload_encrypted",
            Operation::PayloadDecrypted => "payload_decrypted",
            Operation::FileEncrypted => "file_encrypted",
            Operation::FileDecrypted => "file_decrypted",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_salt_input_joins_with_colon() {
        let ctx = KeyContext::new("face-recognition", "emp-7");
        assert_eq!(ctx.salt_input(), "face-recognition:emp-7");
    }

    #[test]
    fn test_operation_names_match_serde() {
        #[derive(Serialize)]
        struct Row {
            op: Operation,
        }
        let s = toml::to_string(&Row {
            op: Operation::FileEncrypted,
        })
        .unwrap();
        assert_eq!(s.trim(), format!("op = \"{}\"", Operation::FileEncrypted));
    }
}
