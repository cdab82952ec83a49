use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{BiosealError, BiosealResult};

/// Lowest PBKDF2 iteration count accepted from configuration.
///
/// Raising it is allowed; keys derived under one count are not reproducible
/// under another, so a deployment must never change it once data exists.
pub const MIN_KDF_ITERATIONS: u32 = 100_000;

/// Top-level configuration (loaded from bioseal.toml)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BiosealConfig {
    pub keys: KeysConfig,
    pub audit: AuditConfig,
    pub storage: StorageConfig,
    pub logging: LoggingConfig,
    /// Warn if the config file is world-readable (default: true)
    pub config_file_mode_check: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KeysConfig {
    /// Master secret file (32 raw bytes, mode 0600)
    pub master_secret_path: PathBuf,
    /// PBKDF2-HMAC-SHA256 iteration count for working keys
    pub kdf_iterations: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuditConfig {
    /// JSON-lines audit log (append-only, mode 0600)
    pub log_path: PathBuf,
    /// Component name stamped on every record
    pub component: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Directory holding captured face images and their `.enc` counterparts
    pub image_dir: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (default: info)
    pub log_level: String,
    /// Log format: "json" or "text"
    pub log_format: String,
}

impl Default for BiosealConfig {
    fn default() -> Self {
        Self {
            keys: KeysConfig::default(),
            audit: AuditConfig::default(),
            storage: StorageConfig::default(),
            logging: LoggingConfig::default(),
            config_file_mode_check: true,
        }
    }
}

impl Default for KeysConfig {
    fn default() -> Self {
        Self {
            master_secret_path: PathBuf::from("/var/lib/bioseal/keys/biometric.key"),
            kdf_iterations: MIN_KDF_ITERATIONS,
        }
    }
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            log_path: PathBuf::from("/var/log/bioseal/key_operations.log"),
            component: "biometric-key-manager".into(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            image_dir: PathBuf::from("/var/lib/bioseal/faces"),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            log_level: "info".into(),
            log_format: "text".into(),
        }
    }
}

impl BiosealConfig {
    /// Load configuration from `path`, falling back to defaults when the
    /// file does not exist. The result is validated before it is returned.
    pub fn load(path: &Path) -> BiosealResult<Self> {
        let (config, warnings) = Self::load_with_warnings(path)?;
        for warning in &warnings {
            tracing::warn!("{warning}");
        }
        Ok(config)
    }

    /// Like [`BiosealConfig::load`], but hands back the warnings instead of
    /// logging them, for callers that configure logging from the result.
    pub fn load_with_warnings(path: &Path) -> BiosealResult<(Self, Vec<String>)> {
        let mut warnings = Vec::new();
        let config = if path.exists() {
            let content = std::fs::read_to_string(path)
                .map_err(|e| BiosealError::Config(format!("reading {}: {e}", path.display())))?;
            let config = Self::from_toml(&content)
                .map_err(|e| BiosealError::Config(format!("{}: {e}", path.display())))?;
            if config.config_file_mode_check {
                warnings.extend(world_readable_warning(path));
            }
            config
        } else {
            warnings.push(format!(
                "config file not found: {}  (using defaults)",
                path.display()
            ));
            Self::default()
        };
        config.validate()?;
        Ok((config, warnings))
    }

    pub fn from_toml(content: &str) -> BiosealResult<Self> {
        toml::from_str(content).map_err(|e| BiosealError::Config(format!("parsing config: {e}")))
    }

    pub fn validate(&self) -> BiosealResult<()> {
        if self.keys.kdf_iterations < MIN_KDF_ITERATIONS {
            return Err(BiosealError::Config(format!(
                "keys.kdf_iterations = {} is below the minimum of {MIN_KDF_ITERATIONS}",
                self.keys.kdf_iterations
            )));
        }
        if self.keys.master_secret_path.as_os_str().is_empty() {
            return Err(BiosealError::Config(
                "keys.master_secret_path must not be empty".into(),
            ));
        }
        if self.audit.log_path.as_os_str().is_empty() {
            return Err(BiosealError::Config("audit.log_path must not be empty".into()));
        }
        match self.logging.log_format.as_str() {
            "json" | "text" => Ok(()),
            other => Err(BiosealError::Config(format!(
                "logging.log_format must be \"json\" or \"text\", got {other:?}"
            ))),
        }
    }
}

#[cfg(unix)]
fn world_readable_warning(path: &Path) -> Option<String> {
    use std::os::unix::fs::PermissionsExt;

    let mode = std::fs::metadata(path).ok()?.permissions().mode() & 0o777;
    (mode & 0o004 != 0).then(|| {
        format!(
            "config file {} is world-readable (mode {mode:o})",
            path.display()
        )
    })
}

#[cfg(not(unix))]
fn world_readable_warning(_path: &Path) -> Option<String> {
    None
}
