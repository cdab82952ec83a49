//! bioseal: operator CLI for the biometric data protection layer
//!
//! Commands:
//!   init                              - secure directories, create the master secret
//!   verify                            - check master secret length and permissions
//!   rotate --yes                      - archive and replace the master secret
//!   encrypt-file <path>               - seal a face image as <path>.enc
//!   decrypt-file <path> --out <file>  - open a sealed image into a new file
//!   fingerprint <path> [--expect hex] - SHA-256 of a file, optionally compared
//!   audit show [--limit N]            - print the key-operation audit trail
//!   config show                       - display current configuration

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::{Path, PathBuf};

use bioseal_core::config::BiosealConfig;
use bioseal_crypto::audit::{read_records, AuditRecord};
use bioseal_crypto::{fsutil, BiometricVault, IntegrityStatus};

// ── CLI structure ──────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(
    name = "bioseal",
    version,
    about = "Biometric data protection: master key, sealing, audit",
    long_about = "bioseal: manage the biometric master secret, seal and open face images, \
                  and inspect the key-operation audit trail"
)]
struct Cli {
    /// Path to bioseal configuration file
    #[arg(
        long,
        short = 'c',
        env = "BIOSEAL_CONFIG",
        default_value = "/etc/bioseal/config.toml"
    )]
    config: PathBuf,

    /// Log level or filter (overrides [logging].log_level)
    #[arg(long, env = "BIOSEAL_LOG")]
    log: Option<String>,

    /// Log format (overrides [logging].log_format)
    #[arg(long, env = "BIOSEAL_LOG_FORMAT")]
    log_format: Option<LogFormat>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Debug, ValueEnum, PartialEq)]
enum LogFormat {
    Json,
    Text,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Secure the key, audit, and image directories and create the master secret
    Init,

    /// Check the master secret file; exits non-zero on any violation
    Verify,

    /// Archive the current master secret and generate a new one
    ///
    /// Data sealed under the old secret is NOT re-encrypted and becomes
    /// unreadable until the backup is restored.
    Rotate {
        /// Confirm that previously sealed data will no longer decrypt
        #[arg(long)]
        yes: bool,
    },

    /// Seal an image as <path>.enc and wipe the original
    #[command(name = "encrypt-file")]
    EncryptFile {
        path: PathBuf,
        #[command(flatten)]
        context: ContextArgs,
    },

    /// Open a sealed image into a new owner-only file
    #[command(name = "decrypt-file")]
    DecryptFile {
        path: PathBuf,
        /// Destination for the plaintext (must not exist)
        #[arg(long, short = 'o')]
        out: PathBuf,
        #[command(flatten)]
        context: ContextArgs,
    },

    /// Print the SHA-256 fingerprint of a file
    Fingerprint {
        path: PathBuf,
        /// Expected hex digest; exits non-zero on mismatch
        #[arg(long)]
        expect: Option<String>,
    },

    /// Audit trail inspection
    Audit {
        #[command(subcommand)]
        action: AuditAction,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(clap::Args, Debug)]
struct ContextArgs {
    /// Key purpose
    #[arg(long, default_value = "face-recognition")]
    purpose: String,
    /// Stable subject identifier (e.g. employee id)
    #[arg(long)]
    subject: String,
}

#[derive(Subcommand, Debug)]
enum AuditAction {
    /// Print recorded key operations, oldest first
    Show {
        /// Only the most recent N records
        #[arg(long, short = 'n')]
        limit: Option<usize>,
        /// Raw JSON lines instead of the table view
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigAction {
    /// Print the active configuration (merged defaults + config file)
    Show,
}

// ── Entry point ───────────────────────────────────────────────────────────────

fn main() -> Result<()> {
    let cli = Cli::parse();
    let (config, warnings) = BiosealConfig::load_with_warnings(&cli.config)
        .with_context(|| format!("loading config: {}", cli.config.display()))?;

    let level = cli.log.as_deref().unwrap_or(&config.logging.log_level);
    let format = match cli.log_format {
        Some(format) => format,
        None if config.logging.log_format == "json" => LogFormat::Json,
        None => LogFormat::Text,
    };
    init_logging(level, &format);
    for warning in &warnings {
        tracing::warn!("{warning}");
    }

    tracing::debug!(
        version = env!("CARGO_PKG_VERSION"),
        config = %cli.config.display(),
        "bioseal starting"
    );

    match cli.command {
        Commands::Init => cmd_init(&config),
        Commands::Verify => cmd_verify(&config),
        Commands::Rotate { yes } => cmd_rotate(&config, yes),
        Commands::EncryptFile { path, context } => cmd_encrypt_file(&config, &path, &context),
        Commands::DecryptFile { path, out, context } => {
            cmd_decrypt_file(&config, &path, &out, &context)
        }
        Commands::Fingerprint { path, expect } => cmd_fingerprint(&path, expect.as_deref()),
        Commands::Audit { action: AuditAction::Show { limit, json } } => {
            cmd_audit_show(&config, limit, json)
        }
        Commands::Config { action: ConfigAction::Show } => cmd_config_show(&config, &cli.config),
    }
}

fn init_logging(level: &str, format: &LogFormat) {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("info"));

    match format {
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().json().with_writer(std::io::stderr))
                .init();
        }
        LogFormat::Text => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().with_writer(std::io::stderr))
                .init();
        }
    }
}

fn open_vault(config: &BiosealConfig) -> Result<BiometricVault> {
    BiometricVault::open(config).context("opening biometric vault")
}

// ── `bioseal init` / `verify` / `rotate` ──────────────────────────────────────

fn cmd_init(config: &BiosealConfig) -> Result<()> {
    let vault = open_vault(config)?;
    vault.initialize().context("initializing biometric vault")?;

    println!("master secret: {}", vault.store().path().display());
    println!("audit log:     {}", vault.audit().path().display());
    println!("image dir:     {}", vault.image_dir().display());
    Ok(())
}

fn cmd_verify(config: &BiosealConfig) -> Result<()> {
    let vault = open_vault(config)?;
    let status = vault.inspect_integrity();
    let healthy = vault.verify_integrity();

    println!("master secret: {}", vault.store().path().display());
    println!("status:        {}", describe_status(&status));

    if !healthy {
        anyhow::bail!("master secret integrity check failed");
    }
    Ok(())
}

fn describe_status(status: &IntegrityStatus) -> String {
    match status {
        IntegrityStatus::Healthy => "healthy".into(),
        IntegrityStatus::Missing => "missing (run `bioseal init`)".into(),
        IntegrityStatus::WrongLength { actual } => format!("wrong length: {actual} bytes"),
        IntegrityStatus::PermissionDrift { mode } => {
            format!("permission drift: mode {mode:o}, expected 600")
        }
        IntegrityStatus::Unreadable(e) => format!("unreadable: {e}"),
    }
}

fn cmd_rotate(config: &BiosealConfig, yes: bool) -> Result<()> {
    eprintln!(
        "warning: rotation does not re-encrypt existing data; \
         anything sealed under the current secret will no longer decrypt"
    );
    if !yes {
        anyhow::bail!("refusing to rotate without --yes");
    }

    let vault = open_vault(config)?;
    let backup = vault
        .rotate_master_secret()
        .context("rotating master secret")?;

    println!("rotated:  {}", vault.store().path().display());
    match backup {
        Some(path) => println!("backup:   {}", path.display()),
        None => println!("backup:   none (no previous secret)"),
    }
    Ok(())
}

// ── `bioseal encrypt-file` / `decrypt-file` ───────────────────────────────────

fn cmd_encrypt_file(config: &BiosealConfig, path: &Path, context: &ContextArgs) -> Result<()> {
    let vault = open_vault(config)?;
    let sealed = vault
        .encrypt_file(&context.purpose, &context.subject, path)
        .with_context(|| format!("encrypting {}", path.display()))?;
    println!("{}", sealed.display());
    Ok(())
}

fn cmd_decrypt_file(
    config: &BiosealConfig,
    path: &Path,
    out: &Path,
    context: &ContextArgs,
) -> Result<()> {
    let vault = open_vault(config)?;
    let plaintext = vault
        .decrypt_file(&context.purpose, &context.subject, path)
        .with_context(|| format!("decrypting {}", path.display()))?;

    fsutil::write_new_synced(out, &plaintext)
        .with_context(|| format!("writing {}", out.display()))?;
    println!("{} ({} bytes)", out.display(), plaintext.len());
    Ok(())
}

// ── `bioseal fingerprint` ─────────────────────────────────────────────────────

fn cmd_fingerprint(path: &Path, expect: Option<&str>) -> Result<()> {
    let data = std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    let hash = bioseal_crypto::fingerprint(&data);
    println!("{hash}  {}", path.display());

    if let Some(expected) = expect {
        if !bioseal_crypto::fingerprint::verify_hex(&data, expected) {
            anyhow::bail!("fingerprint mismatch for {}", path.display());
        }
    }
    Ok(())
}

// ── `bioseal audit show` ──────────────────────────────────────────────────────

fn cmd_audit_show(config: &BiosealConfig, limit: Option<usize>, json: bool) -> Result<()> {
    let records = read_records(&config.audit.log_path)
        .with_context(|| format!("reading audit log {}", config.audit.log_path.display()))?;

    let skip = limit.map_or(0, |n| records.len().saturating_sub(n));
    for record in &records[skip..] {
        if json {
            println!("{}", serde_json::to_string(record)?);
        } else {
            println!("{}", format_record(record));
        }
    }
    Ok(())
}

fn format_record(record: &AuditRecord) -> String {
    let details = record
        .details
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join(" ");
    format!(
        "{}  {:<8}  {:<22}  {details}",
        record.timestamp.format("%Y-%m-%dT%H:%M:%S%.3fZ"),
        record.severity,
        record.operation,
    )
}

// ── `bioseal config show` ─────────────────────────────────────────────────────

fn cmd_config_show(config: &BiosealConfig, config_path: &Path) -> Result<()> {
    if config_path.exists() {
        println!("# Configuration from: {}", config_path.display());
    } else {
        println!("# Configuration: defaults (no file at {})", config_path.display());
    }
    println!();
    let rendered = toml::to_string_pretty(config).context("serializing config to TOML")?;
    print!("{rendered}");
    Ok(())
}
