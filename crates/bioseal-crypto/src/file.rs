//! Face image files: seal in place as `<name>.enc`, wipe the original
//!
//! File format:
//! ```text
//! [16 bytes: nonce][16 bytes: GCM tag][N bytes: ciphertext]
//! ```
//!
//! Image files carry no associated data, unlike in-memory payloads, so
//! `.enc` files written by earlier deployments stay readable.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use zeroize::Zeroizing;

use bioseal_core::{BiosealError, BiosealResult};

use crate::aead::{self, EncryptedBlob};
use crate::fsutil;
use crate::kdf::WorkingKey;
use crate::ENCRYPTED_SUFFIX;

const FILE_AAD: &[u8] = b"";

/// `path` with `.enc` appended to the full file name (`face.jpg` → `face.jpg.enc`).
pub fn encrypted_path(path: &Path) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(ENCRYPTED_SUFFIX);
    PathBuf::from(name)
}

/// Encrypt the file at `path` to `path.enc` and destroy the plaintext.
///
/// The sealed file is written to a temp file, fsynced, and renamed into place
/// before the original is overwritten with zeros and unlinked. An existing
/// `<path>.enc` is replaced. A missing source fails with
/// [`BiosealError::NotFound`], and a symlink, directory, or multiply-linked
/// source with [`BiosealError::InvalidSource`], before anything is touched.
pub fn encrypt_file(path: &Path, key: &WorkingKey) -> BiosealResult<PathBuf> {
    check_source(path)?;
    let plaintext = Zeroizing::new(read_source(path)?);
    let blob = aead::seal(&plaintext, key, FILE_AAD)?;

    let out = encrypted_path(path);
    if out.exists() {
        tracing::warn!(sealed = %out.display(), "replacing existing sealed image");
    }
    fsutil::replace_atomic(&out, &blob.to_bytes())
        .map_err(|e| BiosealError::storage(format!("writing {}", out.display()), e))?;

    fsutil::wipe_and_remove(path).map_err(|e| {
        BiosealError::storage(format!("removing plaintext {}", path.display()), e)
    })?;

    tracing::info!(
        source = %path.display(),
        sealed = %out.display(),
        bytes = plaintext.len(),
        "face image encrypted"
    );
    Ok(out)
}

/// Read and authenticate a `.enc` file, returning the plaintext in memory.
///
/// Nothing is written to disk. Truncated or altered files fail with
/// [`BiosealError::IntegrityViolation`].
pub fn decrypt_file(path: &Path, key: &WorkingKey) -> BiosealResult<Vec<u8>> {
    let bytes = read_source(path)?;
    let blob = EncryptedBlob::from_bytes(&bytes)?;
    let plaintext = aead::open(&blob, key, FILE_AAD)?;

    tracing::debug!(sealed = %path.display(), bytes = plaintext.len(), "face image decrypted");
    Ok(plaintext)
}

fn check_source(path: &Path) -> BiosealResult<()> {
    match fsutil::sole_regular_file_len(path) {
        Ok(_) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            Err(BiosealError::NotFound(path.to_path_buf()))
        }
        Err(e) if e.kind() == std::io::ErrorKind::InvalidInput => {
            Err(BiosealError::InvalidSource {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })
        }
        Err(e) => Err(BiosealError::storage(format!("inspecting {}", path.display()), e)),
    }
}

fn read_source(path: &Path) -> BiosealResult<Vec<u8>> {
    std::fs::read(path).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            BiosealError::NotFound(path.to_path_buf())
        } else {
            BiosealError::storage(format!("reading {}", path.display()), e)
        }
    })
}
