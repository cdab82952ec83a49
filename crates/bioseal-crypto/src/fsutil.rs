//! Owner-only file primitives: exclusive publication, atomic replacement,
//! restricted directories, and plaintext wiping.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

/// rw for the owning user only
pub const OWNER_ONLY_FILE: u32 = 0o600;

/// rwx for the owning user only
pub const OWNER_ONLY_DIR: u32 = 0o700;

const WIPE_BLOCK: usize = 64 * 1024;

/// Create `path` (and missing parents) with mode 0700, or tighten an
/// existing directory to 0700.
pub fn secure_directory(path: &Path) -> io::Result<()> {
    if path.is_dir() {
        set_mode(path, OWNER_ONLY_DIR)?;
    } else {
        create_private_dir(path)?;
    }
    tracing::debug!(path = %path.display(), "biometric directory secured");
    Ok(())
}

/// Create the parent directory of `path` with mode 0700 if it is missing.
///
/// Existing directories are left untouched: a key file placed directly in a
/// shared directory must not change that directory's mode.
pub fn ensure_private_parent(path: &Path) -> io::Result<()> {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() && !parent.exists() => {
            create_private_dir(parent)
        }
        _ => Ok(()),
    }
}

/// Publish `contents` at `path` only if nothing exists there yet.
///
/// The bytes are fully written and synced to a private temp file first, then
/// hard-linked into place. `link(2)` fails with `AlreadyExists` when the
/// target exists, so concurrent publishers cannot interleave and readers
/// never observe a partially written file.
///
/// Returns `Ok(true)` if this call created the file, `Ok(false)` if another
/// writer got there first.
pub fn publish_exclusive(path: &Path, contents: &[u8]) -> io::Result<bool> {
    let tmp = temp_sibling(path);
    write_new_synced(&tmp, contents)?;

    let linked = fs::hard_link(&tmp, path);
    if let Err(e) = fs::remove_file(&tmp) {
        tracing::warn!(path = %tmp.display(), "failed to remove temp file: {e}");
    }

    match linked {
        Ok(()) => {
            sync_parent(path);
            Ok(true)
        }
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists => Ok(false),
        Err(e) => Err(e),
    }
}

/// Atomically replace `path` with `contents` (mode 0600).
///
/// Writes to a synced temp file in the same directory, then renames over the
/// target so no reader sees a partial file.
pub fn replace_atomic(path: &Path, contents: &[u8]) -> io::Result<()> {
    let tmp = temp_sibling(path);
    write_new_synced(&tmp, contents)?;
    if let Err(e) = fs::rename(&tmp, path) {
        let _ = fs::remove_file(&tmp);
        return Err(e);
    }
    sync_parent(path);
    Ok(())
}

/// Create a new owner-only file, write `contents`, and fsync it.
/// Fails with `AlreadyExists` if `path` exists.
pub fn write_new_synced(path: &Path, contents: &[u8]) -> io::Result<()> {
    let mut file = open_owner_only_new(path)?;
    file.write_all(contents)?;
    file.sync_all()
}

/// Length of `path` if it is a regular file reachable through exactly one
/// name. Symlinks, directories, and multiply-linked files are rejected with
/// `InvalidInput` so a wipe can never reach data under another name.
pub fn sole_regular_file_len(path: &Path) -> io::Result<u64> {
    let meta = fs::symlink_metadata(path)?;
    let file_type = meta.file_type();
    if file_type.is_symlink() {
        return Err(io::Error::new(io::ErrorKind::InvalidInput, "symbolic link"));
    }
    if !file_type.is_file() {
        return Err(io::Error::new(io::ErrorKind::InvalidInput, "not a regular file"));
    }
    check_single_link(&meta)?;
    Ok(meta.len())
}

#[cfg(unix)]
fn check_single_link(meta: &fs::Metadata) -> io::Result<()> {
    use std::os::unix::fs::MetadataExt;
    match meta.nlink() {
        1 => Ok(()),
        n => Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("file has {n} hard links"),
        )),
    }
}

#[cfg(not(unix))]
fn check_single_link(_meta: &fs::Metadata) -> io::Result<()> {
    Ok(())
}

/// Overwrite a file's contents with zeros, sync, then unlink it.
///
/// Only sole-linked regular files are wiped (see [`sole_regular_file_len`]).
/// On copy-on-write or wear-levelled media the old blocks may survive the
/// overwrite; the unlink still removes the only directory entry.
pub fn wipe_and_remove(path: &Path) -> io::Result<()> {
    let len = sole_regular_file_len(path)?;
    {
        let mut file = OpenOptions::new().write(true).open(path)?;
        let zeros = [0u8; WIPE_BLOCK];
        let mut remaining = len;
        while remaining > 0 {
            let n = remaining.min(WIPE_BLOCK as u64) as usize;
            file.write_all(&zeros[..n])?;
            remaining -= n as u64;
        }
        file.sync_all()?;
    }
    fs::remove_file(path)?;
    sync_parent(path);
    Ok(())
}

/// Permission bits (`mode & 0o777`) of `path`.
#[cfg(unix)]
pub fn file_mode(path: &Path) -> io::Result<u32> {
    use std::os::unix::fs::PermissionsExt;
    Ok(fs::metadata(path)?.permissions().mode() & 0o777)
}

/// Non-unix platforms have no mode bits; report the expected value.
#[cfg(not(unix))]
pub fn file_mode(path: &Path) -> io::Result<u32> {
    fs::metadata(path).map(|_| OWNER_ONLY_FILE)
}

#[cfg(unix)]
pub fn set_mode(path: &Path, mode: u32) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(mode))
}

#[cfg(not(unix))]
pub fn set_mode(_path: &Path, _mode: u32) -> io::Result<()> {
    Ok(())
}

#[cfg(unix)]
fn create_private_dir(path: &Path) -> io::Result<()> {
    use std::os::unix::fs::DirBuilderExt;
    fs::DirBuilder::new()
        .recursive(true)
        .mode(OWNER_ONLY_DIR)
        .create(path)
}

#[cfg(not(unix))]
fn create_private_dir(path: &Path) -> io::Result<()> {
    fs::create_dir_all(path)
}

#[cfg(unix)]
pub(crate) fn open_owner_only_new(path: &Path) -> io::Result<File> {
    use std::os::unix::fs::OpenOptionsExt;
    OpenOptions::new()
        .write(true)
        .create_new(true)
        .mode(OWNER_ONLY_FILE)
        .open(path)
}

#[cfg(not(unix))]
pub(crate) fn open_owner_only_new(path: &Path) -> io::Result<File> {
    OpenOptions::new().write(true).create_new(true).open(path)
}

#[cfg(unix)]
pub(crate) fn open_owner_only_append(path: &Path) -> io::Result<File> {
    use std::os::unix::fs::OpenOptionsExt;
    OpenOptions::new()
        .append(true)
        .create(true)
        .mode(OWNER_ONLY_FILE)
        .open(path)
}

#[cfg(not(unix))]
pub(crate) fn open_owner_only_append(path: &Path) -> io::Result<File> {
    OpenOptions::new().append(true).create(true).open(path)
}

/// `.<name>.<uuid>.tmp` next to `path`
fn temp_sibling(path: &Path) -> PathBuf {
    let parent = path.parent().unwrap_or(Path::new("."));
    parent.join(format!(
        ".{}.{}.tmp",
        path.file_name().unwrap_or_default().to_string_lossy(),
        uuid::Uuid::new_v4().simple()
    ))
}

/// Persist the directory entry for `path`. Best effort: some filesystems
/// reject fsync on directories.
#[cfg(unix)]
fn sync_parent(path: &Path) {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        if let Err(e) = File::open(parent).and_then(|dir| dir.sync_all()) {
            tracing::debug!(dir = %parent.display(), "directory fsync skipped: {e}");
        }
    }
}

#[cfg(not(unix))]
fn sync_parent(_path: &Path) {}
