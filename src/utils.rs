//! Filesystem helpers shared by the stores and the manager
//!
//! ## Categories of Utilities
//!
//! ### File Copy
//! - [`copy_file`]: byte-exact copy that carries Unix permission bits
//! - [`copy_path`]: the same for whole directory subtrees
//! - [`make_dirs_writable`]: undo read-only directory modes so a copy can be removed
//!
//! ### Removal
//! - [`remove_path`]: remove a file, symlink or directory subtree
//! - [`remove_dir_if_empty`] / [`remove_empty_ancestors`]: tidy up directories
//!   created for a step that was rolled back
//!
//! ### Paths
//! - [`validate_relative_path`]: reject paths that could escape a root
//! - [`normalize_relative_path`]: one spelling per path, used as the dedupe key
//! - [`create_parent_dirs`]: `mkdir -p` that reports the topmost directory it created
//!
//! ## Symbolic links
//!
//! Sources are always read through: a symlink in the working tree is captured
//! as the content of its target. Destinations are never written through: an
//! existing file or symlink at the destination is unlinked before the copy.

use crate::error::{Result, SavepointError};
use std::fs;
use std::path::{Component, Path, PathBuf};
use tracing::trace;
use walkdir::WalkDir;

/// Copy a single file's bytes and permission bits from `src` to `dst`
///
/// The parent directory of `dst` must already exist. Returns the number of
/// bytes copied.
///
/// # Errors
///
/// - [`SavepointError::Io`] if `src` cannot be read, `dst` cannot be
///   replaced, or `dst` is a directory
///
/// # Example
///
/// ```rust,ignore
/// let size = copy_file(Path::new("src/lib.rs"), Path::new("/tmp/lib.rs"))?;
/// ```
pub fn copy_file(src: &Path, dst: &Path) -> Result<u64> {
    // Follows symlinks so the captured mode is the target's.
    let mode = get_permissions(&fs::metadata(src)?);

    if let Ok(existing) = fs::symlink_metadata(dst) {
        if !existing.is_dir() {
            fs::remove_file(dst)?;
        }
    }

    let bytes = fs::copy(src, dst)?;
    set_permissions(dst, mode)?;

    trace!("Copied {:?} -> {:?} ({} bytes, mode {:o})", src, dst, bytes, mode);
    Ok(bytes)
}

/// Copy a file or a whole directory subtree from `src` to `dst`
///
/// Directories are merged into an existing `dst`; files inside are replaced.
/// Returns the total number of file bytes copied.
pub fn copy_path(src: &Path, dst: &Path) -> Result<u64> {
    if !fs::metadata(src)?.is_dir() {
        if let Some(parent) = dst.parent() {
            fs::create_dir_all(parent)?;
        }
        return copy_file(src, dst);
    }

    // Children come before their directory so a read-only mode is applied
    // only once the directory is fully populated.
    let mut total = 0;
    for entry in WalkDir::new(src).follow_links(true).contents_first(true) {
        let entry = entry?;
        let relative = entry
            .path()
            .strip_prefix(src)
            .map_err(|_| SavepointError::internal(format!("{:?} escaped {:?}", entry.path(), src)))?;
        let target = dst.join(relative);

        if entry.file_type().is_dir() {
            fs::create_dir_all(&target)?;
            set_permissions(&target, get_permissions(&entry.metadata()?))?;
        } else {
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)?;
            }
            total += copy_file(entry.path(), &target)?;
        }
    }
    Ok(total)
}

/// Give the owner write access to every directory under `root`
///
/// A copied tree may carry read-only directories; this makes it removable.
pub fn make_dirs_writable(root: &Path) -> Result<()> {
    for entry in WalkDir::new(root) {
        let entry = entry?;
        if entry.file_type().is_dir() {
            let mode = get_permissions(&entry.metadata()?);
            if mode & 0o200 == 0 {
                set_permissions(entry.path(), mode | 0o700)?;
            }
        }
    }
    Ok(())
}

/// Remove whatever is at `path`: file, symlink (not its target) or directory subtree
///
/// A missing path is not an error.
pub fn remove_path(path: &Path) -> Result<()> {
    match fs::symlink_metadata(path) {
        Ok(metadata) if metadata.is_dir() => fs::remove_dir_all(path)?,
        Ok(_) => fs::remove_file(path)?,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(e.into()),
    }
    Ok(())
}

/// Remove directory if empty
pub fn remove_dir_if_empty(path: &Path) -> Result<bool> {
    if path.is_dir() && fs::read_dir(path)?.next().is_none() {
        fs::remove_dir(path)?;
        trace!("Removed empty directory: {:?}", path);
        Ok(true)
    } else {
        Ok(false)
    }
}

/// Remove `start` and its ancestors up to and including `stop` while they are empty
///
/// `stop` must be an ancestor of (or equal to) `start`. Stops at the first
/// directory that still has entries.
pub fn remove_empty_ancestors(start: &Path, stop: &Path) -> Result<()> {
    let mut current = Some(start);
    while let Some(dir) = current {
        if !dir.starts_with(stop) || !remove_dir_if_empty(dir)? {
            break;
        }
        if dir == stop {
            break;
        }
        current = dir.parent();
    }
    Ok(())
}

/// Create all missing parents of `path`
///
/// Returns the topmost directory that did not exist before the call, so a
/// caller can undo exactly what was created.
pub fn create_parent_dirs(path: &Path) -> Result<Option<PathBuf>> {
    let Some(parent) = path.parent() else {
        return Ok(None);
    };

    let mut topmost = None;
    let mut probe = Some(parent);
    while let Some(dir) = probe {
        if dir.as_os_str().is_empty() || dir.exists() {
            break;
        }
        topmost = Some(dir.to_path_buf());
        probe = dir.parent();
    }

    if topmost.is_some() {
        fs::create_dir_all(parent)?;
    }
    Ok(topmost)
}

/// Validate a path that will be joined onto a root
///
/// Only normal components (and `.`) are allowed: absolute paths, drive
/// prefixes and `..` are rejected, as is the empty path.
pub fn validate_relative_path(path: &str) -> Result<&Path> {
    let candidate = Path::new(path);
    if path.is_empty() {
        return Err(SavepointError::validation("file path must not be empty"));
    }
    for component in candidate.components() {
        match component {
            Component::Normal(_) | Component::CurDir => {}
            _ => {
                return Err(SavepointError::validation(format!(
                    "file path {:?} must be relative and stay inside the working tree",
                    path
                )))
            }
        }
    }
    Ok(candidate)
}

/// Canonical `/`-separated spelling of a relative path
///
/// `./a.txt`, `a//a.txt` style variants collapse onto one key.
///
/// # Errors
///
/// - [`SavepointError::Validation`] if the path escapes the root or names
///   the root itself
pub fn normalize_relative_path(path: &str) -> Result<String> {
    let normalized = validate_relative_path(path)?
        .components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part.to_string_lossy()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/");
    if normalized.is_empty() {
        return Err(SavepointError::validation(format!(
            "file path {:?} does not name a file",
            path
        )));
    }
    Ok(normalized)
}

/// Get Unix permissions from metadata
#[cfg(unix)]
pub fn get_permissions(metadata: &fs::Metadata) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    metadata.permissions().mode() & 0o7777
}

/// Get permissions from metadata (Windows implementation)
#[cfg(windows)]
pub fn get_permissions(metadata: &fs::Metadata) -> u32 {
    let mut mode = if metadata.permissions().readonly() { 0o444 } else { 0o644 };
    if metadata.is_dir() {
        mode |= 0o111;
    }
    mode
}

/// Set Unix permissions
#[cfg(unix)]
pub fn set_permissions(path: &Path, mode: u32) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(mode))?;
    Ok(())
}

/// Set permissions (Windows implementation)
///
/// Only the read-only attribute can be expressed.
#[cfg(windows)]
pub fn set_permissions(path: &Path, mode: u32) -> Result<()> {
    let mut perms = fs::metadata(path)?.permissions();
    perms.set_readonly(mode & 0o200 == 0);
    fs::set_permissions(path, perms)?;
    Ok(())
}

/// Atomic file write (write to temp file then rename)
pub fn atomic_write(path: &Path, content: &[u8]) -> Result<()> {
    let temp_path = path.with_extension("tmp");
    fs::write(&temp_path, content)?;
    fs::rename(&temp_path, path)?;
    Ok(())
}

/// Format bytes in human-readable form
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB", "PB"];
    let mut size = bytes as f64;
    let mut unit_idx = 0;

    while size >= 1024.0 && unit_idx < UNITS.len() - 1 {
        size /= 1024.0;
        unit_idx += 1;
    }

    if unit_idx == 0 {
        format!("{} {}", size as u64, UNITS[unit_idx])
    } else {
        format!("{:.2} {}", size, UNITS[unit_idx])
    }
}
