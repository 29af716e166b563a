//! Per-savepoint content store
//!
//! Every savepoint owns one subtree mirroring the working-tree layout of the
//! files it captured:
//!
//! ```text
//! snapshots/
//! └── <id>/
//!     ├── a.txt
//!     └── src/
//!         └── lib.rs
//! ```
//!
//! Entries are plain copies carrying the source's permission bits. There is no
//! deduplication between savepoints.
//!
//! A savepoint being created is first filled into a hidden staging directory
//! ([`ContentStore::stage`]) and only renamed to `<id>` by
//! [`ContentStore::publish`], so a failed create never touches another
//! savepoint's subtree.

use crate::error::{Result, SavepointError};
use crate::types::ContentEntry;
use crate::utils;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tracing::{debug, trace};
use walkdir::WalkDir;

/// Directory name of the content store inside the storage directory
pub const SNAPSHOTS_DIR: &str = "snapshots";

/// Name prefix of staging directories inside the store
pub const STAGING_PREFIX: &str = ".staging-";

/// Filesystem tree holding byte-exact copies of captured files
#[derive(Debug, Clone)]
pub struct ContentStore {
    root: PathBuf,
}

impl ContentStore {
    /// Open the store rooted at `root`, creating the directory if needed
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    /// Root of the store
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Subtree holding the content of savepoint `id`
    pub fn subtree(&self, id: &str) -> PathBuf {
        self.root.join(id)
    }

    /// Location of the entry for `relative_path` in savepoint `id`
    ///
    /// # Errors
    ///
    /// - [`SavepointError::Validation`] if `relative_path` is absolute or
    ///   climbs out with `..`
    pub fn entry_path(&self, id: &str, relative_path: &str) -> Result<PathBuf> {
        if id.is_empty() {
            return Err(SavepointError::validation("savepoint id must not be empty"));
        }
        let relative = utils::validate_relative_path(relative_path)?;
        Ok(self.subtree(id).join(relative))
    }

    /// Copy `source` into the store as `relative_path` of savepoint `id`
    ///
    /// Parent directories are created as needed. Symbolic links are read
    /// through. Returns the number of bytes written.
    pub fn put_file(&self, id: &str, relative_path: &str, source: &Path) -> Result<u64> {
        let size = store_copy(source, &self.entry_path(id, relative_path)?)?;
        trace!("Stored {} for savepoint {} ({} bytes)", relative_path, id, size);
        Ok(size)
    }

    /// Open a staging area for a savepoint that is not committed yet
    ///
    /// The area is a hidden directory next to the published subtrees. It is
    /// removed when the returned [`StagedContent`] is dropped unpublished.
    pub fn stage(&self) -> Result<StagedContent> {
        let dir = tempfile::Builder::new()
            .prefix(STAGING_PREFIX)
            .tempdir_in(&self.root)?;
        debug!("Staging content in {:?}", dir.path());
        Ok(StagedContent { dir })
    }

    /// Move staged content into place as the subtree of savepoint `id`
    ///
    /// # Errors
    ///
    /// - [`SavepointError::Validation`] if `id` is empty or already owns a
    ///   subtree; the existing subtree is left untouched
    pub fn publish(&self, staged: StagedContent, id: &str) -> Result<()> {
        if id.is_empty() {
            return Err(SavepointError::validation("savepoint id must not be empty"));
        }
        let subtree = self.subtree(id);
        if fs::symlink_metadata(&subtree).is_ok() {
            return Err(SavepointError::validation(format!(
                "content for savepoint {} already exists",
                id
            )));
        }
        fs::rename(staged.path(), &subtree)?;
        debug!("Published content for savepoint {}", id);
        Ok(())
    }

    /// Read the entry for `relative_path` of savepoint `id`
    ///
    /// # Errors
    ///
    /// - [`SavepointError::FileNotInSavepoint`] if no such entry exists
    pub fn get(&self, id: &str, relative_path: &str) -> Result<ContentEntry> {
        let path = self.entry_path(id, relative_path)?;
        let metadata = match fs::metadata(&path) {
            Ok(metadata) if metadata.is_file() => metadata,
            Ok(_) => return Err(not_in_savepoint(id, relative_path)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(not_in_savepoint(id, relative_path))
            }
            Err(e) => return Err(e.into()),
        };
        let bytes = fs::read(&path)?;
        Ok(ContentEntry {
            bytes,
            mode: utils::get_permissions(&metadata),
        })
    }

    /// Whether savepoint `id` has an entry for `relative_path`
    pub fn contains(&self, id: &str, relative_path: &str) -> Result<bool> {
        Ok(self.entry_path(id, relative_path)?.is_file())
    }

    /// Size of the entry for `relative_path`, if present
    pub fn entry_size(&self, id: &str, relative_path: &str) -> Result<Option<u64>> {
        match fs::metadata(self.entry_path(id, relative_path)?) {
            Ok(metadata) if metadata.is_file() => Ok(Some(metadata.len())),
            Ok(_) => Ok(None),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Remove the whole subtree of savepoint `id`
    ///
    /// An absent subtree is not an error. Returns the raw I/O error so the
    /// caller can decide how a leftover subtree is reported.
    pub fn remove(&self, id: &str) -> std::io::Result<()> {
        if id.is_empty() {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "savepoint id must not be empty",
            ));
        }
        match fs::remove_dir_all(self.subtree(id)) {
            Ok(()) => {
                debug!("Removed content subtree for savepoint {}", id);
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Whether any content exists on disk for savepoint `id`
    pub fn has_subtree(&self, id: &str) -> bool {
        self.subtree(id).is_dir()
    }

    /// Relative paths of every entry of savepoint `id`, sorted
    pub fn stored_paths(&self, id: &str) -> Result<Vec<String>> {
        let subtree = self.subtree(id);
        if !subtree.is_dir() {
            return Ok(Vec::new());
        }

        let mut paths = Vec::new();
        for entry in WalkDir::new(&subtree).min_depth(1) {
            let entry = entry?;
            if entry.file_type().is_dir() {
                continue;
            }
            let relative = entry.path().strip_prefix(&subtree).map_err(|_| {
                SavepointError::internal(format!("{:?} escaped {:?}", entry.path(), subtree))
            })?;
            paths.push(to_slash_path(relative));
        }
        paths.sort();
        Ok(paths)
    }
}

/// Content captured for a savepoint that has not been published yet
#[derive(Debug)]
pub struct StagedContent {
    dir: TempDir,
}

impl StagedContent {
    /// Staging directory
    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Copy `source` into the staging area as `relative_path`
    pub fn put_file(&self, relative_path: &str, source: &Path) -> Result<u64> {
        let target = self.dir.path().join(utils::validate_relative_path(relative_path)?);
        let size = store_copy(source, &target)?;
        trace!("Staged {} ({} bytes)", relative_path, size);
        Ok(size)
    }
}

fn store_copy(source: &Path, target: &Path) -> Result<u64> {
    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent)?;
    }
    utils::copy_file(source, target)
}

/// Render a relative path with `/` separators
pub fn to_slash_path(path: &Path) -> String {
    path.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

fn not_in_savepoint(id: &str, relative_path: &str) -> SavepointError {
    SavepointError::FileNotInSavepoint {
        id: id.to_string(),
        path: PathBuf::from(relative_path),
    }
}
