//! The savepoint manager
//!
//! [`SavepointManager`] is the entry point for every savepoint operation. It
//! coordinates three collaborators:
//!
//! - a [`ChangeSetProvider`] that reports what changed in the working tree
//! - the [`MetadataStore`] holding savepoint rows and per-file records
//! - the [`ContentStore`] holding byte-exact copies of captured files
//!
//! ## Guarantees
//!
//! - **Create is atomic.** Content is copied into a staging directory, one
//!   metadata transaction commits the savepoint, then the staging directory is
//!   renamed to `snapshots/<id>`. If anything fails only the staging directory
//!   is removed, so no other savepoint's content is ever touched, and nothing
//!   becomes visible through `list`/`get`.
//! - **Restore is all-or-nothing for the paths it touches.** Every step is
//!   journaled with a backup; a failure replays the journal backward.
//! - **Delete removes metadata first.** If the content subtree cannot be
//!   removed afterwards the caller gets [`SavepointError::Inconsistency`].
//!
//! The two stores are not covered by one lock. A crash before the rename
//! leaves an orphaned `.staging-*` directory under `snapshots/`; nothing here
//! collects it.
//!
//! ## Examples
//!
//! ```rust,no_run
//! use savepoint::{SavepointConfig, SavepointManager};
//!
//! # fn main() -> savepoint::Result<()> {
//! let manager = SavepointManager::open(SavepointConfig::new("/home/user/project"))?;
//!
//! let savepoint = manager.create_savepoint("before refactor", "")?;
//! // ... edit files ...
//! manager.restore_savepoint(&savepoint.id)?;
//! # Ok(())
//! # }
//! ```

use crate::change_set::{ChangeSetProvider, GitStatusProvider};
use crate::content::{ContentStore, StagedContent, SNAPSHOTS_DIR};
use crate::error::{Result, SavepointError};
use crate::id;
use crate::metadata::{MetadataStore, DATABASE_FILE};
use crate::rollback::{RestoreJournal, UndoAction, BACKUPS_DIR};
use crate::types::*;
use crate::utils;
use crate::verification::{SavepointVerifier, VerificationReport};
use chrono::Utc;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{debug, info, instrument, trace, warn};

const STORAGE_GITIGNORE: &str = ".gitignore";

/// Creates, lists, restores and deletes savepoints of one working tree
pub struct SavepointManager {
    config: SavepointConfig,
    metadata: MetadataStore,
    content: ContentStore,
    provider: Box<dyn ChangeSetProvider>,
    /// Storage directory relative to the root, when it lives inside the tree
    storage_prefix: Option<PathBuf>,
}

impl std::fmt::Debug for SavepointManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SavepointManager")
            .field("config", &self.config)
            .field("metadata", &self.metadata)
            .field("content", &self.content)
            .field("storage_prefix", &self.storage_prefix)
            .finish()
    }
}

impl SavepointManager {
    /// Open the manager for `config` using `git status` to find changes
    ///
    /// The storage layout is created if it does not exist yet.
    ///
    /// # Errors
    ///
    /// - [`SavepointError::Validation`] if the root is not a directory
    /// - [`SavepointError::Io`] / [`SavepointError::Database`] if the stores
    ///   cannot be opened
    pub fn open(config: SavepointConfig) -> Result<Self> {
        Self::with_provider(config, GitStatusProvider::new())
    }

    /// Open the manager with a custom change-set provider
    pub fn with_provider(
        config: SavepointConfig,
        provider: impl ChangeSetProvider + 'static,
    ) -> Result<Self> {
        Self::from_parts(config, Box::new(provider))
    }

    #[instrument(skip(provider))]
    fn from_parts(config: SavepointConfig, provider: Box<dyn ChangeSetProvider>) -> Result<Self> {
        if !config.root_path.is_dir() {
            return Err(SavepointError::validation(format!(
                "working-tree root {:?} is not a directory",
                config.root_path
            )));
        }

        fs::create_dir_all(&config.storage_path)?;
        write_storage_gitignore(&config.storage_path);

        let metadata = MetadataStore::open(config.storage_path.join(DATABASE_FILE))?;
        let content = ContentStore::open(config.storage_path.join(SNAPSHOTS_DIR))?;
        let storage_prefix = storage_prefix(&config);

        info!("Opened savepoint manager for {:?}", config.root_path);
        Ok(Self {
            config,
            metadata,
            content,
            provider,
            storage_prefix,
        })
    }

    /// Configuration this manager was opened with
    pub fn config(&self) -> &SavepointConfig {
        &self.config
    }

    /// Working-tree root
    pub fn root_path(&self) -> &Path {
        &self.config.root_path
    }

    /// Capture the current working-tree changes as a new savepoint
    ///
    /// # Errors
    ///
    /// - [`SavepointError::Validation`] if `name` is empty
    /// - [`SavepointError::NoChanges`] if the provider reports nothing
    /// - [`SavepointError::SourceVanished`] if a changed file disappeared
    ///   before it could be copied
    /// - any store error; in every failure case nothing is left behind
    pub fn create_savepoint(&self, name: &str, description: &str) -> Result<Savepoint> {
        self.create_savepoint_as(id::generate_id(), name, description)
    }

    #[instrument(skip(self, description))]
    fn create_savepoint_as(&self, id: String, name: &str, description: &str) -> Result<Savepoint> {
        if name.is_empty() {
            return Err(SavepointError::validation("savepoint name is required"));
        }

        let changes = self.collect_changes()?;
        if changes.is_empty() {
            info!("No changes to capture");
            return Err(SavepointError::NoChanges);
        }
        info!("Creating savepoint {} with {} changed paths", id, changes.len());

        // Dropping the stage on any early return discards what was copied.
        let staged = self.content.stage()?;
        let committed = self.capture(&id, &staged, &changes).and_then(|records| {
            let savepoint = Savepoint {
                id: id.clone(),
                name: name.to_string(),
                description: description.to_string(),
                timestamp: Utc::now(),
                files: records.iter().map(|r| r.file_path.clone()).collect(),
                size: records.iter().map(|r| r.file_size).sum(),
            };
            self.metadata.insert_savepoint(&savepoint, &records)?;
            Ok(savepoint)
        });

        let savepoint = match committed {
            Ok(savepoint) => savepoint,
            Err(e) => {
                warn!("Creating savepoint {} failed, discarding staged content: {}", id, e);
                return Err(e);
            }
        };

        if let Err(e) = self.content.publish(staged, &id) {
            warn!("Publishing content for {} failed, withdrawing metadata: {}", id, e);
            if let Err(withdraw) = self.metadata.delete_savepoint(&id) {
                warn!("Savepoint {} is listed without content: {}", id, withdraw);
            }
            return Err(e);
        }

        info!(
            "Created savepoint {} ({} files, {})",
            savepoint.id,
            savepoint.file_count(),
            utils::format_bytes(savepoint.size)
        );
        Ok(savepoint)
    }

    /// Every savepoint, most recently created first
    pub fn list_savepoints(&self) -> Result<Vec<Savepoint>> {
        self.metadata.list_savepoints()
    }

    /// One savepoint by id
    pub fn get_savepoint(&self, id: &str) -> Result<Savepoint> {
        self.metadata.get_savepoint(id)
    }

    /// Per-file records of a savepoint in capture order
    pub fn savepoint_files(&self, id: &str) -> Result<Vec<SavepointFileRecord>> {
        self.metadata.savepoint_files(id)
    }

    /// Write a savepoint's captured state back into the working tree
    ///
    /// Only the paths recorded in the savepoint are touched. Restoring the
    /// same savepoint twice leaves the tree as after the first restore.
    ///
    /// # Errors
    ///
    /// - [`SavepointError::NotFound`] if `id` is unknown
    /// - [`SavepointError::Corruption`] if a content entry is missing
    /// - any I/O error; the working tree is rolled back first
    pub fn restore_savepoint(&self, id: &str) -> Result<RestoreResult> {
        self.restore_savepoint_with_progress::<fn(ProgressInfo)>(id, None)
    }

    /// [`restore_savepoint`](Self::restore_savepoint) reporting each step
    #[instrument(skip(self, progress))]
    pub fn restore_savepoint_with_progress<F>(
        &self,
        id: &str,
        progress: Option<F>,
    ) -> Result<RestoreResult>
    where
        F: Fn(ProgressInfo),
    {
        let start = Instant::now();
        let records = self.metadata.savepoint_files(id)?;
        info!("Restoring savepoint {} ({} files)", id, records.len());

        let mut journal = RestoreJournal::new(&self.config.storage_path.join(BACKUPS_DIR))?;
        let mut result = RestoreResult {
            savepoint_id: id.to_string(),
            files_restored: 0,
            files_deleted: 0,
            bytes_written: 0,
            duration_ms: 0,
        };

        for (index, record) in records.iter().enumerate() {
            if let Some(report) = &progress {
                report(ProgressInfo {
                    operation: "restore",
                    current_item: Some(record.file_path.clone()),
                    processed: index,
                    total: records.len(),
                });
            }

            if let Err(e) = self.apply_record(id, record, &mut journal, &mut result) {
                warn!("Restoring {} failed at {}: {}", id, record.file_path, e);
                let failures = journal.rollback();
                if failures > 0 {
                    warn!("{} paths could not be rolled back", failures);
                }
                return Err(e);
            }
        }

        journal.commit();
        result.duration_ms = start.elapsed().as_millis() as u64;
        info!(
            "Restored savepoint {}: {} written, {} deleted in {}ms",
            id, result.files_restored, result.files_deleted, result.duration_ms
        );
        Ok(result)
    }

    /// Delete a savepoint's metadata and content
    ///
    /// # Errors
    ///
    /// - [`SavepointError::NotFound`] if `id` is unknown
    /// - [`SavepointError::Inconsistency`] if the metadata is gone but the
    ///   content subtree could not be removed
    #[instrument(skip(self))]
    pub fn delete_savepoint(&self, id: &str) -> Result<()> {
        self.metadata.delete_savepoint(id)?;
        self.content
            .remove(id)
            .map_err(|source| SavepointError::Inconsistency {
                id: id.to_string(),
                path: self.content.subtree(id),
                source,
            })?;
        info!("Deleted savepoint {}", id);
        Ok(())
    }

    /// Stored bytes and mode of one captured file
    ///
    /// # Errors
    ///
    /// - [`SavepointError::NotFound`] if `id` is unknown
    /// - [`SavepointError::FileNotInSavepoint`] if `path` was not captured
    ///   with content
    /// - [`SavepointError::Corruption`] if the metadata references content
    ///   that is missing
    pub fn read_savepoint_file(&self, id: &str, path: &str) -> Result<ContentEntry> {
        let records = self.metadata.savepoint_files(id)?;
        let captured = records
            .iter()
            .any(|r| r.file_path == path && r.status.has_content());
        if !captured {
            return Err(SavepointError::FileNotInSavepoint {
                id: id.to_string(),
                path: PathBuf::from(path),
            });
        }

        self.content.get(id, path).map_err(|e| match e {
            SavepointError::FileNotInSavepoint { .. } => SavepointError::corruption(format!(
                "content for {} is missing from savepoint {}",
                path, id
            )),
            other => other,
        })
    }

    /// Check that a savepoint's content matches its metadata
    pub fn verify_savepoint(&self, id: &str) -> Result<VerificationReport> {
        SavepointVerifier::new(&self.metadata, &self.content).verify(id)
    }

    /// Expand a unique id prefix to a full savepoint id
    ///
    /// # Errors
    ///
    /// - [`SavepointError::NotFound`] if nothing matches
    /// - [`SavepointError::Validation`] if the prefix is empty or ambiguous
    pub fn resolve_id(&self, prefix: &str) -> Result<String> {
        if prefix.is_empty() {
            return Err(SavepointError::validation("savepoint id is required"));
        }
        if id::is_valid_id(prefix) && self.metadata.contains(prefix)? {
            return Ok(prefix.to_string());
        }

        let matches: Vec<String> = self
            .metadata
            .savepoint_ids()?
            .into_iter()
            .filter(|id| id.starts_with(prefix))
            .collect();
        match matches.as_slice() {
            [] => Err(SavepointError::NotFound(prefix.to_string())),
            [only] => Ok(only.clone()),
            _ => Err(SavepointError::validation(format!(
                "savepoint id prefix '{}' is ambiguous ({} matches)",
                prefix,
                matches.len()
            ))),
        }
    }

    /// Provider change-set without duplicates or paths inside the store
    ///
    /// Paths are normalized first, so `./a.txt` and `a.txt` are one entry.
    fn collect_changes(&self) -> Result<Vec<ChangeEntry>> {
        let reported = self.provider.changes(&self.config.root_path)?;
        let mut seen = HashSet::with_capacity(reported.len());
        let mut changes = Vec::with_capacity(reported.len());

        for entry in reported {
            let path = utils::normalize_relative_path(&entry.path)?;
            let entry = ChangeEntry::new(path, entry.status);
            if self.is_inside_storage(&entry.path) {
                trace!("Skipping storage path {}", entry.path);
                continue;
            }
            if !seen.insert(entry.path.clone()) {
                debug!("Skipping duplicate change entry for {}", entry.path);
                continue;
            }
            changes.push(entry);
        }
        Ok(changes)
    }

    fn is_inside_storage(&self, relative_path: &str) -> bool {
        self.storage_prefix
            .as_deref()
            .is_some_and(|prefix| Path::new(relative_path).starts_with(prefix))
    }

    /// Copy content for every changed path and build the file records
    fn capture(
        &self,
        id: &str,
        staged: &StagedContent,
        changes: &[ChangeEntry],
    ) -> Result<Vec<SavepointFileRecord>> {
        let mut records = Vec::with_capacity(changes.len());

        for change in changes {
            let relative = utils::validate_relative_path(&change.path)?;
            let file_size = match change.status {
                FileStatus::Deleted => 0,
                FileStatus::New | FileStatus::Modified => {
                    let source = self.config.root_path.join(relative);
                    if !source.exists() {
                        return Err(SavepointError::SourceVanished(PathBuf::from(&change.path)));
                    }
                    staged.put_file(&change.path, &source)?
                }
            };
            trace!("Captured {} {} ({} bytes)", change.status, change.path, file_size);

            records.push(SavepointFileRecord {
                savepoint_id: id.to_string(),
                file_path: change.path.clone(),
                status: change.status,
                file_size,
            });
        }
        Ok(records)
    }

    /// Apply one file record to the working tree, journaling before mutating
    fn apply_record(
        &self,
        id: &str,
        record: &SavepointFileRecord,
        journal: &mut RestoreJournal,
        result: &mut RestoreResult,
    ) -> Result<()> {
        let relative = utils::validate_relative_path(&record.file_path)?;
        let target = self.config.root_path.join(relative);

        match record.status {
            FileStatus::New | FileStatus::Modified => {
                let stored = self.content.entry_path(id, &record.file_path)?;
                if !stored.is_file() {
                    return Err(SavepointError::corruption(format!(
                        "content for {} is missing from savepoint {}",
                        record.file_path, id
                    )));
                }

                let backup = journal.backup(&target)?;
                let created_dir = utils::create_parent_dirs(&target)?;
                journal.record(UndoAction::Copy {
                    target: target.clone(),
                    backup,
                    created_dir,
                });

                if fs::symlink_metadata(&target).is_ok_and(|m| m.is_dir()) {
                    utils::remove_path(&target)?;
                }
                result.bytes_written += utils::copy_file(&stored, &target)?;
                result.files_restored += 1;
                trace!("Restored {}", record.file_path);
            }
            FileStatus::Deleted => {
                if let Some(backup) = journal.backup(&target)? {
                    journal.record(UndoAction::Delete {
                        target: target.clone(),
                        backup,
                    });
                    utils::remove_path(&target)?;
                    result.files_deleted += 1;
                    trace!("Removed {}", record.file_path);
                }
            }
        }
        Ok(())
    }
}

/// Builder for [`SavepointManager`]
///
/// # Examples
///
/// ```rust,no_run
/// use savepoint::SavepointManagerBuilder;
///
/// # fn main() -> savepoint::Result<()> {
/// let manager = SavepointManagerBuilder::new()
///     .storage_path("/var/lib/savepoints/project")
///     .build("/home/user/project")?;
/// # Ok(())
/// # }
/// ```
#[derive(Default)]
pub struct SavepointManagerBuilder {
    storage_path: Option<PathBuf>,
    provider: Option<Box<dyn ChangeSetProvider>>,
}

impl std::fmt::Debug for SavepointManagerBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SavepointManagerBuilder")
            .field("storage_path", &self.storage_path)
            .field("provider", &self.provider.as_ref().map(|_| "<custom>"))
            .finish()
    }
}

impl SavepointManagerBuilder {
    /// Create a new builder with default settings
    pub fn new() -> Self {
        Self::default()
    }

    /// Keep the store somewhere other than `<root>/.mcp-savepoints`
    pub fn storage_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.storage_path = Some(path.into());
        self
    }

    /// Use a custom change-set provider instead of `git status`
    pub fn change_set_provider(mut self, provider: impl ChangeSetProvider + 'static) -> Self {
        self.provider = Some(Box::new(provider));
        self
    }

    /// Open the manager for `root_path`
    pub fn build(self, root_path: impl Into<PathBuf>) -> Result<SavepointManager> {
        let mut config = SavepointConfig::new(root_path);
        if let Some(storage_path) = self.storage_path {
            config = config.with_storage_path(storage_path);
        }
        match self.provider {
            Some(provider) => SavepointManager::from_parts(config, provider),
            None => SavepointManager::open(config),
        }
    }
}

fn write_storage_gitignore(storage_path: &Path) {
    let path = storage_path.join(STORAGE_GITIGNORE);
    if path.exists() {
        return;
    }
    if let Err(e) = utils::atomic_write(&path, b"*\n") {
        warn!("Could not write {:?}: {}", path, e);
    }
}

fn storage_prefix(config: &SavepointConfig) -> Option<PathBuf> {
    if let (Ok(root), Ok(storage)) = (
        config.root_path.canonicalize(),
        config.storage_path.canonicalize(),
    ) {
        if let Ok(relative) = storage.strip_prefix(&root) {
            if !relative.as_os_str().is_empty() {
                return Some(relative.to_path_buf());
            }
        }
    }
    config.storage_relative_to_root().map(Path::to_path_buf)
}
