//! Undo log for restore operations
//!
//! A restore mutates the working tree one path at a time. Before each mutation
//! the previous state of the path is copied into a private backup directory and
//! an [`UndoAction`] is appended to the [`RestoreJournal`]. If a later step
//! fails, [`RestoreJournal::rollback`] walks the log backward and puts every
//! touched path back the way it was. On success [`RestoreJournal::commit`]
//! discards the backups.
//!
//! Actions are appended *before* the mutation they undo, so a step that fails
//! halfway is reverted along with the completed ones.

use crate::error::Result;
use crate::utils;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tracing::{debug, trace, warn};

/// Directory name for restore backups inside the storage directory
pub const BACKUPS_DIR: &str = "backups";

/// Compensating action for one restore step
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UndoAction {
    /// Content was written over `target`
    Copy {
        /// Working-tree path that was written
        target: PathBuf,
        /// Previous content of `target`, if it existed
        backup: Option<PathBuf>,
        /// Topmost directory created to hold `target`
        created_dir: Option<PathBuf>,
    },
    /// `target` was removed from the working tree
    Delete {
        /// Working-tree path that was removed
        target: PathBuf,
        /// Previous content of `target`
        backup: PathBuf,
    },
}

impl UndoAction {
    /// Working-tree path this action restores
    pub fn target(&self) -> &Path {
        match self {
            UndoAction::Copy { target, .. } | UndoAction::Delete { target, .. } => target,
        }
    }

    fn undo(&self) -> Result<()> {
        match self {
            UndoAction::Copy {
                target,
                backup,
                created_dir,
            } => {
                utils::remove_path(target)?;
                if let Some(backup) = backup {
                    utils::copy_path(backup, target)?;
                }
                if let (Some(created), Some(parent)) = (created_dir, target.parent()) {
                    utils::remove_empty_ancestors(parent, created)?;
                }
            }
            UndoAction::Delete { target, backup } => {
                utils::copy_path(backup, target)?;
            }
        }
        Ok(())
    }
}

/// In-memory undo log plus the backups it refers to
#[derive(Debug)]
pub struct RestoreJournal {
    backups: TempDir,
    actions: Vec<UndoAction>,
}

impl RestoreJournal {
    /// Start a journal whose backups live in a fresh directory under `backups_root`
    pub fn new(backups_root: &Path) -> Result<Self> {
        fs::create_dir_all(backups_root)?;
        let backups = tempfile::Builder::new()
            .prefix("restore-")
            .tempdir_in(backups_root)?;
        debug!("Restore backups at {:?}", backups.path());
        Ok(Self {
            backups,
            actions: Vec::new(),
        })
    }

    /// Directory holding this journal's backups
    pub fn backup_dir(&self) -> &Path {
        self.backups.path()
    }

    /// Recorded actions, oldest first
    pub fn actions(&self) -> &[UndoAction] {
        &self.actions
    }

    /// Copy whatever is at `target` aside, if anything
    ///
    /// Dangling symlinks count as absent.
    pub fn backup(&mut self, target: &Path) -> Result<Option<PathBuf>> {
        if !target.exists() {
            return Ok(None);
        }
        let backup = self
            .backups
            .path()
            .join(format!("{:06}", self.actions.len()));
        utils::copy_path(target, &backup)?;
        trace!("Backed up {:?} to {:?}", target, backup);
        Ok(Some(backup))
    }

    /// Append an action to the log
    pub fn record(&mut self, action: UndoAction) {
        self.actions.push(action);
    }

    /// Undo every recorded action, newest first
    ///
    /// Failures are logged and skipped so that as much as possible is put
    /// back. Returns the number of actions that could not be undone.
    pub fn rollback(self) -> usize {
        warn!("Rolling back {} restore steps", self.actions.len());
        let mut failures = 0;
        for action in self.actions.iter().rev() {
            if let Err(e) = action.undo() {
                failures += 1;
                warn!("Failed to roll back {:?}: {}", action.target(), e);
            }
        }
        self.discard();
        failures
    }

    /// Keep the applied changes and drop the backups
    pub fn commit(self) {
        debug!("Restore committed after {} steps", self.actions.len());
        self.discard();
    }

    fn discard(self) {
        let path = self.backups.path().to_path_buf();
        if let Err(e) = utils::make_dirs_writable(&path) {
            debug!("Could not unlock restore backups at {:?}: {}", path, e);
        }
        if let Err(e) = self.backups.close() {
            debug!("Could not remove restore backups at {:?}: {}", path, e);
        }
    }
}
