//! Core data types used throughout the savepoint library
//!
//! ## Overview
//!
//! The types in this module represent:
//! - **Change-sets**: [`FileStatus`], [`ChangeEntry`] - what the working tree reports
//! - **Savepoints**: [`Savepoint`], [`SavepointFileRecord`] - what gets persisted
//! - **Content**: [`ContentEntry`] - bytes captured for one file
//! - **Operations**: [`RestoreResult`], [`OperationStatus`], [`ProgressInfo`] - results and progress of operations
//! - **Configuration**: [`SavepointConfig`] - where the working tree and store live
//!
//! ## Examples
//!
//! ```rust
//! use savepoint::types::{ChangeEntry, FileStatus};
//!
//! let entry = ChangeEntry::new("src/main.rs", FileStatus::Modified);
//! assert_eq!(entry.status.as_str(), "modified");
//! ```

use crate::error::{Result, SavepointError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Directory name used for the store when no explicit location is configured
pub const DEFAULT_STORAGE_DIR: &str = ".mcp-savepoints";

/// Environment variable naming the working-tree root
pub const ROOT_ENV_VAR: &str = "MCP_SAVEPOINTS_ROOT";

/// Environment variable overriding the storage location
pub const STORAGE_ENV_VAR: &str = "MCP_SAVEPOINTS_STORAGE";

/// How a path differs from the tracked baseline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileStatus {
    /// Path is untracked or newly added
    New,
    /// Path exists in the baseline and its content changed
    Modified,
    /// Path exists in the baseline but not in the working tree
    Deleted,
}

impl FileStatus {
    /// Name as stored in the metadata store
    pub fn as_str(&self) -> &'static str {
        match self {
            FileStatus::New => "new",
            FileStatus::Modified => "modified",
            FileStatus::Deleted => "deleted",
        }
    }

    /// Whether records with this status carry a content entry
    pub fn has_content(&self) -> bool {
        !matches!(self, FileStatus::Deleted)
    }
}

impl std::fmt::Display for FileStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FileStatus {
    type Err = SavepointError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "new" => Ok(FileStatus::New),
            "modified" => Ok(FileStatus::Modified),
            "deleted" => Ok(FileStatus::Deleted),
            other => Err(SavepointError::corruption(format!(
                "unknown file status '{}'",
                other
            ))),
        }
    }
}

/// One entry of a change-set reported by a [`ChangeSetProvider`](crate::ChangeSetProvider)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeEntry {
    /// Path relative to the working-tree root, `/`-separated
    pub path: String,
    /// How the path differs from the baseline
    pub status: FileStatus,
}

impl ChangeEntry {
    /// Create a change entry
    pub fn new(path: impl Into<String>, status: FileStatus) -> Self {
        Self {
            path: path.into(),
            status,
        }
    }
}

/// A named, timestamped, immutable capture of a working-tree change-set
///
/// # Examples
///
/// ```rust
/// # use savepoint::Savepoint;
/// # use chrono::Utc;
/// let savepoint = Savepoint {
///     id: "0a1b2c3d".to_string(),
///     name: "before refactor".to_string(),
///     description: String::new(),
///     timestamp: Utc::now(),
///     files: vec!["a.txt".to_string()],
///     size: 12,
/// };
/// assert_eq!(savepoint.file_count(), 1);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Savepoint {
    /// Fixed-length lowercase hex identifier
    pub id: String,
    /// Caller supplied name
    pub name: String,
    /// Caller supplied description, may be empty
    pub description: String,
    /// Creation instant, fixed at commit time
    pub timestamp: DateTime<Utc>,
    /// Relative paths touched, in provider order
    pub files: Vec<String>,
    /// Sum of captured content sizes in bytes
    pub size: u64,
}

impl Savepoint {
    /// Number of files in this savepoint
    pub fn file_count(&self) -> usize {
        self.files.len()
    }
}

/// Per-file record of a savepoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SavepointFileRecord {
    /// Owning savepoint
    pub savepoint_id: String,
    /// Path relative to the working-tree root
    pub file_path: String,
    /// Status at capture time
    pub status: FileStatus,
    /// Captured size in bytes (0 for deletions)
    pub file_size: u64,
}

/// Bytes and permission bits of one captured file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentEntry {
    /// File content
    pub bytes: Vec<u8>,
    /// Unix permission bits
    pub mode: u32,
}

/// Result of a restore operation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RestoreResult {
    /// Savepoint that was restored
    pub savepoint_id: String,
    /// Files written from the content store
    pub files_restored: usize,
    /// Paths removed for deleted-status records
    pub files_deleted: usize,
    /// Total bytes written into the working tree
    pub bytes_written: u64,
    /// Time taken in milliseconds
    pub duration_ms: u64,
}

/// Progress of a long-running operation
#[derive(Debug, Clone)]
pub struct ProgressInfo {
    /// Operation being performed
    pub operation: &'static str,
    /// Current item being processed
    pub current_item: Option<String>,
    /// Items processed so far
    pub processed: usize,
    /// Total items to process
    pub total: usize,
}

impl ProgressInfo {
    /// Get progress as a percentage (0-100)
    pub fn percentage(&self) -> Option<f32> {
        (self.total > 0).then(|| (self.processed as f32 / self.total as f32) * 100.0)
    }
}

/// Protocol-level acknowledgement for operations without a payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationStatus {
    /// Always `success` when returned
    pub status: StatusValue,
}

/// Value of [`OperationStatus::status`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StatusValue {
    /// The operation completed
    Success,
}

impl OperationStatus {
    /// Successful acknowledgement
    pub fn success() -> Self {
        Self {
            status: StatusValue::Success,
        }
    }
}

/// Where the working tree and the savepoint store live
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SavepointConfig {
    /// Working-tree root
    pub root_path: PathBuf,
    /// Root of the metadata and content stores
    pub storage_path: PathBuf,
}

impl SavepointConfig {
    /// Configuration with the store at `<root>/.mcp-savepoints`
    pub fn new(root_path: impl Into<PathBuf>) -> Self {
        let root_path = root_path.into();
        let storage_path = root_path.join(DEFAULT_STORAGE_DIR);
        Self {
            root_path,
            storage_path,
        }
    }

    /// Override the storage location
    pub fn with_storage_path(mut self, storage_path: impl Into<PathBuf>) -> Self {
        self.storage_path = storage_path.into();
        self
    }

    /// Build a configuration from the process environment
    ///
    /// Reads [`ROOT_ENV_VAR`] (falling back to the current directory) and
    /// [`STORAGE_ENV_VAR`] (falling back to `<root>/.mcp-savepoints`).
    pub fn from_env() -> Result<Self> {
        let root_path = match std::env::var_os(ROOT_ENV_VAR) {
            Some(root) if !root.is_empty() => PathBuf::from(root),
            _ => std::env::current_dir()?,
        };
        let config = Self::new(root_path);
        Ok(match std::env::var_os(STORAGE_ENV_VAR) {
            Some(storage) if !storage.is_empty() => config.with_storage_path(storage),
            _ => config,
        })
    }

    /// Storage path relative to the root, if the store lives inside the working tree
    pub fn storage_relative_to_root(&self) -> Option<&Path> {
        self.storage_path
            .strip_prefix(&self.root_path)
            .ok()
            .filter(|rel| !rel.as_os_str().is_empty())
    }
}
