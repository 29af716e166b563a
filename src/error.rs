//! Error types for the savepoint library
//!
//! Every operation returns [`Result<T>`], whose error carries enough detail to
//! tell apart three outcomes a caller cares about:
//!
//! - nothing happened (`Validation`, `NoChanges`, `NotFound`)
//! - something was attempted and rolled back (`Io`, `Corruption` during
//!   create or restore)
//! - manual cleanup may be needed (`Inconsistency` after a delete)
//!
//! [`SavepointError::kind`] collapses the variants into that taxonomy and
//! [`ErrorReport`] is its serializable form.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// Type alias for Results in the savepoint library
pub type Result<T> = std::result::Result<T, SavepointError>;

/// Main error type for all savepoint operations
#[derive(Debug, Error)]
pub enum SavepointError {
    /// Missing or malformed argument
    #[error("Validation error: {0}")]
    Validation(String),

    /// Savepoint id not present in the metadata store
    #[error("Savepoint not found: {0}")]
    NotFound(String),

    /// A captured file was requested that the savepoint does not hold
    #[error("File {path:?} is not stored in savepoint {id}")]
    FileNotInSavepoint {
        /// Savepoint id
        id: String,
        /// Relative path that was requested
        path: PathBuf,
    },

    /// The working tree has nothing to capture
    #[error("No changes to save: the working tree matches the tracked baseline")]
    NoChanges,

    /// I/O errors during file operations
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A changed file disappeared between the status query and the copy
    #[error("IO error: source vanished: {0:?}")]
    SourceVanished(PathBuf),

    /// Metadata store failure
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Errors during JSON serialization/deserialization
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Walk directory error from walkdir crate
    #[error("Walk directory error: {0}")]
    WalkDir(#[from] walkdir::Error),

    /// The change-set provider could not report working-tree differences
    #[error("Change-set provider failed: {0}")]
    ChangeSet(String),

    /// Metadata references content that is missing from the content store
    #[error("Corruption detected: {0}")]
    Corruption(String),

    /// Metadata row was deleted but the content subtree could not be removed
    #[error("Savepoint {id} was deleted but its content at {path:?} could not be removed: {source}")]
    Inconsistency {
        /// Savepoint id whose metadata is already gone
        id: String,
        /// Content subtree left on disk
        path: PathBuf,
        /// Underlying removal failure
        #[source]
        source: std::io::Error,
    },

    /// Generic error for unexpected conditions
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Coarse classification of a [`SavepointError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Missing or empty required argument; no side effects
    Validation,
    /// Unknown savepoint id
    NotFound,
    /// Create called with an empty change-set; no side effects
    NoChanges,
    /// Copy, read, write, remove or storage failure
    Io,
    /// Content referenced by metadata is missing
    Corruption,
    /// Delete left content behind after committing the metadata removal
    Inconsistency,
    /// Anything else
    Internal,
}

impl ErrorKind {
    /// Stable lowercase name used in structured reports
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Validation => "validation",
            ErrorKind::NotFound => "not_found",
            ErrorKind::NoChanges => "no_changes",
            ErrorKind::Io => "io",
            ErrorKind::Corruption => "corruption",
            ErrorKind::Inconsistency => "inconsistency",
            ErrorKind::Internal => "internal",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structured, serializable view of an error (kind + message)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorReport {
    /// Error classification
    pub kind: ErrorKind,
    /// Human readable message
    pub message: String,
}

impl From<&SavepointError> for ErrorReport {
    fn from(err: &SavepointError) -> Self {
        Self {
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

impl SavepointError {
    /// Create a validation error with a custom message
    pub fn validation(msg: impl Into<String>) -> Self {
        SavepointError::Validation(msg.into())
    }

    /// Create a corruption error with a custom message
    pub fn corruption(msg: impl Into<String>) -> Self {
        SavepointError::Corruption(msg.into())
    }

    /// Create a change-set provider error with a custom message
    pub fn change_set(msg: impl Into<String>) -> Self {
        SavepointError::ChangeSet(msg.into())
    }

    /// Create an internal error with a custom message
    pub fn internal(msg: impl Into<String>) -> Self {
        SavepointError::Internal(msg.into())
    }

    /// Classify this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            SavepointError::Validation(_) => ErrorKind::Validation,
            SavepointError::NotFound(_) | SavepointError::FileNotInSavepoint { .. } => {
                ErrorKind::NotFound
            }
            SavepointError::NoChanges => ErrorKind::NoChanges,
            SavepointError::Io(_)
            | SavepointError::SourceVanished(_)
            | SavepointError::Database(_)
            | SavepointError::WalkDir(_)
            | SavepointError::ChangeSet(_) => ErrorKind::Io,
            SavepointError::Corruption(_) => ErrorKind::Corruption,
            SavepointError::Inconsistency { .. } => ErrorKind::Inconsistency,
            SavepointError::Json(_) | SavepointError::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Whether the failed operation is known to have left no side effects
    pub fn is_side_effect_free(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::Validation | ErrorKind::NoChanges | ErrorKind::NotFound
        )
    }

    /// Whether on-disk state may need manual cleanup
    pub fn needs_manual_cleanup(&self) -> bool {
        self.kind() == ErrorKind::Inconsistency
    }

    /// Get a user-friendly error message with suggestions
    pub fn user_message(&self) -> String {
        match self {
            SavepointError::NotFound(id) => {
                format!("Savepoint '{}' not found. Use 'list' to see available savepoints.", id)
            }
            SavepointError::NoChanges => {
                "Nothing to save: there are no uncommitted changes in the working tree.".to_string()
            }
            SavepointError::Corruption(msg) => {
                format!(
                    "{}. The working tree was rolled back; the savepoint cannot be restored as stored.",
                    msg
                )
            }
            SavepointError::Inconsistency { id, path, .. } => {
                format!(
                    "Savepoint '{}' was removed from the index but {:?} is still on disk. \
                     Remove it manually to reclaim the space.",
                    id, path
                )
            }
            _ => self.to_string(),
        }
    }
}
