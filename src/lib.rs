//! # Savepoint - restorable snapshots of uncommitted work
//!
//! Capture the current set of uncommitted working-tree changes as a named,
//! persistent savepoint, then restore, inspect, list or delete it later,
//! independently of version-control history.
//!
//! ## Overview
//!
//! A savepoint records only what differs from the tracked baseline:
//! - **new** and **modified** files are copied byte-for-byte, permission bits
//!   included, into a per-savepoint content subtree
//! - **deleted** files are recorded by path only
//!
//! Restoring a savepoint writes those files back (or removes the deleted ones)
//! and touches nothing else in the working tree.
//!
//! ## Architecture
//!
//! - **Change-Set Provider** ([`ChangeSetProvider`]): reports which paths
//!   changed. [`GitStatusProvider`] asks `git status`.
//! - **Metadata Store** ([`MetadataStore`]): SQLite database of savepoints and
//!   their per-file records
//! - **Content Store** ([`ContentStore`]): directory tree of captured files
//! - **Savepoint Manager** ([`SavepointManager`]): coordinates the above and
//!   owns the rollback journal used during restore
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use savepoint::{SavepointConfig, SavepointManager};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let manager = SavepointManager::open(SavepointConfig::new("./my_project"))?;
//!
//! // Capture what has changed since the last commit
//! let savepoint = manager.create_savepoint("before refactor", "risky rename")?;
//! println!("Created savepoint: {}", savepoint.id);
//!
//! // Make some changes to your files...
//!
//! // Put the captured files back
//! let result = manager.restore_savepoint(&savepoint.id)?;
//! println!("Restored {} files", result.files_restored);
//! # Ok(())
//! # }
//! ```
//!
//! ## Custom change-sets
//!
//! Any `Fn(&Path) -> Result<Vec<ChangeEntry>>` is a provider:
//!
//! ```rust,no_run
//! use savepoint::{ChangeEntry, FileStatus, SavepointManagerBuilder};
//! use std::path::Path;
//!
//! # fn main() -> savepoint::Result<()> {
//! let manager = SavepointManagerBuilder::new()
//!     .change_set_provider(|_root: &Path| -> savepoint::Result<Vec<ChangeEntry>> {
//!         Ok(vec![ChangeEntry::new("notes.md", FileStatus::Modified)])
//!     })
//!     .build("./my_project")?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Storage layout
//!
//! ```text
//! <storage>/                 default: <root>/.mcp-savepoints
//! ├── .gitignore             "*", keeps the store out of git status
//! ├── savepoints.db
//! ├── snapshots/<id>/...
//! └── backups/               transient, used while a restore runs
//! ```
//!
//! ## Error Handling
//!
//! All operations return [`Result<T>`] with [`SavepointError`].
//! [`SavepointError::kind`] tells apart failures with no side effects,
//! failures that were rolled back, and [`ErrorKind::Inconsistency`] after a
//! delete that left content on disk.
//!
//! ## Module Organization
//!
//! - [`manager`]: the savepoint manager and its builder
//! - [`change_set`]: change-set providers
//! - [`metadata`]: SQLite metadata store
//! - [`content`]: per-savepoint content store
//! - [`rollback`]: restore journal
//! - [`verification`]: integrity checking
//! - [`types`]: common types and data structures
//! - [`error`]: error types and handling

// Public API modules
pub mod change_set;
pub mod content;
pub mod error;
pub mod id;
pub mod manager;
pub mod metadata;
pub mod rollback;
pub mod types;
pub mod utils;
pub mod verification;

// Re-export main types for convenience
pub use change_set::{ChangeSetProvider, GitStatusProvider};
pub use content::ContentStore;
pub use error::{ErrorKind, ErrorReport, Result, SavepointError};
pub use manager::{SavepointManager, SavepointManagerBuilder};
pub use metadata::MetadataStore;
pub use types::*;
pub use verification::{FileVerification, SavepointVerifier, VerificationReport};
