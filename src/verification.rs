//! Savepoint verification and integrity checking
//!
//! Verification compares what the metadata store says a savepoint holds with
//! what the content store actually has on disk. It never reads or writes the
//! working tree.
//!
//! A savepoint is valid when:
//!
//! 1. every `new`/`modified` record has a content entry of the recorded size
//! 2. no `deleted` record has a content entry
//! 3. the content subtree holds nothing that no record refers to
//! 4. the savepoint's total size equals the sum of its record sizes
//!
//! ## Usage
//!
//! ```rust,no_run
//! use savepoint::{SavepointConfig, SavepointManager};
//!
//! # fn main() -> savepoint::Result<()> {
//! let manager = SavepointManager::open(SavepointConfig::new("."))?;
//!
//! let report = manager.verify_savepoint("0a1b2c3d")?;
//! if report.is_valid() {
//!     println!("Savepoint is intact");
//! } else {
//!     println!("Issues found: {}", report.summary());
//! }
//! # Ok(())
//! # }
//! ```

use crate::content::ContentStore;
use crate::error::Result;
use crate::metadata::MetadataStore;
use crate::types::{FileStatus, SavepointFileRecord};

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::Instant;
use tracing::{debug, info};

/// Checks a savepoint's content against its metadata
#[derive(Debug)]
pub struct SavepointVerifier<'a> {
    metadata: &'a MetadataStore,
    content: &'a ContentStore,
}

impl<'a> SavepointVerifier<'a> {
    /// Create a verifier over the two stores
    pub fn new(metadata: &'a MetadataStore, content: &'a ContentStore) -> Self {
        Self { metadata, content }
    }

    /// Verify one savepoint
    ///
    /// # Errors
    ///
    /// Returns an error only if verification cannot be performed (unknown id,
    /// unreadable store). Integrity problems are reported in the result.
    pub fn verify(&self, id: &str) -> Result<VerificationReport> {
        let start = Instant::now();
        let savepoint = self.metadata.get_savepoint(id)?;
        let records = self.metadata.savepoint_files(id)?;
        let mut report = VerificationReport::new(id.to_string());

        debug!("Verifying {} file records of {}", records.len(), id);
        for record in &records {
            let check = self.verify_record(record)?;
            if !check.is_valid() {
                report.errors.push(format!(
                    "{} ({}): {}",
                    record.file_path,
                    record.status,
                    check.error.as_deref().unwrap_or("invalid")
                ));
            }
            report.file_checks.push(check);
        }

        let recorded_size: u64 = records.iter().map(|r| r.file_size).sum();
        report.size_valid = recorded_size == savepoint.size;
        if !report.size_valid {
            report.errors.push(format!(
                "Size mismatch: savepoint records {} bytes, files sum to {}",
                savepoint.size, recorded_size
            ));
        }

        // Entries under deleted records are already flagged per file.
        let recorded: HashSet<&str> = records.iter().map(|r| r.file_path.as_str()).collect();
        report.stray_files = self
            .content
            .stored_paths(id)?
            .into_iter()
            .filter(|path| !recorded.contains(path.as_str()))
            .collect();

        report.total_files_checked = report.file_checks.len();
        report.files_valid = report.file_checks.iter().filter(|f| f.is_valid()).count();
        report.verification_time_ms = start.elapsed().as_millis() as u64;

        info!(
            "Verified savepoint {} in {}ms: {} / {} files valid",
            id, report.verification_time_ms, report.files_valid, report.total_files_checked
        );
        Ok(report)
    }

    fn verify_record(&self, record: &SavepointFileRecord) -> Result<FileVerification> {
        let actual_size = self
            .content
            .entry_size(&record.savepoint_id, &record.file_path)?;

        let mut check = FileVerification {
            path: record.file_path.clone(),
            status: record.status,
            expected_size: record.file_size,
            actual_size,
            error: None,
        };

        check.error = match (record.status, actual_size) {
            (FileStatus::Deleted, None) => None,
            (FileStatus::Deleted, Some(_)) => {
                Some("deleted file has a content entry".to_string())
            }
            (_, None) => Some("content entry missing".to_string()),
            (_, Some(size)) if size != record.file_size => Some(format!(
                "size mismatch: expected {}, found {}",
                record.file_size, size
            )),
            _ => None,
        };
        Ok(check)
    }
}

/// Result of verifying one savepoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationReport {
    /// Savepoint being verified
    pub savepoint_id: String,
    /// Per-record results
    pub file_checks: Vec<FileVerification>,
    /// Whether the savepoint size equals the sum of record sizes
    pub size_valid: bool,
    /// Content files no record refers to
    pub stray_files: Vec<String>,
    /// Time taken for verification in milliseconds
    pub verification_time_ms: u64,
    /// Total records checked
    pub total_files_checked: usize,
    /// Records that passed
    pub files_valid: usize,
    /// Human readable problems
    pub errors: Vec<String>,
}

impl VerificationReport {
    /// Create an empty report
    pub fn new(savepoint_id: String) -> Self {
        Self {
            savepoint_id,
            file_checks: Vec::new(),
            size_valid: false,
            stray_files: Vec::new(),
            verification_time_ms: 0,
            total_files_checked: 0,
            files_valid: 0,
            errors: Vec::new(),
        }
    }

    /// Whether the savepoint can be restored exactly as recorded
    pub fn is_valid(&self) -> bool {
        self.size_valid
            && self.files_valid == self.total_files_checked
            && self.stray_files.is_empty()
            && self.errors.is_empty()
    }

    /// One-line description of the outcome
    pub fn summary(&self) -> String {
        if self.is_valid() {
            format!(
                "Savepoint {} is valid ({} files verified in {}ms)",
                self.savepoint_id, self.total_files_checked, self.verification_time_ms
            )
        } else {
            let issues = [
                (!self.size_valid).then_some("size mismatch"),
                (self.files_valid < self.total_files_checked).then_some("file verification failures"),
                (!self.stray_files.is_empty()).then_some("stray content files"),
            ]
            .into_iter()
            .flatten()
            .collect::<Vec<_>>()
            .join(", ");

            format!(
                "Savepoint {} is invalid: {} ({}/{} files valid)",
                self.savepoint_id, issues, self.files_valid, self.total_files_checked
            )
        }
    }
}

/// Verification result for a single file record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileVerification {
    /// Relative path
    pub path: String,
    /// Recorded status
    pub status: FileStatus,
    /// Recorded size
    pub expected_size: u64,
    /// Size of the content entry, if one exists
    pub actual_size: Option<u64>,
    /// Error message if verification failed
    pub error: Option<String>,
}

impl FileVerification {
    /// Check if the record verified
    pub fn is_valid(&self) -> bool {
        self.error.is_none()
    }
}
