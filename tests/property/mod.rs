//! Property-based testing for savepoints
//!
//! Uses proptest to check the restore guarantees over randomly generated
//! baselines, edits and later divergence.

use crate::integration::{read_tree, BaselineProvider, SavepointTestHarness};
use ::savepoint::*;
use proptest::prelude::*;
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::Path;

type Harness = SavepointTestHarness<BaselineProvider>;

/// Strategy for generating file operations
#[derive(Debug, Clone)]
pub enum FileOperation {
    Write { path: String, content: Vec<u8> },
    Delete { path: String },
}

impl FileOperation {
    fn path(&self) -> &str {
        match self {
            FileOperation::Write { path, .. } | FileOperation::Delete { path } => path,
        }
    }
}

/// Generate random file paths
///
/// Directories never carry an extension and files always do, so no
/// generated file path is a directory of another.
fn path_strategy() -> impl Strategy<Value = String> {
    let dir_strategy = prop_oneof![
        Just(String::new()),
        Just("src/".to_string()),
        Just("src/nested/".to_string()),
        Just("docs/".to_string()),
        Just("with space/".to_string()),
    ];
    let filename_strategy = "[a-z]{1,6}\\.(txt|rs|md)";
    (dir_strategy, filename_strategy).prop_map(|(dir, name)| format!("{}{}", dir, name))
}

/// Generate random file contents
fn content_strategy() -> impl Strategy<Value = Vec<u8>> {
    prop_oneof![
        Just(Vec::new()),
        prop::collection::vec(any::<u8>(), 1..256),
        "[a-zA-Z0-9 \n]{1,128}".prop_map(|s| s.into_bytes()),
    ]
}

fn file_operation_strategy() -> impl Strategy<Value = FileOperation> {
    prop_oneof![
        3 => (path_strategy(), content_strategy())
            .prop_map(|(path, content)| FileOperation::Write { path, content }),
        1 => path_strategy().prop_map(|path| FileOperation::Delete { path }),
    ]
}

fn baseline_strategy() -> impl Strategy<Value = BTreeMap<String, Vec<u8>>> {
    prop::collection::btree_map(path_strategy(), content_strategy(), 0..8)
}

fn apply_operation(root: &Path, op: &FileOperation) -> anyhow::Result<()> {
    match op {
        FileOperation::Write { path, content } => {
            let full = root.join(path);
            if let Some(parent) = full.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::write(full, content)?;
        }
        FileOperation::Delete { path } => {
            let full = root.join(path);
            if full.exists() {
                fs::remove_file(full)?;
            }
        }
    }
    Ok(())
}

fn write_tree(root: &Path, files: &BTreeMap<String, Vec<u8>>) -> anyhow::Result<()> {
    for (path, content) in files {
        apply_operation(
            root,
            &FileOperation::Write {
                path: path.clone(),
                content: content.clone(),
            },
        )?;
    }
    Ok(())
}

/// Committed baseline plus edits, then a savepoint of those edits
fn capture(
    baseline: &BTreeMap<String, Vec<u8>>,
    edits: &[FileOperation],
) -> anyhow::Result<Option<(Harness, Savepoint, BTreeMap<String, Vec<u8>>)>> {
    let harness = Harness::new();
    write_tree(&harness.root, baseline)?;
    harness.commit();
    for op in edits {
        apply_operation(&harness.root, op)?;
    }
    let captured = read_tree(&harness.root);

    match harness.manager.create_savepoint("prop", "") {
        Ok(savepoint) => Ok(Some((harness, savepoint, captured))),
        Err(SavepointError::NoChanges) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    /// Restoring puts every recorded path back to its captured state and
    /// leaves unrecorded paths as they were just before the restore.
    #[test]
    fn restore_round_trip(
        baseline in baseline_strategy(),
        edits in prop::collection::vec(file_operation_strategy(), 1..8),
        divergence in prop::collection::vec(file_operation_strategy(), 0..8),
    ) {
        let Some((harness, savepoint, captured)) = capture(&baseline, &edits).unwrap() else {
            return Ok(());
        };

        for op in &divergence {
            apply_operation(&harness.root, op).unwrap();
        }
        let diverged = read_tree(&harness.root);

        harness.manager.restore_savepoint(&savepoint.id).unwrap();
        let restored = read_tree(&harness.root);

        let recorded: BTreeSet<&str> = savepoint.files.iter().map(String::as_str).collect();
        for path in &recorded {
            prop_assert_eq!(restored.get(*path), captured.get(*path), "recorded path {}", path);
        }
        let touched: BTreeSet<&str> = restored.keys().chain(diverged.keys()).map(String::as_str).collect();
        for path in touched.difference(&recorded) {
            prop_assert_eq!(restored.get(*path), diverged.get(*path), "unrecorded path {}", path);
        }
    }

    /// A second restore changes nothing.
    #[test]
    fn restore_idempotence(
        baseline in baseline_strategy(),
        edits in prop::collection::vec(file_operation_strategy(), 1..8),
        divergence in prop::collection::vec(file_operation_strategy(), 0..8),
    ) {
        let Some((harness, savepoint, _)) = capture(&baseline, &edits).unwrap() else {
            return Ok(());
        };
        for op in &divergence {
            apply_operation(&harness.root, op).unwrap();
        }

        harness.manager.restore_savepoint(&savepoint.id).unwrap();
        let first = read_tree(&harness.root);
        harness.manager.restore_savepoint(&savepoint.id).unwrap();
        prop_assert_eq!(read_tree(&harness.root), first);
    }

    /// The savepoint records exactly the changed paths, sized by content.
    #[test]
    fn savepoint_matches_change_set(
        baseline in baseline_strategy(),
        edits in prop::collection::vec(file_operation_strategy(), 1..8),
    ) {
        let Some((harness, savepoint, captured)) = capture(&baseline, &edits).unwrap() else {
            return Ok(());
        };

        let touched: BTreeSet<&str> = edits.iter().map(FileOperation::path).collect();
        let expected: BTreeSet<&str> = touched
            .into_iter()
            .filter(|p| baseline.get(*p) != captured.get(*p))
            .collect();
        let recorded: BTreeSet<&str> = savepoint.files.iter().map(String::as_str).collect();
        prop_assert_eq!(&recorded, &expected);

        let expected_size: u64 = expected
            .iter()
            .filter_map(|p| captured.get(*p))
            .map(|c| c.len() as u64)
            .sum();
        prop_assert_eq!(savepoint.size, expected_size);
        prop_assert!(harness.manager.verify_savepoint(&savepoint.id).unwrap().is_valid());

        for path in &expected {
            if let Some(content) = captured.get(*path) {
                let entry = harness.manager.read_savepoint_file(&savepoint.id, path).unwrap();
                prop_assert_eq!(&entry.bytes, content);
            }
        }
    }
}
