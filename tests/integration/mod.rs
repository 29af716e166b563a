//! Integration tests for the savepoint manager
//!
//! Drives the public API end to end through scripted and baseline-diffing
//! change-set providers, plus `git` itself when it is installed.

use ::savepoint::*;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Arc;
use tempfile::TempDir;
use tracing::info;
use walkdir::WalkDir;

/// Provider returning exactly what the test scripted
#[derive(Clone, Default)]
pub struct ScriptedProvider {
    entries: Arc<Mutex<Vec<ChangeEntry>>>,
}

impl ScriptedProvider {
    pub fn set(&self, entries: &[(&str, FileStatus)]) {
        *self.entries.lock() = entries
            .iter()
            .map(|(path, status)| ChangeEntry::new(*path, *status))
            .collect();
    }
}

impl ChangeSetProvider for ScriptedProvider {
    fn changes(&self, _root: &Path) -> Result<Vec<ChangeEntry>> {
        Ok(self.entries.lock().clone())
    }
}

/// Provider diffing the working tree against an in-memory "committed" baseline
///
/// Plays the role of version control without needing git.
#[derive(Clone, Default)]
pub struct BaselineProvider {
    baseline: Arc<Mutex<BTreeMap<String, Vec<u8>>>>,
}

impl BaselineProvider {
    /// Record the current tree as the baseline
    pub fn commit(&self, root: &Path) {
        *self.baseline.lock() = read_tree(root);
    }
}

impl ChangeSetProvider for BaselineProvider {
    fn changes(&self, root: &Path) -> Result<Vec<ChangeEntry>> {
        let baseline = self.baseline.lock();
        let current = read_tree(root);
        let mut changes = Vec::new();

        for (path, bytes) in &current {
            match baseline.get(path) {
                None => changes.push(ChangeEntry::new(path.clone(), FileStatus::New)),
                Some(base) if base != bytes => {
                    changes.push(ChangeEntry::new(path.clone(), FileStatus::Modified))
                }
                Some(_) => {}
            }
        }
        for path in baseline.keys() {
            if !current.contains_key(path) {
                changes.push(ChangeEntry::new(path.clone(), FileStatus::Deleted));
            }
        }
        Ok(changes)
    }
}

/// Every regular file under `root` outside the store, keyed by `/`-separated path
pub fn read_tree(root: &Path) -> BTreeMap<String, Vec<u8>> {
    WalkDir::new(root)
        .min_depth(1)
        .into_iter()
        .filter_entry(|e| e.file_name() != DEFAULT_STORAGE_DIR)
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| {
            let relative = e.path().strip_prefix(root).unwrap();
            let key = relative
                .components()
                .map(|c| c.as_os_str().to_string_lossy().into_owned())
                .collect::<Vec<_>>()
                .join("/");
            (key, fs::read(e.path()).unwrap())
        })
        .collect()
}

/// Test harness owning a working tree, its store and a manager over both
pub struct SavepointTestHarness<P: ChangeSetProvider + Clone + 'static> {
    pub temp_dir: TempDir,
    pub root: PathBuf,
    pub provider: P,
    pub manager: SavepointManager,
}

impl<P: ChangeSetProvider + Clone + Default + 'static> SavepointTestHarness<P> {
    pub fn new() -> Self {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path().join("work");
        fs::create_dir_all(&root).unwrap();
        let provider = P::default();
        let manager =
            SavepointManager::with_provider(SavepointConfig::new(&root), provider.clone()).unwrap();
        Self {
            temp_dir,
            root,
            provider,
            manager,
        }
    }

    /// Reopen the manager over the same store, as a new process would
    pub fn reopen(&mut self) {
        self.manager = SavepointManager::with_provider(
            SavepointConfig::new(&self.root),
            self.provider.clone(),
        )
        .unwrap();
    }

    pub fn write(&self, path: &str, content: impl AsRef<[u8]>) {
        let full = self.root.join(path);
        fs::create_dir_all(full.parent().unwrap()).unwrap();
        fs::write(full, content).unwrap();
    }

    pub fn read(&self, path: &str) -> Option<Vec<u8>> {
        fs::read(self.root.join(path)).ok()
    }

    pub fn read_string(&self, path: &str) -> Option<String> {
        fs::read_to_string(self.root.join(path)).ok()
    }

    pub fn remove(&self, path: &str) {
        fs::remove_file(self.root.join(path)).unwrap();
    }

    pub fn storage_path(&self) -> PathBuf {
        self.manager.config().storage_path.clone()
    }

    pub fn snapshot_dir(&self, id: &str) -> PathBuf {
        self.storage_path().join(content::SNAPSHOTS_DIR).join(id)
    }
}

impl SavepointTestHarness<BaselineProvider> {
    pub fn commit(&self) {
        self.provider.commit(&self.root);
    }
}

type Scripted = SavepointTestHarness<ScriptedProvider>;
type Baseline = SavepointTestHarness<BaselineProvider>;

#[test]
fn test_two_file_scenario() {
    let harness = Scripted::new();
    harness.write("a.txt", "A1");
    harness.write("b.txt", "B1");
    harness
        .provider
        .set(&[("a.txt", FileStatus::Modified), ("b.txt", FileStatus::New)]);

    let s1 = harness.manager.create_savepoint("s1", "").unwrap();
    assert_eq!(s1.files, vec!["a.txt", "b.txt"]);
    assert_eq!(s1.size, 4);
    assert_eq!(s1.id.len(), 8);

    harness.write("a.txt", "A2");
    harness.remove("b.txt");

    harness.manager.restore_savepoint(&s1.id).unwrap();
    assert_eq!(harness.read_string("a.txt").as_deref(), Some("A1"));
    assert_eq!(harness.read_string("b.txt").as_deref(), Some("B1"));
}

#[test]
fn test_restore_touches_only_recorded_paths() {
    let harness = Baseline::new();
    harness.write("tracked.txt", "base");
    harness.write("other.txt", "base");
    harness.commit();

    harness.write("tracked.txt", "captured");
    let savepoint = harness.manager.create_savepoint("one file", "").unwrap();
    assert_eq!(savepoint.files, vec!["tracked.txt"]);

    harness.write("tracked.txt", "later");
    harness.write("other.txt", "later");
    harness.write("untracked.txt", "later");

    harness.manager.restore_savepoint(&savepoint.id).unwrap();
    assert_eq!(harness.read_string("tracked.txt").as_deref(), Some("captured"));
    assert_eq!(harness.read_string("other.txt").as_deref(), Some("later"));
    assert_eq!(harness.read_string("untracked.txt").as_deref(), Some("later"));
}

#[test]
fn test_restore_is_idempotent() {
    let harness = Baseline::new();
    harness.write("keep.txt", "v1");
    harness.write("drop.txt", "gone soon");
    harness.commit();

    harness.write("keep.txt", "v2");
    harness.write("nested/deep/new.txt", "fresh");
    harness.remove("drop.txt");
    let savepoint = harness.manager.create_savepoint("mixed", "").unwrap();

    harness.write("keep.txt", "v3");
    harness.write("drop.txt", "resurrected");
    fs::remove_dir_all(harness.root.join("nested")).unwrap();

    harness.manager.restore_savepoint(&savepoint.id).unwrap();
    let after_first = read_tree(&harness.root);
    harness.manager.restore_savepoint(&savepoint.id).unwrap();
    let after_second = read_tree(&harness.root);

    assert_eq!(after_first, after_second);
    assert_eq!(after_first.get("keep.txt").map(Vec::as_slice), Some(&b"v2"[..]));
    assert_eq!(
        after_first.get("nested/deep/new.txt").map(Vec::as_slice),
        Some(&b"fresh"[..])
    );
    assert!(!after_first.contains_key("drop.txt"));
}

#[test]
fn test_list_is_newest_first_and_hydrated() {
    let harness = Scripted::new();
    harness.write("a.txt", "a");
    harness.provider.set(&[("a.txt", FileStatus::New)]);

    let mut created = Vec::new();
    for name in ["first", "second", "third"] {
        created.push(harness.manager.create_savepoint(name, "").unwrap());
        std::thread::sleep(std::time::Duration::from_millis(5));
    }

    let listed = harness.manager.list_savepoints().unwrap();
    let names: Vec<_> = listed.iter().map(|s| s.name.as_str()).collect();
    assert_eq!(names, vec!["third", "second", "first"]);
    assert!(listed.iter().all(|s| s.files == vec!["a.txt"]));

    for savepoint in &created {
        assert_eq!(&harness.manager.get_savepoint(&savepoint.id).unwrap(), savepoint);
    }
}

#[test]
fn test_savepoints_are_independent() {
    let harness = Scripted::new();
    harness.provider.set(&[("a.txt", FileStatus::Modified)]);

    harness.write("a.txt", "one");
    let first = harness.manager.create_savepoint("one", "").unwrap();
    harness.write("a.txt", "two");
    let second = harness.manager.create_savepoint("two", "").unwrap();

    harness.manager.delete_savepoint(&second.id).unwrap();
    harness.manager.restore_savepoint(&first.id).unwrap();
    assert_eq!(harness.read_string("a.txt").as_deref(), Some("one"));
    assert!(harness.snapshot_dir(&first.id).exists());
}

#[test]
fn test_delete_cascades() {
    let harness = Scripted::new();
    harness.write("a.txt", "x");
    harness.write("dir/b.txt", "y");
    harness
        .provider
        .set(&[("a.txt", FileStatus::New), ("dir/b.txt", FileStatus::New)]);
    let savepoint = harness.manager.create_savepoint("doomed", "").unwrap();
    assert!(harness.snapshot_dir(&savepoint.id).join("dir/b.txt").exists());

    harness.manager.delete_savepoint(&savepoint.id).unwrap();

    assert!(harness.manager.list_savepoints().unwrap().is_empty());
    assert!(matches!(
        harness.manager.get_savepoint(&savepoint.id),
        Err(SavepointError::NotFound(_))
    ));
    assert!(matches!(
        harness.manager.savepoint_files(&savepoint.id),
        Err(SavepointError::NotFound(_))
    ));
    assert!(!harness.snapshot_dir(&savepoint.id).exists());
    assert!(matches!(
        harness.manager.restore_savepoint(&savepoint.id),
        Err(SavepointError::NotFound(_))
    ));
}

#[test]
fn test_no_changes_is_rejected_without_side_effects() {
    let harness = Baseline::new();
    harness.write("a.txt", "same");
    harness.commit();

    let err = harness.manager.create_savepoint("nothing", "").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NoChanges);
    assert!(err.is_side_effect_free());
    assert!(harness.manager.list_savepoints().unwrap().is_empty());

    let snapshots = harness.storage_path().join(content::SNAPSHOTS_DIR);
    assert_eq!(fs::read_dir(snapshots).unwrap().count(), 0);
}

#[test]
fn test_savepoints_survive_reopen() {
    let mut harness = Scripted::new();
    harness.write("a.txt", "persisted");
    harness.provider.set(&[("a.txt", FileStatus::New)]);
    let savepoint = harness.manager.create_savepoint("durable", "across processes").unwrap();

    harness.reopen();

    let loaded = harness.manager.get_savepoint(&savepoint.id).unwrap();
    assert_eq!(loaded, savepoint);
    harness.write("a.txt", "changed");
    harness.manager.restore_savepoint(&savepoint.id).unwrap();
    assert_eq!(harness.read_string("a.txt").as_deref(), Some("persisted"));
}

#[test]
fn test_name_and_description_are_free_form() {
    let harness = Scripted::new();
    harness.write("a.txt", "x");
    harness.provider.set(&[("a.txt", FileStatus::New)]);

    let name = "ünïcödé / 'quotes' \"double\" ; DROP TABLE savepoints; --";
    let savepoint = harness.manager.create_savepoint(name, "line one\nline two").unwrap();
    let loaded = harness.manager.get_savepoint(&savepoint.id).unwrap();
    assert_eq!(loaded.name, name);
    assert_eq!(loaded.description, "line one\nline two");
}

#[test]
fn test_read_and_verify_through_manager() {
    let harness = Scripted::new();
    harness.write("bin/data.bin", [0u8, 159, 146, 150, 255]);
    harness.provider.set(&[("bin/data.bin", FileStatus::New)]);
    let savepoint = harness.manager.create_savepoint("binary", "").unwrap();

    let entry = harness
        .manager
        .read_savepoint_file(&savepoint.id, "bin/data.bin")
        .unwrap();
    assert_eq!(entry.bytes, vec![0u8, 159, 146, 150, 255]);

    let report = harness.manager.verify_savepoint(&savepoint.id).unwrap();
    assert!(report.is_valid(), "{}", report.summary());
}

fn git(dir: &Path, args: &[&str]) -> bool {
    Command::new("git")
        .args(args)
        .current_dir(dir)
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}

#[test]
fn test_git_backed_workflow() {
    let temp_dir = TempDir::new().unwrap();
    let root = temp_dir.path();
    if !git(root, &["init", "-q"]) {
        info!("git not available, skipping");
        return;
    }
    git(root, &["config", "user.email", "test@example.com"]);
    git(root, &["config", "user.name", "Test"]);
    fs::write(root.join("a.txt"), "committed").unwrap();
    fs::write(root.join("old.txt"), "committed").unwrap();
    assert!(git(root, &["add", "."]));
    assert!(git(root, &["commit", "-q", "-m", "base"]));

    let manager = SavepointManager::open(SavepointConfig::new(root)).unwrap();

    fs::write(root.join("a.txt"), "work in progress").unwrap();
    fs::write(root.join("new.txt"), "brand new").unwrap();
    fs::remove_file(root.join("old.txt")).unwrap();

    let savepoint = manager.create_savepoint("wip", "").unwrap();
    let mut files = savepoint.files.clone();
    files.sort();
    // The store itself never shows up thanks to its own .gitignore.
    assert_eq!(files, vec!["a.txt", "new.txt", "old.txt"]);

    assert!(git(root, &["checkout", "--", "."]));
    assert!(git(root, &["clean", "-fdq"]));
    assert_eq!(fs::read_to_string(root.join("a.txt")).unwrap(), "committed");
    assert!(root.join(DEFAULT_STORAGE_DIR).exists());

    manager.restore_savepoint(&savepoint.id).unwrap();
    assert_eq!(fs::read_to_string(root.join("a.txt")).unwrap(), "work in progress");
    assert_eq!(fs::read_to_string(root.join("new.txt")).unwrap(), "brand new");
    assert!(!root.join("old.txt").exists());
}

#[test]
fn test_git_staged_rename_with_removed_destination() {
    let temp_dir = TempDir::new().unwrap();
    let root = temp_dir.path();
    if !git(root, &["init", "-q"]) {
        info!("git not available, skipping");
        return;
    }
    git(root, &["config", "user.email", "test@example.com"]);
    git(root, &["config", "user.name", "Test"]);
    fs::write(root.join("a.txt"), "committed").unwrap();
    assert!(git(root, &["add", "."]));
    assert!(git(root, &["commit", "-q", "-m", "base"]));

    let manager = SavepointManager::open(SavepointConfig::new(root)).unwrap();
    assert!(git(root, &["mv", "a.txt", "b.txt"]));
    fs::remove_file(root.join("b.txt")).unwrap();

    let savepoint = manager.create_savepoint("renamed away", "").unwrap();
    assert_eq!(savepoint.files, vec!["a.txt"]);
    let records = manager.savepoint_files(&savepoint.id).unwrap();
    assert_eq!(records[0].status, FileStatus::Deleted);

    fs::write(root.join("a.txt"), "back again").unwrap();
    manager.restore_savepoint(&savepoint.id).unwrap();
    assert!(!root.join("a.txt").exists());
    assert!(!root.join("b.txt").exists());
}
