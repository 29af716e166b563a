//! Change-set providers
//!
//! A [`ChangeSetProvider`] answers one question: which paths under a
//! working-tree root differ from the tracked baseline, and how. The manager
//! never decides this itself.
//!
//! [`GitStatusProvider`] answers it with `git status`. Any closure of the
//! right shape is also a provider, which is how tests script change-sets.

use crate::error::{Result, SavepointError};
use crate::types::{ChangeEntry, FileStatus};
use std::path::Path;
use std::process::Command;
use tracing::{debug, trace};

/// Source of working-tree change-sets
pub trait ChangeSetProvider: Send + Sync {
    /// Entries for every changed path under `root`, relative to `root`
    ///
    /// Unchanged and ignored paths must not be reported.
    fn changes(&self, root: &Path) -> Result<Vec<ChangeEntry>>;
}

impl<F> ChangeSetProvider for F
where
    F: Fn(&Path) -> Result<Vec<ChangeEntry>> + Send + Sync,
{
    fn changes(&self, root: &Path) -> Result<Vec<ChangeEntry>> {
        self(root)
    }
}

/// Change-sets from `git status --porcelain=v1 -z`
///
/// Status codes map onto [`FileStatus`] as follows:
///
/// | porcelain            | status                                    |
/// |----------------------|-------------------------------------------|
/// | `??`                 | new                                       |
/// | `A?`                 | new, or skipped when the worktree is `D`  |
/// | `D` in either column | deleted                                   |
/// | `R?` / `C?`          | new at the destination unless the worktree is `D`; renames also delete the origin |
/// | `!!`                 | skipped                                   |
/// | anything else        | modified                                  |
#[derive(Debug, Clone)]
pub struct GitStatusProvider {
    git: String,
}

impl Default for GitStatusProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl GitStatusProvider {
    /// Provider running `git` from `PATH`
    pub fn new() -> Self {
        Self {
            git: "git".to_string(),
        }
    }

    /// Provider running a specific git executable
    pub fn with_executable(git: impl Into<String>) -> Self {
        Self { git: git.into() }
    }

    fn run(&self, root: &Path, args: &[&str]) -> Result<Vec<u8>> {
        let output = Command::new(&self.git)
            .args(args)
            .current_dir(root)
            .output()
            .map_err(|e| SavepointError::change_set(format!("failed to run {}: {}", self.git, e)))?;

        if !output.status.success() {
            return Err(SavepointError::change_set(format!(
                "git {} failed in {:?}: {}",
                args.join(" "),
                root,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(output.stdout)
    }
}

impl ChangeSetProvider for GitStatusProvider {
    fn changes(&self, root: &Path) -> Result<Vec<ChangeEntry>> {
        // Porcelain paths are relative to the repository top, not to `root`.
        let prefix = self.run(root, &["rev-parse", "--show-prefix"])?;
        let prefix = String::from_utf8_lossy(&prefix).trim().to_string();

        let raw = self.run(
            root,
            &[
                "status",
                "--porcelain=v1",
                "-z",
                "--untracked-files=all",
                "--",
                ".",
            ],
        )?;

        let entries = parse_porcelain_z(&raw)?
            .into_iter()
            .filter_map(|entry| {
                let relative = entry.path.strip_prefix(prefix.as_str())?.to_string();
                (!relative.is_empty()).then(|| ChangeEntry::new(relative, entry.status))
            })
            .collect::<Vec<_>>();

        debug!("git reported {} changed paths under {:?}", entries.len(), root);
        Ok(entries)
    }
}

/// Parse NUL-separated `git status --porcelain=v1 -z` output
///
/// Paths are returned exactly as git reports them, relative to the
/// repository top.
pub fn parse_porcelain_z(raw: &[u8]) -> Result<Vec<ChangeEntry>> {
    let mut tokens = raw.split(|b| *b == 0).filter(|t| !t.is_empty());
    let mut entries = Vec::new();

    while let Some(token) = tokens.next() {
        if token.len() < 4 || token[2] != b' ' {
            return Err(SavepointError::change_set(format!(
                "malformed status entry {:?}",
                String::from_utf8_lossy(token)
            )));
        }
        let x = token[0];
        let y = token[1];
        let path = String::from_utf8_lossy(&token[3..]).into_owned();
        trace!("porcelain {}{} {}", x as char, y as char, path);

        match (x, y) {
            (b'!', b'!') => {}
            (b'?', b'?') => entries.push(ChangeEntry::new(path, FileStatus::New)),
            (b'R', _) | (b'C', _) | (_, b'R') | (_, b'C') => {
                let origin = tokens.next().ok_or_else(|| {
                    SavepointError::change_set(format!("rename of {} has no origin path", path))
                })?;
                // Destination removed from the worktree after staging.
                if y != b'D' {
                    entries.push(ChangeEntry::new(path, FileStatus::New));
                }
                if x == b'R' || y == b'R' {
                    let origin = String::from_utf8_lossy(origin).into_owned();
                    entries.push(ChangeEntry::new(origin, FileStatus::Deleted));
                }
            }
            (b'A', b'D') => {}
            (b'A', _) => entries.push(ChangeEntry::new(path, FileStatus::New)),
            (b'D', _) | (_, b'D') => entries.push(ChangeEntry::new(path, FileStatus::Deleted)),
            _ => entries.push(ChangeEntry::new(path, FileStatus::Modified)),
        }
    }

    Ok(entries)
}
