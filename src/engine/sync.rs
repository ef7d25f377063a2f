//! File Sync
//! Copies an extracted tree onto the live tree under path-policy control.

use chrono::Utc;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

use super::policy::PathPolicy;

/// A sync failure still reports what was already written, so the operator
/// can assess drift after a mid-apply crash.
#[derive(Error, Debug)]
#[error("Sync failed at '{path}': {source} ({} files written before failure)", .written.len())]
pub struct SyncError {
    pub path: String,
    pub written: Vec<String>,
    #[source]
    pub source: io::Error,
}

/// Whether existing destination files are renamed aside before being
/// overwritten. Full restores snapshot, updates do not.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotMode {
    Keep,
    None,
}

pub struct FileSync<'a> {
    policy: &'a PathPolicy,
    snapshot: SnapshotMode,
}

impl<'a> FileSync<'a> {
    pub fn new(policy: &'a PathPolicy, snapshot: SnapshotMode) -> Self {
        Self { policy, snapshot }
    }

    /// Walk `source_root` and copy every non-protected file onto
    /// `live_root`, creating parent directories as needed. Returns the
    /// relative paths actually written; protected paths are omitted, not
    /// errors.
    pub fn sync_tree(&self, source_root: &Path, live_root: &Path) -> Result<Vec<String>, SyncError> {
        let mut written = Vec::new();
        self.sync_dir(source_root, source_root, live_root, &mut written)?;
        Ok(written)
    }

    fn sync_dir(
        &self,
        dir: &Path,
        source_root: &Path,
        live_root: &Path,
        written: &mut Vec<String>,
    ) -> Result<(), SyncError> {
        let entries = fs::read_dir(dir).map_err(|e| self.fail(dir, written, e))?;
        let mut entries: Vec<_> = entries
            .collect::<Result<_, _>>()
            .map_err(|e| self.fail(dir, written, e))?;
        entries.sort_by_key(|e| e.file_name());

        for entry in entries {
            let path = entry.path();
            if path.is_dir() {
                self.sync_dir(&path, source_root, live_root, written)?;
                continue;
            }

            let relative = match path.strip_prefix(source_root) {
                Ok(r) => r.to_path_buf(),
                Err(_) => continue,
            };
            if self.policy.is_protected(&relative) {
                debug!(path = %relative.display(), "skipping protected path");
                continue;
            }

            let dest = live_root.join(&relative);
            self.place_file(&path, &dest, written)?;
            written.push(relative.to_string_lossy().replace('\\', "/"));
        }
        Ok(())
    }

    fn place_file(&self, src: &Path, dest: &Path, written: &[String]) -> Result<(), SyncError> {
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent).map_err(|e| self.fail(dest, written, e))?;
        }
        if self.snapshot == SnapshotMode::Keep && dest.exists() {
            let aside = snapshot_name(dest);
            fs::rename(dest, &aside).map_err(|e| self.fail(dest, written, e))?;
        }
        fs::copy(src, dest).map_err(|e| self.fail(dest, written, e))?;
        Ok(())
    }

    fn fail(&self, path: &Path, written: &[String], source: io::Error) -> SyncError {
        SyncError {
            path: path.display().to_string(),
            written: written.to_vec(),
            source,
        }
    }
}

fn snapshot_name(dest: &Path) -> PathBuf {
    let stamp = Utc::now().format("%Y%m%d-%H%M%S");
    let name = dest
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "file".to_string());
    dest.with_file_name(format!("{}.{}.bak", name, stamp))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::config::ProtectedConfig;
    use tempfile::tempdir;

    fn policy() -> PathPolicy {
        PathPolicy::for_update(&ProtectedConfig::default(), &["tmp".to_string()])
    }

    fn seed_source(src: &Path) {
        fs::create_dir_all(src.join("assets")).unwrap();
        fs::create_dir_all(src.join("config")).unwrap();
        fs::write(src.join("index.html"), "new index").unwrap();
        fs::write(src.join("assets/app.css"), "new css").unwrap();
        fs::write(src.join("config/app.json"), "attacker config").unwrap();
        fs::write(src.join(".env"), "attacker env").unwrap();
    }

    #[test]
    fn test_protected_files_untouched() {
        let dir = tempdir().unwrap();
        let src = dir.path().join("src");
        let live = dir.path().join("live");
        seed_source(&src);
        fs::create_dir_all(live.join("config")).unwrap();
        fs::write(live.join("config/app.json"), "live config").unwrap();
        fs::write(live.join(".env"), "live env").unwrap();

        let p = policy();
        let sync = FileSync::new(&p, SnapshotMode::None);
        let mut written = sync.sync_tree(&src, &live).unwrap();
        written.sort();

        assert_eq!(written, vec!["assets/app.css", "index.html"]);
        // Byte-identical before/after for protected paths.
        assert_eq!(fs::read_to_string(live.join("config/app.json")).unwrap(), "live config");
        assert_eq!(fs::read_to_string(live.join(".env")).unwrap(), "live env");
        assert_eq!(fs::read_to_string(live.join("index.html")).unwrap(), "new index");
    }

    #[test]
    fn test_snapshot_renames_existing_aside() {
        let dir = tempdir().unwrap();
        let src = dir.path().join("src");
        let live = dir.path().join("live");
        fs::create_dir_all(&src).unwrap();
        fs::create_dir_all(&live).unwrap();
        fs::write(src.join("index.html"), "restored").unwrap();
        fs::write(live.join("index.html"), "previous").unwrap();

        let p = policy();
        let sync = FileSync::new(&p, SnapshotMode::Keep);
        let written = sync.sync_tree(&src, &live).unwrap();
        assert_eq!(written, vec!["index.html"]);

        assert_eq!(fs::read_to_string(live.join("index.html")).unwrap(), "restored");
        let snapshots: Vec<_> = fs::read_dir(&live)
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".bak"))
            .collect();
        assert_eq!(snapshots.len(), 1);
        assert_eq!(fs::read_to_string(snapshots[0].path()).unwrap(), "previous");
    }

    #[test]
    fn test_parent_directories_created() {
        let dir = tempdir().unwrap();
        let src = dir.path().join("src");
        let live = dir.path().join("live");
        fs::create_dir_all(src.join("a/b/c")).unwrap();
        fs::write(src.join("a/b/c/deep.txt"), "x").unwrap();
        fs::create_dir_all(&live).unwrap();

        let p = policy();
        let written = FileSync::new(&p, SnapshotMode::None)
            .sync_tree(&src, &live)
            .unwrap();
        assert_eq!(written, vec!["a/b/c/deep.txt"]);
        assert!(live.join("a/b/c/deep.txt").exists());
    }
}
