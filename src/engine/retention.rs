//! Retention Sweeper
//! Prunes old archives while always keeping the most recent few.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tracing::info;

/// What a sweep removed.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub deleted: usize,
    pub bytes_freed: u64,
}

pub struct RetentionSweeper {
    max_age: Duration,
    keep_min: usize,
}

impl RetentionSweeper {
    pub fn new(max_age: Duration, keep_min: usize) -> Self {
        Self { max_age, keep_min }
    }

    pub fn from_days(max_age_days: u64, keep_min: usize) -> Self {
        Self::new(Duration::from_secs(max_age_days * 86_400), keep_min)
    }

    /// Delete archives older than the cutoff, never touching the
    /// `keep_min` most recent. Ordering is mtime descending with file name
    /// descending as tiebreak, which makes repeated sweeps deterministic:
    /// a second run with no new archives deletes nothing.
    pub fn sweep(&self, store_dir: &Path) -> io::Result<SweepReport> {
        let mut report = SweepReport::default();
        if !store_dir.exists() {
            return Ok(report);
        }

        let mut archives: Vec<(PathBuf, SystemTime, u64)> = Vec::new();
        for entry in fs::read_dir(store_dir)? {
            let entry = entry?;
            let path = entry.path();
            if !path.is_file() || path.extension().map(|e| e != "zip").unwrap_or(true) {
                continue;
            }
            let metadata = entry.metadata()?;
            let modified = metadata.modified()?;
            archives.push((path, modified, metadata.len()));
        }

        // Newest first; equal mtimes order by name.
        archives.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| b.0.cmp(&a.0)));

        let cutoff = SystemTime::now()
            .checked_sub(self.max_age)
            .unwrap_or(SystemTime::UNIX_EPOCH);

        for (path, modified, size) in archives.iter().skip(self.keep_min) {
            if *modified < cutoff {
                fs::remove_file(path)?;
                report.deleted += 1;
                report.bytes_freed += size;
            }
        }

        if report.deleted > 0 {
            info!(
                deleted = report.deleted,
                bytes_freed = report.bytes_freed,
                "retention sweep removed old archives"
            );
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn touch_aged(dir: &Path, name: &str, age_days: u64) {
        let path = dir.join(name);
        fs::write(&path, vec![0u8; 10]).unwrap();
        let mtime = SystemTime::now() - Duration::from_secs(age_days * 86_400);
        let file = fs::File::options().write(true).open(&path).unwrap();
        file.set_modified(mtime).unwrap();
    }

    fn remaining(dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = fs::read_dir(dir)
            .unwrap()
            .filter_map(|e| e.ok())
            .map(|e| e.file_name().to_string_lossy().to_string())
            .collect();
        names.sort();
        names
    }

    #[test]
    fn test_sweep_respects_age_and_keep_min() {
        let dir = tempdir().unwrap();
        for (i, age) in (10..=100).step_by(10).enumerate() {
            touch_aged(dir.path(), &format!("backup-{:02}.zip", i), age);
        }

        // Ages are 10..100 days. With a 65-day cutoff, files 06..09
        // (ages 70..100) are too old, and none of them sit inside the
        // 5-most-recent protection (files 00..04).
        let report = RetentionSweeper::from_days(65, 5).sweep(dir.path()).unwrap();

        assert_eq!(report.deleted, 4);
        assert_eq!(report.bytes_freed, 40);
        let left = remaining(dir.path());
        assert_eq!(
            left,
            vec![
                "backup-00.zip",
                "backup-01.zip",
                "backup-02.zip",
                "backup-03.zip",
                "backup-04.zip",
                "backup-05.zip",
            ]
        );
    }

    #[test]
    fn test_keep_min_overrides_age() {
        let dir = tempdir().unwrap();
        for i in 0..3 {
            touch_aged(dir.path(), &format!("backup-{}.zip", i), 500);
        }

        let report = RetentionSweeper::from_days(60, 5).sweep(dir.path()).unwrap();
        assert_eq!(report, SweepReport::default());
        assert_eq!(remaining(dir.path()).len(), 3);
    }

    #[test]
    fn test_sweep_is_idempotent() {
        let dir = tempdir().unwrap();
        for i in 0..10 {
            touch_aged(dir.path(), &format!("backup-{}.zip", i), 100 + i);
        }

        let sweeper = RetentionSweeper::from_days(60, 5);
        let first = sweeper.sweep(dir.path()).unwrap();
        assert_eq!(first.deleted, 5);

        let second = sweeper.sweep(dir.path()).unwrap();
        assert_eq!(second.deleted, 0);
        assert_eq!(second.bytes_freed, 0);
    }

    #[test]
    fn test_non_archives_ignored() {
        let dir = tempdir().unwrap();
        touch_aged(dir.path(), "backup-0.zip", 500);
        touch_aged(dir.path(), "notes.txt", 500);
        fs::create_dir(dir.path().join("subdir.zip")).unwrap();

        let report = RetentionSweeper::from_days(60, 0).sweep(dir.path()).unwrap();
        assert_eq!(report.deleted, 1);
        assert!(dir.path().join("notes.txt").exists());
        assert!(dir.path().join("subdir.zip").exists());
    }

    #[test]
    fn test_missing_store_is_empty_sweep() {
        let dir = tempdir().unwrap();
        let report = RetentionSweeper::from_days(60, 5)
            .sweep(&dir.path().join("nope"))
            .unwrap();
        assert_eq!(report, SweepReport::default());
    }
}
