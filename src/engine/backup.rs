//! Backup Manager
//! Orchestrates archive creation, the store catalog, and restores.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{info, warn};

use super::apply::{ApplyError, ApplyReport, SqlApplier};
use super::archive::{ArchiveError, ArchiveReader, ArchiveWriter, VerificationReport};
use super::config::{Config, STATE_DIR};
use super::database::{Database, DatabaseError};
use super::dump::SqlDumper;
use super::policy::{PathPolicy, RestoreOverrides};
use super::sync::{FileSync, SnapshotMode, SyncError};

#[derive(Error, Debug)]
pub enum BackupError {
    #[error("Archive error: {0}")]
    Archive(#[from] ArchiveError),
    #[error("Database unavailable: {0}")]
    Database(#[from] DatabaseError),
    #[error("Restore failed applying dump: {0}")]
    Apply(#[from] ApplyError),
    #[error("File sync failed: {0}")]
    Sync(#[from] SyncError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Backup not found: {0}")]
    NotFound(String),
    #[error("Invalid backup name: {0}")]
    InvalidName(String),
    #[error("Nothing selected to restore: choose database, files, or both")]
    NothingSelected,
}

/// What a restore should touch, with explicit opt-ins for normally
/// protected categories. At least one of `database`/`files` must be set.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct RestoreRequest {
    pub database: bool,
    pub files: bool,
    #[serde(flatten)]
    pub overrides: RestoreOverrides,
}

impl RestoreRequest {
    pub fn validate(&self) -> Result<(), BackupError> {
        if !self.database && !self.files {
            return Err(BackupError::NothingSelected);
        }
        Ok(())
    }
}

/// A stored archive, derived from the store's directory listing. The
/// listing IS the catalog; nothing else is persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupRecord {
    pub file_name: String,
    pub size_bytes: u64,
    pub created_at: DateTime<Utc>,
}

/// Result of creating a backup. A database failure degrades the backup to
/// files-only and is reported here as a warning instead of aborting.
#[derive(Debug)]
pub struct BackupOutcome {
    pub path: PathBuf,
    pub size_bytes: u64,
    pub warning: Option<String>,
}

/// Result of a restore: what ran against the database and which files
/// actually landed.
#[derive(Debug, Default)]
pub struct RestoreOutcome {
    pub apply: Option<ApplyReport>,
    pub restored_files: Vec<String>,
}

/// Preview of the live tree: what a backup would archive and what an
/// update or restore would refuse to overwrite.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct ScanReport {
    pub total_files: usize,
    pub protected_files: usize,
    pub excluded_files: usize,
    pub total_bytes: u64,
}

pub struct BackupManager {
    live_root: PathBuf,
    config: Config,
}

impl BackupManager {
    pub fn new(live_root: &Path, config: Config) -> std::io::Result<Self> {
        let manager = Self {
            live_root: live_root.to_path_buf(),
            config,
        };
        fs::create_dir_all(manager.store_dir())?;
        Ok(manager)
    }

    pub fn store_dir(&self) -> PathBuf {
        self.live_root.join(&self.config.store.backup_dir)
    }

    fn scratch_parent(&self) -> PathBuf {
        self.live_root.join(&self.config.store.scratch_dir)
    }

    /// Archive the live tree plus a database dump. The database portion is
    /// best-effort: an unreachable database produces a files-only archive
    /// and a warning, never a failed backup.
    pub fn create_backup(&self, db: Option<&Database>) -> Result<BackupOutcome, BackupError> {
        let mut warning = None;
        let dump = match db {
            Some(db) => match SqlDumper::new(db).dump() {
                Ok(dump) => Some(dump),
                Err(e) => {
                    warn!(error = %e, "database dump failed, archiving files only");
                    warning = Some(format!("database dump skipped: {}", e));
                    None
                }
            },
            None => None,
        };

        let file_name = format!("backup-{}.zip", Utc::now().format("%Y%m%d-%H%M%S"));
        let dest = self.store_dir().join(&file_name);
        let excluded = self.config.excluded_top_level();
        let summary =
            ArchiveWriter::write(&self.live_root, &excluded, dump.as_deref(), &dest)?;

        info!(path = %summary.path.display(), size = summary.size_bytes, "backup created");
        Ok(BackupOutcome {
            path: summary.path,
            size_bytes: summary.size_bytes,
            warning,
        })
    }

    /// All stored archives, newest first.
    pub fn list(&self) -> Result<Vec<BackupRecord>, BackupError> {
        let store = self.store_dir();
        let mut records = Vec::new();
        if !store.exists() {
            return Ok(records);
        }

        for entry in fs::read_dir(&store)? {
            let entry = entry?;
            let path = entry.path();
            if !path.is_file() || path.extension().map(|e| e != "zip").unwrap_or(true) {
                continue;
            }
            let metadata = entry.metadata()?;
            records.push(BackupRecord {
                file_name: entry.file_name().to_string_lossy().to_string(),
                size_bytes: metadata.len(),
                created_at: DateTime::from(metadata.modified()?),
            });
        }

        records.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| b.file_name.cmp(&a.file_name))
        });
        Ok(records)
    }

    /// The newest archive, if any — the update flow's precondition check.
    pub fn latest(&self) -> Result<Option<BackupRecord>, BackupError> {
        Ok(self.list()?.into_iter().next())
    }

    pub fn delete(&self, file_name: &str) -> Result<(), BackupError> {
        let path = self.archive_path(file_name)?;
        if !path.exists() {
            return Err(BackupError::NotFound(file_name.to_string()));
        }
        fs::remove_file(&path)?;
        info!(file = file_name, "backup deleted");
        Ok(())
    }

    pub fn verify(&self, file_name: &str) -> Result<VerificationReport, BackupError> {
        let path = self.archive_path(file_name)?;
        if !path.exists() {
            return Err(BackupError::NotFound(file_name.to_string()));
        }
        Ok(ArchiveReader::verify(&path)?)
    }

    /// Re-apply a stored archive. Order: database first (fatal on
    /// failure — no partial DB restore), then files with snapshots of
    /// everything overwritten. The scratch extraction is removed on every
    /// exit path.
    pub fn restore(
        &self,
        file_name: &str,
        request: RestoreRequest,
        db: Option<&Database>,
    ) -> Result<RestoreOutcome, BackupError> {
        request.validate()?;
        let path = self.archive_path(file_name)?;
        if !path.exists() {
            return Err(BackupError::NotFound(file_name.to_string()));
        }

        let scratch_parent = self.scratch_parent();
        fs::create_dir_all(&scratch_parent)?;
        let extracted = ArchiveReader::extract(&path, &scratch_parent)?;

        let mut outcome = RestoreOutcome::default();

        if request.database {
            let db = db.ok_or_else(|| {
                BackupError::Database(DatabaseError::NotFound(
                    "no database configured for restore".to_string(),
                ))
            })?;
            let report = SqlApplier::new(db).apply_file(&extracted.sql_path)?;
            info!(
                executed = report.executed,
                skipped = report.skipped.len(),
                "database restored"
            );
            outcome.apply = Some(report);
        }

        if request.files {
            // The reserved entry is data, not a site file.
            fs::remove_file(&extracted.sql_path)?;

            let policy = PathPolicy::for_restore(
                &self.config.protected,
                &self.always_protected_dirs(),
                request.overrides,
            );
            let sync = FileSync::new(&policy, SnapshotMode::Keep);
            let written = sync.sync_tree(extracted.scratch.path(), &self.live_root)?;
            info!(files = written.len(), "files restored");
            outcome.restored_files = written;
        }

        Ok(outcome)
    }

    /// Walk the live tree and classify every file: excluded (under a
    /// store/scratch/log top-level directory, never archived), protected
    /// (archived but never overwritten by update or restore), or plain.
    pub fn scan(&self) -> Result<ScanReport, BackupError> {
        let excluded = self.config.excluded_top_level();
        let policy = PathPolicy::for_update(&self.config.protected, &self.always_protected_dirs());
        let mut report = ScanReport::default();
        self.scan_dir(&self.live_root, &excluded, &policy, true, &mut report)?;
        Ok(report)
    }

    fn scan_dir(
        &self,
        dir: &Path,
        excluded: &[String],
        policy: &PathPolicy,
        top_level: bool,
        report: &mut ScanReport,
    ) -> Result<(), BackupError> {
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            let path = entry.path();
            let name = entry.file_name().to_string_lossy().to_string();

            if path.is_dir() {
                if top_level && excluded.iter().any(|x| *x == name) {
                    report.excluded_files += count_files(&path)?;
                    continue;
                }
                self.scan_dir(&path, excluded, policy, false, report)?;
                continue;
            }

            report.total_files += 1;
            report.total_bytes += entry.metadata()?.len();
            let relative = path.strip_prefix(&self.live_root).unwrap_or(&path);
            if policy.is_protected(relative) {
                report.protected_files += 1;
            }
        }
        Ok(())
    }

    /// Store, scratch and state directories stay protected no matter what
    /// the operator opts into.
    pub fn always_protected_dirs(&self) -> Vec<String> {
        vec![
            self.config.store.backup_dir.clone(),
            self.config.store.scratch_dir.clone(),
            STATE_DIR.to_string(),
        ]
    }

    fn archive_path(&self, file_name: &str) -> Result<PathBuf, BackupError> {
        // Archive names come from operator input; keep them inside the store.
        if file_name.contains('/') || file_name.contains('\\') || file_name.contains("..") {
            return Err(BackupError::InvalidName(file_name.to_string()));
        }
        Ok(self.store_dir().join(file_name))
    }
}

fn count_files(dir: &Path) -> Result<usize, std::io::Error> {
    let mut count = 0;
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() {
            count += count_files(&path)?;
        } else {
            count += 1;
        }
    }
    Ok(count)
}
