//! Sitekeeper Self-Update Flow
//!
//! Composes the release fetcher, archive reader and file sync into the
//! guarded pipeline `check → confirm backup → download → apply`.
//!
//! Components:
//! - `state` - persisted update state machine

pub mod state;

pub use state::{UpdatePhase, UpdateState};

use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{error, info};

use super::archive::{ArchiveError, ArchiveReader};
use super::backup::{BackupError, BackupManager, BackupRecord};
use super::config::{Config, STATE_DIR};
use super::policy::PathPolicy;
use super::release::{ReleaseDescriptor, ReleaseError, ReleaseFetcher};
use super::sync::{FileSync, SnapshotMode, SyncError};
use state::StateError;

#[derive(Error, Debug)]
pub enum UpdateError {
    #[error(transparent)]
    Release(#[from] ReleaseError),
    #[error(transparent)]
    Archive(#[from] ArchiveError),
    #[error(transparent)]
    Sync(#[from] SyncError),
    #[error(transparent)]
    State(#[from] StateError),
    #[error("No backup on disk: create and verify a backup before updating")]
    NoBackup,
    #[error("Backup store error: {0}")]
    Backup(#[from] BackupError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// What an apply pass wrote. On failure the same information travels
/// inside `SyncError` so nothing about drift is hidden.
#[derive(Debug)]
pub struct ApplyOutcome {
    pub version: String,
    pub files_written: Vec<String>,
}

pub struct Updater {
    live_root: PathBuf,
    config: Config,
    fetcher: ReleaseFetcher,
}

impl Updater {
    pub fn new(live_root: &Path, config: Config) -> Result<Self, UpdateError> {
        let fetcher = ReleaseFetcher::new(&config.release)?;
        Ok(Self {
            live_root: live_root.to_path_buf(),
            config,
            fetcher,
        })
    }

    pub fn state_path(&self) -> PathBuf {
        self.live_root.join(STATE_DIR).join("update-state.json")
    }

    pub fn state(&self) -> Result<UpdateState, UpdateError> {
        Ok(UpdateState::load(&self.state_path())?)
    }

    /// `Idle → Checked`: fetch (or serve from cache) the latest release.
    pub async fn check(&self) -> Result<ReleaseDescriptor, UpdateError> {
        let release = self.fetcher.latest().await?;
        let mut state = self.state()?;
        state.mark_checked(release.clone());
        state.save(&self.state_path())?;
        info!(tag = %release.tag, "update available for download");
        Ok(release)
    }

    /// `Checked → BackupConfirmed`: refuse to move forward unless an
    /// archive is actually present on disk. This is the system's only
    /// safety net against a bad apply.
    pub fn confirm_backup(&self, manager: &BackupManager) -> Result<BackupRecord, UpdateError> {
        let record = manager.latest()?.ok_or(UpdateError::NoBackup)?;
        let path = manager.store_dir().join(&record.file_name);
        if !path.exists() {
            return Err(UpdateError::NoBackup);
        }

        let mut state = self.state()?;
        state.mark_backup_confirmed(record.file_name.clone())?;
        state.save(&self.state_path())?;
        info!(backup = %record.file_name, "backup confirmed for update");
        Ok(record)
    }

    /// `BackupConfirmed → Downloaded`: stream the payload into the
    /// scratch area.
    pub async fn download(&self) -> Result<(PathBuf, u64), UpdateError> {
        let mut state = self.state()?;
        // Validate the transition before spending the bandwidth.
        let release = match &state.phase {
            UpdatePhase::BackupConfirmed { release, .. } => release.clone(),
            other => {
                return Err(StateError::Precondition(format!(
                    "cannot download from phase {}: confirm a backup first",
                    state::phase_name(other)
                ))
                .into())
            }
        };

        let payload = self
            .scratch_parent()
            .join(format!("update-{}.zip", sanitize_tag(&release.tag)));
        let bytes = self.fetcher.download(&release, &payload).await?;

        state.mark_downloaded(payload.clone())?;
        state.save(&self.state_path())?;
        info!(tag = %release.tag, bytes, "update payload downloaded");
        Ok((payload, bytes))
    }

    /// `Downloaded → Applying → Applied`: extract the payload and copy the
    /// non-protected files over the live tree. Scratch directory and
    /// payload are removed on success; a failure is recorded in the state
    /// file and propagated with the partial write list intact.
    pub fn apply(&self) -> Result<ApplyOutcome, UpdateError> {
        let mut state = self.state()?;
        let (release, payload) = state.mark_applying()?;
        state.save(&self.state_path())?;

        match self.apply_payload(&release, &payload) {
            Ok(outcome) => {
                fs::remove_file(&payload).ok();
                state.mark_applied(release.tag.clone(), outcome.files_written.len());
                state.save(&self.state_path())?;
                info!(
                    tag = %release.tag,
                    files = outcome.files_written.len(),
                    "update applied"
                );
                Ok(outcome)
            }
            Err(e) => {
                error!(tag = %release.tag, error = %e, "update apply failed");
                state.mark_failed(e.to_string());
                state.save(&self.state_path())?;
                Err(e)
            }
        }
    }

    fn apply_payload(
        &self,
        release: &ReleaseDescriptor,
        payload: &Path,
    ) -> Result<ApplyOutcome, UpdateError> {
        let scratch_parent = self.scratch_parent();
        fs::create_dir_all(&scratch_parent)?;
        let scratch = ArchiveReader::extract_payload(payload, &scratch_parent)?;

        let policy = PathPolicy::for_update(&self.config.protected, &self.always_protected());
        let sync = FileSync::new(&policy, SnapshotMode::None);
        let files_written = sync.sync_tree(scratch.path(), &self.live_root)?;

        Ok(ApplyOutcome {
            version: release.tag.clone(),
            files_written,
        })
    }

    fn scratch_parent(&self) -> PathBuf {
        self.live_root.join(&self.config.store.scratch_dir)
    }

    fn always_protected(&self) -> Vec<String> {
        vec![
            self.config.store.backup_dir.clone(),
            self.config.store.scratch_dir.clone(),
            STATE_DIR.to_string(),
        ]
    }
}

fn sanitize_tag(tag: &str) -> String {
    tag.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '.' || c == '-' { c } else { '-' })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::database::Database;
    use chrono::Utc;
    use std::io::Write;
    use tempfile::tempdir;
    use zip::write::SimpleFileOptions;

    fn release(tag: &str) -> ReleaseDescriptor {
        ReleaseDescriptor {
            tag: tag.to_string(),
            published_at: Utc::now(),
            body: String::new(),
            download_url: format!("https://example.test/{}.zip", tag),
            size: None,
            sha256: None,
        }
    }

    fn updater(root: &Path) -> Updater {
        Updater::new(root, Config::default_for_root()).unwrap()
    }

    fn seed_live(root: &Path) {
        fs::create_dir_all(root.join("config")).unwrap();
        fs::write(root.join("index.html"), "old index").unwrap();
        fs::write(root.join("config/app.json"), "live config").unwrap();
        fs::write(root.join(".env"), "live env").unwrap();
    }

    fn build_payload(dir: &Path) -> PathBuf {
        // An upstream release zip that tries to ship new config and env
        // files alongside the code.
        let payload = dir.join("payload.zip");
        let file = fs::File::create(&payload).unwrap();
        let mut zip = zip::ZipWriter::new(file);
        let options = SimpleFileOptions::default();
        for (name, content) in [
            ("index.html", "new index"),
            ("core/app.rs", "new core"),
            ("config/app.json", "shipped config"),
            (".env", "shipped env"),
        ] {
            zip.start_file(name, options).unwrap();
            zip.write_all(content.as_bytes()).unwrap();
        }
        zip.finish().unwrap();
        payload
    }

    #[test]
    fn test_confirm_backup_requires_archive_on_disk() {
        let dir = tempdir().unwrap();
        seed_live(dir.path());
        let updater = updater(dir.path());
        let manager = BackupManager::new(dir.path(), Config::default_for_root()).unwrap();

        let mut state = updater.state().unwrap();
        state.mark_checked(release("v2.0.0"));
        state.save(&updater.state_path()).unwrap();

        // Empty store: precondition fails before anything destructive.
        let result = updater.confirm_backup(&manager);
        assert!(matches!(result, Err(UpdateError::NoBackup)));
    }

    #[test]
    fn test_apply_protects_live_configuration() {
        let dir = tempdir().unwrap();
        seed_live(dir.path());
        let payload = build_payload(dir.path());
        let updater = updater(dir.path());
        let manager = BackupManager::new(dir.path(), Config::default_for_root()).unwrap();

        // Walk the state machine to Downloaded with a local payload.
        let db = Database::in_memory().unwrap();
        manager.create_backup(Some(&db)).unwrap();

        let mut state = updater.state().unwrap();
        state.mark_checked(release("v2.0.0"));
        state.save(&updater.state_path()).unwrap();
        updater.confirm_backup(&manager).unwrap();

        let mut state = updater.state().unwrap();
        state.mark_downloaded(payload.clone()).unwrap();
        state.save(&updater.state_path()).unwrap();

        let outcome = updater.apply().unwrap();
        assert_eq!(outcome.version, "v2.0.0");
        let mut written = outcome.files_written.clone();
        written.sort();
        assert_eq!(written, vec!["core/app.rs", "index.html"]);

        // Live files updated, protected ones byte-identical.
        assert_eq!(fs::read_to_string(dir.path().join("index.html")).unwrap(), "new index");
        assert_eq!(
            fs::read_to_string(dir.path().join("config/app.json")).unwrap(),
            "live config"
        );
        assert_eq!(fs::read_to_string(dir.path().join(".env")).unwrap(), "live env");

        // Payload removed, state landed on Applied.
        assert!(!payload.exists());
        match updater.state().unwrap().phase {
            UpdatePhase::Applied { version, files_written } => {
                assert_eq!(version, "v2.0.0");
                assert_eq!(files_written, 2);
            }
            other => panic!("unexpected phase {:?}", other),
        }
    }

    #[test]
    fn test_apply_with_corrupt_payload_records_failure() {
        let dir = tempdir().unwrap();
        seed_live(dir.path());
        let updater = updater(dir.path());
        let manager = BackupManager::new(dir.path(), Config::default_for_root()).unwrap();

        let db = Database::in_memory().unwrap();
        manager.create_backup(Some(&db)).unwrap();

        let payload = dir.path().join("corrupt.zip");
        fs::write(&payload, "not a zip").unwrap();

        let mut state = updater.state().unwrap();
        state.mark_checked(release("v2.0.0"));
        state.save(&updater.state_path()).unwrap();
        updater.confirm_backup(&manager).unwrap();
        let mut state = updater.state().unwrap();
        state.mark_downloaded(payload).unwrap();
        state.save(&updater.state_path()).unwrap();

        let result = updater.apply();
        assert!(matches!(result, Err(UpdateError::Archive(ArchiveError::Invalid(_)))));
        assert!(matches!(updater.state().unwrap().phase, UpdatePhase::Failed { .. }));
    }

    #[test]
    fn test_sanitize_tag() {
        assert_eq!(sanitize_tag("v2.2.0"), "v2.2.0");
        assert_eq!(sanitize_tag("v2/../../x"), "v2-..-..-x");
    }
}
