//! Update State Machine
//! Explicit phases prevent a destructive apply from skipping its preconditions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::engine::release::ReleaseDescriptor;

/// Where the update flow currently stands. Persisted so an interrupted
/// flow resumes (or reports) instead of silently starting over.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "phase", rename_all = "snake_case")]
pub enum UpdatePhase {
    /// No update in progress
    Idle,
    /// Latest release known
    Checked { release: ReleaseDescriptor },
    /// A backup archive is confirmed present on disk
    BackupConfirmed {
        release: ReleaseDescriptor,
        backup_file: String,
    },
    /// Payload downloaded and ready to apply
    Downloaded {
        release: ReleaseDescriptor,
        payload: PathBuf,
    },
    /// FileSync in progress
    Applying { release: ReleaseDescriptor },
    /// Update applied
    Applied { version: String, files_written: usize },
    /// Update failed
    Failed { reason: String },
}

impl Default for UpdatePhase {
    fn default() -> Self {
        Self::Idle
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct UpdateState {
    #[serde(default)]
    pub phase: UpdatePhase,
    pub last_check: Option<DateTime<Utc>>,
}

/// State machine errors
#[derive(Debug, Clone, thiserror::Error)]
pub enum StateError {
    #[error("Failed to read update state: {0}")]
    Read(String),
    #[error("Failed to write update state: {0}")]
    Write(String),
    #[error("Failed to parse update state: {0}")]
    Parse(String),
    #[error("Precondition not met: {0}")]
    Precondition(String),
}

impl UpdateState {
    /// Load state from disk, or default if none exists yet.
    pub fn load(state_path: &Path) -> Result<Self, StateError> {
        if state_path.exists() {
            let content =
                fs::read_to_string(state_path).map_err(|e| StateError::Read(e.to_string()))?;
            serde_json::from_str(&content).map_err(|e| StateError::Parse(e.to_string()))
        } else {
            Ok(Self::default())
        }
    }

    /// Save state atomically: temp file, then rename.
    pub fn save(&self, state_path: &Path) -> Result<(), StateError> {
        if let Some(parent) = state_path.parent() {
            fs::create_dir_all(parent).map_err(|e| StateError::Write(e.to_string()))?;
        }
        let content =
            serde_json::to_string_pretty(self).map_err(|e| StateError::Write(e.to_string()))?;
        let temp_path = state_path.with_extension("tmp");
        fs::write(&temp_path, &content).map_err(|e| StateError::Write(e.to_string()))?;
        fs::rename(&temp_path, state_path).map_err(|e| StateError::Write(e.to_string()))?;
        Ok(())
    }

    pub fn mark_checked(&mut self, release: ReleaseDescriptor) {
        self.phase = UpdatePhase::Checked { release };
        self.last_check = Some(Utc::now());
    }

    /// `Checked → BackupConfirmed`. Confirming a backup for a release that
    /// was never checked is a sequencing bug.
    pub fn mark_backup_confirmed(&mut self, backup_file: String) -> Result<(), StateError> {
        match &self.phase {
            UpdatePhase::Checked { release } => {
                self.phase = UpdatePhase::BackupConfirmed {
                    release: release.clone(),
                    backup_file,
                };
                Ok(())
            }
            other => Err(StateError::Precondition(format!(
                "cannot confirm backup from phase {}",
                phase_name(other)
            ))),
        }
    }

    /// `BackupConfirmed → Downloaded`. Downloading without a confirmed
    /// backup is refused; the backup is the only rollback path.
    pub fn mark_downloaded(&mut self, payload: PathBuf) -> Result<ReleaseDescriptor, StateError> {
        match &self.phase {
            UpdatePhase::BackupConfirmed { release, .. } => {
                let release = release.clone();
                self.phase = UpdatePhase::Downloaded {
                    release: release.clone(),
                    payload,
                };
                Ok(release)
            }
            other => Err(StateError::Precondition(format!(
                "cannot download from phase {}: confirm a backup first",
                phase_name(other)
            ))),
        }
    }

    /// `Downloaded → Applying`, returning what to apply.
    pub fn mark_applying(&mut self) -> Result<(ReleaseDescriptor, PathBuf), StateError> {
        match &self.phase {
            UpdatePhase::Downloaded { release, payload } => {
                let release = release.clone();
                let payload = payload.clone();
                self.phase = UpdatePhase::Applying {
                    release: release.clone(),
                };
                Ok((release, payload))
            }
            other => Err(StateError::Precondition(format!(
                "cannot apply from phase {}: download a payload first",
                phase_name(other)
            ))),
        }
    }

    pub fn mark_applied(&mut self, version: String, files_written: usize) {
        self.phase = UpdatePhase::Applied {
            version,
            files_written,
        };
    }

    pub fn mark_failed(&mut self, reason: String) {
        self.phase = UpdatePhase::Failed { reason };
    }

    pub fn reset(&mut self) {
        self.phase = UpdatePhase::Idle;
    }
}

pub fn phase_name(phase: &UpdatePhase) -> &'static str {
    match phase {
        UpdatePhase::Idle => "idle",
        UpdatePhase::Checked { .. } => "checked",
        UpdatePhase::BackupConfirmed { .. } => "backup_confirmed",
        UpdatePhase::Downloaded { .. } => "downloaded",
        UpdatePhase::Applying { .. } => "applying",
        UpdatePhase::Applied { .. } => "applied",
        UpdatePhase::Failed { .. } => "failed",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

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

    #[test]
    fn test_happy_path_transitions() {
        let mut state = UpdateState::default();
        assert_eq!(state.phase, UpdatePhase::Idle);

        state.mark_checked(release("v2.0.0"));
        assert!(state.last_check.is_some());

        state.mark_backup_confirmed("backup-1.zip".to_string()).unwrap();
        let release = state.mark_downloaded(PathBuf::from("/tmp/update.zip")).unwrap();
        assert_eq!(release.tag, "v2.0.0");

        let (release, payload) = state.mark_applying().unwrap();
        assert_eq!(release.tag, "v2.0.0");
        assert_eq!(payload, PathBuf::from("/tmp/update.zip"));

        state.mark_applied("v2.0.0".to_string(), 12);
        assert!(matches!(state.phase, UpdatePhase::Applied { .. }));
    }

    #[test]
    fn test_download_without_backup_refused() {
        let mut state = UpdateState::default();
        state.mark_checked(release("v2.0.0"));

        let result = state.mark_downloaded(PathBuf::from("/tmp/update.zip"));
        assert!(matches!(result, Err(StateError::Precondition(_))));
    }

    #[test]
    fn test_apply_without_download_refused() {
        let mut state = UpdateState::default();
        state.mark_checked(release("v2.0.0"));
        state.mark_backup_confirmed("backup-1.zip".to_string()).unwrap();

        assert!(matches!(state.mark_applying(), Err(StateError::Precondition(_))));
    }

    #[test]
    fn test_state_persistence_roundtrip() {
        let dir = tempdir().unwrap();
        let state_path = dir.path().join("state/update-state.json");

        let mut state = UpdateState::default();
        state.mark_checked(release("v3.1.4"));
        state.save(&state_path).unwrap();

        let loaded = UpdateState::load(&state_path).unwrap();
        match loaded.phase {
            UpdatePhase::Checked { release } => assert_eq!(release.tag, "v3.1.4"),
            other => panic!("unexpected phase {:?}", other),
        }
        assert!(!state_path.with_extension("tmp").exists());
    }

    #[test]
    fn test_missing_state_defaults_to_idle() {
        let dir = tempdir().unwrap();
        let state = UpdateState::load(&dir.path().join("none.json")).unwrap();
        assert_eq!(state.phase, UpdatePhase::Idle);
    }
}
