//! Protection-Rule Engine
//! Decides which relative paths restore and update operations may write.

use serde::{Deserialize, Serialize};
use std::path::Path;

use super::config::ProtectedConfig;

/// Categories an operator may explicitly opt back in during a restore.
/// Updates never opt anything in.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct RestoreOverrides {
    #[serde(default)]
    pub include_config: bool,
    #[serde(default)]
    pub include_rewrite: bool,
    #[serde(default)]
    pub include_logs: bool,
    #[serde(default)]
    pub include_uploads: bool,
}

/// The effective protected set consulted per file by `FileSync`.
///
/// Directory entries match by prefix (`config` protects `config/app.json`
/// but not `configuration.txt`), file entries match the final path
/// component exactly.
#[derive(Debug, Clone)]
pub struct PathPolicy {
    dirs: Vec<String>,
    files: Vec<String>,
}

impl PathPolicy {
    /// Policy for update application: everything in the configured
    /// protected set plus the store and scratch directories.
    pub fn for_update(protected: &ProtectedConfig, always_dirs: &[String]) -> Self {
        Self::build(protected, always_dirs, RestoreOverrides::default())
    }

    /// Policy for a file restore: opted-in categories are lifted, the
    /// store and scratch directories stay protected unconditionally.
    pub fn for_restore(
        protected: &ProtectedConfig,
        always_dirs: &[String],
        overrides: RestoreOverrides,
    ) -> Self {
        Self::build(protected, always_dirs, overrides)
    }

    fn build(
        protected: &ProtectedConfig,
        always_dirs: &[String],
        overrides: RestoreOverrides,
    ) -> Self {
        let mut dirs: Vec<String> = protected
            .dirs
            .iter()
            .filter(|d| !Self::dir_lifted(d, overrides))
            .cloned()
            .collect();
        for always in always_dirs {
            if !dirs.iter().any(|d| d == always) {
                dirs.push(always.clone());
            }
        }

        let files = protected
            .files
            .iter()
            .filter(|f| !Self::file_lifted(f, overrides))
            .cloned()
            .collect();

        Self { dirs, files }
    }

    fn dir_lifted(dir: &str, overrides: RestoreOverrides) -> bool {
        match dir {
            "config" => overrides.include_config,
            "logs" => overrides.include_logs,
            "uploads" => overrides.include_uploads,
            _ => false,
        }
    }

    fn file_lifted(file: &str, overrides: RestoreOverrides) -> bool {
        match file {
            ".env" => overrides.include_config,
            ".htaccess" | "web.config" => overrides.include_rewrite,
            _ => false,
        }
    }

    /// Whether `relative` falls inside the protected set. Pure and total:
    /// any path shape yields an answer, never an error.
    pub fn is_protected(&self, relative: &Path) -> bool {
        is_protected(relative, &self.dirs, &self.files)
    }
}

/// A path is protected when it starts with a protected directory prefix
/// followed by a separator (or is the directory itself), or when its final
/// component exactly matches a protected filename.
pub fn is_protected(relative: &Path, dirs: &[String], files: &[String]) -> bool {
    let normalized = normalize(relative);

    for dir in dirs {
        let dir = dir.trim_end_matches('/');
        if dir.is_empty() {
            continue;
        }
        if normalized == dir || normalized.starts_with(&format!("{}/", dir)) {
            return true;
        }
    }

    if let Some(name) = normalized.rsplit('/').next() {
        if files.iter().any(|f| f == name) {
            return true;
        }
    }

    false
}

fn normalize(path: &Path) -> String {
    let raw = path.to_string_lossy();
    let forward = raw.replace('\\', "/");
    forward.trim_start_matches("./").trim_matches('/').to_string()
}
