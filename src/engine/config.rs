//! Sitekeeper Configuration Module
//! Handles loading and validating sitekeeper.config.json

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Directory at the live root holding sitekeeper's own state files
/// (update-state.json). Never archived, never overwritten.
pub const STATE_DIR: &str = ".sitekeeper";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Config file not found: {0}")]
    NotFound(PathBuf),
    #[error("Failed to read config: {0}")]
    ReadError(#[from] std::io::Error),
    #[error("Invalid config format: {0}")]
    ParseError(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub version: String,
    pub store: StoreConfig,
    pub database: DatabaseConfig,
    #[serde(default)]
    pub protected: ProtectedConfig,
    #[serde(default)]
    pub retention: RetentionConfig,
    #[serde(default)]
    pub release: ReleaseConfig,
}

/// On-disk layout of the live tree: where archives, scratch extractions
/// and logs live, all relative to the live root.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_backup_dir")]
    pub backup_dir: String,
    #[serde(default = "default_scratch_dir")]
    pub scratch_dir: String,
    #[serde(default = "default_log_dir")]
    pub log_dir: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(rename = "type")]
    pub db_type: String,
    pub path: PathBuf,
}

/// Path classes that restore and update operations must never overwrite.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProtectedConfig {
    #[serde(default = "default_protected_dirs")]
    pub dirs: Vec<String>,
    #[serde(default = "default_protected_files")]
    pub files: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetentionConfig {
    /// Archives older than this are eligible for deletion.
    #[serde(default = "default_max_age_days")]
    pub max_age_days: u64,
    /// This many most-recent archives always survive a sweep.
    #[serde(default = "default_keep_min")]
    pub keep_min: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReleaseConfig {
    /// "Latest release" metadata endpoint.
    #[serde(default = "default_release_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_fresh_ttl_secs")]
    pub fresh_ttl_secs: u64,
    #[serde(default = "default_fallback_ttl_secs")]
    pub fallback_ttl_secs: u64,
    #[serde(default = "default_metadata_timeout_secs")]
    pub metadata_timeout_secs: u64,
    #[serde(default = "default_download_timeout_secs")]
    pub download_timeout_secs: u64,
}

fn default_backup_dir() -> String {
    "backups".to_string()
}

fn default_scratch_dir() -> String {
    "tmp".to_string()
}

fn default_log_dir() -> String {
    "logs".to_string()
}

fn default_protected_dirs() -> Vec<String> {
    vec![
        "config".to_string(),
        "uploads".to_string(),
        "logs".to_string(),
        "backups".to_string(),
    ]
}

fn default_protected_files() -> Vec<String> {
    vec![
        ".env".to_string(),
        ".htaccess".to_string(),
        "web.config".to_string(),
    ]
}

fn default_max_age_days() -> u64 {
    60
}

fn default_keep_min() -> usize {
    5
}

fn default_release_endpoint() -> String {
    "https://api.github.com/repos/sitekeeper/sitekeeper/releases/latest".to_string()
}

fn default_fresh_ttl_secs() -> u64 {
    300
}

fn default_fallback_ttl_secs() -> u64 {
    86_400
}

fn default_metadata_timeout_secs() -> u64 {
    30
}

fn default_download_timeout_secs() -> u64 {
    300
}

impl Default for ProtectedConfig {
    fn default() -> Self {
        Self {
            dirs: default_protected_dirs(),
            files: default_protected_files(),
        }
    }
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            max_age_days: default_max_age_days(),
            keep_min: default_keep_min(),
        }
    }
}

impl Default for ReleaseConfig {
    fn default() -> Self {
        Self {
            endpoint: default_release_endpoint(),
            fresh_ttl_secs: default_fresh_ttl_secs(),
            fallback_ttl_secs: default_fallback_ttl_secs(),
            metadata_timeout_secs: default_metadata_timeout_secs(),
            download_timeout_secs: default_download_timeout_secs(),
        }
    }
}

impl Config {
    pub fn load(live_root: &Path) -> Result<Self, ConfigError> {
        let config_path = live_root.join("sitekeeper.config.json");
        if !config_path.exists() {
            return Err(ConfigError::NotFound(config_path));
        }
        let content = std::fs::read_to_string(&config_path)?;
        let config: Config = serde_json::from_str(&content)?;
        Ok(config)
    }

    pub fn save(&self, live_root: &Path) -> Result<(), ConfigError> {
        let config_path = live_root.join("sitekeeper.config.json");
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(&config_path, content)?;
        Ok(())
    }

    pub fn default_for_root() -> Self {
        Self {
            version: env!("CARGO_PKG_VERSION").to_string(),
            store: StoreConfig {
                backup_dir: default_backup_dir(),
                scratch_dir: default_scratch_dir(),
                log_dir: default_log_dir(),
            },
            database: DatabaseConfig {
                db_type: "sqlite".to_string(),
                path: PathBuf::from("./data/site.db"),
            },
            protected: ProtectedConfig::default(),
            retention: RetentionConfig::default(),
            release: ReleaseConfig::default(),
        }
    }

    /// Top-level directory names a backup walk must never descend into.
    /// Archiving the backup store would nest every previous archive inside
    /// the next one, and archiving the state directory would let a restore
    /// clobber the live update flow.
    pub fn excluded_top_level(&self) -> Vec<String> {
        vec![
            self.store.backup_dir.clone(),
            self.store.scratch_dir.clone(),
            self.store.log_dir.clone(),
            STATE_DIR.to_string(),
        ]
    }
}
