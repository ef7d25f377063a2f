//! Sitekeeper CLI Module
//! Command-line interface for backup, restore and update operations

use clap::{Parser, Subcommand};
use std::path::PathBuf;

pub mod formatter;

#[derive(Parser, Debug)]
#[command(name = "sitekeeper")]
#[command(version)]
#[command(about = "Backup, restore and self-update pipeline for a live site tree", long_about = None)]
pub struct Cli {
    /// Live site root (defaults to current directory)
    #[arg(short, long, global = true)]
    pub root: Option<PathBuf>,

    /// Output format (json for scripting)
    #[arg(short, long, global = true, default_value = "text")]
    pub format: OutputFormat,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Write a default sitekeeper.config.json into the live root
    Init,

    /// Backup management
    Backup {
        #[command(subcommand)]
        action: BackupAction,
    },

    /// Self-update management
    Update {
        #[command(subcommand)]
        action: UpdateAction,
    },

    /// Delete old archives past the retention window
    Sweep,

    /// Preview what a backup would archive and what stays protected
    Scan,

    /// Show store and configuration status
    Status,
}

#[derive(Subcommand, Debug)]
pub enum BackupAction {
    /// Create a new backup archive of the live tree and database
    Create,

    /// List stored archives, newest first
    List,

    /// Structurally verify a stored archive
    Verify {
        /// Archive file name
        name: String,
    },

    /// Restore a stored archive
    Restore {
        /// Archive file name
        name: String,

        /// Restore the database dump
        #[arg(long)]
        database: bool,

        /// Restore the file tree
        #[arg(long)]
        files: bool,

        /// Also overwrite configuration files (config/, .env)
        #[arg(long)]
        include_config: bool,

        /// Also overwrite rewrite files (.htaccess, web.config)
        #[arg(long)]
        include_rewrite: bool,

        /// Also overwrite the logs directory
        #[arg(long)]
        include_logs: bool,

        /// Also overwrite the uploads directory
        #[arg(long)]
        include_uploads: bool,
    },

    /// Delete a stored archive
    Delete {
        /// Archive file name
        name: String,
    },
}

#[derive(Subcommand, Debug)]
pub enum UpdateAction {
    /// Check for the latest release
    Check,

    /// Confirm a backup exists and download the release payload
    Download,

    /// Apply the downloaded payload over the live tree
    Apply,

    /// Show where the update flow currently stands
    Status,

    /// Reset the update flow to idle
    Reset,
}

impl Cli {
    pub fn live_root(&self) -> PathBuf {
        self.root
            .clone()
            .unwrap_or_else(|| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")))
    }
}
