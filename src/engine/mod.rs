// Sitekeeper Engine - Core module structure
pub mod apply;
pub mod archive;
pub mod backup;
pub mod cli;
pub mod config;
pub mod database;
pub mod dump;
pub mod policy;
pub mod release;
pub mod retention;
pub mod sync;
pub mod updater;

pub use backup::BackupManager;
pub use config::Config;
pub use database::Database;
pub use updater::Updater;
