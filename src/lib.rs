//! Sitekeeper - Backup, restore and self-update pipeline for a live site tree
//!
//! The engine archives the site's files and SQLite database into a single
//! zip, restores them with path protection, and applies downloaded
//! releases through a backup-gated state machine.

pub mod engine;
