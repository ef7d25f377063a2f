//! Sitekeeper CLI - Main entry point for CLI binary
//!
//! This binary provides the `sitekeeper` tool for backup, restore and
//! self-update of a live site tree.

use clap::Parser;
use sitekeeper_lib::engine::{
    backup::{BackupManager, RestoreRequest},
    cli::{
        formatter::{format_size, CliFormatter},
        BackupAction, Cli, Commands, OutputFormat, UpdateAction,
    },
    config::Config,
    database::Database,
    policy::RestoreOverrides,
    retention::RetentionSweeper,
    updater::{state::phase_name, UpdatePhase, Updater},
};
use std::path::Path;
use tracing_subscriber::EnvFilter;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    if let Err(e) = run_cli(cli) {
        CliFormatter::error(&e.to_string());
        std::process::exit(1);
    }
}

fn run_cli(cli: Cli) -> anyhow::Result<()> {
    let live_root = cli.live_root();
    let json_output = cli.format == OutputFormat::Json;

    match cli.command {
        Commands::Init => {
            cmd_init(&live_root, json_output)?;
        }
        Commands::Backup { action } => {
            cmd_backup(action, &live_root, json_output)?;
        }
        Commands::Update { action } => {
            cmd_update(action, &live_root, json_output)?;
        }
        Commands::Sweep => {
            cmd_sweep(&live_root, json_output)?;
        }
        Commands::Scan => {
            cmd_scan(&live_root, json_output)?;
        }
        Commands::Status => {
            cmd_status(&live_root, json_output)?;
        }
    }

    Ok(())
}

/// Open the configured database when its file exists. A missing database
/// degrades backups to files-only instead of failing.
fn open_db_if_present(live_root: &Path, config: &Config) -> Option<Database> {
    let db_path = live_root.join(&config.database.path);
    if !db_path.exists() {
        return None;
    }
    Database::open_existing(&db_path).ok()
}

fn cmd_init(live_root: &Path, json: bool) -> anyhow::Result<()> {
    let config_path = live_root.join("sitekeeper.config.json");
    if config_path.exists() {
        anyhow::bail!("Config already exists: {}", config_path.display());
    }

    let config = Config::default_for_root();
    config.save(live_root)?;
    std::fs::create_dir_all(live_root.join(&config.store.backup_dir))?;
    std::fs::create_dir_all(live_root.join(&config.store.scratch_dir))?;
    std::fs::create_dir_all(live_root.join(&config.store.log_dir))?;

    if json {
        println!(
            "{}",
            serde_json::json!({
                "success": true,
                "config": config_path.display().to_string()
            })
        );
    } else {
        CliFormatter::success(&format!("Created {}", config_path.display()));
        CliFormatter::info("Edit the database path, then run `sitekeeper backup create`");
    }
    Ok(())
}

fn cmd_backup(
    action: BackupAction,
    live_root: &Path,
    json: bool,
) -> anyhow::Result<()> {
    let config = Config::load(live_root)?;
    let manager = BackupManager::new(live_root, config.clone())?;

    match action {
        BackupAction::Create => {
            let db = open_db_if_present(live_root, &config);
            let outcome = manager.create_backup(db.as_ref())?;
            if json {
                println!(
                    "{}",
                    serde_json::json!({
                        "success": true,
                        "path": outcome.path.display().to_string(),
                        "size_bytes": outcome.size_bytes,
                        "warning": outcome.warning
                    })
                );
            } else {
                CliFormatter::success(&format!(
                    "Backup created: {} ({})",
                    outcome.path.display(),
                    format_size(outcome.size_bytes)
                ));
                if let Some(warning) = &outcome.warning {
                    CliFormatter::warning(warning);
                }
            }
        }
        BackupAction::List => {
            let records = manager.list()?;
            if json {
                println!("{}", serde_json::to_string_pretty(&records)?);
            } else if records.is_empty() {
                CliFormatter::info("No backups stored");
            } else {
                CliFormatter::header("Stored backups");
                for record in &records {
                    CliFormatter::item(&format!(
                        "{}  {}  {}",
                        record.file_name,
                        format_size(record.size_bytes),
                        record.created_at.format("%Y-%m-%d %H:%M:%S")
                    ));
                }
            }
        }
        BackupAction::Verify { name } => {
            let report = manager.verify(&name)?;
            if json {
                println!(
                    "{}",
                    serde_json::json!({
                        "file_count": report.file_count,
                        "total_size": report.total_size,
                        "has_dump": report.has_dump,
                        "traversal_entries": report.traversal_entries
                    })
                );
            } else {
                CliFormatter::success(&format!(
                    "Archive is sound: {} files, {} uncompressed",
                    report.file_count,
                    format_size(report.total_size)
                ));
                if !report.traversal_entries.is_empty() {
                    CliFormatter::warning(&format!(
                        "{} entries with traversal components will be skipped on restore",
                        report.traversal_entries.len()
                    ));
                }
            }
        }
        BackupAction::Restore {
            name,
            database,
            files,
            include_config,
            include_rewrite,
            include_logs,
            include_uploads,
        } => {
            let request = RestoreRequest {
                database,
                files,
                overrides: RestoreOverrides {
                    include_config,
                    include_rewrite,
                    include_logs,
                    include_uploads,
                },
            };
            let db = if database {
                Some(Database::new(&live_root.join(&config.database.path))?)
            } else {
                None
            };
            let outcome = manager.restore(&name, request, db.as_ref())?;

            if json {
                println!(
                    "{}",
                    serde_json::json!({
                        "success": true,
                        "statements_executed": outcome.apply.as_ref().map(|r| r.executed),
                        "statements_skipped": outcome.apply.as_ref().map(|r| r.skipped.len()),
                        "restored_files": outcome.restored_files
                    })
                );
            } else {
                if let Some(report) = &outcome.apply {
                    CliFormatter::success(&format!(
                        "Database restored: {} statements executed",
                        report.executed
                    ));
                    for (index, reason) in &report.skipped {
                        CliFormatter::warning(&format!("Statement {} skipped: {}", index, reason));
                    }
                }
                if files {
                    CliFormatter::success(&format!(
                        "Files restored: {} written",
                        outcome.restored_files.len()
                    ));
                }
            }
        }
        BackupAction::Delete { name } => {
            manager.delete(&name)?;
            if json {
                println!("{}", serde_json::json!({ "success": true, "deleted": name }));
            } else {
                CliFormatter::success(&format!("Deleted {}", name));
            }
        }
    }

    Ok(())
}

fn cmd_update(
    action: UpdateAction,
    live_root: &Path,
    json: bool,
) -> anyhow::Result<()> {
    let config = Config::load(live_root)?;
    let updater = Updater::new(live_root, config.clone())?;

    match action {
        UpdateAction::Check => cmd_update_check(&updater, json)?,
        UpdateAction::Download => {
            let manager = BackupManager::new(live_root, config)?;
            cmd_update_download(&updater, &manager, json)?;
        }
        UpdateAction::Apply => {
            let outcome = updater.apply()?;
            if json {
                println!(
                    "{}",
                    serde_json::json!({
                        "success": true,
                        "version": outcome.version,
                        "files_written": outcome.files_written
                    })
                );
            } else {
                CliFormatter::success(&format!(
                    "Updated to {}: {} files written",
                    outcome.version,
                    outcome.files_written.len()
                ));
            }
        }
        UpdateAction::Status => {
            let state = updater.state()?;
            if json {
                println!("{}", serde_json::to_string_pretty(&state)?);
            } else {
                CliFormatter::header("Update status");
                CliFormatter::kv("Phase", phase_name(&state.phase));
                if let Some(checked) = state.last_check {
                    CliFormatter::kv("Last check", &checked.format("%Y-%m-%d %H:%M:%S").to_string());
                }
                match &state.phase {
                    UpdatePhase::Checked { release }
                    | UpdatePhase::BackupConfirmed { release, .. }
                    | UpdatePhase::Downloaded { release, .. }
                    | UpdatePhase::Applying { release } => {
                        CliFormatter::kv("Release", &release.tag);
                    }
                    UpdatePhase::Applied { version, files_written } => {
                        CliFormatter::kv("Applied", version);
                        CliFormatter::kv("Files written", &files_written.to_string());
                    }
                    UpdatePhase::Failed { reason } => {
                        CliFormatter::kv("Failure", reason);
                    }
                    UpdatePhase::Idle => {}
                }
            }
        }
        UpdateAction::Reset => {
            let mut state = updater.state()?;
            state.reset();
            state.save(&updater.state_path())?;
            if json {
                println!("{}", serde_json::json!({ "success": true }));
            } else {
                CliFormatter::success("Update flow reset to idle");
            }
        }
    }

    Ok(())
}

#[tokio::main]
async fn cmd_update_check(updater: &Updater, json: bool) -> anyhow::Result<()> {
    let release = updater.check().await?;
    if json {
        println!("{}", serde_json::to_string_pretty(&release)?);
    } else {
        CliFormatter::success(&format!("Latest release: {}", release.tag));
        CliFormatter::kv("Published", &release.published_at.format("%Y-%m-%d").to_string());
        if let Some(size) = release.size {
            CliFormatter::kv("Payload", &format_size(size));
        }
        if !release.body.is_empty() {
            CliFormatter::kv("Notes", &release.body);
        }
        CliFormatter::info("Run `sitekeeper update download` to continue");
    }
    Ok(())
}

#[tokio::main]
async fn cmd_update_download(
    updater: &Updater,
    manager: &BackupManager,
    json: bool,
) -> anyhow::Result<()> {
    let record = updater.confirm_backup(manager)?;
    if !json {
        CliFormatter::info(&format!("Backup confirmed: {}", record.file_name));
    }

    let (payload, bytes) = updater.download().await?;
    if json {
        println!(
            "{}",
            serde_json::json!({
                "success": true,
                "backup": record.file_name,
                "payload": payload.display().to_string(),
                "bytes": bytes
            })
        );
    } else {
        CliFormatter::success(&format!(
            "Downloaded {} to {}",
            format_size(bytes),
            payload.display()
        ));
        CliFormatter::info("Run `sitekeeper update apply` to install");
    }
    Ok(())
}

fn cmd_sweep(live_root: &Path, json: bool) -> anyhow::Result<()> {
    let config = Config::load(live_root)?;
    let manager = BackupManager::new(live_root, config.clone())?;
    let sweeper = RetentionSweeper::from_days(config.retention.max_age_days, config.retention.keep_min);
    let report = sweeper.sweep(&manager.store_dir())?;

    if json {
        println!(
            "{}",
            serde_json::json!({
                "deleted": report.deleted,
                "bytes_freed": report.bytes_freed
            })
        );
    } else if report.deleted == 0 {
        CliFormatter::info("Nothing to sweep");
    } else {
        CliFormatter::success(&format!(
            "Swept {} old archives, freed {}",
            report.deleted,
            format_size(report.bytes_freed)
        ));
    }
    Ok(())
}

fn cmd_scan(live_root: &Path, json: bool) -> anyhow::Result<()> {
    let config = Config::load(live_root)?;
    let manager = BackupManager::new(live_root, config)?;
    let report = manager.scan()?;

    if json {
        println!(
            "{}",
            serde_json::json!({
                "total_files": report.total_files,
                "protected_files": report.protected_files,
                "excluded_files": report.excluded_files,
                "total_bytes": report.total_bytes
            })
        );
    } else {
        CliFormatter::header("Live tree scan");
        CliFormatter::kv("Files to archive", &report.total_files.to_string());
        CliFormatter::kv("Protected on write", &report.protected_files.to_string());
        CliFormatter::kv("Excluded from archive", &report.excluded_files.to_string());
        CliFormatter::kv("Archive input size", &format_size(report.total_bytes));
    }
    Ok(())
}

fn cmd_status(live_root: &Path, json: bool) -> anyhow::Result<()> {
    let config = Config::load(live_root)?;
    let manager = BackupManager::new(live_root, config.clone())?;
    let records = manager.list()?;
    let updater = Updater::new(live_root, config.clone())?;
    let state = updater.state()?;
    let db_present = live_root.join(&config.database.path).exists();

    if json {
        println!(
            "{}",
            serde_json::json!({
                "live_root": live_root.display().to_string(),
                "database": config.database.path.display().to_string(),
                "database_present": db_present,
                "backups": records.len(),
                "latest_backup": records.first().map(|r| r.file_name.clone()),
                "update_phase": phase_name(&state.phase)
            })
        );
    } else {
        CliFormatter::header("Sitekeeper status");
        CliFormatter::kv("Live root", &live_root.display().to_string());
        CliFormatter::kv(
            "Database",
            &format!(
                "{} ({})",
                config.database.path.display(),
                if db_present { "present" } else { "missing" }
            ),
        );
        CliFormatter::kv("Backups stored", &records.len().to_string());
        if let Some(latest) = records.first() {
            CliFormatter::kv("Latest backup", &latest.file_name);
        }
        CliFormatter::kv("Update phase", phase_name(&state.phase));
    }
    Ok(())
}
