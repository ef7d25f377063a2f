//! Archive Writer & Reader
//! Zip container bundling a file-tree snapshot with the reserved SQL dump.

use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;
use uuid::Uuid;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

/// Root entry name for the embedded database dump. An archive without it
/// is not a restore-type archive.
pub const DB_DUMP_ENTRY: &str = "backup.sql";

/// Reserved entry written when the backup carries no database component.
/// Keeps degraded archives restore-type: the reader validates them and a
/// database restore replays zero statements.
const FILES_ONLY_DUMP: &str = "-- Sitekeeper database dump\n-- No database component\n";

#[derive(Error, Debug)]
pub enum ArchiveError {
    #[error("Archive cannot be opened: {0}")]
    Invalid(String),
    #[error("Archive is incomplete: missing reserved entry '{DB_DUMP_ENTRY}'")]
    Incomplete,
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("Zip error: {0}")]
    Zip(#[from] zip::result::ZipError),
}

/// Where a finished archive landed.
#[derive(Debug)]
pub struct ArchiveSummary {
    pub path: PathBuf,
    pub size_bytes: u64,
}

pub struct ArchiveWriter;

impl ArchiveWriter {
    /// Build an archive from the live tree. Top-level directories named in
    /// `excluded` are not walked; the reserved entry always exists — the
    /// dump blob when one was produced, a comment-only stub otherwise. The
    /// archive is written under a `.partial` name and renamed only after a
    /// successful finish, so a crashed writer never leaves a
    /// plausible-looking artifact under the final name.
    pub fn write(
        root: &Path,
        excluded: &[String],
        sql_dump: Option<&str>,
        dest: &Path,
    ) -> Result<ArchiveSummary, ArchiveError> {
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent)?;
        }
        let partial = dest.with_extension("partial");

        let result = Self::write_partial(root, excluded, sql_dump, &partial);
        if let Err(e) = result {
            fs::remove_file(&partial).ok();
            return Err(e);
        }

        fs::rename(&partial, dest)?;
        let size_bytes = fs::metadata(dest)?.len();
        Ok(ArchiveSummary {
            path: dest.to_path_buf(),
            size_bytes,
        })
    }

    fn write_partial(
        root: &Path,
        excluded: &[String],
        sql_dump: Option<&str>,
        partial: &Path,
    ) -> Result<(), ArchiveError> {
        let file = File::create(partial)?;
        let mut zip = ZipWriter::new(file);
        let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

        add_dir(&mut zip, root, root, excluded, true, options)?;

        zip.start_file(DB_DUMP_ENTRY, options)?;
        zip.write_all(sql_dump.unwrap_or(FILES_ONLY_DUMP).as_bytes())?;

        let mut inner = zip.finish()?;
        inner.flush()?;
        Ok(())
    }
}

fn add_dir(
    zip: &mut ZipWriter<File>,
    dir: &Path,
    root: &Path,
    excluded: &[String],
    top_level: bool,
    options: SimpleFileOptions,
) -> Result<(), ArchiveError> {
    let mut entries: Vec<_> = fs::read_dir(dir)?.collect::<Result<_, _>>()?;
    entries.sort_by_key(|e| e.file_name());

    for entry in entries {
        let path = entry.path();
        let name = entry.file_name().to_string_lossy().to_string();

        if path.is_dir() {
            if top_level && excluded.iter().any(|x| *x == name) {
                continue;
            }
            add_dir(zip, &path, root, excluded, false, options)?;
        } else {
            let relative = path
                .strip_prefix(root)
                .map_err(|_| ArchiveError::Invalid(format!("path escapes root: {}", path.display())))?;
            let entry_name = relative.to_string_lossy().replace('\\', "/");
            // The reserved name is ours to write, never the tree's.
            if entry_name == DB_DUMP_ENTRY {
                continue;
            }
            zip.start_file(entry_name, options)?;
            let mut src = File::open(&path)?;
            io::copy(&mut src, zip)?;
        }
    }
    Ok(())
}

/// A uniquely named extraction directory that is removed when dropped, on
/// success and on every error path alike.
#[derive(Debug)]
pub struct ScratchDir {
    path: PathBuf,
}

impl ScratchDir {
    pub fn create_under(parent: &Path) -> Result<Self, io::Error> {
        let path = parent.join(format!("restore-{}", Uuid::new_v4()));
        fs::create_dir_all(&path)?;
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for ScratchDir {
    fn drop(&mut self) {
        fs::remove_dir_all(&self.path).ok();
    }
}

/// A validated, extracted archive: the scratch tree plus the location of
/// the reserved SQL entry inside it.
#[derive(Debug)]
pub struct ExtractedArchive {
    pub scratch: ScratchDir,
    pub sql_path: PathBuf,
}

pub struct ArchiveReader;

impl ArchiveReader {
    /// Extract `archive_path` into a fresh scratch directory under
    /// `scratch_parent` and assert the reserved SQL entry exists. The
    /// scratch directory is dropped (removed) if validation fails.
    pub fn extract(archive_path: &Path, scratch_parent: &Path) -> Result<ExtractedArchive, ArchiveError> {
        let scratch = Self::extract_payload(archive_path, scratch_parent)?;
        let sql_path = scratch.path().join(DB_DUMP_ENTRY);
        if !sql_path.exists() {
            // `scratch` drops here and cleans up after itself.
            return Err(ArchiveError::Incomplete);
        }
        Ok(ExtractedArchive { scratch, sql_path })
    }

    /// Extract without the restore-type validation. Update payloads carry
    /// no database dump; only restore archives must.
    pub fn extract_payload(archive_path: &Path, scratch_parent: &Path) -> Result<ScratchDir, ArchiveError> {
        let file = File::open(archive_path)
            .map_err(|e| ArchiveError::Invalid(format!("{}: {}", archive_path.display(), e)))?;
        let mut archive =
            ZipArchive::new(file).map_err(|e| ArchiveError::Invalid(e.to_string()))?;

        let scratch = ScratchDir::create_under(scratch_parent)?;

        for i in 0..archive.len() {
            let mut entry = archive.by_index(i)?;
            // Entries with traversal components are silently dropped.
            let relative = match entry.enclosed_name() {
                Some(p) => p,
                None => continue,
            };
            let out_path = scratch.path().join(relative);

            if entry.is_dir() {
                fs::create_dir_all(&out_path)?;
            } else {
                if let Some(parent) = out_path.parent() {
                    fs::create_dir_all(parent)?;
                }
                let mut out = File::create(&out_path)?;
                io::copy(&mut entry, &mut out)?;
            }
        }

        Ok(scratch)
    }

    /// Structural verification without extraction: the container opens,
    /// the reserved entry is present, and no entry name traverses out.
    pub fn verify(archive_path: &Path) -> Result<VerificationReport, ArchiveError> {
        let file = File::open(archive_path)
            .map_err(|e| ArchiveError::Invalid(format!("{}: {}", archive_path.display(), e)))?;
        let mut archive =
            ZipArchive::new(file).map_err(|e| ArchiveError::Invalid(e.to_string()))?;

        let mut report = VerificationReport::default();
        for i in 0..archive.len() {
            let entry = archive.by_index(i)?;
            if entry.is_dir() {
                continue;
            }
            report.file_count += 1;
            report.total_size += entry.size();
            if entry.name() == DB_DUMP_ENTRY {
                report.has_dump = true;
            }
            if entry.enclosed_name().is_none() {
                report.traversal_entries.push(entry.name().to_string());
            }
        }

        if !report.has_dump {
            return Err(ArchiveError::Incomplete);
        }
        Ok(report)
    }
}

#[derive(Debug, Default)]
pub struct VerificationReport {
    pub file_count: usize,
    pub total_size: u64,
    pub has_dump: bool,
    pub traversal_entries: Vec<String>,
}
