//! Compressed archive creation and extraction (`.tar.zst`).
//!
//! Backup artifacts are plain tar streams wrapped in zstd. Per-file read
//! failures during creation are skipped and reported, never fatal; an archive
//! that cannot be opened or contains zero members is invalid on extraction.

use crate::utils::errors::{GuardError, Result};
use std::fs::File;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;
use zstd::stream::{Decoder as ZstdDecoder, Encoder as ZstdEncoder};

/// Compression level for backup archives
const COMPRESSION_LEVEL: i32 = 3;

/// Outcome of building an archive
#[derive(Debug)]
pub struct ArchiveReport {
    /// Number of files written into the archive
    pub archived_count: usize,

    /// Root-relative paths of entries skipped because they could not be read
    pub skipped: Vec<String>,
}

/// Build a compressed archive of every file under `root`.
///
/// `exclude` receives each file's root-relative path; returning true skips
/// the entry. Unreadable files are skipped and recorded in the report.
pub fn create_archive(
    root: &Path,
    destination: &Path,
    exclude: &dyn Fn(&Path) -> bool,
) -> Result<ArchiveReport> {
    let out = File::create(destination)?;
    let encoder = ZstdEncoder::new(out, COMPRESSION_LEVEL)
        .map_err(|e| GuardError::Archive(format!("Failed to create encoder: {}", e)))?;
    let mut builder = tar::Builder::new(encoder);

    let mut report = ArchiveReport {
        archived_count: 0,
        skipped: Vec::new(),
    };

    for entry in WalkDir::new(root).follow_links(false) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                report.skipped.push(e.to_string());
                continue;
            }
        };

        if !entry.file_type().is_file() {
            continue;
        }

        let path = entry.path();
        let relative = path.strip_prefix(root).unwrap_or(path);

        if exclude(relative) {
            continue;
        }

        append_file(&mut builder, path, relative, &mut report);
    }

    finish(builder, destination)?;
    Ok(report)
}

/// Build a compressed archive from an explicit file list.
///
/// Entry names are each file's path relative to `base`; files outside `base`
/// or unreadable files are skipped and recorded.
pub fn create_archive_from_list(
    base: &Path,
    files: &[PathBuf],
    destination: &Path,
) -> Result<ArchiveReport> {
    let out = File::create(destination)?;
    let encoder = ZstdEncoder::new(out, COMPRESSION_LEVEL)
        .map_err(|e| GuardError::Archive(format!("Failed to create encoder: {}", e)))?;
    let mut builder = tar::Builder::new(encoder);

    let mut report = ArchiveReport {
        archived_count: 0,
        skipped: Vec::new(),
    };

    for file in files {
        let relative = match file.strip_prefix(base) {
            Ok(rel) => rel,
            Err(_) => {
                report.skipped.push(format!("{} (outside backup root)", file.display()));
                continue;
            }
        };

        append_file(&mut builder, file, relative, &mut report);
    }

    finish(builder, destination)?;
    Ok(report)
}

fn append_file(
    builder: &mut tar::Builder<ZstdEncoder<'static, File>>,
    path: &Path,
    name: &Path,
    report: &mut ArchiveReport,
) {
    // Open before appending so a permission failure never reaches the writer
    let mut file = match File::open(path) {
        Ok(f) => f,
        Err(e) => {
            tracing::warn!("Skipping unreadable file {}: {}", path.display(), e);
            report.skipped.push(name.to_string_lossy().to_string());
            return;
        }
    };

    match builder.append_file(name, &mut file) {
        Ok(()) => report.archived_count += 1,
        Err(e) => {
            tracing::warn!("Failed to archive {}: {}", path.display(), e);
            report.skipped.push(name.to_string_lossy().to_string());
        }
    }
}

fn finish(builder: tar::Builder<ZstdEncoder<'static, File>>, destination: &Path) -> Result<()> {
    let encoder = builder
        .into_inner()
        .map_err(|e| GuardError::Archive(format!("Failed to finalize {}: {}", destination.display(), e)))?;
    encoder
        .finish()
        .map_err(|e| GuardError::Archive(format!("Failed to finish compression for {}: {}", destination.display(), e)))?;
    Ok(())
}

/// Extract every member of an archive into `dest_dir`, returning the member
/// count. An archive that cannot be opened or has zero members is an error.
pub fn extract_archive(archive_path: &Path, dest_dir: &Path) -> Result<usize> {
    let mut archive = open_archive(archive_path)?;

    std::fs::create_dir_all(dest_dir)?;

    let mut count = 0usize;
    let entries = archive
        .entries()
        .map_err(|e| GuardError::Archive(format!("Cannot read archive {}: {}", archive_path.display(), e)))?;

    for entry in entries {
        let mut entry = entry
            .map_err(|e| GuardError::Archive(format!("Corrupt entry in {}: {}", archive_path.display(), e)))?;
        entry
            .unpack_in(dest_dir)
            .map_err(|e| GuardError::Archive(format!("Failed to extract member: {}", e)))?;
        count += 1;
    }

    if count == 0 {
        return Err(GuardError::Archive(format!(
            "Archive {} contains no members",
            archive_path.display()
        )));
    }

    Ok(count)
}

/// List member names without extracting.
pub fn list_members(archive_path: &Path) -> Result<Vec<String>> {
    let mut archive = open_archive(archive_path)?;

    let mut members = Vec::new();
    let entries = archive
        .entries()
        .map_err(|e| GuardError::Archive(format!("Cannot read archive {}: {}", archive_path.display(), e)))?;

    for entry in entries {
        let entry = entry
            .map_err(|e| GuardError::Archive(format!("Corrupt entry in {}: {}", archive_path.display(), e)))?;
        let path = entry
            .path()
            .map_err(|e| GuardError::Archive(format!("Bad member path: {}", e)))?;
        members.push(path.to_string_lossy().to_string());
    }

    Ok(members)
}

fn open_archive(archive_path: &Path) -> Result<tar::Archive<ZstdDecoder<'static, std::io::BufReader<File>>>> {
    let file = File::open(archive_path)
        .map_err(|e| GuardError::Archive(format!("Cannot open archive {}: {}", archive_path.display(), e)))?;
    let decoder = ZstdDecoder::new(file)
        .map_err(|e| GuardError::Archive(format!("Cannot decompress {}: {}", archive_path.display(), e)))?;
    Ok(tar::Archive::new(decoder))
}
