//! Pre- and post-recovery validation.
//!
//! Validation failures are values, not errors: every check runs
//! independently and the caller receives the full list of problems, then
//! decides whether to proceed.

use crate::archive;
use crate::backup::BackupRecord;
use crate::checksum::digest_file;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Free space headroom required at the restore target, relative to the
/// backup's recorded size
const FREE_SPACE_FACTOR: u64 = 2;

/// Available disk space at `path`, via statvfs. `None` when the call fails;
/// callers treat unknown space as "do not block on this check".
pub fn available_disk_space(path: &Path) -> Option<u64> {
    nix::sys::statvfs::statvfs(path)
        .ok()
        .map(|stat| stat.blocks_available() as u64 * stat.fragment_size() as u64)
}

/// Check that a recovery from `record` onto `target_files` can safely start:
/// archive present and intact (recorded size, openable), overwrite permission
/// on every existing target, and free space at the target of at least twice
/// the backup's recorded size. All failures are collected.
pub fn validate_recovery_preconditions(
    record: &BackupRecord,
    target_files: &[PathBuf],
) -> (bool, Vec<String>) {
    let mut errors = Vec::new();

    if !record.archive_path.exists() {
        errors.push(format!(
            "Backup archive missing: {}",
            record.archive_path.display()
        ));
    } else {
        match std::fs::metadata(&record.archive_path) {
            Ok(meta) if meta.len() != record.size_bytes => {
                errors.push(format!(
                    "Backup archive size mismatch: expected {} bytes, found {}",
                    record.size_bytes,
                    meta.len()
                ));
            }
            Err(e) => {
                errors.push(format!(
                    "Cannot stat backup archive {}: {}",
                    record.archive_path.display(),
                    e
                ));
            }
            Ok(_) => {}
        }

        if let Err(e) = archive::list_members(&record.archive_path) {
            errors.push(format!("Backup archive cannot be opened: {}", e));
        }
    }

    for target in target_files {
        if target.exists() {
            match std::fs::metadata(target) {
                Ok(meta) if meta.permissions().readonly() => {
                    errors.push(format!(
                        "No overwrite permission for {}",
                        target.display()
                    ));
                }
                Err(e) => {
                    errors.push(format!("Cannot stat {}: {}", target.display(), e));
                }
                Ok(_) => {}
            }
        }
    }

    let space_root = if record.source_path.exists() {
        record.source_path.clone()
    } else {
        record
            .source_path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("/"))
    };
    if let Some(available) = available_disk_space(&space_root) {
        let required = record.size_bytes.saturating_mul(FREE_SPACE_FACTOR);
        if available < required {
            errors.push(format!(
                "Insufficient disk space at {}: {} bytes available, {} required",
                space_root.display(),
                available,
                required
            ));
        }
    }

    debug!(
        "Recovery precondition check for {}: {} issues",
        record.id,
        errors.len()
    );
    (errors.is_empty(), errors)
}

/// Confirm a finished recovery: every restored path exists as a regular
/// file, and matches its expected checksum when a map is supplied.
/// Mismatches are reported per file.
pub fn validate_post_recovery(
    restored_files: &[PathBuf],
    expected_checksums: Option<&HashMap<PathBuf, String>>,
) -> (bool, Vec<String>) {
    let mut errors = Vec::new();

    for path in restored_files {
        if !path.exists() {
            errors.push(format!("Restored file missing: {}", path.display()));
            continue;
        }
        if !path.is_file() {
            errors.push(format!(
                "Restored path is not a regular file: {}",
                path.display()
            ));
            continue;
        }

        if let Some(expected) = expected_checksums.and_then(|map| map.get(path)) {
            match digest_file(path) {
                Ok(actual) if &actual != expected => {
                    errors.push(format!(
                        "Checksum mismatch after restore: {}",
                        path.display()
                    ));
                }
                Err(e) => {
                    errors.push(format!(
                        "Cannot checksum restored file {}: {}",
                        path.display(),
                        e
                    ));
                }
                Ok(_) => {}
            }
        }
    }

    (errors.is_empty(), errors)
}
