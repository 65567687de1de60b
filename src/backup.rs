//! Backup registry and manager.
//!
//! Creates full, incremental and targeted pre-operation backups, verifies
//! them, enforces retention and exposes restoration testing. The registry
//! file on disk is the source of truth; the in-memory map is a read-through
//! cache rebuilt at construction. Registry persistence happens after every
//! mutating call: backup operations are infrequent and high-stakes, so
//! durability wins over throughput.
//!
//! A manager instance assumes a single logical caller. There is no internal
//! locking; concurrent callers must serialize externally.

use crate::archive::{self, ArchiveReport};
use crate::checksum::digest_file;
use crate::config::Config;
use crate::fs::walker::{self, WalkOptions};
use crate::tracker::ChangeTracker;
use crate::utils::errors::{GuardError, Result};
use crate::validate;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Registry file name under the backup directory
const REGISTRY_FILE: &str = "backup_registry.json";

/// Change-tracker state file name under the backup directory
const TRACKER_STATE_FILE: &str = "tracker_state.json";

/// Cap on individually listed permission issues in record metadata
const MAX_REPORTED_SKIPS: usize = 10;

/// Required free space headroom relative to the estimated source size
const FREE_SPACE_FACTOR: u64 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackupKind {
    Full,
    Incremental,
    TargetedPreOp,
}

impl BackupKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackupKind::Full => "full",
            BackupKind::Incremental => "incremental",
            BackupKind::TargetedPreOp => "targeted_pre_op",
        }
    }

    fn id_prefix(&self) -> &'static str {
        match self {
            BackupKind::Full => "full",
            BackupKind::Incremental => "incremental",
            BackupKind::TargetedPreOp => "preop",
        }
    }

    /// Archive file name for a backup id. Incrementals carry a distinct
    /// suffix so the artifacts are distinguishable on disk.
    fn archive_name(&self, id: &str) -> String {
        match self {
            BackupKind::Incremental => format!("{}.inc.tar.zst", id),
            _ => format!("{}.tar.zst", id),
        }
    }
}

/// One immutable description of a backup artifact.
/// Mutated in place only by verification and deletion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupRecord {
    pub id: String,
    pub kind: BackupKind,
    pub source_path: PathBuf,
    pub archive_path: PathBuf,
    /// SHA-256 hex digest of the archive file
    pub checksum: String,
    pub size_bytes: u64,
    pub created_at: DateTime<Utc>,
    /// Open map for per-backup diagnostics (compression kind, file counts,
    /// skip lists); callers attach data that varies per backup kind.
    #[serde(default)]
    pub metadata: serde_json::Map<String, Value>,
    #[serde(default)]
    pub verified: bool,
    #[serde(default)]
    pub verified_at: Option<DateTime<Utc>>,
}

/// Outcome of a restoration test pass
#[derive(Debug, Clone, Serialize)]
pub struct RestorationReport {
    pub success: bool,
    pub extracted_count: usize,
    pub readable_count: usize,
    pub total_bytes: u64,
}

/// Aggregate registry statistics
#[derive(Debug, Clone, Serialize)]
pub struct BackupStats {
    pub total_count: usize,
    pub total_bytes: u64,
    pub verified_count: usize,
    pub by_kind: BTreeMap<String, usize>,
    pub oldest: Option<DateTime<Utc>>,
    pub newest: Option<DateTime<Utc>>,
    pub verification_rate: f64,
}

pub struct BackupManager {
    config: Config,
    registry_path: PathBuf,
    registry: BTreeMap<String, BackupRecord>,
    tracker: ChangeTracker,
}

impl BackupManager {
    /// Build a manager for the given configuration. Creates the backup
    /// directory and loads the registry; a corrupt or missing registry file
    /// loads as empty rather than failing construction.
    pub fn new(config: &Config) -> Result<Self> {
        std::fs::create_dir_all(&config.backup_dir)?;

        let registry_path = config.backup_dir.join(REGISTRY_FILE);
        let registry = match std::fs::read_to_string(&registry_path) {
            Ok(content) => match serde_json::from_str(&content) {
                Ok(registry) => registry,
                Err(e) => {
                    warn!(
                        "Corrupt backup registry {}, starting empty: {}",
                        registry_path.display(),
                        e
                    );
                    BTreeMap::new()
                }
            },
            Err(_) => BTreeMap::new(),
        };

        let tracker = ChangeTracker::load(
            config.backup_dir.join(TRACKER_STATE_FILE),
            config.tracked_extensions.clone(),
        );

        Ok(Self {
            config: config.clone(),
            registry_path,
            registry,
            tracker,
        })
    }

    /// Archive the entire source tree (minus configured exclusions).
    ///
    /// Per-file permission failures are non-fatal: the first few are listed
    /// in record metadata together with a total count, and the backup
    /// succeeds as long as at least one file was archived. Refuses to run in
    /// dry-run mode or when prerequisite validation reports any issue.
    pub async fn create_full_backup(
        &mut self,
        source: Option<&Path>,
        name: Option<&str>,
    ) -> Result<BackupRecord> {
        if self.config.dry_run {
            return Err(GuardError::Backup(
                "Refusing to create backup in dry-run mode".to_string(),
            ));
        }

        let source = source
            .unwrap_or(&self.config.target_directory)
            .to_path_buf();

        let issues = self.validate_prerequisites(&source).await?;
        if !issues.is_empty() {
            return Err(GuardError::Backup(format!(
                "Backup prerequisites not met: {}",
                issues.join("; ")
            )));
        }

        let kind = BackupKind::Full;
        let id = name
            .map(str::to_string)
            .unwrap_or_else(|| generate_backup_id(kind));
        let archive_path = self.config.backup_dir.join(kind.archive_name(&id));

        info!("Creating full backup {} of {}", id, source.display());

        let options = WalkOptions::from_exclusions(
            &self.config.exclude_dirs,
            &self.config.exclude_patterns,
        );
        let report = {
            let src = source.clone();
            let dst = archive_path.clone();
            tokio::task::spawn_blocking(move || {
                archive::create_archive(&src, &dst, &|p| options.is_excluded(p))
            })
            .await
            .map_err(join_error)?
        };

        // Any failure past this point must not leave a partial archive behind
        let report = match report {
            Ok(report) => report,
            Err(e) => {
                let _ = std::fs::remove_file(&archive_path);
                return Err(e);
            }
        };

        if report.archived_count == 0 {
            let _ = std::fs::remove_file(&archive_path);
            return Err(GuardError::Backup(format!(
                "No files could be archived from {}",
                source.display()
            )));
        }

        let record = match self
            .finalize_record(id, kind, source, archive_path.clone(), &report)
            .await
        {
            Ok(record) => record,
            Err(e) => {
                let _ = std::fs::remove_file(&archive_path);
                return Err(e);
            }
        };

        info!(
            "Full backup {} complete: {} files, {} bytes, {} skipped",
            record.id,
            report.archived_count,
            record.size_bytes,
            report.skipped.len()
        );
        Ok(record)
    }

    /// Archive only the files changed since the last run, as seen by the
    /// change tracker. Returns `Ok(None)` when nothing changed; that is the
    /// caller's signal for "nothing to do", distinct from failure.
    pub async fn create_incremental_backup(
        &mut self,
        source: Option<&Path>,
        name: Option<&str>,
    ) -> Result<Option<BackupRecord>> {
        if self.config.dry_run {
            return Err(GuardError::Backup(
                "Refusing to create backup in dry-run mode".to_string(),
            ));
        }

        let source = source
            .unwrap_or(&self.config.target_directory)
            .to_path_buf();

        let changed = self.tracker.changed_files(&source)?;
        if changed.is_empty() {
            info!("Incremental backup: no changed files under {}", source.display());
            self.tracker.save()?;
            return Ok(None);
        }

        let kind = BackupKind::Incremental;
        let id = name
            .map(str::to_string)
            .unwrap_or_else(|| generate_backup_id(kind));
        let archive_path = self.config.backup_dir.join(kind.archive_name(&id));

        info!(
            "Creating incremental backup {}: {} changed files",
            id,
            changed.len()
        );

        let report = {
            let src = source.clone();
            let dst = archive_path.clone();
            let files = changed.clone();
            tokio::task::spawn_blocking(move || {
                archive::create_archive_from_list(&src, &files, &dst)
            })
            .await
            .map_err(join_error)?
        };

        let report = match report {
            Ok(report) => report,
            Err(e) => {
                let _ = std::fs::remove_file(&archive_path);
                return Err(e);
            }
        };

        if report.archived_count == 0 {
            let _ = std::fs::remove_file(&archive_path);
            return Err(GuardError::Backup(
                "None of the changed files could be archived".to_string(),
            ));
        }

        // Re-baseline so the next detection run does not double-count files
        // already captured here, then persist tracker state.
        self.tracker.update_digests(&changed);
        self.tracker.save()?;

        let record = match self
            .finalize_record(id, kind, source, archive_path.clone(), &report)
            .await
        {
            Ok(record) => record,
            Err(e) => {
                let _ = std::fs::remove_file(&archive_path);
                return Err(e);
            }
        };

        Ok(Some(record))
    }

    /// Snapshot an explicit file list before a risky edit. An empty list or
    /// dry-run mode is a legitimate no-op (`Ok(None)`), not an error.
    pub async fn create_targeted_backup(
        &mut self,
        files: &[PathBuf],
    ) -> Result<Option<BackupRecord>> {
        if files.is_empty() {
            return Ok(None);
        }
        if self.config.dry_run {
            info!("Dry-run mode: skipping targeted backup of {} files", files.len());
            return Ok(None);
        }

        let kind = BackupKind::TargetedPreOp;
        let id = generate_backup_id(kind);
        let archive_path = self.config.backup_dir.join(kind.archive_name(&id));
        let source = self.config.target_directory.clone();

        info!("Creating targeted backup {} of {} files", id, files.len());

        let report = {
            let base = source.clone();
            let dst = archive_path.clone();
            let files = files.to_vec();
            tokio::task::spawn_blocking(move || {
                archive::create_archive_from_list(&base, &files, &dst)
            })
            .await
            .map_err(join_error)?
        };

        let report = match report {
            Ok(report) => report,
            Err(e) => {
                let _ = std::fs::remove_file(&archive_path);
                return Err(e);
            }
        };

        if report.archived_count == 0 {
            let _ = std::fs::remove_file(&archive_path);
            return Err(GuardError::Backup(
                "None of the requested files could be archived".to_string(),
            ));
        }

        let record = match self
            .finalize_record(id, kind, source, archive_path.clone(), &report)
            .await
        {
            Ok(record) => record,
            Err(e) => {
                let _ = std::fs::remove_file(&archive_path);
                return Err(e);
            }
        };

        Ok(Some(record))
    }

    /// Check a backup's integrity: archive present, checksum matching, at
    /// least one member, and optionally a full test restoration.
    ///
    /// An invalid backup is a normal `Ok(false)` outcome with the reason
    /// recorded in the record's metadata, never an `Err`. Success mutates
    /// the record (`verified`, `verified_at`) and persists the registry.
    pub async fn verify_backup(&mut self, id: &str, test_restoration: bool) -> Result<bool> {
        let (archive_path, expected) = match self.registry.get(id) {
            Some(record) => (record.archive_path.clone(), record.checksum.clone()),
            None => {
                warn!("Verification requested for unknown backup {}", id);
                return Ok(false);
            }
        };

        let outcome = self
            .check_archive(&archive_path, &expected, test_restoration)
            .await?;
        let ok = outcome.is_ok();

        if let Some(record) = self.registry.get_mut(id) {
            match outcome {
                Ok(method) => {
                    record.verified = true;
                    record.verified_at = Some(Utc::now());
                    record.metadata.insert("verification_method".into(), json!(method));
                    record.metadata.remove("verification_failure");
                    info!("Backup {} verified ({})", id, method);
                }
                Err(reason) => {
                    warn!("Backup {} failed verification: {}", id, reason);
                    record.metadata.insert("verification_failure".into(), json!(reason));
                }
            }
        }

        self.persist_registry().await?;
        Ok(ok)
    }

    async fn check_archive(
        &self,
        archive_path: &Path,
        expected: &str,
        test_restoration: bool,
    ) -> Result<std::result::Result<&'static str, String>> {
        if !archive_path.exists() {
            return Ok(Err(format!(
                "Archive file missing: {}",
                archive_path.display()
            )));
        }

        let actual = {
            let path = archive_path.to_path_buf();
            tokio::task::spawn_blocking(move || digest_file(&path))
                .await
                .map_err(join_error)?
        };
        let actual = match actual {
            Ok(digest) => digest,
            Err(e) => return Ok(Err(format!("Archive unreadable: {}", e))),
        };
        if actual != expected {
            return Ok(Err(
                "Checksum mismatch: archive content does not match the recorded digest"
                    .to_string(),
            ));
        }

        let members = {
            let path = archive_path.to_path_buf();
            tokio::task::spawn_blocking(move || archive::list_members(&path))
                .await
                .map_err(join_error)?
        };
        match members {
            Ok(members) if members.is_empty() => {
                return Ok(Err("Archive contains no members".to_string()));
            }
            Err(e) => return Ok(Err(format!("Archive cannot be opened: {}", e))),
            Ok(_) => {}
        }

        if test_restoration {
            return match restoration_pass(archive_path.to_path_buf(), None).await {
                Ok(report) if report.success => Ok(Ok("full_restoration")),
                Ok(report) => Ok(Err(format!(
                    "Test restoration failed: {} of {} members readable",
                    report.readable_count, report.extracted_count
                ))),
                Err(GuardError::Archive(e)) => {
                    Ok(Err(format!("Test restoration failed: {}", e)))
                }
                Err(e) => Err(e),
            };
        }

        Ok(Ok("checksum"))
    }

    /// Extract-and-read-sample pass without mutating the record. The scratch
    /// directory is ephemeral and cleaned up afterwards unless the caller
    /// supplied `target`.
    pub async fn test_restoration(
        &self,
        id: &str,
        target: Option<&Path>,
    ) -> Result<RestorationReport> {
        let record = self
            .registry
            .get(id)
            .ok_or_else(|| GuardError::NotFound(format!("backup {}", id)))?;
        restoration_pass(record.archive_path.clone(), target.map(Path::to_path_buf)).await
    }

    /// All backups, newest first, optionally filtered by kind and
    /// verification status.
    pub fn list_backups(
        &self,
        kind: Option<BackupKind>,
        verified_only: bool,
    ) -> Vec<&BackupRecord> {
        let mut records: Vec<&BackupRecord> = self
            .registry
            .values()
            .filter(|r| kind.map(|k| r.kind == k).unwrap_or(true))
            .filter(|r| !verified_only || r.verified)
            .collect();
        records.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        records
    }

    pub fn get_backup(&self, id: &str) -> Option<&BackupRecord> {
        self.registry.get(id)
    }

    /// Remove a backup's archive and registry entry. Unknown ids return
    /// `Ok(false)` rather than an error.
    pub async fn delete_backup(&mut self, id: &str) -> Result<bool> {
        let Some(record) = self.registry.remove(id) else {
            return Ok(false);
        };

        if record.archive_path.exists() {
            if let Err(e) = std::fs::remove_file(&record.archive_path) {
                warn!(
                    "Failed to delete archive {}: {}",
                    record.archive_path.display(),
                    e
                );
            }
        }

        self.persist_registry().await?;
        info!("Deleted backup {}", id);
        Ok(true)
    }

    /// Two-phase retention: first everything older than the age cutoff goes,
    /// then the oldest backups beyond `max_count` among the survivors. The
    /// order matters; the count limit applies to the already-pruned set.
    pub async fn cleanup_old_backups(
        &mut self,
        max_age_days: i64,
        max_count: usize,
    ) -> Result<Vec<String>> {
        let cutoff = Utc::now() - Duration::days(max_age_days);
        let mut deleted = Vec::new();

        let expired: Vec<String> = self
            .registry
            .values()
            .filter(|r| r.created_at < cutoff)
            .map(|r| r.id.clone())
            .collect();
        for id in expired {
            if self.delete_backup(&id).await? {
                deleted.push(id);
            }
        }

        let mut remaining: Vec<(String, DateTime<Utc>)> = self
            .registry
            .values()
            .map(|r| (r.id.clone(), r.created_at))
            .collect();
        remaining.sort_by(|a, b| b.1.cmp(&a.1));
        let excess: Vec<String> = remaining
            .into_iter()
            .skip(max_count)
            .map(|(id, _)| id)
            .collect();
        for id in excess {
            if self.delete_backup(&id).await? {
                deleted.push(id);
            }
        }

        if !deleted.is_empty() {
            info!("Retention cleanup removed {} backups", deleted.len());
        }
        Ok(deleted)
    }

    pub fn statistics(&self) -> BackupStats {
        let total_count = self.registry.len();
        let total_bytes = self.registry.values().map(|r| r.size_bytes).sum();
        let verified_count = self.registry.values().filter(|r| r.verified).count();

        let mut by_kind = BTreeMap::new();
        for record in self.registry.values() {
            *by_kind.entry(record.kind.as_str().to_string()).or_insert(0) += 1;
        }

        BackupStats {
            total_count,
            total_bytes,
            verified_count,
            by_kind,
            oldest: self.registry.values().map(|r| r.created_at).min(),
            newest: self.registry.values().map(|r| r.created_at).max(),
            verification_rate: if total_count > 0 {
                verified_count as f64 / total_count as f64
            } else {
                0.0
            },
        }
    }

    /// Collect every prerequisite issue (not short-circuited): source
    /// readable directory, backup directory writable, free space at least
    /// twice the estimated source size.
    async fn validate_prerequisites(&self, source: &Path) -> Result<Vec<String>> {
        let mut issues = Vec::new();

        if !source.exists() {
            issues.push(format!("Source path does not exist: {}", source.display()));
            return Ok(issues);
        }
        if !source.is_dir() {
            issues.push(format!("Source path is not a directory: {}", source.display()));
            return Ok(issues);
        }
        if std::fs::read_dir(source).is_err() {
            issues.push(format!("Source path is not readable: {}", source.display()));
        }

        let probe = self.config.backup_dir.join(".write_probe");
        match std::fs::write(&probe, b"probe") {
            Ok(()) => {
                let _ = std::fs::remove_file(&probe);
            }
            Err(e) => {
                issues.push(format!(
                    "Backup directory is not writable: {} ({})",
                    self.config.backup_dir.display(),
                    e
                ));
            }
        }

        let estimated = {
            let src = source.to_path_buf();
            let options = WalkOptions::from_exclusions(
                &self.config.exclude_dirs,
                &self.config.exclude_patterns,
            );
            tokio::task::spawn_blocking(move || walker::calculate_total_size(&src, &options))
                .await
                .map_err(join_error)??
        };
        if let Some(available) = validate::available_disk_space(&self.config.backup_dir) {
            let required = estimated.saturating_mul(FREE_SPACE_FACTOR);
            if available < required {
                issues.push(format!(
                    "Insufficient disk space in {}: {} bytes available, {} required",
                    self.config.backup_dir.display(),
                    available,
                    required
                ));
            }
        }

        Ok(issues)
    }

    /// Checksum the finished archive, build the record and persist the
    /// registry.
    async fn finalize_record(
        &mut self,
        id: String,
        kind: BackupKind,
        source: PathBuf,
        archive_path: PathBuf,
        report: &ArchiveReport,
    ) -> Result<BackupRecord> {
        let checksum = {
            let path = archive_path.clone();
            tokio::task::spawn_blocking(move || digest_file(&path))
                .await
                .map_err(join_error)??
        };
        let size_bytes = std::fs::metadata(&archive_path)?.len();

        let mut metadata = serde_json::Map::new();
        metadata.insert("compression".into(), json!("zstd"));
        metadata.insert("file_count".into(), json!(report.archived_count));
        if !report.skipped.is_empty() {
            let listed: Vec<&String> =
                report.skipped.iter().take(MAX_REPORTED_SKIPS).collect();
            metadata.insert("permission_issues".into(), json!(listed));
            metadata.insert("permission_issue_count".into(), json!(report.skipped.len()));
        }

        let record = BackupRecord {
            id: id.clone(),
            kind,
            source_path: source,
            archive_path,
            checksum,
            size_bytes,
            created_at: Utc::now(),
            metadata,
            verified: false,
            verified_at: None,
        };

        self.registry.insert(id, record.clone());
        self.persist_registry().await?;
        Ok(record)
    }

    async fn persist_registry(&self) -> Result<()> {
        let json = serde_json::to_string_pretty(&self.registry)?;
        tokio::fs::write(&self.registry_path, json).await?;
        Ok(())
    }
}

/// Extract into a scratch (or caller-supplied) directory and confirm every
/// member landed and is readable.
async fn restoration_pass(
    archive_path: PathBuf,
    target: Option<PathBuf>,
) -> Result<RestorationReport> {
    tokio::task::spawn_blocking(move || -> Result<RestorationReport> {
        let scratch;
        let dest = match target {
            Some(dir) => dir,
            None => {
                scratch = tempfile::TempDir::new()?;
                scratch.path().to_path_buf()
            }
        };

        let extracted_count = archive::extract_archive(&archive_path, &dest)?;

        let mut readable_count = 0usize;
        let mut total_bytes = 0u64;
        for file in walker::walk_directory(&dest, &WalkOptions::default())? {
            if std::fs::File::open(&file.path).is_ok() {
                readable_count += 1;
                total_bytes += file.size;
            }
        }

        Ok(RestorationReport {
            success: extracted_count > 0 && readable_count == extracted_count,
            extracted_count,
            readable_count,
            total_bytes,
        })
    })
    .await
    .map_err(join_error)?
}

fn generate_backup_id(kind: BackupKind) -> String {
    format!("{}_{}", kind.id_prefix(), Utc::now().format("%Y%m%d_%H%M%S"))
}

fn join_error(e: tokio::task::JoinError) -> GuardError {
    GuardError::Unknown(format!("Background task failed: {}", e))
}
