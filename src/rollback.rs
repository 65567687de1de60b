//! Rollback manager.
//!
//! Tracks operations eligible for rollback, executes automatic and manual
//! recovery against the backup registry, and persists operation history and
//! statistics. The operations file on disk is the source of truth; the
//! in-memory map is rebuilt from it at construction.
//!
//! Restore execution copies files from a scratch extraction directory into
//! place one by one; a crash mid-loop can leave a partial restore. Staging
//! the whole set and swapping atomically would close that gap and is a
//! possible enhancement, not current behavior.

use crate::backup::{BackupKind, BackupManager, BackupRecord};
use crate::config::Config;
use crate::fs::walker::{self, WalkOptions};
use crate::utils::errors::{GuardError, Result};
use crate::validate;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use uuid::Uuid;

/// Operations file name under the backup directory
const OPERATIONS_FILE: &str = "rollback_operations.json";

/// Throughput assumption for recovery-plan duration estimates
const RESTORE_BYTES_PER_SEC: u64 = 50 * 1024 * 1024;

/// A tracked link between a caller's risky action and the backup that can
/// undo it. `completed == true` is terminal: the operation must never be
/// rolled back again.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RollbackOperation {
    pub id: String,
    /// Free-form action category ("cleanup", "manual_rollback", ...)
    pub kind: String,
    pub backup_id: String,
    pub affected_files: Vec<PathBuf>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub metadata: serde_json::Map<String, Value>,
    #[serde(default)]
    pub completed: bool,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub errors: Vec<String>,
}

/// Human-reviewable description of what a rollback would do. Building a plan
/// never mutates state.
#[derive(Debug, Clone, Serialize)]
pub struct RecoveryPlan {
    pub operation_id: String,
    pub backup_id: String,
    pub backup_size_bytes: u64,
    pub estimated_duration_secs: u64,
    pub steps: Vec<String>,
    pub can_rollback: bool,
    pub errors: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct KindStats {
    pub total: usize,
    pub completed: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct RollbackStats {
    pub total_count: usize,
    pub completed_count: usize,
    pub failed_count: usize,
    pub success_rate: f64,
    pub by_kind: BTreeMap<String, KindStats>,
    /// Operations registered in the last 7 days
    pub recent_count: usize,
}

struct RestoreOutcome {
    restored: Vec<PathBuf>,
    errors: Vec<String>,
}

pub struct RollbackManager {
    ops_path: PathBuf,
    operations: BTreeMap<String, RollbackOperation>,
}

impl RollbackManager {
    /// Load the operations store; a corrupt or missing file loads as empty.
    pub fn new(config: &Config) -> Result<Self> {
        std::fs::create_dir_all(&config.backup_dir)?;

        let ops_path = config.backup_dir.join(OPERATIONS_FILE);
        let operations = match std::fs::read_to_string(&ops_path) {
            Ok(content) => match serde_json::from_str(&content) {
                Ok(operations) => operations,
                Err(e) => {
                    warn!(
                        "Corrupt operations store {}, starting empty: {}",
                        ops_path.display(),
                        e
                    );
                    BTreeMap::new()
                }
            },
            Err(_) => BTreeMap::new(),
        };

        Ok(Self {
            ops_path,
            operations,
        })
    }

    /// Record an operation eligible for rollback. Pure bookkeeping; no
    /// filesystem side effects beyond persisting the store.
    pub async fn register_operation(
        &mut self,
        kind: &str,
        backup_id: &str,
        affected_files: Vec<PathBuf>,
        metadata: Option<serde_json::Map<String, Value>>,
    ) -> Result<String> {
        let id = format!(
            "op_{}_{}",
            Utc::now().format("%Y%m%d_%H%M%S"),
            &Uuid::new_v4().simple().to_string()[..8]
        );

        let operation = RollbackOperation {
            id: id.clone(),
            kind: kind.to_string(),
            backup_id: backup_id.to_string(),
            affected_files,
            created_at: Utc::now(),
            metadata: metadata.unwrap_or_default(),
            completed: false,
            completed_at: None,
            errors: Vec::new(),
        };

        info!(
            "Registered rollback operation {} ({}, backup {})",
            id, kind, backup_id
        );
        self.operations.insert(id.clone(), operation);
        self.persist().await?;
        Ok(id)
    }

    /// Roll back a failed operation. Precondition failures append to the
    /// operation's error list and return `Ok(false)` without touching the
    /// filesystem; the store is always persisted before returning.
    pub async fn automatic_rollback(
        &mut self,
        operation_id: &str,
        backups: &BackupManager,
        error_context: Option<&str>,
    ) -> Result<bool> {
        self.rollback_internal(operation_id, backups, error_context)
            .await
    }

    /// User-requested rollback, keyed by an existing operation or by a bare
    /// backup id plus an explicit file list (which registers an ad-hoc
    /// operation flagged `manual`). Returns `Ok(false)` when neither key
    /// resolves to a backup.
    pub async fn manual_rollback(
        &mut self,
        operation_id: Option<&str>,
        backup_id: Option<&str>,
        target_files: Option<Vec<PathBuf>>,
        backups: &BackupManager,
    ) -> Result<bool> {
        let op_id = if let Some(id) = operation_id {
            if !self.operations.contains_key(id) {
                warn!("Manual rollback: unknown operation {}", id);
                return Ok(false);
            }
            id.to_string()
        } else if let Some(backup_id) = backup_id {
            if backups.get_backup(backup_id).is_none() {
                warn!("Manual rollback: unknown backup {}", backup_id);
                return Ok(false);
            }
            let mut metadata = serde_json::Map::new();
            metadata.insert("manual".into(), json!(true));
            self.register_operation(
                "manual_rollback",
                backup_id,
                target_files.unwrap_or_default(),
                Some(metadata),
            )
            .await?
        } else {
            warn!("Manual rollback requires an operation id or a backup id");
            return Ok(false);
        };

        self.rollback_internal(&op_id, backups, Some("manual rollback requested"))
            .await
    }

    async fn rollback_internal(
        &mut self,
        operation_id: &str,
        backups: &BackupManager,
        error_context: Option<&str>,
    ) -> Result<bool> {
        let (capable, errors) = self.verify_rollback_capability(operation_id, backups);
        if !capable {
            warn!(
                "Rollback of {} blocked by validation: {}",
                operation_id,
                errors.join("; ")
            );
            if let Some(op) = self.operations.get_mut(operation_id) {
                op.errors.extend(errors);
            }
            self.persist().await?;
            return Ok(false);
        }

        // Capability check passed, so operation and backup both resolve
        let (record, affected) = {
            let op = self
                .operations
                .get(operation_id)
                .ok_or_else(|| GuardError::NotFound(format!("operation {}", operation_id)))?;
            let record = backups
                .get_backup(&op.backup_id)
                .ok_or_else(|| GuardError::NotFound(format!("backup {}", op.backup_id)))?
                .clone();
            (record, op.affected_files.clone())
        };

        info!(
            "Executing rollback {} from backup {} ({})",
            operation_id,
            record.id,
            record.kind.as_str()
        );

        let outcome = run_restore(record, affected).await;
        let now = Utc::now();

        let success = match outcome {
            Ok(result) => {
                let (post_ok, post_errors) =
                    validate::validate_post_recovery(&result.restored, None);
                let success = post_ok && result.errors.is_empty();

                if let Some(op) = self.operations.get_mut(operation_id) {
                    op.metadata
                        .insert("files_restored".into(), json!(result.restored.len()));
                    if let Some(context) = error_context {
                        op.metadata.insert("trigger".into(), json!(context));
                    }
                    op.errors.extend(result.errors);
                    op.errors.extend(post_errors);
                    if success {
                        op.completed = true;
                        op.completed_at = Some(now);
                    }
                }

                if success {
                    info!("Rollback {} completed", operation_id);
                } else {
                    warn!("Rollback {} finished with errors", operation_id);
                }
                success
            }
            Err(e) => {
                warn!("Rollback {} failed: {}", operation_id, e);
                if let Some(op) = self.operations.get_mut(operation_id) {
                    op.errors.push(e.to_string());
                }
                false
            }
        };

        self.persist().await?;
        Ok(success)
    }

    /// Read-only check that a rollback could run right now: operation
    /// exists, is not already completed, its backup resolves, and the
    /// recovery preconditions hold.
    pub fn verify_rollback_capability(
        &self,
        operation_id: &str,
        backups: &BackupManager,
    ) -> (bool, Vec<String>) {
        let Some(op) = self.operations.get(operation_id) else {
            return (
                false,
                vec![format!("Operation not found: {}", operation_id)],
            );
        };

        if op.completed {
            return (
                false,
                vec![format!("Operation {} already rolled back", operation_id)],
            );
        }

        let Some(record) = backups.get_backup(&op.backup_id) else {
            return (
                false,
                vec![format!(
                    "Backup {} for operation {} no longer exists",
                    op.backup_id, operation_id
                )],
            );
        };

        validate::validate_recovery_preconditions(record, &op.affected_files)
    }

    /// Describe what rolling back an operation would involve, for human
    /// review. Never mutates state.
    pub fn create_recovery_plan(
        &self,
        operation_id: &str,
        backups: &BackupManager,
    ) -> Result<RecoveryPlan> {
        let op = self
            .operations
            .get(operation_id)
            .ok_or_else(|| GuardError::NotFound(format!("operation {}", operation_id)))?;

        let (can_rollback, errors) = self.verify_rollback_capability(operation_id, backups);
        let record = backups.get_backup(&op.backup_id);
        let backup_size_bytes = record.map(|r| r.size_bytes).unwrap_or(0);

        let restore_step = match record.map(|r| r.kind) {
            Some(BackupKind::TargetedPreOp) => format!(
                "Restore {} affected files to {}",
                op.affected_files.len(),
                record
                    .map(|r| r.source_path.display().to_string())
                    .unwrap_or_default()
            ),
            Some(_) => format!(
                "Restore full tree to {}",
                record
                    .map(|r| r.source_path.display().to_string())
                    .unwrap_or_default()
            ),
            None => "Restore (backup unresolved)".to_string(),
        };

        Ok(RecoveryPlan {
            operation_id: operation_id.to_string(),
            backup_id: op.backup_id.clone(),
            backup_size_bytes,
            estimated_duration_secs: (backup_size_bytes / RESTORE_BYTES_PER_SEC).max(1),
            steps: vec![
                "Validate recovery preconditions".to_string(),
                format!("Extract backup {} to a scratch directory", op.backup_id),
                restore_step,
                "Validate restored files".to_string(),
            ],
            can_rollback,
            errors,
        })
    }

    /// All operations, newest first, optionally filtered by kind and
    /// completion.
    pub fn list_operations(
        &self,
        kind: Option<&str>,
        completed_only: bool,
    ) -> Vec<&RollbackOperation> {
        let mut ops: Vec<&RollbackOperation> = self
            .operations
            .values()
            .filter(|op| kind.map(|k| op.kind == k).unwrap_or(true))
            .filter(|op| !completed_only || op.completed)
            .collect();
        ops.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        ops
    }

    pub fn get_operation(&self, operation_id: &str) -> Option<&RollbackOperation> {
        self.operations.get(operation_id)
    }

    /// Age-based pruning of the operation history. No count cap; old
    /// operations are only noise, unlike backups they hold no disk space.
    pub async fn cleanup_old_operations(&mut self, max_age_days: i64) -> Result<Vec<String>> {
        let cutoff = Utc::now() - Duration::days(max_age_days);
        let expired: Vec<String> = self
            .operations
            .values()
            .filter(|op| op.created_at < cutoff)
            .map(|op| op.id.clone())
            .collect();

        for id in &expired {
            self.operations.remove(id);
        }

        if !expired.is_empty() {
            self.persist().await?;
            info!("Pruned {} old rollback operations", expired.len());
        }
        Ok(expired)
    }

    pub fn statistics(&self) -> RollbackStats {
        let total_count = self.operations.len();
        let completed_count = self.operations.values().filter(|op| op.completed).count();
        let failed_count = self
            .operations
            .values()
            .filter(|op| !op.completed && !op.errors.is_empty())
            .count();

        let mut by_kind: BTreeMap<String, KindStats> = BTreeMap::new();
        for op in self.operations.values() {
            let entry = by_kind.entry(op.kind.clone()).or_default();
            entry.total += 1;
            if op.completed {
                entry.completed += 1;
            }
        }

        let week_ago = Utc::now() - Duration::days(7);
        let recent_count = self
            .operations
            .values()
            .filter(|op| op.created_at > week_ago)
            .count();

        RollbackStats {
            total_count,
            completed_count,
            failed_count,
            success_rate: if total_count > 0 {
                completed_count as f64 / total_count as f64
            } else {
                0.0
            },
            by_kind,
            recent_count,
        }
    }

    async fn persist(&self) -> Result<()> {
        let json = serde_json::to_string_pretty(&self.operations)?;
        tokio::fs::write(&self.ops_path, json).await?;
        Ok(())
    }
}

/// Extract the backup to a scratch directory and copy files into place.
/// Targeted backups restore only the operation's affected files; full and
/// incremental backups restore the entire extracted tree onto the target
/// root.
async fn run_restore(record: BackupRecord, affected: Vec<PathBuf>) -> Result<RestoreOutcome> {
    tokio::task::spawn_blocking(move || -> Result<RestoreOutcome> {
        let scratch = tempfile::TempDir::new()?;
        crate::archive::extract_archive(&record.archive_path, scratch.path())?;

        let target_root = &record.source_path;
        let mut outcome = RestoreOutcome {
            restored: Vec::new(),
            errors: Vec::new(),
        };

        match record.kind {
            BackupKind::TargetedPreOp => {
                for file in &affected {
                    let relative = file.strip_prefix(target_root).unwrap_or(file);
                    let staged = scratch.path().join(relative);
                    if !staged.is_file() {
                        outcome.errors.push(format!(
                            "File not present in backup archive: {}",
                            relative.display()
                        ));
                        continue;
                    }
                    let dest = target_root.join(relative);
                    copy_into_place(&staged, &dest, &mut outcome);
                }
            }
            BackupKind::Full | BackupKind::Incremental => {
                for file in walker::walk_directory(scratch.path(), &WalkOptions::default())? {
                    let dest = target_root.join(&file.relative_path);
                    copy_into_place(&file.path, &dest, &mut outcome);
                }
            }
        }

        Ok(outcome)
    })
    .await
    .map_err(|e| GuardError::Unknown(format!("Background task failed: {}", e)))?
}

fn copy_into_place(staged: &Path, dest: &Path, outcome: &mut RestoreOutcome) {
    if let Some(parent) = dest.parent() {
        if let Err(e) = std::fs::create_dir_all(parent) {
            outcome
                .errors
                .push(format!("Cannot create {}: {}", parent.display(), e));
            return;
        }
    }
    match std::fs::copy(staged, dest) {
        Ok(_) => outcome.restored.push(dest.to_path_buf()),
        Err(e) => outcome
            .errors
            .push(format!("Failed to restore {}: {}", dest.display(), e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn test_config(source: &TempDir, backups: &TempDir) -> Config {
        let mut config = Config::for_target(source.path().to_path_buf());
        config.backup_dir = backups.path().to_path_buf();
        config
    }

    #[tokio::test]
    async fn test_automatic_rollback_restores_content() -> Result<()> {
        let source = TempDir::new().unwrap();
        let backups_dir = TempDir::new().unwrap();
        let main_py = source.path().join("main.py");
        fs::write(&main_py, b"print(\"A\")").unwrap();

        let config = test_config(&source, &backups_dir);
        let mut backups = BackupManager::new(&config)?;
        let record = backups.create_full_backup(None, None).await?;

        let mut rollbacks = RollbackManager::new(&config)?;
        let op_id = rollbacks
            .register_operation("cleanup", &record.id, vec![main_py.clone()], None)
            .await?;

        // The risky operation goes wrong
        fs::write(&main_py, b"print(\"B\")").unwrap();

        assert!(
            rollbacks
                .automatic_rollback(&op_id, &backups, Some("cleanup failed"))
                .await?
        );
        assert_eq!(fs::read(&main_py).unwrap(), b"print(\"A\")");

        let op = rollbacks.get_operation(&op_id).unwrap();
        assert!(op.completed);
        assert!(op.completed_at.is_some());
        assert_eq!(op.metadata.get("trigger"), Some(&json!("cleanup failed")));
        Ok(())
    }

    #[tokio::test]
    async fn test_completed_operation_is_terminal() -> Result<()> {
        let source = TempDir::new().unwrap();
        let backups_dir = TempDir::new().unwrap();
        let file = source.path().join("app.py");
        fs::write(&file, b"v1").unwrap();

        let config = test_config(&source, &backups_dir);
        let mut backups = BackupManager::new(&config)?;
        let record = backups.create_full_backup(None, None).await?;

        let mut rollbacks = RollbackManager::new(&config)?;
        let op_id = rollbacks
            .register_operation("cleanup", &record.id, vec![file.clone()], None)
            .await?;

        fs::write(&file, b"v2").unwrap();
        assert!(rollbacks.manual_rollback(Some(&op_id), None, None, &backups).await?);
        assert_eq!(fs::read(&file).unwrap(), b"v1");

        // Mutate again; a second rollback must refuse and leave it alone
        fs::write(&file, b"v3").unwrap();
        assert!(!rollbacks.manual_rollback(Some(&op_id), None, None, &backups).await?);
        assert_eq!(fs::read(&file).unwrap(), b"v3");

        let op = rollbacks.get_operation(&op_id).unwrap();
        assert!(op.errors.iter().any(|e| e.contains("already rolled back")));
        Ok(())
    }

    #[tokio::test]
    async fn test_targeted_rollback_restores_only_affected_files() -> Result<()> {
        let source = TempDir::new().unwrap();
        let backups_dir = TempDir::new().unwrap();
        let touched = source.path().join("config.php");
        let untouched = source.path().join("other.php");
        fs::write(&touched, b"old-config").unwrap();
        fs::write(&untouched, b"old-other").unwrap();

        let config = test_config(&source, &backups_dir);
        let mut backups = BackupManager::new(&config)?;
        let record = backups
            .create_targeted_backup(&[touched.clone(), untouched.clone()])
            .await?
            .expect("targeted backup");

        let mut rollbacks = RollbackManager::new(&config)?;
        let op_id = rollbacks
            .register_operation("config_edit", &record.id, vec![touched.clone()], None)
            .await?;

        fs::write(&touched, b"new-config").unwrap();
        fs::write(&untouched, b"new-other").unwrap();

        assert!(rollbacks.automatic_rollback(&op_id, &backups, None).await?);
        // Only the affected file came back; the other keeps its new content
        assert_eq!(fs::read(&touched).unwrap(), b"old-config");
        assert_eq!(fs::read(&untouched).unwrap(), b"new-other");
        Ok(())
    }

    #[tokio::test]
    async fn test_full_rollback_restores_undeclared_files_too() -> Result<()> {
        let source = TempDir::new().unwrap();
        let backups_dir = TempDir::new().unwrap();
        let declared = source.path().join("a.txt");
        let undeclared = source.path().join("b.txt");
        fs::write(&declared, b"a1").unwrap();
        fs::write(&undeclared, b"b1").unwrap();

        let config = test_config(&source, &backups_dir);
        let mut backups = BackupManager::new(&config)?;
        let record = backups.create_full_backup(None, None).await?;

        let mut rollbacks = RollbackManager::new(&config)?;
        let op_id = rollbacks
            .register_operation("cleanup", &record.id, vec![declared.clone()], None)
            .await?;

        fs::write(&declared, b"a2").unwrap();
        fs::write(&undeclared, b"b2").unwrap();

        assert!(rollbacks.automatic_rollback(&op_id, &backups, None).await?);
        // Full restore scope covers the whole tree
        assert_eq!(fs::read(&declared).unwrap(), b"a1");
        assert_eq!(fs::read(&undeclared).unwrap(), b"b1");
        Ok(())
    }

    #[tokio::test]
    async fn test_manual_rollback_by_backup_id_registers_adhoc_operation() -> Result<()> {
        let source = TempDir::new().unwrap();
        let backups_dir = TempDir::new().unwrap();
        let file = source.path().join("index.html");
        fs::write(&file, b"<h1>old</h1>").unwrap();

        let config = test_config(&source, &backups_dir);
        let mut backups = BackupManager::new(&config)?;
        let record = backups.create_full_backup(None, None).await?;

        let mut rollbacks = RollbackManager::new(&config)?;
        fs::write(&file, b"<h1>new</h1>").unwrap();

        assert!(
            rollbacks
                .manual_rollback(None, Some(&record.id), Some(vec![file.clone()]), &backups)
                .await?
        );
        assert_eq!(fs::read(&file).unwrap(), b"<h1>old</h1>");

        let ops = rollbacks.list_operations(Some("manual_rollback"), true);
        assert_eq!(ops.len(), 1);
        assert_eq!(ops[0].metadata.get("manual"), Some(&json!(true)));
        Ok(())
    }

    #[tokio::test]
    async fn test_manual_rollback_without_keys_is_false() -> Result<()> {
        let source = TempDir::new().unwrap();
        let backups_dir = TempDir::new().unwrap();
        let config = test_config(&source, &backups_dir);
        let backups = BackupManager::new(&config)?;
        let mut rollbacks = RollbackManager::new(&config)?;

        assert!(!rollbacks.manual_rollback(None, None, None, &backups).await?);
        assert!(
            !rollbacks
                .manual_rollback(None, Some("no_such_backup"), None, &backups)
                .await?
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_rollback_blocked_when_backup_deleted() -> Result<()> {
        let source = TempDir::new().unwrap();
        let backups_dir = TempDir::new().unwrap();
        fs::write(source.path().join("a.txt"), b"x").unwrap();

        let config = test_config(&source, &backups_dir);
        let mut backups = BackupManager::new(&config)?;
        let record = backups.create_full_backup(None, None).await?;

        let mut rollbacks = RollbackManager::new(&config)?;
        let op_id = rollbacks
            .register_operation("cleanup", &record.id, vec![], None)
            .await?;

        backups.delete_backup(&record.id).await?;

        assert!(!rollbacks.automatic_rollback(&op_id, &backups, None).await?);
        let op = rollbacks.get_operation(&op_id).unwrap();
        assert!(!op.completed);
        assert!(op.errors.iter().any(|e| e.contains("no longer exists")));
        Ok(())
    }

    #[tokio::test]
    async fn test_recovery_plan_is_read_only() -> Result<()> {
        let source = TempDir::new().unwrap();
        let backups_dir = TempDir::new().unwrap();
        fs::write(source.path().join("a.txt"), b"x").unwrap();

        let config = test_config(&source, &backups_dir);
        let mut backups = BackupManager::new(&config)?;
        let record = backups.create_full_backup(None, None).await?;

        let mut rollbacks = RollbackManager::new(&config)?;
        let op_id = rollbacks
            .register_operation("cleanup", &record.id, vec![], None)
            .await?;

        let plan = rollbacks.create_recovery_plan(&op_id, &backups)?;
        assert!(plan.can_rollback);
        assert_eq!(plan.backup_id, record.id);
        assert!(plan.estimated_duration_secs >= 1);
        assert_eq!(plan.steps.len(), 4);

        // Planning must not mark anything completed
        assert!(!rollbacks.get_operation(&op_id).unwrap().completed);
        Ok(())
    }

    #[tokio::test]
    async fn test_operations_survive_reconstruction() -> Result<()> {
        let source = TempDir::new().unwrap();
        let backups_dir = TempDir::new().unwrap();
        let config = test_config(&source, &backups_dir);

        let op_id = {
            let mut rollbacks = RollbackManager::new(&config)?;
            rollbacks
                .register_operation("cleanup", "some_backup", vec![], None)
                .await?
        };

        let rollbacks = RollbackManager::new(&config)?;
        assert!(rollbacks.get_operation(&op_id).is_some());
        Ok(())
    }

    #[tokio::test]
    async fn test_cleanup_old_operations() -> Result<()> {
        let source = TempDir::new().unwrap();
        let backups_dir = TempDir::new().unwrap();
        let config = test_config(&source, &backups_dir);
        let mut rollbacks = RollbackManager::new(&config)?;

        let old_id = rollbacks
            .register_operation("cleanup", "b1", vec![], None)
            .await?;
        let new_id = rollbacks
            .register_operation("cleanup", "b2", vec![], None)
            .await?;
        rollbacks.operations.get_mut(&old_id).unwrap().created_at =
            Utc::now() - Duration::days(120);

        let deleted = rollbacks.cleanup_old_operations(90).await?;
        assert_eq!(deleted, vec![old_id]);
        assert!(rollbacks.get_operation(&new_id).is_some());
        Ok(())
    }

    #[tokio::test]
    async fn test_statistics() -> Result<()> {
        let source = TempDir::new().unwrap();
        let backups_dir = TempDir::new().unwrap();
        fs::write(source.path().join("a.txt"), b"x").unwrap();

        let config = test_config(&source, &backups_dir);
        let mut backups = BackupManager::new(&config)?;
        let record = backups.create_full_backup(None, None).await?;

        let mut rollbacks = RollbackManager::new(&config)?;
        let done = rollbacks
            .register_operation("cleanup", &record.id, vec![], None)
            .await?;
        rollbacks
            .register_operation("migration", "missing_backup", vec![], None)
            .await?;
        rollbacks.automatic_rollback(&done, &backups, None).await?;

        let stats = rollbacks.statistics();
        assert_eq!(stats.total_count, 2);
        assert_eq!(stats.completed_count, 1);
        assert!((stats.success_rate - 0.5).abs() < f64::EPSILON);
        assert_eq!(stats.by_kind.get("cleanup").unwrap().completed, 1);
        assert_eq!(stats.recent_count, 2);
        Ok(())
    }
}
