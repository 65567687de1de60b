//! Incremental change tracker.
//!
//! Remembers the last-seen content digest of every tracked source file and
//! diffs the filesystem against that memory. This is a cache-and-diff, not a
//! pure query: every inspection updates the stored digests in place, so two
//! consecutive runs with no filesystem changes report nothing the second
//! time.

use crate::checksum::digest_file;
use crate::fs::walker::{walk_directory, WalkOptions};
use crate::utils::errors::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Persisted tracker state (`file_checksums` + `last_backup_time`)
#[derive(Debug, Default, Serialize, Deserialize)]
struct TrackerState {
    file_checksums: BTreeMap<PathBuf, String>,
    last_backup_time: Option<DateTime<Utc>>,
}

pub struct ChangeTracker {
    state_file: PathBuf,
    extensions: Vec<String>,
    state: TrackerState,
}

impl ChangeTracker {
    /// Load tracker state from `state_file`. A missing, unreadable or corrupt
    /// state file resets to empty state: the archives are the durable source
    /// of truth, losing the digest cache only costs one extra full diff.
    pub fn load(state_file: PathBuf, extensions: Vec<String>) -> Self {
        let state = match std::fs::read_to_string(&state_file) {
            Ok(content) => match serde_json::from_str::<TrackerState>(&content) {
                Ok(state) => state,
                Err(e) => {
                    warn!(
                        "Corrupt tracker state {}, resetting: {}",
                        state_file.display(),
                        e
                    );
                    TrackerState::default()
                }
            },
            Err(_) => TrackerState::default(),
        };

        Self {
            state_file,
            extensions,
            state,
        }
    }

    /// Walk all tracked files under `root` and return those whose digest
    /// differs from the stored one (a file with no stored digest always
    /// counts as changed). Updates the stored digest for every file
    /// inspected.
    pub fn changed_files(&mut self, root: &Path) -> Result<Vec<PathBuf>> {
        let options = WalkOptions::with_extensions(&self.extensions);
        let files = walk_directory(root, &options)?;

        let mut changed = Vec::new();
        for file in files {
            let digest = match digest_file(&file.path) {
                Ok(digest) => digest,
                Err(e) => {
                    // Unreadable now; treat as changed so the next backup
                    // retries it, and drop the stale digest.
                    warn!("Cannot digest {}: {}", file.path.display(), e);
                    self.state.file_checksums.remove(&file.path);
                    changed.push(file.path);
                    continue;
                }
            };

            let previous = self.state.file_checksums.insert(file.path.clone(), digest.clone());
            if previous.as_deref() != Some(digest.as_str()) {
                changed.push(file.path);
            }
        }

        self.state.last_backup_time = Some(Utc::now());
        debug!("Change detection: {} changed files under {}", changed.len(), root.display());
        Ok(changed)
    }

    /// Re-baseline the stored digest for an explicit file list. Used after a
    /// successful incremental backup so already-digested files are not
    /// double-counted.
    pub fn update_digests(&mut self, files: &[PathBuf]) {
        for file in files {
            match digest_file(file) {
                Ok(digest) => {
                    self.state.file_checksums.insert(file.clone(), digest);
                }
                Err(e) => {
                    warn!("Cannot re-baseline {}: {}", file.display(), e);
                }
            }
        }
    }

    /// Persist tracker state to its state file.
    pub fn save(&self) -> Result<()> {
        if let Some(parent) = self.state_file.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(&self.state)?;
        std::fs::write(&self.state_file, json)?;
        Ok(())
    }

    pub fn last_backup_time(&self) -> Option<DateTime<Utc>> {
        self.state.last_backup_time
    }

    #[cfg(test)]
    fn tracked_count(&self) -> usize {
        self.state.file_checksums.len()
    }
}
