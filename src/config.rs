//! Configuration for the backup/rollback core.
//!
//! Loaded from a TOML file by the orchestrator/CLI layer; the managers only
//! ever read it.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Directory tree the migration operates on (backup source / restore target)
    pub target_directory: PathBuf,

    /// Directory holding archives, the registry and state files
    pub backup_dir: PathBuf,

    /// When true, mutating backup operations refuse to run
    #[serde(default)]
    pub dry_run: bool,

    /// Filename substrings excluded from full backups
    #[serde(default = "default_exclude_patterns")]
    pub exclude_patterns: Vec<String>,

    /// Directory names excluded from full backups (matched as path components)
    #[serde(default = "default_exclude_dirs")]
    pub exclude_dirs: Vec<String>,

    /// File extensions the incremental change tracker watches.
    /// Deliberately narrow (source files only); widening the backup scope to
    /// other assets is a policy decision for the caller, not a default.
    #[serde(default = "default_tracked_extensions")]
    pub tracked_extensions: Vec<String>,

    #[serde(default)]
    pub log: LogConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_exclude_patterns() -> Vec<String> {
    vec![".DS_Store".to_string(), ".swp".to_string(), "~".to_string()]
}

fn default_exclude_dirs() -> Vec<String> {
    vec![
        // Never archive our own backup state when it lives inside the target
        ".migrate-guard".to_string(),
        ".git".to_string(),
        "node_modules".to_string(),
        "__pycache__".to_string(),
        ".venv".to_string(),
        "vendor".to_string(),
    ]
}

fn default_tracked_extensions() -> Vec<String> {
    vec![
        "py".to_string(),
        "php".to_string(),
        "js".to_string(),
        "html".to_string(),
        "css".to_string(),
    ]
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file(path: &PathBuf) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    /// Configuration rooted at a target directory, with the backup directory
    /// placed alongside it.
    pub fn for_target(target: PathBuf) -> Self {
        let backup_dir = target.join(".migrate-guard").join("backups");
        Config {
            target_directory: target,
            backup_dir,
            dry_run: false,
            exclude_patterns: default_exclude_patterns(),
            exclude_dirs: default_exclude_dirs(),
            tracked_extensions: default_tracked_extensions(),
            log: LogConfig::default(),
        }
    }
}
