//! Backup and rollback core for web-application migrations.
//!
//! Content-addressed backups (full, incremental, targeted pre-operation
//! snapshots), integrity verification and transactional recovery with
//! precondition/postcondition validation. Platform adapters and the
//! migration orchestrator sit on top of this crate and drive it through
//! [`BackupManager`] and [`RollbackManager`].

pub mod archive;
pub mod backup;
pub mod checksum;
pub mod config;
pub mod fs;
pub mod rollback;
pub mod tracker;
pub mod utils;
pub mod validate;

// Re-export commonly used types
pub use backup::{BackupKind, BackupManager, BackupRecord};
pub use config::Config;
pub use rollback::{RollbackManager, RollbackOperation};
pub use utils::errors::GuardError;
pub type Result<T> = std::result::Result<T, GuardError>;
