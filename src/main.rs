//! migrate-guard - Main entry point
//!
//! CLI surface over the backup/rollback managers. Every subcommand maps
//! directly onto a manager method; operational failures surface as a
//! user-facing message and a non-zero exit.

use anyhow::{bail, Result};
use clap::{Args as ClapArgs, Parser, Subcommand};
use migrate_guard::backup::BackupKind;
use migrate_guard::{utils, BackupManager, Config, RollbackManager};
use std::io::Write;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Target directory (used when no configuration file is given)
    #[arg(short, long, value_name = "DIR")]
    target: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create, inspect and clean up backups
    Backup {
        #[command(subcommand)]
        command: BackupCommand,
    },
    /// Inspect and execute rollbacks
    Rollback(RollbackArgs),
}

#[derive(Subcommand, Debug)]
enum BackupCommand {
    /// Create a backup of the target directory
    Create {
        /// Back up only files changed since the last run
        #[arg(long)]
        incremental: bool,

        /// Source directory (defaults to the configured target)
        #[arg(long, value_name = "DIR")]
        source: Option<PathBuf>,

        /// Override the generated backup id
        #[arg(long)]
        name: Option<String>,
    },
    /// List registered backups, newest first
    List {
        /// Filter by kind (full, incremental, targeted_pre_op)
        #[arg(long)]
        kind: Option<String>,

        #[arg(long)]
        verified_only: bool,
    },
    /// Verify a backup's integrity
    Verify {
        id: String,

        /// Additionally extract to a scratch directory and read every member
        #[arg(long)]
        test_restoration: bool,
    },
    /// Delete a backup and its archive
    Delete { id: String },
    /// Apply the retention policy
    Cleanup {
        #[arg(long, default_value_t = 30)]
        max_age_days: i64,

        #[arg(long, default_value_t = 10)]
        max_count: usize,
    },
    /// Show registry statistics
    Stats,
}

#[derive(ClapArgs, Debug)]
struct RollbackArgs {
    /// List registered rollback operations
    #[arg(long)]
    list_operations: bool,

    /// Show the recovery plan for an operation without executing anything
    #[arg(long, value_name = "OPERATION_ID")]
    show_plan: Option<String>,

    /// Roll back an existing operation
    #[arg(long)]
    operation_id: Option<String>,

    /// Roll back directly from a backup id (registers an ad-hoc operation)
    #[arg(long)]
    backup_id: Option<String>,

    /// Files to restore when rolling back by backup id (repeatable)
    #[arg(long = "target-file", value_name = "PATH")]
    target_files: Vec<PathBuf>,

    /// Skip the confirmation prompt (validation still runs)
    #[arg(long)]
    force: bool,

    /// Show rollback statistics
    #[arg(long)]
    stats: bool,

    /// Prune operations older than this many days
    #[arg(long, value_name = "DAYS")]
    cleanup_max_age_days: Option<i64>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = if let Some(config_path) = &cli.config {
        Config::from_file(config_path)?
    } else if let Some(target) = &cli.target {
        Config::for_target(target.clone())
    } else {
        bail!("Either --config or --target is required");
    };

    let log_level = cli.log_level.as_deref().unwrap_or(&config.log.level);
    utils::logger::init(log_level)?;

    match cli.command {
        Command::Backup { command } => run_backup(command, &config).await,
        Command::Rollback(args) => run_rollback(args, &config).await,
    }
}

async fn run_backup(command: BackupCommand, config: &Config) -> Result<()> {
    let mut manager = BackupManager::new(config)?;

    match command {
        BackupCommand::Create {
            incremental,
            source,
            name,
        } => {
            if incremental {
                match manager
                    .create_incremental_backup(source.as_deref(), name.as_deref())
                    .await?
                {
                    Some(record) => print_record(&record),
                    None => println!("No changed files; nothing to back up."),
                }
            } else {
                let record = manager
                    .create_full_backup(source.as_deref(), name.as_deref())
                    .await?;
                print_record(&record);
            }
        }
        BackupCommand::List {
            kind,
            verified_only,
        } => {
            let kind = match kind.as_deref() {
                None => None,
                Some(s) => Some(parse_kind(s)?),
            };
            let records = manager.list_backups(kind, verified_only);
            if records.is_empty() {
                println!("No backups registered.");
            }
            for record in records {
                println!(
                    "{}  {:16}  {}  {:>12} bytes  {}",
                    record.created_at.format("%Y-%m-%d %H:%M:%S"),
                    record.kind.as_str(),
                    record.id,
                    record.size_bytes,
                    if record.verified { "verified" } else { "unverified" },
                );
            }
        }
        BackupCommand::Verify {
            id,
            test_restoration,
        } => {
            if manager.verify_backup(&id, test_restoration).await? {
                println!("Backup {} verified.", id);
            } else {
                let reason = manager
                    .get_backup(&id)
                    .and_then(|r| r.metadata.get("verification_failure"))
                    .and_then(|v| v.as_str())
                    .unwrap_or("backup not found");
                bail!("Backup {} failed verification: {}", id, reason);
            }
        }
        BackupCommand::Delete { id } => {
            if manager.delete_backup(&id).await? {
                println!("Deleted backup {}.", id);
            } else {
                println!("No backup with id {}.", id);
            }
        }
        BackupCommand::Cleanup {
            max_age_days,
            max_count,
        } => {
            let deleted = manager.cleanup_old_backups(max_age_days, max_count).await?;
            println!("Deleted {} backups.", deleted.len());
            for id in deleted {
                println!("  {}", id);
            }
        }
        BackupCommand::Stats => {
            let stats = manager.statistics();
            println!("Backups:            {}", stats.total_count);
            println!("Total size:         {} bytes", stats.total_bytes);
            println!(
                "Verified:           {} ({:.0}%)",
                stats.verified_count,
                stats.verification_rate * 100.0
            );
            for (kind, count) in &stats.by_kind {
                println!("  {:16} {}", kind, count);
            }
            if let Some(oldest) = stats.oldest {
                println!("Oldest:             {}", oldest.format("%Y-%m-%d %H:%M:%S"));
            }
            if let Some(newest) = stats.newest {
                println!("Newest:             {}", newest.format("%Y-%m-%d %H:%M:%S"));
            }
        }
    }

    Ok(())
}

async fn run_rollback(args: RollbackArgs, config: &Config) -> Result<()> {
    let backups = BackupManager::new(config)?;
    let mut manager = RollbackManager::new(config)?;

    if args.list_operations {
        let operations = manager.list_operations(None, false);
        if operations.is_empty() {
            println!("No rollback operations registered.");
        }
        for op in operations {
            println!(
                "{}  {:16}  {}  backup={}  {}",
                op.created_at.format("%Y-%m-%d %H:%M:%S"),
                op.kind,
                op.id,
                op.backup_id,
                if op.completed { "completed" } else { "pending" },
            );
        }
        return Ok(());
    }

    if args.stats {
        let stats = manager.statistics();
        println!("Operations:         {}", stats.total_count);
        println!("Completed:          {}", stats.completed_count);
        println!("Failed:             {}", stats.failed_count);
        println!("Success rate:       {:.0}%", stats.success_rate * 100.0);
        println!("Last 7 days:        {}", stats.recent_count);
        for (kind, kind_stats) in &stats.by_kind {
            println!(
                "  {:16} {} total, {} completed",
                kind, kind_stats.total, kind_stats.completed
            );
        }
        return Ok(());
    }

    if let Some(max_age_days) = args.cleanup_max_age_days {
        let deleted = manager.cleanup_old_operations(max_age_days).await?;
        println!("Pruned {} operations.", deleted.len());
        return Ok(());
    }

    if let Some(operation_id) = &args.show_plan {
        let plan = manager.create_recovery_plan(operation_id, &backups)?;
        println!("Recovery plan for {}", plan.operation_id);
        println!("  Backup:             {}", plan.backup_id);
        println!("  Backup size:        {} bytes", plan.backup_size_bytes);
        println!("  Estimated duration: {} s", plan.estimated_duration_secs);
        println!("  Steps:");
        for (i, step) in plan.steps.iter().enumerate() {
            println!("    {}. {}", i + 1, step);
        }
        if plan.can_rollback {
            println!("  Rollback is currently possible.");
        } else {
            println!("  Rollback is NOT currently possible:");
            for error in &plan.errors {
                println!("    - {}", error);
            }
        }
        return Ok(());
    }

    if args.operation_id.is_none() && args.backup_id.is_none() {
        bail!("Nothing to do: pass --operation-id or --backup-id (or --list-operations / --show-plan)");
    }

    if !args.force && !confirm("Execute rollback? This overwrites files on disk.")? {
        println!("Aborted.");
        return Ok(());
    }

    let success = manager
        .manual_rollback(
            args.operation_id.as_deref(),
            args.backup_id.as_deref(),
            if args.target_files.is_empty() {
                None
            } else {
                Some(args.target_files.clone())
            },
            &backups,
        )
        .await?;

    if success {
        println!("Rollback completed.");
        Ok(())
    } else {
        // Surface the accumulated error list from the operation record
        let errors: Vec<String> = args
            .operation_id
            .as_deref()
            .and_then(|id| manager.get_operation(id))
            .or_else(|| manager.list_operations(None, false).into_iter().next())
            .map(|op| op.errors.clone())
            .unwrap_or_default();
        for error in &errors {
            eprintln!("  - {}", error);
        }
        bail!("Rollback failed ({} recorded errors)", errors.len());
    }
}

fn print_record(record: &migrate_guard::BackupRecord) {
    println!("Created backup {}", record.id);
    println!("  Kind:     {}", record.kind.as_str());
    println!("  Archive:  {}", record.archive_path.display());
    println!("  Size:     {} bytes", record.size_bytes);
    println!("  Checksum: {}", record.checksum);
}

fn parse_kind(s: &str) -> Result<BackupKind> {
    match s {
        "full" => Ok(BackupKind::Full),
        "incremental" => Ok(BackupKind::Incremental),
        "targeted_pre_op" | "preop" => Ok(BackupKind::TargetedPreOp),
        other => bail!("Unknown backup kind: {}", other),
    }
}

fn confirm(prompt: &str) -> Result<bool> {
    print!("{} [y/N] ", prompt);
    std::io::stdout().flush()?;
    let mut answer = String::new();
    std::io::stdin().read_line(&mut answer)?;
    Ok(matches!(answer.trim(), "y" | "Y" | "yes"))
}
