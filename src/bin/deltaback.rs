//! # deltaback CLI - Incremental directory backups
//!
//! Command-line interface for the deltaback engine.
//!
//! ## Usage
//! ```bash
//! # Back up ./documents into /mnt/backup (the first run only records a baseline)
//! deltaback run -s ./documents -d /mnt/backup
//!
//! # Show the last runs
//! deltaback history -d /mnt/backup
//!
//! # List the changes of one run
//! deltaback show -d /mnt/backup 42
//! ```

use anyhow::{anyhow, Context};
use clap::{Parser, Subcommand};
use colored::*;
use deltaback::{
    format_bytes, BackupBuilder, BackupConfig, BackupError, FileState, ProgressInfo,
    PromotionFailurePolicy, RunLogStore, RunState, RunSummary,
};
use humantime::format_duration;
use indicatif::{ProgressBar, ProgressStyle};
use parking_lot::Mutex;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

/// deltaback - copy only what changed since the last backup
#[derive(Parser)]
#[command(name = "deltaback")]
#[command(version)]
#[command(about = "Incremental directory backups with a change history")]
#[command(long_about = None)]
struct Cli {
    /// Enable debug logging (RUST_LOG takes precedence)
    #[arg(long, global = true)]
    debug: bool,

    /// Load settings from a JSON configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a backup
    Run {
        /// Source directory
        #[arg(short, long)]
        source: Option<PathBuf>,

        /// Destination directory
        #[arg(short, long)]
        destination: Option<PathBuf>,

        /// Number of worker threads
        #[arg(short, long)]
        workers: Option<usize>,

        /// Exclude paths matching a glob pattern (repeatable)
        #[arg(short, long)]
        exclude: Vec<String>,

        /// Delete staged copies if they cannot be promoted
        #[arg(long)]
        discard_on_failure: bool,

        /// Show a progress spinner
        #[arg(long)]
        progress: bool,
    },

    /// List past runs, newest first
    History {
        /// Destination directory
        #[arg(short, long)]
        destination: Option<PathBuf>,

        /// Maximum number of runs to show
        #[arg(short, long, default_value_t = 20)]
        limit: usize,
    },

    /// Show the summary and change events of one run
    Show {
        /// Destination directory
        #[arg(short, long)]
        destination: Option<PathBuf>,

        /// Run identifier as listed by `history`
        run_id: i64,
    },
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.debug);

    // Disable colors if needed
    if std::env::var("NO_COLOR").is_ok() {
        colored::control::set_override(false);
    }

    match run(cli) {
        Ok(true) => {}
        Ok(false) => std::process::exit(1),
        Err(e) => {
            let message = match e.downcast_ref::<BackupError>() {
                Some(err) => err.user_message(),
                None => format!("{:#}", e),
            };
            eprintln!("{}: {}", "Error".red().bold(), message);
            std::process::exit(1);
        }
    }
}

fn init_logging(debug: bool) {
    let default_directive = if debug { "deltaback=debug" } else { "deltaback=info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

/// Main command runner, returns whether the command succeeded
fn run(cli: Cli) -> anyhow::Result<bool> {
    let config = match &cli.config {
        Some(path) => BackupConfig::from_json_file(path)
            .with_context(|| format!("failed to load configuration from {:?}", path))?,
        None => BackupConfig::default(),
    };

    match cli.command {
        Commands::Run {
            source,
            destination,
            workers,
            exclude,
            discard_on_failure,
            progress,
        } => {
            let mut config = config;
            if let Some(source) = source {
                config.source_dir = source;
            }
            if let Some(destination) = destination {
                config.destination_dir = destination;
            }
            if let Some(workers) = workers {
                config.parallel_workers = workers;
            }
            config.exclude_patterns.extend(exclude);
            if discard_on_failure {
                config.on_promotion_failure = PromotionFailurePolicy::Discard;
            }
            cmd_run(config, progress)
        }
        Commands::History { destination, limit } => {
            let mut config = config;
            config.destination_dir = destination_or_config(destination, &config)?;
            cmd_history(&config, limit).map(|_| true)
        }
        Commands::Show { destination, run_id } => {
            let mut config = config;
            config.destination_dir = destination_or_config(destination, &config)?;
            cmd_show(&config, run_id).map(|_| true)
        }
    }
}

fn destination_or_config(destination: Option<PathBuf>, config: &BackupConfig) -> anyhow::Result<PathBuf> {
    match destination {
        Some(destination) => Ok(destination),
        None if !config.destination_dir.as_os_str().is_empty() => Ok(config.destination_dir.clone()),
        None => Err(anyhow!("a destination directory is required (-d)")),
    }
}

/// Run one backup and print its summary
fn cmd_run(config: BackupConfig, show_progress: bool) -> anyhow::Result<bool> {
    if config.source_dir.as_os_str().is_empty() || config.destination_dir.as_os_str().is_empty() {
        return Err(anyhow!("both a source (-s) and a destination (-d) directory are required"));
    }

    let mut builder = BackupBuilder::from_config(config);
    let progress = if show_progress {
        let pb = ProgressBar::new_spinner();
        pb.set_style(ProgressStyle::default_spinner().template("{spinner:.green} {msg}")?);
        pb.set_message("Scanning files...");
        pb.enable_steady_tick(Duration::from_millis(100));

        let pb_callback = pb.clone();
        let last_update = Mutex::new(Instant::now());
        builder = builder.progress_callback(Arc::new(move |info: ProgressInfo| {
            let mut last_update = last_update.lock();
            if last_update.elapsed() >= Duration::from_millis(50) {
                *last_update = Instant::now();
                pb_callback.set_message(format!(
                    "{} {} files ({})",
                    info.operation,
                    info.processed,
                    format_bytes(info.bytes_processed)
                ));
            }
        }));
        Some(pb)
    } else {
        None
    };

    let backup = builder.build()?;
    let result = backup.run();

    if let Some(pb) = progress {
        pb.finish_and_clear();
    }

    let summary = result?;
    print_summary(&summary);
    Ok(summary.state.is_success())
}

fn print_summary(summary: &RunSummary) {
    match summary.state {
        RunState::Completed => println!("{} Backup completed", "✓".green().bold()),
        RunState::Initializing => println!("{} Baseline initialized (nothing copied)", "✓".green().bold()),
        state => println!("{} Backup {}", "✗".red().bold(), state.to_string().to_lowercase().red().bold()),
    }

    if let Some(id) = summary.id {
        println!("  Run: {}", format!("#{}", id).yellow().bold());
    }
    println!("  Destination: {}", summary.destination_dir.display().to_string().cyan());
    println!(
        "  Files: {} ({})",
        summary.total_count.to_string().cyan(),
        format_bytes(summary.total_size).cyan()
    );
    if summary.state != RunState::Initializing {
        println!(
            "  Changes: {} added, {} modified, {} deleted",
            summary.added_count.to_string().green(),
            summary.modified_count.to_string().yellow(),
            summary.deleted_count.to_string().red()
        );
        println!(
            "  Copied: {} files ({})",
            summary.success_count.to_string().cyan(),
            format_bytes(summary.backup_size).cyan()
        );
    }
    if summary.failure_count > 0 {
        println!("  Failures: {}", summary.failure_count.to_string().red().bold());
    }
    println!("  Time: {}", format_duration(round_to_millis(summary.timings.total)).to_string().cyan());
    if !summary.message.is_empty() {
        println!("  {}", summary.message.dimmed());
    }
}

fn open_history(config: &BackupConfig) -> anyhow::Result<Option<RunLogStore>> {
    let path = config.log_db_path();
    if !path.exists() {
        return Ok(None);
    }
    Ok(Some(RunLogStore::open(&path, config.event_batch_size)?))
}

/// List past runs
fn cmd_history(config: &BackupConfig, limit: usize) -> anyhow::Result<()> {
    let Some(store) = open_history(config)? else {
        println!("{}", "No backup history found.".yellow());
        return Ok(());
    };
    let summaries = store.list_summaries(limit)?;
    if summaries.is_empty() {
        println!("{}", "No backup history found.".yellow());
        return Ok(());
    }

    println!("{}", "Backup runs:".blue().bold());
    println!();
    for summary in &summaries {
        let state = match summary.state {
            RunState::Completed => summary.state.to_string().green(),
            RunState::Initializing => summary.state.to_string().cyan(),
            _ => summary.state.to_string().red(),
        };
        println!(
            "{} {} {:<12} {} {} {}  {}",
            format!("#{:<5}", summary.id.unwrap_or_default()).yellow().bold(),
            summary.date.format("%Y-%m-%d %H:%M:%S").to_string().dimmed(),
            state,
            format!("+{}", summary.added_count).green(),
            format!("~{}", summary.modified_count).yellow(),
            format!("-{}", summary.deleted_count).red(),
            format_bytes(summary.backup_size).dimmed()
        );
    }
    Ok(())
}

/// Show one run with its change events
fn cmd_show(config: &BackupConfig, run_id: i64) -> anyhow::Result<()> {
    let store = open_history(config)?
        .ok_or_else(|| anyhow!("no backup history in {:?}", config.destination_dir))?;
    let summary = store
        .summary(run_id)?
        .ok_or_else(|| anyhow!("run #{} not found", run_id))?;

    println!("{}", format!("Run #{}", run_id).blue().bold());
    println!("  Date: {}", summary.date.format("%Y-%m-%d %H:%M:%S").to_string().cyan());
    println!("  State: {}", summary.state.to_string().cyan());
    println!("  Source: {}", summary.source_dir.display());
    println!("  Destination: {}", summary.destination_dir.display());
    println!(
        "  Files: {} ({}), copied {} ({})",
        summary.total_count,
        format_bytes(summary.total_size),
        summary.success_count,
        format_bytes(summary.backup_size)
    );
    println!(
        "  Time: {} (scan {}, promote {}, logging {})",
        format_duration(round_to_millis(summary.timings.total)),
        format_duration(round_to_millis(summary.timings.scanning)),
        format_duration(round_to_millis(summary.timings.promotion)),
        format_duration(round_to_millis(summary.timings.logging))
    );
    if !summary.message.is_empty() {
        println!("  Message: {}", summary.message.dimmed());
    }

    let events = store.events_for_run(run_id)?;
    if events.is_empty() {
        println!("\n{}", "No changes recorded.".dimmed());
        return Ok(());
    }

    println!("\n{}", "Changes:".bold());
    for event in &events {
        let line = match event.state {
            FileState::Added => format!("  + {}", event.path).green(),
            FileState::Modified => format!("  ~ {}", event.path).yellow(),
            FileState::Deleted => format!("  - {}", event.path).red(),
            FileState::Unchanged => format!("    {}", event.path).normal(),
        };
        match &event.message {
            Some(message) => println!("{} {}", line, format!("({})", message).red()),
            None => println!("{}", line),
        }
    }
    Ok(())
}

fn round_to_millis(duration: Duration) -> Duration {
    Duration::from_millis(duration.as_millis() as u64)
}
