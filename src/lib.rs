//! # deltaback - Incremental directory backups
//!
//! A backup engine that detects which files in a source tree were added,
//! modified or deleted since the previous run, copies only the changed
//! content into a dated directory and durably records both the new tree
//! state and a history of changes.
//!
//! ## Overview
//!
//! Each run:
//! - Loads the **baseline**, the `(path, size, mtime)` of every file as of the
//!   last successful run
//! - Walks the source tree on a bounded worker pool, classifying each file as
//!   it is discovered
//! - Copies Added and Modified files into a staging directory, preserving
//!   modification times
//! - Reports every baseline entry that was not seen again as Deleted
//! - Renames the staging directory to `YYYYMMDD` (or `YYYYMMDD_N` on collision)
//! - Records a run summary, the change events and the new baseline in SQLite
//!
//! The first run against a source, or a run pointed at a different source than
//! the baseline was captured from, records the tree without copying anything.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use deltaback::{BackupBuilder, RunState};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let backup = BackupBuilder::new()
//!     .source_dir("./documents")
//!     .destination_dir("/mnt/backup")
//!     .parallel_workers(8)
//!     .build()?;
//!
//! // First run records the baseline
//! let first = backup.run()?;
//! assert_eq!(first.state, RunState::Initializing);
//!
//! // Later runs copy only what changed
//! let next = backup.run()?;
//! println!(
//!     "{} added, {} modified, {} deleted -> {:?}",
//!     next.added_count, next.modified_count, next.deleted_count, next.destination_dir
//! );
//! # Ok(())
//! # }
//! ```
//!
//! ## Change detection
//!
//! Two records match when their sizes are equal and their modification times
//! agree to the second. Content is never hashed.
//!
//! ## On-disk layout
//!
//! ```text
//! /mnt/backup/
//! ├── backup_origin.db      baseline
//! ├── backup_log.db         run summaries and change events
//! ├── 20240301/             changed files of the first comparing run that day
//! └── 20240301_1/           ... and of the second
//! ```
//!
//! ## Error Handling
//!
//! All operations return `Result<T, BackupError>`. Traversal failures abort a
//! run, per-file copy failures are recorded and skipped, and an exhausted
//! promotion ends the run as [`RunState::Failed`]. See [`error`] for details.
//!
//! ## Module Organization
//!
//! - [`backup`]: Run orchestration and builder
//! - [`scanner`]: Source tree traversal
//! - [`classifier`]: Change classification against the baseline
//! - [`copier`]: Copying into the staging directory
//! - [`promoter`]: Dated directory promotion
//! - [`store`]: SQLite persistence of baselines and run history
//! - [`config`]: Run configuration
//! - [`types`]: Common types and data structures
//! - [`error`]: Error types and handling

// Public API modules
pub mod backup;
pub mod classifier;
pub mod config;
pub mod copier;
pub mod error;
pub mod promoter;
pub mod scanner;
pub mod store;
pub mod types;

// Internal modules
pub(crate) mod utils;

// Re-export main types for convenience
pub use backup::{Backup, BackupBuilder};
pub use classifier::{Baseline, ChangeClassifier, RunMode};
pub use config::{BackupConfig, PromotionFailurePolicy};
pub use error::{BackupError, Result};
pub use store::{BaselineStore, RunLogStore};
pub use types::*;

/// Format a byte count for display
pub fn format_bytes(bytes: u64) -> String {
    utils::format_bytes(bytes)
}
