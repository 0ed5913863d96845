//! Backup run orchestration
//!
//! [`Backup`] sequences one run end to end:
//!
//! 1. Load the baseline and decide between initialization and comparison
//! 2. Walk the source tree on a bounded worker pool, classifying each file as
//!    it is discovered and copying Added/Modified files into a staging directory
//! 3. Wait for every worker, then turn unclaimed baseline entries into deletions
//! 4. Promote the staging directory to its dated name
//! 5. Persist the summary, the change events and the new baseline
//!
//! ## Failure handling
//!
//! A traversal error aborts the run before anything is persisted and is
//! returned as `Err`. A file that fails to copy is recorded against that file
//! and the run carries on. Exhausted promotion ends the run as
//! [`RunState::Failed`]; the summary and events are still logged but the
//! baseline is left untouched so the next run detects the same changes again.
//!
//! Persistence is best-effort per step. Each store write that fails is logged
//! and appended to the summary message, and the remaining steps still run.
//! The baseline replacement is the last data write, so a run that crashes
//! before it can safely be repeated.
//!
//! ## Example
//!
//! ```rust,no_run
//! use deltaback::BackupBuilder;
//!
//! # fn main() -> deltaback::Result<()> {
//! let backup = BackupBuilder::new()
//!     .source_dir("/home/user/documents")
//!     .destination_dir("/mnt/backup")
//!     .exclude_patterns(vec!["**/*.tmp".to_string()])
//!     .build()?;
//!
//! let summary = backup.run()?;
//! println!("{}: {} files changed", summary.state, summary.changed_count());
//! # Ok(())
//! # }
//! ```

use chrono::Local;
use rayon::prelude::*;
use rayon::ThreadPool;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::classifier::{ChangeClassifier, RunMode};
use crate::config::{BackupConfig, PromotionFailurePolicy};
use crate::copier::FileCopier;
use crate::error::{BackupError, Result};
use crate::promoter::DirectoryPromoter;
use crate::scanner::{DirectoryScanner, ScannedFile};
use crate::store::{BaselineStore, RunLogStore};
use crate::types::{ChangeEvent, FileRecord, FileState, ProgressCallback, ProgressInfo, RunState, RunSummary};
use crate::utils;

/// Name prefix of per-run staging directories inside the destination root
pub const STAGING_PREFIX: &str = ".deltaback-staging-";

/// Incremental backup engine for one source/destination pair
pub struct Backup {
    config: BackupConfig,
    progress_callback: Option<ProgressCallback>,
}

/// Run-level counters shared by every worker
#[derive(Debug, Default)]
struct RunCounters {
    total_count: AtomicU64,
    total_size: AtomicU64,
    added_count: AtomicU64,
    modified_count: AtomicU64,
    unchanged_count: AtomicU64,
    success_count: AtomicU64,
    failure_count: AtomicU64,
    backup_size: AtomicU64,
}

impl RunCounters {
    fn record_seen(&self, record: &FileRecord) {
        self.total_count.fetch_add(1, Ordering::Relaxed);
        self.total_size.fetch_add(record.size, Ordering::Relaxed);
    }

    fn record_state(&self, state: FileState) {
        let counter = match state {
            FileState::Added => &self.added_count,
            FileState::Modified => &self.modified_count,
            FileState::Unchanged => &self.unchanged_count,
            FileState::Deleted => return,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn record_copy(&self, bytes: u64) {
        self.success_count.fetch_add(1, Ordering::Relaxed);
        self.backup_size.fetch_add(bytes, Ordering::Relaxed);
    }

    fn record_failure(&self) {
        self.failure_count.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot_into(&self, summary: &mut RunSummary) {
        summary.total_count = self.total_count.load(Ordering::Relaxed);
        summary.total_size = self.total_size.load(Ordering::Relaxed);
        summary.added_count = self.added_count.load(Ordering::Relaxed);
        summary.modified_count = self.modified_count.load(Ordering::Relaxed);
        summary.unchanged_count = self.unchanged_count.load(Ordering::Relaxed);
        summary.success_count = self.success_count.load(Ordering::Relaxed);
        summary.failure_count = self.failure_count.load(Ordering::Relaxed);
        summary.backup_size = self.backup_size.load(Ordering::Relaxed);
    }
}

/// Result of processing one scanned file
struct FileOutcome {
    /// Record kept in the new baseline
    record: Option<FileRecord>,
    /// Change event, if the file changed
    event: Option<ChangeEvent>,
}

/// Everything the persistence phase needs from a run
struct RunOutcome {
    events: Vec<ChangeEvent>,
    /// New baseline, or `None` to keep the previous one
    baseline: Option<Vec<FileRecord>>,
}

impl Backup {
    /// Create a backup engine from a configuration
    ///
    /// # Errors
    ///
    /// - [`BackupError::InvalidConfiguration`] if the configuration is invalid
    pub fn new(mut config: BackupConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            progress_callback: None,
        })
    }

    /// Start building a backup engine
    pub fn builder() -> BackupBuilder {
        BackupBuilder::new()
    }

    /// Active configuration
    pub fn config(&self) -> &BackupConfig {
        &self.config
    }

    /// Execute one backup run
    ///
    /// Returns the final summary for runs that reach a terminal state,
    /// including runs that end as [`RunState::Failed`] because promotion was
    /// exhausted. Check [`RunState::is_success`] on the returned state.
    ///
    /// # Errors
    ///
    /// - [`BackupError::InvalidSourceDir`] / [`BackupError::InvalidDestinationDir`]
    ///   if a directory does not exist
    /// - [`BackupError::Scan`] if the source tree cannot be traversed; nothing
    ///   is persisted in that case
    /// - [`BackupError::Sql`] if a store cannot be opened or the baseline
    ///   cannot be loaded
    #[instrument(skip(self), fields(source = ?self.config.source_dir))]
    pub fn run(&self) -> Result<RunSummary> {
        let started = Instant::now();

        let source_dir = resolve_dir(&self.config.source_dir)
            .ok_or_else(|| BackupError::InvalidSourceDir(self.config.source_dir.clone()))?;
        let destination_dir = resolve_dir(&self.config.destination_dir)
            .ok_or_else(|| BackupError::InvalidDestinationDir(self.config.destination_dir.clone()))?;
        if utils::is_within(&source_dir, &destination_dir) {
            return Err(BackupError::InvalidConfiguration(format!(
                "source {:?} lies inside destination {:?}",
                source_dir, destination_dir
            )));
        }

        info!("Starting backup of {:?} into {:?}", source_dir, destination_dir);

        let mut baseline_store = BaselineStore::open(&self.config.origin_db_path())?;
        let mut log_store = RunLogStore::open(&self.config.log_db_path(), self.config.event_batch_size)?;
        let baseline = baseline_store.load()?;

        let mut summary = RunSummary::new(Local::now(), source_dir.clone());
        summary.destination_dir = destination_dir.clone();

        let pool = self.build_pool()?;
        let scanner = DirectoryScanner::new(source_dir.clone())
            .with_exclude_patterns(&self.config.exclude_patterns)?
            .with_follow_symlinks(self.config.follow_symlinks)
            .exclude_dir(destination_dir.clone());

        let outcome = match baseline.mode_for(&source_dir) {
            RunMode::Initialize => self.initialize(&mut summary, &pool, &scanner, started)?,
            RunMode::Compare => self.compare(
                &mut summary,
                &pool,
                scanner,
                baseline.records,
                &destination_dir,
                started,
            )?,
        };

        self.persist(&mut summary, outcome, &mut baseline_store, &mut log_store, started)?;
        log_summary(&summary);
        Ok(summary)
    }

    /// Record the whole tree as the new baseline without copying anything
    fn initialize(
        &self,
        summary: &mut RunSummary,
        pool: &ThreadPool,
        scanner: &DirectoryScanner,
        started: Instant,
    ) -> Result<RunOutcome> {
        summary.transition(RunState::Initializing)?;
        info!(
            "No usable baseline for {:?}, recording current tree without copying",
            scanner.root()
        );

        let counters = RunCounters::default();
        let scan_start = Instant::now();
        let scanned = pool.install(|| {
            scanner
                .walk()
                .par_bridge()
                .map(|item| item.map(|file| self.record_file(file, &counters)))
                .collect::<Result<Vec<Option<FileRecord>>>>()
        });
        summary.timings.scanning = scan_start.elapsed();
        counters.snapshot_into(summary);

        let mut records: Vec<FileRecord> = match scanned {
            Ok(scanned) => scanned.into_iter().flatten().collect(),
            Err(e) => return Err(abort_scan(summary, None, e, started)),
        };
        records.sort_by(|a, b| a.path.cmp(&b.path));

        summary.append_message(format!("baseline initialized with {} files", records.len()));
        Ok(RunOutcome {
            events: Vec::new(),
            baseline: Some(records),
        })
    }

    /// Diff the tree against the baseline, copy changes and promote them
    fn compare(
        &self,
        summary: &mut RunSummary,
        pool: &ThreadPool,
        scanner: DirectoryScanner,
        previous: Vec<FileRecord>,
        destination_dir: &Path,
        started: Instant,
    ) -> Result<RunOutcome> {
        summary.transition(RunState::Comparing)?;
        info!("Comparing against baseline of {} files", previous.len());

        let staging = destination_dir.join(format!("{}{}", STAGING_PREFIX, Uuid::new_v4()));
        fs::create_dir_all(&staging)?;
        debug!("Created staging directory {:?}", staging);

        let scanner = scanner.exclude_dir(staging.clone());
        let classifier = ChangeClassifier::new(previous);
        let copier = FileCopier::new(scanner.root().to_path_buf(), staging.clone());
        let counters = RunCounters::default();

        let scan_start = Instant::now();
        let scanned = pool.install(|| {
            scanner
                .walk()
                .par_bridge()
                .map(|item| item.map(|file| self.compare_file(file, &classifier, &copier, &counters)))
                .collect::<Result<Vec<FileOutcome>>>()
        });
        summary.timings.scanning = scan_start.elapsed();
        counters.snapshot_into(summary);

        let scanned = match scanned {
            Ok(scanned) => scanned,
            Err(e) => return Err(abort_scan(summary, Some(&staging), e, started)),
        };

        // Every worker has finished, so unclaimed entries are deletions
        let deleted = classifier.into_deleted();
        summary.deleted_count = deleted.len() as u64;

        let mut records = Vec::with_capacity(scanned.len());
        let mut events = Vec::with_capacity(deleted.len());
        for outcome in scanned {
            records.extend(outcome.record);
            events.extend(outcome.event);
        }
        events.extend(deleted);
        events.sort_by(|a, b| a.path.cmp(&b.path));
        records.sort_by(|a, b| a.path.cmp(&b.path));

        summary.transition(RunState::Promoting)?;
        let promote_start = Instant::now();
        let promoter = DirectoryPromoter::new(destination_dir.to_path_buf(), self.config.max_rename_attempts);
        let baseline = match promoter.promote(&staging, &summary.date) {
            Ok(promoted) => {
                summary.destination_dir = promoted;
                summary.transition(RunState::Logging)?;
                Some(records)
            }
            Err(e) => {
                error!("Promotion failed: {}", e);
                summary.transition(RunState::Failed)?;
                summary.destination_dir = staging.clone();
                summary.append_message(e.to_string());
                summary.append_message(DirectoryPromoter::handle_failure(
                    &staging,
                    self.config.on_promotion_failure,
                ));
                None
            }
        };
        summary.timings.promotion = promote_start.elapsed();

        Ok(RunOutcome { events, baseline })
    }

    fn record_file(&self, file: ScannedFile, counters: &RunCounters) -> Option<FileRecord> {
        match file {
            ScannedFile::Record(record) => {
                counters.record_seen(&record);
                self.report_progress("Recording", &record.path, counters);
                Some(record)
            }
            ScannedFile::Unreadable { path, message } => {
                warn!("Cannot read metadata of {}: {}", path, message);
                counters.record_failure();
                None
            }
        }
    }

    fn compare_file(
        &self,
        file: ScannedFile,
        classifier: &ChangeClassifier,
        copier: &FileCopier,
        counters: &RunCounters,
    ) -> FileOutcome {
        let record = match file {
            ScannedFile::Record(record) => record,
            ScannedFile::Unreadable { path, message } => {
                warn!("Cannot read metadata of {}: {}", path, message);
                counters.record_failure();
                return FileOutcome {
                    record: classifier.carry_forward(&path),
                    event: None,
                };
            }
        };

        counters.record_seen(&record);
        self.report_progress("Comparing", &record.path, counters);
        let state = classifier.classify(&record);
        counters.record_state(state);

        let event = if state.needs_copy() {
            let event = ChangeEvent::from_record(&record, state);
            match copier.copy(&record) {
                Ok(bytes) => {
                    counters.record_copy(bytes);
                    Some(event)
                }
                Err(e) => {
                    warn!("Failed to copy {}: {}", record.path, e);
                    counters.record_failure();
                    Some(event.with_message(e.to_string()))
                }
            }
        } else {
            None
        };

        FileOutcome {
            record: Some(record),
            event,
        }
    }

    /// Write summary, events and baseline in that order
    fn persist(
        &self,
        summary: &mut RunSummary,
        outcome: RunOutcome,
        baseline_store: &mut BaselineStore,
        log_store: &mut RunLogStore,
        started: Instant,
    ) -> Result<()> {
        let logging_start = Instant::now();

        match log_store.insert_summary(summary) {
            Ok(id) => {
                summary.id = Some(id);
                if let Err(e) = log_store.insert_events(id, &outcome.events) {
                    record_persistence_failure(summary, "change events", &e);
                }
            }
            Err(e) => {
                record_persistence_failure(summary, "run summary", &e);
                if !outcome.events.is_empty() {
                    summary.append_message(format!("{} change events not logged", outcome.events.len()));
                }
            }
        }

        match &outcome.baseline {
            Some(records) => {
                if let Err(e) = baseline_store.replace(records, &summary.source_dir) {
                    record_persistence_failure(summary, "baseline", &e);
                }
            }
            None => info!("Keeping previous baseline"),
        }

        if summary.state == RunState::Logging {
            summary.transition(RunState::Completed)?;
        }

        summary.timings.logging = logging_start.elapsed();
        summary.timings.total = started.elapsed();

        if summary.id.is_some() {
            if let Err(e) = log_store.update_summary(summary) {
                record_persistence_failure(summary, "final summary", &e);
            }
        }
        Ok(())
    }

    fn build_pool(&self) -> Result<ThreadPool> {
        rayon::ThreadPoolBuilder::new()
            .num_threads(self.config.parallel_workers)
            .thread_name(|i| format!("deltaback-worker-{}", i))
            .build()
            .map_err(|e| BackupError::internal(format!("failed to build worker pool: {}", e)))
    }

    fn report_progress(&self, operation: &str, path: &str, counters: &RunCounters) {
        if let Some(callback) = &self.progress_callback {
            callback(ProgressInfo {
                operation: operation.to_string(),
                current_item: Some(path.to_string()),
                processed: counters.total_count.load(Ordering::Relaxed),
                bytes_processed: counters.total_size.load(Ordering::Relaxed),
            });
        }
    }
}

fn resolve_dir(path: &Path) -> Option<PathBuf> {
    let canonical = path.canonicalize().ok()?;
    canonical.is_dir().then_some(canonical)
}

/// Mark a run failed after a traversal error and clean up its staging directory
fn abort_scan(
    summary: &mut RunSummary,
    staging: Option<&Path>,
    err: BackupError,
    started: Instant,
) -> BackupError {
    error!("Scan failed: {}", err);
    if let Err(e) = summary.transition(RunState::Failed) {
        warn!("{}", e);
    }
    summary.append_message(err.to_string());
    if let Some(staging) = staging {
        if let Err(e) = fs::remove_dir_all(staging) {
            warn!("Failed to remove staging directory {:?}: {}", staging, e);
        }
    }
    summary.timings.total = started.elapsed();
    log_summary(summary);
    err
}

fn record_persistence_failure(summary: &mut RunSummary, what: &str, err: &BackupError) {
    error!("Failed to persist {}: {}", what, err);
    summary.append_message(format!("failed to persist {}: {}", what, err));
}

fn log_summary(summary: &RunSummary) {
    let id = summary
        .id
        .map(|id| id.to_string())
        .unwrap_or_else(|| "-".to_string());
    info!(
        "Backup {} {}: {} changed (modified {}, added {}, deleted {}), {} copied, {} failed",
        id,
        summary.state,
        summary.changed_count(),
        summary.modified_count,
        summary.added_count,
        summary.deleted_count,
        utils::format_bytes(summary.backup_size),
        summary.failure_count
    );
    info!(
        "Source holds {} files ({})",
        summary.total_count,
        utils::format_bytes(summary.total_size)
    );
    debug!(
        "Timings: total {:?} (scanning {:?}, promotion {:?}, logging {:?})",
        summary.timings.total, summary.timings.scanning, summary.timings.promotion, summary.timings.logging
    );
    if !summary.message.is_empty() {
        info!("Message: {}", summary.message);
    }
}

/// Builder for configuring a [`Backup`]
///
/// # Examples
///
/// ```rust,no_run
/// use deltaback::{BackupBuilder, PromotionFailurePolicy};
///
/// # fn main() -> deltaback::Result<()> {
/// let backup = BackupBuilder::new()
///     .source_dir("./data")
///     .destination_dir("./backups")
///     .parallel_workers(4)
///     .on_promotion_failure(PromotionFailurePolicy::Discard)
///     .build()?;
/// # Ok(())
/// # }
/// ```
pub struct BackupBuilder {
    config: BackupConfig,
    progress_callback: Option<ProgressCallback>,
}

impl BackupBuilder {
    /// Create a new builder with default settings
    pub fn new() -> Self {
        Self {
            config: BackupConfig::default(),
            progress_callback: None,
        }
    }

    /// Start from an existing configuration, such as one loaded from JSON
    pub fn from_config(config: BackupConfig) -> Self {
        Self {
            config,
            progress_callback: None,
        }
    }

    /// Set the directory tree to back up
    pub fn source_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.source_dir = dir.into();
        self
    }

    /// Set the directory receiving dated backups and the state databases
    ///
    /// The directory must already exist when the run starts.
    pub fn destination_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.destination_dir = dir.into();
        self
    }

    /// Set number of worker threads
    ///
    /// # Notes
    ///
    /// - Defaults to the number of CPU cores
    /// - Values less than 1 are automatically set to 1
    pub fn parallel_workers(mut self, count: usize) -> Self {
        self.config.parallel_workers = count.max(1);
        self
    }

    /// Set glob patterns excluded from the scan
    ///
    /// Patterns are matched against paths relative to the source root. A
    /// pattern matching a directory excludes everything below it.
    pub fn exclude_patterns(mut self, patterns: Vec<String>) -> Self {
        self.config.exclude_patterns = patterns;
        self
    }

    /// Set whether to follow symbolic links
    pub fn follow_symlinks(mut self, follow: bool) -> Self {
        self.config.follow_symlinks = follow;
        self
    }

    /// Set the number of suffixed names tried after the plain dated name
    pub fn max_rename_attempts(mut self, attempts: usize) -> Self {
        self.config.max_rename_attempts = attempts;
        self
    }

    /// Set the number of change events written per transaction
    pub fn event_batch_size(mut self, size: usize) -> Self {
        self.config.event_batch_size = size;
        self
    }

    /// Set what happens to staged copies when promotion is exhausted
    pub fn on_promotion_failure(mut self, policy: PromotionFailurePolicy) -> Self {
        self.config.on_promotion_failure = policy;
        self
    }

    /// Set a callback invoked for every scanned file
    ///
    /// The callback runs on worker threads before the file is classified and
    /// must be cheap.
    pub fn progress_callback(mut self, callback: ProgressCallback) -> Self {
        self.progress_callback = Some(callback);
        self
    }

    /// Build the backup engine
    ///
    /// # Errors
    ///
    /// - [`BackupError::InvalidConfiguration`] if a directory is missing from
    ///   the configuration or the source lies inside the destination
    pub fn build(self) -> Result<Backup> {
        let mut backup = Backup::new(self.config)?;
        backup.progress_callback = self.progress_callback;
        Ok(backup)
    }
}

impl Default for BackupBuilder {
    fn default() -> Self {
        Self::new()
    }
}
