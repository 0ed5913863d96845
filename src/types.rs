//! Core data types used throughout deltaback
//!
//! This module contains the data structures that flow between the scanner,
//! classifier, copier, promoter and the persistence stores.
//!
//! ## Overview
//!
//! - **File state**: `FileRecord` - the observed or persisted identity of one file
//! - **Changes**: `FileState`, `ChangeEvent` - the classification of a file in a run
//! - **Runs**: `RunState`, `RunSummary`, `PhaseTimings` - one backup execution
//! - **Progress**: `ProgressInfo`, `ProgressCallback` - optional reporting hooks
//!
//! ## Examples
//!
//! ```rust
//! use deltaback::types::FileRecord;
//! use chrono::{TimeZone, Utc};
//!
//! let a = FileRecord::new("docs/a.txt", 100, Utc.timestamp_opt(1_700_000_000, 250).unwrap());
//! let b = FileRecord::new("docs/a.txt", 100, Utc.timestamp_opt(1_700_000_000, 900_000).unwrap());
//!
//! // Sub-second differences are ignored for change detection
//! assert!(a.matches(&b));
//! ```

use chrono::{DateTime, Local, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use crate::error::{BackupError, Result};

/// Identity of one file: relative path, size and modification time
///
/// Paths are relative to the source root and always use `/` as separator so
/// baselines stay comparable across platforms.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct FileRecord {
    /// Path relative to the source root, `/`-separated
    pub path: String,
    /// File size in bytes
    pub size: u64,
    /// Last modified timestamp, full precision
    pub modified: DateTime<Utc>,
}

impl FileRecord {
    /// Create a new record
    pub fn new(path: impl Into<String>, size: u64, modified: DateTime<Utc>) -> Self {
        Self {
            path: path.into(),
            size,
            modified,
        }
    }

    /// Compare size and second-granularity modification time
    ///
    /// Returns `true` when the two records describe the same file content for
    /// backup purposes. Sub-second precision is intentionally ignored.
    pub fn matches(&self, other: &FileRecord) -> bool {
        self.size == other.size && self.modified.timestamp() == other.modified.timestamp()
    }
}

/// Classification of a scanned or remembered file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FileState {
    /// Present in both baseline and scan with matching size and mtime
    Unchanged,
    /// Present in the scan but not in the baseline
    Added,
    /// Present in both but size or mtime differ
    Modified,
    /// Present in the baseline but not in the scan
    Deleted,
}

impl FileState {
    /// Name used in the run log
    pub fn as_str(&self) -> &'static str {
        match self {
            FileState::Unchanged => "unchanged",
            FileState::Added => "added",
            FileState::Modified => "modified",
            FileState::Deleted => "deleted",
        }
    }

    /// Whether this state produces a change event
    pub fn is_change(&self) -> bool {
        !matches!(self, FileState::Unchanged)
    }

    /// Whether files in this state get copied into the staging directory
    pub fn needs_copy(&self) -> bool {
        matches!(self, FileState::Added | FileState::Modified)
    }
}

impl fmt::Display for FileState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FileState {
    type Err = BackupError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "unchanged" => Ok(FileState::Unchanged),
            "added" => Ok(FileState::Added),
            "modified" => Ok(FileState::Modified),
            "deleted" => Ok(FileState::Deleted),
            other => Err(BackupError::internal(format!("unknown file state '{}'", other))),
        }
    }
}

/// A single Added, Modified or Deleted file observed during a run
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChangeEvent {
    /// Path relative to the source root
    pub path: String,
    /// Size in bytes (current size, or last known size for deletions)
    pub size: u64,
    /// Modification time (current, or last known for deletions)
    pub modified: DateTime<Utc>,
    /// Classification
    pub state: FileState,
    /// Error text when copying the file failed
    pub message: Option<String>,
}

impl ChangeEvent {
    /// Create an event for a record in the given state
    pub fn from_record(record: &FileRecord, state: FileState) -> Self {
        Self {
            path: record.path.clone(),
            size: record.size,
            modified: record.modified,
            state,
            message: None,
        }
    }

    /// Attach an error message
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

/// State machine of one backup run
///
/// ```text
/// Created ──► Initializing                      (bulk-init path, terminal)
///    │
///    └──────► Comparing ──► Promoting ──► Logging ──► Completed
///                 │             │
///                 └─────────────┴──────────────────► Failed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RunState {
    /// Run object exists, baseline not yet inspected
    Created,
    /// No usable baseline: recording the tree without copying
    Initializing,
    /// Scanning, classifying and copying against the baseline
    Comparing,
    /// Renaming the staging directory to its dated name
    Promoting,
    /// Writing summary, events and the new baseline
    Logging,
    /// Run finished normally
    Completed,
    /// Scan failed or promotion was exhausted
    Failed,
}

impl RunState {
    /// Name used in the run log
    pub fn as_str(&self) -> &'static str {
        match self {
            RunState::Created => "Created",
            RunState::Initializing => "Initializing",
            RunState::Comparing => "Comparing",
            RunState::Promoting => "Promoting",
            RunState::Logging => "Logging",
            RunState::Completed => "Completed",
            RunState::Failed => "Failed",
        }
    }

    /// Check whether `next` is a legal successor of this state
    pub fn can_transition_to(&self, next: RunState) -> bool {
        use RunState::*;
        matches!(
            (self, next),
            (Created, Initializing)
                | (Created, Comparing)
                | (Created, Failed)
                | (Initializing, Failed)
                | (Comparing, Promoting)
                | (Comparing, Failed)
                | (Promoting, Logging)
                | (Promoting, Failed)
                | (Logging, Completed)
        )
    }

    /// Whether the run has reached a state it will not leave
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunState::Initializing | RunState::Completed | RunState::Failed)
    }

    /// Whether the run counts as successful for exit status purposes
    pub fn is_success(&self) -> bool {
        matches!(self, RunState::Initializing | RunState::Completed)
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RunState {
    type Err = BackupError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "Created" => Ok(RunState::Created),
            "Initializing" => Ok(RunState::Initializing),
            "Comparing" => Ok(RunState::Comparing),
            "Promoting" => Ok(RunState::Promoting),
            "Logging" => Ok(RunState::Logging),
            "Completed" => Ok(RunState::Completed),
            "Failed" => Ok(RunState::Failed),
            other => Err(BackupError::internal(format!("unknown run state '{}'", other))),
        }
    }
}

/// Wall-clock time spent in each phase of a run
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PhaseTimings {
    /// Scan, classify and copy
    pub scanning: Duration,
    /// Staging directory rename
    pub promotion: Duration,
    /// Summary, event and baseline persistence
    pub logging: Duration,
    /// Whole run
    pub total: Duration,
}

/// Metadata and counters of one run
///
/// Created at run start, mutated throughout, persisted at the end. The `id`
/// is assigned by the run log store on insert.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    /// Store-assigned identifier
    pub id: Option<i64>,
    /// Run start time
    pub date: DateTime<Local>,
    /// Source directory
    pub source_dir: PathBuf,
    /// Promoted directory (or the staging path when promotion failed)
    pub destination_dir: PathBuf,
    /// Current run state
    pub state: RunState,
    /// Number of files seen in the source tree
    pub total_count: u64,
    /// Total bytes of files seen in the source tree
    pub total_size: u64,
    /// Files classified Added
    pub added_count: u64,
    /// Files classified Modified
    pub modified_count: u64,
    /// Files classified Deleted
    pub deleted_count: u64,
    /// Files classified Unchanged
    pub unchanged_count: u64,
    /// Successful copies
    pub success_count: u64,
    /// Failed copies and unreadable files
    pub failure_count: u64,
    /// Bytes copied into the staging directory
    pub backup_size: u64,
    /// Accumulated messages (errors, notes)
    pub message: String,
    /// Phase timing breakdown
    pub timings: PhaseTimings,
}

impl RunSummary {
    /// Create a fresh summary in the `Created` state
    pub fn new(date: DateTime<Local>, source_dir: PathBuf) -> Self {
        Self {
            id: None,
            date,
            source_dir,
            destination_dir: PathBuf::new(),
            state: RunState::Created,
            total_count: 0,
            total_size: 0,
            added_count: 0,
            modified_count: 0,
            deleted_count: 0,
            unchanged_count: 0,
            success_count: 0,
            failure_count: 0,
            backup_size: 0,
            message: String::new(),
            timings: PhaseTimings::default(),
        }
    }

    /// Move to the next state, rejecting illegal transitions
    pub fn transition(&mut self, next: RunState) -> Result<()> {
        if !self.state.can_transition_to(next) {
            return Err(BackupError::InvalidStateTransition {
                from: self.state,
                to: next,
            });
        }
        self.state = next;
        Ok(())
    }

    /// Append a message, separating entries with `; `
    pub fn append_message(&mut self, msg: impl AsRef<str>) {
        if !self.message.is_empty() {
            self.message.push_str("; ");
        }
        self.message.push_str(msg.as_ref());
    }

    /// Number of change events the run produced
    pub fn changed_count(&self) -> u64 {
        self.added_count + self.modified_count + self.deleted_count
    }
}

/// Progress callback for long-running operations
pub type ProgressCallback = Arc<dyn Fn(ProgressInfo) + Send + Sync>;

/// Information passed to progress callbacks
#[derive(Debug, Clone)]
pub struct ProgressInfo {
    /// Operation being performed
    pub operation: String,
    /// Current item being processed
    pub current_item: Option<String>,
    /// Items processed so far
    pub processed: u64,
    /// Bytes processed so far
    pub bytes_processed: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_record_matches_ignores_subsecond() {
        let base = Utc.timestamp_opt(1_600_000_000, 0).unwrap();
        let a = FileRecord::new("a.txt", 100, base);
        let b = FileRecord::new("a.txt", 100, base + chrono::Duration::milliseconds(999));
        let c = FileRecord::new("a.txt", 100, base + chrono::Duration::seconds(1));
        let d = FileRecord::new("a.txt", 101, base);

        assert!(a.matches(&b));
        assert!(!a.matches(&c));
        assert!(!a.matches(&d));
    }

    #[test]
    fn test_state_parsing() {
        for state in [FileState::Added, FileState::Modified, FileState::Deleted] {
            assert_eq!(state.as_str().parse::<FileState>().unwrap(), state);
        }
        assert!("renamed".parse::<FileState>().is_err());
        assert_eq!("Failed".parse::<RunState>().unwrap(), RunState::Failed);
    }

    #[test]
    fn test_run_state_transitions() {
        let mut summary = RunSummary::new(Local::now(), PathBuf::from("/src"));
        summary.transition(RunState::Comparing).unwrap();
        summary.transition(RunState::Promoting).unwrap();
        assert!(summary.transition(RunState::Completed).is_err());
        summary.transition(RunState::Logging).unwrap();
        summary.transition(RunState::Completed).unwrap();
        assert!(summary.state.is_terminal());
        assert!(summary.transition(RunState::Failed).is_err());
    }

    #[test]
    fn test_initializing_is_terminal_success() {
        assert!(RunState::Initializing.is_terminal());
        assert!(RunState::Initializing.is_success());
        assert!(!RunState::Failed.is_success());
        assert!(!RunState::Initializing.can_transition_to(RunState::Comparing));
    }

    #[test]
    fn test_append_message() {
        let mut summary = RunSummary::new(Local::now(), PathBuf::from("/src"));
        summary.append_message("first");
        summary.append_message("second");
        assert_eq!(summary.message, "first; second");
    }
}
