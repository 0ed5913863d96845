//! Change classification against the previous baseline
//!
//! [`ChangeClassifier`] holds the loaded baseline in a lock-striped
//! [`DashMap`] for the duration of one run. Every scan task looks up and
//! removes its own path, so concurrent tasks only ever touch disjoint keys.
//! Once every task has finished, whatever is left in the map was not seen in
//! the source tree and is reported as deleted.
//!
//! ```rust
//! use deltaback::classifier::ChangeClassifier;
//! use deltaback::types::{FileRecord, FileState};
//! use chrono::Utc;
//!
//! let now = Utc::now();
//! let classifier = ChangeClassifier::new(vec![
//!     FileRecord::new("a.txt", 100, now),
//!     FileRecord::new("b.txt", 200, now),
//! ]);
//!
//! assert_eq!(classifier.classify(&FileRecord::new("a.txt", 150, now)), FileState::Modified);
//! assert_eq!(classifier.classify(&FileRecord::new("c.txt", 50, now)), FileState::Added);
//!
//! let deleted = classifier.into_deleted();
//! assert_eq!(deleted.len(), 1);
//! assert_eq!(deleted[0].path, "b.txt");
//! ```

use dashmap::DashMap;
use std::path::{Path, PathBuf};

use crate::types::{ChangeEvent, FileRecord, FileState};

/// How a run treats the source tree
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    /// Record every file into a fresh baseline without copying anything
    Initialize,
    /// Diff against the baseline, copying Added and Modified files
    Compare,
}

/// Baseline as loaded from the store
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Baseline {
    /// Source directory the baseline was captured from
    pub source_dir: Option<PathBuf>,
    /// Every file record of the last successful run
    pub records: Vec<FileRecord>,
}

impl Baseline {
    /// Decide the run mode for a source directory
    ///
    /// An empty baseline, or one captured from a different source directory,
    /// cannot be diffed against and triggers initialization mode.
    pub fn mode_for(&self, source_dir: &Path) -> RunMode {
        match &self.source_dir {
            Some(recorded) if !self.records.is_empty() && recorded == source_dir => RunMode::Compare,
            _ => RunMode::Initialize,
        }
    }
}

/// Concurrency-safe lookup-and-remove over the previous baseline
#[derive(Debug, Default)]
pub struct ChangeClassifier {
    baseline: DashMap<String, FileRecord>,
}

impl ChangeClassifier {
    /// Build a classifier from baseline records
    pub fn new(records: Vec<FileRecord>) -> Self {
        let baseline = DashMap::with_capacity(records.len());
        for record in records {
            baseline.insert(record.path.clone(), record);
        }
        Self { baseline }
    }

    /// Classify one scanned record
    ///
    /// Removes the baseline entry for the path, if any, and compares size and
    /// second-granularity modification time. Never returns `Deleted`.
    pub fn classify(&self, current: &FileRecord) -> FileState {
        match self.baseline.remove(&current.path) {
            Some((_, previous)) if previous.matches(current) => FileState::Unchanged,
            Some(_) => FileState::Modified,
            None => FileState::Added,
        }
    }

    /// Take the baseline record of a path that could not be read this run
    ///
    /// The caller keeps the returned record in the new baseline so the file is
    /// neither reported as deleted nor forgotten.
    pub fn carry_forward(&self, path: &str) -> Option<FileRecord> {
        self.baseline.remove(path).map(|(_, record)| record)
    }

    /// Number of baseline entries not yet claimed by a scan task
    pub fn remaining(&self) -> usize {
        self.baseline.len()
    }

    /// Turn every unclaimed entry into a `Deleted` event, sorted by path
    ///
    /// Must only be called after every scan task has finished.
    pub fn into_deleted(self) -> Vec<ChangeEvent> {
        let mut deleted: Vec<ChangeEvent> = self
            .baseline
            .into_iter()
            .map(|(_, record)| ChangeEvent::from_record(&record, FileState::Deleted))
            .collect();
        deleted.sort_by(|a, b| a.path.cmp(&b.path));
        deleted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};
    use rayon::prelude::*;

    fn record(path: &str, size: u64, secs: i64) -> FileRecord {
        FileRecord::new(path, size, Utc.timestamp_opt(secs, 0).unwrap())
    }

    #[test]
    fn test_classify_states() {
        let classifier = ChangeClassifier::new(vec![
            record("same.txt", 10, 1000),
            record("bigger.txt", 10, 1000),
            record("touched.txt", 10, 1000),
            record("gone.txt", 10, 1000),
        ]);

        let mut subsecond = record("same.txt", 10, 1000);
        subsecond.modified = subsecond.modified + Duration::milliseconds(400);

        assert_eq!(classifier.classify(&subsecond), FileState::Unchanged);
        assert_eq!(classifier.classify(&record("bigger.txt", 11, 1000)), FileState::Modified);
        assert_eq!(classifier.classify(&record("touched.txt", 10, 1001)), FileState::Modified);
        assert_eq!(classifier.classify(&record("new.txt", 1, 1000)), FileState::Added);
        assert_eq!(classifier.remaining(), 1);

        let deleted = classifier.into_deleted();
        assert_eq!(deleted, vec![ChangeEvent::from_record(&record("gone.txt", 10, 1000), FileState::Deleted)]);
    }

    #[test]
    fn test_carry_forward_prevents_deletion() {
        let classifier = ChangeClassifier::new(vec![record("locked.db", 5, 1000)]);

        let kept = classifier.carry_forward("locked.db").unwrap();
        assert_eq!(kept.size, 5);
        assert!(classifier.carry_forward("locked.db").is_none());
        assert!(classifier.into_deleted().is_empty());
    }

    #[test]
    fn test_concurrent_classification() {
        let records: Vec<FileRecord> = (0..2000).map(|i| record(&format!("f{}.txt", i), i, 1000)).collect();
        let classifier = ChangeClassifier::new(records.clone());

        // Every even file is unchanged, every odd file grew, the last 100 vanished
        let states: Vec<FileState> = records[..1900]
            .par_iter()
            .map(|r| {
                let mut current = r.clone();
                if r.size % 2 == 1 {
                    current.size += 1;
                }
                classifier.classify(&current)
            })
            .collect();

        assert_eq!(states.iter().filter(|s| **s == FileState::Unchanged).count(), 950);
        assert_eq!(states.iter().filter(|s| **s == FileState::Modified).count(), 950);
        assert_eq!(classifier.into_deleted().len(), 100);
    }

    #[test]
    fn test_mode_decision() {
        let source = PathBuf::from("/data/src");
        assert_eq!(Baseline::default().mode_for(&source), RunMode::Initialize);

        let baseline = Baseline {
            source_dir: Some(source.clone()),
            records: vec![record("a.txt", 1, 1)],
        };
        assert_eq!(baseline.mode_for(&source), RunMode::Compare);
        assert_eq!(baseline.mode_for(Path::new("/data/other")), RunMode::Initialize);

        let empty = Baseline {
            source_dir: Some(source.clone()),
            records: Vec::new(),
        };
        assert_eq!(empty.mode_for(&source), RunMode::Initialize);
    }
}
