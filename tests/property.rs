//! Property-based testing for deltaback
//!
//! Uses proptest to check the classification invariants against randomly
//! generated baselines and randomly mutated source trees.

use ::deltaback::*;
use chrono::{TimeZone, Utc};
use proptest::prelude::*;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// Strategy for generating file operations
#[derive(Debug, Clone)]
enum FileOperation {
    Create { path: PathBuf, content: Vec<u8> },
    Modify { path: PathBuf, content: Vec<u8> },
    Delete { path: PathBuf },
}

fn file_operation_strategy() -> impl Strategy<Value = FileOperation> {
    prop_oneof![
        (path_strategy(), content_strategy())
            .prop_map(|(path, content)| FileOperation::Create { path, content }),
        (path_strategy(), content_strategy())
            .prop_map(|(path, content)| FileOperation::Modify { path, content }),
        path_strategy().prop_map(|path| FileOperation::Delete { path }),
    ]
}

/// Directory names never contain a dot and file names always do, so a file
/// and a directory can never claim the same path
fn path_strategy() -> impl Strategy<Value = PathBuf> {
    let dirs = prop::collection::vec("[a-z]{1,4}", 0..=2);
    let file = "[a-z]{1,3}\\.(txt|md)";
    (dirs, file).prop_map(|(dirs, file)| {
        let mut path = PathBuf::new();
        for dir in dirs {
            path.push(dir);
        }
        path.join(file)
    })
}

fn content_strategy() -> impl Strategy<Value = Vec<u8>> {
    prop_oneof![
        "[a-zA-Z0-9 \n]{0,200}".prop_map(|s| s.into_bytes()),
        (any::<u8>(), 1..500usize).prop_map(|(byte, count)| vec![byte; count]),
    ]
}

fn apply_operation(root: &Path, op: &FileOperation) -> anyhow::Result<()> {
    match op {
        FileOperation::Create { path, content } => {
            let full_path = root.join(path);
            if let Some(parent) = full_path.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::write(full_path, content)?;
        }
        FileOperation::Modify { path, content } => {
            let full_path = root.join(path);
            if full_path.exists() {
                fs::write(full_path, content)?;
            }
        }
        FileOperation::Delete { path } => {
            let full_path = root.join(path);
            if full_path.exists() {
                fs::remove_file(full_path)?;
            }
        }
    }
    Ok(())
}

fn baseline_paths(dest: &Path) -> BTreeSet<String> {
    BaselineStore::open(&dest.join(config::DEFAULT_ORIGIN_DB))
        .unwrap()
        .load()
        .unwrap()
        .records
        .into_iter()
        .map(|r| r.path)
        .collect()
}

/// Baseline entries as (size, seconds) keyed by path
fn record_map_strategy() -> impl Strategy<Value = BTreeMap<String, (u64, i64)>> {
    prop::collection::btree_map("[a-f]{1,3}", (0..4u64, 0..3i64), 0..40)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    /// Every scanned file gets exactly one state and the leftovers are exactly
    /// the vanished paths
    #[test]
    fn classification_partitions_paths(
        previous in record_map_strategy(),
        current in record_map_strategy(),
    ) {
        let to_record = |(path, (size, secs)): (&String, &(u64, i64))| {
            FileRecord::new(path.clone(), *size, Utc.timestamp_opt(1_000 + *secs, 0).unwrap())
        };
        let classifier = ChangeClassifier::new(previous.iter().map(to_record).collect());

        let mut counts = HashMap::new();
        for record in current.iter().map(to_record) {
            let state = classifier.classify(&record);
            let expected = match previous.get(&record.path) {
                None => FileState::Added,
                Some(&(size, secs)) if size == record.size && 1_000 + secs == record.modified.timestamp() => {
                    FileState::Unchanged
                }
                Some(_) => FileState::Modified,
            };
            prop_assert_eq!(state, expected);
            *counts.entry(state).or_insert(0usize) += 1;
        }

        let deleted: BTreeSet<String> = classifier.into_deleted().into_iter().map(|e| e.path).collect();
        let expected_deleted: BTreeSet<String> = previous
            .keys()
            .filter(|path| !current.contains_key(*path))
            .cloned()
            .collect();
        prop_assert_eq!(deleted, expected_deleted);
        prop_assert_eq!(counts.values().sum::<usize>(), current.len());
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    /// A comparing run's baseline holds exactly the scanned files, deletions
    /// are the vanished paths, and an immediate rerun reports no changes
    #[test]
    fn run_counts_match_tree(
        initial in prop::collection::vec(file_operation_strategy(), 1..20),
        changes in prop::collection::vec(file_operation_strategy(), 1..20),
    ) {
        let source = TempDir::new().unwrap();
        let dest = TempDir::new().unwrap();
        for op in &initial {
            apply_operation(source.path(), op).unwrap();
        }

        let backup = BackupBuilder::new()
            .source_dir(source.path())
            .destination_dir(dest.path())
            .parallel_workers(3)
            .build()
            .unwrap();
        backup.run().unwrap();
        let before = baseline_paths(dest.path());

        for op in &changes {
            apply_operation(source.path(), op).unwrap();
        }
        let summary = backup.run().unwrap();
        let after = baseline_paths(dest.path());

        if before.is_empty() {
            // An empty baseline triggers another initialization
            prop_assert_eq!(summary.state, RunState::Initializing);
        } else {
            prop_assert_eq!(summary.state, RunState::Completed);
            prop_assert_eq!(
                after.len() as u64,
                summary.added_count + summary.modified_count + summary.unchanged_count
            );
            prop_assert_eq!(summary.deleted_count as usize, before.difference(&after).count());
            prop_assert_eq!(summary.added_count as usize, after.difference(&before).count());
            prop_assert_eq!(summary.success_count, summary.added_count + summary.modified_count);
        }
        prop_assert_eq!(after.len() as u64, summary.total_count);

        let rerun = backup.run().unwrap();
        if !after.is_empty() {
            prop_assert_eq!(rerun.state, RunState::Completed);
            prop_assert_eq!(rerun.changed_count(), 0);
        }
    }
}
