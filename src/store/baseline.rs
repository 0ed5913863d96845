//! Baseline persistence
//!
//! The baseline is the `(path, size, mtime)` set captured by the last
//! successful run, stored in `bak_origin` together with the source directory
//! it was taken from. Paths are primary keys, so a duplicate path in a
//! replacement fails the whole transaction instead of merging rows.

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use super::schema::{self, META_CAPTURED_AT, META_SOURCE_DIR};
use crate::classifier::Baseline;
use crate::error::Result;
use crate::types::FileRecord;
use crate::utils;

/// Durable record of the last successful scan
///
/// Only one baseline exists per destination. [`BaselineStore::replace`]
/// swaps it wholesale inside a single transaction, so a crash leaves either
/// the old or the new baseline and never a mixture.
pub struct BaselineStore {
    connection: Connection,
}

impl BaselineStore {
    /// Open or create the baseline database
    pub fn open(path: &Path) -> Result<Self> {
        let connection = super::open_connection(path)?;
        schema::apply_origin_schema(&connection)?;
        Ok(Self { connection })
    }

    /// Load every record together with the recorded source directory
    pub fn load(&self) -> Result<Baseline> {
        let source_dir = self.source_dir()?;
        let mut stmt = self
            .connection
            .prepare("SELECT path, size, mtime_ns FROM bak_origin ORDER BY path ASC")?;
        let records = stmt
            .query_map([], |row| {
                Ok(FileRecord::new(
                    row.get::<_, String>(0)?,
                    row.get::<_, i64>(1)? as u64,
                    utils::from_nanos(row.get(2)?),
                ))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        debug!("Loaded baseline with {} records", records.len());
        Ok(Baseline { source_dir, records })
    }

    /// Replace the stored baseline with `records` captured from `source_dir`
    pub fn replace(&mut self, records: &[FileRecord], source_dir: &Path) -> Result<()> {
        let tx = self.connection.transaction()?;
        tx.execute("DELETE FROM bak_origin", [])?;
        {
            let mut insert = tx.prepare_cached(
                "INSERT INTO bak_origin (path, size, mtime_ns) VALUES (?1, ?2, ?3)",
            )?;
            for record in records {
                insert.execute(params![
                    record.path,
                    record.size as i64,
                    utils::to_nanos(&record.modified)
                ])?;
            }
            let mut meta = tx.prepare_cached(
                "INSERT INTO bak_meta (key, value) VALUES (?1, ?2)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            )?;
            meta.execute(params![META_SOURCE_DIR, source_dir.to_string_lossy().into_owned()])?;
            meta.execute(params![META_CAPTURED_AT, Utc::now().to_rfc3339()])?;
        }
        tx.commit()?;
        info!("Baseline replaced with {} records", records.len());
        Ok(())
    }

    /// Number of stored records
    pub fn len(&self) -> Result<usize> {
        let count: i64 = self
            .connection
            .query_row("SELECT COUNT(*) FROM bak_origin", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    /// Whether no records are stored
    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Source directory the stored baseline was captured from
    pub fn source_dir(&self) -> Result<Option<PathBuf>> {
        Ok(self.get_meta(META_SOURCE_DIR)?.map(PathBuf::from))
    }

    fn get_meta(&self, key: &str) -> Result<Option<String>> {
        let value = self
            .connection
            .query_row("SELECT value FROM bak_meta WHERE key = ?1", params![key], |row| {
                row.get(0)
            })
            .optional()?;
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::TempDir;

    #[test]
    fn test_empty_store_loads_empty_baseline() {
        let temp_dir = TempDir::new().unwrap();
        let store = BaselineStore::open(&temp_dir.path().join("origin.db")).unwrap();

        let baseline = store.load().unwrap();
        assert!(baseline.records.is_empty());
        assert!(baseline.source_dir.is_none());
        assert!(store.is_empty().unwrap());
    }

    #[test]
    fn test_replace_round_trips_exactly() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("origin.db");
        let modified = Utc.timestamp_opt(1_700_000_000, 123_456_789).unwrap();
        let records = vec![
            FileRecord::new("b/nested.txt", 42, modified),
            FileRecord::new("a.txt", 0, modified),
        ];

        {
            let mut store = BaselineStore::open(&db_path).unwrap();
            store.replace(&records, Path::new("/data/src")).unwrap();
        }

        let store = BaselineStore::open(&db_path).unwrap();
        let baseline = store.load().unwrap();
        assert_eq!(baseline.source_dir, Some(PathBuf::from("/data/src")));
        assert_eq!(baseline.records.len(), 2);
        assert_eq!(baseline.records[0], records[1]);
        assert_eq!(baseline.records[1], records[0]);
        assert_eq!(store.len().unwrap(), 2);
    }

    #[test]
    fn test_replace_drops_old_records() {
        let temp_dir = TempDir::new().unwrap();
        let mut store = BaselineStore::open(&temp_dir.path().join("origin.db")).unwrap();
        let now = Utc::now();

        store
            .replace(&[FileRecord::new("old.txt", 1, now)], Path::new("/one"))
            .unwrap();
        store
            .replace(&[FileRecord::new("new.txt", 2, now)], Path::new("/two"))
            .unwrap();

        let baseline = store.load().unwrap();
        assert_eq!(baseline.records.len(), 1);
        assert_eq!(baseline.records[0].path, "new.txt");
        assert_eq!(baseline.source_dir, Some(PathBuf::from("/two")));
    }

    #[test]
    fn test_duplicate_paths_are_rejected() {
        let temp_dir = TempDir::new().unwrap();
        let mut store = BaselineStore::open(&temp_dir.path().join("origin.db")).unwrap();
        let now = Utc::now();

        store
            .replace(&[FileRecord::new("kept.txt", 1, now)], Path::new("/src"))
            .unwrap();
        let duplicates = [FileRecord::new("same.txt", 1, now), FileRecord::new("same.txt", 2, now)];
        assert!(store.replace(&duplicates, Path::new("/src")).is_err());

        let baseline = store.load().unwrap();
        assert_eq!(baseline.records.len(), 1);
        assert_eq!(baseline.records[0].path, "kept.txt");
    }
}
