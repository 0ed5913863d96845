//! Copying changed files into the staging directory
//!
//! The staging directory mirrors the source tree: a file at `a/b/c.txt` under
//! the source root lands at `a/b/c.txt` under the staging root. After a
//! successful copy the destination's access and modification times are set to
//! the source's modification time so later comparisons stay meaningful.

use filetime::FileTime;
use std::fs;
use std::path::PathBuf;
use std::time::SystemTime;
use tracing::trace;

use crate::error::{BackupError, Result};
use crate::types::FileRecord;
use crate::utils;

/// Copies file content from the source root into a staging root
#[derive(Debug, Clone)]
pub struct FileCopier {
    source_root: PathBuf,
    staging_root: PathBuf,
}

impl FileCopier {
    /// Create a copier between two roots
    pub fn new(source_root: PathBuf, staging_root: PathBuf) -> Self {
        Self {
            source_root,
            staging_root,
        }
    }

    /// Copy one file, returning the number of bytes written
    ///
    /// Intermediate directories are created as needed.
    ///
    /// # Errors
    ///
    /// - [`BackupError::FileCopy`] if creating directories, copying or setting
    ///   timestamps fails. The error is meant to be recorded against the file,
    ///   not propagated out of the run.
    pub fn copy(&self, record: &FileRecord) -> Result<u64> {
        let source = utils::from_slash(&self.source_root, &record.path);
        let target = utils::from_slash(&self.staging_root, &record.path);
        let copy_error = |source_err: std::io::Error| BackupError::FileCopy {
            path: source.clone(),
            source: source_err,
        };

        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).map_err(copy_error)?;
        }

        let bytes = fs::copy(&source, &target).map_err(copy_error)?;

        let mtime = FileTime::from_system_time(SystemTime::from(record.modified));
        filetime::set_file_times(&target, mtime, mtime).map_err(copy_error)?;

        trace!("Copied {} ({} bytes)", record.path, bytes);
        Ok(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use tempfile::TempDir;

    #[test]
    fn test_copy_preserves_path_and_mtime() {
        let source = TempDir::new().unwrap();
        let staging = TempDir::new().unwrap();

        fs::create_dir_all(source.path().join("nested/dir")).unwrap();
        fs::write(source.path().join("nested/dir/file.txt"), "hello world").unwrap();

        let modified = Utc.timestamp_opt(1_500_000_000, 0).unwrap();
        let record = FileRecord::new("nested/dir/file.txt", 11, modified);

        let copier = FileCopier::new(source.path().to_path_buf(), staging.path().to_path_buf());
        let bytes = copier.copy(&record).unwrap();
        assert_eq!(bytes, 11);

        let copied = staging.path().join("nested/dir/file.txt");
        assert_eq!(fs::read_to_string(&copied).unwrap(), "hello world");

        let copied_mtime = fs::metadata(&copied).unwrap().modified().unwrap();
        assert_eq!(utils::system_time_to_utc(copied_mtime).timestamp(), 1_500_000_000);
    }

    #[test]
    fn test_copy_missing_source_is_per_file_error() {
        let source = TempDir::new().unwrap();
        let staging = TempDir::new().unwrap();
        let copier = FileCopier::new(source.path().to_path_buf(), staging.path().to_path_buf());

        let record = FileRecord::new("vanished.txt", 3, Utc::now());
        let err = copier.copy(&record).unwrap_err();

        assert!(matches!(err, BackupError::FileCopy { .. }));
        assert!(!err.is_fatal());
    }
}
