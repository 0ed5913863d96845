//! Run configuration
//!
//! [`BackupConfig`] holds everything a run needs to know. It is usually built
//! through [`crate::BackupBuilder`], but can also be persisted and loaded as
//! JSON so scheduled runs share one file.
//!
//! ```json
//! {
//!   "source_dir": "/home/data",
//!   "destination_dir": "/backup",
//!   "parallel_workers": 8,
//!   "exclude_patterns": ["**/*.tmp", "cache/**"],
//!   "on_promotion_failure": "preserve"
//! }
//! ```

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{BackupError, Result};

/// Default number of rename attempts after the initial one
pub const DEFAULT_MAX_RENAME_ATTEMPTS: usize = 10;
/// Default number of event rows per insert transaction
pub const DEFAULT_EVENT_BATCH_SIZE: usize = 500;
/// Default baseline database file name
pub const DEFAULT_ORIGIN_DB: &str = "backup_origin.db";
/// Default run log database file name
pub const DEFAULT_LOG_DB: &str = "backup_log.db";

/// What to do with the staging directory when it cannot be promoted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PromotionFailurePolicy {
    /// Keep the staged copies and report their location
    #[default]
    Preserve,
    /// Delete the staged copies
    Discard,
}

/// Configuration for one backup run
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackupConfig {
    /// Directory tree to back up
    pub source_dir: PathBuf,
    /// Directory receiving dated backups and the state databases
    pub destination_dir: PathBuf,
    /// Worker threads for scan, classify and copy
    pub parallel_workers: usize,
    /// Suffixed rename attempts after the plain dated name
    pub max_rename_attempts: usize,
    /// Event rows per insert transaction
    pub event_batch_size: usize,
    /// Glob patterns, relative to the source root, excluded from the scan
    pub exclude_patterns: Vec<String>,
    /// Whether to follow symbolic links during traversal
    pub follow_symlinks: bool,
    /// Handling of staged copies when promotion is exhausted
    pub on_promotion_failure: PromotionFailurePolicy,
    /// Baseline database file name inside the destination
    pub origin_db_name: String,
    /// Run log database file name inside the destination
    pub log_db_name: String,
}

impl Default for BackupConfig {
    fn default() -> Self {
        Self {
            source_dir: PathBuf::new(),
            destination_dir: PathBuf::new(),
            parallel_workers: num_cpus::get(),
            max_rename_attempts: DEFAULT_MAX_RENAME_ATTEMPTS,
            event_batch_size: DEFAULT_EVENT_BATCH_SIZE,
            exclude_patterns: Vec::new(),
            follow_symlinks: false,
            on_promotion_failure: PromotionFailurePolicy::default(),
            origin_db_name: DEFAULT_ORIGIN_DB.to_string(),
            log_db_name: DEFAULT_LOG_DB.to_string(),
        }
    }
}

impl BackupConfig {
    /// Create a configuration with defaults for the given directories
    pub fn new(source_dir: impl Into<PathBuf>, destination_dir: impl Into<PathBuf>) -> Self {
        Self {
            source_dir: source_dir.into(),
            destination_dir: destination_dir.into(),
            ..Default::default()
        }
    }

    /// Load a configuration from a JSON file
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let json = fs::read_to_string(path)?;
        let config: BackupConfig = serde_json::from_str(&json)?;
        Ok(config)
    }

    /// Write the configuration as pretty JSON
    pub fn save_json_file(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        Ok(())
    }

    /// Path of the baseline database
    pub fn origin_db_path(&self) -> PathBuf {
        self.destination_dir.join(&self.origin_db_name)
    }

    /// Path of the run log database
    pub fn log_db_path(&self) -> PathBuf {
        self.destination_dir.join(&self.log_db_name)
    }

    /// Check the configuration and clamp numeric settings
    ///
    /// Both directories must be set and must differ. The source must not lie
    /// inside the destination, otherwise every backup would be scanned again.
    pub fn validate(&mut self) -> Result<()> {
        if self.source_dir.as_os_str().is_empty() {
            return Err(BackupError::InvalidConfiguration("source directory is not set".into()));
        }
        if self.destination_dir.as_os_str().is_empty() {
            return Err(BackupError::InvalidConfiguration(
                "destination directory is not set".into(),
            ));
        }
        if self.origin_db_name.is_empty() || self.log_db_name.is_empty() {
            return Err(BackupError::InvalidConfiguration("database file names must not be empty".into()));
        }
        if self.origin_db_name == self.log_db_name {
            return Err(BackupError::InvalidConfiguration(
                "baseline and run log databases must be different files".into(),
            ));
        }
        if crate::utils::is_within(&self.source_dir, &self.destination_dir) {
            return Err(BackupError::InvalidConfiguration(format!(
                "source {:?} lies inside destination {:?}",
                self.source_dir, self.destination_dir
            )));
        }

        self.parallel_workers = self.parallel_workers.max(1);
        self.event_batch_size = self.event_batch_size.max(1);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = BackupConfig::new("/src", "/dst");
        assert_eq!(config.max_rename_attempts, 10);
        assert_eq!(config.event_batch_size, 500);
        assert_eq!(config.on_promotion_failure, PromotionFailurePolicy::Preserve);
        assert_eq!(config.origin_db_path(), PathBuf::from("/dst/backup_origin.db"));
        assert!(config.parallel_workers >= 1);
    }

    #[test]
    fn test_validate_rejects_nested_source() {
        let temp_dir = TempDir::new().unwrap();
        let nested = temp_dir.path().join("inside");
        std::fs::create_dir(&nested).unwrap();

        let mut config = BackupConfig::new(&nested, temp_dir.path());
        assert!(matches!(config.validate(), Err(BackupError::InvalidConfiguration(_))));

        let mut config = BackupConfig::new(temp_dir.path(), &nested);
        config.parallel_workers = 0;
        config.event_batch_size = 0;
        config.validate().unwrap();
        assert_eq!(config.parallel_workers, 1);
        assert_eq!(config.event_batch_size, 1);
    }

    #[test]
    fn test_json_round_trip() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("backup.json");

        let mut config = BackupConfig::new("/src", "/dst");
        config.exclude_patterns = vec!["*.tmp".to_string()];
        config.on_promotion_failure = PromotionFailurePolicy::Discard;
        config.save_json_file(&path).unwrap();

        let loaded = BackupConfig::from_json_file(&path).unwrap();
        assert_eq!(loaded.exclude_patterns, config.exclude_patterns);
        assert_eq!(loaded.on_promotion_failure, PromotionFailurePolicy::Discard);

        std::fs::write(&path, r#"{"source_dir": "/a", "destination_dir": "/b"}"#).unwrap();
        let partial = BackupConfig::from_json_file(&path).unwrap();
        assert_eq!(partial.event_batch_size, DEFAULT_EVENT_BATCH_SIZE);
    }
}
