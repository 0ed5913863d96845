//! Promotion of the staging directory to its dated name
//!
//! A run's copies are written into a staging directory inside the destination
//! root. Promotion renames it to `YYYYMMDD`, or `YYYYMMDD_1`, `YYYYMMDD_2`, ...
//! when the name is taken. Existing directories are never overwritten.

use chrono::{DateTime, Local};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::config::PromotionFailurePolicy;
use crate::error::{BackupError, Result};

/// Renames a staging directory into the destination root
#[derive(Debug, Clone)]
pub struct DirectoryPromoter {
    destination_root: PathBuf,
    max_attempts: usize,
}

impl DirectoryPromoter {
    /// Create a promoter allowing `max_attempts` suffixed names after the plain one
    pub fn new(destination_root: PathBuf, max_attempts: usize) -> Self {
        Self {
            destination_root,
            max_attempts,
        }
    }

    /// Directory name for a run date
    pub fn dated_name(date: &DateTime<Local>) -> String {
        date.format("%Y%m%d").to_string()
    }

    /// Candidate paths in the order they are tried
    pub fn candidates(&self, date: &DateTime<Local>) -> Vec<PathBuf> {
        let base = Self::dated_name(date);
        std::iter::once(base.clone())
            .chain((1..=self.max_attempts).map(|i| format!("{}_{}", base, i)))
            .map(|name| self.destination_root.join(name))
            .collect()
    }

    /// Rename `staging` to the first free candidate
    ///
    /// # Errors
    ///
    /// - [`BackupError::PromotionExhausted`] if every candidate is taken or
    ///   every rename fails. The staging directory is left untouched.
    pub fn promote(&self, staging: &Path, date: &DateTime<Local>) -> Result<PathBuf> {
        let candidates = self.candidates(date);
        let attempts = candidates.len();
        let mut last_error = String::from("no candidate names");

        for candidate in candidates {
            if candidate.symlink_metadata().is_ok() {
                debug!("Promotion target {:?} already exists", candidate);
                last_error = format!("{:?} already exists", candidate);
                continue;
            }
            match fs::rename(staging, &candidate) {
                Ok(()) => {
                    info!("Promoted {:?} to {:?}", staging, candidate);
                    return Ok(candidate);
                }
                Err(e) => {
                    warn!("Rename {:?} -> {:?} failed: {}", staging, candidate, e);
                    last_error = e.to_string();
                }
            }
        }

        Err(BackupError::PromotionExhausted {
            staging: staging.to_path_buf(),
            attempts,
            last_error,
        })
    }

    /// Apply the failure policy to an unpromoted staging directory
    ///
    /// Returns a note for the run summary describing where the staged copies
    /// ended up.
    pub fn handle_failure(staging: &Path, policy: PromotionFailurePolicy) -> String {
        match policy {
            PromotionFailurePolicy::Preserve => {
                format!("staged copies preserved at {}", staging.display())
            }
            PromotionFailurePolicy::Discard => match fs::remove_dir_all(staging) {
                Ok(()) => format!("staged copies at {} discarded", staging.display()),
                Err(e) => {
                    warn!("Failed to discard staging directory {:?}: {}", staging, e);
                    format!("discarding {} failed: {}", staging.display(), e)
                }
            },
        }
    }
}
