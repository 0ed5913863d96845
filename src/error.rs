//! Error types for deltaback
//!
//! This module defines all error types that can occur during a backup run.
//! Errors fall into a small number of categories that decide how a run reacts:
//!
//! - **Scan errors** are fatal and abort the run before anything is copied or
//!   persisted.
//! - **Per-file errors** are recorded against the file (event message plus the
//!   failure counter) and never leave the worker that produced them.
//! - **Promotion errors** are retried a bounded number of times; exhaustion
//!   marks the run as failed.
//! - **Persistence errors** are logged and appended to the run summary; the
//!   remaining persistence steps still execute.

use std::path::PathBuf;
use thiserror::Error;

use crate::types::RunState;

/// Type alias for Results in the deltaback library
pub type Result<T> = std::result::Result<T, BackupError>;

/// Main error type for all deltaback operations
#[derive(Debug, Error)]
pub enum BackupError {
    /// I/O errors during file operations
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Errors during JSON serialization/deserialization
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// SQLite errors from the baseline or run log stores
    #[error("Database error: {0}")]
    Sql(#[from] rusqlite::Error),

    /// Top-level traversal failure; aborts the run
    #[error("Scan of {path:?} failed: {source}")]
    Scan {
        /// Path the walker was visiting
        path: PathBuf,
        /// Underlying walk error
        #[source]
        source: walkdir::Error,
    },

    /// Copying a single file into the staging directory failed
    #[error("Copy of {path:?} failed: {source}")]
    FileCopy {
        /// Source file path
        path: PathBuf,
        /// Underlying IO error
        #[source]
        source: std::io::Error,
    },

    /// Every rename attempt for the staging directory failed
    #[error("Could not promote staging directory {staging:?} after {attempts} attempts: {last_error}")]
    PromotionExhausted {
        /// Staging directory that could not be renamed
        staging: PathBuf,
        /// Number of rename attempts made
        attempts: usize,
        /// Message of the last rename failure
        last_error: String,
    },

    /// A store write or read failed
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// The source directory is missing or not a directory
    #[error("Invalid source directory: {0:?}")]
    InvalidSourceDir(PathBuf),

    /// The destination directory is missing or not a directory
    #[error("Invalid destination directory: {0:?}")]
    InvalidDestinationDir(PathBuf),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// Exclude pattern parsing error
    #[error("Invalid exclude pattern: {0}")]
    InvalidPattern(#[from] globset::Error),

    /// Run state machine was asked for an illegal transition
    #[error("Invalid run state transition: {from} -> {to}")]
    InvalidStateTransition {
        /// Current state
        from: RunState,
        /// Requested state
        to: RunState,
    },

    /// Generic error for unexpected conditions
    #[error("Internal error: {0}")]
    Internal(String),
}

impl BackupError {
    /// Create a persistence error with a custom message
    pub fn persistence(msg: impl Into<String>) -> Self {
        BackupError::Persistence(msg.into())
    }

    /// Create an internal error with a custom message
    pub fn internal(msg: impl Into<String>) -> Self {
        BackupError::Internal(msg.into())
    }

    /// Check if this error ends a run in the `Failed` state
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            BackupError::Scan { .. }
                | BackupError::PromotionExhausted { .. }
                | BackupError::InvalidSourceDir(_)
                | BackupError::InvalidDestinationDir(_)
                | BackupError::InvalidConfiguration(_)
        )
    }

    /// Check if this error comes from one of the stores
    pub fn is_persistence(&self) -> bool {
        matches!(self, BackupError::Persistence(_) | BackupError::Sql(_))
    }

    /// Get a user-friendly error message with suggestions
    pub fn user_message(&self) -> String {
        match self {
            BackupError::InvalidSourceDir(path) => {
                format!("Source directory {:?} does not exist or is not a directory.", path)
            }
            BackupError::InvalidDestinationDir(path) => {
                format!(
                    "Destination directory {:?} does not exist or is not a directory. Create it first.",
                    path
                )
            }
            BackupError::PromotionExhausted { staging, .. } => {
                format!(
                    "Backup could not be moved into a dated directory. Copied files remain in {:?} unless discarding was configured.",
                    staging
                )
            }
            BackupError::Sql(rusqlite::Error::SqliteFailure(err, _))
                if err.code == rusqlite::ErrorCode::DatabaseBusy =>
            {
                "Backup database is busy. Another run may be in progress. Try again later.".to_string()
            }
            _ => self.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = BackupError::InvalidSourceDir(PathBuf::from("/missing"));
        assert_eq!(err.to_string(), "Invalid source directory: \"/missing\"");
    }

    #[test]
    fn test_error_fatal() {
        let err = BackupError::PromotionExhausted {
            staging: PathBuf::from("/dst/.staging"),
            attempts: 11,
            last_error: "exists".to_string(),
        };
        assert!(err.is_fatal());
        assert!(!BackupError::persistence("insert failed").is_fatal());
        assert!(BackupError::persistence("insert failed").is_persistence());
    }

    #[test]
    fn test_state_transition_display() {
        let err = BackupError::InvalidStateTransition {
            from: RunState::Completed,
            to: RunState::Comparing,
        };
        assert_eq!(err.to_string(), "Invalid run state transition: Completed -> Comparing");
    }
}
