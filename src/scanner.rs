//! Directory scanning for deltaback
//!
//! The scanner walks the source tree and yields one [`ScannedFile`] per regular
//! file, as it is discovered. It never decides whether a file changed; that is
//! the classifier's job.
//!
//! ## Error handling
//!
//! - A traversal error (unreadable root, unreadable subdirectory, symlink loop)
//!   is yielded as `Err` and is fatal for the run: a directory that cannot be
//!   listed would otherwise make every file below it look deleted.
//! - A metadata error on an individual file, a followed link whose target is
//!   gone, or a file name that is not valid UTF-8 is yielded as
//!   [`ScannedFile::Unreadable`] so the run can record it and move on.
//!
//! ## Exclusions
//!
//! Glob patterns are matched against `/`-separated paths relative to the source
//! root. A pattern matching a directory prunes the whole subtree. Absolute
//! directories (the destination root, the staging directory) can be excluded
//! as well, which matters when the destination lives inside the source.
//!
//! ## Example
//!
//! ```rust,no_run
//! use deltaback::scanner::{DirectoryScanner, ScannedFile};
//! use std::path::PathBuf;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let scanner = DirectoryScanner::new(PathBuf::from("./data"))
//!     .with_exclude_patterns(&["**/*.tmp".to_string()])?;
//!
//! for item in scanner.walk() {
//!     if let ScannedFile::Record(record) = item? {
//!         println!("{} ({} bytes)", record.path, record.size);
//!     }
//! }
//! # Ok(())
//! # }
//! ```

use globset::{Glob, GlobSet, GlobSetBuilder};
use std::path::{Path, PathBuf};
use tracing::trace;
use walkdir::{DirEntry, WalkDir};

use crate::error::{BackupError, Result};
use crate::types::FileRecord;
use crate::utils;

/// One item produced by the scanner
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScannedFile {
    /// A regular file with its current size and modification time
    Record(FileRecord),
    /// A file whose metadata could not be read
    Unreadable {
        /// Path relative to the source root
        path: String,
        /// Error text
        message: String,
    },
}

/// Walks a source tree producing current file records
#[derive(Debug, Clone)]
pub struct DirectoryScanner {
    /// Root directory to walk
    root: PathBuf,
    /// Compiled exclude patterns
    excludes: GlobSet,
    /// Absolute directories pruned from the walk
    excluded_dirs: Vec<PathBuf>,
    /// Whether to follow symbolic links
    follow_symlinks: bool,
}

impl DirectoryScanner {
    /// Create a scanner with no exclusions that does not follow symlinks
    pub fn new(root: PathBuf) -> Self {
        Self {
            root,
            excludes: GlobSet::empty(),
            excluded_dirs: Vec::new(),
            follow_symlinks: false,
        }
    }

    /// Set glob exclude patterns
    ///
    /// # Errors
    ///
    /// - [`BackupError::InvalidPattern`] if a pattern does not parse
    pub fn with_exclude_patterns(mut self, patterns: &[String]) -> Result<Self> {
        let mut builder = GlobSetBuilder::new();
        for pattern in patterns {
            builder.add(Glob::new(pattern)?);
        }
        self.excludes = builder.build()?;
        Ok(self)
    }

    /// Prune an absolute directory from the walk
    pub fn exclude_dir(mut self, dir: PathBuf) -> Self {
        self.excluded_dirs.push(dir);
        self
    }

    /// Set symbolic link following behavior
    pub fn with_follow_symlinks(mut self, follow: bool) -> Self {
        self.follow_symlinks = follow;
        self
    }

    /// Root directory being scanned
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Lazily walk the tree
    ///
    /// Directories are traversed but never yielded. Only regular files are
    /// recorded; with `follow_symlinks` enabled, links to regular files count
    /// as the file they point to.
    pub fn walk(&self) -> impl Iterator<Item = Result<ScannedFile>> + Send + '_ {
        WalkDir::new(&self.root)
            .follow_links(self.follow_symlinks)
            .into_iter()
            .filter_entry(move |entry| !self.is_excluded(entry))
            .filter_map(move |entry| match entry {
                Ok(entry) => self.process_entry(&entry),
                Err(err) if is_broken_link(&err) => {
                    let path = err.path().unwrap_or(&self.root);
                    Some(Ok(self.unreadable(path, err.to_string())))
                }
                Err(err) => {
                    let path = err
                        .path()
                        .map(Path::to_path_buf)
                        .unwrap_or_else(|| self.root.clone());
                    Some(Err(BackupError::Scan { path, source: err }))
                }
            })
    }

    /// Walk the whole tree into memory
    ///
    /// The result is sorted by path for consistent ordering.
    pub fn scan_all(&self) -> Result<Vec<ScannedFile>> {
        let mut items = self.walk().collect::<Result<Vec<_>>>()?;
        items.sort_by(|a, b| a.path().cmp(b.path()));
        Ok(items)
    }

    fn is_excluded(&self, entry: &DirEntry) -> bool {
        if entry.depth() == 0 {
            return false;
        }
        let path = entry.path();
        if entry.file_type().is_dir() && self.excluded_dirs.iter().any(|dir| dir == path) {
            trace!("Pruning excluded directory {:?}", path);
            return true;
        }
        if self.excludes.is_empty() {
            return false;
        }
        match utils::make_relative(path, &self.root) {
            Ok(relative) => self.excludes.is_match(relative.as_str()),
            Err(_) => false,
        }
    }

    fn process_entry(&self, entry: &DirEntry) -> Option<Result<ScannedFile>> {
        if !entry.file_type().is_file() {
            return None;
        }

        // Lossy names would not round-trip to the real file and could collide
        if entry.path().to_str().is_none() {
            return Some(Ok(self.unreadable(entry.path(), "non-UTF-8 path".to_string())));
        }

        let relative = match utils::make_relative(entry.path(), &self.root) {
            Ok(relative) => relative,
            Err(e) => return Some(Err(e)),
        };

        let item = match entry.metadata() {
            Ok(metadata) => match metadata.modified() {
                Ok(modified) => ScannedFile::Record(FileRecord::new(
                    relative,
                    metadata.len(),
                    utils::system_time_to_utc(modified),
                )),
                Err(e) => ScannedFile::Unreadable {
                    path: relative,
                    message: e.to_string(),
                },
            },
            Err(e) => ScannedFile::Unreadable {
                path: relative,
                message: e.to_string(),
            },
        };
        Some(Ok(item))
    }

    fn unreadable(&self, path: &Path, message: String) -> ScannedFile {
        let relative = utils::make_relative(path, &self.root)
            .unwrap_or_else(|_| path.to_string_lossy().into_owned());
        ScannedFile::Unreadable {
            path: relative,
            message,
        }
    }
}

/// A followed link whose target cannot be resolved is a per-file problem.
/// Loops and unreadable directories stay fatal.
fn is_broken_link(err: &walkdir::Error) -> bool {
    if err.depth() == 0 || err.loop_ancestor().is_some() {
        return false;
    }
    let Some(path) = err.path() else {
        return false;
    };
    let is_link = std::fs::symlink_metadata(path)
        .map(|meta| meta.file_type().is_symlink())
        .unwrap_or(false);
    is_link && std::fs::metadata(path).is_err()
}

impl ScannedFile {
    /// Relative path of the item
    pub fn path(&self) -> &str {
        match self {
            ScannedFile::Record(record) => &record.path,
            ScannedFile::Unreadable { path, .. } => path,
        }
    }
}
