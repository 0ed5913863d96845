//! Utility functions shared by the scanner, copier and stores
//!
//! Path relativisation, timestamp conversion and human-readable formatting.

use chrono::{DateTime, TimeZone, Utc};
use std::path::{Component, Path, PathBuf};
use std::time::SystemTime;

use crate::error::{BackupError, Result};

/// Make a path relative to a base path, joined with `/`
///
/// Attempts a lexical strip first so symbolic link paths are preserved, and
/// falls back to canonicalising both paths when the lexical strip fails.
///
/// # Errors
///
/// - [`BackupError::Internal`] if the path is not under the base path
/// - [`BackupError::Io`] if canonicalization fails (fallback case only)
///
/// # Example
///
/// ```rust,ignore
/// use crate::utils::make_relative;
/// use std::path::Path;
///
/// let relative = make_relative(Path::new("/data/src/a/b.txt"), Path::new("/data/src"))?;
/// assert_eq!(relative, "a/b.txt");
/// ```
pub fn make_relative(path: &Path, base: &Path) -> Result<String> {
    let relative = match path.strip_prefix(base) {
        Ok(relative) => relative.to_path_buf(),
        Err(_) => {
            let path_canon = path.canonicalize()?;
            let base_canon = base.canonicalize()?;
            path_canon
                .strip_prefix(&base_canon)
                .map(|p| p.to_path_buf())
                .map_err(|_| {
                    BackupError::internal(format!(
                        "Path {:?} is not relative to {:?}",
                        path_canon, base_canon
                    ))
                })?
        }
    };
    Ok(to_slash(&relative))
}

/// Join path components with `/` regardless of platform
pub fn to_slash(path: &Path) -> String {
    path.components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}

/// Resolve a `/`-separated relative path under a root directory
pub fn from_slash(root: &Path, relative: &str) -> PathBuf {
    relative
        .split('/')
        .filter(|part| !part.is_empty())
        .fold(root.to_path_buf(), |acc, part| acc.join(part))
}

/// Check whether `path` lies inside `base` (or is `base`)
pub fn is_within(path: &Path, base: &Path) -> bool {
    let path = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
    let base = base.canonicalize().unwrap_or_else(|_| base.to_path_buf());
    path.starts_with(base)
}

/// Convert a filesystem timestamp to UTC
pub fn system_time_to_utc(time: SystemTime) -> DateTime<Utc> {
    time.into()
}

/// Nanoseconds since the Unix epoch, as stored in the baseline
pub fn to_nanos(time: &DateTime<Utc>) -> i64 {
    time.timestamp_nanos_opt()
        .unwrap_or_else(|| time.timestamp().saturating_mul(1_000_000_000))
}

/// Inverse of [`to_nanos`]
pub fn from_nanos(nanos: i64) -> DateTime<Utc> {
    Utc.timestamp_nanos(nanos)
}

/// Format bytes in human-readable form
///
/// Uses binary units (1024-based). Values below 1 KB are shown as whole
/// numbers, larger values with two decimals.
///
/// ```rust,ignore
/// assert_eq!(format_bytes(1536), "1.50 KB");
/// ```
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB", "PB"];
    let mut size = bytes as f64;
    let mut unit_idx = 0;

    while size >= 1024.0 && unit_idx < UNITS.len() - 1 {
        size /= 1024.0;
        unit_idx += 1;
    }

    if unit_idx == 0 {
        format!("{} {}", size as u64, UNITS[unit_idx])
    } else {
        format!("{:.2} {}", size, UNITS[unit_idx])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(0), "0 B");
        assert_eq!(format_bytes(1023), "1023 B");
        assert_eq!(format_bytes(1024), "1.00 KB");
        assert_eq!(format_bytes(1536), "1.50 KB");
        assert_eq!(format_bytes(1_048_576), "1.00 MB");
        assert_eq!(format_bytes(1_073_741_824), "1.00 GB");
    }

    #[test]
    fn test_make_relative() {
        let temp_dir = TempDir::new().unwrap();
        let base = temp_dir.path();
        let subdir = base.join("subdir");
        let file = subdir.join("file.txt");

        fs::create_dir_all(&subdir).unwrap();
        fs::write(&file, b"test").unwrap();

        assert_eq!(make_relative(&file, base).unwrap(), "subdir/file.txt");
        assert!(make_relative(Path::new("/definitely/elsewhere"), base).is_err());
    }

    #[test]
    fn test_slash_round_trip() {
        let root = Path::new("/backup/stage");
        let joined = from_slash(root, "a/b/c.txt");
        assert_eq!(joined, root.join("a").join("b").join("c.txt"));
        assert_eq!(to_slash(Path::new("a").join("b").join("c.txt").as_path()), "a/b/c.txt");
    }

    #[test]
    fn test_nanos_round_trip() {
        let time = Utc.timestamp_opt(1_650_000_000, 123_456_789).unwrap();
        assert_eq!(from_nanos(to_nanos(&time)), time);
    }

    #[test]
    fn test_is_within() {
        let temp_dir = TempDir::new().unwrap();
        let inner = temp_dir.path().join("inner");
        fs::create_dir(&inner).unwrap();

        assert!(is_within(&inner, temp_dir.path()));
        assert!(!is_within(temp_dir.path(), &inner));
    }
}
