use rusqlite::Connection;

use crate::error::Result;

/// Metadata key holding the source directory of the stored baseline
pub const META_SOURCE_DIR: &str = "src_dir";
/// Metadata key holding the RFC 3339 time the baseline was captured
pub const META_CAPTURED_AT: &str = "captured_at";

pub(crate) fn apply_connection_pragmas(connection: &Connection) -> Result<()> {
    connection.execute_batch(
        "PRAGMA journal_mode=WAL;
         PRAGMA synchronous = NORMAL;
         PRAGMA foreign_keys=ON;
         PRAGMA busy_timeout=5000;
         PRAGMA temp_store=MEMORY;",
    )?;
    Ok(())
}

pub(crate) fn apply_origin_schema(connection: &Connection) -> Result<()> {
    connection.execute_batch(
        "CREATE TABLE IF NOT EXISTS bak_meta (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
         );
         CREATE TABLE IF NOT EXISTS bak_origin (
            path TEXT PRIMARY KEY,
            size INTEGER NOT NULL,
            mtime_ns INTEGER NOT NULL
         ) WITHOUT ROWID;",
    )?;
    Ok(())
}

pub(crate) fn apply_log_schema(connection: &Connection) -> Result<()> {
    connection.execute_batch(
        "CREATE TABLE IF NOT EXISTS bak_summary (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            date TEXT NOT NULL,
            src_dir TEXT NOT NULL,
            dst_dir TEXT NOT NULL DEFAULT '',
            state TEXT NOT NULL,
            total_count INTEGER NOT NULL DEFAULT 0,
            total_size INTEGER NOT NULL DEFAULT 0,
            added_count INTEGER NOT NULL DEFAULT 0,
            modified_count INTEGER NOT NULL DEFAULT 0,
            deleted_count INTEGER NOT NULL DEFAULT 0,
            unchanged_count INTEGER NOT NULL DEFAULT 0,
            success_count INTEGER NOT NULL DEFAULT 0,
            failure_count INTEGER NOT NULL DEFAULT 0,
            backup_size INTEGER NOT NULL DEFAULT 0,
            message TEXT NOT NULL DEFAULT '',
            scan_time REAL NOT NULL DEFAULT 0,
            promote_time REAL NOT NULL DEFAULT 0,
            logging_time REAL NOT NULL DEFAULT 0,
            total_time REAL NOT NULL DEFAULT 0
         );
         CREATE INDEX IF NOT EXISTS idx_bak_summary_date ON bak_summary (date);
         CREATE TABLE IF NOT EXISTS bak_log (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            run_id INTEGER NOT NULL,
            path TEXT NOT NULL,
            size INTEGER NOT NULL,
            mtime_ns INTEGER NOT NULL,
            state TEXT NOT NULL,
            message TEXT,
            FOREIGN KEY(run_id) REFERENCES bak_summary(id) ON DELETE CASCADE
         );
         CREATE INDEX IF NOT EXISTS idx_bak_log_run_id ON bak_log (run_id);",
    )?;
    Ok(())
}
