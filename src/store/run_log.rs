//! Run history persistence
//!
//! One `bak_summary` row per run and one `bak_log` row per change event.
//! The summary is inserted first to obtain the run id, events follow in
//! bounded batches, and the summary is updated once the run has finished.

use chrono::{DateTime, Local};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, trace};

use super::schema;
use crate::error::{BackupError, Result};
use crate::types::{ChangeEvent, FileState, PhaseTimings, RunState, RunSummary};
use crate::utils;

const SUMMARY_COLUMNS: &str = "id, date, src_dir, dst_dir, state, total_count, total_size,
    added_count, modified_count, deleted_count, unchanged_count, success_count,
    failure_count, backup_size, message, scan_time, promote_time, logging_time, total_time";

/// Append-only history of run summaries and their change events
pub struct RunLogStore {
    connection: Connection,
    batch_size: usize,
}

impl RunLogStore {
    /// Open or create the run log database
    ///
    /// `batch_size` bounds the number of event rows written per transaction.
    pub fn open(path: &Path, batch_size: usize) -> Result<Self> {
        let connection = super::open_connection(path)?;
        schema::apply_log_schema(&connection)?;
        Ok(Self {
            connection,
            batch_size: batch_size.max(1),
        })
    }

    /// Insert a summary row and return its id
    pub fn insert_summary(&mut self, summary: &RunSummary) -> Result<i64> {
        let mut stmt = self.connection.prepare_cached(
            "INSERT INTO bak_summary (date, src_dir, dst_dir, state, total_count, total_size,
                added_count, modified_count, deleted_count, unchanged_count, success_count,
                failure_count, backup_size, message, scan_time, promote_time, logging_time,
                total_time)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18)",
        )?;
        stmt.execute(params![
            summary.date.to_rfc3339(),
            summary.source_dir.to_string_lossy().into_owned(),
            summary.destination_dir.to_string_lossy().into_owned(),
            summary.state.as_str(),
            summary.total_count as i64,
            summary.total_size as i64,
            summary.added_count as i64,
            summary.modified_count as i64,
            summary.deleted_count as i64,
            summary.unchanged_count as i64,
            summary.success_count as i64,
            summary.failure_count as i64,
            summary.backup_size as i64,
            summary.message,
            summary.timings.scanning.as_secs_f64(),
            summary.timings.promotion.as_secs_f64(),
            summary.timings.logging.as_secs_f64(),
            summary.timings.total.as_secs_f64(),
        ])?;
        let id = self.connection.last_insert_rowid();
        debug!("Inserted run summary {}", id);
        Ok(id)
    }

    /// Insert change events for a run in batched transactions
    ///
    /// Each chunk of `batch_size` events commits on its own. A failure leaves
    /// earlier chunks in place and returns the error of the failing chunk.
    pub fn insert_events(&mut self, run_id: i64, events: &[ChangeEvent]) -> Result<()> {
        for chunk in events.chunks(self.batch_size) {
            let tx = self.connection.transaction()?;
            {
                let mut stmt = tx.prepare_cached(
                    "INSERT INTO bak_log (run_id, path, size, mtime_ns, state, message)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                )?;
                for event in chunk {
                    stmt.execute(params![
                        run_id,
                        event.path,
                        event.size as i64,
                        utils::to_nanos(&event.modified),
                        event.state.as_str(),
                        event.message,
                    ])?;
                }
            }
            tx.commit()?;
            trace!("Committed {} events for run {}", chunk.len(), run_id);
        }
        Ok(())
    }

    /// Rewrite the mutable fields of an existing summary row
    pub fn update_summary(&mut self, summary: &RunSummary) -> Result<()> {
        let id = summary
            .id
            .ok_or_else(|| BackupError::persistence("summary has no id; insert it first"))?;
        let mut stmt = self.connection.prepare_cached(
            "UPDATE bak_summary SET dst_dir = ?2, state = ?3, total_count = ?4, total_size = ?5,
                added_count = ?6, modified_count = ?7, deleted_count = ?8, unchanged_count = ?9,
                success_count = ?10, failure_count = ?11, backup_size = ?12, message = ?13,
                scan_time = ?14, promote_time = ?15, logging_time = ?16, total_time = ?17
             WHERE id = ?1",
        )?;
        let updated = stmt.execute(params![
            id,
            summary.destination_dir.to_string_lossy().into_owned(),
            summary.state.as_str(),
            summary.total_count as i64,
            summary.total_size as i64,
            summary.added_count as i64,
            summary.modified_count as i64,
            summary.deleted_count as i64,
            summary.unchanged_count as i64,
            summary.success_count as i64,
            summary.failure_count as i64,
            summary.backup_size as i64,
            summary.message,
            summary.timings.scanning.as_secs_f64(),
            summary.timings.promotion.as_secs_f64(),
            summary.timings.logging.as_secs_f64(),
            summary.timings.total.as_secs_f64(),
        ])?;
        if updated == 0 {
            return Err(BackupError::persistence(format!("summary {} not found", id)));
        }
        Ok(())
    }

    /// Most recent run summary, if any
    pub fn last_summary(&self) -> Result<Option<RunSummary>> {
        let sql = format!("SELECT {} FROM bak_summary ORDER BY id DESC LIMIT 1", SUMMARY_COLUMNS);
        let summary = self
            .connection
            .query_row(&sql, [], summary_from_row)
            .optional()?;
        Ok(summary)
    }

    /// Up to `limit` summaries, newest first
    pub fn list_summaries(&self, limit: usize) -> Result<Vec<RunSummary>> {
        let sql = format!("SELECT {} FROM bak_summary ORDER BY id DESC LIMIT ?1", SUMMARY_COLUMNS);
        let mut stmt = self.connection.prepare(&sql)?;
        let rows = stmt
            .query_map(params![limit as i64], summary_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// One summary by id
    pub fn summary(&self, run_id: i64) -> Result<Option<RunSummary>> {
        let sql = format!("SELECT {} FROM bak_summary WHERE id = ?1", SUMMARY_COLUMNS);
        let summary = self
            .connection
            .query_row(&sql, params![run_id], summary_from_row)
            .optional()?;
        Ok(summary)
    }

    /// Change events of a run, ordered by path
    pub fn events_for_run(&self, run_id: i64) -> Result<Vec<ChangeEvent>> {
        let mut stmt = self.connection.prepare(
            "SELECT path, size, mtime_ns, state, message FROM bak_log
             WHERE run_id = ?1 ORDER BY path ASC",
        )?;
        let rows = stmt
            .query_map(params![run_id], |row| {
                let state: String = row.get(3)?;
                Ok(ChangeEvent {
                    path: row.get(0)?,
                    size: row.get::<_, i64>(1)? as u64,
                    modified: utils::from_nanos(row.get(2)?),
                    state: parse_column::<FileState>(3, &state)?,
                    message: row.get(4)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }
}

fn parse_column<T>(index: usize, value: &str) -> rusqlite::Result<T>
where
    T: std::str::FromStr<Err = BackupError>,
{
    value
        .parse()
        .map_err(|err| rusqlite::Error::FromSqlConversionFailure(index, Type::Text, Box::new(err)))
}

fn summary_from_row(row: &Row<'_>) -> rusqlite::Result<RunSummary> {
    let date: String = row.get(1)?;
    let date = DateTime::parse_from_rfc3339(&date)
        .map_err(|err| rusqlite::Error::FromSqlConversionFailure(1, Type::Text, Box::new(err)))?
        .with_timezone(&Local);
    let state: String = row.get(4)?;
    let count = |index: usize| -> rusqlite::Result<u64> { Ok(row.get::<_, i64>(index)? as u64) };
    let seconds = |index: usize| -> rusqlite::Result<Duration> {
        Ok(Duration::from_secs_f64(row.get::<_, f64>(index)?.max(0.0)))
    };

    Ok(RunSummary {
        id: Some(row.get(0)?),
        date,
        source_dir: PathBuf::from(row.get::<_, String>(2)?),
        destination_dir: PathBuf::from(row.get::<_, String>(3)?),
        state: parse_column::<RunState>(4, &state)?,
        total_count: count(5)?,
        total_size: count(6)?,
        added_count: count(7)?,
        modified_count: count(8)?,
        deleted_count: count(9)?,
        unchanged_count: count(10)?,
        success_count: count(11)?,
        failure_count: count(12)?,
        backup_size: count(13)?,
        message: row.get(14)?,
        timings: PhaseTimings {
            scanning: seconds(15)?,
            promotion: seconds(16)?,
            logging: seconds(17)?,
            total: seconds(18)?,
        },
    })
}
