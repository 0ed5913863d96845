//! SQLite persistence for baselines and run history
//!
//! Two database files live in the destination root:
//!
//! - the **baseline store** (`backup_origin.db`) holds the file records of the
//!   last successful run together with the source directory they came from;
//! - the **run log store** (`backup_log.db`) holds one summary row per run and
//!   one event row per Added, Modified or Deleted file.
//!
//! Both are opened with WAL journaling and a busy timeout so a second process
//! reading history does not fail while a run is writing.

use rusqlite::Connection;
use std::path::Path;
use tracing::debug;

use crate::error::Result;

mod baseline;
mod run_log;
pub mod schema;

pub use baseline::BaselineStore;
pub use run_log::RunLogStore;

fn open_connection(path: &Path) -> Result<Connection> {
    debug!("Opening database {:?}", path);
    let connection = Connection::open(path)?;
    schema::apply_connection_pragmas(&connection)?;
    Ok(connection)
}
