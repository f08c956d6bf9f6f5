//! rollcall-store: SQLite persistence for identity templates and the
//! attendance ledger.
//!
//! Both stores share one schema, so they may point at the same file.

pub mod identities;
pub mod ledger;

use rollcall_core::StoreError;
use rusqlite::Connection;
use std::path::Path;
use std::time::Duration;

pub use identities::{EnrolledIdentity, SqliteIdentityStore};
pub use ledger::SqliteLedger;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS identities (
    name        TEXT PRIMARY KEY,
    dim         INTEGER NOT NULL,
    embedding   BLOB NOT NULL,
    enrolled_at TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS attendance (
    id             INTEGER PRIMARY KEY AUTOINCREMENT,
    attempt_id     TEXT NOT NULL,
    name           TEXT,
    time           TEXT NOT NULL,
    action         TEXT NOT NULL,
    similarity     REAL NOT NULL,
    liveness       REAL NOT NULL,
    confidence     REAL NOT NULL,
    status         TEXT NOT NULL,
    rejection_kind TEXT
);
CREATE INDEX IF NOT EXISTS attendance_name_time ON attendance (name, time);
";

/// Open (creating parent directories) and initialise a database file.
pub(crate) fn open_file(path: &Path) -> Result<Connection, StoreError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(StoreError::backend)?;
    }
    let conn = Connection::open(path).map_err(StoreError::backend)?;
    conn.busy_timeout(Duration::from_secs(5)).map_err(StoreError::backend)?;
    init(&conn)?;
    tracing::debug!(path = %path.display(), "database opened");
    Ok(conn)
}

pub(crate) fn open_memory() -> Result<Connection, StoreError> {
    let conn = Connection::open_in_memory().map_err(StoreError::backend)?;
    init(&conn)?;
    Ok(conn)
}

fn init(conn: &Connection) -> Result<(), StoreError> {
    conn.execute_batch(SCHEMA).map_err(StoreError::backend)
}
