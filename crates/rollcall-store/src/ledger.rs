use rollcall_core::decision::Status;
use rollcall_core::{ActionKind, AttendanceLedger, AttendanceRecord, StoreError};
use rusqlite::{params, Connection, Row};
use std::path::Path;
use uuid::Uuid;

use crate::identities::parse_time;

/// Append-only attendance log. Rows are never updated or deleted.
pub struct SqliteLedger {
    conn: Connection,
}

impl SqliteLedger {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        Ok(Self { conn: crate::open_file(path.as_ref())? })
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Ok(Self { conn: crate::open_memory()? })
    }

    /// The `limit` most recent records, newest first.
    pub fn recent(&self, limit: usize) -> Result<Vec<AttendanceRecord>, StoreError> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT id, attempt_id, name, time, action, similarity, liveness, confidence, status, rejection_kind
                 FROM attendance ORDER BY id DESC LIMIT ?1",
            )
            .map_err(StoreError::backend)?;
        let rows = stmt
            .query_map(params![limit as i64], RawRecord::from_row)
            .map_err(StoreError::backend)?;

        let mut out = Vec::new();
        for row in rows {
            out.push(row.map_err(StoreError::backend)?.into_record()?);
        }
        Ok(out)
    }

    pub fn count(&self) -> Result<u64, StoreError> {
        let n: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM attendance", [], |row| row.get(0))
            .map_err(StoreError::backend)?;
        Ok(n as u64)
    }
}

impl AttendanceLedger for SqliteLedger {
    fn append(&mut self, record: &AttendanceRecord) -> Result<(), StoreError> {
        self.conn
            .execute(
                "INSERT INTO attendance
                    (attempt_id, name, time, action, similarity, liveness, confidence, status, rejection_kind)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    record.attempt_id.to_string(),
                    record.name,
                    record.timestamp.to_rfc3339(),
                    record.action.as_str(),
                    record.similarity as f64,
                    record.liveness as f64,
                    record.confidence as f64,
                    record.status.as_str(),
                    record.rejection_kind,
                ],
            )
            .map_err(StoreError::backend)?;
        tracing::debug!(
            attempt = %record.attempt_id,
            name = record.name.as_deref().unwrap_or("-"),
            status = %record.status,
            "attendance recorded"
        );
        Ok(())
    }
}

/// Column values as stored, before parsing.
struct RawRecord {
    id: i64,
    attempt_id: String,
    name: Option<String>,
    time: String,
    action: String,
    similarity: f64,
    liveness: f64,
    confidence: f64,
    status: String,
    rejection_kind: Option<String>,
}

impl RawRecord {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            attempt_id: row.get(1)?,
            name: row.get(2)?,
            time: row.get(3)?,
            action: row.get(4)?,
            similarity: row.get(5)?,
            liveness: row.get(6)?,
            confidence: row.get(7)?,
            status: row.get(8)?,
            rejection_kind: row.get(9)?,
        })
    }

    fn into_record(self) -> Result<AttendanceRecord, StoreError> {
        let id = self.id;
        let corrupt = |reason: String| StoreError::Corrupt {
            name: format!("attendance row {id}"),
            reason,
        };

        let status = match self.status.as_str() {
            "ACCEPTED" => Status::Accepted,
            "REJECTED" => Status::Rejected,
            other => return Err(corrupt(format!("unknown status {other:?}"))),
        };
        Ok(AttendanceRecord {
            attempt_id: Uuid::parse_str(&self.attempt_id).map_err(|e| corrupt(e.to_string()))?,
            name: self.name,
            timestamp: parse_time(&self.time).map_err(corrupt)?,
            action: self.action.parse::<ActionKind>().map_err(|e| corrupt(e.to_string()))?,
            similarity: self.similarity as f32,
            liveness: self.liveness as f32,
            confidence: self.confidence as f32,
            status,
            rejection_kind: self.rejection_kind,
        })
    }
}
