use chrono::{DateTime, Utc};
use rollcall_core::{Embedding, IdentityDb, IdentityStore, StoreError};
use rusqlite::{params, Connection};
use std::collections::HashSet;
use std::path::Path;

/// Row summary for listing enrolled identities.
#[derive(Debug, Clone, PartialEq)]
pub struct EnrolledIdentity {
    pub name: String,
    pub dim: usize,
    pub enrolled_at: DateTime<Utc>,
}

/// Identity templates, one row per name. Embeddings are stored as
/// little-endian f32 blobs.
pub struct SqliteIdentityStore {
    conn: Connection,
}

impl SqliteIdentityStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        Ok(Self { conn: crate::open_file(path.as_ref())? })
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Ok(Self { conn: crate::open_memory()? })
    }

    /// Enrolled identities in name order, without their templates.
    pub fn enrolled(&self) -> Result<Vec<EnrolledIdentity>, StoreError> {
        let mut stmt = self
            .conn
            .prepare("SELECT name, dim, enrolled_at FROM identities ORDER BY name")
            .map_err(StoreError::backend)?;
        let rows = stmt
            .query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?, row.get::<_, String>(2)?))
            })
            .map_err(StoreError::backend)?;

        let mut out = Vec::new();
        for row in rows {
            let (name, dim, enrolled_at) = row.map_err(StoreError::backend)?;
            let enrolled_at = parse_time(&enrolled_at).map_err(|reason| StoreError::Corrupt {
                name: name.clone(),
                reason,
            })?;
            out.push(EnrolledIdentity {
                name,
                dim: dim as usize,
                enrolled_at,
            });
        }
        Ok(out)
    }
}

impl IdentityStore for SqliteIdentityStore {
    fn load(&mut self) -> Result<IdentityDb, StoreError> {
        let mut stmt = self
            .conn
            .prepare("SELECT name, dim, embedding FROM identities ORDER BY name")
            .map_err(StoreError::backend)?;
        let rows = stmt
            .query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?, row.get::<_, Vec<u8>>(2)?))
            })
            .map_err(StoreError::backend)?;

        let mut db = IdentityDb::new();
        for row in rows {
            let (name, dim, blob) = row.map_err(StoreError::backend)?;
            let embedding = decode(&blob, dim as usize).map_err(|reason| StoreError::Corrupt {
                name: name.clone(),
                reason,
            })?;
            db.insert(name, embedding);
        }
        Ok(db)
    }

    /// Make the table mirror `db`. Unchanged templates keep their
    /// enrollment time.
    fn save(&mut self, db: &IdentityDb) -> Result<(), StoreError> {
        let now = Utc::now().to_rfc3339();
        let tx = self.conn.transaction().map_err(StoreError::backend)?;

        let stored: Vec<String> = {
            let mut stmt = tx.prepare("SELECT name FROM identities").map_err(StoreError::backend)?;
            let names = stmt
                .query_map([], |row| row.get::<_, String>(0))
                .map_err(StoreError::backend)?
                .collect::<Result<_, _>>()
                .map_err(StoreError::backend)?;
            names
        };
        let keep: HashSet<&str> = db.names().collect();
        for name in stored.iter().filter(|n| !keep.contains(n.as_str())) {
            tx.execute("DELETE FROM identities WHERE name = ?1", params![name])
                .map_err(StoreError::backend)?;
        }

        for (name, embedding) in db.iter() {
            tx.execute(
                "INSERT INTO identities (name, dim, embedding, enrolled_at) VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(name) DO UPDATE SET
                    dim = excluded.dim,
                    embedding = excluded.embedding,
                    enrolled_at = CASE WHEN identities.embedding = excluded.embedding
                                       THEN identities.enrolled_at ELSE excluded.enrolled_at END",
                params![name, embedding.dim() as i64, encode(embedding), now],
            )
            .map_err(StoreError::backend)?;
        }

        tx.commit().map_err(StoreError::backend)?;
        tracing::debug!(identities = db.len(), "identity database saved");
        Ok(())
    }
}

fn encode(embedding: &Embedding) -> Vec<u8> {
    embedding.values.iter().flat_map(|v| v.to_le_bytes()).collect()
}

fn decode(blob: &[u8], dim: usize) -> Result<Embedding, String> {
    if blob.len() != dim * 4 {
        return Err(format!("expected {} bytes for {dim} dimensions, found {}", dim * 4, blob.len()));
    }
    let values = blob
        .chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect();
    Ok(Embedding::new(values))
}

pub(crate) fn parse_time(s: &str) -> Result<DateTime<Utc>, String> {
    DateTime::parse_from_rfc3339(s)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| format!("bad timestamp {s:?}: {e}"))
}
