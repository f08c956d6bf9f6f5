//! Persistence contracts for the identity database and the attendance ledger.

use thiserror::Error;

use crate::types::{AttendanceRecord, IdentityDb};

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("storage backend: {0}")]
    Backend(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("corrupt stored template for {name:?}: {reason}")]
    Corrupt { name: String, reason: String },
}

impl StoreError {
    pub fn backend(err: impl std::error::Error + Send + Sync + 'static) -> Self {
        StoreError::Backend(Box::new(err))
    }
}

/// Name-keyed template storage. `save` replaces the whole mapping.
pub trait IdentityStore {
    fn load(&mut self) -> Result<IdentityDb, StoreError>;
    fn save(&mut self, db: &IdentityDb) -> Result<(), StoreError>;
}

/// Append-only attendance log.
pub trait AttendanceLedger {
    fn append(&mut self, record: &AttendanceRecord) -> Result<(), StoreError>;
}
