//! Attendance engine: owns the identity database and cooldown state and runs
//! one verification or enrollment attempt at a time.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::atomic::AtomicBool;
use thiserror::Error;
use uuid::Uuid;

use crate::collector::{CollectError, ObservationCollector};
use crate::config::{ConfigError, EngineConfig};
use crate::consensus::ConsensusResult;
use crate::cooldown::{ActionThrottle, DuplicateSuppressor};
use crate::decision::Decision;
use crate::enrollment::{self, EnrollError};
use crate::matcher::{CosineMatcher, Matcher};
use crate::sensor::{ProgressSink, Sensors};
use crate::store::{AttendanceLedger, IdentityStore, StoreError};
use crate::types::{ActionKind, AttendanceRecord, Embedding, IdentityDb, VerificationBatch};

#[derive(Error, Debug)]
pub enum EngineError {
    #[error(transparent)]
    Collect(#[from] CollectError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Enroll(#[from] EnrollError),
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),
    #[error("identity {0:?} is already enrolled; confirm overwrite to replace it")]
    AlreadyEnrolled(String),
    #[error("identity name must not be empty")]
    InvalidName,
    #[error("too soon after the last accepted punch; retry in {remaining_ms} ms")]
    Throttled { remaining_ms: i64 },
}

/// Whether an attempt reached the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LogOutcome {
    Logged,
    DuplicateSuppressed,
}

/// Everything produced by one verification attempt.
#[derive(Debug, Clone, Serialize)]
pub struct Verification {
    pub attempt_id: Uuid,
    pub action: ActionKind,
    pub timestamp: DateTime<Utc>,
    pub batch: VerificationBatch,
    pub consensus: ConsensusResult,
    pub decision: Decision,
    pub log: LogOutcome,
}

#[derive(Debug, Clone, Serialize)]
pub struct Enrollment {
    pub name: String,
    pub template: Embedding,
    pub samples: usize,
    /// An existing template was overwritten.
    pub replaced: bool,
}

type Clock = Box<dyn Fn() -> DateTime<Utc> + Send>;

pub struct AttendanceEngine<S, L, M = CosineMatcher> {
    config: EngineConfig,
    db: IdentityDb,
    store: S,
    ledger: L,
    matcher: M,
    suppressor: DuplicateSuppressor,
    throttle: ActionThrottle,
    clock: Clock,
}

impl<S: IdentityStore, L: AttendanceLedger> AttendanceEngine<S, L, CosineMatcher> {
    /// Validate the configuration and load the identity database once.
    pub fn new(config: EngineConfig, store: S, ledger: L) -> Result<Self, EngineError> {
        Self::with_matcher(config, store, ledger, CosineMatcher)
    }
}

impl<S: IdentityStore, L: AttendanceLedger, M: Matcher> AttendanceEngine<S, L, M> {
    pub fn with_matcher(config: EngineConfig, mut store: S, ledger: L, matcher: M) -> Result<Self, EngineError> {
        config.validate()?;
        let db = store.load()?;
        tracing::info!(identities = db.len(), "identity database loaded");

        Ok(Self {
            suppressor: DuplicateSuppressor::new(config.duplicate_window()?),
            throttle: ActionThrottle::new(config.action_cooldown()?),
            config,
            db,
            store,
            ledger,
            matcher,
            clock: Box::new(Utc::now),
        })
    }

    /// Replace the wall clock used for cooldowns and record timestamps.
    pub fn with_clock(mut self, clock: impl Fn() -> DateTime<Utc> + Send + 'static) -> Self {
        self.clock = Box::new(clock);
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn identities(&self) -> &IdentityDb {
        &self.db
    }

    pub fn ledger(&self) -> &L {
        &self.ledger
    }

    /// Run one verification attempt for `action` and log its decision.
    ///
    /// Collection failures (capture, timeout) abort without a record.
    /// Rejections are ordinary results, not errors.
    pub fn verify(
        &mut self,
        sensors: Sensors<'_>,
        action: ActionKind,
        sink: &mut dyn ProgressSink,
    ) -> Result<Verification, EngineError> {
        let started = (self.clock)();
        if let Err(remaining) = self.throttle.check(started) {
            return Err(EngineError::Throttled {
                remaining_ms: remaining.num_milliseconds(),
            });
        }

        let attempt_id = Uuid::new_v4();
        tracing::info!(attempt = %attempt_id, action = %action, "verification started");

        let batch = ObservationCollector::new(sensors, &self.matcher, self.config.collector_config())
            .collect(self.config.consensus_frames, &self.db, sink)
            .map_err(|e| {
                tracing::warn!(attempt = %attempt_id, error = %e, "verification aborted");
                e
            })?;

        let consensus = self.config.consensus_policy().resolve(&batch);
        let decision = self.config.decision_policy().decide(&consensus);
        let timestamp = (self.clock)();

        let duplicate = match &decision.identity {
            Some(name) => self.suppressor.is_duplicate(name, action, timestamp, decision.status),
            None => false,
        };
        let log = if duplicate {
            LogOutcome::DuplicateSuppressed
        } else {
            // The window only opens once the record is stored.
            self.ledger
                .append(&AttendanceRecord::from_decision(attempt_id, &decision, action, timestamp))?;
            if let Some(name) = &decision.identity {
                self.suppressor.record(name, action, timestamp, decision.status);
            }
            LogOutcome::Logged
        };

        if decision.is_accepted() {
            self.throttle.arm(timestamp);
        }

        tracing::info!(
            attempt = %attempt_id,
            action = %action,
            identity = decision.identity.as_deref().unwrap_or("-"),
            consensus = consensus.fraction,
            similarity = decision.avg_similarity,
            liveness = decision.avg_liveness,
            confidence = decision.final_confidence,
            status = %decision.status,
            reason = decision.rejection.map(|r| r.as_str()).unwrap_or("-"),
            ?log,
            "verification finished"
        );

        Ok(Verification {
            attempt_id,
            action,
            timestamp,
            batch,
            consensus,
            decision,
            log,
        })
    }

    /// Capture samples, average them into a template and persist it.
    ///
    /// An existing name is only replaced when `overwrite` is set; the check
    /// happens before any frame is captured. Setting `abort` stops the
    /// collection without touching the database.
    pub fn enroll(
        &mut self,
        sensors: Sensors<'_>,
        name: &str,
        overwrite: bool,
        abort: &AtomicBool,
        sink: &mut dyn ProgressSink,
    ) -> Result<Enrollment, EngineError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(EngineError::InvalidName);
        }
        if self.db.contains(name) && !overwrite {
            return Err(EngineError::AlreadyEnrolled(name.to_string()));
        }

        tracing::info!(name, samples = self.config.enrollment_samples, "enrollment started");
        let samples = ObservationCollector::new(sensors, &self.matcher, self.config.enrollment_collector_config())
            .collect_enrollment_samples(self.config.enrollment_samples, sink, abort)?;
        let template = enrollment::aggregate(&samples)?;

        if let Some((other, existing)) = self.db.iter().find(|(_, e)| e.dim() != template.dim()) {
            tracing::warn!(
                name,
                dim = template.dim(),
                other,
                other_dim = existing.dim(),
                "template dimensionality differs from enrolled identities"
            );
        }

        let previous = self.db.insert(name, template.clone());
        if let Err(e) = self.store.save(&self.db) {
            match previous {
                Some(prev) => self.db.insert(name, prev),
                None => self.db.remove(name),
            };
            return Err(e.into());
        }

        let replaced = previous.is_some();
        tracing::info!(name, replaced, dim = template.dim(), "identity enrolled");
        Ok(Enrollment {
            name: name.to_string(),
            template,
            samples: samples.len(),
            replaced,
        })
    }

    /// Remove an identity and persist the database. Returns false if absent.
    pub fn remove_identity(&mut self, name: &str) -> Result<bool, EngineError> {
        let Some(previous) = self.db.remove(name) else {
            return Ok(false);
        };
        if let Err(e) = self.store.save(&self.db) {
            self.db.insert(name, previous);
            return Err(e.into());
        }
        tracing::info!(name, "identity removed");
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::testing::*;
    use crate::decision::{NoIdentityCause, RejectionKind, Status};
    use crate::sensor::NoProgress;
    use chrono::{Duration, TimeZone};
    use std::cell::RefCell;
    use std::sync::{Arc, Mutex};

    #[derive(Default)]
    struct MemoryStore {
        db: IdentityDb,
        saves: usize,
        fail_saves: bool,
    }

    impl IdentityStore for MemoryStore {
        fn load(&mut self) -> Result<IdentityDb, StoreError> {
            Ok(self.db.clone())
        }

        fn save(&mut self, db: &IdentityDb) -> Result<(), StoreError> {
            if self.fail_saves {
                return Err(StoreError::backend(std::io::Error::other("disk full")));
            }
            self.db = db.clone();
            self.saves += 1;
            Ok(())
        }
    }

    #[derive(Default)]
    struct MemoryLedger {
        records: Vec<AttendanceRecord>,
        fail_appends: bool,
    }

    impl AttendanceLedger for MemoryLedger {
        fn append(&mut self, record: &AttendanceRecord) -> Result<(), StoreError> {
            if self.fail_appends {
                return Err(StoreError::backend(std::io::Error::other("database is locked")));
            }
            self.records.push(record.clone());
            Ok(())
        }
    }

    const ALICE: [f32; 2] = [1.0, 0.0];
    const STRANGER: [f32; 2] = [0.6, 0.8];

    fn store_with_alice() -> MemoryStore {
        let mut db = IdentityDb::new();
        db.insert("alice", Embedding::new(ALICE.to_vec()));
        MemoryStore { db, ..Default::default() }
    }

    /// Test clock advanced by hand.
    #[derive(Clone)]
    struct ManualClock(Arc<Mutex<DateTime<Utc>>>);

    impl ManualClock {
        fn new() -> Self {
            Self(Arc::new(Mutex::new(Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).unwrap())))
        }

        fn advance(&self, secs: i64) {
            *self.0.lock().unwrap() += Duration::seconds(secs);
        }

        fn now(&self) -> DateTime<Utc> {
            *self.0.lock().unwrap()
        }
    }

    fn engine(store: MemoryStore) -> (AttendanceEngine<MemoryStore, MemoryLedger>, ManualClock) {
        let clock = ManualClock::new();
        let c = clock.clone();
        let engine = AttendanceEngine::new(EngineConfig::default(), store, MemoryLedger::default())
            .unwrap()
            .with_clock(move || c.now());
        (engine, clock)
    }

    fn verify(
        engine: &mut AttendanceEngine<MemoryStore, MemoryLedger>,
        shots: Vec<Shot>,
        action: ActionKind,
    ) -> Result<Verification, EngineError> {
        let cell = RefCell::new(Script::new(shots));
        let (mut shutter, mut detector, mut embedder, scorer) = (Shutter(&cell), Lens(&cell), Lens(&cell), Lens(&cell));
        let sensors = Sensors {
            source: &mut shutter,
            detector: &mut detector,
            embedder: &mut embedder,
            liveness: &scorer,
        };
        engine.verify(sensors, action, &mut NoProgress)
    }

    fn enroll(
        engine: &mut AttendanceEngine<MemoryStore, MemoryLedger>,
        shots: Vec<Shot>,
        name: &str,
        overwrite: bool,
    ) -> Result<Enrollment, EngineError> {
        let cell = RefCell::new(Script::new(shots));
        let (mut shutter, mut detector, mut embedder, scorer) = (Shutter(&cell), Lens(&cell), Lens(&cell), Lens(&cell));
        let sensors = Sensors {
            source: &mut shutter,
            detector: &mut detector,
            embedder: &mut embedder,
            liveness: &scorer,
        };
        engine.enroll(sensors, name, overwrite, &AtomicBool::new(false), &mut NoProgress)
    }

    fn live_alice() -> Vec<Shot> {
        vec![face(&ALICE, 0.95)]
    }

    #[test]
    fn test_accepted_punch_is_logged() {
        let (mut engine, _) = engine(store_with_alice());
        let v = verify(&mut engine, live_alice(), ActionKind::In).unwrap();
        assert_eq!(v.decision.status, Status::Accepted);
        assert_eq!(v.decision.identity.as_deref(), Some("alice"));
        assert_eq!(v.batch.len(), 3);
        assert_eq!(v.log, LogOutcome::Logged);

        let records = &engine.ledger().records;
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].name.as_deref(), Some("alice"));
        assert_eq!(records[0].status, Status::Accepted);
        assert_eq!(records[0].rejection_kind, None);
        assert_eq!(records[0].attempt_id, v.attempt_id);
    }

    #[test]
    fn test_duplicate_punch_within_window_suppressed() {
        let (mut engine, clock) = engine(store_with_alice());
        verify(&mut engine, live_alice(), ActionKind::In).unwrap();

        clock.advance(10);
        let second = verify(&mut engine, live_alice(), ActionKind::In).unwrap();
        assert_eq!(second.decision.status, Status::Accepted);
        assert_eq!(second.log, LogOutcome::DuplicateSuppressed);
        assert_eq!(engine.ledger().records.len(), 1);

        clock.advance(60);
        let third = verify(&mut engine, live_alice(), ActionKind::In).unwrap();
        assert_eq!(third.log, LogOutcome::Logged);
        assert_eq!(engine.ledger().records.len(), 2);
    }

    #[test]
    fn test_throttle_after_accepted_punch() {
        let (mut engine, clock) = engine(store_with_alice());
        verify(&mut engine, live_alice(), ActionKind::In).unwrap();

        clock.advance(1);
        let err = verify(&mut engine, live_alice(), ActionKind::Out).unwrap_err();
        assert!(matches!(err, EngineError::Throttled { remaining_ms: 2000 }), "{err}");

        clock.advance(2);
        let v = verify(&mut engine, live_alice(), ActionKind::Out).unwrap();
        assert_eq!(v.log, LogOutcome::Logged);
    }

    #[test]
    fn test_stranger_rejected_and_logged_without_name() {
        let (mut engine, _) = engine(store_with_alice());
        let v = verify(&mut engine, vec![face(&STRANGER, 0.95)], ActionKind::In).unwrap();
        assert_eq!(v.decision.status, Status::Rejected);
        assert_eq!(
            v.decision.rejection,
            Some(RejectionKind::NoIdentity(NoIdentityCause::InsufficientEvidence))
        );
        let record = &engine.ledger().records[0];
        assert_eq!(record.name, None);
        assert_eq!(record.rejection_kind.as_deref(), Some("NO_IDENTITY"));
    }

    #[test]
    fn test_photo_attack_rejected_as_spoof() {
        let (mut engine, clock) = engine(store_with_alice());
        for _ in 0..3 {
            let v = verify(&mut engine, vec![face(&ALICE, 0.3)], ActionKind::In).unwrap();
            assert_eq!(v.decision.rejection, Some(RejectionKind::SpoofDetected));
            assert_eq!(v.log, LogOutcome::Logged);
            clock.advance(1);
        }
        assert_eq!(engine.ledger().records.len(), 3);
    }

    #[test]
    fn test_failed_append_does_not_open_duplicate_window() {
        let (mut engine, clock) = engine(store_with_alice());
        engine.ledger.fail_appends = true;
        let err = verify(&mut engine, live_alice(), ActionKind::In).unwrap_err();
        assert!(matches!(err, EngineError::Store(_)), "{err}");
        assert_eq!(engine.suppressor.last_accepted("alice", ActionKind::In), None);

        engine.ledger.fail_appends = false;
        clock.advance(10);
        let retry = verify(&mut engine, live_alice(), ActionKind::In).unwrap();
        assert_eq!(retry.decision.status, Status::Accepted);
        assert_eq!(retry.log, LogOutcome::Logged);
        assert_eq!(engine.ledger().records.len(), 1);
    }

    #[test]
    fn test_capture_failure_writes_no_record() {
        let (mut engine, _) = engine(store_with_alice());
        let err = verify(&mut engine, vec![face(&ALICE, 0.9), Shot::Fail], ActionKind::In).unwrap_err();
        assert!(matches!(err, EngineError::Collect(ref e) if e.is_capture_failure()));
        assert!(engine.ledger().records.is_empty());
    }

    #[test]
    fn test_no_face_times_out_without_record() {
        let (mut engine, _) = engine(store_with_alice());
        let err = verify(&mut engine, vec![empty()], ActionKind::In).unwrap_err();
        assert!(matches!(err, EngineError::Collect(CollectError::Timeout { .. })));
        assert!(engine.ledger().records.is_empty());
    }

    #[test]
    fn test_enroll_then_verify() {
        let (mut engine, _) = engine(MemoryStore::default());
        let shots = vec![face(&[0.9, 0.1], 0.9), face(&[0.1, 0.2], 0.1), face(&[1.1, -0.1], 0.9)];
        let e = enroll(&mut engine, shots, "  bob ", false).unwrap();
        assert_eq!(e.name, "bob");
        assert_eq!(e.samples, 20);
        assert!(!e.replaced);
        assert!(engine.identities().contains("bob"));

        let v = verify(&mut engine, vec![face(&[1.0, 0.0], 0.9)], ActionKind::In).unwrap();
        assert_eq!(v.decision.identity.as_deref(), Some("bob"));
    }

    #[test]
    fn test_enroll_existing_requires_overwrite() {
        let (mut engine, _) = engine(store_with_alice());
        let err = enroll(&mut engine, vec![face(&[0.0, 1.0], 0.9)], "alice", false).unwrap_err();
        assert!(matches!(err, EngineError::AlreadyEnrolled(ref n) if n == "alice"));
        assert_eq!(engine.identities().get("alice"), Some(&Embedding::new(ALICE.to_vec())));

        let e = enroll(&mut engine, vec![face(&[0.0, 1.0], 0.9)], "alice", true).unwrap();
        assert!(e.replaced);
        assert_eq!(engine.identities().get("alice"), Some(&Embedding::new(vec![0.0, 1.0])));
    }

    #[test]
    fn test_enroll_empty_name_rejected() {
        let (mut engine, _) = engine(MemoryStore::default());
        let err = enroll(&mut engine, live_alice(), "   ", false).unwrap_err();
        assert!(matches!(err, EngineError::InvalidName));
    }

    #[test]
    fn test_failed_save_leaves_database_unchanged() {
        let store = MemoryStore { fail_saves: true, ..store_with_alice() };
        let (mut engine, _) = engine(store);
        assert!(enroll(&mut engine, vec![face(&[0.0, 1.0], 0.9)], "alice", true).is_err());
        assert_eq!(engine.identities().get("alice"), Some(&Embedding::new(ALICE.to_vec())));
        assert!(engine.remove_identity("alice").is_err());
        assert!(engine.identities().contains("alice"));
    }

    #[test]
    fn test_remove_identity() {
        let (mut engine, _) = engine(store_with_alice());
        assert!(engine.remove_identity("alice").unwrap());
        assert!(!engine.remove_identity("alice").unwrap());
        assert!(engine.identities().is_empty());
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = EngineConfig { consensus_threshold: 2.0, ..Default::default() };
        let result = AttendanceEngine::new(config, MemoryStore::default(), MemoryLedger::default());
        assert!(matches!(result, Err(EngineError::Config(_))));
    }
}
