//! rollcall-core: multi-frame face verification for attendance punches.
//!
//! A short batch of single-face observations is resolved to one identity by
//! majority vote, then similarity and liveness are fused into the confidence
//! that gates the punch. Capture, detection and embedding are supplied by the
//! caller through the traits in [`sensor`].

pub mod collector;
pub mod config;
pub mod consensus;
pub mod cooldown;
pub mod decision;
pub mod engine;
pub mod enrollment;
pub mod frame;
pub mod liveness;
pub mod matcher;
pub mod sensor;
pub mod store;
pub mod types;

pub use config::EngineConfig;
pub use consensus::{ConsensusPolicy, ConsensusResult};
pub use decision::{Decision, DecisionPolicy, RejectionKind, Status};
pub use engine::{AttendanceEngine, EngineError, Enrollment, LogOutcome, Verification};
pub use matcher::{CosineMatcher, Matcher};
pub use sensor::{Embedder, FaceDetector, FrameSource, LivenessScorer, Progress, ProgressSink, Sensors};
pub use store::{AttendanceLedger, IdentityStore, StoreError};
pub use types::{ActionKind, AttendanceRecord, Embedding, FrameObservation, IdentityDb, VerificationBatch};
