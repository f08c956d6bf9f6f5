//! Contracts for the external collaborators driven by the collector:
//! capture, detection, embedding, liveness scoring and progress reporting.

use serde::Serialize;
use thiserror::Error;

use crate::frame::{FaceRegion, Frame};
use crate::types::Embedding;

#[derive(Error, Debug)]
pub enum SensorError {
    #[error("capture failed: {0}")]
    Capture(String),
    #[error("detection failed: {0}")]
    Detection(String),
    #[error("embedding failed: {0}")]
    Embedding(String),
}

/// Produces an unbounded sequence of frames.
pub trait FrameSource {
    fn read_frame(&mut self) -> Result<Frame, SensorError>;
}

/// Finds zero, one or more faces in a frame.
pub trait FaceDetector {
    fn detect(&mut self, frame: &Frame) -> Result<Vec<FaceRegion>, SensorError>;
}

/// Maps one face to a fixed-length embedding.
pub trait Embedder {
    fn embed(&mut self, face: &FaceRegion) -> Result<Embedding, SensorError>;
}

/// Heuristic liveness estimate in [0, 1]; higher = more likely live.
pub trait LivenessScorer {
    fn score(&self, face: &FaceRegion) -> f32;
}

/// The full set of collaborators one collection borrows.
pub struct Sensors<'a> {
    pub source: &'a mut dyn FrameSource,
    pub detector: &'a mut dyn FaceDetector,
    pub embedder: &'a mut dyn Embedder,
    pub liveness: &'a dyn LivenessScorer,
}

/// Progress reported upward while a collection runs.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Progress {
    /// One single-face frame accepted into a verification batch.
    Frame {
        index: usize,
        total: usize,
        identity: Option<String>,
        similarity: f32,
        liveness: f32,
    },
    /// A frame was discarded because it did not hold exactly one face.
    Skipped { faces: usize },
    /// Enrollment sample accounting.
    Sample {
        collected: usize,
        total: usize,
        accepted: bool,
        liveness: f32,
    },
}

/// Receives progress events; `tick` runs once per pulled frame so a display
/// can stay responsive while the collection loop runs.
pub trait ProgressSink {
    fn report(&mut self, progress: &Progress);

    fn tick(&mut self) {}
}

/// Sink that drops everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoProgress;

impl ProgressSink for NoProgress {
    fn report(&mut self, _progress: &Progress) {}
}

impl<F: FnMut(&Progress)> ProgressSink for F {
    fn report(&mut self, progress: &Progress) {
        self(progress)
    }
}
