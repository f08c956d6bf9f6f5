//! Frame observation collection.
//!
//! Pulls frames from the capture source until the requested number of
//! single-face frames has been processed. Frames with zero or several faces
//! are discarded without advancing the count. Every collection is bounded
//! by a frame budget and a wall-clock timeout.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use thiserror::Error;

use crate::frame::FaceRegion;
use crate::matcher::Matcher;
use crate::sensor::{Progress, ProgressSink, SensorError, Sensors};
use crate::types::{Embedding, FrameObservation, IdentityDb, VerificationBatch};

#[derive(Error, Debug)]
pub enum CollectError {
    #[error(transparent)]
    Sensor(#[from] SensorError),
    #[error("timed out after {pulled} frames with {accepted} usable")]
    Timeout { accepted: usize, pulled: usize },
    #[error("collection aborted after {accepted} usable frames")]
    Aborted { accepted: usize },
}

impl CollectError {
    pub fn is_capture_failure(&self) -> bool {
        matches!(self, CollectError::Sensor(SensorError::Capture(_)))
    }
}

/// Limits and thresholds applied during collection.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CollectorConfig {
    /// Per-frame similarity threshold for a named vote.
    pub similarity_threshold: f32,
    /// Enrollment samples below this liveness are discarded.
    pub enrollment_liveness_min: f32,
    /// Maximum frames pulled from the source per collection.
    pub max_frames: usize,
    pub timeout: Duration,
}

/// Tracks the frame budget and deadline of one collection.
struct Budget {
    max_frames: usize,
    /// `None` when the timeout does not fit in an `Instant`.
    deadline: Option<Instant>,
    pulled: usize,
}

impl Budget {
    fn new(config: &CollectorConfig) -> Self {
        Self {
            max_frames: config.max_frames,
            deadline: Instant::now().checked_add(config.timeout),
            pulled: 0,
        }
    }

    fn take(&mut self, accepted: usize) -> Result<(), CollectError> {
        if self.pulled >= self.max_frames || self.deadline.is_some_and(|d| Instant::now() >= d) {
            return Err(CollectError::Timeout {
                accepted,
                pulled: self.pulled,
            });
        }
        self.pulled += 1;
        Ok(())
    }
}

/// Borrows the sensors for `'a` and the matcher for `'m`; the two are kept
/// apart because `Sensors<'a>` is invariant in `'a`.
pub struct ObservationCollector<'a, 'm, M: Matcher> {
    sensors: Sensors<'a>,
    matcher: &'m M,
    config: CollectorConfig,
}

impl<'a, 'm, M: Matcher> ObservationCollector<'a, 'm, M> {
    pub fn new(sensors: Sensors<'a>, matcher: &'m M, config: CollectorConfig) -> Self {
        Self {
            sensors,
            matcher,
            config,
        }
    }

    /// Pull frames until exactly one face is found, returning it.
    fn next_single_face(
        &mut self,
        budget: &mut Budget,
        accepted: usize,
        sink: &mut dyn ProgressSink,
        abort: Option<&AtomicBool>,
    ) -> Result<FaceRegion, CollectError> {
        loop {
            if abort.is_some_and(|flag| flag.load(Ordering::Relaxed)) {
                return Err(CollectError::Aborted { accepted });
            }
            budget.take(accepted)?;
            sink.tick();

            let frame = self.sensors.source.read_frame()?;
            let mut faces = self.sensors.detector.detect(&frame)?;
            if faces.len() == 1 {
                return Ok(faces.remove(0));
            }
            tracing::trace!(seq = frame.sequence, faces = faces.len(), "frame discarded");
            sink.report(&Progress::Skipped { faces: faces.len() });
        }
    }

    /// Collect a verification batch of exactly `k` observations, in frame order.
    pub fn collect(
        &mut self,
        k: usize,
        db: &IdentityDb,
        sink: &mut dyn ProgressSink,
    ) -> Result<VerificationBatch, CollectError> {
        let mut budget = Budget::new(&self.config);
        let mut batch = VerificationBatch::default();

        while batch.len() < k {
            let face = self.next_single_face(&mut budget, batch.len(), sink, None)?;
            let embedding = self.sensors.embedder.embed(&face)?;
            let best = self.matcher.best_match(&embedding, db);
            let liveness = self.sensors.liveness.score(&face).clamp(0.0, 1.0);

            let observation = FrameObservation {
                identity: best.accepted(self.config.similarity_threshold).map(str::to_string),
                similarity: best.score,
                liveness,
            };
            tracing::debug!(
                seq = face.frame_sequence,
                identity = observation.identity.as_deref().unwrap_or("UNKNOWN"),
                similarity = observation.similarity,
                liveness,
                "observation"
            );
            sink.report(&Progress::Frame {
                index: batch.len() + 1,
                total: k,
                identity: observation.identity.clone(),
                similarity: observation.similarity,
                liveness,
            });
            batch.push(observation);
        }

        tracing::debug!(pulled = budget.pulled, collected = batch.len(), "verification batch complete");
        Ok(batch)
    }

    /// Collect `n` enrollment embeddings from live-looking single-face frames.
    ///
    /// Samples scoring below the enrollment liveness minimum are dropped and
    /// do not count toward `n`. `abort` is checked before every frame.
    pub fn collect_enrollment_samples(
        &mut self,
        n: usize,
        sink: &mut dyn ProgressSink,
        abort: &AtomicBool,
    ) -> Result<Vec<Embedding>, CollectError> {
        let mut budget = Budget::new(&self.config);
        let mut samples = Vec::with_capacity(n);

        while samples.len() < n {
            let face = self.next_single_face(&mut budget, samples.len(), sink, Some(abort))?;
            let liveness = self.sensors.liveness.score(&face).clamp(0.0, 1.0);
            let accepted = liveness >= self.config.enrollment_liveness_min;
            if accepted {
                samples.push(self.sensors.embedder.embed(&face)?);
            } else {
                tracing::debug!(seq = face.frame_sequence, liveness, "enrollment sample below liveness minimum");
            }
            sink.report(&Progress::Sample {
                collected: samples.len(),
                total: n,
                accepted,
                liveness,
            });
        }

        Ok(samples)
    }
}
