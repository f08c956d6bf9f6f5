//! Recorded sessions.
//!
//! A session file is JSON describing what a camera saw and what the
//! detection and embedding models produced for each frame:
//!
//! ```json
//! {
//!   "repeat": true,
//!   "frames": [
//!     { "width": 4, "height": 4, "gray": [ ...16 bytes... ],
//!       "faces": [ { "bbox": { "x": 0, "y": 0, "width": 4, "height": 4 },
//!                    "embedding": [0.1, 0.9], "liveness": 0.93 } ] },
//!     { "faces": [] },
//!     { "error": "device disconnected" }
//!   ]
//! }
//! ```
//!
//! Faces without a recorded `liveness` are scored by [`TextureLiveness`]
//! on the crop cut from `gray`.

use rollcall_core::frame::{FaceRegion, Frame};
use rollcall_core::liveness::TextureLiveness;
use rollcall_core::sensor::SensorError;
use rollcall_core::types::BoundingBox;
use rollcall_core::{Embedder, Embedding, FaceDetector, FrameSource, LivenessScorer, Sensors};
use serde::Deserialize;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ReplayError {
    #[error("failed to read session {path}: {source}")]
    Read { path: String, source: std::io::Error },
    #[error("invalid session {path}: {source}")]
    Parse { path: String, source: serde_json::Error },
    #[error("frame {index}: {reason}")]
    Frame { index: usize, reason: String },
    #[error("session has no frames")]
    Empty,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RecordedFace {
    pub bbox: BoundingBox,
    pub embedding: Vec<f32>,
    #[serde(default)]
    pub liveness: Option<f32>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RecordedFrame {
    #[serde(default)]
    pub width: u32,
    #[serde(default)]
    pub height: u32,
    #[serde(default)]
    pub gray: Vec<u8>,
    #[serde(default)]
    pub faces: Vec<RecordedFace>,
    /// Capture failure reported instead of a frame.
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RecordedSession {
    pub frames: Vec<RecordedFrame>,
    /// Start over after the last frame instead of failing the capture.
    #[serde(default)]
    pub repeat: bool,
}

impl RecordedSession {
    pub fn load(path: &Path) -> Result<Self, ReplayError> {
        let text = std::fs::read_to_string(path).map_err(|source| ReplayError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let session: Self = serde_json::from_str(&text).map_err(|source| ReplayError::Parse {
            path: path.display().to_string(),
            source,
        })?;
        session.check()?;
        tracing::info!(path = %path.display(), frames = session.frames.len(), repeat = session.repeat, "session loaded");
        Ok(session)
    }

    fn check(&self) -> Result<(), ReplayError> {
        if self.frames.is_empty() {
            return Err(ReplayError::Empty);
        }
        for (index, frame) in self.frames.iter().enumerate() {
            let expected = frame.width as usize * frame.height as usize;
            if !frame.gray.is_empty() && frame.gray.len() != expected {
                return Err(ReplayError::Frame {
                    index,
                    reason: format!("gray has {} bytes, expected {expected}", frame.gray.len()),
                });
            }
            if let Some(face) = frame.faces.iter().find(|f| f.embedding.is_empty()) {
                return Err(ReplayError::Frame {
                    index,
                    reason: format!("face at ({}, {}) has an empty embedding", face.bbox.x, face.bbox.y),
                });
            }
        }
        Ok(())
    }

    fn face(&self, face: &FaceRegion) -> Option<&RecordedFace> {
        self.frames.get(face.frame_sequence as usize)?.faces.get(face.index)
    }
}

/// Camera half: walks the recorded frames in order.
pub struct ReplayCamera {
    session: Arc<RecordedSession>,
    cursor: usize,
}

impl FrameSource for ReplayCamera {
    fn read_frame(&mut self) -> Result<Frame, SensorError> {
        if self.cursor >= self.session.frames.len() {
            if !self.session.repeat {
                return Err(SensorError::Capture("recorded session exhausted".into()));
            }
            self.cursor = 0;
        }
        let index = self.cursor;
        self.cursor += 1;

        let recorded = &self.session.frames[index];
        if let Some(reason) = &recorded.error {
            return Err(SensorError::Capture(reason.clone()));
        }
        Ok(Frame {
            data: recorded.gray.clone(),
            width: recorded.width,
            height: recorded.height,
            sequence: index as u32,
        })
    }
}

/// Detection, embedding and liveness halves, answering from the recording.
pub struct ReplayModels {
    session: Arc<RecordedSession>,
    texture: TextureLiveness,
}

impl FaceDetector for ReplayModels {
    fn detect(&mut self, frame: &Frame) -> Result<Vec<FaceRegion>, SensorError> {
        let recorded = self
            .session
            .frames
            .get(frame.sequence as usize)
            .ok_or_else(|| SensorError::Detection(format!("frame {} not in session", frame.sequence)))?;
        Ok(recorded
            .faces
            .iter()
            .enumerate()
            .map(|(index, face)| FaceRegion {
                frame_sequence: frame.sequence,
                index,
                bbox: face.bbox,
                crop: frame.crop(&face.bbox),
            })
            .collect())
    }
}

impl Embedder for ReplayModels {
    fn embed(&mut self, face: &FaceRegion) -> Result<Embedding, SensorError> {
        self.session
            .face(face)
            .map(|f| Embedding::new(f.embedding.clone()))
            .ok_or_else(|| SensorError::Embedding(format!("no face {} in frame {}", face.index, face.frame_sequence)))
    }
}

impl LivenessScorer for ReplayModels {
    fn score(&self, face: &FaceRegion) -> f32 {
        match self.session.face(face).and_then(|f| f.liveness) {
            Some(recorded) => recorded,
            None => self.texture.score(face),
        }
    }
}

/// Every collaborator the engine needs, backed by one recorded session.
pub struct Replay {
    camera: ReplayCamera,
    detector: ReplayModels,
    embedder: ReplayModels,
    scorer: ReplayModels,
}

impl Replay {
    pub fn new(session: RecordedSession) -> Self {
        let session = Arc::new(session);
        let models = || ReplayModels {
            session: Arc::clone(&session),
            texture: TextureLiveness,
        };
        Self {
            camera: ReplayCamera {
                session: Arc::clone(&session),
                cursor: 0,
            },
            detector: models(),
            embedder: models(),
            scorer: models(),
        }
    }

    pub fn sensors(&mut self) -> Sensors<'_> {
        Sensors {
            source: &mut self.camera,
            detector: &mut self.detector,
            embedder: &mut self.embedder,
            liveness: &self.scorer,
        }
    }
}
