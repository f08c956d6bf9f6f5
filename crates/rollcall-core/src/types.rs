use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::decision::{Decision, Status};

/// Bounding box for a detected face, in frame pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    #[serde(default = "default_confidence")]
    pub confidence: f32,
}

fn default_confidence() -> f32 {
    1.0
}

/// Face embedding vector produced by the embedding model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Embedding {
    pub values: Vec<f32>,
}

impl Embedding {
    pub fn new(values: Vec<f32>) -> Self {
        Self { values }
    }

    pub fn dim(&self) -> usize {
        self.values.len()
    }

    /// Compute cosine similarity (`1 - cosine distance`) between two embeddings.
    ///
    /// Returns a value in [-1, 1]. Higher = more similar. A zero vector on
    /// either side scores 0.0. Mismatched lengths compare the common prefix.
    pub fn similarity(&self, other: &Embedding) -> f32 {
        let mut dot = 0.0f64;
        let mut norm_a = 0.0f64;
        let mut norm_b = 0.0f64;

        for (&a, &b) in self.values.iter().zip(other.values.iter()) {
            let (a, b) = (a as f64, b as f64);
            dot += a * b;
            norm_a += a * a;
            norm_b += b * b;
        }

        let denom = norm_a.sqrt() * norm_b.sqrt();
        if denom > 0.0 {
            (dot / denom).clamp(-1.0, 1.0) as f32
        } else {
            0.0
        }
    }
}

impl From<Vec<f32>> for Embedding {
    fn from(values: Vec<f32>) -> Self {
        Self { values }
    }
}

/// One enrolled identity: a unique name and its averaged template.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdentityTemplate {
    pub name: String,
    pub embedding: Embedding,
}

/// Name-keyed mapping of enrolled templates.
///
/// Iteration order is the key order, which makes best-match tie breaking
/// deterministic for a fixed database.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IdentityDb {
    templates: BTreeMap<String, Embedding>,
}

impl IdentityDb {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a template, returning the template it replaced.
    pub fn insert(&mut self, name: impl Into<String>, embedding: Embedding) -> Option<Embedding> {
        self.templates.insert(name.into(), embedding)
    }

    pub fn remove(&mut self, name: &str) -> Option<Embedding> {
        self.templates.remove(name)
    }

    pub fn get(&self, name: &str) -> Option<&Embedding> {
        self.templates.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.templates.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.templates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.templates.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Embedding)> {
        self.templates.iter().map(|(k, v)| (k.as_str(), v))
    }
}

impl FromIterator<IdentityTemplate> for IdentityDb {
    fn from_iter<I: IntoIterator<Item = IdentityTemplate>>(iter: I) -> Self {
        Self {
            templates: iter.into_iter().map(|t| (t.name, t.embedding)).collect(),
        }
    }
}

/// Attendance action being punched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ActionKind {
    In,
    Out,
}

impl ActionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionKind::In => "IN",
            ActionKind::Out => "OUT",
        }
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unknown action kind: {0:?} (expected IN or OUT)")]
pub struct ParseActionError(String);

impl FromStr for ActionKind {
    type Err = ParseActionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "IN" | "I" | "PUNCH-IN" => Ok(ActionKind::In),
            "OUT" | "O" | "PUNCH-OUT" => Ok(ActionKind::Out),
            _ => Err(ParseActionError(s.to_string())),
        }
    }
}

/// Per-frame evidence gathered during one verification attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameObservation {
    /// Matched identity, or `None` when the best score fell below the
    /// per-frame similarity threshold (an UNKNOWN vote).
    pub identity: Option<String>,
    pub similarity: f32,
    pub liveness: f32,
}

impl FrameObservation {
    pub fn known(name: impl Into<String>, similarity: f32, liveness: f32) -> Self {
        Self {
            identity: Some(name.into()),
            similarity,
            liveness,
        }
    }

    pub fn unknown(similarity: f32, liveness: f32) -> Self {
        Self {
            identity: None,
            similarity,
            liveness,
        }
    }

    pub fn is_unknown(&self) -> bool {
        self.identity.is_none()
    }
}

/// Ordered observations from single-face frames of one attempt.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VerificationBatch {
    observations: Vec<FrameObservation>,
}

impl VerificationBatch {
    pub fn len(&self) -> usize {
        self.observations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.observations.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, FrameObservation> {
        self.observations.iter()
    }

    pub fn observations(&self) -> &[FrameObservation] {
        &self.observations
    }

    pub(crate) fn push(&mut self, observation: FrameObservation) {
        self.observations.push(observation);
    }
}

impl From<Vec<FrameObservation>> for VerificationBatch {
    fn from(observations: Vec<FrameObservation>) -> Self {
        Self { observations }
    }
}

/// Row appended to the attendance ledger, one per non-duplicate attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttendanceRecord {
    pub attempt_id: Uuid,
    /// `None` when the attempt never settled on an identity.
    pub name: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub action: ActionKind,
    pub similarity: f32,
    pub liveness: f32,
    pub confidence: f32,
    pub status: Status,
    /// Rendered rejection reason (`NO_IDENTITY`, `LOW_SIMILARITY`, ...).
    pub rejection_kind: Option<String>,
}

impl AttendanceRecord {
    pub fn from_decision(
        attempt_id: Uuid,
        decision: &Decision,
        action: ActionKind,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            attempt_id,
            name: decision.identity.clone(),
            timestamp,
            action,
            similarity: decision.avg_similarity,
            liveness: decision.avg_liveness,
            confidence: decision.final_confidence,
            status: decision.status,
            rejection_kind: decision.rejection.map(|r| r.as_str().to_string()),
        }
    }
}
