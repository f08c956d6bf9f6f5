use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

use crate::collector::CollectorConfig;
use crate::consensus::ConsensusPolicy;
use crate::decision::{DecisionPolicy, FusionWeights};

#[derive(Error, Debug, PartialEq)]
pub enum ConfigError {
    #[error("{name} must be within [0, 1], got {value}")]
    OutOfRange { name: &'static str, value: f32 },
    #[error("fusion weights must be non-negative and sum to 1, got {embedding} + {liveness}")]
    Weights { embedding: f32, liveness: f32 },
    #[error("min_frames_for_decision ({min}) must be between 1 and consensus_frames ({frames})")]
    MinFrames { min: usize, frames: usize },
    #[error("{0} must be at least 1")]
    Zero(&'static str),
    #[error("{name} must be at most {max} seconds, got {value}")]
    TooLong { name: &'static str, value: u64, max: u64 },
}

/// Upper bound for every `*_secs` setting (one week).
pub const MAX_DURATION_SECS: u64 = 7 * 24 * 60 * 60;

/// Decision thresholds, consensus sizing and enrollment parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Per-frame and averaged cosine similarity required for a match.
    pub similarity_threshold: f32,
    /// Minimum averaged liveness before a face counts as live.
    pub liveness_threshold: f32,
    /// Minimum fused confidence for acceptance.
    pub confidence_threshold: f32,
    /// Single-face frames collected per verification attempt (K).
    pub consensus_frames: usize,
    /// Share of the batch the winning identity must hold (C).
    pub consensus_threshold: f32,
    /// Minimum named votes before any identity is considered (M).
    pub min_frames_for_decision: usize,
    pub embedding_weight: f32,
    pub liveness_weight: f32,
    /// Samples averaged into one template at enrollment.
    pub enrollment_samples: usize,
    pub enrollment_liveness_min: f32,
    pub duplicate_window_secs: u64,
    /// Minimum spacing between an accepted punch and the next attempt.
    pub action_cooldown_secs: u64,
    pub max_frames_per_attempt: usize,
    pub attempt_timeout_secs: u64,
    /// Enrollment pulls many more frames than verification.
    pub enrollment_timeout_secs: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: 0.82,
            liveness_threshold: 0.70,
            confidence_threshold: 0.88,
            consensus_frames: 3,
            consensus_threshold: 0.67,
            min_frames_for_decision: 2,
            embedding_weight: 0.65,
            liveness_weight: 0.35,
            enrollment_samples: 20,
            enrollment_liveness_min: 0.75,
            duplicate_window_secs: 60,
            action_cooldown_secs: 3,
            max_frames_per_attempt: 150,
            attempt_timeout_secs: 10,
            enrollment_timeout_secs: 60,
        }
    }
}

impl EngineConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, value) in [
            ("similarity_threshold", self.similarity_threshold),
            ("liveness_threshold", self.liveness_threshold),
            ("confidence_threshold", self.confidence_threshold),
            ("consensus_threshold", self.consensus_threshold),
            ("enrollment_liveness_min", self.enrollment_liveness_min),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(ConfigError::OutOfRange { name, value });
            }
        }

        let (embedding, liveness) = (self.embedding_weight, self.liveness_weight);
        if embedding < 0.0 || liveness < 0.0 || ((embedding + liveness) - 1.0).abs() > 1e-4 {
            return Err(ConfigError::Weights { embedding, liveness });
        }

        if self.min_frames_for_decision == 0 || self.min_frames_for_decision > self.consensus_frames {
            return Err(ConfigError::MinFrames {
                min: self.min_frames_for_decision,
                frames: self.consensus_frames,
            });
        }
        if self.enrollment_samples == 0 {
            return Err(ConfigError::Zero("enrollment_samples"));
        }
        if self.max_frames_per_attempt == 0 {
            return Err(ConfigError::Zero("max_frames_per_attempt"));
        }

        for (name, value) in [
            ("duplicate_window_secs", self.duplicate_window_secs),
            ("action_cooldown_secs", self.action_cooldown_secs),
            ("attempt_timeout_secs", self.attempt_timeout_secs),
            ("enrollment_timeout_secs", self.enrollment_timeout_secs),
        ] {
            if value > MAX_DURATION_SECS {
                return Err(ConfigError::TooLong {
                    name,
                    value,
                    max: MAX_DURATION_SECS,
                });
            }
        }
        if self.attempt_timeout_secs == 0 {
            return Err(ConfigError::Zero("attempt_timeout_secs"));
        }
        if self.enrollment_timeout_secs == 0 {
            return Err(ConfigError::Zero("enrollment_timeout_secs"));
        }
        Ok(())
    }

    pub fn duplicate_window(&self) -> Result<chrono::Duration, ConfigError> {
        wall_seconds("duplicate_window_secs", self.duplicate_window_secs)
    }

    pub fn action_cooldown(&self) -> Result<chrono::Duration, ConfigError> {
        wall_seconds("action_cooldown_secs", self.action_cooldown_secs)
    }

    pub fn consensus_policy(&self) -> ConsensusPolicy {
        ConsensusPolicy {
            min_named_votes: self.min_frames_for_decision,
            threshold: self.consensus_threshold,
        }
    }

    pub fn decision_policy(&self) -> DecisionPolicy {
        DecisionPolicy {
            similarity_threshold: self.similarity_threshold,
            liveness_threshold: self.liveness_threshold,
            confidence_threshold: self.confidence_threshold,
            weights: FusionWeights {
                embedding: self.embedding_weight,
                liveness: self.liveness_weight,
            },
        }
    }

    pub fn collector_config(&self) -> CollectorConfig {
        CollectorConfig {
            similarity_threshold: self.similarity_threshold,
            enrollment_liveness_min: self.enrollment_liveness_min,
            max_frames: self.max_frames_per_attempt,
            timeout: Duration::from_secs(self.attempt_timeout_secs),
        }
    }

    /// Collector limits for enrollment: N samples need a larger budget.
    pub fn enrollment_collector_config(&self) -> CollectorConfig {
        CollectorConfig {
            max_frames: self.max_frames_per_attempt.max(self.enrollment_samples * 10),
            timeout: Duration::from_secs(self.enrollment_timeout_secs),
            ..self.collector_config()
        }
    }
}

fn wall_seconds(name: &'static str, value: u64) -> Result<chrono::Duration, ConfigError> {
    i64::try_from(value)
        .ok()
        .filter(|&secs| secs as u64 <= MAX_DURATION_SECS)
        .and_then(chrono::Duration::try_seconds)
        .ok_or(ConfigError::TooLong {
            name,
            value,
            max: MAX_DURATION_SECS,
        })
}
