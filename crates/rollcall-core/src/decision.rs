//! Confidence fusion and the ordered accept/reject gate.
//!
//! Pure: no I/O, no clock. Gates run in a fixed order and the first failing
//! gate is the single reported reason.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::consensus::{ConsensusResult, ConsensusVerdict};

/// Weights applied to averaged similarity and liveness.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FusionWeights {
    pub embedding: f32,
    pub liveness: f32,
}

impl FusionWeights {
    pub fn fuse(&self, similarity: f32, liveness: f32) -> f32 {
        self.embedding * similarity + self.liveness * liveness
    }
}

impl Default for FusionWeights {
    fn default() -> Self {
        Self {
            embedding: 0.65,
            liveness: 0.35,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Status {
    Accepted,
    Rejected,
}

impl Status {
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Accepted => "ACCEPTED",
            Status::Rejected => "REJECTED",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which consensus requirement was not met.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NoIdentityCause {
    InsufficientEvidence,
    NoConsensus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RejectionKind {
    /// Consensus produced no identity. The cause is kept for diagnostics but
    /// renders as one user-visible reason.
    NoIdentity(NoIdentityCause),
    LowSimilarity,
    SpoofDetected,
    LowConfidence,
}

impl RejectionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RejectionKind::NoIdentity(_) => "NO_IDENTITY",
            RejectionKind::LowSimilarity => "LOW_SIMILARITY",
            RejectionKind::SpoofDetected => "SPOOF_DETECTED",
            RejectionKind::LowConfidence => "LOW_CONFIDENCE",
        }
    }
}

impl fmt::Display for RejectionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Terminal output of one verification attempt.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Decision {
    pub identity: Option<String>,
    pub avg_similarity: f32,
    pub avg_liveness: f32,
    pub final_confidence: f32,
    pub status: Status,
    pub rejection: Option<RejectionKind>,
}

impl Decision {
    pub fn is_accepted(&self) -> bool {
        self.status == Status::Accepted
    }
}

/// Thresholds and weights for the decision gate.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DecisionPolicy {
    pub similarity_threshold: f32,
    pub liveness_threshold: f32,
    pub confidence_threshold: f32,
    pub weights: FusionWeights,
}

impl DecisionPolicy {
    pub fn decide(&self, consensus: &ConsensusResult) -> Decision {
        let Some(identity) = consensus.identity.clone() else {
            let cause = match consensus.verdict {
                ConsensusVerdict::NoConsensus { .. } => NoIdentityCause::NoConsensus,
                _ => NoIdentityCause::InsufficientEvidence,
            };
            return Decision {
                identity: None,
                avg_similarity: consensus.avg_similarity,
                avg_liveness: consensus.avg_liveness,
                final_confidence: 0.0,
                status: Status::Rejected,
                rejection: Some(RejectionKind::NoIdentity(cause)),
            };
        };

        let sim = consensus.avg_similarity;
        let live = consensus.avg_liveness;
        let confidence = self.weights.fuse(sim, live);

        let rejection = if sim < self.similarity_threshold {
            Some(RejectionKind::LowSimilarity)
        } else if live < self.liveness_threshold {
            Some(RejectionKind::SpoofDetected)
        } else if confidence < self.confidence_threshold {
            Some(RejectionKind::LowConfidence)
        } else {
            None
        };

        Decision {
            identity: Some(identity),
            avg_similarity: sim,
            avg_liveness: live,
            final_confidence: confidence,
            status: if rejection.is_none() { Status::Accepted } else { Status::Rejected },
            rejection,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> DecisionPolicy {
        DecisionPolicy {
            similarity_threshold: 0.82,
            liveness_threshold: 0.70,
            confidence_threshold: 0.88,
            weights: FusionWeights::default(),
        }
    }

    fn agreed(sim: f32, live: f32) -> ConsensusResult {
        ConsensusResult {
            identity: Some("Alice".into()),
            fraction: 1.0,
            avg_similarity: sim,
            avg_liveness: live,
            verdict: ConsensusVerdict::Agreed,
        }
    }

    #[test]
    fn test_low_confidence_after_fusion() {
        let d = policy().decide(&agreed(0.89, 0.775));
        assert!((d.final_confidence - 0.84975).abs() < 1e-5);
        assert_eq!(d.status, Status::Rejected);
        assert_eq!(d.rejection, Some(RejectionKind::LowConfidence));
        assert_eq!(d.identity.as_deref(), Some("Alice"));
    }

    #[test]
    fn test_accepts_when_all_gates_pass() {
        let mut p = policy();
        p.weights = FusionWeights { embedding: 0.70, liveness: 0.36 };
        let d = p.decide(&agreed(0.89, 0.775));
        assert!((d.final_confidence - 0.90).abs() < 0.01);
        assert_eq!(d.status, Status::Accepted);
        assert_eq!(d.rejection, None);
    }

    #[test]
    fn test_no_identity_rejects_with_zero_confidence() {
        let consensus = ConsensusResult {
            identity: None,
            fraction: 0.0,
            avg_similarity: 0.0,
            avg_liveness: 0.0,
            verdict: ConsensusVerdict::InsufficientEvidence { named_votes: 1 },
        };
        let d = policy().decide(&consensus);
        assert_eq!(d.status, Status::Rejected);
        assert_eq!(d.final_confidence, 0.0);
        assert_eq!(
            d.rejection,
            Some(RejectionKind::NoIdentity(NoIdentityCause::InsufficientEvidence))
        );
        assert_eq!(d.rejection.unwrap().as_str(), "NO_IDENTITY");
    }

    #[test]
    fn test_no_consensus_renders_as_no_identity() {
        let consensus = ConsensusResult {
            identity: None,
            fraction: 0.33,
            avg_similarity: 0.0,
            avg_liveness: 0.0,
            verdict: ConsensusVerdict::NoConsensus { top_votes: 1 },
        };
        let kind = policy().decide(&consensus).rejection.unwrap();
        assert_eq!(kind, RejectionKind::NoIdentity(NoIdentityCause::NoConsensus));
        assert_eq!(kind.to_string(), "NO_IDENTITY");
    }

    #[test]
    fn test_similarity_gate_runs_first() {
        // Fails similarity and liveness at once
        let d = policy().decide(&agreed(0.50, 0.10));
        assert_eq!(d.rejection, Some(RejectionKind::LowSimilarity));
    }

    #[test]
    fn test_spoof_gate() {
        let d = policy().decide(&agreed(0.95, 0.60));
        assert_eq!(d.rejection, Some(RejectionKind::SpoofDetected));
    }

    #[test]
    fn test_thresholds_are_inclusive() {
        let p = DecisionPolicy {
            similarity_threshold: 0.5,
            liveness_threshold: 0.5,
            confidence_threshold: 0.5,
            weights: FusionWeights { embedding: 0.5, liveness: 0.5 },
        };
        assert_eq!(p.decide(&agreed(0.5, 0.5)).status, Status::Accepted);
    }

    fn grid() -> Vec<f32> {
        (0..=40).map(|i| i as f32 / 40.0).collect()
    }

    #[test]
    fn test_gate_order_exhaustive() {
        let p = policy();
        for &sim in grid().iter().filter(|&&s| s < p.similarity_threshold) {
            for &live in grid().iter().filter(|&&l| l < p.liveness_threshold) {
                assert_eq!(
                    p.decide(&agreed(sim, live)).rejection,
                    Some(RejectionKind::LowSimilarity),
                    "sim={sim} live={live}"
                );
            }
        }
    }

    #[test]
    fn test_fusion_is_monotonic() {
        let p = policy();
        let values = grid();
        for (i, &sim) in values.iter().enumerate() {
            for (j, &live) in values.iter().enumerate() {
                if !p.decide(&agreed(sim, live)).is_accepted() {
                    continue;
                }
                for &higher_sim in &values[i..] {
                    assert!(
                        p.decide(&agreed(higher_sim, live)).is_accepted(),
                        "raising similarity {sim}->{higher_sim} at liveness {live} rejected"
                    );
                }
                for &higher_live in &values[j..] {
                    assert!(
                        p.decide(&agreed(sim, higher_live)).is_accepted(),
                        "raising liveness {live}->{higher_live} at similarity {sim} rejected"
                    );
                }
            }
        }
    }

    #[test]
    fn test_rejection_strings() {
        assert_eq!(RejectionKind::LowSimilarity.as_str(), "LOW_SIMILARITY");
        assert_eq!(RejectionKind::SpoofDetected.as_str(), "SPOOF_DETECTED");
        assert_eq!(RejectionKind::LowConfidence.as_str(), "LOW_CONFIDENCE");
        assert_eq!(Status::Accepted.to_string(), "ACCEPTED");
    }
}
