//! Multi-frame consensus: turns a verification batch into one identity vote.
//!
//! Two independent requirements must hold before an identity is carried
//! forward: at least `min_named_votes` frames must name *some* identity, and
//! the most-voted identity must hold at least `threshold` of the full batch.
//! UNKNOWN frames therefore count against the fraction.

use serde::Serialize;

use crate::types::VerificationBatch;

/// Consensus requirements for one verification attempt.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConsensusPolicy {
    /// Minimum number of frames carrying a named (non-UNKNOWN) vote.
    pub min_named_votes: usize,
    /// Minimum fraction of the batch that must agree on the winner.
    pub threshold: f32,
}

/// Why the resolver did or did not settle on an identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "verdict", rename_all = "snake_case")]
pub enum ConsensusVerdict {
    Agreed,
    /// Fewer named votes than the policy minimum.
    InsufficientEvidence { named_votes: usize },
    /// Enough named votes, but the top identity's share was too small.
    NoConsensus { top_votes: usize },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConsensusResult {
    /// Winning identity; `None` rejects at the consensus stage.
    pub identity: Option<String>,
    /// Share of the whole batch voting for the top identity.
    pub fraction: f32,
    /// Mean similarity over frames voting for the winner (0 when rejected).
    pub avg_similarity: f32,
    /// Mean liveness over frames voting for the winner (0 when rejected).
    pub avg_liveness: f32,
    pub verdict: ConsensusVerdict,
}

impl ConsensusResult {
    fn rejected(fraction: f32, verdict: ConsensusVerdict) -> Self {
        Self {
            identity: None,
            fraction,
            avg_similarity: 0.0,
            avg_liveness: 0.0,
            verdict,
        }
    }
}

/// Thresholds are two-decimal stand-ins ("2 of 3" is configured as 0.67), so
/// a fraction may fall short of the threshold by at most half a percent, and
/// never by more than half the spacing between achievable fractions of a
/// batch of `total` frames. 2/3 therefore satisfies 0.67 while 133/200 does
/// not.
fn meets_fraction(top_votes: usize, total: usize, threshold: f32) -> bool {
    if total == 0 {
        return false;
    }
    let fraction = top_votes as f64 / total as f64;
    let slack = (0.5 / total as f64).min(0.005);
    fraction + slack + f64::from(f32::EPSILON) >= f64::from(threshold)
}

impl ConsensusPolicy {
    pub fn resolve(&self, batch: &VerificationBatch) -> ConsensusResult {
        let total = batch.len();

        // Tally in first-seen order; ties on the maximum go to the earliest.
        let mut tally: Vec<(&str, usize)> = Vec::new();
        let mut named_votes = 0usize;
        for name in batch.iter().filter_map(|o| o.identity.as_deref()) {
            named_votes += 1;
            match tally.iter_mut().find(|(n, _)| *n == name) {
                Some((_, count)) => *count += 1,
                None => tally.push((name, 1)),
            }
        }

        if named_votes < self.min_named_votes || named_votes == 0 {
            tracing::debug!(named_votes, required = self.min_named_votes, "consensus: insufficient evidence");
            return ConsensusResult::rejected(0.0, ConsensusVerdict::InsufficientEvidence { named_votes });
        }

        let mut top = tally[0];
        for &entry in &tally[1..] {
            if entry.1 > top.1 {
                top = entry;
            }
        }
        let (top_identity, top_votes) = top;

        let fraction = top_votes as f32 / total as f32;
        if !meets_fraction(top_votes, total, self.threshold) {
            tracing::debug!(
                identity = top_identity,
                top_votes,
                fraction,
                threshold = self.threshold,
                "consensus: no consensus"
            );
            return ConsensusResult::rejected(fraction, ConsensusVerdict::NoConsensus { top_votes });
        }

        let (sim_sum, live_sum) = batch
            .iter()
            .filter(|o| o.identity.as_deref() == Some(top_identity))
            .fold((0.0f64, 0.0f64), |(s, l), o| (s + o.similarity as f64, l + o.liveness as f64));
        let n = top_votes as f64;

        ConsensusResult {
            identity: Some(top_identity.to_string()),
            fraction,
            avg_similarity: (sim_sum / n) as f32,
            avg_liveness: (live_sum / n) as f32,
            verdict: ConsensusVerdict::Agreed,
        }
    }
}
