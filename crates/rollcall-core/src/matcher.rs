//! Nearest-identity search over the enrolled templates.

use crate::types::{Embedding, IdentityDb};

/// Best match of a probe against the identity database.
///
/// The score is always the best raw similarity, even when it is below any
/// acceptance threshold; thresholds are applied by callers.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchResult {
    /// Name of the highest-scoring template, `None` only for an empty database.
    pub name: Option<String>,
    /// Cosine similarity of the best match [-1, 1]; 0.0 for an empty database.
    pub score: f32,
}

impl MatchResult {
    /// The matched name if the score reaches `threshold`.
    pub fn accepted(&self, threshold: f32) -> Option<&str> {
        match &self.name {
            Some(name) if self.score >= threshold => Some(name),
            _ => None,
        }
    }
}

/// Strategy for comparing a probe embedding against enrolled templates.
pub trait Matcher {
    fn best_match(&self, probe: &Embedding, db: &IdentityDb) -> MatchResult;
}

/// Cosine similarity matcher.
///
/// Visits every template; the first template in database order wins ties.
#[derive(Debug, Clone, Copy, Default)]
pub struct CosineMatcher;

impl Matcher for CosineMatcher {
    fn best_match(&self, probe: &Embedding, db: &IdentityDb) -> MatchResult {
        let mut best_sim = f32::NEG_INFINITY;
        let mut best_name: Option<&str> = None;

        for (name, template) in db.iter() {
            let sim = probe.similarity(template);
            if sim > best_sim {
                best_sim = sim;
                best_name = Some(name);
            }
        }

        match best_name {
            Some(name) => MatchResult {
                name: Some(name.to_string()),
                score: best_sim,
            },
            None => MatchResult {
                name: None,
                score: 0.0,
            },
        }
    }
}
