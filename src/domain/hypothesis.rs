// ============================================================
// Layer 3 - Hypothesis
// ============================================================
// A decoded sentence paired with its cumulative score.
// Decoding is arg-max per step, so there is exactly one
// hypothesis per source sentence.

use serde::{Deserialize, Serialize};

use crate::domain::vocabulary::EOS_ID;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Hypothesis {
    /// Sum of log-probabilities of the chosen tokens
    pub score:  f64,
    /// Token ids up to and including the first </s>
    pub tokens: Vec<usize>,
}

impl Hypothesis {
    /// Build a hypothesis from per-step arg-max ids and their
    /// log-probabilities, cutting both after the first `</s>`.
    pub fn from_steps(ids: &[usize], log_probs: &[f64]) -> Self {
        let end = ids
            .iter()
            .position(|&id| id == EOS_ID)
            .map(|p| p + 1)
            .unwrap_or(ids.len());
        let score = log_probs.iter().take(end).sum();
        Self { score, tokens: ids[..end].to_vec() }
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}
