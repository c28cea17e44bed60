// ============================================================
// Layer 3 - Core Traits (Abstractions)
// ============================================================
// The collaborators the training driver talks to without
// knowing their concrete type:
//
//   Evaluator   - scores decoded sentences against references
//   Postprocess - turns decoded tokens into output tokens
//
// Implementations live in evaluators.rs and postprocess.rs.

use std::fmt::Debug;

/// A sentence as a list of tokens
pub type Sentence = Vec<String>;

// ─── Evaluator ────────────────────────────────────────────────────────────────
/// Any metric comparing decoded sentences with reference sentences.
///
/// When several evaluators are configured, the LAST one is the
/// primary metric used for checkpoint selection.
pub trait Evaluator: Debug + Send + Sync {
    /// Key under which the score is logged, e.g. "bleu"
    fn name(&self) -> &str;

    /// Score `decoded` against `references` (same length, same order)
    fn evaluate(&self, decoded: &[Sentence], references: &[Sentence]) -> f64;
}

// ─── Postprocess ──────────────────────────────────────────────────────────────
/// Maps raw decoded token sequences to the token sequences that
/// get evaluated and written out.
pub trait Postprocess: Debug + Send + Sync {
    fn apply(&self, sentences: Vec<Sentence>) -> Vec<Sentence>;
}
