// ============================================================
// Layer 3 - Evaluators
// ============================================================
// Plain-Rust metrics over token sequences.
//
//   bleu      corpus-level BLEU-4 with brevity penalty, 0..100
//   accuracy  position-wise token matches over reference length, 0..100

use anyhow::{bail, Result};
use std::collections::HashMap;

use crate::domain::traits::{Evaluator, Sentence};

// ─── BLEU ─────────────────────────────────────────────────────────────────────
#[derive(Debug, Clone)]
pub struct Bleu {
    max_order: usize,
}

impl Bleu {
    pub fn new(max_order: usize) -> Self {
        Self { max_order: max_order.max(1) }
    }
}

impl Default for Bleu {
    fn default() -> Self {
        Self::new(4)
    }
}

fn ngram_counts(sentence: &[String], n: usize) -> HashMap<&[String], usize> {
    let mut counts = HashMap::new();
    if sentence.len() >= n {
        for gram in sentence.windows(n) {
            *counts.entry(gram).or_insert(0) += 1;
        }
    }
    counts
}

impl Evaluator for Bleu {
    fn name(&self) -> &str {
        "bleu"
    }

    fn evaluate(&self, decoded: &[Sentence], references: &[Sentence]) -> f64 {
        let mut matches  = vec![0usize; self.max_order];
        let mut possible = vec![0usize; self.max_order];
        let mut hyp_len  = 0usize;
        let mut ref_len  = 0usize;

        for (hyp, reference) in decoded.iter().zip(references) {
            hyp_len += hyp.len();
            ref_len += reference.len();

            for n in 1..=self.max_order {
                let hyp_grams = ngram_counts(hyp, n);
                let ref_grams = ngram_counts(reference, n);
                for (gram, count) in &hyp_grams {
                    let clip = ref_grams.get(gram).copied().unwrap_or(0);
                    matches[n - 1] += (*count).min(clip);
                }
                possible[n - 1] += hyp.len().saturating_sub(n - 1);
            }
        }

        if hyp_len == 0 || matches.iter().any(|&m| m == 0) {
            return 0.0;
        }

        let log_precision: f64 = matches
            .iter()
            .zip(&possible)
            .map(|(&m, &p)| (m as f64 / p as f64).ln())
            .sum::<f64>()
            / self.max_order as f64;

        let brevity = if hyp_len >= ref_len {
            1.0
        } else {
            (1.0 - ref_len as f64 / hyp_len as f64).exp()
        };

        100.0 * brevity * log_precision.exp()
    }
}

// ─── Token accuracy ───────────────────────────────────────────────────────────
#[derive(Debug, Clone, Default)]
pub struct TokenAccuracy;

impl Evaluator for TokenAccuracy {
    fn name(&self) -> &str {
        "accuracy"
    }

    fn evaluate(&self, decoded: &[Sentence], references: &[Sentence]) -> f64 {
        let mut correct = 0usize;
        let mut total   = 0usize;
        for (hyp, reference) in decoded.iter().zip(references) {
            total   += reference.len();
            correct += hyp
                .iter()
                .zip(reference)
                .filter(|(h, r)| h == r)
                .count();
        }
        if total == 0 {
            0.0
        } else {
            100.0 * correct as f64 / total as f64
        }
    }
}

/// Build evaluators from their names, keeping the configured order.
pub fn evaluators_from_names(names: &[String]) -> Result<Vec<Box<dyn Evaluator>>> {
    names
        .iter()
        .map(|name| -> Result<Box<dyn Evaluator>> {
            match name.trim().to_lowercase().as_str() {
                "bleu"     => Ok(Box::new(Bleu::default())),
                "accuracy" => Ok(Box::new(TokenAccuracy)),
                other      => bail!("unknown evaluator '{other}' (expected 'bleu' or 'accuracy')"),
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn s(text: &str) -> Sentence {
        text.split(' ').map(str::to_string).collect()
    }

    #[test]
    fn test_bleu_perfect_match() {
        let refs = vec![s("the cat sat on the mat")];
        let score = Bleu::default().evaluate(&refs, &refs);
        assert!((score - 100.0).abs() < 1e-9);
    }

    #[test]
    fn test_bleu_no_overlap() {
        let score = Bleu::default().evaluate(&[s("a b c d")], &[s("w x y z")]);
        assert_eq!(score, 0.0);
    }

    #[test]
    fn test_bleu_brevity_penalty() {
        let full  = Bleu::new(1).evaluate(&[s("a b c d")], &[s("a b c d")]);
        let short = Bleu::new(1).evaluate(&[s("a b")], &[s("a b c d")]);
        assert!(short < full);
        // precision 1, penalty exp(1 - 4/2)
        assert!((short - 100.0 * (-1.0f64).exp()).abs() < 1e-9);
    }

    #[test]
    fn test_accuracy() {
        let acc = TokenAccuracy.evaluate(&[s("a b x")], &[s("a b c d")]);
        assert!((acc - 50.0).abs() < 1e-9);
    }

    #[test]
    fn test_evaluators_from_names_keeps_order() {
        let evs = evaluators_from_names(&["accuracy".into(), "BLEU".into()]).unwrap();
        assert_eq!(evs[0].name(), "accuracy");
        assert_eq!(evs[1].name(), "bleu");
        assert!(evaluators_from_names(&["rouge".into()]).is_err());
    }
}
