// ============================================================
// Layer 3 - Postprocessors
// ============================================================

use anyhow::{bail, Result};

use crate::domain::traits::{Postprocess, Sentence};

/// Leaves decoded sentences untouched.
#[derive(Debug, Clone, Default)]
pub struct Identity;

impl Postprocess for Identity {
    fn apply(&self, sentences: Vec<Sentence>) -> Vec<Sentence> {
        sentences
    }
}

/// Joins subword units split with a trailing `@@` marker,
/// e.g. `["un@@", "believ@@", "able"]` → `["unbelievable"]`.
#[derive(Debug, Clone)]
pub struct BpeJoin {
    marker: String,
}

impl Default for BpeJoin {
    fn default() -> Self {
        Self { marker: "@@".to_string() }
    }
}

impl BpeJoin {
    fn join(&self, sentence: Sentence) -> Sentence {
        let mut out     = Vec::with_capacity(sentence.len());
        let mut pending = String::new();
        for token in sentence {
            match token.strip_suffix(self.marker.as_str()) {
                Some(prefix) => pending.push_str(prefix),
                None => {
                    pending.push_str(&token);
                    out.push(std::mem::take(&mut pending));
                }
            }
        }
        // A sentence ending on an open subword still keeps its text
        if !pending.is_empty() {
            out.push(pending);
        }
        out
    }
}

impl Postprocess for BpeJoin {
    fn apply(&self, sentences: Vec<Sentence>) -> Vec<Sentence> {
        sentences.into_iter().map(|s| self.join(s)).collect()
    }
}

pub fn postprocess_from_name(name: &str) -> Result<Box<dyn Postprocess>> {
    match name.trim().to_lowercase().as_str() {
        "" | "none" | "identity" => Ok(Box::new(Identity)),
        "bpe"                    => Ok(Box::new(BpeJoin::default())),
        other => bail!("unknown postprocess '{other}' (expected 'none' or 'bpe')"),
    }
}
