// ============================================================
// Layer 4 - Corpus Loader
// ============================================================
// Reads tokenized plain-text corpora: one sentence per line,
// tokens separated by spaces. Each line goes through the
// Preprocessor before splitting.
//
// A parallel corpus is one file per series. All files of one
// dataset must have the same number of lines.

use anyhow::{bail, Context, Result};
use std::{fs, path::Path};

use crate::data::preprocessor::Preprocessor;
use crate::domain::traits::Sentence;

/// Load every line of `path` as a tokenized sentence.
pub fn load_tokenized(path: impl AsRef<Path>, preprocessor: &Preprocessor) -> Result<Vec<Sentence>> {
    let path = path.as_ref();
    let text = fs::read_to_string(path)
        .with_context(|| format!("Cannot read corpus file '{}'", path.display()))?;

    let sentences: Vec<Sentence> = text.lines().map(|l| preprocessor.tokenize(l)).collect();
    tracing::debug!("Loaded {} sentences from '{}'", sentences.len(), path.display());
    Ok(sentences)
}

/// Load several aligned series (e.g. one source file per encoder)
/// and check that they line up.
pub fn load_parallel<P: AsRef<Path>>(
    paths:        &[P],
    preprocessor: &Preprocessor,
) -> Result<Vec<Vec<Sentence>>> {
    let series: Vec<Vec<Sentence>> = paths
        .iter()
        .map(|p| load_tokenized(p, preprocessor))
        .collect::<Result<_>>()?;

    if let Some(first) = series.first() {
        for (p, s) in paths.iter().zip(&series).skip(1) {
            if s.len() != first.len() {
                bail!(
                    "'{}' has {} lines but '{}' has {}",
                    p.as_ref().display(),
                    s.len(),
                    paths[0].as_ref().display(),
                    first.len(),
                );
            }
        }
    }
    Ok(series)
}
