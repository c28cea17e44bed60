use burn::data::dataset::Dataset;
use rand::{seq::SliceRandom, Rng};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::domain::traits::Sentence;

/// One example: a sentence per source series (one per encoder) and,
/// for training and validation data, the reference target sentence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Seq2SeqSample {
    pub sources: Vec<Sentence>,
    pub target:  Option<Sentence>,
}

/// A named collection of samples, optionally tied to a file the
/// decoded output is written to.
#[derive(Debug, Clone)]
pub struct Seq2SeqDataset {
    name:        String,
    samples:     Vec<Seq2SeqSample>,
    output_path: Option<PathBuf>,
}

impl Seq2SeqDataset {
    pub fn new(name: impl Into<String>, samples: Vec<Seq2SeqSample>) -> Self {
        Self { name: name.into(), samples, output_path: None }
    }

    /// Zip aligned source series with an optional target series.
    pub fn from_series(
        name:    impl Into<String>,
        sources: Vec<Vec<Sentence>>,
        target:  Option<Vec<Sentence>>,
    ) -> Self {
        let len = sources
            .first()
            .map(Vec::len)
            .or_else(|| target.as_ref().map(Vec::len))
            .unwrap_or(0);

        let mut source_iters: Vec<_> = sources.into_iter().map(Vec::into_iter).collect();
        let mut target_iter = target.map(Vec::into_iter);

        let samples = (0..len)
            .map(|_| Seq2SeqSample {
                sources: source_iters.iter_mut().filter_map(Iterator::next).collect(),
                target:  target_iter.as_mut().and_then(Iterator::next),
            })
            .collect();

        Self::new(name, samples)
    }

    pub fn with_output(mut self, path: impl Into<PathBuf>) -> Self {
        self.output_path = Some(path.into());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn output_path(&self) -> Option<&Path> {
        self.output_path.as_deref()
    }

    pub fn samples(&self) -> &[Seq2SeqSample] {
        &self.samples
    }

    pub fn into_samples(self) -> Vec<Seq2SeqSample> {
        self.samples
    }

    pub fn shuffle<R: Rng + ?Sized>(&mut self, rng: &mut R) {
        self.samples.shuffle(rng);
    }

    /// Split into consecutive batches of `batch_size` (the last one may be
    /// smaller). Batches have no output path.
    pub fn batch_dataset(&self, batch_size: usize) -> Vec<Seq2SeqDataset> {
        self.samples
            .chunks(batch_size.max(1))
            .enumerate()
            .map(|(i, chunk)| Seq2SeqDataset::new(format!("{}[{i}]", self.name), chunk.to_vec()))
            .collect()
    }

    /// True when every sample carries a reference target
    pub fn has_target(&self) -> bool {
        !self.samples.is_empty() && self.samples.iter().all(|s| s.target.is_some())
    }

    pub fn target_series(&self) -> Option<Vec<Sentence>> {
        self.samples.iter().map(|s| s.target.clone()).collect()
    }

    /// Source sentences of every sample, one Vec per sample
    pub fn source_series(&self) -> Vec<Vec<Sentence>> {
        self.samples.iter().map(|s| s.sources.clone()).collect()
    }
}

impl Dataset<Seq2SeqSample> for Seq2SeqDataset {
    fn get(&self, index: usize) -> Option<Seq2SeqSample> {
        self.samples.get(index).cloned()
    }

    fn len(&self) -> usize {
        self.samples.len()
    }
}
