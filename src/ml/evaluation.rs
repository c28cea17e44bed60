// ============================================================
// Layer 5 - Dataset Evaluation
// ============================================================
// Runs a model over a whole dataset, batch by batch in order,
// and collects
//
//   decoded sentences     postprocessed arg-max outputs
//   hypotheses            token ids + summed log-probability
//   evaluation            opt_loss, dec_loss and one score per
//                         evaluator (only if the dataset has
//                         reference targets)
//
// Losses are averaged over batches weighted by batch size.
// With `write_out` the decoded sentences go to the dataset's
// output file, one space-joined sentence per line.

use anyhow::{Context, Result};
use burn::{
    data::{dataloader::batcher::Batcher, dataset::Dataset},
    prelude::*,
};
use serde::Serialize;
use std::fs;

use crate::data::{batcher::Seq2SeqBatcher, dataset::Seq2SeqDataset};
use crate::domain::{
    hypothesis::Hypothesis,
    traits::{Evaluator, Postprocess, Sentence},
};
use crate::ml::model::Seq2SeqModel;

/// Number of validation examples printed after each validation.
pub const LOGGED_EXAMPLES: usize = 15;

/// Evaluators and postprocessing applied to every decoded dataset.
#[derive(Clone, Copy)]
pub struct Scoring<'a> {
    pub evaluators:  &'a [Box<dyn Evaluator>],
    pub postprocess: &'a dyn Postprocess,
}

impl Scoring<'_> {
    /// Name of the primary (last-listed) evaluator
    pub fn primary_name(&self) -> Option<&str> {
        self.evaluators.last().map(|e| e.name())
    }

    pub fn metric_names(&self) -> Vec<String> {
        let mut names = vec!["opt_loss".to_string(), "dec_loss".to_string()];
        names.extend(self.evaluators.iter().map(|e| e.name().to_string()));
        names
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Evaluation {
    pub opt_loss: f64,
    pub dec_loss: f64,
    /// Evaluator scores in evaluator order
    pub scores:   Vec<(String, f64)>,
}

impl Evaluation {
    pub fn get(&self, name: &str) -> Option<f64> {
        match name {
            "opt_loss" => Some(self.opt_loss),
            "dec_loss" => Some(self.dec_loss),
            _ => self.scores.iter().find(|(n, _)| n == name).map(|(_, v)| *v),
        }
    }

    /// Score of the last-listed evaluator, or the objective when there
    /// are no evaluators (lower is better then).
    pub fn primary(&self) -> f64 {
        self.scores.last().map(|(_, v)| *v).unwrap_or(self.opt_loss)
    }

    /// Values in the order of `Scoring::metric_names`
    pub fn values(&self) -> Vec<f64> {
        let mut values = vec![self.opt_loss, self.dec_loss];
        values.extend(self.scores.iter().map(|(_, v)| *v));
        values
    }
}

#[derive(Debug, Clone)]
pub struct DatasetRun {
    /// Postprocessed output sentences
    pub decoded:    Vec<Sentence>,
    /// Output sentences before postprocessing
    pub raw:        Vec<Sentence>,
    pub hypotheses: Vec<Hypothesis>,
    /// Postprocessed references, when the dataset has targets
    pub references: Option<Vec<Sentence>>,
    pub evaluation: Option<Evaluation>,
}

pub fn run_on_dataset<B: Backend>(
    model:       &Seq2SeqModel<B>,
    batcher:     &Seq2SeqBatcher<B>,
    dataset:     &Seq2SeqDataset,
    batch_size:  usize,
    global_step: usize,
    scoring:     Scoring<'_>,
    write_out:   bool,
) -> Result<DatasetRun> {
    let target_vocab = &batcher.layout().target_vocab;

    let mut raw        = Vec::with_capacity(dataset.len());
    let mut hypotheses = Vec::with_capacity(dataset.len());
    let mut opt_sum    = 0.0f64;
    let mut dec_sum    = 0.0f64;
    let mut total      = 0usize;

    for chunk in dataset.batch_dataset(batch_size.max(1)) {
        let size  = chunk.len();
        let batch = batcher.batch(chunk.into_samples());
        let out   = model.forward(&batch, global_step);

        opt_sum += out.cost.into_scalar().elem::<f64>() * size as f64;
        dec_sum += out.loss_with_decoded_ins.into_scalar().elem::<f64>() * size as f64;
        total   += size;

        let [_, steps] = out.decoded.dims();
        let ids: Vec<usize> = out
            .decoded
            .into_data()
            .convert::<i64>()
            .iter::<i64>()
            .map(|id| id.max(0) as usize)
            .collect();
        let log_probs: Vec<f64> = out
            .decoded_log_probs
            .into_data()
            .iter::<f32>()
            .map(f64::from)
            .collect();

        for (row, scores) in ids.chunks(steps).zip(log_probs.chunks(steps)) {
            raw.push(target_vocab.decode(row));
            hypotheses.push(Hypothesis::from_steps(row, scores));
        }
    }

    let decoded = scoring.postprocess.apply(raw.clone());

    if write_out {
        match dataset.output_path() {
            Some(path) => {
                let mut text = String::new();
                for sentence in &decoded {
                    text.push_str(&sentence.join(" "));
                    text.push('\n');
                }
                fs::write(path, text)
                    .with_context(|| format!("Cannot write output to '{}'", path.display()))?;
                tracing::info!("Result saved as plain text \"{}\"", path.display());
            }
            None => tracing::warn!("There is no output file for dataset: {}", dataset.name()),
        }
    }

    let references = dataset.target_series().map(|t| scoring.postprocess.apply(t));
    let evaluation = references.as_ref().map(|refs| {
        let denom = total.max(1) as f64;
        Evaluation {
            opt_loss: opt_sum / denom,
            dec_loss: dec_sum / denom,
            scores:   scoring
                .evaluators
                .iter()
                .map(|e| (e.name().to_string(), e.evaluate(&decoded, refs)))
                .collect(),
        }
    });

    Ok(DatasetRun { decoded, raw, hypotheses, references, evaluation })
}

// ─── Log Formatting ───────────────────────────────────────────────────────────

/// `name: value` for every evaluator, four spaces apart.
pub fn eval_string(evaluation: &Evaluation) -> String {
    evaluation
        .scores
        .iter()
        .map(|(name, value)| format!("{name}: {value:.2}"))
        .collect::<Vec<_>>()
        .join("    ")
}

pub fn log_evaluation(evaluation: &Evaluation, train: bool) {
    let line = format!(
        "opt. loss: {:.4}    dec. loss: {:.4}    {}",
        evaluation.opt_loss,
        evaluation.dec_loss,
        eval_string(evaluation),
    );
    if train {
        tracing::info!(phase = "train", "{}", line);
    } else {
        tracing::info!(phase = "val", "{}", line);
    }
}

pub fn log_dataset_evaluation(name: &str, evaluation: &Evaluation) {
    tracing::info!("Evaluating model on \"{}\"", name);
    tracing::info!("... optimization loss:      {:.4}", evaluation.opt_loss);
    tracing::info!("... runtime loss:           {:.4}", evaluation.dec_loss);
    for (metric, value) in &evaluation.scores {
        tracing::info!("... {:<22} {:.4}", format!("{metric}:"), value);
    }
}

/// Print the first `LOGGED_EXAMPLES` validation sentences with their
/// sources and references.
pub fn log_examples(dataset: &Seq2SeqDataset, run: &DatasetRun) {
    let references = run.references.as_deref().unwrap_or(&[]);
    tracing::info!("Examples:");
    for (i, (sample, out)) in dataset
        .samples()
        .iter()
        .zip(&run.decoded)
        .take(LOGGED_EXAMPLES)
        .enumerate()
    {
        for src in &sample.sources {
            tracing::info!("      src: {}", src.join(" "));
        }
        tracing::info!("      out: {}", out.join(" "));
        if let Some(reference) = references.get(i) {
            tracing::info!("      ref: {}", reference.join(" "));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use burn::backend::NdArray;

    use crate::data::batcher::BatchLayout;
    use crate::domain::{
        evaluators::{Bleu, TokenAccuracy},
        postprocess::Identity,
        vocabulary::Vocabulary,
    };
    use crate::ml::model::Seq2SeqConfig;

    type B = NdArray;

    fn words(s: &str) -> Vec<String> {
        s.split_whitespace().map(String::from).collect()
    }

    fn setup(max_output_len: usize) -> (Seq2SeqModel<B>, Seq2SeqBatcher<B>) {
        let device = Default::default();
        let vocab  = Vocabulary::from_sentences(&[words("a b c d e")], 20);
        let layout = Arc::new(BatchLayout {
            source_vocabs:  vec![vocab.clone()],
            target_vocab:   vocab.clone(),
            max_input_len:  8,
            max_output_len,
            copy_from:      None,
        });
        let model = Seq2SeqConfig::new(vec![vocab.len()], vocab.len(), 4, 5, 5, max_output_len)
            .with_attention_dim(3)
            .init::<B>(&device);
        (model, Seq2SeqBatcher::new(layout, device))
    }

    fn dataset(with_target: bool) -> Seq2SeqDataset {
        let sources = vec![vec![words("a b"), words("c"), words("d e a"), words("b")]];
        let target  = with_target
            .then(|| vec![words("b"), words("c d"), words("e"), words("a a")]);
        Seq2SeqDataset::from_series("val", sources, target)
    }

    fn evaluators() -> Vec<Box<dyn Evaluator>> {
        vec![Box::new(TokenAccuracy), Box::new(Bleu::new(4))]
    }

    #[test]
    fn test_run_keeps_order_and_count() {
        let (model, batcher) = setup(3);
        let evaluators = evaluators();
        let scoring = Scoring { evaluators: &evaluators, postprocess: &Identity };

        let run = run_on_dataset(&model, &batcher, &dataset(true), 3, 0, scoring, false).unwrap();
        assert_eq!(run.decoded.len(), 4);
        assert_eq!(run.hypotheses.len(), 4);
        assert!(run.decoded.iter().all(|s| s.len() <= 4));

        let evaluation = run.evaluation.unwrap();
        assert_eq!(evaluation.scores.len(), 2);
        assert_eq!(evaluation.get("bleu"), Some(evaluation.primary()));
        assert!(evaluation.opt_loss.is_finite() && evaluation.opt_loss > 0.0);
        assert_eq!(scoring.primary_name(), Some("bleu"));
        assert_eq!(scoring.metric_names().len(), evaluation.values().len());
    }

    #[test]
    fn test_no_target_gives_no_evaluation() {
        let (model, batcher) = setup(2);
        let evaluators = evaluators();
        let scoring = Scoring { evaluators: &evaluators, postprocess: &Identity };

        let run = run_on_dataset(&model, &batcher, &dataset(false), 2, 0, scoring, false).unwrap();
        assert!(run.evaluation.is_none());
        assert_eq!(run.decoded.len(), 4);
    }

    #[test]
    fn test_write_out_one_line_per_sentence() {
        let dir  = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.txt");
        let (model, batcher) = setup(2);
        let scoring = Scoring { evaluators: &[], postprocess: &Identity };

        let data = dataset(false).with_output(&path);
        let run  = run_on_dataset(&model, &batcher, &data, 3, 0, scoring, true).unwrap();

        let text = fs::read_to_string(&path).unwrap();
        assert_eq!(text.lines().count(), 4);
        for (line, sentence) in text.lines().zip(&run.decoded) {
            assert_eq!(line, sentence.join(" "));
        }
    }

    #[test]
    fn test_write_out_without_path_only_warns() {
        let (model, batcher) = setup(2);
        let scoring = Scoring { evaluators: &[], postprocess: &Identity };
        assert!(run_on_dataset(&model, &batcher, &dataset(false), 3, 0, scoring, true).is_ok());
    }

    #[test]
    fn test_eval_string_and_primary() {
        let evaluation = Evaluation {
            opt_loss: 1.5,
            dec_loss: 2.0,
            scores:   vec![("accuracy".into(), 50.0), ("bleu".into(), 12.346)],
        };
        assert_eq!(eval_string(&evaluation), "accuracy: 50.00    bleu: 12.35");
        assert_eq!(evaluation.primary(), 12.346);
        assert_eq!(evaluation.get("dec_loss"), Some(2.0));
        assert_eq!(evaluation.get("missing"), None);
    }
}
