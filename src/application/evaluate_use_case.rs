// ============================================================
// Layer 2 - EvaluateUseCase
// ============================================================
// Decodes a source corpus with a trained run:
//
//   1. Reload train_config.json from the run directory
//   2. Reload the vocabularies saved at training time
//   3. Rebuild the architecture and restore the best checkpoint
//   4. Run the corpus through run_on_dataset, writing the
//      output file and scoring against references if given
//
// Evaluation runs on the plain (non-autodiff) backend, so
// dropout and activation noise are off.

use anyhow::{bail, Result};
use burn::prelude::*;
use std::{path::Path, sync::Arc};

use crate::application::train_use_case::{load_dataset, TrainConfig, CHECKPOINT_PREFIX};
use crate::data::{batcher::Seq2SeqBatcher, preprocessor::Preprocessor};
use crate::domain::{
    evaluators::evaluators_from_names,
    postprocess::postprocess_from_name,
    traits::{Evaluator, Postprocess},
    vocabulary::Vocabulary,
};
use crate::infra::{checkpoint::CheckpointManager, vocabulary_store::VocabularyStore};
use crate::ml::{
    evaluation::{log_dataset_evaluation, run_on_dataset, DatasetRun, Scoring},
    model::Seq2SeqModel,
    trainer::EvalBackend,
};

/// What to decode and where to put the result.
#[derive(Debug, Clone)]
pub struct EvaluateRequest {
    pub sources: Vec<String>,
    pub target:  Option<String>,
    pub output:  String,
}

pub struct EvaluateUseCase<B: Backend> {
    config:      TrainConfig,
    model:       Seq2SeqModel<B>,
    batcher:     Seq2SeqBatcher<B>,
    evaluators:  Vec<Box<dyn Evaluator>>,
    postprocess: Box<dyn Postprocess>,
}

impl EvaluateUseCase<EvalBackend> {
    pub fn new(run_dir: impl AsRef<Path>) -> Result<Self> {
        let device = burn::backend::wgpu::WgpuDevice::default();
        Self::load(run_dir, &device)
    }
}

impl<B: Backend> EvaluateUseCase<B> {
    pub fn load(run_dir: impl AsRef<Path>, device: &B::Device) -> Result<Self> {
        let run_dir = run_dir.as_ref();
        let config  = CheckpointManager::new(run_dir, CHECKPOINT_PREFIX, 1)?.load_config()?;
        let ckpt    = CheckpointManager::new(run_dir, CHECKPOINT_PREFIX, config.keep_best)?;

        let store = VocabularyStore::new(run_dir);
        let source_vocabs = (0..config.train_sources.len())
            .map(|i| store.load(&format!("source{i}")))
            .collect::<Result<Vec<_>>>()?;
        let target_vocab = store.load("target")?;

        let model_cfg = config.model_config(
            source_vocabs.iter().map(Vocabulary::len).collect(),
            target_vocab.len(),
        );
        let model = ckpt.load_best(model_cfg.init::<B>(device), device)?;
        tracing::info!("Restored model from '{}'", run_dir.display());

        let layout  = Arc::new(config.layout(source_vocabs, target_vocab));
        let batcher = Seq2SeqBatcher::new(layout, device.clone());

        Ok(Self {
            evaluators:  evaluators_from_names(&config.evaluators)?,
            postprocess: postprocess_from_name(&config.postprocess)?,
            config,
            model,
            batcher,
        })
    }

    pub fn execute(&self, request: &EvaluateRequest) -> Result<DatasetRun> {
        if request.sources.len() != self.config.train_sources.len() {
            bail!(
                "the model has {} encoder(s) but {} source file(s) were given",
                self.config.train_sources.len(),
                request.sources.len()
            );
        }

        let preprocessor = Preprocessor::new(self.config.lowercase);
        let dataset = load_dataset("evaluate", &request.sources, request.target.as_deref(), &preprocessor)?
            .with_output(&request.output);

        let scoring = Scoring { evaluators: &self.evaluators, postprocess: self.postprocess.as_ref() };
        let run = run_on_dataset(
            &self.model,
            &self.batcher,
            &dataset,
            self.config.batch_size,
            0,
            scoring,
            true,
        )?;

        if let Some(evaluation) = &run.evaluation {
            log_dataset_evaluation(dataset.name(), evaluation);
        }
        Ok(run)
    }
}
