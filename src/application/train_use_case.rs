// ============================================================
// Layer 2 - TrainUseCase
// ============================================================
// Orchestrates the full training pipeline in order:
//
//   Step 1: Load the parallel corpora      (Layer 4 - data)
//   Step 2: Hold out validation data if    (Layer 4 - data)
//           no validation files are given
//   Step 3: Build / load vocabularies      (Layer 6 - infra)
//   Step 4: Save config                    (Layer 6 - infra)
//   Step 5: Build the model                (Layer 5 - ml)
//   Step 6: Run the training driver        (Layer 5 - ml)
//
// The pipeline is generic over the autodiff backend; execute()
// runs it on Autodiff<Wgpu> with a Ctrl-C handler installed.

use anyhow::{bail, Result};
use burn::tensor::backend::AutodiffBackend;
use serde::{Deserialize, Serialize};
use std::{
    path::{Path, PathBuf},
    sync::{atomic::AtomicBool, Arc},
};

use crate::data::{
    batcher::BatchLayout,
    dataset::Seq2SeqDataset,
    loader::{load_parallel, load_tokenized},
    preprocessor::Preprocessor,
    splitter::split_held_out,
};
use crate::domain::{
    evaluators::evaluators_from_names, postprocess::postprocess_from_name, vocabulary::Vocabulary,
};
use crate::infra::{
    checkpoint::CheckpointManager, metrics::MetricsLogger, vocabulary_store::VocabularyStore,
};
use crate::ml::{
    evaluation::Scoring,
    model::Seq2SeqConfig,
    trainer::{
        interrupt_flag, training_loop, TrainBackend, TrainingData, TrainingReport,
        TrainingSettings, TrainingSinks,
    },
};

/// Prefix of the checkpoint slot files in the output directory
pub const CHECKPOINT_PREFIX: &str = "variables.data";

// ─── Training Configuration ──────────────────────────────────────────────────
// All settings of a training run. Saved as JSON in the output
// directory so `evaluate` can rebuild the same architecture.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainConfig {
    pub train_sources:      Vec<String>,
    pub train_target:       String,
    pub val_sources:        Vec<String>,
    pub val_target:         Option<String>,
    pub test_sources:       Vec<String>,
    pub test_target:        Option<String>,
    pub test_output:        Option<String>,
    pub output_dir:         String,

    pub lowercase:          bool,
    pub max_vocab_size:     usize,
    pub max_input_len:      usize,
    pub max_output_len:     usize,

    pub embedding_size:     usize,
    pub encoder_rnn_size:   usize,
    pub rnn_size:           usize,
    pub use_attention:      bool,
    pub attention_dim:      usize,
    pub copy_from:          Option<usize>,
    pub scheduled_sampling: Option<f64>,
    pub dropout:            f64,
    pub noisy:              bool,

    pub batch_size:         usize,
    pub epochs:             usize,
    pub lr:                 f64,
    pub logging_period:     usize,
    pub validation_period:  usize,
    pub keep_best:          usize,
    pub minimize_metric:    bool,
    pub seed:               u64,
    /// Share of the training data held out when no validation files are given
    pub val_fraction:       f64,
    pub evaluators:         Vec<String>,
    pub postprocess:        String,
}

impl Default for TrainConfig {
    fn default() -> Self {
        Self {
            train_sources:      Vec::new(),
            train_target:       String::new(),
            val_sources:        Vec::new(),
            val_target:         None,
            test_sources:       Vec::new(),
            test_target:        None,
            test_output:        None,
            output_dir:         "output".to_string(),
            lowercase:          false,
            max_vocab_size:     30_000,
            max_input_len:      50,
            max_output_len:     20,
            embedding_size:     128,
            encoder_rnn_size:   256,
            rnn_size:           256,
            use_attention:      true,
            attention_dim:      64,
            copy_from:          None,
            scheduled_sampling: None,
            dropout:            0.0,
            noisy:              false,
            batch_size:         64,
            epochs:             10,
            lr:                 1e-3,
            logging_period:     20,
            validation_period:  500,
            keep_best:          1,
            minimize_metric:    false,
            seed:               42,
            val_fraction:       0.1,
            evaluators:         vec!["bleu".to_string()],
            postprocess:        "identity".to_string(),
        }
    }
}

impl TrainConfig {
    /// Model architecture for the given vocabulary sizes.
    pub fn model_config(&self, source_vocab_sizes: Vec<usize>, target_vocab_size: usize) -> Seq2SeqConfig {
        let copy_from = self.copy_source(source_vocab_sizes.len());
        Seq2SeqConfig::new(
            source_vocab_sizes,
            target_vocab_size,
            self.embedding_size,
            self.encoder_rnn_size,
            self.rnn_size,
            self.max_output_len,
        )
        .with_use_attention(self.use_attention)
        .with_attention_dim(self.attention_dim)
        .with_copy_from(copy_from)
        .with_scheduled_sampling(self.scheduled_sampling)
        .with_dropout(self.dropout)
        .with_noisy(self.noisy)
    }

    /// Copy source series, if it names one of `series` source series
    pub fn copy_source(&self, series: usize) -> Option<usize> {
        self.copy_from.filter(|&i| i < series)
    }

    pub fn layout(&self, source_vocabs: Vec<Vocabulary>, target_vocab: Vocabulary) -> BatchLayout {
        let copy_from = self.copy_source(source_vocabs.len());
        BatchLayout {
            source_vocabs,
            target_vocab,
            max_input_len:  self.max_input_len,
            max_output_len: self.max_output_len,
            copy_from,
        }
    }

    pub fn settings(&self) -> TrainingSettings {
        TrainingSettings {
            epochs:            self.epochs,
            batch_size:        self.batch_size,
            learning_rate:     self.lr,
            logging_period:    self.logging_period,
            validation_period: self.validation_period,
            keep_best:         self.keep_best,
            minimize_metric:   self.minimize_metric,
            seed:              self.seed,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.train_target.is_empty() {
            bail!("a training target file is required");
        }
        if self.keep_best < 1 {
            bail!("keep_best must be at least 1");
        }
        if self.batch_size < 1 {
            bail!("batch_size must be at least 1");
        }
        if self.logging_period < 1 {
            bail!("logging_period must be at least 1");
        }
        if self.validation_period < 1 {
            bail!("validation_period must be at least 1");
        }
        if self.evaluators.is_empty() {
            bail!("at least one evaluator is needed to rank checkpoints");
        }
        if !self.val_sources.is_empty() && self.val_target.is_none() {
            bail!("validation sources were given without a validation target");
        }
        if let Some(i) = self.copy_from {
            if i >= self.train_sources.len() {
                bail!("copy_from {} does not name one of the {} source series", i, self.train_sources.len());
            }
        }
        Ok(())
    }
}

/// Load a dataset from its source files and optional target file.
pub fn load_dataset(
    name:         &str,
    sources:      &[String],
    target:       Option<&str>,
    preprocessor: &Preprocessor,
) -> Result<Seq2SeqDataset> {
    let sources = load_parallel(sources, preprocessor)?;
    let target  = target.map(|t| load_tokenized(t, preprocessor)).transpose()?;

    if let (Some(first), Some(target)) = (sources.first(), &target) {
        if first.len() != target.len() {
            bail!(
                "dataset '{}': {} source sentences but {} target sentences",
                name,
                first.len(),
                target.len()
            );
        }
    }

    let dataset = Seq2SeqDataset::from_series(name, sources, target);
    tracing::info!("Loaded dataset '{}' with {} sentences", name, dataset.samples().len());
    Ok(dataset)
}

// ─── TrainUseCase ─────────────────────────────────────────────────────────────
pub struct TrainUseCase {
    config: TrainConfig,
}

impl TrainUseCase {
    pub fn new(config: TrainConfig) -> Self {
        Self { config }
    }

    /// Execute the full training pipeline end to end on the GPU backend.
    pub fn execute(&self) -> Result<TrainingReport> {
        let device = burn::backend::wgpu::WgpuDevice::default();
        tracing::info!("Using WGPU device: {:?}", device);
        let interrupt = interrupt_flag()?;
        self.execute_on::<TrainBackend>(&device, interrupt)
    }

    pub fn execute_on<B: AutodiffBackend>(
        &self,
        device:    &B::Device,
        interrupt: Arc<AtomicBool>,
    ) -> Result<TrainingReport> {
        let cfg = &self.config;
        cfg.validate()?;
        let preprocessor = Preprocessor::new(cfg.lowercase);

        // ── Step 1: Load corpora ──────────────────────────────────────────────
        let train = load_dataset("train", &cfg.train_sources, Some(&cfg.train_target), &preprocessor)?;

        // ── Step 2: Validation data ───────────────────────────────────────────
        let (train, val) = if cfg.val_sources.is_empty() {
            let (train, held_out) =
                split_held_out(train.into_samples(), 1.0 - cfg.val_fraction, cfg.seed);
            tracing::info!("Split: {} train, {} validation", train.len(), held_out.len());
            (Seq2SeqDataset::new("train", train), Seq2SeqDataset::new("val", held_out))
        } else {
            let val = load_dataset("val", &cfg.val_sources, cfg.val_target.as_deref(), &preprocessor)?;
            (train, val)
        };
        if val.samples().is_empty() {
            bail!("the validation set is empty");
        }

        let output_dir = PathBuf::from(&cfg.output_dir);
        let tests = if cfg.test_sources.is_empty() {
            Vec::new()
        } else {
            let output = cfg
                .test_output
                .as_ref()
                .map(PathBuf::from)
                .unwrap_or_else(|| output_dir.join("test.out"));
            vec![load_dataset("test", &cfg.test_sources, cfg.test_target.as_deref(), &preprocessor)?
                .with_output(output)]
        };

        // ── Step 3: Vocabularies ──────────────────────────────────────────────
        let store = VocabularyStore::new(&output_dir);
        let source_vocabs = train
            .source_series()
            .iter()
            .enumerate()
            .map(|(i, series)| store.load_or_build(&format!("source{i}"), series, cfg.max_vocab_size))
            .collect::<Result<Vec<_>>>()?;
        let target_sentences = train.target_series().unwrap_or_default();
        let target_vocab = store.load_or_build("target", &target_sentences, cfg.max_vocab_size)?;

        // ── Step 4: Config, checkpoints, metrics ──────────────────────────────
        let checkpoints = CheckpointManager::new(&output_dir, CHECKPOINT_PREFIX, cfg.keep_best)?;
        checkpoints.save_config(cfg)?;

        let evaluators  = evaluators_from_names(&cfg.evaluators)?;
        let postprocess = postprocess_from_name(&cfg.postprocess)?;
        let scoring     = Scoring { evaluators: &evaluators, postprocess: postprocess.as_ref() };
        let metrics     = MetricsLogger::new(&output_dir, &scoring.metric_names())?;

        // ── Step 5: Model ─────────────────────────────────────────────────────
        let model_cfg = cfg.model_config(
            source_vocabs.iter().map(Vocabulary::len).collect(),
            target_vocab.len(),
        );
        let model = model_cfg.init::<B>(device);
        tracing::info!(
            "Model ready: {} encoder(s), rnn_size={}, {} parameters",
            model.encoders.len(),
            cfg.rnn_size,
            burn::module::Module::num_params(&model),
        );

        // ── Step 6: Training driver (Layer 5) ─────────────────────────────────
        let layout = Arc::new(cfg.layout(source_vocabs, target_vocab));
        let sinks  = TrainingSinks { checkpoints: &checkpoints, metrics: &metrics, interrupt };
        let data   = TrainingData { train, val, tests };

        let (_, report) = training_loop(model, &cfg.settings(), data, layout, scoring, &sinks, device)?;
        Ok(report)
    }

    pub fn output_dir(&self) -> &Path {
        Path::new(&self.config.output_dir)
    }
}
