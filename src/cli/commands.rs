// ============================================================
// Layer 1 - CLI Commands and Arguments
// ============================================================
// Defines the two subcommands, `train` and `evaluate`, and all
// their configurable flags.
//
// Series with several files (one per encoder) are given by
// repeating the flag:
//
//   seq2seq-trainer train \
//       --train-source data/train.de --train-source data/train.en \
//       --train-target data/train.cs --output-dir runs/multi

use clap::{Args, Subcommand};
use crate::application::{evaluate_use_case::EvaluateRequest, train_use_case::TrainConfig};

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Train a sequence-to-sequence model
    Train(TrainArgs),

    /// Decode a corpus with a trained run
    Evaluate(EvaluateArgs),
}

/// All arguments for the `train` command.
#[derive(Args, Debug)]
pub struct TrainArgs {
    /// Tokenized source file, one sentence per line (repeat per encoder)
    #[arg(long = "train-source")]
    pub train_sources: Vec<String>,

    /// Tokenized target file of the training corpus
    #[arg(long)]
    pub train_target: String,

    /// Validation source files; without them part of the training data is held out
    #[arg(long = "val-source")]
    pub val_sources: Vec<String>,

    #[arg(long)]
    pub val_target: Option<String>,

    /// Test source files, decoded with the best checkpoint after training
    #[arg(long = "test-source")]
    pub test_sources: Vec<String>,

    #[arg(long)]
    pub test_target: Option<String>,

    /// Where the decoded test set goes (default: <output-dir>/test.out)
    #[arg(long)]
    pub test_output: Option<String>,

    /// Directory for checkpoints, vocabularies, config and metrics
    #[arg(long, default_value = "output")]
    pub output_dir: String,

    #[arg(long, default_value_t = false)]
    pub lowercase: bool,

    #[arg(long, default_value_t = 30_000)]
    pub max_vocab_size: usize,

    #[arg(long, default_value_t = 50)]
    pub max_input_len: usize,

    /// Maximum number of decoded tokens (the decoder runs this + 1 steps)
    #[arg(long, default_value_t = 20)]
    pub max_output_len: usize,

    #[arg(long, default_value_t = 128)]
    pub embedding_size: usize,

    #[arg(long, default_value_t = 256)]
    pub encoder_rnn_size: usize,

    #[arg(long, default_value_t = 256)]
    pub rnn_size: usize,

    /// Disable attention over the encoder states
    #[arg(long, default_value_t = false)]
    pub no_attention: bool,

    #[arg(long, default_value_t = 64)]
    pub attention_dim: usize,

    /// Index of the source series the decoder may copy words from
    #[arg(long)]
    pub copy_from: Option<usize>,

    /// Decay constant k of scheduled sampling
    #[arg(long)]
    pub scheduled_sampling: Option<f64>,

    /// Dropout probability
    #[arg(long, default_value_t = 0.0)]
    pub dropout: f64,

    /// Use noisy hard activations in the recurrent cells
    #[arg(long, default_value_t = false)]
    pub noisy: bool,

    #[arg(long, default_value_t = 64)]
    pub batch_size: usize,

    #[arg(long, default_value_t = 10)]
    pub epochs: usize,

    #[arg(long, default_value_t = 1e-3)]
    pub lr: f64,

    /// Log training-batch metrics every N steps
    #[arg(long, default_value_t = 20)]
    pub logging_period: usize,

    /// Validate every N steps
    #[arg(long, default_value_t = 500)]
    pub validation_period: usize,

    /// Number of best checkpoints to keep
    #[arg(long, default_value_t = 1)]
    pub keep_best: usize,

    /// Treat lower values of the main metric as better
    #[arg(long, default_value_t = false)]
    pub minimize: bool,

    #[arg(long, default_value_t = 42)]
    pub seed: u64,

    #[arg(long, default_value_t = 0.1)]
    pub val_fraction: f64,

    /// Evaluators, the last one decides which checkpoints are kept
    #[arg(long = "evaluator", default_values_t = vec!["bleu".to_string()])]
    pub evaluators: Vec<String>,

    /// Postprocessing of decoded sentences: identity or bpe
    #[arg(long, default_value = "identity")]
    pub postprocess: String,
}

/// Convert CLI TrainArgs into the application-layer TrainConfig.
impl From<TrainArgs> for TrainConfig {
    fn from(a: TrainArgs) -> Self {
        TrainConfig {
            train_sources:      a.train_sources,
            train_target:       a.train_target,
            val_sources:        a.val_sources,
            val_target:         a.val_target,
            test_sources:       a.test_sources,
            test_target:        a.test_target,
            test_output:        a.test_output,
            output_dir:         a.output_dir,
            lowercase:          a.lowercase,
            max_vocab_size:     a.max_vocab_size,
            max_input_len:      a.max_input_len,
            max_output_len:     a.max_output_len,
            embedding_size:     a.embedding_size,
            encoder_rnn_size:   a.encoder_rnn_size,
            rnn_size:           a.rnn_size,
            use_attention:      !a.no_attention,
            attention_dim:      a.attention_dim,
            copy_from:          a.copy_from,
            scheduled_sampling: a.scheduled_sampling,
            dropout:            a.dropout,
            noisy:              a.noisy,
            batch_size:         a.batch_size,
            epochs:             a.epochs,
            lr:                 a.lr,
            logging_period:     a.logging_period,
            validation_period:  a.validation_period,
            keep_best:          a.keep_best,
            minimize_metric:    a.minimize,
            seed:               a.seed,
            val_fraction:       a.val_fraction,
            evaluators:         a.evaluators,
            postprocess:        a.postprocess,
        }
    }
}

/// All arguments for the `evaluate` command
#[derive(Args, Debug)]
pub struct EvaluateArgs {
    /// Output directory of the training run
    #[arg(long, default_value = "output")]
    pub run_dir: String,

    /// Source file to decode (repeat per encoder)
    #[arg(long = "source")]
    pub sources: Vec<String>,

    /// Reference translations; enables scoring
    #[arg(long)]
    pub target: Option<String>,

    /// File the decoded sentences are written to
    #[arg(long)]
    pub output: String,
}

impl From<EvaluateArgs> for EvaluateRequest {
    fn from(a: EvaluateArgs) -> Self {
        EvaluateRequest { sources: a.sources, target: a.target, output: a.output }
    }
}
