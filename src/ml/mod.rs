// ============================================================
// Layer 5 - ML / Model Layer (Burn)
// ============================================================
// All tensor code lives in this layer. Other layers only see
// the model through run_on_dataset and training_loop.
//
// Data flow of one batch:
//
//   source ids ──► encoder.rs ──┬──► fusion.rs ──► initial decoder state
//                               └──► attention.rs (per-position states)
//
//   decoder.rs   unrolls cell.rs twice (teacher forcing and
//                self-feeding), choosing each fed-back input
//                with step.rs, then computes losses and
//                arg-max outputs
//
//   model.rs     encoders + decoder as one Burn Module
//   evaluation.rs  run a model over a dataset, score, write out
//   trainer.rs   epochs, Adam, validation, checkpoint retention
//
// Reference: Bahdanau et al. (2015) attention
//            Gu et al. (2016) copying mechanism
//            Bengio et al. (2015) scheduled sampling
//            Gulcehre et al. (2016) noisy activation functions

/// GRU cell with optional noisy activations
pub mod cell;

/// Source sentence encoder
pub mod encoder;

/// Encoder outputs → initial decoder state
pub mod fusion;

/// Additive attention over encoder states
pub mod attention;

/// Feed-back step functions, copy scoring, scheduled sampling
pub mod step;

/// Recurrent decoder with loss and decode head
pub mod decoder;

/// Encoders + decoder
pub mod model;

/// Dataset decoding and scoring
pub mod evaluation;

/// Training driver with best-N checkpoint retention
pub mod trainer;
