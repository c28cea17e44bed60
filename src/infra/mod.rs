// ============================================================
// Layer 6 - Infrastructure Layer
// ============================================================
// Everything a training run leaves on disk:
//
//   checkpoint.rs        N checkpoint slots, the `best` link and
//                        the saved TrainConfig (CompactRecorder,
//                        serde_json)
//
//   metrics.rs           metrics.csv, one row per train-batch
//                        log and per validation
//
//   vocabulary_store.rs  one word-level tokenizer JSON per
//                        series, so `evaluate` reuses the ids
//                        of training

/// Checkpoint slots, best link and training config
pub mod checkpoint;

/// Training metrics CSV logger
pub mod metrics;

/// Vocabulary persistence in tokenizers format
pub mod vocabulary_store;
