// ============================================================
// Layer 4 - Data Pipeline
// ============================================================
// Everything from tokenized text files to tensor batches.
//
//   corpus files (one sentence per line)
//       │
//       ▼
//   Preprocessor      → normalises whitespace, optional lowercase
//       │
//       ▼
//   load_tokenized    → splits lines into tokens
//       │
//       ▼
//   Seq2SeqDataset    → aligned source/target samples, shuffling,
//       │               fixed-size batches (Burn Dataset trait)
//       ▼
//   Seq2SeqBatcher    → vocabulary ids → tensors (Burn Batcher trait)

/// Reads tokenized corpora
pub mod loader;

/// Cleans one corpus line before tokenisation
pub mod preprocessor;

/// Aligned samples with shuffling and batching
pub mod dataset;

/// Implements Burn's Batcher trait for seq2seq batches
pub mod batcher;

/// Seeded train/held-out split
pub mod splitter;
