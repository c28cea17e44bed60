// ============================================================
// Layer 3 - Domain Layer
// ============================================================
// Pure Rust types that define what the system works with.
//
// Rules for this layer:
//   - NO Burn framework types allowed here
//   - NO file I/O
//   - Only plain Rust structs, enums, and traits
//
// Everything here is unit tested without a tensor backend.

// Token ↔ id mapping and timestep encoding
pub mod vocabulary;

// A decoded sentence with its score
pub mod hypothesis;

// N-best validation score bookkeeping for checkpoint slots
pub mod ledger;

// Evaluator and Postprocess abstractions
pub mod traits;

// BLEU and token accuracy
pub mod evaluators;

// Identity and BPE-joining postprocessors
pub mod postprocess;
