// ============================================================
// Layer 2 - Application / Use Cases
// ============================================================
// This layer orchestrates all the other layers to accomplish
// one goal (training a model or decoding with a trained one).
//
// Rules for this layer:
//   - No tensor code here
//   - No argument parsing here (that's Layer 1)
//   - Only workflow coordination

// The training workflow
pub mod train_use_case;

// Decoding and scoring with a trained run
pub mod evaluate_use_case;
