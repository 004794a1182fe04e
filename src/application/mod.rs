// ============================================================
// Layer 2 — Application / Use Cases
// ============================================================
// Orchestrates the other layers for one user-level goal:
// training a model or evaluating a saved checkpoint.
//
// Rules for this layer:
//   - No tensor code here (that's Layer 5)
//   - No argument parsing here (that's Layer 1)
//   - Only workflow coordination

// The training workflow and its run configuration
pub mod train_use_case;

// One test pass over a saved checkpoint
pub mod evaluate_use_case;
