// ============================================================
// Layer 6 — Infrastructure Layer
// ============================================================
// Cross-cutting persistence used by the training loop:
//
//   checkpoint.rs — model directory, checkpoint naming,
//                   resume, run_config.json
//
//   metrics.rs    — per-batch accumulation, per-epoch
//                   averages, CSV log

/// Model directory and checkpoint files
pub mod checkpoint;

/// Epoch metrics and CSV logger
pub mod metrics;
