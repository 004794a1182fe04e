// ============================================================
// Layer 5 — ML / Model Layer (Burn)
// ============================================================
// All burn-specific code lives here. Layers 2–4 and 6 only see
// the TrainableModel trait and plain Rust data.
//
//   model.rs   — RelationNetwork and CnnMlp architectures,
//                shared conv extractor and output head
//
//   learner.rs — BurnLearner: TrainableModel over a burn module,
//                Adam, cross-entropy, BinFileRecorder checkpoints
//
//   trainer.rs — backend choice and the epoch driver
//                (train → test → CSV row → checkpoint)
//
// Reference: Santoro et al. (2017) A simple neural network
//            module for relational reasoning

/// Relation Network and CNN+MLP architectures
pub mod model;

/// TrainableModel implementation on top of burn
pub mod learner;

/// Epoch driver and run entry points
pub mod trainer;
