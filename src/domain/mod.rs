// ============================================================
// Layer 3 — Domain Layer
// ============================================================
// Plain Rust structs, enums and traits describing the training
// problem. No burn types, no file I/O.
//
//   sample.rs   — InputDatum, Sample, Category, Batch
//   settings.rs — ModelVariant, RelationType, InputType
//   traits.rs   — TrainableModel, the seam between driver and model
//   error.rs    — TrainError

pub mod sample;

pub mod settings;

pub mod traits;

pub mod error;
