// ============================================================
// Layer 4 — Data Pipeline
// ============================================================
// Everything between the dataset pickle on disk and the plain
// batches handed to a model:
//
//   sort-of-clevr.pickle
//       │
//       ▼
//   PickleTree         → opcode stream run into a memo-shared tree
//       │                 (numpy arrays decoded by numpy.rs)
//       ▼
//   SortOfClevrLoader → six sample lists (3 categories × train/test)
//       │
//       ▼
//   shuffle_categories → fresh order per training epoch
//       │
//       ▼
//   axis_convert       → (inputs, questions, answers) columns
//       │
//       ▼
//   slice_batch        → one fixed-size Batch per batch index
//
// Nothing here depends on burn; tensors are built in Layer 5.

/// Pickle opcode stream → object tree
pub mod pickle;

/// numpy arrays, scalars and dtypes inside a pickle tree
pub mod numpy;

/// Reads and expands the dataset pickle
pub mod loader;

/// Category lists for the train and test splits
pub mod dataset;

/// Column rearrangement and batch slicing
pub mod batcher;

/// Per-epoch in-place shuffling
pub mod shuffler;
