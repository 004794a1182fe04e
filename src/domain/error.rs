// ============================================================
// Layer 3 — Error Kinds
// ============================================================
// Every failure the training system can report. The lower
// layers return these typed errors; the application and CLI
// layers wrap them in anyhow with extra context.
//
//   DataFormat             — fatal, aborts before training
//   CategoryLengthMismatch — recovered by the epoch driver
//   CheckpointLoad         — fatal at startup
//   DirectoryExists        — informational only
//   MissingModelDir        — fatal for evaluate

use std::path::PathBuf;
use thiserror::Error;

/// Result alias used by the data, ml and infra layers.
pub type TrainResult<T> = std::result::Result<T, TrainError>;

#[derive(Error, Debug)]
pub enum TrainError {
    /// Dataset file missing, unreadable, or structurally inconsistent.
    #[error("invalid dataset '{path}': {message}")]
    DataFormat { path: PathBuf, message: String },

    /// Relational and non-relational lists differ in length for one split.
    #[error(
        "not equal length for relation dataset and non-relation dataset \
         ({split}: {relational} relational vs {non_relational} non-relational)"
    )]
    CategoryLengthMismatch {
        split:          &'static str,
        relational:     usize,
        non_relational: usize,
    },

    /// Resume checkpoint missing or corrupt.
    #[error("cannot load checkpoint '{path}': {message}")]
    CheckpointLoad { path: PathBuf, message: String },

    #[error("cannot save checkpoint '{path}': {message}")]
    CheckpointSave { path: PathBuf, message: String },

    /// Model output directory already present; the run reuses it.
    #[error("directory {path} already exists")]
    DirectoryExists { path: PathBuf },

    /// `evaluate` pointed at a model directory that was never written.
    #[error("model directory {path} does not exist; run 'train' first")]
    MissingModelDir { path: PathBuf },

    #[error("batch input shape mismatch: expected {expected:?}, got {actual:?}")]
    ShapeMismatch { expected: Vec<usize>, actual: Vec<usize> },

    #[error("cannot run a step on an empty batch")]
    EmptyBatch,

    #[error("invalid configuration value for '{field}': {message}")]
    InvalidConfig { field: &'static str, message: String },

    #[error("I/O error: {context}")]
    Io {
        context: String,
        #[source]
        source:  std::io::Error,
    },

    #[error("CSV log error: {0}")]
    Csv(#[from] csv::Error),
}

impl TrainError {
    pub fn data_format(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::DataFormat { path: path.into(), message: message.into() }
    }

    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io { context: context.into(), source }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages() {
        let exists = TrainError::DirectoryExists { path: "./model".into() };
        assert_eq!(exists.to_string(), "directory ./model already exists");

        let bad = TrainError::data_format("x.pickle", "truncated");
        assert_eq!(bad.to_string(), "invalid dataset 'x.pickle': truncated");
    }

    #[test]
    fn test_mismatch_message_mentions_both_lengths() {
        let msg = TrainError::CategoryLengthMismatch {
            split: "test", relational: 100, non_relational: 50,
        }
        .to_string();
        assert!(msg.contains("100"));
        assert!(msg.contains("50"));
        assert!(msg.starts_with("not equal length"));
    }
}
