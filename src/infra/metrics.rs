// ============================================================
// Layer 6 — Metrics
// ============================================================
// Per-batch scalars are collected by a PhaseAccumulator while a
// train or test pass runs, then averaged into PhaseMetrics
// (arithmetic mean per category).
//
// One CSV row is written per completed epoch:
//
//   epoch,train_acc_ternary,train_acc_rel,train_acc_norel,test_acc_ternary,test_acc_rel,test_acc_norel
//   1,41.2,48.9,55.0,43.1,50.2,61.7
//   2,...
//
// A phase that was skipped (length mismatch, no full batch)
// leaves its three cells empty.
//
// Output file: <log_dir>/<model>_<input_type>_<seed>_log.csv,
// truncated at the start of each run.

use std::{
    fs::{self, File},
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};

use crate::domain::error::{TrainError, TrainResult};
use crate::domain::sample::Category;
use crate::domain::traits::StepOutput;

pub const CSV_HEADER: [&str; 7] = [
    "epoch",
    "train_acc_ternary",
    "train_acc_rel",
    "train_acc_norel",
    "test_acc_ternary",
    "test_acc_rel",
    "test_acc_norel",
];

// ─── Averages ─────────────────────────────────────────────────────────────────
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CategoryMetrics {
    pub accuracy: f64,
    pub loss:     f64,
}

/// Six scalars for one phase: 3 categories × {accuracy, loss}.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PhaseMetrics {
    pub ternary: CategoryMetrics,
    pub binary:  CategoryMetrics,
    pub unary:   CategoryMetrics,
}

impl PhaseMetrics {
    pub fn get(&self, category: Category) -> CategoryMetrics {
        match category {
            Category::Ternary => self.ternary,
            Category::Binary  => self.binary,
            Category::Unary   => self.unary,
        }
    }
}

// ─── PhaseAccumulator ─────────────────────────────────────────────────────────
/// Collects per-batch (accuracy, loss) for each category.
#[derive(Debug, Default)]
pub struct PhaseAccumulator {
    accuracies: [Vec<f64>; 3],
    losses:     [Vec<f64>; 3],
}

impl PhaseAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, category: Category, step: StepOutput) {
        self.accuracies[category.index()].push(step.accuracy);
        self.losses[category.index()].push(step.loss);
    }

    /// Most recent accuracy of a category, if any batch ran.
    pub fn last_accuracy(&self, category: Category) -> Option<f64> {
        self.accuracies[category.index()].last().copied()
    }

    pub fn batches(&self, category: Category) -> usize {
        self.accuracies[category.index()].len()
    }

    /// Average everything. A category without batches averages to NaN.
    pub fn finish(&self) -> PhaseMetrics {
        let avg = |c: Category| CategoryMetrics {
            accuracy: mean(&self.accuracies[c.index()]),
            loss:     mean(&self.losses[c.index()]),
        };
        PhaseMetrics {
            ternary: avg(Category::Ternary),
            binary:  avg(Category::Binary),
            unary:   avg(Category::Unary),
        }
    }
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        f64::NAN
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}

/// One epoch's outcome. `None` marks a skipped phase.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EpochMetrics {
    pub epoch: usize,
    pub train: Option<PhaseMetrics>,
    pub test:  Option<PhaseMetrics>,
}

// ─── MetricsLogger ────────────────────────────────────────────────────────────
/// Writes one CSV row per epoch.
pub struct MetricsLogger {
    writer:   csv::Writer<File>,
    csv_path: PathBuf,
}

impl MetricsLogger {
    /// Create (or truncate) `dir/file_name` and write the header row.
    pub fn create(dir: impl AsRef<Path>, file_name: &str) -> TrainResult<Self> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir)
            .map_err(|e| TrainError::io(format!("cannot create log dir '{}'", dir.display()), e))?;

        let csv_path   = dir.join(file_name);
        let mut writer = csv::Writer::from_path(&csv_path)?;
        writer.write_record(CSV_HEADER)?;
        writer.flush()
            .map_err(|e| TrainError::io(format!("cannot write '{}'", csv_path.display()), e))?;

        tracing::debug!("Created metrics CSV: '{}'", csv_path.display());
        Ok(Self { writer, csv_path })
    }

    /// Append one epoch row and flush it to disk.
    pub fn log(&mut self, m: &EpochMetrics) -> TrainResult<()> {
        let mut row = vec![m.epoch.to_string()];
        for phase in [m.train, m.test] {
            for category in Category::ALL {
                row.push(match phase {
                    Some(p) => p.get(category).accuracy.to_string(),
                    None    => String::new(),
                });
            }
        }

        self.writer.write_record(&row)?;
        self.writer.flush()
            .map_err(|e| TrainError::io(format!("cannot write '{}'", self.csv_path.display()), e))?;

        tracing::debug!("Logged epoch {} metrics", m.epoch);
        Ok(())
    }

    pub fn csv_path(&self) -> &Path {
        &self.csv_path
    }
}
