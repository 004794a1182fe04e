// ============================================================
// Layer 3 — Core Traits (Abstractions)
// ============================================================
// The epoch driver only ever talks to a model through the
// TrainableModel trait. The burn-backed learner in Layer 5 is
// one implementation; tests use a scripted in-memory one.
//
//   TrainableModel
//     ├── BurnLearner<RelationNetwork>   (--model RN)
//     ├── BurnLearner<CnnMlp>            (--model CNN_MLP)
//     └── ScriptedModel                  (tests)

use std::path::Path;

use crate::domain::error::TrainResult;
use crate::domain::sample::Batch;
use crate::domain::settings::ModelVariant;

/// Scalars reported by one train or eval step.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StepOutput {
    /// Percentage of correct answers in the batch, 0–100
    pub accuracy: f64,
    /// Mean loss over the batch, non-negative
    pub loss:     f64,
}

// ─── TrainableModel ───────────────────────────────────────────────────────────
pub trait TrainableModel {
    /// Which architecture family this is; used to name checkpoints.
    fn variant(&self) -> ModelVariant;

    /// One optimisation step on the batch. Mutates parameters.
    fn train_step(&mut self, batch: &Batch) -> TrainResult<StepOutput>;

    /// Score the batch without touching parameters.
    fn eval_step(&self, batch: &Batch) -> TrainResult<StepOutput>;

    /// Persist the current parameters to `path`.
    fn save_checkpoint(&self, path: &Path) -> TrainResult<()>;

    /// Replace the current parameters with the ones stored at `path`.
    fn load_checkpoint(&mut self, path: &Path) -> TrainResult<()>;
}

#[cfg(test)]
pub(crate) mod testing {
    use std::{fs, path::Path};

    use super::*;
    use crate::domain::error::TrainError;

    /// In-memory model: "parameters" are a single step counter.
    /// Accuracy is the share of even answers in the batch, loss is
    /// `1 / (1 + steps)` so it shrinks as training proceeds.
    #[derive(Debug, Default)]
    pub struct ScriptedModel {
        pub steps:       u64,
        pub train_calls: Vec<(usize, Vec<u32>)>,
        pub eval_calls:  std::cell::RefCell<Vec<(usize, Vec<u32>)>>,
    }

    impl ScriptedModel {
        fn score(&self, batch: &Batch) -> StepOutput {
            let even = batch.answers.iter().filter(|a| *a % 2 == 0).count();
            StepOutput {
                accuracy: 100.0 * even as f64 / batch.len().max(1) as f64,
                loss:     1.0 / (1.0 + self.steps as f64),
            }
        }
    }

    impl TrainableModel for ScriptedModel {
        fn variant(&self) -> ModelVariant {
            ModelVariant::RelationNetwork
        }

        fn train_step(&mut self, batch: &Batch) -> TrainResult<StepOutput> {
            let out = self.score(batch);
            self.steps += 1;
            self.train_calls.push((batch.len(), batch.answers.clone()));
            Ok(out)
        }

        fn eval_step(&self, batch: &Batch) -> TrainResult<StepOutput> {
            self.eval_calls.borrow_mut().push((batch.len(), batch.answers.clone()));
            Ok(self.score(batch))
        }

        fn save_checkpoint(&self, path: &Path) -> TrainResult<()> {
            fs::write(path, self.steps.to_string())
                .map_err(|e| TrainError::io(format!("write {}", path.display()), e))
        }

        fn load_checkpoint(&mut self, path: &Path) -> TrainResult<()> {
            let text = fs::read_to_string(path).map_err(|e| TrainError::CheckpointLoad {
                path:    path.to_path_buf(),
                message: e.to_string(),
            })?;
            self.steps = text.trim().parse().map_err(|_| TrainError::CheckpointLoad {
                path:    path.to_path_buf(),
                message: "corrupt step counter".to_string(),
            })?;
            Ok(())
        }
    }
}
