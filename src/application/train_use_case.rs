// ============================================================
// Layer 2 — TrainUseCase
// ============================================================
// Orchestrates a full training run in order:
//
//   Step 1: Validate the run configuration
//   Step 2: Load and expand the dataset      (Layer 4 - data)
//   Step 3: Prepare the model directory      (Layer 6 - infra)
//   Step 4: Build, resume, save the run config
//           and run the epoch loop           (Layer 5 - ml)
//
// run_config.json is written only once the model is built and
// any resume checkpoint has loaded, so a failed start leaves the
// config of an earlier run in place.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::data::loader::SortOfClevrLoader;
use crate::domain::error::{TrainError, TrainResult};
use crate::domain::settings::{InputType, ModelVariant, RelationType};
use crate::infra::checkpoint::CheckpointManager;
use crate::ml::trainer::run_training;

// ─── Run Configuration ───────────────────────────────────────────────────────
// Created once at startup, read-only afterwards. Serialisable so
// the evaluate command can rebuild the exact same model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    pub model:         ModelVariant,
    pub batch_size:    usize,
    pub epochs:        usize,
    pub lr:            f64,
    /// Run on the CPU (NdArray) backend instead of the GPU (Wgpu) one
    pub no_gpu:        bool,
    pub seed:          u64,
    /// Print a progress line every `log_interval` batches
    pub log_interval:  usize,
    /// Checkpoint file name inside `model_dir` to start from
    pub resume:        Option<String>,
    pub relation_type: RelationType,
    pub input_type:    InputType,
    pub data_dir:      String,
    pub model_dir:     String,
    pub log_dir:       String,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            model:         ModelVariant::RelationNetwork,
            batch_size:    64,
            epochs:        25,
            lr:            1e-4,
            no_gpu:        false,
            seed:          1,
            log_interval:  10,
            resume:        None,
            relation_type: RelationType::Binary,
            input_type:    InputType::Pixels,
            data_dir:      "./data".to_string(),
            model_dir:     "./model".to_string(),
            log_dir:       ".".to_string(),
        }
    }
}

impl RunConfig {
    pub fn validate(&self) -> TrainResult<()> {
        let invalid = |field, message: &str| {
            Err(TrainError::InvalidConfig { field, message: message.to_string() })
        };
        if self.batch_size == 0 {
            return invalid("batch_size", "must be a positive integer");
        }
        if self.epochs == 0 {
            return invalid("epochs", "must be a positive integer");
        }
        if self.log_interval == 0 {
            return invalid("log_interval", "must be a positive integer");
        }
        if !(self.lr.is_finite() && self.lr > 0.0) {
            return invalid("lr", "must be a positive number");
        }
        Ok(())
    }

    /// `<model>_<input_type>_<seed>_log.csv`
    pub fn log_file_name(&self) -> String {
        format!("{}_{}_{}_log.csv", self.model, self.input_type, self.seed)
    }

    /// "RN (binary)" or "CNN_MLP"
    pub fn describe_model(&self) -> String {
        match self.model {
            ModelVariant::RelationNetwork => format!("{} ({})", self.model, self.relation_type),
            ModelVariant::CnnMlp          => self.model.to_string(),
        }
    }
}

// ─── TrainUseCase ─────────────────────────────────────────────────────────────
pub struct TrainUseCase {
    config: RunConfig,
}

impl TrainUseCase {
    pub fn new(config: RunConfig) -> Self {
        Self { config }
    }

    pub fn execute(&self) -> Result<()> {
        let cfg = &self.config;

        // ── Step 1: Validate ──────────────────────────────────────────────────
        cfg.validate()?;

        // ── Step 2: Load the dataset ──────────────────────────────────────────
        let loader = SortOfClevrLoader::new(&cfg.data_dir, cfg.input_type);
        let data   = loader
            .load()
            .with_context(|| format!("Cannot load dataset from '{}'", cfg.data_dir))?;

        // ── Step 3: Model directory ───────────────────────────────────────────
        let ckpt_manager = CheckpointManager::new(&cfg.model_dir)?;

        // ── Step 4: Model, config and epoch loop (Layer 5) ────────────────────
        run_training(cfg, data, &ckpt_manager)?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::loader::tests::{bundle, write_pickle};

    #[test]
    fn test_defaults_match_documented_values() {
        let cfg = RunConfig::default();
        assert_eq!(cfg.batch_size, 64);
        assert_eq!(cfg.epochs, 25);
        assert_eq!(cfg.lr, 1e-4);
        assert_eq!(cfg.log_interval, 10);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_log_file_name() {
        let cfg = RunConfig { model: ModelVariant::CnnMlp, seed: 7, ..RunConfig::default() };
        assert_eq!(cfg.log_file_name(), "CNN_MLP_pixels_7_log.csv");
        assert_eq!(RunConfig::default().log_file_name(), "RN_pixels_1_log.csv");
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let bad = [
            RunConfig { batch_size: 0, ..RunConfig::default() },
            RunConfig { epochs: 0, ..RunConfig::default() },
            RunConfig { log_interval: 0, ..RunConfig::default() },
            RunConfig { lr: 0.0, ..RunConfig::default() },
            RunConfig { lr: f64::NAN, ..RunConfig::default() },
        ];
        for cfg in bad {
            assert!(matches!(cfg.validate(), Err(TrainError::InvalidConfig { .. })));
        }
    }

    #[test]
    fn test_describe_model() {
        let rn = RunConfig { relation_type: RelationType::Ternary, ..RunConfig::default() };
        assert_eq!(rn.describe_model(), "RN (ternary)");
        let cnn = RunConfig { model: ModelVariant::CnnMlp, ..RunConfig::default() };
        assert_eq!(cnn.describe_model(), "CNN_MLP");
    }

    #[test]
    fn test_missing_dataset_aborts_before_training() {
        let root = tempfile::tempdir().unwrap();
        let cfg  = RunConfig {
            data_dir:  root.path().join("data").display().to_string(),
            model_dir: root.path().join("model").display().to_string(),
            ..RunConfig::default()
        };
        let err = TrainUseCase::new(cfg).execute().unwrap_err();
        assert!(matches!(err.downcast_ref::<TrainError>(), Some(TrainError::DataFormat { .. })));
        assert!(!root.path().join("model").exists());
    }

    #[test]
    fn test_failed_resume_keeps_the_previous_run_config() {
        let root     = tempfile::tempdir().unwrap();
        let data_dir = root.path().join("data");
        let model    = root.path().join("model");
        std::fs::create_dir_all(&data_dir).unwrap();
        std::fs::create_dir_all(&model).unwrap();

        let table = vec![vec![0.5f32; 5]; 4];
        let rec   = |_| (table.clone(), bundle(2, 6, 0), bundle(2, 6, 1), bundle(2, 6, 2));
        write_pickle(&data_dir, InputType::Descriptors, (0..2).map(rec).collect(), vec![rec(0)]);

        let previous = RunConfig { model: ModelVariant::CnnMlp, seed: 42, ..RunConfig::default() };
        CheckpointManager::new(&model).unwrap().save_config(&previous).unwrap();
        let before = std::fs::read_to_string(model.join("run_config.json")).unwrap();

        let cfg = RunConfig {
            batch_size: 2,
            epochs:     1,
            no_gpu:     true,
            resume:     Some("epoch_RN_07.bin".to_string()),
            input_type: InputType::Descriptors,
            data_dir:   data_dir.display().to_string(),
            model_dir:  model.display().to_string(),
            log_dir:    root.path().join("logs").display().to_string(),
            ..RunConfig::default()
        };
        let err = TrainUseCase::new(cfg.clone()).execute().unwrap_err();
        assert!(matches!(err.downcast_ref::<TrainError>(), Some(TrainError::CheckpointLoad { .. })));

        let after = std::fs::read_to_string(model.join("run_config.json")).unwrap();
        assert_eq!(after, before);
        assert!(!root.path().join("logs").join(cfg.log_file_name()).exists());
    }

    #[test]
    fn test_successful_start_writes_the_run_config() {
        let root     = tempfile::tempdir().unwrap();
        let data_dir = root.path().join("data");
        std::fs::create_dir_all(&data_dir).unwrap();

        let table = vec![vec![0.5f32; 5]; 4];
        let rec   = |_| (table.clone(), bundle(2, 6, 0), bundle(2, 6, 1), bundle(2, 6, 2));
        write_pickle(&data_dir, InputType::Descriptors, vec![rec(0)], vec![rec(1)]);

        let cfg = RunConfig {
            batch_size: 2,
            epochs:     1,
            no_gpu:     true,
            seed:       3,
            input_type: InputType::Descriptors,
            data_dir:   data_dir.display().to_string(),
            model_dir:  root.path().join("model").display().to_string(),
            log_dir:    root.path().join("logs").display().to_string(),
            ..RunConfig::default()
        };
        TrainUseCase::new(cfg.clone()).execute().unwrap();

        let saved = CheckpointManager::new(&cfg.model_dir).unwrap().load_config().unwrap();
        assert_eq!(saved.seed, 3);
        assert_eq!(saved.input_type, InputType::Descriptors);
    }
}
