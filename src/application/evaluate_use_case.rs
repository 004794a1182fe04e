// ============================================================
// Layer 2 — EvaluateUseCase
// ============================================================
// Rebuilds the model a training run used (from run_config.json
// in the model directory), loads one of its checkpoints and
// runs a single pass over the test split.

use anyhow::{Context, Result};

use crate::data::loader::SortOfClevrLoader;
use crate::infra::checkpoint::CheckpointManager;
use crate::infra::metrics::PhaseMetrics;
use crate::ml::trainer::run_evaluation;

pub struct EvaluateUseCase {
    model_dir:  String,
    checkpoint: String,
    data_dir:   Option<String>,
    no_gpu:     bool,
}

impl EvaluateUseCase {
    pub fn new(
        model_dir:  String,
        checkpoint: String,
        data_dir:   Option<String>,
        no_gpu:     bool,
    ) -> Self {
        Self { model_dir, checkpoint, data_dir, no_gpu }
    }

    pub fn execute(&self) -> Result<PhaseMetrics> {
        let ckpt_manager = CheckpointManager::open(&self.model_dir)?;

        let mut cfg = ckpt_manager.load_config()?;
        cfg.no_gpu |= self.no_gpu;
        if let Some(dir) = &self.data_dir {
            cfg.data_dir = dir.clone();
        }
        tracing::info!("Evaluating {} from '{}'", cfg.describe_model(), self.model_dir);

        let data = SortOfClevrLoader::new(&cfg.data_dir, cfg.input_type)
            .load()
            .with_context(|| format!("Cannot load dataset from '{}'", cfg.data_dir))?;

        run_evaluation(&cfg, &data, &ckpt_manager, &self.checkpoint)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::train_use_case::{RunConfig, TrainUseCase};
    use crate::data::loader::tests::{bundle, write_pickle};
    use crate::domain::error::TrainError;
    use crate::domain::settings::InputType;

    #[test]
    fn test_missing_run_config_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let use_case = EvaluateUseCase::new(
            dir.path().display().to_string(),
            "epoch_RN_01.bin".to_string(),
            None,
            true,
        );
        let err = use_case.execute().unwrap_err();
        assert!(err.to_string().contains("run_config.json"));
    }

    #[test]
    fn test_missing_model_dir_is_not_created() {
        let root = tempfile::tempdir().unwrap();
        let dir  = root.path().join("typo");
        let use_case = EvaluateUseCase::new(
            dir.display().to_string(),
            "epoch_RN_01.bin".to_string(),
            None,
            true,
        );
        let err = use_case.execute().unwrap_err();
        assert!(matches!(err.downcast_ref::<TrainError>(), Some(TrainError::MissingModelDir { .. })));
        assert!(!dir.exists());
    }

    #[test]
    fn test_train_then_evaluate_on_cpu() {
        let root     = tempfile::tempdir().unwrap();
        let data_dir = root.path().join("data");
        std::fs::create_dir_all(&data_dir).unwrap();

        // 3 scenes × 2 questions per category, 4 objects × 5 features
        let table = vec![vec![0.25f32; 5]; 4];
        let rec   = |_| (table.clone(), bundle(2, 6, 0), bundle(2, 6, 2), bundle(2, 6, 4));
        write_pickle(&data_dir, InputType::Descriptors, (0..3).map(rec).collect(), vec![rec(0)]);

        let cfg = RunConfig {
            batch_size: 2,
            epochs:     1,
            no_gpu:     true,
            input_type: InputType::Descriptors,
            data_dir:   data_dir.display().to_string(),
            model_dir:  root.path().join("model").display().to_string(),
            log_dir:    root.path().join("logs").display().to_string(),
            ..RunConfig::default()
        };
        TrainUseCase::new(cfg.clone()).execute().unwrap();
        assert!(root.path().join("model/epoch_RN_01.bin").is_file());
        assert!(root.path().join("logs").join(cfg.log_file_name()).is_file());

        let metrics = EvaluateUseCase::new(cfg.model_dir.clone(), "epoch_RN_01.bin".into(), None, true)
            .execute()
            .unwrap();
        assert!((0.0..=100.0).contains(&metrics.binary.accuracy));
    }
}
