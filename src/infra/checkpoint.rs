// ============================================================
// Layer 6 — Checkpoint Manager
// ============================================================
// Owns the model directory and the checkpoint naming scheme.
// The model itself knows how to serialise its parameters
// (TrainableModel::save_checkpoint / load_checkpoint); this
// manager decides where.
//
// File naming convention:
//   model/
//     run_config.json        ← RunConfig of the run that wrote this dir
//     epoch_RN_01.bin        ← parameters after epoch 1
//     epoch_RN_02.bin
//     ...
//
// Resume: `--resume epoch_RN_07.bin` is resolved inside the
// model directory and loaded before epoch 1. A missing or
// unreadable file aborts the run; there is no silent fallback
// to fresh weights.

use anyhow::{Context, Result};
use std::{
    fs,
    path::{Path, PathBuf},
};

use crate::application::train_use_case::RunConfig;
use crate::domain::error::{TrainError, TrainResult};
use crate::domain::settings::ModelVariant;
use crate::domain::traits::TrainableModel;

const CONFIG_FILE: &str = "run_config.json";

pub struct CheckpointManager {
    dir: PathBuf,
}

impl CheckpointManager {
    /// Create the model directory. An existing directory is reused
    /// and only reported.
    pub fn new(dir: impl Into<PathBuf>) -> TrainResult<Self> {
        let dir = dir.into();
        if dir.is_dir() {
            tracing::info!("{}", TrainError::DirectoryExists { path: dir.clone() });
        } else {
            fs::create_dir_all(&dir).map_err(|e| {
                TrainError::io(format!("cannot create model dir '{}'", dir.display()), e)
            })?;
        }
        Ok(Self { dir })
    }

    /// Open a model directory a training run already wrote.
    /// Nothing is created.
    pub fn open(dir: impl Into<PathBuf>) -> TrainResult<Self> {
        let dir = dir.into();
        if !dir.is_dir() {
            return Err(TrainError::MissingModelDir { path: dir });
        }
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// `<dir>/epoch_<variant>_<NN>.bin`
    pub fn checkpoint_path(&self, variant: ModelVariant, epoch: usize) -> PathBuf {
        self.dir.join(format!("epoch_{variant}_{epoch:02}.bin"))
    }

    /// Persist the model's parameters tagged with `epoch`.
    pub fn save_epoch(&self, model: &dyn TrainableModel, epoch: usize) -> TrainResult<PathBuf> {
        let path = self.checkpoint_path(model.variant(), epoch);
        model.save_checkpoint(&path)?;
        tracing::debug!("Saved checkpoint: epoch {} → '{}'", epoch, path.display());
        Ok(path)
    }

    /// Restore parameters from a checkpoint named inside the model directory.
    pub fn resume(&self, model: &mut dyn TrainableModel, name: &str) -> TrainResult<PathBuf> {
        let path = self.dir.join(name);
        if !path.is_file() {
            return Err(TrainError::CheckpointLoad {
                path,
                message: "no such checkpoint file".to_string(),
            });
        }

        tracing::info!("==> loading checkpoint {}", path.display());
        model.load_checkpoint(&path)?;
        tracing::info!("==> loaded checkpoint {}", path.display());
        Ok(path)
    }

    /// Save the run configuration so `evaluate` can rebuild the model.
    pub fn save_config(&self, cfg: &RunConfig) -> Result<()> {
        let path = self.dir.join(CONFIG_FILE);
        let json = serde_json::to_string_pretty(cfg)?;

        fs::write(&path, json)
            .with_context(|| format!("Cannot write config to '{}'", path.display()))?;

        tracing::debug!("Saved run config to '{}'", path.display());
        Ok(())
    }

    pub fn load_config(&self) -> Result<RunConfig> {
        let path = self.dir.join(CONFIG_FILE);

        let json = fs::read_to_string(&path).with_context(|| {
            format!(
                "Cannot read config from '{}'. Make sure you have run 'train' first.",
                path.display()
            )
        })?;

        serde_json::from_str(&json)
            .with_context(|| format!("Malformed run config '{}'", path.display()))
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::traits::testing::ScriptedModel;

    #[test]
    fn test_creates_missing_directory() {
        let root = tempfile::tempdir().unwrap();
        let dir  = root.path().join("model");
        CheckpointManager::new(&dir).unwrap();
        assert!(dir.is_dir());
    }

    #[test]
    fn test_existing_directory_is_reused() {
        let root = tempfile::tempdir().unwrap();
        fs::write(root.path().join("keep.txt"), "x").unwrap();
        let ckpt = CheckpointManager::new(root.path()).unwrap();
        assert_eq!(ckpt.dir(), root.path());
        assert!(root.path().join("keep.txt").exists());
    }

    #[test]
    fn test_open_never_creates_the_directory() {
        let root = tempfile::tempdir().unwrap();
        let dir  = root.path().join("model");

        let err = CheckpointManager::open(&dir).err().unwrap();
        assert!(matches!(err, TrainError::MissingModelDir { .. }));
        assert!(!dir.exists());

        fs::create_dir(&dir).unwrap();
        assert_eq!(CheckpointManager::open(&dir).unwrap().dir(), dir.as_path());
    }

    #[test]
    fn test_checkpoint_names_carry_variant_and_epoch() {
        let root = tempfile::tempdir().unwrap();
        let ckpt = CheckpointManager::new(root.path()).unwrap();
        assert_eq!(
            ckpt.checkpoint_path(ModelVariant::RelationNetwork, 3),
            root.path().join("epoch_RN_03.bin")
        );
        assert_eq!(
            ckpt.checkpoint_path(ModelVariant::CnnMlp, 12),
            root.path().join("epoch_CNN_MLP_12.bin")
        );
    }

    #[test]
    fn test_save_then_resume_restores_state() {
        let root = tempfile::tempdir().unwrap();
        let ckpt = CheckpointManager::new(root.path()).unwrap();

        let model = ScriptedModel { steps: 17, ..Default::default() };
        let path  = ckpt.save_epoch(&model, 4).unwrap();
        assert!(path.ends_with("epoch_RN_04.bin"));

        let mut fresh = ScriptedModel::default();
        ckpt.resume(&mut fresh, "epoch_RN_04.bin").unwrap();
        assert_eq!(fresh.steps, 17);
    }

    #[test]
    fn test_resume_from_missing_file_fails_loudly() {
        let root = tempfile::tempdir().unwrap();
        let ckpt = CheckpointManager::new(root.path()).unwrap();
        let mut model = ScriptedModel::default();

        let err = ckpt.resume(&mut model, "epoch_RN_99.bin").unwrap_err();
        assert!(matches!(err, TrainError::CheckpointLoad { .. }));
    }

    #[test]
    fn test_resume_from_corrupt_file_fails_loudly() {
        let root = tempfile::tempdir().unwrap();
        let ckpt = CheckpointManager::new(root.path()).unwrap();
        fs::write(root.path().join("broken.bin"), "not a number").unwrap();

        let mut model = ScriptedModel::default();
        let err = ckpt.resume(&mut model, "broken.bin").unwrap_err();
        assert!(matches!(err, TrainError::CheckpointLoad { .. }));
    }

    #[test]
    fn test_config_round_trip() {
        let root = tempfile::tempdir().unwrap();
        let ckpt = CheckpointManager::new(root.path()).unwrap();
        let cfg  = RunConfig { batch_size: 32, seed: 9, ..RunConfig::default() };

        ckpt.save_config(&cfg).unwrap();
        let loaded = ckpt.load_config().unwrap();
        assert_eq!(loaded.batch_size, 32);
        assert_eq!(loaded.seed, 9);
    }
}
