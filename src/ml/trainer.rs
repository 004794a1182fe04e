// ============================================================
// Layer 5 — Epoch Driver
// ============================================================
// Runs the train → test → log → checkpoint cycle once per epoch.
//
//   for epoch in 1..=epochs:
//       train_epoch  shuffle, then for each batch index:
//                        ternary → relational → non-relational
//                        one train_step each
//       test_epoch   same order, eval_step, no shuffle
//       CSV row      train + test accuracies
//       checkpoint   epoch_<model>_<NN>.bin
//
// A phase whose relational and non-relational lists differ in
// length is skipped with a warning and leaves empty CSV cells.
// The ternary list may be shorter: its missing batches are
// simply not run.
//
// The driver only sees `dyn TrainableModel`; the backend is
// picked once in build_model. run_training writes run_config.json
// after the model is built and any resume checkpoint has loaded.

use anyhow::{anyhow, Result};
use burn::backend::{ndarray::NdArrayDevice, wgpu::WgpuDevice, Autodiff, NdArray, Wgpu};
use rand::{rngs::StdRng, SeedableRng};

use crate::application::train_use_case::RunConfig;
use crate::data::batcher::{axis_convert, batch_count, slice_batch, Columns};
use crate::data::dataset::{CategorySplit, SortOfClevr};
use crate::data::shuffler::shuffle_categories;
use crate::domain::error::{TrainError, TrainResult};
use crate::domain::sample::Category;
use crate::domain::traits::TrainableModel;
use crate::infra::checkpoint::CheckpointManager;
use crate::infra::metrics::{EpochMetrics, MetricsLogger, PhaseAccumulator, PhaseMetrics};
use crate::ml::learner::build_learner;
use crate::ml::model::InputLayout;

type GpuBackend = Autodiff<Wgpu>;
type CpuBackend = Autodiff<NdArray>;

// ─── Model construction ───────────────────────────────────────────────────────
/// Build the configured model on the configured backend, sized
/// from the first sample of the dataset.
pub fn build_model(cfg: &RunConfig, data: &SortOfClevr) -> Result<Box<dyn TrainableModel>> {
    let shape = data
        .input_shape()
        .ok_or_else(|| TrainError::data_format(&cfg.data_dir, "dataset contains no samples"))?;
    let layout = InputLayout::from_shape(shape)
        .ok_or_else(|| anyhow!("unsupported input shape {shape:?}"))?;
    let question_dim = data.question_len().unwrap_or_default();

    if cfg.no_gpu {
        let device = NdArrayDevice::default();
        tracing::info!("Using NdArray CPU device");
        Ok(build_learner::<CpuBackend>(cfg, layout, question_dim, &device))
    } else {
        let device = WgpuDevice::default();
        tracing::info!("Using WGPU device: {:?}", device);
        Ok(build_learner::<GpuBackend>(cfg, layout, question_dim, &device))
    }
}

// ─── Entry points ─────────────────────────────────────────────────────────────
pub fn run_training(cfg: &RunConfig, mut data: SortOfClevr, ckpt: &CheckpointManager) -> Result<()> {
    let mut model = build_model(cfg, &data)?;

    if let Some(name) = &cfg.resume {
        ckpt.resume(model.as_mut(), name)?;
    }
    // only a run that got this far may replace the config of the directory
    ckpt.save_config(cfg)?;

    let mut logger = MetricsLogger::create(&cfg.log_dir, &cfg.log_file_name())?;
    tracing::info!("Checkpoints go to '{}'", ckpt.dir().display());

    println!("Training {} model...", cfg.describe_model());
    drive_epochs(cfg, &mut data, model.as_mut(), ckpt, &mut logger)?;

    tracing::info!("Training complete! Metrics in '{}'", logger.csv_path().display());
    Ok(())
}

/// Load `checkpoint` from the model directory and run one test pass.
pub fn run_evaluation(
    cfg:        &RunConfig,
    data:       &SortOfClevr,
    ckpt:       &CheckpointManager,
    checkpoint: &str,
) -> Result<PhaseMetrics> {
    let mut model = build_model(cfg, data)?;
    ckpt.resume(model.as_mut(), checkpoint)?;

    test_epoch(&data.test, model.as_ref(), cfg.batch_size)?
        .ok_or_else(|| anyhow!("test split could not be evaluated"))
}

// ─── Epoch loop ───────────────────────────────────────────────────────────────
pub fn drive_epochs(
    cfg:    &RunConfig,
    data:   &mut SortOfClevr,
    model:  &mut dyn TrainableModel,
    ckpt:   &CheckpointManager,
    logger: &mut MetricsLogger,
) -> TrainResult<()> {
    let mut rng = StdRng::seed_from_u64(cfg.seed);

    for epoch in 1..=cfg.epochs {
        let train = train_epoch(
            epoch, &mut data.train, model, &mut rng, cfg.batch_size, cfg.log_interval,
        )?;
        let test = test_epoch(&data.test, model, cfg.batch_size)?;

        logger.log(&EpochMetrics { epoch, train, test })?;
        ckpt.save_epoch(model, epoch)?;
        tracing::info!("Checkpoint saved for epoch {}", epoch);
    }
    Ok(())
}

/// Full batches per category for this split, or why the phase
/// has to be skipped.
fn phase_batches(split: &CategorySplit, name: &'static str, batch_size: usize) -> Result<usize, String> {
    split.check_balanced(name).map_err(|e| e.to_string())?;

    let batches = batch_count(split.binary.len(), batch_size);
    if batches == 0 {
        return Err(format!(
            "{} split has {} samples per category, fewer than one batch of {}; skipping",
            name,
            split.binary.len(),
            batch_size,
        ));
    }
    Ok(batches)
}

/// `phase_batches`, with the skip reason logged as a warning.
fn runnable_batches(split: &CategorySplit, name: &'static str, batch_size: usize) -> Option<usize> {
    match phase_batches(split, name, batch_size) {
        Ok(batches) => Some(batches),
        Err(reason) => {
            tracing::warn!("{}", reason);
            None
        }
    }
}

fn columns(split: &CategorySplit) -> [Columns; 3] {
    Category::ALL.map(|c| axis_convert(split.get(c)))
}

pub fn train_epoch(
    epoch:        usize,
    split:        &mut CategorySplit,
    model:        &mut dyn TrainableModel,
    rng:          &mut StdRng,
    batch_size:   usize,
    log_interval: usize,
) -> TrainResult<Option<PhaseMetrics>> {
    let Some(batches) = runnable_batches(split, "train", batch_size) else {
        return Ok(None);
    };

    shuffle_categories(split, rng);
    let cols = columns(split);
    let len  = split.binary.len();

    let mut acc = PhaseAccumulator::new();
    for batch_idx in 0..batches {
        for category in Category::ALL {
            let batch = slice_batch(&cols[category.index()], batch_idx, batch_size);
            if batch.is_empty() {
                continue;
            }
            acc.record(category, model.train_step(&batch)?);
        }

        if batch_idx % log_interval == 0 {
            let last = |c| acc.last_accuracy(c).unwrap_or(f64::NAN);
            println!(
                "Train Epoch: {} [{}/{} ({:.0}%)] Ternary accuracy: {:.0}% | Relations accuracy: {:.0}% | Non-relations accuracy: {:.0}%",
                epoch,
                batch_idx * batch_size * 2,
                len * 2,
                100.0 * (batch_idx * batch_size) as f64 / len as f64,
                last(Category::Ternary),
                last(Category::Binary),
                last(Category::Unary),
            );
        }
    }

    tracing::debug!(
        "Epoch {} ran {} ternary, {} relational, {} non-relational batches",
        epoch,
        acc.batches(Category::Ternary),
        acc.batches(Category::Binary),
        acc.batches(Category::Unary),
    );
    let m = acc.finish();
    tracing::info!(
        "Epoch {} train loss: ternary {:.4} | relational {:.4} | non-relational {:.4}",
        epoch, m.ternary.loss, m.binary.loss, m.unary.loss,
    );
    Ok(Some(m))
}

pub fn test_epoch(
    split:      &CategorySplit,
    model:      &dyn TrainableModel,
    batch_size: usize,
) -> TrainResult<Option<PhaseMetrics>> {
    let Some(batches) = runnable_batches(split, "test", batch_size) else {
        return Ok(None);
    };

    let cols = columns(split);
    let mut acc = PhaseAccumulator::new();
    for batch_idx in 0..batches {
        for category in Category::ALL {
            let batch = slice_batch(&cols[category.index()], batch_idx, batch_size);
            if batch.is_empty() {
                continue;
            }
            acc.record(category, model.eval_step(&batch)?);
        }
    }

    let m = acc.finish();
    println!("\n {}\n", test_summary(&m));
    Ok(Some(m))
}

/// Test-phase accuracies followed by the mean losses.
fn test_summary(m: &PhaseMetrics) -> String {
    format!(
        "Test set: Ternary accuracy: {:.0}% Binary accuracy: {:.0}% | Unary accuracy: {:.0}% \
         | Ternary loss: {:.4} Binary loss: {:.4} | Unary loss: {:.4}",
        m.ternary.accuracy,
        m.binary.accuracy,
        m.unary.accuracy,
        m.ternary.loss,
        m.binary.loss,
        m.unary.loss,
    )
}
