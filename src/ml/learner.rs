// ============================================================
// Layer 5 — BurnLearner
// ============================================================
// Adapts a burn module + optimiser to the TrainableModel trait
// used by the epoch driver.
//
//   train_step:  Batch → tensors → forward → CE loss → backward
//                → Adam step (model = optim.step(lr, model, grads))
//   eval_step:   Batch → tensors → model.valid().forward → CE loss
//
// model.valid() returns the module on the inner backend, which
// turns dropout off and makes batch norm use its running stats.
//
// Checkpoints are written with BinFileRecorder at full precision.

use std::path::Path;

use burn::{
    module::AutodiffModule,
    nn::loss::CrossEntropyLossConfig,
    optim::{AdamConfig, GradientsParams, Optimizer},
    prelude::*,
    record::{BinFileRecorder, FullPrecisionSettings, RecorderError},
    tensor::backend::AutodiffBackend,
};

use crate::application::train_use_case::RunConfig;
use crate::domain::error::{TrainError, TrainResult};
use crate::domain::sample::Batch;
use crate::domain::settings::{ModelVariant, RelationType};
use crate::domain::traits::{StepOutput, TrainableModel};
use crate::ml::model::{
    Classifier, CnnMlp, CnnMlpConfig, InputLayout, ModelInput, RelationNetwork,
    RelationNetworkConfig,
};

/// Size of the answer vocabulary
pub const ANSWER_CLASSES: usize = 10;

type CheckpointRecorder = BinFileRecorder<FullPrecisionSettings>;

pub struct BurnLearner<B, M, O>
where
    B: AutodiffBackend,
    M: AutodiffModule<B> + Classifier<B>,
    M::InnerModule: Classifier<B::InnerBackend>,
    O: Optimizer<M, B>,
{
    model:        M,
    optim:        O,
    lr:           f64,
    layout:       InputLayout,
    question_dim: usize,
    variant:      ModelVariant,
    device:       B::Device,
}

impl<B, M, O> BurnLearner<B, M, O>
where
    B: AutodiffBackend,
    M: AutodiffModule<B> + Classifier<B>,
    M::InnerModule: Classifier<B::InnerBackend>,
    O: Optimizer<M, B>,
{
    pub fn new(
        model:        M,
        optim:        O,
        lr:           f64,
        layout:       InputLayout,
        question_dim: usize,
        variant:      ModelVariant,
        device:       B::Device,
    ) -> Self {
        Self { model, optim, lr, layout, question_dim, variant, device }
    }
}

// ─── Batch → tensors ──────────────────────────────────────────────────────────
struct BatchTensors<B: Backend> {
    input:     ModelInput<B>,
    questions: Tensor<B, 2>,
    answers:   Tensor<B, 1, Int>,
}

fn batch_tensors<B: Backend>(
    layout:       InputLayout,
    question_dim: usize,
    batch:        &Batch,
    device:       &B::Device,
) -> TrainResult<BatchTensors<B>> {
    if batch.is_empty() {
        return Err(TrainError::EmptyBatch);
    }
    let n        = batch.len();
    let expected = layout.shape();

    let mut values = Vec::with_capacity(n * expected.iter().product::<usize>());
    for input in &batch.inputs {
        if input.shape != expected {
            return Err(TrainError::ShapeMismatch {
                expected,
                actual: input.shape.clone(),
            });
        }
        values.extend_from_slice(&input.values);
    }

    let mut questions = Vec::with_capacity(n * question_dim);
    for q in &batch.questions {
        if q.len() != question_dim {
            return Err(TrainError::ShapeMismatch {
                expected: vec![question_dim],
                actual:   vec![q.len()],
            });
        }
        questions.extend_from_slice(q);
    }

    let input = match layout {
        InputLayout::Pixels { channels, height, width } => ModelInput::Pixels(
            Tensor::from_data(TensorData::new(values, [n, channels, height, width]), device),
        ),
        InputLayout::Descriptors { objects, features } => ModelInput::Descriptors(
            Tensor::from_data(TensorData::new(values, [n, objects, features]), device),
        ),
    };
    let labels: Vec<i32> = batch.answers.iter().map(|&a| a as i32).collect();

    Ok(BatchTensors {
        input,
        questions: Tensor::from_data(TensorData::new(questions, [n, question_dim]), device),
        answers:   Tensor::from_ints(labels.as_slice(), device),
    })
}

/// Cross-entropy loss and the percentage of argmax hits.
fn score<B: Backend>(logits: Tensor<B, 2>, answers: Tensor<B, 1, Int>) -> (Tensor<B, 1>, f64) {
    let n = answers.dims()[0];
    let loss = CrossEntropyLossConfig::new()
        .init(&logits.device())
        .forward(logits.clone(), answers.clone());

    // argmax(1) is [batch, 1]; flatten to [batch] before comparing
    let correct: i64 = logits
        .argmax(1)
        .flatten::<1>(0, 1)
        .equal(answers)
        .int()
        .sum()
        .into_scalar()
        .elem::<i64>();

    (loss, 100.0 * correct as f64 / n as f64)
}

impl<B, M, O> TrainableModel for BurnLearner<B, M, O>
where
    B: AutodiffBackend,
    M: AutodiffModule<B> + Classifier<B>,
    M::InnerModule: Classifier<B::InnerBackend>,
    O: Optimizer<M, B>,
{
    fn variant(&self) -> ModelVariant {
        self.variant
    }

    fn train_step(&mut self, batch: &Batch) -> TrainResult<StepOutput> {
        let t = batch_tensors::<B>(self.layout, self.question_dim, batch, &self.device)?;

        let logits = self.model.forward(t.input, t.questions);
        let (loss, accuracy) = score(logits, t.answers);
        let loss_value = loss.clone().into_scalar().elem::<f64>();

        let grads  = GradientsParams::from_grads(loss.backward(), &self.model);
        self.model = self.optim.step(self.lr, self.model.clone(), grads);

        Ok(StepOutput { accuracy, loss: loss_value })
    }

    fn eval_step(&self, batch: &Batch) -> TrainResult<StepOutput> {
        let t = batch_tensors::<B::InnerBackend>(self.layout, self.question_dim, batch, &self.device)?;

        let model  = self.model.valid();
        let logits = model.forward(t.input, t.questions);
        let (loss, accuracy) = score(logits, t.answers);

        Ok(StepOutput { accuracy, loss: loss.into_scalar().elem::<f64>() })
    }

    fn save_checkpoint(&self, path: &Path) -> TrainResult<()> {
        self.model
            .clone()
            .save_file(path.to_path_buf(), &CheckpointRecorder::new())
            .map_err(|e| TrainError::CheckpointSave {
                path:    path.to_path_buf(),
                message: recorder_message(e),
            })
    }

    fn load_checkpoint(&mut self, path: &Path) -> TrainResult<()> {
        self.model = self
            .model
            .clone()
            .load_file(path.to_path_buf(), &CheckpointRecorder::new(), &self.device)
            .map_err(|e| TrainError::CheckpointLoad {
                path:    path.to_path_buf(),
                message: recorder_message(e),
            })?;
        Ok(())
    }
}

/// The recorder's Display repeats its Debug form; keep only the reason.
fn recorder_message(err: RecorderError) -> String {
    match err {
        RecorderError::FileNotFound(reason)     => format!("file not found: {reason}"),
        RecorderError::DeserializeError(reason) => format!("cannot decode record: {reason}"),
        RecorderError::Unknown(reason)          => reason,
    }
}

// ─── Construction ─────────────────────────────────────────────────────────────
/// Seed the backend, build the configured architecture and wrap it
/// with a fresh Adam optimiser.
pub fn build_learner<B: AutodiffBackend>(
    cfg:          &RunConfig,
    layout:       InputLayout,
    question_dim: usize,
    device:       &B::Device,
) -> Box<dyn TrainableModel> {
    B::seed(cfg.seed);

    match cfg.model {
        ModelVariant::RelationNetwork => {
            let ternary = cfg.relation_type == RelationType::Ternary;
            let model   = RelationNetworkConfig::new(layout, question_dim, ANSWER_CLASSES, ternary)
                .init::<B>(device);
            let optim   = AdamConfig::new().init::<B, RelationNetwork<B>>();
            Box::new(BurnLearner::new(
                model, optim, cfg.lr, layout, question_dim, cfg.model, device.clone(),
            ))
        }
        ModelVariant::CnnMlp => {
            let model = CnnMlpConfig::new(layout, question_dim, ANSWER_CLASSES).init::<B>(device);
            let optim = AdamConfig::new().init::<B, CnnMlp<B>>();
            Box::new(BurnLearner::new(
                model, optim, cfg.lr, layout, question_dim, cfg.model, device.clone(),
            ))
        }
    }
}
