// ============================================================
// Layer 1 — CLI Commands and Arguments
// ============================================================
// Defines the two subcommands, `train` and `evaluate`, and
// their flags. Model, relation and input types are parsed with
// their FromStr impls, so typos fail before any data is read.
//
// Reference: Rust Book §12 (Building a CLI Program)

use clap::{Args, Subcommand};

use crate::application::train_use_case::RunConfig;
use crate::domain::settings::{InputType, ModelVariant, RelationType};

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Train a model on sort-of-CLEVR, testing and checkpointing every epoch
    Train(TrainArgs),

    /// Run one test pass with a saved checkpoint
    Evaluate(EvaluateArgs),
}

/// All arguments for the `train` command.
#[derive(Args, Debug)]
pub struct TrainArgs {
    /// Model to train: RN or CNN_MLP
    #[arg(long, default_value = "RN")]
    pub model: ModelVariant,

    /// Samples per batch, per question category
    #[arg(long, default_value_t = 64)]
    pub batch_size: usize,

    #[arg(long, default_value_t = 25)]
    pub epochs: usize,

    /// Adam learning rate
    #[arg(long, default_value_t = 0.0001)]
    pub lr: f64,

    /// Train on the CPU backend
    #[arg(long)]
    pub no_gpu: bool,

    #[arg(long, default_value_t = 1)]
    pub seed: u64,

    /// Batches between progress lines
    #[arg(long, default_value_t = 10)]
    pub log_interval: usize,

    /// Checkpoint file inside --model-dir to resume from
    #[arg(long)]
    pub resume: Option<String>,

    /// Relations the RN reasons over: binary (pairs) or ternary (triples)
    #[arg(long, default_value = "binary")]
    pub relation_type: RelationType,

    /// Scene representation: pixels or descriptors
    #[arg(long, default_value = "pixels")]
    pub input_type: InputType,

    /// Directory holding the dataset pickle
    #[arg(long, default_value = "./data")]
    pub data_dir: String,

    /// Directory for checkpoints and run_config.json
    #[arg(long, default_value = "./model")]
    pub model_dir: String,

    /// Directory for the per-epoch CSV log
    #[arg(long, default_value = ".")]
    pub log_dir: String,
}

/// The application layer never sees clap types.
impl From<TrainArgs> for RunConfig {
    fn from(a: TrainArgs) -> Self {
        RunConfig {
            model:         a.model,
            batch_size:    a.batch_size,
            epochs:        a.epochs,
            lr:            a.lr,
            no_gpu:        a.no_gpu,
            seed:          a.seed,
            log_interval:  a.log_interval,
            resume:        a.resume,
            relation_type: a.relation_type,
            input_type:    a.input_type,
            data_dir:      a.data_dir,
            model_dir:     a.model_dir,
            log_dir:       a.log_dir,
        }
    }
}

/// All arguments for the `evaluate` command
#[derive(Args, Debug)]
pub struct EvaluateArgs {
    /// Checkpoint file inside --model-dir, e.g. epoch_RN_25.bin
    #[arg(long)]
    pub checkpoint: String,

    /// Directory the training run wrote to
    #[arg(long, default_value = "./model")]
    pub model_dir: String,

    /// Override the dataset directory recorded at training time
    #[arg(long)]
    pub data_dir: Option<String>,

    #[arg(long)]
    pub no_gpu: bool,
}
