// ============================================================
// Layer 1 — CLI / Presentation Layer
// ============================================================
// Entry point for all user interaction. Parses arguments with
// clap and hands off to Layer 2 (application).
//
// Two commands are supported:
//   1. `train`    — trains RN or CNN_MLP on sort-of-CLEVR
//   2. `evaluate` — loads a checkpoint and scores the test split

pub mod commands;

use anyhow::Result;
use clap::Parser;
use commands::{Commands, EvaluateArgs, TrainArgs};

#[derive(Parser, Debug)]
#[command(
    name = "sort-of-clevr-rn",
    version = "0.1.0",
    about = "Train and evaluate Relation Networks on sort-of-CLEVR."
)]
pub struct Cli {
    /// The subcommand to run (train or evaluate)
    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    /// Match on the subcommand and dispatch to the correct use case.
    pub fn run(self) -> Result<()> {
        match self.command {
            Commands::Train(args)    => run_train(args),
            Commands::Evaluate(args) => run_evaluate(args),
        }
    }
}

fn run_train(args: TrainArgs) -> Result<()> {
    use crate::application::train_use_case::TrainUseCase;

    tracing::info!("Starting training with data from: {}", args.data_dir);
    TrainUseCase::new(args.into()).execute()?;

    println!("Training complete. Checkpoints saved.");
    Ok(())
}

fn run_evaluate(args: EvaluateArgs) -> Result<()> {
    use crate::application::evaluate_use_case::EvaluateUseCase;

    let use_case = EvaluateUseCase::new(args.model_dir, args.checkpoint, args.data_dir, args.no_gpu);
    let m = use_case.execute()?;

    println!(
        "Ternary accuracy: {:.1}% | Relations accuracy: {:.1}% | Non-relations accuracy: {:.1}%",
        m.ternary.accuracy, m.binary.accuracy, m.unary.accuracy,
    );
    Ok(())
}
