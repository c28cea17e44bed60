// ============================================================
// Layer 1 - CLI / Presentation Layer
// ============================================================
// Entry point for all user interaction, parsed with `clap`.
// All work is delegated to Layer 2 (application).
//
// Two commands are supported:
//   1. `train`    - trains a model and decodes the test set
//                   with its best checkpoint
//   2. `evaluate` - decodes (and optionally scores) a corpus
//                   with the best checkpoint of a finished run

pub mod commands;

use anyhow::Result;
use clap::Parser;
use commands::{Commands, EvaluateArgs, TrainArgs};

#[derive(Parser, Debug)]
#[command(
    name = "seq2seq-trainer",
    version = "0.1.0",
    about = "Train recurrent encoder-decoder translation models with attention and copying."
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

    tracing::info!("Training on {} source series", args.train_sources.len());

    let use_case = TrainUseCase::new(args.into());
    let report   = use_case.execute()?;

    if report.interrupted {
        println!("Training interrupted after {} steps.", report.steps);
    }
    println!(
        "Best validation score {:.2} (epoch {}), results in '{}'.",
        report.best_score,
        report.best_epoch,
        use_case.output_dir().display(),
    );
    Ok(())
}

fn run_evaluate(args: EvaluateArgs) -> Result<()> {
    use crate::application::evaluate_use_case::EvaluateUseCase;

    let use_case = EvaluateUseCase::new(&args.run_dir)?;
    let output   = args.output.clone();
    let run      = use_case.execute(&args.into())?;

    println!("Decoded {} sentences into '{}'.", run.decoded.len(), output);
    if let Some(evaluation) = run.evaluation {
        for (name, value) in &evaluation.scores {
            println!("{name}: {value:.4}");
        }
    }
    Ok(())
}
