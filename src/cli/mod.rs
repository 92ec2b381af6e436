// ============================================================
// Layer 1 — CLI / Presentation Layer
// ============================================================
// Entry point for all user interaction, parsed with `clap`.
// All work is delegated to Layer 2 (application).
//
// Commands:
//   1. `pretrain-dnabert` : masked k-mer pretraining of the token encoder
//   2. `pretrain-setbert` : masked set pretraining over frozen reads
//   3. `train-taxonomy`   : hierarchical classifier on reads or sets
//   4. `inspect`          : describe a checkpoint, optionally classify
//
// A typical run chains the checkpoint directories:
//
//   deepdna pretrain-dnabert --checkpoint-dir runs/dnabert
//   deepdna pretrain-setbert --checkpoint-dir runs/setbert --dnabert-dir runs/dnabert
//   deepdna train-taxonomy   --checkpoint-dir runs/taxa --level set --pretrained-dir runs/setbert
//   deepdna inspect          --checkpoint-dir runs/taxa --predict 8

pub mod commands;

use anyhow::Result;
use clap::Parser;
use commands::{Commands, InspectArgs};

use crate::application::{
    inspect_use_case::InspectUseCase,
    train_use_case::{TrainConfig, TrainUseCase},
};

#[derive(Parser, Debug)]
#[command(
    name = "deepdna",
    version,
    about = "Pretrain DNABERT/SetBERT encoders on DNA reads and train hierarchical taxonomy classifiers."
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    /// Dispatch the parsed subcommand.
    pub fn run(self) -> Result<()> {
        match self.command {
            Commands::PretrainDnabert(args) => run_train(args.into()),
            Commands::PretrainSetbert(args) => run_train(args.into()),
            Commands::TrainTaxonomy(args) => run_train(args.into()),
            Commands::Inspect(args) => run_inspect(args),
        }
    }
}

fn run_train(config: TrainConfig) -> Result<()> {
    let checkpoint_dir = config.checkpoint_dir.clone();
    let use_case = TrainUseCase::new(config);
    use_case.execute()?;

    println!(
        "{} complete. Checkpoints saved to '{}'.",
        use_case.config().stage.name(),
        checkpoint_dir
    );
    Ok(())
}

fn run_inspect(args: InspectArgs) -> Result<()> {
    let use_case = InspectUseCase::new(args.checkpoint_dir.clone());
    println!("{}", use_case.summary()?);

    let Some(count) = args.predict else {
        return Ok(());
    };
    let report = use_case.predict(&args.overrides(), count)?;

    println!();
    for p in &report.predictions {
        println!("[{}/{}] {}\n      truth: {}", p.matching_ranks, report.depth, p.predicted, p.truth);
    }
    println!("\n{}/{} fully correct", report.fully_correct(), report.predictions.len());
    Ok(())
}
