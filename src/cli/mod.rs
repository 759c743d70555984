// ============================================================
// Layer 1 — CLI / Presentation Layer
// ============================================================
// This is the entry point for all user interaction.
// It uses the `clap` crate to parse command line arguments
// and delegates all work to Layer 2 (application).
//
// Only this layer prints results for the user.
//
// Reference: Rust Book §7 (Modules), §12 (CLI programs)

pub mod commands;

use anyhow::Result;
use clap::Parser;
use std::{io, path::Path};

use commands::{CalibrateArgs, Commands, EvaluateArgs, PredictArgs, TrainArgs};

#[derive(Parser, Debug)]
#[command(
    name = "early-exit-bert",
    version,
    about = "Early-exit multi-layer BERT for text classification and extractive QA."
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    /// Match on the subcommand and dispatch to the correct use case.
    pub fn run(self) -> Result<()> {
        match self.command {
            Commands::Train(args)     => run_train(args),
            Commands::Evaluate(args)  => run_evaluate(args),
            Commands::Predict(args)   => run_predict(args),
            Commands::Calibrate(args) => run_calibrate(args),
        }
    }
}

fn run_train(args: TrainArgs) -> Result<()> {
    use crate::application::train_use_case::TrainUseCase;

    tracing::info!("Starting training on '{}'", args.train_path);
    let checkpoint_dir = args.checkpoint_dir.clone();
    let report = TrainUseCase::new(args.into()).execute()?;

    println!(
        "Training complete. Best epoch {} (val_loss={:.4}), checkpoints in '{}'.",
        report.best_epoch, report.best_val_loss, checkpoint_dir
    );
    if let Some(best) = report.history.iter().find(|m| m.epoch == report.best_epoch) {
        println!(
            "  val_acc={:.1}%  avg_exit_layer={:.2}",
            best.val_accuracy * 100.0, best.avg_exit_layer
        );
    }
    Ok(())
}

fn run_evaluate(args: EvaluateArgs) -> Result<()> {
    use crate::application::evaluate_use_case::EvaluateUseCase;

    let report = EvaluateUseCase::new(args.checkpoint.into(), args.data_path).execute()?;

    println!("\nEvaluated {} instances", report.instances);
    for (name, value) in &report.metrics {
        println!("  {:<16} {:.4}", name, value);
    }
    Ok(())
}

fn run_predict(args: PredictArgs) -> Result<()> {
    use crate::application::predict_use_case::{save_json_lines, write_json_lines, PredictUseCase};

    let predictions = PredictUseCase::new(args.checkpoint.into(), args.input_path).execute()?;
    match args.output_path {
        Some(path) => {
            save_json_lines(Path::new(&path), &predictions)?;
            println!("Wrote {} predictions to '{}'", predictions.len(), path);
        }
        None => write_json_lines(&mut io::stdout().lock(), &predictions)?,
    }
    Ok(())
}

fn run_calibrate(args: CalibrateArgs) -> Result<()> {
    use crate::application::calibrate_use_case::CalibrateUseCase;

    let report = CalibrateUseCase::new(args.checkpoint.into(), args.data_path).execute()?;

    println!("\nExit  temperature  NLL before  NLL after");
    for (i, t) in report.temperatures.iter().enumerate() {
        println!(
            "{:>4}  {:>11.3}  {:>10.4}  {:>9.4}",
            i, t, report.nll_before[i], report.nll_after[i]
        );
    }
    Ok(())
}
