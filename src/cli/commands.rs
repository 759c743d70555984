// ============================================================
// Layer 1 — CLI Commands and Arguments
// ============================================================
// Defines the four subcommands and all their flags:
//
//   train      fit exit heads (and optionally the encoder)
//   evaluate   metrics + exit histogram on a labelled file
//   predict    JSON-lines predictions
//   calibrate  per-exit temperatures from a labelled file
//
// clap's derive macros generate help text, error messages for
// missing args and the string → number conversions.
//
// Reference: Rust Book §12 (Building a CLI Program)

use clap::{Args, Subcommand, ValueEnum};

use crate::application::{evaluate_use_case::InferenceOptions, train_use_case::TrainConfig};
use crate::data::readers::ReaderKind;

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Train an early-exit classifier or QA model
    Train(TrainArgs),

    /// Score a trained checkpoint on a labelled file
    Evaluate(EvaluateArgs),

    /// Predict labels or answers for every instance of a file
    Predict(PredictArgs),

    /// Fit one softmax temperature per exit on a labelled file
    Calibrate(CalibrateArgs),
}

/// Dataset format, mirrors ReaderKind without exposing clap to it.
#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReaderArg {
    Classification,
    ClassificationOracle,
    Nli,
    NliOracle,
    Squad,
}

impl From<ReaderArg> for ReaderKind {
    fn from(r: ReaderArg) -> Self {
        match r {
            ReaderArg::Classification       => ReaderKind::Classification,
            ReaderArg::ClassificationOracle => ReaderKind::ClassificationOracle,
            ReaderArg::Nli                  => ReaderKind::Nli,
            ReaderArg::NliOracle            => ReaderKind::NliOracle,
            ReaderArg::Squad                => ReaderKind::Squad,
        }
    }
}

#[derive(Args, Debug)]
pub struct TrainArgs {
    /// Dataset format of the training and validation files
    #[arg(long, value_enum, default_value = "classification")]
    pub reader: ReaderArg,

    /// Training file
    #[arg(long)]
    pub train_path: String,

    /// Validation file; without it a fraction of the training data is held out
    #[arg(long)]
    pub validation_path: Option<String>,

    /// Directory to save checkpoints, configs and the tokenizer
    #[arg(long, default_value = "checkpoints")]
    pub checkpoint_dir: String,

    /// HuggingFace BERT directory (config.json, model.safetensors, tokenizer.json)
    #[arg(long)]
    pub pretrained_dir: Option<String>,

    /// Comma-separated encoder layers with an exit head; -1 is the last layer
    #[arg(long, default_value = "-1", allow_hyphen_values = true)]
    pub layer_indices: String,

    /// One temperature for all exits, or one per exit
    #[arg(long, default_value = "1")]
    pub scaling_temperatures: String,

    /// Confidence needed to leave early during validation; off when omitted
    #[arg(long)]
    pub threshold: Option<f64>,

    /// Train one randomly deep exit per batch instead of all of them
    #[arg(long)]
    pub multitask: bool,

    /// Do not feed earlier exits' logits into later heads
    #[arg(long)]
    pub no_previous_layer_logits: bool,

    /// Keep the encoder frozen and train only the heads
    #[arg(long)]
    pub frozen: bool,

    /// Number of classes (defaults to the labels seen in the data)
    #[arg(long)]
    pub num_labels: Option<usize>,

    /// Exit heads of an earlier run to start from: one bundle file, or a
    /// comma-separated list with one file per exit head
    #[arg(long)]
    pub linear_layers: Option<String>,

    /// Write the trained exit heads to one bundle file, or to one file per
    /// exit head when given a comma-separated list
    #[arg(long)]
    pub export_heads: Option<String>,

    /// Maximum tokens per input sequence
    #[arg(long, default_value_t = 128)]
    pub max_seq_len: usize,

    /// Maximum question tokens (squad)
    #[arg(long, default_value_t = 64)]
    pub max_query_len: usize,

    /// Tokens between the starts of consecutive context windows (squad)
    #[arg(long, default_value_t = 128)]
    pub doc_stride: usize,

    /// Longest answer span in tokens (squad)
    #[arg(long, default_value_t = 30)]
    pub max_answer_len: usize,

    #[arg(long, default_value_t = 16)]
    pub batch_size: usize,

    #[arg(long, default_value_t = 3)]
    pub epochs: usize,

    #[arg(long, default_value_t = 2e-5)]
    pub lr: f64,

    /// Seed for shuffling, the train/validation split and multitask sampling
    #[arg(long, default_value_t = 42)]
    pub seed: u64,

    /// Share of the training data kept for training when no validation file is given
    #[arg(long, default_value_t = 0.9)]
    pub train_fraction: f64,

    #[arg(long, default_value_t = 0.1)]
    pub dropout: f64,

    /// Standard deviation of the exit head initialiser
    #[arg(long, default_value_t = 0.02)]
    pub head_init_std: f64,

    /// Encoder width when training from scratch
    #[arg(long, default_value_t = 256)]
    pub hidden_size: usize,

    /// Encoder depth when training from scratch
    #[arg(long, default_value_t = 6)]
    pub num_layers: usize,

    /// Attention heads when training from scratch; must divide hidden_size
    #[arg(long, default_value_t = 8)]
    pub num_heads: usize,

    /// Feed-forward width when training from scratch
    #[arg(long, default_value_t = 1024)]
    pub intermediate_size: usize,

    /// Vocabulary size of a tokenizer built from the training data
    #[arg(long, default_value_t = 30522)]
    pub vocab_size: usize,
}

/// Convert CLI TrainArgs into the application-layer TrainConfig.
/// The application layer never sees clap types.
impl From<TrainArgs> for TrainConfig {
    fn from(a: TrainArgs) -> Self {
        TrainConfig {
            reader:                    a.reader.into(),
            train_path:                a.train_path,
            validation_path:           a.validation_path,
            checkpoint_dir:            a.checkpoint_dir,
            pretrained_dir:            a.pretrained_dir,
            layer_indices:             a.layer_indices,
            scaling_temperatures:      a.scaling_temperatures,
            threshold:                 a.threshold,
            multitask:                 a.multitask,
            add_previous_layer_logits: !a.no_previous_layer_logits,
            trainable:                 !a.frozen,
            num_labels:                a.num_labels,
            linear_layers:             a.linear_layers,
            export_heads:              a.export_heads,
            max_seq_len:               a.max_seq_len,
            max_query_len:             a.max_query_len,
            doc_stride:                a.doc_stride,
            max_answer_len:            a.max_answer_len,
            batch_size:                a.batch_size,
            epochs:                    a.epochs,
            lr:                        a.lr,
            seed:                      a.seed,
            train_fraction:            a.train_fraction,
            dropout:                   a.dropout,
            head_init_std:             a.head_init_std,
            hidden_size:               a.hidden_size,
            num_layers:                a.num_layers,
            num_heads:                 a.num_heads,
            intermediate_size:         a.intermediate_size,
            vocab_size:                a.vocab_size,
        }
    }
}

/// Flags shared by every command that loads a checkpoint.
#[derive(Args, Debug)]
pub struct CheckpointArgs {
    /// Directory where checkpoints were saved during training
    #[arg(long, default_value = "checkpoints")]
    pub checkpoint_dir: String,

    /// Epoch to load (default: best validation epoch)
    #[arg(long)]
    pub epoch: Option<usize>,

    /// Replace the confidence threshold stored with the model
    #[arg(long)]
    pub threshold: Option<f64>,

    /// Run every exit for every instance
    #[arg(long)]
    pub no_early_exit: bool,

    /// Read the input with another format than the training one
    #[arg(long, value_enum)]
    pub reader: Option<ReaderArg>,
}

impl From<CheckpointArgs> for InferenceOptions {
    fn from(a: CheckpointArgs) -> Self {
        InferenceOptions {
            checkpoint_dir: a.checkpoint_dir,
            epoch:          a.epoch,
            threshold:      a.threshold,
            no_early_exit:  a.no_early_exit,
            reader:         a.reader.map(Into::into),
        }
    }
}

#[derive(Args, Debug)]
pub struct EvaluateArgs {
    /// Labelled file to evaluate on
    #[arg(long)]
    pub data_path: String,

    #[command(flatten)]
    pub checkpoint: CheckpointArgs,
}

#[derive(Args, Debug)]
pub struct PredictArgs {
    /// File with the instances to predict
    #[arg(long)]
    pub input_path: String,

    /// Write JSON lines here instead of stdout
    #[arg(long)]
    pub output_path: Option<String>,

    #[command(flatten)]
    pub checkpoint: CheckpointArgs,
}

#[derive(Args, Debug)]
pub struct CalibrateArgs {
    /// Labelled held-out file
    #[arg(long)]
    pub data_path: String,

    #[command(flatten)]
    pub checkpoint: CheckpointArgs,
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::Cli;
    use clap::Parser;

    #[test]
    fn test_train_args_into_config() {
        let cli = Cli::try_parse_from([
            "early-exit-bert", "train",
            "--reader", "nli-oracle",
            "--train-path", "snli.jsonl",
            "--layer-indices", "3,7,-1",
            "--threshold", "0.9",
            "--frozen",
            "--multitask",
        ])
        .unwrap();

        let Commands::Train(args) = cli.command else { panic!("expected train") };
        let cfg: TrainConfig = args.into();
        assert_eq!(cfg.reader, ReaderKind::NliOracle);
        assert_eq!(cfg.layer_indices, "3,7,-1");
        assert_eq!(cfg.threshold, Some(0.9));
        assert!(!cfg.trainable);
        assert!(cfg.multitask);
        assert!(cfg.add_previous_layer_logits);
    }

    #[test]
    fn test_predict_args_flatten_checkpoint_flags() {
        let cli = Cli::try_parse_from([
            "early-exit-bert", "predict",
            "--input-path", "dev.json",
            "--checkpoint-dir", "runs/a",
            "--epoch", "2",
            "--no-early-exit",
        ])
        .unwrap();

        let Commands::Predict(args) = cli.command else { panic!("expected predict") };
        let options: InferenceOptions = args.checkpoint.into();
        assert_eq!(options.checkpoint_dir, "runs/a");
        assert_eq!(options.epoch, Some(2));
        assert!(options.no_early_exit);
        assert_eq!(options.reader, None);
    }

    #[test]
    fn test_unknown_reader_is_rejected() {
        assert!(Cli::try_parse_from(["early-exit-bert", "train", "--reader", "docx", "--train-path", "x"]).is_err());
    }
}
