// ============================================================
// Layer 2 — EvaluateUseCase
// ============================================================
// Loads a checkpoint, runs early-exit inference over a labelled
// file and reports:
//
//   classification  accuracy, thr, n_layers_<i>, avg_exit_layer
//   squad           exact_match, f1, thr, n_layers_<i>,
//                   avg_exit_layer (exits counted per window)
//
// The file is read with the reader the model was trained with
// unless another one is requested.

use anyhow::Result;
use burn::prelude::*;
use serde::Serialize;
use std::{collections::BTreeMap, path::Path};

use crate::data::readers::{reader_for, ReaderKind, SquadReader};
use crate::domain::{
    instance::{QaExample, TextInstance},
    traits::QaReader,
};
use crate::infra::checkpoint::CheckpointManager;
use crate::ml::{
    inferencer::Inferencer,
    metrics::{ExitMetrics, SquadScores},
    trainer::InferBackend,
};

/// How to open a checkpoint for inference.
#[derive(Debug, Clone, Default)]
pub struct InferenceOptions {
    pub checkpoint_dir: String,
    /// Epoch to load; the best one when None
    pub epoch:          Option<usize>,
    /// Replace the stored confidence threshold
    pub threshold:      Option<f64>,
    /// Run every exit regardless of confidence
    pub no_early_exit:  bool,
    /// Read the input with another reader than the training one
    pub reader:         Option<ReaderKind>,
}

impl InferenceOptions {
    pub fn open<B: Backend>(&self, device: B::Device) -> Result<Inferencer<B>> {
        let ckpt = CheckpointManager::open(&self.checkpoint_dir)?;
        let mut inferencer = Inferencer::<B>::from_checkpoint(&ckpt, self.epoch, device)?;
        if self.threshold.is_some() {
            inferencer = inferencer.with_threshold(self.threshold)?;
        }
        if self.no_early_exit {
            inferencer = inferencer.without_early_exit();
        }
        Ok(inferencer)
    }

    pub fn reader_kind(&self, trained: ReaderKind) -> ReaderKind {
        self.reader.unwrap_or(trained)
    }
}

/// Input read for either task.
pub(crate) enum Inputs {
    Text(Vec<TextInstance>),
    Qa(Vec<QaExample>),
}

pub(crate) fn read_inputs(kind: ReaderKind, path: &Path) -> Result<Inputs> {
    match reader_for(kind) {
        Some(reader) => Ok(Inputs::Text(reader.read(path)?)),
        None         => Ok(Inputs::Qa(SquadReader::new().read_examples(path)?)),
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct EvaluationReport {
    pub instances:      usize,
    pub avg_exit_layer: f64,
    pub metrics:        BTreeMap<String, f64>,
}

pub struct EvaluateUseCase {
    options:   InferenceOptions,
    data_path: String,
}

impl EvaluateUseCase {
    pub fn new(options: InferenceOptions, data_path: String) -> Self {
        Self { options, data_path }
    }

    pub fn execute(&self) -> Result<EvaluationReport> {
        self.run::<InferBackend>(burn::backend::wgpu::WgpuDevice::default())
    }

    pub fn run<B: Backend>(&self, device: B::Device) -> Result<EvaluationReport> {
        let inferencer = self.options.open::<B>(device)?;
        let settings   = inferencer.settings.clone();
        let kind       = self.options.reader_kind(inferencer.config.reader);
        let mut exit_metrics = ExitMetrics::new(settings.num_exits(), settings.threshold);

        let (instances, mut metrics) = match read_inputs(kind, Path::new(&self.data_path))? {
            Inputs::Text(instances) => {
                let run = inferencer.classify(&instances)?;
                let (rows, gold): (Vec<Vec<f32>>, Vec<usize>) = run
                    .predictions
                    .iter()
                    .zip(&run.gold)
                    .filter_map(|(p, g)| g.map(|g| (p.probs.clone(), g)))
                    .unzip();
                exit_metrics.accuracy.update(&rows, &gold);
                exit_metrics.exits.update(&run.exit_positions);
                (instances.len(), exit_metrics.get_metrics(false))
            }
            Inputs::Qa(examples) => {
                let run = inferencer.answer(&examples)?;
                let mut squad = SquadScores::new();
                for (example, prediction) in examples.iter().zip(&run.answers) {
                    let golds: Vec<String> = example.answers.iter().map(|a| a.text.clone()).collect();
                    squad.update(&prediction.answer, &golds);
                }
                exit_metrics.exits.update(&run.exit_positions);
                let mut metrics = exit_metrics.get_metrics(false);
                metrics.remove("accuracy");
                metrics.insert("exact_match".to_string(), squad.exact_match());
                metrics.insert("f1".to_string(), squad.f1());
                (examples.len(), metrics)
            }
        };

        let avg_exit_layer = exit_metrics.exits.average_layer(&settings.layer_indices);
        metrics.insert("avg_exit_layer".to_string(), avg_exit_layer);
        tracing::info!(
            "Evaluated {} instances, exit histogram {:?}",
            instances,
            exit_metrics.exits.fractions()
        );

        Ok(EvaluationReport { instances, avg_exit_layer, metrics })
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::train_use_case::{TrainConfig, TrainUseCase};
    use crate::domain::exit::argmax;
    use burn::backend::{Autodiff, NdArray};
    use std::fs;

    fn train_small(dir: &Path) -> (String, String) {
        let data = dir.join("data.jsonl");
        let lines: Vec<String> = (0..4)
            .map(|i| {
                let (text, label) = if i % 2 == 0 { ("fine good", "pos") } else { ("awful bad", "neg") };
                format!(r#"{{"text": "{text}", "label": "{label}"}}"#)
            })
            .collect();
        fs::write(&data, lines.join("\n")).unwrap();

        let ckpt = dir.join("ckpt").display().to_string();
        let cfg  = TrainConfig {
            train_path:        data.display().to_string(),
            checkpoint_dir:    ckpt.clone(),
            layer_indices:     "0,1".into(),
            threshold:         Some(1.0),
            max_seq_len:       8,
            batch_size:        2,
            epochs:            1,
            train_fraction:    0.5,
            hidden_size:       8,
            num_layers:        2,
            num_heads:         2,
            intermediate_size: 16,
            ..TrainConfig::default()
        };
        TrainUseCase::new(cfg).run::<Autodiff<NdArray>>(Default::default()).unwrap();
        (ckpt, data.display().to_string())
    }

    #[test]
    fn test_evaluate_reports_accuracy_and_exit_histogram() {
        let dir = tempfile::tempdir().unwrap();
        let (ckpt, data) = train_small(dir.path());

        let options = InferenceOptions { checkpoint_dir: ckpt, ..InferenceOptions::default() };
        let report  = EvaluateUseCase::new(options, data).run::<NdArray>(Default::default()).unwrap();

        assert_eq!(report.instances, 4);
        let accuracy = report.metrics["accuracy"];
        assert!((0.0..=1.0).contains(&accuracy));
        // threshold 1.0 is never reached: everything leaves at the last exit
        assert_eq!(report.metrics["n_layers_1"], 1.0);
        assert_eq!(report.metrics["thr"], 1.0);
        assert_eq!(report.avg_exit_layer, 2.0);
    }

    #[test]
    fn test_threshold_override_moves_exits_forward() {
        let dir = tempfile::tempdir().unwrap();
        let (ckpt, data) = train_small(dir.path());

        let options = InferenceOptions {
            checkpoint_dir: ckpt,
            threshold:      Some(0.0),
            ..InferenceOptions::default()
        };
        let report = EvaluateUseCase::new(options, data).run::<NdArray>(Default::default()).unwrap();
        assert_eq!(report.metrics["n_layers_0"], 1.0);
        assert_eq!(report.avg_exit_layer, 1.0);
    }

    #[test]
    fn test_oracle_reader_stops_at_first_correct_exit() {
        let dir = tempfile::tempdir().unwrap();
        let (ckpt, data) = train_small(dir.path());
        let options = InferenceOptions {
            checkpoint_dir: ckpt,
            reader:         Some(ReaderKind::ClassificationOracle),
            ..InferenceOptions::default()
        };

        let Inputs::Text(instances) = read_inputs(ReaderKind::ClassificationOracle, Path::new(&data)).unwrap() else {
            panic!("expected text instances");
        };
        let rows = options
            .open::<NdArray>(Default::default())
            .unwrap()
            .without_early_exit()
            .labelled_rows_text(&instances)
            .unwrap();
        let first_correct: Vec<Option<usize>> = (0..instances.len())
            .map(|i| (0..rows.len()).find(|&p| argmax(&rows[p][i].0) == rows[p][i].1))
            .collect();
        let n = instances.len() as f64;
        let at_first = first_correct.iter().filter(|e| **e == Some(0)).count() as f64 / n;
        let found    = first_correct.iter().filter(|e| e.is_some()).count() as f64 / n;

        let report = EvaluateUseCase::new(options, data).run::<NdArray>(Default::default()).unwrap();
        assert_eq!(report.metrics["n_layers_0"], at_first);
        // every instance that found a correct exit is counted as right
        assert_eq!(report.metrics["accuracy"], found);
    }

    #[test]
    fn test_threshold_override_out_of_range_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let (ckpt, data) = train_small(dir.path());
        for threshold in [1.5, -1.0] {
            let options = InferenceOptions {
                checkpoint_dir: ckpt.clone(),
                threshold:      Some(threshold),
                ..InferenceOptions::default()
            };
            assert!(EvaluateUseCase::new(options, data.clone()).run::<NdArray>(Default::default()).is_err());
        }
    }
}
