// ============================================================
// Layer 2 — CalibrateUseCase
// ============================================================
// Fits one temperature per exit on a labelled file and writes
// them into the checkpoint's train_config.json, so later
// evaluate / predict runs use calibrated confidences:
//
//   scaling_temperatures = "T_0,T_1,...,T_{k-1}"
//
// Every exit runs for every instance while the logits are
// collected.

use anyhow::Result;
use burn::prelude::*;
use std::path::Path;

use crate::application::evaluate_use_case::{read_inputs, InferenceOptions, Inputs};
use crate::infra::checkpoint::CheckpointManager;
use crate::ml::{
    calibration::{fit_temperatures, nll},
    trainer::InferBackend,
};

#[derive(Debug, Clone)]
pub struct CalibrationReport {
    pub temperatures: Vec<f64>,
    /// Mean NLL per exit before and after scaling
    pub nll_before:   Vec<f64>,
    pub nll_after:    Vec<f64>,
}

pub struct CalibrateUseCase {
    options:   InferenceOptions,
    data_path: String,
}

impl CalibrateUseCase {
    pub fn new(options: InferenceOptions, data_path: String) -> Self {
        Self { options, data_path }
    }

    pub fn execute(&self) -> Result<CalibrationReport> {
        self.run::<InferBackend>(burn::backend::wgpu::WgpuDevice::default())
    }

    pub fn run<B: Backend>(&self, device: B::Device) -> Result<CalibrationReport> {
        let inferencer = self.options.open::<B>(device)?.without_early_exit();
        let kind       = self.options.reader_kind(inferencer.config.reader);

        let rows = match read_inputs(kind, Path::new(&self.data_path))? {
            Inputs::Text(instances) => inferencer.labelled_rows_text(&instances)?,
            Inputs::Qa(examples)    => inferencer.labelled_rows_qa(&examples)?,
        };
        anyhow::ensure!(
            rows.iter().any(|r| !r.is_empty()),
            "No labelled instances in '{}' to calibrate on",
            self.data_path
        );

        let temperatures = fit_temperatures(&rows);
        let nll_before   = rows.iter().map(|r| nll(r, 1.0)).collect();
        let nll_after    = rows.iter().zip(&temperatures).map(|(r, &t)| nll(r, t)).collect();

        let ckpt = CheckpointManager::open(&self.options.checkpoint_dir)?;
        let mut config = inferencer.config.clone();
        config.scaling_temperatures = temperatures
            .iter()
            .map(|t| format!("{t:.3}"))
            .collect::<Vec<_>>()
            .join(",");
        ckpt.save_config(&config)?;
        tracing::info!("Saved temperatures [{}] to train_config.json", config.scaling_temperatures);

        Ok(CalibrationReport { temperatures, nll_before, nll_after })
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::train_use_case::{TrainConfig, TrainUseCase};
    use crate::ml::calibration::{T_MAX, T_MIN};
    use burn::backend::{Autodiff, NdArray};
    use std::fs;

    #[test]
    fn test_calibration_writes_one_temperature_per_exit() {
        let dir  = tempfile::tempdir().unwrap();
        let data = dir.path().join("data.jsonl");
        fs::write(
            &data,
            "{\"text\": \"sunny warm\", \"label\": \"hot\"}\n\
             {\"text\": \"icy snow\", \"label\": \"cold\"}\n\
             {\"text\": \"warm sun\", \"label\": \"hot\"}\n\
             {\"text\": \"snow ice\", \"label\": \"cold\"}\n",
        )
        .unwrap();

        let ckpt = dir.path().join("ckpt").display().to_string();
        let cfg  = TrainConfig {
            train_path:        data.display().to_string(),
            checkpoint_dir:    ckpt.clone(),
            layer_indices:     "0,1".into(),
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

        let options = InferenceOptions { checkpoint_dir: ckpt.clone(), ..InferenceOptions::default() };
        let report  = CalibrateUseCase::new(options, data.display().to_string())
            .run::<NdArray>(Default::default())
            .unwrap();

        assert_eq!(report.temperatures.len(), 2);
        for (i, t) in report.temperatures.iter().enumerate() {
            assert!((T_MIN..=T_MAX).contains(t));
            assert!(report.nll_after[i] <= report.nll_before[i] + 1e-9);
        }

        let saved = CheckpointManager::open(&ckpt).unwrap().load_config().unwrap();
        assert_eq!(saved.scaling_temperatures.split(',').count(), 2);
    }
}
