// ============================================================
// Layer 2 — PredictUseCase
// ============================================================
// Labels or answers every instance of an input file and turns
// each one into a JSON line:
//
//   {"label": "pos", "probability": 0.93, "probs": [...], "selected_layer": 3}
//   {"id": "q1", "answer": "the mat", "probability": 0.41, "selected_layer": 11}
//
// Gold labels in the input are kept only when the model knows
// them (the oracle policy needs them); unknown ones are dropped.

use anyhow::{Context, Result};
use burn::prelude::*;
use serde::Serialize;
use std::{
    fs::File,
    io::{BufWriter, Write},
    path::Path,
};

use crate::application::evaluate_use_case::{read_inputs, InferenceOptions, Inputs};
use crate::ml::{
    classifier::LabelPrediction,
    qa::AnswerPrediction,
    trainer::InferBackend,
};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Prediction {
    Label(LabelPrediction),
    Answer(AnswerPrediction),
}

impl Prediction {
    pub fn selected_layer(&self) -> usize {
        match self {
            Prediction::Label(p)  => p.selected_layer,
            Prediction::Answer(p) => p.selected_layer,
        }
    }
}

pub struct PredictUseCase {
    options:    InferenceOptions,
    input_path: String,
}

impl PredictUseCase {
    pub fn new(options: InferenceOptions, input_path: String) -> Self {
        Self { options, input_path }
    }

    pub fn execute(&self) -> Result<Vec<Prediction>> {
        self.run::<InferBackend>(burn::backend::wgpu::WgpuDevice::default())
    }

    pub fn run<B: Backend>(&self, device: B::Device) -> Result<Vec<Prediction>> {
        let inferencer = self.options.open::<B>(device)?;
        let kind       = self.options.reader_kind(inferencer.config.reader);

        let predictions: Vec<Prediction> = match read_inputs(kind, Path::new(&self.input_path))? {
            Inputs::Text(mut instances) => {
                for instance in &mut instances {
                    let known = instance
                        .label
                        .as_deref()
                        .is_some_and(|l| inferencer.labels.get_index(l).is_some());
                    if !known {
                        instance.label = None;
                    }
                }
                inferencer
                    .classify(&instances)?
                    .predictions
                    .into_iter()
                    .map(Prediction::Label)
                    .collect()
            }
            Inputs::Qa(examples) => inferencer
                .answer(&examples)?
                .answers
                .into_iter()
                .map(Prediction::Answer)
                .collect(),
        };

        tracing::info!("Predicted {} instances from '{}'", predictions.len(), self.input_path);
        Ok(predictions)
    }
}

/// One JSON object per line.
pub fn write_json_lines<W: Write>(writer: &mut W, predictions: &[Prediction]) -> Result<()> {
    for prediction in predictions {
        serde_json::to_writer(&mut *writer, prediction)?;
        writeln!(writer)?;
    }
    writer.flush()?;
    Ok(())
}

pub fn save_json_lines(path: &Path, predictions: &[Prediction]) -> Result<()> {
    let file = File::create(path)
        .with_context(|| format!("Cannot create output file '{}'", path.display()))?;
    write_json_lines(&mut BufWriter::new(file), predictions)
}
