// ============================================================
// Layer 3 — Early-Exit Settings
// ============================================================
// Plain description of WHERE the model may stop and WHEN.
//
//   layer_indices — encoder layers that carry a classifier head,
//                   e.g. "3,7,11" on a 12-layer encoder.
//                   -1 stands for the last encoder layer.
//   temperatures  — one calibration temperature per exit.
//                   probs_i = softmax(logits_i / T_i)
//   threshold     — an instance stops at the first exit whose
//                   top probability reaches this value.
//                   None means every configured exit runs.
//   policy        — Confidence (the normal rule), Oracle (stop
//                   as soon as the prediction is right, needs
//                   gold labels) or Never.
//
// Nothing in here touches tensors; the ml layer reads these
// settings and the tracker below records the decisions.
//
// Reference: Schwartz et al. (2020) The Right Tool for the Job
//            Guo et al. (2017) On Calibration of Modern Neural Networks

use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Problems with a user supplied exit / model configuration.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("cannot parse '{value}' in list '{list}'")]
    BadListItem { list: String, value: String },

    #[error("layer_indices must not be empty")]
    NoLayers,

    #[error("layer_indices must be strictly increasing, got {0:?}")]
    NotIncreasing(Vec<usize>),

    #[error("layer index {index} is out of range for an encoder with {depth} layers")]
    LayerOutOfRange { index: i64, depth: usize },

    #[error("expected 1 or {expected} scaling temperatures, got {got}")]
    TemperatureCount { expected: usize, got: usize },

    #[error("scaling temperature must be positive, got {0}")]
    NonPositiveTemperature(f64),

    #[error("confidence threshold must be within [0, 1], got {0}")]
    ThresholdRange(f64),

    #[error("num_labels ({given}) is smaller than the label vocabulary ({vocab})")]
    TooFewLabels { given: usize, vocab: usize },

    #[error("no labels found for a classification task")]
    NoLabels,

    #[error("{name} must be positive")]
    ZeroSize { name: &'static str },
}

/// Parse a comma-separated list such as "3,7,11" or "1.2, 1.0".
pub fn parse_list<T: FromStr>(list: &str) -> Result<Vec<T>, ConfigError> {
    list.split(',')
        .map(|item| {
            let item = item.trim();
            item.parse::<T>().map_err(|_| ConfigError::BadListItem {
                list:  list.to_string(),
                value: item.to_string(),
            })
        })
        .collect()
}

/// How an instance decides to leave the encoder early.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ExitPolicy {
    /// Stop when the calibrated top probability reaches the threshold
    #[default]
    Confidence,
    /// Stop at the first exit that predicts the gold label
    Oracle,
    /// Always run every configured exit
    Never,
}

/// Resolved exit configuration shared by the classifier and the QA model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExitSettings {
    /// Encoder layers (0-based, strictly increasing) that own an exit head
    pub layer_indices: Vec<usize>,
    /// One temperature per exit
    pub temperatures:  Vec<f64>,
    /// Confidence needed to stop early; None disables early exit
    pub threshold:     Option<f64>,
    pub policy:        ExitPolicy,
    /// Train on one randomly sampled exit depth instead of summing all losses
    pub multitask:     bool,
}

impl ExitSettings {
    /// Build settings from the raw comma-separated options.
    ///
    /// `depth` is the number of encoder layers; it resolves the -1 sentinel
    /// and bounds every index.
    pub fn from_options(
        layer_indices: &str,
        temperatures:  &str,
        threshold:     Option<f64>,
        multitask:     bool,
        depth:         usize,
    ) -> Result<Self, ConfigError> {
        let raw: Vec<i64> = parse_list(layer_indices)?;
        let layers = resolve_layer_indices(&raw, depth)?;

        let temps: Vec<f64> = parse_list(temperatures)?;
        let temps = match temps.len() {
            1                            => vec![temps[0]; layers.len()],
            n if n == layers.len()       => temps,
            n => return Err(ConfigError::TemperatureCount { expected: layers.len(), got: n }),
        };

        let settings = Self {
            layer_indices: layers,
            temperatures:  temps,
            threshold,
            policy:        ExitPolicy::Confidence,
            multitask,
        };
        settings.validate(depth)?;
        Ok(settings)
    }

    /// Check every invariant against an encoder of `depth` layers.
    pub fn validate(&self, depth: usize) -> Result<(), ConfigError> {
        if self.layer_indices.is_empty() {
            return Err(ConfigError::NoLayers);
        }
        if self.layer_indices.windows(2).any(|w| w[0] >= w[1]) {
            return Err(ConfigError::NotIncreasing(self.layer_indices.clone()));
        }
        if let Some(&last) = self.layer_indices.last() {
            if last >= depth {
                return Err(ConfigError::LayerOutOfRange { index: last as i64, depth });
            }
        }
        if self.temperatures.len() != self.layer_indices.len() {
            return Err(ConfigError::TemperatureCount {
                expected: self.layer_indices.len(),
                got:      self.temperatures.len(),
            });
        }
        if let Some(&t) = self.temperatures.iter().find(|t| **t <= 0.0 || !t.is_finite()) {
            return Err(ConfigError::NonPositiveTemperature(t));
        }
        if let Some(t) = self.threshold {
            if !(0.0..=1.0).contains(&t) {
                return Err(ConfigError::ThresholdRange(t));
            }
        }
        Ok(())
    }

    pub fn num_exits(&self) -> usize {
        self.layer_indices.len()
    }

    /// First encoder layer the exit at `position` has to run.
    /// Exit 0 starts from the embeddings; exit i continues after exit i-1.
    pub fn start_layer(&self, position: usize) -> usize {
        if position == 0 { 0 } else { self.layer_indices[position - 1] + 1 }
    }

    /// Whether inference may stop before the last exit at all.
    pub fn exits_early(&self) -> bool {
        match self.policy {
            ExitPolicy::Never      => false,
            ExitPolicy::Oracle     => true,
            ExitPolicy::Confidence => self.threshold.is_some(),
        }
    }
}

/// Replace -1 by the last encoder layer and reject anything out of range.
fn resolve_layer_indices(raw: &[i64], depth: usize) -> Result<Vec<usize>, ConfigError> {
    raw.iter()
        .map(|&index| match index {
            -1                                 => Ok(depth.saturating_sub(1)),
            i if i >= 0 && (i as usize) < depth => Ok(i as usize),
            i => Err(ConfigError::LayerOutOfRange { index: i, depth }),
        })
        .collect()
}

/// The confidence rule: stop once the top probability reaches the threshold.
pub fn should_exit(confidence: f32, threshold: f64) -> bool {
    f64::from(confidence) >= threshold
}

// ─── ExitTracker ──────────────────────────────────────────────────────────────
/// Records, per instance of a batch, the exit position it stopped at.
///
/// The batch keeps running while at least one instance is unresolved;
/// instances that already stopped keep their first decision.
#[derive(Debug, Clone)]
pub struct ExitTracker {
    exits: Vec<Option<usize>>,
}

impl ExitTracker {
    pub fn new(batch_size: usize) -> Self {
        Self { exits: vec![None; batch_size] }
    }

    /// Feed the decisions of exit `position`.
    ///
    /// `confident[i]` says whether instance i would stop here.
    pub fn observe(&mut self, position: usize, confident: &[bool]) {
        for (slot, &stop) in self.exits.iter_mut().zip(confident) {
            if slot.is_none() && stop {
                *slot = Some(position);
            }
        }
    }

    pub fn all_resolved(&self) -> bool {
        self.exits.iter().all(Option::is_some)
    }

    pub fn resolved_count(&self) -> usize {
        self.exits.iter().filter(|e| e.is_some()).count()
    }

    /// Close the batch: unresolved instances exit at `last_position`.
    pub fn finish(self, last_position: usize) -> Vec<usize> {
        self.exits
            .into_iter()
            .map(|e| e.unwrap_or(last_position))
            .collect()
    }
}

/// Decide, for one exit, which instances of a batch stop there.
///
/// `rows` are temperature-scaled probabilities, one row per instance.
/// `gold` is only consulted by the oracle policy.
pub fn exit_decisions(
    settings: &ExitSettings,
    rows:     &[Vec<f32>],
    gold:     Option<&[usize]>,
) -> Vec<bool> {
    match settings.policy {
        ExitPolicy::Never => vec![false; rows.len()],
        ExitPolicy::Confidence => match settings.threshold {
            Some(threshold) => rows
                .iter()
                .map(|row| should_exit(max_value(row), threshold))
                .collect(),
            None => vec![false; rows.len()],
        },
        ExitPolicy::Oracle => match gold {
            Some(gold) => rows
                .iter()
                .zip(gold)
                .map(|(row, &g)| argmax(row) == g)
                .collect(),
            None => vec![false; rows.len()],
        },
    }
}

/// Largest element of a row (NEG_INFINITY when empty).
pub fn max_value(row: &[f32]) -> f32 {
    row.iter().copied().fold(f32::NEG_INFINITY, f32::max)
}

/// Index of the largest element; ties resolve to the lowest index.
pub fn argmax(row: &[f32]) -> usize {
    let mut best = 0usize;
    for (i, &v) in row.iter().enumerate() {
        if v > row[best] {
            best = i;
        }
    }
    best
}
