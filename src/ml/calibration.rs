// ============================================================
// Layer 5 — Temperature Calibration
// ============================================================
// Fits one softmax temperature per exit on held-out data so
// that the confidence used for early exit means what it says.
//
//   NLL(T) = mean over rows of  -log softmax(logits / T)[gold]
//
// The search is a grid over [0.05, 5.0] with step 0.05,
// refined once around the best value with step 0.005.
// Every exit runs on every instance (no early exit) and the
// raw logits are collected on the CPU first.
//
// QA contributes two rows per window: start logits with the
// gold start, end logits with the gold end.
//
// Reference: Guo et al. (2017) On Calibration of Modern Neural Networks

use burn::{data::dataloader::DataLoader, prelude::*};
use std::sync::Arc;

use crate::data::batcher::{ClassificationBatch, QaBatch};
use crate::domain::exit::ExitSettings;
use crate::ml::classifier::{tensor_rows, MultiLayerClassifier};
use crate::ml::qa::MultilossQa;

pub const T_MIN:  f64 = 0.05;
pub const T_MAX:  f64 = 5.0;
const COARSE_STEP: f64 = 0.05;
const FINE_STEP:   f64 = 0.005;

/// A logit row and the index of its gold class.
pub type LabelledRow = (Vec<f32>, usize);

/// Mean negative log-likelihood of the gold classes at temperature `t`.
pub fn nll(rows: &[LabelledRow], t: f64) -> f64 {
    if rows.is_empty() {
        return 0.0;
    }
    let total: f64 = rows
        .iter()
        .map(|(row, gold)| {
            let scaled: Vec<f64> = row.iter().map(|&v| f64::from(v) / t).collect();
            let max = scaled.iter().copied().fold(f64::NEG_INFINITY, f64::max);
            let log_sum = scaled.iter().map(|v| (v - max).exp()).sum::<f64>().ln() + max;
            log_sum - scaled.get(*gold).copied().unwrap_or(f64::NEG_INFINITY)
        })
        .sum();
    total / rows.len() as f64
}

fn grid_search(rows: &[LabelledRow], lo: f64, hi: f64, step: f64) -> f64 {
    let steps = ((hi - lo) / step).round() as usize;
    (0..=steps)
        .map(|i| lo + step * i as f64)
        .map(|t| (t, nll(rows, t)))
        .fold((1.0, f64::INFINITY), |best, (t, loss)| if loss < best.1 { (t, loss) } else { best })
        .0
}

/// Temperature in [T_MIN, T_MAX] with the lowest NLL; 1.0 without data.
pub fn fit_temperature(rows: &[LabelledRow]) -> f64 {
    if rows.is_empty() {
        return 1.0;
    }
    let coarse = grid_search(rows, T_MIN, T_MAX, COARSE_STEP);
    let lo     = (coarse - COARSE_STEP).max(T_MIN);
    let hi     = (coarse + COARSE_STEP).min(T_MAX);
    grid_search(rows, lo, hi, FINE_STEP)
}

/// One temperature per exit.
pub fn fit_temperatures(per_exit: &[Vec<LabelledRow>]) -> Vec<f64> {
    per_exit
        .iter()
        .enumerate()
        .map(|(i, rows)| {
            let t = fit_temperature(rows);
            tracing::info!(
                "Exit {}: T={:.3} (NLL {:.4} → {:.4}, {} rows)",
                i, t, nll(rows, 1.0), nll(rows, t), rows.len()
            );
            t
        })
        .collect()
}

// ─── Logit collection ─────────────────────────────────────────────────────────
/// Raw logits of every exit for every labelled instance.
pub fn collect_classification<B: Backend>(
    model:    &MultiLayerClassifier<B>,
    loader:   &Arc<dyn DataLoader<ClassificationBatch<B>>>,
    settings: &ExitSettings,
) -> Vec<Vec<LabelledRow>> {
    let k = settings.num_exits();
    let mut per_exit: Vec<Vec<LabelledRow>> = vec![Vec::new(); k];

    for batch in loader.iter() {
        let Some(gold) = batch.gold.clone() else { continue };
        let logits = model.forward_exits(&batch.input, settings, k);
        for (slot, exit_logits) in per_exit.iter_mut().zip(logits) {
            slot.extend(tensor_rows(exit_logits).into_iter().zip(gold.iter().copied()));
        }
    }
    per_exit
}

pub fn collect_qa<B: Backend>(
    model:    &MultilossQa<B>,
    loader:   &Arc<dyn DataLoader<QaBatch<B>>>,
    settings: &ExitSettings,
) -> Vec<Vec<LabelledRow>> {
    let k = settings.num_exits();
    let mut per_exit: Vec<Vec<LabelledRow>> = vec![Vec::new(); k];

    for batch in loader.iter() {
        let spans = model.forward_exits(&batch.input, settings, k);
        for (slot, span) in per_exit.iter_mut().zip(spans) {
            slot.extend(tensor_rows(span.start).into_iter().zip(batch.gold_starts.iter().copied()));
            slot.extend(tensor_rows(span.end).into_iter().zip(batch.gold_ends.iter().copied()));
        }
    }
    per_exit
}
