// ============================================================
// Layer 5 — Task Steps
// ============================================================
// The two seams the generic training loop needs from a model:
//
//   TrainStep — batch → loss tensor (autodiff backend)
//   ValidStep — batch → EvalStep (inner backend, early exit on)
//
// Both the classifier and the QA model implement them, so one
// trainer drives either task.

use burn::{prelude::*, tensor::backend::AutodiffBackend};
use rand::rngs::StdRng;

use crate::data::batcher::{ClassificationBatch, QaBatch};
use crate::domain::exit::{argmax, ExitSettings};
use crate::ml::classifier::MultiLayerClassifier;
use crate::ml::metrics::SpanAccuracy;
use crate::ml::qa::MultilossQa;

/// Plain numbers from one validation batch.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EvalStep {
    pub loss:           f64,
    pub exit_positions: Vec<usize>,
    pub correct:        usize,
    pub total:          usize,
}

pub trait TrainStep<B: AutodiffBackend, T> {
    /// None when the batch carries no training signal (unlabelled).
    fn train_loss(&self, batch: T, settings: &ExitSettings, rng: &mut StdRng) -> Option<Tensor<B, 1>>;
}

pub trait ValidStep<B: Backend, T> {
    fn valid_step(&self, batch: &T, settings: &ExitSettings) -> EvalStep;
}

fn scalar<B: Backend>(t: Tensor<B, 1>) -> f64 {
    t.into_scalar().elem::<f64>()
}

// ─── Classification ───────────────────────────────────────────────────────────
impl<B: AutodiffBackend> TrainStep<B, ClassificationBatch<B>> for MultiLayerClassifier<B> {
    fn train_loss(&self, batch: ClassificationBatch<B>, settings: &ExitSettings, rng: &mut StdRng) -> Option<Tensor<B, 1>> {
        self.forward_train(batch, settings, rng).map(|out| {
            tracing::trace!("Training step ran {} exits", out.n_layers);
            out.loss
        })
    }
}

impl<B: Backend> ValidStep<B, ClassificationBatch<B>> for MultiLayerClassifier<B> {
    fn valid_step(&self, batch: &ClassificationBatch<B>, settings: &ExitSettings) -> EvalStep {
        let out  = self.forward_infer(batch, settings);
        tracing::trace!("Validation batch ran {} exits", out.n_layers);
        let gold = batch.gold.as_deref().unwrap_or_default();
        let correct = out
            .probs
            .iter()
            .zip(gold)
            .filter(|(row, &g)| argmax(row) == g)
            .count();

        EvalStep {
            loss:           out.loss.map_or(0.0, scalar),
            total:          gold.len(),
            exit_positions: out.exit_positions,
            correct,
        }
    }
}

// ─── Question answering ───────────────────────────────────────────────────────
impl<B: AutodiffBackend> TrainStep<B, QaBatch<B>> for MultilossQa<B> {
    fn train_loss(&self, batch: QaBatch<B>, settings: &ExitSettings, rng: &mut StdRng) -> Option<Tensor<B, 1>> {
        self.forward_train(batch, settings, rng).map(|out| {
            tracing::trace!("Training step ran {} exits", out.n_layers);
            out.loss
        })
    }
}

impl<B: Backend> ValidStep<B, QaBatch<B>> for MultilossQa<B> {
    /// Counts windows whose argmax start and end both hit the gold span.
    fn valid_step(&self, batch: &QaBatch<B>, settings: &ExitSettings) -> EvalStep {
        let out = self.forward_infer(batch, settings);
        tracing::trace!("Validation batch ran {} exits", out.n_layers);
        let predicted: Vec<(usize, usize)> = out
            .start_probs
            .iter()
            .zip(&out.end_probs)
            .map(|(s, e)| (argmax(s), argmax(e)))
            .collect();
        let gold: Vec<(usize, usize)> = batch
            .gold_starts
            .iter()
            .copied()
            .zip(batch.gold_ends.iter().copied())
            .collect();

        let mut spans = SpanAccuracy::new();
        spans.update(&predicted, &gold);

        EvalStep {
            loss:           scalar(out.loss),
            exit_positions: out.exit_positions,
            correct:        spans.correct(),
            total:          spans.total(),
        }
    }
}
