// ============================================================
// Layer 5 — Training Loop
// ============================================================
// One loop for both tasks, driven through TrainStep / ValidStep.
//
// Per epoch:
//   train  — forward loss → backward → Adam step, on the
//            autodiff backend; multitask depth sampling uses a
//            seeded StdRng so runs are repeatable
//   valid  — model.valid() (inner backend, dropout off) with
//            early exit exactly as at inference time
//   record — metrics.csv row, checkpoint, best-epoch pointer
//
// Key Burn insight:
//   - Training uses TrainBackend (Autodiff<Wgpu>) for gradients
//   - model.valid() returns the model on InferBackend (Wgpu)
//   - so the validation batcher must also use InferBackend
//
// Reference: Burn Book §5, Kingma & Ba (2015) Adam

use anyhow::Result;
use burn::{
    data::dataloader::DataLoader,
    module::AutodiffModule,
    optim::{AdamConfig, GradientsParams, Optimizer},
    prelude::*,
    tensor::backend::AutodiffBackend,
};
use rand::{rngs::StdRng, SeedableRng};
use std::sync::Arc;

use crate::domain::exit::ExitSettings;
use crate::infra::checkpoint::CheckpointManager;
use crate::infra::metrics_log::{EpochMetrics, MetricsLogger};
use crate::ml::metrics::{CategoricalAccuracy, ExitLayerCounter};
use crate::ml::task::{TrainStep, ValidStep};
use crate::domain::traits::Metric;

pub type TrainBackend = burn::backend::Autodiff<burn::backend::Wgpu>;
pub type InferBackend = burn::backend::Wgpu;

#[derive(Debug, Clone)]
pub struct TrainerOptions {
    pub epochs: usize,
    pub lr:     f64,
    pub seed:   u64,
}

/// Aggregate of one pass over a validation / evaluation loader.
#[derive(Debug, Clone)]
pub struct EvalSummary {
    pub loss:     f64,
    pub accuracy: CategoricalAccuracy,
    pub exits:    ExitLayerCounter,
}

impl EvalSummary {
    pub fn accuracy(&mut self) -> f64 {
        self.accuracy.get_metric(false)
    }
}

#[derive(Debug, Clone)]
pub struct FitReport {
    pub best_epoch:    usize,
    pub best_val_loss: f64,
    pub history:       Vec<EpochMetrics>,
}

/// Run every batch of `loader` through `model` with early exit.
pub fn run_validation<B, M, T>(
    model:    &M,
    loader:   &Arc<dyn DataLoader<T>>,
    settings: &ExitSettings,
) -> EvalSummary
where
    B: Backend,
    M: ValidStep<B, T>,
{
    let mut loss_sum = 0.0f64;
    let mut batches  = 0usize;
    let mut accuracy = CategoricalAccuracy::new();
    let mut exits    = ExitLayerCounter::new(settings.num_exits());

    for batch in loader.iter() {
        let step = model.valid_step(&batch, settings);
        loss_sum += step.loss;
        batches  += 1;
        accuracy.update_counts(step.correct, step.total);
        exits.update(&step.exit_positions);
    }

    EvalSummary {
        loss: if batches > 0 { loss_sum / batches as f64 } else { f64::NAN },
        accuracy,
        exits,
    }
}

/// Train `model` for `opts.epochs` epochs and keep the best checkpoint.
pub fn fit<B, M, TB, VB>(
    mut model:    M,
    train_loader: Arc<dyn DataLoader<TB>>,
    val_loader:   Arc<dyn DataLoader<VB>>,
    settings:     &ExitSettings,
    opts:         &TrainerOptions,
    ckpt:         &CheckpointManager,
    logger:       &MetricsLogger,
) -> Result<(M, FitReport)>
where
    B: AutodiffBackend,
    M: AutodiffModule<B> + TrainStep<B, TB>,
    M::InnerModule: ValidStep<B::InnerBackend, VB>,
{
    // ── Adam optimiser ────────────────────────────────────────────────────────
    let mut optim = AdamConfig::new().with_epsilon(1e-8).init::<B, M>();
    let mut rng   = StdRng::seed_from_u64(opts.seed);

    let mut best_epoch    = 0usize;
    let mut best_val_loss = f64::INFINITY;
    let mut history       = Vec::with_capacity(opts.epochs);

    for epoch in 1..=opts.epochs {
        // ── Training phase ────────────────────────────────────────────────────
        let mut train_loss_sum = 0.0f64;
        let mut train_batches  = 0usize;

        for batch in train_loader.iter() {
            let Some(loss) = model.train_loss(batch, settings, &mut rng) else {
                tracing::warn!("Skipping a training batch without labels");
                continue;
            };

            train_loss_sum += loss.clone().into_scalar().elem::<f64>();
            train_batches  += 1;

            let grads = loss.backward();
            let grads = GradientsParams::from_grads(grads, &model);
            model = optim.step(opts.lr, model, grads);
        }

        let avg_train_loss = if train_batches > 0 {
            train_loss_sum / train_batches as f64
        } else { f64::NAN };

        // ── Validation phase ──────────────────────────────────────────────────
        let model_valid = model.valid();
        let mut summary = run_validation(&model_valid, &val_loader, settings);

        let metrics = EpochMetrics {
            epoch,
            train_loss:     avg_train_loss,
            val_loss:       summary.loss,
            val_accuracy:   summary.accuracy(),
            avg_exit_layer: summary.exits.average_layer(&settings.layer_indices),
        };

        println!(
            "Epoch {:>3}/{} | train_loss={:.4} | val_loss={:.4} | val_acc={:.1}% | avg_exit_layer={:.2}",
            epoch, opts.epochs, metrics.train_loss, metrics.val_loss,
            metrics.val_accuracy * 100.0, metrics.avg_exit_layer,
        );
        tracing::debug!("Exit histogram: {:?}", summary.exits.fractions());

        logger.log(&metrics)?;
        ckpt.save_model(&model, epoch)?;

        // NaN never improves, so keep the first epoch as a fallback
        if metrics.is_improvement(best_val_loss) || best_epoch == 0 {
            best_epoch    = epoch;
            best_val_loss = metrics.val_loss;
            ckpt.mark_best(epoch)?;
            tracing::info!("New best epoch {} (val_loss={:.4})", epoch, metrics.val_loss);
        }
        history.push(metrics);
    }

    tracing::info!("Training complete! Best epoch: {}", best_epoch);
    Ok((model, FitReport { best_epoch, best_val_loss, history }))
}
