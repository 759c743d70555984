// ============================================================
// Layer 5 — ML / Model Layer (Burn)
// ============================================================
// Everything that builds, runs or trains a Burn module lives
// here. The data layer only produces batches and the
// application layer only wires the pieces together.
//
//   encoder.rs     — BERT encoder that can run a slice of its
//                    layers at a time (embeddings, post-norm
//                    self-attention + GELU FFN, tanh pooler)
//   classifier.rs  — exit heads over pooled [CLS] vectors with
//                    learned layer weighting
//   qa.rs          — per-token span heads and answer decoding
//   metrics.rs     — accuracy, exit histogram, SQuAD EM / F1
//   task.rs        — TrainStep / ValidStep for both models
//   trainer.rs     — generic training loop
//   calibration.rs — per-exit temperature fitting
//   inferencer.rs  — checkpoint → model → predictions
//
// Reference: Burn Book §3 (Building Blocks), §5 (Training)
//            Devlin et al. (2019) BERT
//            Schwartz et al. (2020) The Right Tool for the Job

pub mod encoder;
pub mod classifier;
pub mod qa;
pub mod metrics;
pub mod task;
pub mod trainer;
pub mod calibration;
pub mod inferencer;
