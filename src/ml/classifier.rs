// ============================================================
// Layer 5 — Multi-Layer Early-Exit Classifier
// ============================================================
// One linear head per exit layer on top of a LayeredBert.
//
// At exit i (encoder layer l_i):
//
//   pooled_i  = Dropout(pooler(hidden_{l_i}))
//   weighted  = Σ_a ŵ_i[a] · pooled_a      a = 0..=i
//               (einsum "a,abc->bc", ŵ_i = w_i / ‖w_i‖)
//   features  = [weighted ; logits_0 ; … ; logits_{i-1}]
//               (only with add_previous_layer_logits)
//   logits_i  = head_i(features)
//   probs_i   = softmax(logits_i / T_i)
//
// Training runs every exit and sums the losses, or samples a
// depth n in 1..=k and uses only the loss of exit n-1
// (multitask). Inference stops each instance at the first exit
// whose calibrated confidence reaches the threshold; the batch
// keeps going until all of its instances have stopped.
//
// Reference: Schwartz et al. (2020) The Right Tool for the Job

use burn::{
    module::Param,
    nn::{
        loss::CrossEntropyLossConfig,
        Dropout, DropoutConfig,
        Initializer,
        Linear, LinearConfig,
    },
    prelude::*,
    tensor::activation::softmax,
};
use rand::Rng;
use serde::Serialize;

use crate::data::batcher::{ClassificationBatch, EncoderInput};
use crate::domain::exit::{argmax, exit_decisions, max_value, ExitSettings, ExitTracker};
use crate::domain::vocabulary::LabelVocabulary;
use crate::ml::encoder::{BertConfig, LayeredBert};

#[derive(Config, Debug)]
pub struct MultiLayerClassifierConfig {
    pub bert:                      BertConfig,
    pub num_labels:                usize,
    pub num_exits:                 usize,
    #[config(default = true)]
    pub add_previous_layer_logits: bool,
    #[config(default = 0.0)]
    pub dropout:                   f64,
    /// Standard deviation of the head initialiser
    #[config(default = 0.02)]
    pub head_init_std:             f64,
}

impl MultiLayerClassifierConfig {
    /// Input width of head `position`.
    pub fn head_input(&self, position: usize) -> usize {
        let extra = if self.add_previous_layer_logits { position * self.num_labels } else { 0 };
        self.bert.hidden_size + extra
    }

    pub fn init<B: Backend>(&self, device: &B::Device) -> MultiLayerClassifier<B> {
        self.init_with(self.bert.init(device), device)
    }

    /// Wrap an already built (e.g. pretrained) encoder.
    pub fn init_with<B: Backend>(&self, encoder: LayeredBert<B>, device: &B::Device) -> MultiLayerClassifier<B> {
        let head_init = Initializer::Normal { mean: 0.0, std: self.head_init_std };
        let heads = (0..self.num_exits)
            .map(|i| {
                LinearConfig::new(self.head_input(i), self.num_labels)
                    .with_initializer(head_init.clone())
                    .init(device)
            })
            .collect();
        let exit_heads = ExitHeads {
            heads,
            sum_weights: init_sum_weights(self.num_exits, device),
        };

        MultiLayerClassifier {
            encoder,
            exit_heads,
            dropout:                   DropoutConfig::new(self.dropout).init(),
            num_labels:                self.num_labels,
            add_previous_layer_logits: self.add_previous_layer_logits,
        }
    }
}

/// w_i ∈ R^{i+1}, drawn from N(0, 1).
pub fn init_sum_weights<B: Backend>(num_exits: usize, device: &B::Device) -> Vec<Param<Tensor<B, 1>>> {
    let init = Initializer::Normal { mean: 0.0, std: 1.0 };
    (0..num_exits).map(|i| init.init([i + 1], device)).collect()
}

/// Σ_a ŵ[a] · stack[a] with ŵ the unit-length version of `weights`.
///
/// `pooled` holds one [batch, hidden] tensor per exit reached so far.
pub fn weighted_sum<B: Backend>(weights: Tensor<B, 1>, pooled: &[Tensor<B, 2>]) -> Tensor<B, 2> {
    let n    = pooled.len();
    let norm = weights.clone().powf_scalar(2.0).sum().sqrt().clamp_min(1e-12);
    let unit = (weights / norm).reshape([n, 1, 1]);

    let stacked: Tensor<B, 3> = Tensor::stack(pooled.to_vec(), 0);
    (stacked * unit).sum_dim(0).squeeze::<2>(0)
}

// ─── Model ────────────────────────────────────────────────────────────────────
/// Heads and sum weights, saved and restored on their own (`linear_layers`).
#[derive(Module, Debug)]
pub struct ExitHeads<B: Backend> {
    pub heads:       Vec<Linear<B>>,
    pub sum_weights: Vec<Param<Tensor<B, 1>>>,
}

#[derive(Module, Debug)]
pub struct MultiLayerClassifier<B: Backend> {
    pub encoder:                   LayeredBert<B>,
    pub exit_heads:                ExitHeads<B>,
    pub dropout:                   Dropout,
    pub num_labels:                usize,
    pub add_previous_layer_logits: bool,
}

/// Walks the exits of one batch in order, carrying the hidden state,
/// the pooled vectors and the logits of the exits already run.
struct ExitCursor<'a, B: Backend> {
    model:    &'a MultiLayerClassifier<B>,
    input:    &'a EncoderInput<B>,
    settings: &'a ExitSettings,
    hidden:   Option<Tensor<B, 3>>,
    pooled:   Vec<Tensor<B, 2>>,
    logits:   Vec<Tensor<B, 2>>,
}

impl<'a, B: Backend> ExitCursor<'a, B> {
    fn new(model: &'a MultiLayerClassifier<B>, input: &'a EncoderInput<B>, settings: &'a ExitSettings) -> Self {
        Self { model, input, settings, hidden: None, pooled: Vec::new(), logits: Vec::new() }
    }

    /// Run the next exit and return its raw logits [batch, num_labels].
    fn advance(&mut self) -> Tensor<B, 2> {
        let position = self.logits.len();
        let start    = self.settings.start_layer(position);

        let segment = self.model.encoder.forward_segment(
            self.input,
            start,
            self.settings.layer_indices[position],
            self.hidden.take(),
        );
        self.hidden = Some(segment.hidden);
        self.pooled.push(self.model.dropout.forward(segment.pooled));

        let weights  = self.model.exit_heads.sum_weights[position].val();
        let weighted = weighted_sum(weights, &self.pooled);

        // Earlier exits contribute raw logits, not logits / T_i:
        // temperatures only shape confidences and never reach a head.
        let features = if self.model.add_previous_layer_logits && position > 0 {
            let mut parts = Vec::with_capacity(position + 1);
            parts.push(weighted);
            parts.extend(self.logits.iter().cloned());
            Tensor::cat(parts, 1)
        } else {
            weighted
        };

        let logits = self.model.exit_heads.heads[position].forward(features);
        self.logits.push(logits.clone());
        logits
    }
}

/// Result of a training forward pass.
pub struct ClassifierTrainOutput<B: Backend> {
    pub loss:     Tensor<B, 1>,
    /// Exits the sampled depth ran
    pub n_layers: usize,
}

/// Result of an inference forward pass, one entry per instance.
pub struct ClassifierOutput<B: Backend> {
    /// Logits of the exit each instance stopped at [batch, num_labels]
    pub logits:         Tensor<B, 2>,
    /// softmax(logits / T) at that exit
    pub probs:          Vec<Vec<f32>>,
    /// Exit position (0-based index into layer_indices)
    pub exit_positions: Vec<usize>,
    /// Encoder layer of that exit
    pub selected_layer: Vec<usize>,
    /// Cross-entropy of `logits` when the batch is labelled
    pub loss:           Option<Tensor<B, 1>>,
    /// Exits computed for the batch
    pub n_layers:       usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LabelPrediction {
    pub label:          String,
    pub probability:    f32,
    pub probs:          Vec<f32>,
    /// Raw logits of the exit that answered
    pub logits:         Vec<f32>,
    pub selected_layer: usize,
}

/// Row-major [rows, cols] tensor → Vec of rows.
pub(crate) fn tensor_rows<B: Backend>(t: Tensor<B, 2>) -> Vec<Vec<f32>> {
    let [_, cols] = t.dims();
    let flat: Vec<f32> = t.into_data().convert::<f32>().to_vec().unwrap_or_default();
    if cols == 0 {
        return Vec::new();
    }
    flat.chunks(cols).map(<[f32]>::to_vec).collect()
}

/// softmax(logits / T) along the last dimension.
pub fn scaled_probs<B: Backend>(logits: Tensor<B, 2>, temperature: f64) -> Tensor<B, 2> {
    softmax(logits.div_scalar(temperature), 1)
}

/// Per-row selection Σ_i mask_i · logits_i, where mask_i marks the
/// instances that stopped at exit i.
pub(crate) fn select_rows<B: Backend, const D: usize>(
    per_exit: &[Tensor<B, D>],
    exits:    &[usize],
) -> Tensor<B, D> {
    let device = per_exit[0].device();
    let batch  = exits.len();
    let mut selected: Option<Tensor<B, D>> = None;

    for (i, logits) in per_exit.iter().enumerate() {
        let mask: Vec<f32> = exits.iter().map(|&e| if e == i { 1.0 } else { 0.0 }).collect();
        let mut shape = [1usize; D];
        shape[0] = batch;
        let mask = Tensor::<B, 1>::from_floats(mask.as_slice(), &device).reshape(shape);
        let part = logits.clone() * mask;
        selected = Some(match selected {
            Some(acc) => acc + part,
            None      => part,
        });
    }
    selected.unwrap_or_else(|| per_exit[0].zeros_like())
}

impl<B: Backend> MultiLayerClassifier<B> {
    pub fn num_exits(&self) -> usize {
        self.exit_heads.heads.len()
    }

    fn cross_entropy(&self, logits: Tensor<B, 2>, labels: Tensor<B, 1, Int>) -> Tensor<B, 1> {
        CrossEntropyLossConfig::new()
            .init(&logits.device())
            .forward(logits, labels)
    }

    /// Raw logits of the first `n` exits.
    pub fn forward_exits(&self, input: &EncoderInput<B>, settings: &ExitSettings, n: usize) -> Vec<Tensor<B, 2>> {
        let mut cursor = ExitCursor::new(self, input, settings);
        for _ in 0..n {
            cursor.advance();
        }
        cursor.logits
    }

    /// Training pass: summed loss over all exits, or the loss of one
    /// randomly deep exit when `settings.multitask`.
    pub fn forward_train<R: Rng>(
        &self,
        batch:    ClassificationBatch<B>,
        settings: &ExitSettings,
        rng:      &mut R,
    ) -> Option<ClassifierTrainOutput<B>> {
        let labels = batch.labels?;
        let k      = settings.num_exits();
        let n      = if settings.multitask { rng.gen_range(1..=k) } else { k };

        let logits = self.forward_exits(&batch.input, settings, n);
        let last   = logits.last()?.clone();

        let loss = if settings.multitask || n == 1 {
            self.cross_entropy(last, labels)
        } else {
            logits
                .into_iter()
                .map(|l| self.cross_entropy(l, labels.clone()))
                .reduce(|a, b| a + b)?
        };

        Some(ClassifierTrainOutput { loss, n_layers: n })
    }

    /// Inference pass with per-instance early exit.
    pub fn forward_infer(&self, batch: &ClassificationBatch<B>, settings: &ExitSettings) -> ClassifierOutput<B> {
        let batch_size = batch.input.batch_size();
        let k          = settings.num_exits();
        let gold       = batch.gold.as_deref();

        let mut cursor  = ExitCursor::new(self, &batch.input, settings);
        let mut tracker = ExitTracker::new(batch_size);
        let mut probs: Vec<Vec<Vec<f32>>> = Vec::with_capacity(k);

        for position in 0..k {
            let logits = cursor.advance();
            let rows   = tensor_rows(scaled_probs(logits, settings.temperatures[position]));

            if settings.exits_early() {
                tracker.observe(position, &exit_decisions(settings, &rows, gold));
            }
            probs.push(rows);
            if tracker.all_resolved() {
                break;
            }
        }

        let n_layers       = cursor.logits.len();
        tracing::trace!(
            "Batch of {} ran {} of {} exits, {} decided by the exit rule",
            batch_size,
            n_layers,
            k,
            tracker.resolved_count()
        );
        let exit_positions = tracker.finish(n_layers - 1);
        let selected       = select_rows(&cursor.logits, &exit_positions);

        let instance_probs = exit_positions
            .iter()
            .enumerate()
            .map(|(row, &e)| probs[e].get(row).cloned().unwrap_or_default())
            .collect();
        let selected_layer = exit_positions
            .iter()
            .map(|&e| settings.layer_indices[e])
            .collect();
        let loss = batch
            .labels
            .clone()
            .map(|labels| self.cross_entropy(selected.clone(), labels));

        ClassifierOutput {
            logits: selected,
            probs: instance_probs,
            exit_positions,
            selected_layer,
            loss,
            n_layers,
        }
    }

    /// Replace the exit heads (and sum weights) with saved ones.
    pub fn with_heads(mut self, heads: ExitHeads<B>) -> Self {
        self.exit_heads = heads;
        self
    }

    /// Freeze the encoder; only heads and sum weights keep learning.
    pub fn freeze_encoder(mut self) -> Self {
        self.encoder = self.encoder.freeze();
        self
    }
}

/// Argmax of each probability row → label string.
pub fn decode<B: Backend>(output: &ClassifierOutput<B>, vocab: &LabelVocabulary) -> Vec<LabelPrediction> {
    let logits = tensor_rows(output.logits.clone());
    output
        .probs
        .iter()
        .zip(logits)
        .zip(&output.selected_layer)
        .map(|((row, logits), &layer)| {
            let idx = argmax(row);
            LabelPrediction {
                label:          vocab.get_token_from_index(idx).unwrap_or("").to_string(),
                probability:    max_value(row),
                probs:          row.clone(),
                logits,
                selected_layer: layer,
            }
        })
        .collect()
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::batcher::ClassificationBatcher;
    use crate::data::features::ClassificationItem;
    use crate::domain::exit::ExitPolicy;
    use crate::ml::encoder::tiny_config;
    use burn::{
        backend::{Autodiff, NdArray},
        data::dataloader::batcher::Batcher,
    };
    use rand::{rngs::StdRng, SeedableRng};

    type TestBackend = NdArray;

    fn settings(threshold: Option<f64>) -> ExitSettings {
        ExitSettings::from_options("0,1,2", "1", threshold, false, 3).unwrap()
    }

    fn config() -> MultiLayerClassifierConfig {
        MultiLayerClassifierConfig::new(tiny_config(), 3, 3)
    }

    fn batch<B: Backend>(device: &B::Device) -> ClassificationBatch<B> {
        labelled_batch(device, [0, 2])
    }

    fn labelled_batch<B: Backend>(device: &B::Device, labels: [usize; 2]) -> ClassificationBatch<B> {
        let items = vec![
            ClassificationItem { input_ids: vec![101, 5, 6, 102], token_type_ids: vec![0; 4], label: Some(labels[0]) },
            ClassificationItem { input_ids: vec![101, 7, 102],    token_type_ids: vec![0; 3], label: Some(labels[1]) },
        ];
        ClassificationBatcher::<B>::new(device.clone(), 0).batch(items)
    }

    fn assert_rows_close(a: &[f32], b: &[f32]) {
        assert_eq!(a.len(), b.len());
        for (x, y) in a.iter().zip(b) {
            assert!((x - y).abs() < 1e-5, "{a:?} != {b:?}");
        }
    }

    #[test]
    fn test_head_input_widths() {
        let cfg = config();
        assert_eq!(cfg.head_input(0), 8);
        assert_eq!(cfg.head_input(2), 8 + 2 * 3);
        let cfg = cfg.with_add_previous_layer_logits(false);
        assert_eq!(cfg.head_input(2), 8);
    }

    #[test]
    fn test_weighted_sum_uses_unit_weights() {
        let device = Default::default();
        let a = Tensor::<TestBackend, 2>::from_floats([[1.0, 0.0]], &device);
        let b = Tensor::<TestBackend, 2>::from_floats([[0.0, 1.0]], &device);
        // (3, 4) normalises to (0.6, 0.8)
        let w = Tensor::<TestBackend, 1>::from_floats([3.0, 4.0], &device);
        let out: Vec<f32> = weighted_sum(w, &[a, b]).into_data().to_vec().unwrap();
        assert!((out[0] - 0.6).abs() < 1e-6);
        assert!((out[1] - 0.8).abs() < 1e-6);
    }

    #[test]
    fn test_no_threshold_runs_every_exit() {
        let device = Default::default();
        let model  = config().init::<TestBackend>(&device);
        let out    = model.forward_infer(&batch(&device), &settings(None));
        assert_eq!(out.n_layers, 3);
        assert_eq!(out.exit_positions, vec![2, 2]);
        assert_eq!(out.selected_layer, vec![2, 2]);
        assert!(out.loss.is_some());
        for row in &out.probs {
            let sum: f32 = row.iter().sum();
            assert!((sum - 1.0).abs() < 1e-4);
        }
    }

    #[test]
    fn test_zero_threshold_exits_at_first_layer() {
        let device = Default::default();
        let model  = config().init::<TestBackend>(&device);
        let out    = model.forward_infer(&batch(&device), &settings(Some(0.0)));
        assert_eq!(out.n_layers, 1);
        assert_eq!(out.exit_positions, vec![0, 0]);
    }

    #[test]
    fn test_never_policy_ignores_threshold() {
        let device = Default::default();
        let model  = config().init::<TestBackend>(&device);
        let mut s  = settings(Some(0.0));
        s.policy   = ExitPolicy::Never;
        let out    = model.forward_infer(&batch(&device), &s);
        assert_eq!(out.n_layers, 3);
    }

    #[test]
    fn test_select_rows_picks_each_instance_exit() {
        let device = Default::default();
        let e0 = Tensor::<TestBackend, 2>::from_floats([[1.0, 1.0], [2.0, 2.0]], &device);
        let e1 = Tensor::<TestBackend, 2>::from_floats([[5.0, 5.0], [6.0, 6.0]], &device);
        let out: Vec<f32> = select_rows(&[e0, e1], &[1, 0]).into_data().to_vec().unwrap();
        assert_eq!(out, vec![5.0, 5.0, 2.0, 2.0]);
    }

    #[test]
    fn test_train_loss_is_finite_and_backpropagates() {
        type AdBackend = Autodiff<NdArray>;
        let device = Default::default();
        let model  = config().init::<AdBackend>(&device);
        let mut rng = StdRng::seed_from_u64(3);

        let out = model
            .forward_train(batch(&device), &settings(None), &mut rng)
            .unwrap();
        assert_eq!(out.n_layers, 3);
        let loss: f32 = out.loss.clone().into_scalar().elem();
        assert!(loss.is_finite() && loss > 0.0);

        let grads = out.loss.backward();
        let head0 = model.exit_heads.heads[0].weight.grad(&grads);
        assert!(head0.is_some());
    }

    #[test]
    fn test_multitask_samples_depth_in_range() {
        type AdBackend = Autodiff<NdArray>;
        let device = Default::default();
        let model  = config().init::<AdBackend>(&device);
        let mut s  = settings(None);
        s.multitask = true;
        let mut rng = StdRng::seed_from_u64(11);
        for _ in 0..5 {
            let out = model.forward_train(batch(&device), &s, &mut rng).unwrap();
            assert!((1..=3).contains(&out.n_layers));
        }
    }

    #[test]
    fn test_frozen_encoder_gets_no_gradient() {
        type AdBackend = Autodiff<NdArray>;
        let device = Default::default();
        let model  = config().init::<AdBackend>(&device).freeze_encoder();
        let mut rng = StdRng::seed_from_u64(1);
        let out   = model.forward_train(batch(&device), &settings(None), &mut rng).unwrap();
        let grads = out.loss.backward();
        assert!(model.encoder.pooler.weight.grad(&grads).is_none());
        assert!(model.exit_heads.heads[2].weight.grad(&grads).is_some());
    }

    #[test]
    fn test_decode_maps_argmax_to_label() {
        let device = Default::default();
        let model  = config().init::<TestBackend>(&device);
        let out    = model.forward_infer(&batch(&device), &settings(None));
        let vocab  = LabelVocabulary::from_labels(["neg", "neu", "pos"]);
        let preds  = decode(&out, &vocab);
        assert_eq!(preds.len(), 2);
        for (p, row) in preds.iter().zip(&out.probs) {
            assert_eq!(vocab.get_index(&p.label), Some(argmax(row)));
            assert_eq!(argmax(&p.logits), argmax(row));
            assert_eq!(p.logits.len(), 3);
            assert_eq!(p.selected_layer, 2);
        }
    }

    #[test]
    fn test_oracle_policy_stops_at_first_correct_exit() {
        let device = Default::default();
        let model  = config().init::<TestBackend>(&device);
        let input  = batch::<TestBackend>(&device).input;
        let preds: Vec<Vec<usize>> = model
            .forward_exits(&input, &settings(None), 3)
            .into_iter()
            .map(|l| tensor_rows(l).iter().map(|r| argmax(r)).collect())
            .collect();

        // gold taken from a deeper exit so at least one instance may run past exit 0
        let gold     = [preds[1][0], preds[2][1]];
        let expected: Vec<usize> = (0..2)
            .map(|i| (0..3).find(|&p| preds[p][i] == gold[i]).unwrap())
            .collect();

        let mut s = settings(None);
        s.policy  = ExitPolicy::Oracle;
        let out   = model.forward_infer(&labelled_batch(&device, gold), &s);
        assert_eq!(out.exit_positions, expected);
        assert_eq!(out.n_layers, expected.iter().max().unwrap() + 1);
        for (row, g) in out.probs.iter().zip(gold) {
            assert_eq!(argmax(row), g);
        }
    }

    #[test]
    fn test_instances_of_one_batch_leave_at_different_exits() {
        let device = Default::default();
        let model  = config().init::<TestBackend>(&device);
        let b      = batch::<TestBackend>(&device);

        let raw: Vec<Vec<Vec<f32>>> = model
            .forward_exits(&b.input, &settings(None), 3)
            .into_iter()
            .map(tensor_rows)
            .collect();
        let probs: Vec<Vec<Vec<f32>>> = model
            .forward_exits(&b.input, &settings(None), 3)
            .into_iter()
            .map(|l| tensor_rows(scaled_probs(l, 1.0)))
            .collect();
        let top: Vec<Vec<f64>> = probs
            .iter()
            .map(|rows| rows.iter().map(|r| f64::from(max_value(r))).collect())
            .collect();
        assert_ne!(top[0][0], top[0][1]);

        // halfway between the two first-exit confidences: exactly one instance stops there
        let threshold = (top[0][0] + top[0][1]) / 2.0;
        let expected: Vec<usize> = (0..2)
            .map(|i| (0..3).find(|&p| top[p][i] >= threshold).unwrap_or(2))
            .collect();
        assert!(expected.contains(&0));
        assert_ne!(expected[0], expected[1]);

        let out = model.forward_infer(&b, &settings(Some(threshold)));
        assert_eq!(out.exit_positions, expected);
        assert_eq!(out.n_layers, expected.iter().max().unwrap() + 1);

        let logits = tensor_rows(out.logits.clone());
        for (i, &e) in expected.iter().enumerate() {
            assert_rows_close(&out.probs[i], &probs[e][i]);
            assert_rows_close(&logits[i], &raw[e][i]);
            assert_eq!(out.selected_layer[i], e);
        }
    }

    #[test]
    fn test_multitask_loss_is_the_sampled_exit_only() {
        let device  = Default::default();
        let model   = config().init::<TestBackend>(&device);
        let mut s   = settings(None);
        s.multitask = true;

        let mut deep = false;
        for seed in 0..20 {
            let mut rng = StdRng::seed_from_u64(seed);
            let out     = model.forward_train(batch(&device), &s, &mut rng).unwrap();

            let b      = batch::<TestBackend>(&device);
            let logits = model.forward_exits(&b.input, &s, out.n_layers);
            let last   = logits.last().unwrap().clone();
            let want: f32 = model.cross_entropy(last, b.labels.unwrap()).into_scalar().elem();
            let got: f32  = out.loss.into_scalar().elem();
            assert!((got - want).abs() < 1e-5, "depth {}: {got} != {want}", out.n_layers);
            deep |= out.n_layers > 1;
        }
        assert!(deep);
    }

    #[test]
    fn test_temperature_does_not_reach_later_heads() {
        let device = Default::default();
        let model  = config().init::<TestBackend>(&device);
        let b      = batch::<TestBackend>(&device);

        let mut hot      = settings(None);
        hot.temperatures = vec![5.0; 3];
        let plain  = model.forward_infer(&b, &settings(None));
        let scaled = model.forward_infer(&b, &hot);

        let (plain_logits, scaled_logits) = (tensor_rows(plain.logits), tensor_rows(scaled.logits));
        for (a, b) in plain_logits.iter().zip(&scaled_logits) {
            assert_rows_close(a, b);
        }
        // only the reported probabilities flatten
        assert!(max_value(&scaled.probs[0]) < max_value(&plain.probs[0]));
    }
}
