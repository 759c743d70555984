// ============================================================
// Layer 5 — Multi-Loss Question Answering
// ============================================================
// Extractive QA with one span head per exit layer.
//
// At exit i (encoder layer l_i), for every token t:
//
//   features_t = [Dropout(hidden_{l_i})_t ; span_logits_0,t ; … ]
//   [start_t, end_t] = head_i(features_t)
//
// so head i has input width H + 2·i when previous logits are
// added. Padding positions get a large negative logit before
// any softmax.
//
//   loss_i       = (CE(start, s) + CE(end, e)) / 2
//   confidence_i = max softmax(start / T_i) · max softmax(end / T_i)
//
// Loss aggregation and early exit follow the classifier: sum
// over exits (or one sampled depth) while training, first
// confident exit per instance at inference.
//
// Span decoding keeps s ≤ e < s + max_answer_len inside the
// context window, scores p_start[s] · p_end[e], and picks the
// best window of each example.
//
// Reference: Devlin et al. (2019) BERT, §4.2 (SQuAD)

use burn::{
    nn::{
        loss::CrossEntropyLossConfig,
        Dropout, DropoutConfig,
        Initializer,
        Linear, LinearConfig,
    },
    prelude::*,
};
use rand::Rng;
use serde::Serialize;

use crate::data::batcher::{EncoderInput, QaBatch};
use crate::data::features::QaFeature;
use crate::domain::exit::{argmax, should_exit, ExitPolicy, ExitSettings, ExitTracker};
use crate::domain::instance::QaExample;
use crate::ml::classifier::{scaled_probs, select_rows, tensor_rows};
use crate::ml::encoder::{BertConfig, LayeredBert};

const MASKED_LOGIT: f32 = -10_000.0;

#[derive(Config, Debug)]
pub struct MultilossQaConfig {
    pub bert:                      BertConfig,
    pub num_exits:                 usize,
    #[config(default = true)]
    pub add_previous_layer_logits: bool,
    #[config(default = 0.0)]
    pub dropout:                   f64,
    #[config(default = 0.02)]
    pub head_init_std:             f64,
}

impl MultilossQaConfig {
    pub fn head_input(&self, position: usize) -> usize {
        let extra = if self.add_previous_layer_logits { 2 * position } else { 0 };
        self.bert.hidden_size + extra
    }

    pub fn init<B: Backend>(&self, device: &B::Device) -> MultilossQa<B> {
        self.init_with(self.bert.init(device), device)
    }

    pub fn init_with<B: Backend>(&self, encoder: LayeredBert<B>, device: &B::Device) -> MultilossQa<B> {
        let head_init = Initializer::Normal { mean: 0.0, std: self.head_init_std };
        let heads = (0..self.num_exits)
            .map(|i| {
                LinearConfig::new(self.head_input(i), 2)
                    .with_initializer(head_init.clone())
                    .init(device)
            })
            .collect();

        MultilossQa {
            encoder,
            span_heads:                SpanHeads { heads },
            dropout:                   DropoutConfig::new(self.dropout).init(),
            add_previous_layer_logits: self.add_previous_layer_logits,
        }
    }
}

#[derive(Module, Debug)]
pub struct SpanHeads<B: Backend> {
    pub heads: Vec<Linear<B>>,
}

#[derive(Module, Debug)]
pub struct MultilossQa<B: Backend> {
    pub encoder:                   LayeredBert<B>,
    pub span_heads:                SpanHeads<B>,
    pub dropout:                   Dropout,
    pub add_previous_layer_logits: bool,
}

/// Start / end logits of one exit, padding already masked.
#[derive(Debug, Clone)]
pub struct SpanLogits<B: Backend> {
    pub start: Tensor<B, 2>,
    pub end:   Tensor<B, 2>,
}

struct SpanCursor<'a, B: Backend> {
    model:    &'a MultilossQa<B>,
    input:    &'a EncoderInput<B>,
    settings: &'a ExitSettings,
    hidden:   Option<Tensor<B, 3>>,
    /// Unmasked [batch, seq, 2] logits, fed to later heads
    raw:      Vec<Tensor<B, 3>>,
    spans:    Vec<SpanLogits<B>>,
}

impl<'a, B: Backend> SpanCursor<'a, B> {
    fn new(model: &'a MultilossQa<B>, input: &'a EncoderInput<B>, settings: &'a ExitSettings) -> Self {
        Self { model, input, settings, hidden: None, raw: Vec::new(), spans: Vec::new() }
    }

    fn advance(&mut self) -> SpanLogits<B> {
        let position = self.spans.len();
        let start    = self.settings.start_layer(position);

        let segment = self.model.encoder.forward_segment(
            self.input,
            start,
            self.settings.layer_indices[position],
            self.hidden.take(),
        );
        let features = self.model.dropout.forward(segment.hidden.clone());
        self.hidden = Some(segment.hidden);

        // Earlier exits contribute raw logits, not logits / T_i:
        // temperatures only shape confidences and never reach a head.
        let features = if self.model.add_previous_layer_logits && position > 0 {
            let mut parts = Vec::with_capacity(position + 1);
            parts.push(features);
            parts.extend(self.raw.iter().cloned());
            Tensor::cat(parts, 2)
        } else {
            features
        };

        let logits = self.model.span_heads.heads[position].forward(features);
        let [batch_size, seq_len, _] = logits.dims();
        self.raw.push(logits.clone());

        let mask  = self.input.mask_pad.clone();
        let split = |k: usize| {
            logits
                .clone()
                .slice([0..batch_size, 0..seq_len, k..k + 1])
                .reshape([batch_size, seq_len])
                .mask_fill(mask.clone(), MASKED_LOGIT)
        };
        let span = SpanLogits { start: split(0), end: split(1) };
        self.spans.push(span.clone());
        span
    }
}

pub struct QaTrainOutput<B: Backend> {
    pub loss:     Tensor<B, 1>,
    pub n_layers: usize,
}

pub struct QaOutput<B: Backend> {
    /// softmax(start / T) at each instance's exit
    pub start_probs:    Vec<Vec<f32>>,
    pub end_probs:      Vec<Vec<f32>>,
    pub exit_positions: Vec<usize>,
    pub selected_layer: Vec<usize>,
    /// Span loss of the selected logits
    pub loss:           Tensor<B, 1>,
    pub n_layers:       usize,
}

impl<B: Backend> MultilossQa<B> {
    pub fn num_exits(&self) -> usize {
        self.span_heads.heads.len()
    }

    fn span_loss(&self, span: SpanLogits<B>, starts: Tensor<B, 1, Int>, ends: Tensor<B, 1, Int>) -> Tensor<B, 1> {
        let ce = CrossEntropyLossConfig::new().init(&span.start.device());
        (ce.forward(span.start, starts) + ce.forward(span.end, ends)).div_scalar(2.0)
    }

    /// Start / end logits of the first `n` exits.
    pub fn forward_exits(&self, input: &EncoderInput<B>, settings: &ExitSettings, n: usize) -> Vec<SpanLogits<B>> {
        let mut cursor = SpanCursor::new(self, input, settings);
        for _ in 0..n {
            cursor.advance();
        }
        cursor.spans
    }

    pub fn forward_train<R: Rng>(
        &self,
        batch:    QaBatch<B>,
        settings: &ExitSettings,
        rng:      &mut R,
    ) -> Option<QaTrainOutput<B>> {
        let k = settings.num_exits();
        let n = if settings.multitask { rng.gen_range(1..=k) } else { k };

        let spans = self.forward_exits(&batch.input, settings, n);
        let loss = if settings.multitask || n == 1 {
            let last = spans.last()?.clone();
            self.span_loss(last, batch.start_positions, batch.end_positions)
        } else {
            spans
                .into_iter()
                .map(|s| self.span_loss(s, batch.start_positions.clone(), batch.end_positions.clone()))
                .reduce(|a, b| a + b)?
        };

        Some(QaTrainOutput { loss, n_layers: n })
    }

    /// Inference with per-instance early exit on span confidence.
    pub fn forward_infer(&self, batch: &QaBatch<B>, settings: &ExitSettings) -> QaOutput<B> {
        let batch_size = batch.input.batch_size();
        let k          = settings.num_exits();

        let mut cursor  = SpanCursor::new(self, &batch.input, settings);
        let mut tracker = ExitTracker::new(batch_size);
        let mut probs: Vec<(Vec<Vec<f32>>, Vec<Vec<f32>>)> = Vec::with_capacity(k);

        for position in 0..k {
            let span   = cursor.advance();
            let t      = settings.temperatures[position];
            let starts = tensor_rows(scaled_probs(span.start, t));
            let ends   = tensor_rows(scaled_probs(span.end, t));

            if settings.exits_early() {
                let decisions = span_decisions(settings, &starts, &ends, &batch.gold_starts, &batch.gold_ends);
                tracker.observe(position, &decisions);
            }
            probs.push((starts, ends));
            if tracker.all_resolved() {
                break;
            }
        }

        let n_layers       = cursor.spans.len();
        tracing::trace!(
            "QA batch of {} ran {} of {} exits, {} decided by the exit rule",
            batch_size,
            n_layers,
            k,
            tracker.resolved_count()
        );
        let exit_positions = tracker.finish(n_layers - 1);

        let starts: Vec<Tensor<B, 2>> = cursor.spans.iter().map(|s| s.start.clone()).collect();
        let ends: Vec<Tensor<B, 2>>   = cursor.spans.iter().map(|s| s.end.clone()).collect();
        let selected = SpanLogits {
            start: select_rows(&starts, &exit_positions),
            end:   select_rows(&ends, &exit_positions),
        };
        let loss = self.span_loss(selected, batch.start_positions.clone(), batch.end_positions.clone());

        let mut start_probs = Vec::with_capacity(batch_size);
        let mut end_probs   = Vec::with_capacity(batch_size);
        for (row, &e) in exit_positions.iter().enumerate() {
            start_probs.push(probs[e].0.get(row).cloned().unwrap_or_default());
            end_probs.push(probs[e].1.get(row).cloned().unwrap_or_default());
        }

        QaOutput {
            start_probs,
            end_probs,
            selected_layer: exit_positions.iter().map(|&e| settings.layer_indices[e]).collect(),
            exit_positions,
            loss,
            n_layers,
        }
    }

    pub fn with_heads(mut self, heads: SpanHeads<B>) -> Self {
        self.span_heads = heads;
        self
    }

    pub fn freeze_encoder(mut self) -> Self {
        self.encoder = self.encoder.freeze();
        self
    }
}

/// Product of the top start and top end probabilities.
pub fn span_confidence(start_probs: &[f32], end_probs: &[f32]) -> f32 {
    let top = |row: &[f32]| row.iter().copied().fold(0.0f32, f32::max);
    top(start_probs) * top(end_probs)
}

fn span_decisions(
    settings:    &ExitSettings,
    starts:      &[Vec<f32>],
    ends:        &[Vec<f32>],
    gold_starts: &[usize],
    gold_ends:   &[usize],
) -> Vec<bool> {
    match settings.policy {
        ExitPolicy::Never => vec![false; starts.len()],
        ExitPolicy::Confidence => match settings.threshold {
            Some(threshold) => starts
                .iter()
                .zip(ends)
                .map(|(s, e)| should_exit(span_confidence(s, e), threshold))
                .collect(),
            None => vec![false; starts.len()],
        },
        ExitPolicy::Oracle => starts
            .iter()
            .zip(ends)
            .zip(gold_starts.iter().zip(gold_ends))
            .map(|((s, e), (&gs, &ge))| argmax(s) == gs && argmax(e) == ge)
            .collect(),
    }
}

// ─── Span decoding ────────────────────────────────────────────────────────────
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpanCandidate {
    /// Input positions of the first and last answer token
    pub start: usize,
    pub end:   usize,
    pub score: f32,
}

/// Best legal span of one window.
///
/// The start token must be a context token whose best window is this one;
/// the end token must be a context token no more than `max_answer_len - 1`
/// tokens after it.
pub fn best_span(
    start_probs:    &[f32],
    end_probs:      &[f32],
    feature:        &QaFeature,
    max_answer_len: usize,
) -> Option<SpanCandidate> {
    let mut best: Option<SpanCandidate> = None;
    let ctx_end = feature.context_start + feature.context_len();

    for s in feature.context_start..ctx_end.min(start_probs.len()) {
        if !feature.token_is_max_context[s - feature.context_start] {
            continue;
        }
        let last = (s + max_answer_len).min(ctx_end).min(end_probs.len());
        for e in s..last {
            let score = start_probs[s] * end_probs[e];
            if best.map_or(true, |b| score > b.score) {
                best = Some(SpanCandidate { start: s, end: e, score });
            }
        }
    }
    best
}

/// Character range of a span in the example's context.
pub fn span_chars(feature: &QaFeature, span: &SpanCandidate) -> (usize, usize) {
    let first = feature.token_to_orig[span.start - feature.context_start];
    let last  = feature.token_to_orig[span.end - feature.context_start];
    (first.0, last.1)
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnswerPrediction {
    pub id:             String,
    pub answer:         String,
    pub probability:    f32,
    pub selected_layer: usize,
}

/// Decoded window of one example, before picking the best window.
#[derive(Debug, Clone)]
pub struct WindowAnswer {
    pub example_index:  usize,
    pub span:           Option<SpanCandidate>,
    pub chars:          Option<(usize, usize)>,
    pub selected_layer: usize,
}

pub fn decode_window(
    start_probs:    &[f32],
    end_probs:      &[f32],
    feature:        &QaFeature,
    selected_layer: usize,
    max_answer_len: usize,
) -> WindowAnswer {
    let span  = best_span(start_probs, end_probs, feature, max_answer_len);
    let chars = span.as_ref().map(|s| span_chars(feature, s));
    WindowAnswer { example_index: feature.example_index, span, chars, selected_layer }
}

/// Pick the highest scoring window of every example.
///
/// Examples without any legal span answer with an empty string.
pub fn best_answers(examples: &[QaExample], windows: &[WindowAnswer]) -> Vec<AnswerPrediction> {
    let mut best: Vec<Option<&WindowAnswer>> = vec![None; examples.len()];
    for w in windows {
        let Some(span) = w.span else { continue };
        let slot = &mut best[w.example_index];
        let better = slot
            .and_then(|b| b.span)
            .map_or(true, |b| span.score > b.score);
        if better {
            *slot = Some(w);
        }
    }

    examples
        .iter()
        .enumerate()
        .zip(best)
        .map(|((index, example), window)| match window.and_then(|w| w.chars.map(|c| (w, c))) {
            Some((w, (cs, ce))) => AnswerPrediction {
                id:             example.id.clone(),
                answer:         example.context_span(cs, ce),
                probability:    w.span.map_or(0.0, |s| s.score),
                selected_layer: w.selected_layer,
            },
            None => AnswerPrediction {
                id:             example.id.clone(),
                answer:         String::new(),
                probability:    0.0,
                selected_layer: windows
                    .iter()
                    .find(|w| w.example_index == index)
                    .map_or(0, |w| w.selected_layer),
            },
        })
        .collect()
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::batcher::QaBatcher;
    use crate::domain::instance::QaAnswer;
    use crate::ml::encoder::tiny_config;
    use burn::{
        backend::{Autodiff, NdArray},
        data::dataloader::batcher::Batcher,
    };
    use rand::{rngs::StdRng, SeedableRng};

    type TestBackend = NdArray;

    fn feature() -> QaFeature {
        // [CLS] q [SEP] the cat sat [SEP]
        QaFeature {
            example_index:        0,
            input_ids:            vec![101, 9, 102, 20, 21, 22, 102],
            token_type_ids:       vec![0, 0, 0, 1, 1, 1, 1],
            context_start:        3,
            token_to_orig:        vec![(0, 3), (4, 7), (8, 11)],
            token_is_max_context: vec![true, true, true],
            start_position:       4,
            end_position:         5,
        }
    }

    fn settings(threshold: Option<f64>) -> ExitSettings {
        ExitSettings::from_options("1,2", "1", threshold, false, 3).unwrap()
    }

    #[test]
    fn test_best_span_respects_order_and_length() {
        let f = feature();
        //            CLS   q    SEP  the  cat  sat  SEP
        let s = [0.5, 0.0, 0.0, 0.1, 0.6, 0.3, 0.0];
        let e = [0.5, 0.0, 0.0, 0.7, 0.1, 0.2, 0.0];
        // the CLS mass is ignored; end before start is ignored
        let best = best_span(&s, &e, &f, 30).unwrap();
        assert_eq!((best.start, best.end), (4, 5));

        // with length 1 only single-token answers remain
        let best = best_span(&s, &e, &f, 1).unwrap();
        assert_eq!((best.start, best.end), (3, 3));
    }

    #[test]
    fn test_best_span_skips_non_max_context_starts() {
        let mut f = feature();
        f.token_is_max_context = vec![true, false, true];
        let s = [0.0, 0.0, 0.0, 0.1, 0.8, 0.1, 0.0];
        let e = [0.0, 0.0, 0.0, 0.1, 0.8, 0.1, 0.0];
        let best = best_span(&s, &e, &f, 30).unwrap();
        assert_ne!(best.start, 4);
    }

    #[test]
    fn test_best_answers_maps_back_to_text() {
        let example = QaExample {
            id:       "q1".into(),
            question: "who sat".into(),
            context:  "the cat sat".into(),
            answers:  vec![QaAnswer { text: "cat sat".into(), char_start: 4 }],
        };
        let f = feature();
        let s = [0.0, 0.0, 0.0, 0.1, 0.8, 0.1, 0.0];
        let e = [0.0, 0.0, 0.0, 0.1, 0.1, 0.8, 0.0];
        let window = decode_window(&s, &e, &f, 2, 30);
        let answers = best_answers(std::slice::from_ref(&example), &[window]);
        assert_eq!(answers[0].answer, "cat sat");
        assert_eq!(answers[0].selected_layer, 2);
        assert!((answers[0].probability - 0.64).abs() < 1e-6);
    }

    #[test]
    fn test_span_confidence_is_product_of_maxima() {
        assert!((span_confidence(&[0.2, 0.8], &[0.5, 0.5]) - 0.4).abs() < 1e-6);
    }

    #[test]
    fn test_infer_shapes_and_exit_counts() {
        let device = Default::default();
        let model  = MultilossQaConfig::new(tiny_config(), 2).init::<TestBackend>(&device);
        let batch  = QaBatcher::<TestBackend>::new(device, 0).batch(vec![feature(), feature()]);

        let out = model.forward_infer(&batch, &settings(None));
        assert_eq!(out.n_layers, 2);
        assert_eq!(out.selected_layer, vec![2, 2]);
        assert_eq!(out.start_probs[0].len(), 7);

        let out = model.forward_infer(&batch, &settings(Some(0.0)));
        assert_eq!(out.n_layers, 1);
        assert_eq!(out.selected_layer, vec![1, 1]);
    }

    #[test]
    fn test_padding_gets_no_probability() {
        let device = Default::default();
        let model  = MultilossQaConfig::new(tiny_config(), 2).init::<TestBackend>(&device);
        let mut short = feature();
        short.input_ids.truncate(5);
        short.token_type_ids.truncate(5);
        let batch = QaBatcher::<TestBackend>::new(device, 0).batch(vec![feature(), short]);
        let out   = model.forward_infer(&batch, &settings(None));
        assert!(out.start_probs[1][5] < 1e-3);
        assert!(out.end_probs[1][6] < 1e-3);
    }

    #[test]
    fn test_train_loss_backpropagates_into_every_head() {
        type AdBackend = Autodiff<NdArray>;
        let device = Default::default();
        let model  = MultilossQaConfig::new(tiny_config(), 2).init::<AdBackend>(&device);
        let batch  = QaBatcher::<AdBackend>::new(device, 0).batch(vec![feature()]);
        let mut rng = StdRng::seed_from_u64(5);

        let out   = model.forward_train(batch, &settings(None), &mut rng).unwrap();
        let grads = out.loss.backward();
        for head in &model.span_heads.heads {
            assert!(head.weight.grad(&grads).is_some());
        }
    }

    /// Same layout as `feature()` over other context tokens.
    fn other_feature() -> QaFeature {
        QaFeature { input_ids: vec![101, 9, 102, 30, 31, 32, 102], ..feature() }
    }

    fn with_gold(mut f: QaFeature, start: usize, end: usize) -> QaFeature {
        f.start_position = start;
        f.end_position   = end;
        f
    }

    /// Argmax start / end and span confidence of every exit, per window.
    fn exit_summaries(model: &MultilossQa<TestBackend>, batch: &QaBatch<TestBackend>) -> Vec<Vec<(usize, usize, f32)>> {
        model
            .forward_exits(&batch.input, &settings(None), 2)
            .into_iter()
            .map(|span| {
                let starts = tensor_rows(scaled_probs(span.start, 1.0));
                let ends   = tensor_rows(scaled_probs(span.end, 1.0));
                starts
                    .iter()
                    .zip(&ends)
                    .map(|(s, e)| (argmax(s), argmax(e), span_confidence(s, e)))
                    .collect()
            })
            .collect()
    }

    #[test]
    fn test_oracle_policy_needs_start_and_end_right() {
        let device  = Default::default();
        let model   = MultilossQaConfig::new(tiny_config(), 2).init::<TestBackend>(&device);
        let batcher = QaBatcher::<TestBackend>::new(device, 0);
        let summary = exit_summaries(&model, &batcher.batch(vec![feature(), other_feature()]));

        // window 0 is right at exit 0; window 1 only at exit 1 (or earlier by coincidence)
        let (s0, e0, _) = summary[0][0];
        let (s1, e1, _) = summary[1][1];
        let batch = batcher.batch(vec![with_gold(feature(), s0, e0), with_gold(other_feature(), s1, e1)]);
        let expected = vec![
            0,
            usize::from(!(summary[0][1].0 == s1 && summary[0][1].1 == e1)),
        ];

        let mut s = settings(None);
        s.policy  = ExitPolicy::Oracle;
        let out   = model.forward_infer(&batch, &s);
        assert_eq!(out.exit_positions, expected);
        assert_eq!(out.n_layers, expected.iter().max().unwrap() + 1);
        assert_eq!(argmax(&out.start_probs[1]), s1);
        assert_eq!(argmax(&out.end_probs[1]), e1);

        // an end that is never predicted keeps the window running to the last exit
        let miss  = if e0 == 6 { 5 } else { 6 };
        let batch = batcher.batch(vec![with_gold(feature(), s0, miss)]);
        if summary.iter().all(|exit| exit[0].1 != miss) {
            assert_eq!(model.forward_infer(&batch, &s).exit_positions, vec![1]);
        }
    }

    #[test]
    fn test_windows_of_one_batch_leave_at_different_exits() {
        let device  = Default::default();
        let model   = MultilossQaConfig::new(tiny_config(), 2).init::<TestBackend>(&device);
        let batch   = QaBatcher::<TestBackend>::new(device, 0).batch(vec![feature(), other_feature()]);
        let summary = exit_summaries(&model, &batch);

        let (c0, c1) = (summary[0][0].2, summary[0][1].2);
        assert_ne!(c0, c1);
        let threshold = (f64::from(c0) + f64::from(c1)) / 2.0;
        let expected: Vec<usize> = (0..2)
            .map(|w| (0..2).find(|&p| f64::from(summary[p][w].2) >= threshold).unwrap_or(1))
            .collect();
        assert_ne!(expected[0], expected[1]);

        let out = model.forward_infer(&batch, &settings(Some(threshold)));
        assert_eq!(out.exit_positions, expected);
        assert_eq!(out.n_layers, 2);
        for (w, &e) in expected.iter().enumerate() {
            assert_eq!(argmax(&out.start_probs[w]), summary[e][w].0);
            assert_eq!(out.selected_layer[w], settings(None).layer_indices[e]);
        }
    }

    #[test]
    fn test_multitask_loss_is_the_sampled_exit_only() {
        let device  = Default::default();
        let model   = MultilossQaConfig::new(tiny_config(), 2).init::<TestBackend>(&device);
        let batcher = QaBatcher::<TestBackend>::new(device, 0);
        let mut s   = settings(None);
        s.multitask = true;

        let mut depths = Vec::new();
        for seed in 0..20 {
            let mut rng = StdRng::seed_from_u64(seed);
            let out     = model.forward_train(batcher.batch(vec![feature()]), &s, &mut rng).unwrap();

            let b     = batcher.batch(vec![feature()]);
            let spans = model.forward_exits(&b.input, &s, out.n_layers);
            let last  = spans.last().unwrap().clone();
            let want: f32 = model.span_loss(last, b.start_positions, b.end_positions).into_scalar().elem();
            let got: f32  = out.loss.into_scalar().elem();
            assert!((got - want).abs() < 1e-5, "depth {}: {got} != {want}", out.n_layers);
            depths.push(out.n_layers);
        }
        assert!(depths.contains(&2));
    }
}
