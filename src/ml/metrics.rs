// ============================================================
// Layer 5 — Evaluation Metrics
// ============================================================
// Running statistics implementing the Metric trait:
//
//   CategoricalAccuracy — argmax == gold, over instances
//   ExitLayerCounter    — how many instances stopped at each
//                         exit, reported as fractions
//                         n_layers_0, n_layers_1, ...
//   SpanAccuracy        — predicted start AND end both right
//   SquadScores         — answer-string exact match and token F1
//                         after SQuAD normalisation (lowercase,
//                         no punctuation, no articles)
//
// ExitMetrics bundles them into the name → value map printed
// by evaluate, alongside the threshold.
//
// Reference: Rajpurkar et al. (2016) SQuAD, evaluation script

use std::collections::{BTreeMap, HashMap};

use crate::domain::exit::argmax;
use crate::domain::traits::Metric;

// ─── CategoricalAccuracy ──────────────────────────────────────────────────────
#[derive(Debug, Clone, Default)]
pub struct CategoricalAccuracy {
    correct: usize,
    total:   usize,
}

impl CategoricalAccuracy {
    pub fn new() -> Self { Self::default() }

    /// `rows` are per-instance scores, `gold` the label indices.
    pub fn update(&mut self, rows: &[Vec<f32>], gold: &[usize]) {
        for (row, &g) in rows.iter().zip(gold) {
            self.correct += usize::from(argmax(row) == g);
            self.total   += 1;
        }
    }

    pub fn update_counts(&mut self, correct: usize, total: usize) {
        self.correct += correct;
        self.total   += total;
    }
}

impl Metric for CategoricalAccuracy {
    fn get_metric(&mut self, reset: bool) -> f64 {
        let value = if self.total > 0 { self.correct as f64 / self.total as f64 } else { 0.0 };
        if reset {
            self.reset();
        }
        value
    }

    fn reset(&mut self) {
        *self = Self::default();
    }
}

// ─── ExitLayerCounter ─────────────────────────────────────────────────────────
/// Histogram of exit positions.
#[derive(Debug, Clone)]
pub struct ExitLayerCounter {
    counts: Vec<usize>,
}

impl ExitLayerCounter {
    pub fn new(num_exits: usize) -> Self {
        Self { counts: vec![0; num_exits] }
    }

    pub fn update(&mut self, exit_positions: &[usize]) {
        for &p in exit_positions {
            if let Some(c) = self.counts.get_mut(p) {
                *c += 1;
            }
        }
    }

    pub fn total(&self) -> usize {
        self.counts.iter().sum()
    }

    /// Fraction of instances per exit; all zeros before any update.
    pub fn fractions(&self) -> Vec<f64> {
        let total = self.total();
        self.counts
            .iter()
            .map(|&c| if total > 0 { c as f64 / total as f64 } else { 0.0 })
            .collect()
    }

    /// Mean exit position, weighted by instance count.
    pub fn average_position(&self) -> f64 {
        let total = self.total();
        if total == 0 {
            return 0.0;
        }
        let sum: usize = self.counts.iter().enumerate().map(|(i, &c)| i * c).sum();
        sum as f64 / total as f64
    }

    /// Mean encoder layer (1-based depth) the instances ran through.
    pub fn average_layer(&self, layer_indices: &[usize]) -> f64 {
        let total = self.total();
        if total == 0 {
            return 0.0;
        }
        let sum: usize = self
            .counts
            .iter()
            .zip(layer_indices)
            .map(|(&c, &l)| c * (l + 1))
            .sum();
        sum as f64 / total as f64
    }
}

impl Metric for ExitLayerCounter {
    /// Average exit position.
    fn get_metric(&mut self, reset: bool) -> f64 {
        let value = self.average_position();
        if reset {
            self.reset();
        }
        value
    }

    fn reset(&mut self) {
        self.counts.iter_mut().for_each(|c| *c = 0);
    }
}

// ─── SpanAccuracy ─────────────────────────────────────────────────────────────
#[derive(Debug, Clone, Default)]
pub struct SpanAccuracy {
    correct: usize,
    total:   usize,
}

impl SpanAccuracy {
    pub fn new() -> Self { Self::default() }

    pub fn update(&mut self, predicted: &[(usize, usize)], gold: &[(usize, usize)]) {
        for (p, g) in predicted.iter().zip(gold) {
            self.correct += usize::from(p == g);
            self.total   += 1;
        }
    }

    pub fn correct(&self) -> usize { self.correct }

    pub fn total(&self) -> usize { self.total }
}

impl Metric for SpanAccuracy {
    fn get_metric(&mut self, reset: bool) -> f64 {
        let value = if self.total > 0 { self.correct as f64 / self.total as f64 } else { 0.0 };
        if reset {
            self.reset();
        }
        value
    }

    fn reset(&mut self) {
        *self = Self::default();
    }
}

// ─── SQuAD scores ─────────────────────────────────────────────────────────────
/// Lowercase, drop punctuation and the articles a/an/the, squeeze spaces.
pub fn normalize_answer(text: &str) -> String {
    let lowered: String = text
        .to_lowercase()
        .chars()
        .filter(|c| !c.is_ascii_punctuation())
        .collect();
    lowered
        .split_whitespace()
        .filter(|w| !matches!(*w, "a" | "an" | "the"))
        .collect::<Vec<_>>()
        .join(" ")
}

pub fn squad_exact_match(prediction: &str, gold: &str) -> f64 {
    if normalize_answer(prediction) == normalize_answer(gold) { 1.0 } else { 0.0 }
}

pub fn squad_f1(prediction: &str, gold: &str) -> f64 {
    let pred = normalize_answer(prediction);
    let gold = normalize_answer(gold);
    let pred: Vec<&str> = pred.split_whitespace().collect();
    let gold: Vec<&str> = gold.split_whitespace().collect();

    if pred.is_empty() || gold.is_empty() {
        return if pred == gold { 1.0 } else { 0.0 };
    }

    let mut counts: HashMap<&str, i64> = HashMap::new();
    for w in &gold {
        *counts.entry(w).or_insert(0) += 1;
    }
    let mut common = 0usize;
    for w in &pred {
        if let Some(c) = counts.get_mut(w) {
            if *c > 0 {
                *c     -= 1;
                common += 1;
            }
        }
    }
    if common == 0 {
        return 0.0;
    }

    let precision = common as f64 / pred.len() as f64;
    let recall    = common as f64 / gold.len() as f64;
    2.0 * precision * recall / (precision + recall)
}

/// Best score of `prediction` over all gold answers.
fn best_over<F: Fn(&str, &str) -> f64>(f: F, prediction: &str, golds: &[String]) -> f64 {
    golds.iter().map(|g| f(prediction, g)).fold(0.0, f64::max)
}

/// Running SQuAD exact match and F1, in percent like the official script.
#[derive(Debug, Clone, Default)]
pub struct SquadScores {
    exact: f64,
    f1:    f64,
    total: usize,
}

impl SquadScores {
    pub fn new() -> Self { Self::default() }

    pub fn update(&mut self, prediction: &str, golds: &[String]) {
        if golds.is_empty() {
            return;
        }
        self.exact += best_over(squad_exact_match, prediction, golds);
        self.f1    += best_over(squad_f1, prediction, golds);
        self.total += 1;
    }

    pub fn exact_match(&self) -> f64 {
        if self.total > 0 { 100.0 * self.exact / self.total as f64 } else { 0.0 }
    }

    pub fn f1(&self) -> f64 {
        if self.total > 0 { 100.0 * self.f1 / self.total as f64 } else { 0.0 }
    }
}

impl Metric for SquadScores {
    /// F1 in percent.
    fn get_metric(&mut self, reset: bool) -> f64 {
        let value = self.f1();
        if reset {
            self.reset();
        }
        value
    }

    fn reset(&mut self) {
        *self = Self::default();
    }
}

// ─── ExitMetrics ──────────────────────────────────────────────────────────────
/// Accuracy and exit histogram of one evaluation run.
#[derive(Debug, Clone)]
pub struct ExitMetrics {
    pub accuracy:  CategoricalAccuracy,
    pub exits:     ExitLayerCounter,
    pub threshold: Option<f64>,
}

impl ExitMetrics {
    pub fn new(num_exits: usize, threshold: Option<f64>) -> Self {
        Self {
            accuracy: CategoricalAccuracy::new(),
            exits:    ExitLayerCounter::new(num_exits),
            threshold,
        }
    }

    /// accuracy, thr (-1 when early exit is off) and n_layers_<i>.
    pub fn get_metrics(&mut self, reset: bool) -> BTreeMap<String, f64> {
        let mut metrics = BTreeMap::new();
        for (i, fraction) in self.exits.fractions().into_iter().enumerate() {
            metrics.insert(format!("n_layers_{i}"), fraction);
        }
        metrics.insert("accuracy".to_string(), self.accuracy.get_metric(reset));
        metrics.insert("thr".to_string(), self.threshold.unwrap_or(-1.0));
        if reset {
            self.exits.reset();
        }
        metrics
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_categorical_accuracy() {
        let mut acc = CategoricalAccuracy::new();
        acc.update(&[vec![0.1, 0.9], vec![0.8, 0.2], vec![0.3, 0.7]], &[1, 1, 1]);
        assert!((acc.get_metric(true) - 2.0 / 3.0).abs() < 1e-9);
        assert_eq!(acc.get_metric(false), 0.0);
    }

    #[test]
    fn test_exit_counter_fractions_and_average() {
        let mut c = ExitLayerCounter::new(3);
        c.update(&[0, 0, 2, 1]);
        assert_eq!(c.fractions(), vec![0.5, 0.25, 0.25]);
        assert!((c.average_position() - 0.75).abs() < 1e-9);
        // layers 3,7,11 → depths 4,8,12
        assert!((c.average_layer(&[3, 7, 11]) - 7.0).abs() < 1e-9);
    }

    #[test]
    fn test_exit_metrics_keys() {
        let mut m = ExitMetrics::new(2, Some(0.9));
        m.accuracy.update(&[vec![1.0, 0.0]], &[0]);
        m.exits.update(&[1]);
        let out = m.get_metrics(true);
        assert_eq!(out["accuracy"], 1.0);
        assert_eq!(out["thr"], 0.9);
        assert_eq!(out["n_layers_0"], 0.0);
        assert_eq!(out["n_layers_1"], 1.0);
        assert_eq!(m.exits.total(), 0);
    }

    #[test]
    fn test_span_accuracy_needs_both_ends() {
        let mut s = SpanAccuracy::new();
        s.update(&[(3, 5), (3, 4)], &[(3, 5), (3, 5)]);
        assert_eq!(s.get_metric(false), 0.5);
    }

    #[test]
    fn test_normalize_answer() {
        assert_eq!(normalize_answer("The  Cat, sat!"), "cat sat");
    }

    #[test]
    fn test_squad_scores() {
        assert_eq!(squad_exact_match("the cat", "Cat"), 1.0);
        // pred {cat, sat}, gold {cat} → p=0.5 r=1 → f1=2/3
        assert!((squad_f1("cat sat", "the cat") - 2.0 / 3.0).abs() < 1e-9);
        assert_eq!(squad_f1("dog", "cat"), 0.0);

        let mut scores = SquadScores::new();
        scores.update("cat", &["dog".to_string(), "a cat".to_string()]);
        assert_eq!(scores.exact_match(), 100.0);
        assert_eq!(scores.f1(), 100.0);
    }
}
