// ============================================================
// Layer 3 — Core Traits (Abstractions)
// ============================================================
// The seams the other layers plug into:
//
//   DatasetReader — turns a file into TextInstances
//                   (ClassificationReader, NliReader and their
//                   oracle variants implement it)
//   QaReader      — turns a file into QaExamples (SquadReader)
//   Metric        — accumulates statistics over batches and
//                   reports a single number
//
// The application layer only sees these traits, never the
// concrete file formats.
//
// Reference: Rust Book §10 (Traits: Defining Shared Behaviour)

use anyhow::Result;
use std::path::Path;

use crate::domain::instance::{QaExample, TextInstance};

// ─── DatasetReader ────────────────────────────────────────────────────────────
/// Any component that can read text instances from a file.
pub trait DatasetReader {
    fn read(&self, path: &Path) -> Result<Vec<TextInstance>>;
}

// ─── QaReader ─────────────────────────────────────────────────────────────────
/// Any component that can read question-answering examples from a file.
pub trait QaReader {
    fn read_examples(&self, path: &Path) -> Result<Vec<QaExample>>;
}

// ─── Metric ───────────────────────────────────────────────────────────────────
/// A running statistic over evaluation batches.
pub trait Metric {
    /// Current value; `reset` clears the accumulated state afterwards.
    fn get_metric(&mut self, reset: bool) -> f64;

    fn reset(&mut self);
}
