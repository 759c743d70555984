// ============================================================
// Layer 3 — Label Vocabulary
// ============================================================
// Maps label strings ("entailment", "positive", ...) to the
// contiguous class indices the classifier heads predict.
//
// Indices are assigned in first-seen order and never change once
// saved: the checkpoint directory carries labels.json so that
// decode() at inference time returns the same strings used in
// training.
//
//   labels.json  →  ["entailment", "neutral", "contradiction"]

use anyhow::{Context, Result};
use std::{collections::HashMap, fs, path::Path};

use crate::domain::exit::ConfigError;
use crate::domain::instance::TextInstance;

const LABELS_FILE: &str = "labels.json";

#[derive(Debug, Clone, Default, PartialEq)]
pub struct LabelVocabulary {
    labels: Vec<String>,
    index:  HashMap<String, usize>,
}

impl LabelVocabulary {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_labels<I, S>(labels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut vocab = Self::new();
        for label in labels {
            vocab.add_label(label);
        }
        vocab
    }

    /// Collect every gold label of the instances (unlabelled ones are ignored)
    pub fn from_instances(instances: &[TextInstance]) -> Self {
        Self::from_labels(instances.iter().filter_map(|i| i.label.clone()))
    }

    /// Add a label if unseen and return its index either way.
    pub fn add_label(&mut self, label: impl Into<String>) -> usize {
        let label = label.into();
        if let Some(&i) = self.index.get(&label) {
            return i;
        }
        let i = self.labels.len();
        self.index.insert(label.clone(), i);
        self.labels.push(label);
        i
    }

    pub fn get_index(&self, label: &str) -> Option<usize> {
        self.index.get(label).copied()
    }

    pub fn get_token_from_index(&self, index: usize) -> Option<&str> {
        self.labels.get(index).map(String::as_str)
    }

    pub fn get_vocab_size(&self) -> usize {
        self.labels.len()
    }

    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    /// Number of classifier outputs: an explicit `num_labels` wins
    /// but may not be smaller than the vocabulary.
    pub fn num_labels(&self, explicit: Option<usize>) -> Result<usize, ConfigError> {
        match explicit {
            Some(n) if n < self.get_vocab_size() => Err(ConfigError::TooFewLabels {
                given: n,
                vocab: self.get_vocab_size(),
            }),
            Some(0) => Err(ConfigError::NoLabels),
            Some(n) => Ok(n),
            None if self.labels.is_empty() => Err(ConfigError::NoLabels),
            None => Ok(self.labels.len()),
        }
    }

    pub fn save(&self, dir: &Path) -> Result<()> {
        let path = dir.join(LABELS_FILE);
        fs::write(&path, serde_json::to_string_pretty(&self.labels)?)
            .with_context(|| format!("Cannot write labels to '{}'", path.display()))?;
        tracing::debug!("Saved {} labels to '{}'", self.labels.len(), path.display());
        Ok(())
    }

    pub fn load(dir: &Path) -> Result<Self> {
        let path = dir.join(LABELS_FILE);
        let json = fs::read_to_string(&path)
            .with_context(|| format!("Cannot read labels from '{}'", path.display()))?;
        let labels: Vec<String> = serde_json::from_str(&json)
            .with_context(|| format!("Malformed label file '{}'", path.display()))?;
        Ok(Self::from_labels(labels))
    }
}
