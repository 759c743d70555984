// ============================================================
// Layer 4 — Dataset Readers
// ============================================================
// Reads dataset files into domain instances.
//
// Supported formats:
//
//   classification (JSON lines, or TSV "label<TAB>text")
//     {"text": "a gripping film", "label": "positive"}
//
//   nli (JSON lines, SNLI / MultiNLI field names accepted)
//     {"sentence1": "...", "sentence2": "...", "gold_label": "neutral"}
//     Pairs with gold_label "-" (no annotator consensus) are dropped.
//
//   *-oracle variants
//     Same files, but every instance must be labelled; instances are
//     flagged so inference can exit at the first correct layer.
//
//   squad (SQuAD v1.1 JSON)
//     data[].paragraphs[].{context, qas[].{id, question, answers[]}}
//
// A malformed line is logged and skipped; a missing file is an error.
//
// Reference: serde_json documentation (derive + aliases)
//            Bowman et al. (2015) SNLI, Rajpurkar et al. (2016) SQuAD

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::{
    fs::File,
    io::{BufRead, BufReader},
    path::Path,
};

use crate::data::preprocessor::Preprocessor;
use crate::domain::instance::{QaAnswer, QaExample, TextInstance};
use crate::domain::traits::{DatasetReader, QaReader};

/// The reader selected on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ReaderKind {
    Classification,
    ClassificationOracle,
    Nli,
    NliOracle,
    Squad,
}

impl ReaderKind {
    pub fn is_qa(self) -> bool {
        matches!(self, ReaderKind::Squad)
    }

    pub fn is_oracle(self) -> bool {
        matches!(self, ReaderKind::ClassificationOracle | ReaderKind::NliOracle)
    }
}

/// The text reader for a classification-style kind (None for squad).
pub fn reader_for(kind: ReaderKind) -> Option<Box<dyn DatasetReader>> {
    match kind {
        ReaderKind::Classification       => Some(Box::new(ClassificationReader::new())),
        ReaderKind::ClassificationOracle => Some(Box::new(OracleReader::new(ClassificationReader::new()))),
        ReaderKind::Nli                  => Some(Box::new(NliReader::new())),
        ReaderKind::NliOracle            => Some(Box::new(OracleReader::new(NliReader::new()))),
        ReaderKind::Squad                => None,
    }
}

/// Labels may be strings ("positive") or numbers (1) depending on the dump.
fn label_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b)   => Some(b.to_string()),
        _                => None,
    }
}

/// Feed every non-empty line of `path` to `parse`, skipping malformed ones.
fn read_lines<F>(path: &Path, mut parse: F) -> Result<Vec<TextInstance>>
where
    F: FnMut(&str) -> Result<Option<TextInstance>>,
{
    let file = File::open(path)
        .with_context(|| format!("Cannot open dataset file '{}'", path.display()))?;

    let mut instances = Vec::new();
    let mut skipped   = 0usize;

    for (line_no, line) in BufReader::new(file).lines().enumerate() {
        let line = line.with_context(|| format!("Cannot read '{}'", path.display()))?;
        if line.trim().is_empty() {
            continue;
        }
        match parse(&line) {
            Ok(Some(instance)) => instances.push(instance),
            Ok(None)           => skipped += 1,
            Err(e) => {
                skipped += 1;
                tracing::warn!("Skipping {}:{}: {}", path.display(), line_no + 1, e);
            }
        }
    }

    tracing::info!(
        "Read {} instances from '{}' ({} skipped)",
        instances.len(),
        path.display(),
        skipped
    );
    Ok(instances)
}

// ─── ClassificationReader ─────────────────────────────────────────────────────
#[derive(Deserialize)]
struct ClassificationLine {
    #[serde(alias = "sentence")]
    text:  String,
    #[serde(default)]
    label: Option<Value>,
}

pub struct ClassificationReader {
    preprocessor: Preprocessor,
}

impl ClassificationReader {
    pub fn new() -> Self {
        Self { preprocessor: Preprocessor::new() }
    }

    fn parse_line(&self, line: &str) -> Result<Option<TextInstance>> {
        let trimmed = line.trim_start();
        let (text, label) = if trimmed.starts_with('{') {
            let parsed: ClassificationLine = serde_json::from_str(trimmed)?;
            (parsed.text, parsed.label.as_ref().and_then(label_string))
        } else {
            match line.split_once('\t') {
                Some((label, text)) => (text.to_string(), Some(label.trim().to_string())),
                None                => bail!("expected a JSON object or 'label<TAB>text'"),
            }
        };

        let text = self.preprocessor.clean_line(&text);
        if text.is_empty() {
            bail!("empty text");
        }
        let label = label.filter(|l| !l.is_empty());
        Ok(Some(TextInstance::single(text, label)))
    }
}

impl Default for ClassificationReader {
    fn default() -> Self {
        Self::new()
    }
}

impl DatasetReader for ClassificationReader {
    fn read(&self, path: &Path) -> Result<Vec<TextInstance>> {
        read_lines(path, |line| self.parse_line(line))
    }
}

// ─── NliReader ────────────────────────────────────────────────────────────────
#[derive(Deserialize)]
struct NliLine {
    #[serde(alias = "sentence1")]
    premise:    String,
    #[serde(alias = "sentence2")]
    hypothesis: String,
    #[serde(default, alias = "gold_label")]
    label:      Option<Value>,
}

pub struct NliReader {
    preprocessor: Preprocessor,
}

impl NliReader {
    pub fn new() -> Self {
        Self { preprocessor: Preprocessor::new() }
    }

    fn parse_line(&self, line: &str) -> Result<Option<TextInstance>> {
        let parsed: NliLine = serde_json::from_str(line)?;
        let label = parsed.label.as_ref().and_then(label_string);

        // "-" marks a pair without annotator consensus
        if label.as_deref() == Some("-") {
            return Ok(None);
        }

        let premise    = self.preprocessor.clean_line(&parsed.premise);
        let hypothesis = self.preprocessor.clean_line(&parsed.hypothesis);
        if premise.is_empty() || hypothesis.is_empty() {
            bail!("empty premise or hypothesis");
        }
        Ok(Some(TextInstance::pair(premise, hypothesis, label)))
    }
}

impl Default for NliReader {
    fn default() -> Self {
        Self::new()
    }
}

impl DatasetReader for NliReader {
    fn read(&self, path: &Path) -> Result<Vec<TextInstance>> {
        read_lines(path, |line| self.parse_line(line))
    }
}

// ─── OracleReader ─────────────────────────────────────────────────────────────
/// Wraps another reader: every instance must carry a gold label and is
/// flagged for oracle exit.
pub struct OracleReader<R> {
    inner: R,
}

impl<R: DatasetReader> OracleReader<R> {
    pub fn new(inner: R) -> Self {
        Self { inner }
    }
}

impl<R: DatasetReader> DatasetReader for OracleReader<R> {
    fn read(&self, path: &Path) -> Result<Vec<TextInstance>> {
        let mut instances = self.inner.read(path)?;
        if let Some(pos) = instances.iter().position(|i| i.label.is_none()) {
            bail!(
                "Oracle reader needs gold labels, instance {} of '{}' has none",
                pos,
                path.display()
            );
        }
        for instance in &mut instances {
            instance.oracle = true;
        }
        Ok(instances)
    }
}

// ─── SquadReader ──────────────────────────────────────────────────────────────
#[derive(Deserialize)]
struct SquadFile {
    data: Vec<SquadArticle>,
}

#[derive(Deserialize)]
struct SquadArticle {
    paragraphs: Vec<SquadParagraph>,
}

#[derive(Deserialize)]
struct SquadParagraph {
    context: String,
    qas:     Vec<SquadQa>,
}

#[derive(Deserialize)]
struct SquadQa {
    id:       String,
    question: String,
    #[serde(default)]
    answers:  Vec<SquadAnswer>,
}

#[derive(Deserialize)]
struct SquadAnswer {
    text:         String,
    answer_start: usize,
}

pub struct SquadReader {
    preprocessor: Preprocessor,
}

impl SquadReader {
    pub fn new() -> Self {
        Self { preprocessor: Preprocessor::new() }
    }

    /// Parse SQuAD JSON already held in memory.
    pub fn parse(&self, json: &str) -> Result<Vec<QaExample>> {
        let file: SquadFile = serde_json::from_str(json).context("Malformed SQuAD JSON")?;
        let mut examples    = Vec::new();
        let mut bad_answers = 0usize;

        for article in file.data {
            for paragraph in article.paragraphs {
                let context = self.preprocessor.clean_context(&paragraph.context);
                for qa in paragraph.qas {
                    let mut answers = Vec::new();
                    for answer in qa.answers {
                        let candidate = QaAnswer { text: answer.text, char_start: answer.answer_start };
                        let found     = char_slice(&context, candidate.char_start, candidate.char_end());
                        // The gold text must sit at the given offset (modulo whitespace normalisation)
                        if found.split_whitespace().eq(candidate.text.split_whitespace()) {
                            answers.push(candidate);
                        } else {
                            bad_answers += 1;
                        }
                    }
                    examples.push(QaExample {
                        id:       qa.id,
                        question: self.preprocessor.clean_line(&qa.question),
                        context:  context.clone(),
                        answers,
                    });
                }
            }
        }

        if bad_answers > 0 {
            tracing::warn!("Dropped {} answers whose offsets do not match the context", bad_answers);
        }
        Ok(examples)
    }
}

impl Default for SquadReader {
    fn default() -> Self {
        Self::new()
    }
}

impl QaReader for SquadReader {
    fn read_examples(&self, path: &Path) -> Result<Vec<QaExample>> {
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("Cannot open SQuAD file '{}'", path.display()))?;
        let examples = self.parse(&json)?;
        tracing::info!("Read {} questions from '{}'", examples.len(), path.display());
        Ok(examples)
    }
}

fn char_slice(text: &str, start: usize, end: usize) -> String {
    text.chars().skip(start).take(end.saturating_sub(start)).collect()
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_file(dir: &tempfile::TempDir, name: &str, body: &str) -> std::path::PathBuf {
        let path = dir.path().join(name);
        let mut f = File::create(&path).unwrap();
        f.write_all(body.as_bytes()).unwrap();
        path
    }

    #[test]
    fn test_classification_jsonl_and_tsv() {
        let dir  = tempfile::tempdir().unwrap();
        let path = write_file(
            &dir,
            "train.jsonl",
            "{\"text\": \"a  gripping film\", \"label\": \"positive\"}\n\
             \n\
             negative\tdull and   slow\n\
             {\"sentence\": \"numeric label\", \"label\": 1}\n\
             not a valid line\n",
        );
        let instances = ClassificationReader::new().read(&path).unwrap();
        assert_eq!(instances.len(), 3);
        assert_eq!(instances[0].text_a, "a gripping film");
        assert_eq!(instances[0].label.as_deref(), Some("positive"));
        assert_eq!(instances[1].text_a, "dull and slow");
        assert_eq!(instances[1].label.as_deref(), Some("negative"));
        assert_eq!(instances[2].label.as_deref(), Some("1"));
        assert!(instances.iter().all(|i| !i.oracle && i.text_b.is_none()));
    }

    #[test]
    fn test_nli_accepts_snli_names_and_drops_no_consensus() {
        let dir  = tempfile::tempdir().unwrap();
        let path = write_file(
            &dir,
            "snli.jsonl",
            "{\"sentence1\": \"A man sleeps.\", \"sentence2\": \"A man rests.\", \"gold_label\": \"entailment\"}\n\
             {\"sentence1\": \"A dog.\", \"sentence2\": \"A cat.\", \"gold_label\": \"-\"}\n\
             {\"premise\": \"P\", \"hypothesis\": \"H\"}\n",
        );
        let instances = NliReader::new().read(&path).unwrap();
        assert_eq!(instances.len(), 2);
        assert_eq!(instances[0].text_b.as_deref(), Some("A man rests."));
        assert_eq!(instances[0].label.as_deref(), Some("entailment"));
        assert_eq!(instances[1].label, None);
    }

    #[test]
    fn test_oracle_reader_flags_and_requires_labels() {
        let dir  = tempfile::tempdir().unwrap();
        let good = write_file(&dir, "good.tsv", "pos\tfine\nneg\tbad\n");
        let instances = OracleReader::new(ClassificationReader::new()).read(&good).unwrap();
        assert!(instances.iter().all(|i| i.oracle));

        let bad = write_file(&dir, "bad.jsonl", "{\"text\": \"no label\"}\n");
        assert!(OracleReader::new(ClassificationReader::new()).read(&bad).is_err());
    }

    #[test]
    fn test_missing_file_is_an_error() {
        let reader = reader_for(ReaderKind::Nli).unwrap();
        assert!(reader.read(Path::new("/definitely/not/here.jsonl")).is_err());
        assert!(reader_for(ReaderKind::Squad).is_none());
    }

    #[test]
    fn test_squad_parse_checks_offsets() {
        let json = r#"{"data": [{"paragraphs": [{
            "context": "The Eiffel Tower is in Paris.",
            "qas": [
                {"id": "q1", "question": "Where is the tower?",
                 "answers": [{"text": "Paris", "answer_start": 23},
                             {"text": "London", "answer_start": 0}]},
                {"id": "q2", "question": "Unanswered?"}
            ]}]}]}"#;
        let examples = SquadReader::new().parse(json).unwrap();
        assert_eq!(examples.len(), 2);
        assert_eq!(examples[0].answers.len(), 1);
        assert_eq!(examples[0].answers[0].text, "Paris");
        assert!(examples[1].answers.is_empty());
    }

    #[test]
    fn test_reader_kind_flags() {
        assert!(ReaderKind::Squad.is_qa());
        assert!(ReaderKind::NliOracle.is_oracle());
        assert!(!ReaderKind::Nli.is_oracle());
    }
}
