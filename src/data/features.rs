// ============================================================
// Layer 4 — Featurizer
// ============================================================
// Turns instances into token id sequences the encoder accepts.
//
// Classification / NLI:
//   [CLS] text_a [SEP]                 token types 0...0
//   [CLS] text_a [SEP] text_b [SEP]    token types 0...0 1...1
//   Pairs that are too long are truncated longest-first.
//
// Question answering (one feature per context window):
//   [CLS] question [SEP] context-window [SEP]
//   The question is cut to max_query_len tokens; the context is
//   split by the Chunker into windows of the remaining budget.
//   Each feature remembers the character offsets of its context
//   tokens (token_to_orig) and whether the window is the best
//   one for each token (token_is_max_context).
//   A gold answer outside the window points at [CLS] (position 0).
//
// Padding happens later, in the batcher.
//
// Reference: Devlin et al. (2019) BERT paper, §3 (Input Representation)

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use tokenizers::Tokenizer;

use crate::data::chunker::{is_max_context, Chunker};
use crate::domain::instance::{QaExample, TextInstance};
use crate::domain::vocabulary::LabelVocabulary;

// ─── Special token ids ────────────────────────────────────────────────────────
/// Ids of the special tokens, looked up in the tokenizer with BERT fallbacks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpecialIds {
    pub cls: u32,
    pub sep: u32,
    pub pad: u32,
}

impl Default for SpecialIds {
    fn default() -> Self {
        Self { cls: 101, sep: 102, pad: 0 }
    }
}

impl SpecialIds {
    pub fn from_tokenizer(tokenizer: &Tokenizer) -> Self {
        let d = Self::default();
        Self {
            cls: tokenizer.token_to_id("[CLS]").unwrap_or(d.cls),
            sep: tokenizer.token_to_id("[SEP]").unwrap_or(d.sep),
            pad: tokenizer.token_to_id("[PAD]").unwrap_or(d.pad),
        }
    }
}

// ─── Items ────────────────────────────────────────────────────────────────────
/// One tokenised classification / NLI instance (unpadded).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationItem {
    pub input_ids:      Vec<u32>,
    pub token_type_ids: Vec<u32>,
    pub label:          Option<usize>,
}

/// One tokenised QA window (unpadded).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QaFeature {
    /// Index of the example this window belongs to
    pub example_index:        usize,
    pub input_ids:            Vec<u32>,
    pub token_type_ids:       Vec<u32>,
    /// Position of the first context token inside input_ids
    pub context_start:        usize,
    /// Character offsets in the context, one per context token of this window
    pub token_to_orig:        Vec<(usize, usize)>,
    pub token_is_max_context: Vec<bool>,
    pub start_position:       usize,
    pub end_position:         usize,
}

impl QaFeature {
    pub fn context_len(&self) -> usize {
        self.token_to_orig.len()
    }
}

/// Cut the longer sequence first until both fit into `budget` tokens.
pub fn truncate_pair(a: &mut Vec<u32>, b: &mut Vec<u32>, budget: usize) {
    while a.len() + b.len() > budget {
        if a.len() >= b.len() {
            a.pop();
        } else {
            b.pop();
        }
    }
}

fn encode_ids(tokenizer: &Tokenizer, text: &str) -> Result<Vec<u32>> {
    let enc = tokenizer
        .encode(text, false)
        .map_err(|e| anyhow::anyhow!("Tokenisation error: {e}"))?;
    Ok(enc.get_ids().to_vec())
}

// ─── TextFeaturizer ───────────────────────────────────────────────────────────
pub struct TextFeaturizer<'a> {
    tokenizer:   &'a Tokenizer,
    specials:    SpecialIds,
    max_seq_len: usize,
}

impl<'a> TextFeaturizer<'a> {
    pub fn new(tokenizer: &'a Tokenizer, max_seq_len: usize) -> Self {
        Self { tokenizer, specials: SpecialIds::from_tokenizer(tokenizer), max_seq_len }
    }

    /// Build `[CLS] a [SEP] (b [SEP])` with token types.
    pub fn encode(&self, text_a: &str, text_b: Option<&str>) -> Result<(Vec<u32>, Vec<u32>)> {
        let mut a = encode_ids(self.tokenizer, text_a)?;
        let mut b = match text_b {
            Some(t) => encode_ids(self.tokenizer, t)?,
            None    => Vec::new(),
        };

        let added = if text_b.is_some() { 3 } else { 2 };
        if self.max_seq_len <= added {
            bail!("max_seq_len {} leaves no room for text", self.max_seq_len);
        }
        truncate_pair(&mut a, &mut b, self.max_seq_len - added);

        let mut ids = Vec::with_capacity(a.len() + b.len() + added);
        ids.push(self.specials.cls);
        ids.extend_from_slice(&a);
        ids.push(self.specials.sep);
        let mut types = vec![0u32; ids.len()];

        if text_b.is_some() {
            ids.extend_from_slice(&b);
            ids.push(self.specials.sep);
            types.resize(ids.len(), 1);
        }
        Ok((ids, types))
    }

    /// Tokenise an instance; labels unknown to the vocabulary are an error.
    pub fn featurize(&self, instance: &TextInstance, vocab: &LabelVocabulary) -> Result<ClassificationItem> {
        let (input_ids, token_type_ids) = self.encode(&instance.text_a, instance.text_b.as_deref())?;
        let label = match &instance.label {
            Some(l) => match vocab.get_index(l) {
                Some(i) => Some(i),
                None    => bail!("label '{}' is not in the label vocabulary", l),
            },
            None => None,
        };
        Ok(ClassificationItem { input_ids, token_type_ids, label })
    }

    pub fn featurize_all(&self, instances: &[TextInstance], vocab: &LabelVocabulary) -> Result<Vec<ClassificationItem>> {
        instances.iter().map(|i| self.featurize(i, vocab)).collect()
    }
}

// ─── QaFeaturizer ─────────────────────────────────────────────────────────────
pub struct QaFeaturizer<'a> {
    tokenizer:     &'a Tokenizer,
    specials:      SpecialIds,
    max_seq_len:   usize,
    max_query_len: usize,
    doc_stride:    usize,
}

impl<'a> QaFeaturizer<'a> {
    pub fn new(tokenizer: &'a Tokenizer, max_seq_len: usize, max_query_len: usize, doc_stride: usize) -> Self {
        Self {
            tokenizer,
            specials: SpecialIds::from_tokenizer(tokenizer),
            max_seq_len,
            max_query_len,
            doc_stride,
        }
    }

    pub fn featurize(&self, example_index: usize, example: &QaExample) -> Result<Vec<QaFeature>> {
        let mut question = encode_ids(self.tokenizer, &example.question)?;
        question.truncate(self.max_query_len);

        let ctx = self
            .tokenizer
            .encode_char_offsets(example.context.as_str(), false)
            .map_err(|e| anyhow::anyhow!("Tokenisation error: {e}"))?;
        let ctx_ids     = ctx.get_ids();
        let ctx_offsets = ctx.get_offsets();

        let budget = self.max_seq_len.saturating_sub(question.len() + 3);
        if budget == 0 {
            bail!("max_seq_len {} leaves no room for the context", self.max_seq_len);
        }

        // Gold answer as a context token span
        let answer_span = example.primary_answer().and_then(|a| {
            let (cs, ce) = (a.char_start, a.char_end());
            let start = ctx_offsets.iter().position(|&(_, end)| end > cs)?;
            let end   = ctx_offsets.iter().rposition(|&(begin, _)| begin < ce)?;
            (start <= end).then_some((start, end))
        });

        let windows       = Chunker::new(budget, self.doc_stride)?.windows(ctx_ids.len());
        let context_start = question.len() + 2;
        let mut features  = Vec::with_capacity(windows.len());

        for (w, window) in windows.iter().enumerate() {
            let mut input_ids = Vec::with_capacity(self.max_seq_len);
            input_ids.push(self.specials.cls);
            input_ids.extend_from_slice(&question);
            input_ids.push(self.specials.sep);
            input_ids.extend_from_slice(&ctx_ids[window.clone()]);
            input_ids.push(self.specials.sep);

            let mut token_type_ids = vec![0u32; context_start];
            token_type_ids.resize(input_ids.len(), 1);

            let (start_position, end_position) = match answer_span {
                Some((s, e)) if s >= window.start && e < window.end => (
                    context_start + s - window.start,
                    context_start + e - window.start,
                ),
                _ => (0, 0),
            };

            features.push(QaFeature {
                example_index,
                input_ids,
                token_type_ids,
                context_start,
                token_to_orig:        ctx_offsets[window.clone()].to_vec(),
                token_is_max_context: window.clone().map(|p| is_max_context(&windows, w, p)).collect(),
                start_position,
                end_position,
            });
        }

        if features.is_empty() {
            tracing::warn!("Question '{}' has an empty context, no features built", example.id);
        }
        Ok(features)
    }

    pub fn featurize_all(&self, examples: &[QaExample]) -> Result<Vec<QaFeature>> {
        let mut all = Vec::new();
        for (i, example) in examples.iter().enumerate() {
            all.extend(self.featurize(i, example)?);
        }
        Ok(all)
    }
}
