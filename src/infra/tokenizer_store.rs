// ============================================================
// Layer 6 — Tokenizer Store
// ============================================================
// Manages the tokenizer shared by training and inference.
//
// Resolution order in load_or_build:
//   1. <checkpoint_dir>/tokenizer.json   (resumed / re-run)
//   2. <pretrained_dir>/tokenizer.json   (HuggingFace BERT folder)
//   3. a word-level vocabulary built from the training corpus
//
// Whatever is chosen is written to the checkpoint directory so
// that evaluate / predict see exactly the same vocabulary.
//
// The word-level tokenizer JSON is written by hand and loaded
// with Tokenizer::from_str, which avoids the trainer type
// plumbing of the tokenizers crate. Its vocabulary is counted
// through the same BertNormalizer + Whitespace pipeline the JSON
// declares, so accented and CJK words map to their own ids.

use anyhow::{Context, Result};
use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    str::FromStr,
};
use tokenizers::{
    normalizers::BertNormalizer,
    pre_tokenizers::whitespace::Whitespace,
    Normalizer, OffsetReferential, OffsetType, PreTokenizedString, PreTokenizer, Tokenizer,
};

const TOKENIZER_FILE: &str = "tokenizer.json";

pub struct TokenizerStore {
    dir: PathBuf,
}

impl TokenizerStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Load the stored tokenizer, else a pretrained one, else build from texts.
    pub fn load_or_build(
        &self,
        pretrained: Option<&Path>,
        texts:      &[String],
        vocab_size: usize,
    ) -> Result<Tokenizer> {
        let tokenizer = if self.dir.join(TOKENIZER_FILE).exists() {
            tracing::info!("Loading existing tokenizer from '{}'", self.dir.display());
            load_from(&self.dir)?
        } else if let Some(dir) = pretrained.filter(|d| d.join(TOKENIZER_FILE).exists()) {
            tracing::info!("Using pretrained tokenizer from '{}'", dir.display());
            load_from(dir)?
        } else {
            tracing::info!("Building word-level tokenizer (vocab_size={})", vocab_size);
            build_word_level(texts, vocab_size)?
        };
        self.save(&tokenizer)?;
        Ok(tokenizer)
    }

    /// Load the tokenizer saved next to a checkpoint
    pub fn load(&self) -> Result<Tokenizer> {
        load_from(&self.dir)
    }

    pub fn save(&self, tokenizer: &Tokenizer) -> Result<()> {
        std::fs::create_dir_all(&self.dir)
            .with_context(|| format!("Cannot create '{}'", self.dir.display()))?;
        let path = self.dir.join(TOKENIZER_FILE);
        tokenizer
            .save(&path, true)
            .map_err(|e| anyhow::anyhow!("Cannot save tokenizer to '{}': {}", path.display(), e))
    }
}

fn load_from(dir: &Path) -> Result<Tokenizer> {
    let path = dir.join(TOKENIZER_FILE);
    Tokenizer::from_file(&path)
        .map_err(|e| anyhow::anyhow!("Cannot load tokenizer from '{}': {}", path.display(), e))
}

fn normalizer() -> BertNormalizer {
    BertNormalizer::new(true, true, None, true)
}

/// Normalise and split `text` the way the word-level tokenizer does.
fn pieces(text: &str) -> Result<Vec<String>> {
    let normalizer = normalizer();
    let mut pre    = PreTokenizedString::from(text);
    pre.normalize(|n| normalizer.normalize(n))
        .map_err(|e| anyhow::anyhow!("Cannot normalise '{text}': {e}"))?;
    Whitespace::default()
        .pre_tokenize(&mut pre)
        .map_err(|e| anyhow::anyhow!("Cannot split '{text}': {e}"))?;

    Ok(pre
        .get_splits(OffsetReferential::Normalized, OffsetType::Char)
        .into_iter()
        .map(|(piece, _, _)| piece.to_string())
        .collect())
}

/// Build an uncased word-level tokenizer with BERT special token ids.
///
/// The `vocab_size - 5` most frequent pieces of `texts` get ids from 104 on.
pub fn build_word_level(texts: &[String], vocab_size: usize) -> Result<Tokenizer> {
    let mut freq: HashMap<String, usize> = HashMap::new();
    for text in texts {
        for piece in pieces(text)? {
            *freq.entry(piece).or_insert(0) += 1;
        }
    }

    // Most frequent first; ties alphabetical so the ids are reproducible
    let mut words: Vec<(String, usize)> = freq.into_iter().collect();
    words.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    words.truncate(vocab_size.saturating_sub(5));

    let mut vocab = serde_json::json!({
        "[PAD]":  0,
        "[UNK]":  1,
        "[CLS]":  101,
        "[SEP]":  102,
        "[MASK]": 103,
    });

    let mut next_id = 104usize;
    for (word, _) in &words {
        if vocab.get(word).is_none() {
            vocab[word] = serde_json::json!(next_id);
            next_id += 1;
        }
    }

    let normalizer = normalizer();
    let tokenizer_json = serde_json::json!({
        "version": "1.0",
        "truncation": null,
        "padding": null,
        "added_tokens": [
            {"id": 0,   "content": "[PAD]",  "single_word": false, "lstrip": false, "rstrip": false, "normalized": false, "special": true},
            {"id": 1,   "content": "[UNK]",  "single_word": false, "lstrip": false, "rstrip": false, "normalized": false, "special": true},
            {"id": 101, "content": "[CLS]",  "single_word": false, "lstrip": false, "rstrip": false, "normalized": false, "special": true},
            {"id": 102, "content": "[SEP]",  "single_word": false, "lstrip": false, "rstrip": false, "normalized": false, "special": true},
            {"id": 103, "content": "[MASK]", "single_word": false, "lstrip": false, "rstrip": false, "normalized": false, "special": true}
        ],
        "normalizer": {
            "type": "BertNormalizer",
            "clean_text": normalizer.clean_text,
            "handle_chinese_chars": normalizer.handle_chinese_chars,
            "strip_accents": normalizer.strip_accents,
            "lowercase": normalizer.lowercase
        },
        "pre_tokenizer": {
            "type": "Whitespace"
        },
        "post_processor": null,
        "decoder": null,
        "model": {
            "type": "WordLevel",
            "vocab": vocab,
            "unk_token": "[UNK]"
        }
    });

    tracing::debug!("Word-level vocabulary holds {} ids", next_id);

    Tokenizer::from_str(&tokenizer_json.to_string())
        .map_err(|e| anyhow::anyhow!("Cannot build word-level tokenizer: {e}"))
}

/// Largest id the tokenizer can emit plus one (the embedding table size).
pub fn id_space(tokenizer: &Tokenizer) -> usize {
    tokenizer
        .get_vocab(true)
        .values()
        .copied()
        .max()
        .map(|m| m as usize + 1)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pieces_split_punctuation() {
        assert_eq!(pieces("Hello, world!").unwrap(), vec!["hello", ",", "world", "!"]);
    }

    #[test]
    fn test_accented_and_cjk_words_are_known() {
        let tok = build_word_level(&["Café résumé 北京".to_string()], 100).unwrap();
        let enc = tok.encode("café résumé 北京", false).unwrap();
        assert_eq!(enc.get_ids().len(), 4);
        assert!(enc.get_ids().iter().all(|&id| id >= 104));
        assert!(tok.token_to_id("cafe").is_some());
    }

    #[test]
    fn test_word_level_special_ids_and_unknowns() {
        let tok = build_word_level(&["b a b".to_string()], 100).unwrap();
        assert_eq!(tok.token_to_id("[CLS]"), Some(101));
        assert_eq!(tok.token_to_id("b"), Some(104));
        assert_eq!(tok.token_to_id("a"), Some(105));
        let enc = tok.encode("B zebra", false).unwrap();
        assert_eq!(enc.get_ids(), &[104, 1]);
        assert_eq!(id_space(&tok), 106);
    }

    #[test]
    fn test_store_round_trip_prefers_saved_file() {
        let dir   = tempfile::tempdir().unwrap();
        let store = TokenizerStore::new(dir.path());
        let first = store.load_or_build(None, &["alpha beta".to_string()], 50).unwrap();
        // A second call must not rebuild from the (different) corpus
        let again = store.load_or_build(None, &["gamma".to_string()], 50).unwrap();
        assert_eq!(first.token_to_id("alpha"), again.token_to_id("alpha"));
        assert_eq!(again.token_to_id("gamma"), None);
    }
}
