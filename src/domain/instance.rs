// ============================================================
// Layer 3 — Dataset Instances
// ============================================================
// What the dataset readers produce, before any tokenisation.
//
//   TextInstance — one sentence (classification) or a
//                  premise / hypothesis pair (NLI) with an
//                  optional gold label
//   QaExample    — one SQuAD question over a context passage
//                  with its gold answers (character offsets)
//
// Example (NLI):
//   text_a: "A man inspects a uniform."
//   text_b: Some("The man is sleeping.")
//   label:  Some("contradiction")

use serde::{Deserialize, Serialize};

/// A labelled (or unlabelled) text or text pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextInstance {
    pub text_a: String,
    pub text_b: Option<String>,
    pub label:  Option<String>,
    /// Read by an oracle reader: inference may use the gold label to exit
    #[serde(default)]
    pub oracle: bool,
}

impl TextInstance {
    pub fn single(text: impl Into<String>, label: Option<String>) -> Self {
        Self { text_a: text.into(), text_b: None, label, oracle: false }
    }

    pub fn pair(a: impl Into<String>, b: impl Into<String>, label: Option<String>) -> Self {
        Self { text_a: a.into(), text_b: Some(b.into()), label, oracle: false }
    }
}

/// One gold answer of a QA example.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QaAnswer {
    pub text:       String,
    /// Offset of the first answer character inside the context
    pub char_start: usize,
}

impl QaAnswer {
    /// Exclusive character end of the answer inside the context
    pub fn char_end(&self) -> usize {
        self.char_start + self.text.chars().count()
    }
}

/// An extractive question-answering example.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QaExample {
    pub id:       String,
    pub question: String,
    pub context:  String,
    pub answers:  Vec<QaAnswer>,
}

impl QaExample {
    /// The answer used as the training target (the first one, SQuAD style)
    pub fn primary_answer(&self) -> Option<&QaAnswer> {
        self.answers.first()
    }

    /// Slice `[start, end)` of the context counted in characters
    pub fn context_span(&self, start: usize, end: usize) -> String {
        self.context
            .chars()
            .skip(start)
            .take(end.saturating_sub(start))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_answer_char_end_counts_chars() {
        let a = QaAnswer { text: "café".into(), char_start: 3 };
        assert_eq!(a.char_end(), 7);
    }

    #[test]
    fn test_context_span_is_char_based() {
        let ex = QaExample {
            id:       "q1".into(),
            question: "Where?".into(),
            context:  "Un café à Paris".into(),
            answers:  vec![],
        };
        assert_eq!(ex.context_span(3, 7), "café");
        assert_eq!(ex.context_span(10, 15), "Paris");
    }
}
