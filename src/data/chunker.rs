// ============================================================
// Layer 4 — Context Window Chunker
// ============================================================
// Splits a long tokenised context into overlapping windows so
// every context token fits next to the question in at least one
// model input.
//
// Example with window=5, stride=3 over 10 context tokens:
//   Window 1:  tokens 0..5
//   Window 2:  tokens 3..8
//   Window 3:  tokens 6..10   (last window, shorter)
//
// Overlapping windows see some tokens twice; `is_max_context`
// picks the window where a token has the most surrounding
// context on both sides (left/right distance, SQuAD rule).
//
// Reference: Devlin et al. (2019) BERT paper, §4.2 (SQuAD v1.1)

use std::ops::Range;

use crate::domain::exit::ConfigError;

pub struct Chunker {
    /// Maximum number of context tokens per window
    window: usize,
    /// Number of tokens the window advances each step
    stride: usize,
}

impl Chunker {
    /// Fails on a zero window or stride; no window would ever advance.
    pub fn new(window: usize, stride: usize) -> Result<Self, ConfigError> {
        if window == 0 {
            return Err(ConfigError::ZeroSize { name: "window" });
        }
        if stride == 0 {
            return Err(ConfigError::ZeroSize { name: "doc_stride" });
        }
        Ok(Self { window, stride: stride.min(window) })
    }

    /// Token ranges of all windows over `len` tokens.
    pub fn windows(&self, len: usize) -> Vec<Range<usize>> {
        if len == 0 {
            return Vec::new();
        }

        let mut spans = Vec::new();
        let mut start = 0usize;

        loop {
            let end = (start + self.window).min(len);
            spans.push(start..end);
            if end == len {
                break;
            }
            start += self.stride;
        }

        spans
    }
}

/// Whether `windows[current]` is the window with maximal context for token `position`.
///
/// score = min(left, right) + 0.01 * window_len; ties go to the earlier window.
pub fn is_max_context(windows: &[Range<usize>], current: usize, position: usize) -> bool {
    let mut best_score = f64::NEG_INFINITY;
    let mut best_index = None;

    for (i, w) in windows.iter().enumerate() {
        if !w.contains(&position) {
            continue;
        }
        let left  = position - w.start;
        let right = w.end - 1 - position;
        let score = left.min(right) as f64 + 0.01 * w.len() as f64;
        if score > best_score {
            best_score = score;
            best_index = Some(i);
        }
    }

    best_index == Some(current)
}
