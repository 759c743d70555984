// ============================================================
// Layer 4 — Text Preprocessor
// ============================================================
// Normalises raw dataset text before tokenisation.
//
// Dataset dumps (SST, SNLI/MultiNLI, SQuAD) contain:
//   - Non-breaking spaces (U+00A0) and zero-width spaces (U+200B)
//   - Byte order marks at the start of a file
//   - Tabs and stray carriage returns
//   - Runs of spaces left over from detokenisation
//
// Two modes:
//   clean_line  — sentence-level text: every whitespace run
//                 becomes one space, control characters vanish
//   clean_context — SQuAD contexts: only characters are mapped
//                 one-to-one so that character answer offsets
//                 stay valid
//
// Reference: Rust Book §8 (Strings in Rust)

/// Character cleanup only; casing is left to the tokenizer.
#[derive(Debug, Clone, Copy, Default)]
pub struct Preprocessor;

impl Preprocessor {
    pub fn new() -> Self {
        Self
    }

    /// Map one character to its normalised replacement.
    fn normalise_char(c: char) -> char {
        match c {
            '\t' | '\r' | '\n'                    => ' ',
            '\u{00A0}' | '\u{200B}' | '\u{FEFF}'  => ' ',
            c if c.is_control()                   => ' ',
            c                                     => c,
        }
    }

    /// Clean a sentence: normalise characters, collapse whitespace, trim.
    pub fn clean_line(&self, text: &str) -> String {
        let mut out        = String::with_capacity(text.len());
        let mut last_space = true;

        for c in text.chars().map(Self::normalise_char) {
            if c == ' ' {
                if !last_space {
                    out.push(' ');
                }
                last_space = true;
            } else {
                out.push(c);
                last_space = false;
            }
        }

        out.trim_end().to_string()
    }

    /// Clean a QA context without moving any character.
    ///
    /// The output has exactly as many chars as the input, so answer
    /// offsets computed on the raw context remain correct.
    pub fn clean_context(&self, text: &str) -> String {
        text.chars().map(Self::normalise_char).collect()
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collapses_multiple_spaces() {
        let p = Preprocessor::new();
        assert_eq!(p.clean_line("hello   world"), "hello world");
    }

    #[test]
    fn test_trims_edges_and_tabs() {
        let p = Preprocessor::new();
        assert_eq!(p.clean_line("\t hello\tworld \r\n"), "hello world");
    }

    #[test]
    fn test_removes_control_and_invisible_chars() {
        let p = Preprocessor::new();
        assert_eq!(p.clean_line("\u{FEFF}hello\x01\u{200B}world"), "hello world");
    }

    #[test]
    fn test_case_is_kept() {
        let p = Preprocessor::new();
        assert_eq!(p.clean_line("The  Cat"), "The Cat");
    }

    #[test]
    fn test_context_keeps_char_count() {
        let p   = Preprocessor::new();
        let raw = "Paris\u{00A0}is\tthe  capital.";
        let out = p.clean_context(raw);
        assert_eq!(out.chars().count(), raw.chars().count());
        assert_eq!(out, "Paris is the  capital.");
    }

    #[test]
    fn test_empty_string() {
        let p = Preprocessor::new();
        assert_eq!(p.clean_line(""), "");
    }
}
