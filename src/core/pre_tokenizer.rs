//! Splitting text into words before the model sees it.
//!
//! Every pre-tokenizer returns sorted, non-overlapping byte spans; whitespace
//! never ends up inside a word, and every other character ends up in exactly
//! one word.

use std::sync::LazyLock;

use regex::Regex;

use super::tokenizer::TokenizerError;

/// Runs of word characters, or runs of anything that is neither a word
/// character nor whitespace.
pub const WHITESPACE_PATTERN: &str = r"\w+|[^\w\s]+";

static WHITESPACE_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(WHITESPACE_PATTERN).expect("whitespace pattern compiles"));

#[derive(Debug, Clone, Default)]
pub enum PreTokenizer {
    /// Split on whitespace, and between word characters and punctuation.
    #[default]
    Whitespace,
    /// Split on whitespace only.
    WhitespaceSplit,
    /// Every match of the pattern is a word; matches made only of
    /// whitespace are dropped.
    Pattern(Regex),
}

impl PreTokenizer {
    /// Pre-tokenizer emitting each match of `pattern` as a word.
    pub fn pattern(pattern: &str) -> Result<Self, TokenizerError> {
        Ok(PreTokenizer::Pattern(Regex::new(pattern)?))
    }

    /// Word spans in `text`.
    pub fn pre_tokenize(&self, text: &str) -> Vec<(usize, usize)> {
        match self {
            PreTokenizer::Whitespace => regex_spans(&WHITESPACE_REGEX, text),
            PreTokenizer::Pattern(regex) => regex_spans(regex, text),
            PreTokenizer::WhitespaceSplit => {
                let mut spans = Vec::new();
                let mut start = None;
                for (i, c) in text.char_indices() {
                    match (c.is_whitespace(), start) {
                        (true, Some(s)) => {
                            spans.push((s, i));
                            start = None;
                        }
                        (false, None) => start = Some(i),
                        _ => {}
                    }
                }
                if let Some(s) = start {
                    spans.push((s, text.len()));
                }
                spans
            }
        }
    }

    /// Words in `text` with their spans.
    pub fn pre_tokenize_str(&self, text: &str) -> Vec<(String, (usize, usize))> {
        self.pre_tokenize(text)
            .into_iter()
            .map(|(start, end)| (text[start..end].to_owned(), (start, end)))
            .collect()
    }

    /// Words in `text`, without spans.
    pub(crate) fn words(&self, text: &str) -> Vec<String> {
        self.pre_tokenize(text)
            .into_iter()
            .map(|(start, end)| text[start..end].to_owned())
            .collect()
    }
}

fn regex_spans(regex: &Regex, text: &str) -> Vec<(usize, usize)> {
    regex
        .find_iter(text)
        .filter(|m| !m.as_str().chars().all(char::is_whitespace))
        .map(|m| (m.start(), m.end()))
        .collect()
}
