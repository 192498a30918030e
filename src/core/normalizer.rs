//! Text normalization with alignment back to the input.
//!
//! Normalizers rewrite text one segment at a time: a single character for
//! case mapping, a starter character plus its trailing combining marks for
//! Unicode normalization forms. Every byte of the output remembers the input
//! byte range of the segment it came from, so spans found in normalized text
//! can always be reported in input coordinates.

use unicode_normalization::char::canonical_combining_class;
use unicode_normalization::UnicodeNormalization;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Normalizer {
    Lowercase,
    Nfc,
    Nfd,
    Nfkc,
    Nfkd,
    /// Apply each normalizer in turn.
    Sequence(Vec<Normalizer>),
}

impl Normalizer {
    /// Normalize `text[span]`, aligning output bytes to absolute offsets in `text`.
    pub fn normalize_span(&self, text: &str, span: (usize, usize)) -> NormalizedString {
        let mut normalized = NormalizedString::from_span(text, span);
        self.apply(&mut normalized);
        normalized
    }

    /// Normalize a whole string.
    pub fn normalize_str(&self, text: &str) -> String {
        self.normalize_span(text, (0, text.len())).normalized
    }

    fn apply(&self, normalized: &mut NormalizedString) {
        match self {
            Normalizer::Lowercase => normalized.rewrite(false, |s| s.to_lowercase()),
            Normalizer::Nfc => normalized.rewrite(true, |s| s.nfc().collect()),
            Normalizer::Nfd => normalized.rewrite(true, |s| s.nfd().collect()),
            Normalizer::Nfkc => normalized.rewrite(true, |s| s.nfkc().collect()),
            Normalizer::Nfkd => normalized.rewrite(true, |s| s.nfkd().collect()),
            Normalizer::Sequence(normalizers) => {
                for n in normalizers {
                    n.apply(normalized);
                }
            }
        }
    }
}

/// Normalized text plus, for each of its bytes, the input byte range it
/// was produced from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedString {
    normalized: String,
    alignments: Vec<(usize, usize)>,
    /// Input range the whole string covers.
    span: (usize, usize),
}

impl NormalizedString {
    /// Identity normalization of `text[span]`.
    pub fn from_span(text: &str, span: (usize, usize)) -> Self {
        let (start, end) = span;
        let slice = &text[start..end];
        let mut alignments = Vec::with_capacity(slice.len());
        for (i, c) in slice.char_indices() {
            let range = (start + i, start + i + c.len_utf8());
            alignments.extend(std::iter::repeat(range).take(c.len_utf8()));
        }
        Self {
            normalized: slice.to_owned(),
            alignments,
            span,
        }
    }

    pub fn get(&self) -> &str {
        &self.normalized
    }

    pub fn len(&self) -> usize {
        self.normalized.len()
    }

    pub fn is_empty(&self) -> bool {
        self.normalized.is_empty()
    }

    /// Input byte range for the normalized byte range `start..end`.
    ///
    /// An empty range maps to an empty range at the matching input position.
    pub fn original_span(&self, start: usize, end: usize) -> (usize, usize) {
        if start >= end {
            let at = self
                .alignments
                .get(start)
                .map(|&(s, _)| s)
                .unwrap_or(self.span.1);
            return (at, at);
        }
        let first = self.alignments.get(start).map_or(self.span.1, |a| a.0);
        let last = self
            .alignments
            .get(end - 1)
            .map_or(self.span.1, |a| a.1);
        (first, last.max(first))
    }

    /// Rewrite the text segment by segment with `f`. With `with_marks`, a
    /// segment is a character followed by its combining marks, otherwise a
    /// single character.
    fn rewrite<F: Fn(&str) -> String>(&mut self, with_marks: bool, f: F) {
        let mut normalized = String::with_capacity(self.normalized.len());
        let mut alignments = Vec::with_capacity(self.alignments.len());

        let text = &self.normalized;
        let mut bounds: Vec<usize> = text
            .char_indices()
            .filter(|&(i, c)| i == 0 || !with_marks || canonical_combining_class(c) == 0)
            .map(|(i, _)| i)
            .collect();
        bounds.push(text.len());

        for window in bounds.windows(2) {
            let (start, end) = (window[0], window[1]);
            if start == end {
                continue;
            }
            let origin = (self.alignments[start].0, self.alignments[end - 1].1);
            let rewritten = f(&text[start..end]);
            alignments.extend(std::iter::repeat(origin).take(rewritten.len()));
            normalized.push_str(&rewritten);
        }

        self.normalized = normalized;
        self.alignments = alignments;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_alignment() {
        let text = "xx héllo";
        let ns = NormalizedString::from_span(text, (3, text.len()));
        assert_eq!(ns.get(), "héllo");
        // "é" is two bytes, both aligned to the same character.
        assert_eq!(ns.original_span(1, 2), (4, 6));
        assert_eq!(ns.original_span(0, ns.len()), (3, text.len()));
    }

    #[test]
    fn test_lowercase() {
        let ns = Normalizer::Lowercase.normalize_span("HeLLo", (0, 5));
        assert_eq!(ns.get(), "hello");
        assert_eq!(ns.original_span(2, 4), (2, 4));
    }

    #[test]
    fn test_nfc_composes_marks() {
        let text = "ae\u{301}b";
        let ns = Normalizer::Nfc.normalize_span(text, (0, text.len()));
        assert_eq!(ns.get(), "aéb");
        // The composed "é" covers the base letter and its combining accent.
        assert_eq!(ns.original_span(1, 3), (1, 4));
        assert_eq!(ns.original_span(3, 4), (4, 5));
    }

    #[test]
    fn test_nfkc_expands_ligature() {
        let text = "\u{FB01}x";
        let ns = Normalizer::Nfkc.normalize_span(text, (0, text.len()));
        assert_eq!(ns.get(), "fix");
        assert_eq!(ns.original_span(0, 1), (0, 3));
        assert_eq!(ns.original_span(2, 3), (3, 4));
    }

    #[test]
    fn test_sequence() {
        let n = Normalizer::Sequence(vec![Normalizer::Nfd, Normalizer::Lowercase]);
        assert_eq!(n.normalize_str("É"), "e\u{301}");
    }

    #[test]
    fn test_empty_span() {
        let ns = NormalizedString::from_span("abc", (1, 1));
        assert!(ns.is_empty());
        assert_eq!(ns.original_span(0, 0), (1, 1));
    }
}
