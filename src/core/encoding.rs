//! Tokenizer output.

/// Index-aligned token data for one encoded input.
///
/// Offsets are byte ranges into the input unless converted with
/// [`Encoding::to_char_offsets`]. They never decrease along the sequence.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Encoding {
    ids: Vec<u32>,
    tokens: Vec<String>,
    offsets: Vec<(usize, usize)>,
    special_tokens_mask: Vec<u32>,
    word_ids: Vec<Option<u32>>,
}

impl Encoding {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            ids: Vec::with_capacity(capacity),
            tokens: Vec::with_capacity(capacity),
            offsets: Vec::with_capacity(capacity),
            special_tokens_mask: Vec::with_capacity(capacity),
            word_ids: Vec::with_capacity(capacity),
        }
    }

    /// Make room for `additional` more tokens.
    pub fn reserve(&mut self, additional: usize) {
        self.ids.reserve(additional);
        self.tokens.reserve(additional);
        self.offsets.reserve(additional);
        self.special_tokens_mask.reserve(additional);
        self.word_ids.reserve(additional);
    }

    pub(crate) fn push(
        &mut self,
        id: u32,
        token: String,
        offsets: (usize, usize),
        special: bool,
        word: Option<u32>,
    ) {
        self.ids.push(id);
        self.tokens.push(token);
        self.offsets.push(offsets);
        self.special_tokens_mask.push(u32::from(special));
        self.word_ids.push(word);
    }

    /// Insert a special token before everything else, with an empty span at 0.
    pub fn prepend_special(&mut self, id: u32, token: impl Into<String>) {
        self.ids.insert(0, id);
        self.tokens.insert(0, token.into());
        self.offsets.insert(0, (0, 0));
        self.special_tokens_mask.insert(0, 1);
        self.word_ids.insert(0, None);
    }

    /// Append a special token with an empty span at the end of the last token.
    pub fn append_special(&mut self, id: u32, token: impl Into<String>) {
        let end = self.offsets.last().map_or(0, |&(_, end)| end);
        self.push(id, token.into(), (end, end), true, None);
    }

    pub fn get_ids(&self) -> &[u32] {
        &self.ids
    }

    pub fn get_tokens(&self) -> &[String] {
        &self.tokens
    }

    pub fn get_offsets(&self) -> &[(usize, usize)] {
        &self.offsets
    }

    /// 1 for special added tokens, 0 otherwise.
    pub fn get_special_tokens_mask(&self) -> &[u32] {
        &self.special_tokens_mask
    }

    /// Index of the pre-tokenized word each token came from, `None` for
    /// added tokens.
    pub fn get_word_ids(&self) -> &[Option<u32>] {
        &self.word_ids
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Convert byte offsets into character offsets of `text`, the string
    /// this encoding was produced from.
    ///
    /// A span starting or ending inside a character (byte fallback tokens)
    /// is widened to the whole character.
    pub fn to_char_offsets(&mut self, text: &str) {
        let mut char_of_byte = vec![0; text.len()];
        let mut chars = 0;
        for (idx, (start, c)) in text.char_indices().enumerate() {
            char_of_byte[start..start + c.len_utf8()].fill(idx);
            chars = idx + 1;
        }
        let to_char = |byte: usize| char_of_byte.get(byte).copied().unwrap_or(chars);

        for span in &mut self.offsets {
            let (start, end) = *span;
            let char_start = to_char(start);
            let char_end = if end > start {
                to_char(end - 1) + 1
            } else {
                char_start
            };
            *span = (char_start, char_end);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_special_tokens_edges() {
        let mut encoding = Encoding::default();
        encoding.push(5, "hi".into(), (0, 2), false, Some(0));
        encoding.prepend_special(0, "[CLS]");
        encoding.append_special(1, "[SEP]");

        assert_eq!(encoding.get_ids(), &[0, 5, 1]);
        assert_eq!(encoding.get_offsets(), &[(0, 0), (0, 2), (2, 2)]);
        assert_eq!(encoding.get_special_tokens_mask(), &[1, 0, 1]);
        assert_eq!(encoding.get_word_ids(), &[None, Some(0), None]);
    }

    #[test]
    fn test_char_offsets() {
        let text = "é😁a";
        let mut encoding = Encoding::with_capacity(4);
        encoding.push(0, "é".into(), (0, 2), false, Some(0));
        encoding.push(1, "<0xF0>".into(), (2, 3), false, Some(1));
        encoding.push(2, "<0x9F>".into(), (3, 4), false, Some(1));
        encoding.push(3, "a".into(), (6, 7), false, Some(2));
        encoding.to_char_offsets(text);

        assert_eq!(
            encoding.get_offsets(),
            &[(0, 1), (1, 2), (1, 2), (2, 3)]
        );
    }
}
