use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use log::{debug, info};
use rayon::prelude::*;
use rustc_hash::FxHashMap;
use thiserror::Error;

use super::added_vocabulary::{AddedToken, AddedVocabulary, Segment};
use super::bpe::{Bpe, BpeError};
use super::encoding::Encoding;
use super::model::{Model, Trainer};
use super::normalizer::{NormalizedString, Normalizer};
use super::pre_tokenizer::PreTokenizer;
use super::vocab::VocabError;

#[derive(Error, Debug)]
pub enum TokenizerError {
    #[error("BPE model error: {0}")]
    BpeError(#[from] BpeError),
    #[error("Vocabulary error: {0}")]
    VocabError(#[from] VocabError),
    #[error("Aho-Corasick build error: {0}")]
    AhoCorasickError(#[from] aho_corasick::BuildError),
    #[error("Regex compilation error: {0}")]
    RegexError(#[from] regex::Error),
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Invalid trainer configuration: {0}")]
    InvalidTrainerConfig(String),
}

/// Hook run on every encoding requested with `add_special_tokens`, e.g. to
/// wrap it in `[CLS]` / `[SEP]`.
pub trait PostProcessor: Send + Sync {
    /// Number of tokens `process` adds to an encoding.
    fn added_tokens(&self) -> usize;

    fn process(&self, encoding: Encoding) -> Result<Encoding, TokenizerError>;
}

/// How literal text becomes words.
#[derive(Debug, Clone, Copy)]
enum Words {
    /// Run the pre-tokenizer; words are numbered in order.
    Split,
    /// The text is one word with the given index.
    Whole(u32),
}

/// Text → [`Encoding`] pipeline.
///
/// Per call: added tokens matching the raw input are split out, the rest is
/// normalized, added tokens matching normalized text are split out, the
/// remaining text is pre-tokenized and each word is tokenized by the model.
/// All offsets refer to the raw input.
#[derive(Clone)]
pub struct Tokenizer<M: Model = Bpe> {
    model: M,
    added_vocabulary: AddedVocabulary,
    normalizer: Option<Normalizer>,
    pre_tokenizer: PreTokenizer,
    post_processor: Option<Arc<dyn PostProcessor>>,
}

impl<M: Model> Tokenizer<M> {
    /// Create a tokenizer with the whitespace pre-tokenizer and no normalizer.
    pub fn new(model: M) -> Self {
        Self {
            model,
            added_vocabulary: AddedVocabulary::new(),
            normalizer: None,
            pre_tokenizer: PreTokenizer::default(),
            post_processor: None,
        }
    }

    pub fn with_normalizer(mut self, normalizer: Normalizer) -> Self {
        self.normalizer = Some(normalizer);
        self
    }

    pub fn with_pre_tokenizer(mut self, pre_tokenizer: PreTokenizer) -> Self {
        self.pre_tokenizer = pre_tokenizer;
        self
    }

    pub fn with_post_processor<P: PostProcessor + 'static>(mut self, processor: P) -> Self {
        self.post_processor = Some(Arc::new(processor));
        self
    }

    /// Tokens the post-processor adds to an encoding requested with
    /// `add_special_tokens`.
    pub fn num_special_tokens_to_add(&self) -> usize {
        self.post_processor
            .as_ref()
            .map_or(0, |processor| processor.added_tokens())
    }

    pub fn model(&self) -> &M {
        &self.model
    }

    pub fn into_model(self) -> M {
        self.model
    }

    pub fn normalizer(&self) -> Option<&Normalizer> {
        self.normalizer.as_ref()
    }

    pub fn pre_tokenizer(&self) -> &PreTokenizer {
        &self.pre_tokenizer
    }

    pub fn added_vocabulary(&self) -> &AddedVocabulary {
        &self.added_vocabulary
    }

    /// Add tokens matched ahead of the model. Returns how many were new.
    pub fn add_tokens(&mut self, tokens: &[AddedToken]) -> Result<usize, TokenizerError> {
        self.added_vocabulary.add_tokens(tokens, &self.model)
    }

    /// Add tokens as special tokens. Returns how many were new.
    pub fn add_special_tokens(&mut self, tokens: &[AddedToken]) -> Result<usize, TokenizerError> {
        let special: Vec<AddedToken> = tokens.iter().map(|t| t.clone().special(true)).collect();
        self.added_vocabulary.add_tokens(&special, &self.model)
    }

    /// Id of `token`, looking at added tokens first.
    pub fn token_to_id(&self, token: &str) -> Option<u32> {
        self.added_vocabulary
            .token_to_id(token)
            .or_else(|| self.model.token_to_id(token))
    }

    /// Token for `id`, looking at added tokens first.
    pub fn id_to_token(&self, id: u32) -> Option<&str> {
        match self.added_vocabulary.id_to_token(id) {
            Some(token) => Some(token.content.as_str()),
            None => self.model.id_to_token(id),
        }
    }

    /// Model vocabulary plus non-special added tokens; special added tokens
    /// are included only `with_added_tokens`.
    pub fn get_vocab(&self, with_added_tokens: bool) -> FxHashMap<String, u32> {
        let mut vocab = self.model.get_vocab();
        for token in self.added_vocabulary.tokens() {
            if token.special && !with_added_tokens {
                continue;
            }
            if let Some(id) = self.added_vocabulary.token_to_id(&token.content) {
                vocab.insert(token.content.clone(), id);
            }
        }
        vocab
    }

    pub fn get_vocab_size(&self, with_added_tokens: bool) -> usize {
        self.get_vocab(with_added_tokens).len()
    }

    /// Encode `text`. Offsets are byte offsets into `text`.
    pub fn encode(&self, text: &str, add_special_tokens: bool) -> Result<Encoding, TokenizerError> {
        let mut encoding = Encoding::default();
        let mut next_word = 0;
        self.encode_piece(text, (0, text.len()), Words::Split, &mut encoding, &mut next_word)?;
        self.post_process(encoding, add_special_tokens)
    }

    /// Encode `text` with offsets counted in characters instead of bytes.
    pub fn encode_char_offsets(
        &self,
        text: &str,
        add_special_tokens: bool,
    ) -> Result<Encoding, TokenizerError> {
        let mut encoding = self.encode(text, add_special_tokens)?;
        encoding.to_char_offsets(text);
        Ok(encoding)
    }

    /// Encode words that are already split. The pre-tokenizer is skipped;
    /// added tokens and the model still apply. Offsets index into the
    /// concatenation of `words`.
    pub fn encode_pre_tokenized<S: AsRef<str>>(
        &self,
        words: &[S],
        add_special_tokens: bool,
    ) -> Result<Encoding, TokenizerError> {
        let mut text = String::new();
        let mut spans = Vec::with_capacity(words.len());
        for word in words {
            let start = text.len();
            text.push_str(word.as_ref());
            spans.push((start, text.len()));
        }

        let mut encoding = Encoding::default();
        let mut next_word = 0;
        for (i, span) in spans.into_iter().enumerate() {
            self.encode_piece(&text, span, Words::Whole(i as u32), &mut encoding, &mut next_word)?;
        }
        self.post_process(encoding, add_special_tokens)
    }

    /// Encode several inputs in parallel.
    pub fn encode_batch<S: AsRef<str> + Sync>(
        &self,
        inputs: &[S],
        add_special_tokens: bool,
    ) -> Result<Vec<Encoding>, TokenizerError> {
        inputs
            .par_iter()
            .map(|text| self.encode(text.as_ref(), add_special_tokens))
            .collect()
    }

    /// Join the tokens for `ids` with spaces. Unknown ids are skipped.
    pub fn decode(&self, ids: &[u32], skip_special_tokens: bool) -> String {
        ids.iter()
            .filter_map(|&id| match self.added_vocabulary.id_to_token(id) {
                Some(token) if skip_special_tokens && token.special => None,
                Some(token) => Some(token.content.as_str()),
                None => self.model.id_to_token(id),
            })
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Write the model files into `folder`.
    pub fn save_model(&self, folder: &Path, prefix: Option<&str>) -> Result<Vec<PathBuf>, TokenizerError> {
        self.model.save(folder, prefix)
    }

    /// Train a new model on `sequences`, each split with the normalizer and
    /// pre-tokenizer, then register the trainer's special tokens.
    pub fn train<T, I, S>(&mut self, trainer: &mut T, sequences: I) -> Result<(), TokenizerError>
    where
        T: Trainer<Model = M>,
        I: Iterator<Item = S> + Send,
        S: AsRef<str> + Send,
    {
        trainer.feed(sequences, |sequence| Ok(self.training_words(sequence)))?;
        let special_tokens = trainer.train(&mut self.model)?;
        self.added_vocabulary.refresh(&self.model)?;
        let added = self.add_special_tokens(&special_tokens)?;
        info!(
            "Trained model with {} tokens, {} new special tokens",
            self.model.get_vocab_size(),
            added
        );
        Ok(())
    }

    /// Train on the lines of every file in `files`.
    pub fn train_from_files<T, P>(&mut self, trainer: &mut T, files: &[P]) -> Result<(), TokenizerError>
    where
        T: Trainer<Model = M>,
        P: AsRef<Path>,
    {
        let mut contents = Vec::with_capacity(files.len());
        for file in files {
            debug!("Reading training file {}", file.as_ref().display());
            contents.push(fs::read_to_string(file)?);
        }
        self.train(trainer, contents.iter().flat_map(|c| c.lines()))
    }

    fn training_words(&self, sequence: &str) -> Vec<String> {
        match &self.normalizer {
            Some(normalizer) => self.pre_tokenizer.words(&normalizer.normalize_str(sequence)),
            None => self.pre_tokenizer.words(sequence),
        }
    }

    fn post_process(
        &self,
        mut encoding: Encoding,
        add_special_tokens: bool,
    ) -> Result<Encoding, TokenizerError> {
        match &self.post_processor {
            Some(processor) if add_special_tokens => {
                encoding.reserve(processor.added_tokens());
                processor.process(encoding)
            }
            _ => Ok(encoding),
        }
    }

    fn push_added(&self, id: u32, offsets: (usize, usize), encoding: &mut Encoding) {
        if let Some(token) = self.added_vocabulary.id_to_token(id) {
            encoding.push(id, token.content.clone(), offsets, token.special, None);
        }
    }

    /// Encode `text[span]`, appending to `encoding`.
    fn encode_piece(
        &self,
        text: &str,
        span: (usize, usize),
        words: Words,
        encoding: &mut Encoding,
        next_word: &mut u32,
    ) -> Result<(), TokenizerError> {
        let (base, end) = span;
        for segment in self.added_vocabulary.split(&text[base..end], false) {
            match segment {
                Segment::Matched { id, span: (s, e) } => {
                    self.push_added(id, (base + s, base + e), encoding)
                }
                Segment::Literal((s, e)) => {
                    self.encode_literal(text, (base + s, base + e), words, encoding, next_word)?
                }
            }
        }
        Ok(())
    }

    fn encode_literal(
        &self,
        text: &str,
        span: (usize, usize),
        words: Words,
        encoding: &mut Encoding,
        next_word: &mut u32,
    ) -> Result<(), TokenizerError> {
        let normalized = match &self.normalizer {
            Some(normalizer) => normalizer.normalize_span(text, span),
            None => NormalizedString::from_span(text, span),
        };
        let norm = normalized.get();

        for segment in self.added_vocabulary.split(norm, true) {
            let (s, e) = match segment {
                Segment::Matched { id, span: (s, e) } => {
                    self.push_added(id, normalized.original_span(s, e), encoding);
                    continue;
                }
                Segment::Literal(span) => span,
            };

            let word_spans: Vec<(usize, usize)> = match words {
                Words::Split => self
                    .pre_tokenizer
                    .pre_tokenize(&norm[s..e])
                    .into_iter()
                    .map(|(ws, we)| (s + ws, s + we))
                    .collect(),
                Words::Whole(_) => vec![(s, e)],
            };

            for (ws, we) in word_spans {
                let word_id = match words {
                    Words::Whole(id) => id,
                    Words::Split => {
                        let id = *next_word;
                        *next_word += 1;
                        id
                    }
                };
                for token in self.model.tokenize(&norm[ws..we])? {
                    let (ts, te) = token.offsets;
                    let offsets = normalized.original_span(ws + ts, ws + te);
                    encoding.push(token.id, token.value, offsets, false, Some(word_id));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::vocab::{MergeTable, Vocab};

    // [UNK]=0 a=1 b=2 c=3 ab=4 abc=5
    fn make_test_model() -> Bpe {
        let vocab: Vocab = ["[UNK]", "a", "b", "c", "ab", "abc"].into_iter().collect();
        let merges = MergeTable::parse("a b\nab c\n").unwrap();
        Bpe::builder()
            .vocab_and_merges(vocab, merges)
            .unk_token("[UNK]")
            .build()
            .unwrap()
    }

    fn make_test_tokenizer() -> Tokenizer {
        Tokenizer::new(make_test_model())
    }

    struct Wrap;

    impl PostProcessor for Wrap {
        fn added_tokens(&self) -> usize {
            2
        }

        fn process(&self, mut encoding: Encoding) -> Result<Encoding, TokenizerError> {
            encoding.prepend_special(100, "[CLS]");
            encoding.append_special(101, "[SEP]");
            Ok(encoding)
        }
    }

    #[test]
    fn test_encode_words() {
        let tokenizer = make_test_tokenizer();
        let encoding = tokenizer.encode("abc ab x", false).unwrap();

        assert_eq!(encoding.get_ids(), &[5, 4, 0]);
        assert_eq!(encoding.get_tokens(), &["abc", "ab", "[UNK]"]);
        assert_eq!(encoding.get_offsets(), &[(0, 3), (4, 6), (7, 8)]);
        assert_eq!(encoding.get_word_ids(), &[Some(0), Some(1), Some(2)]);
    }

    #[test]
    fn test_encode_empty() {
        let tokenizer = make_test_tokenizer();
        assert!(tokenizer.encode("", false).unwrap().is_empty());
        assert!(tokenizer.encode("   ", false).unwrap().is_empty());
    }

    #[test]
    fn test_special_token_bypasses_model() {
        let mut tokenizer = make_test_tokenizer();
        tokenizer
            .add_special_tokens(&[AddedToken::from("<s>", true)])
            .unwrap();

        let encoding = tokenizer.encode("ab<s>c", false).unwrap();
        assert_eq!(encoding.get_tokens(), &["ab", "<s>", "c"]);
        assert_eq!(encoding.get_ids(), &[4, 6, 3]);
        assert_eq!(encoding.get_offsets(), &[(0, 2), (2, 5), (5, 6)]);
        assert_eq!(encoding.get_special_tokens_mask(), &[0, 1, 0]);
        assert_eq!(encoding.get_word_ids(), &[Some(0), None, Some(1)]);
    }

    #[test]
    fn test_normalized_added_token() {
        let mut tokenizer = make_test_tokenizer().with_normalizer(Normalizer::Lowercase);
        tokenizer.add_tokens(&["ca".into()]).unwrap();

        let encoding = tokenizer.encode("CAB b", false).unwrap();
        assert_eq!(encoding.get_tokens(), &["ca", "b", "b"]);
        assert_eq!(encoding.get_offsets(), &[(0, 2), (2, 3), (4, 5)]);
    }

    #[test]
    fn test_unknown_symbol_without_unk() {
        let vocab: Vocab = ["a"].into_iter().collect();
        let tokenizer = Tokenizer::new(Bpe::new(vocab, MergeTable::new()).unwrap());
        let err = tokenizer.encode("a x", false).unwrap_err();
        assert!(matches!(
            err,
            TokenizerError::BpeError(BpeError::UnknownSymbol(_))
        ));
        // The tokenizer stays usable.
        assert_eq!(tokenizer.encode("a", false).unwrap().get_ids(), &[0]);
    }

    #[test]
    fn test_pre_tokenized() {
        let tokenizer = make_test_tokenizer();
        let encoding = tokenizer.encode_pre_tokenized(&["ab", "c a"], false).unwrap();

        assert_eq!(encoding.get_tokens(), &["ab", "c", "[UNK]", "a"]);
        assert_eq!(encoding.get_offsets(), &[(0, 2), (2, 3), (3, 4), (4, 5)]);
        assert_eq!(encoding.get_word_ids(), &[Some(0), Some(1), Some(1), Some(1)]);
    }

    #[test]
    fn test_post_processor_only_when_requested() {
        let tokenizer = make_test_tokenizer().with_post_processor(Wrap);

        let plain = tokenizer.encode("ab", false).unwrap();
        assert_eq!(plain.get_ids(), &[4]);

        let wrapped = tokenizer.encode("ab", true).unwrap();
        assert_eq!(wrapped.get_ids(), &[100, 4, 101]);
        assert_eq!(wrapped.get_offsets(), &[(0, 0), (0, 2), (2, 2)]);
    }

    #[test]
    fn test_num_special_tokens_to_add() {
        assert_eq!(make_test_tokenizer().num_special_tokens_to_add(), 0);

        let tokenizer = make_test_tokenizer().with_post_processor(Wrap);
        assert_eq!(tokenizer.num_special_tokens_to_add(), 2);
        let plain = tokenizer.encode("abc ab", false).unwrap();
        let wrapped = tokenizer.encode("abc ab", true).unwrap();
        assert_eq!(wrapped.len(), plain.len() + tokenizer.num_special_tokens_to_add());
    }

    #[test]
    fn test_vocab_lookups() {
        let mut tokenizer = make_test_tokenizer();
        tokenizer
            .add_tokens(&[AddedToken::from("ab", false), AddedToken::from("xyz", false)])
            .unwrap();
        tokenizer
            .add_special_tokens(&[AddedToken::from("<s>", true)])
            .unwrap();

        assert_eq!(tokenizer.token_to_id("ab"), Some(4));
        assert_eq!(tokenizer.token_to_id("xyz"), Some(6));
        assert_eq!(tokenizer.token_to_id("<s>"), Some(7));
        assert_eq!(tokenizer.id_to_token(7), Some("<s>"));
        assert_eq!(tokenizer.id_to_token(1), Some("a"));
        assert_eq!(tokenizer.id_to_token(99), None);

        assert!(!tokenizer.get_vocab(false).contains_key("<s>"));
        assert!(tokenizer.get_vocab(true).contains_key("<s>"));
        assert_eq!(tokenizer.get_vocab_size(false), 7);
        assert_eq!(tokenizer.get_vocab_size(true), 8);
    }

    #[test]
    fn test_decode() {
        let mut tokenizer = make_test_tokenizer();
        tokenizer
            .add_special_tokens(&[AddedToken::from("<s>", true)])
            .unwrap();

        assert_eq!(tokenizer.decode(&[5, 6, 4], false), "abc <s> ab");
        assert_eq!(tokenizer.decode(&[5, 6, 4], true), "abc ab");
        assert_eq!(tokenizer.decode(&[42], false), "");
    }

    #[test]
    fn test_char_offsets() {
        let tokenizer = make_test_tokenizer();
        let encoding = tokenizer.encode_char_offsets("é ab", false).unwrap();
        assert_eq!(encoding.get_tokens(), &["[UNK]", "ab"]);
        assert_eq!(encoding.get_offsets(), &[(0, 1), (2, 4)]);
    }

    #[test]
    fn test_encode_batch_matches_single() {
        let tokenizer = make_test_tokenizer();
        let inputs = vec!["ab c".to_string(), "abc".to_string(), "zz".to_string()];
        let batch = tokenizer.encode_batch(&inputs, false).unwrap();

        assert_eq!(batch.len(), 3);
        for (input, encoding) in inputs.iter().zip(&batch) {
            assert_eq!(encoding, &tokenizer.encode(input, false).unwrap());
        }
    }
}
