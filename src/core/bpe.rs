//! Byte-Pair Encoding model.
//!
//! Each word is split into one symbol per character, decorated with the
//! continuing-subword prefix (every symbol but the first) and the
//! end-of-word suffix (last symbol). Merges are then applied by rank until
//! no adjacent pair has a rule, see [`Word::merge_all`].
//!
//! Characters missing from the vocabulary become byte tokens (`<0xNN>`)
//! when byte fallback is enabled and all bytes are known, the unknown token
//! otherwise. Without an unknown token the encode call fails.
//!
//! Merged words are cached per exact word string while dropout is off.

use std::borrow::Cow;
use std::fs;
use std::path::{Path, PathBuf};

use log::debug;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::cache::{WordCache, DEFAULT_CACHE_CAPACITY};
use super::model::{Model, Token};
use super::tokenizer::TokenizerError;
use super::trainer::BpeTrainer;
use super::vocab::{MergeTable, Vocab, VocabError};
use super::word::{MergeMap, Word};

#[derive(Error, Debug)]
pub enum BpeError {
    #[error("Vocabulary error: {0}")]
    Vocab(#[from] VocabError),
    #[error("Unknown token {0:?} is not in the vocabulary")]
    UnkTokenOutOfVocabulary(String),
    #[error("Dropout must be within [0, 1], got {0}")]
    InvalidDropout(f32),
    #[error("Merge {left:?} {right:?} needs {missing:?}, which is not in the vocabulary")]
    MergeTokenOutOfVocabulary {
        left: String,
        right: String,
        missing: String,
    },
    #[error("Symbol {0:?} is not in the vocabulary and no unknown token is configured")]
    UnknownSymbol(String),
}

/// Options recognized when constructing a [`Bpe`] model.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BpeConfig {
    /// Encode cache size; `None` uses the default, `Some(0)` disables it.
    pub cache_capacity: Option<usize>,
    /// Merge dropout probability; `None` or `0.0` is deterministic.
    pub dropout: Option<f32>,
    pub unk_token: Option<String>,
    pub continuing_subword_prefix: Option<String>,
    pub end_of_word_suffix: Option<String>,
    /// Collapse consecutive unknown tokens into one.
    pub fuse_unk: bool,
    /// Emit `<0xNN>` byte tokens for characters missing from the vocabulary.
    pub byte_fallback: bool,
    /// Emit a word that is already a vocabulary entry without merging.
    pub ignore_merges: bool,
}

/// Builder for [`Bpe`].
#[derive(Debug, Default)]
pub struct BpeBuilder {
    vocab: Vocab,
    merges: MergeTable,
    config: BpeConfig,
}

impl BpeBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn vocab_and_merges(mut self, vocab: Vocab, merges: MergeTable) -> Self {
        self.vocab = vocab;
        self.merges = merges;
        self
    }

    /// Replace every option with those in `config`.
    pub fn config(mut self, config: BpeConfig) -> Self {
        self.config = config;
        self
    }

    pub fn cache_capacity(mut self, capacity: usize) -> Self {
        self.config.cache_capacity = Some(capacity);
        self
    }

    pub fn dropout(mut self, dropout: f32) -> Self {
        self.config.dropout = Some(dropout);
        self
    }

    pub fn unk_token(mut self, unk_token: impl Into<String>) -> Self {
        self.config.unk_token = Some(unk_token.into());
        self
    }

    pub fn continuing_subword_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.config.continuing_subword_prefix = Some(prefix.into());
        self
    }

    pub fn end_of_word_suffix(mut self, suffix: impl Into<String>) -> Self {
        self.config.end_of_word_suffix = Some(suffix.into());
        self
    }

    pub fn fuse_unk(mut self, fuse_unk: bool) -> Self {
        self.config.fuse_unk = fuse_unk;
        self
    }

    pub fn byte_fallback(mut self, byte_fallback: bool) -> Self {
        self.config.byte_fallback = byte_fallback;
        self
    }

    pub fn ignore_merges(mut self, ignore_merges: bool) -> Self {
        self.config.ignore_merges = ignore_merges;
        self
    }

    /// Validate the configuration and build the model.
    ///
    /// An empty (untrained) vocabulary may name an unknown token that does
    /// not exist yet; once a vocabulary is present the token must be in it.
    pub fn build(self) -> Result<Bpe, BpeError> {
        let BpeBuilder {
            vocab,
            merges,
            config,
        } = self;

        if let Some(p) = config.dropout {
            if !(0.0..=1.0).contains(&p) {
                return Err(BpeError::InvalidDropout(p));
            }
        }

        let unk_id = match &config.unk_token {
            Some(unk) => match vocab.token_to_id(unk) {
                Some(id) => Some(id),
                None if vocab.is_empty() => None,
                None => return Err(BpeError::UnkTokenOutOfVocabulary(unk.clone())),
            },
            None => None,
        };

        let merge_map = build_merge_map(
            &vocab,
            &merges,
            config.continuing_subword_prefix.as_deref(),
        )?;

        debug!(
            "BPE model built: {} tokens, {} merges",
            vocab.len(),
            merges.len()
        );

        Ok(Bpe {
            vocab,
            merges,
            merge_map,
            cache: WordCache::new(config.cache_capacity.unwrap_or(DEFAULT_CACHE_CAPACITY)),
            dropout: config.dropout.filter(|&p| p > 0.0),
            unk_token: config.unk_token,
            unk_id,
            continuing_subword_prefix: config.continuing_subword_prefix,
            end_of_word_suffix: config.end_of_word_suffix,
            fuse_unk: config.fuse_unk,
            byte_fallback: config.byte_fallback,
            ignore_merges: config.ignore_merges,
        })
    }
}

/// Resolve every merge rule to ids: (left, right) → (rank, merged).
fn build_merge_map(
    vocab: &Vocab,
    merges: &MergeTable,
    prefix: Option<&str>,
) -> Result<MergeMap, BpeError> {
    let mut merge_map = MergeMap::default();
    merge_map.reserve(merges.len());

    for (rank, (left, right)) in merges.iter().enumerate() {
        let lookup = |token: &str| {
            vocab
                .token_to_id(token)
                .ok_or_else(|| BpeError::MergeTokenOutOfVocabulary {
                    left: left.to_owned(),
                    right: right.to_owned(),
                    missing: token.to_owned(),
                })
        };
        let left_id = lookup(left)?;
        let right_id = lookup(right)?;
        let merged = merged_symbol(left, right, prefix);
        let new_id = lookup(&merged)?;

        merge_map
            .entry((left_id, right_id))
            .or_insert((rank as u32, new_id));
    }

    Ok(merge_map)
}

/// The symbol produced by merging `left` and `right`.
pub(crate) fn merged_symbol(left: &str, right: &str, prefix: Option<&str>) -> String {
    let right = prefix
        .and_then(|p| right.strip_prefix(p))
        .unwrap_or(right);
    let mut merged = String::with_capacity(left.len() + right.len());
    merged.push_str(left);
    merged.push_str(right);
    merged
}

/// Byte-Pair Encoding model.
///
/// Vocabulary and merges are read-only after construction; the encode
/// cache is internally synchronized, so a `Bpe` can be shared across
/// threads and used for concurrent encoding.
pub struct Bpe {
    vocab: Vocab,
    merges: MergeTable,
    merge_map: MergeMap,
    cache: WordCache,
    dropout: Option<f32>,
    unk_token: Option<String>,
    unk_id: Option<u32>,
    continuing_subword_prefix: Option<String>,
    end_of_word_suffix: Option<String>,
    fuse_unk: bool,
    byte_fallback: bool,
    ignore_merges: bool,
}

impl Bpe {
    pub fn builder() -> BpeBuilder {
        BpeBuilder::new()
    }

    /// Create a model with default options.
    pub fn new(vocab: Vocab, merges: MergeTable) -> Result<Self, BpeError> {
        Self::builder().vocab_and_merges(vocab, merges).build()
    }

    /// Start a builder from a vocabulary file and a merges file.
    pub fn from_files<P, Q>(vocab_path: P, merges_path: Q) -> Result<BpeBuilder, BpeError>
    where
        P: AsRef<Path>,
        Q: AsRef<Path>,
    {
        let (vocab, merges) = super::vocab::read_files(vocab_path, merges_path)?;
        Ok(Self::builder().vocab_and_merges(vocab, merges))
    }

    pub fn vocab(&self) -> &Vocab {
        &self.vocab
    }

    pub fn merges(&self) -> &MergeTable {
        &self.merges
    }

    /// Current options, suitable for rebuilding a model with another vocabulary.
    pub fn config(&self) -> BpeConfig {
        BpeConfig {
            cache_capacity: Some(self.cache.capacity()),
            dropout: self.dropout,
            unk_token: self.unk_token.clone(),
            continuing_subword_prefix: self.continuing_subword_prefix.clone(),
            end_of_word_suffix: self.end_of_word_suffix.clone(),
            fuse_unk: self.fuse_unk,
            byte_fallback: self.byte_fallback,
            ignore_merges: self.ignore_merges,
        }
    }

    pub fn unk_token(&self) -> Option<&str> {
        self.unk_token.as_deref()
    }

    pub fn dropout(&self) -> Option<f32> {
        self.dropout
    }

    pub fn continuing_subword_prefix(&self) -> Option<&str> {
        self.continuing_subword_prefix.as_deref()
    }

    pub fn end_of_word_suffix(&self) -> Option<&str> {
        self.end_of_word_suffix.as_deref()
    }

    /// Clear the encoding cache.
    pub fn clear_cache(&self) {
        self.cache.clear();
    }

    /// Replace the cache with an empty one of the given capacity.
    pub fn resize_cache(&mut self, capacity: usize) {
        self.cache = WordCache::new(capacity);
    }

    /// Get the current cache size.
    pub fn cache_len(&self) -> usize {
        self.cache.len()
    }

    pub fn cache_capacity(&self) -> usize {
        self.cache.capacity()
    }

    /// Ids for a single word.
    pub fn encode_word(&self, word: &str) -> Result<Vec<u32>, BpeError> {
        Ok(self.tokenize_word(word)?.ids())
    }

    /// Decompose `w` into base symbols, resolving unknown characters.
    fn split_word(&self, w: &str) -> Result<Word, BpeError> {
        let mut word = Word::with_capacity(w.len());
        let mut pending_unk: Option<(u32, usize)> = None;
        let mut chars = w.char_indices().peekable();

        while let Some((start, c)) = chars.next() {
            let len = c.len_utf8();
            let is_first = start == 0;
            let is_last = chars.peek().is_none();
            let piece = &w[start..start + len];

            let mut symbol = Cow::Borrowed(piece);
            if !is_first {
                if let Some(prefix) = &self.continuing_subword_prefix {
                    symbol = Cow::Owned(format!("{prefix}{symbol}"));
                }
            }
            if is_last {
                if let Some(suffix) = &self.end_of_word_suffix {
                    symbol = Cow::Owned(format!("{symbol}{suffix}"));
                }
            }

            if let Some(id) = self.vocab.token_to_id(&symbol) {
                if let Some((unk_id, unk_len)) = pending_unk.take() {
                    word.add(unk_id, unk_len);
                }
                word.add(id, len);
                continue;
            }

            if self.byte_fallback {
                let byte_ids: Option<Vec<u32>> = piece
                    .bytes()
                    .map(|b| self.vocab.token_to_id(&format!("<{b:#04X}>")))
                    .collect();
                if let Some(byte_ids) = byte_ids {
                    if let Some((unk_id, unk_len)) = pending_unk.take() {
                        word.add(unk_id, unk_len);
                    }
                    for id in byte_ids {
                        word.add(id, 1);
                    }
                    continue;
                }
            }

            let Some(unk_id) = self.unk_id else {
                return Err(BpeError::UnknownSymbol(symbol.into_owned()));
            };
            pending_unk = match pending_unk {
                Some((id, pending_len)) if self.fuse_unk => Some((id, pending_len + len)),
                Some((id, pending_len)) => {
                    word.add(id, pending_len);
                    Some((unk_id, len))
                }
                None => Some((unk_id, len)),
            };
        }

        if let Some((unk_id, unk_len)) = pending_unk {
            word.add(unk_id, unk_len);
        }

        Ok(word)
    }

    fn tokenize_word(&self, sequence: &str) -> Result<Word, BpeError> {
        let cacheable = self.dropout.is_none();
        if cacheable {
            if let Some(hit) = self.cache.get(sequence) {
                return Ok(hit);
            }
        }

        let mut word = self.split_word(sequence)?;
        word.merge_all(&self.merge_map, self.dropout);

        if cacheable {
            self.cache.insert(sequence, &word);
        }
        Ok(word)
    }

    fn word_to_tokens(&self, word: &Word) -> Vec<Token> {
        word.offsets()
            .map(|(id, offsets)| {
                let value = self.vocab.id_to_token(id).unwrap_or_default().to_owned();
                Token::new(id, value, offsets)
            })
            .collect()
    }
}

impl Default for Bpe {
    fn default() -> Self {
        Self {
            vocab: Vocab::default(),
            merges: MergeTable::default(),
            merge_map: MergeMap::default(),
            cache: WordCache::new(DEFAULT_CACHE_CAPACITY),
            dropout: None,
            unk_token: None,
            unk_id: None,
            continuing_subword_prefix: None,
            end_of_word_suffix: None,
            fuse_unk: false,
            byte_fallback: false,
            ignore_merges: false,
        }
    }
}

impl Clone for Bpe {
    fn clone(&self) -> Self {
        // Caches are not shared between clones.
        Self {
            vocab: self.vocab.clone(),
            merges: self.merges.clone(),
            merge_map: self.merge_map.clone(),
            cache: self.cache.fresh(),
            dropout: self.dropout,
            unk_token: self.unk_token.clone(),
            unk_id: self.unk_id,
            continuing_subword_prefix: self.continuing_subword_prefix.clone(),
            end_of_word_suffix: self.end_of_word_suffix.clone(),
            fuse_unk: self.fuse_unk,
            byte_fallback: self.byte_fallback,
            ignore_merges: self.ignore_merges,
        }
    }
}

impl std::fmt::Debug for Bpe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bpe")
            .field("vocab_size", &self.vocab.len())
            .field("merges", &self.merges.len())
            .field("config", &self.config())
            .finish()
    }
}

impl Model for Bpe {
    type Trainer = BpeTrainer;

    fn tokenize(&self, sequence: &str) -> Result<Vec<Token>, TokenizerError> {
        if sequence.is_empty() {
            return Ok(Vec::new());
        }

        // Fast path: the whole word is a known token
        if self.ignore_merges {
            if let Some(id) = self.vocab.token_to_id(sequence) {
                return Ok(vec![Token::new(
                    id,
                    sequence.to_owned(),
                    (0, sequence.len()),
                )]);
            }
        }

        let word = self.tokenize_word(sequence)?;
        Ok(self.word_to_tokens(&word))
    }

    fn token_to_id(&self, token: &str) -> Option<u32> {
        self.vocab.token_to_id(token)
    }

    fn id_to_token(&self, id: u32) -> Option<&str> {
        self.vocab.id_to_token(id)
    }

    fn get_vocab(&self) -> FxHashMap<String, u32> {
        self.vocab.as_map().clone()
    }

    fn get_vocab_size(&self) -> usize {
        self.vocab.len()
    }

    fn save(&self, folder: &Path, prefix: Option<&str>) -> Result<Vec<PathBuf>, TokenizerError> {
        let file_name = |name: &str| match prefix {
            Some(prefix) => format!("{prefix}-{name}"),
            None => name.to_owned(),
        };

        let vocab_path = folder.join(file_name("vocab.json"));
        fs::write(&vocab_path, self.vocab.to_json()?)?;

        let merges_path = folder.join(file_name("merges.txt"));
        fs::write(&merges_path, self.merges.to_text())?;

        Ok(vec![vocab_path, merges_path])
    }

    fn get_trainer(&self) -> BpeTrainer {
        let mut builder = BpeTrainer::builder();
        if let Some(prefix) = &self.continuing_subword_prefix {
            builder = builder.continuing_subword_prefix(prefix.clone());
        }
        if let Some(suffix) = &self.end_of_word_suffix {
            builder = builder.end_of_word_suffix(suffix.clone());
        }
        builder.build()
    }
}
