//! Model and trainer capabilities.
//!
//! A [`Model`] turns one pre-tokenized word into vocabulary tokens; a
//! [`Trainer`] learns a model from word counts. BPE is the implemented
//! variant ([`crate::Bpe`], [`crate::BpeTrainer`]); the pipeline in
//! [`crate::Tokenizer`] only depends on these traits.

use std::path::{Path, PathBuf};

use rustc_hash::FxHashMap;

use super::added_vocabulary::AddedToken;
use super::tokenizer::TokenizerError;

/// A single model output token. Offsets are byte offsets into the word
/// that was passed to [`Model::tokenize`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub id: u32,
    pub value: String,
    pub offsets: (usize, usize),
}

impl Token {
    pub fn new(id: u32, value: String, offsets: (usize, usize)) -> Self {
        Self { id, value, offsets }
    }
}

pub trait Model: Send + Sync {
    type Trainer: Trainer<Model = Self> + Sync;

    /// Tokenize one word.
    fn tokenize(&self, sequence: &str) -> Result<Vec<Token>, TokenizerError>;

    fn token_to_id(&self, token: &str) -> Option<u32>;

    fn id_to_token(&self, id: u32) -> Option<&str>;

    fn get_vocab(&self) -> FxHashMap<String, u32>;

    fn get_vocab_size(&self) -> usize;

    /// Write the model files into `folder`, returning the written paths.
    fn save(&self, folder: &Path, prefix: Option<&str>) -> Result<Vec<PathBuf>, TokenizerError>;

    /// A trainer configured to produce a model like this one.
    fn get_trainer(&self) -> Self::Trainer;
}

pub trait Trainer {
    type Model: Model + Sized;

    fn should_show_progress(&self) -> bool;

    /// Learn a new model from the fed words, replacing `model`.
    ///
    /// Returns the special tokens the caller should register as added tokens.
    fn train(&self, model: &mut Self::Model) -> Result<Vec<AddedToken>, TokenizerError>;

    /// Accumulate words from `iterator`, using `process` to split each
    /// sequence into words.
    fn feed<I, S, F>(&mut self, iterator: I, process: F) -> Result<(), TokenizerError>
    where
        I: Iterator<Item = S> + Send,
        S: AsRef<str> + Send,
        F: Fn(&str) -> Result<Vec<String>, TokenizerError> + Sync;
}
