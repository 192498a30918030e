//! Core tokenization engine for tokenweave.
//!
//! # Architecture
//!
//! Leaves first:
//!
//! - [`vocab`]: token ↔ id vocabulary and ranked merge table, with file I/O
//! - [`Bpe`]: the BPE model; per-word merge resolution with an LRU cache
//! - [`AddedVocabulary`]: added/special tokens matched with Aho-Corasick
//! - [`Normalizer`] and [`PreTokenizer`]: text preparation with offset tracking
//! - [`BpeTrainer`]: learns a vocabulary and merges from a corpus
//! - [`Tokenizer`]: the pipeline producing an [`Encoding`]
//!
//! [`Model`] and [`Trainer`] are the seams between the pipeline and the
//! BPE implementation.

mod added_vocabulary;
mod bpe;
mod cache;
mod encoding;
mod model;
mod normalizer;
mod pre_tokenizer;
mod progress;
mod tokenizer;
mod trainer;
pub mod vocab;
mod word;

pub use added_vocabulary::{AddedToken, AddedVocabulary, Segment};
pub use bpe::{Bpe, BpeBuilder, BpeConfig, BpeError};
pub use cache::DEFAULT_CACHE_CAPACITY;
pub use encoding::Encoding;
pub use model::{Model, Token, Trainer};
pub use normalizer::{NormalizedString, Normalizer};
pub use pre_tokenizer::{PreTokenizer, WHITESPACE_PATTERN};
pub use progress::{IndicatifProgress, NoProgress, ProgressObserver};
pub use tokenizer::{PostProcessor, Tokenizer, TokenizerError};
pub use trainer::{
    BpeTrainer, BpeTrainerBuilder, BpeTrainerConfig, StopHandle, StopReason, TrainingReport,
    DEFAULT_VOCAB_SIZE,
};
pub use vocab::{read_files, MergeTable, Vocab, VocabError, MERGES_HEADER};
