//! tokenweave - BPE subword tokenization and training
//!
//! - Ranked-merge BPE encoding with dropout, unknown-token fusing and byte fallback
//! - LRU cache for repeated words
//! - Aho-Corasick matching of added and special tokens with strip/boundary rules
//! - Normalization with offsets kept in input coordinates
//! - Rayon parallelism for batch encoding and corpus counting
//! - Deterministic BPE training with progress reporting and cooperative stop
//!
//! ```no_run
//! use tokenweave::{AddedToken, Bpe, BpeTrainer, Tokenizer};
//!
//! # fn main() -> Result<(), tokenweave::TokenizerError> {
//! let mut tokenizer = Tokenizer::new(Bpe::builder().unk_token("[UNK]").build()?);
//! let mut trainer = BpeTrainer::builder()
//!     .vocab_size(1000)
//!     .special_tokens(vec!["[UNK]", "[CLS]", "[SEP]"])
//!     .build();
//! tokenizer.train(&mut trainer, ["some text", "more text"].iter())?;
//! tokenizer.add_tokens(&[AddedToken::from("<mark>", false)])?;
//!
//! let encoding = tokenizer.encode("some more text", false)?;
//! println!("{:?}", encoding.get_tokens());
//! # Ok(())
//! # }
//! ```

pub mod core;

pub use core::{
    read_files, AddedToken, AddedVocabulary, Bpe, BpeBuilder, BpeConfig, BpeError, BpeTrainer,
    BpeTrainerBuilder, BpeTrainerConfig, Encoding, IndicatifProgress, MergeTable, Model,
    NoProgress, NormalizedString, Normalizer, PostProcessor, PreTokenizer, ProgressObserver,
    Segment, StopHandle, StopReason, Token, Tokenizer, TokenizerError, Trainer, TrainingReport,
    Vocab, VocabError,
};
