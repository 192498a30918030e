//! BPE training.
//!
//! Words are counted once, mapped to symbol ids, and merged in place. Pair
//! counts and the words containing each pair are kept globally; the heap
//! holds candidate pairs whose counts may be stale and are re-checked when
//! popped. Only words containing the merged pair are rewritten per step.
//!
//! Equal counts are broken by the lexicographic order of the pair's symbol
//! strings, smallest first, so training is deterministic for a given corpus.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::sync::{Arc, Mutex};

use log::{debug, info, warn};
use rayon::prelude::*;
use rustc_hash::{FxHashMap, FxHashSet};
use serde::{Deserialize, Serialize};

use super::added_vocabulary::AddedToken;
use super::bpe::{merged_symbol, Bpe};
use super::model::Trainer;
use super::pre_tokenizer::PreTokenizer;
use super::progress::{IndicatifProgress, NoProgress, ProgressObserver};
use super::tokenizer::TokenizerError;
use super::vocab::{MergeTable, Vocab, MERGES_HEADER};
use super::word::Pair;

/// Default target vocabulary size.
pub const DEFAULT_VOCAB_SIZE: usize = 30_000;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BpeTrainerConfig {
    pub vocab_size: usize,
    /// Pairs seen fewer times are never merged.
    pub min_frequency: u64,
    /// Reserved at the start of the vocabulary, in order.
    pub special_tokens: Vec<AddedToken>,
    /// Maximum number of corpus characters kept, on top of `initial_alphabet`.
    pub limit_alphabet: Option<usize>,
    /// Characters kept in the alphabet even if absent from the corpus.
    pub initial_alphabet: Vec<char>,
    pub continuing_subword_prefix: Option<String>,
    pub end_of_word_suffix: Option<String>,
    pub show_progress: bool,
}

impl Default for BpeTrainerConfig {
    fn default() -> Self {
        Self {
            vocab_size: DEFAULT_VOCAB_SIZE,
            min_frequency: 0,
            special_tokens: Vec::new(),
            limit_alphabet: None,
            initial_alphabet: Vec::new(),
            continuing_subword_prefix: None,
            end_of_word_suffix: None,
            show_progress: true,
        }
    }
}

/// Shared flag asking a running training loop to stop after the current merge.
#[derive(Debug, Clone, Default)]
pub struct StopHandle(Arc<AtomicBool>);

impl StopHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stop(&self) {
        self.0.store(true, AtomicOrdering::Relaxed);
    }

    pub fn is_stopped(&self) -> bool {
        self.0.load(AtomicOrdering::Relaxed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// The vocabulary reached the requested size.
    TargetReached,
    /// No remaining pair met the minimum frequency.
    NoQualifyingPair,
    /// A [`StopHandle`] was triggered.
    Stopped,
}

/// Outcome of a training run. A vocabulary smaller than requested is a
/// normal result, not an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrainingReport {
    pub requested: usize,
    pub vocab_size: usize,
    pub merges: usize,
    pub stop_reason: StopReason,
}

impl TrainingReport {
    pub fn is_shortfall(&self) -> bool {
        self.vocab_size < self.requested
    }
}

#[derive(Default)]
pub struct BpeTrainerBuilder {
    config: BpeTrainerConfig,
    progress: Option<Arc<dyn ProgressObserver>>,
    stop: StopHandle,
}

impl BpeTrainerBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn config(mut self, config: BpeTrainerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn vocab_size(mut self, vocab_size: usize) -> Self {
        self.config.vocab_size = vocab_size;
        self
    }

    pub fn min_frequency(mut self, min_frequency: u64) -> Self {
        self.config.min_frequency = min_frequency;
        self
    }

    pub fn special_tokens<T: Into<AddedToken>>(mut self, tokens: Vec<T>) -> Self {
        self.config.special_tokens = tokens.into_iter().map(Into::into).collect();
        self
    }

    pub fn limit_alphabet(mut self, limit: usize) -> Self {
        self.config.limit_alphabet = Some(limit);
        self
    }

    pub fn initial_alphabet<I: IntoIterator<Item = char>>(mut self, alphabet: I) -> Self {
        self.config.initial_alphabet = alphabet.into_iter().collect();
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

    pub fn show_progress(mut self, show: bool) -> Self {
        self.config.show_progress = show;
        self
    }

    /// Report progress to `observer` instead of a terminal bar.
    pub fn progress(mut self, observer: Arc<dyn ProgressObserver>) -> Self {
        self.progress = Some(observer);
        self
    }

    pub fn stop_handle(mut self, stop: StopHandle) -> Self {
        self.stop = stop;
        self
    }

    pub fn build(self) -> BpeTrainer {
        BpeTrainer {
            config: self.config,
            words: FxHashMap::default(),
            progress: self.progress,
            stop: self.stop,
            last_report: Mutex::new(None),
        }
    }
}

/// Learns a [`Bpe`] model from word counts.
pub struct BpeTrainer {
    config: BpeTrainerConfig,
    words: FxHashMap<String, u64>,
    progress: Option<Arc<dyn ProgressObserver>>,
    stop: StopHandle,
    last_report: Mutex<Option<TrainingReport>>,
}

impl Default for BpeTrainer {
    fn default() -> Self {
        Self::builder().build()
    }
}

/// Candidate merge in the training heap.
#[derive(Debug, PartialEq, Eq)]
struct PairEntry {
    count: u64,
    pair: Pair,
    left: Arc<str>,
    right: Arc<str>,
}

impl PartialOrd for PairEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for PairEntry {
    // Highest count first, then the lexicographically smallest pair.
    fn cmp(&self, other: &Self) -> Ordering {
        self.count.cmp(&other.count).then_with(|| {
            (&other.left, &other.right)
                .cmp(&(&self.left, &self.right))
                .then_with(|| other.pair.cmp(&self.pair))
        })
    }
}

/// Replace every occurrence of `pair` in `ids` with `new_id`, returning
/// the adjacent pair count changes.
fn merge_pair(ids: &mut Vec<u32>, pair: Pair, new_id: u32) -> Vec<(Pair, i64)> {
    let (a, b) = pair;
    let mut changes = Vec::new();
    let mut i = 0;
    while i + 1 < ids.len() {
        if ids[i] != a || ids[i + 1] != b {
            i += 1;
            continue;
        }
        if i > 0 {
            changes.push(((ids[i - 1], a), -1));
            changes.push(((ids[i - 1], new_id), 1));
        }
        ids[i] = new_id;
        ids.remove(i + 1);
        if i + 1 < ids.len() {
            changes.push(((b, ids[i + 1]), -1));
            changes.push(((new_id, ids[i + 1]), 1));
        }
        i += 1;
    }
    changes
}

/// The initial symbols of `word`: its alphabet characters, with `prefix` on
/// all but the first character and `suffix` on the last.
fn base_symbols<'a>(
    word: &'a str,
    alphabet: &'a FxHashSet<char>,
    prefix: Option<&'a str>,
    suffix: Option<&'a str>,
) -> impl Iterator<Item = String> + 'a {
    let last = word.chars().count().saturating_sub(1);
    word.chars()
        .enumerate()
        .filter(move |(_, c)| alphabet.contains(c))
        .map(move |(pos, c)| {
            let mut symbol = String::new();
            if pos > 0 {
                symbol.push_str(prefix.unwrap_or_default());
            }
            symbol.push(c);
            if pos == last {
                symbol.push_str(suffix.unwrap_or_default());
            }
            symbol
        })
}

type PairIndex = (FxHashMap<Pair, i64>, FxHashMap<Pair, FxHashSet<usize>>);

/// Weighted pair counts and, per pair, the words it occurs in.
fn count_pairs(corpus: &[(Vec<u32>, u64)]) -> PairIndex {
    corpus
        .par_iter()
        .enumerate()
        .fold(
            || (FxHashMap::default(), FxHashMap::default()),
            |(mut counts, mut where_to_update): PairIndex, (i, (ids, count))| {
                for window in ids.windows(2) {
                    let pair = (window[0], window[1]);
                    *counts.entry(pair).or_default() += *count as i64;
                    where_to_update
                        .entry(pair)
                        .or_insert_with(FxHashSet::default)
                        .insert(i);
                }
                (counts, where_to_update)
            },
        )
        .reduce(
            || (FxHashMap::default(), FxHashMap::default()),
            |(mut counts, mut where_to_update), (c, w)| {
                for (pair, n) in c {
                    *counts.entry(pair).or_default() += n;
                }
                for (pair, words) in w {
                    where_to_update.entry(pair).or_default().extend(words);
                }
                (counts, where_to_update)
            },
        )
}

impl BpeTrainer {
    pub fn builder() -> BpeTrainerBuilder {
        BpeTrainerBuilder::new()
    }

    pub fn new(config: BpeTrainerConfig) -> Self {
        Self::builder().config(config).build()
    }

    pub fn config(&self) -> &BpeTrainerConfig {
        &self.config
    }

    /// Handle that stops this trainer's next or running training.
    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    /// Report of the most recent training run.
    pub fn last_report(&self) -> Option<TrainingReport> {
        self.last_report.lock().ok().and_then(|r| r.clone())
    }

    /// Number of distinct words fed so far.
    pub fn word_count(&self) -> usize {
        self.words.len()
    }

    /// Train a fresh model from raw sequences split by the baseline
    /// whitespace pre-tokenizer.
    pub fn train_from_iterator<I, S>(
        &mut self,
        sequences: I,
    ) -> Result<(Bpe, TrainingReport), TokenizerError>
    where
        I: Iterator<Item = S> + Send,
        S: AsRef<str> + Send,
    {
        let pre_tokenizer = PreTokenizer::Whitespace;
        self.feed(sequences, |s| Ok(pre_tokenizer.words(s)))?;
        let mut model = Bpe::default();
        let report = self.train_model(&mut model)?;
        Ok((model, report))
    }

    fn validate(&self) -> Result<(), TokenizerError> {
        let config = &self.config;
        if config.vocab_size == 0 {
            return Err(TokenizerError::InvalidTrainerConfig(
                "vocab_size must be positive".into(),
            ));
        }
        if config.special_tokens.iter().any(|t| t.content.is_empty()) {
            return Err(TokenizerError::InvalidTrainerConfig(
                "special tokens cannot be empty".into(),
            ));
        }
        if config.special_tokens.len() > config.vocab_size {
            return Err(TokenizerError::InvalidTrainerConfig(format!(
                "vocab_size {} cannot hold {} special tokens",
                config.vocab_size,
                config.special_tokens.len()
            )));
        }
        let reserved = config.special_tokens.len() + self.initial_alphabet().len();
        if reserved > config.vocab_size {
            return Err(TokenizerError::InvalidTrainerConfig(format!(
                "vocab_size {} cannot hold the special tokens and initial alphabet ({reserved} symbols)",
                config.vocab_size
            )));
        }
        Ok(())
    }

    fn observer(&self) -> Arc<dyn ProgressObserver> {
        match &self.progress {
            Some(observer) => Arc::clone(observer),
            None if self.config.show_progress => Arc::new(IndicatifProgress::new()),
            None => Arc::new(NoProgress),
        }
    }

    /// Configured alphabet characters that are not already special tokens.
    fn initial_alphabet(&self) -> FxHashSet<char> {
        self.config
            .initial_alphabet
            .iter()
            .copied()
            .filter(|c| {
                let mut buf = [0; 4];
                let symbol: &str = c.encode_utf8(&mut buf);
                !self.config.special_tokens.iter().any(|t| t.content == symbol)
            })
            .collect()
    }

    /// Characters forming the alphabet: every configured character, then
    /// corpus characters by weighted frequency, at most `limit_alphabet` of
    /// them and no more than fit in `budget`.
    fn compute_alphabet(&self, budget: usize) -> Vec<char> {
        let initial = self.initial_alphabet();
        let mut counts: FxHashMap<char, u64> = FxHashMap::default();
        for (word, &count) in &self.words {
            for c in word.chars().filter(|c| !initial.contains(c)) {
                let entry = counts.entry(c).or_default();
                *entry = entry.saturating_add(count);
            }
        }

        let mut ranked: Vec<(char, u64)> = counts.into_iter().collect();
        ranked.sort_unstable_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));

        let limit = self
            .config
            .limit_alphabet
            .unwrap_or(usize::MAX)
            .min(budget.saturating_sub(initial.len()));
        if ranked.len() > limit {
            debug!("Pruning corpus alphabet from {} to {} characters", ranked.len(), limit);
            ranked.truncate(limit);
        }

        let mut alphabet: Vec<char> = initial
            .into_iter()
            .chain(ranked.into_iter().map(|(c, _)| c))
            .collect();
        alphabet.sort_unstable();
        alphabet
    }

    /// Add the prefixed/suffixed forms of alphabet characters, most frequent
    /// first, while the vocabulary has room.
    fn add_decorated_symbols(
        &self,
        vocab: &mut Vocab,
        words: &[(&String, &u64)],
        alphabet: &FxHashSet<char>,
    ) {
        let prefix = self.config.continuing_subword_prefix.as_deref();
        let suffix = self.config.end_of_word_suffix.as_deref();

        let mut counts: FxHashMap<String, u64> = FxHashMap::default();
        for &(word, &count) in words {
            for symbol in base_symbols(word, alphabet, prefix, suffix) {
                if !vocab.contains(&symbol) {
                    let entry = counts.entry(symbol).or_default();
                    *entry = entry.saturating_add(count);
                }
            }
        }

        let mut ranked: Vec<(String, u64)> = counts.into_iter().collect();
        ranked.sort_unstable_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));

        let room = self.config.vocab_size.saturating_sub(vocab.len());
        if ranked.len() > room {
            debug!(
                "Keeping {} of {} decorated symbols",
                room,
                ranked.len()
            );
            ranked.truncate(room);
        }
        for (symbol, _) in ranked {
            vocab.push(&symbol);
        }
    }

    /// Learn a vocabulary and merges from the fed words and replace `model`
    /// with the result. Options of `model` other than the decorations are kept.
    pub fn train_model(&self, model: &mut Bpe) -> Result<TrainingReport, TokenizerError> {
        self.validate()?;
        let progress = self.observer();
        let config = &self.config;
        let prefix = config.continuing_subword_prefix.as_deref();
        let suffix = config.end_of_word_suffix.as_deref();

        info!("Training BPE on {} distinct words", self.words.len());

        // Special tokens take the first ids
        let mut vocab = Vocab::new();
        for token in &config.special_tokens {
            vocab.push(&token.content);
        }

        let alphabet = self.compute_alphabet(config.vocab_size - vocab.len());
        for c in &alphabet {
            vocab.push(c.encode_utf8(&mut [0; 4]));
        }
        let alphabet: FxHashSet<char> = alphabet.into_iter().collect();
        info!("Alphabet has {} characters", alphabet.len());

        // Words as symbol ids, in a fixed order so ids are reproducible
        let mut sorted: Vec<(&String, &u64)> = self.words.iter().collect();
        sorted.sort_unstable_by(|a, b| a.0.cmp(b.0));

        if prefix.is_some() || suffix.is_some() {
            self.add_decorated_symbols(&mut vocab, &sorted, &alphabet);
        }

        progress.start("Tokenize words", sorted.len() as u64);
        let mut corpus: Vec<(Vec<u32>, u64)> = Vec::with_capacity(sorted.len());
        for (i, &(word, &count)) in sorted.iter().enumerate() {
            // Symbols left out of the vocabulary are skipped like pruned characters
            let ids = base_symbols(word, &alphabet, prefix, suffix)
                .filter_map(|symbol| vocab.token_to_id(&symbol))
                .collect();
            corpus.push((ids, count));
            progress.update(i as u64 + 1);
        }
        progress.finish();

        progress.start("Count pairs", 1);
        let (mut pair_counts, mut where_to_update) = count_pairs(&corpus);
        progress.update(1);
        progress.finish();
        info!("Counted {} distinct pairs", pair_counts.len());

        let mut symbols: Vec<Arc<str>> = vocab.iter().map(|(_, t)| Arc::from(t)).collect();
        let entry = |symbols: &[Arc<str>], pair: Pair, count: u64| PairEntry {
            count,
            pair,
            left: Arc::clone(&symbols[pair.0 as usize]),
            right: Arc::clone(&symbols[pair.1 as usize]),
        };

        let mut queue: BinaryHeap<PairEntry> = pair_counts
            .iter()
            .filter(|&(_, &count)| count > 0)
            .map(|(&pair, &count)| entry(&symbols, pair, count as u64))
            .collect();

        let mut merges = MergeTable::new();
        merges.set_header(Some(MERGES_HEADER.to_owned()));
        let mut merged_pairs: FxHashSet<Pair> = FxHashSet::default();
        let min_frequency = config.min_frequency.max(1);
        let log_step = (config.vocab_size.saturating_sub(vocab.len()) / 10).max(1);

        progress.start("Compute merges", config.vocab_size as u64);
        progress.update(vocab.len() as u64);

        let stop_reason = loop {
            if vocab.len() >= config.vocab_size {
                break StopReason::TargetReached;
            }
            if self.stop.is_stopped() {
                break StopReason::Stopped;
            }
            let Some(top) = queue.pop() else {
                break StopReason::NoQualifyingPair;
            };

            let current = pair_counts.get(&top.pair).copied().unwrap_or(0).max(0) as u64;
            if merged_pairs.contains(&top.pair) || current == 0 {
                continue;
            }
            if current != top.count {
                queue.push(PairEntry {
                    count: current,
                    ..top
                });
                continue;
            }
            if current < min_frequency {
                break StopReason::NoQualifyingPair;
            }

            let merged = merged_symbol(&top.left, &top.right, prefix);
            let new_id = vocab.push(&merged);
            if new_id as usize == symbols.len() {
                symbols.push(Arc::from(merged.as_str()));
            }
            merges.push(top.left.to_string(), top.right.to_string());
            merged_pairs.insert(top.pair);
            pair_counts.remove(&top.pair);

            let mut words: Vec<usize> = where_to_update
                .remove(&top.pair)
                .unwrap_or_default()
                .into_iter()
                .collect();
            words.sort_unstable();

            let mut touched: FxHashSet<Pair> = FxHashSet::default();
            for i in words {
                let (ids, count) = &mut corpus[i];
                for (pair, delta) in merge_pair(ids, top.pair, new_id) {
                    *pair_counts.entry(pair).or_default() += delta * *count as i64;
                    if delta > 0 {
                        where_to_update.entry(pair).or_default().insert(i);
                        touched.insert(pair);
                    }
                }
            }
            for pair in touched {
                let count = pair_counts.get(&pair).copied().unwrap_or(0);
                if count > 0 && !merged_pairs.contains(&pair) {
                    queue.push(entry(&symbols, pair, count as u64));
                }
            }

            progress.update(vocab.len() as u64);
            if merges.len() % log_step == 0 {
                info!(
                    "Merge {}: {:?} + {:?} (count {}), vocabulary at {}/{}",
                    merges.len(),
                    top.left,
                    top.right,
                    top.count,
                    vocab.len(),
                    config.vocab_size
                );
            }
        };
        progress.finish();

        let report = TrainingReport {
            requested: config.vocab_size,
            vocab_size: vocab.len(),
            merges: merges.len(),
            stop_reason,
        };
        if report.is_shortfall() {
            warn!(
                "Training stopped at {} tokens of the requested {} ({:?})",
                report.vocab_size, report.requested, report.stop_reason
            );
        } else {
            info!(
                "Training finished: {} tokens, {} merges",
                report.vocab_size, report.merges
            );
        }

        let mut bpe_config = model.config();
        bpe_config.continuing_subword_prefix = config.continuing_subword_prefix.clone();
        bpe_config.end_of_word_suffix = config.end_of_word_suffix.clone();
        *model = Bpe::builder()
            .vocab_and_merges(vocab, merges)
            .config(bpe_config)
            .build()?;

        if let Ok(mut last) = self.last_report.lock() {
            *last = Some(report.clone());
        }
        Ok(report)
    }
}

impl Trainer for BpeTrainer {
    type Model = Bpe;

    fn should_show_progress(&self) -> bool {
        self.config.show_progress
    }

    fn train(&self, model: &mut Bpe) -> Result<Vec<AddedToken>, TokenizerError> {
        self.train_model(model)?;
        Ok(self
            .config
            .special_tokens
            .iter()
            .map(|t| t.clone().special(true))
            .collect())
    }

    fn feed<I, S, F>(&mut self, iterator: I, process: F) -> Result<(), TokenizerError>
    where
        I: Iterator<Item = S> + Send,
        S: AsRef<str> + Send,
        F: Fn(&str) -> Result<Vec<String>, TokenizerError> + Sync,
    {
        let counts = iterator
            .par_bridge()
            .map(|sequence| {
                let mut counts: FxHashMap<String, u64> = FxHashMap::default();
                for word in process(sequence.as_ref())? {
                    *counts.entry(word).or_default() += 1;
                }
                Ok::<_, TokenizerError>(counts)
            })
            .try_reduce(FxHashMap::default, |mut acc, counts| {
                for (word, n) in counts {
                    *acc.entry(word).or_default() += n;
                }
                Ok(acc)
            })?;

        for (word, n) in counts {
            *self.words.entry(word).or_default() += n;
        }
        Ok(())
    }
}
