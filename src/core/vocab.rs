//! Vocabulary and merge-table loading for BPE models.
//!
//! A BPE model is described by two artifacts:
//! - A vocabulary: a JSON object mapping every token string to a dense id
//!   in `0..len`
//! - A merges listing: one rule per line, two whitespace-separated symbols,
//!   where the line order defines the rank (lower rank = learned earlier)
//!
//! # Example Format
//!
//! ```text
//! vocab.json   {"a":0,"b":1,"c":2,"ab":3,"abc":4}
//!
//! merges.txt   #version: 0.2
//!              a b
//!              ab c
//! ```
//!
//! The optional `#version` header on the first line of a merges listing is
//! kept verbatim so that loading and re-serializing reproduces the input.

use std::fs;
use std::path::Path;

use rustc_hash::FxHashMap;
use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};
use thiserror::Error;

/// Header written at the top of a merges listing.
pub const MERGES_HEADER: &str = "#version: 0.2";

const MERGES_HEADER_PREFIX: &str = "#version";

/// Errors that can occur when loading vocabulary or merges sources.
#[derive(Error, Debug)]
pub enum VocabError {
    #[error("Invalid vocabulary JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Invalid merges line {line}: expected two symbols, found {content:?}")]
    BadMerges { line: usize, content: String },
    #[error("Duplicate id {id} shared by {first:?} and {second:?}")]
    DuplicateId {
        id: u32,
        first: String,
        second: String,
    },
    #[error("Vocabulary ids are not contiguous: {token:?} has id {id}, expected {expected}")]
    NotContiguous {
        token: String,
        id: u32,
        expected: u32,
    },
}

/// Bijection between token strings and dense ids.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Vocab {
    token_to_id: FxHashMap<String, u32>,
    id_to_token: Vec<String>,
}

impl Vocab {
    /// Create an empty vocabulary.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a vocabulary from a token → id mapping.
    ///
    /// The ids must cover `0..map.len()` exactly once.
    pub fn from_map(map: FxHashMap<String, u32>) -> Result<Self, VocabError> {
        let mut entries: Vec<(u32, &String)> = map.iter().map(|(t, &id)| (id, t)).collect();
        entries.sort_unstable();

        for pair in entries.windows(2) {
            if pair[0].0 == pair[1].0 {
                return Err(VocabError::DuplicateId {
                    id: pair[0].0,
                    first: pair[0].1.clone(),
                    second: pair[1].1.clone(),
                });
            }
        }

        let mut id_to_token = Vec::with_capacity(entries.len());
        for (expected, (id, token)) in entries.into_iter().enumerate() {
            if id as usize != expected {
                return Err(VocabError::NotContiguous {
                    token: token.clone(),
                    id,
                    expected: expected as u32,
                });
            }
            id_to_token.push(token.clone());
        }

        Ok(Self {
            token_to_id: map,
            id_to_token,
        })
    }

    /// Parse a vocabulary from its JSON representation.
    pub fn from_json(json: &str) -> Result<Self, VocabError> {
        let map: FxHashMap<String, u32> = serde_json::from_str(json)?;
        Self::from_map(map)
    }

    /// Load a vocabulary from a JSON file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, VocabError> {
        let data = fs::read_to_string(path)?;
        Self::from_json(&data)
    }

    /// Serialize to compact JSON with entries ordered by id.
    pub fn to_json(&self) -> Result<String, VocabError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Append a token, returning its id. An existing token keeps its id.
    pub(crate) fn push(&mut self, token: &str) -> u32 {
        if let Some(&id) = self.token_to_id.get(token) {
            return id;
        }
        let id = self.id_to_token.len() as u32;
        self.id_to_token.push(token.to_owned());
        self.token_to_id.insert(token.to_owned(), id);
        id
    }

    #[inline]
    pub fn token_to_id(&self, token: &str) -> Option<u32> {
        self.token_to_id.get(token).copied()
    }

    #[inline]
    pub fn id_to_token(&self, id: u32) -> Option<&str> {
        self.id_to_token.get(id as usize).map(String::as_str)
    }

    pub fn contains(&self, token: &str) -> bool {
        self.token_to_id.contains_key(token)
    }

    pub fn len(&self) -> usize {
        self.id_to_token.len()
    }

    pub fn is_empty(&self) -> bool {
        self.id_to_token.is_empty()
    }

    /// Iterate `(id, token)` in id order.
    pub fn iter(&self) -> impl Iterator<Item = (u32, &str)> + '_ {
        self.id_to_token
            .iter()
            .enumerate()
            .map(|(id, token)| (id as u32, token.as_str()))
    }

    /// The token → id mapping.
    pub fn as_map(&self) -> &FxHashMap<String, u32> {
        &self.token_to_id
    }
}

/// Ids are assigned in iteration order; a repeated token keeps its first id.
impl<S: AsRef<str>> FromIterator<S> for Vocab {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        let mut vocab = Vocab::new();
        for token in iter {
            vocab.push(token.as_ref());
        }
        vocab
    }
}

impl Serialize for Vocab {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.id_to_token.len()))?;
        for (id, token) in self.iter() {
            map.serialize_entry(token, &id)?;
        }
        map.end()
    }
}

/// Ordered list of merge rules. A rule's rank is its position in the list.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergeTable {
    header: Option<String>,
    merges: Vec<(String, String)>,
    /// left symbol -> right symbol -> rank
    ranks: FxHashMap<String, FxHashMap<String, u32>>,
}

impl MergeTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a table from rules already in rank order.
    pub fn from_pairs<I>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let mut table = Self::new();
        for (left, right) in pairs {
            table.push(left, right);
        }
        table
    }

    /// Parse a merges listing.
    ///
    /// Blank lines are ignored. Any other line must contain exactly two
    /// whitespace-separated symbols; line numbers in errors are 1-based.
    pub fn parse(text: &str) -> Result<Self, VocabError> {
        let mut table = Self::new();

        for (idx, line) in text.lines().enumerate() {
            if idx == 0 && line.starts_with(MERGES_HEADER_PREFIX) {
                table.header = Some(line.to_owned());
                continue;
            }
            if line.trim().is_empty() {
                continue;
            }

            let mut parts = line.split_whitespace();
            match (parts.next(), parts.next(), parts.next()) {
                (Some(left), Some(right), None) => table.push(left.to_owned(), right.to_owned()),
                _ => {
                    return Err(VocabError::BadMerges {
                        line: idx + 1,
                        content: line.to_owned(),
                    })
                }
            };
        }

        Ok(table)
    }

    /// Load a merges listing from a file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, VocabError> {
        let data = fs::read_to_string(path)?;
        Self::parse(&data)
    }

    /// Render the listing, one rule per line, each line newline-terminated.
    pub fn to_text(&self) -> String {
        let mut out = String::new();
        if let Some(header) = &self.header {
            out.push_str(header);
            out.push('\n');
        }
        for (left, right) in &self.merges {
            out.push_str(left);
            out.push(' ');
            out.push_str(right);
            out.push('\n');
        }
        out
    }

    /// Append a rule with the next rank. A repeated rule keeps its first rank.
    pub(crate) fn push(&mut self, left: String, right: String) -> u32 {
        let rank = self.merges.len() as u32;
        self.ranks
            .entry(left.clone())
            .or_default()
            .entry(right.clone())
            .or_insert(rank);
        self.merges.push((left, right));
        rank
    }

    pub(crate) fn set_header(&mut self, header: Option<String>) {
        self.header = header;
    }

    pub fn header(&self) -> Option<&str> {
        self.header.as_deref()
    }

    /// Rank of the rule `left right`, if present.
    pub fn rank(&self, left: &str, right: &str) -> Option<u32> {
        self.ranks.get(left)?.get(right).copied()
    }

    /// Iterate rules in rank order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> + '_ {
        self.merges
            .iter()
            .map(|(left, right)| (left.as_str(), right.as_str()))
    }

    pub fn len(&self) -> usize {
        self.merges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.merges.is_empty()
    }
}

/// Load a vocabulary file and a merges file.
pub fn read_files<P, Q>(vocab_path: P, merges_path: Q) -> Result<(Vocab, MergeTable), VocabError>
where
    P: AsRef<Path>,
    Q: AsRef<Path>,
{
    let vocab = Vocab::from_file(vocab_path)?;
    let merges = MergeTable::from_file(merges_path)?;
    Ok((vocab, merges))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_vocab_json() {
        let vocab = Vocab::from_json(r#"{"a":0,"b":1,"ab":2}"#).unwrap();

        assert_eq!(vocab.len(), 3);
        assert_eq!(vocab.token_to_id("ab"), Some(2));
        assert_eq!(vocab.id_to_token(1), Some("b"));
        assert_eq!(vocab.token_to_id("zz"), None);
        assert_eq!(vocab.id_to_token(3), None);
    }

    #[test]
    fn test_duplicate_id_rejected() {
        let err = Vocab::from_json(r#"{"a":0,"b":0}"#).unwrap_err();
        assert!(matches!(err, VocabError::DuplicateId { id: 0, .. }));
    }

    #[test]
    fn test_gap_in_ids_rejected() {
        let err = Vocab::from_json(r#"{"a":0,"b":2}"#).unwrap_err();
        assert!(matches!(
            err,
            VocabError::NotContiguous {
                id: 2,
                expected: 1,
                ..
            }
        ));
    }

    #[test]
    fn test_malformed_json_rejected() {
        assert!(matches!(
            Vocab::from_json(r#"{"a":-1}"#),
            Err(VocabError::Json(_))
        ));
    }

    #[test]
    fn test_vocab_json_ordered_by_id() {
        let mut vocab = Vocab::new();
        vocab.push("z");
        vocab.push("a");
        vocab.push("\"q\"");
        assert_eq!(vocab.to_json().unwrap(), r#"{"z":0,"a":1,"\"q\"":2}"#);
    }

    #[test]
    fn test_push_keeps_existing_id() {
        let mut vocab = Vocab::new();
        assert_eq!(vocab.push("a"), 0);
        assert_eq!(vocab.push("b"), 1);
        assert_eq!(vocab.push("a"), 0);
        assert_eq!(vocab.len(), 2);

        let collected: Vocab = ["x", "y", "x"].into_iter().collect();
        assert_eq!(collected.len(), 2);
        assert_eq!(collected.token_to_id("y"), Some(1));
    }

    #[test]
    fn test_parse_merges() {
        let merges = MergeTable::parse("#version: 0.2\na b\nab c\n").unwrap();

        assert_eq!(merges.len(), 2);
        assert_eq!(merges.header(), Some("#version: 0.2"));
        assert_eq!(merges.rank("a", "b"), Some(0));
        assert_eq!(merges.rank("ab", "c"), Some(1));
        assert_eq!(merges.rank("b", "c"), None);
    }

    #[test]
    fn test_bad_merges_line_reported() {
        let err = MergeTable::parse("a b\nabc\n").unwrap_err();
        match err {
            VocabError::BadMerges { line, content } => {
                assert_eq!(line, 2);
                assert_eq!(content, "abc");
            }
            other => panic!("unexpected error: {other}"),
        }

        assert!(MergeTable::parse("a b c\n").is_err());
    }

    #[test]
    fn test_merges_roundtrip() {
        let text = "#version: 0.2\nh e\nl l\nhe ll\n";
        assert_eq!(MergeTable::parse(text).unwrap().to_text(), text);

        let bare = "a b\n";
        assert_eq!(MergeTable::parse(bare).unwrap().to_text(), bare);
    }

    #[test]
    fn test_repeated_merge_keeps_first_rank() {
        let merges = MergeTable::parse("a b\nc d\na b\n").unwrap();
        assert_eq!(merges.len(), 3);
        assert_eq!(merges.rank("a", "b"), Some(0));
    }

    #[test]
    fn test_rank_with_shared_left_symbol() {
        let merges = MergeTable::parse("a b\na c\nb c\n").unwrap();
        assert_eq!(merges.rank("a", "b"), Some(0));
        assert_eq!(merges.rank("a", "c"), Some(1));
        assert_eq!(merges.rank("a", "d"), None);
        assert_eq!(merges.rank("c", "a"), None);
    }
}
