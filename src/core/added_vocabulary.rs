//! Added and special tokens, matched in text ahead of the model.
//!
//! Tokens are compiled into two Aho-Corasick automatons: one over the raw
//! input for tokens with `normalized == false`, one over normalized text for
//! the others. Both use leftmost-longest semantics, so on overlap the match
//! starting first wins, then the longest one.

use aho_corasick::{AhoCorasick, MatchKind};
use rustc_hash::{FxHashMap, FxHashSet};
use serde::{Deserialize, Serialize};

use super::model::Model;
use super::tokenizer::TokenizerError;

/// A token matched directly in the input, bypassing the model.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "AddedTokenRepr")]
pub struct AddedToken {
    pub content: String,
    /// Only match when not inside a run of alphanumeric characters.
    pub single_word: bool,
    /// Absorb whitespace on the left of a match.
    pub lstrip: bool,
    /// Absorb whitespace on the right of a match.
    pub rstrip: bool,
    /// Match against normalized text instead of the raw input.
    pub normalized: bool,
    pub special: bool,
}

impl AddedToken {
    /// Special tokens match the raw input by default, others normalized text.
    pub fn from(content: impl Into<String>, special: bool) -> Self {
        Self {
            content: content.into(),
            single_word: false,
            lstrip: false,
            rstrip: false,
            normalized: !special,
            special,
        }
    }

    pub fn single_word(mut self, single_word: bool) -> Self {
        self.single_word = single_word;
        self
    }

    pub fn lstrip(mut self, lstrip: bool) -> Self {
        self.lstrip = lstrip;
        self
    }

    pub fn rstrip(mut self, rstrip: bool) -> Self {
        self.rstrip = rstrip;
        self
    }

    pub fn normalized(mut self, normalized: bool) -> Self {
        self.normalized = normalized;
        self
    }

    pub fn special(mut self, special: bool) -> Self {
        self.special = special;
        self
    }
}

impl From<&str> for AddedToken {
    fn from(content: &str) -> Self {
        AddedToken::from(content, false)
    }
}

impl From<String> for AddedToken {
    fn from(content: String) -> Self {
        AddedToken::from(content, false)
    }
}

/// Accepted forms: a bare content string or a full object.
#[derive(Deserialize)]
#[serde(untagged)]
enum AddedTokenRepr {
    Content(String),
    Full {
        content: String,
        #[serde(default)]
        single_word: bool,
        #[serde(default)]
        lstrip: bool,
        #[serde(default)]
        rstrip: bool,
        #[serde(default)]
        normalized: Option<bool>,
        #[serde(default)]
        special: bool,
    },
}

impl From<AddedTokenRepr> for AddedToken {
    fn from(repr: AddedTokenRepr) -> Self {
        match repr {
            AddedTokenRepr::Content(content) => AddedToken::from(content, false),
            AddedTokenRepr::Full {
                content,
                single_word,
                lstrip,
                rstrip,
                normalized,
                special,
            } => AddedToken {
                normalized: normalized.unwrap_or(!special),
                content,
                single_word,
                lstrip,
                rstrip,
                special,
            },
        }
    }
}

/// A piece of input produced by splitting on added tokens. Spans are byte
/// ranges into the text that was split.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Segment {
    Matched { id: u32, span: (usize, usize) },
    Literal((usize, usize)),
}

/// Compiled matcher plus the `(id, token)` behind each pattern index.
#[derive(Debug, Clone, Default)]
struct Matcher {
    automaton: Option<AhoCorasick>,
    tokens: Vec<(u32, AddedToken)>,
}

impl Matcher {
    fn build(tokens: Vec<(u32, AddedToken)>) -> Result<Self, TokenizerError> {
        if tokens.is_empty() {
            return Ok(Self::default());
        }
        let automaton = AhoCorasick::builder()
            .match_kind(MatchKind::LeftmostLongest)
            .build(tokens.iter().map(|(_, t)| t.content.as_str()))?;
        Ok(Self {
            automaton: Some(automaton),
            tokens,
        })
    }

    /// Accepted matches as `(id, span)`, after boundary and strip rules.
    fn find(&self, text: &str) -> Vec<(u32, (usize, usize))> {
        let Some(automaton) = &self.automaton else {
            return Vec::new();
        };

        let mut found = Vec::new();
        let mut last_end = 0;
        for mat in automaton.find_iter(text) {
            let (id, token) = &self.tokens[mat.pattern().as_usize()];
            let (mut start, mut end) = (mat.start(), mat.end());
            if start < last_end {
                continue;
            }

            if token.single_word && !on_word_boundaries(text, start, end) {
                continue;
            }
            if token.lstrip {
                start = last_end + text[last_end..start].trim_end().len();
            }
            if token.rstrip {
                end = text.len() - text[end..].trim_start().len();
            }

            last_end = end;
            found.push((*id, (start, end)));
        }
        found
    }
}

/// The characters just outside a match must not be alphanumeric.
fn on_word_boundaries(text: &str, start: usize, end: usize) -> bool {
    let before = text[..start].chars().next_back();
    let after = text[end..].chars().next();
    !before.is_some_and(char::is_alphanumeric) && !after.is_some_and(char::is_alphanumeric)
}

/// Tokens added on top of a model's vocabulary.
///
/// A content already in the model vocabulary keeps the model id; others get
/// ids after the model's last id, in insertion order.
#[derive(Debug, Clone, Default)]
pub struct AddedVocabulary {
    added_tokens: Vec<AddedToken>,
    token_to_id: FxHashMap<String, u32>,
    id_to_token: FxHashMap<u32, AddedToken>,
    special_tokens: FxHashSet<String>,
    raw_matcher: Matcher,
    normalized_matcher: Matcher,
}

impl AddedVocabulary {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add tokens, returning how many were new. Empty or already added
    /// contents are ignored.
    pub fn add_tokens<M: Model>(
        &mut self,
        tokens: &[AddedToken],
        model: &M,
    ) -> Result<usize, TokenizerError> {
        let mut added = 0;
        for token in tokens {
            if token.content.is_empty() || self.token_to_id.contains_key(&token.content) {
                continue;
            }
            // Reserve the content so repeats within `tokens` are skipped too.
            self.token_to_id.insert(token.content.clone(), u32::MAX);
            self.added_tokens.push(token.clone());
            added += 1;
        }
        if added > 0 {
            self.refresh(model)?;
        }
        Ok(added)
    }

    /// Resolve ids against `model` and recompile the matchers. Needed after
    /// the model changes, e.g. when it was retrained.
    pub fn refresh<M: Model>(&mut self, model: &M) -> Result<(), TokenizerError> {
        let mut next_id = model.get_vocab_size() as u32;
        self.token_to_id.clear();
        self.id_to_token.clear();

        let mut raw = Vec::new();
        let mut normalized = Vec::new();
        for token in &self.added_tokens {
            let id = model.token_to_id(&token.content).unwrap_or_else(|| {
                let id = next_id;
                next_id += 1;
                id
            });
            self.token_to_id.insert(token.content.clone(), id);
            self.id_to_token.insert(id, token.clone());
            if token.normalized {
                normalized.push((id, token.clone()));
            } else {
                raw.push((id, token.clone()));
            }
        }

        self.special_tokens = self
            .added_tokens
            .iter()
            .filter(|t| t.special)
            .map(|t| t.content.clone())
            .collect();
        self.raw_matcher = Matcher::build(raw)?;
        self.normalized_matcher = Matcher::build(normalized)?;
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.added_tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.added_tokens.is_empty()
    }

    /// Added tokens in insertion order.
    pub fn tokens(&self) -> &[AddedToken] {
        &self.added_tokens
    }

    pub fn token_to_id(&self, content: &str) -> Option<u32> {
        self.token_to_id.get(content).copied()
    }

    pub fn id_to_token(&self, id: u32) -> Option<&AddedToken> {
        self.id_to_token.get(&id)
    }

    pub fn is_special_token(&self, content: &str) -> bool {
        self.special_tokens.contains(content)
    }

    /// content → id for every added token.
    pub fn get_vocab(&self) -> &FxHashMap<String, u32> {
        &self.token_to_id
    }

    /// Split `text` on the tokens matching raw input (`normalized == false`)
    /// or normalized text (`normalized == true`).
    pub fn split(&self, text: &str, normalized: bool) -> Vec<Segment> {
        let matcher = if normalized {
            &self.normalized_matcher
        } else {
            &self.raw_matcher
        };

        let mut segments = Vec::new();
        let mut cursor = 0;
        for (id, (start, end)) in matcher.find(text) {
            if cursor < start {
                segments.push(Segment::Literal((cursor, start)));
            }
            segments.push(Segment::Matched {
                id,
                span: (start, end),
            });
            cursor = end;
        }
        if cursor < text.len() {
            segments.push(Segment::Literal((cursor, text.len())));
        }
        segments
    }
}
