//! Symbol sequence for a single word, reduced by ranked merges.
//!
//! Symbols live in a `Vec` and are linked by index (`prev`/`next`), so a
//! merge only touches the two merged symbols and their neighbours. Merged
//! away symbols are marked with `len == 0` and dropped once merging stops.
//! Candidate merges wait in a min-heap ordered by rank, then position, which
//! always applies the earliest-learned merge available anywhere in the word.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use rand::Rng;
use rustc_hash::FxHashMap;

/// Pair of adjacent symbol ids.
pub(crate) type Pair = (u32, u32);

/// Merge lookup: pair → (rank, merged id).
pub(crate) type MergeMap = FxHashMap<Pair, (u32, u32)>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Symbol {
    pub(crate) id: u32,
    prev: Option<usize>,
    next: Option<usize>,
    /// Byte length of the input covered by this symbol.
    pub(crate) len: usize,
}

#[derive(Debug, PartialEq, Eq)]
struct Merge {
    pos: usize,
    rank: u32,
    new_id: u32,
}

impl PartialOrd for Merge {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Merge {
    // BinaryHeap is a max-heap: invert so the lowest rank, then the
    // leftmost position, comes out first.
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .rank
            .cmp(&self.rank)
            .then_with(|| other.pos.cmp(&self.pos))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct Word {
    symbols: Vec<Symbol>,
}

impl Word {
    pub(crate) fn with_capacity(capacity: usize) -> Self {
        Self {
            symbols: Vec::with_capacity(capacity),
        }
    }

    /// Append a symbol covering `len` bytes.
    pub(crate) fn add(&mut self, id: u32, len: usize) {
        let pos = self.symbols.len();
        if let Some(last) = self.symbols.last_mut() {
            last.next = Some(pos);
        }
        self.symbols.push(Symbol {
            id,
            prev: pos.checked_sub(1),
            next: None,
            len,
        });
    }

    /// Apply merges until no adjacent pair has a rule.
    ///
    /// With `dropout`, every popped merge is skipped with that probability;
    /// skipped merges become eligible again after the next applied merge.
    pub(crate) fn merge_all(&mut self, merges: &MergeMap, dropout: Option<f32>) {
        let mut queue = BinaryHeap::with_capacity(self.symbols.len());
        let mut skipped = Vec::new();

        for (pos, window) in self.symbols.windows(2).enumerate() {
            if let Some(&(rank, new_id)) = merges.get(&(window[0].id, window[1].id)) {
                queue.push(Merge { pos, rank, new_id });
            }
        }

        let mut rng = dropout.map(|_| rand::thread_rng());

        while let Some(top) = queue.pop() {
            if let (Some(p), Some(rng)) = (dropout, rng.as_mut()) {
                if rng.gen::<f32>() < p {
                    skipped.push(top);
                    continue;
                }
            }
            queue.extend(skipped.drain(..));

            let current = self.symbols[top.pos];
            if current.len == 0 {
                continue;
            }
            let Some(next_pos) = current.next else {
                continue;
            };
            let right = self.symbols[next_pos];

            // Stale entry: one side was merged into something else since.
            match merges.get(&(current.id, right.id)) {
                Some(&(_, new_id)) if new_id == top.new_id => {}
                _ => continue,
            }

            {
                let merged = &mut self.symbols[top.pos];
                merged.id = top.new_id;
                merged.len += right.len;
                merged.next = right.next;
            }
            self.symbols[next_pos].len = 0;
            if let Some(after) = right.next {
                self.symbols[after].prev = Some(top.pos);
            }

            let merged = self.symbols[top.pos];
            if let Some(prev) = merged.prev {
                let pair = (self.symbols[prev].id, merged.id);
                if let Some(&(rank, new_id)) = merges.get(&pair) {
                    queue.push(Merge {
                        pos: prev,
                        rank,
                        new_id,
                    });
                }
            }
            if let Some(next) = merged.next {
                let pair = (merged.id, self.symbols[next].id);
                if let Some(&(rank, new_id)) = merges.get(&pair) {
                    queue.push(Merge {
                        pos: top.pos,
                        rank,
                        new_id,
                    });
                }
            }
        }

        self.symbols.retain(|s| s.len != 0);
    }

    /// Iterate `(id, (start, end))` with byte offsets relative to the word.
    pub(crate) fn offsets(&self) -> impl Iterator<Item = (u32, (usize, usize))> + '_ {
        let mut start = 0;
        self.symbols.iter().map(move |s| {
            let span = (start, start + s.len);
            start += s.len;
            (s.id, span)
        })
    }

    pub(crate) fn ids(&self) -> Vec<u32> {
        self.symbols.iter().map(|s| s.id).collect()
    }
}
