//! Word-level encode cache.
//!
//! Keys are the exact word string, values the merged [`Word`]. Once full the
//! least recently used entry is evicted. A capacity of zero disables the
//! cache entirely. Lock failures degrade to a miss, never to an error, so
//! the cache can only change latency.

use std::num::NonZeroUsize;
use std::sync::Mutex;

use lru::LruCache;

use super::word::Word;

/// Default number of cached words.
pub const DEFAULT_CACHE_CAPACITY: usize = 10_000;

/// Words longer than this many bytes are never cached.
pub(crate) const MAX_CACHED_WORD_LEN: usize = 256;

pub(crate) struct WordCache {
    inner: Option<Mutex<LruCache<String, Word>>>,
    capacity: usize,
}

impl WordCache {
    pub(crate) fn new(capacity: usize) -> Self {
        let inner = NonZeroUsize::new(capacity).map(|cap| Mutex::new(LruCache::new(cap)));
        Self { inner, capacity }
    }

    pub(crate) fn get(&self, key: &str) -> Option<Word> {
        let inner = self.inner.as_ref()?;
        let mut cache = inner.lock().ok()?;
        cache.get(key).cloned()
    }

    pub(crate) fn insert(&self, key: &str, word: &Word) {
        if key.len() > MAX_CACHED_WORD_LEN {
            return;
        }
        if let Some(inner) = &self.inner {
            if let Ok(mut cache) = inner.lock() {
                cache.put(key.to_owned(), word.clone());
            }
        }
    }

    pub(crate) fn clear(&self) {
        if let Some(inner) = &self.inner {
            if let Ok(mut cache) = inner.lock() {
                cache.clear();
            }
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.inner
            .as_ref()
            .and_then(|inner| inner.lock().ok().map(|c| c.len()))
            .unwrap_or(0)
    }

    pub(crate) fn capacity(&self) -> usize {
        self.capacity
    }

    /// A fresh, empty cache with the same capacity.
    pub(crate) fn fresh(&self) -> Self {
        Self::new(self.capacity)
    }
}

impl std::fmt::Debug for WordCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WordCache")
            .field("capacity", &self.capacity)
            .field("len", &self.len())
            .finish()
    }
}
