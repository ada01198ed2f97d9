//! Least-recently-released ordering of cached buffers.

use std::collections::BTreeMap;

use indexmap::IndexMap;
use tessera_core::ArrayId;

use crate::cache::CacheKey;

/// Cached buffer identifiers in release order, oldest first.
///
/// Also serves as the membership set for double-release detection: an
/// identifier is present exactly while its buffer sits in the cache.
///
/// Each insert takes the next sequence number; `order` sorts by it, so
/// removal by id and popping the oldest are both logarithmic.
#[derive(Debug, Default)]
pub struct LruIndex {
    entries: IndexMap<ArrayId, (u64, CacheKey)>,
    order: BTreeMap<u64, ArrayId>,
    next_seq: u64,
}

impl LruIndex {
    /// Empty index.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `id` as the most recently released buffer under `key`.
    ///
    /// Returns `false` if `id` was already present (the order is unchanged).
    pub fn insert(&mut self, id: ArrayId, key: CacheKey) -> bool {
        if self.entries.contains_key(&id) {
            return false;
        }
        let seq = self.next_seq;
        self.next_seq += 1;
        self.entries.insert(id, (seq, key));
        self.order.insert(seq, id);
        true
    }

    /// Forget `id`, returning its key.
    pub fn remove(&mut self, id: ArrayId) -> Option<CacheKey> {
        let (seq, key) = self.entries.swap_remove(&id)?;
        self.order.remove(&seq);
        Some(key)
    }

    /// Whether `id` is cached.
    pub fn contains(&self, id: ArrayId) -> bool {
        self.entries.contains_key(&id)
    }

    /// Remove and return the least recently released entry.
    pub fn pop_oldest(&mut self) -> Option<(ArrayId, CacheKey)> {
        let (_, id) = self.order.pop_first()?;
        let (_, key) = self.entries.swap_remove(&id)?;
        Some((id, key))
    }

    /// Number of cached buffers.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing is cached.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Forget everything.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.order.clear();
    }
}
