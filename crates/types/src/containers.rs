//! Small container types shared across crates.

use serde::Serialize;
use std::collections::BTreeMap;

/// Per-key counter with deterministic (ordered) iteration.
///
/// Missing keys read as zero. Used for pivot-share tallies and similar
/// per-miner statistics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CountMap<K: Ord> {
    counts: BTreeMap<K, u64>,
}

impl<K: Ord> Default for CountMap<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Ord> CountMap<K> {
    /// Create an empty map.
    pub fn new() -> Self {
        Self {
            counts: BTreeMap::new(),
        }
    }

    /// Count for `key` (zero if never incremented).
    pub fn get(&self, key: &K) -> u64 {
        self.counts.get(key).copied().unwrap_or(0)
    }

    /// Add `n` to the count for `key`.
    pub fn add(&mut self, key: K, n: u64) {
        *self.counts.entry(key).or_insert(0) += n;
    }

    /// Add one to the count for `key`.
    pub fn incr(&mut self, key: K) {
        self.add(key, 1);
    }

    /// Forget `key` entirely.
    pub fn remove(&mut self, key: &K) -> u64 {
        self.counts.remove(key).unwrap_or(0)
    }

    /// Fold another map into this one.
    pub fn merge(&mut self, other: CountMap<K>) {
        for (key, n) in other.counts {
            self.add(key, n);
        }
    }

    /// Sum of all counts.
    pub fn total(&self) -> u64 {
        self.counts.values().sum()
    }

    /// Number of distinct keys.
    pub fn len(&self) -> usize {
        self.counts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }

    /// Iterate `(key, count)` in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&K, u64)> {
        self.counts.iter().map(|(k, &n)| (k, n))
    }
}

impl<K: Ord> FromIterator<K> for CountMap<K> {
    fn from_iter<I: IntoIterator<Item = K>>(iter: I) -> Self {
        let mut map = Self::new();
        for key in iter {
            map.incr(key);
        }
        map
    }
}
