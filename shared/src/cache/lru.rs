//! LRU index with per-entry expiry and weight accounting.
//!
//! Not thread-safe on its own; [`super::FingerprintCache`] keeps it behind a
//! mutex and never holds that mutex across an await point.

use std::collections::{BTreeMap, HashMap};
use std::hash::Hash;
use tokio::time::Instant;

struct Slot<V> {
    value: V,
    weight: usize,
    tick: u64,
    expires_at: Instant,
}

/// Result of [`LruIndex::get`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lookup<V> {
    /// A live entry; it is now the most recently used.
    Hit(V),
    /// The entry had expired and was removed.
    Expired,
    /// No entry for the key.
    Miss,
}

/// Result of [`LruIndex::insert`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Insert<K> {
    /// Stored; the listed keys were evicted to make room.
    Stored {
        /// Evicted keys, least recently used first.
        evicted: Vec<K>,
    },
    /// The value alone exceeds the weight bound and was not stored.
    TooHeavy,
}

/// Bounded map ordered by recency of use.
///
/// Recency is tracked with a monotonically increasing tick per access; the
/// `order` map from tick to key yields the least recently used key in
/// `O(log n)`.
pub struct LruIndex<K, V> {
    entries: HashMap<K, Slot<V>>,
    order: BTreeMap<u64, K>,
    tick: u64,
    total_weight: usize,
    max_entries: usize,
    max_weight: Option<usize>,
}

impl<K, V> LruIndex<K, V>
where
    K: Clone + Eq + Hash,
    V: Clone,
{
    /// Creates an empty index. `max_entries` of zero is treated as one.
    #[must_use]
    pub fn new(max_entries: usize, max_weight: Option<usize>) -> Self {
        Self {
            entries: HashMap::new(),
            order: BTreeMap::new(),
            tick: 0,
            total_weight: 0,
            max_entries: max_entries.max(1),
            max_weight,
        }
    }

    /// Looks up `key`, removing it if expired at `now` and marking it most
    /// recently used otherwise.
    pub fn get(&mut self, key: &K, now: Instant) -> Lookup<V> {
        let Some(slot) = self.entries.get(key) else {
            return Lookup::Miss;
        };
        if slot.expires_at <= now {
            self.remove(key);
            return Lookup::Expired;
        }

        let tick = self.next_tick();
        let Some(slot) = self.entries.get_mut(key) else {
            return Lookup::Miss;
        };
        self.order.remove(&slot.tick);
        slot.tick = tick;
        self.order.insert(tick, key.clone());
        Lookup::Hit(slot.value.clone())
    }

    /// Stores `value`, replacing any previous value for `key`, then evicts
    /// least recently used entries until both bounds hold.
    pub fn insert(&mut self, key: K, value: V, weight: usize, expires_at: Instant) -> Insert<K> {
        self.remove(&key);
        if self.max_weight.is_some_and(|max| weight > max) {
            return Insert::TooHeavy;
        }

        let tick = self.next_tick();
        self.order.insert(tick, key.clone());
        self.entries.insert(
            key,
            Slot {
                value,
                weight,
                tick,
                expires_at,
            },
        );
        self.total_weight += weight;

        let mut evicted = Vec::new();
        while self.over_capacity() {
            let Some((_, oldest)) = self.order.pop_first() else {
                break;
            };
            if let Some(slot) = self.entries.remove(&oldest) {
                self.total_weight -= slot.weight;
            }
            evicted.push(oldest);
        }
        Insert::Stored { evicted }
    }

    /// Removes `key`, returning its value.
    pub fn remove(&mut self, key: &K) -> Option<V> {
        let slot = self.entries.remove(key)?;
        self.order.remove(&slot.tick);
        self.total_weight -= slot.weight;
        Some(slot.value)
    }

    /// Removes every entry whose value fails `keep`. Returns the number removed.
    pub fn retain(&mut self, mut keep: impl FnMut(&V) -> bool) -> usize {
        let doomed: Vec<K> = self
            .entries
            .iter()
            .filter(|(_, slot)| !keep(&slot.value))
            .map(|(key, _)| key.clone())
            .collect();
        for key in &doomed {
            self.remove(key);
        }
        doomed.len()
    }

    /// Removes everything. Returns the number removed.
    pub fn clear(&mut self) -> usize {
        let n = self.entries.len();
        self.entries.clear();
        self.order.clear();
        self.total_weight = 0;
        n
    }

    /// Number of entries, including expired ones not yet observed.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Sum of entry weights.
    #[must_use]
    pub fn weight(&self) -> usize {
        self.total_weight
    }

    fn over_capacity(&self) -> bool {
        self.entries.len() > self.max_entries
            || self.max_weight.is_some_and(|max| self.total_weight > max)
    }

    fn next_tick(&mut self) -> u64 {
        self.tick += 1;
        self.tick
    }
}
