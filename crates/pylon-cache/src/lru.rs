//! Capacity-bounded map with least-recently-used eviction
//!
//! Backs the private channel cache. Every read or write stamps the entry
//! with a fresh tick; the `order` index maps ticks back to keys so the
//! oldest entry is found in `O(log n)`.

use std::collections::{BTreeMap, HashMap};
use std::hash::Hash;

/// LRU map with a fixed capacity
#[derive(Debug)]
pub struct LruMap<K, V> {
    capacity: usize,
    entries: HashMap<K, (V, u64)>,
    order: BTreeMap<u64, K>,
    tick: u64,
}

impl<K, V> LruMap<K, V>
where
    K: Eq + Hash + Clone,
{
    /// Create a map holding at most `capacity` entries (minimum 1)
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            entries: HashMap::with_capacity(capacity),
            order: BTreeMap::new(),
            tick: 0,
        }
    }

    fn next_tick(&mut self) -> u64 {
        self.tick += 1;
        self.tick
    }

    /// Insert or replace an entry, marking it most recently used
    ///
    /// Returns the evicted least-recently-used entry when a new key
    /// pushes the map over capacity.
    pub fn insert(&mut self, key: K, value: V) -> Option<(K, V)> {
        let tick = self.next_tick();

        if let Some((slot, stamp)) = self.entries.get_mut(&key) {
            self.order.remove(&*stamp);
            *slot = value;
            *stamp = tick;
            self.order.insert(tick, key);
            return None;
        }

        let evicted = if self.entries.len() >= self.capacity {
            self.pop_oldest()
        } else {
            None
        };

        self.entries.insert(key.clone(), (value, tick));
        self.order.insert(tick, key);
        evicted
    }

    /// Get an entry, marking it most recently used
    pub fn get(&mut self, key: &K) -> Option<&V> {
        self.touch(key);
        self.entries.get(key).map(|(value, _)| value)
    }

    /// Get a mutable entry, marking it most recently used
    pub fn get_mut(&mut self, key: &K) -> Option<&mut V> {
        self.touch(key);
        self.entries.get_mut(key).map(|(value, _)| value)
    }

    /// Read an entry without changing its recency
    pub fn peek(&self, key: &K) -> Option<&V> {
        self.entries.get(key).map(|(value, _)| value)
    }

    /// Mark an entry most recently used; returns false if absent
    pub fn touch(&mut self, key: &K) -> bool {
        let tick = self.tick + 1;
        let Some((_, stamp)) = self.entries.get_mut(key) else {
            return false;
        };
        let old = std::mem::replace(stamp, tick);
        self.tick = tick;
        if let Some(k) = self.order.remove(&old) {
            self.order.insert(tick, k);
        }
        true
    }

    pub fn remove(&mut self, key: &K) -> Option<V> {
        let (value, stamp) = self.entries.remove(key)?;
        self.order.remove(&stamp);
        Some(value)
    }

    fn pop_oldest(&mut self) -> Option<(K, V)> {
        let (_, key) = self.order.pop_first()?;
        let (value, _) = self.entries.remove(&key)?;
        Some((key, value))
    }

    /// Key that would be evicted next
    pub fn oldest(&self) -> Option<&K> {
        self.order.first_key_value().map(|(_, key)| key)
    }

    #[inline]
    pub fn contains(&self, key: &K) -> bool {
        self.entries.contains_key(key)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Iterate entries without changing recency (arbitrary order)
    pub fn values(&self) -> impl Iterator<Item = &V> {
        self.entries.values().map(|(value, _)| value)
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.order.clear();
    }
}
