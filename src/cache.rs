// SPDX-License-Identifier: MIT OR Apache-2.0

//! In-process caches and content fingerprints.
//!
//! Two eviction policies live here and are intentionally kept apart:
//! - [`LruCache`] evicts the least recently used entry once full. Used for
//!   per-text embedding vectors.
//! - [`FillOnceCache`] never evicts; once full it refuses new entries. Used
//!   for function-based chunking results.

use std::collections::{BTreeMap, HashMap};
use std::hash::Hash;

/// Fingerprint of a piece of content (32 hex chars of a blake3 digest)
pub fn fingerprint(content: &str) -> String {
    let hash = blake3::hash(content.as_bytes());
    hash.to_hex()[..32].to_string()
}

/// Fingerprint of several fields. Field boundaries are part of the digest, so
/// `("ab", "c")` and `("a", "bc")` differ.
pub fn fingerprint_parts(parts: &[&str]) -> String {
    let mut hasher = blake3::Hasher::new();
    for part in parts {
        hasher.update(&(part.len() as u64).to_le_bytes());
        hasher.update(part.as_bytes());
    }
    hasher.finalize().to_hex()[..32].to_string()
}

/// Cache statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Entries currently held
    pub entries: usize,
    /// Maximum number of entries
    pub capacity: usize,
    pub hits: u64,
    pub misses: u64,
    /// Entries removed (LRU) or refused (fill-once) because the cache was full
    pub evictions: u64,
}

impl CacheStats {
    /// Fraction of lookups that hit, or 0 when nothing was looked up
    pub fn hit_ratio(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// Bounded map with least-recently-used eviction
#[derive(Debug)]
pub struct LruCache<K, V> {
    capacity: usize,
    entries: HashMap<K, (V, u64)>,
    /// Access stamp -> key, oldest first
    recency: BTreeMap<u64, K>,
    clock: u64,
    stats: CacheStats,
}

impl<K: Hash + Eq + Clone, V: Clone> LruCache<K, V> {
    /// Creates a cache holding at most `capacity` entries. A capacity of zero
    /// disables caching.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: HashMap::new(),
            recency: BTreeMap::new(),
            clock: 0,
            stats: CacheStats {
                capacity,
                ..Default::default()
            },
        }
    }

    fn tick(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }

    /// Looks up a key, marking it as most recently used on a hit.
    pub fn get(&mut self, key: &K) -> Option<V> {
        let stamp = self.tick();
        match self.entries.get_mut(key) {
            Some((value, last_used)) => {
                self.recency.remove(&*last_used);
                *last_used = stamp;
                self.recency.insert(stamp, key.clone());
                self.stats.hits += 1;
                Some(value.clone())
            }
            None => {
                self.stats.misses += 1;
                None
            }
        }
    }

    /// Checks for a key without touching recency or statistics.
    pub fn contains(&self, key: &K) -> bool {
        self.entries.contains_key(key)
    }

    /// Inserts or replaces a value, evicting the least recently used entry
    /// when the cache is full.
    pub fn put(&mut self, key: K, value: V) {
        if self.capacity == 0 {
            return;
        }
        let stamp = self.tick();

        if let Some((old_value, last_used)) = self.entries.get_mut(&key) {
            *old_value = value;
            self.recency.remove(&*last_used);
            *last_used = stamp;
            self.recency.insert(stamp, key);
            return;
        }

        while self.entries.len() >= self.capacity {
            let Some((_, oldest)) = self.recency.pop_first() else {
                break;
            };
            self.entries.remove(&oldest);
            self.stats.evictions += 1;
        }

        self.recency.insert(stamp, key.clone());
        self.entries.insert(key, (value, stamp));
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Removes every entry. Statistics are kept.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.recency.clear();
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.entries.len(),
            ..self.stats
        }
    }
}

/// Bounded map that stops accepting entries once full
#[derive(Debug)]
pub struct FillOnceCache<K, V> {
    capacity: usize,
    entries: HashMap<K, V>,
    stats: CacheStats,
}

impl<K: Hash + Eq, V: Clone> FillOnceCache<K, V> {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: HashMap::new(),
            stats: CacheStats {
                capacity,
                ..Default::default()
            },
        }
    }

    pub fn get(&mut self, key: &K) -> Option<V> {
        match self.entries.get(key) {
            Some(value) => {
                self.stats.hits += 1;
                Some(value.clone())
            }
            None => {
                self.stats.misses += 1;
                None
            }
        }
    }

    /// Stores the value if there is room. Returns false when the entry was
    /// refused because the cache is full.
    pub fn insert(&mut self, key: K, value: V) -> bool {
        if self.entries.contains_key(&key) || self.entries.len() < self.capacity {
            self.entries.insert(key, value);
            true
        } else {
            self.stats.evictions += 1;
            false
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.entries.len() >= self.capacity
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.entries.len(),
            ..self.stats
        }
    }
}
