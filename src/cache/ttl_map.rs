//! TTL Map Module
//!
//! Keyed cache of timestamped entries sharing one TTL. Expired entries are
//! kept as stale fallbacks until replaced or removed explicitly.

use std::collections::HashMap;
use std::time::Duration;

use crate::cache::{CacheEntry, CacheStats};

// == TTL Map ==
/// Per-id cache for one entity kind.
#[derive(Debug)]
pub struct TtlMap<T> {
    /// Entries by entity id
    entries: HashMap<String, CacheEntry<T>>,
    /// TTL shared by every entry of this kind
    ttl: Duration,
    /// Read statistics
    stats: CacheStats,
}

impl<T> TtlMap<T> {
    // == Constructor ==
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: HashMap::new(),
            ttl,
            stats: CacheStats::new(),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    // == Insert ==
    /// Stores `data` for `key`, stamped at `now`. Overwrites and restamps.
    pub fn insert(&mut self, key: impl Into<String>, data: T, now: u64) {
        self.insert_entry(key, CacheEntry::new(data, now));
    }

    /// Stores an already-stamped entry (rehydration from persistence).
    pub fn insert_entry(&mut self, key: impl Into<String>, entry: CacheEntry<T>) {
        self.entries.insert(key.into(), entry);
        self.stats.set_total_entries(self.entries.len());
    }

    // == Get Fresh ==
    /// Returns the value only if it is within the TTL, recording hit or miss.
    pub fn get_fresh(&mut self, key: &str, now: u64) -> Option<&T> {
        match self.entries.get(key) {
            Some(entry) if entry.is_valid(now, self.ttl) => {
                self.stats.record_hit();
                Some(&entry.data)
            }
            _ => {
                self.stats.record_miss();
                None
            }
        }
    }

    // == Get Any ==
    /// Returns the entry regardless of age.
    pub fn get_any(&self, key: &str) -> Option<&CacheEntry<T>> {
        self.entries.get(key)
    }

    /// Returns the entry regardless of age as a fallback answer, counting it
    /// as a stale read.
    pub fn get_stale(&mut self, key: &str) -> Option<&CacheEntry<T>> {
        let entry = self.entries.get(key)?;
        self.stats.record_stale();
        Some(entry)
    }

    /// Mutable access to the value without touching its timestamp.
    pub fn get_mut(&mut self, key: &str) -> Option<&mut T> {
        self.entries.get_mut(key).map(|entry| &mut entry.data)
    }

    pub fn is_fresh(&self, key: &str, now: u64) -> bool {
        self.entries
            .get(key)
            .is_some_and(|entry| entry.is_valid(now, self.ttl))
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    // == Remove ==
    /// Drops the entry for `key`, counting it as an invalidation.
    pub fn remove(&mut self, key: &str) -> Option<CacheEntry<T>> {
        let removed = self.entries.remove(key);
        if removed.is_some() {
            self.stats.record_invalidation();
            self.stats.set_total_entries(self.entries.len());
        }
        removed
    }

    /// Drops every entry, returning the ids that were cached.
    pub fn clear(&mut self) -> Vec<String> {
        let keys: Vec<String> = self.entries.drain().map(|(key, _)| key).collect();
        for _ in &keys {
            self.stats.record_invalidation();
        }
        self.stats.set_total_entries(0);
        keys
    }

    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.entries.keys()
    }

    pub fn stats(&self) -> CacheStats {
        let mut stats = self.stats.clone();
        stats.set_total_entries(self.entries.len());
        stats
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[allow(dead_code)]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
