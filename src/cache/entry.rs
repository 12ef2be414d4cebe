//! Cache Entry Module
//!
//! Defines the timestamped envelope every cached value lives in.

use std::time::Duration;

use serde::{Deserialize, Serialize};

// == Cache Entry ==
/// A cached value with the time it was fetched.
///
/// Serialized as `{data, timestamp}` when persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry<T> {
    /// The cached value
    pub data: T,
    /// Fetch timestamp (Unix milliseconds)
    pub timestamp: u64,
}

impl<T> CacheEntry<T> {
    // == Constructor ==
    /// Creates a new entry stamped at `timestamp`.
    pub fn new(data: T, timestamp: u64) -> Self {
        Self { data, timestamp }
    }

    // == Age ==
    /// Milliseconds elapsed since the entry was stamped.
    ///
    /// A timestamp in the future (clock skew after restart) counts as age zero.
    pub fn age_ms(&self, now: u64) -> u64 {
        now.saturating_sub(self.timestamp)
    }

    // == Is Valid ==
    /// Checks if the entry is still within its TTL.
    ///
    /// Boundary condition: an entry is valid while `now - timestamp <= ttl`,
    /// so it stays valid at exactly the TTL and expires one millisecond later.
    pub fn is_valid(&self, now: u64, ttl: Duration) -> bool {
        self.age_ms(now) <= ttl.as_millis() as u64
    }

    // == Time To Live ==
    /// Returns remaining TTL in milliseconds, `0` once expired.
    pub fn ttl_remaining_ms(&self, now: u64, ttl: Duration) -> u64 {
        (ttl.as_millis() as u64).saturating_sub(self.age_ms(now))
    }
}

// == Scoped Entry ==
/// Persisted envelope for collections owned by a scope id, serialized as
/// `{data, scope_id, timestamp}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScopedEntry<T> {
    pub data: T,
    pub scope_id: String,
    pub timestamp: u64,
}

impl<T> ScopedEntry<T> {
    pub fn new(scope_id: impl Into<String>, entry: CacheEntry<T>) -> Self {
        Self {
            data: entry.data,
            scope_id: scope_id.into(),
            timestamp: entry.timestamp,
        }
    }

    /// Drops the scope, keeping data and timestamp. `None` when the envelope
    /// was written for a different scope.
    pub fn into_entry_for(self, scope_id: &str) -> Option<CacheEntry<T>> {
        (self.scope_id == scope_id).then(|| CacheEntry::new(self.data, self.timestamp))
    }
}
