//! Cache Statistics Module
//!
//! Read counters kept by every [`TtlMap`](crate::cache::TtlMap) and surfaced
//! per manager, plus the core-wide report built from them.

use serde::Serialize;

/// Read outcomes for one entity cache.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct CacheStats {
    /// Reads answered by an entry within its TTL
    pub hits: u64,
    /// Reads that found nothing within its TTL
    pub misses: u64,
    /// Expired entries handed out because the remote could not be asked
    pub stale_served: u64,
    /// Entries dropped by a purge, quarantine or explicit clear
    pub invalidations: u64,
    pub total_entries: usize,
}

impl CacheStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Share of reads answered fresh; 0.0 before the first read.
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }

    pub fn record_hit(&mut self) {
        self.hits += 1;
    }

    pub fn record_miss(&mut self) {
        self.misses += 1;
    }

    pub fn record_stale(&mut self) {
        self.stale_served += 1;
    }

    pub fn record_invalidation(&mut self) {
        self.invalidations += 1;
    }

    pub fn set_total_entries(&mut self, count: usize) {
        self.total_entries = count;
    }

    /// Counter-wise sum of two caches' stats.
    pub fn combine(self, other: CacheStats) -> CacheStats {
        CacheStats {
            hits: self.hits + other.hits,
            misses: self.misses + other.misses,
            stale_served: self.stale_served + other.stale_served,
            invalidations: self.invalidations + other.invalidations,
            total_entries: self.total_entries + other.total_entries,
        }
    }
}

/// Cache statistics for every manager of a [`SyncCore`](crate::SyncCore).
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct SyncStats {
    pub aggregates: CacheStats,
    pub members: CacheStats,
    pub profiles: CacheStats,
    pub notifications: CacheStats,
}

impl SyncStats {
    pub fn total(&self) -> CacheStats {
        self.aggregates
            .combine(self.members)
            .combine(self.profiles)
            .combine(self.notifications)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hit_rate_ignores_stale_reads() {
        let mut stats = CacheStats::new();
        assert_eq!(stats.hit_rate(), 0.0);

        stats.record_hit();
        stats.record_hit();
        stats.record_hit();
        stats.record_miss();
        stats.record_stale();
        assert_eq!(stats.hit_rate(), 0.75);
        assert_eq!(stats.stale_served, 1);
    }

    #[test]
    fn test_total_sums_every_manager() {
        let mut members = CacheStats::new();
        members.record_miss();
        members.record_stale();
        members.set_total_entries(2);
        let mut notifications = CacheStats::new();
        notifications.record_hit();
        notifications.record_invalidation();
        notifications.set_total_entries(1);

        let report = SyncStats {
            members,
            notifications,
            ..SyncStats::default()
        };
        let total = report.total();

        assert_eq!(total.hits, 1);
        assert_eq!(total.misses, 1);
        assert_eq!(total.stale_served, 1);
        assert_eq!(total.invalidations, 1);
        assert_eq!(total.total_entries, 3);
    }

    #[test]
    fn test_report_serializes_per_manager() {
        let json = serde_json::to_value(SyncStats::default()).unwrap();
        assert_eq!(json["members"]["stale_served"], 0);
        assert_eq!(json["aggregates"]["total_entries"], 0);
    }
}
