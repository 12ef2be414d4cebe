//! Cache Module
//!
//! Timestamped entries, per-kind TTL maps and the bounded seen-id ledger.

mod entry;
mod ledger;
mod stats;
mod ttl_map;


// Re-export public types
pub use entry::{CacheEntry, ScopedEntry};
pub use ledger::SeenLedger;
pub use stats::{CacheStats, SyncStats};
pub use ttl_map::TtlMap;
