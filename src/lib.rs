//! Chat Sync - client-resident sync and caching core for a chat backend
//!
//! Presents a fast local view of remote communities, members, profiles and
//! notifications over a slow, rate-limited and occasionally unreliable
//! service, with TTL caches, request coalescing, endpoint failover and
//! optimistic reordering.

pub mod cache;
pub mod clock;
pub mod config;
pub mod error;
pub mod models;
pub mod remote;
pub mod storage;
pub mod sync;
pub mod tasks;

pub use config::SyncConfig;
pub use error::{Result, StoreError, SyncError};
pub use sync::{SyncContext, SyncCore};
pub use tasks::spawn_poll_task;
