//! Storage Module
//!
//! Durable key→bytes backends and the error-swallowing facade the managers
//! persist through.
//!
//! # Backends
//! - [`MemoryStore`]: HashMap behind a mutex, optional byte quota
//! - [`FileStore`]: one file per key in a directory

mod file;
mod memory;
mod persistence;

pub use file::FileStore;
pub use memory::MemoryStore;
pub use persistence::{keys, Persistence};

use crate::error::StoreError;

/// Durable key→value store.
///
/// Backends report failures; [`Persistence`] swallows them so they never
/// reach callers of the caching layer.
pub trait PersistentStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError>;

    fn set(&self, key: &str, value: &[u8]) -> Result<(), StoreError>;

    fn delete(&self, key: &str) -> Result<(), StoreError>;
}
