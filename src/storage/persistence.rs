//! Persistence facade
//!
//! Typed JSON access over a [`PersistentStore`]. Every failure is logged and
//! dropped: the in-memory caches stay authoritative for the session.

use std::sync::Arc;

use serde::{de::DeserializeOwned, Serialize};
use tracing::{trace, warn};

use crate::storage::PersistentStore;

/// Stable record names, one per (kind, scope id) pair.
pub mod keys {
    const PREFIX: &str = "chat_sync";

    pub fn aggregate(community_id: &str) -> String {
        format!("{PREFIX}:aggregate:{community_id}")
    }

    pub fn communities(user_id: &str) -> String {
        format!("{PREFIX}:communities:{user_id}")
    }

    pub fn members(community_id: &str) -> String {
        format!("{PREFIX}:members:{community_id}")
    }

    pub fn profile(user_id: &str) -> String {
        format!("{PREFIX}:profile:{user_id}")
    }

    pub fn notifications(user_id: &str) -> String {
        format!("{PREFIX}:notifications:{user_id}")
    }

    pub fn seen_notifications() -> String {
        format!("{PREFIX}:seen_notifications")
    }

    pub fn notification_prefs() -> String {
        format!("{PREFIX}:notification_prefs")
    }
}

/// Shared handle the managers persist through.
#[derive(Clone)]
pub struct Persistence {
    store: Arc<dyn PersistentStore>,
}

impl Persistence {
    pub fn new(store: Arc<dyn PersistentStore>) -> Self {
        Self { store }
    }

    /// Reads and decodes `key`. Missing, unreadable and corrupt records all
    /// come back as `None`.
    pub fn load<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let bytes = match self.store.get(key) {
            Ok(Some(bytes)) => bytes,
            Ok(None) => return None,
            Err(e) => {
                warn!(key, error = %e, "persistent read failed");
                return None;
            }
        };

        match serde_json::from_slice(&bytes) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!(key, error = %e, "discarding corrupt persisted record");
                None
            }
        }
    }

    /// Encodes and writes `value` under `key`.
    pub fn save<T: Serialize + ?Sized>(&self, key: &str, value: &T) {
        let bytes = match serde_json::to_vec(value) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(key, error = %e, "failed to encode record for persistence");
                return;
            }
        };

        match self.store.set(key, &bytes) {
            Ok(()) => trace!(key, bytes = bytes.len(), "record persisted"),
            Err(e) => warn!(key, error = %e, "persistent write failed"),
        }
    }

    pub fn remove(&self, key: &str) {
        if let Err(e) = self.store.delete(key) {
            warn!(key, error = %e, "persistent delete failed");
        }
    }
}
