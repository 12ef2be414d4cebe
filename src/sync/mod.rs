//! Sync Module
//!
//! The managers that keep a local view of remote state:
//! - [`EntitySyncManager`]: community aggregates and community id lists
//! - [`MemberRegistry`]: rate-limited, coalesced member lists
//! - [`ProfileRegistry`]: throttled, batched profiles with name enrichment
//! - [`NotificationCenter`]: polled, deduplicated notification feeds
//! - [`ReorderCoordinator`]: optimistic channel/category reordering
//!
//! Each manager is constructed once and shared by `Arc`. Locks guard short
//! synchronous sections only and are never held across an `.await`.

mod entities;
mod members;
mod notifications;
mod observer;
mod profiles;
mod reorder;

pub use entities::{AggregateEvent, EntitySyncManager};
pub use members::MemberRegistry;
pub use notifications::{LogNotifier, NotificationCenter, NotificationEvent, PlatformNotifier};
pub use observer::{Subscribers, Subscription};
pub use profiles::ProfileRegistry;
pub use reorder::ReorderCoordinator;

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::cache::SyncStats;
use crate::clock::{Clock, SystemClock};
use crate::config::SyncConfig;
use crate::remote::{RemoteClient, RetryPolicy, Signer, Transport};
use crate::storage::{PersistentStore, Persistence};

/// Collaborators every manager needs.
#[derive(Clone)]
pub struct SyncContext {
    pub remote: Arc<RemoteClient>,
    pub persistence: Persistence,
    pub clock: Arc<dyn Clock>,
    pub config: Arc<SyncConfig>,
    /// Signing capability for writes; reads work without one
    pub signer: Option<Arc<dyn Signer>>,
}

impl SyncContext {
    pub fn new(
        config: SyncConfig,
        transport: Arc<dyn Transport>,
        store: Arc<dyn PersistentStore>,
    ) -> Self {
        let policy = RetryPolicy::from_config(&config);
        let remote = RemoteClient::new(transport, config.endpoints.clone(), policy);
        Self {
            remote: Arc::new(remote),
            persistence: Persistence::new(store),
            clock: Arc::new(SystemClock),
            config: Arc::new(config),
            signer: None,
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_signer(mut self, signer: Arc<dyn Signer>) -> Self {
        self.signer = Some(signer);
        self
    }

    pub(crate) fn now(&self) -> u64 {
        self.clock.now_ms()
    }
}

/// All managers wired over one context.
#[derive(Clone)]
pub struct SyncCore {
    pub entities: Arc<EntitySyncManager>,
    pub members: Arc<MemberRegistry>,
    pub profiles: Arc<ProfileRegistry>,
    pub notifications: Arc<NotificationCenter>,
    pub reorder: Arc<ReorderCoordinator>,
}

impl SyncCore {
    pub fn new(ctx: SyncContext, notifier: Arc<dyn PlatformNotifier>) -> Self {
        let entities = EntitySyncManager::new(ctx.clone());
        Self {
            members: MemberRegistry::new(ctx.clone()),
            profiles: ProfileRegistry::new(ctx.clone()),
            notifications: NotificationCenter::new(ctx.clone(), notifier),
            reorder: ReorderCoordinator::new(ctx, Arc::clone(&entities)),
            entities,
        }
    }

    /// Cache statistics of every manager.
    pub fn stats(&self) -> SyncStats {
        SyncStats {
            aggregates: self.entities.stats(),
            members: self.members.stats(),
            profiles: self.profiles.stats(),
            notifications: self.notifications.stats(),
        }
    }
}

/// Locks `mutex`, recovering the data if a previous holder panicked.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
