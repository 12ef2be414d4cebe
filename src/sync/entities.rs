//! Community aggregate synchronization
//!
//! Owns the aggregate cache (community + categories + channels) per community
//! id. Reads are cache-first and never wait on the network; refreshes are
//! serialized per id, and a fatal response quarantines the id.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use futures_util::future::{BoxFuture, FutureExt, Shared};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::cache::{CacheEntry, CacheStats, ScopedEntry, TtlMap};
use crate::error::{Result, SyncError};
use crate::models::community::normalize_id;
use crate::models::{CommunityAggregate, ReorderKind, Scope};
use crate::remote::CallOptions;
use crate::storage::keys;
use crate::sync::{lock, Subscribers, Subscription, SyncContext};

type SharedRefresh = Shared<BoxFuture<'static, Result<()>>>;

/// Change notifications for aggregate subscribers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AggregateEvent {
    /// The displayed aggregate for this id changed
    Updated(String),
    /// The id was quarantined and its cache purged
    Invalidated(String),
    /// The active community's aggregate pointer changed
    CurrentChanged(Option<String>),
}

struct EntityState {
    /// Display state, including optimistic patches
    aggregates: TtlMap<CommunityAggregate>,
    /// Last server-derived aggregate per id
    authoritative: HashMap<String, CommunityAggregate>,
    /// Ids with an optimistic patch awaiting confirmation
    pending: HashSet<String>,
    in_flight: HashMap<String, SharedRefresh>,
    /// Refresh requested while one was running
    rerun: HashSet<String>,
    /// Quarantined after a fatal response
    invalid: HashSet<String>,
    /// Ids loaded (from disk or network) during this session
    hydrated: HashSet<String>,
    active: Option<String>,
    current: Option<CommunityAggregate>,
    /// Community id lists by user id
    communities: TtlMap<Vec<String>>,
}

pub struct EntitySyncManager {
    ctx: SyncContext,
    state: Mutex<EntityState>,
    events: Subscribers<AggregateEvent>,
}

impl EntitySyncManager {
    pub fn new(ctx: SyncContext) -> Arc<Self> {
        let state = EntityState {
            aggregates: TtlMap::new(ctx.config.aggregate_ttl),
            authoritative: HashMap::new(),
            pending: HashSet::new(),
            in_flight: HashMap::new(),
            rerun: HashSet::new(),
            invalid: HashSet::new(),
            hydrated: HashSet::new(),
            active: None,
            current: None,
            communities: TtlMap::new(ctx.config.community_list_ttl),
        };
        Arc::new(Self {
            ctx,
            state: Mutex::new(state),
            events: Subscribers::new(),
        })
    }

    // == Get Aggregate ==
    /// Returns the cached aggregate, possibly stale, without waiting.
    ///
    /// A refresh is spawned when the entry is absent, past its TTL, or read
    /// for the first time this session. Quarantined ids return `None` and
    /// never touch the network. Must be called within a tokio runtime.
    pub fn get_aggregate(self: &Arc<Self>, id: &str) -> Option<CommunityAggregate> {
        let now = self.ctx.now();
        let (cached, needs_refresh) = {
            let mut state = lock(&self.state);
            if state.invalid.contains(id) {
                debug!(community_id = id, "skipping quarantined community");
                return None;
            }

            let first_load = state.hydrated.insert(id.to_string());
            if first_load && !state.aggregates.contains(id) {
                let persisted: Option<CacheEntry<CommunityAggregate>> =
                    self.ctx.persistence.load(&keys::aggregate(id));
                if let Some(entry) = persisted {
                    debug!(community_id = id, "aggregate rehydrated from storage");
                    state.authoritative.insert(id.to_string(), entry.data.clone());
                    state.aggregates.insert_entry(id, entry);
                }
            }

            let fresh = state.aggregates.get_fresh(id, now).cloned();
            match fresh {
                Some(aggregate) => (Some(aggregate), first_load),
                None => (state.aggregates.get_stale(id).map(|e| e.data.clone()), true),
            }
        };

        if needs_refresh {
            self.spawn_refresh(id);
        }
        cached
    }

    fn spawn_refresh(self: &Arc<Self>, id: &str) {
        let this = Arc::clone(self);
        let id = id.to_string();
        tokio::spawn(async move {
            if let Err(e) = this.refresh(&id, false).await {
                debug!(community_id = %id, error = %e, "background aggregate refresh failed");
            }
        });
    }

    // == Refresh ==
    /// Fetches and replaces the aggregate for `id`.
    ///
    /// While a refresh for `id` is running, further requests flag it to fetch
    /// once more when it completes and then wait for that final outcome, so
    /// every caller sees the result of a fetch that started after its
    /// request. The fetch runs in its own task and finishes even if every
    /// caller stops waiting. `force` lifts a quarantine; without it a
    /// quarantined id fails with [`SyncError::Invalid`].
    pub async fn refresh(self: &Arc<Self>, id: &str, force: bool) -> Result<()> {
        let run = {
            let mut state = lock(&self.state);
            if state.invalid.contains(id) {
                if !force {
                    return Err(SyncError::Invalid(id.to_string()));
                }
                state.invalid.remove(id);
                info!(community_id = id, "quarantine lifted by forced refresh");
            }
            if let Some(running) = state.in_flight.get(id).cloned() {
                state.rerun.insert(id.to_string());
                debug!(community_id = id, "refresh coalesced into running fetch");
                running
            } else {
                let run = self.start_refresh(id);
                state.in_flight.insert(id.to_string(), run.clone());
                run
            }
        };
        run.await
    }

    /// Spawns the fetch loop for `id`. The caller holds the state lock until
    /// the run is registered, so the loop cannot commit before that.
    fn start_refresh(self: &Arc<Self>, id: &str) -> SharedRefresh {
        let this = Arc::clone(self);
        let id = id.to_string();
        let handle = tokio::spawn(async move {
            loop {
                let outcome = this.fetch(&id).await;
                let (result, again, events) = this.commit_fetch(&id, outcome);
                for event in &events {
                    this.events.emit(event);
                }
                if !again {
                    return result;
                }
                debug!(community_id = %id, "running coalesced refresh");
            }
        });

        async move {
            handle
                .await
                .unwrap_or_else(|e| Err(SyncError::Transient(format!("aggregate refresh task failed: {e}"))))
        }
        .boxed()
        .shared()
    }

    async fn fetch(&self, id: &str) -> Result<CommunityAggregate> {
        let value = self
            .ctx
            .remote
            .call(&format!("{id}/community"), CallOptions::get())
            .await?;
        if value.is_null() {
            return Err(SyncError::Fatal(format!("community {id} does not exist")));
        }
        Ok(serde_json::from_value(value)?)
    }

    /// Applies a fetch outcome. Returns the caller's result, whether to fetch
    /// again, and the events to emit once the lock is released.
    fn commit_fetch(
        &self,
        id: &str,
        outcome: Result<CommunityAggregate>,
    ) -> (Result<()>, bool, Vec<AggregateEvent>) {
        let now = self.ctx.now();
        let mut guard = lock(&self.state);
        let state = &mut *guard;
        let mut events = Vec::new();

        let result = match outcome {
            Ok(_) if state.invalid.contains(id) => {
                debug!(community_id = id, "discarding fetch for quarantined community");
                Ok(())
            }
            Ok(aggregate) => {
                let entry = CacheEntry::new(aggregate.clone(), now);
                self.ctx.persistence.save(&keys::aggregate(id), &entry);
                state.aggregates.insert_entry(id, entry);
                state.authoritative.insert(id.to_string(), aggregate.clone());
                state.pending.remove(id);
                state.hydrated.insert(id.to_string());
                events.push(AggregateEvent::Updated(id.to_string()));

                if state.active.as_deref() == Some(id) {
                    state.current = Some(aggregate);
                    events.push(AggregateEvent::CurrentChanged(Some(id.to_string())));
                }
                debug!(community_id = id, "aggregate refreshed");
                Ok(())
            }
            Err(e) if e.is_fatal() => {
                warn!(community_id = id, error = %e, "fatal aggregate response, quarantining");
                events.extend(self.invalidate(state, id));
                Err(e)
            }
            Err(e) => {
                debug!(community_id = id, error = %e, "aggregate refresh failed, keeping cache");
                Err(e)
            }
        };

        let again = state.rerun.remove(id) && !state.invalid.contains(id);
        if !again {
            state.in_flight.remove(id);
        }
        (result, again, events)
    }

    // == Mark Invalid ==
    /// Quarantines `id` and purges its cached and persisted aggregate.
    pub fn mark_invalid(&self, id: &str) {
        let events = {
            let mut state = lock(&self.state);
            self.invalidate(&mut state, id)
        };
        for event in &events {
            self.events.emit(event);
        }
    }

    fn invalidate(&self, state: &mut EntityState, id: &str) -> Vec<AggregateEvent> {
        state.invalid.insert(id.to_string());
        state.aggregates.remove(id);
        state.authoritative.remove(id);
        state.pending.remove(id);
        state.rerun.remove(id);
        self.ctx.persistence.remove(&keys::aggregate(id));

        let mut events = vec![AggregateEvent::Invalidated(id.to_string())];
        if state.active.as_deref() == Some(id) && state.current.take().is_some() {
            events.push(AggregateEvent::CurrentChanged(None));
        }
        events
    }

    pub fn is_invalid(&self, id: &str) -> bool {
        lock(&self.state).invalid.contains(id)
    }

    // == Active Community ==
    /// Selects the community whose aggregate backs [`current`](Self::current).
    pub fn set_active(&self, id: Option<&str>) {
        let event = {
            let mut state = lock(&self.state);
            let current = id.and_then(|id| state.aggregates.get_any(id).map(|e| e.data.clone()));
            state.active = id.map(str::to_string);
            state.current = current;
            AggregateEvent::CurrentChanged(state.current.as_ref().map(|a| a.id.clone()))
        };
        self.events.emit(&event);
    }

    pub fn active(&self) -> Option<String> {
        lock(&self.state).active.clone()
    }

    pub fn current(&self) -> Option<CommunityAggregate> {
        lock(&self.state).current.clone()
    }

    // == Community Lists ==
    /// Community ids the user belongs to.
    ///
    /// Served from cache within its TTL; on fetch failure a stale list is
    /// returned if one exists.
    pub async fn list_communities(&self, user_id: &str) -> Result<Vec<String>> {
        let now = self.ctx.now();
        {
            let mut state = lock(&self.state);
            if !state.communities.contains(user_id) {
                let persisted: Option<ScopedEntry<Vec<String>>> =
                    self.ctx.persistence.load(&keys::communities(user_id));
                match persisted.map(|scoped| scoped.into_entry_for(user_id)) {
                    Some(Some(entry)) => state.communities.insert_entry(user_id, entry),
                    Some(None) => warn!(user_id, "ignoring community list stored for another user"),
                    None => {}
                }
            }
            if let Some(ids) = state.communities.get_fresh(user_id, now) {
                return Ok(ids.clone());
            }
        }

        let fetched = self
            .ctx
            .remote
            .call(&format!("{user_id}/communities"), CallOptions::get())
            .await
            .and_then(|value| Ok(serde_json::from_value::<Vec<Value>>(value)?));

        let mut state = lock(&self.state);
        match fetched {
            Ok(values) => {
                let ids: Vec<String> = values.into_iter().filter_map(normalize_id).collect();
                let entry = CacheEntry::new(ids.clone(), self.ctx.now());
                self.ctx.persistence.save(
                    &keys::communities(user_id),
                    &ScopedEntry::new(user_id, entry.clone()),
                );
                state.communities.insert_entry(user_id, entry);
                Ok(ids)
            }
            Err(e) => match state.communities.get_stale(user_id) {
                Some(stale) => {
                    warn!(user_id, error = %e, "community list fetch failed, serving stale list");
                    Ok(stale.data.clone())
                }
                None => Err(e),
            },
        }
    }

    // == Clear ==
    /// Drops every cached aggregate and community list, in memory and on
    /// disk, and lifts all quarantines.
    pub fn clear(&self) {
        let (ids, users) = {
            let mut state = lock(&self.state);
            let ids = state.aggregates.clear();
            let users = state.communities.clear();
            state.authoritative.clear();
            state.pending.clear();
            state.invalid.clear();
            state.hydrated.clear();
            state.rerun.clear();
            state.current = None;
            (ids, users)
        };
        for id in &ids {
            self.ctx.persistence.remove(&keys::aggregate(id));
        }
        for user in &users {
            self.ctx.persistence.remove(&keys::communities(user));
        }
        info!(aggregates = ids.len(), lists = users.len(), "entity cache cleared");
    }

    pub fn subscribe(
        &self,
        callback: impl Fn(&AggregateEvent) + Send + Sync + 'static,
    ) -> Subscription {
        self.events.subscribe(callback)
    }

    pub fn stats(&self) -> CacheStats {
        lock(&self.state).aggregates.stats()
    }

    // == Optimistic Patches ==
    /// Applies `edit` to the displayed aggregate and marks it pending.
    ///
    /// The edit runs on a copy; nothing changes if it fails. The entry's
    /// timestamp and the authoritative snapshot are left untouched.
    pub(crate) fn apply_optimistic<R>(
        &self,
        id: &str,
        edit: impl FnOnce(&mut CommunityAggregate) -> Result<R>,
    ) -> Result<R> {
        let (output, events) = {
            let mut guard = lock(&self.state);
            let state = &mut *guard;
            if state.invalid.contains(id) {
                return Err(SyncError::Invalid(id.to_string()));
            }
            let displayed = state
                .aggregates
                .get_mut(id)
                .ok_or_else(|| SyncError::Unknown(format!("community {id}")))?;

            let mut draft = displayed.clone();
            let output = edit(&mut draft)?;
            *displayed = draft.clone();
            state.pending.insert(id.to_string());

            let mut events = vec![AggregateEvent::Updated(id.to_string())];
            if state.active.as_deref() == Some(id) {
                state.current = Some(draft);
                events.push(AggregateEvent::CurrentChanged(Some(id.to_string())));
            }
            (output, events)
        };
        for event in &events {
            self.events.emit(event);
        }
        Ok(output)
    }

    /// Reverts the ordering of `scopes` to the last authoritative snapshot.
    pub(crate) fn rollback(&self, id: &str, kind: ReorderKind, scopes: &[Scope]) {
        let changed = {
            let mut guard = lock(&self.state);
            let state = &mut *guard;
            let Some(snapshot) = state.authoritative.get(id).cloned() else {
                return;
            };
            let Some(displayed) = state.aggregates.get_mut(id) else {
                return;
            };

            displayed.restore_from(&snapshot, kind, scopes);
            if *displayed == snapshot {
                state.pending.remove(id);
            }
            if state.active.as_deref() == Some(id) {
                state.current = Some(displayed.clone());
            }
            true
        };
        if changed {
            debug!(community_id = id, ?kind, "optimistic reorder rolled back");
            self.events.emit(&AggregateEvent::Updated(id.to_string()));
        }
    }

    /// Whether the displayed aggregate carries an unconfirmed patch.
    pub fn is_pending(&self, id: &str) -> bool {
        lock(&self.state).pending.contains(id)
    }

    /// Last server-derived aggregate, without optimistic patches.
    pub fn authoritative(&self, id: &str) -> Option<CommunityAggregate> {
        lock(&self.state).authoritative.get(id).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::Reply;
    use crate::sync::testing::{harness, Harness};
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn aggregate_json(name: &str) -> Value {
        json!({
            "id": "s1",
            "name": name,
            "ownerId": "owner",
            "categories": [{"id": "X", "name": "general", "orderId": 1}],
            "channels": [
                {"id": "A", "name": "a", "categoryId": "X", "orderId": 1},
                {"id": "B", "name": "b", "categoryId": "X", "orderId": 2}
            ]
        })
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }

    fn manager(h: &Harness) -> Arc<EntitySyncManager> {
        EntitySyncManager::new(h.ctx.clone())
    }

    #[tokio::test(start_paused = true)]
    async fn test_get_aggregate_is_cache_first() {
        let h = harness();
        h.transport.set("s1/community", Reply::json(aggregate_json("Server")));
        let entities = manager(&h);

        assert!(entities.get_aggregate("s1").is_none());
        settle().await;

        let aggregate = entities.get_aggregate("s1").unwrap();
        assert_eq!(aggregate.name, "Server");
        assert_eq!(h.transport.call_count("s1/community"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ttl_boundary_triggers_refresh() {
        let h = harness();
        h.transport.set("s1/community", Reply::json(aggregate_json("Server")));
        let entities = manager(&h);
        entities.refresh("s1", false).await.unwrap();
        let ttl = h.ctx.config.aggregate_ttl;

        h.clock.advance(ttl - Duration::from_millis(1));
        assert!(entities.get_aggregate("s1").is_some());
        settle().await;
        assert_eq!(h.transport.call_count("s1/community"), 1);

        h.clock.advance(Duration::from_millis(2));
        assert!(entities.get_aggregate("s1").is_some(), "stale data is still served");
        settle().await;
        assert_eq!(h.transport.call_count("s1/community"), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fatal_response_quarantines_id() {
        let h = harness();
        h.transport.set("s1/community", Reply::status(404, "community not found"));
        let entities = manager(&h);

        let err = entities.refresh("s1", false).await.unwrap_err();
        assert!(matches!(err, SyncError::Fatal(_)));
        assert!(entities.is_invalid("s1"));

        assert!(entities.get_aggregate("s1").is_none());
        settle().await;
        assert!(matches!(
            entities.refresh("s1", false).await,
            Err(SyncError::Invalid(_))
        ));
        assert_eq!(h.transport.call_count("s1/community"), 1);

        h.transport.set("s1/community", Reply::json(aggregate_json("Back")));
        entities.refresh("s1", true).await.unwrap();
        assert!(!entities.is_invalid("s1"));
        assert_eq!(entities.get_aggregate("s1").unwrap().name, "Back");
    }

    #[tokio::test(start_paused = true)]
    async fn test_malformed_payload_quarantines_id() {
        let h = harness();
        h.transport.set("s1/community", Reply::json(json!({"unexpected": true})));
        let entities = manager(&h);

        let err = entities.refresh("s1", false).await.unwrap_err();
        assert!(matches!(err, SyncError::Parse(_)));
        assert!(entities.is_invalid("s1"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_failure_keeps_previous_aggregate() {
        let h = harness();
        h.transport.set("s1/community", Reply::json(aggregate_json("Server")));
        let entities = manager(&h);
        entities.refresh("s1", false).await.unwrap();

        h.transport.set("s1/community", Reply::status(503, "service unavailable"));
        let err = entities.refresh("s1", false).await.unwrap_err();

        assert!(matches!(err, SyncError::Exhausted { .. }));
        assert!(!entities.is_invalid("s1"));
        assert_eq!(entities.get_aggregate("s1").unwrap().name, "Server");
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_refreshes_coalesce() {
        let h = harness();
        h.transport.set(
            "s1/community",
            Reply::json(aggregate_json("Server")).delayed(Duration::from_millis(100)),
        );
        let entities = manager(&h);

        let (a, b, c) = tokio::join!(
            entities.refresh("s1", false),
            entities.refresh("s1", false),
            entities.refresh("s1", false)
        );
        assert!(a.is_ok() && b.is_ok() && c.is_ok());

        // The first fetch plus one coalesced re-run
        assert_eq!(h.transport.call_count("s1/community"), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_coalesced_caller_sees_rerun_outcome() {
        let h = harness();
        h.transport.push(
            "s1/community",
            Reply::json(aggregate_json("Server")).delayed(Duration::from_millis(100)),
        );
        h.transport.set("s1/community", Reply::status(503, "service unavailable"));
        let entities = manager(&h);

        let first = tokio::spawn({
            let entities = entities.clone();
            async move { entities.refresh("s1", false).await }
        });
        settle().await;

        let second = entities.refresh("s1", false).await;
        assert!(matches!(second, Err(SyncError::Exhausted { .. })));
        assert!(h.transport.call_count("s1/community") > 1);
        assert_eq!(entities.authoritative("s1").unwrap().name, "Server");

        let first = first.await.unwrap();
        assert!(matches!(first, Err(SyncError::Exhausted { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn test_abandoned_refresh_does_not_block_later_ones() {
        let h = harness();
        h.transport.set(
            "s1/community",
            Reply::json(aggregate_json("Server")).delayed(Duration::from_millis(100)),
        );
        let entities = manager(&h);

        let abandoned =
            tokio::time::timeout(Duration::from_millis(10), entities.refresh("s1", false)).await;
        assert!(abandoned.is_err());

        entities.refresh("s1", true).await.unwrap();
        assert_eq!(entities.authoritative("s1").unwrap().name, "Server");

        tokio::time::sleep(Duration::from_millis(500)).await;
        entities.refresh("s1", false).await.unwrap();
        assert_eq!(h.transport.call_count("s1/community"), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_active_community_tracks_refreshes() {
        let h = harness();
        h.transport.push("s1/community", Reply::json(aggregate_json("First")));
        h.transport.push("s1/community", Reply::json(aggregate_json("Second")));
        let entities = manager(&h);
        let changes = Arc::new(AtomicUsize::new(0));
        let counter = changes.clone();
        let _sub = entities.subscribe(move |event| {
            if matches!(event, AggregateEvent::CurrentChanged(_)) {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        });

        entities.refresh("s1", false).await.unwrap();
        entities.set_active(Some("s1"));
        assert_eq!(entities.current().unwrap().name, "First");

        entities.refresh("s1", false).await.unwrap();
        assert_eq!(entities.current().unwrap().name, "Second");
        assert_eq!(changes.load(Ordering::SeqCst), 2);

        entities.mark_invalid("s1");
        assert!(entities.current().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_rehydrates_from_storage() {
        let h = harness();
        h.transport.set("s1/community", Reply::json(aggregate_json("Persisted")));
        manager(&h).refresh("s1", false).await.unwrap();

        h.transport.set("s1/community", Reply::status(503, "down"));
        let restarted = manager(&h);
        let aggregate = restarted.get_aggregate("s1").unwrap();
        assert_eq!(aggregate.name, "Persisted");
    }

    #[tokio::test(start_paused = true)]
    async fn test_list_communities_cached_and_normalized() {
        let h = harness();
        h.transport.set("u1/communities", Reply::json(json!(["s1", 42, ""])));
        let entities = manager(&h);

        let ids = entities.list_communities("u1").await.unwrap();
        assert_eq!(ids, vec!["s1", "42"]);
        entities.list_communities("u1").await.unwrap();
        assert_eq!(h.transport.call_count("u1/communities"), 1);

        h.clock.advance(h.ctx.config.community_list_ttl + Duration::from_millis(1));
        h.transport.set("u1/communities", Reply::status(503, "down"));
        let stale = entities.list_communities("u1").await.unwrap();
        assert_eq!(stale, vec!["s1", "42"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_clear_drops_memory_and_disk() {
        let h = harness();
        h.transport.set("s1/community", Reply::json(aggregate_json("Server")));
        let entities = manager(&h);
        entities.refresh("s1", false).await.unwrap();

        entities.clear();

        assert!(entities.authoritative("s1").is_none());
        assert!(h.store.is_empty());
        assert_eq!(entities.stats().total_entries, 0);
    }
}
