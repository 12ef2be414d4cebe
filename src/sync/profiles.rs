//! Profile registry
//!
//! Per-user profiles with three ways in: a throttled single fetch, a bulk
//! fetch, and a micro-batching queue that feeds the bulk endpoint. Once base
//! fields are known, the primary name is resolved in the background.
//!
//! All cache writes go through [`ProfileRegistry::commit`], which persists
//! the record and notifies subscribers.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use futures_util::future::{BoxFuture, FutureExt, Shared};
use tracing::{debug, trace, warn};

use crate::cache::{CacheEntry, CacheStats, TtlMap};
use crate::error::{Result, SyncError};
use crate::models::{BulkProfilesRequest, PrimaryNameRecord, Profile, ProfileRecord};
use crate::remote::CallOptions;
use crate::storage::keys;
use crate::sync::{lock, Subscribers, Subscription, SyncContext};

type SharedFetch = Shared<BoxFuture<'static, Result<Profile>>>;

struct ProfileState {
    profiles: TtlMap<Profile>,
    /// Resolved primary names; `None` means the user has none
    names: TtlMap<Option<String>>,
    last_attempt: HashMap<String, u64>,
    in_flight: HashMap<String, SharedFetch>,
    /// Ids waiting for the next batch, in arrival order
    queued: Vec<String>,
    flush_scheduled: bool,
    enriching: HashSet<String>,
    hydrated: HashSet<String>,
}

pub struct ProfileRegistry {
    ctx: SyncContext,
    state: Mutex<ProfileState>,
    events: Subscribers<Profile>,
}

impl ProfileRegistry {
    pub fn new(ctx: SyncContext) -> Arc<Self> {
        let state = ProfileState {
            profiles: TtlMap::new(ctx.config.profile_ttl),
            names: TtlMap::new(ctx.config.primary_name_ttl),
            last_attempt: HashMap::new(),
            in_flight: HashMap::new(),
            queued: Vec::new(),
            flush_scheduled: false,
            enriching: HashSet::new(),
            hydrated: HashSet::new(),
        };
        Arc::new(Self {
            ctx,
            state: Mutex::new(state),
            events: Subscribers::new(),
        })
    }

    fn hydrate(&self, state: &mut ProfileState, user_id: &str) {
        if !state.hydrated.insert(user_id.to_string()) || state.profiles.contains(user_id) {
            return;
        }
        let persisted: Option<CacheEntry<Profile>> = self.ctx.persistence.load(&keys::profile(user_id));
        if let Some(entry) = persisted {
            trace!(user_id, "profile rehydrated");
            state.profiles.insert_entry(user_id, entry);
        }
    }

    // == Single Fetch ==
    /// Profile for `user_id`.
    ///
    /// Fresh cache hits return immediately unless `force_refresh` is set.
    /// Fetches for one id are deduplicated and at most one starts per
    /// minimum interval; a throttled call returns the cached entry even if
    /// expired, or [`SyncError::RateLimited`] when nothing is cached.
    pub async fn get_profile(self: &Arc<Self>, user_id: &str, force_refresh: bool) -> Result<Profile> {
        let fetch = {
            let mut state = lock(&self.state);
            self.hydrate(&mut state, user_id);
            let now = self.ctx.now();

            if !force_refresh {
                if let Some(profile) = state.profiles.get_fresh(user_id, now) {
                    return Ok(profile.clone());
                }
            }

            match state.in_flight.get(user_id) {
                Some(running) => running.clone(),
                None => {
                    let min_interval = self.ctx.config.profile_min_interval.as_millis() as u64;
                    let throttled = state
                        .last_attempt
                        .get(user_id)
                        .is_some_and(|last| now.saturating_sub(*last) < min_interval);
                    if throttled {
                        debug!(user_id, "profile fetch throttled");
                        return state
                            .profiles
                            .get_stale(user_id)
                            .map(|entry| entry.data.clone())
                            .ok_or_else(|| SyncError::RateLimited(format!("profile {user_id}")));
                    }

                    state.last_attempt.insert(user_id.to_string(), now);
                    let fetch = self.start_fetch(user_id);
                    state.in_flight.insert(user_id.to_string(), fetch.clone());
                    fetch
                }
            }
        };
        fetch.await
    }

    fn start_fetch(self: &Arc<Self>, user_id: &str) -> SharedFetch {
        let this = Arc::clone(self);
        let id = user_id.to_string();
        let handle = tokio::spawn(async move {
            let outcome = this.fetch_single(&id).await;
            lock(&this.state).in_flight.remove(&id);
            outcome
        });

        async move {
            handle
                .await
                .unwrap_or_else(|e| Err(SyncError::Transient(format!("profile fetch task failed: {e}"))))
        }
        .boxed()
        .shared()
    }

    async fn fetch_single(self: &Arc<Self>, user_id: &str) -> Result<Profile> {
        let value = self
            .ctx
            .remote
            .call(&format!("{user_id}/profile"), CallOptions::get())
            .await?;
        if value.is_null() {
            return Err(SyncError::Fatal(format!("profile {user_id} does not exist")));
        }
        let record: ProfileRecord = serde_json::from_value(value)?;

        let profile = self.build(record);
        self.commit(vec![profile.clone()]);
        self.spawn_enrichment(vec![profile.id.clone()]);
        Ok(profile)
    }

    /// Combines base fields with whatever primary name is already known.
    fn build(&self, record: ProfileRecord) -> Profile {
        let now = self.ctx.now();
        let state = lock(&self.state);
        let primary_name = match state.names.get_any(&record.id) {
            Some(entry) => entry.data.clone(),
            None => state
                .profiles
                .get_any(&record.id)
                .and_then(|entry| entry.data.primary_name.clone()),
        };
        Profile::from_record(record, primary_name, now)
    }

    // == Bulk Fetch ==
    /// Profiles for `user_ids`, in request order.
    ///
    /// Ids with a fresh cache entry are served locally; the rest go to the
    /// bulk endpoint in chunks of the batch size. Ids the service does not
    /// know are left out of the result.
    pub async fn get_bulk(self: &Arc<Self>, user_ids: &[String]) -> Result<Vec<Profile>> {
        let mut requested: Vec<String> = Vec::with_capacity(user_ids.len());
        for id in user_ids {
            if !requested.contains(id) {
                requested.push(id.clone());
            }
        }

        let missing: Vec<String> = {
            let mut state = lock(&self.state);
            let now = self.ctx.now();
            let mut missing = Vec::new();
            for id in &requested {
                self.hydrate(&mut state, id);
                if !state.profiles.is_fresh(id, now) {
                    missing.push(id.clone());
                }
            }
            missing
        };

        let mut fetched: HashMap<String, Profile> = HashMap::new();
        for chunk in missing.chunks(self.ctx.config.profile_batch_size.max(1)) {
            let body = serde_json::to_value(BulkProfilesRequest { ids: chunk.to_vec() })?;
            let value = self
                .ctx
                .remote
                .call("profiles/bulk", CallOptions::post(body))
                .await?;
            let records: Vec<ProfileRecord> = serde_json::from_value(value)?;
            debug!(requested = chunk.len(), received = records.len(), "bulk profiles fetched");

            let profiles: Vec<Profile> = records.into_iter().map(|r| self.build(r)).collect();
            self.commit(profiles.clone());
            self.spawn_enrichment(profiles.iter().map(|p| p.id.clone()).collect());
            fetched.extend(profiles.into_iter().map(|p| (p.id.clone(), p)));
        }

        let state = lock(&self.state);
        Ok(requested
            .iter()
            .filter_map(|id| {
                fetched
                    .get(id)
                    .cloned()
                    .or_else(|| state.profiles.get_any(id).map(|entry| entry.data.clone()))
            })
            .collect())
    }

    // == Queue ==
    /// Adds `user_id` to the next bulk batch.
    ///
    /// The batch flushes after the batch delay, or right away when it reaches
    /// the batch size. Fresh and already queued ids are ignored.
    pub fn queue(self: &Arc<Self>, user_id: &str) {
        let flush_in = {
            let mut state = lock(&self.state);
            self.hydrate(&mut state, user_id);
            let now = self.ctx.now();
            if state.profiles.is_fresh(user_id, now) || state.queued.iter().any(|id| id == user_id) {
                return;
            }
            state.queued.push(user_id.to_string());

            if state.queued.len() == self.ctx.config.profile_batch_size {
                state.flush_scheduled = true;
                Some(std::time::Duration::ZERO)
            } else if !state.flush_scheduled {
                state.flush_scheduled = true;
                Some(self.ctx.config.profile_batch_delay)
            } else {
                None
            }
        };

        if let Some(delay) = flush_in {
            self.schedule_flush(delay);
        }
    }

    fn schedule_flush(self: &Arc<Self>, delay: std::time::Duration) {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            this.flush().await;
        });
    }

    async fn flush(self: &Arc<Self>) {
        let (batch, leftover) = {
            let mut state = lock(&self.state);
            let take = state.queued.len().min(self.ctx.config.profile_batch_size.max(1));
            let batch: Vec<String> = state.queued.drain(..take).collect();
            let leftover = !state.queued.is_empty();
            state.flush_scheduled = leftover;
            (batch, leftover)
        };

        if leftover {
            self.schedule_flush(self.ctx.config.profile_batch_delay);
        }
        if batch.is_empty() {
            return;
        }

        trace!(count = batch.len(), "flushing queued profiles");
        if let Err(e) = self.get_bulk(&batch).await {
            warn!(count = batch.len(), error = %e, "queued profile batch failed");
        }
    }

    // == Enrichment ==
    /// Resolves primary names for `user_ids` that have none cached. Best
    /// effort: failures are logged and the base profile stays as is.
    fn spawn_enrichment(self: &Arc<Self>, user_ids: Vec<String>) {
        let pending: Vec<String> = {
            let mut guard = lock(&self.state);
            let state = &mut *guard;
            let now = self.ctx.now();
            user_ids
                .into_iter()
                .filter(|id| !state.names.is_fresh(id, now))
                .filter(|id| state.enriching.insert(id.clone()))
                .collect()
        };
        if pending.is_empty() {
            return;
        }

        let this = Arc::clone(self);
        tokio::spawn(async move {
            for user_id in pending {
                let outcome = this
                    .ctx
                    .remote
                    .call(&format!("{user_id}/primary-name"), CallOptions::get())
                    .await
                    .and_then(|value| {
                        if value.is_null() {
                            return Ok(PrimaryNameRecord::default());
                        }
                        Ok(serde_json::from_value::<PrimaryNameRecord>(value)?)
                    });

                match outcome {
                    Ok(record) => this.apply_primary_name(&user_id, record.primary_name),
                    Err(e) => {
                        warn!(user_id = %user_id, error = %e, "primary name lookup failed");
                        lock(&this.state).enriching.remove(&user_id);
                    }
                }
            }
        });
    }

    fn apply_primary_name(&self, user_id: &str, primary_name: Option<String>) {
        let updated = {
            let mut state = lock(&self.state);
            state.enriching.remove(user_id);
            state.names.insert(user_id, primary_name.clone(), self.ctx.now());
            state
                .profiles
                .get_any(user_id)
                .filter(|entry| entry.data.primary_name != primary_name)
                .map(|entry| Profile {
                    primary_name,
                    ..entry.data.clone()
                })
        };
        if let Some(profile) = updated {
            self.commit(vec![profile]);
        }
    }

    // == Mutation Point ==
    /// Stores `profiles` under their own timestamps, persists them, and
    /// notifies subscribers once the lock is released.
    fn commit(&self, profiles: Vec<Profile>) {
        {
            let mut state = lock(&self.state);
            for profile in &profiles {
                let entry = CacheEntry::new(profile.clone(), profile.timestamp);
                self.ctx.persistence.save(&keys::profile(&profile.id), &entry);
                state.profiles.insert_entry(profile.id.clone(), entry);
            }
        }
        for profile in &profiles {
            self.events.emit(profile);
        }
    }

    /// Registers `callback` for every committed profile change.
    pub fn subscribe(&self, callback: impl Fn(&Profile) + Send + Sync + 'static) -> Subscription {
        self.events.subscribe(callback)
    }

    /// Cached profile without triggering a fetch.
    pub fn cached(&self, user_id: &str) -> Option<Profile> {
        let mut state = lock(&self.state);
        self.hydrate(&mut state, user_id);
        state.profiles.get_any(user_id).map(|entry| entry.data.clone())
    }

    pub fn stats(&self) -> CacheStats {
        lock(&self.state).profiles.stats()
    }
}
