//! Member list registry
//!
//! Per-community member lists behind a stricter rate limiter than the other
//! managers. Concurrent fetches for one community share a single remote call.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use futures_util::future::{BoxFuture, FutureExt, Shared};
use tracing::{debug, info, warn};

use crate::cache::{CacheEntry, CacheStats, ScopedEntry, TtlMap};
use crate::error::{Result, SyncError};
use crate::models::Member;
use crate::remote::CallOptions;
use crate::storage::keys;
use crate::sync::{lock, SyncContext};

type SharedFetch = Shared<BoxFuture<'static, Result<Vec<Member>>>>;

/// Attempt bookkeeping for one community. Never reset during a session.
#[derive(Debug, Clone, Copy)]
struct Attempts {
    count: u32,
    last_ms: u64,
}

struct MemberState {
    lists: TtlMap<Vec<Member>>,
    in_flight: HashMap<String, SharedFetch>,
    attempts: HashMap<String, Attempts>,
    hydrated: HashSet<String>,
}

pub struct MemberRegistry {
    ctx: SyncContext,
    state: Mutex<MemberState>,
}

impl MemberRegistry {
    pub fn new(ctx: SyncContext) -> Arc<Self> {
        let state = MemberState {
            lists: TtlMap::new(ctx.config.member_ttl),
            in_flight: HashMap::new(),
            attempts: HashMap::new(),
            hydrated: HashSet::new(),
        };
        Arc::new(Self {
            ctx,
            state: Mutex::new(state),
        })
    }

    fn hydrate(&self, state: &mut MemberState, community_id: &str) {
        if !state.hydrated.insert(community_id.to_string()) || state.lists.contains(community_id) {
            return;
        }
        let persisted: Option<ScopedEntry<Vec<Member>>> =
            self.ctx.persistence.load(&keys::members(community_id));
        let Some(scoped) = persisted else {
            return;
        };
        match scoped.into_entry_for(community_id) {
            Some(entry) => {
                debug!(community_id, members = entry.data.len(), "member list rehydrated");
                state.lists.insert_entry(community_id, entry);
            }
            None => warn!(community_id, "ignoring member list stored for another community"),
        }
    }

    /// Member list for a community.
    ///
    /// A fresh cache entry is returned without a network call. Otherwise the
    /// list is refreshed (joining any fetch already running); if that fails,
    /// whatever is cached, even stale, is returned instead.
    pub async fn get_members(self: &Arc<Self>, community_id: &str) -> Option<Vec<Member>> {
        {
            let mut state = lock(&self.state);
            self.hydrate(&mut state, community_id);
            let now = self.ctx.now();
            if let Some(members) = state.lists.get_fresh(community_id, now) {
                return Some(members.clone());
            }
        }

        match self.refresh(community_id).await {
            Ok(members) => Some(members),
            Err(e) => {
                debug!(community_id, error = %e, "member refresh failed, serving cache");
                lock(&self.state)
                    .lists
                    .get_stale(community_id)
                    .map(|entry| entry.data.clone())
            }
        }
    }

    /// Fetches the member list, replacing the cached one on success.
    ///
    /// A call made while a fetch is running awaits that fetch and is not
    /// counted as an attempt. Fails with [`SyncError::RateLimited`] once three
    /// attempts have been made and the last one is under the minimum interval
    /// old.
    pub async fn refresh(self: &Arc<Self>, community_id: &str) -> Result<Vec<Member>> {
        let fetch = {
            let mut state = lock(&self.state);
            match state.in_flight.get(community_id) {
                Some(running) => {
                    debug!(community_id, "joining in-flight member fetch");
                    running.clone()
                }
                None => {
                    let now = self.ctx.now();
                    self.charge_attempt(&mut state, community_id, now)?;
                    let fetch = self.start_fetch(community_id);
                    state.in_flight.insert(community_id.to_string(), fetch.clone());
                    fetch
                }
            }
        };
        fetch.await
    }

    fn charge_attempt(&self, state: &mut MemberState, community_id: &str, now: u64) -> Result<()> {
        let max = self.ctx.config.member_max_attempts;
        let interval_ms = self.ctx.config.member_min_interval.as_millis() as u64;

        let attempts = state
            .attempts
            .entry(community_id.to_string())
            .or_insert(Attempts { count: 0, last_ms: 0 });
        let elapsed = now.saturating_sub(attempts.last_ms);
        if attempts.count >= max && elapsed < interval_ms {
            warn!(community_id, attempts = attempts.count, elapsed_ms = elapsed, "member fetch rate limited");
            return Err(SyncError::RateLimited(format!(
                "members of {community_id}: retry in {}ms",
                interval_ms - elapsed
            )));
        }

        attempts.count += 1;
        attempts.last_ms = now;
        Ok(())
    }

    fn start_fetch(self: &Arc<Self>, community_id: &str) -> SharedFetch {
        let this = Arc::clone(self);
        let id = community_id.to_string();
        let handle = tokio::spawn(async move {
            let outcome = this.fetch(&id).await;
            this.commit(&id, outcome)
        });

        async move {
            handle
                .await
                .unwrap_or_else(|e| Err(SyncError::Transient(format!("member fetch task failed: {e}"))))
        }
        .boxed()
        .shared()
    }

    async fn fetch(&self, community_id: &str) -> Result<Vec<Member>> {
        let value = self
            .ctx
            .remote
            .call(&format!("{community_id}/members"), CallOptions::get())
            .await?;
        Ok(serde_json::from_value(value)?)
    }

    fn commit(&self, community_id: &str, outcome: Result<Vec<Member>>) -> Result<Vec<Member>> {
        let mut state = lock(&self.state);
        state.in_flight.remove(community_id);

        match outcome {
            Ok(members) => {
                let entry = CacheEntry::new(members.clone(), self.ctx.now());
                self.ctx.persistence.save(
                    &keys::members(community_id),
                    &ScopedEntry::new(community_id, entry.clone()),
                );
                state.lists.insert_entry(community_id, entry);
                debug!(community_id, members = members.len(), "member list refreshed");
                Ok(members)
            }
            Err(e) if e.is_fatal() && !matches!(e, SyncError::Parse(_)) => {
                info!(community_id, error = %e, "member list gone, purging cache");
                state.lists.remove(community_id);
                self.ctx.persistence.remove(&keys::members(community_id));
                Err(e)
            }
            Err(e) => Err(e),
        }
    }

    /// Patches one member's nickname in place without touching the remote.
    ///
    /// Returns `false` when the list or the member is not cached.
    pub fn update_nickname(&self, community_id: &str, member_id: &str, nickname: Option<String>) -> bool {
        let mut state = lock(&self.state);
        self.hydrate(&mut state, community_id);

        let Some(members) = state.lists.get_mut(community_id) else {
            return false;
        };
        let Some(member) = members.iter_mut().find(|m| m.id == member_id) else {
            return false;
        };
        member.nickname = nickname;

        if let Some(entry) = state.lists.get_any(community_id) {
            self.ctx.persistence.save(
                &keys::members(community_id),
                &ScopedEntry::new(community_id, entry.clone()),
            );
        }
        true
    }

    /// Cached list without triggering a fetch.
    pub fn cached(&self, community_id: &str) -> Option<Vec<Member>> {
        let mut state = lock(&self.state);
        self.hydrate(&mut state, community_id);
        state.lists.get_any(community_id).map(|entry| entry.data.clone())
    }

    pub fn stats(&self) -> CacheStats {
        lock(&self.state).lists.stats()
    }
}
