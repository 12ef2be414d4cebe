//! Notification center
//!
//! Polls each user's notification feed, drops anything already seen (in
//! memory or in the persisted seen-id ledger), and fans new arrivals out to
//! subscribers and the platform side-channel.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex};

use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::cache::{CacheEntry, CacheStats, ScopedEntry, SeenLedger, TtlMap};
use crate::error::Result;
use crate::models::{MarkReadRequest, Notification, PlatformAlert};
use crate::remote::CallOptions;
use crate::storage::keys;
use crate::sync::{lock, Subscribers, Subscription, SyncContext};
use crate::tasks::spawn_poll_task;

/// Platform notification side-channel (OS toasts, push, ...).
pub trait PlatformNotifier: Send + Sync {
    fn notify(&self, alert: &PlatformAlert);
}

/// Side-channel that only writes alerts to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl PlatformNotifier for LogNotifier {
    fn notify(&self, alert: &PlatformAlert) {
        match alert {
            PlatformAlert::Message {
                community_id,
                channel_id,
                author_id,
                content,
            } => info!(%community_id, %channel_id, %author_id, %content, "new message"),
            PlatformAlert::Summary { community_id, count } => {
                info!(%community_id, count, "new messages")
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum NotificationEvent {
    /// New notifications for a user, newest first
    Arrived {
        user_id: String,
        notifications: Vec<Notification>,
    },
    /// Records flipped to read by [`NotificationCenter::mark_read`]
    Read {
        user_id: String,
        community_id: String,
        channel_id: String,
        count: usize,
    },
}

struct FeedState {
    feeds: TtlMap<Vec<Notification>>,
    in_flight: HashSet<String>,
    last_attempt: HashMap<String, u64>,
    seen: SeenLedger,
    /// Platform alerts enabled per user; absent means enabled
    platform_enabled: HashMap<String, bool>,
    pollers: HashMap<String, JoinHandle<()>>,
    hydrated: HashSet<String>,
}

pub struct NotificationCenter {
    ctx: SyncContext,
    state: Mutex<FeedState>,
    events: Subscribers<NotificationEvent>,
    notifier: Arc<dyn PlatformNotifier>,
}

impl NotificationCenter {
    pub fn new(ctx: SyncContext, notifier: Arc<dyn PlatformNotifier>) -> Arc<Self> {
        let seen_ids: Vec<String> = ctx
            .persistence
            .load(&keys::seen_notifications())
            .unwrap_or_default();
        let platform_enabled: HashMap<String, bool> = ctx
            .persistence
            .load(&keys::notification_prefs())
            .unwrap_or_default();
        debug!(seen = seen_ids.len(), "seen-notification ledger loaded");

        let state = FeedState {
            feeds: TtlMap::new(ctx.config.notification_ttl),
            in_flight: HashSet::new(),
            last_attempt: HashMap::new(),
            seen: SeenLedger::from_ids(seen_ids, ctx.config.seen_ledger_capacity),
            platform_enabled,
            pollers: HashMap::new(),
            hydrated: HashSet::new(),
        };
        Arc::new(Self {
            ctx,
            state: Mutex::new(state),
            events: Subscribers::new(),
            notifier,
        })
    }

    fn hydrate(&self, state: &mut FeedState, user_id: &str) {
        if !state.hydrated.insert(user_id.to_string()) || state.feeds.contains(user_id) {
            return;
        }
        let persisted: Option<ScopedEntry<Vec<Notification>>> =
            self.ctx.persistence.load(&keys::notifications(user_id));
        match persisted.map(|scoped| scoped.into_entry_for(user_id)) {
            Some(Some(entry)) => state.feeds.insert_entry(user_id, entry),
            Some(None) => warn!(user_id, "ignoring notification feed stored for another user"),
            None => {}
        }
    }

    // == Get Notifications ==
    /// Cached feed for `user_id`, newest first; empty when nothing is cached.
    ///
    /// When the cached feed is missing or past its TTL a fetch is spawned.
    /// Must be called within a tokio runtime.
    pub fn get_notifications(self: &Arc<Self>, user_id: &str) -> Vec<Notification> {
        let (cached, stale) = {
            let mut state = lock(&self.state);
            self.hydrate(&mut state, user_id);
            let now = self.ctx.now();
            let fresh = state.feeds.get_fresh(user_id, now).cloned();
            match fresh {
                Some(feed) => (feed, false),
                None => {
                    let stale = state.feeds.get_stale(user_id).map(|entry| entry.data.clone());
                    (stale.unwrap_or_default(), true)
                }
            }
        };

        if stale {
            let this = Arc::clone(self);
            let user_id = user_id.to_string();
            tokio::spawn(async move {
                if let Err(e) = this.fetch(&user_id).await {
                    debug!(user_id = %user_id, error = %e, "background notification fetch failed");
                }
            });
        }
        cached
    }

    // == Fetch ==
    /// Fetches the feed and merges anything new into the cache.
    ///
    /// Skipped while a fetch for the user is running or within the minimum
    /// poll interval of the last one; the cached feed is then returned as is,
    /// `Some(vec![])` for a cached empty feed and `None` when nothing has been
    /// cached yet.
    pub async fn fetch(&self, user_id: &str) -> Result<Option<Vec<Notification>>> {
        let _in_flight = {
            let mut state = lock(&self.state);
            self.hydrate(&mut state, user_id);
            let now = self.ctx.now();
            let min_interval = self.ctx.config.poll_min_interval.as_millis() as u64;
            let too_soon = state
                .last_attempt
                .get(user_id)
                .is_some_and(|last| now.saturating_sub(*last) < min_interval);

            if state.in_flight.contains(user_id) || too_soon {
                debug!(user_id, "notification fetch skipped");
                return Ok(state.feeds.get_any(user_id).map(|entry| entry.data.clone()));
            }
            state.in_flight.insert(user_id.to_string());
            state.last_attempt.insert(user_id.to_string(), now);
            InFlightGuard {
                state: &self.state,
                user_id,
            }
        };

        let value = self
            .ctx
            .remote
            .call(&format!("{user_id}/notifications"), CallOptions::get())
            .await?;
        let incoming: Vec<Notification> = serde_json::from_value(value)?;

        let (feed, arrived, platform_enabled) = self.merge(user_id, incoming);
        if !arrived.is_empty() {
            info!(user_id, new = arrived.len(), "notifications arrived");
            self.events.emit(&NotificationEvent::Arrived {
                user_id: user_id.to_string(),
                notifications: arrived.clone(),
            });
            if platform_enabled {
                for alert in alerts_for(&arrived, self.ctx.config.summary_threshold) {
                    self.notifier.notify(&alert);
                }
            }
        }
        Ok(Some(feed))
    }

    /// Adds unseen notifications to the feed. Returns the new feed, the
    /// arrivals, and whether platform alerts are enabled for the user.
    fn merge(&self, user_id: &str, incoming: Vec<Notification>) -> (Vec<Notification>, Vec<Notification>, bool) {
        let now = self.ctx.now();
        let mut guard = lock(&self.state);
        let state = &mut *guard;

        let mut feed = state
            .feeds
            .get_any(user_id)
            .map(|entry| entry.data.clone())
            .unwrap_or_default();
        let mut known: HashSet<String> = feed.iter().map(|n| n.id.clone()).collect();

        let mut arrived = Vec::new();
        for mut notification in incoming {
            if state.seen.contains(&notification.id) || !known.insert(notification.id.clone()) {
                continue;
            }
            notification.is_read = false;
            state.seen.record(notification.id.clone());
            arrived.push(notification);
        }

        feed.extend(arrived.iter().cloned());
        feed.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        feed.truncate(self.ctx.config.max_notifications);
        arrived.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));

        let entry = CacheEntry::new(feed.clone(), now);
        self.ctx.persistence.save(
            &keys::notifications(user_id),
            &ScopedEntry::new(user_id, entry.clone()),
        );
        if !arrived.is_empty() {
            self.ctx
                .persistence
                .save(&keys::seen_notifications(), &state.seen.ids());
        }
        state.feeds.insert_entry(user_id, entry);

        let enabled = state.platform_enabled.get(user_id).copied().unwrap_or(true);
        (feed, arrived, enabled)
    }

    // == Mark Read ==
    /// Marks a channel read remotely, then flips every matching local record.
    pub async fn mark_read(&self, community_id: &str, channel_id: &str, user_id: &str) -> Result<()> {
        let body = serde_json::to_value(MarkReadRequest {
            community_id: community_id.to_string(),
            channel_id: channel_id.to_string(),
        })?;
        self.ctx
            .remote
            .call(
                &format!("{user_id}/notifications/read"),
                CallOptions::write(body, self.ctx.signer.clone()),
            )
            .await?;

        let count = {
            let mut state = lock(&self.state);
            self.hydrate(&mut state, user_id);
            let mut count = 0;
            if let Some(feed) = state.feeds.get_mut(user_id) {
                for notification in feed.iter_mut() {
                    if notification.matches(Some(community_id), Some(channel_id)) && !notification.is_read {
                        notification.is_read = true;
                        count += 1;
                    }
                }
            }
            if let Some(entry) = state.feeds.get_any(user_id) {
                self.ctx.persistence.save(
                    &keys::notifications(user_id),
                    &ScopedEntry::new(user_id, entry.clone()),
                );
            }
            count
        };

        debug!(user_id, community_id, channel_id, count, "notifications marked read");
        self.events.emit(&NotificationEvent::Read {
            user_id: user_id.to_string(),
            community_id: community_id.to_string(),
            channel_id: channel_id.to_string(),
            count,
        });
        Ok(())
    }

    /// Unread notifications for a user, optionally narrowed to a community
    /// and channel.
    pub fn unread_count(&self, user_id: &str, community_id: Option<&str>, channel_id: Option<&str>) -> usize {
        let mut state = lock(&self.state);
        self.hydrate(&mut state, user_id);
        state.feeds.get_any(user_id).map_or(0, |entry| {
            entry
                .data
                .iter()
                .filter(|n| !n.is_read && n.matches(community_id, channel_id))
                .count()
        })
    }

    // == Polling ==
    /// Starts polling the user's feed every poll period. No-op if already
    /// polling.
    pub fn start_polling(self: &Arc<Self>, user_id: &str) {
        let mut state = lock(&self.state);
        if state.pollers.get(user_id).is_some_and(|handle| !handle.is_finished()) {
            return;
        }
        let handle = spawn_poll_task(Arc::clone(self), user_id.to_string(), self.ctx.config.poll_period);
        state.pollers.insert(user_id.to_string(), handle);
    }

    pub fn stop_polling(&self, user_id: &str) {
        if let Some(handle) = lock(&self.state).pollers.remove(user_id) {
            handle.abort();
            info!(user_id, "notification polling stopped");
        }
    }

    pub fn is_polling(&self, user_id: &str) -> bool {
        lock(&self.state)
            .pollers
            .get(user_id)
            .is_some_and(|handle| !handle.is_finished())
    }

    // == Preferences ==
    pub fn set_platform_enabled(&self, user_id: &str, enabled: bool) {
        let mut state = lock(&self.state);
        state.platform_enabled.insert(user_id.to_string(), enabled);
        self.ctx
            .persistence
            .save(&keys::notification_prefs(), &state.platform_enabled);
    }

    pub fn platform_enabled(&self, user_id: &str) -> bool {
        lock(&self.state)
            .platform_enabled
            .get(user_id)
            .copied()
            .unwrap_or(true)
    }

    pub fn stats(&self) -> CacheStats {
        lock(&self.state).feeds.stats()
    }

    pub fn subscribe(
        &self,
        callback: impl Fn(&NotificationEvent) + Send + Sync + 'static,
    ) -> Subscription {
        self.events.subscribe(callback)
    }
}

/// Clears a user's in-flight marker when the fetch holding it ends, including
/// when the fetching task is aborted mid-call.
struct InFlightGuard<'a> {
    state: &'a Mutex<FeedState>,
    user_id: &'a str,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        lock(self.state).in_flight.remove(self.user_id);
    }
}

/// One summary per community with more than `threshold` arrivals, one
/// message alert per notification otherwise.
fn alerts_for(arrived: &[Notification], threshold: usize) -> Vec<PlatformAlert> {
    let mut by_community: BTreeMap<&str, Vec<&Notification>> = BTreeMap::new();
    for notification in arrived {
        by_community
            .entry(notification.community_id.as_str())
            .or_default()
            .push(notification);
    }

    let mut alerts = Vec::new();
    for (community_id, group) in by_community {
        if group.len() > threshold {
            alerts.push(PlatformAlert::Summary {
                community_id: community_id.to_string(),
                count: group.len(),
            });
            continue;
        }
        alerts.extend(group.into_iter().map(|n| PlatformAlert::Message {
            community_id: n.community_id.clone(),
            channel_id: n.channel_id.clone(),
            author_id: n.author_id.clone(),
            content: n.content.clone(),
        }));
    }
    alerts
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SyncError;
    use crate::remote::Reply;
    use crate::storage::PersistentStore;
    use crate::sync::testing::harness;
    use serde_json::{json, Value};
    use std::time::Duration;

    /// Collects alerts instead of showing them.
    #[derive(Default)]
    struct RecordingNotifier {
        alerts: Mutex<Vec<PlatformAlert>>,
    }

    impl PlatformNotifier for RecordingNotifier {
        fn notify(&self, alert: &PlatformAlert) {
            lock(&self.alerts).push(alert.clone());
        }
    }

    fn note(id: &str, community: &str, minute: u32) -> Value {
        json!({
            "id": id,
            "recipientId": "u1",
            "communityId": community,
            "channelId": "general",
            "authorId": "u2",
            "content": format!("message {id}"),
            "timestamp": format!("2024-05-01T12:{minute:02}:00Z"),
            "isRead": false
        })
    }

    fn new_center(h: &crate::sync::testing::Harness) -> (Arc<NotificationCenter>, Arc<RecordingNotifier>) {
        let notifier = Arc::new(RecordingNotifier::default());
        (NotificationCenter::new(h.ctx.clone(), notifier.clone()), notifier)
    }

    #[tokio::test(start_paused = true)]
    async fn test_repeated_ids_are_stored_once() {
        let h = harness();
        let (center, _) = new_center(&h);
        h.transport
            .push("u1/notifications", Reply::json(json!([note("n1", "s1", 1), note("n2", "s1", 2)])));
        h.transport.push(
            "u1/notifications",
            Reply::json(json!([note("n1", "s1", 1), note("n2", "s1", 2), note("n3", "s1", 3)])),
        );

        center.fetch("u1").await.unwrap();
        assert_eq!(center.unread_count("u1", None, None), 2);

        h.clock.advance(h.ctx.config.poll_min_interval);
        let feed = center.fetch("u1").await.unwrap().unwrap();

        let ids: Vec<&str> = feed.iter().map(|n| n.id.as_str()).collect();
        assert_eq!(ids, vec!["n3", "n2", "n1"]);
        assert_eq!(center.unread_count("u1", None, None), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fetch_within_interval_is_skipped() {
        let h = harness();
        let (center, _) = new_center(&h);
        h.transport.set("u1/notifications", Reply::json(json!([])));

        let first = center.fetch("u1").await.unwrap();
        let second = center.fetch("u1").await.unwrap();

        assert_eq!(first, Some(Vec::new()));
        assert_eq!(second, Some(Vec::new()), "cached empty feed is returned as such");
        assert_eq!(h.transport.call_count("u1/notifications"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_skipped_fetch_without_cache_returns_none() {
        let h = harness();
        let (center, _) = new_center(&h);
        h.transport.set(
            "u1/notifications",
            Reply::json(json!([])).delayed(Duration::from_millis(100)),
        );

        let running = tokio::spawn({
            let center = center.clone();
            async move { center.fetch("u1").await }
        });
        tokio::time::sleep(Duration::from_millis(1)).await;

        assert_eq!(center.fetch("u1").await.unwrap(), None);
        assert_eq!(running.await.unwrap().unwrap(), Some(Vec::new()));
        assert_eq!(h.transport.call_count("u1/notifications"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_seen_ledger_survives_restart() {
        let h = harness();
        h.transport.set("u1/notifications", Reply::json(json!([note("n1", "s1", 1)])));
        let (first, _) = new_center(&h);
        first.fetch("u1").await.unwrap();
        h.store.delete(&keys::notifications("u1")).unwrap();

        let (restarted, notifier) = new_center(&h);
        let feed = restarted.fetch("u1").await.unwrap().unwrap();

        assert!(feed.is_empty());
        assert!(lock(&notifier.alerts).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_burst_is_summarized_per_community() {
        let h = harness();
        let (center, notifier) = new_center(&h);
        let mut batch: Vec<Value> = (0..4).map(|i| note(&format!("a{i}"), "s1", i)).collect();
        batch.push(note("b0", "s2", 10));
        h.transport.set("u1/notifications", Reply::json(Value::Array(batch)));

        center.fetch("u1").await.unwrap();

        let alerts = lock(&notifier.alerts).clone();
        assert_eq!(alerts.len(), 2);
        assert_eq!(
            alerts[0],
            PlatformAlert::Summary {
                community_id: "s1".to_string(),
                count: 4
            }
        );
        assert!(matches!(&alerts[1], PlatformAlert::Message { community_id, .. } if community_id == "s2"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_disabled_platform_alerts_still_notify_subscribers() {
        let h = harness();
        let (center, notifier) = new_center(&h);
        h.transport.set("u1/notifications", Reply::json(json!([note("n1", "s1", 1)])));
        center.set_platform_enabled("u1", false);
        let arrivals = Arc::new(Mutex::new(0usize));
        let counter = arrivals.clone();
        let _sub = center.subscribe(move |event| {
            if let NotificationEvent::Arrived { notifications, .. } = event {
                *lock(&counter) += notifications.len();
            }
        });

        center.fetch("u1").await.unwrap();

        assert_eq!(*lock(&arrivals), 1);
        assert!(lock(&notifier.alerts).is_empty());
        let (restarted, _) = new_center(&h);
        assert!(!restarted.platform_enabled("u1"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_mark_read_flips_matching_records() {
        let h = harness();
        let (center, _) = new_center(&h);
        let mut other = note("n3", "s1", 3);
        other["channelId"] = json!("random");
        h.transport.set(
            "u1/notifications",
            Reply::json(json!([note("n1", "s1", 1), note("n2", "s1", 2), other])),
        );
        h.transport.set("u1/notifications/read", Reply::json(json!({"ok": true})));
        center.fetch("u1").await.unwrap();

        center.mark_read("s1", "general", "u1").await.unwrap();

        assert_eq!(center.unread_count("u1", Some("s1"), Some("general")), 0);
        assert_eq!(center.unread_count("u1", Some("s1"), None), 1);
        let calls = h.transport.calls();
        let write = calls.iter().find(|c| c.path == "u1/notifications/read").unwrap();
        assert_eq!(write.body, Some(json!({"communityId": "s1", "channelId": "general"})));
        assert!(write.signature.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_mark_read_failure_leaves_records_unread() {
        let h = harness();
        let (center, _) = new_center(&h);
        h.transport.set("u1/notifications", Reply::json(json!([note("n1", "s1", 1)])));
        h.transport.set("u1/notifications/read", Reply::status(403, "forbidden"));
        center.fetch("u1").await.unwrap();

        let err = center.mark_read("s1", "general", "u1").await.unwrap_err();

        assert!(matches!(err, SyncError::Fatal(_)));
        assert_eq!(center.unread_count("u1", None, None), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retained_history_is_capped() {
        let mut config = crate::config::SyncConfig::default();
        config.max_notifications = 2;
        let h = crate::sync::testing::harness_with(config);
        let (center, _) = new_center(&h);
        h.transport.set(
            "u1/notifications",
            Reply::json(json!([note("n1", "s1", 1), note("n2", "s1", 2), note("n3", "s1", 3)])),
        );

        let feed = center.fetch("u1").await.unwrap().unwrap();

        let ids: Vec<&str> = feed.iter().map(|n| n.id.as_str()).collect();
        assert_eq!(ids, vec!["n3", "n2"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_get_notifications_is_cache_first() {
        let h = harness();
        let (center, _) = new_center(&h);
        h.transport.set("u1/notifications", Reply::json(json!([note("n1", "s1", 1)])));

        assert!(center.get_notifications("u1").is_empty());
        tokio::time::sleep(Duration::from_millis(1)).await;

        assert_eq!(center.get_notifications("u1").len(), 1);
        assert_eq!(h.transport.call_count("u1/notifications"), 1);
    }
}
