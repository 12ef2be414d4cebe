//! Configuration Module
//!
//! Handles loading and managing sync core configuration from environment variables.

use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Sync core configuration parameters.
///
/// Every TTL, limit and interval used by the managers lives here so tests can
/// shrink them. Only the transport-facing values are read from the environment.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Equivalent backend endpoints, tried in order
    pub endpoints: Vec<String>,
    /// Hard timeout raced against every remote call
    pub call_timeout: Duration,
    /// Retry ceiling per logical remote operation
    pub max_attempts: u32,
    /// First backoff delay
    pub retry_base_delay: Duration,
    /// Backoff growth factor per attempt
    pub retry_factor: f64,

    /// Soft TTL of a community aggregate
    pub aggregate_ttl: Duration,
    /// TTL of a user's community id list
    pub community_list_ttl: Duration,

    /// TTL of a community member list
    pub member_ttl: Duration,
    /// Attempts allowed per community before the interval applies
    pub member_max_attempts: u32,
    /// Minimum gap between member fetches once the attempt budget is spent
    pub member_min_interval: Duration,

    /// TTL of a base profile
    pub profile_ttl: Duration,
    /// TTL of a resolved (or confirmed absent) primary name
    pub primary_name_ttl: Duration,
    /// Minimum gap between single-profile fetches for one id
    pub profile_min_interval: Duration,
    /// Delay before a queued profile batch is flushed
    pub profile_batch_delay: Duration,
    /// Batch ceiling that forces an early flush
    pub profile_batch_size: usize,

    /// TTL of a cached notification feed
    pub notification_ttl: Duration,
    /// Minimum gap between notification fetches for one user
    pub poll_min_interval: Duration,
    /// Period of the background polling task
    pub poll_period: Duration,
    /// Maximum notifications retained per user
    pub max_notifications: usize,
    /// Seen-id ledger capacity
    pub seen_ledger_capacity: usize,
    /// Arrivals per community above which a single summary is raised
    pub summary_threshold: usize,

    /// Window in which reorder refreshes collapse into one
    pub reorder_debounce: Duration,

    /// Directory for the file-backed store
    pub data_dir: Option<PathBuf>,
    /// User whose notifications the binary polls
    pub user_id: Option<String>,
}

impl SyncConfig {
    /// Creates a new SyncConfig by loading values from environment variables.
    ///
    /// # Environment Variables
    /// - `SYNC_ENDPOINTS` - Comma-separated endpoint list (default: `http://localhost:8080`)
    /// - `SYNC_CALL_TIMEOUT_MS` - Per-call timeout (default: 10000)
    /// - `SYNC_MAX_ATTEMPTS` - Retry ceiling (default: 5)
    /// - `SYNC_RETRY_BASE_MS` - First backoff delay (default: 1000)
    /// - `SYNC_POLL_INTERVAL_MS` - Notification polling period (default: 10000)
    /// - `SYNC_MAX_NOTIFICATIONS` - Retained notifications per user (default: 100)
    /// - `SYNC_DATA_DIR` - Directory for persisted state (default: none)
    /// - `SYNC_USER_ID` - User to poll notifications for (default: none)
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let endpoints = env::var("SYNC_ENDPOINTS")
            .ok()
            .map(|v| parse_endpoints(&v))
            .filter(|list| !list.is_empty())
            .unwrap_or(defaults.endpoints.clone());

        Self {
            endpoints,
            call_timeout: Duration::from_millis(env_or(
                "SYNC_CALL_TIMEOUT_MS",
                defaults.call_timeout.as_millis() as u64,
            )),
            max_attempts: env_or("SYNC_MAX_ATTEMPTS", defaults.max_attempts),
            retry_base_delay: Duration::from_millis(env_or(
                "SYNC_RETRY_BASE_MS",
                defaults.retry_base_delay.as_millis() as u64,
            )),
            poll_period: Duration::from_millis(env_or(
                "SYNC_POLL_INTERVAL_MS",
                defaults.poll_period.as_millis() as u64,
            )),
            max_notifications: env_or("SYNC_MAX_NOTIFICATIONS", defaults.max_notifications),
            data_dir: env::var("SYNC_DATA_DIR").ok().map(PathBuf::from),
            user_id: env::var("SYNC_USER_ID").ok().filter(|v| !v.is_empty()),
            ..defaults
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            endpoints: vec!["http://localhost:8080".to_string()],
            call_timeout: Duration::from_secs(10),
            max_attempts: 5,
            retry_base_delay: Duration::from_secs(1),
            retry_factor: 1.5,
            aggregate_ttl: Duration::from_secs(24 * 60 * 60),
            community_list_ttl: Duration::from_secs(15 * 60),
            member_ttl: Duration::from_secs(10 * 60),
            member_max_attempts: 3,
            member_min_interval: Duration::from_secs(60),
            profile_ttl: Duration::from_secs(15 * 60),
            primary_name_ttl: Duration::from_secs(30 * 60),
            profile_min_interval: Duration::from_secs(5),
            profile_batch_delay: Duration::from_millis(50),
            profile_batch_size: 50,
            notification_ttl: Duration::from_secs(10),
            poll_min_interval: Duration::from_secs(4),
            poll_period: Duration::from_secs(10),
            max_notifications: 100,
            seen_ledger_capacity: 1000,
            summary_threshold: 3,
            reorder_debounce: Duration::from_millis(200),
            data_dir: None,
            user_id: None,
        }
    }
}

fn env_or<T: FromStr>(name: &str, default: T) -> T {
    env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn parse_endpoints(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().trim_end_matches('/').to_string())
        .filter(|s| !s.is_empty())
        .collect()
}
