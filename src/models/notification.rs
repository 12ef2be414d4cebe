//! Notification feed records and platform alerts.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    /// Globally unique, immutable
    pub id: String,
    pub recipient_id: String,
    pub community_id: String,
    pub channel_id: String,
    pub author_id: String,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub is_read: bool,
}

impl Notification {
    pub fn matches(&self, community_id: Option<&str>, channel_id: Option<&str>) -> bool {
        community_id.map_or(true, |c| self.community_id == c)
            && channel_id.map_or(true, |c| self.channel_id == c)
    }
}

/// What the platform side-channel is asked to show.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlatformAlert {
    /// One alert per notification
    Message {
        community_id: String,
        channel_id: String,
        author_id: String,
        content: String,
    },
    /// Several arrivals for one community in one poll
    Summary { community_id: String, count: usize },
}
