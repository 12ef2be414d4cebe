//! User profile records.

use serde::{Deserialize, Serialize};

/// Base profile fields as the profile endpoints return them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileRecord {
    pub id: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub pfp: Option<String>,
}

/// Cached profile: base fields plus the optional enriched primary name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Profile {
    pub id: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub pfp: Option<String>,
    #[serde(default)]
    pub primary_name: Option<String>,
    /// When the base fields were fetched (Unix milliseconds)
    pub timestamp: u64,
}

impl Profile {
    pub fn from_record(record: ProfileRecord, primary_name: Option<String>, timestamp: u64) -> Self {
        Self {
            id: record.id,
            username: record.username,
            pfp: record.pfp,
            primary_name,
            timestamp,
        }
    }

    /// Best label for display: primary name, then username, then id.
    pub fn display_name(&self) -> &str {
        self.primary_name
            .as_deref()
            .or(self.username.as_deref())
            .unwrap_or(&self.id)
    }
}

/// Payload of the primary-name endpoint.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrimaryNameRecord {
    #[serde(default)]
    pub primary_name: Option<String>,
}
