//! Community aggregate: metadata, categories and channels.
//!
//! Also holds the reorder arithmetic used for optimistic drag-and-drop.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::error::{Result, SyncError};

/// Ids arrive as strings or numbers; both normalize to a string. Null and
/// the empty string normalize to `None`.
pub fn normalize_id(value: Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn deserialize_id<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<String, D::Error> {
    normalize_id(Value::deserialize(deserializer)?)
        .ok_or_else(|| serde::de::Error::custom("id must be a non-empty string or number"))
}

fn deserialize_optional_id<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> std::result::Result<Option<String>, D::Error> {
    Ok(normalize_id(Value::deserialize(deserializer)?))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Category {
    #[serde(deserialize_with = "deserialize_id")]
    pub id: String,
    pub name: String,
    pub order_id: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Channel {
    #[serde(deserialize_with = "deserialize_id")]
    pub id: String,
    pub name: String,
    #[serde(default, deserialize_with = "deserialize_optional_id")]
    pub category_id: Option<String>,
    pub order_id: u32,
}

/// Parent scope of an orderable item.
///
/// Categories and uncategorized channels live at the community root.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Scope {
    Root,
    Category(String),
}

impl Scope {
    pub fn category_id(&self) -> Option<&str> {
        match self {
            Scope::Root => None,
            Scope::Category(id) => Some(id),
        }
    }
}

/// What a drag moves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ReorderKind {
    Category,
    Channel,
}

/// Where a moved item landed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Placement {
    pub scope: Scope,
    pub order_id: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommunityAggregate {
    #[serde(deserialize_with = "deserialize_id")]
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub icon: Option<String>,
    #[serde(deserialize_with = "deserialize_id")]
    pub owner_id: String,
    #[serde(default)]
    pub categories: Vec<Category>,
    #[serde(default)]
    pub channels: Vec<Channel>,
}

impl CommunityAggregate {
    pub fn category(&self, id: &str) -> Option<&Category> {
        self.categories.iter().find(|c| c.id == id)
    }

    pub fn channel(&self, id: &str) -> Option<&Channel> {
        self.channels.iter().find(|c| c.id == id)
    }

    /// Display scope of a channel: a `category_id` with no matching
    /// category counts as uncategorized.
    pub fn channel_scope(&self, channel: &Channel) -> Scope {
        match &channel.category_id {
            Some(id) if self.category(id).is_some() => Scope::Category(id.clone()),
            _ => Scope::Root,
        }
    }

    /// Categories by `order_id`.
    pub fn sorted_categories(&self) -> Vec<&Category> {
        let mut categories: Vec<&Category> = self.categories.iter().collect();
        categories.sort_by_key(|c| c.order_id);
        categories
    }

    /// Channels displayed in `scope`, by `order_id`.
    pub fn channels_in(&self, scope: &Scope) -> Vec<&Channel> {
        let mut channels: Vec<&Channel> = self
            .channels
            .iter()
            .filter(|c| &self.channel_scope(c) == scope)
            .collect();
        channels.sort_by_key(|c| c.order_id);
        channels
    }

    fn channel_ids_in(&self, scope: &Scope) -> Vec<String> {
        self.channels_in(scope).into_iter().map(|c| c.id.clone()).collect()
    }

    fn renumber_channels(&mut self, ordered: &[String]) {
        for (position, id) in ordered.iter().enumerate() {
            if let Some(channel) = self.channels.iter_mut().find(|c| &c.id == id) {
                channel.order_id = position as u32 + 1;
            }
        }
    }

    /// Moves a channel to `new_index` within `to`, renumbering both affected
    /// scopes to 1..N.
    pub fn move_channel(
        &mut self,
        channel_id: &str,
        from: &Scope,
        to: &Scope,
        new_index: usize,
    ) -> Result<Placement> {
        let channel = self
            .channel(channel_id)
            .ok_or_else(|| SyncError::Unknown(format!("channel {channel_id}")))?;
        let actual = self.channel_scope(channel);
        if &actual != from {
            return Err(SyncError::InvalidMove(format!(
                "channel {channel_id} is in {actual:?}, not {from:?}"
            )));
        }
        if let Scope::Category(id) = to {
            if self.category(id).is_none() {
                return Err(SyncError::InvalidMove(format!("unknown category {id}")));
            }
        }

        let mut source: Vec<String> = self.channel_ids_in(from);
        source.retain(|id| id != channel_id);

        let mut target = if from == to {
            source.clone()
        } else {
            self.channel_ids_in(to)
        };
        let index = new_index.min(target.len());
        target.insert(index, channel_id.to_string());

        if from != to {
            if let Some(channel) = self.channels.iter_mut().find(|c| c.id == channel_id) {
                channel.category_id = to.category_id().map(str::to_string);
            }
            self.renumber_channels(&source);
        }
        self.renumber_channels(&target);

        Ok(Placement {
            scope: to.clone(),
            order_id: index as u32 + 1,
        })
    }

    /// Moves a category to `new_index`, renumbering all categories to 1..N.
    pub fn move_category(&mut self, category_id: &str, new_index: usize) -> Result<Placement> {
        if self.category(category_id).is_none() {
            return Err(SyncError::Unknown(format!("category {category_id}")));
        }

        let mut ordered: Vec<String> = self
            .sorted_categories()
            .into_iter()
            .map(|c| c.id.clone())
            .filter(|id| id != category_id)
            .collect();
        let index = new_index.min(ordered.len());
        ordered.insert(index, category_id.to_string());

        for (position, id) in ordered.iter().enumerate() {
            if let Some(category) = self.categories.iter_mut().find(|c| &c.id == id) {
                category.order_id = position as u32 + 1;
            }
        }

        Ok(Placement {
            scope: Scope::Root,
            order_id: index as u32 + 1,
        })
    }

    /// Dispatches on `kind`. Categories only move within [`Scope::Root`].
    pub fn move_item(
        &mut self,
        kind: ReorderKind,
        id: &str,
        from: &Scope,
        to: &Scope,
        new_index: usize,
    ) -> Result<Placement> {
        match kind {
            ReorderKind::Channel => self.move_channel(id, from, to, new_index),
            ReorderKind::Category if from == &Scope::Root && to == &Scope::Root => {
                self.move_category(id, new_index)
            }
            ReorderKind::Category => Err(SyncError::InvalidMove(
                "categories can only move within the community root".to_string(),
            )),
        }
    }

    /// Copies ordering of the items in `scopes` back from `snapshot`.
    ///
    /// Channels that were displayed in an affected scope in either version get
    /// their `category_id` and `order_id` restored; categories are restored
    /// wholesale when `kind` is [`ReorderKind::Category`].
    pub fn restore_from(&mut self, snapshot: &CommunityAggregate, kind: ReorderKind, scopes: &[Scope]) {
        match kind {
            ReorderKind::Category => {
                for category in &mut self.categories {
                    if let Some(original) = snapshot.category(&category.id) {
                        category.order_id = original.order_id;
                    }
                }
            }
            ReorderKind::Channel => {
                let affected: Vec<String> = self
                    .channels
                    .iter()
                    .filter(|c| {
                        let in_display = scopes.contains(&self.channel_scope(c));
                        let in_snapshot = snapshot
                            .channel(&c.id)
                            .is_some_and(|s| scopes.contains(&snapshot.channel_scope(s)));
                        in_display || in_snapshot
                    })
                    .map(|c| c.id.clone())
                    .collect();

                for channel in &mut self.channels {
                    if !affected.contains(&channel.id) {
                        continue;
                    }
                    if let Some(original) = snapshot.channel(&channel.id) {
                        channel.category_id = original.category_id.clone();
                        channel.order_id = original.order_id;
                    }
                }
            }
        }
    }
}
