//! Request bodies sent to the remote service
//!
//! Defines the JSON shape of every write and bulk read.

use serde::Serialize;

/// Body of `profiles/bulk`.
#[derive(Debug, Clone, Serialize)]
pub struct BulkProfilesRequest {
    pub ids: Vec<String>,
}

/// Body of `{user}/notifications/read`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MarkReadRequest {
    pub community_id: String,
    pub channel_id: String,
}

/// Body of `{community}/channels/reorder` and `{community}/categories/reorder`.
///
/// `category_id` is the moved item's new parent; always null for categories.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReorderRequest {
    pub id: String,
    pub category_id: Option<String>,
    pub order_id: u32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_reorder_request_serialize() {
        let body = ReorderRequest {
            id: "c3".to_string(),
            category_id: Some("X".to_string()),
            order_id: 1,
        };
        assert_eq!(
            serde_json::to_value(&body).unwrap(),
            json!({"id": "c3", "categoryId": "X", "orderId": 1})
        );
    }

    #[test]
    fn test_mark_read_request_serialize() {
        let body = MarkReadRequest {
            community_id: "s1".to_string(),
            channel_id: "c1".to_string(),
        };
        assert_eq!(
            serde_json::to_value(&body).unwrap(),
            json!({"communityId": "s1", "channelId": "c1"})
        );
    }
}
