use serde::{Deserialize, Serialize};

use super::item::{now_millis, Item};

/// Item object as returned by the inventory API. Timestamps are kept as the server's
/// strings and are informational only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteItem {
    pub id: i64,
    pub user_id: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub quantity: i64,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub updated_at: Option<String>,
}

impl RemoteItem {
    /// Local row for this record owned by `owner_id`, stamped with local time.
    pub fn to_local(&self, owner_id: &str) -> Item {
        let now = now_millis();
        Item {
            id: self.id,
            owner_id: owner_id.to_string(),
            name: self.name.clone(),
            description: self.description.clone(),
            quantity: self.quantity,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Body of `POST /items`. The owner is derived server-side from the bearer token.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateItemRequest {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quantity: Option<i64>,
}

impl CreateItemRequest {
    pub fn new(name: impl Into<String>, description: Option<String>, quantity: Option<i64>) -> Self {
        Self {
            name: name.into(),
            description,
            quantity,
        }
    }
}

/// Body of `PUT /items/{id}`. Omitted fields are left unchanged by the server.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UpdateItemRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quantity: Option<i64>,
}

/// Full-record overwrite: every editable field of the item is sent.
impl From<&Item> for UpdateItemRequest {
    fn from(item: &Item) -> Self {
        Self {
            name: Some(item.name.clone()),
            description: item.description.clone(),
            quantity: Some(item.quantity),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remote_item_parses_server_shape() {
        let json = r#"{
            "id": 42,
            "user_id": "u1",
            "name": "Widget",
            "description": null,
            "quantity": 3,
            "created_at": "2024-05-01T10:30:00.000000Z",
            "updated_at": "2024-05-01T10:30:00.000000Z"
        }"#;
        let remote: RemoteItem = serde_json::from_str(json).unwrap();
        assert_eq!(remote.id, 42);
        assert_eq!(remote.user_id, "u1");
        assert_eq!(remote.description, None);
        assert_eq!(remote.quantity, 3);
    }

    #[test]
    fn test_to_local_uses_given_owner() {
        let remote = RemoteItem {
            id: 7,
            user_id: "server-echo".to_string(),
            name: "Bolt".to_string(),
            description: Some("M6".to_string()),
            quantity: 10,
            created_at: None,
            updated_at: None,
        };
        let local = remote.to_local("u1");
        assert_eq!(local.id, 7);
        assert_eq!(local.owner_id, "u1");
        assert_eq!(local.description.as_deref(), Some("M6"));
    }

    #[test]
    fn test_partial_update_omits_unset_fields() {
        let req = UpdateItemRequest {
            quantity: Some(4),
            ..Default::default()
        };
        assert_eq!(serde_json::to_value(&req).unwrap(), serde_json::json!({ "quantity": 4 }));
    }

    #[test]
    fn test_create_request_omits_null_description() {
        let req = CreateItemRequest::new("Widget", None, Some(3));
        assert_eq!(
            serde_json::to_value(&req).unwrap(),
            serde_json::json!({ "name": "Widget", "quantity": 3 })
        );
    }
}
