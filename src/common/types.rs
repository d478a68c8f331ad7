use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Domain model for one chat message.
///
/// Field names on the wire are camelCase to match the broadcast payload the
/// web clients exchange. The avatar is resolved locally and never sent.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub id: String,
    pub user_id: String,
    #[serde(default)]
    pub email: Option<String>,
    pub text: String,
    /// Epoch milliseconds.
    pub ts: i64,
    #[serde(default, skip_serializing)]
    pub avatar_url: Option<String>,
}

/// Row shape of the durable `messages` table.
///
/// The database assigns `id` (an integer or uuid depending on the schema),
/// so it is normalized to an opaque string here.
#[derive(Debug, Clone, Deserialize)]
pub struct MessageRow {
    #[serde(deserialize_with = "opaque_id")]
    pub id: String,
    #[serde(default)]
    pub user_id: String,
    #[serde(default)]
    pub email: Option<String>,
    pub text: String,
    pub created_at: String,
}

impl MessageRow {
    pub fn into_message(self) -> ChatMessage {
        let ts = match DateTime::parse_from_rfc3339(&self.created_at) {
            Ok(parsed) => parsed.timestamp_millis(),
            Err(err) => {
                log::warn!("Unparseable created_at `{}`: {err}", self.created_at);
                0
            }
        };

        ChatMessage {
            id: self.id,
            user_id: self.user_id,
            email: self.email,
            text: self.text,
            ts,
            avatar_url: None,
        }
    }
}

fn opaque_id<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    match value {
        Value::String(id) => Ok(id),
        Value::Number(id) => Ok(id.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "unsupported id value: {other}"
        ))),
    }
}

/// One live connection announced on the room channel.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PresenceEntry {
    pub online_at: String,
}

/// Presence snapshot: userId -> one entry per open connection, so the same
/// user with two tabs appears once with two entries.
pub type PresenceState = HashMap<String, Vec<PresenceEntry>>;

/// Fresh client-side message id.
pub fn generate_message_id() -> String {
    Uuid::new_v4().to_string()
}

pub fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn row_converts_rfc3339_to_epoch_ms() {
        let row = MessageRow {
            id: "42".into(),
            user_id: "u1".into(),
            email: Some("a@example.com".into()),
            text: "hi".into(),
            created_at: "2026-01-02T03:04:05.678Z".into(),
        };
        let msg = row.into_message();
        assert_eq!(msg.id, "42");
        assert_eq!(msg.ts, 1767323045678);
        assert!(msg.avatar_url.is_none());
    }

    #[test]
    fn row_accepts_numeric_ids() {
        let row: MessageRow = serde_json::from_value(serde_json::json!({
            "id": 7,
            "user_id": "u1",
            "email": null,
            "text": "hello",
            "created_at": "2026-01-02T03:04:05Z",
        }))
        .unwrap();
        assert_eq!(row.id, "7");
    }

    #[test]
    fn broadcast_payload_uses_camel_case_and_omits_avatar() {
        let msg = ChatMessage {
            id: "m1".into(),
            user_id: "u1".into(),
            email: Some("a@example.com".into()),
            text: "hi".into(),
            ts: 1000,
            avatar_url: Some("unsent".into()),
        };
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value["userId"], "u1");
        assert!(value.get("avatarUrl").is_none());

        let back: ChatMessage = serde_json::from_value(value).unwrap();
        assert_eq!(back.id, "m1");
        assert!(back.avatar_url.is_none());
    }
}
