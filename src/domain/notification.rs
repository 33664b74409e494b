use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Canonical notification message handed to the Push Dispatcher.
///
/// The HTTP boundary accepts two body shapes (a webhook envelope with a
/// `record` key, or this struct as a flat body) and normalizes both into this
/// type before any component logic runs. The outbox poller serializes the
/// same type when invoking the dispatcher, omitting the fields it does not
/// carry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Uuid>,
    pub user_id: Uuid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub body: String,
    /// Finer-grained than `channel`; drives title derivation first.
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub notification_type: Option<String>,
    #[serde(default)]
    pub channel: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub room_id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub post_id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender_id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}
