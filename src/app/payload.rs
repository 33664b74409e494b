use std::collections::BTreeMap;

use crate::domain::notification::PushRequest;

/// Fallback display/title string when nothing better is known.
pub const APP_NAME: &str = "DeConnect";

/// Click-action marker the mobile client routes on.
pub const CLICK_ACTION: &str = "FLUTTER_NOTIFICATION_CLICK";

/// Platform-agnostic envelope for one logical notification, built once per
/// dispatch call and sent to every eligible device.
#[derive(Debug, Clone)]
pub struct PushPayload {
    pub title: String,
    pub body: String,
    pub channel_id: &'static str,
    /// Grouping key for the platform: room id, else post id, else channel.
    pub thread_key: String,
    pub data: BTreeMap<String, String>,
}

/// Strip ASCII control characters and collapse CR/LF/TAB into single spaces,
/// then trim. Malformed strings would otherwise break JSON encoding in the
/// push backend payload. Idempotent.
pub fn sanitize(input: &str) -> String {
    let unified = input.replace("\r\n", " ");
    let cleaned: String = unified
        .chars()
        .filter_map(|c| match c {
            '\r' | '\n' | '\t' => Some(' '),
            c if c.is_ascii_control() => None,
            c => Some(c),
        })
        .collect();
    cleaned.trim().to_string()
}

/// Title used when the notification carries no explicit title. The type takes
/// precedence over the channel.
pub fn default_title(channel: &str, notification_type: Option<&str>, sender_name: &str) -> String {
    match notification_type {
        Some("comment_reply") => return format!("{} replied to your comment", sender_name),
        Some("comment_mention") => return format!("{} mentioned you in a comment", sender_name),
        Some("chat_mention") => return format!("{} mentioned you", sender_name),
        Some("new_post") => return format!("{} posted something new", sender_name),
        _ => {}
    }

    match channel {
        "direct_message" => sender_name.to_string(),
        "group_message" => format!("{} in group", sender_name),
        "post" => format!("{} posted", sender_name),
        "comment" => format!("{} commented", sender_name),
        "like" => format!("{} liked your post", sender_name),
        "feed" => sender_name.to_string(),
        _ => APP_NAME.to_string(),
    }
}

/// Logical channel to Android notification channel, many-to-one. Unknown
/// channels land in the general-purpose channel.
pub fn android_channel_id(channel: &str) -> &'static str {
    match channel {
        "direct_message" => "dm_channel",
        "group_message" | "chat_mention" => "group_channel",
        "post" => "post_channel",
        "comment" | "comment_reply" | "comment_mention" => "comment_channel",
        _ => "general_channel",
    }
}

pub fn build(request: &PushRequest, sender_name: &str) -> PushPayload {
    let channel = if request.channel.is_empty() {
        "general"
    } else {
        request.channel.as_str()
    };
    let notification_type = request.notification_type.as_deref();

    let explicit_title = request.title.as_deref().map(sanitize).unwrap_or_default();
    let title = if explicit_title.is_empty() {
        default_title(channel, notification_type, sender_name)
    } else {
        explicit_title
    };
    let body = sanitize(&request.body);

    // Deep-link routing data; absent ids are omitted, never emitted as null.
    let mut data = BTreeMap::new();
    data.insert("channel".to_string(), channel.to_string());
    data.insert(
        "type".to_string(),
        notification_type.unwrap_or(channel).to_string(),
    );
    data.insert("click_action".to_string(), CLICK_ACTION.to_string());
    if let Some(room_id) = request.room_id {
        data.insert("room_id".to_string(), room_id.to_string());
    }
    if let Some(post_id) = request.post_id {
        data.insert("post_id".to_string(), post_id.to_string());
    }
    if let Some(sender_id) = request.sender_id {
        data.insert("sender_id".to_string(), sender_id.to_string());
    }
    if let Some(message_id) = request.message_id {
        data.insert("message_id".to_string(), message_id.to_string());
    }
    if let Some(id) = request.id {
        data.insert("notification_id".to_string(), id.to_string());
    }

    let thread_key = request
        .room_id
        .map(|id| id.to_string())
        .or_else(|| request.post_id.map(|id| id.to_string()))
        .unwrap_or_else(|| channel.to_string());

    PushPayload {
        title,
        body,
        channel_id: android_channel_id(channel),
        thread_key,
        data,
    }
}
