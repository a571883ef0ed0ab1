//! Canonical chat event types.
//!
//! Every site converts its raw payloads into these structures through the
//! remap layer (see [`crate::chat::remap`]). Keys that have no dedicated field
//! are preserved in the `extra` maps so the vocabulary stays open.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::chat::time::now_micros;

/// An image (avatar, emote, badge icon, sticker).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Image {
    pub url: String,
    /// Size identifier (`"{width}x{height}"`) or `"source"` when unknown.
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
}

impl Image {
    pub fn new(url: impl Into<String>, width: Option<u32>, height: Option<u32>) -> Self {
        let id = match (width, height) {
            (Some(w), Some(h)) => format!("{w}x{h}"),
            _ => "source".to_string(),
        };
        Self {
            url: url.into(),
            id,
            width,
            height,
        }
    }
}

/// A visual author credential.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Badge {
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub icons: Vec<Image>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// The sender of a chat event.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Author {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub images: Vec<Image>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub badges: Vec<Badge>,
    #[serde(default)]
    pub is_moderator: bool,
    #[serde(default)]
    pub is_verified: bool,
    #[serde(default)]
    pub is_owner: bool,
    #[serde(default)]
    pub is_subscriber: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub colour: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A monetary amount attached to an event (super chats, donations).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Money {
    pub text: String,
    pub amount: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub currency: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub currency_symbol: Option<String>,
}

/// A single normalized chat event.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChatEvent {
    /// Microseconds since the Unix epoch.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    pub message_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Offset from the start of the stream (replays).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_in_seconds: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub money: Option<Money>,
    #[serde(default)]
    pub author: Author,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ChatEvent {
    /// Create a bare event of the given type stamped with the current time.
    pub fn new(message_type: impl Into<String>) -> Self {
        Self {
            timestamp: Some(now_micros()),
            message_type: message_type.into(),
            ..Default::default()
        }
    }

    /// Build an event from a map of canonical keys.
    ///
    /// Keys prefixed with `author_` are nested into the author object. The
    /// result always carries a `timestamp` or a `time_in_seconds`.
    pub fn from_canonical(mut map: Map<String, Value>) -> serde_json::Result<Self> {
        nest_prefixed(&mut map, "author_", "author");
        if !map.contains_key("message_type") {
            map.insert("message_type".into(), Value::String("unknown".into()));
        }
        let mut event: ChatEvent = serde_json::from_value(Value::Object(map))?;
        event.ensure_time();
        Ok(event)
    }

    /// Whether the event passes through a `[start, end]` window on its
    /// replay offset. Events without an offset always pass.
    pub fn within(&self, start: Option<f64>, end: Option<f64>) -> bool {
        let Some(t) = self.time_in_seconds else {
            return true;
        };
        start.is_none_or(|s| t >= s) && end.is_none_or(|e| t <= e)
    }

    pub fn ensure_time(&mut self) {
        if self.timestamp.is_none() && self.time_in_seconds.is_none() {
            self.timestamp = Some(now_micros());
        }
    }

    /// Fetch an extra field as a string.
    pub fn extra_str(&self, key: &str) -> Option<&str> {
        self.extra.get(key).and_then(Value::as_str)
    }
}

/// Move every `{prefix}{key}` entry of `map` into a nested object under
/// `target`, stripping the prefix.
pub fn nest_prefixed(map: &mut Map<String, Value>, prefix: &str, target: &str) {
    let keys: Vec<String> = map
        .keys()
        .filter(|k| k.starts_with(prefix))
        .cloned()
        .collect();
    if keys.is_empty() {
        return;
    }

    let mut nested = match map.remove(target) {
        Some(Value::Object(existing)) => existing,
        _ => Map::new(),
    };
    for key in keys {
        if let Some(value) = map.remove(&key) {
            nested.insert(key[prefix.len()..].to_string(), value);
        }
    }
    map.insert(target.to_string(), Value::Object(nested));
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_from_canonical_nests_author() {
        let map = json!({
            "message_id": "abc",
            "message_type": "text_message",
            "message": "hello",
            "timestamp": 1_600_000_000_000_000i64,
            "author_id": "u1",
            "author_name": "alice",
            "author_is_moderator": true,
            "author_pronouns": "they/them",
            "channel_id": "c1",
        });
        let event = ChatEvent::from_canonical(map.as_object().unwrap().clone()).unwrap();

        assert_eq!(event.message_id.as_deref(), Some("abc"));
        assert_eq!(event.author.id, "u1");
        assert_eq!(event.author.name, "alice");
        assert!(event.author.is_moderator);
        assert_eq!(event.author.extra.get("pronouns"), Some(&json!("they/them")));
        assert_eq!(event.extra_str("channel_id"), Some("c1"));
    }

    #[test]
    fn test_from_canonical_fills_missing_time() {
        let map = json!({ "message_type": "ban_user" });
        let event = ChatEvent::from_canonical(map.as_object().unwrap().clone()).unwrap();
        assert!(event.timestamp.is_some());
    }

    #[test]
    fn test_within_window() {
        let mut event = ChatEvent::new("text_message");
        event.time_in_seconds = Some(25.0);
        assert!(event.within(Some(20.0), Some(40.0)));
        assert!(!event.within(Some(30.0), None));
        assert!(!event.within(None, Some(10.0)));

        event.time_in_seconds = None;
        assert!(event.within(Some(30.0), Some(40.0)));
    }

    #[test]
    fn test_image_id_from_size() {
        assert_eq!(Image::new("u", Some(32), Some(32)).id, "32x32");
        assert_eq!(Image::new("u", None, None).id, "source");
    }
}
