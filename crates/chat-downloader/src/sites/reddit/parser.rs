//! Reddit comment payloads into chat events.

use std::sync::LazyLock;

use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::chat::event::ChatEvent;
use crate::chat::filter::MessageGroups;
use crate::chat::params::SiteDefaults;
use crate::chat::remap::{Remap, RemapTable, non_empty, seconds_to_micros, to_bool, to_int};
use crate::chat::time::seconds_to_time;

pub static MESSAGE_GROUPS: MessageGroups = MessageGroups::new(&[
    ("messages", &["comment"]),
    ("deleted_messages", &["delete_comment", "remove_comment"]),
    ("scores", &["update_comment_score"]),
]);

pub static DEFAULTS: SiteDefaults = SiteDefaults::new(&MESSAGE_GROUPS, &["messages"]);

static COMMENT_REMAP: LazyLock<RemapTable> = LazyLock::new(|| {
    RemapTable::new(&[
        ("_id36", Remap::to("message_id")),
        ("id", Remap::to("message_id")),
        ("name", Remap::to("fullname")),
        ("body", Remap::with("message", non_empty)),
        ("created_utc", Remap::with("timestamp", seconds_to_micros)),
        ("author", Remap::to("author_name")),
        ("author_fullname", Remap::to("author_id")),
        ("author_flair_text", Remap::with("author_flair_text", non_empty)),
        ("author_flair_background_color", Remap::with("author_colour", non_empty)),
        ("is_submitter", Remap::with("author_is_owner", to_bool)),
        ("distinguished", Remap::to("distinguished")),
        ("score", Remap::with("score", to_int)),
        ("permalink", Remap::to("permalink")),
        ("link_id", Remap::to("post_id")),
        ("parent_id", Remap::to("parent_id")),
        ("stickied", Remap::with("is_stickied", to_bool)),
        ("comment_fullname", Remap::to("fullname")),
    ])
});

/// Websocket message types and the event type each becomes.
fn live_type(kind: &str) -> Option<&'static str> {
    Some(match kind {
        "new_comment" => "comment",
        "delete_comment" => "delete_comment",
        "remove_comment" => "remove_comment",
        "update_comment_score" => "update_comment_score",
        _ => return None,
    })
}

fn build(mut map: Map<String, Value>, message_type: &str) -> Option<ChatEvent> {
    if map.get("author_name").and_then(Value::as_str) == Some("[deleted]") {
        map.remove("author_name");
    }
    if map.get("distinguished").and_then(Value::as_str) == Some("moderator") {
        map.insert("author_is_moderator".into(), Value::Bool(true));
    }
    map.insert("message_type".into(), Value::String(message_type.into()));
    match ChatEvent::from_canonical(map) {
        Ok(event) => Some(event),
        Err(e) => {
            warn!(error = %e, "Failed to build chat event from Reddit comment");
            None
        }
    }
}

/// Convert one live-comments websocket frame.
pub fn parse_live_message(text: &str) -> Option<ChatEvent> {
    let frame: Value = match serde_json::from_str(text) {
        Ok(frame) => frame,
        Err(e) => {
            debug!(error = %e, "Ignoring non-JSON websocket frame");
            return None;
        }
    };
    let kind = frame.get("type").and_then(Value::as_str).unwrap_or_default();
    let Some(message_type) = live_type(kind) else {
        debug!(kind, "Unknown Reddit live message type");
        return None;
    };
    let payload = frame.get("payload").and_then(Value::as_object)?;
    build(COMMENT_REMAP.remap_object(payload), message_type)
}

/// Convert a comment from the `api/info` listing. `start` is the broadcast
/// start in seconds since the epoch and anchors `time_in_seconds`.
pub fn parse_comment(data: &Map<String, Value>, start: Option<f64>) -> Option<ChatEvent> {
    let mut map = COMMENT_REMAP.remap_object(data);
    if let (Some(created), Some(start)) = (data.get("created_utc").and_then(Value::as_f64), start) {
        let offset = created - start;
        map.insert("time_in_seconds".into(), Value::from(offset));
        map.insert("time_text".into(), Value::String(seconds_to_time(offset)));
    }
    build(map, "comment")
}
