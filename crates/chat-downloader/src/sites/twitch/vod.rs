//! Past broadcast (VOD) chat through the GraphQL comments query.

use std::sync::Arc;

use async_stream::stream;
use serde_json::{Map, Value, json};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::chat::event::ChatEvent;
use crate::chat::handle::ChatStream;
use crate::chat::params::ResolvedParams;
use crate::chat::retry::with_retries;
use crate::chat::session::Http;
use crate::chat::time::{rfc3339_to_micros, seconds_to_time};
use crate::error::{ChatError, Result};
use crate::sites::twitch::badges::BadgeCache;
use crate::sites::twitch::parser::parse_emotes_from_fragments;
use crate::utils::json_str;

const COMMENTS_HASH: &str = "b70a3591ff0f4e0313d126c6a1502d79a1c02baebb288227c582044aa76adf6a";

/// Build a persisted query request body.
pub fn persisted_query(operation: &str, hash: &str, variables: Value) -> Value {
    json!({
        "operationName": operation,
        "extensions": {
            "persistedQuery": {
                "version": 1,
                "sha256Hash": hash,
            }
        },
        "variables": variables,
    })
}

/// The GraphQL endpoint answers with either an object or a one-element
/// array; return the `data` object either way.
pub fn gql_data(response: Value) -> Result<Value> {
    let response = match response {
        Value::Array(mut items) if !items.is_empty() => items.swap_remove(0),
        other => other,
    };
    if let Some(message) = response.pointer("/errors/0/message").and_then(Value::as_str) {
        return Err(ChatError::parsing(format!("twitch gql error: {message}")));
    }
    response
        .get("data")
        .cloned()
        .ok_or_else(|| ChatError::parsing("twitch gql response without data"))
}

/// One page of VOD comments.
#[derive(Debug, Default)]
pub struct CommentPage {
    pub comments: Vec<Value>,
    pub cursor: Option<String>,
    pub has_next_page: bool,
}

impl CommentPage {
    pub fn from_data(data: &Value) -> Result<Self> {
        let comments = data
            .pointer("/video/comments")
            .ok_or_else(|| ChatError::VideoUnavailable("video has no comments".into()))?;
        let edges = comments
            .get("edges")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        let cursor = edges
            .last()
            .and_then(|e| e.get("cursor"))
            .and_then(Value::as_str)
            .map(String::from);
        let has_next_page = comments
            .pointer("/pageInfo/hasNextPage")
            .and_then(Value::as_bool)
            .unwrap_or(false);
        Ok(Self {
            comments: edges.into_iter().filter_map(|mut e| e.get_mut("node").map(Value::take)).collect(),
            cursor,
            has_next_page,
        })
    }
}

/// Convert a comment node into an event.
pub fn parse_comment(node: &Value) -> Option<ChatEvent> {
    let mut map = Map::new();
    let mut insert = |key: &str, value: Option<Value>| {
        if let Some(value) = value {
            map.insert(key.to_string(), value);
        }
    };
    let str_at = |path: &[&str]| json_str(node, path).map(|s| Value::String(s.to_string()));

    insert("message_id", str_at(&["id"]));
    insert("author_id", str_at(&["commenter", "id"]));
    insert("author_name", str_at(&["commenter", "login"]));
    insert("author_display_name", str_at(&["commenter", "displayName"]));
    insert("author_colour", str_at(&["message", "userColor"]));
    insert("timestamp", json_str(node, &["createdAt"]).and_then(rfc3339_to_micros).map(Value::from));

    let offset = node.get("contentOffsetSeconds").and_then(Value::as_f64);
    insert("time_in_seconds", offset.map(Value::from));
    insert("time_text", offset.map(|o| Value::String(seconds_to_time(o))));

    let fragments = node
        .pointer("/message/fragments")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default();
    let text: String = fragments
        .iter()
        .filter_map(|f| f.get("text").and_then(Value::as_str))
        .collect();
    insert("message", (!text.is_empty()).then(|| Value::String(text)));
    let emotes = parse_emotes_from_fragments(fragments);
    insert("emotes", (!emotes.is_empty()).then(|| Value::Array(emotes)));

    let badges: Vec<Value> = node
        .pointer("/message/userBadges")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(|b| {
            let name = b.get("setID")?.as_str()?;
            let version = b.get("version")?.as_str()?;
            Some(json!({ "title": name, "name": name, "version": version }))
        })
        .collect();
    insert("author_badges", (!badges.is_empty()).then(|| Value::Array(badges)));
    insert("message_type", Some(Value::String("text_message".into())));

    match ChatEvent::from_canonical(map) {
        Ok(event) => Some(event),
        Err(e) => {
            warn!(error = %e, "Failed to build chat event from VOD comment");
            None
        }
    }
}

pub struct VodFeed {
    pub http: Http,
    pub gql_url: String,
    pub video_id: String,
    /// Channel id of the video owner, for channel badges.
    pub channel_id: Option<String>,
    pub badges: Arc<BadgeCache>,
    pub params: ResolvedParams,
    pub token: CancellationToken,
}

impl VodFeed {
    async fn fetch(&self, cursor: Option<&str>) -> Result<CommentPage> {
        let variables = match cursor {
            Some(cursor) => json!({ "videoID": self.video_id, "cursor": cursor }),
            None => {
                let offset = self.params.start_time.unwrap_or(0.0).max(0.0) as i64;
                json!({ "videoID": self.video_id, "contentOffsetSeconds": offset })
            }
        };
        let body = persisted_query("VideoCommentsByOffsetOrCursor", COMMENTS_HASH, variables);
        let response: Value = self.http.post_json(&self.gql_url, &body).await?;
        CommentPage::from_data(&gql_data(response)?)
    }

    /// Page through the comments from the start offset until the end of the
    /// window or the last page.
    pub fn into_stream(self) -> ChatStream {
        Box::pin(stream! {
            let params = &self.params;
            let mut cursor: Option<String> = None;

            loop {
                let fetched = with_retries(params.max_attempts, params.retry_timeout, &self.token, || {
                    self.fetch(cursor.as_deref())
                })
                .await;
                let page = match fetched {
                    Ok(page) => page,
                    Err(e) => {
                        yield Err(e);
                        return;
                    }
                };
                trace!(comments = page.comments.len(), has_next = page.has_next_page, "Received VOD comments");

                for node in &page.comments {
                    let Some(mut event) = parse_comment(node) else {
                        continue;
                    };
                    if let Some(t) = event.time_in_seconds {
                        if params.start_time.is_some_and(|s| t < s) {
                            continue;
                        }
                        if params.end_time.is_some_and(|e| t > e) {
                            debug!(time = t, "Reached end of requested window");
                            return;
                        }
                    }
                    if !params.filter.must_add_item(&event.message_type) {
                        continue;
                    }
                    self.badges
                        .resolve(&mut event.author.badges, self.channel_id.as_deref())
                        .await;
                    yield Ok(event);
                }

                match page.cursor {
                    Some(next) if page.has_next_page => cursor = Some(next),
                    _ => {
                        debug!(video_id = %self.video_id, "VOD chat finished");
                        return;
                    }
                }
                if self.token.is_cancelled() {
                    yield Err(ChatError::Cancelled);
                    return;
                }
            }
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn comment(id: &str, offset: u64) -> Value {
        json!({"cursor": format!("cur-{id}"), "node": {
            "id": id,
            "commenter": {"id": "7", "login": "viewer", "displayName": "Viewer"},
            "contentOffsetSeconds": offset,
            "createdAt": "2021-01-01T00:00:10Z",
            "message": {
                "fragments": [
                    {"text": "hello ", "emote": null},
                    {"text": "Kappa", "emote": {"emoteID": "25", "from": 6}}
                ],
                "userBadges": [{"setID": "subscriber", "version": "3"}],
                "userColor": "#FF0000"
            }
        }})
    }

    #[test]
    fn test_parse_comment() {
        let node = comment("c1", 75)["node"].clone();
        let event = parse_comment(&node).unwrap();
        assert_eq!(event.message_type, "text_message");
        assert_eq!(event.message.as_deref(), Some("hello Kappa"));
        assert_eq!(event.time_in_seconds, Some(75.0));
        assert_eq!(event.time_text.as_deref(), Some("1:15"));
        assert_eq!(event.timestamp, Some(1_609_459_210_000_000));
        assert_eq!(event.author.display_name.as_deref(), Some("Viewer"));
        assert_eq!(event.author.badges[0].version.as_deref(), Some("3"));
        assert_eq!(event.extra["emotes"][0]["name"], "Kappa");
    }

    #[test]
    fn test_comment_page_and_gql_data() {
        let response = json!([{"data": {"video": {"comments": {
            "edges": [comment("a", 1), comment("b", 2)],
            "pageInfo": {"hasNextPage": true}
        }}}}]);
        let page = CommentPage::from_data(&gql_data(response).unwrap()).unwrap();
        assert_eq!(page.comments.len(), 2);
        assert_eq!(page.cursor.as_deref(), Some("cur-b"));
        assert!(page.has_next_page);

        let err = gql_data(json!({"errors": [{"message": "service timeout"}]})).unwrap_err();
        assert!(matches!(err, ChatError::Parsing(_)));

        let missing = CommentPage::from_data(&json!({"video": null})).unwrap_err();
        assert!(matches!(missing, ChatError::VideoUnavailable(_)));
    }

    pub(crate) fn comments_response(edges: Vec<Value>, has_next: bool) -> Value {
        json!({"data": {"video": {"comments": {
            "edges": edges,
            "pageInfo": {"hasNextPage": has_next}
        }}}})
    }
}
