//! Zoom cloud recording chat replay.

use std::sync::LazyLock;

use async_stream::stream;
use async_trait::async_trait;
use regex::Regex;
use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::chat::event::ChatEvent;
use crate::chat::filter::MessageGroups;
use crate::chat::handle::{Chat, ChatInfo};
use crate::chat::params::{ResolvedParams, SiteDefaults};
use crate::chat::remap::{Remap, RemapTable, non_empty};
use crate::chat::retry::with_retries;
use crate::chat::session::{Http, SessionConfig};
use crate::chat::site::ChatSite;
use crate::chat::time::seconds_to_time;
use crate::error::{ChatError, Result};
use crate::utils::{capture_group_1, json_str};

pub static URL_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^https?://(?:[a-z0-9-]+\.)?zoom\.us/rec/(?:play|share)/([^?#]+)").unwrap()
});

static SUBDOMAIN_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(https?://(?:[a-z0-9-]+\.)?zoom\.us)/").unwrap());

static FILE_ID_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"fileId\s*[:=]\s*["']([^"']+)["']"#).unwrap());

pub static MESSAGE_GROUPS: MessageGroups = MessageGroups::new(&[("messages", &["text_message"])]);

pub static DEFAULTS: SiteDefaults = SiteDefaults::new(&MESSAGE_GROUPS, &["messages"]);

static CHAT_REMAP: LazyLock<RemapTable> = LazyLock::new(|| {
    RemapTable::new(&[
        ("messageId", Remap::to("message_id")),
        ("content", Remap::with("message", non_empty)),
        ("userId", Remap::to("author_id")),
        ("username", Remap::to("author_name")),
        ("avatar", Remap::with("author_images", avatar)),
    ])
});

fn avatar(value: &Value) -> Option<Value> {
    let url = value.as_str().filter(|u| !u.is_empty())?;
    Some(serde_json::json!([{ "url": url, "id": "source" }]))
}

/// Convert one entry of the meeting chat list. `time` is milliseconds since
/// the epoch and `start` the recording start in the same unit.
pub fn parse_chat_message(raw: &Map<String, Value>, start: Option<i64>) -> Option<ChatEvent> {
    let mut map = CHAT_REMAP.remap_object(raw);
    if let Some(time) = raw.get("time").and_then(Value::as_i64) {
        if let Some(micros) = time.checked_mul(1000) {
            map.insert("timestamp".into(), Value::from(micros));
        }
        if let Some(start) = start {
            let offset = time.saturating_sub(start) as f64 / 1000.0;
            map.insert("time_in_seconds".into(), Value::from(offset));
            map.insert("time_text".into(), Value::String(seconds_to_time(offset)));
        }
    }
    map.insert("message_type".into(), Value::String("text_message".into()));
    match ChatEvent::from_canonical(map) {
        Ok(event) => Some(event),
        Err(e) => {
            warn!(error = %e, "Failed to build chat event from Zoom message");
            None
        }
    }
}

/// The recording info `result` object, or the reason it is unavailable.
fn recording_result(response: Value) -> Result<Value> {
    if response.get("status").and_then(Value::as_bool) == Some(false) {
        let reason = json_str(&response, &["errorMessage"]).unwrap_or("recording unavailable");
        return Err(ChatError::VideoUnavailable(reason.to_string()));
    }
    response
        .get("result")
        .cloned()
        .ok_or_else(|| ChatError::parsing("recording info without result"))
}

pub struct Zoom {
    http: Http,
    /// Overrides the host taken from the recording URL.
    base_url: Option<String>,
}

impl Zoom {
    pub fn new(config: &SessionConfig) -> Result<Self> {
        Ok(Self {
            http: Http::new(config.build_client()?, config),
            base_url: config.base_urls.get("zoom").cloned(),
        })
    }

    fn host(&self, url: &str) -> Result<String> {
        match &self.base_url {
            Some(base) => Ok(base.clone()),
            None => capture_group_1(&SUBDOMAIN_REGEX, url)
                .map(String::from)
                .ok_or_else(|| ChatError::InvalidUrl(url.to_string())),
        }
    }

    async fn recording(
        &self,
        host: &str,
        path: &str,
        params: &ResolvedParams,
        token: &CancellationToken,
    ) -> Result<Value> {
        let page_url = format!("{host}/rec/{path}");
        let http = &self.http;
        let page = &page_url;
        with_retries(params.max_attempts, params.retry_timeout, token, || async move {
            let html = http.get_text(page).await?;
            let file_id = capture_group_1(&FILE_ID_REGEX, &html)
                .ok_or_else(|| ChatError::VideoUnavailable("recording page has no file id".into()))?;
            debug!(file_id, "Found Zoom recording");
            let info_url = format!("{host}/nws/recording/1.0/play/info/{file_id}");
            let response: Value = http.get_json(&info_url).await?;
            recording_result(response)
        })
        .await
    }
}

#[async_trait]
impl ChatSite for Zoom {
    fn name(&self) -> &'static str {
        "zoom"
    }

    fn defaults(&self) -> &'static SiteDefaults {
        &DEFAULTS
    }

    async fn get_chat(
        &self,
        url: &str,
        params: ResolvedParams,
        token: CancellationToken,
    ) -> Result<Chat> {
        let path = URL_REGEX
            .captures(url)
            .and_then(|caps| caps.get(0))
            .and_then(|m| m.as_str().split_once("/rec/"))
            .map(|(_, path)| path.to_string())
            .ok_or_else(|| ChatError::InvalidUrl(url.to_string()))?;
        let host = self.host(url)?;
        let result = self.recording(&host, &path, &params, &token).await?;

        let title = json_str(&result, &["meet", "topic"]).unwrap_or_default().to_string();
        let start = result.get("fileStartTime").and_then(Value::as_i64);
        info!(title = %title, "Found Zoom recording");
        let info = ChatInfo {
            site: "zoom",
            id: capture_group_1(&URL_REGEX, url).unwrap_or_default().to_string(),
            title,
            duration: result.get("duration").and_then(Value::as_f64),
            is_live: false,
            start_time: start.and_then(|ms| ms.checked_mul(1000)),
        };

        let chat_list = match result.get("meetingChatList") {
            Some(Value::Array(list)) => list.clone(),
            _ => {
                return Err(ChatError::NoChatReplay(format!("{} has no chat", info.id)));
            }
        };
        let events = Box::pin(stream! {
            let mut events: Vec<ChatEvent> = chat_list
                .iter()
                .filter_map(Value::as_object)
                .filter_map(|raw| parse_chat_message(raw, start))
                .collect();
            events.sort_by_key(|e| e.timestamp);
            for event in events {
                if !event.within(params.start_time, None) {
                    continue;
                }
                if !event.within(None, params.end_time) {
                    return;
                }
                if params.filter.must_add_item(&event.message_type) {
                    yield Ok(event);
                }
            }
        });
        Ok(Chat::new(info, events, token))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::params::ChatParams;
    use crate::chat::registry::ChatDownloader;
    use futures::StreamExt;
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const START_MS: i64 = 1_600_000_000_000;

    fn message(n: i64) -> Value {
        json!({
            "messageId": format!("m{n}"),
            "content": format!("message {n}"),
            "userId": "u1",
            "username": "Attendee",
            "avatar": "",
            "time": START_MS + n * 10_000
        })
    }

    #[test]
    fn test_parse_chat_message() {
        let raw = message(9);
        let event = parse_chat_message(raw.as_object().unwrap(), Some(START_MS)).unwrap();
        assert_eq!(event.time_in_seconds, Some(90.0));
        assert_eq!(event.time_text.as_deref(), Some("1:30"));
        assert_eq!(event.author.name, "Attendee");
        assert!(event.author.images.is_empty());
    }

    #[test]
    fn test_out_of_range_time_keeps_offset_only() {
        let mut raw = message(1);
        raw["time"] = json!(i64::MAX);
        let event = parse_chat_message(raw.as_object().unwrap(), Some(START_MS)).unwrap();
        assert_eq!(event.timestamp, None);
        assert!(event.time_in_seconds.is_some());
    }

    async fn server(info: Value) -> MockServer {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/rec/play/abcDEF"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"<html><script>window.__data__ = { fileId: "f-123", isLogin: false };</script></html>"#,
            ))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/nws/recording/1.0/play/info/f-123"))
            .respond_with(ResponseTemplate::new(200).set_body_json(info))
            .mount(&server)
            .await;
        server
    }

    #[tokio::test]
    async fn test_replay_window() {
        let server = server(json!({"status": true, "result": {
            "meet": {"topic": "Weekly sync"},
            "duration": 3600,
            "fileStartTime": START_MS,
            "meetingChatList": [message(4), message(1), message(2), message(3)]
        }}))
        .await;
        let downloader = ChatDownloader::new(SessionConfig::default().with_base_url("zoom", server.uri()));
        let params = ChatParams::new()
            .with_start_time("15")
            .unwrap()
            .with_end_time("35")
            .unwrap();
        let chat = downloader
            .get_chat("https://us02web.zoom.us/rec/play/abcDEF", params)
            .await
            .unwrap();
        assert_eq!(chat.title(), "Weekly sync");
        assert_eq!(chat.id(), "abcDEF");
        let ids: Vec<_> = chat.map(|e| e.unwrap().message_id.unwrap()).collect().await;
        assert_eq!(ids, vec!["m2", "m3"]);
    }

    #[tokio::test]
    async fn test_unavailable_recording() {
        let server = server(json!({"status": false, "errorMessage": "This recording does not exist."})).await;
        let downloader = ChatDownloader::new(SessionConfig::default().with_base_url("zoom", server.uri()));
        let err = downloader
            .get_chat("https://zoom.us/rec/play/abcDEF", ChatParams::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ChatError::VideoUnavailable(_)));
    }
}
