//! Facebook video comments, live and replay.
//!
//! Metadata comes from the video page. Comments come from the GraphQL
//! endpoint: live videos are polled for the newest comments, past videos
//! are read in fixed windows of video time.

use std::sync::LazyLock;
use std::time::Duration;

use async_stream::stream;
use async_trait::async_trait;
use regex::Regex;
use serde_json::{Map, Value, json};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::chat::event::ChatEvent;
use crate::chat::filter::MessageGroups;
use crate::chat::handle::{Chat, ChatInfo, ChatStream};
use crate::chat::params::{ResolvedParams, SiteDefaults};
use crate::chat::poll::{POLL_INTERVAL, RecentIds};
use crate::chat::retry::{interruptible_sleep, with_retries};
use crate::chat::session::{Http, SessionConfig, parse_json_body};
use crate::chat::site::ChatSite;
use crate::chat::time::seconds_to_time;
use crate::error::{ChatError, Result};
use crate::utils::{capture_group_1, capture_group_1_or_invalid_url, json_str};

pub static URL_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^https?://(?:(?:www|m|web)\.)?facebook\.com/(?:[^/?#]+/videos/(?:[^/?#]+/)?|watch/?(?:live/?)?\?v=)(\d+)",
    )
    .unwrap()
});

static TITLE_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"<meta property="og:title" content="([^"]*)""#).unwrap());
static LIVE_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#""is_live_streaming"\s*:\s*(true|false)"#).unwrap());
static DURATION_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#""playable_duration_in_ms"\s*:\s*(\d+)"#).unwrap());
static PUBLISH_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#""publish_time"\s*:\s*(\d+)"#).unwrap());

pub static MESSAGE_GROUPS: MessageGroups = MessageGroups::new(&[("messages", &["comment"])]);

pub static DEFAULTS: SiteDefaults = SiteDefaults::new(&MESSAGE_GROUPS, &["messages"]);

const BASE_URL: &str = "https://www.facebook.com";
const LIVE_COMMENTS_DOC_ID: &str = "4889623951078943";
const VOD_COMMENTS_DOC_ID: &str = "3928916893845416";

/// Span of video time requested per replay query.
pub const REPLAY_WINDOW: f64 = 30.0;

/// Metadata scraped from the video page.
#[derive(Debug, Default, PartialEq)]
pub struct VideoPage {
    pub title: String,
    pub is_live: bool,
    pub duration: Option<f64>,
    /// Microseconds since the epoch.
    pub start_time: Option<i64>,
}

impl VideoPage {
    pub fn parse(video_id: &str, html: &str) -> Result<Self> {
        let title = capture_group_1(&TITLE_REGEX, html);
        let live = capture_group_1(&LIVE_REGEX, html);
        if title.is_none() && live.is_none() {
            if html.contains("id=\"login_form\"") {
                return Err(ChatError::LoginRequired(video_id.to_string()));
            }
            return Err(ChatError::VideoUnavailable(video_id.to_string()));
        }
        Ok(Self {
            title: title.map(unescape_html).unwrap_or_default(),
            is_live: live == Some("true"),
            duration: capture_group_1(&DURATION_REGEX, html)
                .and_then(|ms| ms.parse::<f64>().ok())
                .map(|ms| ms / 1000.0),
            start_time: capture_group_1(&PUBLISH_REGEX, html)
                .and_then(|s| s.parse::<i64>().ok())
                .and_then(|s| s.checked_mul(1_000_000)),
        })
    }
}

fn unescape_html(text: &str) -> String {
    text.replace("&quot;", "\"")
        .replace("&#039;", "'")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&amp;", "&")
}

/// Decode a GraphQL response. Only the first line is JSON when the server
/// streams deferred payloads after it.
pub fn graphql_data(body: &str) -> Result<Value> {
    let body = body.trim_start_matches("for (;;);");
    let first = body.lines().next().unwrap_or_default();
    let response: Value = parse_json_body(first)?;
    if let Some(message) = response.pointer("/errors/0/message").and_then(Value::as_str) {
        return Err(ChatError::parsing(format!("facebook graphql error: {message}")));
    }
    response
        .get("data")
        .cloned()
        .ok_or_else(|| ChatError::parsing("facebook graphql response without data"))
}

/// Convert one comment node.
pub fn parse_comment(node: &Value) -> Option<ChatEvent> {
    let mut map = Map::new();
    let mut insert = |key: &str, value: Option<Value>| {
        if let Some(value) = value {
            map.insert(key.to_string(), value);
        }
    };
    let str_at = |path: &[&str]| json_str(node, path).map(|s| Value::String(s.to_string()));

    insert("message_id", str_at(&["id"]));
    insert("message", str_at(&["body", "text"]));
    insert("author_id", str_at(&["author", "id"]));
    insert("author_name", str_at(&["author", "name"]));
    insert(
        "author_images",
        json_str(node, &["author", "profile_picture", "uri"]).map(|uri| json!([{ "url": uri, "id": "source" }])),
    );
    insert(
        "timestamp",
        node.get("created_time")
            .and_then(Value::as_i64)
            .and_then(|s| s.checked_mul(1_000_000))
            .map(Value::from),
    );
    let offset = node.get("vod_video_timestamp").and_then(Value::as_f64);
    insert("time_in_seconds", offset.map(Value::from));
    insert("time_text", offset.map(|o| Value::String(seconds_to_time(o))));
    insert("message_type", Some(Value::String("comment".into())));

    match ChatEvent::from_canonical(map) {
        Ok(event) => Some(event),
        Err(e) => {
            warn!(error = %e, "Failed to build chat event from Facebook comment");
            None
        }
    }
}

fn comment_nodes(data: &Value) -> Vec<Value> {
    data.pointer("/video/comments/edges")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(|edge| edge.get("node").cloned())
        .collect()
}

pub struct Facebook {
    http: Http,
    base_url: String,
}

impl Facebook {
    pub fn new(config: &SessionConfig) -> Result<Self> {
        Ok(Self {
            http: Http::new(config.build_client()?, config),
            base_url: config.base_url("facebook", BASE_URL),
        })
    }
}

#[async_trait]
impl ChatSite for Facebook {
    fn name(&self) -> &'static str {
        "facebook"
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
        let video_id = capture_group_1_or_invalid_url(&URL_REGEX, url)?.to_string();
        let page_url = format!("{}/watch/?v={video_id}", self.base_url);
        let (http, page_url, id) = (&self.http, &page_url, &video_id);
        let page = with_retries(params.max_attempts, params.retry_timeout, &token, || async move {
            let html = http.get_text(page_url).await?;
            VideoPage::parse(id, &html)
        })
        .await?;
        info!(video_id = %video_id, title = %page.title, is_live = page.is_live, "Found Facebook video");

        let info = ChatInfo {
            site: "facebook",
            id: video_id.clone(),
            title: page.title,
            duration: page.duration,
            is_live: page.is_live,
            start_time: page.start_time,
        };
        let feed = CommentFeed {
            http: self.http.clone(),
            graphql_url: format!("{}/api/graphql/", self.base_url),
            video_id,
            duration: page.duration,
            params,
            token: token.clone(),
            poll_interval: POLL_INTERVAL,
        };
        let events = if page.is_live {
            feed.live()
        } else {
            feed.replay()
        };
        Ok(Chat::new(info, events, token))
    }
}

pub struct CommentFeed {
    pub http: Http,
    pub graphql_url: String,
    pub video_id: String,
    pub duration: Option<f64>,
    pub params: ResolvedParams,
    pub token: CancellationToken,
    pub poll_interval: Duration,
}

impl CommentFeed {
    async fn query(&self, doc_id: &str, variables: Value) -> Result<Value> {
        let variables = variables.to_string();
        let request = self
            .http
            .post(&self.graphql_url)
            .form(&[("doc_id", doc_id), ("variables", variables.as_str())]);
        let body = self.http.send_text(request).await?;
        graphql_data(&body)
    }

    async fn query_with_retries(&self, doc_id: &str, variables: Value) -> Result<Value> {
        let params = &self.params;
        with_retries(params.max_attempts, params.retry_timeout, &self.token, || {
            self.query(doc_id, variables.clone())
        })
        .await
    }

    /// Poll the newest comments until the broadcast ends or the stream is
    /// cancelled.
    pub fn live(self) -> ChatStream {
        Box::pin(stream! {
            let params = &self.params;
            let mut recent = RecentIds::default();
            let variables = json!({ "videoID": self.video_id, "isLive": true });

            loop {
                let data = match self.query_with_retries(LIVE_COMMENTS_DOC_ID, variables.clone()).await {
                    Ok(data) => data,
                    Err(e) => {
                        yield Err(e);
                        return;
                    }
                };
                let mut events: Vec<ChatEvent> = comment_nodes(&data).iter().filter_map(parse_comment).collect();
                events.sort_by_key(|e| e.timestamp);
                trace!(comments = events.len(), "Polled Facebook live comments");
                for event in events {
                    let is_new = event.message_id.as_deref().is_some_and(|id| recent.insert(id));
                    if is_new && params.filter.must_add_item(&event.message_type) {
                        yield Ok(event);
                    }
                }
                if data.pointer("/video/is_live_streaming").and_then(Value::as_bool) == Some(false) {
                    info!(video_id = %self.video_id, "Facebook broadcast ended");
                    return;
                }
                if let Err(e) = interruptible_sleep(self.poll_interval, &self.token).await {
                    yield Err(e);
                    return;
                }
            }
        })
    }

    /// Read comments window by window from the start offset. Without a
    /// known duration or end offset, the first empty window ends the replay.
    pub fn replay(self) -> ChatStream {
        Box::pin(stream! {
            let params = &self.params;
            let mut recent = RecentIds::default();
            let end = match (params.end_time, self.duration) {
                (Some(end), Some(duration)) => Some(end.min(duration)),
                (end, duration) => end.or(duration),
            };
            let mut after = params.start_time.unwrap_or(0.0).max(0.0);

            while end.is_none_or(|end| after <= end) {
                let before = after + REPLAY_WINDOW;
                let variables = json!({
                    "videoID": self.video_id,
                    "afterTime": after as i64,
                    "beforeTime": before as i64,
                });
                let data = match self.query_with_retries(VOD_COMMENTS_DOC_ID, variables).await {
                    Ok(data) => data,
                    Err(e) => {
                        yield Err(e);
                        return;
                    }
                };
                let mut events: Vec<ChatEvent> = comment_nodes(&data).iter().filter_map(parse_comment).collect();
                debug!(after, before, comments = events.len(), "Fetched Facebook comment window");
                if events.is_empty() && end.is_none() {
                    return;
                }
                events.sort_by(|a, b| {
                    a.time_in_seconds
                        .partial_cmp(&b.time_in_seconds)
                        .unwrap_or(std::cmp::Ordering::Equal)
                });
                for event in events {
                    if !event.within(params.start_time, params.end_time) {
                        continue;
                    }
                    let is_new = event.message_id.as_deref().is_some_and(|id| recent.insert(id));
                    if is_new && params.filter.must_add_item(&event.message_type) {
                        yield Ok(event);
                    }
                }
                if self.token.is_cancelled() {
                    yield Err(ChatError::Cancelled);
                    return;
                }
                after = before;
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::params::ChatParams;
    use crate::chat::registry::ChatDownloader;
    use crate::chat::retry::RetryTimeout;
    use futures::StreamExt;
    use rstest::rstest;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

    fn node(id: &str, offset: u64) -> Value {
        json!({
            "id": id,
            "body": {"text": format!("at {offset}")},
            "author": {"id": "1", "name": "Viewer", "profile_picture": {"uri": "https://example.com/a.jpg"}},
            "created_time": 1_600_000_000 + offset,
            "vod_video_timestamp": offset
        })
    }

    fn comments(nodes: Vec<Value>) -> Value {
        let edges: Vec<Value> = nodes.into_iter().map(|node| json!({ "node": node })).collect();
        json!({"data": {"video": {"comments": {"edges": edges}}}})
    }

    #[rstest]
    #[case("https://www.facebook.com/someone/videos/1234567890/", "1234567890")]
    #[case("https://www.facebook.com/someone/videos/title-slug/42/", "42")]
    #[case("https://www.facebook.com/watch/?v=555", "555")]
    #[case("https://www.facebook.com/watch/live/?v=777", "777")]
    fn test_url_regex(#[case] url: &str, #[case] id: &str) {
        assert_eq!(capture_group_1(&URL_REGEX, url), Some(id));
    }

    #[test]
    fn test_video_page() {
        let html = r#"<meta property="og:title" content="Tom &amp; Jerry" />
            {"is_live_streaming":false,"playable_duration_in_ms":95000,"publish_time":1600000000}"#;
        let page = VideoPage::parse("1", html).unwrap();
        assert_eq!(page.title, "Tom & Jerry");
        assert!(!page.is_live);
        assert_eq!(page.duration, Some(95.0));
        assert_eq!(page.start_time, Some(1_600_000_000_000_000));

        let login = VideoPage::parse("1", r#"<form id="login_form"></form>"#).unwrap_err();
        assert!(matches!(login, ChatError::LoginRequired(_)));
    }

    #[test]
    fn test_graphql_data() {
        let body = "for (;;);{\"data\": {\"video\": null}}\n{\"label\": \"deferred\"}";
        assert_eq!(graphql_data(body).unwrap(), json!({"video": null}));
        let err = graphql_data(r#"{"errors": [{"message": "rate limited"}]}"#).unwrap_err();
        assert!(matches!(err, ChatError::Parsing(_)));
    }

    /// Serves the comments whose offset falls inside the requested window.
    struct WindowResponder(Vec<u64>);

    impl Respond for WindowResponder {
        fn respond(&self, request: &Request) -> ResponseTemplate {
            let variables: Value = url::form_urlencoded::parse(&request.body)
                .find(|(k, _)| k == "variables")
                .and_then(|(_, v)| serde_json::from_str(&v).ok())
                .unwrap();
            let after = variables["afterTime"].as_u64().unwrap();
            let before = variables["beforeTime"].as_u64().unwrap();
            let nodes = self
                .0
                .iter()
                .filter(|t| (after..before).contains(*t))
                .map(|t| node(&format!("c{t}"), *t))
                .collect();
            ResponseTemplate::new(200).set_body_json(comments(nodes))
        }
    }

    #[tokio::test]
    async fn test_replay_windows() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/watch/"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"<meta property="og:title" content="Replay" />{"is_live_streaming":false,"playable_duration_in_ms":90000}"#,
            ))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/graphql/"))
            .respond_with(WindowResponder(vec![5, 20, 31, 45, 61, 80, 95]))
            .expect(2)
            .mount(&server)
            .await;

        let downloader = ChatDownloader::new(SessionConfig::default().with_base_url("facebook", server.uri()));
        let params = ChatParams::new().with_start_time("10").unwrap().with_end_time("50").unwrap();
        let chat = downloader
            .get_chat("https://www.facebook.com/someone/videos/1234567890/", params)
            .await
            .unwrap();
        assert_eq!(chat.title(), "Replay");
        assert_eq!(chat.duration(), Some(90.0));

        let ids: Vec<_> = chat.map(|e| e.unwrap().message_id.unwrap()).collect().await;
        assert_eq!(ids, vec!["c20", "c31", "c45"]);
    }

    #[tokio::test]
    async fn test_live_poll_dedupes() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(comments(vec![node("a", 1), node("b", 2)])))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        let mut ended = comments(vec![node("b", 2), node("c", 3)]);
        ended["data"]["video"]["is_live_streaming"] = json!(false);
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(ended))
            .mount(&server)
            .await;

        let config = SessionConfig::default();
        let feed = CommentFeed {
            http: Http::new(config.build_client().unwrap(), &config),
            graphql_url: format!("{}/api/graphql/", server.uri()),
            video_id: "1".to_string(),
            duration: None,
            params: ResolvedParams {
                retry_timeout: RetryTimeout::Fixed(Duration::ZERO),
                ..ResolvedParams::default()
            },
            token: CancellationToken::new(),
            poll_interval: Duration::ZERO,
        };
        let ids: Vec<_> = feed
            .live()
            .map(|e| e.unwrap().message_id.unwrap())
            .collect()
            .await;
        assert_eq!(ids, vec!["a", "b", "c"]);
    }
}
