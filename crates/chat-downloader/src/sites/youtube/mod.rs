//! YouTube live chat and chat replay.
//!
//! The watch page provides the innertube key, the client context and one
//! continuation token per chat view. The chat endpoint is then polled with
//! that token; every response carries the token for the next request.

mod feed;
mod page;
mod parser;

use std::sync::LazyLock;

use async_trait::async_trait;
use regex::Regex;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::chat::handle::{Chat, ChatInfo};
use crate::chat::params::{ResolvedParams, SiteDefaults};
use crate::chat::retry::with_retries;
use crate::chat::session::{Http, SessionConfig};
use crate::chat::site::ChatSite;
use crate::error::Result;
use crate::utils::capture_group_1_or_invalid_url;

pub use feed::{WindowDecision, backpressure_delay, window_decision};
pub use page::WatchPage;
pub use parser::{DEFAULTS, MESSAGE_GROUPS, message_type_from_renderer};

pub static URL_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^https?://(?:(?:www|m|music)\.)?(?:youtube\.com/(?:watch\?(?:\S*&)?v=|live/|embed/|shorts/|v/)|youtu\.be/)([\w-]{11})",
    )
    .unwrap()
});

const BASE_URL: &str = "https://www.youtube.com";

pub struct YouTube {
    http: Http,
    base_url: String,
}

impl YouTube {
    pub fn new(config: &SessionConfig) -> Result<Self> {
        let http = Http::new(config.build_client()?, config);
        Ok(Self {
            http,
            base_url: config.base_url("youtube", BASE_URL),
        })
    }

    async fn fetch_page(
        &self,
        video_id: &str,
        params: &ResolvedParams,
        token: &CancellationToken,
    ) -> Result<WatchPage> {
        let url = format!("{}/watch?v={video_id}", self.base_url);
        let url = &url;
        let http = &self.http;
        with_retries(params.max_attempts, params.retry_timeout, token, || async move {
            let html = http.get_text(url).await?;
            WatchPage::parse(&html)
        })
        .await
    }
}

#[async_trait]
impl ChatSite for YouTube {
    fn name(&self) -> &'static str {
        "youtube"
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
        let page = self.fetch_page(&video_id, &params, &token).await?;
        let continuation = page.select_continuation(params.chat_type)?;

        let method = if page.is_live {
            "get_live_chat"
        } else {
            "get_live_chat_replay"
        };
        let endpoint = format!(
            "{}/youtubei/v1/live_chat/{method}?key={}",
            self.base_url, page.api_key
        );
        info!(video_id = %video_id, title = %page.title, is_live = page.is_live, "Found YouTube chat");

        let info = ChatInfo {
            site: "youtube",
            id: video_id,
            title: page.title,
            duration: page.duration,
            is_live: page.is_live,
            start_time: page.start_time,
        };
        let feed = feed::Feed {
            http: self.http.clone(),
            endpoint,
            context: page.context,
            continuation,
            is_live: page.is_live,
            params,
            token: token.clone(),
        };
        Ok(Chat::new(info, feed.into_stream(), token))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::params::ChatParams;
    use crate::chat::registry::ChatDownloader;
    use crate::error::ChatError;
    use futures::StreamExt;
    use serde_json::{Value, json};
    use wiremock::matchers::{body_partial_json, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const VIDEO_URL: &str = "https://www.youtube.com/watch?v=abcdefghijk";

    fn replay_action(id: &str, seconds: u64) -> Value {
        json!({"replayChatItemAction": {
            "videoOffsetTimeMsec": (seconds * 1000).to_string(),
            "actions": [{"addChatItemAction": {"item": {"liveChatTextMessageRenderer": {
                "id": id,
                "message": {"runs": [{"text": format!("at {seconds}")}]},
                "authorName": {"simpleText": "viewer"},
                "authorExternalChannelId": "UCviewer",
                "timestampUsec": "1600000000000000"
            }}}}]
        }})
    }

    fn batch(actions: Vec<Value>, next: Option<&str>) -> Value {
        let continuations = match next {
            Some(token) => json!([{"liveChatReplayContinuationData": {"continuation": token}}]),
            None => json!([]),
        };
        json!({"continuationContents": {"liveChatContinuation": {
            "actions": actions,
            "continuations": continuations
        }}})
    }

    async fn mount_replay(server: &MockServer) {
        let html = page::tests::watch_page(false, &[("Live chat replay", "c1")], "OK");
        Mock::given(method("GET"))
            .and(path("/watch"))
            .and(query_param("v", "abcdefghijk"))
            .respond_with(ResponseTemplate::new(200).set_body_string(html))
            .mount(server)
            .await;

        let chat_path = "/youtubei/v1/live_chat/get_live_chat_replay";
        Mock::given(method("POST"))
            .and(path(chat_path))
            .and(body_partial_json(json!({"continuation": "c1"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(batch(
                vec![replay_action("e5", 5), replay_action("e15", 15)],
                Some("c2"),
            )))
            .mount(server)
            .await;
        Mock::given(method("POST"))
            .and(path(chat_path))
            .and(body_partial_json(json!({"continuation": "c2"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(batch(
                vec![
                    replay_action("e25", 25),
                    replay_action("e35", 35),
                    replay_action("e45", 45),
                ],
                Some("c3"),
            )))
            .mount(server)
            .await;
        Mock::given(method("POST"))
            .and(path(chat_path))
            .and(body_partial_json(json!({"continuation": "c3"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(batch(vec![], None)))
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn test_replay_window() {
        let server = MockServer::start().await;
        mount_replay(&server).await;

        let config = SessionConfig::default().with_base_url("youtube", server.uri());
        let downloader = ChatDownloader::new(config);
        let params = ChatParams::new()
            .with_start_time("20")
            .unwrap()
            .with_end_time("40")
            .unwrap();
        let chat = downloader.get_chat(VIDEO_URL, params).await.unwrap();
        assert_eq!(chat.title(), "Test stream");
        assert!(!chat.is_live());

        let events: Vec<_> = chat.map(|e| e.unwrap()).collect().await;
        let times: Vec<_> = events.iter().map(|e| e.time_in_seconds).collect();
        assert_eq!(times, vec![Some(25.0), Some(35.0)]);
        assert_eq!(events[0].message.as_deref(), Some("at 25"));
        assert_eq!(events[1].time_text.as_deref(), Some("0:35"));
    }

    #[tokio::test]
    async fn test_full_replay_ends_without_continuation() {
        let server = MockServer::start().await;
        mount_replay(&server).await;

        let config = SessionConfig::default().with_base_url("youtube", server.uri());
        let downloader = ChatDownloader::new(config);
        let chat = downloader
            .get_chat(VIDEO_URL, ChatParams::new())
            .await
            .unwrap();
        let ids: Vec<_> = chat
            .map(|e| e.unwrap().message_id.unwrap_or_default())
            .collect()
            .await;
        assert_eq!(ids, vec!["e5", "e15", "e25", "e35", "e45"]);
    }

    #[tokio::test]
    async fn test_max_messages_caps_stream() {
        let server = MockServer::start().await;
        mount_replay(&server).await;

        let config = SessionConfig::default().with_base_url("youtube", server.uri());
        let downloader = ChatDownloader::new(config);
        let chat = downloader
            .get_chat(VIDEO_URL, ChatParams::new().with_max_messages(3))
            .await
            .unwrap();
        assert_eq!(chat.count().await, 3);
    }

    #[tokio::test]
    async fn test_no_replay_is_not_retried() {
        let server = MockServer::start().await;
        let html = page::tests::watch_page(false, &[], "OK");
        Mock::given(method("GET"))
            .and(path("/watch"))
            .respond_with(ResponseTemplate::new(200).set_body_string(html))
            .expect(1)
            .mount(&server)
            .await;

        let config = SessionConfig::default().with_base_url("youtube", server.uri());
        let downloader = ChatDownloader::new(config);
        let err = downloader
            .get_chat(VIDEO_URL, ChatParams::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ChatError::NoChatReplay(_)));
    }

    #[tokio::test]
    #[ignore]
    async fn test_real_live_stream() {
        let _ = tracing_subscriber::fmt().with_env_filter("debug").try_init();
        let downloader = ChatDownloader::default();
        let chat = downloader
            .get_chat(
                "https://www.youtube.com/watch?v=jfKfPfyJRdk",
                ChatParams::new().with_max_messages(5),
            )
            .await
            .unwrap();
        println!("{}", chat.title());
        let events: Vec<_> = chat.collect().await;
        for event in events {
            println!("{:?}", event);
        }
    }
}
