//! Twitch live chat (IRC) and past broadcast chat (GraphQL).

mod badges;
mod client;
mod irc;
mod parser;
mod vod;

use std::sync::{Arc, LazyLock};

use async_trait::async_trait;
use regex::Regex;
use reqwest::header::HeaderName;
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::chat::handle::{Chat, ChatInfo};
use crate::chat::params::{ResolvedParams, SiteDefaults};
use crate::chat::retry::with_retries;
use crate::chat::session::{Http, SessionConfig};
use crate::chat::site::ChatSite;
use crate::chat::time::rfc3339_to_micros;
use crate::error::{ChatError, Result};
use crate::utils::{capture_group_1, capture_group_1_or_invalid_url, json_str};

pub use badges::BadgeCache;
pub use client::PING_INTERVAL;
pub use irc::{IrcBuffer, IrcMessage, Parsed, parse_tags, unescape_tag_value};
pub use parser::{DEFAULTS, MESSAGE_GROUPS, parse_message};

pub static URL_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^https?://(?:(?:www|go|m)\.)?twitch\.tv/([^/?#]+)").unwrap()
});

static VOD_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^https?://(?:(?:www|go|m)\.)?twitch\.tv/(?:videos/|[^/?#]+/v(?:ideo)?/)(\d+)")
        .unwrap()
});

const CLIENT_ID: &str = "kimne78kx3ncx6brgo4mv6wki5h1ko";
const GQL_URL: &str = "https://gql.twitch.tv/gql";
const BADGES_URL: &str = "https://badges.twitch.tv";
const IRC_ADDRESS: &str = "irc.chat.twitch.tv:6667";

const CHANNEL_QUERY: &str = "query($login: String!) { user(login: $login) { id broadcastSettings { title } stream { id createdAt } } }";
const VIDEO_QUERY: &str = "query($id: ID!) { video(id: $id) { title lengthSeconds createdAt owner { id login } } }";

struct ChannelInfo {
    title: String,
    is_live: bool,
    start_time: Option<i64>,
}

struct VideoInfo {
    title: String,
    duration: Option<f64>,
    start_time: Option<i64>,
    owner_id: Option<String>,
}

pub struct Twitch {
    http: Http,
    gql_url: String,
    irc_address: String,
    badges: Arc<BadgeCache>,
}

impl Twitch {
    pub fn new(config: &SessionConfig) -> Result<Self> {
        let mut http = Http::new(config.build_client()?, config);
        http.insert_header(HeaderName::from_static("client-id"), CLIENT_ID);
        let device_id = format!("{:016}", rand::random::<u64>() % 10_000_000_000_000_000);
        http.insert_header(HeaderName::from_static("x-device-id"), &device_id);

        let badges = BadgeCache::new(http.clone(), config.base_url("twitch_badges", BADGES_URL));
        Ok(Self {
            http,
            gql_url: config.base_url("twitch_gql", GQL_URL),
            irc_address: config.base_url("twitch_irc", IRC_ADDRESS),
            badges: Arc::new(badges),
        })
    }

    async fn query(
        &self,
        query: &str,
        variables: Value,
        params: &ResolvedParams,
        token: &CancellationToken,
    ) -> Result<Value> {
        let body = json!({ "query": query, "variables": variables });
        let (http, url, body) = (&self.http, &self.gql_url, &body);
        with_retries(params.max_attempts, params.retry_timeout, token, || async move {
            let response: Value = http.post_json(url, body).await?;
            vod::gql_data(response)
        })
        .await
    }

    async fn channel_info(
        &self,
        channel: &str,
        params: &ResolvedParams,
        token: &CancellationToken,
    ) -> Result<ChannelInfo> {
        let data = self
            .query(CHANNEL_QUERY, json!({ "login": channel }), params, token)
            .await?;
        let user = data
            .get("user")
            .filter(|u| !u.is_null())
            .ok_or_else(|| ChatError::UserNotFound(channel.to_string()))?;
        let stream = user.get("stream").filter(|s| !s.is_null());
        Ok(ChannelInfo {
            title: json_str(user, &["broadcastSettings", "title"])
                .unwrap_or(channel)
                .to_string(),
            is_live: stream.is_some(),
            start_time: stream
                .and_then(|s| json_str(s, &["createdAt"]))
                .and_then(rfc3339_to_micros),
        })
    }

    async fn video_info(
        &self,
        video_id: &str,
        params: &ResolvedParams,
        token: &CancellationToken,
    ) -> Result<VideoInfo> {
        let data = self
            .query(VIDEO_QUERY, json!({ "id": video_id }), params, token)
            .await?;
        let video = data
            .get("video")
            .filter(|v| !v.is_null())
            .ok_or_else(|| ChatError::VideoUnavailable(video_id.to_string()))?;
        Ok(VideoInfo {
            title: json_str(video, &["title"]).unwrap_or_default().to_string(),
            duration: video.get("lengthSeconds").and_then(Value::as_f64),
            start_time: json_str(video, &["createdAt"]).and_then(rfc3339_to_micros),
            owner_id: json_str(video, &["owner", "id"]).map(String::from),
        })
    }

    async fn live_chat(
        &self,
        url: &str,
        params: ResolvedParams,
        token: CancellationToken,
    ) -> Result<Chat> {
        let channel = capture_group_1_or_invalid_url(&URL_REGEX, url)?.to_lowercase();
        let channel_info = self.channel_info(&channel, &params, &token).await?;
        info!(channel = %channel, title = %channel_info.title, is_live = channel_info.is_live, "Found Twitch channel");

        let info = ChatInfo {
            site: "twitch",
            id: channel.clone(),
            title: channel_info.title,
            duration: None,
            is_live: channel_info.is_live,
            start_time: channel_info.start_time,
        };
        let feed = client::IrcFeed {
            address: self.irc_address.clone(),
            channel,
            badges: self.badges.clone(),
            params,
            token: token.clone(),
            ping_interval: PING_INTERVAL,
        };
        Ok(Chat::new(info, feed.into_stream(), token))
    }

    async fn vod_chat(
        &self,
        video_id: &str,
        params: ResolvedParams,
        token: CancellationToken,
    ) -> Result<Chat> {
        let video = self.video_info(video_id, &params, &token).await?;
        info!(video_id, title = %video.title, "Found Twitch video");

        let info = ChatInfo {
            site: "twitch",
            id: video_id.to_string(),
            title: video.title,
            duration: video.duration,
            is_live: false,
            start_time: video.start_time,
        };
        let feed = vod::VodFeed {
            http: self.http.clone(),
            gql_url: self.gql_url.clone(),
            video_id: video_id.to_string(),
            channel_id: video.owner_id,
            badges: self.badges.clone(),
            params,
            token: token.clone(),
        };
        Ok(Chat::new(info, feed.into_stream(), token))
    }
}

#[async_trait]
impl ChatSite for Twitch {
    fn name(&self) -> &'static str {
        "twitch"
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
        match capture_group_1(&VOD_REGEX, url) {
            Some(video_id) => self.vod_chat(video_id, params, token).await,
            None => self.live_chat(url, params, token).await,
        }
    }

    fn close(&self) {
        self.badges.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::params::ChatParams;
    use crate::chat::registry::ChatDownloader;
    use futures::StreamExt;
    use rstest::rstest;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use wiremock::matchers::{body_partial_json, body_string_contains, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[rstest]
    #[case("https://www.twitch.tv/videos/123456789", Some("123456789"))]
    #[case("https://www.twitch.tv/someone/v/987", Some("987"))]
    #[case("https://www.twitch.tv/someone", None)]
    fn test_vod_regex(#[case] url: &str, #[case] expected: Option<&str>) {
        assert!(URL_REGEX.is_match(url));
        assert_eq!(capture_group_1(&VOD_REGEX, url), expected);
    }

    #[tokio::test]
    async fn test_vod_replay_window() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/gql"))
            .and(header("client-id", CLIENT_ID))
            .and(body_string_contains("lengthSeconds"))
            .and(body_partial_json(json!({"variables": {"id": "123"}})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"data": {"video": {
                "title": "Past broadcast",
                "lengthSeconds": 3600,
                "createdAt": "2021-01-01T00:00:00Z",
                "owner": {"id": "99", "login": "someone"}
            }}})))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/gql"))
            .and(body_partial_json(json!({"variables": {"contentOffsetSeconds": 20}})))
            .respond_with(ResponseTemplate::new(200).set_body_json(vod::tests::comments_response(
                vec![vod::tests::comment("a", 15), vod::tests::comment("b", 25)],
                true,
            )))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/gql"))
            .and(body_partial_json(json!({"variables": {"cursor": "cur-b"}})))
            .respond_with(ResponseTemplate::new(200).set_body_json(vod::tests::comments_response(
                vec![vod::tests::comment("c", 35), vod::tests::comment("d", 45)],
                true,
            )))
            .mount(&server)
            .await;
        // Badge lookups fail; badges stay unresolved.
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let config = SessionConfig::default()
            .with_base_url("twitch_gql", format!("{}/gql", server.uri()))
            .with_base_url("twitch_badges", server.uri());
        let downloader = ChatDownloader::new(config);
        let params = ChatParams::new()
            .with_start_time("20")
            .unwrap()
            .with_end_time("40")
            .unwrap();
        let chat = downloader
            .get_chat("https://www.twitch.tv/videos/123", params)
            .await
            .unwrap();
        assert_eq!(chat.title(), "Past broadcast");
        assert_eq!(chat.duration(), Some(3600.0));
        assert!(!chat.is_live());

        let ids: Vec<_> = chat
            .map(|e| e.unwrap().message_id.unwrap())
            .collect()
            .await;
        assert_eq!(ids, vec!["b", "c"]);
    }

    #[tokio::test]
    async fn test_unknown_channel() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/gql"))
            .and(body_partial_json(json!({"variables": {"login": "nobody\"x"}})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"data": {"user": null}})))
            .expect(1)
            .mount(&server)
            .await;

        let config = SessionConfig::default().with_base_url("twitch_gql", format!("{}/gql", server.uri()));
        let downloader = ChatDownloader::new(config);
        let err = downloader
            .get_chat("https://www.twitch.tv/nobody\"x", ChatParams::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ChatError::UserNotFound(_)));
    }

    #[tokio::test]
    async fn test_live_chat_through_downloader() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/gql"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"data": {"user": {
                "id": "99",
                "broadcastSettings": {"title": "Live now"},
                "stream": {"id": "1", "createdAt": "2021-01-01T00:00:00Z"}
            }}})))
            .mount(&server)
            .await;

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let irc = listener.local_addr().unwrap().to_string();
        let irc_server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut handshake = Vec::new();
            let mut buf = [0u8; 256];
            while !String::from_utf8_lossy(&handshake).contains("JOIN #someone\r\n") {
                let n = socket.read(&mut buf).await.unwrap();
                assert!(n > 0);
                handshake.extend_from_slice(&buf[..n]);
            }
            socket
                .write_all(b":u!u@u.tmi.twitch.tv JOIN #someone\r\n@id=1;room-id=99 :u!u@u.tmi.twitch.tv PRIVMSG #someone :hi\r\n@id=2;room-id=99 :tmi.twitch.tv CLEARCHAT #someone :u\r\n@id=3;room-id=99 :v!v@v.tmi.twitch.tv PRIVMSG #someone :there\r\n")
                .await
                .unwrap();
            let _ = socket.read(&mut buf).await;
        });

        let config = SessionConfig::default()
            .with_base_url("twitch_gql", format!("{}/gql", server.uri()))
            .with_base_url("twitch_irc", irc);
        let downloader = ChatDownloader::new(config);
        let chat = downloader
            .get_chat("twitch.tv/SomeOne", ChatParams::new().with_max_messages(2))
            .await
            .unwrap();
        assert_eq!(chat.id(), "someone");
        assert_eq!(chat.title(), "Live now");
        assert!(chat.is_live());

        let messages: Vec<_> = chat
            .map(|e| e.unwrap().message.unwrap_or_default())
            .collect()
            .await;
        assert_eq!(messages, vec!["hi", "there"]);
        irc_server.await.unwrap();
    }

    #[tokio::test]
    #[ignore]
    async fn test_real_live_chat() {
        tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .try_init()
            .ok();
        let downloader = ChatDownloader::default();
        let chat = downloader
            .get_chat("https://www.twitch.tv/xqc", ChatParams::new().with_max_messages(5))
            .await
            .unwrap();
        println!("{}", chat.title());
        let events: Vec<_> = chat.collect().await;
        for event in events {
            println!("{:?}", event);
        }
    }
}
