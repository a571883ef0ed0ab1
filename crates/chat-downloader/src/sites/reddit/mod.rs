//! Reddit live broadcasts: websocket comments while live, comment replay
//! afterwards.

mod live;
mod parser;
mod replay;
mod seek;

use std::sync::LazyLock;

use async_trait::async_trait;
use regex::Regex;
use reqwest::StatusCode;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::chat::handle::{Chat, ChatInfo};
use crate::chat::params::{ResolvedParams, SiteDefaults};
use crate::chat::retry::with_retries;
use crate::chat::session::{Http, SessionConfig, parse_json_body};
use crate::chat::site::ChatSite;
use crate::chat::time::rfc3339_to_micros;
use crate::error::{ChatError, Result};
use crate::utils::{capture_group_1_or_invalid_url, json_str};

pub use parser::{DEFAULTS, MESSAGE_GROUPS, parse_comment, parse_live_message};
pub use replay::{BATCH_SIZE, sort_comment_ids};
pub use seek::{BatchSearch, SearchStep, search_ranges};

pub static URL_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^https?://(?:(?:www|old|new|np)\.)?reddit\.com/r/[^/]+/comments/([a-z0-9]+)").unwrap()
});

const STRAPI_URL: &str = "https://strapi.reddit.com";
const PUSHSHIFT_URL: &str = "https://api.pushshift.io";
const API_URL: &str = "https://api.reddit.com";

struct Broadcast {
    title: String,
    is_live: bool,
    websocket_url: Option<String>,
    /// Microseconds since the epoch.
    start_time: Option<i64>,
    duration: Option<f64>,
}

impl Broadcast {
    fn from_data(post_id: &str, data: &Value) -> Result<Self> {
        let post = data
            .get("post")
            .filter(|p| !p.is_null())
            .ok_or_else(|| ChatError::VideoUnavailable(post_id.to_string()))?;
        let stream = data.get("stream").filter(|s| !s.is_null());
        let start_time = stream
            .and_then(|s| s.get("publish_at"))
            .and_then(Value::as_i64)
            .and_then(|ms| ms.checked_mul(1000))
            .or_else(|| json_str(post, &["createdAt"]).and_then(rfc3339_to_micros));
        Ok(Self {
            title: json_str(post, &["title"]).unwrap_or_default().to_string(),
            is_live: stream.and_then(|s| json_str(s, &["state"])) == Some("IS_LIVE"),
            websocket_url: json_str(post, &["liveCommentsWebsocket"]).map(String::from),
            start_time,
            duration: stream.and_then(|s| s.get("duration")).and_then(Value::as_f64),
        })
    }
}

pub struct Reddit {
    http: Http,
    strapi_url: String,
    pushshift_url: String,
    api_url: String,
}

impl Reddit {
    pub fn new(config: &SessionConfig) -> Result<Self> {
        Ok(Self {
            http: Http::new(config.build_client()?, config),
            strapi_url: config.base_url("reddit_strapi", STRAPI_URL),
            pushshift_url: config.base_url("reddit_pushshift", PUSHSHIFT_URL),
            api_url: config.base_url("reddit", API_URL),
        })
    }

    async fn broadcast(
        &self,
        post_id: &str,
        params: &ResolvedParams,
        token: &CancellationToken,
    ) -> Result<Broadcast> {
        let url = format!("{}/videos/t3_{post_id}", self.strapi_url);
        let (http, url) = (&self.http, &url);
        let response: Value = with_retries(params.max_attempts, params.retry_timeout, token, || async move {
            let response = http.get(url).send().await?;
            if response.status() == StatusCode::NOT_FOUND {
                return Err(ChatError::VideoUnavailable(post_id.to_string()));
            }
            let body = response.error_for_status()?.text().await?;
            parse_json_body(&body)
        })
        .await?;
        if json_str(&response, &["status"]) == Some("failure") {
            return Err(ChatError::VideoUnavailable(post_id.to_string()));
        }
        let data = response
            .get("data")
            .ok_or_else(|| ChatError::parsing("broadcast response without data"))?;
        Broadcast::from_data(post_id, data)
    }
}

#[async_trait]
impl ChatSite for Reddit {
    fn name(&self) -> &'static str {
        "reddit"
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
        let post_id = capture_group_1_or_invalid_url(&URL_REGEX, url)?.to_string();
        let broadcast = self.broadcast(&post_id, &params, &token).await?;
        info!(post_id = %post_id, title = %broadcast.title, is_live = broadcast.is_live, "Found Reddit broadcast");

        let info = ChatInfo {
            site: "reddit",
            id: post_id.clone(),
            title: broadcast.title,
            duration: broadcast.duration,
            is_live: broadcast.is_live,
            start_time: broadcast.start_time,
        };
        let events = match (broadcast.is_live, broadcast.websocket_url) {
            (true, Some(websocket_url)) => live::LiveFeed {
                websocket_url,
                params,
                token: token.clone(),
            }
            .into_stream(),
            (true, None) => {
                return Err(ChatError::ChatDisabled(format!("{post_id} has no live comments")));
            }
            (false, _) => replay::ReplayFeed {
                http: self.http.clone(),
                comment_ids_url: format!("{}/reddit/submission/comment_ids/{post_id}", self.pushshift_url),
                info_url: format!("{}/api/info", self.api_url),
                start: broadcast.start_time.map(|us| us as f64 / 1_000_000.0),
                params,
                token: token.clone(),
            }
            .into_stream(),
        };
        Ok(Chat::new(info, events, token))
    }
}
