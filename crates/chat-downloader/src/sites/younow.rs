//! YouNow live broadcasts.
//!
//! The broadcast info endpoint returns the most recent comments of a live
//! broadcast; it is polled and overlapping comments are dropped.

use std::sync::LazyLock;
use std::time::Duration;

use async_stream::stream;
use async_trait::async_trait;
use regex::Regex;
use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::chat::event::ChatEvent;
use crate::chat::filter::MessageGroups;
use crate::chat::handle::{Chat, ChatInfo, ChatStream};
use crate::chat::params::{ResolvedParams, SiteDefaults};
use crate::chat::poll::{POLL_INTERVAL, RecentIds};
use crate::chat::remap::{Remap, RemapTable, seconds_to_micros, to_bool};
use crate::chat::retry::{interruptible_sleep, with_retries};
use crate::chat::session::{Http, SessionConfig};
use crate::chat::site::ChatSite;
use crate::error::{ChatError, Result};
use crate::utils::{capture_group_1_or_invalid_url, json_str};

pub static URL_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^https?://(?:www\.)?younow\.com/([^/?#]+)").unwrap());

pub static MESSAGE_GROUPS: MessageGroups = MessageGroups::new(&[("messages", &["text_message"])]);

pub static DEFAULTS: SiteDefaults = SiteDefaults::new(&MESSAGE_GROUPS, &["messages"]);

const API_URL: &str = "https://api.younow.com";

static COMMENT_REMAP: LazyLock<RemapTable> = LazyLock::new(|| {
    RemapTable::new(&[
        ("commentId", Remap::to("message_id")),
        ("comment", Remap::to("message")),
        ("timestamp", Remap::with("timestamp", seconds_to_micros)),
        ("userId", Remap::to("author_id")),
        ("name", Remap::to("author_name")),
        ("profileUrlString", Remap::to("author_profile_url")),
        ("userLevel", Remap::to("author_level")),
        ("isBroadcasterMod", Remap::with("author_is_moderator", to_bool)),
        ("broadcasterMod", Remap::with("author_is_moderator", to_bool)),
        ("subscriptionType", Remap::to("author_subscription_type")),
        ("globalSpenderRank", Remap::to("author_spender_rank")),
    ])
});

/// Convert one comment of the broadcast info response.
pub fn parse_comment(raw: &Map<String, Value>) -> Option<ChatEvent> {
    let mut map = COMMENT_REMAP.remap_object(raw);
    for key in ["message_id", "author_id"] {
        if let Some(id) = map.get(key).filter(|id| id.is_number()).map(Value::to_string) {
            map.insert(key.into(), Value::String(id));
        }
    }
    let subscribed = map
        .get("author_subscription_type")
        .and_then(Value::as_i64)
        .is_some_and(|t| t > 0);
    map.insert("author_is_subscriber".into(), Value::Bool(subscribed));
    map.insert("message_type".into(), Value::String("text_message".into()));
    match ChatEvent::from_canonical(map) {
        Ok(event) => Some(event),
        Err(e) => {
            warn!(error = %e, "Failed to build chat event from YouNow comment");
            None
        }
    }
}

/// A broadcast info response, or why there is none.
fn broadcast_data(user: &str, response: Value) -> Result<Value> {
    match response.get("errorCode").and_then(Value::as_i64) {
        None | Some(0) => Ok(response),
        Some(code) => {
            let reason = json_str(&response, &["errorMsg"]).unwrap_or("not broadcasting");
            debug!(user, code, reason, "YouNow broadcast unavailable");
            Err(ChatError::UserNotFound(format!("{user}: {reason}")))
        }
    }
}

async fn fetch_broadcast(http: &Http, url: &str, user: &str) -> Result<Value> {
    let response: Value = http.get_json(url).await?;
    broadcast_data(user, response)
}

pub struct YouNow {
    http: Http,
    api_url: String,
}

impl YouNow {
    pub fn new(config: &SessionConfig) -> Result<Self> {
        Ok(Self {
            http: Http::new(config.build_client()?, config),
            api_url: config.base_url("younow", API_URL),
        })
    }

    fn info_url(&self, user: &str) -> String {
        format!(
            "{}/php/api/broadcast/info/curId=0/user={}",
            self.api_url,
            urlencoding::encode(user)
        )
    }
}

#[async_trait]
impl ChatSite for YouNow {
    fn name(&self) -> &'static str {
        "younow"
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
        let user = capture_group_1_or_invalid_url(&URL_REGEX, url)?.to_string();
        let info_url = self.info_url(&user);
        let broadcast = with_retries(params.max_attempts, params.retry_timeout, &token, || {
            fetch_broadcast(&self.http, &info_url, &user)
        })
        .await?;
        let title = json_str(&broadcast, &["title"])
            .filter(|t| !t.is_empty())
            .unwrap_or(&user)
            .to_string();
        info!(user = %user, title = %title, "Found YouNow broadcast");

        let info = ChatInfo {
            site: "younow",
            id: json_str(&broadcast, &["broadcastId"]).unwrap_or(&user).to_string(),
            title,
            duration: None,
            is_live: true,
            start_time: None,
        };
        let feed = CommentFeed {
            http: self.http.clone(),
            info_url,
            user,
            params,
            token: token.clone(),
            poll_interval: POLL_INTERVAL,
        };
        Ok(Chat::new(info, feed.into_stream(), token))
    }
}

pub struct CommentFeed {
    pub http: Http,
    pub info_url: String,
    pub user: String,
    pub params: ResolvedParams,
    pub token: CancellationToken,
    pub poll_interval: Duration,
}

impl CommentFeed {
    /// Poll until the broadcast ends or the stream is cancelled.
    pub fn into_stream(self) -> ChatStream {
        Box::pin(stream! {
            let params = &self.params;
            let mut recent = RecentIds::default();

            loop {
                let fetched = with_retries(params.max_attempts, params.retry_timeout, &self.token, || {
                    fetch_broadcast(&self.http, &self.info_url, &self.user)
                })
                .await;
                let broadcast = match fetched {
                    Ok(broadcast) => broadcast,
                    Err(ChatError::UserNotFound(reason)) => {
                        info!(reason = %reason, "YouNow broadcast ended");
                        return;
                    }
                    Err(e) => {
                        yield Err(e);
                        return;
                    }
                };

                let mut events: Vec<ChatEvent> = broadcast
                    .get("comments")
                    .and_then(Value::as_array)
                    .into_iter()
                    .flatten()
                    .filter_map(Value::as_object)
                    .filter_map(parse_comment)
                    .collect();
                events.sort_by_key(|e| e.timestamp);
                for event in events {
                    let Some(id) = event.message_id.as_deref() else {
                        continue;
                    };
                    if !recent.insert(id) {
                        continue;
                    }
                    if params.filter.must_add_item(&event.message_type) {
                        yield Ok(event);
                    }
                }

                if let Err(e) = interruptible_sleep(self.poll_interval, &self.token).await {
                    yield Err(e);
                    return;
                }
            }
        })
    }
}
