//! Watch page parsing: metadata, innertube config and chat continuations.

use std::sync::LazyLock;

use regex::Regex;
use rustc_hash::FxHashMap;
use serde_json::{Value, json};
use tracing::{debug, warn};

use crate::chat::params::ChatType;
use crate::chat::time::rfc3339_to_micros;
use crate::error::{ChatError, Result};
use crate::utils::{capture_group_1, extract_json_object, json_path, json_str};

static API_KEY_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#""INNERTUBE_API_KEY"\s*:\s*"([^"]+)""#).unwrap());

const INITIAL_DATA_MARKERS: &[&str] = &["var ytInitialData", "window[\"ytInitialData\"]"];
const PLAYER_RESPONSE_MARKERS: &[&str] = &[
    "var ytInitialPlayerResponse",
    "window[\"ytInitialPlayerResponse\"]",
];

fn default_context() -> Value {
    json!({
        "client": {
            "clientName": "WEB",
            "clientVersion": "2.20230622.06.00"
        }
    })
}

fn find_object(html: &str, markers: &[&str]) -> Option<Value> {
    markers
        .iter()
        .find_map(|marker| extract_json_object(html, marker))
}

/// Everything needed from the watch page to start polling chat.
#[derive(Debug, Clone)]
pub struct WatchPage {
    pub title: String,
    pub is_live: bool,
    pub duration: Option<f64>,
    pub start_time: Option<i64>,
    pub api_key: String,
    pub context: Value,
    /// Chat view title (`"Live chat replay"`) → continuation token.
    pub continuations: FxHashMap<String, String>,
    pub playability_status: Option<String>,
    pub playability_reason: Option<String>,
}

impl WatchPage {
    pub fn parse(html: &str) -> Result<Self> {
        let Some(initial_data) = find_object(html, INITIAL_DATA_MARKERS) else {
            return Err(ChatError::unexpected_html(html));
        };
        let player = find_object(html, PLAYER_RESPONSE_MARKERS).unwrap_or(Value::Null);

        let api_key = capture_group_1(&API_KEY_REGEX, html)
            .ok_or_else(|| ChatError::parsing("INNERTUBE_API_KEY not found on watch page"))?
            .to_string();
        let context =
            extract_json_object(html, "\"INNERTUBE_CONTEXT\":").unwrap_or_else(default_context);

        let details = player.get("videoDetails");
        let title = details
            .and_then(|d| json_str(d, &["title"]))
            .unwrap_or_default()
            .to_string();
        let is_live = details
            .and_then(|d| d.get("isLive"))
            .and_then(Value::as_bool)
            .unwrap_or(false);
        let duration = details
            .and_then(|d| json_str(d, &["lengthSeconds"]))
            .and_then(|s| s.parse::<f64>().ok())
            .filter(|d| !is_live && *d > 0.0);
        let start_time = json_str(
            &player,
            &[
                "microformat",
                "playerMicroformatRenderer",
                "liveBroadcastDetails",
                "startTimestamp",
            ],
        )
        .and_then(rfc3339_to_micros);

        let playability_status = json_str(&player, &["playabilityStatus", "status"]).map(String::from);
        let playability_reason = json_str(&player, &["playabilityStatus", "reason"]).map(String::from);

        let continuations = parse_continuations(&initial_data, is_live);
        debug!(
            title = %title,
            is_live,
            views = ?continuations.keys().collect::<Vec<_>>(),
            "Parsed watch page"
        );

        Ok(Self {
            title,
            is_live,
            duration,
            start_time,
            api_key,
            context,
            continuations,
            playability_status,
            playability_reason,
        })
    }

    /// Pick the continuation for the requested chat view, or explain why
    /// there is none.
    pub fn select_continuation(&self, chat_type: ChatType) -> Result<String> {
        let (wanted, fallback) = match (chat_type, self.is_live) {
            (ChatType::Top, true) => ("Top chat", "Live chat"),
            (ChatType::Live, true) => ("Live chat", "Top chat"),
            (ChatType::Top, false) => ("Top chat replay", "Live chat replay"),
            (ChatType::Live, false) => ("Live chat replay", "Top chat replay"),
        };
        if let Some(token) = self.continuations.get(wanted) {
            return Ok(token.clone());
        }
        if let Some(token) = self.continuations.get(fallback) {
            warn!(wanted, found = fallback, "Requested chat view not available, using another");
            return Ok(token.clone());
        }

        let reason = self
            .playability_reason
            .clone()
            .unwrap_or_else(|| self.title.clone());
        Err(match self.playability_status.as_deref() {
            Some("ERROR") => ChatError::VideoUnavailable(reason),
            Some("LOGIN_REQUIRED") => ChatError::LoginRequired(reason),
            Some("UNPLAYABLE") => ChatError::VideoUnplayable(reason),
            _ if self.is_live => ChatError::ChatDisabled(reason),
            _ => ChatError::NoChatReplay(reason),
        })
    }
}

fn parse_continuations(initial_data: &Value, is_live: bool) -> FxHashMap<String, String> {
    let mut out = FxHashMap::default();
    let Some(renderer) = json_path(
        initial_data,
        &[
            "contents",
            "twoColumnWatchNextResults",
            "conversationBar",
            "liveChatRenderer",
        ],
    ) else {
        return out;
    };

    let items = renderer
        .pointer("/header/liveChatHeaderRenderer/viewSelector/sortFilterSubMenuRenderer/subMenuItems")
        .and_then(Value::as_array);
    for item in items.into_iter().flatten() {
        let title = item.get("title").and_then(Value::as_str);
        let token = item
            .pointer("/continuation/reloadContinuationData/continuation")
            .and_then(Value::as_str);
        if let (Some(title), Some(token)) = (title, token) {
            out.insert(title.to_string(), token.to_string());
        }
    }

    if out.is_empty() {
        let token = renderer
            .pointer("/continuations/0/reloadContinuationData/continuation")
            .and_then(Value::as_str);
        if let Some(token) = token {
            let is_replay = renderer
                .get("isReplay")
                .and_then(Value::as_bool)
                .unwrap_or(!is_live);
            let title = if is_replay { "Live chat replay" } else { "Live chat" };
            out.insert(title.to_string(), token.to_string());
        }
    }
    out
}
