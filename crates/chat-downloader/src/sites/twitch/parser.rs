//! IRC message → chat event conversion.

use std::sync::LazyLock;

use serde_json::{Map, Value, json};
use tracing::{trace, warn};

use crate::chat::event::{ChatEvent, Image};
use crate::chat::filter::MessageGroups;
use crate::chat::params::SiteDefaults;
use crate::chat::remap::{Remap, RemapTable, millis_to_micros, non_empty, to_bool, to_int};
use crate::sites::twitch::irc::IrcMessage;

pub static MESSAGE_GROUPS: MessageGroups = MessageGroups::new(&[
    ("messages", &["text_message"]),
    ("bits", &["cheer", "bits_badge_tier"]),
    (
        "subscriptions",
        &[
            "subscription",
            "resubscription",
            "subscription_gift",
            "anonymous_subscription_gift",
            "mystery_subscription_gift",
            "anonymous_mystery_subscription_gift",
            "extend_subscription",
        ],
    ),
    (
        "upgrades",
        &[
            "prime_paid_upgrade",
            "gift_paid_upgrade",
            "anonymous_gift_paid_upgrade",
        ],
    ),
    (
        "gifts",
        &[
            "reward_gift",
            "standard_pay_forward",
            "community_pay_forward",
        ],
    ),
    ("raids", &["raid", "unraid"]),
    ("rituals", &["ritual"]),
    ("announcements", &["announcement"]),
    ("milestones", &["viewer_milestone"]),
    ("bans", &["ban_user", "timeout_user", "clear_chat"]),
    ("deleted_messages", &["delete_message"]),
    ("hosts", &["start_host", "end_host"]),
    ("room_states", &["room_state"]),
    ("user_states", &["user_state"]),
    ("notices", &["notice"]),
]);

pub static DEFAULTS: SiteDefaults = SiteDefaults::new(&MESSAGE_GROUPS, &["messages"]);

/// `USERNOTICE` `msg-id` values and the message types they become.
const USERNOTICE_TYPES: &[(&str, &str)] = &[
    ("sub", "subscription"),
    ("resub", "resubscription"),
    ("subgift", "subscription_gift"),
    ("anonsubgift", "anonymous_subscription_gift"),
    ("submysterygift", "mystery_subscription_gift"),
    ("anonsubmysterygift", "anonymous_mystery_subscription_gift"),
    ("extendsub", "extend_subscription"),
    ("primepaidupgrade", "prime_paid_upgrade"),
    ("giftpaidupgrade", "gift_paid_upgrade"),
    ("anongiftpaidupgrade", "anonymous_gift_paid_upgrade"),
    ("rewardgift", "reward_gift"),
    ("standardpayforward", "standard_pay_forward"),
    ("communitypayforward", "community_pay_forward"),
    ("raid", "raid"),
    ("unraid", "unraid"),
    ("ritual", "ritual"),
    ("bitsbadgetier", "bits_badge_tier"),
    ("announcement", "announcement"),
    ("viewermilestone", "viewer_milestone"),
];

const EMOTE_URL: &str = "https://static-cdn.jtvnw.net/emoticons/v2";

static TAG_REMAP: LazyLock<RemapTable> = LazyLock::new(|| {
    RemapTable::new(&[
        ("id", Remap::to("message_id")),
        ("user-id", Remap::to("author_id")),
        ("display-name", Remap::with("author_display_name", non_empty)),
        ("color", Remap::with("author_colour", non_empty)),
        ("badges", Remap::with("author_badges", badges)),
        ("badge-info", Remap::with("author_badge_info", non_empty)),
        ("mod", Remap::with("author_is_moderator", to_bool)),
        ("subscriber", Remap::with("author_is_subscriber", to_bool)),
        ("turbo", Remap::with("author_is_turbo", to_bool)),
        ("user-type", Remap::with("author_type", non_empty)),
        ("room-id", Remap::to("channel_id")),
        ("tmi-sent-ts", Remap::with("timestamp", millis_to_micros)),
        ("bits", Remap::with("bits", to_int)),
        ("flags", Remap::with("flags", non_empty)),
        ("client-nonce", Remap::to("client_nonce")),
        ("target-msg-id", Remap::to("target_message_id")),
        ("target-user-id", Remap::to("target_author_id")),
        ("ban-duration", Remap::with("ban_duration", to_int)),
        ("emote-only", Remap::with("emote_only", to_bool)),
        ("followers-only", Remap::with("follower_only", to_int)),
        ("r9k", Remap::with("r9k", to_bool)),
        ("slow", Remap::with("slow", to_int)),
        ("subs-only", Remap::with("subscribers_only", to_bool)),
        ("system-msg", Remap::to("system_message")),
        ("reply-parent-msg-id", Remap::to("in_reply_to_message_id")),
        ("reply-parent-user-id", Remap::to("in_reply_to_author_id")),
        ("reply-parent-display-name", Remap::to("in_reply_to_author_display_name")),
        ("reply-parent-msg-body", Remap::to("in_reply_to_message")),
        ("msg-param-cumulative-months", Remap::with("cumulative_months", to_int)),
        ("msg-param-months", Remap::with("months", to_int)),
        ("msg-param-streak-months", Remap::with("streak_months", to_int)),
        ("msg-param-should-share-streak", Remap::with("share_streak", to_bool)),
        ("msg-param-multimonth-duration", Remap::with("multimonth_duration", to_int)),
        ("msg-param-sub-plan", Remap::to("subscription_type")),
        ("msg-param-sub-plan-name", Remap::to("subscription_plan_name")),
        ("msg-param-recipient-id", Remap::to("gift_recipient_id")),
        ("msg-param-recipient-user-name", Remap::to("gift_recipient_name")),
        ("msg-param-recipient-display-name", Remap::to("gift_recipient_display_name")),
        ("msg-param-gift-months", Remap::with("number_of_months_gifted", to_int)),
        ("msg-param-mass-gift-count", Remap::with("mass_gift_count", to_int)),
        ("msg-param-sender-count", Remap::with("sender_count", to_int)),
        ("msg-param-sender-login", Remap::to("gifter_name")),
        ("msg-param-sender-name", Remap::to("gifter_display_name")),
        ("msg-param-promo-name", Remap::to("promotion_name")),
        ("msg-param-displayName", Remap::to("raider_display_name")),
        ("msg-param-login", Remap::to("raider_name")),
        ("msg-param-viewerCount", Remap::with("number_of_raiders", to_int)),
        ("msg-param-profileImageURL", Remap::to("raider_profile_image_url")),
        ("msg-param-ritual-name", Remap::to("ritual_name")),
        ("msg-param-threshold", Remap::with("bits_threshold", to_int)),
        ("msg-param-category", Remap::to("milestone_category")),
        ("msg-param-value", Remap::with("milestone_value", to_int)),
        ("msg-param-color", Remap::to("announcement_colour")),
    ])
});

/// Turn `subscriber/12,premium/1` into unresolved badges.
fn badges(value: &Value) -> Option<Value> {
    let raw = value.as_str()?;
    let list: Vec<Value> = raw
        .split(',')
        .filter_map(|badge| badge.split_once('/'))
        .map(|(name, version)| json!({ "title": name, "name": name, "version": version }))
        .collect();
    (!list.is_empty()).then_some(Value::Array(list))
}

fn emote_images(id: &str) -> Vec<Image> {
    [("1.0", 28), ("2.0", 56), ("3.0", 112)]
        .into_iter()
        .map(|(scale, size)| {
            Image::new(
                format!("{EMOTE_URL}/{id}/default/dark/{scale}"),
                Some(size),
                Some(size),
            )
        })
        .collect()
}

/// Parse the `emotes` tag (`25:0-4,12-16/1902:6-10`). Positions are
/// character offsets into the message text.
pub fn parse_emotes(raw: &str, text: &str) -> Vec<Value> {
    let chars: Vec<char> = text.chars().collect();
    raw.split('/')
        .filter_map(|emote| emote.split_once(':'))
        .map(|(id, ranges)| {
            let locations: Vec<&str> = ranges.split(',').collect();
            let name = locations
                .first()
                .and_then(|r| r.split_once('-'))
                .and_then(|(a, b)| Some((a.parse::<usize>().ok()?, b.parse::<usize>().ok()?)))
                .filter(|(a, b)| a <= b && *b < chars.len())
                .map(|(a, b)| chars[a..=b].iter().collect::<String>());
            json!({
                "id": id,
                "name": name,
                "locations": locations,
                "images": emote_images(id),
            })
        })
        .collect()
}

/// Emotes from VOD comment fragments (`{text, emote: {emoteID, from}}`).
pub fn parse_emotes_from_fragments(fragments: &[Value]) -> Vec<Value> {
    fragments
        .iter()
        .filter_map(|fragment| {
            let text = fragment.get("text")?.as_str()?;
            let emote = fragment.get("emote").filter(|e| !e.is_null())?;
            let id = emote.get("emoteID")?.as_str()?;
            let from = emote.get("from").and_then(Value::as_u64).unwrap_or(0);
            let to = from + text.chars().count().saturating_sub(1) as u64;
            Some(json!({
                "id": id,
                "name": text,
                "locations": [format!("{from}-{to}")],
                "images": emote_images(id),
            }))
        })
        .collect()
}

/// Convert one IRC message into an event. Commands that carry no chat
/// content (`JOIN`, `PART`, ...) yield `None`.
pub fn parse_message(message: &IrcMessage) -> Option<ChatEvent> {
    let tags = message.tags();
    let tag = |key: &str| {
        tags.iter()
            .find(|(k, _)| *k == key)
            .map(|(_, v)| v.as_str())
            .filter(|v| !v.is_empty())
    };
    let mut map: Map<String, Value> = TAG_REMAP.remap_strings(tags.iter().map(|(k, v)| (*k, v.as_str())));
    let mut text = message.message.clone();

    let message_type = match message.command.as_str() {
        "PRIVMSG" => {
            if let Some(nick) = message.nick() {
                map.insert("author_name".into(), nick.into());
            }
            if let Some(action) = text
                .as_deref()
                .and_then(|t| t.strip_prefix("\u{1}ACTION "))
                .map(|t| t.trim_end_matches('\u{1}').to_string())
            {
                text = Some(action);
                map.insert("is_action".into(), Value::Bool(true));
            }
            if map.contains_key("bits") {
                "cheer".to_string()
            } else {
                "text_message".to_string()
            }
        }
        "USERNOTICE" => {
            if let Some(login) = tag("login") {
                map.insert("author_name".into(), login.into());
            }
            let msg_id = tag("msg-id").unwrap_or("usernotice");
            USERNOTICE_TYPES
                .iter()
                .find(|(id, _)| *id == msg_id)
                .map(|(_, t)| t.to_string())
                .unwrap_or_else(|| msg_id.to_string())
        }
        "CLEARCHAT" => match text.take() {
            Some(target) => {
                map.insert("target_author_name".into(), target.into());
                if map.contains_key("ban_duration") {
                    "timeout_user".to_string()
                } else {
                    "ban_user".to_string()
                }
            }
            None => "clear_chat".to_string(),
        },
        "CLEARMSG" => {
            if let Some(login) = tag("login") {
                map.insert("target_author_name".into(), login.into());
            }
            "delete_message".to_string()
        }
        "NOTICE" => {
            if let Some(notice) = tag("msg-id") {
                map.insert("notice_type".into(), notice.into());
            }
            "notice".to_string()
        }
        "HOSTTARGET" => {
            let raw = text.take().unwrap_or_default();
            let mut parts = raw.split_whitespace();
            let target = parts.next().unwrap_or("-");
            if let Some(viewers) = parts.next().and_then(|v| v.parse::<i64>().ok()) {
                map.insert("viewer_count".into(), viewers.into());
            }
            if target == "-" {
                "end_host".to_string()
            } else {
                map.insert("target_channel".into(), target.into());
                "start_host".to_string()
            }
        }
        "ROOMSTATE" => "room_state".to_string(),
        "USERSTATE" => "user_state".to_string(),
        other => {
            trace!(command = other, "Ignoring IRC command");
            return None;
        }
    };

    if let (Some(raw), Some(body)) = (tag("emotes"), text.as_deref()) {
        map.insert("emotes".into(), Value::Array(parse_emotes(raw, body)));
    }
    if let Some(text) = text.filter(|t| !t.is_empty()) {
        map.insert("message".into(), text.into());
    }
    map.insert("channel_name".into(), message.channel.clone().into());
    map.insert("message_type".into(), message_type.into());

    match ChatEvent::from_canonical(map) {
        Ok(event) => Some(event),
        Err(e) => {
            warn!(error = %e, command = %message.command, "Failed to build chat event from IRC message");
            None
        }
    }
}
