//! Live chat action and renderer parsing.
//!
//! A batch from the chat endpoint holds `actions[]`, each an object with one
//! meaningful key (`addChatItemAction`, `markChatItemAsDeletedAction`, ...).
//! Item payloads are keyed by their renderer name
//! (`liveChatTextMessageRenderer`) and go through the remap table.

use std::sync::LazyLock;

use serde_json::{Map, Value};
use tracing::{debug, trace, warn};

use crate::chat::event::{Badge, ChatEvent};
use crate::chat::filter::MessageGroups;
use crate::chat::params::SiteDefaults;
use crate::chat::remap::{Remap, RemapTable, argb_to_hex, money, thumbnails, to_bool, to_int};
use crate::chat::time::seconds_to_time;

pub static MESSAGE_GROUPS: MessageGroups = MessageGroups::new(&[
    ("messages", &["text_message"]),
    (
        "superchat",
        &[
            "paid_message",
            "paid_sticker",
            "ticker_paid_message_item",
            "ticker_paid_sticker_item",
        ],
    ),
    (
        "tickers",
        &[
            "ticker_paid_sticker_item",
            "ticker_paid_message_item",
            "ticker_sponsor_item",
        ],
    ),
    ("banners", &["banner", "banner_header", "remove_banner"]),
    ("donations", &["donation_announcement"]),
    ("engagement", &["viewer_engagement_message"]),
    ("purchases", &["purchased_product_message"]),
    ("mode_changes", &["mode_change_message"]),
    ("deleted", &["message_deleted", "author_messages_deleted"]),
    ("placeholder", &["placeholder_item"]),
    ("tooltips", &["tooltip"]),
    (
        "membership",
        &[
            "membership_item",
            "ticker_sponsor_item",
            "sponsorships_gift_purchase_announcement",
            "sponsorships_gift_redemption_announcement",
        ],
    ),
]);

pub static DEFAULTS: SiteDefaults = SiteDefaults::new(&MESSAGE_GROUPS, &["messages"]);

/// Renderers we know how to name; anything else is still forwarded.
const KNOWN_RENDERERS: &[&str] = &[
    "liveChatTextMessageRenderer",
    "liveChatPaidMessageRenderer",
    "liveChatPaidStickerRenderer",
    "liveChatMembershipItemRenderer",
    "liveChatViewerEngagementMessageRenderer",
    "liveChatPlaceholderItemRenderer",
    "liveChatModeChangeMessageRenderer",
    "liveChatPurchasedProductMessageRenderer",
    "liveChatDonationAnnouncementRenderer",
    "liveChatTickerPaidMessageItemRenderer",
    "liveChatTickerPaidStickerItemRenderer",
    "liveChatTickerSponsorItemRenderer",
    "liveChatBannerRenderer",
    "liveChatBannerHeaderRenderer",
    "liveChatSponsorshipsGiftPurchaseAnnouncementRenderer",
    "liveChatSponsorshipsGiftRedemptionAnnouncementRenderer",
    "tooltipRenderer",
];

/// Control actions that carry no chat content.
const IGNORED_ACTIONS: &[&str] = &[
    "showLiveChatActionPanelAction",
    "closeLiveChatActionPanelAction",
    "updateLiveChatPollAction",
    "liveChatReportModerationStateCommand",
    "addLiveChatTextMessageFromTemplateAction",
    "showLiveChatDialogAction",
    "updateDateTextAction",
    "updateDescriptionAction",
    "updateTitleAction",
    "updateToggleButtonTextAction",
    "updateViewershipAction",
];

static ITEM_REMAP: LazyLock<RemapTable> = LazyLock::new(|| {
    RemapTable::new(&[
        ("id", Remap::to("message_id")),
        ("authorExternalChannelId", Remap::to("author_id")),
        ("authorName", Remap::with("author_name", text)),
        ("authorPhoto", Remap::with("author_images", thumbnails)),
        ("message", Remap::with("message", text)),
        ("text", Remap::with("message", text)),
        ("subtext", Remap::with("sub_message", text)),
        ("timestampUsec", Remap::with("timestamp", to_int)),
        ("purchaseAmountText", Remap::with("money", money)),
        ("amount", Remap::with("money", money)),
        ("headerPrimaryText", Remap::with("header_primary_text", text)),
        ("headerSubtext", Remap::with("header_secondary_text", text)),
        ("detailText", Remap::with("detail_text", text)),
        ("detailsText", Remap::with("message", text)),
        ("bodyBackgroundColor", Remap::with("body_background_colour", argb_to_hex)),
        ("bodyTextColor", Remap::with("body_text_colour", argb_to_hex)),
        ("headerBackgroundColor", Remap::with("header_background_colour", argb_to_hex)),
        ("headerTextColor", Remap::with("header_text_colour", argb_to_hex)),
        ("authorNameTextColor", Remap::with("author_name_text_colour", argb_to_hex)),
        ("backgroundColor", Remap::with("background_colour", argb_to_hex)),
        ("moneyChipBackgroundColor", Remap::with("money_chip_background_colour", argb_to_hex)),
        ("moneyChipTextColor", Remap::with("money_chip_text_colour", argb_to_hex)),
        ("startBackgroundColor", Remap::with("start_background_colour", argb_to_hex)),
        ("endBackgroundColor", Remap::with("end_background_colour", argb_to_hex)),
        ("sticker", Remap::with("sticker_images", thumbnails)),
        ("stickerDisplayWidth", Remap::with("sticker_width", to_int)),
        ("stickerDisplayHeight", Remap::with("sticker_height", to_int)),
        ("durationSec", Remap::with("ticker_duration", to_int)),
        ("fullDurationSec", Remap::with("ticker_full_duration", to_int)),
        ("icon", Remap::with("icon", icon_type)),
        ("isStackable", Remap::with("is_stackable", to_bool)),
        ("actionId", Remap::to("action_id")),
        ("targetId", Remap::to("target_id")),
        ("bannerType", Remap::to("banner_type")),
        ("showItemEndpoint", Remap::with("ticker_item", nested_item)),
        ("header", Remap::with("header", nested_item)),
        ("contents", Remap::with("contents", nested_item)),
    ])
});

/// Flatten `{simpleText}` or `{runs: [...]}` into plain text.
///
/// Emoji runs become their first shortcut (`:smile:`), falling back to the
/// emoji id. Link runs whose text was shortened are replaced by the target
/// URL.
pub fn text(value: &Value) -> Option<Value> {
    if let Some(s) = value.as_str() {
        return Some(Value::String(s.to_string()));
    }
    if let Some(s) = value.get("simpleText").and_then(Value::as_str) {
        return Some(Value::String(s.to_string()));
    }
    let runs = value.get("runs")?.as_array()?;
    let mut out = String::new();
    for run in runs {
        if let Some(t) = run.get("text").and_then(Value::as_str) {
            let url = run
                .pointer("/navigationEndpoint/urlEndpoint/url")
                .and_then(Value::as_str);
            match url {
                Some(url) if t.ends_with("...") || t.ends_with('…') => out.push_str(url),
                _ => out.push_str(t),
            }
        } else if let Some(emoji) = run.get("emoji") {
            let name = emoji
                .pointer("/shortcuts/0")
                .or_else(|| emoji.get("emojiId"))
                .and_then(Value::as_str)
                .unwrap_or_default();
            out.push_str(name);
        }
    }
    Some(Value::String(out))
}

fn icon_type(value: &Value) -> Option<Value> {
    value
        .get("iconType")
        .and_then(Value::as_str)
        .map(|s| Value::String(s.to_lowercase()))
}

/// Parse an item hidden behind one or more `*Endpoint` / `renderer`
/// wrappers.
fn nested_item(value: &Value) -> Option<Value> {
    let obj = value.as_object()?;
    if let Some(renderer) = obj.get("renderer") {
        return nested_item(renderer);
    }
    if let Some((_, inner)) = obj.iter().find(|(k, _)| k.ends_with("Endpoint")) {
        return nested_item(inner);
    }
    let (name, body) = obj.iter().next()?;
    if !name.ends_with("Renderer") {
        return None;
    }
    parse_renderer(name, body, None).map(Value::Object)
}

/// `liveChatPaidMessageRenderer` → `paid_message`.
pub fn message_type_from_renderer(name: &str) -> String {
    let stripped = name.strip_prefix("liveChat").unwrap_or(name);
    let stripped = stripped.strip_suffix("Renderer").unwrap_or(stripped);
    camel_to_snake(stripped)
}

/// `markChatItemAsDeletedAction` → `mark_chat_item_as_deleted`.
pub fn action_type_from_name(name: &str) -> String {
    let stripped = name
        .strip_suffix("Action")
        .or_else(|| name.strip_suffix("Command"))
        .unwrap_or(name);
    camel_to_snake(stripped)
}

fn camel_to_snake(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 4);
    for (i, c) in s.chars().enumerate() {
        if c.is_ascii_uppercase() {
            if i > 0 {
                out.push('_');
            }
            out.push(c.to_ascii_lowercase());
        } else {
            out.push(c);
        }
    }
    out
}

fn parse_badges(badges: &[Value], out: &mut Map<String, Value>) {
    let mut parsed = Vec::with_capacity(badges.len());
    for badge in badges {
        let Some(renderer) = badge.get("liveChatAuthorBadgeRenderer") else {
            continue;
        };
        let title = renderer
            .get("tooltip")
            .or_else(|| renderer.pointer("/accessibility/accessibilityData/label"))
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();

        let mut entry = Badge {
            title,
            ..Badge::default()
        };
        if let Some(icon) = renderer.pointer("/icon/iconType").and_then(Value::as_str) {
            let flag = match icon {
                "MODERATOR" => Some("author_is_moderator"),
                "VERIFIED" => Some("author_is_verified"),
                "OWNER" => Some("author_is_owner"),
                _ => None,
            };
            if let Some(flag) = flag {
                out.insert(flag.to_string(), Value::Bool(true));
            }
            entry.icon_name = Some(icon.to_lowercase());
        } else if let Some(custom) = renderer.get("customThumbnail") {
            if let Some(images) = thumbnails(custom).and_then(|v| serde_json::from_value(v).ok()) {
                entry.icons = images;
            }
        }
        parsed.push(entry);
    }
    if let Ok(value) = serde_json::to_value(parsed) {
        out.insert("author_badges".to_string(), value);
    }
}

fn insert_offset(out: &mut Map<String, Value>, offset_ms: i64) {
    let seconds = offset_ms as f64 / 1000.0;
    out.insert("time_in_seconds".to_string(), Value::from(seconds));
    out.insert(
        "time_text".to_string(),
        Value::String(seconds_to_time(seconds)),
    );
}

/// Remap one renderer body into canonical keys.
pub fn parse_renderer(
    name: &str,
    body: &Value,
    offset_ms: Option<i64>,
) -> Option<Map<String, Value>> {
    let body = body.as_object()?;
    if !KNOWN_RENDERERS.contains(&name) {
        debug!(renderer = name, "Unknown renderer, forwarding with best-effort type");
    }

    let mut out = ITEM_REMAP.remap_object(body);
    out.insert(
        "message_type".to_string(),
        Value::String(message_type_from_renderer(name)),
    );
    if let Some(badges) = body.get("authorBadges").and_then(Value::as_array) {
        parse_badges(badges, &mut out);
    }
    // Replays render the offset as text; prefer the exact offset.
    if let Some(time_text) = body.get("timestampText").and_then(text) {
        out.insert("time_text".to_string(), time_text);
    }
    if let Some(offset) = offset_ms {
        insert_offset(&mut out, offset);
    }
    Some(out)
}

fn parse_item(item: &Value, offset_ms: Option<i64>) -> Option<Map<String, Value>> {
    let (name, body) = item.as_object()?.iter().next()?;
    parse_renderer(name, body, offset_ms)
}

fn str_field(value: &Value, key: &str) -> Option<Value> {
    value
        .get(key)
        .and_then(Value::as_str)
        .map(|s| Value::String(s.to_string()))
}

/// Parse a single action into canonical keys. Returns `None` for control
/// actions and unknown shapes.
pub fn parse_action(action: &Value, offset_ms: Option<i64>) -> Option<Map<String, Value>> {
    let (name, body) = action
        .as_object()?
        .iter()
        .find(|(k, _)| k.as_str() != "clickTrackingParams")?;

    let mut out = match name.as_str() {
        "addChatItemAction" | "addLiveChatTickerItemAction" => {
            parse_item(body.get("item")?, offset_ms)?
        }
        "replaceChatItemAction" => {
            let mut out = parse_item(body.get("replacementItem")?, offset_ms)?;
            if let Some(target) = str_field(body, "targetItemId") {
                out.insert("target_message_id".to_string(), target);
            }
            out
        }
        "markChatItemAsDeletedAction" => {
            let mut out = Map::new();
            out.insert("message_type".into(), "message_deleted".into());
            if let Some(target) = str_field(body, "targetItemId") {
                out.insert("target_message_id".to_string(), target);
            }
            if let Some(message) = body.get("deletedStateMessage").and_then(text) {
                out.insert("message".to_string(), message);
            }
            out
        }
        "markChatItemsByAuthorAsDeletedAction" => {
            let mut out = Map::new();
            out.insert("message_type".into(), "author_messages_deleted".into());
            if let Some(target) = str_field(body, "externalChannelId") {
                out.insert("target_author_id".to_string(), target);
            }
            if let Some(message) = body.get("deletedStateMessage").and_then(text) {
                out.insert("message".to_string(), message);
            }
            out
        }
        "addBannerToLiveChatCommand" => {
            let renderer = body.get("bannerRenderer")?;
            parse_item(renderer, offset_ms)?
        }
        "removeBannerForLiveChatCommand" => {
            let mut out = Map::new();
            out.insert("message_type".into(), "remove_banner".into());
            if let Some(target) = str_field(body, "targetActionId") {
                out.insert("target_message_id".to_string(), target);
            }
            out
        }
        "showLiveChatTooltipCommand" => parse_item(body.get("tooltip")?, offset_ms)?,
        other if IGNORED_ACTIONS.contains(&other) => {
            trace!(action = other, "Ignoring control action");
            return None;
        }
        other => {
            debug!(action = other, "Unknown action type");
            return None;
        }
    };

    out.insert(
        "action_type".to_string(),
        Value::String(action_type_from_name(name)),
    );
    if let Some(offset) = offset_ms {
        if !out.contains_key("time_in_seconds") {
            insert_offset(&mut out, offset);
        }
    }
    Some(out)
}

/// Expand replay wrappers into `(action, offset_ms)` pairs.
pub fn flatten_actions(actions: &[Value]) -> Vec<(&Value, Option<i64>)> {
    let mut out = Vec::with_capacity(actions.len());
    for action in actions {
        match action.get("replayChatItemAction") {
            Some(replay) => {
                let offset = replay.get("videoOffsetTimeMsec").and_then(|v| {
                    v.as_str()
                        .and_then(|s| s.parse().ok())
                        .or_else(|| v.as_i64())
                });
                if let Some(inner) = replay.get("actions").and_then(Value::as_array) {
                    out.extend(inner.iter().map(|a| (a, offset)));
                }
            }
            None => out.push((action, None)),
        }
    }
    out
}

/// Parse an action straight into an event.
pub fn parse_event(action: &Value, offset_ms: Option<i64>) -> Option<ChatEvent> {
    let map = parse_action(action, offset_ms)?;
    match ChatEvent::from_canonical(map) {
        Ok(event) => Some(event),
        Err(e) => {
            warn!(error = %e, "Failed to build chat event from action");
            None
        }
    }
}
