use regex::Regex;
use serde_json::Value;

use crate::error::{ChatError, Result};

#[inline]
pub fn capture_group_1<'a>(re: &Regex, input: &'a str) -> Option<&'a str> {
    re.captures(input)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
}

#[inline]
pub fn capture_group_1_or_invalid_url<'a>(re: &Regex, input: &'a str) -> Result<&'a str> {
    capture_group_1(re, input).ok_or_else(|| ChatError::InvalidUrl(input.to_string()))
}

/// Extract the JSON object assigned after `marker` in an HTML page
/// (`var ytInitialData = {...};`).
///
/// Scans for the matching closing brace, honouring string literals, so the
/// surrounding script may contain anything.
pub fn extract_json_object(html: &str, marker: &str) -> Option<Value> {
    let start = html.find(marker)? + marker.len();
    let rest = &html[start..];
    let open = rest.find('{')?;
    if !rest[..open].trim().trim_start_matches('=').trim().is_empty() {
        return None;
    }
    let body = &rest[open..];

    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (i, c) in body.char_indices() {
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return serde_json::from_str(&body[..=i]).ok();
                }
            }
            _ => {}
        }
    }
    None
}

/// Follow a chain of object keys.
pub fn json_path<'a>(value: &'a Value, path: &[&str]) -> Option<&'a Value> {
    path.iter().try_fold(value, |v, key| v.get(*key))
}

#[inline]
pub fn json_str<'a>(value: &'a Value, path: &[&str]) -> Option<&'a str> {
    json_path(value, path).and_then(Value::as_str)
}
