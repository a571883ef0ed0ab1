//! Time helpers shared by every site.
//!
//! Offsets are expressed in seconds (`f64`), absolute timestamps in
//! microseconds since the Unix epoch.

use chrono::{DateTime, Utc};

use crate::error::{ChatError, Result};

/// Parse a time offset given either as seconds (`"90"`, `"-5.5"`) or as
/// `[-][hh:]mm:ss` (`"1:30"`, `"01:02:03"`).
pub fn parse_time(input: &str) -> Result<f64> {
    let input = input.trim();
    if input.is_empty() {
        return Err(ChatError::invalid_parameter("empty time value"));
    }

    if let Ok(seconds) = input.parse::<f64>() {
        return Ok(seconds);
    }

    let (sign, body) = match input.strip_prefix('-') {
        Some(rest) => (-1.0, rest),
        None => (1.0, input),
    };

    let parts: Vec<&str> = body.split(':').collect();
    if parts.len() > 3 {
        return Err(ChatError::invalid_parameter(format!(
            "invalid time value: {input}"
        )));
    }

    let mut total = 0.0;
    for part in parts {
        let value: f64 = part
            .parse()
            .map_err(|_| ChatError::invalid_parameter(format!("invalid time value: {input}")))?;
        total = total * 60.0 + value;
    }
    Ok(sign * total)
}

/// Render an offset as `[-][h:]mm:ss`, matching the format YouTube uses for
/// replay timestamps.
pub fn seconds_to_time(seconds: f64) -> String {
    let sign = if seconds < 0.0 { "-" } else { "" };
    let total = seconds.abs().trunc() as u64;
    let (h, m, s) = (total / 3600, (total % 3600) / 60, total % 60);
    if h > 0 {
        format!("{sign}{h}:{m:02}:{s:02}")
    } else {
        format!("{sign}{m}:{s:02}")
    }
}

/// Current time in microseconds since the epoch.
pub fn now_micros() -> i64 {
    Utc::now().timestamp_micros()
}

/// Parse an RFC 3339 date into microseconds since the epoch.
pub fn rfc3339_to_micros(input: &str) -> Option<i64> {
    DateTime::parse_from_rfc3339(input)
        .ok()
        .map(|dt| dt.with_timezone(&Utc).timestamp_micros())
}
