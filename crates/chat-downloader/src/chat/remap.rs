//! Field remapping from raw platform payloads to canonical keys.
//!
//! A [`RemapTable`] maps each raw key to a canonical key, optionally through a
//! transform. Transforms are plain function pointers; a transform returning
//! `None` drops the field.

use rustc_hash::FxHashMap;
use serde_json::{Map, Value};

use crate::chat::event::{Image, Money};

/// Converts a raw value into its canonical representation.
pub type Transform = fn(&Value) -> Option<Value>;

/// Where a raw key ends up.
#[derive(Clone, Copy)]
pub struct Remap {
    pub key: &'static str,
    pub transform: Option<Transform>,
}

impl Remap {
    pub const fn to(key: &'static str) -> Self {
        Self {
            key,
            transform: None,
        }
    }

    pub const fn with(key: &'static str, transform: Transform) -> Self {
        Self {
            key,
            transform: Some(transform),
        }
    }

    pub fn apply(&self, value: &Value) -> Option<Value> {
        match self.transform {
            Some(f) => f(value),
            None => Some(value.clone()),
        }
    }
}

/// A static raw-key → canonical-key table.
pub struct RemapTable {
    entries: FxHashMap<&'static str, Remap>,
}

impl RemapTable {
    pub fn new(entries: &[(&'static str, Remap)]) -> Self {
        Self {
            entries: entries.iter().copied().collect(),
        }
    }

    pub fn get(&self, raw_key: &str) -> Option<&Remap> {
        self.entries.get(raw_key)
    }

    /// Remap one raw entry into `out`. Returns whether the key was known.
    pub fn remap_into(&self, out: &mut Map<String, Value>, raw_key: &str, value: &Value) -> bool {
        let Some(remap) = self.get(raw_key) else {
            return false;
        };
        if let Some(v) = remap.apply(value) {
            out.insert(remap.key.to_string(), v);
        }
        true
    }

    /// Remap every known key of a raw object, ignoring the rest.
    pub fn remap_object(&self, raw: &Map<String, Value>) -> Map<String, Value> {
        let mut out = Map::new();
        for (key, value) in raw {
            self.remap_into(&mut out, key, value);
        }
        out
    }

    /// Same as [`RemapTable::remap_object`] for string-valued maps (IRC tags).
    pub fn remap_strings<'a, I>(&self, raw: I) -> Map<String, Value>
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let mut out = Map::new();
        for (key, value) in raw {
            self.remap_into(&mut out, key, &Value::String(value.to_string()));
        }
        out
    }
}

// Shared transforms.

pub fn to_bool(value: &Value) -> Option<Value> {
    let b = match value {
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_i64().is_some_and(|n| n != 0),
        Value::String(s) => matches!(s.as_str(), "1" | "true" | "True"),
        _ => return None,
    };
    Some(Value::Bool(b))
}

pub fn to_int(value: &Value) -> Option<Value> {
    match value {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f as i64))
            .map(Value::from),
        Value::String(s) => s.trim().parse::<i64>().ok().map(Value::from),
        _ => None,
    }
}

pub fn to_float(value: &Value) -> Option<Value> {
    match value {
        Value::Number(n) => n.as_f64().map(Value::from),
        Value::String(s) => s.trim().parse::<f64>().ok().map(Value::from),
        _ => None,
    }
}

/// Drop empty strings.
pub fn non_empty(value: &Value) -> Option<Value> {
    match value {
        Value::String(s) if s.is_empty() => None,
        Value::Null => None,
        other => Some(other.clone()),
    }
}

pub fn millis_to_micros(value: &Value) -> Option<Value> {
    to_int(value)
        .and_then(|v| v.as_i64())
        .and_then(|ms| ms.checked_mul(1000))
        .map(Value::from)
}

pub fn seconds_to_micros(value: &Value) -> Option<Value> {
    to_float(value)
        .and_then(|v| v.as_f64())
        .map(|s| Value::from((s * 1_000_000.0) as i64))
}

/// Convert an ARGB integer colour into `#rrggbbaa`.
pub fn argb_to_hex(value: &Value) -> Option<Value> {
    let argb = to_int(value)?.as_i64()? as u32;
    let a = (argb >> 24) & 0xff;
    let rgb = argb & 0x00ff_ffff;
    Some(Value::String(format!("#{rgb:06x}{a:02x}")))
}

/// Collect a `[{url, width, height}]` thumbnail list (optionally wrapped in
/// `{thumbnails: [...]}`) into canonical images.
pub fn thumbnails(value: &Value) -> Option<Value> {
    let list = value
        .get("thumbnails")
        .unwrap_or(value)
        .as_array()?;
    let images: Vec<Image> = list
        .iter()
        .filter_map(|t| {
            let url = t.get("url")?.as_str()?;
            let url = if url.starts_with("//") {
                format!("https:{url}")
            } else {
                url.to_string()
            };
            let size = |k: &str| t.get(k).and_then(Value::as_u64).map(|n| n as u32);
            Some(Image::new(url, size("width"), size("height")))
        })
        .collect();
    serde_json::to_value(images).ok()
}

const CURRENCIES: &[(&str, &str)] = &[
    ("A$", "AUD"),
    ("CA$", "CAD"),
    ("NZ$", "NZD"),
    ("HK$", "HKD"),
    ("MX$", "MXN"),
    ("R$", "BRL"),
    ("NT$", "TWD"),
    ("$", "USD"),
    ("€", "EUR"),
    ("£", "GBP"),
    ("¥", "JPY"),
    ("₩", "KRW"),
    ("₹", "INR"),
    ("₱", "PHP"),
    ("₫", "VND"),
    ("₪", "ILS"),
    ("₽", "RUB"),
    ("CHF", "CHF"),
    ("PLN", "PLN"),
    ("SEK", "SEK"),
    ("NOK", "NOK"),
    ("DKK", "DKK"),
];

/// Parse money text such as `"$5.00"`, `"CA$10.00"` or `"1,000 ₩"`.
pub fn parse_money(text: &str) -> Option<Money> {
    let text = text.trim();
    let start = text.find(|c: char| c.is_ascii_digit())?;
    let end = text
        .rfind(|c: char| c.is_ascii_digit())
        .map(|i| i + 1)
        .unwrap_or(text.len());
    let amount: f64 = text[start..end].replace(',', "").parse().ok()?;

    let symbol = format!("{}{}", &text[..start], &text[end..]);
    let symbol = symbol.trim();
    let (currency, currency_symbol) = if symbol.is_empty() {
        (None, None)
    } else {
        let code = CURRENCIES
            .iter()
            .find(|(s, _)| *s == symbol)
            .map(|(_, code)| code.to_string())
            .or_else(|| {
                (symbol.len() == 3 && symbol.chars().all(|c| c.is_ascii_uppercase()))
                    .then(|| symbol.to_string())
            });
        (code, Some(symbol.to_string()))
    };

    Some(Money {
        text: text.to_string(),
        amount,
        currency,
        currency_symbol,
    })
}

/// Transform form of [`parse_money`] for `simpleText` or plain string values.
pub fn money(value: &Value) -> Option<Value> {
    let text = value
        .get("simpleText")
        .and_then(Value::as_str)
        .or_else(|| value.as_str())?;
    serde_json::to_value(parse_money(text)?).ok()
}
