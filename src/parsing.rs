//! Resilient parsing of model output.
//!
//! Models wrap JSON in code fences, add prose around it, or emit almost-JSON
//! with trailing commas and unescaped quotes. Callers get a [`ParseResult`]
//! and decide what a malformed payload means for them.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Value};

static FENCE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)```[a-zA-Z0-9_-]*\s*(.*?)\s*```").unwrap());

#[derive(Debug, Clone, PartialEq)]
pub enum ParseResult<T> {
    Ok(T),
    /// Nothing usable could be recovered; carries the raw text.
    Malformed(String),
}

impl<T> ParseResult<T> {
    pub fn ok(self) -> Option<T> {
        match self {
            ParseResult::Ok(value) => Some(value),
            ParseResult::Malformed(_) => None,
        }
    }

    pub fn is_malformed(&self) -> bool {
        matches!(self, ParseResult::Malformed(_))
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> ParseResult<U> {
        match self {
            ParseResult::Ok(value) => ParseResult::Ok(f(value)),
            ParseResult::Malformed(raw) => ParseResult::Malformed(raw),
        }
    }
}

/// Returns the body of the first fenced block, or the trimmed input.
pub fn strip_code_fences(text: &str) -> &str {
    match FENCE_RE.captures(text).and_then(|c| c.get(1)) {
        Some(inner) => inner.as_str().trim(),
        None => text.trim(),
    }
}

/// Parses a JSON object out of model output.
///
/// Tries the fenced/trimmed text directly, then the outermost `{...}` span,
/// then the same span with trailing commas removed.
pub fn parse_json_object(text: &str) -> ParseResult<Map<String, Value>> {
    let body = strip_code_fences(text);

    if let Ok(Value::Object(map)) = serde_json::from_str::<Value>(body) {
        return ParseResult::Ok(map);
    }

    if let (Some(start), Some(end)) = (body.find('{'), body.rfind('}')) {
        if start < end {
            let span = &body[start..=end];
            if let Ok(Value::Object(map)) = serde_json::from_str::<Value>(span) {
                return ParseResult::Ok(map);
            }

            let cleaned = remove_trailing_commas(span);
            if let Ok(Value::Object(map)) = serde_json::from_str::<Value>(&cleaned) {
                return ParseResult::Ok(map);
            }
        }
    }

    ParseResult::Malformed(text.to_string())
}

fn remove_trailing_commas(text: &str) -> String {
    static TRAILING_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r",\s*([}\]])").unwrap());
    TRAILING_RE.replace_all(text, "$1").to_string()
}

/// Field-by-field regex recovery for JSON too broken to parse.
///
/// Each name is looked up as `"name": <string|number|bool>` anywhere in the
/// text; the first occurrence wins. Names with no match are left out.
pub fn recover_fields(text: &str, names: &[&str]) -> Map<String, Value> {
    let mut recovered = Map::new();

    for name in names {
        let pattern = format!(
            r#""{}"\s*:\s*(?:"((?:[^"\\]|\\.)*)"|(true|false)|(-?\d+(?:\.\d+)?))"#,
            regex::escape(name)
        );
        let Ok(re) = Regex::new(&pattern) else {
            continue;
        };
        let Some(caps) = re.captures(text) else {
            continue;
        };

        let value = if let Some(s) = caps.get(1) {
            Value::String(unescape(s.as_str()))
        } else if let Some(b) = caps.get(2) {
            Value::Bool(b.as_str() == "true")
        } else if let Some(n) = caps.get(3) {
            n.as_str()
                .parse::<f64>()
                .ok()
                .and_then(serde_json::Number::from_f64)
                .map(Value::Number)
                .unwrap_or(Value::Null)
        } else {
            continue;
        };

        recovered.insert((*name).to_string(), value);
    }

    recovered
}

fn unescape(raw: &str) -> String {
    serde_json::from_str::<String>(&format!("\"{}\"", raw)).unwrap_or_else(|_| {
        raw.replace("\\n", "\n")
            .replace("\\\"", "\"")
            .replace("\\\\", "\\")
    })
}

/// Reads a string field, ignoring blanks.
pub fn str_field<'a>(map: &'a Map<String, Value>, name: &str) -> Option<&'a str> {
    map.get(name)
        .and_then(|v| v.as_str())
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

/// Reads a boolean that models sometimes emit as a string.
pub fn bool_field(map: &Map<String, Value>, name: &str) -> Option<bool> {
    match map.get(name)? {
        Value::Bool(b) => Some(*b),
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "yes" => Some(true),
            "false" | "no" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

/// Reads a number that models sometimes emit as a string.
pub fn f64_field(map: &Map<String, Value>, name: &str) -> Option<f64> {
    match map.get(name)? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}
