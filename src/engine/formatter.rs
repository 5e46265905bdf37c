//! Turns raw executor output into the user-facing answer.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Value};
use std::fmt::Write as _;
use std::sync::Arc;

use crate::providers::{CompletionOptions, ModelGateway};

pub const FORMATTER_SYSTEM_PROMPT: &str = "You turn raw agent output into a clear, friendly answer \
to the user's request.\n\
Formatting rules:\n\
- Start with a one-sentence summary, then use markdown headings where they help.\n\
- List every item as its own top-level bullet (`- `). Include EVERY item from the data, \
never a sample, and never merge items.\n\
- Show prices with their currency symbol, ratings and review counts when present.\n\
- Render links as clickable markdown links.\n\
- Do not invent items or details that are not in the data.";

pub const LAST_RESORT_MESSAGE: &str =
    "I found some information for your request but couldn't format it properly. Please try again.";

const BASE_TOKENS: u32 = 1024;
const TOKENS_PER_ITEM: u32 = 120;
const MAX_TOKENS: u32 = 8192;
const COMPLETENESS_RATIO: f64 = 0.8;

static BULLET_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^(?:[-*•+]|\d+[.)])\s+\S").unwrap());

const NAME_FIELDS: &[&str] = &["title", "name", "productName", "product", "headline"];
const PRICE_FIELDS: &[&str] = &["price", "cost", "amount"];
const LINK_FIELDS: &[&str] = &["link", "url", "href"];

const FEATURE_TAGS: &[(&str, &str)] = &[
    ("wireless", "Wireless"),
    ("bluetooth", "Bluetooth"),
    ("noise cancel", "Noise Cancelling"),
    ("anc", "Noise Cancelling"),
    ("waterproof", "Waterproof"),
    ("water resistant", "Water Resistant"),
    ("ipx", "Water Resistant"),
    ("gaming", "Gaming"),
    ("usb-c", "USB-C"),
    ("fast charg", "Fast Charging"),
    ("rechargeable", "Rechargeable"),
    ("portable", "Portable"),
    ("4k", "4K"),
    ("ergonomic", "Ergonomic"),
    ("organic", "Organic"),
];

/// Executor output reduced to one data payload and a source label.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedPayload {
    pub data: Value,
    pub source: String,
}

impl NormalizedPayload {
    pub fn items(&self) -> Option<&Vec<Value>> {
        match &self.data {
            Value::Array(items) => Some(items),
            Value::Object(map) => map.get("items").and_then(Value::as_array),
            _ => None,
        }
    }

    pub fn item_count(&self) -> usize {
        self.items().map_or(0, Vec::len)
    }
}

fn present(value: Option<&Value>) -> Option<&Value> {
    value.filter(|v| !v.is_null())
}

/// Accepts `result.extractedData`, `extractedData`, a bare `result`, or the raw value.
pub fn normalize(raw: &Value, source_agent: &str) -> NormalizedPayload {
    let data = present(raw.pointer("/result/extractedData"))
        .or_else(|| present(raw.get("extractedData")))
        .or_else(|| present(raw.get("result")))
        .unwrap_or(raw)
        .clone();

    let source = match raw.get("url").and_then(Value::as_str) {
        Some(url) => format!("{} ({})", source_agent, url),
        None => source_agent.to_string(),
    };

    NormalizedPayload { data, source }
}

/// Top-level list entries in markdown text.
pub fn count_list_items(text: &str) -> usize {
    BULLET_RE.find_iter(text).count()
}

fn first_text(item: &Map<String, Value>, fields: &[&str]) -> Option<String> {
    fields.iter().find_map(|field| match item.get(*field)? {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    })
}

pub fn feature_tags(name: &str) -> Vec<&'static str> {
    let lower = name.to_lowercase();
    let mut tags: Vec<&'static str> = Vec::new();
    for (needle, tag) in FEATURE_TAGS {
        let hit = if needle.len() <= 3 {
            lower
                .split(|c: char| !c.is_alphanumeric())
                .any(|word| word.starts_with(needle))
        } else {
            lower.contains(needle)
        };
        if hit && !tags.contains(tag) {
            tags.push(tag);
        }
    }
    tags
}

fn render_item(index: usize, item: &Value) -> String {
    let Value::Object(fields) = item else {
        let text = match item {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        return format!("{}. {}", index, text);
    };

    let name = first_text(fields, NAME_FIELDS)
        .or_else(|| {
            fields
                .iter()
                .find_map(|(_, v)| v.as_str().filter(|s| !s.trim().is_empty()).map(str::to_string))
        })
        .unwrap_or_else(|| format!("Item {}", index));

    let mut line = format!("{}. **{}**", index, name);
    let price = first_text(fields, PRICE_FIELDS).or_else(|| {
        let value = fields.get("priceValue")?.as_f64()?;
        let currency = fields.get("currency").and_then(Value::as_str).unwrap_or("");
        Some(format!("{}{:.2}", currency, value))
    });
    if let Some(price) = price {
        let _ = write!(line, " - {}", price);
    }
    if let Some(rating) = fields.get("rating").and_then(Value::as_f64) {
        let _ = write!(line, " - ⭐ {}", rating);
    }
    if let Some(reviews) = fields.get("reviewCount").and_then(Value::as_u64) {
        let _ = write!(line, " ({} reviews)", reviews);
    }
    let tags = feature_tags(&name);
    if !tags.is_empty() {
        let _ = write!(line, " [{}]", tags.join(", "));
    }
    if let Some(link) = first_text(fields, LINK_FIELDS) {
        let _ = write!(line, "\n   Link: {}", link);
    }
    line
}

fn render_plain(data: &Value) -> Option<String> {
    match data {
        Value::Null => None,
        Value::String(s) if s.trim().is_empty() => None,
        Value::String(s) => Some(s.trim().to_string()),
        Value::Object(map) if map.is_empty() => None,
        Value::Object(map) => Some(
            map.iter()
                .filter(|(_, v)| !v.is_null())
                .map(|(k, v)| match v {
                    Value::String(s) => format!("- **{}**: {}", k, s),
                    other => format!("- **{}**: {}", k, other),
                })
                .collect::<Vec<_>>()
                .join("\n"),
        ),
        other => Some(other.to_string()),
    }
}

/// Code-only rendering that lists every item. `None` when there is nothing to show.
pub fn render_deterministic(raw: &Value, source_agent: &str) -> Option<String> {
    let payload = normalize(raw, source_agent);
    match payload.items() {
        Some(items) if !items.is_empty() => {
            let mut out = format!(
                "Here {} all {} result{} from {}:\n\n",
                if items.len() == 1 { "is" } else { "are" },
                items.len(),
                if items.len() == 1 { "" } else { "s" },
                payload.source
            );
            let lines: Vec<String> = items
                .iter()
                .enumerate()
                .map(|(i, item)| render_item(i + 1, item))
                .collect();
            out.push_str(&lines.join("\n"));
            Some(out)
        }
        Some(_) => None,
        None => render_plain(&payload.data),
    }
}

pub struct ResultFormatter {
    gateway: Arc<ModelGateway>,
}

impl ResultFormatter {
    pub fn new(gateway: Arc<ModelGateway>) -> Self {
        Self { gateway }
    }

    /// Never fails; falls back to code-driven formatting, then to a fixed message.
    pub async fn format(&self, user_prompt: &str, raw: &Value, source_agent: &str) -> String {
        let payload = normalize(raw, source_agent);
        let expected = payload.item_count();

        let max_tokens = (BASE_TOKENS + TOKENS_PER_ITEM * expected as u32).min(MAX_TOKENS);
        let prompt = format!(
            "User request: {}\nSource: {}\nItem count: {}\n\nData:\n{}",
            user_prompt,
            payload.source,
            expected,
            serde_json::to_string_pretty(&payload.data).unwrap_or_default()
        );

        match self
            .gateway
            .complete(
                FORMATTER_SYSTEM_PROMPT,
                prompt,
                &CompletionOptions::default().with_max_tokens(max_tokens),
            )
            .await
        {
            Ok(text) if !text.trim().is_empty() => {
                let listed = count_list_items(&text);
                let too_few = (listed as f64) < COMPLETENESS_RATIO * expected as f64;
                if expected > 0 && (too_few || listed > expected) {
                    log::warn!(
                        "Formatter listed {} items for {}; using deterministic formatting",
                        listed,
                        expected
                    );
                    self.fallback(raw, source_agent)
                } else {
                    text.trim().to_string()
                }
            }
            Ok(_) => self.fallback(raw, source_agent),
            Err(err) => {
                log::warn!("Formatter model call failed: {}", err);
                self.fallback(raw, source_agent)
            }
        }
    }

    fn fallback(&self, raw: &Value, source_agent: &str) -> String {
        render_deterministic(raw, source_agent).unwrap_or_else(|| LAST_RESORT_MESSAGE.to_string())
    }
}
