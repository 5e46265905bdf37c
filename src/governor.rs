//! Content governor: keeps every model payload inside the input budget.
//!
//! All operations are pure and never fail. The worst case is an over-budget
//! payload with a warning attached; the caller decides whether to send it.

use serde::Serialize;
use serde_json::{Map, Value};

use crate::config::GovernorConfig;

pub const TRUNCATION_MARKER: &str = "\n\n[Content truncated to fit model limits]";

const MAX_ELEMENTS: usize = 60;
const MAX_TEXT_CONTAINERS: usize = 15;
const MAX_TEXT_CONTAINER_CHARS: usize = 300;
const MAX_GENERIC_ARRAY: usize = 50;
const MAX_SCALAR_CHARS: usize = 500;

/// Token estimate: mean of `words * 1.3` and `chars / 4`, rounded up.
pub fn estimate_tokens(text: &str) -> usize {
    if text.is_empty() {
        return 0;
    }
    let words = text.split_whitespace().count() as f64;
    let chars = text.chars().count() as f64;
    ((words * 1.3 + chars / 4.0) / 2.0).ceil() as usize
}

/// Like [`estimate_tokens`], but anything other than a JSON string costs nothing.
pub fn estimate_value_tokens(value: &Value) -> usize {
    value.as_str().map(estimate_tokens).unwrap_or(0)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SizeCheck {
    pub is_valid: bool,
    pub total_tokens: usize,
    pub exceeds_by: usize,
}

pub fn validate_size(system_prompt: &str, content: &str, max_tokens: usize) -> SizeCheck {
    let total_tokens = estimate_tokens(system_prompt) + estimate_tokens(content);
    SizeCheck {
        is_valid: total_tokens <= max_tokens,
        total_tokens,
        exceeds_by: total_tokens.saturating_sub(max_tokens),
    }
}

/// Shortens `content` to at most `target_length` characters plus the marker.
///
/// Prefers, in order, the last sentence end, newline, or space past 80% of
/// the target; otherwise hard-cuts at the target.
pub fn truncate(content: &str, target_length: usize) -> String {
    if content.chars().count() <= target_length {
        return content.to_string();
    }

    let byte_end = content
        .char_indices()
        .nth(target_length)
        .map(|(i, _)| i)
        .unwrap_or(content.len());
    let window = &content[..byte_end];
    let floor = target_length * 4 / 5;

    let char_pos = |byte: usize| window[..byte].chars().count();

    let sentence_end = [". ", "! ", "? ", ".\n", "!\n", "?\n"]
        .iter()
        .filter_map(|pat| window.rfind(pat).map(|i| i + 1))
        .max();
    let newline = window.rfind('\n');
    let space = window.rfind(' ');

    let cut = [sentence_end, newline, space]
        .into_iter()
        .flatten()
        .find(|&byte| char_pos(byte) > floor)
        .unwrap_or(byte_end);

    format!("{}{}", window[..cut].trim_end(), TRUNCATION_MARKER)
}

/// Splits `content` into pieces of roughly `chunk_size` characters.
///
/// Each cut moves back to the last period or newline in the second half of
/// the window when one exists. Empty chunks are dropped.
pub fn chunk(content: &str, chunk_size: usize) -> Vec<String> {
    let chars: Vec<char> = content.chars().collect();
    if chunk_size == 0 || chars.len() <= chunk_size {
        let trimmed = content.trim();
        return if trimmed.is_empty() {
            Vec::new()
        } else {
            vec![trimmed.to_string()]
        };
    }

    let mut chunks = Vec::new();
    let mut start = 0;

    while start < chars.len() {
        let mut end = (start + chunk_size).min(chars.len());

        if end < chars.len() {
            let lower = start + chunk_size / 2;
            let boundary = (lower..end).rev().find(|&i| {
                chars[i] == '\n'
                    || (chars[i] == '.' && chars.get(i + 1).map_or(true, |c| c.is_whitespace()))
            });
            if let Some(i) = boundary {
                end = i + 1;
            }
        }

        let piece: String = chars[start..end].iter().collect();
        let piece = piece.trim();
        if !piece.is_empty() {
            chunks.push(piece.to_string());
        }
        start = end;
    }

    chunks
}

/// Reduces structured page data to the fields useful for `task`.
///
/// Keeps page identity, headings, interactive elements, forms and metrics;
/// text containers are ranked by keyword overlap with the task and capped.
pub fn filter_page_data(data: &Value, task: &str) -> Value {
    match data {
        Value::Object(map) => Value::Object(filter_object(map, task)),
        Value::Array(items) => Value::Array(items.iter().take(MAX_GENERIC_ARRAY * 2).cloned().collect()),
        other => other.clone(),
    }
}

fn filter_object(map: &Map<String, Value>, task: &str) -> Map<String, Value> {
    let keywords = task_keywords(task);
    let mut out = Map::new();

    for (key, value) in map {
        match key.as_str() {
            "url" | "title" | "readyState" | "headings" | "forms" | "metrics" => {
                out.insert(key.clone(), value.clone());
            }
            "elements" | "interactiveElements" => {
                out.insert(key.clone(), cap_array(value, MAX_ELEMENTS));
            }
            "textContainers" | "paragraphs" | "texts" => {
                out.insert(key.clone(), rank_text_containers(value, &keywords));
            }
            _ => match value {
                Value::String(s) if s.chars().count() > MAX_SCALAR_CHARS => {
                    out.insert(key.clone(), Value::String(truncate(s, MAX_SCALAR_CHARS)));
                }
                Value::Array(_) => {
                    out.insert(key.clone(), cap_array(value, MAX_GENERIC_ARRAY));
                }
                Value::Object(_) => {}
                _ => {
                    out.insert(key.clone(), value.clone());
                }
            },
        }
    }

    out
}

fn cap_array(value: &Value, max: usize) -> Value {
    match value {
        Value::Array(items) => Value::Array(items.iter().take(max).cloned().collect()),
        other => other.clone(),
    }
}

fn task_keywords(task: &str) -> Vec<String> {
    task.split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.chars().count() > 2)
        .map(|w| w.to_lowercase())
        .collect()
}

fn rank_text_containers(value: &Value, keywords: &[String]) -> Value {
    let Value::Array(items) = value else {
        return value.clone();
    };

    let text_of = |item: &Value| -> String {
        match item {
            Value::String(s) => s.clone(),
            Value::Object(o) => o
                .get("text")
                .and_then(|t| t.as_str())
                .unwrap_or_default()
                .to_string(),
            _ => String::new(),
        }
    };

    let mut scored: Vec<(usize, usize, String)> = items
        .iter()
        .enumerate()
        .map(|(index, item)| {
            let text = text_of(item);
            let lower = text.to_lowercase();
            let score = keywords.iter().filter(|k| lower.contains(k.as_str())).count();
            (score, index, text)
        })
        .filter(|(_, _, text)| !text.trim().is_empty())
        .collect();

    // Stable on original order among equal scores.
    scored.sort_by(|a, b| b.0.cmp(&a.0).then(a.1.cmp(&b.1)));

    Value::Array(
        scored
            .into_iter()
            .take(MAX_TEXT_CONTAINERS)
            .map(|(_, _, text)| Value::String(truncate(&text, MAX_TEXT_CONTAINER_CHARS)))
            .collect(),
    )
}

/// Model input before governance: free text, or page data to be filtered.
#[derive(Debug, Clone)]
pub enum PromptContent {
    Text(String),
    Structured { data: Value, task: String },
}

impl From<&str> for PromptContent {
    fn from(text: &str) -> Self {
        PromptContent::Text(text.to_string())
    }
}

impl From<String> for PromptContent {
    fn from(text: String) -> Self {
        PromptContent::Text(text)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OptimizationStage {
    PassThrough,
    Truncated,
    Aggressive,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PreparedPrompt {
    pub system_prompt: String,
    pub content: String,
    pub was_optimized: bool,
    pub stage: OptimizationStage,
    pub warning: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct ContentGovernor {
    config: GovernorConfig,
}

impl ContentGovernor {
    pub fn new(config: GovernorConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &GovernorConfig {
        &self.config
    }

    pub fn prepare(&self, system_prompt: &str, content: &PromptContent) -> PreparedPrompt {
        self.prepare_for_model(
            system_prompt,
            content,
            self.config.max_content_length,
            self.config.max_tokens_per_request,
        )
    }

    /// Three-stage escalation: pass through, truncate, then halve.
    pub fn prepare_for_model(
        &self,
        system_prompt: &str,
        content: &PromptContent,
        max_content_len: usize,
        max_tokens: usize,
    ) -> PreparedPrompt {
        let (text, filtered) = match content {
            PromptContent::Text(text) => (text.clone(), false),
            PromptContent::Structured { data, task } => {
                let reduced = filter_page_data(data, task);
                let text = serde_json::to_string(&reduced).unwrap_or_default();
                (text, true)
            }
        };

        if validate_size(system_prompt, &text, max_tokens).is_valid {
            return PreparedPrompt {
                system_prompt: system_prompt.to_string(),
                content: text,
                was_optimized: filtered,
                stage: OptimizationStage::PassThrough,
                warning: None,
            };
        }

        let shortened = if self.config.enable_chunking {
            chunk(&text, max_content_len)
                .into_iter()
                .next()
                .map(|first| {
                    if first.chars().count() < text.trim().chars().count() {
                        format!("{}{}", first, TRUNCATION_MARKER)
                    } else {
                        first
                    }
                })
                .unwrap_or_default()
        } else {
            truncate(&text, max_content_len)
        };

        if validate_size(system_prompt, &shortened, max_tokens).is_valid {
            log::debug!(
                "Content truncated from {} to {} chars",
                text.chars().count(),
                shortened.chars().count()
            );
            return PreparedPrompt {
                system_prompt: system_prompt.to_string(),
                content: shortened,
                was_optimized: true,
                stage: OptimizationStage::Truncated,
                warning: None,
            };
        }

        let aggressive = truncate(&text, max_content_len / 2);
        let check = validate_size(system_prompt, &aggressive, max_tokens);
        let warning = if check.is_valid {
            None
        } else {
            log::warn!(
                "Prompt still exceeds token budget by {} after aggressive truncation",
                check.exceeds_by
            );
            Some(format!(
                "Prompt exceeds token budget by {} tokens after aggressive truncation",
                check.exceeds_by
            ))
        };

        PreparedPrompt {
            system_prompt: system_prompt.to_string(),
            content: aggressive,
            was_optimized: true,
            stage: OptimizationStage::Aggressive,
            warning,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_estimate_tokens_empty_and_known_values() {
        assert_eq!(estimate_tokens(""), 0);
        // 2 words * 1.3 = 2.6, 11 chars / 4 = 2.75, mean 2.675 -> 3
        assert_eq!(estimate_tokens("hello world"), 3);
        assert_eq!(estimate_value_tokens(&json!(42)), 0);
    }

    #[test]
    fn test_estimate_tokens_monotonic_under_append() {
        let samples = ["a", "hello", "one two three", "x "];
        let suffixes = [" ", "b", " more words here", "."];
        for a in samples {
            for b in suffixes {
                let joined = format!("{}{}", a, b);
                assert!(estimate_tokens(&joined) >= estimate_tokens(a), "{:?}+{:?}", a, b);
            }
        }
    }

    #[test]
    fn test_validate_size() {
        let check = validate_size("system", "content", 1);
        assert!(!check.is_valid);
        assert_eq!(check.exceeds_by, check.total_tokens - 1);

        let check = validate_size("system", "content", 1000);
        assert!(check.is_valid);
        assert_eq!(check.exceeds_by, 0);
    }

    #[test]
    fn test_truncate_short_is_identity() {
        let text = "Short text.";
        assert_eq!(truncate(text, 100), text);
        assert_eq!(truncate(text, text.len()), text);
    }

    #[test]
    fn test_truncate_prefers_sentence_end() {
        let text = "First sentence here. Second sentence is a bit longer. Third one runs past the cut.";
        let out = truncate(text, 60);
        assert!(out.starts_with("First sentence here. Second sentence is a bit longer."));
        assert!(out.ends_with(TRUNCATION_MARKER));
    }

    #[test]
    fn test_truncate_bounded_and_prefix_derived() {
        let text = "word ".repeat(100) + &"x".repeat(300);
        for target in [10, 57, 120, 333] {
            let out = truncate(&text, target);
            let body = out.trim_end_matches(TRUNCATION_MARKER);
            assert!(out.chars().count() <= target + TRUNCATION_MARKER.chars().count());
            assert!(text.starts_with(body));
        }
    }

    #[test]
    fn test_truncate_hard_cut_without_boundaries() {
        let text = "a".repeat(50);
        let out = truncate(&text, 20);
        assert_eq!(out, format!("{}{}", "a".repeat(20), TRUNCATION_MARKER));
    }

    #[test]
    fn test_truncate_multibyte() {
        let text = "héllo wörld ".repeat(20);
        let out = truncate(&text, 30);
        assert!(out.chars().count() <= 30 + TRUNCATION_MARKER.chars().count());
    }

    #[test]
    fn test_chunk_splits_at_sentences() {
        let text = "Alpha beta gamma. Delta epsilon zeta. Eta theta iota. Kappa lambda mu.";
        let chunks = chunk(text, 40);
        assert!(chunks.len() >= 2);
        for c in &chunks {
            assert!(c.ends_with('.'), "chunk {:?} should end at a sentence", c);
        }
        assert_eq!(chunks.join(" "), text);
    }

    #[test]
    fn test_chunk_drops_empty() {
        assert!(chunk("   ", 10).is_empty());
        let chunks = chunk("abc\n\n\n\n\n\n\n\n\n\n\n\ndef", 4);
        assert!(chunks.iter().all(|c| !c.is_empty()));
    }

    #[test]
    fn test_filter_page_data_keeps_relevant_fields() {
        let data = json!({
            "url": "https://example.com",
            "title": "Shop",
            "headings": ["Results"],
            "elements": (0..100).map(|i| json!({"selector": format!("#e{}", i)})).collect::<Vec<_>>(),
            "textContainers": ["Shipping policy", "Wireless earbuds with case", "About us"],
            "rawHtml": {"nested": true},
        });
        let filtered = filter_page_data(&data, "find wireless earbuds");
        assert_eq!(filtered["elements"].as_array().unwrap().len(), MAX_ELEMENTS);
        assert_eq!(filtered["textContainers"][0], "Wireless earbuds with case");
        assert!(filtered.get("rawHtml").is_none());
        assert_eq!(filtered["title"], "Shop");
    }

    #[test]
    fn test_prepare_stages() {
        let governor = ContentGovernor::new(GovernorConfig {
            max_content_length: 400,
            max_tokens_per_request: 150,
            enable_chunking: false,
        });

        let small = governor.prepare("sys", &PromptContent::from("tiny"));
        assert_eq!(small.stage, OptimizationStage::PassThrough);
        assert!(!small.was_optimized);

        let big = "lorem ipsum dolor. ".repeat(100);
        let prepared = governor.prepare("sys", &PromptContent::from(big.as_str()));
        assert_eq!(prepared.stage, OptimizationStage::Truncated);
        assert!(prepared.was_optimized);
        assert!(prepared.warning.is_none());

        let tight = ContentGovernor::new(GovernorConfig {
            max_content_length: 400,
            max_tokens_per_request: 5,
            enable_chunking: false,
        });
        let prepared = tight.prepare("sys", &PromptContent::from(big.as_str()));
        assert_eq!(prepared.stage, OptimizationStage::Aggressive);
        assert!(prepared.warning.is_some());
    }

    #[test]
    fn test_prepare_structured_is_filtered() {
        let governor = ContentGovernor::default();
        let data = json!({"title": "T", "blob": {"a": 1}});
        let prepared = governor.prepare(
            "sys",
            &PromptContent::Structured {
                data,
                task: "anything".to_string(),
            },
        );
        assert!(prepared.was_optimized);
        assert!(!prepared.content.contains("blob"));
    }
}
