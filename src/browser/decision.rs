//! Action selection: asks the model for the next browser action.

use serde_json::{Map, Value};

use super::perception::Observation;
use crate::governor::filter_page_data;
use crate::parsing::{self, bool_field, f64_field, str_field, ParseResult};
use crate::providers::{CompletionOptions, ModelGateway};
use crate::types::{ActionType, BrowserAction, BrowserStep};

pub const DECISION_SYSTEM_PROMPT: &str = "You control a headless web browser to accomplish a task for a user. \
Each turn you see the task, your most recent steps and a snapshot of the current page. \
Choose exactly one next action.\n\
Action types:\n\
- fill: type `value` into the input at selector `target`\n\
- click: click the element at selector `target`\n\
- navigate: open the URL in `target`\n\
- scroll: scroll by `value` pixels (negative scrolls up)\n\
- wait: wait `value` milliseconds for content to load\n\
- extract: scrape repeating items; optional `target` is the item container selector and \
optional `value` maps fields to selectors as \"field: selector; field: selector\"\n\
Only use selectors that appear in the snapshot. When the task is done set isCompleted to true, \
put the answer in finalAnswer and rate your confidence between 0 and 1.\n\
Respond with JSON only:\n\
{\"action\": {\"type\": \"click\", \"target\": \"#search\", \"value\": null, \"reasoning\": \"...\"}, \
\"isCompleted\": false, \"confidence\": 0.0, \"finalAnswer\": null}";

const RECOVERABLE_FIELDS: &[&str] = &[
    "type",
    "target",
    "value",
    "reasoning",
    "isCompleted",
    "confidence",
    "finalAnswer",
];

const DEFAULT_SCROLL_PX: i64 = 800;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecisionSource {
    Model,
    /// Rebuilt field by field from broken JSON.
    Recovered,
    Fallback,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Decision {
    pub action: Option<BrowserAction>,
    pub is_completed: bool,
    pub confidence: f64,
    pub final_answer: Option<Value>,
    pub source: DecisionSource,
}

impl Decision {
    pub fn fallback(action: BrowserAction) -> Self {
        Self {
            action: Some(action),
            is_completed: false,
            confidence: 0.0,
            final_answer: None,
            source: DecisionSource::Fallback,
        }
    }

    pub fn meets(&self, threshold: f64) -> bool {
        self.is_completed && self.confidence >= threshold
    }
}

fn action_from_map(map: &Map<String, Value>) -> Option<BrowserAction> {
    let action_type: ActionType = str_field(map, "type")?.parse().ok()?;
    let text = |name: &str| match map.get(name) {
        Some(Value::String(s)) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Some(Value::Number(n)) => Some(n.to_string()),
        Some(Value::Object(o)) => Some(Value::Object(o.clone()).to_string()),
        _ => None,
    };

    Some(BrowserAction {
        action_type,
        target: text("target"),
        value: text("value"),
        reasoning: str_field(map, "reasoning").unwrap_or_default().to_string(),
    })
}

fn decision_from_map(map: &Map<String, Value>, source: DecisionSource) -> Option<Decision> {
    let action = match map.get("action") {
        Some(Value::Object(inner)) => action_from_map(inner),
        Some(Value::String(kind)) => kind.parse::<ActionType>().ok().map(|t| {
            let mut flat = map.clone();
            flat.insert("type".to_string(), Value::String(t.as_str().to_string()));
            action_from_map(&flat)
        })?,
        _ => action_from_map(map),
    };
    let is_completed = bool_field(map, "isCompleted").unwrap_or(false);

    if action.is_none() && !is_completed {
        return None;
    }

    Some(Decision {
        action,
        is_completed,
        confidence: f64_field(map, "confidence").unwrap_or(0.0).clamp(0.0, 1.0),
        final_answer: map.get("finalAnswer").filter(|v| !v.is_null()).cloned(),
        source,
    })
}

/// Parses model output into a decision, recovering what it can.
pub fn parse_decision(raw: &str) -> ParseResult<Decision> {
    if let ParseResult::Ok(map) = parsing::parse_json_object(raw) {
        if let Some(decision) = decision_from_map(&map, DecisionSource::Model) {
            return ParseResult::Ok(decision);
        }
    }

    let recovered = parsing::recover_fields(raw, RECOVERABLE_FIELDS);
    match decision_from_map(&recovered, DecisionSource::Recovered) {
        Some(decision) => ParseResult::Ok(decision),
        None => ParseResult::Malformed(raw.to_string()),
    }
}

/// Deterministic next action when the model gives nothing usable.
pub fn fallback_action(history: &[BrowserStep], observation: &Observation) -> BrowserAction {
    let trailing_scrolls = history
        .iter()
        .rev()
        .take_while(|step| step.action.action_type == ActionType::Scroll)
        .count();

    if trailing_scrolls >= 2 {
        BrowserAction::new(ActionType::Extract, "Scrolled repeatedly; trying extraction")
    } else if observation.snapshot.metrics.has_loading_indicator {
        BrowserAction::new(ActionType::Wait, "Page is still loading")
    } else {
        BrowserAction::new(ActionType::Scroll, "Looking for more content")
            .with_value(DEFAULT_SCROLL_PX.to_string())
    }
}

pub fn build_prompt(task: &str, recent: &[BrowserStep], observation: &Observation) -> String {
    let page = filter_page_data(&observation.to_prompt_value(), task);
    let history = if recent.is_empty() {
        "none yet".to_string()
    } else {
        serde_json::to_string_pretty(recent).unwrap_or_default()
    };

    format!(
        "Task: {}\n\nRecent steps:\n{}\n\nCurrent page:\n{}",
        task,
        history,
        serde_json::to_string(&page).unwrap_or_default()
    )
}

/// Asks the model for the next action. Never fails: model errors and
/// unusable output both produce a fallback decision.
pub async fn decide(
    gateway: &ModelGateway,
    task: &str,
    recent: &[BrowserStep],
    observation: &Observation,
) -> Decision {
    let prompt = build_prompt(task, recent, observation);

    match gateway
        .complete(DECISION_SYSTEM_PROMPT, prompt, &CompletionOptions::json())
        .await
    {
        Ok(raw) => match parse_decision(&raw) {
            ParseResult::Ok(decision) => decision,
            ParseResult::Malformed(raw) => {
                log::warn!("Unparseable browser decision, using fallback: {:.200}", raw);
                Decision::fallback(fallback_action(recent, observation))
            }
        },
        Err(err) => {
            log::warn!("Browser decision call failed, using fallback: {}", err);
            Decision::fallback(fallback_action(recent, observation))
        }
    }
}
