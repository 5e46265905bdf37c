//! Executes one browser action against the page with a bounded timeout.

use anyhow::Result;
use std::future::Future;
use std::time::Duration;

use super::extraction::{ExtractionResult, Extractor, FieldMapping};
use super::perception::Observation;
use super::resolve_url;
use super::session::PageSession;
use crate::config::BrowserAgentConfig;
use crate::types::{ActionOutcome, ActionType, BrowserAction};

const DEFAULT_SCROLL_PX: i64 = 800;

#[derive(Debug, Clone)]
pub struct ActionReport {
    pub outcome: ActionOutcome,
    /// Set by `extract` actions that found items.
    pub extraction: Option<ExtractionResult>,
}

impl ActionReport {
    fn from_outcome(outcome: ActionOutcome) -> Self {
        Self {
            outcome,
            extraction: None,
        }
    }
}

async fn bounded<F>(label: &str, limit_ms: u64, call: F) -> ActionOutcome
where
    F: Future<Output = Result<()>>,
{
    match tokio::time::timeout(Duration::from_millis(limit_ms), call).await {
        Ok(Ok(())) => ActionOutcome::ok(),
        Ok(Err(err)) => ActionOutcome::failed(format!("{} failed: {}", label, err)),
        Err(_) => ActionOutcome::failed(format!("{} timed out after {}ms", label, limit_ms)),
    }
}

/// Rejects selectors the current page cannot resolve before touching it.
fn require_selector<'a>(action: &'a BrowserAction, observation: &Observation) -> Result<&'a str, ActionOutcome> {
    let target = action
        .target
        .as_deref()
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .ok_or_else(|| ActionOutcome::failed(format!("{} requires a target selector", action.action_type.as_str())))?;

    if observation.document.count(target) == 0 {
        return Err(ActionOutcome::failed(format!(
            "Selector not found on page: {}",
            target
        )));
    }
    Ok(target)
}

pub async fn execute(
    session: &dyn PageSession,
    action: &BrowserAction,
    observation: &Observation,
    config: &BrowserAgentConfig,
) -> ActionReport {
    let outcome = match action.action_type {
        ActionType::Click => match require_selector(action, observation) {
            Ok(target) => bounded("click", config.action_timeout_ms, session.click(target)).await,
            Err(outcome) => outcome,
        },
        ActionType::Fill => match require_selector(action, observation) {
            Ok(target) => {
                let value = action.value.as_deref().unwrap_or_default();
                bounded("fill", config.action_timeout_ms, session.fill(target, value)).await
            }
            Err(outcome) => outcome,
        },
        ActionType::Navigate => {
            let destination = action
                .target
                .as_deref()
                .or(action.value.as_deref())
                .and_then(|href| resolve_url(&observation.snapshot.url, href.trim()));
            match destination {
                Some(url) => bounded("navigate", config.page_load_timeout_ms, session.goto(&url)).await,
                None => ActionOutcome::failed("navigate requires a valid URL"),
            }
        }
        ActionType::Scroll => {
            let delta = scroll_delta(action);
            bounded("scroll", config.action_timeout_ms, session.scroll_by(delta)).await
        }
        ActionType::Wait => {
            let wait_ms = action
                .value
                .as_deref()
                .and_then(|v| v.trim().parse::<u64>().ok())
                .unwrap_or(config.settle_ms)
                .min(config.action_timeout_ms);
            tokio::time::sleep(Duration::from_millis(wait_ms)).await;
            ActionOutcome::ok()
        }
        ActionType::Extract => return extract(action, observation),
    };

    ActionReport::from_outcome(outcome)
}

fn scroll_delta(action: &BrowserAction) -> i64 {
    let amount = action
        .value
        .as_deref()
        .and_then(|v| v.trim().parse::<i64>().ok())
        .unwrap_or(DEFAULT_SCROLL_PX);
    match action.target.as_deref().map(str::trim) {
        Some("up") | Some("top") => -amount.abs(),
        _ => amount,
    }
}

fn extract(action: &BrowserAction, observation: &Observation) -> ActionReport {
    let mapping = action.value.as_deref().and_then(FieldMapping::parse);
    let extraction = Extractor::new(&observation.document, &observation.snapshot.url)
        .extract(action.target.as_deref(), mapping.as_ref());

    if extraction.is_empty() {
        return ActionReport::from_outcome(ActionOutcome::failed("Extraction found no items"));
    }

    log::info!(
        "Extracted {} items from {} using {}",
        extraction.len(),
        observation.snapshot.url,
        extraction.container_selector.as_deref().unwrap_or("heuristic containers")
    );
    ActionReport {
        outcome: ActionOutcome::with_data(extraction.to_value()),
        extraction: Some(extraction),
    }
}
