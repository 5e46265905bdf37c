//! Iterative perceive / decide / act loop over one page session.

use anyhow::{anyhow, bail, Context, Result};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

use super::actions;
use super::decision::{self, fallback_action, DecisionSource};
use super::extraction::{ExtractionResult, Extractor};
use super::perception::{self, Observation};
use super::session::{BrowserEngine, Fingerprint, PageSession};
use super::state::{RunEvent, RunMachine, RunState};
use crate::config::BrowserAgentConfig;
use crate::providers::{CompletionOptions, ModelGateway};
use crate::types::BrowserStep;

const SUMMARY_SYSTEM_PROMPT: &str = "You summarize an unfinished web browsing session. \
Explain briefly what was attempted, what was found and why the task could not be completed. \
Answer in plain text, at most five sentences.";

const HISTORY_WINDOW: usize = 2;

/// How a run ended, before it is shaped into executor output.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub state: RunState,
    pub result: Value,
    pub iterations: usize,
    pub steps: Vec<BrowserStep>,
}

impl RunOutcome {
    pub fn is_completed(&self) -> bool {
        self.state == RunState::Completed
    }
}

pub struct BrowserAgent {
    engine: Arc<dyn BrowserEngine>,
    gateway: Arc<ModelGateway>,
    config: BrowserAgentConfig,
    fingerprint: Fingerprint,
}

fn validate_url(url: &str) -> Result<()> {
    let parsed = reqwest::Url::parse(url).map_err(|e| anyhow!("Invalid URL {:?}: {}", url, e))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        bail!("Unsupported URL scheme {:?}", parsed.scheme());
    }
    Ok(())
}

async fn pause(ms: u64) {
    if ms > 0 {
        tokio::time::sleep(Duration::from_millis(ms)).await;
    }
}

impl BrowserAgent {
    pub fn new(
        engine: Arc<dyn BrowserEngine>,
        gateway: Arc<ModelGateway>,
        config: BrowserAgentConfig,
    ) -> Self {
        Self {
            engine,
            gateway,
            config,
            fingerprint: Fingerprint::default(),
        }
    }

    pub fn with_fingerprint(mut self, fingerprint: Fingerprint) -> Self {
        self.fingerprint = fingerprint;
        self
    }

    pub fn engine_name(&self) -> &str {
        self.engine.name()
    }

    /// Runs the task and shapes the executor payload. Never fails; fatal
    /// errors come back as `{isCompleted: false, error: true, message}`.
    pub async fn run(&self, url: &str, task: &str) -> Value {
        match self.execute(url, task).await {
            Ok(outcome) => {
                let mut payload = json!({
                    "isCompleted": outcome.is_completed(),
                    "result": outcome.result,
                    "totalIterations": outcome.iterations,
                    "url": url,
                    "task": task,
                });
                if outcome.state == RunState::PartialSummary {
                    payload["partial"] = Value::Bool(true);
                }
                payload
            }
            Err(err) => {
                log::error!("WebAgent run on {} failed: {:#}", url, err);
                json!({
                    "isCompleted": false,
                    "error": true,
                    "message": format!("WebAgent failed: {:#}", err),
                    "url": url,
                    "task": task,
                })
            }
        }
    }

    /// Runs the task; `Err` means the run ended in the fatal state.
    pub async fn execute(&self, url: &str, task: &str) -> Result<RunOutcome> {
        let mut machine = RunMachine::new();

        if let Err(err) = validate_url(url) {
            machine.transition(RunEvent::LoadFailed)?;
            return Err(err);
        }

        let session = match self.engine.open(&self.fingerprint).await {
            Ok(session) => session,
            Err(err) => {
                machine.transition(RunEvent::LoadFailed)?;
                return Err(err.context("Could not open a browser session"));
            }
        };

        let outcome = self.drive(session.as_ref(), url, task, &mut machine).await;

        // Closed on every path, including fatal ones.
        if let Err(err) = session.close().await {
            log::warn!("Failed to close browser session: {}", err);
        }

        outcome
    }

    async fn load(&self, session: &dyn PageSession, url: &str) -> Result<()> {
        let limit = Duration::from_millis(self.config.page_load_timeout_ms);
        tokio::time::timeout(limit, session.goto(url))
            .await
            .map_err(|_| anyhow!("Page load timed out after {}ms", self.config.page_load_timeout_ms))?
            .with_context(|| format!("Could not load {}", url))?;

        pause(self.config.settle_ms).await;

        let first = perception::observe(session).await?;
        if first.bot_check_suspected {
            log::warn!("Possible bot check on {}, waiting before continuing", url);
            pause(self.config.anti_bot_wait_ms).await;
        }
        Ok(())
    }

    async fn drive(
        &self,
        session: &dyn PageSession,
        url: &str,
        task: &str,
        machine: &mut RunMachine,
    ) -> Result<RunOutcome> {
        if let Err(err) = self.load(session, url).await {
            machine.transition(RunEvent::LoadFailed)?;
            return Err(err);
        }
        machine.transition(RunEvent::PageLoaded)?;
        log::info!("WebAgent started on {} for task: {}", url, task);

        let threshold = f64::from(self.config.completion_threshold);
        let mut steps: Vec<BrowserStep> = Vec::new();
        let mut best: Option<ExtractionResult> = None;
        let mut malformed_streak = 0;
        let mut end_event = RunEvent::BudgetExhausted;

        for iteration in 1..=self.config.max_iterations {
            let observation = match perception::observe(session).await {
                Ok(observation) => observation,
                Err(err) => {
                    // Keep what earlier iterations gathered.
                    log::warn!("Lost the page at iteration {}: {:#}", iteration, err);
                    end_event = RunEvent::SessionLost;
                    break;
                }
            };

            let recent = &steps[steps.len().saturating_sub(HISTORY_WINDOW)..];
            let decision = decision::decide(&self.gateway, task, recent, &observation).await;

            if decision.source == DecisionSource::Fallback {
                malformed_streak += 1;
            } else {
                malformed_streak = 0;
            }
            let giving_up = malformed_streak >= self.config.max_malformed_decisions;

            if decision.meets(threshold) {
                machine.transition(RunEvent::ConfidentAnswer)?;
                let result = decision
                    .final_answer
                    .or_else(|| best.as_ref().map(ExtractionResult::to_value))
                    .unwrap_or_else(|| Value::String("Task completed".to_string()));
                return Ok(RunOutcome {
                    state: machine.state(),
                    result,
                    iterations: iteration,
                    steps,
                });
            }

            let action = decision
                .action
                .unwrap_or_else(|| fallback_action(recent, &observation));
            log::debug!(
                "Iteration {}: {} {:?} ({})",
                iteration,
                action.action_type.as_str(),
                action.target,
                action.reasoning
            );

            let report = actions::execute(session, &action, &observation, &self.config).await;
            let page_url_after = session
                .current_url()
                .await
                .unwrap_or_else(|_| observation.snapshot.url.clone());
            if page_url_after != observation.snapshot.url {
                log::info!("Navigated from {} to {}", observation.snapshot.url, page_url_after);
            }

            let failed = !report.outcome.success;
            if let Some(error) = &report.outcome.error {
                log::warn!("Iteration {} action failed: {}", iteration, error);
            }
            steps.push(BrowserStep {
                iteration,
                action,
                action_outcome: report.outcome,
                page_url_after,
            });

            if let Some(extraction) = report.extraction.filter(|e| !e.is_empty()) {
                if self.config.complete_on_extraction {
                    machine.transition(RunEvent::ItemsExtracted)?;
                    return Ok(RunOutcome {
                        state: machine.state(),
                        result: extraction.to_value(),
                        iterations: iteration,
                        steps,
                    });
                }
                if best.as_ref().map_or(true, |b| extraction.len() > b.len()) {
                    best = Some(extraction);
                }
            }

            if giving_up {
                log::warn!("Giving up after {} unusable decisions", malformed_streak);
                end_event = RunEvent::DecisionsMalformed;
                break;
            }
            if failed && iteration == self.config.max_iterations {
                end_event = RunEvent::ActionFailed;
            }
        }

        machine.transition(end_event)?;
        self.summarize(session, url, task, steps, best, machine).await
    }

    async fn summarize(
        &self,
        session: &dyn PageSession,
        url: &str,
        task: &str,
        steps: Vec<BrowserStep>,
        best: Option<ExtractionResult>,
        machine: &mut RunMachine,
    ) -> Result<RunOutcome> {
        let iterations = steps.len();

        if let Ok(observation) = perception::observe(session).await {
            let extraction = final_extraction(&observation);
            if !extraction.is_empty() {
                machine.transition(RunEvent::ExtractionRecovered)?;
                return Ok(RunOutcome {
                    state: machine.state(),
                    result: extraction.to_value(),
                    iterations,
                    steps,
                });
            }
        }

        let result = match best {
            Some(best) => best.to_value(),
            None => Value::String(self.describe_attempt(url, task, &steps).await),
        };
        machine.transition(RunEvent::Summarized)?;

        Ok(RunOutcome {
            state: machine.state(),
            result,
            iterations,
            steps,
        })
    }

    async fn describe_attempt(&self, url: &str, task: &str, steps: &[BrowserStep]) -> String {
        let prompt = format!(
            "Task: {}\nStarting URL: {}\nSteps taken:\n{}",
            task,
            url,
            serde_json::to_string_pretty(steps).unwrap_or_default()
        );

        match self
            .gateway
            .complete(SUMMARY_SYSTEM_PROMPT, prompt, &CompletionOptions::default())
            .await
        {
            Ok(summary) if !summary.trim().is_empty() => summary.trim().to_string(),
            Ok(_) | Err(_) => format!(
                "I browsed {} for {} steps but could not complete the task \"{}\".",
                url,
                steps.len(),
                task
            ),
        }
    }
}

fn final_extraction(observation: &Observation) -> ExtractionResult {
    Extractor::new(&observation.document, &observation.snapshot.url).extract(None, None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::browser::dom::DomNode;
    use crate::browser::static_page::StaticEngine;
    use crate::governor::ContentGovernor;
    use crate::providers::MockLLMProvider;
    use crate::types::ActionType;

    fn config() -> BrowserAgentConfig {
        BrowserAgentConfig {
            max_iterations: 3,
            settle_ms: 0,
            anti_bot_wait_ms: 0,
            action_timeout_ms: 20,
            page_load_timeout_ms: 200,
            ..BrowserAgentConfig::default()
        }
    }

    fn agent(engine: StaticEngine, mock: MockLLMProvider) -> BrowserAgent {
        let gateway = ModelGateway::new(Arc::new(mock), ContentGovernor::default());
        BrowserAgent::new(Arc::new(engine), Arc::new(gateway), config())
    }

    fn text_page() -> StaticEngine {
        StaticEngine::new().with_page(
            "https://info.test/",
            "Info",
            DomNode::element("body").child(DomNode::element("p").text("Opening hours are 9 to 5")),
        )
    }

    #[tokio::test]
    async fn test_confident_answer_completes() {
        let engine = text_page();
        let mock = MockLLMProvider::with_response(
            r#"{"isCompleted": true, "confidence": 0.9, "finalAnswer": "9 to 5"}"#.to_string(),
        );
        let agent = agent(engine.clone(), mock);

        let payload = agent.run("https://info.test/", "opening hours").await;
        assert_eq!(payload["isCompleted"], true);
        assert_eq!(payload["result"], "9 to 5");
        assert_eq!(payload["totalIterations"], 1);
        assert_eq!(engine.sessions_closed(), 1);
    }

    #[tokio::test]
    async fn test_low_confidence_does_not_complete() {
        let engine = text_page();
        let mock = MockLLMProvider::from_fn(|messages| {
            if messages[0].content.starts_with("You summarize") {
                Ok("Could not confirm the hours.".to_string())
            } else {
                Ok(r#"{"action": {"type": "scroll", "value": "400"}, "isCompleted": true, "confidence": 0.5, "finalAnswer": "maybe"}"#.to_string())
            }
        });
        let agent = agent(engine.clone(), mock);

        let outcome = agent.execute("https://info.test/", "opening hours").await.unwrap();
        assert_eq!(outcome.state, RunState::PartialSummary);
        assert_eq!(outcome.iterations, 3);
        assert_eq!(outcome.result, "Could not confirm the hours.");
        assert!(outcome.steps.windows(2).all(|w| w[0].iteration < w[1].iteration));
    }

    #[tokio::test]
    async fn test_hard_coded_summary_when_model_fails() {
        let engine = text_page();
        let mock = MockLLMProvider::from_fn(|_| Err(anyhow!("backend down")));
        let agent = agent(engine.clone(), mock);

        let payload = agent.run("https://info.test/", "opening hours").await;
        assert_eq!(payload["isCompleted"], false);
        assert_eq!(payload["partial"], true);
        assert!(payload["result"]
            .as_str()
            .unwrap()
            .contains("could not complete the task"));
        assert_eq!(engine.sessions_closed(), 1);
    }

    #[tokio::test]
    async fn test_malformed_streak_runs_fallback_before_stopping() {
        let engine = text_page();
        let mock = MockLLMProvider::with_response("no idea".to_string());
        let gateway = ModelGateway::new(Arc::new(mock), ContentGovernor::default());
        let config = BrowserAgentConfig {
            max_iterations: 6,
            ..config()
        };
        let agent = BrowserAgent::new(Arc::new(engine.clone()), Arc::new(gateway), config);

        let outcome = agent.execute("https://info.test/", "opening hours").await.unwrap();
        assert_eq!(outcome.state, RunState::PartialSummary);
        assert_eq!(outcome.iterations, 3);
        let kinds: Vec<ActionType> = outcome.steps.iter().map(|s| s.action.action_type).collect();
        assert_eq!(kinds, vec![ActionType::Scroll, ActionType::Scroll, ActionType::Extract]);
        assert_eq!(engine.action_log().len(), 3);
    }

    #[tokio::test]
    async fn test_invalid_url_fails_before_iterating() {
        let engine = text_page();
        let mock = MockLLMProvider::new();
        let agent = agent(engine.clone(), mock);

        let payload = agent.run("not-a-url", "anything").await;
        assert_eq!(payload["isCompleted"], false);
        assert_eq!(payload["error"], true);
        assert!(payload["message"].as_str().unwrap().contains("WebAgent failed"));
        assert_eq!(engine.sessions_opened(), 0);
    }

    #[tokio::test]
    async fn test_unreachable_page_still_closes_session() {
        let engine = text_page();
        let agent = agent(engine.clone(), MockLLMProvider::new());

        let payload = agent.run("https://unreachable.test/", "anything").await;
        assert_eq!(payload["error"], true);
        assert_eq!(engine.sessions_opened(), 1);
        assert_eq!(engine.sessions_closed(), 1);
    }
}
