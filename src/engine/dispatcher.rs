use futures::future::{BoxFuture, FutureExt};
use serde::Serialize;
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::fmt::Write as _;
use std::sync::{Arc, Mutex};
use std::time::Instant;
use thiserror::Error;

use super::formatter::ResultFormatter;
use super::router::{synthesize_direct, DecisionRouter};
use crate::config::DispatcherConfig;
use crate::executors::{Executor, ExecutorRegistry};
use crate::parsing::{self, ParseResult};
use crate::providers::{CompletionOptions, ModelGateway};
use crate::storage::TaskHistory;
use crate::types::{
    AgentResult, ExecutionResult, ExecutionStatus, ExecutorDescriptor, RoutingContext,
    RoutingDecision, Task,
};

pub const PARAM_SYSTEM_PROMPT: &str = "You extract parameters for an agent call from a user request. \
Respond with a JSON object that maps each requested parameter name to a string value. URLs must be \
absolute http(s) URLs; for searches build the site's search URL. Omit parameters you cannot determine.";

const DEGRADED_MESSAGE: &str = "I'm having trouble reaching the language model right now, so I \
couldn't process this request. Please try again in a moment.";

const RECENT_PROMPT_CHARS: usize = 100;

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),
    #[error("Missing required parameters for {agent}: {}", .missing.join(", "))]
    MissingParams { agent: String, missing: Vec<String> },
    #[error("Maximum routing depth exceeded ({max_depth})")]
    DepthExceeded { max_depth: u32 },
    #[error("Model call failed: {0:#}")]
    Model(anyhow::Error),
}

impl DispatchError {
    pub fn is_client_error(&self) -> bool {
        matches!(self, DispatchError::InvalidInput(_) | DispatchError::MissingParams { .. })
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentOverview {
    #[serde(flatten)]
    pub descriptor: ExecutorDescriptor,
    pub is_implemented: bool,
    pub is_active: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DispatcherStatistics {
    pub total_tasks: usize,
    pub implemented_agents: usize,
    pub active_agents: usize,
    pub avg_processing_time_ms: f64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Introspection {
    pub available_agents: Vec<AgentOverview>,
    pub statistics: DispatcherStatistics,
    pub recent_tasks: Vec<Task>,
}

/// Marks an executor active for as long as it is alive.
struct ActiveGuard<'a> {
    active: &'a Mutex<HashMap<String, usize>>,
    name: String,
}

impl<'a> ActiveGuard<'a> {
    fn new(active: &'a Mutex<HashMap<String, usize>>, name: &str) -> Self {
        *active.lock().unwrap().entry(name.to_string()).or_insert(0) += 1;
        Self {
            active,
            name: name.to_string(),
        }
    }
}

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        let mut active = self.active.lock().unwrap();
        if let Some(count) = active.get_mut(&self.name) {
            *count -= 1;
            if *count == 0 {
                active.remove(&self.name);
            }
        }
    }
}

/// Routes tasks, runs executors and reconciles their output into one answer.
pub struct Dispatcher {
    registry: Arc<ExecutorRegistry>,
    gateway: Arc<ModelGateway>,
    router: DecisionRouter,
    formatter: ResultFormatter,
    history: Arc<dyn TaskHistory>,
    config: DispatcherConfig,
    active: Mutex<HashMap<String, usize>>,
}

impl Dispatcher {
    pub fn new(
        registry: Arc<ExecutorRegistry>,
        gateway: Arc<ModelGateway>,
        history: Arc<dyn TaskHistory>,
        config: DispatcherConfig,
    ) -> Self {
        Self {
            router: DecisionRouter::new(gateway.clone()),
            formatter: ResultFormatter::new(gateway.clone()),
            registry,
            gateway,
            history,
            config,
            active: Mutex::new(HashMap::new()),
        }
    }

    pub fn registry(&self) -> &ExecutorRegistry {
        &self.registry
    }

    /// Entry point for callers: validates input, degrades model outages into
    /// an answer and records the task in history.
    pub async fn submit(
        &self,
        user_prompt: &str,
        last_agent: Option<&str>,
        ctx: RoutingContext,
    ) -> Result<ExecutionResult, DispatchError> {
        let user_prompt = user_prompt.trim();
        if user_prompt.is_empty() {
            return Err(DispatchError::InvalidInput("userPrompt is required".to_string()));
        }

        let started = Instant::now();
        let mut task = Task::new(user_prompt);
        let outcome = self
            .run(
                user_prompt,
                last_agent.map(str::to_string),
                ctx,
                self.config.max_depth,
                &mut task.agent_chain,
            )
            .await;
        let elapsed = started.elapsed().as_millis() as u64;

        let outcome = match outcome {
            Err(DispatchError::Model(err)) => {
                log::warn!("Task {} degraded after model failure: {:#}", task.id, err);
                Ok(ExecutionResult::degraded(DEGRADED_MESSAGE))
            }
            other => other,
        }
        .map(|result| result.with_elapsed(elapsed));

        match &outcome {
            Ok(result) => task.result = Some(result.clone()),
            Err(err) => {
                log::warn!("Task {} failed: {}", task.id, err);
                task.result = Some(ExecutionResult::failed(err.to_string()).with_elapsed(elapsed));
            }
        }
        task.processing_time_ms = elapsed;
        log::info!(
            "Task {} finished in {}ms via [{}]",
            task.id,
            elapsed,
            task.agent_chain.join(" -> ")
        );
        self.history.record(task);

        outcome
    }

    /// One routing run with an explicit depth budget and no history bookkeeping.
    pub async fn execute_task(
        &self,
        user_prompt: &str,
        last_agent: Option<&str>,
        ctx: RoutingContext,
        max_depth: u32,
    ) -> Result<ExecutionResult, DispatchError> {
        let mut chain = Vec::new();
        self.run(
            user_prompt,
            last_agent.map(str::to_string),
            ctx,
            max_depth,
            &mut chain,
        )
        .await
    }

    fn run<'a>(
        &'a self,
        user_prompt: &'a str,
        last_agent: Option<String>,
        ctx: RoutingContext,
        depth: u32,
        chain: &'a mut Vec<String>,
    ) -> BoxFuture<'a, Result<ExecutionResult, DispatchError>> {
        async move {
            if depth == 0 {
                return Err(DispatchError::DepthExceeded {
                    max_depth: self.config.max_depth,
                });
            }

            let decision = self
                .router
                .decide(user_prompt, last_agent.as_deref(), &ctx, &self.registry)
                .await
                .map_err(DispatchError::Model)?;

            let (agent, params) = match decision {
                RoutingDecision::Direct { response } => return Ok(direct(response)),
                RoutingDecision::Route {
                    next_agent, params, ..
                } => (next_agent, params),
            };

            let Some(executor) = self.registry.get(&agent) else {
                log::warn!("Router picked {} but it is not registered", agent);
                return Ok(direct(synthesize_direct(&ctx)));
            };

            let params = self.ensure_params(user_prompt, executor.as_ref(), params).await?;
            chain.push(agent.clone());

            let started = Instant::now();
            let outcome = {
                let _active = ActiveGuard::new(&self.active, &agent);
                log::info!("Invoking {} (step {})", agent, ctx.step);
                executor.invoke(&params).await
            };
            let result = outcome
                .unwrap_or_else(|err| ExecutionResult::failed(format!("{} failed: {:#}", agent, err)))
                .with_elapsed(started.elapsed().as_millis() as u64);
            log::info!(
                "{} returned {:?} in {}ms",
                agent,
                result.status,
                result.execution_time_ms
            );

            match result.status {
                ExecutionStatus::Complete => {
                    let text = self.formatter.format(user_prompt, &result.result, &agent).await;
                    let next = ctx
                        .with_result(AgentResult {
                            agent: agent.clone(),
                            status: result.status,
                            result: Value::String(text),
                            message: result.message,
                            already_formatted: true,
                        })
                        .finalizing();
                    self.finalize(user_prompt, &agent, &next).await
                }
                ExecutionStatus::Failed | ExecutionStatus::Partial => {
                    let next = ctx
                        .with_failed(&agent)
                        .with_result(agent_result(&agent, result))
                        .finalizing();
                    self.finalize(user_prompt, &agent, &next).await
                }
                ExecutionStatus::NeedsMore => {
                    let next = ctx
                        .with_failed(&agent)
                        .with_result(agent_result(&agent, result))
                        .next_step();
                    self.run(user_prompt, Some(agent), next, depth - 1, chain).await
                }
            }
        }
        .boxed()
    }

    async fn finalize(
        &self,
        user_prompt: &str,
        agent: &str,
        ctx: &RoutingContext,
    ) -> Result<ExecutionResult, DispatchError> {
        let decision = self
            .router
            .decide(user_prompt, Some(agent), ctx, &self.registry)
            .await
            .map_err(DispatchError::Model)?;

        let response = match decision {
            RoutingDecision::Direct { response } => response,
            RoutingDecision::Route { next_agent, .. } => {
                log::warn!("Ignoring route to {} during final formulation", next_agent);
                synthesize_direct(ctx)
            }
        };
        Ok(direct(response))
    }

    /// Fills missing required params from the prompt with one model call.
    async fn ensure_params(
        &self,
        user_prompt: &str,
        executor: &dyn Executor,
        mut params: Map<String, Value>,
    ) -> Result<Map<String, Value>, DispatchError> {
        let descriptor = executor.descriptor();
        let missing = descriptor.missing_params(&params);
        if missing.is_empty() {
            return Ok(params);
        }

        log::info!(
            "Extracting missing params for {}: {}",
            descriptor.name,
            missing.join(", ")
        );
        let prompt = param_prompt(user_prompt, descriptor, &missing, &params);
        match self
            .gateway
            .complete(PARAM_SYSTEM_PROMPT, prompt, &CompletionOptions::json())
            .await
        {
            Ok(raw) => match parsing::parse_json_object(&raw) {
                ParseResult::Ok(extracted) => {
                    for name in &missing {
                        if let Some(Value::String(value)) = extracted.get(name) {
                            params.insert(name.clone(), Value::String(value.trim().to_string()));
                        }
                    }
                }
                ParseResult::Malformed(_) => {
                    log::warn!("Param extraction for {} returned no JSON", descriptor.name);
                }
            },
            Err(err) => log::warn!("Param extraction for {} failed: {:#}", descriptor.name, err),
        }

        let missing = descriptor.missing_params(&params);
        if missing.is_empty() {
            Ok(params)
        } else {
            Err(DispatchError::MissingParams {
                agent: descriptor.name.clone(),
                missing,
            })
        }
    }

    pub fn active_agents(&self) -> Vec<String> {
        let mut names: Vec<String> = self.active.lock().unwrap().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn introspect(&self, recent_limit: usize) -> Introspection {
        let active = self.active_agents();
        let available_agents = self
            .registry
            .descriptors()
            .iter()
            .map(|descriptor| AgentOverview {
                is_implemented: descriptor.is_implemented(),
                is_active: active.contains(&descriptor.name),
                descriptor: descriptor.clone(),
            })
            .collect();

        let stats = self.history.stats();
        Introspection {
            available_agents,
            statistics: DispatcherStatistics {
                total_tasks: stats.total_tasks,
                implemented_agents: self.registry.implemented_count(),
                active_agents: active.len(),
                avg_processing_time_ms: stats.avg_processing_time_ms,
            },
            recent_tasks: self
                .history
                .recent(recent_limit)
                .iter()
                .map(|task| task.summarized(RECENT_PROMPT_CHARS))
                .collect(),
        }
    }

    pub fn reset_history(&self) -> usize {
        let dropped = self.history.clear();
        log::info!("Task history reset, {} tasks dropped", dropped);
        dropped
    }
}

fn direct(response: String) -> ExecutionResult {
    ExecutionResult::complete(json!({ "response": response }))
}

fn agent_result(agent: &str, result: ExecutionResult) -> AgentResult {
    AgentResult {
        agent: agent.to_string(),
        status: result.status,
        result: result.result,
        message: result.message,
        already_formatted: false,
    }
}

fn param_prompt(
    user_prompt: &str,
    descriptor: &ExecutorDescriptor,
    missing: &[String],
    known: &Map<String, Value>,
) -> String {
    let mut out = format!(
        "User request: {}\nAgent: {} ({})\nParameters needed:\n",
        user_prompt, descriptor.name, descriptor.description
    );
    for spec in descriptor
        .required_params
        .iter()
        .filter(|spec| missing.contains(&spec.name))
    {
        let _ = writeln!(out, "- {}: {}", spec.name, spec.description);
    }
    if !known.is_empty() {
        let _ = writeln!(
            out,
            "Already known: {}",
            serde_json::to_string(known).unwrap_or_default()
        );
    }
    out
}
