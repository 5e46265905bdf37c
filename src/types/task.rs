use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeSet;

use super::{ExecutorName, TaskId};

/// One top-level request as recorded in the history log.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: TaskId,
    pub user_prompt: String,
    pub created_at: DateTime<Utc>,
    pub agent_chain: Vec<ExecutorName>,
    pub result: Option<ExecutionResult>,
    pub processing_time_ms: u64,
}

impl Task {
    pub fn new(user_prompt: impl Into<String>) -> Self {
        Self {
            id: TaskId::new_v4(),
            user_prompt: user_prompt.into(),
            created_at: Utc::now(),
            agent_chain: Vec::new(),
            result: None,
            processing_time_ms: 0,
        }
    }

    /// Copy with the prompt cut to `max_chars` for listings.
    pub fn summarized(&self, max_chars: usize) -> Self {
        let mut task = self.clone();
        if task.user_prompt.chars().count() > max_chars {
            let cut: String = task.user_prompt.chars().take(max_chars).collect();
            task.user_prompt = format!("{}...", cut);
        }
        task
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Complete,
    /// Executor made progress and asks for another routing step.
    NeedsMore,
    /// Executor stopped early with something worth reporting.
    Partial,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionResult {
    pub is_completed: bool,
    pub status: ExecutionStatus,
    pub result: Value,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub error: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub execution_time_ms: u64,
}

impl ExecutionResult {
    pub fn complete(result: Value) -> Self {
        Self {
            is_completed: true,
            status: ExecutionStatus::Complete,
            result,
            error: false,
            message: None,
            execution_time_ms: 0,
        }
    }

    pub fn needs_more(result: Value) -> Self {
        Self {
            is_completed: false,
            status: ExecutionStatus::NeedsMore,
            result,
            error: false,
            message: None,
            execution_time_ms: 0,
        }
    }

    pub fn partial(result: Value, message: impl Into<String>) -> Self {
        Self {
            is_completed: false,
            status: ExecutionStatus::Partial,
            result,
            error: false,
            message: Some(message.into()),
            execution_time_ms: 0,
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            is_completed: false,
            status: ExecutionStatus::Failed,
            result: Value::Null,
            error: true,
            message: Some(message.into()),
            execution_time_ms: 0,
        }
    }

    /// A degraded but user-presentable answer produced after an internal failure.
    pub fn degraded(message: impl Into<String>) -> Self {
        let message = message.into();
        Self {
            is_completed: true,
            status: ExecutionStatus::Complete,
            result: serde_json::json!({ "response": message.clone() }),
            error: true,
            message: Some(message),
            execution_time_ms: 0,
        }
    }

    pub fn with_elapsed(mut self, elapsed_ms: u64) -> Self {
        self.execution_time_ms = elapsed_ms;
        self
    }
}

/// Output of the decision router. Exactly one variant is ever produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RoutingDecision {
    Direct {
        response: String,
    },
    Route {
        #[serde(rename = "nextAgent")]
        next_agent: ExecutorName,
        params: Map<String, Value>,
        reasoning: String,
    },
}

impl RoutingDecision {
    pub fn direct(response: impl Into<String>) -> Self {
        RoutingDecision::Direct {
            response: response.into(),
        }
    }

    pub fn is_completed(&self) -> bool {
        matches!(self, RoutingDecision::Direct { .. })
    }
}

/// Last executor output carried into the next routing step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentResult {
    pub agent: ExecutorName,
    pub status: ExecutionStatus,
    pub result: Value,
    #[serde(default)]
    pub message: Option<String>,
    /// Set once `result` holds user-facing text from the formatter.
    #[serde(default)]
    pub already_formatted: bool,
}

/// Routing state for one top-level task. Rebuilt, never mutated, at each step.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RoutingContext {
    pub failed_agents: BTreeSet<ExecutorName>,
    pub step: u32,
    pub final_formulation: bool,
    pub last_agent_result: Option<AgentResult>,
}

impl RoutingContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn has_failed(&self, agent: &str) -> bool {
        self.failed_agents.contains(agent)
    }

    pub fn with_failed(&self, agent: &str) -> Self {
        let mut next = self.clone();
        next.failed_agents.insert(agent.to_string());
        next
    }

    pub fn with_result(&self, result: AgentResult) -> Self {
        let mut next = self.clone();
        next.last_agent_result = Some(result);
        next
    }

    pub fn next_step(&self) -> Self {
        let mut next = self.clone();
        next.step += 1;
        next
    }

    pub fn finalizing(&self) -> Self {
        let mut next = self.clone();
        next.final_formulation = true;
        next
    }
}
