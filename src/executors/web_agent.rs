use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::sync::Arc;

use super::Executor;
use crate::browser::BrowserAgent;
use crate::parsing::{bool_field, str_field};
use crate::types::{ExecutionResult, ExecutorDescriptor, ExecutorStatus, ParamSpec};

pub const WEB_AGENT: &str = "WebAgent";

pub fn web_agent_descriptor(status: ExecutorStatus) -> ExecutorDescriptor {
    ExecutorDescriptor {
        name: WEB_AGENT.to_string(),
        description: "Drives a headless browser to search, navigate, fill forms and extract \
                      structured data such as product listings from live websites."
            .to_string(),
        required_params: vec![
            ParamSpec::url("url", "Absolute URL of the page to start from, e.g. a search results URL"),
            ParamSpec::text("task", "What to accomplish or extract on the site"),
        ],
        optional_params: vec![],
        capabilities: vec![
            "web_browsing".to_string(),
            "data_extraction".to_string(),
            "form_filling".to_string(),
            "product_search".to_string(),
        ],
        examples: vec![
            "find wireless earbuds under $50 on example.com".to_string(),
            "get the top 10 stories from news.ycombinator.com".to_string(),
            "check the opening hours listed on a store's website".to_string(),
        ],
        status,
    }
}

/// Adapts [`BrowserAgent`] runs to executor results.
pub struct WebAgentExecutor {
    agent: Arc<BrowserAgent>,
    descriptor: ExecutorDescriptor,
}

impl WebAgentExecutor {
    pub fn new(agent: Arc<BrowserAgent>) -> Self {
        Self {
            agent,
            descriptor: web_agent_descriptor(ExecutorStatus::Implemented),
        }
    }
}

#[async_trait]
impl Executor for WebAgentExecutor {
    fn descriptor(&self) -> &ExecutorDescriptor {
        &self.descriptor
    }

    async fn invoke(&self, params: &Map<String, Value>) -> Result<ExecutionResult> {
        let url = str_field(params, "url").ok_or_else(|| anyhow!("url is required"))?;
        let task = str_field(params, "task").ok_or_else(|| anyhow!("task is required"))?;

        let payload = self.agent.run(url, task).await;
        let Value::Object(fields) = &payload else {
            return Err(anyhow!("WebAgent returned a non-object payload"));
        };

        if bool_field(fields, "error").unwrap_or(false) {
            let message = str_field(fields, "message").unwrap_or("WebAgent failed").to_string();
            let mut result = ExecutionResult::failed(message);
            result.result = payload;
            return Ok(result);
        }

        if bool_field(fields, "isCompleted").unwrap_or(false) {
            Ok(ExecutionResult::complete(payload))
        } else {
            Ok(ExecutionResult::partial(
                payload,
                "WebAgent stopped before completing the task",
            ))
        }
    }
}
