pub mod registry;
pub mod web_agent;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::types::{ExecutionResult, ExecutorDescriptor};

pub use registry::ExecutorRegistry;
pub use web_agent::WebAgentExecutor;

/// A unit of work the router can delegate to.
#[async_trait]
pub trait Executor: Send + Sync {
    fn descriptor(&self) -> &ExecutorDescriptor;

    fn name(&self) -> &str {
        &self.descriptor().name
    }

    /// Params have already been checked against the descriptor.
    async fn invoke(&self, params: &Map<String, Value>) -> Result<ExecutionResult>;
}
