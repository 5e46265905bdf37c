pub mod browser;
pub mod executor;
pub mod task;

pub use browser::{
    ActionOutcome, ActionType, BrowserAction, BrowserStep, ElementDescriptor, FormSummary,
    PageMetrics, PageSnapshot,
};
pub use executor::{ExecutorDescriptor, ExecutorStatus, ParamKind, ParamSpec};
pub use task::{
    AgentResult, ExecutionResult, ExecutionStatus, RoutingContext, RoutingDecision, Task,
};

use uuid::Uuid;

pub type TaskId = Uuid;
pub type ExecutorName = String;
