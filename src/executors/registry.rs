use std::collections::HashMap;
use std::sync::Arc;

use super::web_agent::{web_agent_descriptor, WebAgentExecutor};
use super::Executor;
use crate::browser::BrowserAgent;
use crate::types::{ExecutorDescriptor, ExecutorStatus, ParamSpec};

/// Name-keyed executors plus planned entries the router may see but never use.
#[derive(Default)]
pub struct ExecutorRegistry {
    executors: HashMap<String, Arc<dyn Executor>>,
    descriptors: Vec<ExecutorDescriptor>,
}

impl ExecutorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the web agent (planned when no browser is available)
    /// and the planned email and document executors.
    pub fn with_defaults(browser: Option<Arc<BrowserAgent>>) -> Self {
        let mut registry = Self::new();
        match browser {
            Some(agent) => registry.register(Arc::new(WebAgentExecutor::new(agent))),
            None => registry.register_planned(web_agent_descriptor(ExecutorStatus::Planned)),
        }
        registry.register_planned(email_agent_descriptor());
        registry.register_planned(document_agent_descriptor());
        registry
    }

    pub fn register(&mut self, executor: Arc<dyn Executor>) {
        let descriptor = executor.descriptor().clone();
        self.remove(&descriptor.name);
        self.executors.insert(descriptor.name.clone(), executor);
        self.descriptors.push(descriptor);
    }

    pub fn register_planned(&mut self, mut descriptor: ExecutorDescriptor) {
        descriptor.status = ExecutorStatus::Planned;
        self.remove(&descriptor.name);
        self.descriptors.push(descriptor);
    }

    fn remove(&mut self, name: &str) {
        self.executors.remove(name);
        self.descriptors.retain(|d| d.name != name);
    }

    /// Only implemented executors are returned.
    pub fn get(&self, name: &str) -> Option<Arc<dyn Executor>> {
        self.executors.get(name).cloned()
    }

    pub fn descriptor(&self, name: &str) -> Option<&ExecutorDescriptor> {
        self.descriptors.iter().find(|d| d.name == name)
    }

    pub fn descriptors(&self) -> &[ExecutorDescriptor] {
        &self.descriptors
    }

    pub fn implemented_count(&self) -> usize {
        self.executors.len()
    }
}

pub fn email_agent_descriptor() -> ExecutorDescriptor {
    ExecutorDescriptor {
        name: "EmailAgent".to_string(),
        description: "Composes and sends email on the user's behalf.".to_string(),
        required_params: vec![
            ParamSpec::text("to", "Recipient address"),
            ParamSpec::text("subject", "Subject line"),
            ParamSpec::text("body", "Message body"),
        ],
        optional_params: vec![ParamSpec::text("cc", "Additional recipients")],
        capabilities: vec!["email".to_string(), "notifications".to_string()],
        examples: vec!["email the results to alice@example.com".to_string()],
        status: ExecutorStatus::Planned,
    }
}

pub fn document_agent_descriptor() -> ExecutorDescriptor {
    ExecutorDescriptor {
        name: "DocumentAgent".to_string(),
        description: "Reads, summarizes and answers questions about uploaded documents.".to_string(),
        required_params: vec![
            ParamSpec::url("documentUrl", "Location of the document"),
            ParamSpec::text("task", "What to do with the document"),
        ],
        optional_params: vec![],
        capabilities: vec!["document_analysis".to_string(), "summarization".to_string()],
        examples: vec!["summarize the attached PDF report".to_string()],
        status: ExecutorStatus::Planned,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_without_browser_are_all_planned() {
        let registry = ExecutorRegistry::with_defaults(None);
        assert_eq!(registry.implemented_count(), 0);
        assert_eq!(registry.descriptors().len(), 3);
        assert!(registry.get("WebAgent").is_none());
        assert_eq!(
            registry.descriptor("WebAgent").unwrap().status,
            ExecutorStatus::Planned
        );
    }

    #[test]
    fn test_planned_registration_replaces_and_downgrades() {
        let mut registry = ExecutorRegistry::new();
        let mut descriptor = email_agent_descriptor();
        descriptor.status = ExecutorStatus::Implemented;
        registry.register_planned(descriptor.clone());
        registry.register_planned(descriptor);

        assert_eq!(registry.descriptors().len(), 1);
        assert!(!registry.descriptors()[0].is_implemented());
    }
}
