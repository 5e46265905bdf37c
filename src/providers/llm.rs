use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Mutex;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: String,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant".to_string(),
            content: content.into(),
        }
    }
}

/// Per-call overrides; `None` falls back to the backend's configured default.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CompletionOptions {
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
    /// Ask the backend for a JSON-only reply when it supports that.
    #[serde(default)]
    pub json: bool,
}

impl CompletionOptions {
    pub fn json() -> Self {
        Self {
            json: true,
            ..Self::default()
        }
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }
}

#[async_trait]
pub trait LLMProvider: Send + Sync {
    fn name(&self) -> &str;

    async fn complete(&self, messages: Vec<Message>, options: &CompletionOptions) -> Result<String>;
}

type Responder = Box<dyn Fn(&[Message]) -> Result<String> + Send + Sync>;

// Mock provider for testing
pub struct MockLLMProvider {
    responder: Responder,
    calls: Mutex<Vec<Vec<Message>>>,
}

impl MockLLMProvider {
    pub fn new() -> Self {
        Self::with_response(r#"{"isCompleted": true, "response": "Mock response"}"#.to_string())
    }

    pub fn with_response(response: String) -> Self {
        Self::from_fn(move |_| Ok(response.clone()))
    }

    /// Replies in order; the last reply repeats once the list is used up.
    pub fn with_responses(responses: Vec<String>) -> Self {
        let cursor = Mutex::new(0usize);
        Self::from_fn(move |_| {
            let mut index = cursor.lock().unwrap();
            let reply = responses
                .get(*index)
                .or_else(|| responses.last())
                .cloned()
                .unwrap_or_default();
            *index += 1;
            Ok(reply)
        })
    }

    pub fn from_fn<F>(responder: F) -> Self
    where
        F: Fn(&[Message]) -> Result<String> + Send + Sync + 'static,
    {
        Self {
            responder: Box::new(responder),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn calls(&self) -> Vec<Vec<Message>> {
        self.calls.lock().unwrap().clone()
    }
}

impl Default for MockLLMProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LLMProvider for MockLLMProvider {
    fn name(&self) -> &str {
        "mock"
    }

    async fn complete(&self, messages: Vec<Message>, _options: &CompletionOptions) -> Result<String> {
        let reply = (self.responder)(&messages);
        self.calls.lock().unwrap().push(messages);
        reply
    }
}
