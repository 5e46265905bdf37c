use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde_json::json;

use crate::providers::llm::{CompletionOptions, LLMProvider, Message};

/// Local inference backend: one endpoint, no credentials, no rotation.
pub struct OllamaProvider {
    base_url: String,
    model: String,
    max_tokens: u32,
    temperature: f32,
    context_length: u32,
    client: reqwest::Client,
}

impl OllamaProvider {
    pub fn new(base_url: Option<String>, model: Option<String>) -> Self {
        Self {
            base_url: base_url.unwrap_or_else(|| "http://localhost:11434".to_string()),
            model: model.unwrap_or_else(|| "llama3.1".to_string()),
            max_tokens: 2048,
            temperature: 0.3,
            context_length: 32768,
            client: reqwest::Client::new(),
        }
    }

    pub fn with_defaults(mut self, max_tokens: u32, temperature: f32, context_length: u32) -> Self {
        self.max_tokens = max_tokens;
        self.temperature = temperature;
        self.context_length = context_length;
        self
    }
}

#[async_trait]
impl LLMProvider for OllamaProvider {
    fn name(&self) -> &str {
        "local"
    }

    async fn complete(&self, messages: Vec<Message>, options: &CompletionOptions) -> Result<String> {
        let ollama_messages: Vec<_> = messages
            .iter()
            .map(|m| {
                json!({
                    "role": m.role.clone(),
                    "content": m.content.clone(),
                })
            })
            .collect();

        let mut body = json!({
            "model": self.model,
            "messages": ollama_messages,
            "stream": false,
            "options": {
                "temperature": options.temperature.unwrap_or(self.temperature),
                "num_predict": options.max_tokens.unwrap_or(self.max_tokens),
                "num_ctx": self.context_length,
            },
        });
        if options.json {
            body["format"] = json!("json");
        }

        let response = self
            .client
            .post(format!("{}/api/chat", self.base_url))
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            anyhow::bail!("Ollama API error {}: {}", status, text);
        }

        let body: serde_json::Value = response.json().await?;
        let content = body["message"]["content"]
            .as_str()
            .ok_or_else(|| anyhow!("Invalid Ollama response"))?;

        log::info!("model usage backend=local model={} attempts=1", self.model);

        Ok(content.to_string())
    }
}
