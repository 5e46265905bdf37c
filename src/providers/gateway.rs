use anyhow::{anyhow, Result};
use serde::Serialize;
use std::sync::Arc;

use crate::config::{Backend, Config};
use crate::governor::{ContentGovernor, PromptContent};
use crate::providers::cloud::CloudProvider;
use crate::providers::llm::{CompletionOptions, LLMProvider, Message};
use crate::providers::ollama::OllamaProvider;

/// One request in a [`ModelGateway::batch_complete`] call.
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub system_prompt: String,
    pub user_prompt: String,
    pub options: CompletionOptions,
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchOutcome {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Uniform `complete(system, user, options)` over the configured backend.
///
/// Every call goes through the content governor first.
pub struct ModelGateway {
    backend: Arc<dyn LLMProvider>,
    governor: ContentGovernor,
}

impl ModelGateway {
    pub fn new(backend: Arc<dyn LLMProvider>, governor: ContentGovernor) -> Self {
        Self { backend, governor }
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        let gateway = &config.gateway;
        let backend: Arc<dyn LLMProvider> = match gateway.backend {
            Backend::Local => Arc::new(
                OllamaProvider::new(
                    Some(gateway.local_base_url.clone()),
                    Some(gateway.local_model.clone()),
                )
                .with_defaults(
                    gateway.max_output_tokens,
                    gateway.temperature,
                    gateway.context_length,
                ),
            ),
            Backend::Cloud => {
                if gateway.cloud_api_keys.is_empty() {
                    return Err(anyhow!(
                        "Cloud backend selected but no API keys configured (set WAYFARER_CLOUD_API_KEYS)"
                    ));
                }
                Arc::new(
                    CloudProvider::new(gateway.cloud_api_keys.clone(), gateway.cloud_base_url.clone())
                        .with_model(gateway.cloud_model.clone())
                        .with_defaults(gateway.max_output_tokens, gateway.temperature),
                )
            }
        };

        log::info!("Model gateway using {} backend", gateway.backend.as_str());
        Ok(Self::new(backend, ContentGovernor::new(config.governor.clone())))
    }

    pub fn backend_name(&self) -> &str {
        self.backend.name()
    }

    pub fn governor(&self) -> &ContentGovernor {
        &self.governor
    }

    pub async fn complete(
        &self,
        system_prompt: &str,
        user: impl Into<PromptContent>,
        options: &CompletionOptions,
    ) -> Result<String> {
        let prepared = self.governor.prepare(system_prompt, &user.into());
        if let Some(warning) = &prepared.warning {
            log::warn!("Sending over-budget prompt: {}", warning);
        }

        let messages = vec![
            Message::system(prepared.system_prompt),
            Message::user(prepared.content),
        ];
        self.backend.complete(messages, options).await
    }

    /// Runs every request concurrently; one failure never cancels the others.
    pub async fn batch_complete(&self, requests: Vec<CompletionRequest>) -> Vec<BatchOutcome> {
        let calls = requests.iter().map(|request| {
            self.complete(
                &request.system_prompt,
                request.user_prompt.as_str(),
                &request.options,
            )
        });

        futures::future::join_all(calls)
            .await
            .into_iter()
            .map(|outcome| match outcome {
                Ok(data) => BatchOutcome {
                    success: true,
                    data: Some(data),
                    error: None,
                },
                Err(err) => BatchOutcome {
                    success: false,
                    data: None,
                    error: Some(err.to_string()),
                },
            })
            .collect()
    }
}
