use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use thiserror::Error;

use crate::providers::llm::{CompletionOptions, LLMProvider, Message};

const MAX_ATTEMPTS: usize = 3;

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("API error {status}: {body}")]
    Http { status: u16, body: String },
    #[error("transport error: {0}")]
    Transport(String),
    #[error("no content in response")]
    EmptyResponse,
    #[error("no API keys configured")]
    NoKeys,
    #[error("all {attempts} attempts failed, last error: {last}")]
    Exhausted { attempts: usize, last: String },
}

impl ProviderError {
    /// Quota and rate-limit failures are worth retrying on another key.
    pub fn is_rate_limited(&self) -> bool {
        match self {
            ProviderError::Http { status: 429, .. } => true,
            ProviderError::Http { body, .. } | ProviderError::Transport(body) => {
                let lower = body.to_lowercase();
                ["quota", "rate limit", "rate_limit", "ratelimit", "resource_exhausted", "too many requests"]
                    .iter()
                    .any(|marker| lower.contains(marker))
            }
            _ => false,
        }
    }
}

impl From<reqwest::Error> for ProviderError {
    fn from(err: reqwest::Error) -> Self {
        match err.status() {
            Some(status) => ProviderError::Http {
                status: status.as_u16(),
                body: err.to_string(),
            },
            None => ProviderError::Transport(err.to_string()),
        }
    }
}

/// Which key served a call, for usage telemetry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RotationReport {
    pub key_index: usize,
    pub key_suffix: String,
    pub attempts: usize,
}

/// Round-robin pool of API keys.
///
/// Every attempt takes the next key in sequence, wrapping modulo the pool size.
pub struct KeyPool {
    keys: Vec<String>,
    next: AtomicUsize,
}

impl KeyPool {
    pub fn new(keys: Vec<String>) -> Self {
        Self {
            keys: keys.into_iter().filter(|k| !k.trim().is_empty()).collect(),
            next: AtomicUsize::new(0),
        }
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Index the next attempt will use.
    pub fn current_index(&self) -> usize {
        if self.keys.is_empty() {
            return 0;
        }
        self.next.load(Ordering::SeqCst) % self.keys.len()
    }

    fn take_next(&self) -> usize {
        self.next.fetch_add(1, Ordering::SeqCst) % self.keys.len()
    }

    /// Runs `call` with rotating keys.
    ///
    /// Up to `min(3, keys)` attempts. Rate-limit errors move on to the next
    /// key; any other error aborts at once.
    pub async fn run<T, F, Fut>(&self, mut call: F) -> Result<(T, RotationReport), ProviderError>
    where
        F: FnMut(String) -> Fut,
        Fut: Future<Output = Result<T, ProviderError>>,
    {
        if self.keys.is_empty() {
            return Err(ProviderError::NoKeys);
        }

        let max_attempts = MAX_ATTEMPTS.min(self.keys.len());
        let mut last_error = None;

        for attempt in 1..=max_attempts {
            let index = self.take_next();
            let key = self.keys[index].clone();

            match call(key.clone()).await {
                Ok(value) => {
                    return Ok((
                        value,
                        RotationReport {
                            key_index: index,
                            key_suffix: key_suffix(&key),
                            attempts: attempt,
                        },
                    ));
                }
                Err(err) if err.is_rate_limited() => {
                    log::warn!(
                        "Key ...{} rate limited (attempt {}/{}): {}",
                        key_suffix(&key),
                        attempt,
                        max_attempts,
                        err
                    );
                    last_error = Some(err);
                }
                Err(err) => return Err(err),
            }
        }

        Err(ProviderError::Exhausted {
            attempts: max_attempts,
            last: last_error
                .map(|e| e.to_string())
                .unwrap_or_else(|| "unknown error".to_string()),
        })
    }
}

fn key_suffix(key: &str) -> String {
    let chars: Vec<char> = key.chars().collect();
    chars[chars.len().saturating_sub(4)..].iter().collect()
}

/// OpenAI-compatible chat completions backend with key rotation.
pub struct CloudProvider {
    keys: KeyPool,
    base_url: String,
    model: String,
    max_tokens: u32,
    temperature: f32,
    client: reqwest::Client,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [Message],
    max_tokens: u32,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<ResponseFormat>,
}

#[derive(Debug, Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: Message,
}

impl CloudProvider {
    pub fn new(keys: Vec<String>, base_url: impl Into<String>) -> Self {
        Self {
            keys: KeyPool::new(keys),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: "gemini-2.0-flash".to_string(),
            max_tokens: 2048,
            temperature: 0.3,
            client: reqwest::Client::new(),
        }
    }

    pub fn with_model(mut self, model: String) -> Self {
        self.model = model;
        self
    }

    pub fn with_defaults(mut self, max_tokens: u32, temperature: f32) -> Self {
        self.max_tokens = max_tokens;
        self.temperature = temperature;
        self
    }

    pub fn key_count(&self) -> usize {
        self.keys.len()
    }

    async fn send(
        &self,
        key: &str,
        messages: &[Message],
        options: &CompletionOptions,
    ) -> Result<String, ProviderError> {
        let request = ChatRequest {
            model: &self.model,
            messages,
            max_tokens: options.max_tokens.unwrap_or(self.max_tokens),
            temperature: options.temperature.unwrap_or(self.temperature),
            response_format: options.json.then_some(ResponseFormat { kind: "json_object" }),
        };

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", key))
            .header("Content-Type", "application/json")
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::Http { status, body });
        }

        let result: ChatResponse = response.json().await?;
        result
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .filter(|c| !c.trim().is_empty())
            .ok_or(ProviderError::EmptyResponse)
    }
}

#[async_trait]
impl LLMProvider for CloudProvider {
    fn name(&self) -> &str {
        "cloud"
    }

    async fn complete(&self, messages: Vec<Message>, options: &CompletionOptions) -> Result<String> {
        let (text, report) = self
            .keys
            .run(|key| {
                let messages = &messages;
                async move { self.send(&key, messages, options).await }
            })
            .await?;

        log::info!(
            "model usage backend=cloud model={} key=...{} attempts={}",
            self.model,
            report.key_suffix,
            report.attempts
        );

        Ok(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn pool(n: usize) -> KeyPool {
        KeyPool::new((1..=n).map(|i| format!("key-000{}", i)).collect())
    }

    #[tokio::test]
    async fn test_rotation_is_fair_and_cyclic() {
        let keys = pool(4);
        let before = keys.current_index();
        let mut used = Vec::new();

        for _ in 0..4 {
            let (key, report) = keys
                .run(|key| async move { Ok::<_, ProviderError>(key) })
                .await
                .unwrap();
            assert_eq!(report.attempts, 1);
            used.push(key);
        }

        assert_eq!(used, vec!["key-0001", "key-0002", "key-0003", "key-0004"]);
        assert_eq!(keys.current_index(), before);
    }

    #[tokio::test]
    async fn test_rate_limited_keys_rotate_until_success() {
        let keys = pool(3);
        let (value, report) = keys
            .run(|key| async move {
                if key == "key-0003" {
                    Ok(format!("served by {}", key))
                } else {
                    Err(ProviderError::Http {
                        status: 429,
                        body: "Too Many Requests".to_string(),
                    })
                }
            })
            .await
            .unwrap();

        assert_eq!(value, "served by key-0003");
        assert_eq!(report.attempts, 3);
        assert_eq!(report.key_suffix, "0003");
    }

    #[tokio::test]
    async fn test_non_rate_error_aborts_without_rotation() {
        let keys = pool(3);
        let seen = Mutex::new(Vec::new());
        let err = keys
            .run(|key| {
                seen.lock().unwrap().push(key);
                async {
                    Err::<String, _>(ProviderError::Http {
                        status: 401,
                        body: "invalid api key".to_string(),
                    })
                }
            })
            .await
            .unwrap_err();

        assert!(matches!(err, ProviderError::Http { status: 401, .. }));
        assert_eq!(seen.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_attempts_capped_at_three() {
        let keys = pool(5);
        let seen = Mutex::new(0);
        let err = keys
            .run(|_| {
                *seen.lock().unwrap() += 1;
                async {
                    Err::<String, _>(ProviderError::Http {
                        status: 400,
                        body: "Quota exceeded for project".to_string(),
                    })
                }
            })
            .await
            .unwrap_err();

        assert_eq!(*seen.lock().unwrap(), 3);
        match err {
            ProviderError::Exhausted { attempts, last } => {
                assert_eq!(attempts, 3);
                assert!(last.contains("Quota exceeded"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_single_key_gets_single_attempt() {
        let keys = pool(1);
        let err = keys
            .run(|_| async {
                Err::<String, _>(ProviderError::Http {
                    status: 429,
                    body: String::new(),
                })
            })
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::Exhausted { attempts: 1, .. }));
    }

    #[tokio::test]
    async fn test_empty_pool() {
        let keys = KeyPool::new(vec!["  ".to_string()]);
        assert!(keys.is_empty());
        let err = keys
            .run(|_| async { Ok::<_, ProviderError>(()) })
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::NoKeys));
    }

    #[test]
    fn test_rate_limit_classification() {
        let by_status = ProviderError::Http { status: 429, body: String::new() };
        let by_body = ProviderError::Http { status: 403, body: "RESOURCE_EXHAUSTED".to_string() };
        let auth = ProviderError::Http { status: 401, body: "bad key".to_string() };
        assert!(by_status.is_rate_limited());
        assert!(by_body.is_rate_limited());
        assert!(!auth.is_rate_limited());
        assert!(!ProviderError::EmptyResponse.is_rate_limited());
    }

    #[tokio::test]
    async fn test_non_rate_limit_error_stops_rotation() {
        let context_limit = ProviderError::Http {
            status: 400,
            body: "This model's maximum context length limit exceeded".to_string(),
        };
        let by_message = ProviderError::Transport("Rate limit reached for requests".to_string());
        assert!(!context_limit.is_rate_limited());
        assert!(by_message.is_rate_limited());

        let keys = pool(3);
        let calls = Mutex::new(0);
        let err = keys
            .run(|_| {
                *calls.lock().unwrap() += 1;
                async {
                    Err::<(), _>(ProviderError::Http {
                        status: 400,
                        body: "context length limit exceeded".to_string(),
                    })
                }
            })
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::Http { status: 400, .. }));
        assert_eq!(*calls.lock().unwrap(), 1);
    }

    #[test]
    fn test_cloud_provider_creation() {
        let provider = CloudProvider::new(vec!["a".into(), "b".into()], "https://api.example.com/v1/")
            .with_model("test-model".to_string());
        assert_eq!(provider.key_count(), 2);
        assert_eq!(provider.base_url, "https://api.example.com/v1");
        assert_eq!(provider.model, "test-model");
    }
}
