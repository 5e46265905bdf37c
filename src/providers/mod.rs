pub mod cloud;
pub mod gateway;
pub mod llm;
pub mod ollama;

pub use cloud::{CloudProvider, KeyPool, ProviderError};
pub use gateway::{BatchOutcome, CompletionRequest, ModelGateway};
pub use llm::{CompletionOptions, LLMProvider, Message, MockLLMProvider};
pub use ollama::OllamaProvider;
