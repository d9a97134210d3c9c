//! LLM client abstraction and provider selection.

use crate::types::{AppError, Result};
use async_trait::async_trait;
use std::sync::Arc;

/// Generic LLM client trait for provider abstraction.
///
/// The query engine only needs plain text completions, so the trait stays
/// small. Any OpenAI-compatible server can sit behind it.
#[async_trait]
pub trait LLMClient: Send + Sync {
    /// Generate a completion from a prompt
    async fn generate(&self, prompt: &str) -> Result<String>;

    /// Generate with system prompt
    async fn generate_with_system(&self, system: &str, prompt: &str) -> Result<String>;

    /// Generate from `(role, content)` pairs
    async fn generate_with_history(&self, messages: &[(String, String)]) -> Result<String>;

    /// Get the model name/identifier
    fn model_name(&self) -> &str;
}

/// Provider enum for runtime selection.
///
/// | Provider | Endpoint |
/// |----------|----------|
/// | OpenAI | `{api_base}/chat/completions` |
/// | Ollama | `{base_url}/v1/chat/completions` (OpenAI-compatible mode) |
#[derive(Debug, Clone)]
pub enum Provider {
    /// OpenAI API or any compatible server (Azure OpenAI, vLLM, OpenRouter)
    OpenAI {
        api_key: String,
        api_base: String,
        model: String,
    },

    /// Local Ollama server
    Ollama { base_url: String, model: String },
}

impl Provider {
    /// Create a client instance for this provider.
    pub fn create_client(&self) -> Result<Arc<dyn LLMClient>> {
        match self {
            Provider::OpenAI {
                api_key,
                api_base,
                model,
            } => Ok(Arc::new(super::openai::OpenAIClient::new(
                api_key.clone(),
                api_base.clone(),
                model.clone(),
            )?)),

            Provider::Ollama { base_url, model } => {
                if base_url.is_empty() {
                    return Err(AppError::Configuration(
                        "Ollama provider needs a base_url".to_string(),
                    ));
                }
                Ok(Arc::new(super::openai::OpenAIClient::new(
                    String::new(),
                    format!("{}/v1", base_url.trim_end_matches('/')),
                    model.clone(),
                )?))
            }
        }
    }

    /// Get a human-readable name for this provider
    pub fn name(&self) -> &'static str {
        match self {
            Provider::OpenAI { .. } => "OpenAI",
            Provider::Ollama { .. } => "Ollama",
        }
    }
}
