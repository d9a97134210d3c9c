use crate::llm::client::LLMClient;
use crate::types::{AppError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Deserialize)]
struct ChatChoiceMessage {
    content: Option<String>,
}

/// Chat completions over any OpenAI-compatible HTTP API.
pub struct OpenAIClient {
    client: reqwest::Client,
    api_key: String,
    api_base: String,
    model: String,
    temperature: Option<f32>,
    max_tokens: Option<u32>,
}

impl OpenAIClient {
    pub fn new(api_key: String, api_base: String, model: String) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(120))
            .build()
            .map_err(|e| AppError::LLM(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            api_key,
            api_base: api_base.trim_end_matches('/').to_string(),
            model,
            temperature: None,
            max_tokens: None,
        })
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    async fn chat(&self, messages: Vec<ChatMessage<'_>>) -> Result<String> {
        let body = ChatRequest {
            model: &self.model,
            messages,
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        };

        let mut request = self
            .client
            .post(format!("{}/chat/completions", self.api_base))
            .json(&body);
        if !self.api_key.is_empty() {
            request = request.bearer_auth(&self.api_key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| AppError::LLM(format!("Chat completion request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(AppError::LLM(format!(
                "Chat completion endpoint returned {}: {}",
                status, text
            )));
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| AppError::LLM(format!("Malformed chat completion: {}", e)))?;

        let content = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| AppError::LLM("No response from model".to_string()))?;

        debug!(model = %self.model, chars = content.len(), "Chat completion received");
        Ok(content)
    }
}

#[async_trait]
impl LLMClient for OpenAIClient {
    async fn generate(&self, prompt: &str) -> Result<String> {
        self.chat(vec![ChatMessage {
            role: "user",
            content: prompt,
        }])
        .await
    }

    async fn generate_with_system(&self, system: &str, prompt: &str) -> Result<String> {
        self.chat(vec![
            ChatMessage {
                role: "system",
                content: system,
            },
            ChatMessage {
                role: "user",
                content: prompt,
            },
        ])
        .await
    }

    async fn generate_with_history(&self, messages: &[(String, String)]) -> Result<String> {
        self.chat(
            messages
                .iter()
                .map(|(role, content)| ChatMessage { role, content })
                .collect(),
        )
        .await
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_skips_unset_options() {
        let body = ChatRequest {
            model: "gpt-4o-mini",
            messages: vec![ChatMessage {
                role: "user",
                content: "hi",
            }],
            temperature: None,
            max_tokens: Some(64),
        };
        let json = serde_json::to_value(&body).unwrap();
        assert!(json.get("temperature").is_none());
        assert_eq!(json["max_tokens"], 64);
        assert_eq!(json["messages"][0]["role"], "user");
    }

    #[test]
    fn test_trailing_slash_trimmed() {
        let client = OpenAIClient::new(
            String::new(),
            "http://localhost:11434/v1/".to_string(),
            "llama3.2".to_string(),
        )
        .unwrap()
        .with_temperature(0.2);
        assert_eq!(client.api_base, "http://localhost:11434/v1");
        assert_eq!(client.temperature, Some(0.2));
    }
}
