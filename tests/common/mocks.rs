//! Mock implementations for testing.
//!
//! Deterministic stand-ins for the network-backed vectorizer and LLM client,
//! shared across test files.

use async_trait::async_trait;
use openrag::llm::LLMClient;
use openrag::rag::embeddings::Vectorizer;
use openrag::types::{AppError, Result};
use parking_lot::Mutex;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Hashing-trick bag of words, L2-normalised.
///
/// Texts sharing words land close together, which is enough for retrieval
/// tests without a model.
pub struct MockVectorizer {
    dimensions: usize,
    calls: AtomicUsize,
}

impl MockVectorizer {
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Vectorizer for MockVectorizer {
    fn name(&self) -> &str {
        "mock"
    }

    fn dimensions(&self) -> Option<usize> {
        Some(self.dimensions)
    }

    async fn vectorize(&self, text: &str) -> Result<Vec<f32>> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        let mut vector = vec![0.0f32; self.dimensions];
        for word in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| w.len() > 1)
        {
            let mut hasher = DefaultHasher::new();
            word.to_lowercase().hash(&mut hasher);
            vector[(hasher.finish() as usize) % self.dimensions] += 1.0;
        }

        let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            vector.iter_mut().for_each(|v| *v /= norm);
        }
        Ok(vector)
    }
}

/// Mock LLM client with a fixed response that records the prompts it saw.
#[derive(Clone)]
pub struct MockLLMClient {
    response: String,
    should_fail: bool,
    prompts: Arc<Mutex<Vec<(String, String)>>>,
}

impl MockLLMClient {
    /// Create a new mock client that returns the given response
    pub fn new(response: &str) -> Self {
        Self {
            response: response.to_string(),
            should_fail: false,
            prompts: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Create a mock client that always returns an error
    pub fn failing() -> Self {
        Self {
            should_fail: true,
            ..Self::new("")
        }
    }

    /// `(system, prompt)` pairs received so far
    pub fn prompts(&self) -> Vec<(String, String)> {
        self.prompts.lock().clone()
    }

    fn respond(&self, system: &str, prompt: &str) -> Result<String> {
        self.prompts
            .lock()
            .push((system.to_string(), prompt.to_string()));
        if self.should_fail {
            return Err(AppError::LLM("Mock LLM failure".to_string()));
        }
        Ok(self.response.clone())
    }
}

#[async_trait]
impl LLMClient for MockLLMClient {
    async fn generate(&self, prompt: &str) -> Result<String> {
        self.respond("", prompt)
    }

    async fn generate_with_system(&self, system: &str, prompt: &str) -> Result<String> {
        self.respond(system, prompt)
    }

    async fn generate_with_history(&self, messages: &[(String, String)]) -> Result<String> {
        let prompt = messages
            .iter()
            .map(|(_, content)| content.as_str())
            .collect::<Vec<_>>()
            .join("\n");
        self.respond("", &prompt)
    }

    fn model_name(&self) -> &str {
        "mock-model"
    }
}
