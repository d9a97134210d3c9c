//! LLM Provider Clients
//!
//! Answers are generated through the [`LLMClient`] trait. The bundled
//! [`OpenAIClient`](openai::OpenAIClient) talks to any OpenAI-compatible
//! `/chat/completions` endpoint, which covers OpenAI itself and a local
//! Ollama server.
//!
//! # Example
//!
//! ```ignore
//! use openrag::llm::Provider;
//!
//! let client = Provider::Ollama {
//!     base_url: "http://localhost:11434".to_string(),
//!     model: "llama3.2".to_string(),
//! }
//! .create_client()?;
//!
//! let answer = client.generate_with_system("Be brief.", "What is RAG?").await?;
//! ```

pub mod client;
pub mod openai;

pub use client::{LLMClient, Provider};
pub use openai::OpenAIClient;
