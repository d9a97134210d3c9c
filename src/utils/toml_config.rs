//! TOML-based configuration for OpenRAG
//!
//! Every section has serde defaults, so an empty `openrag.toml` is a valid
//! configuration: local blob storage under `./data`, the OpenAI embedding
//! endpoint, and a local vector store.
//!
//! Secrets are never written to the file. Sections name the environment
//! variable holding them (`api_key_env`, `sas_token_env`).

use crate::db::vectorstore::{DistanceMetric, VectorStoreProvider};
use crate::llm::Provider;
use crate::rag::chunker::{
    CHUNK_SIZE_TOKENS_MAX, CHUNK_SIZE_TOKENS_MIN, DEFAULT_ENCODING, OVERLAP_SIZE_TOKENS,
};
use crate::rag::embeddings::{VectorizerKind, DEFAULT_EMBEDDING_MODEL};
use crate::rag::query::{DEFAULT_MAX_NEIGHBORS, DEFAULT_TOP_K};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Root configuration structure loaded from openrag.toml
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct OpenRagConfig {
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub chunking: ChunkingConfig,
    pub vectorizer: VectorizerConfig,
    pub vector_store: VectorStoreConfig,
    pub llm: LlmConfig,
    pub query: QueryConfig,
    pub queue: QueueConfig,
}

// ============= Server Configuration =============

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    3000
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            log_level: default_log_level(),
        }
    }
}

// ============= Storage Configuration =============

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    /// Blobs under a local directory
    #[default]
    Local,
    /// Azure Blob Storage over REST with a SAS token
    Azure,
    /// Process memory, for tests and dry runs
    Memory,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default)]
    pub backend: StorageBackend,

    /// Root directory of the local backend
    #[serde(default = "default_storage_path")]
    pub path: String,

    /// Blob service URL, e.g. `https://myaccount.blob.core.windows.net`
    #[serde(default)]
    pub account_url: Option<String>,

    /// Environment variable name containing the SAS token
    #[serde(default = "default_sas_token_env")]
    pub sas_token_env: String,
}

fn default_storage_path() -> String {
    "./data".to_string()
}

fn default_sas_token_env() -> String {
    "AZURE_STORAGE_SAS_TOKEN".to_string()
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::default(),
            path: default_storage_path(),
            account_url: None,
            sas_token_env: default_sas_token_env(),
        }
    }
}

// ============= Chunking Configuration =============

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkingConfig {
    /// A chunk closes once it holds at least this many tokens
    #[serde(default = "default_min_tokens")]
    pub min_tokens: usize,

    /// Sentences that push a chunk past this are split in half
    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,

    /// Tokens of trailing sentences carried into the next chunk
    #[serde(default = "default_overlap_tokens")]
    pub overlap_tokens: usize,

    /// tiktoken encoding used for counting
    #[serde(default = "default_encoding")]
    pub encoding: String,
}

fn default_min_tokens() -> usize {
    CHUNK_SIZE_TOKENS_MIN
}

fn default_max_tokens() -> usize {
    CHUNK_SIZE_TOKENS_MAX
}

fn default_overlap_tokens() -> usize {
    OVERLAP_SIZE_TOKENS
}

fn default_encoding() -> String {
    DEFAULT_ENCODING.to_string()
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            min_tokens: default_min_tokens(),
            max_tokens: default_max_tokens(),
            overlap_tokens: default_overlap_tokens(),
            encoding: default_encoding(),
        }
    }
}

// ============= Vectorizer Configuration =============

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorizerConfig {
    /// `ada` (OpenAI-compatible endpoint), `tfidf` or `bert` (local model)
    #[serde(default = "default_vectorizer_kind")]
    pub kind: String,

    #[serde(default = "default_embedding_model")]
    pub model: String,

    #[serde(default = "default_openai_api_base")]
    pub api_base: String,

    /// Environment variable name containing the API key
    #[serde(default = "default_openai_api_key_env")]
    pub api_key_env: String,

    /// Vectors are zero-padded to this size
    #[serde(default = "default_dimensions")]
    pub dimensions: usize,

    /// fastembed model for the `bert` vectorizer
    #[serde(default = "default_local_model")]
    pub local_model: String,

    /// Embedding cache entries; 0 disables the cache
    #[serde(default = "default_cache_capacity")]
    pub cache_capacity: usize,
}

fn default_vectorizer_kind() -> String {
    "ada".to_string()
}

fn default_embedding_model() -> String {
    DEFAULT_EMBEDDING_MODEL.to_string()
}

fn default_openai_api_base() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_openai_api_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}

fn default_dimensions() -> usize {
    3072
}

fn default_local_model() -> String {
    "bge-small-en-v1.5".to_string()
}

fn default_cache_capacity() -> usize {
    1000
}

impl Default for VectorizerConfig {
    fn default() -> Self {
        Self {
            kind: default_vectorizer_kind(),
            model: default_embedding_model(),
            api_base: default_openai_api_base(),
            api_key_env: default_openai_api_key_env(),
            dimensions: default_dimensions(),
            local_model: default_local_model(),
            cache_capacity: default_cache_capacity(),
        }
    }
}

// ============= Vector Store Configuration =============

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorStoreConfig {
    /// `memory`, `local` or `qdrant`
    #[serde(default = "default_vector_provider")]
    pub provider: String,

    /// Directory for the local provider
    #[serde(default = "default_vector_path")]
    pub path: String,

    /// Qdrant gRPC URL
    #[serde(default = "default_qdrant_url")]
    pub url: String,

    /// Environment variable name containing the Qdrant API key
    #[serde(default)]
    pub api_key_env: Option<String>,

    #[serde(default = "default_collection")]
    pub collection: String,

    /// `l2` or `cosine`
    #[serde(default = "default_metric")]
    pub metric: String,
}

fn default_vector_provider() -> String {
    "local".to_string()
}

fn default_vector_path() -> String {
    "./data/vectors".to_string()
}

fn default_qdrant_url() -> String {
    "http://localhost:6334".to_string()
}

fn default_collection() -> String {
    "openrag".to_string()
}

fn default_metric() -> String {
    "l2".to_string()
}

impl Default for VectorStoreConfig {
    fn default() -> Self {
        Self {
            provider: default_vector_provider(),
            path: default_vector_path(),
            url: default_qdrant_url(),
            api_key_env: None,
            collection: default_collection(),
            metric: default_metric(),
        }
    }
}

impl VectorStoreConfig {
    /// Resolve the provider section into a store factory.
    pub fn to_provider(&self) -> Result<VectorStoreProvider, ConfigError> {
        match self.provider.to_ascii_lowercase().as_str() {
            "memory" | "in-memory" | "inmemory" => Ok(VectorStoreProvider::InMemory),
            #[cfg(feature = "ares-vector")]
            "local" => Ok(VectorStoreProvider::Local {
                path: self.path.clone(),
            }),
            #[cfg(not(feature = "ares-vector"))]
            "local" => Err(ConfigError::ValidationError(
                "The local vector store requires the 'ares-vector' feature".to_string(),
            )),
            #[cfg(feature = "qdrant")]
            "qdrant" => Ok(VectorStoreProvider::Qdrant {
                url: self.url.clone(),
                api_key: self
                    .api_key_env
                    .as_deref()
                    .and_then(|env| std::env::var(env).ok()),
            }),
            #[cfg(not(feature = "qdrant"))]
            "qdrant" => Err(ConfigError::ValidationError(
                "The qdrant vector store requires the 'qdrant' feature".to_string(),
            )),
            other => Err(ConfigError::ValidationError(format!(
                "Unknown vector store provider '{}'",
                other
            ))),
        }
    }

    pub fn distance_metric(&self) -> Result<DistanceMetric, ConfigError> {
        self.metric
            .parse()
            .map_err(|e: crate::types::AppError| ConfigError::ValidationError(e.to_string()))
    }
}

// ============= LLM Configuration =============

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// `openai`, `ollama` or `none`
    #[serde(default = "default_llm_provider")]
    pub provider: String,

    #[serde(default = "default_llm_model")]
    pub model: String,

    /// Base URL for the OpenAI provider
    #[serde(default = "default_openai_api_base")]
    pub api_base: String,

    /// Environment variable name containing the API key
    #[serde(default = "default_openai_api_key_env")]
    pub api_key_env: String,

    /// Base URL for the Ollama provider
    #[serde(default = "default_ollama_url")]
    pub base_url: String,
}

fn default_llm_provider() -> String {
    "openai".to_string()
}

fn default_llm_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_ollama_url() -> String {
    "http://localhost:11434".to_string()
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: default_llm_provider(),
            model: default_llm_model(),
            api_base: default_openai_api_base(),
            api_key_env: default_openai_api_key_env(),
            base_url: default_ollama_url(),
        }
    }
}

impl LlmConfig {
    /// `None` when answer generation is disabled.
    pub fn to_provider(&self) -> Result<Option<Provider>, ConfigError> {
        match self.provider.to_ascii_lowercase().as_str() {
            "none" | "" => Ok(None),
            "openai" => Ok(Some(Provider::OpenAI {
                api_key: std::env::var(&self.api_key_env).unwrap_or_default(),
                api_base: self.api_base.clone(),
                model: self.model.clone(),
            })),
            "ollama" => Ok(Some(Provider::Ollama {
                base_url: self.base_url.clone(),
                model: self.model.clone(),
            })),
            other => Err(ConfigError::ValidationError(format!(
                "Unknown LLM provider '{}'",
                other
            ))),
        }
    }
}

// ============= Query Configuration =============

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryConfig {
    #[serde(default = "default_top_k")]
    pub top_k: usize,

    #[serde(default = "default_max_neighbors")]
    pub max_neighbors: usize,

    /// Ask the LLM for an answer by default
    #[serde(default = "default_generate")]
    pub generate: bool,
}

fn default_top_k() -> usize {
    DEFAULT_TOP_K
}

fn default_max_neighbors() -> usize {
    DEFAULT_MAX_NEIGHBORS
}

fn default_generate() -> bool {
    true
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            max_neighbors: default_max_neighbors(),
            generate: default_generate(),
        }
    }
}

// ============= Queue Configuration =============

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    #[serde(default = "default_queue_name")]
    pub name: String,

    /// Messages received per poll
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    #[serde(default = "default_visibility_timeout_secs")]
    pub visibility_timeout_secs: u64,

    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,

    /// Messages received more often than this are dropped as poison
    #[serde(default = "default_max_dequeue_count")]
    pub max_dequeue_count: u32,
}

fn default_queue_name() -> String {
    "openrag-jobs".to_string()
}

fn default_batch_size() -> usize {
    5
}

fn default_visibility_timeout_secs() -> u64 {
    300
}

fn default_poll_interval_secs() -> u64 {
    5
}

fn default_max_dequeue_count() -> u32 {
    5
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            name: default_queue_name(),
            batch_size: default_batch_size(),
            visibility_timeout_secs: default_visibility_timeout_secs(),
            poll_interval_secs: default_poll_interval_secs(),
            max_dequeue_count: default_max_dequeue_count(),
        }
    }
}

impl QueueConfig {
    pub fn visibility_timeout(&self) -> Duration {
        Duration::from_secs(self.visibility_timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }
}

// ============= Configuration Loading & Validation =============

/// Errors that can occur during configuration loading
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Configuration file not found: {0}")]
    FileNotFound(PathBuf),

    #[error("Failed to read configuration file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Environment variable '{0}' referenced in config is not set")]
    MissingEnvVar(String),
}

impl From<ConfigError> for crate::types::AppError {
    fn from(err: ConfigError) -> Self {
        crate::types::AppError::Configuration(err.to_string())
    }
}

impl OpenRagConfig {
    /// Load and validate configuration from a TOML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let config = Self::load_unvalidated(path)?;
        config.validate()?;
        Ok(config)
    }

    /// Load without validation, e.g. to display a broken configuration
    pub fn load_unvalidated<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(ConfigError::FileNotFound(path.to_path_buf()));
        }

        let content = fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// Validate numeric invariants and env var availability
    pub fn validate(&self) -> Result<(), ConfigError> {
        let chunking = &self.chunking;
        if chunking.min_tokens == 0 {
            return Err(ConfigError::ValidationError(
                "chunking.min_tokens must be at least 1".to_string(),
            ));
        }
        if chunking.min_tokens > chunking.max_tokens {
            return Err(ConfigError::ValidationError(format!(
                "chunking.min_tokens ({}) exceeds chunking.max_tokens ({})",
                chunking.min_tokens, chunking.max_tokens
            )));
        }
        if chunking.overlap_tokens >= chunking.max_tokens {
            return Err(ConfigError::ValidationError(format!(
                "chunking.overlap_tokens ({}) must be below chunking.max_tokens ({})",
                chunking.overlap_tokens, chunking.max_tokens
            )));
        }

        if self.vectorizer.dimensions == 0 {
            return Err(ConfigError::ValidationError(
                "vectorizer.dimensions must be at least 1".to_string(),
            ));
        }
        let kind: VectorizerKind = self
            .vectorizer
            .kind
            .parse()
            .map_err(|e: crate::types::AppError| ConfigError::ValidationError(e.to_string()))?;

        if self.query.top_k == 0 {
            return Err(ConfigError::ValidationError(
                "query.top_k must be at least 1".to_string(),
            ));
        }
        if self.queue.batch_size == 0 {
            return Err(ConfigError::ValidationError(
                "queue.batch_size must be at least 1".to_string(),
            ));
        }

        self.vector_store.to_provider()?;
        self.vector_store.distance_metric()?;
        let llm = self.llm.to_provider()?;

        // Env vars that must be present for the selected backends
        if self.storage.backend == StorageBackend::Azure {
            if self.storage.account_url.is_none() {
                return Err(ConfigError::ValidationError(
                    "storage.account_url is required for the azure backend".to_string(),
                ));
            }
            self.validate_env_var(&self.storage.sas_token_env)?;
        }
        if kind == VectorizerKind::OpenAI {
            self.validate_env_var(&self.vectorizer.api_key_env)?;
        }
        if let Some(Provider::OpenAI { .. }) = llm {
            self.validate_env_var(&self.llm.api_key_env)?;
        }
        if let Some(ref env) = self.vector_store.api_key_env {
            self.validate_env_var(env)?;
        }

        Ok(())
    }

    fn validate_env_var(&self, name: &str) -> Result<(), ConfigError> {
        std::env::var(name).map_err(|_| ConfigError::MissingEnvVar(name.to_string()))?;
        Ok(())
    }

    /// Get a resolved value from an env var reference
    pub fn resolve_env(&self, env_name: &str) -> Option<String> {
        std::env::var(env_name).ok()
    }

    /// Get the Azure SAS token from the environment
    pub fn sas_token(&self) -> Result<String, ConfigError> {
        self.resolve_env(&self.storage.sas_token_env)
            .ok_or_else(|| ConfigError::MissingEnvVar(self.storage.sas_token_env.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn offline_config() -> &'static str {
        r#"
[server]
port = 8080
log_level = "debug"

[chunking]
min_tokens = 50
max_tokens = 100
overlap_tokens = 10

[vectorizer]
kind = "tfidf"
dimensions = 64

[vector_store]
provider = "memory"
collection = "docs"
metric = "cosine"

[llm]
provider = "none"
"#
    }

    #[test]
    fn test_empty_file_uses_defaults() {
        let config = OpenRagConfig::from_toml("").unwrap();
        assert_eq!(config.server.port, 3000);
        assert_eq!(config.chunking.min_tokens, CHUNK_SIZE_TOKENS_MIN);
        assert_eq!(config.chunking.encoding, "cl100k_base");
        assert_eq!(config.vectorizer.kind, "ada");
        assert_eq!(config.vectorizer.dimensions, 3072);
        assert_eq!(config.vector_store.collection, "openrag");
        assert_eq!(config.storage.backend, StorageBackend::Local);
        assert_eq!(config.queue.visibility_timeout(), Duration::from_secs(300));
    }

    #[test]
    fn test_parse_offline_config() {
        let config = OpenRagConfig::from_toml(offline_config()).unwrap();
        config.validate().unwrap();

        assert_eq!(config.server.port, 8080);
        assert_eq!(config.chunking.max_tokens, 100);
        assert!(matches!(
            config.vector_store.to_provider().unwrap(),
            VectorStoreProvider::InMemory
        ));
        assert_eq!(
            config.vector_store.distance_metric().unwrap(),
            DistanceMetric::Cosine
        );
        assert!(config.llm.to_provider().unwrap().is_none());
    }

    #[test]
    fn test_min_above_max_rejected() {
        let mut config = OpenRagConfig::from_toml(offline_config()).unwrap();
        config.chunking.min_tokens = 200;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::ValidationError(_))
        ));
    }

    #[test]
    fn test_zero_top_k_rejected() {
        let mut config = OpenRagConfig::from_toml(offline_config()).unwrap();
        config.query.top_k = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_word2vec_rejected() {
        let mut config = OpenRagConfig::from_toml(offline_config()).unwrap();
        config.vectorizer.kind = "word2vec".to_string();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::ValidationError(_))
        ));
    }

    #[test]
    fn test_missing_env_var_reported() {
        let mut config = OpenRagConfig::from_toml(offline_config()).unwrap();
        config.vectorizer.kind = "ada".to_string();
        config.vectorizer.api_key_env = "OPENRAG_TEST_UNSET_KEY_4821".to_string();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::MissingEnvVar(name)) if name == "OPENRAG_TEST_UNSET_KEY_4821"
        ));
    }

    #[test]
    fn test_azure_requires_account_url() {
        let mut config = OpenRagConfig::from_toml(offline_config()).unwrap();
        config.storage.backend = StorageBackend::Azure;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::ValidationError(_))
        ));
    }

    #[test]
    fn test_missing_file() {
        let result = OpenRagConfig::load("/nonexistent/openrag.toml");
        assert!(matches!(result, Err(ConfigError::FileNotFound(_))));
    }
}
