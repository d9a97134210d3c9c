//! Chunk vectorization.
//!
//! | Kind | Aliases | Backend |
//! |------|---------|---------|
//! | `OpenAI` | `ada`, `openai` | `POST {api_base}/embeddings` |
//! | `TfIdf` | `tfidf` | Single-document TF-IDF, computed locally |
//! | `Local` | `bert`, `local` | fastembed ONNX model (feature `local-embeddings`) |
//!
//! Every vector is right-padded with zeros to the collection dimensionality
//! before it is stored.

use crate::rag::cache::EmbeddingCache;
use crate::storage::ArtifactStore;
use crate::types::{AppError, Result};
use crate::utils::toml_config::VectorizerConfig;
use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

pub const DEFAULT_EMBEDDING_MODEL: &str = "text-embedding-3-large";

/// Text embedding backend.
#[async_trait]
pub trait Vectorizer: Send + Sync {
    /// Stable name, also used to key the embedding cache.
    fn name(&self) -> &str;

    /// Native vector size, if fixed.
    fn dimensions(&self) -> Option<usize>;

    async fn vectorize(&self, text: &str) -> Result<Vec<f32>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VectorizerKind {
    OpenAI,
    TfIdf,
    Local,
}

impl FromStr for VectorizerKind {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "ada" | "openai" => Ok(VectorizerKind::OpenAI),
            "tfidf" => Ok(VectorizerKind::TfIdf),
            "bert" | "local" => Ok(VectorizerKind::Local),
            "word2vec" => Err(AppError::Configuration(
                "The word2vec vectorizer is not supported; use tfidf, ada or bert".to_string(),
            )),
            other => Err(AppError::Configuration(format!(
                "Unknown vectorizer '{}'",
                other
            ))),
        }
    }
}

/// The vectorized artifact of one document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorSet {
    pub vectorizer: String,
    pub dimensions: usize,
    /// One vector per chunk, in chunk order
    pub vectors: Vec<Vec<f32>>,
}

// ============================================================================
// OpenAI-compatible embeddings
// ============================================================================

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    input: &'a str,
    model: &'a str,
    encoding_format: &'a str,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

/// Embeddings from an OpenAI-compatible `/embeddings` endpoint.
pub struct OpenAIVectorizer {
    client: reqwest::Client,
    api_base: String,
    api_key: String,
    model: String,
    dimensions: Option<usize>,
}

impl OpenAIVectorizer {
    pub fn new(api_base: impl Into<String>, api_key: impl Into<String>, model: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|e| AppError::Embedding(format!("Failed to build HTTP client: {}", e)))?;
        let model = model.into();
        let dimensions = match model.as_str() {
            "text-embedding-3-large" => Some(3072),
            "text-embedding-3-small" | "text-embedding-ada-002" => Some(1536),
            _ => None,
        };

        Ok(Self {
            client,
            api_base: api_base.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            model,
            dimensions,
        })
    }
}

#[async_trait]
impl Vectorizer for OpenAIVectorizer {
    fn name(&self) -> &str {
        &self.model
    }

    fn dimensions(&self) -> Option<usize> {
        self.dimensions
    }

    async fn vectorize(&self, text: &str) -> Result<Vec<f32>> {
        let mut request = self
            .client
            .post(format!("{}/embeddings", self.api_base))
            .json(&EmbeddingRequest {
                input: text,
                model: &self.model,
                encoding_format: "float",
            });
        if !self.api_key.is_empty() {
            request = request.bearer_auth(&self.api_key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| AppError::Embedding(format!("Embedding request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::Embedding(format!(
                "Embedding endpoint returned {}: {}",
                status, body
            )));
        }

        let parsed: EmbeddingResponse = response
            .json()
            .await
            .map_err(|e| AppError::Embedding(format!("Malformed embedding response: {}", e)))?;

        parsed
            .data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .ok_or_else(|| AppError::Embedding("Embedding response contained no data".to_string()))
    }
}

// ============================================================================
// TF-IDF
// ============================================================================

/// TF-IDF over a single document.
///
/// The vocabulary is the sorted set of lowercased tokens of at least two
/// word characters, so each text gets its own vector space and size.
pub struct TfIdfVectorizer {
    token_pattern: Regex,
}

impl TfIdfVectorizer {
    pub fn new() -> Result<Self> {
        let token_pattern = Regex::new(r"\b\w\w+\b")
            .map_err(|e| AppError::Internal(format!("Invalid token pattern: {}", e)))?;
        Ok(Self { token_pattern })
    }

    pub fn fit_transform(&self, text: &str) -> Vec<f32> {
        let lowered = text.to_lowercase();
        let mut term_counts: BTreeMap<&str, f32> = BTreeMap::new();
        for token in self.token_pattern.find_iter(&lowered) {
            *term_counts.entry(token.as_str()).or_default() += 1.0;
        }

        // Smooth idf is ln((1 + n) / (1 + df)) + 1, which is 1 for one document
        let idf = 1.0;
        let weights: Vec<f32> = term_counts.values().map(|tf| tf * idf).collect();

        let norm = weights.iter().map(|w| w * w).sum::<f32>().sqrt();
        if norm == 0.0 {
            return weights;
        }
        weights.into_iter().map(|w| w / norm).collect()
    }
}

#[async_trait]
impl Vectorizer for TfIdfVectorizer {
    fn name(&self) -> &str {
        "tfidf"
    }

    fn dimensions(&self) -> Option<usize> {
        None
    }

    async fn vectorize(&self, text: &str) -> Result<Vec<f32>> {
        Ok(self.fit_transform(text))
    }
}

// ============================================================================
// Local ONNX embeddings
// ============================================================================

#[cfg(feature = "local-embeddings")]
pub use local::LocalVectorizer;

#[cfg(feature = "local-embeddings")]
mod local {
    use super::Vectorizer;
    use crate::types::{AppError, Result};
    use async_trait::async_trait;
    use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};
    use parking_lot::Mutex;
    use std::sync::Arc;

    /// fastembed model running in-process.
    pub struct LocalVectorizer {
        name: String,
        dimensions: usize,
        model: Arc<Mutex<TextEmbedding>>,
    }

    impl LocalVectorizer {
        pub fn new(model_name: &str) -> Result<Self> {
            let (model, dimensions) = match model_name.to_ascii_lowercase().as_str() {
                "bge-small-en-v1.5" => (EmbeddingModel::BGESmallENV15, 384),
                "bge-base-en-v1.5" => (EmbeddingModel::BGEBaseENV15, 768),
                "all-minilm-l6-v2" => (EmbeddingModel::AllMiniLML6V2, 384),
                other => {
                    return Err(AppError::Configuration(format!(
                        "Unsupported local embedding model '{}'",
                        other
                    )))
                }
            };

            let embedding = TextEmbedding::try_new(
                InitOptions::new(model).with_show_download_progress(true),
            )
            .map_err(|e| AppError::Embedding(e.to_string()))?;

            Ok(Self {
                name: model_name.to_string(),
                dimensions,
                model: Arc::new(Mutex::new(embedding)),
            })
        }
    }

    #[async_trait]
    impl Vectorizer for LocalVectorizer {
        fn name(&self) -> &str {
            &self.name
        }

        fn dimensions(&self) -> Option<usize> {
            Some(self.dimensions)
        }

        async fn vectorize(&self, text: &str) -> Result<Vec<f32>> {
            let model = Arc::clone(&self.model);
            let text = text.to_string();
            let mut vectors = tokio::task::spawn_blocking(move || {
                model
                    .lock()
                    .embed(vec![text], None)
                    .map_err(|e| AppError::Embedding(e.to_string()))
            })
            .await
            .map_err(|e| AppError::Internal(format!("Embedding task failed: {}", e)))??;

            vectors
                .pop()
                .ok_or_else(|| AppError::Embedding("Model returned no embedding".to_string()))
        }
    }
}

// ============================================================================
// Factory and helpers
// ============================================================================

/// Build the vectorizer selected in config.
pub fn create_vectorizer(config: &VectorizerConfig) -> Result<Arc<dyn Vectorizer>> {
    match config.kind.parse::<VectorizerKind>()? {
        VectorizerKind::OpenAI => {
            let api_key = std::env::var(&config.api_key_env).unwrap_or_else(|_| {
                warn!(env = %config.api_key_env, "Embedding API key not set; sending unauthenticated requests");
                String::new()
            });
            Ok(Arc::new(OpenAIVectorizer::new(
                &config.api_base,
                api_key,
                &config.model,
            )?))
        }
        VectorizerKind::TfIdf => Ok(Arc::new(TfIdfVectorizer::new()?)),
        #[cfg(feature = "local-embeddings")]
        VectorizerKind::Local => Ok(Arc::new(LocalVectorizer::new(&config.local_model)?)),
        #[cfg(not(feature = "local-embeddings"))]
        VectorizerKind::Local => Err(AppError::Configuration(
            "The bert vectorizer requires the 'local-embeddings' feature".to_string(),
        )),
    }
}

/// Right-pad with zeros up to `target_dim`. Longer vectors are returned as is.
pub fn pad_vector(mut vector: Vec<f32>, target_dim: usize) -> Vec<f32> {
    if vector.len() < target_dim {
        vector.resize(target_dim, 0.0);
    }
    vector
}

/// Embed one text, going through the cache when one is given.
pub async fn embed_text(
    vectorizer: &dyn Vectorizer,
    text: &str,
    cache: Option<&EmbeddingCache>,
) -> Result<Vec<f32>> {
    if let Some(vector) = cache.and_then(|c| c.get(vectorizer.name(), text)) {
        return Ok(vector);
    }

    let vector = vectorizer.vectorize(text).await?;
    if let Some(cache) = cache {
        cache.put(vectorizer.name(), text, vector.clone());
    }
    Ok(vector)
}

/// Embed one text and pad it to `expected_dim`.
///
/// # Errors
///
/// `AppError::InvalidInput` if the vectorizer produced more than
/// `expected_dim` values.
pub async fn embed_padded(
    vectorizer: &dyn Vectorizer,
    text: &str,
    expected_dim: usize,
    cache: Option<&EmbeddingCache>,
) -> Result<Vec<f32>> {
    let vector = embed_text(vectorizer, text, cache).await?;
    if vector.len() > expected_dim {
        return Err(AppError::InvalidInput(format!(
            "Vectorizer '{}' produced {} dimensions, collection expects {}",
            vectorizer.name(),
            vector.len(),
            expected_dim
        )));
    }
    Ok(pad_vector(vector, expected_dim))
}

/// Vectorize every chunk of `file_name` and save the vectorized artifact.
pub async fn vectorize_and_store(
    store: &ArtifactStore,
    file_name: &str,
    vectorizer: &dyn Vectorizer,
    expected_dim: usize,
    cache: Option<&EmbeddingCache>,
) -> Result<VectorSet> {
    let start = Instant::now();
    let chunks = store.get_chunked(file_name).await?;

    let mut vectors = Vec::with_capacity(chunks.len());
    for (i, chunk) in chunks.iter().enumerate() {
        vectors.push(embed_padded(vectorizer, &chunk.text, expected_dim, cache).await?);
        debug!(file = file_name, chunk = i + 1, total = chunks.len(), "Vectorized chunk");
    }

    let set = VectorSet {
        vectorizer: vectorizer.name().to_string(),
        dimensions: expected_dim,
        vectors,
    };
    store.put_vectorized(file_name, &set).await?;

    info!(
        file = file_name,
        vectors = set.vectors.len(),
        vectorizer = vectorizer.name(),
        duration_ms = start.elapsed().as_millis() as u64,
        "Vectorized chunks"
    );
    Ok(set)
}
