//! # OpenRAG
//!
//! PDF ingestion and retrieval augmented generation.
//!
//! Documents flow through four stages, each persisting an artifact to a blob
//! store so stages can be rerun or distributed through a work queue:
//!
//! 1. **Extract** page text from `raw-pdfs/{file}.pdf`
//! 2. **Chunk** sentences into overlapping token-bounded chunks
//! 3. **Vectorize** chunks with the configured embedding backend
//! 4. **Store** vectors under sequential ids in a vector store
//!
//! Questions are answered by embedding them, searching the collection,
//! pulling in neighbouring chunks, and handing the passages to an LLM.
//!
//! ## Quick Start
//!
//! ```bash
//! openrag init
//! cp report.pdf data/raw-pdfs/
//! openrag ingest report
//! openrag query "What does the report conclude?"
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Description |
//! |---------|-------------|
//! | `ares-vector` (default) | HNSW vector store on local disk, the `local` provider |
//! | `qdrant` | Qdrant vector database |
//! | `local-embeddings` | fastembed models for the `bert` vectorizer |
//! | `full` | Everything above |
//!
//! ## Modules
//!
//! - [`api`] - REST API handlers and routes
//! - [`db`] - Vector stores and the chunk index
//! - [`llm`] - LLM client implementations
//! - [`pipeline`] - Stage orchestration and queue worker
//! - [`rag`] - Extraction, chunking, embeddings and querying
//! - [`storage`] - Blob stores and the work queue
//! - [`types`] - Common types and error handling

#![cfg_attr(docsrs, feature(doc_cfg))]

/// HTTP API handlers and routes.
pub mod api;
/// Command-line interface.
pub mod cli;
/// Vector stores and indexing.
pub mod db;
/// LLM provider clients and abstractions.
pub mod llm;
/// Ingestion pipeline and queue worker.
pub mod pipeline;
/// Retrieval Augmented Generation (RAG) components.
pub mod rag;
/// Blob storage and work queue.
pub mod storage;
/// Core types (requests, responses, errors).
pub mod types;
/// Configuration utilities (TOML).
pub mod utils;

// Re-export commonly used types
pub use db::{VectorStore, VectorStoreProvider};
pub use llm::{LLMClient, Provider};
pub use pipeline::{Pipeline, PipelineJob, PipelineSettings};
pub use rag::query::{QueryEngine, QueryOptions};
pub use storage::{ArtifactStore, BlobStore, WorkQueue};
pub use types::{AppError, Result};
pub use utils::toml_config::OpenRagConfig;

use crate::rag::cache::EmbeddingCache;
use crate::rag::embeddings::{create_vectorizer, Vectorizer};
use crate::storage::{AzureBlobStore, InMemoryBlobStore, LocalBlobStore};
use crate::utils::toml_config::StorageBackend;
use std::sync::Arc;
use tracing::info;

/// Application state shared across handlers and CLI commands
#[derive(Clone)]
pub struct AppState {
    /// Loaded configuration
    pub config: Arc<OpenRagConfig>,
    /// Stage runner
    pub pipeline: Arc<Pipeline>,
    /// Retrieval and answering
    pub query_engine: Arc<QueryEngine>,
    /// Jobs for the background worker
    pub queue: Arc<WorkQueue>,
}

impl AppState {
    /// Build every component from configuration.
    pub async fn from_config(config: OpenRagConfig) -> Result<Self> {
        let blobs = create_blob_store(&config).await?;
        let vectorizer = create_vectorizer(&config.vectorizer)?;
        let store = config.vector_store.to_provider()?.create_store().await?;
        let llm = match config.llm.to_provider()? {
            Some(provider) => Some(provider.create_client()?),
            None => None,
        };

        info!(
            storage = blobs.backend_name(),
            vectorizer = vectorizer.name(),
            vector_store = store.provider_name(),
            llm = llm.as_ref().map(|c| c.model_name()).unwrap_or("none"),
            "Initialised components"
        );

        Self::from_parts(config, blobs, vectorizer, store, llm)
    }

    /// Assemble state from already-built components.
    pub fn from_parts(
        config: OpenRagConfig,
        blobs: Arc<dyn BlobStore>,
        vectorizer: Arc<dyn Vectorizer>,
        store: Arc<dyn VectorStore>,
        llm: Option<Arc<dyn LLMClient>>,
    ) -> Result<Self> {
        let artifacts = ArtifactStore::new(blobs);
        let settings = PipelineSettings::from(&config);
        let cache = (config.vectorizer.cache_capacity > 0)
            .then(|| Arc::new(EmbeddingCache::new(config.vectorizer.cache_capacity)));

        let mut pipeline =
            Pipeline::new(artifacts.clone(), vectorizer.clone(), store.clone(), settings)?;
        let mut query_engine = QueryEngine::new(
            artifacts,
            vectorizer,
            store,
            config.vector_store.collection.clone(),
            config.vectorizer.dimensions,
        );
        if let Some(cache) = cache {
            pipeline = pipeline.with_cache(cache.clone());
            query_engine = query_engine.with_cache(cache);
        }
        if let Some(llm) = llm {
            query_engine = query_engine.with_llm(llm);
        }

        let queue = Arc::new(WorkQueue::new(config.queue.name.clone()));

        Ok(Self {
            config: Arc::new(config),
            pipeline: Arc::new(pipeline),
            query_engine: Arc::new(query_engine),
            queue,
        })
    }

    /// Query options from the `[query]` section.
    pub fn default_query_options(&self) -> QueryOptions {
        QueryOptions {
            top_k: self.config.query.top_k,
            max_neighbors: self.config.query.max_neighbors,
            generate: self.config.query.generate,
        }
    }
}

async fn create_blob_store(config: &OpenRagConfig) -> Result<Arc<dyn BlobStore>> {
    match config.storage.backend {
        StorageBackend::Local => {
            let store = LocalBlobStore::new(&config.storage.path);
            store.ensure_layout().await?;
            Ok(Arc::new(store))
        }
        StorageBackend::Azure => {
            let account_url = config.storage.account_url.as_deref().ok_or_else(|| {
                AppError::Configuration("storage.account_url is not set".to_string())
            })?;
            let sas_token = config.sas_token()?;
            Ok(Arc::new(AzureBlobStore::new(account_url, &sas_token)?))
        }
        StorageBackend::Memory => Ok(Arc::new(InMemoryBlobStore::new())),
    }
}
