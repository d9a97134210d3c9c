//! Question answering over the indexed collection.
//!
//! A question is embedded with the same vectorizer used at ingestion, the
//! nearest chunk ids are expanded with their neighbours, and the ids are
//! resolved back to chunk text through the [`ChunkIndex`] manifest.

use crate::db::indexer::ChunkIndex;
use crate::db::vectorstore::{Neighbor, VectorStore};
use crate::llm::LLMClient;
use crate::rag::cache::EmbeddingCache;
use crate::rag::chunker::{Chunk, ChunkSet};
use crate::rag::embeddings::{embed_padded, Vectorizer};
use crate::storage::ArtifactStore;
use crate::types::{AppError, Result};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt::Write as _;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

pub const DEFAULT_TOP_K: usize = 5;
pub const DEFAULT_MAX_NEIGHBORS: usize = 10;

pub const SYSTEM_PROMPT: &str = "You answer questions about a document collection. \
Use only the numbered context passages. Cite passages by number, e.g. [2]. \
If the context does not contain the answer, say that you do not know.";

/// Embed a question and pad it to the collection's dimensionality.
pub async fn vectorize_question(
    vectorizer: &dyn Vectorizer,
    question: &str,
    dimensions: usize,
    cache: Option<&EmbeddingCache>,
) -> Result<Vec<f32>> {
    embed_padded(vectorizer, question, dimensions, cache).await
}

/// Expand search hits with their adjacent ids.
///
/// Hits are walked in order. An unseen hit is kept with its distance, then
/// its unseen neighbours `id - 1` and `id + 1` are kept without one. The
/// result never holds more than `max_neighbors` entries.
pub fn filter_non_adjacent_indices(
    results: &[Neighbor],
    max_neighbors: usize,
) -> Vec<(u64, Option<f32>)> {
    let mut selected: Vec<(u64, Option<f32>)> = Vec::new();
    let mut seen = HashSet::new();

    'hits: for hit in results {
        if selected.len() >= max_neighbors {
            break;
        }
        if !seen.insert(hit.id) {
            continue;
        }
        selected.push((hit.id, Some(hit.distance)));

        let adjacent = [hit.id.checked_sub(1), hit.id.checked_add(1)];
        for id in adjacent.into_iter().flatten() {
            if selected.len() >= max_neighbors {
                break 'hits;
            }
            if seen.insert(id) {
                selected.push((id, None));
            }
        }
    }

    selected
}

/// Resolve a vector id to its chunk.
///
/// Returns `None` when no file owns the id or the file has no such chunk.
pub async fn find_text_chunks(
    artifacts: &ArtifactStore,
    index: &ChunkIndex,
    chunk_id: u64,
) -> Result<Option<Chunk>> {
    let Some((file, number)) = index.lookup(chunk_id) else {
        return Ok(None);
    };
    let chunks = artifacts.get_chunked(file).await?;
    Ok(chunks.get(number).cloned())
}

/// A chunk returned for a question.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievedChunk {
    pub id: u64,
    pub file: String,
    /// 1-based position within the file's chunked artifact
    pub chunk_number: usize,
    /// Search distance, absent for chunks pulled in as neighbours
    #[serde(skip_serializing_if = "Option::is_none")]
    pub distance: Option<f32>,
    pub text: String,
    pub page: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryAnswer {
    pub answer: Option<String>,
    pub chunks: Vec<RetrievedChunk>,
}

#[derive(Debug, Clone, Copy)]
pub struct QueryOptions {
    pub top_k: usize,
    pub max_neighbors: usize,
    pub generate: bool,
}

impl Default for QueryOptions {
    fn default() -> Self {
        Self {
            top_k: DEFAULT_TOP_K,
            max_neighbors: DEFAULT_MAX_NEIGHBORS,
            generate: true,
        }
    }
}

/// Retrieval and answer generation over one collection.
#[derive(Clone)]
pub struct QueryEngine {
    artifacts: ArtifactStore,
    vectorizer: Arc<dyn Vectorizer>,
    store: Arc<dyn VectorStore>,
    collection: String,
    dimensions: usize,
    llm: Option<Arc<dyn LLMClient>>,
    cache: Option<Arc<EmbeddingCache>>,
}

impl QueryEngine {
    pub fn new(
        artifacts: ArtifactStore,
        vectorizer: Arc<dyn Vectorizer>,
        store: Arc<dyn VectorStore>,
        collection: impl Into<String>,
        dimensions: usize,
    ) -> Self {
        Self {
            artifacts,
            vectorizer,
            store,
            collection: collection.into(),
            dimensions,
            llm: None,
            cache: None,
        }
    }

    pub fn with_llm(mut self, llm: Arc<dyn LLMClient>) -> Self {
        self.llm = Some(llm);
        self
    }

    pub fn with_cache(mut self, cache: Arc<EmbeddingCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn has_llm(&self) -> bool {
        self.llm.is_some()
    }

    /// Find the chunks closest to `question`, plus their neighbours, ordered by id.
    pub async fn retrieve(
        &self,
        question: &str,
        top_k: usize,
        max_neighbors: usize,
    ) -> Result<Vec<RetrievedChunk>> {
        if question.trim().is_empty() {
            return Err(AppError::InvalidInput("Question is empty".to_string()));
        }
        if top_k == 0 {
            return Err(AppError::InvalidInput("top_k must be at least 1".to_string()));
        }

        let start = Instant::now();
        let vector = vectorize_question(
            self.vectorizer.as_ref(),
            question,
            self.dimensions,
            self.cache.as_deref(),
        )
        .await?;

        let hits = self.store.search(&self.collection, &vector, top_k).await?;
        let mut selected = filter_non_adjacent_indices(&hits, max_neighbors);
        selected.sort_by_key(|(id, _)| *id);
        debug!(hits = hits.len(), selected = selected.len(), "Expanded search hits");

        let index = self.artifacts.get_chunk_index().await?;
        let mut loaded: HashMap<String, ChunkSet> = HashMap::new();
        let mut chunks = Vec::with_capacity(selected.len());

        for (id, distance) in selected {
            let Some((file, number)) = index.lookup(id) else {
                debug!(id, "No file owns id");
                continue;
            };
            if !loaded.contains_key(file) {
                let set = self.artifacts.get_chunked(file).await?;
                loaded.insert(file.to_string(), set);
            }
            let Some(chunk) = loaded.get(file).and_then(|set| set.get(number)) else {
                debug!(id, file, number, "Chunk missing from artifact");
                continue;
            };
            chunks.push(RetrievedChunk {
                id,
                file: file.to_string(),
                chunk_number: number,
                distance,
                text: chunk.text.clone(),
                page: chunk.page,
            });
        }

        info!(
            collection = %self.collection,
            chunks = chunks.len(),
            duration_ms = start.elapsed().as_millis() as u64,
            "Retrieved chunks"
        );
        Ok(chunks)
    }

    /// Retrieve context for `question` and, when an LLM is configured, answer it.
    pub async fn answer(&self, question: &str, options: QueryOptions) -> Result<QueryAnswer> {
        let chunks = self
            .retrieve(question, options.top_k, options.max_neighbors)
            .await?;

        let answer = match (&self.llm, options.generate) {
            (Some(llm), true) => {
                let prompt = build_prompt(question, &chunks);
                let start = Instant::now();
                let text = llm.generate_with_system(SYSTEM_PROMPT, &prompt).await?;
                info!(
                    model = llm.model_name(),
                    duration_ms = start.elapsed().as_millis() as u64,
                    "Generated answer"
                );
                Some(text)
            }
            _ => None,
        };

        Ok(QueryAnswer { answer, chunks })
    }
}

/// Numbered context passages followed by the question.
pub fn build_prompt(question: &str, chunks: &[RetrievedChunk]) -> String {
    let mut prompt = String::from("Context:\n");
    if chunks.is_empty() {
        prompt.push_str("(no passages found)\n");
    }
    for (i, chunk) in chunks.iter().enumerate() {
        let _ = writeln!(
            prompt,
            "[{}] {} (page {}):\n{}\n",
            i + 1,
            chunk.file,
            chunk.page,
            chunk.text
        );
    }
    let _ = write!(prompt, "\nQuestion: {}", question);
    prompt
}
