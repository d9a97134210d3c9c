//! Ingestion pipeline.
//!
//! A file moves through four stages: extract, chunk, vectorize and store.
//! Each stage reads the previous stage's artifact from the blob store and
//! writes its own, so stages can run in one call ([`Pipeline::ingest`]) or
//! one at a time from a [`WorkQueue`].

use crate::db::indexer::{check_and_drop_collection, index_file, ChunkIndex, IdRange};
use crate::db::vectorstore::{DistanceMetric, VectorStore};
use crate::rag::cache::EmbeddingCache;
use crate::rag::chunker::{chunk_and_save, ChunkSet, TokenCounter};
use crate::rag::embeddings::{vectorize_and_store, VectorSet, Vectorizer};
use crate::rag::extractor::extract_and_preprocess_pdf;
use crate::storage::{ArtifactStore, QueueMessage, WorkQueue};
use crate::types::{AppError, ExtractedPage, IngestReport, Result, Stage};
use crate::utils::toml_config::{ChunkingConfig, OpenRagConfig};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

/// Settings shared by every stage.
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub chunking: ChunkingConfig,
    /// Vectors are padded to this size
    pub dimensions: usize,
    pub collection: String,
    pub metric: DistanceMetric,
    pub batch_size: usize,
    pub visibility_timeout: Duration,
    pub max_dequeue_count: u32,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        OpenRagConfig::default().into()
    }
}

impl From<OpenRagConfig> for PipelineSettings {
    fn from(config: OpenRagConfig) -> Self {
        Self::from(&config)
    }
}

impl From<&OpenRagConfig> for PipelineSettings {
    fn from(config: &OpenRagConfig) -> Self {
        Self {
            chunking: config.chunking.clone(),
            dimensions: config.vectorizer.dimensions,
            collection: config.vector_store.collection.clone(),
            metric: config.vector_store.distance_metric().unwrap_or_default(),
            batch_size: config.queue.batch_size,
            visibility_timeout: config.queue.visibility_timeout(),
            max_dequeue_count: config.queue.max_dequeue_count,
        }
    }
}

/// A queued unit of work: run `stage` for `file_name`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineJob {
    pub file_name: String,
    pub stage: Stage,
}

impl PipelineJob {
    pub fn new(file_name: impl Into<String>, stage: Stage) -> Self {
        Self {
            file_name: file_name.into(),
            stage,
        }
    }

    /// The job for the following stage, if any.
    pub fn next(&self) -> Option<PipelineJob> {
        self.stage
            .next()
            .map(|stage| PipelineJob::new(self.file_name.clone(), stage))
    }
}

/// Counts from one pass over the queue.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchOutcome {
    pub received: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub poisoned: usize,
}

enum MessageResult {
    Succeeded,
    Failed,
    Poisoned,
}

pub struct Pipeline {
    artifacts: ArtifactStore,
    vectorizer: Arc<dyn Vectorizer>,
    store: Arc<dyn VectorStore>,
    counter: TokenCounter,
    settings: PipelineSettings,
    cache: Option<Arc<EmbeddingCache>>,
    /// Serialises manifest read-modify-write in the store stage
    store_lock: Mutex<()>,
}

impl Pipeline {
    pub fn new(
        artifacts: ArtifactStore,
        vectorizer: Arc<dyn Vectorizer>,
        store: Arc<dyn VectorStore>,
        settings: PipelineSettings,
    ) -> Result<Self> {
        let counter = TokenCounter::new(&settings.chunking.encoding)?;
        Ok(Self {
            artifacts,
            vectorizer,
            store,
            counter,
            settings,
            cache: None,
            store_lock: Mutex::new(()),
        })
    }

    pub fn with_cache(mut self, cache: Arc<EmbeddingCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn artifacts(&self) -> &ArtifactStore {
        &self.artifacts
    }

    pub fn vector_store(&self) -> &Arc<dyn VectorStore> {
        &self.store
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    // ============= Single stages =============

    pub async fn extract(&self, file_name: &str) -> Result<Vec<ExtractedPage>> {
        extract_and_preprocess_pdf(&self.artifacts, file_name).await
    }

    pub async fn chunk(&self, file_name: &str) -> Result<ChunkSet> {
        chunk_and_save(
            &self.artifacts,
            file_name,
            &self.settings.chunking,
            &self.counter,
        )
        .await
    }

    pub async fn vectorize(&self, file_name: &str) -> Result<VectorSet> {
        vectorize_and_store(
            &self.artifacts,
            file_name,
            self.vectorizer.as_ref(),
            self.settings.dimensions,
            self.cache.as_deref(),
        )
        .await
    }

    pub async fn store(&self, file_name: &str) -> Result<Option<IdRange>> {
        let _guard = self.store_lock.lock().await;
        index_file(
            &self.artifacts,
            self.store.as_ref(),
            &self.settings.collection,
            self.settings.metric,
            file_name,
        )
        .await
    }

    /// Drop the collection and forget every id range.
    pub async fn reset_collection(&self) -> Result<bool> {
        let _guard = self.store_lock.lock().await;
        let dropped =
            check_and_drop_collection(self.store.as_ref(), &self.settings.collection).await?;
        self.artifacts.put_chunk_index(&ChunkIndex::default()).await?;
        Ok(dropped)
    }

    pub async fn run_stage(&self, file_name: &str, stage: Stage) -> Result<()> {
        match stage {
            Stage::Extract => self.extract(file_name).await.map(drop),
            Stage::Chunk => self.chunk(file_name).await.map(drop),
            Stage::Vectorize => self.vectorize(file_name).await.map(drop),
            Stage::Store => self.store(file_name).await.map(drop),
        }
    }

    /// Run all four stages for one file.
    ///
    /// With `recreate`, the collection is dropped and the chunk index reset
    /// before anything is stored. A missing PDF fails before the reset.
    pub async fn ingest(&self, file_name: &str, recreate: bool) -> Result<IngestReport> {
        if file_name.trim().is_empty() {
            return Err(AppError::InvalidInput("File name is empty".to_string()));
        }

        let start = Instant::now();
        if recreate {
            if !self.artifacts.has_raw_pdf(file_name).await? {
                return Err(AppError::NotFound(format!(
                    "raw-pdfs/{}.pdf not found",
                    file_name
                )));
            }
            self.reset_collection().await?;
        }

        let pages = self.extract(file_name).await?;
        let chunks = self.chunk(file_name).await?;
        self.vectorize(file_name).await?;
        let range = self.store(file_name).await?;

        let report = IngestReport {
            file: file_name.to_string(),
            pages: pages.len(),
            chunks: chunks.len(),
            id_range: range.map(|r| (r.start, r.end)),
            duration_ms: start.elapsed().as_millis() as u64,
        };
        info!(
            file = file_name,
            pages = report.pages,
            chunks = report.chunks,
            duration_ms = report.duration_ms,
            "Ingested document"
        );
        Ok(report)
    }

    // ============= Queue mode =============

    /// Queue the first stage for `file_name`. Returns the message id.
    pub fn enqueue(&self, queue: &WorkQueue, file_name: &str) -> Result<String> {
        send_job(queue, &PipelineJob::new(file_name, Stage::Extract))
    }

    /// Receive up to `batch_size` messages and run their stages concurrently.
    ///
    /// A successful stage queues the next one and deletes its message. A
    /// failed stage leaves the message to reappear after the visibility
    /// timeout. Messages received more than `max_dequeue_count` times, or
    /// that do not parse, are deleted as poison.
    pub async fn process_next_batch(&self, queue: &WorkQueue) -> BatchOutcome {
        let messages =
            queue.receive_messages(self.settings.batch_size, self.settings.visibility_timeout);
        let mut outcome = BatchOutcome {
            received: messages.len(),
            ..Default::default()
        };
        if messages.is_empty() {
            return outcome;
        }
        debug!(queue = queue.name(), received = messages.len(), "Received messages");

        let results = join_all(messages.iter().map(|m| self.process_message(queue, m))).await;
        for result in results {
            match result {
                MessageResult::Succeeded => outcome.succeeded += 1,
                MessageResult::Failed => outcome.failed += 1,
                MessageResult::Poisoned => outcome.poisoned += 1,
            }
        }
        outcome
    }

    async fn process_message(&self, queue: &WorkQueue, message: &QueueMessage) -> MessageResult {
        let job: PipelineJob = match serde_json::from_str(&message.content) {
            Ok(job) => job,
            Err(e) => {
                error!(id = %message.id, error = %e, "Dropping malformed queue message");
                discard(queue, message);
                return MessageResult::Poisoned;
            }
        };

        if message.dequeue_count > self.settings.max_dequeue_count {
            error!(
                id = %message.id,
                file = %job.file_name,
                stage = %job.stage,
                dequeue_count = message.dequeue_count,
                "Dropping poison message"
            );
            discard(queue, message);
            return MessageResult::Poisoned;
        }

        match self.run_stage(&job.file_name, job.stage).await {
            Ok(()) => {
                if let Some(next) = job.next() {
                    if let Err(e) = send_job(queue, &next) {
                        error!(file = %job.file_name, error = %e, "Failed to queue next stage");
                        return MessageResult::Failed;
                    }
                }
                if let Err(e) = queue.delete_message(&message.id, &message.pop_receipt) {
                    warn!(id = %message.id, error = %e, "Failed to delete processed message");
                }
                info!(file = %job.file_name, stage = %job.stage, "Stage complete");
                MessageResult::Succeeded
            }
            Err(e) => {
                warn!(
                    file = %job.file_name,
                    stage = %job.stage,
                    dequeue_count = message.dequeue_count,
                    error = %e,
                    "Stage failed; message will be retried"
                );
                MessageResult::Failed
            }
        }
    }

    /// Poll `queue` until `shutdown` resolves. Sleeps `poll_interval` after
    /// an empty poll.
    pub async fn run_worker<F>(&self, queue: &WorkQueue, poll_interval: Duration, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        info!(queue = queue.name(), "Worker started");

        loop {
            let outcome = tokio::select! {
                biased;
                _ = &mut shutdown => break,
                outcome = self.process_next_batch(queue) => outcome,
            };

            if outcome.received > 0 {
                info!(
                    succeeded = outcome.succeeded,
                    failed = outcome.failed,
                    poisoned = outcome.poisoned,
                    "Processed batch"
                );
                continue;
            }

            tokio::select! {
                biased;
                _ = &mut shutdown => break,
                _ = tokio::time::sleep(poll_interval) => {}
            }
        }

        info!(queue = queue.name(), "Worker stopped");
    }

    /// Process batches until the queue holds no messages at all.
    ///
    /// Failed messages are retried once their visibility timeout expires, so
    /// this only returns after each has succeeded or been dropped as poison.
    pub async fn drain(&self, queue: &WorkQueue, poll_interval: Duration) -> BatchOutcome {
        let mut total = BatchOutcome::default();
        while queue.approximate_len() > 0 {
            let outcome = self.process_next_batch(queue).await;
            total.received += outcome.received;
            total.succeeded += outcome.succeeded;
            total.failed += outcome.failed;
            total.poisoned += outcome.poisoned;
            if outcome.received == 0 {
                tokio::time::sleep(poll_interval).await;
            }
        }
        total
    }
}

fn send_job(queue: &WorkQueue, job: &PipelineJob) -> Result<String> {
    let content = serde_json::to_string(job)?;
    let id = queue.send_message(content);
    debug!(queue = queue.name(), file = %job.file_name, stage = %job.stage, id = %id, "Queued job");
    Ok(id)
}

fn discard(queue: &WorkQueue, message: &QueueMessage) {
    if let Err(e) = queue.delete_message(&message.id, &message.pop_receipt) {
        warn!(id = %message.id, error = %e, "Failed to delete poison message");
    }
}
