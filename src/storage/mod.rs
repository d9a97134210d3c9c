//! Artifact Storage
//!
//! Every pipeline stage reads its input from, and writes its output to, a
//! named container of a blob store:
//!
//! | Container | Blob | Written by |
//! |-----------|------|------------|
//! | `raw-pdfs` | `{file}.pdf` | uploader |
//! | `extracted-dicts` | `{file}.json` | extraction |
//! | `chunked-dicts` | `{file}.json` | chunking |
//! | `vectorized-dicts` | `{file}.json` | vectorization |
//! | `manifests` | `chunk-index.json` | vector indexing |
//!
//! Backends implement [`BlobStore`]; [`ArtifactStore`] layers the typed
//! helpers on top so stages never deal with raw bytes or blob names.

pub mod azure;
pub mod local;
pub mod queue;

use crate::db::indexer::ChunkIndex;
use crate::rag::chunker::ChunkSet;
use crate::rag::embeddings::VectorSet;
use crate::types::{AppError, ExtractedPage, Result};
use async_trait::async_trait;
use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

pub use azure::AzureBlobStore;
pub use local::LocalBlobStore;
pub use queue::{QueueMessage, WorkQueue};

/// Blob name of the chunk id manifest inside [`Container::Manifests`].
pub const CHUNK_INDEX_BLOB: &str = "chunk-index.json";

/// Named blob containers used by the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Container {
    RawPdfs,
    ExtractedDicts,
    ChunkedDicts,
    VectorizedDicts,
    Manifests,
}

impl Container {
    pub const ALL: [Container; 5] = [
        Container::RawPdfs,
        Container::ExtractedDicts,
        Container::ChunkedDicts,
        Container::VectorizedDicts,
        Container::Manifests,
    ];

    /// Container name as it appears in the backing store.
    pub fn name(self) -> &'static str {
        match self {
            Container::RawPdfs => "raw-pdfs",
            Container::ExtractedDicts => "extracted-dicts",
            Container::ChunkedDicts => "chunked-dicts",
            Container::VectorizedDicts => "vectorized-dicts",
            Container::Manifests => "manifests",
        }
    }
}

impl std::fmt::Display for Container {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

// ============================================================================
// Blob Store Trait
// ============================================================================

/// Abstract blob storage.
///
/// # Implementors
///
/// - `LocalBlobStore` - Directory per container on the local filesystem
/// - `AzureBlobStore` - Azure Blob Storage via REST and a SAS token
/// - `InMemoryBlobStore` - Testing only
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Get the name of this storage backend.
    fn backend_name(&self) -> &'static str;

    /// Download a blob.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` if the blob does not exist.
    async fn download(&self, container: Container, name: &str) -> Result<Vec<u8>>;

    /// Upload a blob, overwriting any existing content.
    async fn upload(&self, container: Container, name: &str, data: Vec<u8>) -> Result<()>;

    /// List blob names in a container, sorted.
    async fn list(&self, container: Container) -> Result<Vec<String>>;

    /// Check whether a blob exists.
    async fn exists(&self, container: Container, name: &str) -> Result<bool> {
        match self.download(container, name).await {
            Ok(_) => Ok(true),
            Err(AppError::NotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Delete a blob. Returns `false` if it did not exist.
    async fn delete(&self, container: Container, name: &str) -> Result<bool>;
}

// ============================================================================
// In-Memory Blob Store (for testing)
// ============================================================================

/// In-memory blob store. Data is lost when the process exits.
#[derive(Default, Clone)]
pub struct InMemoryBlobStore {
    blobs: Arc<RwLock<HashMap<(Container, String), Vec<u8>>>>,
}

impl InMemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl BlobStore for InMemoryBlobStore {
    fn backend_name(&self) -> &'static str {
        "in-memory"
    }

    async fn download(&self, container: Container, name: &str) -> Result<Vec<u8>> {
        self.blobs
            .read()
            .get(&(container, name.to_string()))
            .cloned()
            .ok_or_else(|| AppError::NotFound(format!("{}/{}", container, name)))
    }

    async fn upload(&self, container: Container, name: &str, data: Vec<u8>) -> Result<()> {
        self.blobs.write().insert((container, name.to_string()), data);
        Ok(())
    }

    async fn list(&self, container: Container) -> Result<Vec<String>> {
        let mut names: Vec<String> = self
            .blobs
            .read()
            .keys()
            .filter(|(c, _)| *c == container)
            .map(|(_, name)| name.clone())
            .collect();
        names.sort();
        Ok(names)
    }

    async fn exists(&self, container: Container, name: &str) -> Result<bool> {
        Ok(self
            .blobs
            .read()
            .contains_key(&(container, name.to_string())))
    }

    async fn delete(&self, container: Container, name: &str) -> Result<bool> {
        Ok(self
            .blobs
            .write()
            .remove(&(container, name.to_string()))
            .is_some())
    }
}

// ============================================================================
// Typed Artifact Access
// ============================================================================

/// Typed access to the pipeline's artifacts.
#[derive(Clone)]
pub struct ArtifactStore {
    blobs: Arc<dyn BlobStore>,
}

impl ArtifactStore {
    pub fn new(blobs: Arc<dyn BlobStore>) -> Self {
        Self { blobs }
    }

    pub fn blob_store(&self) -> &Arc<dyn BlobStore> {
        &self.blobs
    }

    pub async fn get_raw_pdf(&self, file_name: &str) -> Result<Vec<u8>> {
        self.blobs
            .download(Container::RawPdfs, &format!("{}.pdf", file_name))
            .await
    }

    pub async fn has_raw_pdf(&self, file_name: &str) -> Result<bool> {
        self.blobs
            .exists(Container::RawPdfs, &format!("{}.pdf", file_name))
            .await
    }

    pub async fn put_raw_pdf(&self, file_name: &str, bytes: Vec<u8>) -> Result<()> {
        self.blobs
            .upload(Container::RawPdfs, &format!("{}.pdf", file_name), bytes)
            .await
    }

    /// File names (without extension) of all uploaded PDFs.
    pub async fn list_raw_pdfs(&self) -> Result<Vec<String>> {
        Ok(self
            .blobs
            .list(Container::RawPdfs)
            .await?
            .into_iter()
            .filter_map(|name| name.strip_suffix(".pdf").map(str::to_string))
            .collect())
    }

    pub async fn get_extracted(&self, file_name: &str) -> Result<Vec<ExtractedPage>> {
        self.get_json(Container::ExtractedDicts, file_name).await
    }

    pub async fn put_extracted(&self, file_name: &str, pages: &[ExtractedPage]) -> Result<()> {
        self.put_json(Container::ExtractedDicts, file_name, pages)
            .await
    }

    pub async fn get_chunked(&self, file_name: &str) -> Result<ChunkSet> {
        self.get_json(Container::ChunkedDicts, file_name).await
    }

    pub async fn put_chunked(&self, file_name: &str, chunks: &ChunkSet) -> Result<()> {
        self.put_json(Container::ChunkedDicts, file_name, chunks)
            .await
    }

    pub async fn get_vectorized(&self, file_name: &str) -> Result<VectorSet> {
        self.get_json(Container::VectorizedDicts, file_name).await
    }

    pub async fn put_vectorized(&self, file_name: &str, vectors: &VectorSet) -> Result<()> {
        self.put_json(Container::VectorizedDicts, file_name, vectors)
            .await
    }

    /// Load the chunk id manifest, or an empty one if none was written yet.
    pub async fn get_chunk_index(&self) -> Result<ChunkIndex> {
        match self
            .blobs
            .download(Container::Manifests, CHUNK_INDEX_BLOB)
            .await
        {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(AppError::NotFound(_)) => Ok(ChunkIndex::default()),
            Err(e) => Err(e),
        }
    }

    pub async fn put_chunk_index(&self, index: &ChunkIndex) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(index)?;
        self.blobs
            .upload(Container::Manifests, CHUNK_INDEX_BLOB, bytes)
            .await
    }

    async fn get_json<T: DeserializeOwned>(&self, container: Container, file_name: &str) -> Result<T> {
        let bytes = self
            .blobs
            .download(container, &format!("{}.json", file_name))
            .await?;
        serde_json::from_slice(&bytes).map_err(|e| {
            AppError::Storage(format!(
                "Malformed artifact {}/{}.json: {}",
                container, file_name, e
            ))
        })
    }

    async fn put_json<T: Serialize + ?Sized>(
        &self,
        container: Container,
        file_name: &str,
        value: &T,
    ) -> Result<()> {
        let bytes = serde_json::to_vec(value)?;
        self.blobs
            .upload(container, &format!("{}.json", file_name), bytes)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_inmemory_roundtrip_and_list() {
        let store = InMemoryBlobStore::new();
        store
            .upload(Container::RawPdfs, "b.pdf", b"%PDF-b".to_vec())
            .await
            .unwrap();
        store
            .upload(Container::RawPdfs, "a.pdf", b"%PDF-a".to_vec())
            .await
            .unwrap();
        store
            .upload(Container::ChunkedDicts, "a.json", b"{}".to_vec())
            .await
            .unwrap();

        assert_eq!(
            store.download(Container::RawPdfs, "a.pdf").await.unwrap(),
            b"%PDF-a"
        );
        assert_eq!(
            store.list(Container::RawPdfs).await.unwrap(),
            vec!["a.pdf".to_string(), "b.pdf".to_string()]
        );
    }

    #[tokio::test]
    async fn test_inmemory_missing_blob_is_not_found() {
        let store = InMemoryBlobStore::new();
        let err = store
            .download(Container::ExtractedDicts, "nope.json")
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
        assert!(!store
            .exists(Container::ExtractedDicts, "nope.json")
            .await
            .unwrap());
        assert!(!store
            .delete(Container::ExtractedDicts, "nope.json")
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_artifact_store_extracted_pages() {
        let artifacts = ArtifactStore::new(Arc::new(InMemoryBlobStore::new()));
        let pages = vec![
            ExtractedPage {
                text: "First page.".to_string(),
                page: 1,
            },
            ExtractedPage {
                text: "Second page.".to_string(),
                page: 2,
            },
        ];

        artifacts.put_extracted("report", &pages).await.unwrap();
        assert_eq!(artifacts.get_extracted("report").await.unwrap(), pages);

        let raw = artifacts
            .blob_store()
            .download(Container::ExtractedDicts, "report.json")
            .await
            .unwrap();
        let json: serde_json::Value = serde_json::from_slice(&raw).unwrap();
        assert_eq!(json[1]["page"], 2);
    }

    #[tokio::test]
    async fn test_artifact_store_empty_chunk_index() {
        let artifacts = ArtifactStore::new(Arc::new(InMemoryBlobStore::new()));
        let index = artifacts.get_chunk_index().await.unwrap();
        assert!(index.is_empty());
    }

    #[tokio::test]
    async fn test_list_raw_pdfs_strips_extension() {
        let artifacts = ArtifactStore::new(Arc::new(InMemoryBlobStore::new()));
        artifacts.put_raw_pdf("manual", b"%PDF".to_vec()).await.unwrap();
        assert_eq!(artifacts.list_raw_pdfs().await.unwrap(), vec!["manual"]);
    }

    #[test]
    fn test_container_names() {
        let names: Vec<&str> = Container::ALL.iter().map(|c| c.name()).collect();
        assert_eq!(
            names,
            vec![
                "raw-pdfs",
                "extracted-dicts",
                "chunked-dicts",
                "vectorized-dicts",
                "manifests"
            ]
        );
    }
}
