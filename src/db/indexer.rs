//! Writing document vectors into a collection.
//!
//! Every file owns a contiguous, inclusive range of integer ids. The ranges
//! live in a [`ChunkIndex`] manifest so a search hit can be traced back to
//! `(file, chunk number)`.

use super::vectorstore::{DistanceMetric, VectorRecord, VectorStore};
use crate::rag::chunker::chunk_key;
use crate::storage::ArtifactStore;
use crate::types::{AppError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::ops::RangeInclusive;
use std::time::Instant;
use tracing::{debug, info, warn};

pub const INSERT_BATCH_SIZE: usize = 5000;

/// Log the backend's ping result.
pub async fn check_ping_status(store: &dyn VectorStore) -> bool {
    match store.ping().await {
        Ok(()) => {
            info!(provider = store.provider_name(), "Vector store reachable");
            true
        }
        Err(e) => {
            warn!(provider = store.provider_name(), error = %e, "Vector store unreachable");
            false
        }
    }
}

/// Drop `name` if it exists. Returns whether it existed.
pub async fn check_and_drop_collection(store: &dyn VectorStore, name: &str) -> Result<bool> {
    if store.collection_exists(name).await? {
        store.delete_collection(name).await?;
        info!(collection = name, "Dropped existing collection");
        Ok(true)
    } else {
        debug!(collection = name, "Collection does not exist");
        Ok(false)
    }
}

/// Create `collection` when missing, or check that an existing one has
/// `dimensions` dimensions.
pub async fn prepare_collection(
    store: &dyn VectorStore,
    collection: &str,
    dimensions: usize,
    metric: DistanceMetric,
) -> Result<()> {
    if store.collection_exists(collection).await? {
        let stats = store.collection_stats(collection).await?;
        if stats.dimensions != dimensions {
            return Err(AppError::InvalidInput(format!(
                "Collection '{}' has {} dimensions, vectors have {}",
                collection, stats.dimensions, dimensions
            )));
        }
    } else {
        store
            .create_collection(collection, dimensions, metric)
            .await?;
        info!(collection, dimensions, metric = metric.as_str(), "Created collection");
    }
    Ok(())
}

/// Insert `records` in batches, then flush, build the index and load.
///
/// Creates the collection when missing. An existing collection must have
/// `dimensions` dimensions.
pub async fn store_vectors(
    store: &dyn VectorStore,
    collection: &str,
    dimensions: usize,
    metric: DistanceMetric,
    records: &[VectorRecord],
) -> Result<usize> {
    prepare_collection(store, collection, dimensions, metric).await?;

    let mut inserted = 0;
    for (i, batch) in records.chunks(INSERT_BATCH_SIZE).enumerate() {
        inserted += store.insert(collection, batch).await?;
        debug!(collection, batch = i + 1, size = batch.len(), "Inserted batch");
    }

    let start = Instant::now();
    store.flush(collection).await?;
    info!(collection, duration_ms = start.elapsed().as_millis() as u64, "Flushed collection");

    let start = Instant::now();
    store.build_index(collection).await?;
    info!(collection, duration_ms = start.elapsed().as_millis() as u64, "Built index");

    let start = Instant::now();
    store.load(collection).await?;
    info!(collection, duration_ms = start.elapsed().as_millis() as u64, "Loaded collection");

    Ok(inserted)
}

// ============= Chunk Index =============

/// Inclusive id range owned by one file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdRange {
    pub start: u64,
    pub end: u64,
}

impl IdRange {
    pub fn len(&self) -> u64 {
        self.end - self.start + 1
    }

    pub fn ids(&self) -> RangeInclusive<u64> {
        self.start..=self.end
    }

    pub fn contains(&self, id: u64) -> bool {
        self.ids().contains(&id)
    }
}

/// Manifest mapping file names to their id ranges.
///
/// Serialised as `{"file": {"start": 0, "end": 41}, ...}`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChunkIndex {
    files: BTreeMap<String, IdRange>,
}

impl ChunkIndex {
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn get(&self, file: &str) -> Option<IdRange> {
        self.files.get(file).copied()
    }

    /// Files and ranges, ordered by file name.
    pub fn entries(&self) -> impl Iterator<Item = (&str, IdRange)> {
        self.files.iter().map(|(f, r)| (f.as_str(), *r))
    }

    /// First id after every allocated range.
    pub fn next_id(&self) -> u64 {
        self.files
            .values()
            .map(|r| r.end + 1)
            .max()
            .unwrap_or(0)
    }

    /// Give `file` a fresh range of `count` ids after the current maximum,
    /// replacing any previous range. No range is recorded for zero ids.
    pub fn allocate(&mut self, file: &str, count: usize) -> Option<IdRange> {
        self.files.remove(file);
        if count == 0 {
            return None;
        }
        let start = self.next_id();
        let range = IdRange {
            start,
            end: start + count as u64 - 1,
        };
        self.files.insert(file.to_string(), range);
        Some(range)
    }

    /// The file owning `id` and the 1-based chunk number within it.
    pub fn lookup(&self, id: u64) -> Option<(&str, usize)> {
        self.files
            .iter()
            .find(|(_, range)| range.contains(id))
            .map(|(file, range)| (file.as_str(), (id - range.start) as usize + 1))
    }

    pub fn remove(&mut self, file: &str) -> Option<IdRange> {
        self.files.remove(file)
    }
}

/// Store the vectorized artifact of `file_name` under a fresh id range.
///
/// Vectors from an earlier ingestion of the same file are deleted first,
/// once the collection is known to accept the new ones. The manifest drops
/// the file before its old vectors go, so it never lists a range the store
/// no longer holds. Returns the new range, or `None` for a file without
/// chunks.
pub async fn index_file(
    artifacts: &ArtifactStore,
    store: &dyn VectorStore,
    collection: &str,
    metric: DistanceMetric,
    file_name: &str,
) -> Result<Option<IdRange>> {
    let vectors = artifacts.get_vectorized(file_name).await?;
    let mut index = artifacts.get_chunk_index().await?;

    if !vectors.vectors.is_empty() {
        prepare_collection(store, collection, vectors.dimensions, metric).await?;
    }

    if let Some(old) = index.remove(file_name) {
        artifacts.put_chunk_index(&index).await?;
        if store.collection_exists(collection).await? {
            let ids: Vec<u64> = old.ids().collect();
            let deleted = store.delete(collection, &ids).await?;
            info!(file = file_name, deleted, "Removed previous vectors");
        }
    }

    let range = index.allocate(file_name, vectors.vectors.len());
    if let Some(range) = range {
        let records: Vec<VectorRecord> = range
            .ids()
            .zip(vectors.vectors)
            .enumerate()
            .map(|(i, (id, vector))| VectorRecord {
                id,
                vector,
                source: format!("{}#{}", file_name, chunk_key(i + 1)),
            })
            .collect();

        store_vectors(store, collection, vectors.dimensions, metric, &records).await?;
        info!(
            file = file_name,
            start = range.start,
            end = range.end,
            "Indexed vectors"
        );
    }

    artifacts.put_chunk_index(&index).await?;
    Ok(range)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::vectorstore::InMemoryVectorStore;
    use crate::rag::embeddings::VectorSet;
    use crate::storage::InMemoryBlobStore;
    use std::sync::Arc;

    #[test]
    fn test_allocate_appends_after_max() {
        let mut index = ChunkIndex::default();
        assert_eq!(index.allocate("a", 3), Some(IdRange { start: 0, end: 2 }));
        assert_eq!(index.allocate("b", 2), Some(IdRange { start: 3, end: 4 }));
        assert_eq!(index.allocate("a", 1), Some(IdRange { start: 5, end: 5 }));
        assert_eq!(index.next_id(), 6);
        assert_eq!(index.allocate("c", 0), None);
        assert!(index.get("c").is_none());
    }

    #[test]
    fn test_lookup_is_one_based() {
        let mut index = ChunkIndex::default();
        index.allocate("a", 3);
        index.allocate("b", 2);

        assert_eq!(index.lookup(0), Some(("a", 1)));
        assert_eq!(index.lookup(2), Some(("a", 3)));
        assert_eq!(index.lookup(3), Some(("b", 1)));
        assert_eq!(index.lookup(5), None);
    }

    #[test]
    fn test_chunk_index_json_shape() {
        let mut index = ChunkIndex::default();
        index.allocate("report", 42);
        let json = serde_json::to_value(&index).unwrap();
        assert_eq!(json, serde_json::json!({"report": {"start": 0, "end": 41}}));

        let back: ChunkIndex = serde_json::from_value(json).unwrap();
        assert_eq!(back, index);
    }

    #[tokio::test]
    async fn test_check_and_drop_collection() {
        let store = InMemoryVectorStore::new();
        assert!(!check_and_drop_collection(&store, "c").await.unwrap());
        store
            .create_collection("c", 2, DistanceMetric::L2)
            .await
            .unwrap();
        assert!(check_and_drop_collection(&store, "c").await.unwrap());
        assert!(!store.collection_exists("c").await.unwrap());
        assert!(check_ping_status(&store).await);
    }

    #[tokio::test]
    async fn test_store_vectors_batches_and_loads() {
        let store = InMemoryVectorStore::new();
        let records: Vec<VectorRecord> = (0..(INSERT_BATCH_SIZE as u64 + 7))
            .map(|id| VectorRecord {
                id,
                vector: vec![id as f32, 0.0],
                source: format!("f#chunk_{}", id + 1),
            })
            .collect();

        let inserted = store_vectors(&store, "c", 2, DistanceMetric::L2, &records)
            .await
            .unwrap();
        assert_eq!(inserted, INSERT_BATCH_SIZE + 7);

        let stats = store.collection_stats("c").await.unwrap();
        assert_eq!(stats.vector_count, INSERT_BATCH_SIZE + 7);
        assert!(stats.indexed && stats.loaded);
    }

    #[tokio::test]
    async fn test_store_vectors_rejects_dimension_change() {
        let store = InMemoryVectorStore::new();
        store
            .create_collection("c", 3, DistanceMetric::L2)
            .await
            .unwrap();
        let err = store_vectors(&store, "c", 2, DistanceMetric::L2, &[])
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn test_index_file_reingest_replaces_ids() {
        let artifacts = ArtifactStore::new(Arc::new(InMemoryBlobStore::new()));
        let store = InMemoryVectorStore::new();

        let set = |n: usize, offset: f32| VectorSet {
            vectorizer: "tfidf".into(),
            dimensions: 2,
            vectors: (0..n).map(|i| vec![i as f32 + offset, 1.0]).collect(),
        };

        artifacts.put_vectorized("a", &set(3, 0.0)).await.unwrap();
        artifacts.put_vectorized("b", &set(2, 10.0)).await.unwrap();

        let a = index_file(&artifacts, &store, "c", DistanceMetric::L2, "a")
            .await
            .unwrap();
        let b = index_file(&artifacts, &store, "c", DistanceMetric::L2, "b")
            .await
            .unwrap();
        assert_eq!(a, Some(IdRange { start: 0, end: 2 }));
        assert_eq!(b, Some(IdRange { start: 3, end: 4 }));

        let again = index_file(&artifacts, &store, "c", DistanceMetric::L2, "a")
            .await
            .unwrap();
        assert_eq!(again, Some(IdRange { start: 5, end: 7 }));
        assert_eq!(store.count("c").await.unwrap(), 5);

        let hits = store.search("c", &[0.0, 1.0], 1).await.unwrap();
        assert_eq!(hits[0].id, 5);
        assert_eq!(hits[0].source, "a#chunk_1");

        let index = artifacts.get_chunk_index().await.unwrap();
        assert_eq!(index.lookup(6), Some(("a", 2)));
        assert_eq!(index.lookup(1), None);
    }

    #[tokio::test]
    async fn test_index_file_dimension_change_keeps_previous_vectors() {
        let artifacts = ArtifactStore::new(Arc::new(InMemoryBlobStore::new()));
        let store = InMemoryVectorStore::new();

        let two_dims = VectorSet {
            vectorizer: "tfidf".into(),
            dimensions: 2,
            vectors: vec![vec![1.0, 0.0], vec![0.0, 1.0], vec![1.0, 1.0]],
        };
        artifacts.put_vectorized("a", &two_dims).await.unwrap();
        index_file(&artifacts, &store, "c", DistanceMetric::L2, "a")
            .await
            .unwrap();

        // The vectorizer now produces three dimensions
        let three_dims = VectorSet {
            vectorizer: "tfidf".into(),
            dimensions: 3,
            vectors: vec![vec![1.0, 0.0, 0.0]],
        };
        artifacts.put_vectorized("a", &three_dims).await.unwrap();
        let err = index_file(&artifacts, &store, "c", DistanceMetric::L2, "a")
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::InvalidInput(_)));

        assert_eq!(store.count("c").await.unwrap(), 3);
        let index = artifacts.get_chunk_index().await.unwrap();
        assert_eq!(index.get("a"), Some(IdRange { start: 0, end: 2 }));
        let hits = store.search("c", &[0.0, 1.0], 1).await.unwrap();
        assert_eq!(index.lookup(hits[0].id), Some(("a", 2)));
    }

    #[tokio::test]
    async fn test_index_file_failed_insert_unlists_file() {
        let artifacts = ArtifactStore::new(Arc::new(InMemoryBlobStore::new()));
        let store = InMemoryVectorStore::new();

        let set = VectorSet {
            vectorizer: "tfidf".into(),
            dimensions: 2,
            vectors: vec![vec![1.0, 0.0], vec![0.0, 1.0]],
        };
        artifacts.put_vectorized("a", &set).await.unwrap();
        index_file(&artifacts, &store, "c", DistanceMetric::L2, "a")
            .await
            .unwrap();

        // Matching collection size, but one vector is short
        let broken = VectorSet {
            vectorizer: "tfidf".into(),
            dimensions: 2,
            vectors: vec![vec![1.0, 0.0], vec![0.5]],
        };
        artifacts.put_vectorized("a", &broken).await.unwrap();
        assert!(index_file(&artifacts, &store, "c", DistanceMetric::L2, "a")
            .await
            .is_err());

        // Old vectors are gone, and the manifest no longer claims them
        assert_eq!(store.count("c").await.unwrap(), 0);
        let index = artifacts.get_chunk_index().await.unwrap();
        assert!(index.get("a").is_none());
    }
}
