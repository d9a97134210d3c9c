//! Vector Store Abstraction Layer
//!
//! One trait over every vector backend, modelled on a collection lifecycle:
//! create, insert in batches, flush, build the index, load, then search.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                      VectorStore Trait                        │
//! ├──────────────────────────────────────────────────────────────┤
//! │ create_collection │ insert │ flush │ build_index │ search ... │
//! └──────────────────────────────────────────────────────────────┘
//!          ▲                    ▲                     ▲
//!    ┌─────┴─────┐       ┌──────┴─────┐        ┌──────┴─────┐
//!    │ In-memory │       │   Local    │        │   Qdrant   │
//!    │ (testing) │       │   (HNSW)   │        │ (feature)  │
//!    └───────────┘       └────────────┘        └────────────┘
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use openrag::db::vectorstore::{DistanceMetric, VectorStoreProvider};
//!
//! let store = VectorStoreProvider::Local { path: "./data/vectors".into() }
//!     .create_store()
//!     .await?;
//!
//! store.create_collection("openrag", 3072, DistanceMetric::L2).await?;
//! store.insert("openrag", &records).await?;
//! store.flush("openrag").await?;
//! let hits = store.search("openrag", &query, 5).await?;
//! ```

use crate::types::{AppError, Result};
use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

// ============================================================================
// Vector Store Provider Configuration
// ============================================================================

/// Configuration for vector store providers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "provider", rename_all = "lowercase")]
pub enum VectorStoreProvider {
    /// In-memory store. Data is lost when the process exits.
    InMemory,

    /// HNSW store from `ares-vector`, persisted under a local directory.
    #[cfg(feature = "ares-vector")]
    Local {
        /// Directory holding `{collection}.json` files.
        path: String,
    },

    /// Qdrant server.
    #[cfg(feature = "qdrant")]
    Qdrant {
        /// Qdrant gRPC URL (e.g., "http://localhost:6334").
        url: String,
        /// Optional API key for authentication.
        api_key: Option<String>,
    },
}

impl VectorStoreProvider {
    /// Create a vector store instance from this provider configuration.
    pub async fn create_store(&self) -> Result<Arc<dyn VectorStore>> {
        match self {
            VectorStoreProvider::InMemory => Ok(Arc::new(InMemoryVectorStore::new())),

            #[cfg(feature = "ares-vector")]
            VectorStoreProvider::Local { path } => {
                Ok(Arc::new(super::local::LocalVectorStore::open(path).await?))
            }

            #[cfg(feature = "qdrant")]
            VectorStoreProvider::Qdrant { url, api_key } => Ok(Arc::new(
                super::qdrant::QdrantVectorStore::new(url.clone(), api_key.clone())?,
            )),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            VectorStoreProvider::InMemory => "in-memory",
            #[cfg(feature = "ares-vector")]
            VectorStoreProvider::Local { .. } => "local",
            #[cfg(feature = "qdrant")]
            VectorStoreProvider::Qdrant { .. } => "qdrant",
        }
    }
}

// ============================================================================
// Records and Metrics
// ============================================================================

/// Distance metric of a collection. Lower distances are closer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DistanceMetric {
    /// Euclidean distance
    #[default]
    L2,
    /// `1 - cosine similarity`
    Cosine,
}

impl DistanceMetric {
    pub fn distance(self, a: &[f32], b: &[f32]) -> f32 {
        match self {
            DistanceMetric::L2 => a
                .iter()
                .zip(b)
                .map(|(x, y)| (x - y) * (x - y))
                .sum::<f32>()
                .sqrt(),
            DistanceMetric::Cosine => {
                let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
                let norm_a = a.iter().map(|x| x * x).sum::<f32>().sqrt();
                let norm_b = b.iter().map(|x| x * x).sum::<f32>().sqrt();
                if norm_a == 0.0 || norm_b == 0.0 {
                    return 1.0;
                }
                1.0 - dot / (norm_a * norm_b)
            }
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            DistanceMetric::L2 => "l2",
            DistanceMetric::Cosine => "cosine",
        }
    }
}

impl std::str::FromStr for DistanceMetric {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "l2" | "euclid" | "euclidean" => Ok(DistanceMetric::L2),
            "cosine" => Ok(DistanceMetric::Cosine),
            other => Err(AppError::Configuration(format!(
                "Unknown distance metric '{}'",
                other
            ))),
        }
    }
}

/// A vector with its integer id and a source reference (`{file}#chunk_{n}`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorRecord {
    pub id: u64,
    pub vector: Vec<f32>,
    pub source: String,
}

/// A search hit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Neighbor {
    pub id: u64,
    pub distance: f32,
    pub source: String,
}

/// Statistics about a vector collection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectionStats {
    pub name: String,
    pub vector_count: usize,
    pub dimensions: usize,
    pub distance_metric: DistanceMetric,
    /// Whether an index was built since the last insert
    pub indexed: bool,
    pub loaded: bool,
}

/// Information about a collection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectionInfo {
    pub name: String,
    pub vector_count: usize,
    pub dimensions: usize,
}

// ============================================================================
// Vector Store Trait
// ============================================================================

/// Abstract trait for vector database operations.
///
/// # Implementors
///
/// - `InMemoryVectorStore` - Exact search, testing
/// - `LocalVectorStore` - HNSW index (`ares-vector`) persisted to disk
/// - `QdrantVectorStore` - Qdrant server
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Get the name of this vector store provider.
    fn provider_name(&self) -> &'static str;

    /// Check that the backend is reachable.
    async fn ping(&self) -> Result<()>;

    /// Create a new collection.
    ///
    /// # Errors
    ///
    /// Returns `AppError::InvalidInput` if the collection already exists.
    async fn create_collection(
        &self,
        name: &str,
        dimensions: usize,
        metric: DistanceMetric,
    ) -> Result<()>;

    /// Delete a collection and all its vectors.
    async fn delete_collection(&self, name: &str) -> Result<()>;

    async fn collection_exists(&self, name: &str) -> Result<bool>;

    async fn list_collections(&self) -> Result<Vec<CollectionInfo>>;

    async fn collection_stats(&self, name: &str) -> Result<CollectionStats>;

    /// Insert records, replacing any with the same id.
    ///
    /// # Errors
    ///
    /// Returns `AppError::InvalidInput` if a vector's length differs from
    /// the collection's dimensions.
    async fn insert(&self, collection: &str, records: &[VectorRecord]) -> Result<usize>;

    /// Persist pending inserts.
    async fn flush(&self, collection: &str) -> Result<()>;

    /// Build the search index.
    async fn build_index(&self, collection: &str) -> Result<()>;

    /// Load the collection for searching.
    async fn load(&self, collection: &str) -> Result<()>;

    /// Nearest neighbours of `vector`, closest first.
    async fn search(&self, collection: &str, vector: &[f32], limit: usize)
        -> Result<Vec<Neighbor>>;

    /// Delete records by id. Returns how many existed.
    async fn delete(&self, collection: &str, ids: &[u64]) -> Result<usize>;

    async fn count(&self, collection: &str) -> Result<usize> {
        let stats = self.collection_stats(collection).await?;
        Ok(stats.vector_count)
    }
}

// ============================================================================
// In-Memory Vector Store
// ============================================================================

struct Collection {
    dimensions: usize,
    metric: DistanceMetric,
    records: BTreeMap<u64, (Vec<f32>, String)>,
    indexed: bool,
    loaded: bool,
}

fn collection_not_found(name: &str) -> AppError {
    AppError::NotFound(format!("Collection '{}' not found", name))
}

/// Vector store with exact (brute force) search.
#[derive(Default, Clone)]
pub struct InMemoryVectorStore {
    collections: Arc<RwLock<HashMap<String, Collection>>>,
}

impl InMemoryVectorStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_collection<T>(&self, name: &str, f: impl FnOnce(&mut Collection) -> T) -> Result<T> {
        let mut collections = self.collections.write();
        let col = collections
            .get_mut(name)
            .ok_or_else(|| collection_not_found(name))?;
        Ok(f(col))
    }
}

#[async_trait]
impl VectorStore for InMemoryVectorStore {
    fn provider_name(&self) -> &'static str {
        "in-memory"
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }

    async fn create_collection(
        &self,
        name: &str,
        dimensions: usize,
        metric: DistanceMetric,
    ) -> Result<()> {
        if dimensions == 0 {
            return Err(AppError::InvalidInput(
                "Collection dimensions must be greater than zero".to_string(),
            ));
        }

        let mut collections = self.collections.write();
        if collections.contains_key(name) {
            return Err(AppError::InvalidInput(format!(
                "Collection '{}' already exists",
                name
            )));
        }
        collections.insert(
            name.to_string(),
            Collection {
                dimensions,
                metric,
                records: BTreeMap::new(),
                indexed: false,
                loaded: false,
            },
        );
        Ok(())
    }

    async fn delete_collection(&self, name: &str) -> Result<()> {
        self.collections
            .write()
            .remove(name)
            .ok_or_else(|| collection_not_found(name))?;
        Ok(())
    }

    async fn collection_exists(&self, name: &str) -> Result<bool> {
        Ok(self.collections.read().contains_key(name))
    }

    async fn list_collections(&self) -> Result<Vec<CollectionInfo>> {
        let mut infos: Vec<CollectionInfo> = self
            .collections
            .read()
            .iter()
            .map(|(name, col)| CollectionInfo {
                name: name.clone(),
                vector_count: col.records.len(),
                dimensions: col.dimensions,
            })
            .collect();
        infos.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(infos)
    }

    async fn collection_stats(&self, name: &str) -> Result<CollectionStats> {
        let collections = self.collections.read();
        let col = collections.get(name).ok_or_else(|| collection_not_found(name))?;
        Ok(CollectionStats {
            name: name.to_string(),
            vector_count: col.records.len(),
            dimensions: col.dimensions,
            distance_metric: col.metric,
            indexed: col.indexed,
            loaded: col.loaded,
        })
    }

    async fn insert(&self, collection: &str, records: &[VectorRecord]) -> Result<usize> {
        let mut collections = self.collections.write();
        let col = collections
            .get_mut(collection)
            .ok_or_else(|| collection_not_found(collection))?;

        if let Some(bad) = records.iter().find(|r| r.vector.len() != col.dimensions) {
            return Err(AppError::InvalidInput(format!(
                "Vector {} has {} dimensions, collection '{}' expects {}",
                bad.id,
                bad.vector.len(),
                collection,
                col.dimensions
            )));
        }

        for record in records {
            col.records
                .insert(record.id, (record.vector.clone(), record.source.clone()));
        }
        col.indexed = false;
        Ok(records.len())
    }

    async fn flush(&self, collection: &str) -> Result<()> {
        self.with_collection(collection, |_| ())
    }

    async fn build_index(&self, collection: &str) -> Result<()> {
        self.with_collection(collection, |col| col.indexed = true)
    }

    async fn load(&self, collection: &str) -> Result<()> {
        self.with_collection(collection, |col| col.loaded = true)
    }

    async fn search(
        &self,
        collection: &str,
        vector: &[f32],
        limit: usize,
    ) -> Result<Vec<Neighbor>> {
        let collections = self.collections.read();
        let col = collections
            .get(collection)
            .ok_or_else(|| collection_not_found(collection))?;

        if vector.len() != col.dimensions {
            return Err(AppError::InvalidInput(format!(
                "Query vector has {} dimensions, collection '{}' expects {}",
                vector.len(),
                collection,
                col.dimensions
            )));
        }

        let mut hits: Vec<Neighbor> = col
            .records
            .iter()
            .map(|(id, (stored, source))| Neighbor {
                id: *id,
                distance: col.metric.distance(vector, stored),
                source: source.clone(),
            })
            .collect();

        hits.sort_by(|a, b| {
            a.distance
                .partial_cmp(&b.distance)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.id.cmp(&b.id))
        });
        hits.truncate(limit);
        Ok(hits)
    }

    async fn delete(&self, collection: &str, ids: &[u64]) -> Result<usize> {
        self.with_collection(collection, |col| {
            ids.iter().filter(|id| col.records.remove(*id).is_some()).count()
        })
    }
}

// ============================================================================
// Tests
// ============================================================================
