//! HNSW vector store on local disk, backed by `ares-vector`.
//!
//! ```text
//! {dir}/collections.json          collection names (ares-vector)
//! {dir}/{collection}/metadata.json dimensions, metric, HNSW params (ares-vector)
//! {dir}/{collection}/records.json  ids, vectors and sources
//! ```
//!
//! `ares-vector` keeps the graph in memory and persists only collection
//! metadata, so the records file is written on `flush` and replayed into the
//! index when the store is opened.

use super::vectorstore::{
    CollectionInfo, CollectionStats, DistanceMetric, Neighbor, VectorRecord, VectorStore,
};
use crate::types::{AppError, Result};
use ares_vector::{Config, VectorDb, VectorMetadata};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

const RECORDS_FILE: &str = "records.json";

/// Persistent HNSW vector store.
///
/// Inserts only reach disk on `flush`. `build_index` compacts the graph,
/// dropping deleted and replaced points.
pub struct LocalVectorStore {
    dir: PathBuf,
    db: VectorDb,
}

/// One line of `records.json`.
#[derive(Debug, Serialize, Deserialize)]
struct StoredRecord {
    id: u64,
    vector: Vec<f32>,
    source: String,
}

fn db_error(action: &str, e: ares_vector::Error) -> AppError {
    match e {
        ares_vector::Error::CollectionNotFound(name) => {
            AppError::NotFound(format!("Collection '{}' not found", name))
        }
        ares_vector::Error::CollectionExists(name) => {
            AppError::InvalidInput(format!("Collection '{}' already exists", name))
        }
        ares_vector::Error::DimensionMismatch { expected, actual } => AppError::InvalidInput(
            format!("Vector has {} dimensions, collection expects {}", actual, expected),
        ),
        ares_vector::Error::InvalidVector(msg) => AppError::InvalidInput(msg),
        other => AppError::VectorStore(format!("{} failed: {}", action, other)),
    }
}

fn to_metric(metric: DistanceMetric) -> ares_vector::DistanceMetric {
    match metric {
        DistanceMetric::L2 => ares_vector::DistanceMetric::Euclidean,
        DistanceMetric::Cosine => ares_vector::DistanceMetric::Cosine,
    }
}

fn from_metric(metric: ares_vector::DistanceMetric) -> DistanceMetric {
    match metric {
        ares_vector::DistanceMetric::Cosine => DistanceMetric::Cosine,
        _ => DistanceMetric::L2,
    }
}

fn source_metadata(source: &str) -> VectorMetadata {
    VectorMetadata::from_pairs([("source", source)])
}

fn source_of(metadata: Option<&VectorMetadata>) -> String {
    metadata
        .and_then(|m| m.get_string("source"))
        .unwrap_or_default()
        .to_string()
}

impl LocalVectorStore {
    /// Open the store under `dir`, replaying every persisted collection.
    pub async fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        tokio::fs::create_dir_all(&dir).await?;

        let db = VectorDb::open(Config::persistent(dir.clone()))
            .await
            .map_err(|e| db_error("open", e))?;
        let store = Self { dir, db };

        let names = store.db.list_collections();
        let mut vectors = 0;
        for name in &names {
            vectors += store.replay(name).await?;
        }

        info!(
            path = %store.dir.display(),
            collections = names.len(),
            vectors,
            "Opened local vector store"
        );
        Ok(store)
    }

    fn collection_dir(&self, name: &str) -> Result<PathBuf> {
        let valid = !name.is_empty()
            && name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
        if !valid {
            return Err(AppError::InvalidInput(format!(
                "Invalid collection name: '{}'",
                name
            )));
        }
        Ok(self.dir.join(name))
    }

    /// Load `records.json` of one collection into the index.
    async fn replay(&self, name: &str) -> Result<usize> {
        let path = self.collection_dir(name)?.join(RECORDS_FILE);
        if !tokio::fs::try_exists(&path).await? {
            return Ok(0);
        }

        let bytes = tokio::fs::read(&path).await?;
        let records: Vec<StoredRecord> = serde_json::from_slice(&bytes).map_err(|e| {
            AppError::VectorStore(format!("Corrupt records file {}: {}", path.display(), e))
        })?;

        let count = self.insert_points(name, &records).await?;
        self.db
            .compact(name)
            .await
            .map_err(|e| db_error("compact", e))?;
        debug!(collection = name, vectors = count, "Replayed collection");
        Ok(count)
    }

    async fn insert_points(&self, collection: &str, records: &[StoredRecord]) -> Result<usize> {
        let ids: Vec<String> = records.iter().map(|r| r.id.to_string()).collect();
        let batch: Vec<(&str, &[f32], Option<VectorMetadata>)> = records
            .iter()
            .zip(&ids)
            .map(|(r, id)| (id.as_str(), r.vector.as_slice(), Some(source_metadata(&r.source))))
            .collect();

        self.db
            .insert_batch(collection, batch)
            .await
            .map_err(|e| db_error("insert", e))
    }
}

#[async_trait]
impl VectorStore for LocalVectorStore {
    fn provider_name(&self) -> &'static str {
        "local"
    }

    async fn ping(&self) -> Result<()> {
        if tokio::fs::try_exists(&self.dir).await? {
            Ok(())
        } else {
            Err(AppError::VectorStore(format!(
                "Vector store directory {} is missing",
                self.dir.display()
            )))
        }
    }

    async fn create_collection(
        &self,
        name: &str,
        dimensions: usize,
        metric: DistanceMetric,
    ) -> Result<()> {
        self.collection_dir(name)?;
        self.db
            .create_collection(name, dimensions, to_metric(metric))
            .await
            .map_err(|e| db_error("create collection", e))
    }

    async fn delete_collection(&self, name: &str) -> Result<()> {
        self.collection_dir(name)?;
        // Removes the collection directory, records file included
        self.db
            .delete_collection(name)
            .await
            .map_err(|e| db_error("delete collection", e))
    }

    async fn collection_exists(&self, name: &str) -> Result<bool> {
        Ok(self.db.collection_exists(name))
    }

    async fn list_collections(&self) -> Result<Vec<CollectionInfo>> {
        let mut infos: Vec<CollectionInfo> = self
            .db
            .list_collections()
            .into_iter()
            .filter_map(|name| {
                let stats = self.db.collection_stats(&name).ok()?;
                Some(CollectionInfo {
                    name,
                    vector_count: stats.vector_count,
                    dimensions: stats.dimensions,
                })
            })
            .collect();
        infos.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(infos)
    }

    async fn collection_stats(&self, name: &str) -> Result<CollectionStats> {
        let stats = self
            .db
            .collection_stats(name)
            .map_err(|e| db_error("collection stats", e))?;

        Ok(CollectionStats {
            name: stats.name,
            vector_count: stats.vector_count,
            dimensions: stats.dimensions,
            distance_metric: from_metric(stats.metric),
            indexed: true,
            loaded: true,
        })
    }

    async fn insert(&self, collection: &str, records: &[VectorRecord]) -> Result<usize> {
        let col = self
            .db
            .get_collection(collection)
            .map_err(|e| db_error("insert", e))?;

        // Checked up front so a bad record leaves the collection untouched
        if let Some(bad) = records.iter().find(|r| r.vector.len() != col.dimensions()) {
            return Err(AppError::InvalidInput(format!(
                "Vector {} has {} dimensions, collection '{}' expects {}",
                bad.id,
                bad.vector.len(),
                collection,
                col.dimensions()
            )));
        }
        if let Some(bad) = records
            .iter()
            .find(|r| r.vector.iter().any(|v| !v.is_finite()))
        {
            return Err(AppError::InvalidInput(format!(
                "Vector {} contains NaN or infinite values",
                bad.id
            )));
        }
        if records.is_empty() {
            return Ok(0);
        }

        let stored: Vec<StoredRecord> = records
            .iter()
            .map(|r| StoredRecord {
                id: r.id,
                vector: r.vector.clone(),
                source: r.source.clone(),
            })
            .collect();
        self.insert_points(collection, &stored).await
    }

    async fn flush(&self, collection: &str) -> Result<()> {
        let dir = self.collection_dir(collection)?;
        let col = self
            .db
            .get_collection(collection)
            .map_err(|e| db_error("flush", e))?;

        self.db.persist().await.map_err(|e| db_error("persist", e))?;

        let mut records: Vec<StoredRecord> = col
            .export_all()
            .into_iter()
            .filter_map(|(id, vector, metadata)| {
                Some(StoredRecord {
                    id: id.parse().ok()?,
                    vector,
                    source: source_of(metadata.as_ref()),
                })
            })
            .collect();
        records.sort_by_key(|r| r.id);
        let bytes = serde_json::to_vec(&records)?;

        tokio::fs::create_dir_all(&dir).await?;
        let path = dir.join(RECORDS_FILE);
        let tmp = path.with_extension("json.partial");
        tokio::fs::write(&tmp, &bytes).await?;
        tokio::fs::rename(&tmp, &path).await?;

        debug!(collection, vectors = records.len(), "Flushed collection to disk");
        Ok(())
    }

    async fn build_index(&self, collection: &str) -> Result<()> {
        self.db
            .compact(collection)
            .await
            .map_err(|e| db_error("build index", e))
    }

    async fn load(&self, collection: &str) -> Result<()> {
        self.db
            .get_collection(collection)
            .map(|_| ())
            .map_err(|e| db_error("load", e))
    }

    async fn search(
        &self,
        collection: &str,
        vector: &[f32],
        limit: usize,
    ) -> Result<Vec<Neighbor>> {
        let col = self
            .db
            .get_collection(collection)
            .map_err(|e| db_error("search", e))?;

        if vector.len() != col.dimensions() {
            return Err(AppError::InvalidInput(format!(
                "Query vector has {} dimensions, collection '{}' expects {}",
                vector.len(),
                collection,
                col.dimensions()
            )));
        }
        if limit == 0 || col.is_empty() {
            return Ok(Vec::new());
        }

        let metric = from_metric(col.metric());
        let hits = self
            .db
            .search(collection, vector, limit)
            .await
            .map_err(|e| db_error("search", e))?;

        // Distances are recomputed from the stored vectors so both backends
        // report the same values; a replaced point can appear twice in the graph
        let mut seen = HashSet::new();
        let mut neighbors: Vec<Neighbor> = hits
            .into_iter()
            .filter(|hit| seen.insert(hit.id.clone()))
            .filter_map(|hit| {
                let id = hit.id.parse::<u64>().ok()?;
                let (stored, metadata) = col.get(&hit.id)?;
                Some(Neighbor {
                    id,
                    distance: metric.distance(vector, &stored),
                    source: source_of(metadata.as_ref()),
                })
            })
            .collect();

        neighbors.sort_by(|a, b| {
            a.distance
                .partial_cmp(&b.distance)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.id.cmp(&b.id))
        });
        Ok(neighbors)
    }

    async fn delete(&self, collection: &str, ids: &[u64]) -> Result<usize> {
        let keys: Vec<String> = ids.iter().map(u64::to_string).collect();
        let refs: Vec<&str> = keys.iter().map(String::as_str).collect();
        let deleted = self
            .db
            .delete_batch(collection, &refs)
            .await
            .map_err(|e| db_error("delete", e))?;
        if deleted > 0 {
            self.flush(collection).await?;
        }
        Ok(deleted)
    }
}
