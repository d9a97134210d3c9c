use crate::types::{AppError, Result};
use async_trait::async_trait;
use qdrant_client::{
    qdrant::{
        point_id::PointIdOptions, vectors_config::Config, CollectionInfo as QdrantCollectionInfo,
        CreateCollectionBuilder, DeletePointsBuilder, Distance, PointId, PointStruct,
        SearchPointsBuilder, UpsertPointsBuilder, VectorParamsBuilder,
    },
    Qdrant,
};
use std::collections::HashMap;

use super::vectorstore::{
    CollectionInfo, CollectionStats, DistanceMetric, Neighbor, VectorRecord, VectorStore,
};

/// Qdrant vector store implementation.
///
/// Qdrant indexes and persists on write, so `flush`, `build_index` and
/// `load` only check that the collection exists.
pub struct QdrantVectorStore {
    client: Qdrant,
}

fn qdrant_error(action: &str, e: impl std::fmt::Display) -> AppError {
    AppError::VectorStore(format!("Qdrant {} failed: {}", action, e))
}

fn to_distance(metric: DistanceMetric) -> Distance {
    match metric {
        DistanceMetric::L2 => Distance::Euclid,
        DistanceMetric::Cosine => Distance::Cosine,
    }
}

fn from_distance(distance: i32) -> DistanceMetric {
    if distance == Distance::Cosine as i32 {
        DistanceMetric::Cosine
    } else {
        DistanceMetric::L2
    }
}

/// Vector size and metric from a collection's config.
fn vector_params(info: &QdrantCollectionInfo) -> (usize, DistanceMetric) {
    info.config
        .as_ref()
        .and_then(|c| c.params.as_ref())
        .and_then(|p| p.vectors_config.as_ref())
        .and_then(|v| match &v.config {
            Some(Config::Params(p)) => Some((p.size as usize, from_distance(p.distance))),
            _ => None,
        })
        .unwrap_or((0, DistanceMetric::L2))
}

impl QdrantVectorStore {
    pub fn new(url: String, api_key: Option<String>) -> Result<Self> {
        let mut builder = Qdrant::from_url(&url);
        if let Some(key) = api_key {
            builder = builder.api_key(key);
        }
        let client = builder
            .build()
            .map_err(|e| qdrant_error("client creation", e))?;

        Ok(Self { client })
    }

    async fn info(&self, name: &str) -> Result<QdrantCollectionInfo> {
        if !self.collection_exists(name).await? {
            return Err(AppError::NotFound(format!("Collection '{}' not found", name)));
        }
        self.client
            .collection_info(name)
            .await
            .map_err(|e| qdrant_error("collection info", e))?
            .result
            .ok_or_else(|| AppError::NotFound(format!("Collection '{}' not found", name)))
    }
}

// ============================================================================
// VectorStore Trait Implementation
// ============================================================================

#[async_trait]
impl VectorStore for QdrantVectorStore {
    fn provider_name(&self) -> &'static str {
        "qdrant"
    }

    async fn ping(&self) -> Result<()> {
        self.client
            .health_check()
            .await
            .map_err(|e| qdrant_error("health check", e))?;
        Ok(())
    }

    async fn create_collection(
        &self,
        name: &str,
        dimensions: usize,
        metric: DistanceMetric,
    ) -> Result<()> {
        if self.collection_exists(name).await? {
            return Err(AppError::InvalidInput(format!(
                "Collection '{}' already exists",
                name
            )));
        }

        self.client
            .create_collection(CreateCollectionBuilder::new(name).vectors_config(
                VectorParamsBuilder::new(dimensions as u64, to_distance(metric)),
            ))
            .await
            .map_err(|e| qdrant_error("create collection", e))?;
        Ok(())
    }

    async fn delete_collection(&self, name: &str) -> Result<()> {
        self.client
            .delete_collection(name)
            .await
            .map_err(|e| qdrant_error("delete collection", e))?;
        Ok(())
    }

    async fn collection_exists(&self, name: &str) -> Result<bool> {
        let collections = self
            .client
            .list_collections()
            .await
            .map_err(|e| qdrant_error("list collections", e))?;

        Ok(collections.collections.iter().any(|c| c.name == name))
    }

    async fn list_collections(&self) -> Result<Vec<CollectionInfo>> {
        let collections = self
            .client
            .list_collections()
            .await
            .map_err(|e| qdrant_error("list collections", e))?;

        let mut result = Vec::new();
        for col in collections.collections {
            let info = self.info(&col.name).await?;
            let (dimensions, _) = vector_params(&info);
            result.push(CollectionInfo {
                name: col.name,
                vector_count: info.points_count.unwrap_or(0) as usize,
                dimensions,
            });
        }
        result.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(result)
    }

    async fn collection_stats(&self, name: &str) -> Result<CollectionStats> {
        let info = self.info(name).await?;
        let (dimensions, distance_metric) = vector_params(&info);

        Ok(CollectionStats {
            name: name.to_string(),
            vector_count: info.points_count.unwrap_or(0) as usize,
            dimensions,
            distance_metric,
            indexed: true,
            loaded: true,
        })
    }

    async fn insert(&self, collection: &str, records: &[VectorRecord]) -> Result<usize> {
        if records.is_empty() {
            return Ok(0);
        }

        let points: Vec<PointStruct> = records
            .iter()
            .map(|record| {
                let mut payload: HashMap<String, qdrant_client::qdrant::Value> = HashMap::new();
                payload.insert("source".to_string(), record.source.clone().into());
                PointStruct::new(record.id, record.vector.clone(), payload)
            })
            .collect();

        let count = points.len();
        self.client
            .upsert_points(UpsertPointsBuilder::new(collection, points).wait(true))
            .await
            .map_err(|e| qdrant_error("upsert", e))?;

        Ok(count)
    }

    async fn flush(&self, collection: &str) -> Result<()> {
        self.info(collection).await.map(|_| ())
    }

    async fn build_index(&self, collection: &str) -> Result<()> {
        self.info(collection).await.map(|_| ())
    }

    async fn load(&self, collection: &str) -> Result<()> {
        self.info(collection).await.map(|_| ())
    }

    async fn search(
        &self,
        collection: &str,
        vector: &[f32],
        limit: usize,
    ) -> Result<Vec<Neighbor>> {
        let info = self.info(collection).await?;
        let (_, metric) = vector_params(&info);

        let response = self
            .client
            .search_points(
                SearchPointsBuilder::new(collection, vector.to_vec(), limit as u64)
                    .with_payload(true),
            )
            .await
            .map_err(|e| qdrant_error("search", e))?;

        Ok(response
            .result
            .into_iter()
            .filter_map(|point| {
                let id = match point.id?.point_id_options? {
                    PointIdOptions::Num(num) => num,
                    PointIdOptions::Uuid(_) => return None,
                };
                let source = point
                    .payload
                    .get("source")
                    .and_then(|v| v.as_str())
                    .cloned()
                    .unwrap_or_default();
                // Cosine scores are similarities; Euclid scores are distances
                let distance = match metric {
                    DistanceMetric::Cosine => 1.0 - point.score,
                    DistanceMetric::L2 => point.score,
                };
                Some(Neighbor {
                    id,
                    distance,
                    source,
                })
            })
            .collect())
    }

    async fn delete(&self, collection: &str, ids: &[u64]) -> Result<usize> {
        if ids.is_empty() {
            return Ok(0);
        }

        let before = self.count(collection).await?;
        let point_ids: Vec<PointId> = ids.iter().map(|id| PointId::from(*id)).collect();
        self.client
            .delete_points(
                DeletePointsBuilder::new(collection)
                    .points(point_ids)
                    .wait(true),
            )
            .await
            .map_err(|e| qdrant_error("delete points", e))?;
        let after = self.count(collection).await?;

        Ok(before.saturating_sub(after))
    }
}
