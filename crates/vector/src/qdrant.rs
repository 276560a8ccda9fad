//! Qdrant-backed `VectorStore`.

use crate::{
    batched, vector_dependency_error, Distance as IngestDistance, VectorCollectionInfo, VectorFilter,
    VectorHit, VectorPoint, VectorSearchRequest, VectorStore, DELETE_BATCH_SIZE, UPSERT_BATCH_SIZE,
};
use async_trait::async_trait;
use ingest_core::error::Result;
use ingest_core::id::point_uuid;
use qdrant_client::qdrant::{
    Condition, CreateCollectionBuilder, Distance as QdrantDistance, Filter, PointStruct,
    SearchPointsBuilder, UpsertPointsBuilder, VectorParamsBuilder, WriteOrderingType,
};
use qdrant_client::{Payload, Qdrant};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QdrantConfig {
    pub url: String,
    pub api_key: Option<String>,
    pub timeout: Duration,
}

impl Default for QdrantConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:6334".to_string(),
            api_key: None,
            timeout: Duration::from_secs(10),
        }
    }
}

pub struct QdrantVectorStore {
    client: Qdrant,
}

impl QdrantVectorStore {
    pub fn connect(config: QdrantConfig) -> Result<Self> {
        info!(url = %config.url, "connecting to qdrant");
        let mut client_config = qdrant_client::config::QdrantConfig::from_url(&config.url);
        client_config.set_timeout(config.timeout);
        if let Some(api_key) = &config.api_key {
            client_config.set_api_key(api_key);
        }
        let client = Qdrant::new(client_config).map_err(|e| vector_dependency_error("qdrant connect", e))?;
        Ok(Self { client })
    }
}

fn to_qdrant_distance(d: IngestDistance) -> QdrantDistance {
    match d {
        IngestDistance::Cosine => QdrantDistance::Cosine,
        IngestDistance::Euclid => QdrantDistance::Euclid,
        IngestDistance::Dot => QdrantDistance::Dot,
    }
}

/// Qdrant only accepts an unsigned integer or a UUID string as a point id,
/// so the internal `pt_<hex>` join key is carried in the payload instead and
/// a UUID derived from it (see `ingest_core::id::point_uuid`) is what
/// actually goes on the wire.
fn point_to_struct(point: VectorPoint) -> Result<PointStruct> {
    let qdrant_id = point_uuid(&point.id).to_string();
    let mut fields = point.payload;
    fields.insert("pointId".to_string(), serde_json::Value::String(point.id));
    let payload: Payload = serde_json::Value::Object(fields.into_iter().collect())
        .try_into()
        .map_err(|e| vector_dependency_error("qdrant payload conversion", e))?;
    Ok(PointStruct::new(qdrant_id, point.vector, payload))
}

#[async_trait]
impl VectorStore for QdrantVectorStore {
    async fn health(&self) -> Result<bool> {
        match self.client.health_check().await {
            Ok(_) => Ok(true),
            Err(_) => Ok(false),
        }
    }

    async fn ensure_collection(&self, name: &str, vector_size: u64, distance: IngestDistance) -> Result<()> {
        let exists = self
            .client
            .collection_exists(name)
            .await
            .map_err(|e| vector_dependency_error("qdrant collection_exists", e))?;
        if exists {
            return Ok(());
        }
        info!(collection = name, vector_size, "creating qdrant collection");
        let vectors = VectorParamsBuilder::new(vector_size, to_qdrant_distance(distance));
        self.client
            .create_collection(CreateCollectionBuilder::new(name).vectors_config(vectors))
            .await
            .map_err(|e| vector_dependency_error("qdrant create_collection", e))?;
        Ok(())
    }

    async fn collection_info(&self, name: &str) -> Result<VectorCollectionInfo> {
        let response = self
            .client
            .collection_info(name)
            .await
            .map_err(|e| vector_dependency_error("qdrant collection_info", e))?;
        let info = response
            .result
            .ok_or_else(|| vector_dependency_error("qdrant collection_info", "empty response"))?;
        let vector_size = info
            .config
            .as_ref()
            .and_then(|c| c.params.as_ref())
            .and_then(|p| p.vectors_config.as_ref())
            .and_then(|vc| vc.config.clone())
            .and_then(|cfg| match cfg {
                qdrant_client::qdrant::vectors_config::Config::Params(params) => Some(params.size),
                _ => None,
            })
            .unwrap_or(0);
        Ok(VectorCollectionInfo {
            points_count: info.points_count.unwrap_or(0),
            vector_size,
        })
    }

    async fn upsert_points(&self, collection: &str, points: Vec<VectorPoint>) -> Result<()> {
        for batch in batched(points, UPSERT_BATCH_SIZE) {
            debug!(collection, count = batch.len(), "upserting point batch");
            let structs = batch
                .into_iter()
                .map(point_to_struct)
                .collect::<Result<Vec<_>>>()?;
            self.client
                .upsert_points(
                    UpsertPointsBuilder::new(collection, structs)
                        .wait(true)
                        .ordering(WriteOrderingType::Medium),
                )
                .await
                .map_err(|e| vector_dependency_error("qdrant upsert_points", e))?;
        }
        Ok(())
    }

    async fn delete_points_by_ids(&self, collection: &str, ids: Vec<String>) -> Result<()> {
        for batch in batched(ids, DELETE_BATCH_SIZE) {
            let points: Vec<_> = batch.into_iter().map(|id| point_uuid(&id).to_string()).map(Into::into).collect();
            self.client
                .delete_points(
                    qdrant_client::qdrant::DeletePointsBuilder::new(collection).points(points),
                )
                .await
                .map_err(|e| vector_dependency_error("qdrant delete_points", e))?;
        }
        Ok(())
    }

    async fn delete_points_by_filter(&self, collection: &str, filter: VectorFilter) -> Result<()> {
        let qfilter = Filter::must([Condition::matches(filter.key, filter.equals)]);
        self.client
            .delete_points(
                qdrant_client::qdrant::DeletePointsBuilder::new(collection).points(qfilter),
            )
            .await
            .map_err(|e| vector_dependency_error("qdrant delete_points (filter)", e))?;
        Ok(())
    }

    async fn search(&self, collection: &str, request: VectorSearchRequest) -> Result<Vec<VectorHit>> {
        let mut builder =
            SearchPointsBuilder::new(collection, request.vector, request.limit).with_payload(true);
        if let Some(filter) = request.filter {
            builder = builder.filter(Filter::must([Condition::matches(filter.key, filter.equals)]));
        }
        let result = self
            .client
            .search_points(builder)
            .await
            .map_err(|e| vector_dependency_error("qdrant search_points", e))?;
        Ok(result
            .result
            .into_iter()
            .map(|scored| {
                let mut payload: std::collections::HashMap<String, serde_json::Value> = scored
                    .payload
                    .into_iter()
                    .map(|(k, v)| (k, qdrant_value_to_json(v)))
                    .collect();
                // `pointId` is the internal join key the rest of the system keys
                // off; the Qdrant-native id is only a wire-level UUID and is
                // never used past this point.
                let id = payload
                    .remove("pointId")
                    .and_then(|v| v.as_str().map(str::to_string))
                    .unwrap_or_default();
                VectorHit { id, score: scored.score, payload }
            })
            .collect())
    }
}

fn qdrant_value_to_json(value: qdrant_client::qdrant::Value) -> serde_json::Value {
    use qdrant_client::qdrant::value::Kind;
    match value.kind {
        Some(Kind::StringValue(s)) => serde_json::Value::String(s),
        Some(Kind::IntegerValue(i)) => serde_json::Value::from(i),
        Some(Kind::DoubleValue(d)) => serde_json::Value::from(d),
        Some(Kind::BoolValue(b)) => serde_json::Value::Bool(b),
        Some(Kind::NullValue(_)) | None => serde_json::Value::Null,
        Some(Kind::ListValue(list)) => {
            serde_json::Value::Array(list.values.into_iter().map(qdrant_value_to_json).collect())
        }
        Some(Kind::StructValue(s)) => serde_json::Value::Object(
            s.fields
                .into_iter()
                .map(|(k, v)| (k, qdrant_value_to_json(v)))
                .collect(),
        ),
    }
}
