//! Deterministic in-memory `VectorStore` used by pipeline and sync tests.

use crate::{
    Distance, VectorCollectionInfo, VectorFilter, VectorHit, VectorPoint, VectorSearchRequest,
    VectorStore,
};
use async_trait::async_trait;
use ingest_core::error::{IngestError, Result};
use std::collections::HashMap;
use std::sync::Mutex;

struct StoredCollection {
    vector_size: u64,
    points: HashMap<String, VectorPoint>,
}

#[derive(Default)]
pub struct InMemoryVectorStore {
    collections: Mutex<HashMap<String, StoredCollection>>,
}

impl InMemoryVectorStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_collection<T>(&self, name: &str, f: impl FnOnce(&mut StoredCollection) -> Result<T>) -> Result<T> {
        let mut guard = self.collections.lock().unwrap();
        let collection = guard
            .get_mut(name)
            .ok_or_else(|| IngestError::not_found("vector_collection", name))?;
        f(collection)
    }
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}

#[async_trait]
impl VectorStore for InMemoryVectorStore {
    async fn health(&self) -> Result<bool> {
        Ok(true)
    }

    async fn ensure_collection(&self, name: &str, vector_size: u64, _distance: Distance) -> Result<()> {
        let mut guard = self.collections.lock().unwrap();
        guard.entry(name.to_string()).or_insert_with(|| StoredCollection {
            vector_size,
            points: HashMap::new(),
        });
        Ok(())
    }

    async fn collection_info(&self, name: &str) -> Result<VectorCollectionInfo> {
        self.with_collection(name, |c| {
            Ok(VectorCollectionInfo {
                points_count: c.points.len() as u64,
                vector_size: c.vector_size,
            })
        })
    }

    async fn upsert_points(&self, collection: &str, points: Vec<VectorPoint>) -> Result<()> {
        self.with_collection(collection, |c| {
            for point in points {
                c.points.insert(point.id.clone(), point);
            }
            Ok(())
        })
    }

    async fn delete_points_by_ids(&self, collection: &str, ids: Vec<String>) -> Result<()> {
        self.with_collection(collection, |c| {
            for id in ids {
                c.points.remove(&id);
            }
            Ok(())
        })
    }

    async fn delete_points_by_filter(&self, collection: &str, filter: VectorFilter) -> Result<()> {
        self.with_collection(collection, |c| {
            c.points.retain(|_, point| {
                point
                    .payload
                    .get(&filter.key)
                    .and_then(|v| v.as_str())
                    .map(|v| v != filter.equals)
                    .unwrap_or(true)
            });
            Ok(())
        })
    }

    async fn search(&self, collection: &str, request: VectorSearchRequest) -> Result<Vec<VectorHit>> {
        self.with_collection(collection, |c| {
            let mut hits: Vec<VectorHit> = c
                .points
                .values()
                .filter(|point| match &request.filter {
                    Some(f) => point
                        .payload
                        .get(&f.key)
                        .and_then(|v| v.as_str())
                        .map(|v| v == f.equals)
                        .unwrap_or(false),
                    None => true,
                })
                .map(|point| VectorHit {
                    id: point.id.clone(),
                    score: cosine_similarity(&request.vector, &point.vector),
                    payload: point.payload.clone(),
                })
                .collect();
            hits.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
            hits.truncate(request.limit as usize);
            Ok(hits)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn point(id: &str, vector: Vec<f32>, collection_id: &str) -> VectorPoint {
        let mut payload = HashMap::new();
        payload.insert("collection_id".to_string(), json!(collection_id));
        VectorPoint { id: id.to_string(), vector, payload }
    }

    #[tokio::test]
    async fn upsert_then_search_returns_closest_first() {
        let store = InMemoryVectorStore::new();
        store.ensure_collection("docs", 2, Distance::Cosine).await.unwrap();
        store
            .upsert_points(
                "docs",
                vec![
                    point("a", vec![1.0, 0.0], "col1"),
                    point("b", vec![0.0, 1.0], "col1"),
                ],
            )
            .await
            .unwrap();

        let hits = store
            .search(
                "docs",
                VectorSearchRequest { vector: vec![1.0, 0.0], limit: 1, filter: None },
            )
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, "a");
    }

    #[tokio::test]
    async fn delete_by_filter_removes_matching_points_only() {
        let store = InMemoryVectorStore::new();
        store.ensure_collection("docs", 2, Distance::Cosine).await.unwrap();
        store
            .upsert_points(
                "docs",
                vec![point("a", vec![1.0, 0.0], "col1"), point("b", vec![0.0, 1.0], "col2")],
            )
            .await
            .unwrap();

        store
            .delete_points_by_filter(
                "docs",
                VectorFilter { key: "collection_id".to_string(), equals: "col1".to_string() },
            )
            .await
            .unwrap();

        let info = store.collection_info("docs").await.unwrap();
        assert_eq!(info.points_count, 1);
    }

    #[tokio::test]
    async fn operations_on_unknown_collection_fail() {
        let store = InMemoryVectorStore::new();
        let err = store.collection_info("missing").await;
        assert!(err.is_err());
    }
}
