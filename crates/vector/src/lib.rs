//! External vector database client.
//!
//! Mirrors the repository shape of the relational store: one trait,
//! `VectorStore`, with a production binding (`QdrantVectorStore`, over
//! `qdrant-client`) and an in-memory fake used by pipeline/sync tests so
//! they don't need a live Qdrant instance.

use async_trait::async_trait;
use ingest_core::error::{IngestError, Result};
use serde_json::Value;
use std::collections::HashMap;

pub const UPSERT_BATCH_SIZE: usize = 100;
pub const DELETE_BATCH_SIZE: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Distance {
    Cosine,
    Euclid,
    Dot,
}

#[derive(Debug, Clone)]
pub struct VectorPoint {
    pub id: String,
    pub vector: Vec<f32>,
    pub payload: HashMap<String, Value>,
}

#[derive(Debug, Clone)]
pub struct VectorHit {
    pub id: String,
    pub score: f32,
    pub payload: HashMap<String, Value>,
}

#[derive(Debug, Clone, Default)]
pub struct VectorFilter {
    pub key: String,
    pub equals: String,
}

#[derive(Debug, Clone)]
pub struct VectorSearchRequest {
    pub vector: Vec<f32>,
    pub limit: u64,
    pub filter: Option<VectorFilter>,
}

#[derive(Debug, Clone, Default)]
pub struct VectorCollectionInfo {
    pub points_count: u64,
    pub vector_size: u64,
}

/// Storage interface the pipeline depends on; the production implementation
/// talks to Qdrant, the fake keeps everything in memory for tests.
#[async_trait]
pub trait VectorStore: Send + Sync {
    async fn health(&self) -> Result<bool>;
    async fn ensure_collection(&self, name: &str, vector_size: u64, distance: Distance) -> Result<()>;
    async fn collection_info(&self, name: &str) -> Result<VectorCollectionInfo>;
    async fn upsert_points(&self, collection: &str, points: Vec<VectorPoint>) -> Result<()>;
    async fn delete_points_by_ids(&self, collection: &str, ids: Vec<String>) -> Result<()>;
    async fn delete_points_by_filter(&self, collection: &str, filter: VectorFilter) -> Result<()>;
    async fn search(&self, collection: &str, request: VectorSearchRequest) -> Result<Vec<VectorHit>>;
}

/// Splits `points`/`ids` into chunks of at most `n`, the batching granularity
/// the spec fixes at 100 for both upserts and deletes.
pub fn batched<T>(items: Vec<T>, n: usize) -> Vec<Vec<T>> {
    let mut out = Vec::new();
    let mut chunk = Vec::with_capacity(n);
    for item in items {
        chunk.push(item);
        if chunk.len() == n {
            out.push(std::mem::replace(&mut chunk, Vec::with_capacity(n)));
        }
    }
    if !chunk.is_empty() {
        out.push(chunk);
    }
    out
}

pub mod fake;
pub mod qdrant;

pub use fake::InMemoryVectorStore;
pub use qdrant::{QdrantConfig, QdrantVectorStore};

pub(crate) fn vector_dependency_error(context: &str, err: impl std::fmt::Display) -> IngestError {
    IngestError::dependency_unavailable(format!("{context}: {err}"))
}
