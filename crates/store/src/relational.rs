//! The `RelationalStore` contract every backend implements identically.

use async_trait::async_trait;
use ingest_core::error::Result;
use ingest_core::types::{
    Chunk, ChunkMeta, Collection, Document, FullTextEntry, Pagination, SyncJob,
};

#[derive(Debug, Clone)]
pub struct KeywordHit {
    pub point_id: String,
    pub score: f32,
}

#[derive(Debug, Clone, Default)]
pub struct DocListFilter {
    pub collection_id: Option<String>,
    pub search: Option<String>,
    pub status: Option<String>,
}

#[derive(Debug, Clone, Copy)]
pub struct PageRequest {
    pub page: u32,
    pub limit: u32,
}

/// Storage interface the rest of the system depends on. Two bindings exist
/// (sqlite, postgres); both run the same migrations and expose identical
/// full-text semantics through `keyword_search`.
#[async_trait]
pub trait RelationalStore: Send + Sync {
    async fn ping(&self) -> Result<()>;
    async fn run_migrations(&self) -> Result<()>;

    // Collections
    async fn insert_collection(&self, collection: &Collection) -> Result<()>;
    async fn get_collection(&self, id: &str) -> Result<Option<Collection>>;
    async fn get_collection_by_name(&self, name: &str) -> Result<Option<Collection>>;
    async fn list_collections(&self, page: PageRequest) -> Result<(Vec<Collection>, Pagination)>;
    async fn update_collection(&self, collection: &Collection) -> Result<()>;
    async fn soft_delete_collection(&self, id: &str) -> Result<()>;

    // Documents
    async fn insert_document(&self, document: &Document) -> Result<()>;
    async fn get_document(&self, id: &str) -> Result<Option<Document>>;
    async fn get_document_by_key(&self, collection_id: &str, key: &str) -> Result<Option<Document>>;
    async fn list_documents(
        &self,
        filter: DocListFilter,
        page: PageRequest,
    ) -> Result<(Vec<Document>, Pagination)>;
    async fn update_document_status(&self, id: &str, status: &str) -> Result<()>;
    async fn update_document_metadata(&self, document: &Document) -> Result<()>;
    async fn delete_document(&self, id: &str) -> Result<()>;

    // Chunks / metadata / full text — written together, idempotent on point_id.
    async fn upsert_chunk_bundle(
        &self,
        tx_id: &str,
        chunk: &Chunk,
        meta: &ChunkMeta,
        fts: &FullTextEntry,
    ) -> Result<()>;
    async fn list_chunks(&self, doc_id: &str) -> Result<Vec<Chunk>>;
    async fn list_chunk_meta(&self, doc_id: &str) -> Result<Vec<ChunkMeta>>;
    async fn chunks_pending_embedding(&self, doc_id: &str) -> Result<Vec<Chunk>>;
    async fn mark_chunk_embedded(&self, point_id: &str) -> Result<()>;
    async fn mark_chunk_failed(&self, point_id: &str, error: &str) -> Result<()>;
    async fn hydrate_point(&self, point_id: &str) -> Result<Option<FullTextEntry>>;
    async fn hydrate_points(&self, point_ids: &[String]) -> Result<Vec<FullTextEntry>>;
    async fn point_ids_for_document(&self, doc_id: &str) -> Result<Vec<String>>;
    async fn point_ids_for_collection(&self, collection_id: &str) -> Result<Vec<String>>;

    async fn keyword_search(
        &self,
        collection_id: Option<&str>,
        query_text: &str,
        limit: u32,
    ) -> Result<Vec<KeywordHit>>;

    // Sync jobs
    async fn upsert_sync_job(&self, job: &SyncJob) -> Result<()>;
    async fn get_sync_job(&self, doc_id: &str) -> Result<Option<SyncJob>>;
    async fn list_non_terminal_sync_jobs(&self) -> Result<Vec<SyncJob>>;

    // Cascade (executed by the store so it can run under one transaction).
    async fn cascade_delete_document(&self, tx_id: &str, doc_id: &str) -> Result<()>;
    async fn cascade_delete_collection(&self, tx_id: &str, collection_id: &str) -> Result<()>;

    // Ambient metrics/health tables (§3.1).
    async fn record_metric(&self, name: &str, value: f64, labels_json: &str) -> Result<()>;
    async fn record_health(&self, component: &str, healthy: bool, detail: &str) -> Result<()>;
}
