//! Cascade deletion of a document or collection: vectors go first, the
//! relational rows second, so a crash between the two phases never leaves a
//! vector point the relational store has no record of (it only ever leaves
//! relational rows pointing at vectors that are already gone, which the next
//! resync or delete retry cleans up for free).

use crate::{rate_gate, to_bucket};
use ingest_core::config::RateLimitConfig;
use ingest_core::error::Result;
use ingest_core::id::new_id;
use ingest_ratelimit::RateLimiter;
use ingest_store::{RelationalStore, SqlStore};
use ingest_vector::{batched, VectorStore, DELETE_BATCH_SIZE};
use std::sync::Arc;
use std::time::Instant;
use tracing::info;

pub struct CascadeDeleter {
    store: Arc<SqlStore>,
    vectors: Arc<dyn VectorStore>,
    limiter: Arc<RateLimiter>,
    collection: String,
    rate_limits: RateLimitConfig,
}

impl CascadeDeleter {
    pub fn new(
        store: Arc<SqlStore>,
        vectors: Arc<dyn VectorStore>,
        limiter: Arc<RateLimiter>,
        collection: impl Into<String>,
        rate_limits: RateLimitConfig,
    ) -> Self {
        Self {
            store,
            vectors,
            limiter,
            collection: collection.into(),
            rate_limits,
        }
    }

    /// Idempotent: deleting an already-absent document is a no-op success.
    pub async fn delete_doc(&self, doc_id: &str) -> Result<()> {
        if self.store.get_document(doc_id).await?.is_none() {
            return Ok(());
        }
        let started = Instant::now();
        let point_ids = self.store.point_ids_for_document(doc_id).await?;
        let deleted_points = point_ids.len();
        self.delete_vectors(point_ids).await?;

        self.store
            .txm
            .execute_in_transaction(|ctx| {
                let store = &self.store;
                let doc_id = doc_id.to_string();
                async move { store.cascade_delete_document(&ctx.transaction_id, &doc_id).await }
            })
            .await?;

        let _ = self
            .store
            .record_metric(
                "cascade_delete.document",
                started.elapsed().as_millis() as f64,
                &format!("{{\"doc_id\":\"{doc_id}\",\"points\":{deleted_points}}}"),
            )
            .await;
        info!(doc_id, deleted_points, "deleted document");
        Ok(())
    }

    /// Idempotent: deleting an already-absent collection is a no-op success.
    pub async fn delete_collection(&self, collection_id: &str) -> Result<()> {
        if self.store.get_collection(collection_id).await?.is_none() {
            return Ok(());
        }
        let started = Instant::now();
        let point_ids = self.store.point_ids_for_collection(collection_id).await?;
        let deleted_points = point_ids.len();
        self.delete_vectors(point_ids).await?;

        // Savepoint name must never be built from external input (it's interpolated
        // directly into `SAVEPOINT <name>` SQL, which can't be bind-parameterized);
        // mint an internal id the same way `auto_savepoint` does.
        let savepoint_name = format!("delete_collection_{}", new_id("sp"));
        self.store
            .txm
            .execute_in_transaction(|ctx| {
                let store = &self.store;
                let collection_id = collection_id.to_string();
                let savepoint_name = savepoint_name.clone();
                async move {
                    let sp = store
                        .txm
                        .create_savepoint(&ctx.transaction_id, &savepoint_name, None)
                        .await?;
                    match store.cascade_delete_collection(&ctx.transaction_id, &collection_id).await {
                        Ok(()) => {
                            store.txm.release_savepoint(&ctx.transaction_id, &sp).await?;
                            Ok(())
                        }
                        Err(err) => {
                            let _ = store.txm.rollback_to_savepoint(&ctx.transaction_id, &sp).await;
                            Err(err)
                        }
                    }
                }
            })
            .await?;

        let _ = self
            .store
            .record_metric(
                "cascade_delete.collection",
                started.elapsed().as_millis() as f64,
                &format!("{{\"collection_id\":\"{collection_id}\",\"points\":{deleted_points}}}"),
            )
            .await;
        info!(collection_id, deleted_points, "deleted collection");
        Ok(())
    }

    async fn delete_vectors(&self, point_ids: Vec<String>) -> Result<()> {
        for batch in batched(point_ids, DELETE_BATCH_SIZE) {
            rate_gate(&self.limiter, "qdrant_delete", to_bucket(&self.rate_limits.vector_upsert))?;
            self.vectors.delete_points_by_ids(&self.collection, batch).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use ingest_core::config::DbType;
    use ingest_core::id;
    use ingest_core::types::{Chunk, ChunkMeta, Collection, Document, DocumentStatus, EmbeddingStatus, FullTextEntry};
    use ingest_vector::{Distance, InMemoryVectorStore, VectorPoint};
    use std::collections::HashMap;

    async fn fresh_store() -> (Arc<SqlStore>, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite://{}?mode=rwc", dir.path().join("ingest.db").display());
        let store = SqlStore::connect(&url, DbType::Sqlite).await.unwrap();
        store.run_migrations().await.unwrap();
        (Arc::new(store), dir)
    }

    fn rate_limits() -> RateLimitConfig {
        let mut cfg = RateLimitConfig::default();
        cfg.vector_upsert.enabled = false;
        cfg
    }

    async fn seed_document_with_chunk(store: &SqlStore, vectors: &InMemoryVectorStore, collection: &str, content: &str) -> Document {
        let now = Utc::now();
        let doc = Document {
            id: id::document_id(content.as_bytes()),
            collection_id: collection.to_string(),
            key: "k".to_string(),
            name: "k".to_string(),
            mime: None,
            size_bytes: content.len() as u64,
            content_hash: id::content_hash(content.as_bytes()),
            created_at: now,
            updated_at: now,
            status: DocumentStatus::New,
        };
        store.insert_document(&doc).await.unwrap();

        let point_id = id::point_id(&doc.id, 0);
        let chunk = Chunk {
            point_id: point_id.clone(),
            doc_id: doc.id.clone(),
            collection_id: collection.to_string(),
            chunk_index: 0,
            title_chain: vec![],
            content: content.to_string(),
        };
        let meta = ChunkMeta {
            point_id: point_id.clone(),
            doc_id: doc.id.clone(),
            collection_id: collection.to_string(),
            chunk_index: 0,
            title_chain: vec![],
            content_hash: id::content_hash(content.as_bytes()),
            embedding_status: EmbeddingStatus::Completed,
            synced_at: Some(now),
            error: None,
        };
        let fts = FullTextEntry {
            point_id: point_id.clone(),
            doc_id: doc.id.clone(),
            collection_id: collection.to_string(),
            chunk_index: 0,
            content: content.to_string(),
            title_chain: vec![],
        };
        store
            .txm
            .execute_in_transaction(|ctx| async move { store.upsert_chunk_bundle(&ctx.transaction_id, &chunk, &meta, &fts).await })
            .await
            .unwrap();

        vectors.ensure_collection("docs", 2, Distance::Cosine).await.unwrap();
        vectors
            .upsert_points("docs", vec![VectorPoint { id: point_id, vector: vec![0.1, 0.2], payload: HashMap::new() }])
            .await
            .unwrap();
        doc
    }

    #[tokio::test]
    async fn delete_doc_removes_vectors_before_relational_rows() {
        let (store, _dir) = fresh_store().await;
        let collection = Collection {
            id: "col_1".to_string(),
            name: "docs".to_string(),
            description: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            deleted: false,
        };
        store.insert_collection(&collection).await.unwrap();
        let vectors = Arc::new(InMemoryVectorStore::new());
        let doc = seed_document_with_chunk(&store, &vectors, &collection.id, "alpha beta").await;

        let deleter = CascadeDeleter::new(
            Arc::clone(&store),
            vectors.clone() as Arc<dyn VectorStore>,
            Arc::new(RateLimiter::default()),
            "docs",
            rate_limits(),
        );
        deleter.delete_doc(&doc.id).await.unwrap();

        assert!(store.get_document(&doc.id).await.unwrap().is_none());
        assert!(store.list_chunks(&doc.id).await.unwrap().is_empty());
        let info = vectors.collection_info("docs").await.unwrap();
        assert_eq!(info.points_count, 0);
    }

    #[tokio::test]
    async fn delete_doc_on_absent_document_is_a_noop() {
        let (store, _dir) = fresh_store().await;
        let vectors = Arc::new(InMemoryVectorStore::new());
        let deleter = CascadeDeleter::new(
            Arc::clone(&store),
            vectors as Arc<dyn VectorStore>,
            Arc::new(RateLimiter::default()),
            "docs",
            rate_limits(),
        );
        deleter.delete_doc("doc_missing").await.unwrap();
    }

    #[tokio::test]
    async fn delete_collection_removes_all_member_documents() {
        let (store, _dir) = fresh_store().await;
        let collection = Collection {
            id: "col_2".to_string(),
            name: "kb".to_string(),
            description: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            deleted: false,
        };
        store.insert_collection(&collection).await.unwrap();
        let vectors = Arc::new(InMemoryVectorStore::new());
        let doc = seed_document_with_chunk(&store, &vectors, &collection.id, "gamma delta").await;

        let deleter = CascadeDeleter::new(
            Arc::clone(&store),
            vectors.clone() as Arc<dyn VectorStore>,
            Arc::new(RateLimiter::default()),
            "docs",
            rate_limits(),
        );
        deleter.delete_collection(&collection.id).await.unwrap();

        assert!(store.get_collection(&collection.id).await.unwrap().is_none());
        assert!(store.get_document(&doc.id).await.unwrap().is_none());
        let info = vectors.collection_info("docs").await.unwrap();
        assert_eq!(info.points_count, 0);
    }
}
