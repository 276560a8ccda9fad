//! Drives a document from submission to `SYNCED`: split into chunks, embed,
//! upsert into the vector store, and record each transition in the sync
//! state machine before attempting the side effect that earns it. A failure
//! at any stage hands the document to the retry scheduler rather than
//! propagating past `execute_sync`; only `ingest_document`/`resync_document`
//! themselves can fail their caller, and only for validation or lookup
//! reasons that have nothing to do with the sync pipeline's own progress.

use crate::deleter::CascadeDeleter;
use crate::{classify_error, rate_gate, to_bucket};
use chrono::Utc;
use ingest_core::config::RateLimitConfig;
use ingest_core::error::{IngestError, Result};
use ingest_core::id;
use ingest_core::types::{
    Chunk, ChunkMeta, Document, DocumentStatus, EmbeddingStatus, FullTextEntry, SyncJob, SyncStatus,
};
use ingest_embed::EmbeddingProvider;
use ingest_ratelimit::RateLimiter;
use ingest_split::SplitOptions;
use ingest_store::{RelationalStore, SqlStore};
use ingest_sync::{RetryCallback, RetryDecision, RetryScheduler, RetryStrategy, SyncStateMachine};
use ingest_vector::{batched, VectorPoint, VectorStore, UPSERT_BATCH_SIZE};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{error, info, warn};

pub struct IngestionCoordinator {
    store: Arc<SqlStore>,
    vectors: Arc<dyn VectorStore>,
    embedder: Arc<dyn EmbeddingProvider>,
    sync: Arc<SyncStateMachine>,
    retry: Arc<RetryScheduler>,
    limiter: Arc<RateLimiter>,
    deleter: Arc<CascadeDeleter>,
    collection: String,
    split_options: SplitOptions,
    embed_batch_size: usize,
    retry_strategy: RetryStrategy,
    rate_limits: RateLimitConfig,
}

impl IngestionCoordinator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<SqlStore>,
        vectors: Arc<dyn VectorStore>,
        embedder: Arc<dyn EmbeddingProvider>,
        sync: Arc<SyncStateMachine>,
        retry: Arc<RetryScheduler>,
        limiter: Arc<RateLimiter>,
        deleter: Arc<CascadeDeleter>,
        collection: impl Into<String>,
        split_options: SplitOptions,
        embed_batch_size: usize,
        retry_strategy: RetryStrategy,
        rate_limits: RateLimitConfig,
    ) -> Self {
        Self {
            store,
            vectors,
            embedder,
            sync,
            retry,
            limiter,
            deleter,
            collection: collection.into(),
            split_options,
            embed_batch_size,
            retry_strategy,
            rate_limits,
        }
    }

    /// Content-addressed upsert: identical content under an existing `key`
    /// is a metadata-only update that never touches the sync job; changed
    /// content hard-deletes the old document (and its chunks/vectors) before
    /// inserting the new one and kicking off a fresh sync run.
    pub async fn ingest_document(
        self: &Arc<Self>,
        collection_id: &str,
        key: &str,
        name: &str,
        content: &str,
        mime: Option<String>,
    ) -> Result<Document> {
        let content_hash = id::content_hash(content.as_bytes());
        let now = Utc::now();

        if let Some(existing) = self.store.get_document_by_key(collection_id, key).await? {
            if existing.content_hash == content_hash {
                let mut updated = existing;
                updated.name = name.to_string();
                updated.mime = mime;
                updated.size_bytes = content.len() as u64;
                updated.updated_at = now;
                self.store.update_document_metadata(&updated).await?;
                info!(doc_id = %updated.id, "document content unchanged, metadata refreshed");
                return Ok(updated);
            }
            info!(doc_id = %existing.id, "document content changed, replacing");
            self.deleter.delete_doc(&existing.id).await?;
        }

        let doc_id = id::document_id(content.as_bytes());
        let document = Document {
            id: doc_id.clone(),
            collection_id: collection_id.to_string(),
            key: key.to_string(),
            name: name.to_string(),
            mime,
            size_bytes: content.len() as u64,
            content_hash,
            created_at: now,
            updated_at: now,
            status: DocumentStatus::New,
        };
        self.store.insert_document(&document).await?;
        self.trigger_sync(doc_id, Some(content.to_string()));
        Ok(document)
    }

    /// Re-runs the sync pipeline for a document already on record. Only
    /// completes the stages the document hasn't already reached; if it
    /// never got past `NEW` there is no stored content to split and the
    /// call fails rather than silently doing nothing.
    pub async fn resync_document(self: &Arc<Self>, doc_id: &str) -> Result<()> {
        if self.store.get_document(doc_id).await?.is_none() {
            return Err(IngestError::not_found("document", doc_id));
        }
        self.trigger_sync(doc_id.to_string(), None);
        Ok(())
    }

    /// One task per invocation, serialized per document by the sync state
    /// machine's keyed lock so concurrent triggers for the same document
    /// never run `execute_sync` in parallel.
    fn trigger_sync(self: &Arc<Self>, doc_id: String, content: Option<String>) -> tokio::task::JoinHandle<()> {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            let _guard = this.sync.lock_doc(&doc_id).await;
            if let Err(err) = this.execute_sync(&doc_id, content).await {
                error!(doc_id = %doc_id, error = %err, "sync run failed");
            }
        })
    }

    #[tracing::instrument(skip(self, content), fields(doc_id = %doc_id))]
    async fn execute_sync(self: &Arc<Self>, doc_id: &str, content: Option<String>) -> Result<()> {
        let document = self
            .store
            .get_document(doc_id)
            .await?
            .ok_or_else(|| IngestError::not_found("document", doc_id))?;
        let status = self.sync.get_job(doc_id).await?.map(|j| j.status).unwrap_or(SyncStatus::New);
        info!(from_state = status.as_str(), "running sync stages");

        let outcome = self.run_stages(&document, content.as_deref(), status).await;
        if let Err(err) = &outcome {
            warn!(error = %err, "sync stage failed, handing off to retry");
            self.handle_stage_failure(doc_id.to_string(), content, err).await;
        }
        outcome
    }

    /// Cascades forward from wherever the document currently sits. Each
    /// stage's own `record_*` call is what actually advances `status`; this
    /// just decides which stages still need to run.
    async fn run_stages(&self, document: &Document, content: Option<&str>, status: SyncStatus) -> Result<()> {
        let mut status = status;

        if matches!(status, SyncStatus::New) {
            let content = content.ok_or_else(|| {
                IngestError::validation(format!(
                    "document {} has no content to split; original submission is required",
                    document.id
                ))
            })?;
            self.ensure_split(document, content).await?;
            status = SyncStatus::SplitOk;
        }
        if matches!(status, SyncStatus::SplitOk) {
            self.ensure_embed(document).await?;
            status = SyncStatus::EmbedOk;
        }
        if matches!(status, SyncStatus::EmbedOk) {
            self.ensure_synced(document).await?;
        }
        Ok(())
    }

    async fn ensure_split(&self, document: &Document, content: &str) -> Result<()> {
        let chunks = ingest_split::split(content, &self.split_options);
        let doc_id = document.id.clone();
        let collection_id = document.collection_id.clone();

        self.store
            .txm
            .execute_in_transaction(|ctx| {
                let store = &self.store;
                async move {
                    for (idx, split_chunk) in chunks.into_iter().enumerate() {
                        let chunk_index = idx as u32;
                        let point_id = id::point_id(&doc_id, chunk_index);
                        let content_hash = id::content_hash(split_chunk.content.as_bytes());

                        let chunk = Chunk {
                            point_id: point_id.clone(),
                            doc_id: doc_id.clone(),
                            collection_id: collection_id.clone(),
                            chunk_index,
                            title_chain: split_chunk.title_chain.clone(),
                            content: split_chunk.content.clone(),
                        };
                        let meta = ChunkMeta {
                            point_id: point_id.clone(),
                            doc_id: doc_id.clone(),
                            collection_id: collection_id.clone(),
                            chunk_index,
                            title_chain: split_chunk.title_chain.clone(),
                            content_hash,
                            embedding_status: EmbeddingStatus::Pending,
                            synced_at: None,
                            error: None,
                        };
                        let fts = FullTextEntry {
                            point_id,
                            doc_id: doc_id.clone(),
                            collection_id: collection_id.clone(),
                            chunk_index,
                            content: split_chunk.content,
                            title_chain: split_chunk.title_chain,
                        };
                        store.upsert_chunk_bundle(&ctx.transaction_id, &chunk, &meta, &fts).await?;
                    }
                    Ok(())
                }
            })
            .await?;

        self.sync.record_split_ok(&document.id).await?;
        Ok(())
    }

    async fn ensure_embed(&self, document: &Document) -> Result<()> {
        let pending = self.store.chunks_pending_embedding(&document.id).await?;
        if pending.is_empty() {
            self.sync.record_embed_ok(&document.id).await?;
            return Ok(());
        }

        for embed_batch in batched(pending, self.embed_batch_size) {
            rate_gate(&self.limiter, "embedding", to_bucket(&self.rate_limits.embedding))?;
            let texts: Vec<String> = embed_batch.iter().map(|c| c.content.clone()).collect();
            let vectors = self.embedder.embed(&texts).await?;
            let pairs: Vec<(Chunk, Vec<f32>)> = embed_batch.into_iter().zip(vectors).collect();

            for sub_batch in batched(pairs, UPSERT_BATCH_SIZE) {
                rate_gate(&self.limiter, "qdrant_upsert", to_bucket(&self.rate_limits.vector_upsert))?;
                let points: Vec<VectorPoint> = sub_batch
                    .iter()
                    .map(|(chunk, vector)| VectorPoint {
                        id: chunk.point_id.clone(),
                        vector: vector.clone(),
                        payload: chunk_payload(chunk),
                    })
                    .collect();
                self.vectors.upsert_points(&self.collection, points).await?;
                for (chunk, _) in &sub_batch {
                    self.store.mark_chunk_embedded(&chunk.point_id).await?;
                }
            }
        }

        self.sync.record_embed_ok(&document.id).await?;
        Ok(())
    }

    async fn ensure_synced(&self, document: &Document) -> Result<()> {
        self.sync.record_synced(&document.id).await?;
        self.store
            .update_document_status(&document.id, DocumentStatus::Synced.as_str())
            .await?;
        Ok(())
    }

    /// Classifies the failure, records it, and arms a retry callback that
    /// re-derives the document's resume point from its chunk rows (the sync
    /// state machine only knows the stage it was told about, not how far the
    /// stage itself got before failing).
    async fn handle_stage_failure(self: &Arc<Self>, doc_id: String, content: Option<String>, err: &IngestError) {
        let category = classify_error(err);
        let failed = match self.sync.record_fail(&doc_id, category, err.to_string()).await {
            Ok(job) => job,
            Err(record_err) => {
                error!(doc_id = %doc_id, error = %record_err, "failed to record sync failure");
                return;
            }
        };

        let callback = self.retry_callback(doc_id.clone(), content);
        match self.sync.arm_retry(&failed, self.retry_strategy, &self.retry, callback).await {
            Ok(RetryDecision::Retry { task_id }) => {
                warn!(doc_id = %doc_id, task_id, "retry armed");
            }
            Ok(RetryDecision::Dead) => {
                error!(doc_id = %doc_id, "exhausted retries or terminal error, marked dead");
            }
            Err(arm_err) => {
                error!(doc_id = %doc_id, error = %arm_err, "failed to arm retry");
            }
        }
    }

    fn retry_callback(self: &Arc<Self>, doc_id: String, content: Option<String>) -> RetryCallback {
        let this = Arc::clone(self);
        Arc::new(move || {
            let this = Arc::clone(&this);
            let doc_id = doc_id.clone();
            let content = content.clone();
            Box::pin(async move {
                let _guard = this.sync.lock_doc(&doc_id).await;
                let resume_to = this.resume_status(&doc_id).await.map_err(|e| e.to_string())?;
                this.sync
                    .record_retry_ok(&doc_id, resume_to)
                    .await
                    .map_err(|e| e.to_string())?;
                this.execute_sync(&doc_id, content).await.map_err(|e| e.to_string())
            })
        })
    }

    /// Infers which stage a document actually reached by inspecting its
    /// chunk rows, since `record_retry_ok` requires the caller to supply
    /// `resume_to` rather than tracking it itself.
    async fn resume_status(&self, doc_id: &str) -> Result<SyncStatus> {
        let metas = self.store.list_chunk_meta(doc_id).await?;
        if metas.is_empty() {
            return Ok(SyncStatus::New);
        }
        if metas.iter().all(|m| m.embedding_status == EmbeddingStatus::Completed) {
            return Ok(SyncStatus::EmbedOk);
        }
        Ok(SyncStatus::SplitOk)
    }

    pub async fn get_sync_job(&self, doc_id: &str) -> Result<Option<SyncJob>> {
        self.sync.get_job(doc_id).await
    }
}

/// Vector-store payload shape: camelCase keys, matching what the search
/// orchestrator reads back off a hit when it isn't hydrating from the
/// relational store.
fn chunk_payload(chunk: &Chunk) -> HashMap<String, Value> {
    let mut payload = HashMap::new();
    payload.insert("content".to_string(), Value::String(chunk.content.clone()));
    payload.insert("titleChain".to_string(), json!(chunk.title_chain));
    payload.insert("docId".to_string(), Value::String(chunk.doc_id.clone()));
    payload.insert("collectionId".to_string(), Value::String(chunk.collection_id.clone()));
    payload.insert("chunkIndex".to_string(), json!(chunk.chunk_index));
    payload
}

#[cfg(test)]
mod tests {
    use super::*;
    use ingest_core::config::DbType;
    use ingest_core::types::Collection;
    use ingest_embed::FakeEmbeddingProvider;
    use ingest_vector::{Distance, InMemoryVectorStore};
    use std::time::Duration;

    async fn fresh_store() -> (Arc<SqlStore>, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite://{}?mode=rwc", dir.path().join("ingest.db").display());
        let store = SqlStore::connect(&url, DbType::Sqlite).await.unwrap();
        store.run_migrations().await.unwrap();
        (Arc::new(store), dir)
    }

    fn disabled_rate_limits() -> RateLimitConfig {
        let mut cfg = RateLimitConfig::default();
        cfg.embedding.enabled = false;
        cfg.vector_upsert.enabled = false;
        cfg
    }

    async fn build_coordinator(store: Arc<SqlStore>, vectors: Arc<InMemoryVectorStore>) -> Arc<IngestionCoordinator> {
        vectors.ensure_collection("docs", 8, Distance::Cosine).await.unwrap();
        let limiter = Arc::new(RateLimiter::default());
        let sync = Arc::new(SyncStateMachine::new(Arc::clone(&store) as Arc<dyn RelationalStore>));
        let retry = Arc::new(RetryScheduler::new());
        let deleter = Arc::new(CascadeDeleter::new(
            Arc::clone(&store),
            Arc::clone(&vectors) as Arc<dyn VectorStore>,
            Arc::clone(&limiter),
            "docs",
            disabled_rate_limits(),
        ));
        Arc::new(IngestionCoordinator::new(
            store,
            vectors as Arc<dyn VectorStore>,
            Arc::new(FakeEmbeddingProvider::new(8)) as Arc<dyn EmbeddingProvider>,
            sync,
            retry,
            limiter,
            deleter,
            "docs",
            SplitOptions::default(),
            8,
            RetryStrategy::default(),
            disabled_rate_limits(),
        ))
    }

    async fn wait_for_terminal(coordinator: &IngestionCoordinator, doc_id: &str) -> SyncJob {
        for _ in 0..100 {
            if let Some(job) = coordinator.get_sync_job(doc_id).await.unwrap() {
                if job.status.is_terminal() {
                    return job;
                }
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("sync job for {doc_id} never reached a terminal state");
    }

    #[tokio::test]
    async fn ingest_document_runs_the_full_pipeline_to_synced() {
        let (store, _dir) = fresh_store().await;
        let collection = Collection {
            id: "col_full".to_string(),
            name: "docs".to_string(),
            description: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            deleted: false,
        };
        store.insert_collection(&collection).await.unwrap();
        let vectors = Arc::new(InMemoryVectorStore::new());
        let coordinator = build_coordinator(Arc::clone(&store), Arc::clone(&vectors)).await;

        let document = coordinator
            .ingest_document(
                &collection.id,
                "note.md",
                "note.md",
                "# Intro\n\nhello world\n\n## Details\n\nmore text here\n",
                Some("text/markdown".to_string()),
            )
            .await
            .unwrap();

        let job = wait_for_terminal(&coordinator, &document.id).await;
        assert_eq!(job.status, SyncStatus::Synced);

        let stored = store.get_document(&document.id).await.unwrap().unwrap();
        assert_eq!(stored.status, DocumentStatus::Synced);
        let info = vectors.collection_info("docs").await.unwrap();
        assert!(info.points_count >= 2);
    }

    #[tokio::test]
    async fn resync_unknown_document_is_rejected() {
        let (store, _dir) = fresh_store().await;
        let vectors = Arc::new(InMemoryVectorStore::new());
        let coordinator = build_coordinator(store, vectors).await;

        let err = coordinator.resync_document("doc_missing").await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn reingesting_identical_content_is_metadata_only() {
        let (store, _dir) = fresh_store().await;
        let collection = Collection {
            id: "col_dup".to_string(),
            name: "docs".to_string(),
            description: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            deleted: false,
        };
        store.insert_collection(&collection).await.unwrap();
        let vectors = Arc::new(InMemoryVectorStore::new());
        let coordinator = build_coordinator(Arc::clone(&store), Arc::clone(&vectors)).await;

        let first = coordinator
            .ingest_document(&collection.id, "note.md", "note.md", "same content", None)
            .await
            .unwrap();
        wait_for_terminal(&coordinator, &first.id).await;

        let second = coordinator
            .ingest_document(&collection.id, "note.md", "renamed.md", "same content", None)
            .await
            .unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(second.name, "renamed.md");

        let job = coordinator.get_sync_job(&first.id).await.unwrap().unwrap();
        assert_eq!(job.status, SyncStatus::Synced, "metadata-only update must not re-trigger a sync run");
    }
}
