//! Per-document sync job lifecycle: `NEW -> SPLIT_OK -> EMBED_OK -> SYNCED`,
//! with `FAILED -> RETRYING -> DEAD` branches on the side. Every transition
//! is persisted through the relational store before the caller attempts the
//! side effect that earns the *next* transition, so a crash always resumes
//! from the last durably-recorded state rather than replaying blind.
//!
//! This module owns the state machine's guards and persistence; it does not
//! know how to split, embed, or upsert a document's chunks. The ingestion
//! coordinator drives it by calling `record_*` after each stage succeeds and
//! `record_fail`/`arm_retry` when one doesn't.

use crate::retry::{RetryCallback, RetryScheduler, RetryStrategy};
use chrono::Utc;
use dashmap::DashMap;
use ingest_core::error::{IngestError, Result};
use ingest_core::types::{ErrorCategory, SyncJob, SyncStatus};
use ingest_store::RelationalStore;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Outcome of handing a `FAILED` job to the retry scheduler.
#[derive(Debug, Clone)]
pub enum RetryDecision {
    Retry { task_id: String },
    Dead,
}

pub struct SyncStateMachine {
    store: Arc<dyn RelationalStore>,
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl SyncStateMachine {
    pub fn new(store: Arc<dyn RelationalStore>) -> Self {
        Self {
            store,
            locks: DashMap::new(),
        }
    }

    /// Per-`docId` keyed lock: at most one in-flight execution per document.
    /// Concurrent `triggerSync(docId)` callers coalesce onto whichever one
    /// acquires the guard first and wait their turn rather than racing.
    pub async fn lock_doc(&self, doc_id: &str) -> OwnedMutexGuard<()> {
        let lock = self
            .locks
            .entry(doc_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        lock.lock_owned().await
    }

    /// Loads non-terminal jobs for startup recovery. Callers decide, per
    /// job's status, whether to requeue execution (`NEW`/`SPLIT_OK`/
    /// `EMBED_OK`) or re-arm a retry (`FAILED`/`RETRYING`).
    pub async fn initialize(&self) -> Result<Vec<SyncJob>> {
        self.store.list_non_terminal_sync_jobs().await
    }

    async fn load_or_new(&self, doc_id: &str) -> Result<SyncJob> {
        if let Some(job) = self.store.get_sync_job(doc_id).await? {
            return Ok(job);
        }
        let now = Utc::now();
        let job = SyncJob {
            doc_id: doc_id.to_string(),
            status: SyncStatus::New,
            attempts: 0,
            last_error: None,
            error_category: None,
            created_at: now,
            updated_at: now,
        };
        self.store.upsert_sync_job(&job).await?;
        Ok(job)
    }

    fn ensure(&self, job: &SyncJob, expected: SyncStatus) -> Result<()> {
        if job.status != expected {
            return Err(IngestError::integrity(format!(
                "job for {} is in status {:?}, expected {:?}",
                job.doc_id, job.status, expected
            )));
        }
        Ok(())
    }

    async fn transition(&self, doc_id: &str, from: SyncStatus, to: SyncStatus) -> Result<SyncJob> {
        let mut job = self.load_or_new(doc_id).await?;
        self.ensure(&job, from)?;
        job.status = to;
        job.updated_at = Utc::now();
        self.store.upsert_sync_job(&job).await?;
        Ok(job)
    }

    pub async fn record_split_ok(&self, doc_id: &str) -> Result<SyncJob> {
        self.transition(doc_id, SyncStatus::New, SyncStatus::SplitOk).await
    }

    pub async fn record_embed_ok(&self, doc_id: &str) -> Result<SyncJob> {
        self.transition(doc_id, SyncStatus::SplitOk, SyncStatus::EmbedOk).await
    }

    pub async fn record_synced(&self, doc_id: &str) -> Result<SyncJob> {
        self.transition(doc_id, SyncStatus::EmbedOk, SyncStatus::Synced).await
    }

    /// `*active* --fail--> FAILED`. Bumps the attempt counter; the decision
    /// between `RETRYING` and `DEAD` is made separately by `arm_retry` once
    /// the caller has a strategy and a callback ready.
    pub async fn record_fail(
        &self,
        doc_id: &str,
        category: ErrorCategory,
        err: impl Into<String>,
    ) -> Result<SyncJob> {
        let mut job = self.load_or_new(doc_id).await?;
        if !job.status.is_active() {
            return Err(IngestError::integrity(format!(
                "cannot fail job for {} in status {:?}",
                doc_id, job.status
            )));
        }
        job.status = SyncStatus::Failed;
        job.attempts += 1;
        job.last_error = Some(err.into());
        job.error_category = Some(category);
        job.updated_at = Utc::now();
        self.store.upsert_sync_job(&job).await?;
        Ok(job)
    }

    /// `FAILED --retry--> RETRYING` (guard: schedulable and under the
    /// attempt budget) or `FAILED --dead--> DEAD` otherwise.
    pub async fn arm_retry(
        &self,
        job: &SyncJob,
        strategy: RetryStrategy,
        scheduler: &RetryScheduler,
        callback: RetryCallback,
    ) -> Result<RetryDecision> {
        self.ensure(job, SyncStatus::Failed)?;
        let category = job.error_category.unwrap_or(ErrorCategory::Terminal);
        let schedulable = category.is_schedulable() && job.attempts < strategy.max_retries;

        if !schedulable {
            let mut dead = job.clone();
            dead.status = SyncStatus::Dead;
            dead.updated_at = Utc::now();
            self.store.upsert_sync_job(&dead).await?;
            return Ok(RetryDecision::Dead);
        }

        let mut retrying = job.clone();
        retrying.status = SyncStatus::Retrying;
        retrying.updated_at = Utc::now();
        self.store.upsert_sync_job(&retrying).await?;

        let err = job.last_error.clone().unwrap_or_default();
        let task_id = scheduler.schedule(job.doc_id.clone(), err, category, job.attempts, strategy, callback);
        Ok(RetryDecision::Retry { task_id })
    }

    /// `RETRYING --retry_ok--> <prior>`. `resume_to` is whichever stage the
    /// caller determined the document actually reached by inspecting its
    /// chunk rows, not a value this module tracks on its own.
    pub async fn record_retry_ok(&self, doc_id: &str, resume_to: SyncStatus) -> Result<SyncJob> {
        let mut job = self.load_or_new(doc_id).await?;
        self.ensure(&job, SyncStatus::Retrying)?;
        job.status = resume_to;
        job.updated_at = Utc::now();
        self.store.upsert_sync_job(&job).await?;
        Ok(job)
    }

    pub async fn get_job(&self, doc_id: &str) -> Result<Option<SyncJob>> {
        self.store.get_sync_job(doc_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use ingest_core::types::{Chunk, ChunkMeta, Collection, Document, FullTextEntry, Pagination};
    use ingest_store::{DocListFilter, KeywordHit, PageRequest};
    use std::sync::Mutex as StdMutex;

    #[derive(Default)]
    struct FakeStore {
        jobs: StdMutex<std::collections::HashMap<String, SyncJob>>,
    }

    #[async_trait]
    impl RelationalStore for FakeStore {
        async fn ping(&self) -> Result<()> {
            Ok(())
        }
        async fn run_migrations(&self) -> Result<()> {
            Ok(())
        }
        async fn insert_collection(&self, _c: &Collection) -> Result<()> {
            unimplemented!()
        }
        async fn get_collection(&self, _id: &str) -> Result<Option<Collection>> {
            unimplemented!()
        }
        async fn get_collection_by_name(&self, _name: &str) -> Result<Option<Collection>> {
            unimplemented!()
        }
        async fn list_collections(&self, _page: PageRequest) -> Result<(Vec<Collection>, Pagination)> {
            unimplemented!()
        }
        async fn update_collection(&self, _c: &Collection) -> Result<()> {
            unimplemented!()
        }
        async fn soft_delete_collection(&self, _id: &str) -> Result<()> {
            unimplemented!()
        }
        async fn insert_document(&self, _d: &Document) -> Result<()> {
            unimplemented!()
        }
        async fn get_document(&self, _id: &str) -> Result<Option<Document>> {
            unimplemented!()
        }
        async fn get_document_by_key(&self, _collection_id: &str, _key: &str) -> Result<Option<Document>> {
            unimplemented!()
        }
        async fn list_documents(
            &self,
            _filter: DocListFilter,
            _page: PageRequest,
        ) -> Result<(Vec<Document>, Pagination)> {
            unimplemented!()
        }
        async fn update_document_status(&self, _id: &str, _status: &str) -> Result<()> {
            unimplemented!()
        }
        async fn update_document_metadata(&self, _d: &Document) -> Result<()> {
            unimplemented!()
        }
        async fn delete_document(&self, _id: &str) -> Result<()> {
            unimplemented!()
        }
        async fn upsert_chunk_bundle(
            &self,
            _tx_id: &str,
            _chunk: &Chunk,
            _meta: &ChunkMeta,
            _fts: &FullTextEntry,
        ) -> Result<()> {
            unimplemented!()
        }
        async fn list_chunks(&self, _doc_id: &str) -> Result<Vec<Chunk>> {
            unimplemented!()
        }
        async fn list_chunk_meta(&self, _doc_id: &str) -> Result<Vec<ChunkMeta>> {
            unimplemented!()
        }
        async fn chunks_pending_embedding(&self, _doc_id: &str) -> Result<Vec<Chunk>> {
            unimplemented!()
        }
        async fn mark_chunk_embedded(&self, _point_id: &str) -> Result<()> {
            unimplemented!()
        }
        async fn mark_chunk_failed(&self, _point_id: &str, _err: &str) -> Result<()> {
            unimplemented!()
        }
        async fn hydrate_point(&self, _point_id: &str) -> Result<Option<FullTextEntry>> {
            unimplemented!()
        }
        async fn hydrate_points(&self, _point_ids: &[String]) -> Result<Vec<FullTextEntry>> {
            unimplemented!()
        }
        async fn point_ids_for_document(&self, _doc_id: &str) -> Result<Vec<String>> {
            unimplemented!()
        }
        async fn point_ids_for_collection(&self, _collection_id: &str) -> Result<Vec<String>> {
            unimplemented!()
        }
        async fn keyword_search(&self, _collection_id: Option<&str>, _query: &str, _limit: u32) -> Result<Vec<KeywordHit>> {
            unimplemented!()
        }
        async fn upsert_sync_job(&self, job: &SyncJob) -> Result<()> {
            self.jobs.lock().unwrap().insert(job.doc_id.clone(), job.clone());
            Ok(())
        }
        async fn get_sync_job(&self, doc_id: &str) -> Result<Option<SyncJob>> {
            Ok(self.jobs.lock().unwrap().get(doc_id).cloned())
        }
        async fn list_non_terminal_sync_jobs(&self) -> Result<Vec<SyncJob>> {
            Ok(self
                .jobs
                .lock()
                .unwrap()
                .values()
                .filter(|j| !j.status.is_terminal())
                .cloned()
                .collect())
        }
        async fn cascade_delete_document(&self, _tx_id: &str, _doc_id: &str) -> Result<()> {
            unimplemented!()
        }
        async fn cascade_delete_collection(&self, _tx_id: &str, _collection_id: &str) -> Result<()> {
            unimplemented!()
        }
        async fn record_metric(&self, _name: &str, _value: f64, _labels_json: &str) -> Result<()> {
            Ok(())
        }
        async fn record_health(&self, _component: &str, _healthy: bool, _detail: &str) -> Result<()> {
            Ok(())
        }
    }

    fn machine() -> SyncStateMachine {
        SyncStateMachine::new(Arc::new(FakeStore::default()))
    }

    #[tokio::test]
    async fn happy_path_progresses_new_to_synced() {
        let m = machine();
        m.load_or_new("doc-1").await.unwrap();
        m.record_split_ok("doc-1").await.unwrap();
        m.record_embed_ok("doc-1").await.unwrap();
        let job = m.record_synced("doc-1").await.unwrap();
        assert_eq!(job.status, SyncStatus::Synced);
    }

    #[tokio::test]
    async fn out_of_order_transition_is_rejected() {
        let m = machine();
        m.load_or_new("doc-1").await.unwrap();
        let err = m.record_embed_ok("doc-1").await.unwrap_err();
        assert!(matches!(err, IngestError::Integrity(_)));
    }

    #[tokio::test]
    async fn fail_then_retry_then_resume() {
        let m = machine();
        m.load_or_new("doc-1").await.unwrap();
        m.record_split_ok("doc-1").await.unwrap();

        let failed = m
            .record_fail("doc-1", ErrorCategory::DependencyUnavailable, "qdrant down")
            .await
            .unwrap();
        assert_eq!(failed.status, SyncStatus::Failed);
        assert_eq!(failed.attempts, 1);

        let scheduler = RetryScheduler::new();
        let strategy = RetryStrategy {
            base_delay_ms: 1,
            max_delay_ms: 1,
            jitter: false,
            ..Default::default()
        };
        let callback: RetryCallback = Arc::new(|| Box::pin(async { Ok(()) }));
        let decision = m.arm_retry(&failed, strategy, &scheduler, callback).await.unwrap();
        assert!(matches!(decision, RetryDecision::Retry { .. }));

        let job = m.get_job("doc-1").await.unwrap().unwrap();
        assert_eq!(job.status, SyncStatus::Retrying);

        let resumed = m.record_retry_ok("doc-1", SyncStatus::SplitOk).await.unwrap();
        assert_eq!(resumed.status, SyncStatus::SplitOk);

        m.record_embed_ok("doc-1").await.unwrap();
        let job = m.record_synced("doc-1").await.unwrap();
        assert_eq!(job.status, SyncStatus::Synced);
    }

    #[tokio::test]
    async fn exhausted_retries_goes_dead() {
        let m = machine();
        m.load_or_new("doc-1").await.unwrap();
        let mut failed = m
            .record_fail("doc-1", ErrorCategory::Timeout, "slow")
            .await
            .unwrap();
        failed.attempts = 5;
        m.store.upsert_sync_job(&failed).await.unwrap();

        let scheduler = RetryScheduler::new();
        let strategy = RetryStrategy { max_retries: 5, ..Default::default() };
        let callback: RetryCallback = Arc::new(|| Box::pin(async { Ok(()) }));
        let decision = m.arm_retry(&failed, strategy, &scheduler, callback).await.unwrap();
        assert!(matches!(decision, RetryDecision::Dead));

        let job = m.get_job("doc-1").await.unwrap().unwrap();
        assert_eq!(job.status, SyncStatus::Dead);
    }

    #[tokio::test]
    async fn terminal_category_goes_dead_regardless_of_attempts() {
        let m = machine();
        m.load_or_new("doc-1").await.unwrap();
        let failed = m
            .record_fail("doc-1", ErrorCategory::InvalidInput, "bad content")
            .await
            .unwrap();

        let scheduler = RetryScheduler::new();
        let callback: RetryCallback = Arc::new(|| Box::pin(async { Ok(()) }));
        let decision = m
            .arm_retry(&failed, RetryStrategy::default(), &scheduler, callback)
            .await
            .unwrap();
        assert!(matches!(decision, RetryDecision::Dead));
    }

    #[tokio::test]
    async fn concurrent_lock_holders_serialize_on_the_same_doc() {
        let m = machine();
        let _guard = m.lock_doc("doc-1").await;
        let m = Arc::new(m);
        let m2 = Arc::clone(&m);
        let handle = tokio::spawn(async move {
            let _guard2 = m2.lock_doc("doc-1").await;
        });
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert!(!handle.is_finished());
        drop(_guard);
        handle.await.unwrap();
    }
}
