//! Search: a vector path (embed the query, ask the vector store for nearest
//! neighbours, hydrate each hit's full text from the relational store) and a
//! keyword path (skip embedding and the vector store entirely, go straight
//! to the relational store's full-text index). Both converge on the same
//! `SearchHit` shape and the same hydration helper.

use crate::{rate_gate, to_bucket};
use ingest_core::config::RateLimitConfig;
use ingest_core::error::{IngestError, Result};
use ingest_core::types::{FullTextEntry, Pagination, SearchHit};
use ingest_embed::EmbeddingProvider;
use ingest_ratelimit::RateLimiter;
use ingest_store::RelationalStore;
use ingest_vector::{VectorFilter, VectorSearchRequest, VectorStore};
use std::sync::Arc;

/// How `search_paginated` orders its hydrated candidate set. Keyword and
/// plain vector search always return results in score order; pagination
/// with an explicit field is only meaningful once a candidate pool has
/// already been hydrated client-side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    ScoreDesc,
    ScoreAsc,
    DocIdAsc,
    DocIdDesc,
}

/// Candidate pool size `search_paginated` pulls from the vector store before
/// sorting and slicing client-side, capped well above any single page so
/// sorting by a field other than score still sees a reasonable neighbourhood.
const CANDIDATE_POOL_LIMIT: u64 = 500;

pub struct SearchOrchestrator {
    store: Arc<dyn RelationalStore>,
    vectors: Arc<dyn VectorStore>,
    embedder: Arc<dyn EmbeddingProvider>,
    limiter: Arc<RateLimiter>,
    collection: String,
    rate_limits: RateLimitConfig,
}

impl SearchOrchestrator {
    pub fn new(
        store: Arc<dyn RelationalStore>,
        vectors: Arc<dyn VectorStore>,
        embedder: Arc<dyn EmbeddingProvider>,
        limiter: Arc<RateLimiter>,
        collection: impl Into<String>,
        rate_limits: RateLimitConfig,
    ) -> Self {
        Self {
            store,
            vectors,
            embedder,
            limiter,
            collection: collection.into(),
            rate_limits,
        }
    }

    /// Embeds `query_text` and returns the `limit` nearest chunks, optionally
    /// scoped to one collection.
    pub async fn search(&self, query_text: &str, collection_id: Option<&str>, limit: u64) -> Result<Vec<SearchHit>> {
        let vector = self.embed_query(query_text).await?;
        let hits = self
            .vectors
            .search(
                &self.collection,
                VectorSearchRequest {
                    vector,
                    limit,
                    filter: collection_id.map(|id| VectorFilter {
                        key: "collectionId".to_string(),
                        equals: id.to_string(),
                    }),
                },
            )
            .await?;

        let scores: Vec<(String, f32)> = hits.into_iter().map(|h| (h.id, h.score)).collect();
        let point_ids: Vec<String> = scores.iter().map(|(id, _)| id.clone()).collect();
        let entries = self.store.hydrate_points(&point_ids).await?;
        Ok(hydrate_hits(entries, &scores))
    }

    /// Like `search`, but pulls a larger candidate pool, orders it by `sort`,
    /// and slices out `(page, limit)` client-side rather than trusting the
    /// vector store's own ranking for anything but the default score order.
    pub async fn search_paginated(
        &self,
        query_text: &str,
        collection_id: Option<&str>,
        page: u32,
        limit: u32,
        sort: SortOrder,
    ) -> Result<(Vec<SearchHit>, Pagination)> {
        let mut candidates = self.search(query_text, collection_id, CANDIDATE_POOL_LIMIT).await?;
        sort_hits(&mut candidates, sort);

        let total = candidates.len() as u64;
        let pagination = Pagination::new(page, limit, total);
        let start = ((page.max(1) - 1) as usize) * (limit.max(1) as usize);
        let page_hits = candidates.into_iter().skip(start).take(limit.max(1) as usize).collect();
        Ok((page_hits, pagination))
    }

    /// Full-text search with no embedding, no rate-limited dependency, and
    /// no vector store round trip — a fallback path for when the embedding
    /// provider or the vector store is unavailable, or when exact keyword
    /// matches are what the caller actually wants.
    pub async fn search_keyword(&self, query_text: &str, collection_id: Option<&str>, limit: u32) -> Result<Vec<SearchHit>> {
        let hits = self.store.keyword_search(collection_id, query_text, limit).await?;
        let scores: Vec<(String, f32)> = hits.into_iter().map(|h| (h.point_id, h.score)).collect();
        let point_ids: Vec<String> = scores.iter().map(|(id, _)| id.clone()).collect();
        let entries = self.store.hydrate_points(&point_ids).await?;
        Ok(hydrate_hits(entries, &scores))
    }

    async fn embed_query(&self, query_text: &str) -> Result<Vec<f32>> {
        rate_gate(&self.limiter, "embedding", to_bucket(&self.rate_limits.embedding))?;
        let vectors = self.embedder.embed(&[query_text.to_string()]).await?;
        vectors
            .into_iter()
            .next()
            .ok_or_else(|| IngestError::internal("embedding provider returned no vector for the query"))
    }
}

/// Joins hydrated full-text rows back up with their scores, preserving the
/// original hit order (a point id that failed to hydrate — e.g. deleted
/// between the vector/FTS read and this join — is silently dropped).
fn hydrate_hits(entries: Vec<FullTextEntry>, scores: &[(String, f32)]) -> Vec<SearchHit> {
    scores
        .iter()
        .filter_map(|(point_id, score)| {
            entries.iter().find(|e| &e.point_id == point_id).map(|entry| SearchHit {
                point_id: entry.point_id.clone(),
                score: *score,
                content: entry.content.clone(),
                title_chain: entry.title_chain.clone(),
                doc_id: entry.doc_id.clone(),
                collection_id: entry.collection_id.clone(),
                chunk_index: entry.chunk_index,
            })
        })
        .collect()
}

fn sort_hits(hits: &mut [SearchHit], sort: SortOrder) {
    match sort {
        SortOrder::ScoreDesc => hits.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal)),
        SortOrder::ScoreAsc => hits.sort_by(|a, b| a.score.partial_cmp(&b.score).unwrap_or(std::cmp::Ordering::Equal)),
        SortOrder::DocIdAsc => hits.sort_by(|a, b| a.doc_id.cmp(&b.doc_id)),
        SortOrder::DocIdDesc => hits.sort_by(|a, b| b.doc_id.cmp(&a.doc_id)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use ingest_core::config::DbType;
    use ingest_core::id;
    use ingest_core::types::{Chunk, ChunkMeta, Collection, Document, DocumentStatus, EmbeddingStatus};
    use ingest_embed::FakeEmbeddingProvider;
    use ingest_store::SqlStore;
    use ingest_vector::{Distance, InMemoryVectorStore, VectorPoint};
    use std::collections::HashMap;

    async fn seeded_store_and_vectors() -> (Arc<SqlStore>, Arc<InMemoryVectorStore>, tempfile::TempDir, Document) {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite://{}?mode=rwc", dir.path().join("ingest.db").display());
        let store = SqlStore::connect(&url, DbType::Sqlite).await.unwrap();
        store.run_migrations().await.unwrap();

        let collection = Collection {
            id: "col_search".to_string(),
            name: "docs".to_string(),
            description: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            deleted: false,
        };
        store.insert_collection(&collection).await.unwrap();

        let content = "the quick brown fox jumps over the lazy dog";
        let document = Document {
            id: id::document_id(content.as_bytes()),
            collection_id: collection.id.clone(),
            key: "fox.txt".to_string(),
            name: "fox.txt".to_string(),
            mime: None,
            size_bytes: content.len() as u64,
            content_hash: id::content_hash(content.as_bytes()),
            created_at: Utc::now(),
            updated_at: Utc::now(),
            status: DocumentStatus::Synced,
        };
        store.insert_document(&document).await.unwrap();

        let point_id = id::point_id(&document.id, 0);
        let chunk = Chunk {
            point_id: point_id.clone(),
            doc_id: document.id.clone(),
            collection_id: collection.id.clone(),
            chunk_index: 0,
            title_chain: vec![],
            content: content.to_string(),
        };
        let meta = ChunkMeta {
            point_id: point_id.clone(),
            doc_id: document.id.clone(),
            collection_id: collection.id.clone(),
            chunk_index: 0,
            title_chain: vec![],
            content_hash: id::content_hash(content.as_bytes()),
            embedding_status: EmbeddingStatus::Completed,
            synced_at: Some(Utc::now()),
            error: None,
        };
        let fts = FullTextEntry {
            point_id: point_id.clone(),
            doc_id: document.id.clone(),
            collection_id: collection.id.clone(),
            chunk_index: 0,
            content: content.to_string(),
            title_chain: vec![],
        };
        store
            .txm
            .execute_in_transaction(|ctx| async move { store.upsert_chunk_bundle(&ctx.transaction_id, &chunk, &meta, &fts).await })
            .await
            .unwrap();

        let vectors = Arc::new(InMemoryVectorStore::new());
        vectors.ensure_collection("docs", 8, Distance::Cosine).await.unwrap();
        let embedder = FakeEmbeddingProvider::new(8);
        let vector = embedder.embed(&[content.to_string()]).await.unwrap().remove(0);
        vectors
            .upsert_points(
                "docs",
                vec![VectorPoint {
                    id: point_id,
                    vector,
                    payload: HashMap::new(),
                }],
            )
            .await
            .unwrap();

        (Arc::new(store), vectors, dir, document)
    }

    fn disabled_rate_limits() -> RateLimitConfig {
        let mut cfg = RateLimitConfig::default();
        cfg.embedding.enabled = false;
        cfg
    }

    #[tokio::test]
    async fn search_finds_the_seeded_chunk() {
        let (store, vectors, _dir, document) = seeded_store_and_vectors().await;
        let orchestrator = SearchOrchestrator::new(
            store as Arc<dyn RelationalStore>,
            vectors as Arc<dyn VectorStore>,
            Arc::new(FakeEmbeddingProvider::new(8)) as Arc<dyn EmbeddingProvider>,
            Arc::new(RateLimiter::default()),
            "docs",
            disabled_rate_limits(),
        );

        let hits = orchestrator
            .search("the quick brown fox jumps over the lazy dog", None, 10)
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].doc_id, document.id);
    }

    #[tokio::test]
    async fn search_keyword_bypasses_the_vector_store() {
        let (store, vectors, _dir, document) = seeded_store_and_vectors().await;
        let orchestrator = SearchOrchestrator::new(
            store as Arc<dyn RelationalStore>,
            vectors as Arc<dyn VectorStore>,
            Arc::new(FakeEmbeddingProvider::new(8)) as Arc<dyn EmbeddingProvider>,
            Arc::new(RateLimiter::default()),
            "docs",
            disabled_rate_limits(),
        );

        let hits = orchestrator.search_keyword("fox", None, 10).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].doc_id, document.id);
    }

    #[tokio::test]
    async fn search_paginated_slices_the_requested_page() {
        let (store, vectors, _dir, _document) = seeded_store_and_vectors().await;
        let orchestrator = SearchOrchestrator::new(
            store as Arc<dyn RelationalStore>,
            vectors as Arc<dyn VectorStore>,
            Arc::new(FakeEmbeddingProvider::new(8)) as Arc<dyn EmbeddingProvider>,
            Arc::new(RateLimiter::default()),
            "docs",
            disabled_rate_limits(),
        );

        let (hits, pagination) = orchestrator
            .search_paginated("fox", None, 1, 10, SortOrder::ScoreDesc)
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(pagination.total, 1);

        let (empty_page, _) = orchestrator
            .search_paginated("fox", None, 2, 10, SortOrder::ScoreDesc)
            .await
            .unwrap();
        assert!(empty_page.is_empty());
    }
}
