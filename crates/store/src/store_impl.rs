//! `sqlx::Any`-backed implementation of [`RelationalStore`].
//!
//! One code path serves both sqlite and postgres: `sqlx::Any` rewrites bind
//! placeholders per backend, so every query below is written once with `?`
//! placeholders. The two backends disagree only on full-text search and on
//! the literal `CREATE TABLE` text for `chunks_fts`, both confined to
//! [`crate::schema`] and [`Self::keyword_search`].

use crate::relational::{DocListFilter, KeywordHit, PageRequest, RelationalStore};
use crate::schema::{self, MIGRATIONS};
use crate::txn::TransactionManager;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ingest_core::config::DbType;
use ingest_core::error::{IngestError, Result};
use ingest_core::types::{
    Chunk, ChunkMeta, Collection, Document, DocumentStatus, EmbeddingStatus, FullTextEntry,
    Pagination, SyncJob, SyncStatus,
};
use sqlx::any::{Any, AnyPoolOptions};
use sqlx::{Pool, Row};
use std::sync::Arc;

pub struct SqlStore {
    pool: Pool<Any>,
    pub txm: Arc<TransactionManager<Any>>,
    db_type: DbType,
}

impl SqlStore {
    pub async fn connect(connect_url: &str, db_type: DbType) -> Result<Self> {
        sqlx::any::install_default_drivers();
        let pool = AnyPoolOptions::new()
            .max_connections(10)
            .connect(connect_url)
            .await
            .map_err(IngestError::from)?;
        let txm = Arc::new(TransactionManager::new(pool.clone()));
        Ok(Self { pool, txm, db_type })
    }

    fn now_str() -> String {
        Utc::now().to_rfc3339()
    }

    fn parse_time(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s)
            .map(|d| d.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now())
    }

    async fn run_statement(&self, sql: &str) -> Result<()> {
        sqlx::query(sql).execute(&self.pool).await.map_err(IngestError::from)?;
        Ok(())
    }

    fn collection_from_row(row: &sqlx::any::AnyRow) -> Result<Collection> {
        Ok(Collection {
            id: row.try_get("id").map_err(IngestError::from)?,
            name: row.try_get("name").map_err(IngestError::from)?,
            description: row.try_get("description").ok(),
            created_at: Self::parse_time(&row.try_get::<String, _>("created_at").map_err(IngestError::from)?),
            updated_at: Self::parse_time(&row.try_get::<String, _>("updated_at").map_err(IngestError::from)?),
            deleted: row.try_get::<i64, _>("deleted").map_err(IngestError::from)? != 0,
        })
    }

    fn document_from_row(row: &sqlx::any::AnyRow) -> Result<Document> {
        let status = match row.try_get::<String, _>("status").map_err(IngestError::from)?.as_str() {
            "new" => DocumentStatus::New,
            "syncing" => DocumentStatus::Syncing,
            "synced" => DocumentStatus::Synced,
            _ => DocumentStatus::Failed,
        };
        Ok(Document {
            id: row.try_get("id").map_err(IngestError::from)?,
            collection_id: row.try_get("collection_id").map_err(IngestError::from)?,
            key: row.try_get("key").map_err(IngestError::from)?,
            name: row.try_get("name").map_err(IngestError::from)?,
            mime: row.try_get("mime").ok(),
            size_bytes: row.try_get::<i64, _>("size_bytes").map_err(IngestError::from)? as u64,
            content_hash: row.try_get("content_hash").map_err(IngestError::from)?,
            created_at: Self::parse_time(&row.try_get::<String, _>("created_at").map_err(IngestError::from)?),
            updated_at: Self::parse_time(&row.try_get::<String, _>("updated_at").map_err(IngestError::from)?),
            status,
        })
    }

    fn chunk_from_row(row: &sqlx::any::AnyRow) -> Result<Chunk> {
        let title_chain: String = row.try_get("title_chain").map_err(IngestError::from)?;
        Ok(Chunk {
            point_id: row.try_get("point_id").map_err(IngestError::from)?,
            doc_id: row.try_get("doc_id").map_err(IngestError::from)?,
            collection_id: row.try_get("collection_id").map_err(IngestError::from)?,
            chunk_index: row.try_get::<i64, _>("chunk_index").map_err(IngestError::from)? as u32,
            title_chain: split_title_chain(&title_chain),
            content: row.try_get("content").map_err(IngestError::from)?,
        })
    }

    fn chunk_meta_from_row(row: &sqlx::any::AnyRow) -> Result<ChunkMeta> {
        let title_chain: String = row.try_get("title_chain").map_err(IngestError::from)?;
        let embedding_status = match row
            .try_get::<String, _>("embedding_status")
            .map_err(IngestError::from)?
            .as_str()
        {
            "completed" => EmbeddingStatus::Completed,
            "failed" => EmbeddingStatus::Failed,
            _ => EmbeddingStatus::Pending,
        };
        let synced_at: Option<String> = row.try_get("synced_at").ok();
        Ok(ChunkMeta {
            point_id: row.try_get("point_id").map_err(IngestError::from)?,
            doc_id: row.try_get("doc_id").map_err(IngestError::from)?,
            collection_id: row.try_get("collection_id").map_err(IngestError::from)?,
            chunk_index: row.try_get::<i64, _>("chunk_index").map_err(IngestError::from)? as u32,
            title_chain: split_title_chain(&title_chain),
            content_hash: row.try_get("content_hash").map_err(IngestError::from)?,
            embedding_status,
            synced_at: synced_at.map(|s| Self::parse_time(&s)),
            error: row.try_get("error").ok(),
        })
    }

    fn sync_job_from_row(row: &sqlx::any::AnyRow) -> Result<SyncJob> {
        let status = match row.try_get::<String, _>("status").map_err(IngestError::from)?.as_str() {
            "NEW" => SyncStatus::New,
            "SPLIT_OK" => SyncStatus::SplitOk,
            "EMBED_OK" => SyncStatus::EmbedOk,
            "SYNCED" => SyncStatus::Synced,
            "RETRYING" => SyncStatus::Retrying,
            "DEAD" => SyncStatus::Dead,
            _ => SyncStatus::Failed,
        };
        Ok(SyncJob {
            doc_id: row.try_get("doc_id").map_err(IngestError::from)?,
            status,
            attempts: row.try_get::<i64, _>("attempts").map_err(IngestError::from)? as u32,
            last_error: row.try_get("last_error").ok(),
            error_category: row
                .try_get::<Option<String>, _>("error_category")
                .ok()
                .flatten()
                .and_then(|s| parse_error_category(&s)),
            created_at: Self::parse_time(&row.try_get::<String, _>("created_at").map_err(IngestError::from)?),
            updated_at: Self::parse_time(&row.try_get::<String, _>("updated_at").map_err(IngestError::from)?),
        })
    }
}

fn join_title_chain(chain: &[String]) -> String {
    chain.join("\u{1f}")
}

fn split_title_chain(s: &str) -> Vec<String> {
    if s.is_empty() {
        Vec::new()
    } else {
        s.split('\u{1f}').map(|s| s.to_string()).collect()
    }
}

fn parse_error_category(s: &str) -> Option<ingest_core::types::ErrorCategory> {
    use ingest_core::types::ErrorCategory::*;
    Some(match s {
        "transient_network" => TransientNetwork,
        "rate_limited" => RateLimited,
        "timeout" => Timeout,
        "dependency_unavailable" => DependencyUnavailable,
        "invalid_input" => InvalidInput,
        "terminal" => Terminal,
        _ => return None,
    })
}

#[async_trait]
impl RelationalStore for SqlStore {
    async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await.map_err(IngestError::from)?;
        Ok(())
    }

    async fn run_migrations(&self) -> Result<()> {
        self.run_statement(
            "CREATE TABLE IF NOT EXISTS migrations (id TEXT PRIMARY KEY, applied_at TEXT NOT NULL)",
        )
        .await?;

        for migration in MIGRATIONS {
            let already: Option<(String,)> =
                sqlx::query_as("SELECT id FROM migrations WHERE id = ?")
                    .bind(migration.version)
                    .fetch_optional(&self.pool)
                    .await
                    .map_err(IngestError::from)?;
            if already.is_some() {
                continue;
            }

            let mut tx = self.pool.begin().await.map_err(IngestError::from)?;
            let script = schema::migration_sql(migration, self.db_type);
            for statement in script.split(';') {
                let statement = statement.trim();
                if statement.is_empty() {
                    continue;
                }
                sqlx::query(statement)
                    .execute(&mut *tx)
                    .await
                    .map_err(IngestError::from)?;
            }
            sqlx::query("INSERT INTO migrations (id, applied_at) VALUES (?, ?)")
                .bind(migration.version)
                .bind(Self::now_str())
                .execute(&mut *tx)
                .await
                .map_err(IngestError::from)?;
            tx.commit().await.map_err(IngestError::from)?;
            tracing::info!(version = migration.version, "applied migration");
        }
        Ok(())
    }

    async fn insert_collection(&self, collection: &Collection) -> Result<()> {
        let existing = self.get_collection_by_name(&collection.name).await?;
        if existing.is_some() {
            return Err(IngestError::conflict(format!(
                "collection name '{}' already in use",
                collection.name
            )));
        }
        sqlx::query(
            "INSERT INTO collections (id, name, name_lower, description, created_at, updated_at, deleted) \
             VALUES (?, ?, ?, ?, ?, ?, 0)",
        )
        .bind(&collection.id)
        .bind(&collection.name)
        .bind(collection.name.to_lowercase())
        .bind(&collection.description)
        .bind(collection.created_at.to_rfc3339())
        .bind(collection.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(IngestError::from)?;
        Ok(())
    }

    async fn get_collection(&self, id: &str) -> Result<Option<Collection>> {
        let row = sqlx::query("SELECT * FROM collections WHERE id = ? AND deleted = 0")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(IngestError::from)?;
        row.as_ref().map(Self::collection_from_row).transpose()
    }

    async fn get_collection_by_name(&self, name: &str) -> Result<Option<Collection>> {
        let row = sqlx::query("SELECT * FROM collections WHERE name_lower = ? AND deleted = 0")
            .bind(name.to_lowercase())
            .fetch_optional(&self.pool)
            .await
            .map_err(IngestError::from)?;
        row.as_ref().map(Self::collection_from_row).transpose()
    }

    async fn list_collections(&self, page: PageRequest) -> Result<(Vec<Collection>, Pagination)> {
        let total: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM collections WHERE deleted = 0")
                .fetch_one(&self.pool)
                .await
                .map_err(IngestError::from)?;
        let offset = (page.page.saturating_sub(1)) as i64 * page.limit as i64;
        let rows = sqlx::query(
            "SELECT * FROM collections WHERE deleted = 0 ORDER BY created_at DESC LIMIT ? OFFSET ?",
        )
        .bind(page.limit as i64)
        .bind(offset)
        .fetch_all(&self.pool)
        .await
        .map_err(IngestError::from)?;
        let items = rows.iter().map(Self::collection_from_row).collect::<Result<Vec<_>>>()?;
        Ok((items, Pagination::new(page.page, page.limit, total as u64)))
    }

    async fn update_collection(&self, collection: &Collection) -> Result<()> {
        if let Some(existing) = self.get_collection_by_name(&collection.name).await? {
            if existing.id != collection.id {
                return Err(IngestError::conflict(format!(
                    "collection name '{}' already in use",
                    collection.name
                )));
            }
        }
        sqlx::query("UPDATE collections SET name = ?, name_lower = ?, description = ?, updated_at = ? WHERE id = ?")
            .bind(&collection.name)
            .bind(collection.name.to_lowercase())
            .bind(&collection.description)
            .bind(Self::now_str())
            .bind(&collection.id)
            .execute(&self.pool)
            .await
            .map_err(IngestError::from)?;
        Ok(())
    }

    async fn soft_delete_collection(&self, id: &str) -> Result<()> {
        sqlx::query("UPDATE collections SET deleted = 1, updated_at = ? WHERE id = ?")
            .bind(Self::now_str())
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(IngestError::from)?;
        Ok(())
    }

    async fn insert_document(&self, document: &Document) -> Result<()> {
        sqlx::query(
            "INSERT INTO docs (id, collection_id, key, name, mime, size_bytes, content_hash, created_at, updated_at, status, deleted) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 0)",
        )
        .bind(&document.id)
        .bind(&document.collection_id)
        .bind(&document.key)
        .bind(&document.name)
        .bind(&document.mime)
        .bind(document.size_bytes as i64)
        .bind(&document.content_hash)
        .bind(document.created_at.to_rfc3339())
        .bind(document.updated_at.to_rfc3339())
        .bind(document.status.as_str())
        .execute(&self.pool)
        .await
        .map_err(IngestError::from)?;
        Ok(())
    }

    async fn get_document(&self, id: &str) -> Result<Option<Document>> {
        let row = sqlx::query("SELECT * FROM docs WHERE id = ? AND deleted = 0")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(IngestError::from)?;
        row.as_ref().map(Self::document_from_row).transpose()
    }

    async fn get_document_by_key(&self, collection_id: &str, key: &str) -> Result<Option<Document>> {
        let row = sqlx::query("SELECT * FROM docs WHERE collection_id = ? AND key = ? AND deleted = 0")
            .bind(collection_id)
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(IngestError::from)?;
        row.as_ref().map(Self::document_from_row).transpose()
    }

    async fn list_documents(
        &self,
        filter: DocListFilter,
        page: PageRequest,
    ) -> Result<(Vec<Document>, Pagination)> {
        let mut where_clauses = vec!["deleted = 0".to_string()];
        if filter.collection_id.is_some() {
            where_clauses.push("collection_id = ?".to_string());
        }
        if filter.status.is_some() {
            where_clauses.push("status = ?".to_string());
        }
        if filter.search.is_some() {
            where_clauses.push("name LIKE ?".to_string());
        }
        let where_sql = where_clauses.join(" AND ");

        let count_sql = format!("SELECT COUNT(*) FROM docs WHERE {where_sql}");
        let mut count_query = sqlx::query_scalar(&count_sql);
        if let Some(c) = &filter.collection_id {
            count_query = count_query.bind(c.clone());
        }
        if let Some(s) = &filter.status {
            count_query = count_query.bind(s.clone());
        }
        if let Some(s) = &filter.search {
            count_query = count_query.bind(format!("%{s}%"));
        }
        let total: i64 = count_query.fetch_one(&self.pool).await.map_err(IngestError::from)?;

        let offset = (page.page.saturating_sub(1)) as i64 * page.limit as i64;
        let list_sql = format!(
            "SELECT * FROM docs WHERE {where_sql} ORDER BY created_at DESC LIMIT ? OFFSET ?"
        );
        let mut list_query = sqlx::query(&list_sql);
        if let Some(c) = &filter.collection_id {
            list_query = list_query.bind(c.clone());
        }
        if let Some(s) = &filter.status {
            list_query = list_query.bind(s.clone());
        }
        if let Some(s) = &filter.search {
            list_query = list_query.bind(format!("%{s}%"));
        }
        list_query = list_query.bind(page.limit as i64).bind(offset);
        let rows = list_query.fetch_all(&self.pool).await.map_err(IngestError::from)?;
        let items = rows.iter().map(Self::document_from_row).collect::<Result<Vec<_>>>()?;
        Ok((items, Pagination::new(page.page, page.limit, total as u64)))
    }

    async fn update_document_status(&self, id: &str, status: &str) -> Result<()> {
        sqlx::query("UPDATE docs SET status = ?, updated_at = ? WHERE id = ?")
            .bind(status)
            .bind(Self::now_str())
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(IngestError::from)?;
        Ok(())
    }

    async fn update_document_metadata(&self, document: &Document) -> Result<()> {
        sqlx::query("UPDATE docs SET name = ?, mime = ?, updated_at = ? WHERE id = ?")
            .bind(&document.name)
            .bind(&document.mime)
            .bind(Self::now_str())
            .bind(&document.id)
            .execute(&self.pool)
            .await
            .map_err(IngestError::from)?;
        Ok(())
    }

    async fn delete_document(&self, id: &str) -> Result<()> {
        sqlx::query("UPDATE docs SET deleted = 1, updated_at = ? WHERE id = ?")
            .bind(Self::now_str())
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(IngestError::from)?;
        Ok(())
    }

    async fn upsert_chunk_bundle(
        &self,
        tx_id: &str,
        chunk: &Chunk,
        meta: &ChunkMeta,
        fts: &FullTextEntry,
    ) -> Result<()> {
        let chunk = chunk.clone();
        let meta = meta.clone();
        let fts = fts.clone();
        self.txm
            .with_root_connection(tx_id, move |conn| {
                Box::pin(async move {
                    sqlx::query(
                        "INSERT INTO chunks (point_id, doc_id, collection_id, chunk_index, title_chain, content) \
                         VALUES (?, ?, ?, ?, ?, ?) \
                         ON CONFLICT(point_id) DO UPDATE SET content = excluded.content, title_chain = excluded.title_chain",
                    )
                    .bind(&chunk.point_id)
                    .bind(&chunk.doc_id)
                    .bind(&chunk.collection_id)
                    .bind(chunk.chunk_index as i64)
                    .bind(join_title_chain(&chunk.title_chain))
                    .bind(&chunk.content)
                    .execute(&mut **conn)
                    .await
                    .map_err(IngestError::from)?;

                    sqlx::query(
                        "INSERT INTO chunk_meta (point_id, doc_id, collection_id, chunk_index, title_chain, content_hash, embedding_status, synced_at, error) \
                         VALUES (?, ?, ?, ?, ?, ?, ?, NULL, NULL) \
                         ON CONFLICT(point_id) DO UPDATE SET content_hash = excluded.content_hash",
                    )
                    .bind(&meta.point_id)
                    .bind(&meta.doc_id)
                    .bind(&meta.collection_id)
                    .bind(meta.chunk_index as i64)
                    .bind(join_title_chain(&meta.title_chain))
                    .bind(&meta.content_hash)
                    .bind(meta.embedding_status.as_str())
                    .execute(&mut **conn)
                    .await
                    .map_err(IngestError::from)?;

                    sqlx::query(
                        "INSERT INTO chunks_fts (point_id, content, title_chain) VALUES (?, ?, ?) \
                         ON CONFLICT(point_id) DO UPDATE SET content = excluded.content",
                    )
                    .bind(&fts.point_id)
                    .bind(&fts.content)
                    .bind(join_title_chain(&fts.title_chain))
                    .execute(&mut **conn)
                    .await
                    .map_err(IngestError::from)?;

                    Ok(())
                })
            })
            .await?;
        self.txm.record_op(tx_id, format!("upsert_chunk_bundle({})", chunk.point_id));
        Ok(())
    }

    async fn list_chunks(&self, doc_id: &str) -> Result<Vec<Chunk>> {
        let rows = sqlx::query("SELECT * FROM chunks WHERE doc_id = ? ORDER BY chunk_index ASC")
            .bind(doc_id)
            .fetch_all(&self.pool)
            .await
            .map_err(IngestError::from)?;
        rows.iter().map(Self::chunk_from_row).collect()
    }

    async fn list_chunk_meta(&self, doc_id: &str) -> Result<Vec<ChunkMeta>> {
        let rows = sqlx::query("SELECT * FROM chunk_meta WHERE doc_id = ? ORDER BY chunk_index ASC")
            .bind(doc_id)
            .fetch_all(&self.pool)
            .await
            .map_err(IngestError::from)?;
        rows.iter().map(Self::chunk_meta_from_row).collect()
    }

    async fn chunks_pending_embedding(&self, doc_id: &str) -> Result<Vec<Chunk>> {
        let rows = sqlx::query(
            "SELECT c.* FROM chunks c JOIN chunk_meta m ON m.point_id = c.point_id \
             WHERE c.doc_id = ? AND m.embedding_status != 'completed' ORDER BY c.chunk_index ASC",
        )
        .bind(doc_id)
        .fetch_all(&self.pool)
        .await
        .map_err(IngestError::from)?;
        rows.iter().map(Self::chunk_from_row).collect()
    }

    async fn mark_chunk_embedded(&self, point_id: &str) -> Result<()> {
        sqlx::query("UPDATE chunk_meta SET embedding_status = 'completed', synced_at = ?, error = NULL WHERE point_id = ?")
            .bind(Self::now_str())
            .bind(point_id)
            .execute(&self.pool)
            .await
            .map_err(IngestError::from)?;
        Ok(())
    }

    async fn mark_chunk_failed(&self, point_id: &str, error: &str) -> Result<()> {
        sqlx::query("UPDATE chunk_meta SET embedding_status = 'failed', error = ? WHERE point_id = ?")
            .bind(error)
            .bind(point_id)
            .execute(&self.pool)
            .await
            .map_err(IngestError::from)?;
        Ok(())
    }

    async fn hydrate_point(&self, point_id: &str) -> Result<Option<FullTextEntry>> {
        let row = sqlx::query(
            "SELECT f.point_id AS point_id, f.content AS content, f.title_chain AS title_chain, \
             c.doc_id AS doc_id, c.collection_id AS collection_id, c.chunk_index AS chunk_index \
             FROM chunks_fts f JOIN chunks c ON c.point_id = f.point_id WHERE f.point_id = ?",
        )
        .bind(point_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(IngestError::from)?;
        row.map(|r| {
            let title_chain: String = r.try_get("title_chain").map_err(IngestError::from)?;
            let chunk_index: i64 = r.try_get("chunk_index").map_err(IngestError::from)?;
            Ok(FullTextEntry {
                point_id: r.try_get("point_id").map_err(IngestError::from)?,
                doc_id: r.try_get("doc_id").map_err(IngestError::from)?,
                collection_id: r.try_get("collection_id").map_err(IngestError::from)?,
                chunk_index: chunk_index as u32,
                content: r.try_get("content").map_err(IngestError::from)?,
                title_chain: split_title_chain(&title_chain),
            })
        })
        .transpose()
    }

    async fn hydrate_points(&self, point_ids: &[String]) -> Result<Vec<FullTextEntry>> {
        let mut out = Vec::with_capacity(point_ids.len());
        for id in point_ids {
            if let Some(entry) = self.hydrate_point(id).await? {
                out.push(entry);
            }
        }
        Ok(out)
    }

    async fn point_ids_for_document(&self, doc_id: &str) -> Result<Vec<String>> {
        let rows: Vec<(String,)> = sqlx::query_as("SELECT point_id FROM chunks WHERE doc_id = ?")
            .bind(doc_id)
            .fetch_all(&self.pool)
            .await
            .map_err(IngestError::from)?;
        Ok(rows.into_iter().map(|(id,)| id).collect())
    }

    async fn point_ids_for_collection(&self, collection_id: &str) -> Result<Vec<String>> {
        let rows: Vec<(String,)> = sqlx::query_as("SELECT point_id FROM chunks WHERE collection_id = ?")
            .bind(collection_id)
            .fetch_all(&self.pool)
            .await
            .map_err(IngestError::from)?;
        Ok(rows.into_iter().map(|(id,)| id).collect())
    }

    async fn keyword_search(
        &self,
        collection_id: Option<&str>,
        query_text: &str,
        limit: u32,
    ) -> Result<Vec<KeywordHit>> {
        let rows = match self.db_type {
            DbType::Sqlite => {
                let sql = if collection_id.is_some() {
                    "SELECT f.point_id AS point_id, bm25(chunks_fts) AS score FROM chunks_fts f \
                     JOIN chunks c ON c.point_id = f.point_id \
                     WHERE chunks_fts MATCH ? AND c.collection_id = ? ORDER BY score LIMIT ?"
                } else {
                    "SELECT f.point_id AS point_id, bm25(chunks_fts) AS score FROM chunks_fts f \
                     WHERE chunks_fts MATCH ? ORDER BY score LIMIT ?"
                };
                let mut q = sqlx::query(sql).bind(query_text);
                if let Some(cid) = collection_id {
                    q = q.bind(cid);
                }
                q.bind(limit as i64).fetch_all(&self.pool).await.map_err(IngestError::from)?
            }
            DbType::Postgres => {
                let sql = if collection_id.is_some() {
                    "SELECT f.point_id AS point_id, ts_rank(f.tsv, plainto_tsquery('english', ?)) AS score \
                     FROM chunks_fts f JOIN chunks c ON c.point_id = f.point_id \
                     WHERE f.tsv @@ plainto_tsquery('english', ?) AND c.collection_id = ? \
                     ORDER BY score DESC LIMIT ?"
                } else {
                    "SELECT f.point_id AS point_id, ts_rank(f.tsv, plainto_tsquery('english', ?)) AS score \
                     FROM chunks_fts f WHERE f.tsv @@ plainto_tsquery('english', ?) ORDER BY score DESC LIMIT ?"
                };
                let mut q = sqlx::query(sql).bind(query_text).bind(query_text);
                if let Some(cid) = collection_id {
                    q = q.bind(cid);
                }
                q.bind(limit as i64).fetch_all(&self.pool).await.map_err(IngestError::from)?
            }
        };
        rows.iter()
            .map(|r| {
                Ok(KeywordHit {
                    point_id: r.try_get("point_id").map_err(IngestError::from)?,
                    score: r.try_get::<f64, _>("score").map_err(IngestError::from)? as f32,
                })
            })
            .collect()
    }

    async fn upsert_sync_job(&self, job: &SyncJob) -> Result<()> {
        sqlx::query(
            "INSERT INTO sync_jobs (doc_id, status, attempts, last_error, error_category, created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?) \
             ON CONFLICT(doc_id) DO UPDATE SET status = excluded.status, attempts = excluded.attempts, \
             last_error = excluded.last_error, error_category = excluded.error_category, updated_at = excluded.updated_at",
        )
        .bind(&job.doc_id)
        .bind(job.status.as_str())
        .bind(job.attempts as i64)
        .bind(&job.last_error)
        .bind(job.error_category.map(|c| c.as_str()))
        .bind(job.created_at.to_rfc3339())
        .bind(job.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(IngestError::from)?;
        Ok(())
    }

    async fn get_sync_job(&self, doc_id: &str) -> Result<Option<SyncJob>> {
        let row = sqlx::query("SELECT * FROM sync_jobs WHERE doc_id = ?")
            .bind(doc_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(IngestError::from)?;
        row.as_ref().map(Self::sync_job_from_row).transpose()
    }

    async fn list_non_terminal_sync_jobs(&self) -> Result<Vec<SyncJob>> {
        let rows = sqlx::query("SELECT * FROM sync_jobs WHERE status NOT IN ('SYNCED', 'DEAD')")
            .fetch_all(&self.pool)
            .await
            .map_err(IngestError::from)?;
        rows.iter().map(Self::sync_job_from_row).collect()
    }

    async fn cascade_delete_document(&self, tx_id: &str, doc_id: &str) -> Result<()> {
        let doc_id_owned = doc_id.to_string();
        self.txm
            .with_root_connection(tx_id, move |conn| {
                Box::pin(async move {
                    sqlx::query(
                        "DELETE FROM chunks_fts WHERE point_id IN (SELECT point_id FROM chunks WHERE doc_id = ?)",
                    )
                    .bind(&doc_id_owned)
                    .execute(&mut **conn)
                    .await
                    .map_err(IngestError::from)?;
                    sqlx::query("DELETE FROM chunk_meta WHERE doc_id = ?")
                        .bind(&doc_id_owned)
                        .execute(&mut **conn)
                        .await
                        .map_err(IngestError::from)?;
                    sqlx::query("DELETE FROM chunks WHERE doc_id = ?")
                        .bind(&doc_id_owned)
                        .execute(&mut **conn)
                        .await
                        .map_err(IngestError::from)?;
                    sqlx::query("DELETE FROM sync_jobs WHERE doc_id = ?")
                        .bind(&doc_id_owned)
                        .execute(&mut **conn)
                        .await
                        .map_err(IngestError::from)?;
                    sqlx::query("DELETE FROM docs WHERE id = ?")
                        .bind(&doc_id_owned)
                        .execute(&mut **conn)
                        .await
                        .map_err(IngestError::from)?;
                    Ok(())
                })
            })
            .await?;
        self.txm.record_op(tx_id, format!("cascade_delete_document({doc_id})"));
        Ok(())
    }

    async fn cascade_delete_collection(&self, tx_id: &str, collection_id: &str) -> Result<()> {
        let collection_id_owned = collection_id.to_string();
        self.txm
            .with_root_connection(tx_id, move |conn| {
                Box::pin(async move {
                    sqlx::query(
                        "DELETE FROM chunks_fts WHERE point_id IN (SELECT point_id FROM chunks WHERE collection_id = ?)",
                    )
                    .bind(&collection_id_owned)
                    .execute(&mut **conn)
                    .await
                    .map_err(IngestError::from)?;
                    sqlx::query("DELETE FROM chunk_meta WHERE collection_id = ?")
                        .bind(&collection_id_owned)
                        .execute(&mut **conn)
                        .await
                        .map_err(IngestError::from)?;
                    sqlx::query("DELETE FROM chunks WHERE collection_id = ?")
                        .bind(&collection_id_owned)
                        .execute(&mut **conn)
                        .await
                        .map_err(IngestError::from)?;
                    sqlx::query(
                        "DELETE FROM sync_jobs WHERE doc_id IN (SELECT id FROM docs WHERE collection_id = ?)",
                    )
                    .bind(&collection_id_owned)
                    .execute(&mut **conn)
                    .await
                    .map_err(IngestError::from)?;
                    sqlx::query("DELETE FROM docs WHERE collection_id = ?")
                        .bind(&collection_id_owned)
                        .execute(&mut **conn)
                        .await
                        .map_err(IngestError::from)?;
                    sqlx::query("UPDATE collections SET deleted = 1 WHERE id = ?")
                        .bind(&collection_id_owned)
                        .execute(&mut **conn)
                        .await
                        .map_err(IngestError::from)?;
                    Ok(())
                })
            })
            .await?;
        self.txm
            .record_op(tx_id, format!("cascade_delete_collection({collection_id})"));
        Ok(())
    }

    async fn record_metric(&self, name: &str, value: f64, labels_json: &str) -> Result<()> {
        sqlx::query("INSERT INTO system_metrics (name, value, labels, recorded_at) VALUES (?, ?, ?, ?)")
            .bind(name)
            .bind(value)
            .bind(labels_json)
            .bind(Self::now_str())
            .execute(&self.pool)
            .await
            .map_err(IngestError::from)?;
        Ok(())
    }

    async fn record_health(&self, component: &str, healthy: bool, detail: &str) -> Result<()> {
        sqlx::query("INSERT INTO system_health (component, healthy, detail, recorded_at) VALUES (?, ?, ?, ?)")
            .bind(component)
            .bind(if healthy { 1_i64 } else { 0_i64 })
            .bind(detail)
            .bind(Self::now_str())
            .execute(&self.pool)
            .await
            .map_err(IngestError::from)?;
        Ok(())
    }
}
