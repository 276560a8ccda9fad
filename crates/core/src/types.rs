//! Domain entities shared across the ingestion crates.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Collection {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted: bool,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DocumentStatus {
    New,
    Syncing,
    Synced,
    Failed,
}

impl DocumentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentStatus::New => "new",
            DocumentStatus::Syncing => "syncing",
            DocumentStatus::Synced => "synced",
            DocumentStatus::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Document {
    pub id: String,
    pub collection_id: String,
    /// Source locator the caller used to submit this document; stable across
    /// content-addressed replacement.
    pub key: String,
    pub name: String,
    pub mime: Option<String>,
    pub size_bytes: u64,
    pub content_hash: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub status: DocumentStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Chunk {
    pub point_id: String,
    pub doc_id: String,
    pub collection_id: String,
    pub chunk_index: u32,
    pub title_chain: Vec<String>,
    pub content: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingStatus {
    Pending,
    Completed,
    Failed,
}

impl EmbeddingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EmbeddingStatus::Pending => "pending",
            EmbeddingStatus::Completed => "completed",
            EmbeddingStatus::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChunkMeta {
    pub point_id: String,
    pub doc_id: String,
    pub collection_id: String,
    pub chunk_index: u32,
    pub title_chain: Vec<String>,
    pub content_hash: String,
    pub embedding_status: EmbeddingStatus,
    pub synced_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FullTextEntry {
    pub point_id: String,
    pub doc_id: String,
    pub collection_id: String,
    pub chunk_index: u32,
    pub content: String,
    pub title_chain: Vec<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SyncStatus {
    New,
    SplitOk,
    EmbedOk,
    Synced,
    Failed,
    Retrying,
    Dead,
}

impl SyncStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncStatus::New => "NEW",
            SyncStatus::SplitOk => "SPLIT_OK",
            SyncStatus::EmbedOk => "EMBED_OK",
            SyncStatus::Synced => "SYNCED",
            SyncStatus::Failed => "FAILED",
            SyncStatus::Retrying => "RETRYING",
            SyncStatus::Dead => "DEAD",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, SyncStatus::Synced | SyncStatus::Dead)
    }

    pub fn is_active(&self) -> bool {
        matches!(
            self,
            SyncStatus::New | SyncStatus::SplitOk | SyncStatus::EmbedOk | SyncStatus::Retrying
        )
    }
}

/// Error categories the retry scheduler and sync state machine classify
/// failures into. Only the first four are schedulable for retry.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    TransientNetwork,
    RateLimited,
    Timeout,
    DependencyUnavailable,
    InvalidInput,
    Terminal,
}

impl ErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::TransientNetwork => "transient_network",
            ErrorCategory::RateLimited => "rate_limited",
            ErrorCategory::Timeout => "timeout",
            ErrorCategory::DependencyUnavailable => "dependency_unavailable",
            ErrorCategory::InvalidInput => "invalid_input",
            ErrorCategory::Terminal => "terminal",
        }
    }

    pub fn is_schedulable(&self) -> bool {
        matches!(
            self,
            ErrorCategory::TransientNetwork
                | ErrorCategory::RateLimited
                | ErrorCategory::Timeout
                | ErrorCategory::DependencyUnavailable
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SyncJob {
    pub doc_id: String,
    pub status: SyncStatus,
    pub attempts: u32,
    pub last_error: Option<String>,
    pub error_category: Option<ErrorCategory>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Savepoint {
    pub id: String,
    pub transaction_id: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub metadata: Option<HashMap<String, String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Pagination {
    pub page: u32,
    pub limit: u32,
    pub total: u64,
    pub total_pages: u32,
    pub has_next: bool,
    pub has_prev: bool,
}

impl Pagination {
    pub fn new(page: u32, limit: u32, total: u64) -> Self {
        let limit = limit.max(1);
        let total_pages = ((total as f64) / (limit as f64)).ceil() as u32;
        let total_pages = total_pages.max(1);
        Self {
            page,
            limit,
            total,
            total_pages,
            has_next: page < total_pages,
            has_prev: page > 1,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchHit {
    pub point_id: String,
    pub score: f32,
    pub content: String,
    pub title_chain: Vec<String>,
    pub doc_id: String,
    pub collection_id: String,
    pub chunk_index: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SystemMetricSample {
    pub name: String,
    pub value: f64,
    pub recorded_at: Option<DateTime<Utc>>,
    pub labels: HashMap<String, String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pagination_math() {
        let p = Pagination::new(1, 10, 25);
        assert_eq!(p.total_pages, 3);
        assert!(p.has_next);
        assert!(!p.has_prev);

        let p = Pagination::new(3, 10, 25);
        assert!(!p.has_next);
        assert!(p.has_prev);

        let p = Pagination::new(1, 10, 0);
        assert_eq!(p.total_pages, 1);
        assert!(!p.has_next);
        assert!(!p.has_prev);
    }
}
