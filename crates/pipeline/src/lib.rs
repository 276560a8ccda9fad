//! Ties the storage, vector, embedding, splitting, and sync crates together
//! into the three operations the rest of the system calls: ingest/resync a
//! document (`IngestionCoordinator`), delete a document or collection
//! (`CascadeDeleter`), and search (`SearchOrchestrator`).

pub mod coordinator;
pub mod deleter;
pub mod search;

pub use coordinator::IngestionCoordinator;
pub use deleter::CascadeDeleter;
pub use search::{SearchOrchestrator, SortOrder};

use ingest_core::config::RateLimitKeyConfig;
use ingest_core::error::{ErrorCode, IngestError};
use ingest_core::types::ErrorCategory;
use ingest_ratelimit::{BucketConfig, RateLimiter};

/// Classifies an `IngestError` into the retry scheduler's `ErrorCategory`.
/// `NotFound`/`Conflict`/`Integrity` are never schedulable, so they fold into
/// `Terminal` alongside the catch-all `Internal` bucket.
pub(crate) fn classify_error(err: &IngestError) -> ErrorCategory {
    match err.code() {
        ErrorCode::Validation => ErrorCategory::InvalidInput,
        ErrorCode::RateLimited => ErrorCategory::RateLimited,
        ErrorCode::DependencyUnavailable => ErrorCategory::DependencyUnavailable,
        ErrorCode::Timeout => ErrorCategory::Timeout,
        ErrorCode::NotFound | ErrorCode::Conflict | ErrorCode::Integrity | ErrorCode::Internal => {
            ErrorCategory::Terminal
        }
    }
}

pub(crate) fn to_bucket(cfg: &RateLimitKeyConfig) -> BucketConfig {
    BucketConfig {
        max_tokens: cfg.max_tokens,
        refill_rate_per_sec: cfg.refill_rate_per_sec,
        enabled: cfg.enabled,
    }
}

/// Consumes one token from `key`, translating a denied bucket into
/// `IngestError::RateLimited` so callers can `?` straight through.
pub(crate) fn rate_gate(limiter: &RateLimiter, key: &str, cfg: BucketConfig) -> ingest_core::error::Result<()> {
    let status = limiter.consume(key, 1.0, cfg);
    if !status.allowed {
        return Err(IngestError::rate_limited(format!(
            "rate limit exceeded for '{key}', resets at {}",
            status.reset_at_ms
        )));
    }
    Ok(())
}
