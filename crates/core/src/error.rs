//! Error taxonomy for the ingestion system.

/// Result type alias for ingestion operations.
pub type Result<T> = std::result::Result<T, IngestError>;

/// The taxonomy code carried by every error, independent of its Rust variant.
///
/// HTTP status mapping and retry policy both key off this, not off the
/// variant itself, so callers outside this crate never need to match on
/// `IngestError` directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    Validation,
    NotFound,
    Conflict,
    RateLimited,
    DependencyUnavailable,
    Timeout,
    Integrity,
    Internal,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::Validation => "VALIDATION",
            ErrorCode::NotFound => "NOT_FOUND",
            ErrorCode::Conflict => "CONFLICT",
            ErrorCode::RateLimited => "RATE_LIMITED",
            ErrorCode::DependencyUnavailable => "DEPENDENCY_UNAVAILABLE",
            ErrorCode::Timeout => "TIMEOUT",
            ErrorCode::Integrity => "INTEGRITY",
            ErrorCode::Internal => "INTERNAL",
        }
    }

    /// Whether the ingestion pipeline may hand this off to the retry scheduler.
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            ErrorCode::RateLimited | ErrorCode::DependencyUnavailable | ErrorCode::Timeout
        )
    }
}

/// Main error type shared across the ingestion crates.
#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("not found: {resource} {id}")]
    NotFound { resource: String, id: String },

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("rate limited: {0}")]
    RateLimited(String),

    #[error("dependency unavailable: {0}")]
    DependencyUnavailable(String),

    #[error("operation timed out: {0}")]
    Timeout(String),

    #[error("invariant violated: {0}")]
    Integrity(String),

    #[error("internal error: {0}")]
    Internal(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("http client error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl IngestError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn not_found(resource: impl Into<String>, id: impl Into<String>) -> Self {
        Self::NotFound {
            resource: resource.into(),
            id: id.into(),
        }
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    pub fn rate_limited(msg: impl Into<String>) -> Self {
        Self::RateLimited(msg.into())
    }

    pub fn dependency_unavailable(msg: impl Into<String>) -> Self {
        Self::DependencyUnavailable(msg.into())
    }

    pub fn timeout(msg: impl Into<String>) -> Self {
        Self::Timeout(msg.into())
    }

    pub fn integrity(msg: impl Into<String>) -> Self {
        Self::Integrity(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Maps this error onto the taxonomy code used by HTTP status mapping
    /// and by the retry scheduler's classification step.
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Validation(_) => ErrorCode::Validation,
            Self::NotFound { .. } => ErrorCode::NotFound,
            Self::Conflict(_) => ErrorCode::Conflict,
            Self::RateLimited(_) => ErrorCode::RateLimited,
            Self::DependencyUnavailable(_) => ErrorCode::DependencyUnavailable,
            Self::Timeout(_) => ErrorCode::Timeout,
            Self::Integrity(_) => ErrorCode::Integrity,
            Self::Database(_) | Self::Migration(_) => ErrorCode::DependencyUnavailable,
            Self::Http(e) if e.is_timeout() => ErrorCode::Timeout,
            Self::Http(e) if e.is_connect() => ErrorCode::DependencyUnavailable,
            Self::Http(_) => ErrorCode::Internal,
            Self::Serialization(_) | Self::Config(_) | Self::Internal(_) | Self::Other(_) => {
                ErrorCode::Internal
            }
        }
    }
}
