//! Text embedding provider.
//!
//! One trait, `EmbeddingProvider`, with a production binding over an
//! OpenAI-compatible HTTP endpoint and a deterministic in-memory fake used
//! by tests.

use async_trait::async_trait;
use ingest_core::error::Result;

pub mod fake;
pub mod openai;

pub use fake::FakeEmbeddingProvider;
pub use openai::{OpenAiConfig, OpenAiEmbeddingProvider};

/// Error categories an embedding call can fail with. The pipeline retries
/// `RateLimited`/`Transient`; `InvalidInput`/`QuotaExceeded`/`Terminal`
/// surface immediately.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmbedErrorKind {
    RateLimited,
    QuotaExceeded,
    InvalidInput,
    Transient,
    Terminal,
}

impl EmbedErrorKind {
    pub fn is_retriable(&self) -> bool {
        matches!(self, EmbedErrorKind::RateLimited | EmbedErrorKind::Transient)
    }
}

#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Embeds a batch of texts in one call, preserving input order.
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    fn model_name(&self) -> &str;
    fn dimension(&self) -> usize;
}
