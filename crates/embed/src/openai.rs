//! OpenAI-compatible embeddings endpoint binding.

use crate::EmbeddingProvider;
use async_trait::async_trait;
use ingest_core::error::{IngestError, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenAiConfig {
    pub base_url: String,
    pub api_key: String,
    pub model: String,
    pub dimension: usize,
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingItem>,
}

#[derive(Deserialize)]
struct EmbeddingItem {
    embedding: Vec<f32>,
    index: usize,
}

#[derive(Deserialize)]
struct ErrorResponse {
    error: ErrorBody,
}

#[derive(Deserialize)]
struct ErrorBody {
    message: String,
    #[serde(default)]
    code: Option<String>,
}

pub struct OpenAiEmbeddingProvider {
    client: reqwest::Client,
    config: OpenAiConfig,
}

impl OpenAiEmbeddingProvider {
    pub fn new(config: OpenAiConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(IngestError::from)?;
        Ok(Self { client, config })
    }

    fn classify_status(&self, status: reqwest::StatusCode, body: &str) -> IngestError {
        let parsed: Option<ErrorResponse> = serde_json::from_str(body).ok();
        let message = parsed
            .as_ref()
            .map(|e| e.error.message.clone())
            .unwrap_or_else(|| body.to_string());
        let code = parsed.as_ref().and_then(|e| e.error.code.clone());

        if code.as_deref() == Some("insufficient_quota") {
            return IngestError::dependency_unavailable(format!("embedding quota exceeded: {message}"));
        }
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return IngestError::rate_limited(format!("embedding provider rate limited: {message}"));
        }
        if status.is_server_error() {
            return IngestError::dependency_unavailable(format!("embedding provider error: {message}"));
        }
        IngestError::validation(format!("embedding request rejected: {message}"))
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAiEmbeddingProvider {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let url = format!("{}/embeddings", self.config.base_url.trim_end_matches('/'));
        let request = EmbeddingRequest {
            model: &self.config.model,
            input: texts,
        };

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.config.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    IngestError::timeout(format!("embedding request timed out: {e}"))
                } else if e.is_connect() {
                    IngestError::dependency_unavailable(format!("embedding endpoint unreachable: {e}"))
                } else {
                    IngestError::from(e)
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(self.classify_status(status, &body));
        }

        let mut parsed: EmbeddingResponse = response.json().await.map_err(IngestError::from)?;
        parsed.data.sort_by_key(|item| item.index);
        Ok(parsed.data.into_iter().map(|item| item.embedding).collect())
    }

    fn model_name(&self) -> &str {
        &self.config.model
    }

    fn dimension(&self) -> usize {
        self.config.dimension
    }
}
