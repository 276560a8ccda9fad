//! Application configuration.
//!
//! Configuration is layered: a `config.toml` file is the base, environment
//! variables prefixed `INGEST_` override individual fields (nested fields
//! use `__` as the path separator, e.g. `INGEST_QDRANT__URL`). The merged
//! result is validated once at startup; a missing required field or an
//! invalid value is a fatal bootstrap error (process exit code 1).

use crate::error::{IngestError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

pub const ENV_PREFIX: &str = "INGEST";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenAiConfig {
    pub base_url: String,
    pub api_key: String,
    pub model: String,
}

impl Default for OpenAiConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".to_string(),
            api_key: String::new(),
            model: "text-embedding-3-small".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    pub batch_size: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self { batch_size: 64 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QdrantConfig {
    pub url: String,
    pub collection: String,
    pub vector_size: u64,
}

impl Default for QdrantConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:6333".to_string(),
            collection: "ingest".to_string(),
            vector_size: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DbType {
    Sqlite,
    Postgres,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DbConfig {
    #[serde(rename = "type")]
    pub kind: DbType,
    pub path: Option<String>,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub database: Option<String>,
    pub ssl: Option<bool>,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            kind: DbType::Sqlite,
            path: Some("ingest.db".to_string()),
            host: None,
            port: None,
            username: None,
            password: None,
            database: None,
            ssl: None,
        }
    }
}

impl DbConfig {
    /// Builds the connection URL sqlx expects for the configured backend.
    pub fn connect_url(&self) -> Result<String> {
        match self.kind {
            DbType::Sqlite => {
                let path = self
                    .path
                    .as_deref()
                    .ok_or_else(|| IngestError::validation("db.path is required for sqlite"))?;
                Ok(format!("sqlite://{path}?mode=rwc"))
            }
            DbType::Postgres => {
                let host = self
                    .host
                    .as_deref()
                    .ok_or_else(|| IngestError::validation("db.host is required for postgres"))?;
                let port = self.port.unwrap_or(5432);
                let user = self.username.as_deref().unwrap_or("postgres");
                let password = self.password.as_deref().unwrap_or("");
                let database = self
                    .database
                    .as_deref()
                    .ok_or_else(|| IngestError::validation("db.database is required for postgres"))?;
                let sslmode = if self.ssl.unwrap_or(false) { "require" } else { "prefer" };
                Ok(format!(
                    "postgres://{user}:{password}@{host}:{port}/{database}?sslmode={sslmode}"
                ))
            }
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    pub port: u16,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self { port: 8080 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GcConfig {
    pub interval_hours: u64,
}

impl Default for GcConfig {
    fn default() -> Self {
        Self { interval_hours: 1 }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RetryStrategyConfig {
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub backoff_factor: f64,
    pub max_delay_ms: u64,
}

impl Default for RetryStrategyConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 1_000,
            backoff_factor: 2.0,
            max_delay_ms: 60_000,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RateLimitKeyConfig {
    pub max_tokens: f64,
    pub refill_rate_per_sec: f64,
    pub enabled: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    pub embedding: RateLimitKeyConfig,
    pub vector_upsert: RateLimitKeyConfig,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            embedding: RateLimitKeyConfig {
                max_tokens: 60.0,
                refill_rate_per_sec: 60.0 / 60.0,
                enabled: true,
            },
            vector_upsert: RateLimitKeyConfig {
                max_tokens: 300.0,
                refill_rate_per_sec: 300.0 / 60.0,
                enabled: true,
            },
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub openai: OpenAiConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub qdrant: QdrantConfig,
    #[serde(default)]
    pub db: DbConfig,
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub gc: GcConfig,
    #[serde(default)]
    pub retry: RetryStrategyConfig,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
}

impl AppConfig {
    /// Loads configuration from an optional file plus `INGEST_*` environment
    /// overrides, then validates the required fields.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(false));
        } else {
            builder = builder.add_source(config::File::with_name("config").required(false));
        }
        builder = builder.add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .separator("__")
                .try_parsing(true),
        );
        let raw = builder.build()?;
        let cfg: AppConfig = raw.try_deserialize()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn validate(&self) -> Result<()> {
        if self.qdrant.vector_size == 0 {
            return Err(IngestError::validation("qdrant.vectorSize is required and must be > 0"));
        }
        self.db.connect_url()?;
        Ok(())
    }

    /// A redacted clone suitable for logging at startup.
    pub fn redacted(&self) -> AppConfig {
        let mut clone = self.clone();
        if !clone.openai.api_key.is_empty() {
            clone.openai.api_key = "***".to_string();
        }
        if let Some(pw) = clone.db.password.as_mut() {
            *pw = "***".to_string();
        }
        clone
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_missing_vector_size() {
        let cfg = AppConfig::default();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn sqlite_connect_url() {
        let db = DbConfig::default();
        assert!(db.connect_url().unwrap().starts_with("sqlite://"));
    }

    #[test]
    fn postgres_requires_host() {
        let db = DbConfig {
            kind: DbType::Postgres,
            host: None,
            ..DbConfig::default()
        };
        assert!(db.connect_url().is_err());
    }

    #[test]
    fn redacts_secrets() {
        let mut cfg = AppConfig::default();
        cfg.openai.api_key = "sk-secret".to_string();
        let redacted = cfg.redacted();
        assert_eq!(redacted.openai.api_key, "***");
    }
}
