//! `ingestd` — the document ingestion/retrieval service binary. Wires the
//! pipeline crates together from `AppConfig` and serves the HTTP surface in
//! `ingest_api::build_router`.

use clap::Parser;
use ingest_api::state::AppState;
use ingest_core::config::AppConfig;
use ingest_core::error::{IngestError, Result};
use ingest_embed::{EmbeddingProvider, OpenAiConfig as EmbedOpenAiConfig, OpenAiEmbeddingProvider};
use ingest_pipeline::{CascadeDeleter, IngestionCoordinator, SearchOrchestrator};
use ingest_ratelimit::RateLimiter;
use ingest_split::SplitOptions;
use ingest_store::{RelationalStore, SqlStore};
use ingest_sync::{RetryScheduler, RetryStrategy, SyncStateMachine};
use ingest_vector::{Distance, QdrantConfig, QdrantVectorStore, VectorStore};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "ingestd")]
#[command(about = "Document ingestion and retrieval service", long_about = None)]
#[command(version)]
struct Cli {
    /// Path to a config.toml file; falls back to ./config.toml then env vars.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Enable debug-level logging regardless of RUST_LOG.
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match run(cli.config).await {
        Ok(()) => ExitCode::from(0),
        Err(err) => {
            error!(error = %err, "fatal bootstrap error");
            ExitCode::from(1)
        }
    }
}

async fn run(config_path: Option<PathBuf>) -> Result<()> {
    let config = AppConfig::load(config_path.as_deref())?;
    info!(config = ?config.redacted(), "resolved configuration");

    let state = bootstrap(&config).await?;
    let router = ingest_api::build_router(state);

    let addr = format!("0.0.0.0:{}", config.api.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| IngestError::internal(format!("failed to bind {addr}: {e}")))?;
    info!(%addr, "ingestd listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| IngestError::internal(format!("server error: {e}")))?;

    info!("drained in-flight requests, exiting");
    Ok(())
}

async fn bootstrap(config: &AppConfig) -> Result<Arc<AppState>> {
    let connect_url = config.db.connect_url()?;
    let store = Arc::new(SqlStore::connect(&connect_url, config.db.kind).await?);
    store.run_migrations().await?;

    let vectors: Arc<dyn VectorStore> = Arc::new(QdrantVectorStore::connect(QdrantConfig {
        url: config.qdrant.url.clone(),
        api_key: None,
        timeout: Duration::from_secs(10),
    })?);
    vectors
        .ensure_collection(&config.qdrant.collection, config.qdrant.vector_size, Distance::Cosine)
        .await?;
    let info = vectors.collection_info(&config.qdrant.collection).await?;
    if info.vector_size != 0 && info.vector_size != config.qdrant.vector_size {
        return Err(IngestError::validation(format!(
            "qdrant collection '{}' has vector size {} but config requests {}",
            config.qdrant.collection, info.vector_size, config.qdrant.vector_size
        )));
    }

    let embedder: Arc<dyn EmbeddingProvider> = Arc::new(OpenAiEmbeddingProvider::new(EmbedOpenAiConfig {
        base_url: config.openai.base_url.clone(),
        api_key: config.openai.api_key.clone(),
        model: config.openai.model.clone(),
        dimension: config.qdrant.vector_size as usize,
    })?);

    let limiter = Arc::new(RateLimiter::default());
    let sync = Arc::new(SyncStateMachine::new(Arc::clone(&store) as Arc<dyn ingest_store::RelationalStore>));
    let retry = Arc::new(RetryScheduler::new());
    let deleter = Arc::new(CascadeDeleter::new(
        Arc::clone(&store),
        Arc::clone(&vectors),
        Arc::clone(&limiter),
        config.qdrant.collection.clone(),
        config.rate_limit.clone(),
    ));

    let retry_strategy = RetryStrategy {
        max_retries: config.retry.max_retries,
        base_delay_ms: config.retry.base_delay_ms,
        backoff_factor: config.retry.backoff_factor,
        max_delay_ms: config.retry.max_delay_ms,
        jitter: true,
    };

    let coordinator = Arc::new(IngestionCoordinator::new(
        Arc::clone(&store),
        Arc::clone(&vectors),
        embedder,
        sync,
        retry,
        Arc::clone(&limiter),
        Arc::clone(&deleter),
        config.qdrant.collection.clone(),
        SplitOptions::default(),
        config.embedding.batch_size,
        retry_strategy,
        config.rate_limit.clone(),
    ));

    let search = Arc::new(SearchOrchestrator::new(
        Arc::clone(&store) as Arc<dyn ingest_store::RelationalStore>,
        vectors,
        Arc::new(OpenAiEmbeddingProvider::new(EmbedOpenAiConfig {
            base_url: config.openai.base_url.clone(),
            api_key: config.openai.api_key.clone(),
            model: config.openai.model.clone(),
            dimension: config.qdrant.vector_size as usize,
        })?) as Arc<dyn EmbeddingProvider>,
        limiter,
        config.qdrant.collection.clone(),
        config.rate_limit.clone(),
    ));

    Ok(Arc::new(AppState { store, coordinator, deleter, search, start_time: Instant::now() }))
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("shutdown signal received, draining in-flight requests");
}

fn init_logging(verbose: bool) {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = if verbose {
        EnvFilter::new("ingest_api=debug,ingest_pipeline=debug,info")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("ingest_api=info,ingest_pipeline=info,warn"))
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();
}
