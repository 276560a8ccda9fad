//! `GET /health` — liveness only; the relational pool's own connection
//! check is what actually proves the database is reachable.

use crate::error::ApiResult;
use crate::state::AppState;
use crate::types::HealthDto;
use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use ingest_store::RelationalStore;
use std::sync::Arc;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new().route("/health", get(health))
}

async fn health(State(state): State<Arc<AppState>>) -> ApiResult<Json<HealthDto>> {
    state.store.ping().await?;
    Ok(Json(HealthDto {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
        uptime_seconds: state.start_time.elapsed().as_secs(),
    }))
}
