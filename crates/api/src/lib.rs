//! The HTTP service layer: an axum router over the pipeline's three entry
//! points (`IngestionCoordinator`, `CascadeDeleter`, `SearchOrchestrator`).
//! This crate never reaches into the store/vector/embed crates directly; it
//! only holds the public structs `ingest-pipeline` exposes.

pub mod error;
pub mod middleware;
pub mod routes;
pub mod state;
pub mod types;

use axum::Router;
use state::AppState;
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

fn cors_layer() -> CorsLayer {
    CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any)
}

pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .merge(routes::health::routes())
        .merge(routes::collections::routes())
        .merge(routes::documents::routes())
        .merge(routes::search::routes())
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(axum::middleware::from_fn(middleware::request_span))
                .layer(cors_layer()),
        )
        .with_state(state)
}
