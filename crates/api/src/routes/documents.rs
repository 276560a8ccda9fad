//! Document listing/lookup/delete and the ingest/resync entry points that
//! drive the sync pipeline.

use crate::error::ApiResult;
use crate::state::AppState;
use crate::types::{DocListQuery, DocumentDto, IngestDocumentRequest, ListResponse};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post, put};
use axum::{Json, Router};
use ingest_core::error::IngestError;
use ingest_store::{DocListFilter, PageRequest, RelationalStore};
use std::sync::Arc;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/collections/{collection_id}/docs", post(ingest_document))
        .route("/docs", get(list_documents))
        .route("/docs/{id}", get(get_document).delete(delete_document))
        .route("/docs/{id}/resync", put(resync_document))
}

/// `POST /collections/{collection_id}/docs` — content-addressed ingest; not
/// part of the distilled external-interface list but required for a
/// complete service (documents have to enter the system somehow).
async fn ingest_document(
    State(state): State<Arc<AppState>>,
    Path(collection_id): Path<String>,
    Json(body): Json<IngestDocumentRequest>,
) -> ApiResult<(StatusCode, Json<DocumentDto>)> {
    if body.key.trim().is_empty() {
        return Err(IngestError::validation("key must not be empty").into());
    }
    let document = state
        .coordinator
        .ingest_document(&collection_id, &body.key, &body.name, &body.content, body.mime)
        .await?;
    Ok((StatusCode::ACCEPTED, Json(document.into())))
}

async fn list_documents(
    State(state): State<Arc<AppState>>,
    Query(query): Query<DocListQuery>,
) -> ApiResult<Json<ListResponse<DocumentDto>>> {
    let page = query.page.unwrap_or(1).max(1);
    let limit = query.limit.unwrap_or(20).clamp(1, 100);
    let filter = DocListFilter {
        collection_id: query.collection_id,
        search: query.search,
        status: query.status,
    };
    let (docs, pagination) = state.store.list_documents(filter, PageRequest { page, limit }).await?;
    let data = docs.into_iter().map(DocumentDto::from).collect();
    Ok(Json(ListResponse::new(data, pagination)))
}

async fn get_document(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> ApiResult<Json<DocumentDto>> {
    let document = state.store.get_document(&id).await?.ok_or_else(|| IngestError::not_found("document", &id))?;
    Ok(Json(document.into()))
}

/// Idempotent: deleting an already-absent document still returns 204.
async fn delete_document(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> ApiResult<StatusCode> {
    state.deleter.delete_doc(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn resync_document(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> ApiResult<StatusCode> {
    state.coordinator.resync_document(&id).await?;
    Ok(StatusCode::ACCEPTED)
}
