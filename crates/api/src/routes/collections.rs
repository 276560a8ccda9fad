//! Collection CRUD. Name shape (length, charset, reserved words, dot
//! placement) is validated here before the store is touched; name
//! uniqueness (case-insensitive) is checked by the store itself and a
//! conflict there surfaces as `IngestError::Conflict`.

use crate::error::ApiResult;
use crate::state::AppState;
use crate::types::{CollectionDto, CreateCollectionRequest, ListResponse, PageQuery, UpdateCollectionRequest};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use chrono::Utc;
use ingest_core::error::IngestError;
use ingest_core::id;
use ingest_core::types::Collection;
use ingest_store::{PageRequest, RelationalStore};
use std::sync::Arc;

/// Names the store itself uses or reserves; never assignable to a collection.
const RESERVED_NAMES: &[&str] = &["admin"];

/// `unique, case-insensitive, 1-255, Unicode letters/digits/._- space, not
/// reserved, no leading/trailing/consecutive dot`. Uniqueness is checked
/// separately by the store once a name passes this shape check.
fn validate_collection_name(name: &str) -> Result<(), IngestError> {
    if name.trim().is_empty() {
        return Err(IngestError::validation("name must not be empty"));
    }
    if name.chars().count() > 255 {
        return Err(IngestError::validation("name must not exceed 255 characters"));
    }
    if !name.chars().all(|c| c.is_alphanumeric() || matches!(c, '.' | '_' | '-' | ' ')) {
        return Err(IngestError::validation(
            "name may only contain letters, digits, '.', '_', '-' and space",
        ));
    }
    if name.starts_with('.') || name.ends_with('.') || name.contains("..") {
        return Err(IngestError::validation("name must not have a leading, trailing, or consecutive dot"));
    }
    if RESERVED_NAMES.contains(&name.to_lowercase().as_str()) {
        return Err(IngestError::validation(format!("name '{name}' is reserved")));
    }
    Ok(())
}

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/collections", post(create_collection).get(list_collections))
        .route(
            "/collections/{id}",
            get(get_collection).put(update_collection).patch(update_collection).delete(delete_collection),
        )
}

async fn create_collection(
    State(state): State<Arc<AppState>>,
    Json(body): Json<CreateCollectionRequest>,
) -> ApiResult<(StatusCode, Json<CollectionDto>)> {
    validate_collection_name(&body.name)?;
    let now = Utc::now();
    let collection = Collection {
        id: id::collection_id(),
        name: body.name,
        description: body.description,
        created_at: now,
        updated_at: now,
        deleted: false,
    };
    state.store.insert_collection(&collection).await?;
    Ok((StatusCode::CREATED, Json(collection.into())))
}

async fn list_collections(
    State(state): State<Arc<AppState>>,
    Query(query): Query<PageQuery>,
) -> ApiResult<Json<ListResponse<CollectionDto>>> {
    let (collections, pagination) = state
        .store
        .list_collections(PageRequest { page: query.page(), limit: query.limit(100) })
        .await?;
    let data = collections.into_iter().map(CollectionDto::from).collect();
    Ok(Json(ListResponse::new(data, pagination)))
}

async fn get_collection(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> ApiResult<Json<CollectionDto>> {
    let collection = state
        .store
        .get_collection(&id)
        .await?
        .ok_or_else(|| IngestError::not_found("collection", &id))?;
    Ok(Json(collection.into()))
}

async fn update_collection(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(body): Json<UpdateCollectionRequest>,
) -> ApiResult<Json<CollectionDto>> {
    let mut collection = state
        .store
        .get_collection(&id)
        .await?
        .ok_or_else(|| IngestError::not_found("collection", &id))?;
    if let Some(name) = body.name {
        validate_collection_name(&name)?;
        collection.name = name;
    }
    if let Some(description) = body.description {
        collection.description = Some(description);
    }
    collection.updated_at = Utc::now();
    state.store.update_collection(&collection).await?;
    Ok(Json(collection.into()))
}

/// Idempotent: deleting an already-absent collection still returns 204.
async fn delete_collection(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> ApiResult<StatusCode> {
    state.deleter.delete_collection(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}
