//! `GET /search`, `GET /search/paginated`, `POST /search`. All three share
//! the same query-parsing helper; the POST body is the JSON equivalent of
//! the GET query string per the external interface contract.

use crate::error::ApiResult;
use crate::state::AppState;
use crate::types::{ListResponse, SearchHitDto, SearchQuery, SearchRequestBody};
use axum::extract::{Query, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use ingest_core::error::IngestError;
use ingest_pipeline::SortOrder;
use std::sync::Arc;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/search", get(search).post(search_body))
        .route("/search/paginated", get(search_paginated))
}

fn parse_sort(sort: Option<&str>) -> SortOrder {
    match sort {
        Some("score_asc") => SortOrder::ScoreAsc,
        Some("doc_id_asc") => SortOrder::DocIdAsc,
        Some("doc_id_desc") => SortOrder::DocIdDesc,
        _ => SortOrder::ScoreDesc,
    }
}

async fn search(State(state): State<Arc<AppState>>, Query(query): Query<SearchQuery>) -> ApiResult<Json<Vec<SearchHitDto>>> {
    run_search(&state, &query.q, query.collection_id.as_deref(), query.limit, query.keyword.unwrap_or(false))
        .await
        .map(Json)
}

async fn search_body(
    State(state): State<Arc<AppState>>,
    Json(body): Json<SearchRequestBody>,
) -> ApiResult<Json<Vec<SearchHitDto>>> {
    run_search(&state, &body.q, body.collection_id.as_deref(), body.limit, body.keyword.unwrap_or(false))
        .await
        .map(Json)
}

async fn run_search(
    state: &AppState,
    q: &str,
    collection_id: Option<&str>,
    limit: Option<u32>,
    keyword: bool,
) -> ApiResult<Vec<SearchHitDto>> {
    if q.trim().is_empty() {
        return Err(IngestError::validation("q must not be empty").into());
    }
    let limit = limit.unwrap_or(20).clamp(1, 100);
    let hits = if keyword {
        state.search.search_keyword(q, collection_id, limit).await?
    } else {
        state.search.search(q, collection_id, limit as u64).await?
    };
    Ok(hits.into_iter().map(SearchHitDto::from).collect())
}

async fn search_paginated(
    State(state): State<Arc<AppState>>,
    Query(query): Query<SearchQuery>,
) -> ApiResult<Json<ListResponse<SearchHitDto>>> {
    if query.q.trim().is_empty() {
        return Err(IngestError::validation("q must not be empty").into());
    }
    let page = query.page.unwrap_or(1).max(1);
    let limit = query.limit.unwrap_or(20).clamp(1, 100);
    let sort = parse_sort(query.sort.as_deref());
    let (hits, pagination) = state
        .search
        .search_paginated(&query.q, query.collection_id.as_deref(), page, limit, sort)
        .await?;
    let data = hits.into_iter().map(SearchHitDto::from).collect();
    Ok(Json(ListResponse::new(data, pagination)))
}
