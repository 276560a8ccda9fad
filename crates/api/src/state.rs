//! Shared application state handed to every route. Holds the concrete
//! `SqlStore` (collection CRUD needs no transaction, but sharing one pool
//! with the coordinator avoids a second connection pool) plus the three
//! pipeline entry points the routes never reach past.

use ingest_pipeline::{CascadeDeleter, IngestionCoordinator, SearchOrchestrator};
use ingest_store::SqlStore;
use std::sync::Arc;
use std::time::Instant;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<SqlStore>,
    pub coordinator: Arc<IngestionCoordinator>,
    pub deleter: Arc<CascadeDeleter>,
    pub search: Arc<SearchOrchestrator>,
    pub start_time: Instant,
}
