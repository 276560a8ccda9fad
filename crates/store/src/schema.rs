//! Versioned schema migrations.
//!
//! Every migration is applied in order inside its own transaction and
//! recorded in `migrations`; the two backends share column shapes for every
//! table in §6 except full-text, where sqlite uses an FTS5 virtual table and
//! postgres a `tsvector` + GIN index — both are reached only through
//! [`crate::relational::RelationalStore::keyword_search`].

use ingest_core::config::DbType;

pub struct Migration {
    pub version: &'static str,
    pub sqlite: &'static str,
    pub postgres: &'static str,
}

pub const MIGRATIONS: &[Migration] = &[
    Migration {
        version: "0001_init",
        sqlite: r#"
CREATE TABLE IF NOT EXISTS collections (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    name_lower TEXT NOT NULL,
    description TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    deleted INTEGER NOT NULL DEFAULT 0
);
CREATE UNIQUE INDEX IF NOT EXISTS collections_name_lower_uq ON collections(name_lower) WHERE deleted = 0;

CREATE TABLE IF NOT EXISTS docs (
    id TEXT PRIMARY KEY,
    collection_id TEXT NOT NULL REFERENCES collections(id),
    key TEXT NOT NULL,
    name TEXT NOT NULL,
    mime TEXT,
    size_bytes INTEGER NOT NULL,
    content_hash TEXT NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    status TEXT NOT NULL,
    deleted INTEGER NOT NULL DEFAULT 0
);
CREATE INDEX IF NOT EXISTS docs_collection_idx ON docs(collection_id);
CREATE INDEX IF NOT EXISTS docs_key_idx ON docs(collection_id, key);

CREATE TABLE IF NOT EXISTS chunks (
    point_id TEXT PRIMARY KEY,
    doc_id TEXT NOT NULL REFERENCES docs(id),
    collection_id TEXT NOT NULL,
    chunk_index INTEGER NOT NULL,
    title_chain TEXT NOT NULL,
    content TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS chunks_doc_idx ON chunks(doc_id, chunk_index);

CREATE TABLE IF NOT EXISTS chunk_meta (
    point_id TEXT PRIMARY KEY REFERENCES chunks(point_id),
    doc_id TEXT NOT NULL,
    collection_id TEXT NOT NULL,
    chunk_index INTEGER NOT NULL,
    title_chain TEXT NOT NULL,
    content_hash TEXT NOT NULL,
    embedding_status TEXT NOT NULL,
    synced_at TEXT,
    error TEXT
);
CREATE INDEX IF NOT EXISTS chunk_meta_doc_idx ON chunk_meta(doc_id);

CREATE VIRTUAL TABLE IF NOT EXISTS chunks_fts USING fts5(
    point_id UNINDEXED,
    content,
    title_chain UNINDEXED
);

CREATE TABLE IF NOT EXISTS sync_jobs (
    doc_id TEXT PRIMARY KEY,
    status TEXT NOT NULL,
    attempts INTEGER NOT NULL DEFAULT 0,
    last_error TEXT,
    error_category TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS sync_jobs_status_idx ON sync_jobs(status);

CREATE TABLE IF NOT EXISTS system_metrics (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL,
    value REAL NOT NULL,
    labels TEXT NOT NULL DEFAULT '{}',
    recorded_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS system_health (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    component TEXT NOT NULL,
    healthy INTEGER NOT NULL,
    detail TEXT NOT NULL DEFAULT '',
    recorded_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS alert_rules (
    id TEXT PRIMARY KEY,
    definition TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS alert_history (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    rule_id TEXT NOT NULL,
    fired_at TEXT NOT NULL,
    detail TEXT NOT NULL DEFAULT ''
);
"#,
        postgres: r#"
CREATE TABLE IF NOT EXISTS collections (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    name_lower TEXT NOT NULL,
    description TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    deleted INTEGER NOT NULL DEFAULT 0
);
CREATE UNIQUE INDEX IF NOT EXISTS collections_name_lower_uq ON collections(name_lower) WHERE deleted = 0;

CREATE TABLE IF NOT EXISTS docs (
    id TEXT PRIMARY KEY,
    collection_id TEXT NOT NULL REFERENCES collections(id),
    key TEXT NOT NULL,
    name TEXT NOT NULL,
    mime TEXT,
    size_bytes BIGINT NOT NULL,
    content_hash TEXT NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    status TEXT NOT NULL,
    deleted INTEGER NOT NULL DEFAULT 0
);
CREATE INDEX IF NOT EXISTS docs_collection_idx ON docs(collection_id);
CREATE INDEX IF NOT EXISTS docs_key_idx ON docs(collection_id, key);

CREATE TABLE IF NOT EXISTS chunks (
    point_id TEXT PRIMARY KEY,
    doc_id TEXT NOT NULL REFERENCES docs(id),
    collection_id TEXT NOT NULL,
    chunk_index INTEGER NOT NULL,
    title_chain TEXT NOT NULL,
    content TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS chunks_doc_idx ON chunks(doc_id, chunk_index);

CREATE TABLE IF NOT EXISTS chunk_meta (
    point_id TEXT PRIMARY KEY REFERENCES chunks(point_id),
    doc_id TEXT NOT NULL,
    collection_id TEXT NOT NULL,
    chunk_index INTEGER NOT NULL,
    title_chain TEXT NOT NULL,
    content_hash TEXT NOT NULL,
    embedding_status TEXT NOT NULL,
    synced_at TEXT,
    error TEXT
);
CREATE INDEX IF NOT EXISTS chunk_meta_doc_idx ON chunk_meta(doc_id);

CREATE TABLE IF NOT EXISTS chunks_fts (
    point_id TEXT PRIMARY KEY REFERENCES chunks(point_id),
    content TEXT NOT NULL,
    title_chain TEXT NOT NULL,
    tsv TSVECTOR GENERATED ALWAYS AS (to_tsvector('english', content)) STORED
);
CREATE INDEX IF NOT EXISTS chunks_fts_tsv_idx ON chunks_fts USING GIN(tsv);

CREATE TABLE IF NOT EXISTS sync_jobs (
    doc_id TEXT PRIMARY KEY,
    status TEXT NOT NULL,
    attempts INTEGER NOT NULL DEFAULT 0,
    last_error TEXT,
    error_category TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS sync_jobs_status_idx ON sync_jobs(status);

CREATE TABLE IF NOT EXISTS system_metrics (
    id BIGSERIAL PRIMARY KEY,
    name TEXT NOT NULL,
    value DOUBLE PRECISION NOT NULL,
    labels TEXT NOT NULL DEFAULT '{}',
    recorded_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS system_health (
    id BIGSERIAL PRIMARY KEY,
    component TEXT NOT NULL,
    healthy INTEGER NOT NULL,
    detail TEXT NOT NULL DEFAULT '',
    recorded_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS alert_rules (
    id TEXT PRIMARY KEY,
    definition TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS alert_history (
    id BIGSERIAL PRIMARY KEY,
    rule_id TEXT NOT NULL,
    fired_at TEXT NOT NULL,
    detail TEXT NOT NULL DEFAULT ''
);
"#,
    },
];

pub fn migration_sql(migration: &Migration, db_type: DbType) -> &'static str {
    match db_type {
        DbType::Sqlite => migration.sqlite,
        DbType::Postgres => migration.postgres,
    }
}
