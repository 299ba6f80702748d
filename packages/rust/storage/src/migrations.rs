//! SQL migration definitions for the vector store.
//!
//! Migrations are applied in order on database open. Each migration has a
//! version number and a batch of SQL statements.

/// A database migration with a version and SQL statements.
pub(crate) struct Migration {
    pub version: u32,
    pub description: &'static str,
    pub sql: &'static str,
}

/// All migrations, in ascending version order.
pub(crate) fn all_migrations() -> Vec<Migration> {
    vec![Migration {
        version: 1,
        description: "Initial schema: collections, documents",
        sql: r#"
-- Schema version tracking
CREATE TABLE IF NOT EXISTS schema_migrations (
    version    INTEGER PRIMARY KEY,
    applied_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- One row per named collection
CREATE TABLE IF NOT EXISTS collections (
    name            TEXT PRIMARY KEY,
    embedding_model TEXT NOT NULL,
    dimensions      INTEGER NOT NULL,
    record_count    INTEGER NOT NULL,
    built_at        TEXT NOT NULL
);

-- Embedded documents; embedding is little-endian f32
CREATE TABLE IF NOT EXISTS documents (
    collection    TEXT NOT NULL,
    id            TEXT NOT NULL,
    position      INTEGER NOT NULL,
    text          TEXT NOT NULL,
    metadata_json TEXT NOT NULL,
    embedding     BLOB NOT NULL,
    PRIMARY KEY (collection, id)
);

CREATE INDEX IF NOT EXISTS idx_documents_position ON documents(collection, position);

INSERT INTO schema_migrations (version) VALUES (1);
"#,
    }]
}
