//! SQL migration definitions for the document index database.
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
        description: "Initial schema: chunks, index_meta",
        sql: r#"
CREATE TABLE IF NOT EXISTS schema_migrations (
    version    INTEGER PRIMARY KEY,
    applied_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- One row per embedded chunk; embeddings are JSON arrays of f32
CREATE TABLE IF NOT EXISTS chunks (
    id           TEXT PRIMARY KEY,
    source       TEXT NOT NULL,
    file_type    TEXT NOT NULL,
    chunk_index  INTEGER NOT NULL,
    body         TEXT NOT NULL,
    content_hash TEXT NOT NULL,
    embedding    TEXT NOT NULL,
    created_at   TEXT NOT NULL,
    UNIQUE(source, content_hash)
);

CREATE INDEX IF NOT EXISTS idx_chunks_source ON chunks(source);

-- Index-wide settings such as the embedding model
CREATE TABLE IF NOT EXISTS index_meta (
    key   TEXT PRIMARY KEY,
    value TEXT NOT NULL
);

INSERT INTO schema_migrations (version) VALUES (1);
"#,
    }]
}
