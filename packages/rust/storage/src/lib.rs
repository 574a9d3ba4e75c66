//! libSQL storage for the internal document index (offline mode).
//!
//! The [`Storage`] struct wraps a local libSQL database holding embedded
//! document chunks and index-wide metadata. Similarity search is a brute-force
//! cosine scan, which is plenty for a relationship manager's document folder.
//!
//! **Access rules:**
//! - `index build` / `index drop`: read-write via [`Storage::open`]
//! - proposal runs and `index query`: read-only via [`Storage::open_readonly`]

mod migrations;

use std::cmp::Ordering;
use std::path::Path;

use chrono::Utc;
use libsql::{Connection, Database, params};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use rmproposal_shared::{Result, RmProposalError};

/// Metadata key recording which embedding model built the index.
pub const META_EMBEDDING_MODEL: &str = "embedding_model";

// ---------------------------------------------------------------------------
// Row types
// ---------------------------------------------------------------------------

/// A chunk ready to be written, with its embedding.
#[derive(Debug, Clone)]
pub struct NewChunk<'a> {
    pub source: &'a str,
    pub file_type: &'a str,
    pub chunk_index: usize,
    pub body: &'a str,
    pub embedding: &'a [f32],
}

/// A stored chunk as returned by searches.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredChunk {
    pub id: String,
    pub source: String,
    pub file_type: String,
    pub chunk_index: usize,
    pub body: String,
}

/// A search hit with its cosine similarity to the query.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredChunk {
    pub chunk: StoredChunk,
    pub score: f32,
}

/// Per-source chunk counts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceSummary {
    pub source: String,
    pub file_type: String,
    pub chunks: u64,
}

fn storage_err(e: impl std::fmt::Display) -> RmProposalError {
    RmProposalError::Storage(e.to_string())
}

/// Hex SHA-256 of a chunk body, used to skip re-inserting identical content.
pub fn content_hash(body: &str) -> String {
    let digest = Sha256::digest(body.as_bytes());
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

/// Cosine similarity; zero when either vector has no magnitude.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let (mut dot, mut norm_a, mut norm_b) = (0.0f32, 0.0f32, 0.0f32);
    for (x, y) in a.iter().zip(b) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}

// ---------------------------------------------------------------------------
// Storage
// ---------------------------------------------------------------------------

/// Primary storage handle wrapping a libSQL database.
pub struct Storage {
    // Keeps the database alive for as long as the connection is in use.
    _db: Database,
    conn: Connection,
    readonly: bool,
}

impl Storage {
    /// Open or create a database at `path` in read-write mode.
    pub async fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| RmProposalError::io(parent, e))?;
        }

        let storage = Self::connect(path, false).await?;
        storage.run_migrations().await?;
        Ok(storage)
    }

    /// Open an existing database at `path` in read-only mode.
    pub async fn open_readonly(path: &Path) -> Result<Self> {
        if !path.is_file() {
            return Err(RmProposalError::Storage(format!(
                "index not found at {}",
                path.display()
            )));
        }
        Self::connect(path, true).await
    }

    async fn connect(path: &Path, readonly: bool) -> Result<Self> {
        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(storage_err)?;
        let conn = db.connect().map_err(storage_err)?;
        Ok(Self {
            _db: db,
            conn,
            readonly,
        })
    }

    /// Run pending schema migrations.
    async fn run_migrations(&self) -> Result<()> {
        let current_version = self.get_schema_version().await;

        for migration in migrations::all_migrations() {
            if migration.version > current_version {
                tracing::info!(
                    version = migration.version,
                    description = migration.description,
                    "applying migration"
                );
                self.conn.execute_batch(migration.sql).await.map_err(|e| {
                    RmProposalError::Storage(format!(
                        "migration v{} failed: {e}",
                        migration.version
                    ))
                })?;
            }
        }
        Ok(())
    }

    /// Current schema version, or 0 if no migrations have been applied.
    async fn get_schema_version(&self) -> u32 {
        let Ok(mut rows) = self
            .conn
            .query("SELECT MAX(version) FROM schema_migrations", params![])
            .await
        else {
            return 0;
        };

        match rows.next().await {
            Ok(Some(row)) => row.get::<u32>(0).unwrap_or(0),
            _ => 0,
        }
    }

    fn check_writable(&self) -> Result<()> {
        if self.readonly {
            return Err(RmProposalError::Storage(
                "database is opened in read-only mode".into(),
            ));
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Chunk operations
    // -----------------------------------------------------------------------

    /// Insert a chunk. Returns `false` when the same source already holds
    /// identical content.
    pub async fn insert_chunk(&self, chunk: &NewChunk<'_>) -> Result<bool> {
        self.check_writable()?;
        let id = Uuid::now_v7().to_string();
        let hash = content_hash(chunk.body);
        let embedding = serde_json::to_string(chunk.embedding).map_err(storage_err)?;
        let now = Utc::now().to_rfc3339();

        let inserted = self
            .conn
            .execute(
                "INSERT OR IGNORE INTO chunks
                   (id, source, file_type, chunk_index, body, content_hash, embedding, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    id.as_str(),
                    chunk.source,
                    chunk.file_type,
                    chunk.chunk_index as i64,
                    chunk.body,
                    hash.as_str(),
                    embedding.as_str(),
                    now.as_str(),
                ],
            )
            .await
            .map_err(storage_err)?;

        Ok(inserted > 0)
    }

    /// Total number of stored chunks.
    pub async fn chunk_count(&self) -> Result<u64> {
        let mut rows = self
            .conn
            .query("SELECT COUNT(*) FROM chunks", params![])
            .await
            .map_err(storage_err)?;

        match rows.next().await.map_err(storage_err)? {
            Some(row) => Ok(row.get::<i64>(0).map_err(storage_err)?.max(0) as u64),
            None => Ok(0),
        }
    }

    /// Chunk counts grouped by source path.
    pub async fn list_sources(&self) -> Result<Vec<SourceSummary>> {
        let mut rows = self
            .conn
            .query(
                "SELECT source, MIN(file_type), COUNT(*) FROM chunks
                 GROUP BY source ORDER BY source",
                params![],
            )
            .await
            .map_err(storage_err)?;

        let mut results = Vec::new();
        while let Some(row) = rows.next().await.map_err(storage_err)? {
            results.push(SourceSummary {
                source: row.get::<String>(0).map_err(storage_err)?,
                file_type: row.get::<String>(1).map_err(storage_err)?,
                chunks: row.get::<i64>(2).map_err(storage_err)?.max(0) as u64,
            });
        }
        Ok(results)
    }

    /// Top-`k` chunks by cosine similarity to `query`, best first.
    /// Equal scores keep insertion order.
    pub async fn similarity_search(&self, query: &[f32], k: usize) -> Result<Vec<ScoredChunk>> {
        if k == 0 {
            return Ok(Vec::new());
        }

        let mut rows = self
            .conn
            .query(
                "SELECT id, source, file_type, chunk_index, body, embedding
                 FROM chunks ORDER BY rowid",
                params![],
            )
            .await
            .map_err(storage_err)?;

        let mut scored = Vec::new();
        while let Some(row) = rows.next().await.map_err(storage_err)? {
            let raw = row.get::<String>(5).map_err(storage_err)?;
            let embedding: Vec<f32> = serde_json::from_str(&raw).map_err(storage_err)?;
            if embedding.len() != query.len() {
                return Err(RmProposalError::Storage(format!(
                    "embedding dimension mismatch: index has {}, query has {}",
                    embedding.len(),
                    query.len()
                )));
            }

            scored.push(ScoredChunk {
                chunk: StoredChunk {
                    id: row.get::<String>(0).map_err(storage_err)?,
                    source: row.get::<String>(1).map_err(storage_err)?,
                    file_type: row.get::<String>(2).map_err(storage_err)?,
                    chunk_index: row.get::<i64>(3).map_err(storage_err)?.max(0) as usize,
                    body: row.get::<String>(4).map_err(storage_err)?,
                },
                score: cosine_similarity(query, &embedding),
            });
        }

        scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal));
        scored.truncate(k);
        Ok(scored)
    }

    // -----------------------------------------------------------------------
    // Metadata
    // -----------------------------------------------------------------------

    pub async fn set_meta(&self, key: &str, value: &str) -> Result<()> {
        self.check_writable()?;
        self.conn
            .execute(
                "INSERT INTO index_meta (key, value) VALUES (?1, ?2)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value",
                params![key, value],
            )
            .await
            .map_err(storage_err)?;
        Ok(())
    }

    pub async fn get_meta(&self, key: &str) -> Result<Option<String>> {
        let mut rows = self
            .conn
            .query("SELECT value FROM index_meta WHERE key = ?1", params![key])
            .await
            .map_err(storage_err)?;

        match rows.next().await.map_err(storage_err)? {
            Some(row) => Ok(Some(row.get::<String>(0).map_err(storage_err)?)),
            None => Ok(None),
        }
    }

    /// Remove every chunk and metadata entry, keeping the schema.
    #[cfg(test)]
    async fn clear(&self) -> Result<()> {
        self.check_writable()?;
        self.conn
            .execute_batch("DELETE FROM chunks; DELETE FROM index_meta;")
            .await
            .map_err(storage_err)?;
        Ok(())
    }
}
