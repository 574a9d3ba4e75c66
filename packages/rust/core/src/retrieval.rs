//! Retrieval index adapter.
//!
//! The pipeline talks to the internal document store through [`RetrievalIndex`].
//! An index that was never built is reported through [`IndexStatus::NotBuilt`]
//! rather than an error, so callers can tell "feature unavailable" apart from
//! "this query failed".

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::OnceCell;
use tracing::{debug, instrument};

use rmproposal_providers::Embedder;
use rmproposal_shared::{Origin, Result, RmProposalError, SourceFragment};
use rmproposal_storage::{META_EMBEDDING_MODEL, Storage};

/// Whether an index can be queried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexStatus {
    Ready,
    NotBuilt,
}

/// One ranked chunk from the index.
#[derive(Debug, Clone, PartialEq)]
pub struct RetrievedChunk {
    pub body: String,
    pub source: String,
    pub file_type: String,
    pub score: f32,
}

impl RetrievedChunk {
    /// Convert into a fragment of the given origin; the ordinal is set later.
    pub fn into_fragment(self, origin: Origin, ordinal: usize) -> SourceFragment {
        SourceFragment {
            origin,
            ordinal,
            title: None,
            body: self.body,
            locator: self.source,
            file_type: Some(self.file_type),
            relevance: Some(f64::from(self.score)),
        }
    }
}

/// Vector-similarity store queried by free text.
#[async_trait]
pub trait RetrievalIndex: Send + Sync {
    async fn status(&self) -> Result<IndexStatus>;

    /// Up to `k` chunks, most similar first.
    async fn query(&self, text: &str, k: usize) -> Result<Vec<RetrievedChunk>>;
}

// ---------------------------------------------------------------------------
// VectorIndex
// ---------------------------------------------------------------------------

/// [`RetrievalIndex`] over the libSQL chunk store and an embedding provider.
pub struct VectorIndex {
    path: PathBuf,
    embedder: Arc<dyn Embedder>,
    storage: OnceCell<Storage>,
}

impl VectorIndex {
    pub fn new(path: impl Into<PathBuf>, embedder: Arc<dyn Embedder>) -> Self {
        Self {
            path: path.into(),
            embedder,
            storage: OnceCell::new(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn storage(&self) -> Result<&Storage> {
        self.storage
            .get_or_try_init(|| Storage::open_readonly(&self.path))
            .await
    }
}

#[async_trait]
impl RetrievalIndex for VectorIndex {
    async fn status(&self) -> Result<IndexStatus> {
        if !self.path.is_file() {
            debug!(path = %self.path.display(), "index file not found");
            return Ok(IndexStatus::NotBuilt);
        }
        if self.storage().await?.chunk_count().await? == 0 {
            return Ok(IndexStatus::NotBuilt);
        }
        Ok(IndexStatus::Ready)
    }

    #[instrument(skip_all, fields(k = k))]
    async fn query(&self, text: &str, k: usize) -> Result<Vec<RetrievedChunk>> {
        let storage = self.storage().await?;

        if let Some(built_with) = storage.get_meta(META_EMBEDDING_MODEL).await? {
            if built_with != self.embedder.model() {
                return Err(RmProposalError::Provider(format!(
                    "index was built with embedding model '{built_with}' but '{}' is configured",
                    self.embedder.model()
                )));
            }
        }

        let vectors = self.embedder.embed(&[text.to_string()]).await?;
        let query_vector = vectors.into_iter().next().ok_or_else(|| {
            RmProposalError::Provider("embedding provider returned no vector".into())
        })?;

        let hits = storage.similarity_search(&query_vector, k).await?;
        debug!(hits = hits.len(), "index query complete");

        Ok(hits
            .into_iter()
            .map(|hit| RetrievedChunk {
                body: hit.chunk.body,
                source: hit.chunk.source,
                file_type: hit.chunk.file_type,
                score: hit.score,
            })
            .collect())
    }
}
