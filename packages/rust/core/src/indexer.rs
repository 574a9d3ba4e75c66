//! Building and maintaining the internal document index.
//!
//! `build_index` walks a directory, chunks every supported file, embeds the
//! chunks in batches, and stores them. Re-running a build over the same files
//! is idempotent: identical chunks from the same source are skipped.

use std::path::{Path, PathBuf};
use std::time::Instant;

use tracing::{info, instrument};

use rmproposal_ingest::{ChunkingConfig, load_directory, split_documents};
use rmproposal_providers::Embedder;
use rmproposal_shared::{Result, RmProposalError};
use rmproposal_storage::{META_EMBEDDING_MODEL, NewChunk, SourceSummary, Storage};

use crate::retrieval::{IndexStatus, RetrievalIndex, RetrievedChunk};

/// Options for [`build_index`].
#[derive(Debug, Clone)]
pub struct IndexBuildOptions {
    pub path: PathBuf,
    pub chunking: ChunkingConfig,
    /// Chunks embedded per provider call.
    pub batch_size: usize,
}

/// What a build did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IndexBuildReport {
    pub documents: usize,
    pub chunks: usize,
    pub inserted: usize,
    pub skipped_duplicates: usize,
}

/// Summary of an existing index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexStats {
    pub chunks: u64,
    pub embedding_model: Option<String>,
    pub sources: Vec<SourceSummary>,
}

/// Progress callback for index builds.
pub trait IndexProgress: Send + Sync {
    fn phase(&self, message: &str);
    fn batch_embedded(&self, done: usize, total: usize);
}

/// No-op [`IndexProgress`].
pub struct SilentIndexProgress;

impl IndexProgress for SilentIndexProgress {
    fn phase(&self, _message: &str) {}
    fn batch_embedded(&self, _done: usize, _total: usize) {}
}

/// Load, chunk, embed, and store every supported document under `docs_dir`.
#[instrument(skip_all, fields(docs = %docs_dir.display(), index = %options.path.display()))]
pub async fn build_index(
    options: &IndexBuildOptions,
    docs_dir: &Path,
    embedder: &dyn Embedder,
    progress: &dyn IndexProgress,
) -> Result<IndexBuildReport> {
    let start = Instant::now();
    options.chunking.validate()?;
    if options.batch_size == 0 {
        return Err(RmProposalError::validation("batch size must be at least 1"));
    }

    progress.phase("Loading documents");
    let documents = load_directory(docs_dir)?;
    let chunks = split_documents(&documents, &options.chunking)?;
    if chunks.is_empty() {
        return Err(RmProposalError::validation(format!(
            "no documents to process in {}",
            docs_dir.display()
        )));
    }
    info!(documents = documents.len(), chunks = chunks.len(), "documents chunked");

    let storage = Storage::open(&options.path).await?;
    if let Some(built_with) = storage.get_meta(META_EMBEDDING_MODEL).await? {
        if built_with != embedder.model() && storage.chunk_count().await? > 0 {
            return Err(RmProposalError::validation(format!(
                "index at {} was built with embedding model '{built_with}'; \
                 drop it before rebuilding with '{}'",
                options.path.display(),
                embedder.model()
            )));
        }
    }
    storage.set_meta(META_EMBEDDING_MODEL, embedder.model()).await?;

    progress.phase("Embedding chunks");
    let mut report = IndexBuildReport {
        documents: documents.len(),
        chunks: chunks.len(),
        ..IndexBuildReport::default()
    };

    for (batch_no, batch) in chunks.chunks(options.batch_size).enumerate() {
        let texts: Vec<String> = batch.iter().map(|c| c.text.clone()).collect();
        let vectors = embedder.embed(&texts).await?;
        if vectors.len() != batch.len() {
            return Err(RmProposalError::Provider(format!(
                "embedding provider returned {} vectors for {} chunks",
                vectors.len(),
                batch.len()
            )));
        }

        for (chunk, vector) in batch.iter().zip(&vectors) {
            let inserted = storage
                .insert_chunk(&NewChunk {
                    source: &chunk.source,
                    file_type: &chunk.file_type,
                    chunk_index: chunk.chunk_index,
                    body: &chunk.text,
                    embedding: vector,
                })
                .await?;
            if inserted {
                report.inserted += 1;
            } else {
                report.skipped_duplicates += 1;
            }
        }

        let done = (batch_no * options.batch_size + batch.len()).min(chunks.len());
        progress.batch_embedded(done, chunks.len());
    }

    info!(
        inserted = report.inserted,
        skipped = report.skipped_duplicates,
        elapsed_ms = start.elapsed().as_millis(),
        "index build complete"
    );
    Ok(report)
}

/// Ad-hoc query against a built index.
pub async fn query_index(
    index: &dyn RetrievalIndex,
    question: &str,
    k: usize,
) -> Result<Vec<RetrievedChunk>> {
    if question.trim().is_empty() {
        return Err(RmProposalError::validation("query cannot be empty"));
    }
    match index.status().await? {
        IndexStatus::Ready => index.query(question, k).await,
        IndexStatus::NotBuilt => Err(RmProposalError::validation(
            "document index has not been built; run `rmproposal index build <DIR>` first",
        )),
    }
}

/// Stats for the index at `path`, or `None` if no index file exists.
pub async fn index_stats(path: &Path) -> Result<Option<IndexStats>> {
    if !path.is_file() {
        return Ok(None);
    }
    let storage = Storage::open_readonly(path).await?;
    Ok(Some(IndexStats {
        chunks: storage.chunk_count().await?,
        embedding_model: storage.get_meta(META_EMBEDDING_MODEL).await?,
        sources: storage.list_sources().await?,
    }))
}

/// Delete the index file. Returns `false` if there was nothing to delete.
pub fn drop_index(path: &Path) -> Result<bool> {
    match std::fs::remove_file(path) {
        Ok(()) => {
            info!(path = %path.display(), "index dropped");
            Ok(true)
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            info!(path = %path.display(), "no index to drop");
            Ok(false)
        }
        Err(e) => Err(RmProposalError::io(path, e)),
    }
}
