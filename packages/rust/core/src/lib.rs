//! Proposal pipeline orchestration and domain logic.
//!
//! This crate ties web search, internal retrieval, context assembly, and
//! generation into the end-to-end proposal run, and owns the document index
//! lifecycle (build, query, stats, drop).

pub mod assembler;
pub mod dedup;
pub mod indexer;
pub mod pipeline;
pub mod products;
pub mod prompts;
pub mod retrieval;
pub mod writer;

pub use assembler::{AssembledContext, ContextInput, SectionKind, assemble};
pub use indexer::{
    IndexBuildOptions, IndexBuildReport, IndexProgress, IndexStats, SilentIndexProgress,
    build_index, drop_index, index_stats, query_index,
};
pub use pipeline::{
    Collaborators, Pipeline, PipelineSettings, PipelineState, ProgressReporter, ProposalVariant,
    SilentProgress, StageFailure, StageId,
};
pub use retrieval::{IndexStatus, RetrievalIndex, RetrievedChunk, VectorIndex};

pub use rmproposal_ingest::ChunkingConfig;
