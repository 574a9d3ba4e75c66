//! Shared types, error model, and configuration for the RM proposal builder.
//!
//! This crate is the foundation depended on by all other workspace crates.
//! It provides:
//! - [`RmProposalError`]: the unified error type
//! - Domain types ([`WorkItem`], [`SourceFragment`], [`Origin`])
//! - Configuration ([`AppConfig`] and its sections, config loading)

pub mod config;
pub mod error;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AppConfig, EmbeddingConfig, GenerationConfig, IndexConfig, PipelineConfig, SearchConfig,
    config_dir, config_file_path, init_config, load_config, load_config_from, resolve_api_key,
};
pub use error::{FailureKind, Result, RmProposalError};
pub use types::{Origin, SourceFragment, WorkItem};
