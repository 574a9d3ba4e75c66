//! Error types for the RM proposal builder.
//!
//! Library crates use [`RmProposalError`] via `thiserror`.
//! The CLI wraps this with `color-eyre` for rich diagnostics.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Top-level error type for all RM proposal operations.
#[derive(Debug, thiserror::Error)]
pub enum RmProposalError {
    /// Configuration loading or validation error.
    #[error("config error: {message}")]
    Config { message: String },

    /// A search, retrieval, embedding, or generation collaborator failed or is unreachable.
    #[error("provider error: {0}")]
    Provider(String),

    /// A collaborator returned malformed structured output.
    #[error("parse error: {message}")]
    Parse { message: String },

    /// The final artifact could not be written.
    #[error("persistence error at {path:?}: {source}")]
    Persistence {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Vector index storage error.
    #[error("storage error: {0}")]
    Storage(String),

    /// Document loading or conversion error.
    #[error("ingest error: {0}")]
    Ingest(String),

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Input validation error (empty subject, bad chunking parameters, etc.).
    #[error("validation error: {message}")]
    Validation { message: String },
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, RmProposalError>;

/// The run-level error categories recorded against a pipeline stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// A collaborator call failed; the stage degraded to empty output.
    Provider,
    /// Structured collaborator output was malformed; the stage used a fallback.
    Parse,
    /// The artifact write failed.
    Persistence,
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Provider => "provider",
            Self::Parse => "parse",
            Self::Persistence => "persistence",
        };
        f.write_str(s)
    }
}

impl RmProposalError {
    /// Create a config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create a parse error from any displayable message.
    pub fn parse(msg: impl Into<String>) -> Self {
        Self::Parse {
            message: msg.into(),
        }
    }

    /// Create a validation error from any displayable message.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
        }
    }

    /// Wrap a `std::io::Error` with a path for context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Wrap a `std::io::Error` raised while writing the final artifact.
    pub fn persistence(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Persistence {
            path: path.into(),
            source,
        }
    }

    /// Map this error onto the run-level failure category it degrades to.
    pub fn failure_kind(&self) -> FailureKind {
        match self {
            Self::Parse { .. } => FailureKind::Parse,
            Self::Persistence { .. } | Self::Io { .. } => FailureKind::Persistence,
            _ => FailureKind::Provider,
        }
    }
}
