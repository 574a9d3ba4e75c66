//! Document ingestion for the internal document index.
//!
//! Files are dispatched by extension to a loader that produces plain text plus
//! provenance (`source` path and `file_type`). The [`chunker`] module then splits
//! the text into overlapping windows ready for embedding.

pub mod chunker;
mod html;

use std::path::Path;

use tracing::{debug, info, instrument, warn};
use walkdir::WalkDir;

use rmproposal_shared::{Result, RmProposalError};

pub use chunker::{Chunk, ChunkingConfig, split_documents, split_text};

/// Extensions this crate knows how to load (lower-case, leading dot).
pub const SUPPORTED_EXTENSIONS: &[&str] = &[
    ".txt", ".md", ".markdown", ".csv", ".tsv", ".json", ".html", ".htm",
];

/// Text extracted from one input file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadedDocument {
    pub text: String,
    /// Path the text was read from.
    pub source: String,
    /// Lower-cased extension with leading dot, e.g. `.md`.
    pub file_type: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Format {
    PlainText,
    Html,
}

fn format_for(file_type: &str) -> Option<Format> {
    match file_type {
        ".txt" | ".md" | ".markdown" | ".csv" | ".tsv" | ".json" => Some(Format::PlainText),
        ".html" | ".htm" => Some(Format::Html),
        _ => None,
    }
}

/// Lower-cased extension of `path` with a leading dot, if it has one.
pub fn file_type_of(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| format!(".{}", e.to_ascii_lowercase()))
}

/// Whether `path` has an extension this crate can load.
pub fn is_supported(path: &Path) -> bool {
    file_type_of(path).is_some_and(|ft| format_for(&ft).is_some())
}

// ---------------------------------------------------------------------------
// Loaders
// ---------------------------------------------------------------------------

/// Load a single file.
///
/// Returns an empty list when the file holds no text after extraction.
#[instrument(skip_all, fields(path = %path.display()))]
pub fn load_document(path: &Path) -> Result<Vec<LoadedDocument>> {
    if !path.is_file() {
        return Err(RmProposalError::io(
            path,
            std::io::Error::new(std::io::ErrorKind::NotFound, "file not found"),
        ));
    }

    let file_type = file_type_of(path).unwrap_or_default();
    let format = format_for(&file_type).ok_or_else(|| {
        RmProposalError::validation(format!(
            "unsupported file type '{file_type}' for {}; supported: {}",
            path.display(),
            SUPPORTED_EXTENSIONS.join(", ")
        ))
    })?;

    let raw = std::fs::read_to_string(path).map_err(|e| RmProposalError::io(path, e))?;
    let text = match format {
        Format::PlainText => raw,
        Format::Html => html::html_to_text(&raw)?,
    };

    if text.trim().is_empty() {
        debug!("file has no text content");
        return Ok(Vec::new());
    }

    debug!(chars = text.len(), %file_type, "loaded document");
    Ok(vec![LoadedDocument {
        text,
        source: path.display().to_string(),
        file_type,
    }])
}

/// Load every supported file under `dir`, recursively, in path order.
///
/// Unsupported files are skipped; files that fail to load are logged and skipped.
#[instrument(skip_all, fields(dir = %dir.display()))]
pub fn load_directory(dir: &Path) -> Result<Vec<LoadedDocument>> {
    if !dir.is_dir() {
        return Err(RmProposalError::io(
            dir,
            std::io::Error::new(std::io::ErrorKind::NotFound, "directory not found"),
        ));
    }

    let mut docs = Vec::new();
    let mut skipped = 0usize;

    for entry in WalkDir::new(dir).sort_by_file_name() {
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                warn!(error = %e, "failed to read directory entry");
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }

        let path = entry.path();
        if !is_supported(path) {
            debug!(path = %path.display(), "skipping unsupported file");
            skipped += 1;
            continue;
        }

        match load_document(path) {
            Ok(loaded) => docs.extend(loaded),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "failed to load document");
                skipped += 1;
            }
        }
    }

    info!(documents = docs.len(), skipped, "directory loaded");
    Ok(docs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn loads_plain_text() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("Credit_Policy.TXT");
        fs::write(&path, "Borrowers need three years of audited accounts.").unwrap();

        let docs = load_document(&path).unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].file_type, ".txt");
        assert!(docs[0].source.ends_with("Credit_Policy.TXT"));
        assert!(docs[0].text.contains("audited accounts"));
    }

    #[test]
    fn loads_html_as_text() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("trade.html");
        fs::write(
            &path,
            "<html><body><main><h2>Trade Financing</h2><p>For importers.</p></main></body></html>",
        )
        .unwrap();

        let docs = load_document(&path).unwrap();
        assert_eq!(docs[0].file_type, ".html");
        assert!(docs[0].text.contains("Trade Financing"));
        assert!(!docs[0].text.contains("<p>"));
    }

    #[test]
    fn unsupported_extension_is_validation_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("deck.pptx");
        fs::write(&path, b"binary").unwrap();

        let err = load_document(&path).unwrap_err();
        assert!(matches!(err, RmProposalError::Validation { .. }));
        assert!(err.to_string().contains(".txt"));
    }

    #[test]
    fn missing_file_is_io_error() {
        let err = load_document(Path::new("/nonexistent/rmp/report.txt")).unwrap_err();
        assert!(matches!(err, RmProposalError::Io { .. }));
    }

    #[test]
    fn empty_file_yields_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("blank.md");
        fs::write(&path, "  \n").unwrap();
        assert!(load_document(&path).unwrap().is_empty());
    }

    #[test]
    fn directory_walk_is_sorted_and_skips_unsupported() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("products")).unwrap();
        fs::write(dir.path().join("b_notes.md"), "notes").unwrap();
        fs::write(dir.path().join("a_report.txt"), "report").unwrap();
        fs::write(dir.path().join("image.png"), b"\x89PNG").unwrap();
        fs::write(dir.path().join("products/term_loan.csv"), "name,tenure\nterm,5").unwrap();

        let docs = load_directory(dir.path()).unwrap();
        let names: Vec<&str> = docs
            .iter()
            .map(|d| d.source.rsplit('/').next().unwrap())
            .collect();
        assert_eq!(names, vec!["a_report.txt", "b_notes.md", "term_loan.csv"]);
    }

    #[test]
    fn missing_directory_is_io_error() {
        assert!(matches!(
            load_directory(Path::new("/nonexistent/rmp-docs")),
            Err(RmProposalError::Io { .. })
        ));
    }
}
