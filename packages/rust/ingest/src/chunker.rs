//! Recursive character splitter.
//!
//! Text is split on the coarsest separator that occurs in it (paragraphs, then
//! lines, then words, then characters). Pieces are merged greedily into
//! windows of at most `chunk_size` characters, and each new window starts with
//! up to `chunk_overlap` characters carried over from the previous one.

use std::collections::VecDeque;

use tracing::debug;

use rmproposal_shared::{Result, RmProposalError};

use crate::LoadedDocument;

const SEPARATORS: &[&str] = &["\n\n", "\n", " ", ""];

/// Window parameters, measured in characters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkingConfig {
    pub chunk_size: usize,
    pub chunk_overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: 500,
            chunk_overlap: 50,
        }
    }
}

impl ChunkingConfig {
    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            return Err(RmProposalError::validation("chunk_size must be positive"));
        }
        if self.chunk_overlap >= self.chunk_size {
            return Err(RmProposalError::validation(format!(
                "chunk_overlap ({}) must be smaller than chunk_size ({})",
                self.chunk_overlap, self.chunk_size
            )));
        }
        Ok(())
    }
}

/// One indexed window of a loaded document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub source: String,
    pub file_type: String,
    /// Position of this chunk within its document.
    pub chunk_index: usize,
    pub text: String,
}

/// Split one text into overlapping windows.
pub fn split_text(text: &str, config: &ChunkingConfig) -> Result<Vec<String>> {
    config.validate()?;
    Ok(split_recursive(text, SEPARATORS, config))
}

/// Split every document, keeping provenance on each chunk.
pub fn split_documents(docs: &[LoadedDocument], config: &ChunkingConfig) -> Result<Vec<Chunk>> {
    config.validate()?;

    let mut chunks = Vec::new();
    for doc in docs {
        let pieces = split_recursive(&doc.text, SEPARATORS, config);
        debug!(source = %doc.source, chunks = pieces.len(), "document split");
        chunks.extend(pieces.into_iter().enumerate().map(|(i, text)| Chunk {
            source: doc.source.clone(),
            file_type: doc.file_type.clone(),
            chunk_index: i,
            text,
        }));
    }
    Ok(chunks)
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}

fn split_recursive(text: &str, separators: &[&str], config: &ChunkingConfig) -> Vec<String> {
    let idx = separators
        .iter()
        .position(|sep| sep.is_empty() || text.contains(sep))
        .unwrap_or(separators.len().saturating_sub(1));
    let separator = separators.get(idx).copied().unwrap_or("");
    let finer = separators.get(idx + 1..).unwrap_or(&[]);

    let splits: Vec<&str> = if separator.is_empty() {
        text.char_indices()
            .map(|(i, c)| &text[i..i + c.len_utf8()])
            .collect()
    } else {
        text.split(separator).filter(|s| !s.is_empty()).collect()
    };

    let mut out = Vec::new();
    let mut pending: Vec<&str> = Vec::new();

    for piece in splits {
        if char_len(piece) < config.chunk_size {
            pending.push(piece);
            continue;
        }
        if !pending.is_empty() {
            out.extend(merge_splits(&pending, separator, config));
            pending.clear();
        }
        if finer.is_empty() {
            out.push(piece.to_string());
        } else {
            out.extend(split_recursive(piece, finer, config));
        }
    }

    if !pending.is_empty() {
        out.extend(merge_splits(&pending, separator, config));
    }

    out
}

fn merge_splits(splits: &[&str], separator: &str, config: &ChunkingConfig) -> Vec<String> {
    let sep_len = char_len(separator);
    let mut docs = Vec::new();
    let mut current: VecDeque<&str> = VecDeque::new();
    let mut total = 0usize;

    for &piece in splits {
        let len = char_len(piece);
        let joiner = if current.is_empty() { 0 } else { sep_len };

        if total + len + joiner > config.chunk_size && !current.is_empty() {
            if let Some(doc) = join_window(&current, separator) {
                docs.push(doc);
            }
            // Drop leading pieces until what remains fits the overlap budget
            // and leaves room for the incoming piece.
            while total > config.chunk_overlap
                || (total > 0
                    && total + len + if current.is_empty() { 0 } else { sep_len }
                        > config.chunk_size)
            {
                let extra = if current.len() > 1 { sep_len } else { 0 };
                let Some(first) = current.pop_front() else {
                    break;
                };
                total = total.saturating_sub(char_len(first) + extra);
            }
        }

        current.push_back(piece);
        total += len + if current.len() > 1 { sep_len } else { 0 };
    }

    if let Some(doc) = join_window(&current, separator) {
        docs.push(doc);
    }
    docs
}

fn join_window(pieces: &VecDeque<&str>, separator: &str) -> Option<String> {
    let joined = pieces.iter().copied().collect::<Vec<_>>().join(separator);
    let trimmed = joined.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg(size: usize, overlap: usize) -> ChunkingConfig {
        ChunkingConfig {
            chunk_size: size,
            chunk_overlap: overlap,
        }
    }

    fn numbered_words(n: usize) -> String {
        (1..=n).map(|i| format!("w{i}")).collect::<Vec<_>>().join(" ")
    }

    #[test]
    fn short_text_is_one_chunk() {
        let chunks = split_text("A short product note.", &cfg(500, 50)).unwrap();
        assert_eq!(chunks, vec!["A short product note.".to_string()]);
    }

    #[test]
    fn overlap_must_be_smaller_than_size() {
        let err = split_text("text", &cfg(50, 50)).unwrap_err();
        assert!(err.to_string().contains("chunk_overlap"));
        assert!(split_text("text", &cfg(0, 0)).is_err());
    }

    #[test]
    fn windows_respect_size() {
        let text = numbered_words(300);
        let chunks = split_text(&text, &cfg(60, 10)).unwrap();
        assert!(chunks.len() > 1);
        for chunk in &chunks {
            assert!(char_len(chunk) <= 60, "oversized chunk: {chunk:?}");
        }
    }

    #[test]
    fn consecutive_windows_overlap() {
        let text = numbered_words(300);
        let chunks = split_text(&text, &cfg(60, 10)).unwrap();

        for pair in chunks.windows(2) {
            let first_word = pair[1].split(' ').next().unwrap();
            assert!(
                pair[0].split(' ').any(|w| w == first_word),
                "{:?} does not continue {:?}",
                pair[1],
                pair[0]
            );
        }
    }

    #[test]
    fn every_word_survives() {
        let text = numbered_words(120);
        let chunks = split_text(&text, &cfg(40, 0)).unwrap();
        let rejoined: Vec<&str> = chunks.iter().flat_map(|c| c.split(' ')).collect();
        assert_eq!(rejoined.join(" "), text);
    }

    #[test]
    fn paragraphs_are_preferred_boundaries() {
        let text = format!("{}\n\n{}", "a".repeat(30), "b".repeat(30));
        let chunks = split_text(&text, &cfg(40, 5)).unwrap();
        assert_eq!(chunks, vec!["a".repeat(30), "b".repeat(30)]);
    }

    #[test]
    fn long_token_falls_back_to_characters() {
        let text = "x".repeat(25);
        let chunks = split_text(&text, &cfg(10, 0)).unwrap();
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks.concat(), text);
    }

    #[test]
    fn multibyte_text_is_split_on_char_boundaries() {
        let text = "é".repeat(30);
        let chunks = split_text(&text, &cfg(10, 2)).unwrap();
        assert!(chunks.iter().all(|c| char_len(c) <= 10));
    }

    #[test]
    fn whitespace_only_produces_nothing() {
        assert!(split_text("   \n\n  \n", &cfg(10, 2)).unwrap().is_empty());
    }

    #[test]
    fn documents_keep_provenance() {
        let docs = vec![LoadedDocument {
            text: numbered_words(100),
            source: "docs/policy.txt".into(),
            file_type: ".txt".into(),
        }];
        let chunks = split_documents(&docs, &cfg(50, 5)).unwrap();
        assert!(chunks.len() > 1);
        for (i, chunk) in chunks.iter().enumerate() {
            assert_eq!(chunk.chunk_index, i);
            assert_eq!(chunk.source, "docs/policy.txt");
            assert_eq!(chunk.file_type, ".txt");
        }
    }
}
