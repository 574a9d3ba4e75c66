//! Prefix-keyed fragment deduplication.
//!
//! Per-product retrieval calls often return the same chunk more than once.
//! A fragment's key is the SHA-256 of the first `prefix_chars` characters of
//! its body; the first fragment seen for a key wins and later ones are dropped.
//! Two fragments with the same opening and different tails therefore collapse,
//! and the prefix length is the knob for that trade-off.

use std::collections::HashSet;

use sha2::{Digest, Sha256};

use rmproposal_shared::SourceFragment;

/// Key for a fragment body: SHA-256 of its first `prefix_chars` characters.
pub fn dedup_key(body: &str, prefix_chars: usize) -> Vec<u8> {
    let end = body
        .char_indices()
        .nth(prefix_chars)
        .map_or(body.len(), |(i, _)| i);
    Sha256::digest(&body.as_bytes()[..end]).to_vec()
}

/// Keep the first fragment for each key, preserving input order.
pub fn dedup_fragments(fragments: Vec<SourceFragment>, prefix_chars: usize) -> Vec<SourceFragment> {
    let mut seen = HashSet::new();
    fragments
        .into_iter()
        .filter(|f| seen.insert(dedup_key(&f.body, prefix_chars)))
        .collect()
}

/// Reassign ordinals `1..=n` in sequence order.
pub fn renumber(fragments: Vec<SourceFragment>) -> Vec<SourceFragment> {
    fragments
        .into_iter()
        .enumerate()
        .map(|(i, f)| SourceFragment {
            ordinal: i + 1,
            ..f
        })
        .collect()
}
