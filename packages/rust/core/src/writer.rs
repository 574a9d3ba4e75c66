//! Artifact writer.
//!
//! Renders a finished [`PipelineState`] into the plain-text proposal file and
//! writes it atomically (temp file, then rename) into the output directory.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use rmproposal_shared::{Result, RmProposalError, SourceFragment};

use crate::pipeline::{PipelineState, ProposalVariant};

const BANNER_WIDTH: usize = 80;
const NO_ANALYSIS: &str = "(No analysis was generated for this run.)";

/// File-name-safe form of a subject: whitespace runs become `_`, anything
/// other than Unicode letters, digits and `._-` is dropped. Path separators
/// and control characters never survive.
pub fn sanitize_subject(subject: &str) -> String {
    let joined = subject.split_whitespace().collect::<Vec<_>>().join("_");
    let cleaned: String = joined
        .chars()
        .filter(|c| c.is_alphanumeric() || matches!(c, '.' | '_' | '-'))
        .collect();
    let cleaned = cleaned.trim_matches('.');

    if cleaned.is_empty() {
        "subject".into()
    } else {
        cleaned.to_string()
    }
}

/// `{subject}_{suffix}.txt` for the given variant.
pub fn artifact_file_name(subject: &str, variant: ProposalVariant) -> String {
    let suffix = match variant {
        ProposalVariant::Basic => "hybrid_analysis",
        ProposalVariant::Eligibility => "eligibility_analysis",
    };
    format!("{}_{suffix}.txt", sanitize_subject(subject))
}

fn banner(variant: ProposalVariant, subject: &str) -> (String, &'static str) {
    match variant {
        ProposalVariant::Basic => (
            format!("HYBRID RM PROPOSAL ANALYSIS: {subject}"),
            "(Based on Web Search + Internal Documents)",
        ),
        ProposalVariant::Eligibility => (
            format!("RM PROPOSAL WITH ELIGIBILITY ANALYSIS: {subject}"),
            "(Web Search + Product Info Sheets)",
        ),
    }
}

/// Render the full artifact text.
pub fn render_artifact(state: &PipelineState, generated_at: DateTime<Utc>) -> String {
    let rule = "=".repeat(BANNER_WIDTH);
    let (title, subtitle) = banner(state.variant, state.item.subject());

    let mut out = String::new();
    out.push_str(&format!("{title}\n{rule}\n{subtitle}\n{rule}\n\n"));
    out.push_str(&format!(
        "Generated: {}\n\n",
        generated_at.format("%Y-%m-%d %H:%M:%S UTC")
    ));

    if !state.failures.is_empty() {
        out.push_str("RUN STATUS: DEGRADED\n");
        for failure in &state.failures {
            out.push_str(&format!(
                "- [{}] {}: {}\n",
                failure.stage, failure.kind, failure.message
            ));
        }
        out.push('\n');
    }

    if state.variant.has_product_identification() && !state.products.is_empty() {
        out.push_str("SUGGESTED LOAN PRODUCTS:\n");
        for (i, product) in state.products.iter().enumerate() {
            out.push_str(&format!("   {}. {product}\n", i + 1));
        }
        out.push('\n');
    }

    if state.analysis.trim().is_empty() {
        out.push_str(NO_ANALYSIS);
    } else {
        out.push_str(state.analysis.trim_end());
    }
    out.push_str(&format!("\n\n{rule}\n\n"));

    out.push_str("WEB SOURCES:\n");
    if state.web.is_empty() {
        out.push_str("(none)\n");
    }
    for fragment in &state.web {
        out.push_str(&format!(
            "{} {}\n               {}\n",
            fragment.citation(),
            fragment.title.as_deref().unwrap_or(""),
            fragment.locator
        ));
    }

    for (heading, fragments) in [
        ("INTERNAL DOCUMENTS", &state.internal),
        ("PRODUCT INFORMATION SHEETS", &state.product_info),
    ] {
        if fragments.is_empty() {
            continue;
        }
        out.push_str(&format!("\n{heading}:\n"));
        for fragment in fragments {
            out.push_str(&document_entry(fragment));
        }
    }

    out
}

fn document_entry(fragment: &SourceFragment) -> String {
    format!(
        "{} {}\n                 File type: {}\n",
        fragment.citation(),
        fragment.locator_name(),
        fragment.file_type.as_deref().unwrap_or("unknown")
    )
}

/// Write the artifact for `state` into `output_dir` and return its path.
///
/// The file is written to `.{name}.tmp` first and renamed into place, so a
/// failed write never leaves a truncated artifact behind.
pub fn write_artifact(state: &PipelineState, output_dir: &Path) -> Result<PathBuf> {
    std::fs::create_dir_all(output_dir)
        .map_err(|e| RmProposalError::persistence(output_dir, e))?;

    let filename = artifact_file_name(state.item.subject(), state.variant);
    let target = output_dir.join(&filename);
    let temp = output_dir.join(format!(".{filename}.tmp"));

    let text = render_artifact(state, Utc::now());
    std::fs::write(&temp, &text).map_err(|e| RmProposalError::persistence(&temp, e))?;
    debug!(path = %temp.display(), bytes = text.len(), "artifact staged");

    std::fs::rename(&temp, &target).map_err(|e| {
        let _ = std::fs::remove_file(&temp);
        RmProposalError::persistence(&target, e)
    })?;

    info!(path = %target.display(), "artifact written");
    Ok(target)
}
