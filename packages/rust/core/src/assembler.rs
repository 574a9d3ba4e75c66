//! Context assembler.
//!
//! Turns per-origin fragment sequences into the single labelled text blob the
//! analysis prompt is built from. Sections always appear in the same order and
//! empty sections are left out entirely. Each fragment heading carries its
//! citation label (`[Web Source 3]`), which the prompt tells the model to cite,
//! so the label must come straight from the fragment's ordinal.

use serde::Serialize;

use rmproposal_shared::{Origin, SourceFragment};

pub const WEB_HEADER: &str = "=== WEB SEARCH RESULTS ===";
pub const PRODUCTS_HEADER: &str = "=== SUGGESTED LOAN PRODUCTS ===";
pub const INTERNAL_HEADER: &str = "=== INTERNAL COMPANY DOCUMENTS ===";
pub const PRODUCT_INFO_HEADER: &str = "=== LOAN PRODUCT INFORMATION SHEETS ===";

const SECTION_SEPARATOR: &str = "\n\n";

/// The sections an assembled context can contain, in precedence order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SectionKind {
    Web,
    SuggestedProducts,
    Internal,
    ProductInfo,
}

/// Borrowed inputs to [`assemble`].
#[derive(Debug, Clone, Copy, Default)]
pub struct ContextInput<'a> {
    pub web: &'a [SourceFragment],
    pub products: &'a [String],
    pub internal: &'a [SourceFragment],
    pub product_info: &'a [SourceFragment],
}

/// Output of [`assemble`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AssembledContext {
    pub text: String,
    /// Sections present in `text`, in order.
    pub sections: Vec<SectionKind>,
}

impl AssembledContext {
    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }

    /// Whether any retrieved source material is present. A context holding
    /// only the suggested product list has nothing to cite.
    pub fn has_sources(&self) -> bool {
        self.sections
            .iter()
            .any(|s| *s != SectionKind::SuggestedProducts)
    }
}

/// Build the context blob. Pure and deterministic.
pub fn assemble(input: &ContextInput<'_>) -> AssembledContext {
    let mut parts = Vec::new();
    let mut sections = Vec::new();

    if !input.web.is_empty() {
        parts.push(render_section(WEB_HEADER, input.web));
        sections.push(SectionKind::Web);
    }

    if !input.products.is_empty() {
        let list = input
            .products
            .iter()
            .map(|p| format!("- {p}"))
            .collect::<Vec<_>>()
            .join("\n");
        parts.push(format!("{PRODUCTS_HEADER}\n\n{list}"));
        sections.push(SectionKind::SuggestedProducts);
    }

    if !input.internal.is_empty() {
        parts.push(render_section(INTERNAL_HEADER, input.internal));
        sections.push(SectionKind::Internal);
    }

    if !input.product_info.is_empty() {
        parts.push(render_section(PRODUCT_INFO_HEADER, input.product_info));
        sections.push(SectionKind::ProductInfo);
    }

    AssembledContext {
        text: parts.join(SECTION_SEPARATOR),
        sections,
    }
}

/// A header followed by its rendered fragments.
pub fn render_section(header: &str, fragments: &[SourceFragment]) -> String {
    format!("{header}\n\n{}", render_fragments(fragments))
}

/// Fragments rendered one after another, without a section header.
pub fn render_fragments(fragments: &[SourceFragment]) -> String {
    fragments
        .iter()
        .map(render_fragment)
        .collect::<Vec<_>>()
        .join(SECTION_SEPARATOR)
}

/// Render one fragment under its citation label.
pub fn render_fragment(fragment: &SourceFragment) -> String {
    let label = fragment.citation();
    match fragment.origin {
        Origin::Web => {
            let score = fragment
                .relevance
                .map(|s| s.to_string())
                .unwrap_or_else(|| "N/A".into());
            format!(
                "{label}\nTitle: {}\nContent: {}\nURL: {}\nScore: {score}",
                fragment.title.as_deref().unwrap_or(""),
                fragment.body,
                fragment.locator,
            )
        }
        Origin::Internal | Origin::ProductInfo => format!(
            "{label} {}\nContent: {}",
            fragment.locator_name(),
            fragment.body
        ),
    }
}
