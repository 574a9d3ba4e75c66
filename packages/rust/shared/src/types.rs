//! Core domain types for proposal runs.

use serde::{Deserialize, Serialize};

use crate::error::{Result, RmProposalError};

// ---------------------------------------------------------------------------
// Origin
// ---------------------------------------------------------------------------

/// The provider category a fragment came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Origin {
    /// Web search results.
    Web,
    /// General internal document store hits.
    Internal,
    /// Product information sheets pulled from the internal store.
    ProductInfo,
}

impl Origin {
    /// Citation label prefix, e.g. `Web Source` in `[Web Source 3]`.
    pub fn citation_label(&self) -> &'static str {
        match self {
            Self::Web => "Web Source",
            Self::Internal => "Internal Doc",
            Self::ProductInfo => "Product Info",
        }
    }

    /// Format the citation label for a given ordinal.
    pub fn cite(&self, ordinal: usize) -> String {
        format!("[{} {ordinal}]", self.citation_label())
    }
}

impl std::fmt::Display for Origin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Web => "web",
            Self::Internal => "internal",
            Self::ProductInfo => "product_info",
        };
        f.write_str(s)
    }
}

// ---------------------------------------------------------------------------
// SourceFragment
// ---------------------------------------------------------------------------

/// One retrieved unit of text with provenance metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceFragment {
    /// Which provider category produced this fragment.
    pub origin: Origin,
    /// 1-based position within its origin group; drives citation labels.
    pub ordinal: usize,
    /// Result title (web hits only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Fragment text.
    pub body: String,
    /// URL or file path.
    pub locator: String,
    /// File extension for internal documents (e.g. `.pdf`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_type: Option<String>,
    /// Provider relevance score, when reported.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relevance: Option<f64>,
}

impl SourceFragment {
    /// The citation label for this fragment, e.g. `[Internal Doc 2]`.
    pub fn citation(&self) -> String {
        self.origin.cite(self.ordinal)
    }

    /// Final path component of the locator, used for internal document headings.
    pub fn locator_name(&self) -> &str {
        self.locator
            .rsplit(['/', '\\'])
            .next()
            .filter(|s| !s.is_empty())
            .unwrap_or(&self.locator)
    }
}

// ---------------------------------------------------------------------------
// WorkItem
// ---------------------------------------------------------------------------

/// A per-company proposal request. Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkItem {
    subject: String,
    web_query: String,
    internal_query: Option<String>,
    internal_enabled: bool,
}

impl WorkItem {
    /// Build a validated work item.
    ///
    /// The subject must be non-empty. When `web_query` is `None` or blank it is
    /// derived from `query_template`, where `{subject}` is substituted.
    pub fn new(
        subject: impl Into<String>,
        web_query: Option<String>,
        internal_query: Option<String>,
        internal_enabled: bool,
        query_template: &str,
    ) -> Result<Self> {
        let subject = subject.into().trim().to_string();
        if subject.is_empty() {
            return Err(RmProposalError::validation("subject name cannot be empty"));
        }

        let web_query = match web_query.map(|q| q.trim().to_string()) {
            Some(q) if !q.is_empty() => q,
            _ => query_template.replace("{subject}", &subject),
        };

        let internal_query = internal_query
            .map(|q| q.trim().to_string())
            .filter(|q| !q.is_empty());

        Ok(Self {
            subject,
            web_query,
            internal_query,
            internal_enabled,
        })
    }

    /// Company / subject name.
    pub fn subject(&self) -> &str {
        &self.subject
    }

    /// Primary web search query.
    pub fn web_query(&self) -> &str {
        &self.web_query
    }

    /// Optional secondary query for internal retrieval.
    pub fn internal_query(&self) -> Option<&str> {
        self.internal_query.as_deref()
    }

    /// Query used for internal retrieval: the internal query, else the web query.
    pub fn effective_internal_query(&self) -> &str {
        self.internal_query.as_deref().unwrap_or(&self.web_query)
    }

    /// Whether internal document retrieval runs for this item.
    pub fn internal_enabled(&self) -> bool {
        self.internal_enabled
    }
}
