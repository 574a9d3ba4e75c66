//! HTML document extraction.
//!
//! Internal documents saved as HTML (intranet pages, exported product sheets)
//! are reduced to their main content, converted to Markdown with `htmd`, and
//! passed through a short cleanup pipeline so the chunker sees plain prose.

use std::sync::LazyLock;

use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use tracing::debug;

use rmproposal_shared::{Result, RmProposalError};

static TABLE_SEL: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("table").expect("valid selector"));
static TR_SEL: LazyLock<Selector> = LazyLock::new(|| Selector::parse("tr").expect("valid selector"));
static CELL_SEL: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("th, td").expect("valid selector"));

/// Convert an HTML document into cleaned Markdown text.
pub(crate) fn html_to_text(html: &str) -> Result<String> {
    let content_html = extract_content_html(html);
    let content_html = preprocess_tables(&content_html);

    let converter = htmd::HtmlToMarkdown::builder()
        .skip_tags(vec![
            "script", "style", "nav", "header", "footer", "iframe", "noscript", "svg",
        ])
        .build();

    let raw = converter
        .convert(&content_html)
        .map_err(|e| RmProposalError::Ingest(format!("htmd conversion failed: {e}")))?;

    debug!(raw_len = raw.len(), "html converted");
    Ok(cleanup(&raw))
}

// ---------------------------------------------------------------------------
// Content extraction
// ---------------------------------------------------------------------------

/// Pick the main content container, falling back to `<body>`.
fn extract_content_html(html: &str) -> String {
    let doc = Html::parse_document(html);

    let selectors = ["[role=\"main\"]", "article", "main", ".content", "body"];

    for sel_str in &selectors {
        if let Ok(selector) = Selector::parse(sel_str) {
            if let Some(el) = doc.select(&selector).next() {
                return el.inner_html();
            }
        }
    }

    html.to_string()
}

/// Rewrite `<table>` elements as pipe tables; `htmd` leaves them as loose text.
fn preprocess_tables(html: &str) -> String {
    let doc = Html::parse_fragment(html);
    let mut result = html.to_string();

    for table in doc.select(&TABLE_SEL) {
        let rendered = table_to_markdown(&table);
        result = result.replacen(&table.html(), &rendered, 1);
    }

    result
}

fn table_to_markdown(table: &ElementRef) -> String {
    let rows: Vec<Vec<String>> = table
        .select(&TR_SEL)
        .map(|tr| {
            tr.select(&CELL_SEL)
                .map(|cell| cell.text().collect::<String>().trim().to_string())
                .collect::<Vec<_>>()
        })
        .filter(|row| !row.is_empty())
        .collect();

    let Some(width) = rows.iter().map(Vec::len).max() else {
        return String::new();
    };

    let mut md = String::from("\n\n");
    for (i, row) in rows.iter().enumerate() {
        let mut cells = row.clone();
        cells.resize(width, String::new());
        md.push_str(&format!("| {} |\n", cells.join(" | ")));
        if i == 0 {
            md.push_str(&format!("|{}\n", " --- |".repeat(width)));
        }
    }
    md.push('\n');
    md
}

// ---------------------------------------------------------------------------
// Cleanup
// ---------------------------------------------------------------------------

fn cleanup(md: &str) -> String {
    let stripped = strip_leftover_html(md);
    let trimmed = stripped
        .lines()
        .map(str::trim_end)
        .collect::<Vec<_>>()
        .join("\n");
    collapse_blank_lines(&trimmed).trim().to_string()
}

/// Remove layout tags that survived conversion, keeping their text.
fn strip_leftover_html(md: &str) -> String {
    static TAG_RE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r"</?(?:div|span|section|article|aside|figure|figcaption|details|summary)(?:\s[^>]*)?>")
            .expect("valid regex")
    });

    TAG_RE.replace_all(md, "").to_string()
}

/// Collapse runs of blank lines into a single paragraph break.
fn collapse_blank_lines(md: &str) -> String {
    static MULTI_BLANK_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"\n{3,}").expect("valid regex"));

    MULTI_BLANK_RE.replace_all(md, "\n\n").to_string()
}
