//! Parsing the product-identification response.
//!
//! The model is asked for a bare JSON array of product names. Responses are
//! often wrapped in a Markdown code fence or padded with prose, so the fence is
//! stripped and, failing a direct parse, the outermost `[...]` span is tried.
//! Anything that still does not yield at least one name is a parse error; the
//! pipeline answers that with its default product list.

use std::sync::LazyLock;

use regex::Regex;

use rmproposal_shared::{Result, RmProposalError};

/// Strip a surrounding ```` ``` ```` / ```` ```json ```` fence, if present.
pub fn strip_code_fence(response: &str) -> &str {
    static FENCE_RE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r"(?s)^```[A-Za-z]*\s*(.*?)\s*```$").expect("valid regex")
    });

    let trimmed = response.trim();
    match FENCE_RE.captures(trimmed).and_then(|c| c.get(1)) {
        Some(inner) => inner.as_str(),
        None => trimmed,
    }
}

/// Parse a list of product names, keeping at most `max_products`.
///
/// Non-string entries are ignored, names are trimmed, and repeats dropped.
pub fn parse_product_list(response: &str, max_products: usize) -> Result<Vec<String>> {
    let body = strip_code_fence(response);

    let value: serde_json::Value = match serde_json::from_str(body) {
        Ok(v) => v,
        Err(first_err) => bracketed(body)
            .and_then(|inner| serde_json::from_str(inner).ok())
            .ok_or_else(|| {
                RmProposalError::parse(format!("product list is not valid JSON: {first_err}"))
            })?,
    };

    let items = value.as_array().ok_or_else(|| {
        RmProposalError::parse(format!("expected a JSON array of product names, got: {value}"))
    })?;

    let mut products: Vec<String> = Vec::new();
    for name in items.iter().filter_map(|v| v.as_str()).map(str::trim) {
        if !name.is_empty() && !products.iter().any(|p| p == name) {
            products.push(name.to_string());
        }
    }

    if products.is_empty() {
        return Err(RmProposalError::parse("product list contained no names"));
    }

    products.truncate(max_products.max(1));
    Ok(products)
}

fn bracketed(text: &str) -> Option<&str> {
    let start = text.find('[')?;
    let end = text.rfind(']')?;
    (start < end).then(|| &text[start..=end])
}

/// The retrieval query used to find a product's information sheet.
pub fn product_sheet_query(product: &str) -> String {
    format!("{product} product information sheet eligibility criteria requirements")
}

/// The first `max_chars` characters of `text`.
pub fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((i, _)) => &text[..i],
        None => text,
    }
}
