//! HTTP collaborators used by the proposal pipeline.
//!
//! The pipeline only sees the [`WebSearch`], [`TextGenerator`] and [`Embedder`]
//! traits; the concrete clients here talk to a Tavily-style search API and to
//! OpenAI-compatible chat-completion and embedding endpoints.

mod chat;
mod embedding;
mod search;

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderValue};
use url::Url;

use rmproposal_shared::{Result, RmProposalError};

pub use chat::{ChatClient, GenerationRequest};
pub use embedding::EmbeddingClient;
pub use search::{TavilySearch, WebHit, WebQuery};

/// User-Agent string for provider requests.
const USER_AGENT: &str = concat!("rmproposal/", env!("CARGO_PKG_VERSION"));

/// Longest error body excerpt carried into a provider error.
const ERROR_BODY_EXCERPT: usize = 300;

// ---------------------------------------------------------------------------
// Collaborator traits
// ---------------------------------------------------------------------------

/// Web search collaborator.
#[async_trait]
pub trait WebSearch: Send + Sync {
    /// Run one query; hits come back in rank order.
    async fn search(&self, query: &WebQuery) -> Result<Vec<WebHit>>;
}

/// Chat-completion collaborator. One blocking call per request, no streaming.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate(&self, request: &GenerationRequest) -> Result<String>;
}

/// Text embedding collaborator.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Model identifier, recorded alongside an index so queries use the same space.
    fn model(&self) -> &str;

    /// Embed each input; output order matches input order.
    async fn embed(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>>;
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Join an API base URL and an endpoint path, validating the base.
pub(crate) fn endpoint(api_base: &str, path: &str) -> Result<String> {
    let base = Url::parse(api_base)
        .map_err(|e| RmProposalError::config(format!("invalid api_base '{api_base}': {e}")))?;
    Ok(format!(
        "{}/{}",
        base.as_str().trim_end_matches('/'),
        path.trim_start_matches('/')
    ))
}

/// Build a reqwest client that sends a bearer token on every request.
pub(crate) fn build_client(api_key: &str, timeout_secs: u64) -> Result<Client> {
    let mut headers = HeaderMap::new();
    let auth = HeaderValue::from_str(&format!("Bearer {}", api_key.trim()))
        .map_err(|_| RmProposalError::config("API key contains invalid header characters"))?;
    headers.insert(AUTHORIZATION, auth);

    Client::builder()
        .user_agent(USER_AGENT)
        .default_headers(headers)
        .timeout(Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| RmProposalError::Provider(format!("failed to build HTTP client: {e}")))
}

/// Turn a non-2xx response into a provider error with a short body excerpt.
pub(crate) async fn check_status(
    response: reqwest::Response,
    what: &str,
) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response
        .text()
        .await
        .unwrap_or_else(|_| "<body unavailable>".to_string());
    let excerpt: String = body.chars().take(ERROR_BODY_EXCERPT).collect();
    Err(RmProposalError::Provider(format!(
        "{what} returned HTTP {status}: {excerpt}"
    )))
}
