//! Tavily-style web search client.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use rmproposal_shared::{Result, RmProposalError, SearchConfig};

use crate::{WebSearch, build_client, check_status, endpoint};

/// A single web search request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebQuery {
    pub text: String,
    pub max_results: u32,
    /// Recency window understood by the provider (`day`, `week`, `month`, `year`).
    pub time_range: String,
}

/// One ranked search hit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebHit {
    #[serde(default)]
    pub title: String,
    pub url: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub score: Option<f64>,
}

#[derive(Serialize)]
struct SearchRequest<'a> {
    query: &'a str,
    max_results: u32,
    time_range: &'a str,
    search_depth: &'static str,
}

#[derive(Deserialize)]
struct SearchResponse {
    #[serde(default)]
    results: Vec<WebHit>,
}

/// Client for a Tavily-compatible `/search` endpoint.
pub struct TavilySearch {
    client: Client,
    url: String,
}

impl TavilySearch {
    pub fn new(config: &SearchConfig, api_key: &str) -> Result<Self> {
        Ok(Self {
            client: build_client(api_key, config.timeout_secs)?,
            url: endpoint(&config.api_base, "search")?,
        })
    }
}

#[async_trait]
impl WebSearch for TavilySearch {
    #[instrument(skip_all, fields(query = %query.text, max_results = query.max_results))]
    async fn search(&self, query: &WebQuery) -> Result<Vec<WebHit>> {
        let body = SearchRequest {
            query: &query.text,
            max_results: query.max_results,
            time_range: &query.time_range,
            search_depth: "basic",
        };

        let response = self
            .client
            .post(&self.url)
            .json(&body)
            .send()
            .await
            .map_err(|e| RmProposalError::Provider(format!("web search request failed: {e}")))?;
        let response = check_status(response, "web search").await?;

        let parsed: SearchResponse = response.json().await.map_err(|e| {
            RmProposalError::Provider(format!("web search response was malformed: {e}"))
        })?;

        debug!(hits = parsed.results.len(), "web search complete");
        Ok(parsed.results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config_for(server: &MockServer) -> SearchConfig {
        SearchConfig {
            api_base: server.uri(),
            ..SearchConfig::default()
        }
    }

    fn query() -> WebQuery {
        WebQuery {
            text: "Acme Corp news".into(),
            max_results: 30,
            time_range: "year".into(),
        }
    }

    #[tokio::test]
    async fn maps_ranked_results() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/search"))
            .and(header("authorization", "Bearer tvly-test"))
            .and(body_partial_json(serde_json::json!({
                "query": "Acme Corp news",
                "max_results": 30,
                "time_range": "year"
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "query": "Acme Corp news",
                "results": [
                    {"title": "Acme expands", "url": "https://news.example/a", "content": "Acme opens a plant.", "score": 0.91},
                    {"title": "Acme results", "url": "https://news.example/b", "content": "Revenue grew."}
                ]
            })))
            .mount(&server)
            .await;

        let search = TavilySearch::new(&config_for(&server), "tvly-test").unwrap();
        let hits = search.search(&query()).await.unwrap();

        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].title, "Acme expands");
        assert_eq!(hits[0].score, Some(0.91));
        assert_eq!(hits[1].url, "https://news.example/b");
        assert_eq!(hits[1].score, None);
    }

    #[tokio::test]
    async fn http_error_is_provider_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/search"))
            .respond_with(ResponseTemplate::new(432).set_body_string("usage limit exceeded"))
            .mount(&server)
            .await;

        let search = TavilySearch::new(&config_for(&server), "tvly-test").unwrap();
        let err = search.search(&query()).await.unwrap_err();

        assert!(matches!(err, RmProposalError::Provider(_)));
        assert!(err.to_string().contains("432"));
        assert!(err.to_string().contains("usage limit exceeded"));
    }

    #[tokio::test]
    async fn missing_results_field_is_empty() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/search"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({})))
            .mount(&server)
            .await;

        let search = TavilySearch::new(&config_for(&server), "tvly-test").unwrap();
        assert!(search.search(&query()).await.unwrap().is_empty());
    }
}
