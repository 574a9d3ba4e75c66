//! OpenAI-compatible embeddings client.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use rmproposal_shared::{EmbeddingConfig, Result, RmProposalError};

use crate::{Embedder, build_client, check_status, endpoint};

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
    index: usize,
}

/// Batched client for `{api_base}/embeddings`.
pub struct EmbeddingClient {
    client: Client,
    url: String,
    model: String,
    batch_size: usize,
}

impl EmbeddingClient {
    pub fn new(config: &EmbeddingConfig, api_key: &str) -> Result<Self> {
        if config.batch_size == 0 {
            return Err(RmProposalError::config("embedding batch_size must be positive"));
        }
        Ok(Self {
            client: build_client(api_key, config.timeout_secs)?,
            url: endpoint(&config.api_base, "embeddings")?,
            model: config.model.clone(),
            batch_size: config.batch_size,
        })
    }

    async fn embed_batch(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>> {
        let body = EmbeddingRequest {
            model: &self.model,
            input: inputs,
        };

        let response = self
            .client
            .post(&self.url)
            .json(&body)
            .send()
            .await
            .map_err(|e| RmProposalError::Provider(format!("embedding request failed: {e}")))?;
        let response = check_status(response, "embedding").await?;

        let mut parsed: EmbeddingResponse = response.json().await.map_err(|e| {
            RmProposalError::Provider(format!("embedding response was malformed: {e}"))
        })?;

        if parsed.data.len() != inputs.len() {
            return Err(RmProposalError::Provider(format!(
                "embedding provider returned {} vectors for {} inputs",
                parsed.data.len(),
                inputs.len()
            )));
        }

        parsed.data.sort_by_key(|d| d.index);
        Ok(parsed.data.into_iter().map(|d| d.embedding).collect())
    }
}

#[async_trait]
impl Embedder for EmbeddingClient {
    fn model(&self) -> &str {
        &self.model
    }

    #[instrument(skip_all, fields(model = %self.model, inputs = inputs.len()))]
    async fn embed(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut vectors = Vec::with_capacity(inputs.len());
        for batch in inputs.chunks(self.batch_size) {
            vectors.extend(self.embed_batch(batch).await?);
            debug!(embedded = vectors.len(), "embedding batch complete");
        }
        Ok(vectors)
    }
}
