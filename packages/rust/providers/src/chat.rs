//! OpenAI-compatible chat-completion client.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use rmproposal_shared::{GenerationConfig, Result, RmProposalError};

use crate::{TextGenerator, build_client, check_status, endpoint};

/// A system + user prompt pair.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    pub system: String,
    pub user: String,
    pub temperature: f32,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    temperature: f32,
    messages: [ChatMessage<'a>; 2],
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: AssistantMessage,
}

#[derive(Deserialize)]
struct AssistantMessage {
    #[serde(default)]
    content: Option<String>,
}

/// Client for `{api_base}/chat/completions`.
pub struct ChatClient {
    client: Client,
    url: String,
    model: String,
}

impl ChatClient {
    pub fn new(config: &GenerationConfig, api_key: &str) -> Result<Self> {
        Ok(Self {
            client: build_client(api_key, config.timeout_secs)?,
            url: endpoint(&config.api_base, "chat/completions")?,
            model: config.model.clone(),
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }
}

#[async_trait]
impl TextGenerator for ChatClient {
    #[instrument(skip_all, fields(model = %self.model, prompt_chars = request.user.len()))]
    async fn generate(&self, request: &GenerationRequest) -> Result<String> {
        let body = ChatRequest {
            model: &self.model,
            temperature: request.temperature,
            messages: [
                ChatMessage {
                    role: "system",
                    content: &request.system,
                },
                ChatMessage {
                    role: "user",
                    content: &request.user,
                },
            ],
        };

        let response = self
            .client
            .post(&self.url)
            .json(&body)
            .send()
            .await
            .map_err(|e| RmProposalError::Provider(format!("chat completion request failed: {e}")))?;
        let response = check_status(response, "chat completion").await?;

        let parsed: ChatResponse = response.json().await.map_err(|e| {
            RmProposalError::Provider(format!("chat completion response was malformed: {e}"))
        })?;

        let content = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .filter(|c| !c.trim().is_empty())
            .ok_or_else(|| RmProposalError::Provider("chat completion returned no content".into()))?;

        debug!(response_chars = content.len(), "chat completion received");
        Ok(content)
    }
}
