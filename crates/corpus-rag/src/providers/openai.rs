//! OpenAI embeddings and chat adapters

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

use crate::config::ProviderConfig;
use crate::error::{Error, Result};
use crate::ratelimit::RateLimiter;

use super::{classify_status, transport_error, with_retries, ChatProvider, EmbeddingsProvider};

fn http_client(timeout_secs: u64) -> Result<Client> {
    Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .pool_max_idle_per_host(5)
        .build()
        .map_err(Error::Http)
}

/// OpenAI embeddings via `/v1/embeddings`
pub struct OpenAiEmbeddings {
    client: Client,
    base_url: String,
    api_key: String,
    model: String,
    dimensions: usize,
    limiter: Arc<RateLimiter>,
    max_retries: u32,
}

#[derive(Serialize)]
struct EmbeddingsRequest<'a> {
    model: &'a str,
    input: &'a [String],
    #[serde(skip_serializing_if = "Option::is_none")]
    dimensions: Option<usize>,
}

#[derive(Deserialize)]
struct EmbeddingsResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

impl OpenAiEmbeddings {
    pub fn new(config: &ProviderConfig, limiter: Arc<RateLimiter>) -> Result<Self> {
        Ok(Self {
            client: http_client(config.timeout_secs)?,
            base_url: config.openai.base_url.clone(),
            api_key: config.openai.api_key.clone(),
            model: config.openai.embedding_model.clone(),
            dimensions: config.openai.embedding_dimensions,
            limiter,
            max_retries: config.max_retries,
        })
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let url = format!("{}/embeddings", self.base_url);
        // text-embedding-3 honors a dimensions override; older models do not.
        let dimensions = self.model.starts_with("text-embedding-3").then_some(self.dimensions);

        with_retries("openai embeddings", self.max_retries, || async {
            let delay = self.limiter.request("openai_embeddings").await;
            if delay > 0.0 {
                tracing::debug!(delay_secs = delay, "embeddings call was rate-limit delayed");
            }

            let response = self
                .client
                .post(&url)
                .bearer_auth(&self.api_key)
                .json(&EmbeddingsRequest {
                    model: &self.model,
                    input: texts,
                    dimensions,
                })
                .send()
                .await
                .map_err(|e| transport_error("openai", e))?;

            if !response.status().is_success() {
                let status = response.status();
                let body = response.text().await.unwrap_or_default();
                return Err(Error::provider(
                    classify_status(status),
                    format!("openai embeddings failed ({status}): {body}"),
                ));
            }

            let parsed: EmbeddingsResponse = response
                .json()
                .await
                .map_err(|e| Error::internal(format!("bad openai embeddings response: {e}")))?;
            Ok(parsed.data.into_iter().map(|d| d.embedding).collect())
        })
        .await
    }
}

#[async_trait]
impl EmbeddingsProvider for OpenAiEmbeddings {
    async fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        self.embed(texts).await
    }

    async fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        let input = vec![text.to_string()];
        let mut vectors = self.embed(&input).await?;
        vectors
            .pop()
            .ok_or_else(|| Error::internal("openai returned no embedding for query"))
    }

    fn dimension(&self) -> usize {
        self.dimensions
    }

    fn name(&self) -> &str {
        "openai"
    }
}

/// OpenAI chat via `/v1/chat/completions`
pub struct OpenAiChat {
    client: Client,
    base_url: String,
    api_key: String,
    model: String,
    limiter: Arc<RateLimiter>,
    max_retries: u32,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Deserialize)]
struct ChatChoiceMessage {
    content: Option<String>,
}

impl OpenAiChat {
    pub fn new(config: &ProviderConfig, limiter: Arc<RateLimiter>) -> Result<Self> {
        Ok(Self {
            client: http_client(config.timeout_secs)?,
            base_url: config.openai.base_url.clone(),
            api_key: config.openai.api_key.clone(),
            model: config.openai.model.clone(),
            limiter,
            max_retries: config.max_retries,
        })
    }
}

#[async_trait]
impl ChatProvider for OpenAiChat {
    async fn complete(
        &self,
        system_prompt: &str,
        user_prompt: &str,
        temperature: f32,
        max_tokens: Option<u32>,
    ) -> Result<String> {
        let url = format!("{}/chat/completions", self.base_url);

        with_retries("openai chat", self.max_retries, || async {
            self.limiter.request("openai_chat").await;

            let response = self
                .client
                .post(&url)
                .bearer_auth(&self.api_key)
                .json(&ChatRequest {
                    model: &self.model,
                    messages: vec![
                        ChatMessage {
                            role: "system",
                            content: system_prompt,
                        },
                        ChatMessage {
                            role: "user",
                            content: user_prompt,
                        },
                    ],
                    temperature,
                    max_tokens,
                })
                .send()
                .await
                .map_err(|e| transport_error("openai", e))?;

            if !response.status().is_success() {
                let status = response.status();
                let body = response.text().await.unwrap_or_default();
                return Err(Error::provider(
                    classify_status(status),
                    format!("openai chat failed ({status}): {body}"),
                ));
            }

            let parsed: ChatResponse = response
                .json()
                .await
                .map_err(|e| Error::internal(format!("bad openai chat response: {e}")))?;
            parsed
                .choices
                .into_iter()
                .next()
                .and_then(|c| c.message.content)
                .ok_or_else(|| Error::internal("openai chat returned no content"))
        })
        .await
    }

    fn name(&self) -> &str {
        "openai"
    }

    fn model(&self) -> &str {
        &self.model
    }
}
