//! Google Gemini embeddings and chat adapters
//!
//! Uses the Generative Language REST API with API-key auth.

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

#[derive(Serialize)]
struct Content<'a> {
    parts: Vec<Part<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<&'a str>,
}

#[derive(Serialize)]
struct Part<'a> {
    text: &'a str,
}

/// Gemini embeddings via `:embedContent` / `:batchEmbedContents`
pub struct GeminiEmbeddings {
    client: Client,
    base_url: String,
    api_key: String,
    model: String,
    dimensions: usize,
    limiter: Arc<RateLimiter>,
    max_retries: u32,
}

#[derive(Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    content: Content<'a>,
}

#[derive(Serialize)]
struct BatchEmbedRequest<'a> {
    requests: Vec<EmbedRequest<'a>>,
}

#[derive(Deserialize)]
struct EmbedResponse {
    embedding: EmbeddingValues,
}

#[derive(Deserialize)]
struct BatchEmbedResponse {
    embeddings: Vec<EmbeddingValues>,
}

#[derive(Deserialize)]
struct EmbeddingValues {
    values: Vec<f32>,
}

impl GeminiEmbeddings {
    pub fn new(config: &ProviderConfig, limiter: Arc<RateLimiter>) -> Result<Self> {
        Ok(Self {
            client: http_client(config.timeout_secs)?,
            base_url: config.gemini.base_url.trim_end_matches('/').to_string(),
            api_key: config.gemini.api_key.clone(),
            model: config.gemini.embedding_model.clone(),
            dimensions: config.gemini.embedding_dimensions,
            limiter,
            max_retries: config.max_retries,
        })
    }
}

#[async_trait]
impl EmbeddingsProvider for GeminiEmbeddings {
    async fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let url = format!(
            "{}/{}:batchEmbedContents?key={}",
            self.base_url, self.model, self.api_key
        );

        with_retries("gemini embeddings", self.max_retries, || async {
            self.limiter.request("gemini_embeddings").await;

            let request = BatchEmbedRequest {
                requests: texts
                    .iter()
                    .map(|text| EmbedRequest {
                        model: &self.model,
                        content: Content {
                            parts: vec![Part { text }],
                            role: None,
                        },
                    })
                    .collect(),
            };

            let response = self
                .client
                .post(&url)
                .json(&request)
                .send()
                .await
                .map_err(|e| transport_error("gemini", e))?;

            if !response.status().is_success() {
                let status = response.status();
                let body = response.text().await.unwrap_or_default();
                return Err(Error::provider(
                    classify_status(status),
                    format!("gemini embeddings failed ({status}): {body}"),
                ));
            }

            let parsed: BatchEmbedResponse = response
                .json()
                .await
                .map_err(|e| Error::internal(format!("bad gemini embeddings response: {e}")))?;
            Ok(parsed.embeddings.into_iter().map(|e| e.values).collect())
        })
        .await
    }

    async fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        let url = format!(
            "{}/{}:embedContent?key={}",
            self.base_url, self.model, self.api_key
        );

        with_retries("gemini embed query", self.max_retries, || async {
            self.limiter.request("gemini_embeddings").await;

            let request = EmbedRequest {
                model: &self.model,
                content: Content {
                    parts: vec![Part { text }],
                    role: None,
                },
            };

            let response = self
                .client
                .post(&url)
                .json(&request)
                .send()
                .await
                .map_err(|e| transport_error("gemini", e))?;

            if !response.status().is_success() {
                let status = response.status();
                let body = response.text().await.unwrap_or_default();
                return Err(Error::provider(
                    classify_status(status),
                    format!("gemini embed query failed ({status}): {body}"),
                ));
            }

            let parsed: EmbedResponse = response
                .json()
                .await
                .map_err(|e| Error::internal(format!("bad gemini embedding response: {e}")))?;
            Ok(parsed.embedding.values)
        })
        .await
    }

    fn dimension(&self) -> usize {
        self.dimensions
    }

    fn name(&self) -> &str {
        "gemini"
    }
}

/// Gemini chat via `:generateContent`
pub struct GeminiChat {
    client: Client,
    base_url: String,
    api_key: String,
    model: String,
    limiter: Arc<RateLimiter>,
    max_retries: u32,
}

#[derive(Serialize)]
struct GenerateRequest<'a> {
    contents: Vec<Content<'a>>,
    #[serde(rename = "systemInstruction")]
    system_instruction: Content<'a>,
    #[serde(rename = "generationConfig")]
    generation_config: GenerationConfig,
}

#[derive(Serialize)]
struct GenerationConfig {
    temperature: f32,
    #[serde(rename = "maxOutputTokens", skip_serializing_if = "Option::is_none")]
    max_output_tokens: Option<u32>,
}

#[derive(Deserialize)]
struct GenerateResponse {
    candidates: Vec<Candidate>,
}

#[derive(Deserialize)]
struct Candidate {
    content: ResponseContent,
}

#[derive(Deserialize)]
struct ResponseContent {
    parts: Vec<ResponsePart>,
}

#[derive(Deserialize)]
struct ResponsePart {
    text: String,
}

impl GeminiChat {
    pub fn new(config: &ProviderConfig, limiter: Arc<RateLimiter>) -> Result<Self> {
        Ok(Self {
            client: http_client(config.timeout_secs)?,
            base_url: config.gemini.base_url.trim_end_matches('/').to_string(),
            api_key: config.gemini.api_key.clone(),
            model: config.gemini.model.clone(),
            limiter,
            max_retries: config.max_retries,
        })
    }
}

#[async_trait]
impl ChatProvider for GeminiChat {
    async fn complete(
        &self,
        system_prompt: &str,
        user_prompt: &str,
        temperature: f32,
        max_tokens: Option<u32>,
    ) -> Result<String> {
        let url = format!(
            "{}/models/{}:generateContent?key={}",
            self.base_url, self.model, self.api_key
        );

        with_retries("gemini chat", self.max_retries, || async {
            self.limiter.request("gemini_chat").await;

            let request = GenerateRequest {
                contents: vec![Content {
                    parts: vec![Part { text: user_prompt }],
                    role: Some("user"),
                }],
                system_instruction: Content {
                    parts: vec![Part {
                        text: system_prompt,
                    }],
                    role: None,
                },
                generation_config: GenerationConfig {
                    temperature,
                    max_output_tokens: max_tokens,
                },
            };

            let response = self
                .client
                .post(&url)
                .json(&request)
                .send()
                .await
                .map_err(|e| transport_error("gemini", e))?;

            if !response.status().is_success() {
                let status = response.status();
                let body = response.text().await.unwrap_or_default();
                return Err(Error::provider(
                    classify_status(status),
                    format!("gemini generation failed ({status}): {body}"),
                ));
            }

            let parsed: GenerateResponse = response
                .json()
                .await
                .map_err(|e| Error::internal(format!("bad gemini chat response: {e}")))?;
            parsed
                .candidates
                .into_iter()
                .next()
                .and_then(|c| c.content.parts.into_iter().next())
                .map(|p| p.text)
                .ok_or_else(|| Error::internal("gemini returned no text"))
        })
        .await
    }

    fn name(&self) -> &str {
        "gemini"
    }

    fn model(&self) -> &str {
        &self.model
    }
}
