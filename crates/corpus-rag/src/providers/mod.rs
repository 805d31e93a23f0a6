//! Provider abstractions for embeddings and chat completion
//!
//! Trait-based so the embedding, metadata, and QA roles can each be pointed
//! at a different provider family by configuration alone.

pub mod gemini;
pub mod openai;

use async_trait::async_trait;
use std::future::Future;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use crate::config::ProviderConfig;
use crate::error::{Error, ProviderErrorKind, Result};
use crate::ratelimit::RateLimiter;

pub use gemini::{GeminiChat, GeminiEmbeddings};
pub use openai::{OpenAiChat, OpenAiEmbeddings};

/// Trait for text embedding providers
///
/// Implementations must acquire a rate-limit slot (tag
/// `"<provider>_embeddings"`) before each outbound call; one provider call
/// counts as one slot regardless of how many texts it batches.
#[async_trait]
pub trait EmbeddingsProvider: Send + Sync {
    /// Embed a batch of documents
    async fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    /// Embed a single query
    async fn embed_query(&self, text: &str) -> Result<Vec<f32>>;

    /// Output vector dimension
    fn dimension(&self) -> usize;

    /// Provider name for logging
    fn name(&self) -> &str;
}

/// Trait for chat completion providers
#[async_trait]
pub trait ChatProvider: Send + Sync {
    /// Complete a (system, user) prompt pair
    async fn complete(
        &self,
        system_prompt: &str,
        user_prompt: &str,
        temperature: f32,
        max_tokens: Option<u32>,
    ) -> Result<String>;

    /// Provider name for logging
    fn name(&self) -> &str;

    /// Model identifier, reported in QA responses
    fn model(&self) -> &str;
}

/// Supported provider families
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderKind {
    OpenAi,
    Gemini,
}

impl FromStr for ProviderKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "openai" => Ok(Self::OpenAi),
            "gemini" => Ok(Self::Gemini),
            other => Err(Error::Config(format!(
                "unsupported provider '{other}': must be 'openai' or 'gemini'"
            ))),
        }
    }
}

/// Build the embeddings adapter selected by `embeddings_provider`.
pub fn build_embeddings(
    config: &ProviderConfig,
    limiter: Arc<RateLimiter>,
) -> Result<Arc<dyn EmbeddingsProvider>> {
    let adapter: Arc<dyn EmbeddingsProvider> =
        match config.embeddings_provider.parse::<ProviderKind>()? {
            ProviderKind::OpenAi => Arc::new(OpenAiEmbeddings::new(config, limiter)?),
            ProviderKind::Gemini => Arc::new(GeminiEmbeddings::new(config, limiter)?),
        };
    tracing::info!(
        provider = adapter.name(),
        dimension = adapter.dimension(),
        "embeddings adapter ready"
    );
    Ok(adapter)
}

/// Build a chat adapter for the named role (`metadata_provider` or
/// `qa_provider` value).
pub fn build_chat(
    provider: &str,
    config: &ProviderConfig,
    limiter: Arc<RateLimiter>,
) -> Result<Arc<dyn ChatProvider>> {
    let adapter: Arc<dyn ChatProvider> = match provider.parse::<ProviderKind>()? {
        ProviderKind::OpenAi => Arc::new(OpenAiChat::new(config, limiter)?),
        ProviderKind::Gemini => Arc::new(GeminiChat::new(config, limiter)?),
    };
    tracing::info!(provider = adapter.name(), model = adapter.model(), "chat adapter ready");
    Ok(adapter)
}

/// Classify a provider HTTP status into an error kind.
pub(crate) fn classify_status(status: reqwest::StatusCode) -> ProviderErrorKind {
    match status.as_u16() {
        401 | 403 => ProviderErrorKind::Auth,
        408 | 429 => ProviderErrorKind::QuotaExceeded,
        400..=499 => ProviderErrorKind::BadRequest,
        500..=599 => ProviderErrorKind::Unavailable,
        _ => ProviderErrorKind::Other,
    }
}

/// Map a reqwest transport failure onto the provider taxonomy.
pub(crate) fn transport_error(provider: &str, err: reqwest::Error) -> Error {
    let kind = if err.is_timeout() || err.is_connect() {
        ProviderErrorKind::Unavailable
    } else {
        ProviderErrorKind::Other
    };
    Error::provider(kind, format!("{provider} request failed: {err}"))
}

/// Run `op` with up to `max_retries` retries on transient failures, backing
/// off 1s/2s/4s. Exhausted retries surface as `Unavailable`; non-transient
/// errors pass through immediately.
pub(crate) async fn with_retries<T, F, Fut>(what: &str, max_retries: u32, op: F) -> Result<T>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut delay = Duration::from_secs(1);
    let mut attempt = 0u32;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_transient() && attempt < max_retries => {
                attempt += 1;
                tracing::warn!(
                    what,
                    attempt,
                    max_retries,
                    backoff_ms = delay.as_millis() as u64,
                    error = %err,
                    "transient provider failure, retrying"
                );
                tokio::time::sleep(delay).await;
                delay *= 2;
            }
            Err(err) if err.is_transient() => {
                tracing::error!(what, error = %err, "retries exhausted");
                return Err(Error::provider(
                    ProviderErrorKind::Unavailable,
                    format!("{what}: retries exhausted: {err}"),
                ));
            }
            Err(err) => return Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn status_classification() {
        use reqwest::StatusCode;
        assert_eq!(classify_status(StatusCode::UNAUTHORIZED), ProviderErrorKind::Auth);
        assert_eq!(classify_status(StatusCode::FORBIDDEN), ProviderErrorKind::Auth);
        assert_eq!(
            classify_status(StatusCode::TOO_MANY_REQUESTS),
            ProviderErrorKind::QuotaExceeded
        );
        assert_eq!(
            classify_status(StatusCode::REQUEST_TIMEOUT),
            ProviderErrorKind::QuotaExceeded
        );
        assert_eq!(classify_status(StatusCode::BAD_REQUEST), ProviderErrorKind::BadRequest);
        assert_eq!(
            classify_status(StatusCode::INTERNAL_SERVER_ERROR),
            ProviderErrorKind::Unavailable
        );
        assert_eq!(classify_status(StatusCode::BAD_GATEWAY), ProviderErrorKind::Unavailable);
    }

    #[tokio::test(start_paused = true)]
    async fn retries_transient_then_succeeds() {
        let calls = AtomicU32::new(0);
        let result = with_retries("test", 3, || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(Error::provider(ProviderErrorKind::Unavailable, "503"))
                } else {
                    Ok(42)
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_retries_surface_unavailable() {
        let calls = AtomicU32::new(0);
        let result: Result<()> = with_retries("test", 2, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(Error::provider(ProviderErrorKind::QuotaExceeded, "429")) }
        })
        .await;
        match result.unwrap_err() {
            Error::Provider { kind, .. } => assert_eq!(kind, ProviderErrorKind::Unavailable),
            other => panic!("unexpected error: {other}"),
        }
        // initial attempt + 2 retries
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn non_transient_errors_fail_fast() {
        let calls = AtomicU32::new(0);
        let result: Result<()> = with_retries("test", 3, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(Error::provider(ProviderErrorKind::Auth, "401")) }
        })
        .await;
        match result.unwrap_err() {
            Error::Provider { kind, .. } => assert_eq!(kind, ProviderErrorKind::Auth),
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn provider_kind_parsing() {
        assert_eq!("openai".parse::<ProviderKind>().unwrap(), ProviderKind::OpenAi);
        assert_eq!("Gemini".parse::<ProviderKind>().unwrap(), ProviderKind::Gemini);
        assert!("anthropic".parse::<ProviderKind>().is_err());
    }
}
