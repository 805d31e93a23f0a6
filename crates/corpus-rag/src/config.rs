//! Configuration for the RAG service
//!
//! All settings come from environment variables with workable defaults.
//! `RagConfig::from_env` reads the environment once at startup and validates
//! the result; handlers only ever see the typed config.

use serde::{Deserialize, Serialize};
use std::env;
use std::str::FromStr;

use crate::error::{Error, Result};

/// Main service configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RagConfig {
    /// HTTP server configuration
    pub server: ServerConfig,
    /// LLM / embedding provider configuration
    pub providers: ProviderConfig,
    /// Chunking configuration
    pub chunking: ChunkingConfig,
    /// Vector store configuration
    pub vector_store: VectorStoreConfig,
    /// Outbound rate limit configuration
    pub rate_limit: RateLimitConfig,
    /// Ingestion pipeline configuration
    pub pipeline: PipelineConfig,
    /// Retrieval configuration
    pub retrieval: RetrievalConfig,
    /// Answer cache configuration
    pub cache: CacheConfig,
    /// Deployment environment (development, staging, production)
    pub environment: String,
}

impl Default for RagConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            providers: ProviderConfig::default(),
            chunking: ChunkingConfig::default(),
            vector_store: VectorStoreConfig::default(),
            rate_limit: RateLimitConfig::default(),
            pipeline: PipelineConfig::default(),
            retrieval: RetrievalConfig::default(),
            cache: CacheConfig::default(),
            environment: "development".to_string(),
        }
    }
}

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Bind address for the HTTP/WS listener
    pub listen_addr: String,
    /// Enable permissive CORS
    pub enable_cors: bool,
    /// Grace period for in-flight work at shutdown
    pub shutdown_grace_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:8000".to_string(),
            enable_cors: true,
            shutdown_grace_secs: 30,
        }
    }
}

/// Which provider family backs each role
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Provider for document/query embeddings
    pub embeddings_provider: String,
    /// Provider for metadata enrichment
    pub metadata_provider: String,
    /// Provider for question answering
    pub qa_provider: String,
    /// OpenAI credentials and models
    pub openai: OpenAiConfig,
    /// Gemini credentials and models
    pub gemini: GeminiConfig,
    /// Per-request timeout for provider calls
    pub timeout_secs: u64,
    /// Retry attempts on transient provider failures
    pub max_retries: u32,
    /// Generation temperature for QA
    pub temperature: f32,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            // Gemini embeddings are the cost-effective default; QA stays on OpenAI
            embeddings_provider: "gemini".to_string(),
            metadata_provider: "openai".to_string(),
            qa_provider: "openai".to_string(),
            openai: OpenAiConfig::default(),
            gemini: GeminiConfig::default(),
            timeout_secs: 30,
            max_retries: 3,
            temperature: 0.7,
        }
    }
}

/// OpenAI configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenAiConfig {
    /// API key
    #[serde(skip_serializing)]
    pub api_key: String,
    /// Chat model
    pub model: String,
    /// Embedding model
    pub embedding_model: String,
    /// Embedding output dimensions (text-embedding-3 supports truncation)
    pub embedding_dimensions: usize,
    /// API base URL
    pub base_url: String,
}

impl Default for OpenAiConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            model: "gpt-4o".to_string(),
            embedding_model: "text-embedding-3-large".to_string(),
            embedding_dimensions: 512,
            base_url: "https://api.openai.com/v1".to_string(),
        }
    }
}

/// Gemini configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeminiConfig {
    /// API key
    #[serde(skip_serializing)]
    pub api_key: String,
    /// Chat model
    pub model: String,
    /// Embedding model (fully qualified, e.g. "models/embedding-001")
    pub embedding_model: String,
    /// Embedding output dimensions
    pub embedding_dimensions: usize,
    /// API base URL
    pub base_url: String,
}

impl Default for GeminiConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            model: "gemini-2.5-flash".to_string(),
            embedding_model: "models/embedding-001".to_string(),
            embedding_dimensions: 768,
            base_url: "https://generativelanguage.googleapis.com/v1beta".to_string(),
        }
    }
}

/// Text chunking configuration. Sizes are in tokens, not characters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkingConfig {
    /// Target chunk size in tokens
    pub chunk_size: usize,
    /// Token overlap between consecutive chunks
    pub chunk_overlap: usize,
    /// Default strategy when the request does not name one
    pub default_strategy: String,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: 1000,
            chunk_overlap: 200,
            default_strategy: "recursive".to_string(),
        }
    }
}

/// Vector store (Qdrant) configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorStoreConfig {
    /// Cluster endpoint
    pub url: String,
    /// API key for Qdrant Cloud
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    /// Default collection bound on cold start
    pub collection: String,
    /// Upsert batch size
    pub batch_size: usize,
    /// Per-request timeout
    pub timeout_secs: u64,
    /// Retry attempts on transient store failures
    pub max_retries: u32,
    /// Consecutive failures before the circuit opens
    pub breaker_threshold: u32,
    /// Seconds the circuit stays open before a half-open probe
    pub breaker_recovery_secs: u64,
}

impl Default for VectorStoreConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:6333".to_string(),
            api_key: None,
            collection: "rag_documents".to_string(),
            batch_size: 100,
            timeout_secs: 30,
            max_retries: 3,
            breaker_threshold: 5,
            breaker_recovery_secs: 60,
        }
    }
}

/// Outbound rate limit configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Combined requests-per-minute budget across all provider calls
    pub max_rpm: usize,
    /// Sliding window length in seconds
    pub window_secs: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_rpm: 10,
            window_secs: 60,
        }
    }
}

/// Ingestion pipeline configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Enrichment fan-out bound
    pub concurrency: usize,
    /// Default for `enable_metadata` when a request omits it
    pub enable_metadata_default: bool,
    /// How long a finished upload stays queryable
    pub progress_ttl_secs: u64,
    /// Chunks per embed+upsert batch during indexing
    pub index_batch_size: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            concurrency: 8,
            enable_metadata_default: true,
            progress_ttl_secs: 300,
            index_batch_size: 100,
        }
    }
}

/// Retrieval configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalConfig {
    /// Default top-k
    pub k: usize,
    /// MMR candidate pool factor: fetch_k = k * factor
    pub fetch_k_factor: usize,
    /// MMR relevance/diversity balance (1.0 = pure relevance)
    pub mmr_lambda: f32,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            k: 5,
            fetch_k_factor: 4,
            mmr_lambda: 0.5,
        }
    }
}

/// Answer cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Enable the in-memory answer cache
    pub enabled: bool,
    /// Entry time-to-live in seconds
    pub ttl_secs: u64,
    /// Maximum cached answers
    pub max_entries: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ttl_secs: 3600,
            max_entries: 512,
        }
    }
}

impl RagConfig {
    /// Build configuration from the environment, falling back to defaults.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Some(v) = read("LISTEN_ADDR") {
            config.server.listen_addr = v;
        }
        if let Some(v) = read("SHUTDOWN_GRACE_SECONDS") {
            config.server.shutdown_grace_secs = parse("SHUTDOWN_GRACE_SECONDS", &v)?;
        }

        if let Some(v) = read("EMBEDDINGS_PROVIDER") {
            config.providers.embeddings_provider = v.to_lowercase();
        }
        if let Some(v) = read("METADATA_PROVIDER") {
            config.providers.metadata_provider = v.to_lowercase();
        }
        if let Some(v) = read("QA_PROVIDER") {
            config.providers.qa_provider = v.to_lowercase();
        }
        if let Some(v) = read("OPENAI_API_KEY") {
            config.providers.openai.api_key = v;
        }
        if let Some(v) = read("OPENAI_MODEL") {
            config.providers.openai.model = v;
        }
        if let Some(v) = read("OPENAI_EMBEDDING_MODEL") {
            config.providers.openai.embedding_model = v;
        }
        if let Some(v) = read("OPENAI_EMBEDDING_DIMENSIONS") {
            config.providers.openai.embedding_dimensions =
                parse("OPENAI_EMBEDDING_DIMENSIONS", &v)?;
        }
        if let Some(v) = read("OPENAI_BASE_URL") {
            config.providers.openai.base_url = v;
        }
        if let Some(v) = read("GEMINI_API_KEY") {
            config.providers.gemini.api_key = v;
        }
        if let Some(v) = read("GEMINI_MODEL") {
            config.providers.gemini.model = v;
        }
        if let Some(v) = read("GEMINI_EMBEDDING_MODEL") {
            config.providers.gemini.embedding_model = v;
        }
        if let Some(v) = read("GEMINI_EMBEDDING_DIMENSIONS") {
            config.providers.gemini.embedding_dimensions =
                parse("GEMINI_EMBEDDING_DIMENSIONS", &v)?;
        }
        if let Some(v) = read("GEMINI_BASE_URL") {
            config.providers.gemini.base_url = v;
        }
        if let Some(v) = read("PROVIDER_TIMEOUT_SECONDS") {
            config.providers.timeout_secs = parse("PROVIDER_TIMEOUT_SECONDS", &v)?;
        }
        if let Some(v) = read("PROVIDER_MAX_RETRIES") {
            config.providers.max_retries = parse("PROVIDER_MAX_RETRIES", &v)?;
        }
        if let Some(v) = read("QA_TEMPERATURE") {
            config.providers.temperature = parse("QA_TEMPERATURE", &v)?;
        }

        if let Some(v) = read("CHUNK_SIZE") {
            config.chunking.chunk_size = parse("CHUNK_SIZE", &v)?;
        }
        if let Some(v) = read("CHUNK_OVERLAP") {
            config.chunking.chunk_overlap = parse("CHUNK_OVERLAP", &v)?;
        }
        if let Some(v) = read("DEFAULT_CHUNKING_STRATEGY") {
            config.chunking.default_strategy = v.to_lowercase();
        }

        if let Some(v) = read("VECTOR_STORE_URL") {
            config.vector_store.url = v;
        }
        if let Some(v) = read("VECTOR_STORE_API_KEY") {
            config.vector_store.api_key = Some(v);
        }
        if let Some(v) = read("VECTOR_STORE_COLLECTION") {
            config.vector_store.collection = v;
        }
        if let Some(v) = read("VECTOR_STORE_BATCH_SIZE") {
            config.vector_store.batch_size = parse("VECTOR_STORE_BATCH_SIZE", &v)?;
        }
        if let Some(v) = read("VECTOR_STORE_TIMEOUT_SECONDS") {
            config.vector_store.timeout_secs = parse("VECTOR_STORE_TIMEOUT_SECONDS", &v)?;
        }
        if let Some(v) = read("CIRCUIT_BREAKER_THRESHOLD") {
            config.vector_store.breaker_threshold = parse("CIRCUIT_BREAKER_THRESHOLD", &v)?;
        }
        if let Some(v) = read("CIRCUIT_BREAKER_TIMEOUT") {
            config.vector_store.breaker_recovery_secs = parse("CIRCUIT_BREAKER_TIMEOUT", &v)?;
        }
        if let Some(v) = read("RETRY_MAX_ATTEMPTS") {
            config.vector_store.max_retries = parse("RETRY_MAX_ATTEMPTS", &v)?;
        }

        if let Some(v) = read("RATE_LIMIT_RPM") {
            config.rate_limit.max_rpm = parse("RATE_LIMIT_RPM", &v)?;
        }

        if let Some(v) = read("PIPELINE_CONCURRENCY") {
            config.pipeline.concurrency = parse("PIPELINE_CONCURRENCY", &v)?;
        }
        if let Some(v) = read("ENABLE_METADATA_DEFAULT") {
            config.pipeline.enable_metadata_default = parse_bool("ENABLE_METADATA_DEFAULT", &v)?;
        }
        if let Some(v) = read("PROGRESS_TTL_SECONDS") {
            config.pipeline.progress_ttl_secs = parse("PROGRESS_TTL_SECONDS", &v)?;
        }
        if let Some(v) = read("INDEX_BATCH_SIZE") {
            config.pipeline.index_batch_size = parse("INDEX_BATCH_SIZE", &v)?;
        }

        if let Some(v) = read("RETRIEVER_K") {
            config.retrieval.k = parse("RETRIEVER_K", &v)?;
        }
        if let Some(v) = read("RETRIEVER_FETCH_K_FACTOR") {
            config.retrieval.fetch_k_factor = parse("RETRIEVER_FETCH_K_FACTOR", &v)?;
        }
        if let Some(v) = read("RETRIEVER_MMR_LAMBDA") {
            config.retrieval.mmr_lambda = parse("RETRIEVER_MMR_LAMBDA", &v)?;
        }

        if let Some(v) = read("CACHE_ENABLED") {
            config.cache.enabled = parse_bool("CACHE_ENABLED", &v)?;
        }
        if let Some(v) = read("CACHE_TTL_SECONDS") {
            config.cache.ttl_secs = parse("CACHE_TTL_SECONDS", &v)?;
        }
        if let Some(v) = read("CACHE_MAX_ENTRIES") {
            config.cache.max_entries = parse("CACHE_MAX_ENTRIES", &v)?;
        }

        if let Some(v) = read("ENVIRONMENT") {
            config.environment = v;
        }

        config.validate()?;
        Ok(config)
    }

    /// Enforce the constraints the rest of the service relies on.
    pub fn validate(&self) -> Result<()> {
        let c = &self.chunking;
        if c.chunk_size < 100 || c.chunk_size > 5000 {
            return Err(Error::Config(
                "CHUNK_SIZE must be between 100 and 5000 tokens".to_string(),
            ));
        }
        if c.chunk_overlap > 500 {
            return Err(Error::Config(
                "CHUNK_OVERLAP must be between 0 and 500 tokens".to_string(),
            ));
        }
        if c.chunk_overlap >= c.chunk_size {
            return Err(Error::Config(
                "CHUNK_OVERLAP must be smaller than CHUNK_SIZE".to_string(),
            ));
        }

        for (name, dims) in [
            ("OPENAI", self.providers.openai.embedding_dimensions),
            ("GEMINI", self.providers.gemini.embedding_dimensions),
        ] {
            if ![256, 512, 768, 1536, 3072].contains(&dims) {
                return Err(Error::Config(format!(
                    "{name}_EMBEDDING_DIMENSIONS must be one of: 256, 512, 768, 1536, 3072"
                )));
            }
        }

        let url = &self.vector_store.url;
        if !(url.starts_with("https://") || url.starts_with("http://localhost") || url.starts_with("http://127.0.0.1")) {
            return Err(Error::Config(
                "VECTOR_STORE_URL must use https:// (http://localhost allowed for dev)".to_string(),
            ));
        }

        if self.rate_limit.max_rpm == 0 {
            return Err(Error::Config("RATE_LIMIT_RPM must be positive".to_string()));
        }
        if self.pipeline.concurrency == 0 {
            return Err(Error::Config("PIPELINE_CONCURRENCY must be positive".to_string()));
        }
        if self.retrieval.fetch_k_factor == 0 {
            return Err(Error::Config("RETRIEVER_FETCH_K_FACTOR must be positive".to_string()));
        }
        if !(0.0..=1.0).contains(&self.retrieval.mmr_lambda) {
            return Err(Error::Config("RETRIEVER_MMR_LAMBDA must be in [0, 1]".to_string()));
        }

        if !["development", "staging", "production"].contains(&self.environment.as_str()) {
            return Err(Error::Config(
                "ENVIRONMENT must be one of: development, staging, production".to_string(),
            ));
        }

        Ok(())
    }

    pub fn is_production(&self) -> bool {
        self.environment == "production"
    }
}

fn read(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn parse<T: FromStr>(key: &str, value: &str) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e| Error::Config(format!("invalid {key}={value}: {e}")))
}

fn parse_bool(key: &str, value: &str) -> Result<bool> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(Error::Config(format!("invalid {key}={other}: expected a boolean"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        RagConfig::default().validate().unwrap();
    }

    #[test]
    fn rejects_bad_chunk_size() {
        let mut config = RagConfig::default();
        config.chunking.chunk_size = 50;
        assert!(config.validate().is_err());
        config.chunking.chunk_size = 6000;
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_overlap_at_least_chunk_size() {
        let mut config = RagConfig::default();
        config.chunking.chunk_size = 200;
        config.chunking.chunk_overlap = 200;
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_plain_http_store_url() {
        let mut config = RagConfig::default();
        config.vector_store.url = "http://qdrant.example.com:6333".to_string();
        assert!(config.validate().is_err());
        config.vector_store.url = "https://qdrant.example.com:6333".to_string();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn rejects_odd_embedding_dimensions() {
        let mut config = RagConfig::default();
        config.providers.openai.embedding_dimensions = 1000;
        assert!(config.validate().is_err());
    }

    #[test]
    fn parse_bool_variants() {
        assert!(parse_bool("X", "true").unwrap());
        assert!(parse_bool("X", "1").unwrap());
        assert!(!parse_bool("X", "off").unwrap());
        assert!(parse_bool("X", "maybe").is_err());
    }
}
