//! Application state: the supervisor-owned object graph
//!
//! Built once at startup and shared by every handler. The rate limiter,
//! provider adapters, vector store handle, progress tracker, pipeline, and
//! QA service live for the process lifetime; per-upload work only borrows
//! them.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

use crate::chunking::{Chunker, ChunkingStrategy};
use crate::config::RagConfig;
use crate::enrichment::MetadataEnricher;
use crate::error::Result;
use crate::pipeline::IngestionPipeline;
use crate::progress::ProgressTracker;
use crate::providers;
use crate::qa::QaService;
use crate::ratelimit::RateLimiter;
use crate::vector_store::{QdrantStore, VectorStore};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    config: RagConfig,
    limiter: Arc<RateLimiter>,
    qdrant: Arc<QdrantStore>,
    progress: Arc<ProgressTracker>,
    pipeline: Arc<IngestionPipeline>,
    qa: Arc<QaService>,
    shutdown_tx: watch::Sender<bool>,
    shutting_down: AtomicBool,
}

impl AppState {
    /// Build the object graph and probe the vector store.
    pub async fn new(config: RagConfig) -> Result<Self> {
        tracing::info!("initializing application state");

        let limiter = Arc::new(RateLimiter::new(
            config.rate_limit.max_rpm,
            Duration::from_secs(config.rate_limit.window_secs),
        ));

        let embeddings = providers::build_embeddings(&config.providers, Arc::clone(&limiter))?;
        let metadata_chat = providers::build_chat(
            &config.providers.metadata_provider,
            &config.providers,
            Arc::clone(&limiter),
        )?;
        let qa_chat = providers::build_chat(
            &config.providers.qa_provider,
            &config.providers,
            Arc::clone(&limiter),
        )?;

        let qdrant = Arc::new(QdrantStore::new(&config.vector_store)?);
        let store: Arc<dyn VectorStore> = qdrant.clone();
        match store.health().await {
            Ok(health) if health.ok => {
                tracing::info!(latency_ms = health.latency_ms, "vector store reachable");
            }
            Ok(health) => {
                tracing::warn!(detail = %health.detail, "vector store unhealthy at startup");
            }
            Err(err) => {
                tracing::warn!(error = %err, "vector store probe failed at startup");
            }
        }

        let progress = Arc::new(ProgressTracker::new(Duration::from_secs(
            config.pipeline.progress_ttl_secs,
        )));

        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let chunker = Chunker::new(&config.chunking)?;
        let enricher = MetadataEnricher::new(Arc::clone(&metadata_chat));
        let pipeline = Arc::new(IngestionPipeline::new(
            chunker,
            Arc::clone(&embeddings),
            enricher,
            Arc::clone(&store),
            Arc::clone(&progress),
            &config.pipeline,
            shutdown_rx,
        ));

        let qa = Arc::new(QaService::new(
            Arc::clone(&store),
            embeddings,
            qa_chat,
            Arc::clone(&pipeline),
            config.retrieval.clone(),
            &config.cache,
            config.vector_store.collection.clone(),
            config.providers.temperature,
        ));

        tracing::info!("application state ready");
        Ok(Self {
            inner: Arc::new(AppStateInner {
                config,
                limiter,
                qdrant,
                progress,
                pipeline,
                qa,
                shutdown_tx,
                shutting_down: AtomicBool::new(false),
            }),
        })
    }

    pub fn config(&self) -> &RagConfig {
        &self.inner.config
    }

    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.inner.limiter
    }

    pub fn store(&self) -> Arc<dyn VectorStore> {
        self.inner.qdrant.clone()
    }

    /// Concrete handle, for breaker snapshots in `/stats`.
    pub fn qdrant(&self) -> &Arc<QdrantStore> {
        &self.inner.qdrant
    }

    pub fn progress(&self) -> &Arc<ProgressTracker> {
        &self.inner.progress
    }

    pub fn pipeline(&self) -> &Arc<IngestionPipeline> {
        &self.inner.pipeline
    }

    pub fn qa(&self) -> &Arc<QaService> {
        &self.inner.qa
    }

    /// Default chunking strategy from configuration.
    pub fn default_strategy(&self) -> Result<ChunkingStrategy> {
        self.inner.config.chunking.default_strategy.parse()
    }

    /// Stop accepting uploads and signal cancellation to pipelines.
    pub fn begin_shutdown(&self) {
        if !self.inner.shutting_down.swap(true, Ordering::SeqCst) {
            tracing::info!("shutdown initiated");
            let _ = self.inner.shutdown_tx.send(true);
        }
    }

    pub fn is_shutting_down(&self) -> bool {
        self.inner.shutting_down.load(Ordering::SeqCst)
    }
}
