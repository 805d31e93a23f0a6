//! Ingestion pipeline: chunk → enrich → embed → index
//!
//! One background run per upload. Enrichment fans out under a semaphore;
//! per-chunk enrichment failures degrade to empty metadata, while any
//! embedding or indexing failure fails the whole upload. Progress is
//! emitted at stage boundaries, per enriched chunk, and per indexed batch,
//! and is monotonic: enrichment fills 0→90%, indexing fills the rest.

use futures_util::future::join_all;
use serde::Serialize;
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{watch, Semaphore};
use uuid::Uuid;

use crate::chunking::{Chunker, ChunkingStrategy};
use crate::config::PipelineConfig;
use crate::enrichment::MetadataEnricher;
use crate::error::{Error, Result};
use crate::progress::{ProgressTracker, ProgressUpdate, UploadStatus};
use crate::providers::EmbeddingsProvider;
use crate::types::{Chunk, Document, EnrichedChunk};
use crate::vector_store::{IndexedPoint, VectorStore};

/// Per-run options
#[derive(Debug, Clone)]
pub struct IngestOptions {
    pub collection: String,
    pub strategy: ChunkingStrategy,
    pub enable_metadata: bool,
    pub force_recreate: bool,
    /// Present for API uploads; `None` for the synchronous initialize path
    pub upload_id: Option<Uuid>,
}

/// Result of a completed ingestion
#[derive(Debug, Clone, Serialize)]
pub struct IngestReport {
    pub total_documents: usize,
    pub total_chunks: usize,
    pub total_vectors: usize,
    pub collection_name: String,
    pub processing_time_ms: u64,
    pub estimated_cost_usd: f64,
}

/// Orchestrates one upload end to end.
pub struct IngestionPipeline {
    chunker: Chunker,
    embeddings: Arc<dyn EmbeddingsProvider>,
    enricher: MetadataEnricher,
    store: Arc<dyn VectorStore>,
    progress: Arc<ProgressTracker>,
    concurrency: usize,
    index_batch_size: usize,
    shutdown: watch::Receiver<bool>,
}

impl IngestionPipeline {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        chunker: Chunker,
        embeddings: Arc<dyn EmbeddingsProvider>,
        enricher: MetadataEnricher,
        store: Arc<dyn VectorStore>,
        progress: Arc<ProgressTracker>,
        config: &PipelineConfig,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            chunker,
            embeddings,
            enricher,
            store,
            progress,
            concurrency: config.concurrency.max(1),
            index_batch_size: config.index_batch_size.max(1),
            shutdown,
        }
    }

    pub fn progress_tracker(&self) -> &Arc<ProgressTracker> {
        &self.progress
    }

    /// Run the pipeline. On error the upload (if tracked) transitions to
    /// `failed` with the failing stage in the message, and the error is
    /// returned to the caller.
    pub async fn run(&self, documents: Vec<Document>, opts: IngestOptions) -> Result<IngestReport> {
        let started = Instant::now();
        match self.execute(&documents, &opts, started).await {
            Ok(report) => {
                if let Some(id) = opts.upload_id {
                    let payload = serde_json::to_value(&report).unwrap_or_else(|_| json!({}));
                    let _ = self.progress.finish(
                        id,
                        UploadStatus::Completed,
                        "Processing completed successfully",
                        Some(payload),
                        None,
                    );
                }
                tracing::info!(
                    collection = %report.collection_name,
                    vectors = report.total_vectors,
                    elapsed_ms = report.processing_time_ms,
                    "ingestion complete"
                );
                Ok(report)
            }
            Err((stage, err)) => {
                if let Some(id) = opts.upload_id {
                    let reason = match &err {
                        Error::Cancelled(_) => "cancelled".to_string(),
                        other => other.to_string(),
                    };
                    let _ = self.progress.finish(
                        id,
                        UploadStatus::Failed,
                        format!("Processing failed during {}: {err}", stage.as_str()),
                        None,
                        Some(reason),
                    );
                }
                tracing::error!(stage = stage.as_str(), error = %err, "ingestion failed");
                Err(err)
            }
        }
    }

    async fn execute(
        &self,
        documents: &[Document],
        opts: &IngestOptions,
        started: Instant,
    ) -> std::result::Result<IngestReport, (UploadStatus, Error)> {
        let id = opts.upload_id;

        // Documents are already in memory; extraction is a formal stage.
        self.emit(
            id,
            UploadStatus::Extracting,
            format!("Received {} documents", documents.len()),
        );
        self.ensure_live().map_err(|e| (UploadStatus::Extracting, e))?;

        self.emit(id, UploadStatus::Chunking, "Chunking documents".to_string());
        let mut chunks: Vec<Chunk> = Vec::new();
        for doc in documents {
            let mut doc_chunks = self
                .chunker
                .chunk(doc, opts.strategy, self.embeddings.as_ref())
                .await
                .map_err(|e| (UploadStatus::Chunking, e))?;
            // Chunk indexes stay document-local; ordering across documents
            // follows the request.
            chunks.append(&mut doc_chunks);
        }
        let total_chunks = chunks.len();
        if let Some(id) = id {
            let _ = self.progress.update(
                id,
                ProgressUpdate {
                    status: Some(UploadStatus::Chunking),
                    current_chunk: Some(0),
                    total_chunks: Some(total_chunks),
                    message: Some(format!("Created {total_chunks} chunks")),
                    progress_percent: Some(0),
                },
            );
        }

        if total_chunks == 0 {
            return Ok(IngestReport {
                total_documents: documents.len(),
                total_chunks: 0,
                total_vectors: 0,
                collection_name: opts.collection.clone(),
                processing_time_ms: started.elapsed().as_millis() as u64,
                estimated_cost_usd: 0.0,
            });
        }

        let enriched = if opts.enable_metadata {
            self.emit(id, UploadStatus::Enriching, "Extracting chunk metadata".to_string());
            self.enrich_all(chunks, total_chunks, id)
                .await
                .map_err(|e| (UploadStatus::Enriching, e))?
        } else {
            chunks.into_iter().map(EnrichedChunk::bare).collect()
        };

        // Entering indexing must not recompute percent from the chunk
        // counters (enrichment already drove current == total); pin it to
        // the stage base so only finish() reaches 100.
        let base_percent = if opts.enable_metadata { 90u8 } else { 0u8 };
        if let Some(id) = id {
            let _ = self.progress.update(
                id,
                ProgressUpdate {
                    status: Some(UploadStatus::Indexing),
                    message: Some("Indexing vectors".to_string()),
                    progress_percent: Some(base_percent),
                    ..Default::default()
                },
            );
        }
        let indexed = self
            .index_all(&enriched, opts, id)
            .await
            .map_err(|e| (UploadStatus::Indexing, e))?;

        let dimension = self.embeddings.dimension();
        Ok(IngestReport {
            total_documents: documents.len(),
            total_chunks,
            total_vectors: indexed,
            collection_name: opts.collection.clone(),
            processing_time_ms: started.elapsed().as_millis() as u64,
            estimated_cost_usd: estimate_cost(indexed, dimension),
        })
    }

    /// Fan out enrichment under the concurrency bound. Chunk order is
    /// preserved; failures degrade that chunk to empty metadata.
    async fn enrich_all(
        &self,
        chunks: Vec<Chunk>,
        total_chunks: usize,
        id: Option<Uuid>,
    ) -> Result<Vec<EnrichedChunk>> {
        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let done = AtomicUsize::new(0);

        let futures = chunks.into_iter().map(|chunk| {
            let semaphore = Arc::clone(&semaphore);
            let done = &done;
            async move {
                let _permit = semaphore
                    .acquire()
                    .await
                    .map_err(|_| Error::Cancelled("enrichment pool closed".to_string()))?;
                self.ensure_live()?;

                let metadata = match self.enricher.enrich(&chunk.text).await {
                    Ok(meta) => Some(meta),
                    Err(err) => {
                        tracing::warn!(
                            source = %chunk.source,
                            chunk_index = chunk.chunk_index,
                            error = %err,
                            "enrichment failed, continuing with empty metadata"
                        );
                        None
                    }
                };

                let current = done.fetch_add(1, Ordering::SeqCst) + 1;
                if let Some(id) = id {
                    // Enrichment owns 0..=90% of the bar.
                    let percent = (current * 90 / total_chunks) as u8;
                    let _ = self.progress.update(
                        id,
                        ProgressUpdate {
                            status: Some(UploadStatus::Enriching),
                            current_chunk: Some(current),
                            total_chunks: Some(total_chunks),
                            progress_percent: Some(percent),
                            message: None,
                        },
                    );
                }
                Ok(EnrichedChunk { chunk, metadata })
            }
        });

        join_all(futures).await.into_iter().collect()
    }

    /// Embed and upsert in batches. Any failure here is fatal for the
    /// upload. Indexing fills the remaining progress up to 100%.
    async fn index_all(
        &self,
        enriched: &[EnrichedChunk],
        opts: &IngestOptions,
        id: Option<Uuid>,
    ) -> Result<usize> {
        self.ensure_live()?;
        let dimension = self.embeddings.dimension();
        self.store
            .ensure_collection(&opts.collection, dimension, opts.force_recreate)
            .await?;

        let base_percent = if opts.enable_metadata { 90u8 } else { 0u8 };
        let batches: Vec<&[EnrichedChunk]> = enriched.chunks(self.index_batch_size).collect();
        let total_batches = batches.len();
        let mut indexed = 0usize;

        for (batch_number, batch) in batches.into_iter().enumerate() {
            self.ensure_live()?;

            let texts: Vec<String> = batch.iter().map(|e| e.chunk.text.clone()).collect();
            let vectors = self.embeddings.embed_documents(&texts).await?;
            if vectors.len() != batch.len() {
                return Err(Error::internal(format!(
                    "embedding count mismatch: sent {}, got {}",
                    batch.len(),
                    vectors.len()
                )));
            }

            let points: Vec<IndexedPoint> = batch
                .iter()
                .zip(vectors)
                .map(|(enriched, vector)| IndexedPoint {
                    id: Uuid::new_v4(),
                    vector,
                    payload: enriched.payload(),
                })
                .collect();

            indexed += self.store.upsert(&opts.collection, points).await?;

            if let Some(id) = id {
                let span = (100 - base_percent) as usize;
                let percent = base_percent + ((batch_number + 1) * span / total_batches) as u8;
                let _ = self.progress.update(
                    id,
                    ProgressUpdate {
                        status: Some(UploadStatus::Indexing),
                        progress_percent: Some(percent.min(100)),
                        message: Some(format!(
                            "Indexed batch {}/{total_batches}",
                            batch_number + 1
                        )),
                        ..Default::default()
                    },
                );
            }
        }

        Ok(indexed)
    }

    fn emit(&self, id: Option<Uuid>, status: UploadStatus, message: String) {
        if let Some(id) = id {
            let _ = self.progress.update(
                id,
                ProgressUpdate {
                    status: Some(status),
                    message: Some(message),
                    ..Default::default()
                },
            );
        }
    }

    fn ensure_live(&self) -> Result<()> {
        if *self.shutdown.borrow() {
            Err(Error::Cancelled("service is shutting down".to_string()))
        } else {
            Ok(())
        }
    }
}

// The original tracked embedding spend as dimensions-per-vector against the
// provider's per-1k-token price; kept as a rough but stable estimate.
fn estimate_cost(vectors: usize, dimension: usize) -> f64 {
    (vectors as f64 * dimension as f64 / 1000.0) * 0.00013
}
