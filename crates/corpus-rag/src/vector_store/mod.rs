//! Vector store coordination layer
//!
//! Everything that talks to the external vector database: the `VectorStore`
//! trait (the seam the pipeline and QA service depend on), the Qdrant REST
//! implementation, retry + circuit-breaker resilience, and retrievers.

pub mod qdrant;
pub mod resilience;
pub mod retriever;

use async_trait::async_trait;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::error::Result;

pub use qdrant::QdrantStore;
pub use retriever::{RetrievalStrategy, RetrievedDocument, Retriever};

/// A vector with its payload, ready for indexing
#[derive(Debug, Clone)]
pub struct IndexedPoint {
    pub id: Uuid,
    pub vector: Vec<f32>,
    pub payload: Map<String, Value>,
}

/// One search hit
#[derive(Debug, Clone)]
pub struct ScoredPoint {
    pub score: f32,
    pub payload: Map<String, Value>,
    /// Present only when the search requested vectors (MMR re-ranking)
    pub vector: Option<Vec<f32>>,
}

/// Collection statistics
#[derive(Debug, Clone, serde::Serialize)]
pub struct CollectionStats {
    pub points: u64,
    pub size_bytes: u64,
    pub dimension: usize,
    pub status: String,
}

/// Store health probe result
#[derive(Debug, Clone, serde::Serialize)]
pub struct StoreHealth {
    pub ok: bool,
    pub latency_ms: u64,
    pub detail: String,
}

/// Exact-match predicate over payload fields
#[derive(Debug, Clone, Default)]
pub struct MetadataFilter(pub BTreeMap<String, Value>);

impl MetadataFilter {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Interface over the external vector database.
///
/// `QdrantStore` is the production implementation; tests use an in-memory
/// one behind the same trait.
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Create the collection if needed. Idempotent: an existing collection
    /// with the right dimension is a no-op. `force_recreate` drops and
    /// rebuilds. A creation failure that is plausibly "exists but
    /// unhealthy" is retried once with recreation before surfacing.
    async fn ensure_collection(&self, name: &str, dimension: usize, force_recreate: bool)
        -> Result<()>;

    /// Upsert points in internal batches. Returns the number written.
    async fn upsert(&self, collection: &str, points: Vec<IndexedPoint>) -> Result<usize>;

    /// Nearest-neighbor search, optionally filtered and with stored vectors.
    async fn search(
        &self,
        collection: &str,
        vector: &[f32],
        limit: usize,
        filter: Option<&MetadataFilter>,
        with_vectors: bool,
    ) -> Result<Vec<ScoredPoint>>;

    /// Delete a collection. Returns false when it did not exist.
    async fn delete_collection(&self, name: &str) -> Result<bool>;

    /// Stats for one collection.
    async fn collection_stats(&self, name: &str) -> Result<CollectionStats>;

    /// Names of all collections.
    async fn list_collections(&self) -> Result<Vec<String>>;

    /// Connectivity probe with latency.
    async fn health(&self) -> Result<StoreHealth>;
}
