//! Shared test doubles: deterministic providers and an in-memory store
#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use corpus_rag::error::{Error, ProviderErrorKind, Result, VectorStoreErrorKind};
use corpus_rag::providers::{ChatProvider, EmbeddingsProvider};
use corpus_rag::vector_store::{
    CollectionStats, IndexedPoint, MetadataFilter, ScoredPoint, StoreHealth, VectorStore,
};

pub const DIMENSION: usize = 8;

/// Deterministic embeddings: a cheap hash of the text spread over the
/// vector, so equal texts embed equally and the store can rank them.
pub struct MockEmbeddings {
    pub fail: AtomicBool,
    pub calls: AtomicUsize,
}

impl MockEmbeddings {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            fail: AtomicBool::new(false),
            calls: AtomicUsize::new(0),
        })
    }

    pub fn embed_text(text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; DIMENSION];
        for (i, byte) in text.bytes().enumerate() {
            vector[i % DIMENSION] += byte as f32 / 255.0;
        }
        let norm: f32 = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for x in &mut vector {
                *x /= norm;
            }
        }
        vector
    }
}

#[async_trait]
impl EmbeddingsProvider for MockEmbeddings {
    async fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) {
            return Err(Error::provider(
                ProviderErrorKind::Unavailable,
                "mock embeddings offline",
            ));
        }
        Ok(texts.iter().map(|t| Self::embed_text(t)).collect())
    }

    async fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(Error::provider(
                ProviderErrorKind::Unavailable,
                "mock embeddings offline",
            ));
        }
        Ok(Self::embed_text(text))
    }

    fn dimension(&self) -> usize {
        DIMENSION
    }

    fn name(&self) -> &str {
        "mock"
    }
}

/// Chat double that answers metadata prompts with fixed JSON and QA
/// prompts with a canned answer. Prompts containing `fail_marker` error.
pub struct MockChat {
    pub fail_marker: Option<String>,
    pub calls: AtomicUsize,
}

impl MockChat {
    pub fn new(fail_marker: Option<&str>) -> Arc<Self> {
        Arc::new(Self {
            fail_marker: fail_marker.map(str::to_string),
            calls: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl ChatProvider for MockChat {
    async fn complete(
        &self,
        system_prompt: &str,
        user_prompt: &str,
        _temperature: f32,
        _max_tokens: Option<u32>,
    ) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(marker) = &self.fail_marker {
            if user_prompt.contains(marker) {
                return Err(Error::provider(ProviderErrorKind::Other, "mock chat refused"));
            }
        }
        if system_prompt.contains("metadata extractor") {
            Ok(r#"{"summary":"A test chunk.","keywords":["test"],"topic":"testing","complexity":"simple","entities":[],"sentiment":"neutral"}"#.to_string())
        } else {
            Ok("Based on the provided documents, the answer is yes.".to_string())
        }
    }

    fn name(&self) -> &str {
        "mock"
    }

    fn model(&self) -> &str {
        "mock-model"
    }
}

#[derive(Default)]
struct MemCollection {
    dimension: usize,
    points: Vec<IndexedPoint>,
}

/// In-memory stand-in for the cloud vector store.
#[derive(Default)]
pub struct MemoryStore {
    collections: Mutex<HashMap<String, MemCollection>>,
    pub create_count: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn point_count(&self, collection: &str) -> usize {
        self.collections
            .lock()
            .get(collection)
            .map_or(0, |c| c.points.len())
    }

    pub fn payloads(&self, collection: &str) -> Vec<serde_json::Map<String, serde_json::Value>> {
        self.collections
            .lock()
            .get(collection)
            .map(|c| c.points.iter().map(|p| p.payload.clone()).collect())
            .unwrap_or_default()
    }

    fn cosine(a: &[f32], b: &[f32]) -> f32 {
        let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
        let na: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
        let nb: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
        if na == 0.0 || nb == 0.0 {
            0.0
        } else {
            dot / (na * nb)
        }
    }
}

#[async_trait]
impl VectorStore for MemoryStore {
    async fn ensure_collection(
        &self,
        name: &str,
        dimension: usize,
        force_recreate: bool,
    ) -> Result<()> {
        let mut collections = self.collections.lock();
        match collections.get(name) {
            Some(existing) if !force_recreate => {
                if existing.dimension == dimension {
                    Ok(())
                } else {
                    Err(Error::vector_store(
                        VectorStoreErrorKind::BadDimension,
                        format!(
                            "collection '{name}' has dimension {}, expected {dimension}",
                            existing.dimension
                        ),
                    ))
                }
            }
            _ => {
                collections.insert(
                    name.to_string(),
                    MemCollection {
                        dimension,
                        points: Vec::new(),
                    },
                );
                self.create_count.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        }
    }

    async fn upsert(&self, collection: &str, points: Vec<IndexedPoint>) -> Result<usize> {
        let mut collections = self.collections.lock();
        let entry = collections.get_mut(collection).ok_or_else(|| {
            Error::vector_store(
                VectorStoreErrorKind::NotFound,
                format!("collection '{collection}' does not exist"),
            )
        })?;
        let count = points.len();
        entry.points.extend(points);
        Ok(count)
    }

    async fn search(
        &self,
        collection: &str,
        vector: &[f32],
        limit: usize,
        filter: Option<&MetadataFilter>,
        with_vectors: bool,
    ) -> Result<Vec<ScoredPoint>> {
        let collections = self.collections.lock();
        let entry = collections.get(collection).ok_or_else(|| {
            Error::vector_store(
                VectorStoreErrorKind::NotFound,
                format!("collection '{collection}' does not exist"),
            )
        })?;

        let mut scored: Vec<ScoredPoint> = entry
            .points
            .iter()
            .filter(|p| {
                filter.map_or(true, |f| {
                    f.0.iter()
                        .all(|(key, value)| p.payload.get(key) == Some(value))
                })
            })
            .map(|p| ScoredPoint {
                score: Self::cosine(vector, &p.vector),
                payload: p.payload.clone(),
                vector: with_vectors.then(|| p.vector.clone()),
            })
            .collect();
        scored.sort_by(|a, b| b.score.total_cmp(&a.score));
        scored.truncate(limit);
        Ok(scored)
    }

    async fn delete_collection(&self, name: &str) -> Result<bool> {
        Ok(self.collections.lock().remove(name).is_some())
    }

    async fn collection_stats(&self, name: &str) -> Result<CollectionStats> {
        let collections = self.collections.lock();
        let entry = collections.get(name).ok_or_else(|| {
            Error::vector_store(
                VectorStoreErrorKind::NotFound,
                format!("collection '{name}' does not exist"),
            )
        })?;
        Ok(CollectionStats {
            points: entry.points.len() as u64,
            size_bytes: (entry.points.len() * entry.dimension * 4) as u64,
            dimension: entry.dimension,
            status: "green".to_string(),
        })
    }

    async fn list_collections(&self) -> Result<Vec<String>> {
        Ok(self.collections.lock().keys().cloned().collect())
    }

    async fn health(&self) -> Result<StoreHealth> {
        Ok(StoreHealth {
            ok: true,
            latency_ms: 0,
            detail: "in-memory".to_string(),
        })
    }
}
