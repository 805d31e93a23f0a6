//! Qdrant Cloud REST client
//!
//! All operations run behind per-operation circuit breakers and a
//! transient-failure retry, per the resilience module.

use async_trait::async_trait;
use parking_lot::Mutex;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::config::VectorStoreConfig;
use crate::error::{Error, Result, VectorStoreErrorKind};

use super::resilience::{retry_with_backoff, BreakerSnapshot, CircuitBreaker};
use super::{CollectionStats, IndexedPoint, MetadataFilter, ScoredPoint, StoreHealth, VectorStore};

/// Qdrant-backed vector store
pub struct QdrantStore {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    batch_size: usize,
    max_retries: u32,
    breaker_threshold: u32,
    breaker_recovery: Duration,
    breakers: Mutex<HashMap<&'static str, Arc<CircuitBreaker>>>,
}

impl QdrantStore {
    pub fn new(config: &VectorStoreConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .pool_max_idle_per_host(4)
            .build()
            .map_err(Error::Http)?;

        Ok(Self {
            client,
            base_url: config.url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            batch_size: config.batch_size.max(1),
            max_retries: config.max_retries,
            breaker_threshold: config.breaker_threshold,
            breaker_recovery: Duration::from_secs(config.breaker_recovery_secs),
            breakers: Mutex::new(HashMap::new()),
        })
    }

    /// Breaker states for `/stats`
    pub fn breaker_snapshots(&self) -> HashMap<String, BreakerSnapshot> {
        self.breakers
            .lock()
            .iter()
            .map(|(op, b)| (op.to_string(), b.snapshot()))
            .collect()
    }

    fn breaker(&self, op: &'static str) -> Arc<CircuitBreaker> {
        self.breakers
            .lock()
            .entry(op)
            .or_insert_with(|| {
                Arc::new(CircuitBreaker::new(self.breaker_threshold, self.breaker_recovery))
            })
            .clone()
    }

    /// Run one logical operation through its breaker and the retry policy.
    async fn guarded<T, F, Fut>(&self, op: &'static str, f: F) -> Result<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let breaker = self.breaker(op);
        breaker.check()?;
        match retry_with_backoff(op, self.max_retries, f).await {
            Ok(value) => {
                breaker.record_success();
                Ok(value)
            }
            Err(err) => {
                if err.is_transient() {
                    breaker.record_failure();
                } else {
                    // The store answered; the failure is ours, not its.
                    breaker.record_success();
                }
                Err(err)
            }
        }
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let mut builder = self.client.request(method, format!("{}{}", self.base_url, path));
        if let Some(key) = &self.api_key {
            builder = builder.header("api-key", key);
        }
        builder
    }

    fn transport(err: reqwest::Error) -> Error {
        Error::vector_store(
            VectorStoreErrorKind::Unavailable,
            format!("qdrant request failed: {err}"),
        )
    }

    async fn error_from(op: &str, response: reqwest::Response) -> Error {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        let kind = match status {
            StatusCode::NOT_FOUND => VectorStoreErrorKind::NotFound,
            StatusCode::CONFLICT => VectorStoreErrorKind::Conflict,
            s if s.is_server_error() => VectorStoreErrorKind::Unavailable,
            _ => VectorStoreErrorKind::Conflict,
        };
        Error::vector_store(kind, format!("qdrant {op} failed ({status}): {body}"))
    }

    async fn collection_info(&self, name: &str) -> Result<CollectionInfo> {
        let response = self
            .request(reqwest::Method::GET, &format!("/collections/{name}"))
            .send()
            .await
            .map_err(Self::transport)?;
        if !response.status().is_success() {
            return Err(Self::error_from("collection info", response).await);
        }
        let parsed: ApiResponse<CollectionInfo> = response
            .json()
            .await
            .map_err(|e| Error::internal(format!("bad qdrant collection response: {e}")))?;
        Ok(parsed.result)
    }

    async fn create_collection(&self, name: &str, dimension: usize) -> Result<()> {
        let body = json!({
            "vectors": { "size": dimension, "distance": "Cosine" }
        });
        let response = self
            .request(reqwest::Method::PUT, &format!("/collections/{name}"))
            .json(&body)
            .send()
            .await
            .map_err(Self::transport)?;
        if !response.status().is_success() {
            return Err(Self::error_from("create collection", response).await);
        }
        tracing::info!(collection = name, dimension, "created collection");
        Ok(())
    }

    async fn delete_collection_raw(&self, name: &str) -> Result<bool> {
        let response = self
            .request(reqwest::Method::DELETE, &format!("/collections/{name}"))
            .send()
            .await
            .map_err(Self::transport)?;
        match response.status() {
            s if s.is_success() => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            _ => Err(Self::error_from("delete collection", response).await),
        }
    }

    async fn recreate(&self, name: &str, dimension: usize) -> Result<()> {
        let _ = self.delete_collection_raw(name).await;
        self.create_collection(name, dimension).await
    }
}

#[derive(Deserialize)]
struct ApiResponse<T> {
    result: T,
}

#[derive(Deserialize)]
struct CollectionInfo {
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    points_count: Option<u64>,
    config: CollectionConfig,
}

#[derive(Deserialize)]
struct CollectionConfig {
    params: CollectionParams,
}

#[derive(Deserialize)]
struct CollectionParams {
    vectors: VectorParams,
}

#[derive(Deserialize)]
struct VectorParams {
    size: usize,
}

#[derive(Serialize)]
struct UpsertBody {
    points: Vec<PointBody>,
}

#[derive(Clone, Serialize)]
struct PointBody {
    id: String,
    vector: Vec<f32>,
    payload: Map<String, Value>,
}

#[derive(Deserialize)]
struct SearchHit {
    score: f32,
    #[serde(default)]
    payload: Option<Map<String, Value>>,
    #[serde(default)]
    vector: Option<Vec<f32>>,
}

#[derive(Deserialize)]
struct CollectionsList {
    collections: Vec<CollectionName>,
}

#[derive(Deserialize)]
struct CollectionName {
    name: String,
}

fn filter_clause(filter: &MetadataFilter) -> Value {
    let must: Vec<Value> = filter
        .0
        .iter()
        .map(|(key, value)| json!({ "key": key, "match": { "value": value } }))
        .collect();
    json!({ "must": must })
}

#[async_trait]
impl VectorStore for QdrantStore {
    async fn ensure_collection(
        &self,
        name: &str,
        dimension: usize,
        force_recreate: bool,
    ) -> Result<()> {
        if force_recreate {
            return self
                .guarded("ensure_collection", || self.recreate(name, dimension))
                .await;
        }

        let first = self
            .guarded("ensure_collection", || async {
                match self.collection_info(name).await {
                    Ok(info) => {
                        if info.config.params.vectors.size == dimension {
                            Ok(())
                        } else {
                            Err(Error::vector_store(
                                VectorStoreErrorKind::BadDimension,
                                format!(
                                    "collection '{name}' has dimension {}, expected {dimension}",
                                    info.config.params.vectors.size
                                ),
                            ))
                        }
                    }
                    Err(Error::VectorStore {
                        kind: VectorStoreErrorKind::NotFound,
                        ..
                    }) => self.create_collection(name, dimension).await,
                    Err(other) => Err(other),
                }
            })
            .await;

        match first {
            Err(Error::VectorStore {
                kind: VectorStoreErrorKind::Conflict,
                message,
            }) => {
                // Plausibly exists-but-unhealthy: one recreation attempt.
                tracing::warn!(
                    collection = name,
                    error = %message,
                    "ensure_collection conflicted, retrying with recreation"
                );
                self.guarded("ensure_collection", || self.recreate(name, dimension))
                    .await
            }
            other => other,
        }
    }

    async fn upsert(&self, collection: &str, points: Vec<IndexedPoint>) -> Result<usize> {
        let total = points.len();
        let bodies: Vec<PointBody> = points
            .into_iter()
            .map(|p| PointBody {
                id: p.id.to_string(),
                vector: p.vector,
                payload: p.payload,
            })
            .collect();

        for batch in bodies.chunks(self.batch_size) {
            self.guarded("upsert", || async {
                let body = UpsertBody {
                    points: batch.to_vec(),
                };
                let response = self
                    .request(
                        reqwest::Method::PUT,
                        &format!("/collections/{collection}/points?wait=true"),
                    )
                    .json(&body)
                    .send()
                    .await
                    .map_err(Self::transport)?;
                if !response.status().is_success() {
                    return Err(Self::error_from("upsert", response).await);
                }
                Ok(())
            })
            .await?;
        }

        tracing::debug!(collection, points = total, "upserted points");
        Ok(total)
    }

    async fn search(
        &self,
        collection: &str,
        vector: &[f32],
        limit: usize,
        filter: Option<&MetadataFilter>,
        with_vectors: bool,
    ) -> Result<Vec<ScoredPoint>> {
        self.guarded("search", || async {
            let mut body = json!({
                "vector": vector,
                "limit": limit,
                "with_payload": true,
                "with_vector": with_vectors,
            });
            if let Some(filter) = filter.filter(|f| !f.is_empty()) {
                body["filter"] = filter_clause(filter);
            }

            let response = self
                .request(
                    reqwest::Method::POST,
                    &format!("/collections/{collection}/points/search"),
                )
                .json(&body)
                .send()
                .await
                .map_err(Self::transport)?;
            if !response.status().is_success() {
                return Err(Self::error_from("search", response).await);
            }

            let parsed: ApiResponse<Vec<SearchHit>> = response
                .json()
                .await
                .map_err(|e| Error::internal(format!("bad qdrant search response: {e}")))?;
            Ok(parsed
                .result
                .into_iter()
                .map(|hit| ScoredPoint {
                    score: hit.score,
                    payload: hit.payload.unwrap_or_default(),
                    vector: hit.vector,
                })
                .collect())
        })
        .await
    }

    async fn delete_collection(&self, name: &str) -> Result<bool> {
        self.guarded("delete_collection", || self.delete_collection_raw(name))
            .await
    }

    async fn collection_stats(&self, name: &str) -> Result<CollectionStats> {
        self.guarded("collection_stats", || async {
            let info = self.collection_info(name).await?;
            let points = info.points_count.unwrap_or(0);
            let dimension = info.config.params.vectors.size;
            Ok(CollectionStats {
                points,
                // Qdrant does not report size; estimate from the vectors.
                size_bytes: points * dimension as u64 * 4,
                dimension,
                status: info.status.unwrap_or_else(|| "unknown".to_string()),
            })
        })
        .await
    }

    async fn list_collections(&self) -> Result<Vec<String>> {
        self.guarded("list_collections", || async {
            let response = self
                .request(reqwest::Method::GET, "/collections")
                .send()
                .await
                .map_err(Self::transport)?;
            if !response.status().is_success() {
                return Err(Self::error_from("list collections", response).await);
            }
            let parsed: ApiResponse<CollectionsList> = response
                .json()
                .await
                .map_err(|e| Error::internal(format!("bad qdrant collections response: {e}")))?;
            Ok(parsed.result.collections.into_iter().map(|c| c.name).collect())
        })
        .await
    }

    async fn health(&self) -> Result<StoreHealth> {
        let start = Instant::now();
        let result = self
            .request(reqwest::Method::GET, "/collections")
            .send()
            .await;
        let latency_ms = start.elapsed().as_millis() as u64;
        match result {
            Ok(response) if response.status().is_success() => Ok(StoreHealth {
                ok: true,
                latency_ms,
                detail: "reachable".to_string(),
            }),
            Ok(response) => Ok(StoreHealth {
                ok: false,
                latency_ms,
                detail: format!("unexpected status {}", response.status()),
            }),
            Err(err) => Ok(StoreHealth {
                ok: false,
                latency_ms,
                detail: format!("unreachable: {err}"),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filter_clause_shape() {
        let mut filter = MetadataFilter::default();
        filter
            .0
            .insert("topic".to_string(), Value::String("ai".to_string()));
        let clause = filter_clause(&filter);
        assert_eq!(clause["must"][0]["key"], "topic");
        assert_eq!(clause["must"][0]["match"]["value"], "ai");
    }

    #[test]
    fn store_builds_from_default_config() {
        let store = QdrantStore::new(&VectorStoreConfig::default()).unwrap();
        assert!(store.breaker_snapshots().is_empty());
    }
}
