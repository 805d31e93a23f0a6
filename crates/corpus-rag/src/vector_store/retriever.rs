//! Retrieval strategies over a collection
//!
//! A `Retriever` is a cheap, stateless reference: collection + strategy +
//! `k` + optional payload filter. MMR runs client-side over a `fetch_k`
//! candidate pool.

use serde_json::{Map, Value};
use std::str::FromStr;
use std::sync::Arc;

use crate::config::RetrievalConfig;
use crate::error::{Error, Result};
use crate::providers::EmbeddingsProvider;
use crate::types::QueryType;

use super::{MetadataFilter, ScoredPoint, VectorStore};

/// Supported retrieval strategies
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetrievalStrategy {
    /// Plain vector similarity
    Similarity,
    /// Maximum Marginal Relevance diversification
    Mmr,
    /// Similarity restricted by a payload filter
    Filtered,
    /// Query-type-driven selection (resolved at construction)
    Adaptive,
}

impl FromStr for RetrievalStrategy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "similarity" => Ok(Self::Similarity),
            "mmr" => Ok(Self::Mmr),
            "filtered" => Ok(Self::Filtered),
            "adaptive" => Ok(Self::Adaptive),
            other => Err(Error::validation(format!("unknown retrieval strategy '{other}'"))),
        }
    }
}

/// One retrieved chunk with its payload and relevance
#[derive(Debug, Clone)]
pub struct RetrievedDocument {
    pub text: String,
    pub source: String,
    pub score: f32,
    pub payload: Map<String, Value>,
}

impl RetrievedDocument {
    fn from_point(point: ScoredPoint) -> Self {
        let text = point
            .payload
            .get("content")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let source = point
            .payload
            .get("source")
            .and_then(Value::as_str)
            .unwrap_or("unknown")
            .to_string();
        Self {
            text,
            source,
            score: point.score,
            payload: point.payload,
        }
    }
}

/// A configured retriever bound to one collection.
pub struct Retriever {
    store: Arc<dyn VectorStore>,
    embeddings: Arc<dyn EmbeddingsProvider>,
    collection: String,
    strategy: RetrievalStrategy,
    k: usize,
    fetch_k: usize,
    lambda: f32,
    filter: Option<MetadataFilter>,
}

impl Retriever {
    pub fn new(
        store: Arc<dyn VectorStore>,
        embeddings: Arc<dyn EmbeddingsProvider>,
        collection: impl Into<String>,
        strategy: RetrievalStrategy,
        k: usize,
        config: &RetrievalConfig,
        filter: Option<MetadataFilter>,
    ) -> Self {
        let k = k.max(1);
        Self {
            store,
            embeddings,
            collection: collection.into(),
            strategy,
            k,
            fetch_k: k * config.fetch_k_factor.max(1),
            lambda: config.mmr_lambda,
            filter,
        }
    }

    /// Build the retriever recommended for a query type:
    /// general → similarity k=5, research → mmr k=5,
    /// specific → filtered (or similarity without a filter) k=3,
    /// complex → mmr+filter k=5.
    pub fn adaptive(
        store: Arc<dyn VectorStore>,
        embeddings: Arc<dyn EmbeddingsProvider>,
        collection: impl Into<String>,
        query_type: QueryType,
        k: Option<usize>,
        config: &RetrievalConfig,
        filter: Option<MetadataFilter>,
    ) -> Self {
        let (strategy, default_k) = match query_type {
            QueryType::General => (RetrievalStrategy::Similarity, config.k),
            QueryType::Research => (RetrievalStrategy::Mmr, config.k),
            QueryType::Specific => {
                let strategy = if filter.is_some() {
                    RetrievalStrategy::Filtered
                } else {
                    RetrievalStrategy::Similarity
                };
                (strategy, 3)
            }
            QueryType::Complex => (RetrievalStrategy::Mmr, config.k),
        };
        Self::new(
            store,
            embeddings,
            collection,
            strategy,
            k.unwrap_or(default_k),
            config,
            filter,
        )
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    pub fn strategy(&self) -> RetrievalStrategy {
        self.strategy
    }

    pub fn k(&self) -> usize {
        self.k
    }

    /// Retrieve the top-k documents for a natural-language query.
    pub async fn retrieve(&self, query: &str) -> Result<Vec<RetrievedDocument>> {
        let query_vector = self.embeddings.embed_query(query).await?;
        self.retrieve_by_vector(&query_vector).await
    }

    /// Retrieve with a precomputed query vector.
    pub async fn retrieve_by_vector(&self, query_vector: &[f32]) -> Result<Vec<RetrievedDocument>> {
        match self.strategy {
            RetrievalStrategy::Similarity | RetrievalStrategy::Filtered | RetrievalStrategy::Adaptive => {
                let points = self
                    .store
                    .search(
                        &self.collection,
                        query_vector,
                        self.k,
                        self.filter.as_ref(),
                        false,
                    )
                    .await?;
                Ok(points.into_iter().map(RetrievedDocument::from_point).collect())
            }
            RetrievalStrategy::Mmr => {
                let candidates = self
                    .store
                    .search(
                        &self.collection,
                        query_vector,
                        self.fetch_k,
                        self.filter.as_ref(),
                        true,
                    )
                    .await?;
                let selected = mmr_select(query_vector, &candidates, self.k, self.lambda);
                Ok(selected
                    .into_iter()
                    .map(|i| RetrievedDocument::from_point(candidates[i].clone()))
                    .collect())
            }
        }
    }
}

/// Pick `k` candidate indexes balancing query relevance against diversity.
/// `lambda` = 1.0 is pure relevance, 0.0 pure diversity.
pub(crate) fn mmr_select(
    query: &[f32],
    candidates: &[ScoredPoint],
    k: usize,
    lambda: f32,
) -> Vec<usize> {
    let mut selected: Vec<usize> = Vec::new();
    let mut remaining: Vec<usize> = (0..candidates.len()).collect();

    let relevance: Vec<f32> = candidates
        .iter()
        .map(|c| {
            c.vector
                .as_deref()
                .map(|v| cosine_similarity(query, v))
                .unwrap_or(c.score)
        })
        .collect();

    while selected.len() < k && !remaining.is_empty() {
        let mut best_index = 0usize;
        let mut best_score = f32::MIN;
        for (slot, &candidate) in remaining.iter().enumerate() {
            let redundancy = selected
                .iter()
                .filter_map(|&s| {
                    match (&candidates[candidate].vector, &candidates[s].vector) {
                        (Some(a), Some(b)) => Some(cosine_similarity(a, b)),
                        _ => None,
                    }
                })
                .fold(f32::MIN, f32::max);
            let redundancy = if redundancy == f32::MIN { 0.0 } else { redundancy };
            let score = lambda * relevance[candidate] - (1.0 - lambda) * redundancy;
            if score > best_score {
                best_score = score;
                best_index = slot;
            }
        }
        selected.push(remaining.swap_remove(best_index));
    }
    selected
}

/// Cosine similarity of two vectors; zero when either has zero norm.
pub(crate) fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn point(text: &str, vector: Vec<f32>, score: f32) -> ScoredPoint {
        let mut payload = Map::new();
        payload.insert("content".to_string(), Value::String(text.to_string()));
        payload.insert("source".to_string(), Value::String("t.txt".to_string()));
        ScoredPoint {
            score,
            payload,
            vector: Some(vector),
        }
    }

    #[test]
    fn cosine_basics() {
        assert!((cosine_similarity(&[1.0, 0.0], &[1.0, 0.0]) - 1.0).abs() < 1e-6);
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-6);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
    }

    #[test]
    fn mmr_prefers_diverse_results() {
        let query = [1.0f32, 0.0, 0.0];
        // Two near-duplicates close to the query plus one distinct direction.
        let candidates = vec![
            point("dup-a", vec![1.0, 0.0, 0.0], 1.0),
            point("dup-b", vec![0.999, 0.01, 0.0], 0.99),
            point("other", vec![0.5, 0.8, 0.0], 0.6),
        ];
        let picked = mmr_select(&query, &candidates, 2, 0.5);
        assert_eq!(picked.len(), 2);
        assert_eq!(picked[0], 0);
        // The second pick skips the near-duplicate for the distinct vector.
        assert_eq!(picked[1], 2);
    }

    #[test]
    fn mmr_returns_at_most_k_unique_indexes() {
        let query = [1.0f32, 0.0];
        let candidates: Vec<ScoredPoint> = (0..10)
            .map(|i| point(&format!("c{i}"), vec![1.0 - i as f32 * 0.05, i as f32 * 0.05], 1.0))
            .collect();
        let picked = mmr_select(&query, &candidates, 5, 0.5);
        assert_eq!(picked.len(), 5);
        let mut unique = picked.clone();
        unique.sort_unstable();
        unique.dedup();
        assert_eq!(unique.len(), 5);
    }

    #[test]
    fn strategy_parsing() {
        assert_eq!(
            "mmr".parse::<RetrievalStrategy>().unwrap(),
            RetrievalStrategy::Mmr
        );
        assert!("hybrid".parse::<RetrievalStrategy>().is_err());
    }

    #[test]
    fn retrieved_document_reads_payload_fields() {
        let doc = RetrievedDocument::from_point(point("body text", vec![1.0], 0.9));
        assert_eq!(doc.text, "body text");
        assert_eq!(doc.source, "t.txt");
        assert!((doc.score - 0.9).abs() < 1e-6);
    }
}
