//! Question answering: retrieve then generate
//!
//! Holds the service-level retriever binding. The first question after a
//! cold start transparently binds to the configured cloud collection; if
//! that fails the caller gets an actionable `ServiceUnavailable`.

mod cache;
mod prompts;

use futures_util::stream::{self, StreamExt};
use serde::Serialize;
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Instant;

use crate::config::{CacheConfig, RetrievalConfig};
use crate::error::{Error, Result};
use crate::pipeline::{IngestOptions, IngestReport, IngestionPipeline};
use crate::providers::{ChatProvider, EmbeddingsProvider};
use crate::types::{Document, QueryType};
use crate::vector_store::{CollectionStats, RetrievedDocument, Retriever, VectorStore};

pub use cache::AnswerCache;

/// Parallelism bound for batch question answering
const BATCH_FANOUT: usize = 4;

/// Characters of source text included in a response snippet
const SNIPPET_CHARS: usize = 200;

/// One cited source in a QA response
#[derive(Debug, Clone, Serialize)]
pub struct SourceRef {
    pub source: String,
    pub relevance_score: f32,
    pub snippet: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Map<String, Value>>,
}

/// Response to one question
#[derive(Debug, Clone, Serialize)]
pub struct QaResponse {
    pub answer: String,
    pub query_type: String,
    pub documents_used: usize,
    pub retrieval_time_ms: u64,
    pub generation_time_ms: u64,
    pub total_time_ms: u64,
    pub sources: Vec<SourceRef>,
    pub model: String,
    pub from_cache: bool,
}

/// Retrieval-only search result
#[derive(Debug, Clone, Serialize)]
pub struct SearchHit {
    pub content: String,
    pub source: String,
    pub relevance_score: f32,
    pub metadata: Map<String, Value>,
}

/// The QA service.
pub struct QaService {
    store: Arc<dyn VectorStore>,
    embeddings: Arc<dyn EmbeddingsProvider>,
    chat: Arc<dyn ChatProvider>,
    pipeline: Arc<IngestionPipeline>,
    retrieval: RetrievalConfig,
    default_collection: String,
    temperature: f32,
    bound: parking_lot::RwLock<Option<String>>,
    cache: Option<AnswerCache>,
}

impl QaService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<dyn VectorStore>,
        embeddings: Arc<dyn EmbeddingsProvider>,
        chat: Arc<dyn ChatProvider>,
        pipeline: Arc<IngestionPipeline>,
        retrieval: RetrievalConfig,
        cache_config: &CacheConfig,
        default_collection: impl Into<String>,
        temperature: f32,
    ) -> Self {
        Self {
            store,
            embeddings,
            chat,
            pipeline,
            retrieval,
            default_collection: default_collection.into(),
            temperature,
            bound: parking_lot::RwLock::new(None),
            cache: cache_config.enabled.then(|| AnswerCache::new(cache_config)),
        }
    }

    /// Synchronous ingestion path: run the pipeline, then bind the
    /// retriever to the freshly indexed collection.
    pub async fn initialize_from_documents(
        &self,
        documents: Vec<Document>,
        opts: IngestOptions,
    ) -> Result<IngestReport> {
        let collection = opts.collection.clone();
        let report = self.pipeline.run(documents, opts).await?;
        self.bind(&collection);
        self.invalidate_cache(&collection);
        Ok(report)
    }

    /// Bind to an existing cloud collection without re-ingesting.
    pub async fn initialize_from_existing_collection(
        &self,
        collection: &str,
    ) -> Result<CollectionStats> {
        let stats = self.store.collection_stats(collection).await?;
        tracing::info!(
            collection,
            points = stats.points,
            dimension = stats.dimension,
            "bound to existing collection"
        );
        self.bind(collection);
        Ok(stats)
    }

    /// Collection the service is currently bound to, if any.
    pub fn bound_collection(&self) -> Option<String> {
        self.bound.read().clone()
    }

    /// Drop the binding (used when its collection is deleted).
    pub fn unbind_if(&self, collection: &str) {
        let mut bound = self.bound.write();
        if bound.as_deref() == Some(collection) {
            *bound = None;
        }
        self.invalidate_cache(collection);
    }

    /// Forget cached answers for a collection after (re)ingestion.
    pub fn invalidate_cache(&self, collection: &str) {
        if let Some(cache) = &self.cache {
            cache.invalidate_collection(collection);
        }
    }

    /// Answer one question. `collection` overrides the bound collection
    /// for this call only.
    pub async fn answer(
        &self,
        question: &str,
        query_type: QueryType,
        k: usize,
        collection: Option<String>,
    ) -> Result<QaResponse> {
        let started = Instant::now();
        let collection = match collection {
            Some(explicit) => explicit,
            None => self.ensure_ready().await?,
        };

        if let Some(cache) = &self.cache {
            if let Some(hit) = cache.get(question, query_type, k, &collection) {
                return Ok(hit);
            }
        }

        let retriever = Retriever::adaptive(
            Arc::clone(&self.store),
            Arc::clone(&self.embeddings),
            collection.clone(),
            query_type,
            Some(k),
            &self.retrieval,
            None,
        );

        let retrieval_start = Instant::now();
        let documents = retriever.retrieve(question).await?;
        let retrieval_time_ms = retrieval_start.elapsed().as_millis() as u64;

        // Zero hits still generate; the prompt instructs the model to say
        // the context is insufficient.
        let context = format_context(&documents);
        let (system, user_template) = prompts::templates(query_type);
        let user = prompts::render(user_template, &context, question);

        let generation_start = Instant::now();
        let answer = self
            .chat
            .complete(system, &user, self.temperature, None)
            .await?;
        let generation_time_ms = generation_start.elapsed().as_millis() as u64;

        let response = QaResponse {
            answer,
            query_type: query_type.as_str().to_string(),
            documents_used: documents.len(),
            retrieval_time_ms,
            generation_time_ms,
            total_time_ms: started.elapsed().as_millis() as u64,
            sources: documents.iter().map(source_ref).collect(),
            model: self.chat.model().to_string(),
            from_cache: false,
        };

        if let Some(cache) = &self.cache {
            cache.put(question, query_type, k, &collection, response.clone());
        }

        tracing::info!(
            query_type = query_type.as_str(),
            documents = response.documents_used,
            total_ms = response.total_time_ms,
            "question answered"
        );
        Ok(response)
    }

    /// Answer several questions with a small bounded fan-out. Per-question
    /// failures are reported inline.
    pub async fn batch_answer(
        &self,
        questions: Vec<String>,
        query_type: QueryType,
        k: usize,
    ) -> Vec<Result<QaResponse>> {
        stream::iter(questions)
            .map(|question| async move { self.answer(&question, query_type, k, None).await })
            .buffered(BATCH_FANOUT)
            .collect()
            .await
    }

    /// Retrieval only, no generation.
    pub async fn search(
        &self,
        query: &str,
        k: usize,
        query_type: QueryType,
        collection: Option<String>,
    ) -> Result<Vec<SearchHit>> {
        let collection = match collection {
            Some(explicit) => explicit,
            None => self.ensure_ready().await?,
        };
        let retriever = Retriever::adaptive(
            Arc::clone(&self.store),
            Arc::clone(&self.embeddings),
            collection,
            query_type,
            Some(k),
            &self.retrieval,
            None,
        );
        let documents = retriever.retrieve(query).await?;
        Ok(documents
            .iter()
            .map(|doc| SearchHit {
                content: truncate_chars(&doc.text, SNIPPET_CHARS),
                source: doc.source.clone(),
                relevance_score: doc.score,
                metadata: doc.payload.clone(),
            })
            .collect())
    }

    /// Resolve the bound collection, auto-initializing on first use.
    async fn ensure_ready(&self) -> Result<String> {
        if let Some(collection) = self.bound_collection() {
            return Ok(collection);
        }
        let default = self.default_collection.clone();
        match self.initialize_from_existing_collection(&default).await {
            Ok(_) => Ok(default),
            Err(err) => {
                tracing::warn!(collection = %default, error = %err, "auto-initialization failed");
                Err(Error::service_unavailable(
                    format!("RAG service is not initialized and collection '{default}' is not usable: {err}"),
                    "Call POST /initialize with documents to create the collection",
                ))
            }
        }
    }

    fn bind(&self, collection: &str) {
        *self.bound.write() = Some(collection.to_string());
    }
}

fn format_context(documents: &[RetrievedDocument]) -> String {
    documents
        .iter()
        .enumerate()
        .map(|(i, doc)| format!("[Document {} - {}]\n{}", i + 1, doc.source, doc.text))
        .collect::<Vec<_>>()
        .join("\n\n")
}

fn source_ref(doc: &RetrievedDocument) -> SourceRef {
    let mut metadata = doc.payload.clone();
    // The snippet already carries the text; do not duplicate it.
    metadata.remove("content");
    SourceRef {
        source: doc.source.clone(),
        relevance_score: doc.score,
        snippet: truncate_chars(&doc.text, SNIPPET_CHARS),
        metadata: (!metadata.is_empty()).then_some(metadata),
    }
}

fn truncate_chars(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        text.to_string()
    } else {
        let truncated: String = text.chars().take(max_chars).collect();
        format!("{truncated}...")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(text: &str, source: &str, score: f32) -> RetrievedDocument {
        let mut payload = Map::new();
        payload.insert("content".to_string(), Value::String(text.to_string()));
        payload.insert("source".to_string(), Value::String(source.to_string()));
        payload.insert("topic".to_string(), Value::String("testing".to_string()));
        RetrievedDocument {
            text: text.to_string(),
            source: source.to_string(),
            score,
            payload,
        }
    }

    #[test]
    fn context_numbers_documents_with_sources() {
        let docs = vec![doc("first body", "a.txt", 0.9), doc("second body", "b.txt", 0.8)];
        let context = format_context(&docs);
        assert!(context.contains("[Document 1 - a.txt]\nfirst body"));
        assert!(context.contains("[Document 2 - b.txt]\nsecond body"));
    }

    #[test]
    fn snippets_are_bounded_and_marked() {
        let long = "x".repeat(500);
        let source = source_ref(&doc(&long, "big.txt", 0.5));
        assert_eq!(source.snippet.chars().count(), SNIPPET_CHARS + 3);
        assert!(source.snippet.ends_with("..."));

        let short = source_ref(&doc("tiny", "small.txt", 0.5));
        assert_eq!(short.snippet, "tiny");
    }

    #[test]
    fn source_metadata_drops_duplicated_content() {
        let source = source_ref(&doc("body", "a.txt", 0.7));
        let metadata = source.metadata.unwrap();
        assert!(!metadata.contains_key("content"));
        assert_eq!(metadata["topic"], "testing");
    }
}
