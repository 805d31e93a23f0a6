//! Core document, chunk, and query types

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::str::FromStr;

/// An input document: opaque content, a source label, and an open
/// string-keyed attribute bag. Immutable once it enters the pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    /// Raw text content
    pub content: String,
    /// Where the document came from (filename, URL, ...)
    pub source: String,
    /// Caller-supplied attributes, stored opaquely in the vector payload
    #[serde(default)]
    pub metadata: HashMap<String, Value>,
}

impl Document {
    pub fn new(content: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            source: source.into(),
            metadata: HashMap::new(),
        }
    }
}

/// An ordered fragment of one document. `token_count` is measured with the
/// same tokenizer the chunker used, so `token_count <= chunk_size` always
/// holds for pipeline-produced chunks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    /// Fragment text
    pub text: String,
    /// Source label inherited from the document
    pub source: String,
    /// Position of this chunk within its document
    pub chunk_index: usize,
    /// Size in tokens
    pub token_count: usize,
    /// Inherited document attributes plus splitter additions (e.g. `section`)
    #[serde(default)]
    pub metadata: HashMap<String, Value>,
}

/// LLM-extracted chunk metadata
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ChunkMetadata {
    /// 1-2 sentence summary
    #[serde(default)]
    pub summary: String,
    /// 5-10 relevant keywords
    #[serde(default)]
    pub keywords: Vec<String>,
    /// Main topic/category
    #[serde(default)]
    pub topic: String,
    /// simple, medium, or complex
    #[serde(default)]
    pub complexity: Complexity,
    /// Named entities
    #[serde(default)]
    pub entities: Vec<String>,
    /// positive, neutral, or negative
    #[serde(default)]
    pub sentiment: String,
}

/// Complexity level of a chunk
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Complexity {
    Simple,
    #[default]
    Medium,
    Complex,
}

impl Complexity {
    /// Tolerant parse: accepts the original easy/medium/hard labels too.
    pub fn parse_lenient(value: &str) -> Self {
        match value.trim().to_lowercase().as_str() {
            "simple" | "easy" | "low" => Self::Simple,
            "complex" | "hard" | "high" => Self::Complex,
            _ => Self::Medium,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Simple => "simple",
            Self::Medium => "medium",
            Self::Complex => "complex",
        }
    }
}

/// A chunk after (optional) metadata enrichment. `metadata` is `None` when
/// enrichment was disabled or failed for this chunk; downstream code must
/// not assume presence.
#[derive(Debug, Clone)]
pub struct EnrichedChunk {
    pub chunk: Chunk,
    pub metadata: Option<ChunkMetadata>,
}

impl EnrichedChunk {
    pub fn bare(chunk: Chunk) -> Self {
        Self {
            chunk,
            metadata: None,
        }
    }

    /// Flatten into a vector-store payload. The store treats this map
    /// opaquely; retrieval reads back `content` and `source`.
    pub fn payload(&self) -> Map<String, Value> {
        let mut payload = Map::new();
        payload.insert("content".to_string(), Value::String(self.chunk.text.clone()));
        payload.insert("source".to_string(), Value::String(self.chunk.source.clone()));
        payload.insert("chunk_index".to_string(), serde_json::json!(self.chunk.chunk_index));
        payload.insert("token_count".to_string(), serde_json::json!(self.chunk.token_count));

        for (key, value) in &self.chunk.metadata {
            payload.entry(key.clone()).or_insert_with(|| value.clone());
        }

        if let Some(meta) = &self.metadata {
            payload.insert("summary".to_string(), Value::String(meta.summary.clone()));
            payload.insert("keywords".to_string(), serde_json::json!(meta.keywords));
            payload.insert("topic".to_string(), Value::String(meta.topic.clone()));
            payload.insert(
                "complexity".to_string(),
                Value::String(meta.complexity.as_str().to_string()),
            );
            payload.insert("entities".to_string(), serde_json::json!(meta.entities));
            payload.insert("sentiment".to_string(), Value::String(meta.sentiment.clone()));
        }

        payload
    }
}

/// Advisory query classification; unknown values fall back to `General`.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum QueryType {
    #[default]
    General,
    Research,
    Specific,
    Complex,
}

impl QueryType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::General => "general",
            Self::Research => "research",
            Self::Specific => "specific",
            Self::Complex => "complex",
        }
    }

    /// Parse with the advisory-default policy: anything unknown is General.
    pub fn parse_or_default(value: Option<&str>) -> Self {
        value
            .and_then(|v| Self::from_str(v).ok())
            .unwrap_or_default()
    }
}

impl FromStr for QueryType {
    type Err = ();

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "general" => Ok(Self::General),
            "research" => Ok(Self::Research),
            "specific" => Ok(Self::Specific),
            "complex" => Ok(Self::Complex),
            _ => Err(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_type_defaults_to_general() {
        assert_eq!(QueryType::parse_or_default(None), QueryType::General);
        assert_eq!(QueryType::parse_or_default(Some("research")), QueryType::Research);
        assert_eq!(QueryType::parse_or_default(Some("RESEARCH")), QueryType::Research);
        assert_eq!(QueryType::parse_or_default(Some("nonsense")), QueryType::General);
    }

    #[test]
    fn complexity_lenient_parse() {
        assert_eq!(Complexity::parse_lenient("easy"), Complexity::Simple);
        assert_eq!(Complexity::parse_lenient("hard"), Complexity::Complex);
        assert_eq!(Complexity::parse_lenient("Complex"), Complexity::Complex);
        assert_eq!(Complexity::parse_lenient("whatever"), Complexity::Medium);
    }

    #[test]
    fn payload_keeps_document_metadata_and_enrichment() {
        let mut chunk_meta = HashMap::new();
        chunk_meta.insert("author".to_string(), Value::String("ada".to_string()));
        let chunk = Chunk {
            text: "hello world".to_string(),
            source: "a.txt".to_string(),
            chunk_index: 3,
            token_count: 2,
            metadata: chunk_meta,
        };
        let enriched = EnrichedChunk {
            chunk,
            metadata: Some(ChunkMetadata {
                summary: "greeting".to_string(),
                keywords: vec!["hello".to_string()],
                topic: "salutations".to_string(),
                complexity: Complexity::Simple,
                entities: vec![],
                sentiment: "positive".to_string(),
            }),
        };

        let payload = enriched.payload();
        assert_eq!(payload["content"], "hello world");
        assert_eq!(payload["source"], "a.txt");
        assert_eq!(payload["chunk_index"], 3);
        assert_eq!(payload["author"], "ada");
        assert_eq!(payload["complexity"], "simple");
    }

    #[test]
    fn bare_payload_has_no_enrichment_fields() {
        let chunk = Chunk {
            text: "x".to_string(),
            source: "s".to_string(),
            chunk_index: 0,
            token_count: 1,
            metadata: HashMap::new(),
        };
        let payload = EnrichedChunk::bare(chunk).payload();
        assert!(!payload.contains_key("summary"));
        assert!(!payload.contains_key("keywords"));
    }
}
