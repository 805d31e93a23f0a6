//! LLM-based chunk metadata enrichment
//!
//! Asks the configured metadata chat adapter for a small structured record
//! per chunk. Parsing tolerates format drift: missing fields default to
//! empty and an unparsable response yields empty metadata with a warning —
//! enrichment never fails an ingestion on its own.

use serde::Deserialize;
use std::sync::Arc;

use crate::error::Result;
use crate::providers::ChatProvider;
use crate::types::{ChunkMetadata, Complexity};

const SYSTEM_PROMPT: &str = "You are a precise metadata extractor. \
Respond with a single JSON object and nothing else. Fields: \
\"summary\" (1-2 sentence summary), \
\"keywords\" (5-10 relevant keywords as a JSON array), \
\"topic\" (main topic or category), \
\"complexity\" (one of: simple, medium, complex), \
\"entities\" (named people, places, and concepts as a JSON array), \
\"sentiment\" (one of: positive, neutral, negative). \
Be concise and factual.";

// Long chunks add cost without improving extraction quality.
const MAX_INPUT_CHARS: usize = 1000;

/// Enriches chunks through the metadata chat adapter.
pub struct MetadataEnricher {
    chat: Arc<dyn ChatProvider>,
}

impl MetadataEnricher {
    pub fn new(chat: Arc<dyn ChatProvider>) -> Self {
        Self { chat }
    }

    pub fn model(&self) -> &str {
        self.chat.model()
    }

    /// Extract metadata for one chunk. Provider errors propagate so the
    /// pipeline can degrade that chunk; parse failures are absorbed here.
    pub async fn enrich(&self, text: &str) -> Result<ChunkMetadata> {
        let excerpt: String = text.chars().take(MAX_INPUT_CHARS).collect();
        let user_prompt = format!("Analyze the following text and extract metadata:\n\nTEXT:\n{excerpt}");

        let raw = self
            .chat
            .complete(SYSTEM_PROMPT, &user_prompt, 0.0, Some(512))
            .await?;
        Ok(parse_metadata(&raw))
    }
}

#[derive(Debug, Default, Deserialize)]
struct LooseMetadata {
    #[serde(default)]
    summary: Option<String>,
    #[serde(default)]
    keywords: Option<Vec<String>>,
    #[serde(default)]
    topic: Option<String>,
    #[serde(default)]
    complexity: Option<String>,
    #[serde(default)]
    entities: Option<Vec<String>>,
    #[serde(default)]
    sentiment: Option<String>,
}

/// Parse a model response into metadata, tolerating fences, prose around
/// the JSON, and missing fields.
pub(crate) fn parse_metadata(raw: &str) -> ChunkMetadata {
    let Some(json) = extract_json_object(raw) else {
        tracing::warn!("metadata response contained no JSON object, using empty metadata");
        return ChunkMetadata::default();
    };

    match serde_json::from_str::<LooseMetadata>(json) {
        Ok(loose) => ChunkMetadata {
            summary: loose.summary.unwrap_or_default(),
            keywords: loose.keywords.unwrap_or_default(),
            topic: loose.topic.unwrap_or_default(),
            complexity: loose
                .complexity
                .map(|c| Complexity::parse_lenient(&c))
                .unwrap_or_default(),
            entities: loose.entities.unwrap_or_default(),
            sentiment: loose.sentiment.unwrap_or_default(),
        },
        Err(err) => {
            tracing::warn!(error = %err, "failed to parse metadata response, using empty metadata");
            ChunkMetadata::default()
        }
    }
}

// Models wrap JSON in ```json fences or lead with prose; take the outermost
// brace-delimited span.
fn extract_json_object(raw: &str) -> Option<&str> {
    let start = raw.find('{')?;
    let end = raw.rfind('}')?;
    (end > start).then(|| &raw[start..=end])
}
