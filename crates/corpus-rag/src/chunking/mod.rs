//! Document chunking
//!
//! All sizes are measured in tokens, not characters, using a tokenizer
//! compatible with the configured OpenAI-family models. Every chunk the
//! module produces satisfies `token_count <= chunk_size`.

mod recursive;
mod semantic;
mod structured;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::str::FromStr;
use std::sync::Arc;
use tiktoken_rs::{cl100k_base, CoreBPE};

use crate::config::ChunkingConfig;
use crate::error::{Error, Result};
use crate::providers::EmbeddingsProvider;
use crate::types::{Chunk, Document};

/// Available chunking strategies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChunkingStrategy {
    Recursive,
    Semantic,
    Markdown,
    Html,
}

impl FromStr for ChunkingStrategy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "recursive" => Ok(Self::Recursive),
            "semantic" => Ok(Self::Semantic),
            "markdown" => Ok(Self::Markdown),
            "html" => Ok(Self::Html),
            other => Err(Error::validation(format!(
                "unknown chunking strategy '{other}': expected recursive, semantic, markdown, or html"
            ))),
        }
    }
}

impl ChunkingStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Recursive => "recursive",
            Self::Semantic => "semantic",
            Self::Markdown => "markdown",
            Self::Html => "html",
        }
    }
}

/// Token counting backed by the cl100k BPE
pub struct TokenCounter {
    bpe: CoreBPE,
}

impl TokenCounter {
    pub fn new() -> Result<Self> {
        let bpe = cl100k_base().map_err(|e| Error::Config(format!("tokenizer init failed: {e}")))?;
        Ok(Self { bpe })
    }

    /// Number of tokens in `text`
    pub fn count(&self, text: &str) -> usize {
        self.bpe.encode_with_special_tokens(text).len()
    }

    /// Split `text` into pieces of at most `max_tokens` tokens each, cutting
    /// on raw token boundaries. Last resort when no separator works.
    pub fn hard_split(&self, text: &str, max_tokens: usize) -> Vec<String> {
        let max_tokens = max_tokens.max(1);
        let tokens = self.bpe.encode_with_special_tokens(text);
        if tokens.len() <= max_tokens {
            return vec![text.to_string()];
        }
        tokens
            .chunks(max_tokens)
            .map(|window| {
                self.bpe
                    .decode(window.to_vec())
                    .unwrap_or_else(|_| Self::char_fallback(text, window.len(), tokens.len()))
            })
            .filter(|s| !s.is_empty())
            .collect()
    }

    /// Suffix of `text` that is at most `max_tokens` tokens long
    pub fn tail(&self, text: &str, max_tokens: usize) -> String {
        if max_tokens == 0 {
            return String::new();
        }
        let tokens = self.bpe.encode_with_special_tokens(text);
        if tokens.len() <= max_tokens {
            return text.to_string();
        }
        let start = tokens.len() - max_tokens;
        self.bpe
            .decode(tokens[start..].to_vec())
            .unwrap_or_else(|_| Self::char_fallback(text, max_tokens, tokens.len()))
    }

    // Token-aligned decode can fail on split UTF-8 sequences; approximate
    // by a proportional character count instead of dropping text.
    fn char_fallback(text: &str, want_tokens: usize, total_tokens: usize) -> String {
        let chars: Vec<char> = text.chars().collect();
        let take = (chars.len() * want_tokens / total_tokens.max(1)).max(1);
        chars[chars.len().saturating_sub(take)..].iter().collect()
    }
}

/// Splits documents into token-sized chunks by a selected strategy.
pub struct Chunker {
    chunk_size: usize,
    chunk_overlap: usize,
    counter: Arc<TokenCounter>,
}

impl Chunker {
    pub fn new(config: &ChunkingConfig) -> Result<Self> {
        Ok(Self {
            chunk_size: config.chunk_size,
            chunk_overlap: config.chunk_overlap,
            counter: Arc::new(TokenCounter::new()?),
        })
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Chunk a document with any strategy. Semantic chunking needs the
    /// embeddings adapter for boundary detection and is therefore async;
    /// the other strategies are CPU-only.
    pub async fn chunk(
        &self,
        doc: &Document,
        strategy: ChunkingStrategy,
        embedder: &dyn EmbeddingsProvider,
    ) -> Result<Vec<Chunk>> {
        match strategy {
            ChunkingStrategy::Semantic => self.chunk_semantic(doc, embedder).await,
            other => self.chunk_sync(doc, other),
        }
    }

    /// Chunk with a synchronous strategy (recursive, markdown, html).
    pub fn chunk_sync(&self, doc: &Document, strategy: ChunkingStrategy) -> Result<Vec<Chunk>> {
        match strategy {
            ChunkingStrategy::Recursive => Ok(self.chunk_recursive(doc)),
            ChunkingStrategy::Markdown => {
                Ok(self.chunk_sections(doc, structured::markdown_sections(&doc.content)))
            }
            ChunkingStrategy::Html => {
                Ok(self.chunk_sections(doc, structured::html_sections(&doc.content)))
            }
            ChunkingStrategy::Semantic => Err(Error::internal(
                "semantic chunking requires the embeddings adapter",
            )),
        }
    }

    fn chunk_recursive(&self, doc: &Document) -> Vec<Chunk> {
        // Reserve overlap headroom so the final chunk stays within budget.
        let budget = self.chunk_size.saturating_sub(self.chunk_overlap).max(1);
        let pieces = recursive::split_text(&doc.content, budget, &self.counter);

        let mut chunks = Vec::with_capacity(pieces.len());
        for (i, piece) in pieces.iter().enumerate() {
            if piece.trim().is_empty() {
                continue;
            }
            let text = if i > 0 && self.chunk_overlap > 0 {
                let tail = self.counter.tail(&pieces[i - 1], self.chunk_overlap);
                let joined = format!("{tail}{piece}");
                // Token counts are not perfectly additive; drop the overlap
                // rather than break the size invariant.
                if self.counter.count(&joined) <= self.chunk_size {
                    joined
                } else {
                    piece.clone()
                }
            } else {
                piece.clone()
            };
            chunks.push(self.make_chunk(doc, text, chunks.len(), None));
        }
        chunks
    }

    fn chunk_sections(&self, doc: &Document, sections: Vec<structured::Section>) -> Vec<Chunk> {
        let mut chunks = Vec::new();
        for section in sections {
            if section.body.trim().is_empty() {
                continue;
            }
            // Boundary-preserving mode: no overlap across or within sections.
            for piece in recursive::split_text(&section.body, self.chunk_size, &self.counter) {
                if piece.trim().is_empty() {
                    continue;
                }
                chunks.push(self.make_chunk(doc, piece, chunks.len(), section.heading.clone()));
            }
        }
        chunks
    }

    async fn chunk_semantic(
        &self,
        doc: &Document,
        embedder: &dyn EmbeddingsProvider,
    ) -> Result<Vec<Chunk>> {
        let blocks = semantic::semantic_blocks(&doc.content, embedder).await?;
        let budget = self.chunk_size.saturating_sub(self.chunk_overlap).max(1);

        let mut chunks = Vec::new();
        for block in blocks {
            let pieces = recursive::split_text(&block, budget, &self.counter);
            for (i, piece) in pieces.iter().enumerate() {
                if piece.trim().is_empty() {
                    continue;
                }
                let text = if i > 0 && self.chunk_overlap > 0 {
                    let tail = self.counter.tail(&pieces[i - 1], self.chunk_overlap);
                    let joined = format!("{tail}{piece}");
                    if self.counter.count(&joined) <= self.chunk_size {
                        joined
                    } else {
                        piece.clone()
                    }
                } else {
                    piece.clone()
                };
                chunks.push(self.make_chunk(doc, text, chunks.len(), None));
            }
        }
        Ok(chunks)
    }

    fn make_chunk(
        &self,
        doc: &Document,
        text: String,
        index: usize,
        section: Option<String>,
    ) -> Chunk {
        let token_count = self.counter.count(&text);
        let mut metadata = doc.metadata.clone();
        if let Some(heading) = section {
            metadata.insert("section".to_string(), Value::String(heading));
        }
        Chunk {
            text,
            source: doc.source.clone(),
            chunk_index: index,
            token_count,
            metadata,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunker(size: usize, overlap: usize) -> Chunker {
        Chunker::new(&ChunkingConfig {
            chunk_size: size,
            chunk_overlap: overlap,
            default_strategy: "recursive".to_string(),
        })
        .unwrap()
    }

    #[test]
    fn strategy_parsing() {
        assert_eq!(
            "recursive".parse::<ChunkingStrategy>().unwrap(),
            ChunkingStrategy::Recursive
        );
        assert_eq!("HTML".parse::<ChunkingStrategy>().unwrap(), ChunkingStrategy::Html);
        assert!("tree-sitter".parse::<ChunkingStrategy>().is_err());
    }

    #[test]
    fn every_chunk_respects_the_token_budget() {
        let chunker = chunker(120, 20);
        let paragraphs: Vec<String> = (0..40)
            .map(|i| format!("Paragraph {i} talks about retrieval pipelines and vector stores in moderate depth."))
            .collect();
        let doc = Document::new(paragraphs.join("\n\n"), "doc.txt");

        let chunks = chunker.chunk_sync(&doc, ChunkingStrategy::Recursive).unwrap();
        assert!(chunks.len() > 1);
        for chunk in &chunks {
            assert!(
                chunk.token_count <= 120,
                "chunk {} has {} tokens",
                chunk.chunk_index,
                chunk.token_count
            );
        }
    }

    #[test]
    fn consecutive_chunks_share_overlap_text() {
        let chunker = chunker(100, 30);
        let text: String = (0..30)
            .map(|i| format!("Sentence number {i} describes one more step of the ingestion flow. "))
            .collect();
        let doc = Document::new(text, "doc.txt");

        let chunks = chunker.chunk_sync(&doc, ChunkingStrategy::Recursive).unwrap();
        assert!(chunks.len() >= 2);
        // The head of chunk N+1 must appear near the tail of chunk N.
        let first_words: Vec<&str> = chunks[1].text.split_whitespace().take(3).collect();
        let probe = first_words.join(" ");
        assert!(
            chunks[0].text.contains(&probe),
            "expected '{probe}' from chunk 1 inside chunk 0"
        );
    }

    #[test]
    fn unbroken_text_is_hard_split() {
        let chunker = chunker(100, 0);
        let doc = Document::new("x".repeat(4000), "blob.txt");
        let chunks = chunker.chunk_sync(&doc, ChunkingStrategy::Recursive).unwrap();
        assert!(chunks.len() > 1);
        for chunk in &chunks {
            assert!(chunk.token_count <= 100);
        }
    }

    #[test]
    fn markdown_chunks_inherit_their_heading() {
        let chunker = chunker(200, 0);
        let doc = Document::new(
            "# Intro\nSome introduction text.\n\n## Details\nThe detailed part.\n",
            "guide.md",
        );
        let chunks = chunker.chunk_sync(&doc, ChunkingStrategy::Markdown).unwrap();
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].metadata["section"], "Intro");
        assert_eq!(chunks[1].metadata["section"], "Details");
        assert!(chunks[1].text.contains("detailed part"));
    }

    #[test]
    fn html_chunks_inherit_their_heading() {
        let chunker = chunker(200, 0);
        let doc = Document::new(
            "<html><body><h1>Overview</h1><p>First paragraph.</p><h2>Usage</h2><p>Second paragraph.</p></body></html>",
            "page.html",
        );
        let chunks = chunker.chunk_sync(&doc, ChunkingStrategy::Html).unwrap();
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].metadata["section"], "Overview");
        assert!(chunks[0].text.contains("First paragraph"));
        assert_eq!(chunks[1].metadata["section"], "Usage");
    }

    #[test]
    fn chunk_indexes_are_sequential() {
        let chunker = chunker(110, 10);
        let doc = Document::new(
            (0..20)
                .map(|i| format!("Block {i} of filler content for the splitter.\n\n"))
                .collect::<String>(),
            "doc.txt",
        );
        let chunks = chunker.chunk_sync(&doc, ChunkingStrategy::Recursive).unwrap();
        for (i, chunk) in chunks.iter().enumerate() {
            assert_eq!(chunk.chunk_index, i);
        }
    }

    #[test]
    fn token_tail_is_bounded() {
        let counter = TokenCounter::new().unwrap();
        let text = "alpha beta gamma delta epsilon zeta eta theta";
        let tail = counter.tail(text, 3);
        assert!(counter.count(&tail) <= 3);
        assert!(text.ends_with(tail.trim_start()));
    }
}
