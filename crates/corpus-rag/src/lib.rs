//! corpus-rag: RAG ingestion and question-answering service
//!
//! A backend that ingests documents through a chunk → enrich → embed →
//! index pipeline with live WebSocket progress, keeps every outbound
//! provider call inside a shared requests-per-minute budget, and answers
//! questions by retrieving from an external vector database and prompting
//! a chat model with query-type-specific templates.

pub mod chunking;
pub mod config;
pub mod enrichment;
pub mod error;
pub mod pipeline;
pub mod progress;
pub mod providers;
pub mod qa;
pub mod ratelimit;
pub mod server;
pub mod types;
pub mod vector_store;

pub use config::RagConfig;
pub use error::{Error, Result};
pub use pipeline::{IngestOptions, IngestReport, IngestionPipeline};
pub use progress::{ProgressEvent, ProgressTracker, UploadStatus};
pub use qa::{QaResponse, QaService};
pub use ratelimit::RateLimiter;
pub use server::RagServer;
pub use types::{Chunk, Document, EnrichedChunk, QueryType};
