//! HTTP route handlers

pub mod admin;
pub mod initialize;
pub mod question;
pub mod upload;

use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;

use crate::chunking::ChunkingStrategy;
use crate::error::{Error, Result};
use crate::pipeline::IngestOptions;
use crate::server::state::AppState;
use crate::types::Document;

/// One document in an upload/initialize body
#[derive(Debug, Deserialize)]
pub struct DocumentInput {
    pub content: String,
    #[serde(default = "default_source")]
    pub source: String,
    #[serde(default)]
    pub metadata: Option<HashMap<String, Value>>,
}

fn default_source() -> String {
    "unknown".to_string()
}

/// Shared body of `POST /upload` and `POST /initialize`
#[derive(Debug, Deserialize)]
pub struct IngestRequest {
    #[serde(default)]
    pub collection_name: Option<String>,
    pub documents: Vec<DocumentInput>,
    #[serde(default)]
    pub force_recreate: bool,
    #[serde(default)]
    pub enable_metadata: Option<bool>,
    #[serde(default)]
    pub chunking_strategy: Option<String>,
}

/// Validate an ingest body and resolve its defaults.
pub(crate) fn parse_ingest_request(
    state: &AppState,
    request: IngestRequest,
) -> Result<(Vec<Document>, IngestOptions)> {
    if request.documents.is_empty() {
        return Err(Error::validation("documents must not be empty"));
    }
    for (i, doc) in request.documents.iter().enumerate() {
        if doc.content.trim().is_empty() {
            return Err(Error::validation(format!("documents[{i}].content is empty")));
        }
    }

    let strategy = match &request.chunking_strategy {
        Some(name) => name.parse::<ChunkingStrategy>()?,
        None => state.default_strategy()?,
    };

    let collection = request
        .collection_name
        .filter(|name| !name.trim().is_empty())
        .unwrap_or_else(|| state.config().vector_store.collection.clone());

    let documents = request
        .documents
        .into_iter()
        .map(|doc| Document {
            content: doc.content,
            source: doc.source,
            metadata: doc.metadata.unwrap_or_default(),
        })
        .collect();

    let opts = IngestOptions {
        collection,
        strategy,
        enable_metadata: request
            .enable_metadata
            .unwrap_or(state.config().pipeline.enable_metadata_default),
        force_recreate: request.force_recreate,
        upload_id: None,
    };

    Ok((documents, opts))
}
