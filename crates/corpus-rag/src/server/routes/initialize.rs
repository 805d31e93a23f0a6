//! Synchronous initialization

use axum::{extract::State, Json};
use serde::Serialize;

use crate::error::{Error, Result};
use crate::server::routes::{parse_ingest_request, IngestRequest};
use crate::server::state::AppState;

#[derive(Debug, Serialize)]
pub struct InitializeResponse {
    pub status: &'static str,
    pub total_documents: usize,
    pub total_chunks: usize,
    pub total_vectors: usize,
    pub collection_name: String,
    pub processing_time_ms: u64,
    pub estimated_cost_usd: f64,
}

/// POST /initialize - ingest documents and bind the QA service, blocking
/// until indexing finishes. Can take seconds to minutes; `/upload` is the
/// streaming alternative.
pub async fn initialize(
    State(state): State<AppState>,
    Json(request): Json<IngestRequest>,
) -> Result<Json<InitializeResponse>> {
    if state.is_shutting_down() {
        return Err(Error::service_unavailable(
            "service is shutting down",
            "Retry against a healthy instance",
        ));
    }

    let (documents, opts) = parse_ingest_request(&state, request)?;
    tracing::info!(
        documents = documents.len(),
        collection = %opts.collection,
        force_recreate = opts.force_recreate,
        "synchronous initialization requested"
    );

    let report = state.qa().initialize_from_documents(documents, opts).await?;

    Ok(Json(InitializeResponse {
        status: "initialized",
        total_documents: report.total_documents,
        total_chunks: report.total_chunks,
        total_vectors: report.total_vectors,
        collection_name: report.collection_name,
        processing_time_ms: report.processing_time_ms,
        estimated_cost_usd: report.estimated_cost_usd,
    }))
}
