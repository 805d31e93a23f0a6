//! Question answering, search, and batch endpoints

use axum::{extract::State, Json};
use serde::{Deserialize, Serialize};
use std::time::Instant;

use crate::error::{Error, Result};
use crate::qa::{QaResponse, SearchHit};
use crate::server::state::AppState;
use crate::types::QueryType;

const MAX_K: usize = 20;

#[derive(Debug, Deserialize)]
pub struct QuestionRequest {
    pub question: String,
    #[serde(default)]
    pub query_type: Option<String>,
    #[serde(default)]
    pub k: Option<usize>,
    #[serde(default)]
    pub collection_name: Option<String>,
}

/// POST /question - retrieve-then-generate. Auto-initializes against the
/// configured default collection on a cold start.
pub async fn question(
    State(state): State<AppState>,
    Json(request): Json<QuestionRequest>,
) -> Result<Json<QaResponse>> {
    if request.question.trim().is_empty() {
        return Err(Error::validation("question must not be empty"));
    }
    let k = resolve_k(&state, request.k)?;
    let query_type = QueryType::parse_or_default(request.query_type.as_deref());

    let response = state
        .qa()
        .answer(&request.question, query_type, k, request.collection_name)
        .await?;
    Ok(Json(response))
}

#[derive(Debug, Deserialize)]
pub struct SearchRequest {
    pub query: String,
    #[serde(default)]
    pub k: Option<usize>,
    #[serde(default)]
    pub query_type: Option<String>,
    #[serde(default)]
    pub collection_name: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct SearchResponse {
    pub documents: Vec<SearchHit>,
    pub count: usize,
    pub search_time_ms: u64,
}

/// POST /search - retrieval only, no generation.
pub async fn search(
    State(state): State<AppState>,
    Json(request): Json<SearchRequest>,
) -> Result<Json<SearchResponse>> {
    if request.query.trim().is_empty() {
        return Err(Error::validation("query must not be empty"));
    }
    let k = resolve_k(&state, request.k)?;
    let query_type = QueryType::parse_or_default(request.query_type.as_deref());

    let start = Instant::now();
    let documents = state
        .qa()
        .search(&request.query, k, query_type, request.collection_name)
        .await?;

    Ok(Json(SearchResponse {
        count: documents.len(),
        documents,
        search_time_ms: start.elapsed().as_millis() as u64,
    }))
}

#[derive(Debug, Deserialize)]
pub struct BatchQuestionsRequest {
    pub questions: Vec<String>,
    #[serde(default)]
    pub query_type: Option<String>,
    #[serde(default)]
    pub k: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct BatchAnswer {
    pub question: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub answer: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sources: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct BatchQuestionsResponse {
    pub status: &'static str,
    pub total_questions: usize,
    pub answers: Vec<BatchAnswer>,
}

/// POST /batch-questions - array in, array out; per-question errors are
/// reported inline instead of failing the batch.
pub async fn batch_questions(
    State(state): State<AppState>,
    Json(request): Json<BatchQuestionsRequest>,
) -> Result<Json<BatchQuestionsResponse>> {
    if request.questions.is_empty() {
        return Err(Error::validation("questions must not be empty"));
    }
    let k = resolve_k(&state, request.k)?;
    let query_type = QueryType::parse_or_default(request.query_type.as_deref());

    let questions = request.questions.clone();
    let total_questions = questions.len();
    let results = state.qa().batch_answer(request.questions, query_type, k).await;

    let answers = questions
        .into_iter()
        .zip(results)
        .map(|(question, result)| match result {
            Ok(response) => BatchAnswer {
                question,
                sources: Some(response.sources.iter().map(|s| s.source.clone()).collect()),
                answer: Some(response.answer),
                time_ms: Some(response.total_time_ms),
                error: None,
            },
            Err(err) => BatchAnswer {
                question,
                answer: None,
                sources: None,
                time_ms: None,
                error: Some(err.to_string()),
            },
        })
        .collect();

    Ok(Json(BatchQuestionsResponse {
        status: "success",
        total_questions,
        answers,
    }))
}

fn resolve_k(state: &AppState, k: Option<usize>) -> Result<usize> {
    match k {
        None => Ok(state.config().retrieval.k),
        Some(k) if (1..=MAX_K).contains(&k) => Ok(k),
        Some(k) => Err(Error::validation(format!(
            "k must be between 1 and {MAX_K}, got {k}"
        ))),
    }
}
