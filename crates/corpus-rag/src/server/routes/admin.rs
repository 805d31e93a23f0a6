//! Health, statistics, and collection administration

use axum::{
    extract::{Path, State},
    Json,
};
use serde_json::{json, Value};

use crate::error::Result;
use crate::server::state::AppState;
use crate::vector_store::VectorStore;

fn epoch_seconds() -> f64 {
    chrono::Utc::now().timestamp_millis() as f64 / 1000.0
}

/// GET /health
pub async fn health(State(state): State<AppState>) -> Json<Value> {
    let status = if state.is_shutting_down() {
        "shutting_down"
    } else {
        "healthy"
    };
    Json(json!({
        "status": status,
        "version": env!("CARGO_PKG_VERSION"),
        "environment": state.config().environment,
        "timestamp": epoch_seconds(),
    }))
}

/// GET /stats - collection stats plus pipeline health
pub async fn stats(State(state): State<AppState>) -> Result<Json<Value>> {
    let collection = state
        .qa()
        .bound_collection()
        .unwrap_or_else(|| state.config().vector_store.collection.clone());

    let collection_stats = match state.store().collection_stats(&collection).await {
        Ok(stats) => serde_json::to_value(stats)?,
        Err(err) => json!({ "error": err.to_string() }),
    };
    let collections = state.store().list_collections().await.unwrap_or_default();
    let store_health = match state.store().health().await {
        Ok(health) => serde_json::to_value(health)?,
        Err(err) => json!({ "ok": false, "detail": err.to_string() }),
    };

    Ok(Json(json!({
        "status": "success",
        "collection": collection,
        "collection_stats": collection_stats,
        "collections": collections,
        "vector_store_health": store_health,
        "circuit_breakers": state.qdrant().breaker_snapshots(),
        "rate_limiting": state.limiter().stats(),
        "active_uploads": state.progress().active_count(),
        "timestamp": epoch_seconds(),
    })))
}

/// GET /rate-limit-stats
pub async fn rate_limit_stats(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "success",
        "rate_limiting": state.limiter().stats(),
        "timestamp": epoch_seconds(),
    }))
}

/// DELETE /collection/:name - idempotent
pub async fn delete_collection(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<Value>> {
    let deleted = state.store().delete_collection(&name).await?;
    state.qa().unbind_if(&name);
    tracing::info!(collection = %name, deleted, "collection delete requested");
    Ok(Json(json!({
        "status": "success",
        "deleted": deleted,
        "message": if deleted {
            format!("Collection '{name}' deleted")
        } else {
            format!("Collection '{name}' did not exist")
        },
    })))
}
