//! Asynchronous upload and progress streaming

use axum::{
    extract::{
        ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade},
        Path, State,
    },
    response::IntoResponse,
    Json,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::progress::ProgressEvent;
use crate::server::routes::{parse_ingest_request, IngestRequest};
use crate::server::state::AppState;

/// Immediate acknowledgement for `POST /upload`
#[derive(Debug, Serialize)]
pub struct UploadResponse {
    pub upload_id: Uuid,
    pub status: &'static str,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

/// POST /upload - accept documents and schedule background ingestion.
/// Returns immediately; progress streams over `WS /ws/{upload_id}`.
pub async fn upload(
    State(state): State<AppState>,
    Json(request): Json<IngestRequest>,
) -> Result<Json<UploadResponse>> {
    if state.is_shutting_down() {
        return Err(Error::service_unavailable(
            "service is shutting down and no longer accepts uploads",
            "Retry against a healthy instance",
        ));
    }

    let (documents, mut opts) = parse_ingest_request(&state, request)?;
    let upload_id = Uuid::new_v4();
    opts.upload_id = Some(upload_id);
    state.progress().create(upload_id)?;

    tracing::info!(
        %upload_id,
        documents = documents.len(),
        collection = %opts.collection,
        strategy = opts.strategy.as_str(),
        "upload accepted"
    );

    // The pipeline records its own terminal state; client disconnects do
    // not cancel it.
    let pipeline = state.pipeline().clone();
    let qa = state.qa().clone();
    let collection = opts.collection.clone();
    tokio::spawn(async move {
        if pipeline.run(documents, opts).await.is_ok() {
            qa.invalidate_cache(&collection);
        }
    });

    Ok(Json(UploadResponse {
        upload_id,
        status: "received",
        message: format!("Upload accepted. Subscribe to /ws/{upload_id} for progress."),
        timestamp: Utc::now(),
    }))
}

/// GET /progress/:upload_id - polling twin of the WebSocket stream.
pub async fn progress_snapshot(
    State(state): State<AppState>,
    Path(upload_id): Path<Uuid>,
) -> Result<Json<ProgressEvent>> {
    state.progress().snapshot(upload_id).map(Json)
}

/// WS /ws/:upload_id - live progress frames until a terminal event.
pub async fn ws_progress(
    ws: WebSocketUpgrade,
    Path(upload_id): Path<Uuid>,
    State(state): State<AppState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| stream_progress(socket, state, upload_id))
}

async fn stream_progress(mut socket: WebSocket, state: AppState, upload_id: Uuid) {
    let mut events = match state.progress().subscribe(upload_id) {
        Ok(events) => events,
        Err(err) => {
            // Unknown or evicted id: application close code 4404.
            let _ = socket
                .send(Message::Close(Some(CloseFrame {
                    code: 4404,
                    reason: err.to_string().into(),
                })))
                .await;
            return;
        }
    };

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Some(event) => {
                    let terminal = event.status.is_terminal();
                    let frame = match serde_json::to_string(&event) {
                        Ok(frame) => frame,
                        Err(err) => {
                            tracing::error!(%upload_id, error = %err, "failed to serialize progress frame");
                            continue;
                        }
                    };
                    if socket.send(Message::Text(frame)).await.is_err() {
                        return;
                    }
                    if terminal {
                        let _ = socket
                            .send(Message::Close(Some(CloseFrame {
                                code: 1000,
                                reason: "upload finished".into(),
                            })))
                            .await;
                        return;
                    }
                }
                // Tracker dropped the sender (e.g. slow subscriber).
                None => {
                    let _ = socket
                        .send(Message::Close(Some(CloseFrame {
                            code: 1000,
                            reason: "stream ended".into(),
                        })))
                        .await;
                    return;
                }
            },
            incoming = socket.recv() => match incoming {
                Some(Ok(Message::Text(text))) if text.trim().eq_ignore_ascii_case("close") => {
                    let _ = socket
                        .send(Message::Close(Some(CloseFrame {
                            code: 1000,
                            reason: "client requested close".into(),
                        })))
                        .await;
                    return;
                }
                Some(Ok(Message::Close(_))) | None => return,
                Some(Ok(_)) => {} // other client frames are ignored
                Some(Err(_)) => return,
            },
        }
    }
}
