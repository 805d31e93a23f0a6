//! HTTP surface tests driven through the router
//!
//! Providers and the vector store point at unroutable local ports, so these
//! tests exercise validation, shape, and lifecycle behavior without any
//! external service.

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::ServiceExt;

use corpus_rag::{RagConfig, RagServer};

fn test_config() -> RagConfig {
    let mut config = RagConfig::default();
    // Dead local ports: any outbound call is refused immediately. No
    // retries, so failures surface without backoff sleeps.
    config.providers.openai.base_url = "http://127.0.0.1:9".to_string();
    config.providers.gemini.base_url = "http://127.0.0.1:9".to_string();
    config.providers.max_retries = 0;
    config.vector_store.url = "http://localhost:9".to_string();
    config.vector_store.max_retries = 0;
    config.rate_limit.max_rpm = 100;
    config
}

async fn server_with(config: RagConfig) -> RagServer {
    RagServer::new(config).await.expect("server construction")
}

async fn server() -> RagServer {
    server_with(test_config()).await
}

fn post_json(path: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(path)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get(path: &str) -> Request<Body> {
    Request::builder().uri(path).body(Body::empty()).unwrap()
}

async fn json_body(response: axum::response::Response) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn health_reports_healthy_with_version() {
    let server = server().await;
    let response = server.router().oneshot(get("/health")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = json_body(response).await;
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["environment"], "development");
    assert!(!body["version"].as_str().unwrap().is_empty());
}

#[tokio::test]
async fn upload_rejects_empty_documents() {
    let server = server().await;
    let request = post_json("/upload", json!({ "collection_name": "docs", "documents": [] }));
    let response = server.router().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let body = json_body(response).await;
    assert_eq!(body["error"]["type"], "validation_error");
}

#[tokio::test]
async fn upload_rejects_unknown_chunking_strategy() {
    let server = server().await;
    let request = post_json(
        "/upload",
        json!({
            "documents": [{ "content": "hello world", "source": "a.txt" }],
            "chunking_strategy": "quantum"
        }),
    );
    let response = server.router().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn upload_acknowledges_immediately_and_tracks_progress() {
    let server = server().await;
    let router = server.router();

    let request = post_json(
        "/upload",
        json!({
            "collection_name": "docs",
            "documents": [{ "content": "hello world", "source": "a.txt" }],
            "enable_metadata": false
        }),
    );
    let response = router.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = json_body(response).await;
    assert_eq!(body["status"], "received");
    let upload_id = body["upload_id"].as_str().unwrap().to_string();
    assert!(!upload_id.is_empty());

    // The job is immediately visible to the polling endpoint.
    let response = router
        .clone()
        .oneshot(get(&format!("/progress/{upload_id}")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["upload_id"], upload_id.as_str());
    assert!(body["status"].is_string());
}

#[tokio::test]
async fn unknown_upload_id_is_not_found() {
    let server = server().await;
    let response = server
        .router()
        .oneshot(get("/progress/00000000-0000-0000-0000-000000000000"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn question_validates_k_range() {
    let server = server().await;
    let request = post_json("/question", json!({ "question": "What is X?", "k": 50 }));
    let response = server.router().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn question_rejects_empty_question() {
    let server = server().await;
    let request = post_json("/question", json!({ "question": "   " }));
    let response = server.router().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn cold_question_without_collection_suggests_initialize() {
    let server = server().await;
    let request = post_json("/question", json!({ "question": "What is X?" }));
    let response = server.router().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

    let body = json_body(response).await;
    assert!(body["suggestion"].as_str().unwrap().contains("/initialize"));
    assert!(!body["detail"].as_str().unwrap().is_empty());
}

#[tokio::test]
async fn shutting_down_rejects_new_uploads() {
    let server = server().await;
    server.state().begin_shutdown();

    let request = post_json(
        "/upload",
        json!({ "documents": [{ "content": "hello", "source": "a.txt" }] }),
    );
    let response = server.router().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn generation_endpoints_carry_rate_limit_headers_and_reject_overflow() {
    let mut config = test_config();
    config.rate_limit.max_rpm = 2;
    let server = server_with(config).await;
    let router = server.router();

    // Validation failures still pass through the limiter, so two requests
    // exhaust the budget.
    for _ in 0..2 {
        let response = router
            .clone()
            .oneshot(post_json("/search", json!({ "query": "" })))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            response.headers().get("x-ratelimit-limit").unwrap(),
            "2"
        );
        assert!(response.headers().contains_key("x-ratelimit-current"));
        assert!(response.headers().contains_key("x-ratelimit-percent"));
    }

    let response = router
        .clone()
        .oneshot(post_json("/search", json!({ "query": "" })))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
}

#[tokio::test]
async fn rate_limit_stats_shape() {
    let server = server().await;
    let response = server.router().oneshot(get("/rate-limit-stats")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = json_body(response).await;
    let global = &body["rate_limiting"]["global"];
    assert_eq!(global["max_rpm"], 100);
    assert!(global["current_rpm"].is_number());
    assert!(global["utilization_percent"].is_number());
    assert!(global["min_delay_seconds"].is_number());
    assert!(body["rate_limiting"]["services"].is_object());
}

#[tokio::test]
async fn batch_questions_requires_questions() {
    let server = server().await;
    let request = post_json("/batch-questions", json!({ "questions": [] }));
    let response = server.router().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}
