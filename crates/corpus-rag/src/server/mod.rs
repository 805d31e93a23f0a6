//! HTTP server for the RAG service

pub mod routes;
pub mod state;

use axum::{
    extract::{Request, State},
    http::header::{HeaderName, HeaderValue},
    middleware::{self, Next},
    response::Response,
    routing::{delete, get, post},
    Router,
};
use std::net::SocketAddr;
use std::time::{Duration, Instant};
use tower_http::{
    compression::CompressionLayer,
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use crate::config::RagConfig;
use crate::error::{Error, Result};
use state::AppState;

/// RAG HTTP server
pub struct RagServer {
    config: RagConfig,
    state: AppState,
}

impl RagServer {
    /// Create a new server with fully built application state
    pub async fn new(config: RagConfig) -> Result<Self> {
        let state = AppState::new(config.clone()).await?;
        Ok(Self { config, state })
    }

    pub fn address(&self) -> &str {
        &self.config.server.listen_addr
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    /// Assemble the full router with middleware and state applied.
    pub fn router(&self) -> Router {
        let mut router = Router::new()
            .route("/health", get(routes::admin::health))
            .route("/upload", post(routes::upload::upload))
            .route("/ws/:upload_id", get(routes::upload::ws_progress))
            .route("/progress/:upload_id", get(routes::upload::progress_snapshot))
            .route("/initialize", post(routes::initialize::initialize))
            .route("/question", post(routes::question::question))
            .route("/search", post(routes::question::search))
            .route("/batch-questions", post(routes::question::batch_questions))
            .route("/stats", get(routes::admin::stats))
            .route("/rate-limit-stats", get(routes::admin::rate_limit_stats))
            .route("/collection/:name", delete(routes::admin::delete_collection))
            .layer(middleware::from_fn_with_state(
                self.state.clone(),
                inbound_rate_limit,
            ))
            .with_state(self.state.clone())
            .layer(TraceLayer::new_for_http())
            .layer(CompressionLayer::new());

        if self.config.server.enable_cors {
            let cors = CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any);
            router = router.layer(cors);
        }
        router
    }

    /// Serve until ctrl-c, then drain in-flight uploads within the grace
    /// period before returning.
    pub async fn start(self) -> Result<()> {
        let addr: SocketAddr = self
            .config
            .server
            .listen_addr
            .parse()
            .map_err(|e| Error::Config(format!("invalid LISTEN_ADDR: {e}")))?;

        let router = self.router();
        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .map_err(|e| Error::Config(format!("failed to bind {addr}: {e}")))?;

        tracing::info!("listening on http://{addr}");

        let signal_state = self.state.clone();
        axum::serve(listener, router)
            .with_graceful_shutdown(async move {
                shutdown_signal().await;
                signal_state.begin_shutdown();
            })
            .await
            .map_err(|e| Error::internal(format!("server error: {e}")))?;

        self.drain().await;
        Ok(())
    }

    async fn drain(&self) {
        let grace = Duration::from_secs(self.config.server.shutdown_grace_secs);
        let deadline = Instant::now() + grace;
        loop {
            let active = self.state.progress().active_count();
            if active == 0 {
                tracing::info!("all uploads drained, exiting");
                return;
            }
            if Instant::now() >= deadline {
                tracing::warn!(active, "grace period elapsed, abandoning in-flight uploads");
                return;
            }
            tokio::time::sleep(Duration::from_millis(250)).await;
        }
    }
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("received shutdown signal");
}

/// Generation-heavy endpoints consume a slot from the shared limiter and
/// report utilization through response headers. Saturated budget rejects
/// with 429 rather than queueing the request.
async fn inbound_rate_limit(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> std::result::Result<Response, Error> {
    let path = request.uri().path();
    let limited = matches!(path, "/initialize" | "/question" | "/batch-questions" | "/search");
    if !limited {
        return Ok(next.run(request).await);
    }

    if let Err(retry_after) = state.limiter().try_acquire("http_inbound") {
        return Err(Error::RateLimited(format!(
            "request budget exhausted, retry in {:.1}s",
            retry_after.as_secs_f64()
        )));
    }

    let mut response = next.run(request).await;
    let stats = state.limiter().stats();
    let headers = response.headers_mut();
    for (name, value) in [
        ("x-ratelimit-limit", stats.global.max_rpm.to_string()),
        ("x-ratelimit-current", stats.global.current_rpm.to_string()),
        (
            "x-ratelimit-percent",
            (stats.global.utilization_percent as u64).to_string(),
        ),
    ] {
        if let (Ok(name), Ok(value)) = (
            name.parse::<HeaderName>(),
            HeaderValue::from_str(&value),
        ) {
            headers.insert(name, value);
        }
    }
    Ok(response)
}
