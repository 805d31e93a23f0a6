//! RAG service binary
//!
//! Run with: cargo run -p corpus-rag --bin corpus-rag-server

use corpus_rag::{RagConfig, RagServer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    let config = RagConfig::from_env()?;
    tracing::info!("configuration loaded");
    tracing::info!("  - environment: {}", config.environment);
    tracing::info!("  - embeddings provider: {}", config.providers.embeddings_provider);
    tracing::info!("  - metadata provider: {}", config.providers.metadata_provider);
    tracing::info!("  - qa provider: {}", config.providers.qa_provider);
    tracing::info!("  - vector store: {}", config.vector_store.url);
    tracing::info!("  - default collection: {}", config.vector_store.collection);
    tracing::info!("  - rate limit: {} rpm", config.rate_limit.max_rpm);
    tracing::info!(
        "  - chunking: {} tokens, {} overlap, {} strategy",
        config.chunking.chunk_size,
        config.chunking.chunk_overlap,
        config.chunking.default_strategy
    );

    let server = RagServer::new(config).await?;
    tracing::info!("starting server on http://{}", server.address());
    server.start().await?;
    Ok(())
}

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let level = std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string());
        tracing_subscriber::EnvFilter::new(format!("corpus_rag={level},tower_http=info"))
    });

    let json = std::env::var("LOG_FORMAT")
        .map(|f| f.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}
