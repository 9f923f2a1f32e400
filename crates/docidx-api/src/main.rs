//! docidx search API
//!
//! HTTP entry point for keyword/semantic/hybrid search over indexed
//! document revisions, plus outbox administration (§4.9, §A.11).

mod config;
mod handlers;
mod observability;

use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use docidx_adapters::{
    AnyEmbeddingProvider, BedrockProvider, DailyBudget, NatsLogTransport, OllamaProvider, OpenAiProvider,
    PgVectorStore, PostgresOutboxStore, SearchEngine, SearchService, TantivyKeywordIndex,
};
use docidx_adapters::NatsConfig;
use docidx_relay::Relay;
use sqlx::postgres::PgPoolOptions;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use config::{ApiConfig, ProviderSelection};
use observability::Metrics;

#[derive(Clone)]
pub struct AppState {
    pub search: Arc<dyn SearchService>,
    pub relay: Arc<Relay<PostgresOutboxStore, NatsLogTransport>>,
    pub db_pool: sqlx::PgPool,
    pub metrics: Arc<Metrics>,
    pub start_time: Instant,
}

fn build_search_engine(config: &ApiConfig, keyword_index: Arc<TantivyKeywordIndex>, db_pool: sqlx::PgPool) -> Arc<dyn SearchService> {
    let vector_store = Arc::new(PgVectorStore::with_probe(db_pool, config.vector_probe));
    let budget = Arc::new(DailyBudget::new(config.daily_token_budget, config.daily_request_budget));

    let provider = match config.provider {
        ProviderSelection::OpenAi => AnyEmbeddingProvider::OpenAi(OpenAiProvider::new(
            config.openai_api_key.clone(),
            config.embedding_model.clone(),
            config.openai_chat_model.clone(),
            budget,
        )),
        ProviderSelection::Bedrock => AnyEmbeddingProvider::Bedrock(BedrockProvider::new(
            config.bedrock_base_url.clone(),
            config.bedrock_auth_header.clone(),
            config.embedding_model.clone(),
            config.bedrock_chat_model.clone(),
            budget,
        )),
        ProviderSelection::Ollama => AnyEmbeddingProvider::Ollama(OllamaProvider::new(
            config.ollama_base_url.clone(),
            config.embedding_model.clone(),
            config.ollama_chat_model.clone(),
            budget,
        )),
    };

    let engine = SearchEngine::new(keyword_index)
        .with_semantic(vector_store, Arc::new(provider), config.embedding_model.clone())
        .with_weights(config.hybrid_weights);
    Arc::new(engine)
}

fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(handlers::health::liveness))
        .route("/readyz", get(handlers::health::readiness))
        .route("/metrics", get(observability::metrics_handler))
        .route("/api/v1/search/keyword", get(handlers::search::keyword_search))
        .route("/api/v1/search/semantic", get(handlers::search::semantic_search))
        .route("/api/v1/search/hybrid", get(handlers::search::hybrid_search))
        .route("/admin/outbox/retry", post(handlers::admin::retry_outbox))
        .route("/admin/outbox/cleanup", post(handlers::admin::cleanup_outbox))
        .layer(middleware::from_fn_with_state(state.clone(), observability::metrics_middleware))
        .layer(middleware::from_fn(observability::request_context_middleware))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = ApiConfig::from_env();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("docidx_api={},tower_http=info", config.log_level).into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let db_pool = PgPoolOptions::new().max_connections(10).connect(&config.database_url).await?;
    tracing::info!("database connection established");

    let keyword_index = Arc::new(TantivyKeywordIndex::create_in_dir(Path::new(&config.search_index_dir))?);
    let search = build_search_engine(&config, keyword_index, db_pool.clone());

    let nats_config = NatsConfig::from_env();
    let transport = NatsLogTransport::connect(nats_config).await?;
    let outbox_store = Arc::new(PostgresOutboxStore::new(db_pool.clone()));
    let relay = Arc::new(Relay::new(outbox_store, Arc::new(transport)));

    let state = AppState {
        search,
        relay,
        db_pool,
        metrics: Arc::new(Metrics::new()),
        start_time: Instant::now(),
    };

    let app = create_router(state);
    let bind_addr = config.bind_addr();
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    tracing::info!(addr = %bind_addr, "docidx API listening");

    axum::serve(listener, app).await?;
    Ok(())
}
