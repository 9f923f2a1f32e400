//! docidx pipeline consumer
//!
//! Pulls document revision events off the event log, matches each one
//! against the registered rulesets, and runs the matched pipelines
//! (search_index, embeddings, llm_summary) per revision (§4.4).

use std::net::SocketAddr;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use axum::{routing::get, Json, Router};
use docidx_adapters::{
    BedrockProvider, DailyBudget, OllamaProvider, OpenAiProvider, PgVectorStore,
    PostgresExecutionStore, PostgresSummaryStore, RulesetMatcher, TantivyKeywordIndex,
};
use docidx_adapters::{load_rulesets_config, NatsLogTransport};
use docidx_consumer::config::{ConsumerConfig, ProviderSelection};
use docidx_consumer::{parse_rulesets, process_batch};
use docidx_ports::{EmbeddingProvider, SummaryProvider, SystemClock};
use docidx_pipeline::{EmbeddingsStep, LlmSummaryStep, PipelineExecutor, PipelineStep, SearchIndexStep};
use serde_json::json;
use sqlx::postgres::PgPoolOptions;
use tokio::signal;
use tokio::sync::RwLock;
use tracing::{error, info, warn};

struct ConsumerState {
    config: ConsumerConfig,
    running: AtomicBool,
    last_poll: RwLock<Option<chrono::DateTime<chrono::Utc>>>,
    records_processed: RwLock<u64>,
}

impl ConsumerState {
    fn is_ready(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }
}

fn build_steps<P>(
    provider: Arc<P>,
    keyword_index: Arc<TantivyKeywordIndex>,
    vector_store: Arc<PgVectorStore>,
    summary_store: Arc<PostgresSummaryStore>,
    embedding_model: &str,
    embedding_dimensions: usize,
) -> Vec<Arc<dyn PipelineStep>>
where
    P: EmbeddingProvider + SummaryProvider + 'static,
{
    vec![
        Arc::new(SearchIndexStep::new(keyword_index)),
        Arc::new(EmbeddingsStep::new(
            provider.clone(),
            vector_store,
            embedding_model.to_string(),
            embedding_dimensions,
        )),
        Arc::new(LlmSummaryStep::new(provider, summary_store)),
    ]
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = ConsumerConfig::from_env();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.log_level)),
        )
        .json()
        .init();

    info!(
        service = %config.service_name,
        poll_interval_ms = config.poll_interval_ms,
        fetch_batch_size = config.fetch_batch_size,
        provider = ?config.provider,
        "Starting docidx consumer"
    );

    let db_pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&config.database_url)
        .await?;
    info!("Database connection established");

    let transport = NatsLogTransport::connect(config.log.clone()).await?;
    info!(brokers = ?config.log.brokers, "NATS connection established");

    let keyword_index = Arc::new(TantivyKeywordIndex::create_in_dir(Path::new(&config.index_dir))?);
    let vector_store = Arc::new(PgVectorStore::new(db_pool.clone()));
    let summary_store = Arc::new(PostgresSummaryStore::new(db_pool.clone()));
    let execution_store = Arc::new(PostgresExecutionStore::new(db_pool.clone()));

    let budget = Arc::new(DailyBudget::new(config.daily_token_budget, config.daily_request_budget));
    let steps: Vec<Arc<dyn PipelineStep>> = match config.provider {
        ProviderSelection::OpenAi => {
            let provider = Arc::new(OpenAiProvider::new(
                config.openai_api_key.clone(),
                config.embedding_model.clone(),
                config.chat_model.clone(),
                budget,
            ));
            build_steps(
                provider,
                keyword_index,
                vector_store,
                summary_store,
                &config.embedding_model,
                config.embedding_dimensions,
            )
        }
        ProviderSelection::Bedrock => {
            let provider = Arc::new(BedrockProvider::new(
                config.bedrock_base_url.clone(),
                config.bedrock_auth_header.clone(),
                config.embedding_model.clone(),
                config.chat_model.clone(),
                budget,
            ));
            build_steps(
                provider,
                keyword_index,
                vector_store,
                summary_store,
                &config.embedding_model,
                config.embedding_dimensions,
            )
        }
        ProviderSelection::Ollama => {
            let provider = Arc::new(OllamaProvider::new(
                config.ollama_base_url.clone(),
                config.embedding_model.clone(),
                config.chat_model.clone(),
                budget,
            ));
            build_steps(
                provider,
                keyword_index,
                vector_store,
                summary_store,
                &config.embedding_model,
                config.embedding_dimensions,
            )
        }
    };

    let known_steps = steps.iter().map(|s| s.name().to_string()).collect::<std::collections::HashSet<_>>();

    let raw_rulesets = load_rulesets_config(&db_pool).await?;
    let rulesets = parse_rulesets(raw_rulesets);
    info!(count = rulesets.len(), "Loaded rulesets");
    let matcher = Arc::new(RulesetMatcher::new(rulesets, &known_steps)?);

    let executor = Arc::new(
        PipelineExecutor::new(execution_store, Arc::new(SystemClock), steps)
            .with_step_attempt_budget(config.step_attempt_budget),
    );

    let state = Arc::new(ConsumerState {
        config: config.clone(),
        running: AtomicBool::new(true),
        last_poll: RwLock::new(None),
        records_processed: RwLock::new(0),
    });

    let health_state = state.clone();
    let health_addr = SocketAddr::from(([0, 0, 0, 0], config.health_port));
    let health_app = Router::new()
        .route("/ready", get(move || ready_handler(health_state.clone())))
        .route("/health", get(|| async { Json(json!({"status": "ok"})) }));

    let health_server = tokio::spawn(async move {
        info!(addr = %health_addr, "Health server listening");
        if let Err(e) = axum::serve(
            tokio::net::TcpListener::bind(health_addr).await.unwrap(),
            health_app,
        )
        .await
        {
            error!(error = %e, "Health server error");
        }
    });

    let consumer_state = state.clone();
    let consumer_loop = tokio::spawn(async move {
        run_consumer_loop(consumer_state, transport, matcher, executor).await;
    });

    shutdown_signal().await;

    info!("Shutdown signal received, stopping consumer");
    state.running.store(false, Ordering::Relaxed);

    let _ = tokio::time::timeout(std::time::Duration::from_secs(5), consumer_loop).await;
    health_server.abort();

    info!("Consumer shutdown complete");
    Ok(())
}

async fn ready_handler(state: Arc<ConsumerState>) -> Json<serde_json::Value> {
    let last_poll = state.last_poll.read().await;
    let processed = *state.records_processed.read().await;

    Json(json!({
        "status": if state.is_ready() { "ready" } else { "not_ready" },
        "service": state.config.service_name,
        "last_poll": last_poll.map(|t| t.to_rfc3339()),
        "records_processed": processed
    }))
}

async fn run_consumer_loop<S, C>(
    state: Arc<ConsumerState>,
    transport: NatsLogTransport,
    matcher: Arc<RulesetMatcher>,
    executor: Arc<PipelineExecutor<S, C>>,
) where
    S: docidx_ports::ExecutionStore,
    C: docidx_ports::Clock,
{
    let poll_interval = state.config.poll_interval();
    info!(interval_ms = state.config.poll_interval_ms, "Consumer loop started");

    while state.running.load(Ordering::Relaxed) {
        {
            let mut last_poll = state.last_poll.write().await;
            *last_poll = Some(chrono::Utc::now());
        }

        match process_batch(&transport, &matcher, &executor, state.config.fetch_batch_size).await {
            Ok(0) => {
                tokio::time::sleep(poll_interval).await;
            }
            Ok(n) => {
                let mut processed = state.records_processed.write().await;
                *processed += n as u64;
            }
            Err(e) => {
                warn!(error = %e, "Error polling event log");
                tokio::time::sleep(poll_interval).await;
            }
        }
    }

    info!("Consumer loop stopped");
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
