//! docidx outbox relay
//!
//! Standalone service that polls pending outbox rows and publishes them
//! to the event log in `created_at` order (§4.2).

use axum::{routing::get, Json, Router};
use docidx_adapters::{NatsLogTransport, PostgresOutboxStore};
use docidx_relay::config::RelayConfig;
use docidx_relay::Relay;
use serde_json::json;
use sqlx::postgres::PgPoolOptions;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::signal;
use tokio::sync::RwLock;
use tracing::{error, info};

struct RelayState {
    config: RelayConfig,
    running: AtomicBool,
    last_poll: RwLock<Option<chrono::DateTime<chrono::Utc>>>,
    entries_published: RwLock<u64>,
}

impl RelayState {
    fn is_ready(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = RelayConfig::from_env();

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
        batch_size = config.batch_size,
        "Starting docidx relay"
    );

    let db_pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&config.database_url)
        .await?;
    info!("Database connection established");

    let transport = NatsLogTransport::connect(config.log.clone()).await?;
    info!(brokers = ?config.log.brokers, "NATS connection established");

    let outbox_store = Arc::new(PostgresOutboxStore::new(db_pool));
    let relay = Arc::new(Relay::new(outbox_store, Arc::new(transport)).with_publish_retries(config.publish_retries));

    let state = Arc::new(RelayState {
        config: config.clone(),
        running: AtomicBool::new(true),
        last_poll: RwLock::new(None),
        entries_published: RwLock::new(0),
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

    let relay_state = state.clone();
    let relay_for_loop = relay.clone();
    let relay_loop = tokio::spawn(async move {
        run_relay_loop(relay_state, relay_for_loop).await;
    });

    let cleanup_state = state.clone();
    let cleanup_relay = relay.clone();
    let cleanup_loop = tokio::spawn(async move {
        run_cleanup_loop(cleanup_state, cleanup_relay).await;
    });

    shutdown_signal().await;

    info!("Shutdown signal received, stopping relay");
    state.running.store(false, Ordering::Relaxed);

    let _ = tokio::time::timeout(std::time::Duration::from_secs(5), relay_loop).await;
    cleanup_loop.abort();
    health_server.abort();

    info!("Relay shutdown complete");
    Ok(())
}

async fn ready_handler(state: Arc<RelayState>) -> Json<serde_json::Value> {
    let last_poll = state.last_poll.read().await;
    let published = *state.entries_published.read().await;

    Json(json!({
        "status": if state.is_ready() { "ready" } else { "not_ready" },
        "service": state.config.service_name,
        "last_poll": last_poll.map(|t| t.to_rfc3339()),
        "entries_published": published
    }))
}

async fn run_relay_loop(state: Arc<RelayState>, relay: Arc<Relay<PostgresOutboxStore, NatsLogTransport>>) {
    let poll_interval = state.config.poll_interval();
    info!(interval_ms = state.config.poll_interval_ms, "Relay loop started");

    while state.running.load(Ordering::Relaxed) {
        {
            let mut last_poll = state.last_poll.write().await;
            *last_poll = Some(chrono::Utc::now());
        }

        match relay.run_once(state.config.batch_size).await {
            Ok(n) if n > 0 => {
                let mut published = state.entries_published.write().await;
                *published += n as u64;
            }
            Ok(_) => {}
            Err(e) => {
                error!(error = %e, "Error in relay poll tick");
            }
        }

        tokio::time::sleep(poll_interval).await;
    }

    info!("Relay loop stopped");
}

/// Periodically deletes `published` rows older than the retention window
/// (§4.2 `cleanup`). Runs on its own, much coarser tick than the publish
/// loop since it is pure housekeeping.
async fn run_cleanup_loop(state: Arc<RelayState>, relay: Arc<Relay<PostgresOutboxStore, NatsLogTransport>>) {
    let tick = std::time::Duration::from_secs(3600);
    while state.running.load(Ordering::Relaxed) {
        tokio::time::sleep(tick).await;
        let older_than = chrono::Utc::now() - state.config.retention();
        match relay.cleanup(older_than).await {
            Ok(deleted) if deleted > 0 => info!(deleted, "Cleaned up published outbox rows"),
            Ok(_) => {}
            Err(e) => error!(error = %e, "Error cleaning up outbox rows"),
        }
    }
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
