mod api;
mod cache;
mod config;
mod db;
mod error;
mod filters;
mod producer;
mod provider;
mod queue;
mod scoring;
mod throttle;
mod types;
mod worker;

use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use crate::api::health::HealthState;
use crate::api::latency::LatencyStats;
use crate::api::routes::{router, ApiState};
use crate::cache::DedupCache;
use crate::config::{Config, MAX_BATCH, MAX_RETRY, THROTTLE_MS};
use crate::db::OpportunityStore;
use crate::error::Result;
use crate::filters::FilterConfig;
use crate::producer::Producer;
use crate::provider::{CatalogProvider, HttpCatalogClient};
use crate::queue::JobQueue;
use crate::throttle::RateLimiter;
use crate::worker::{spawn_pool, WorkerContext};

#[tokio::main]
async fn main() {
    let cfg = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Config error: {e}");
            std::process::exit(1);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(&cfg.log_level))
        .init();

    if let Err(e) = run(cfg).await {
        error!("Fatal error: {e}");
        std::process::exit(1);
    }
}

async fn run(cfg: Config) -> Result<()> {
    // --- Storage ---
    let store = OpportunityStore::open(&cfg.db_path).await?;
    info!("Database ready at {}", cfg.db_path);

    // --- Shared handles, owned here and injected downward ---
    let cache = Arc::new(DedupCache::new());
    let limiter = Arc::new(RateLimiter::new(Duration::from_millis(THROTTLE_MS), MAX_BATCH));
    let provider: Arc<dyn CatalogProvider> = Arc::new(HttpCatalogClient::new(
        cfg.catalog_api_url.clone(),
        cfg.catalog_api_key.clone(),
    )?);
    let queue = Arc::new(JobQueue::new());
    let latency = Arc::new(LatencyStats::new());
    let health = Arc::new(HealthState::new());

    // --- Scan worker pool ---
    let ctx = Arc::new(WorkerContext {
        source_market: cfg.source_market,
        queue: Arc::clone(&queue),
        cache: Arc::clone(&cache),
        limiter: Arc::clone(&limiter),
        provider: Arc::clone(&provider),
        store: store.clone(),
        filters: FilterConfig::default(),
        latency: Arc::clone(&latency),
        health: Arc::clone(&health),
        max_retries: MAX_RETRY,
        backoff_base: Duration::from_millis(THROTTLE_MS),
    });
    let _workers = spawn_pool(ctx, cfg.worker_concurrency);
    info!(
        concurrency = cfg.worker_concurrency,
        source_market = %cfg.source_market,
        default_target = %cfg.target_market,
        "scan worker pool started",
    );

    // --- Job intake ---
    let producer = Arc::new(Producer::new(
        cfg.source_market,
        cfg.target_market,
        Arc::clone(&queue),
        Arc::clone(&cache),
        Arc::clone(&provider),
        Arc::clone(&limiter),
    ));

    // --- HTTP API server ---
    let api_state = ApiState {
        producer,
        queue,
        store,
        latency,
        health,
    };
    let app = router(api_state);
    let bind_addr = format!("0.0.0.0:{}", cfg.api_port);
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!("HTTP API listening on {bind_addr}");

    axum::serve(listener, app).await?;

    Ok(())
}
