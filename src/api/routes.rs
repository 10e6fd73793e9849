use std::sync::Arc;

use axum::{
    extract::{Query, State},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};

use crate::api::health::{HealthSnapshot, HealthState};
use crate::api::latency::{LatencySnapshot, LatencyStats};
use crate::db::models::{AlertRow, OpportunityRow, ProductRow};
use crate::db::OpportunityStore;
use crate::error::AppError;
use crate::filters::FilterConfig;
use crate::producer::{Producer, SweepSummary};
use crate::queue::{JobQueue, QueueStatus};
use crate::types::MarketCode;

#[derive(Clone)]
pub struct ApiState {
    pub producer: Arc<Producer>,
    pub queue: Arc<JobQueue>,
    pub store: OpportunityStore,
    pub latency: Arc<LatencyStats>,
    pub health: Arc<HealthState>,
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/scan", post(scan_manual))
        .route("/scan/category", post(scan_category))
        .route("/queue/status", get(queue_status))
        .route("/products", get(get_products))
        .route("/opportunities", get(get_opportunities))
        .route("/alerts/recent", get(get_recent_alerts))
        .route("/health", get(get_health))
        .route("/stats/latency", get(get_stats_latency))
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Request / response types
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
pub struct ScanRequest {
    pub upc: String,
    pub market: Option<MarketCode>,
    pub category: Option<String>,
}

#[derive(Serialize)]
pub struct ScanResponse {
    pub product_key: String,
    pub market: MarketCode,
    pub queued: bool,
}

#[derive(Deserialize)]
pub struct CategoryScanRequest {
    pub category: String,
    pub market: Option<MarketCode>,
    pub max_rank: Option<i64>,
    pub brand_whitelist: Option<Vec<String>>,
    pub brand_blacklist: Option<Vec<String>>,
    pub max_weight_g: Option<f64>,
    pub max_volume: Option<f64>,
    pub max_results: Option<usize>,
}

#[derive(Deserialize)]
pub struct OpportunitiesQuery {
    pub status: Option<String>,
    pub min_score: Option<f64>,
    pub limit: Option<i64>,
}

#[derive(Deserialize)]
pub struct LimitQuery {
    pub limit: Option<i64>,
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

async fn scan_manual(
    State(state): State<ApiState>,
    Json(req): Json<ScanRequest>,
) -> Result<Json<ScanResponse>, AppError> {
    if req.upc.trim().is_empty() {
        return Err(AppError::Config("upc must not be empty".to_string()));
    }
    let market = req.market.unwrap_or(state.producer.default_target());
    let queued = state
        .producer
        .enqueue_manual(req.upc.trim(), market, req.category)
        .await;
    Ok(Json(ScanResponse {
        product_key: req.upc.trim().to_string(),
        market,
        queued,
    }))
}

async fn scan_category(
    State(state): State<ApiState>,
    Json(req): Json<CategoryScanRequest>,
) -> Result<Json<SweepSummary>, AppError> {
    let market = req.market.unwrap_or(state.producer.default_target());

    let mut filters = FilterConfig::default();
    if let Some(max_rank) = req.max_rank {
        filters.default_rank_ceiling = max_rank;
        filters.rank_ceilings.clear();
    }
    if let Some(whitelist) = req.brand_whitelist {
        filters.brand_whitelist = whitelist.iter().map(|b| b.to_lowercase()).collect();
    }
    if let Some(blacklist) = req.brand_blacklist {
        filters.brand_blacklist = blacklist.iter().map(|b| b.to_lowercase()).collect();
    }
    filters.max_weight_g = req.max_weight_g.or(filters.max_weight_g);
    filters.max_volume = req.max_volume.or(filters.max_volume);

    let summary = state
        .producer
        .sweep_category(&req.category, market, &filters, req.max_results)
        .await?;
    Ok(Json(summary))
}

async fn queue_status(State(state): State<ApiState>) -> Json<QueueStatus> {
    Json(state.queue.status().await)
}

async fn get_products(
    State(state): State<ApiState>,
    Query(params): Query<LimitQuery>,
) -> Result<Json<Vec<ProductRow>>, AppError> {
    let limit = params.limit.unwrap_or(50).clamp(1, 500);
    let rows = state.store.recent_products(limit).await?;
    Ok(Json(rows))
}

async fn get_opportunities(
    State(state): State<ApiState>,
    Query(params): Query<OpportunitiesQuery>,
) -> Result<Json<Vec<OpportunityRow>>, AppError> {
    let limit = params.limit.unwrap_or(50).clamp(1, 500);
    let rows = state
        .store
        .recent_opportunities(params.status.as_deref(), params.min_score, limit)
        .await?;
    Ok(Json(rows))
}

async fn get_recent_alerts(
    State(state): State<ApiState>,
    Query(params): Query<LimitQuery>,
) -> Result<Json<Vec<AlertRow>>, AppError> {
    let limit = params.limit.unwrap_or(50).clamp(1, 500);
    let rows = state.store.recent_alerts(limit).await?;
    Ok(Json(rows))
}

async fn get_health(State(state): State<ApiState>) -> Json<HealthSnapshot> {
    Json(state.health.snapshot())
}

async fn get_stats_latency(State(state): State<ApiState>) -> Json<LatencySnapshot> {
    Json(state.latency.snapshot())
}
