//! Database row types used by sqlx for typed queries.

use serde::Serialize;

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct ProductRow {
    pub product_key: String,
    pub market: String,
    pub asin: Option<String>,
    pub title: Option<String>,
    pub brand: Option<String>,
    pub source_price: Option<f64>,
    pub buy_box_price: Option<f64>,
    pub sales_rank: Option<i64>,
    pub hazmat: i64,
    pub variation_hash: Option<String>,
    pub category: Option<String>,
    pub last_seen: i64,
    pub scanned_at: i64,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct OpportunityRow {
    pub product_key: String,
    pub source_market: String,
    pub target_market: String,
    pub category: Option<String>,
    pub status: String,
    pub filter_reason: Option<String>,
    pub opportunity_score: Option<f64>,
    pub fees: Option<f64>,
    pub shipping: Option<f64>,
    pub risk_multiplier: Option<f64>,
    pub moat_score: Option<i64>,
    pub moat_level: Option<String>,
    pub crash_score: Option<i64>,
    pub crash_level: Option<String>,
    pub sales_velocity: Option<f64>,
    pub amazon_buy_box_share: Option<f64>,
    pub last_analyzed: i64,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct AlertRow {
    pub id: i64,
    pub product_key: String,
    pub target_market: String,
    pub kind: String,
    pub opportunity_score: Option<f64>,
    pub created_at: i64,
}
