use crate::error::{AppError, Result};
use crate::types::MarketCode;

pub const CATALOG_API_URL: &str = "https://api.keepa.com";

/// Minimum spacing between consecutive call batches toward the catalog
/// provider (milliseconds). Also the base unit for retry backoff.
pub const THROTTLE_MS: u64 = 1200;

/// Hard ceiling on product keys per provider call batch (provider API limit).
pub const MAX_BATCH: usize = 100;

/// Fetch attempts per job before the job is dead-lettered.
pub const MAX_RETRY: u32 = 3;

/// Intake-level "already scanned" marker lifetime.
pub const SCANNED_TTL_SECS: u64 = 14 * 24 * 3600;

/// Result-level cache lifetime for a freshly fetched product record.
pub const RESULT_TTL_SECS: u64 = 3600;

/// Global sales-rank ceiling when the category has no configured limit.
pub const DEFAULT_MAX_RANK: i64 = 20_000;

/// Per-category sales-rank ceilings: (category, ceiling).
pub const CATEGORY_RANK_CEILINGS: &[(&str, i64)] = &[
    ("electronics", 5_000),
    ("toys", 20_000),
    ("home", 10_000),
    ("books", 30_000),
];

/// Rank assumed for a record that carries no usable sales rank.
pub const MISSING_RANK: i64 = 999_999;

/// Brands rejected outright (compared lowercase).
pub const BRAND_BLACKLIST: &[&str] = &["fakebrand", "unknownbrand", "generic", "amazon basics"];

/// First-party marketplace seller identities.
pub const AMAZON_SELLER_IDS: &[&str] = &[
    "ATVPDKIKX0DER",  // US
    "A1AM78C64UM0Y8", // EU
];

/// Risk-multiplier penalty factors. Compose multiplicatively from 1.0.
pub mod risk_penalties {
    pub const UPC_MISMATCH: f64 = 0.90;
    pub const TITLE_MISMATCH: f64 = 0.85;
    pub const VARIATION_MISMATCH: f64 = 0.95;
    pub const HAZMAT: f64 = 0.70;
}

/// Fee and shipping fallbacks when the record carries no explicit figures.
pub mod fee_defaults {
    pub const REFERRAL_RATE: f64 = 0.15;
    pub const FULFILLMENT_FEE: f64 = 3.50;
    pub const SHIPPING_BASE: f64 = 5.0;
    pub const SHIPPING_PER_KG: f64 = 6.5;
}

/// Alert thresholds (see worker::build_alerts).
pub mod alert_thresholds {
    pub const HIGH_PROFIT_SCORE: f64 = 50.0;
    pub const HIGH_CRASH_SCORE: u32 = 70;
    pub const AMAZON_DOMINANT_SHARE: f64 = 80.0;
}

#[derive(Debug, Clone)]
pub struct Config {
    pub catalog_api_url: String,
    pub catalog_api_key: String,
    pub log_level: String,
    pub db_path: String,
    pub api_port: u16,
    /// Market products are bought in (SOURCE_MARKET).
    pub source_market: MarketCode,
    /// Default market products are resold in (TARGET_MARKET).
    pub target_market: MarketCode,
    /// Concurrent scan workers (WORKER_CONCURRENCY).
    pub worker_concurrency: usize,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let catalog_api_key = std::env::var("CATALOG_API_KEY")
            .map_err(|_| AppError::Config("CATALOG_API_KEY must be set".to_string()))?;

        Ok(Self {
            catalog_api_url: std::env::var("CATALOG_API_URL")
                .unwrap_or_else(|_| CATALOG_API_URL.to_string()),
            catalog_api_key,
            log_level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            db_path: std::env::var("DB_PATH").unwrap_or_else(|_| "scanner.db".to_string()),
            api_port: std::env::var("API_PORT")
                .unwrap_or_else(|_| "3000".to_string())
                .parse::<u16>()
                .map_err(|_| AppError::Config("API_PORT must be a valid port number".to_string()))?,
            source_market: parse_market_env("SOURCE_MARKET", MarketCode::Us)?,
            target_market: parse_market_env("TARGET_MARKET", MarketCode::De)?,
            worker_concurrency: std::env::var("WORKER_CONCURRENCY")
                .unwrap_or_else(|_| "3".to_string())
                .parse::<usize>()
                .map_err(|_| {
                    AppError::Config("WORKER_CONCURRENCY must be a positive integer".to_string())
                })?
                .max(1),
        })
    }
}

fn parse_market_env(var: &str, default: MarketCode) -> Result<MarketCode> {
    match std::env::var(var) {
        Ok(raw) => raw
            .parse::<MarketCode>()
            .map_err(|_| AppError::Config(format!("{var} must be one of US, UK, DE, FR, IT, ES"))),
        Err(_) => Ok(default),
    }
}

