use std::collections::HashMap;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Markets
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum MarketCode {
    Us,
    Uk,
    De,
    Fr,
    It,
    Es,
}

impl MarketCode {
    /// Provider domain id for this marketplace.
    pub fn domain_id(self) -> u8 {
        match self {
            MarketCode::Us => 1,
            MarketCode::Uk => 2,
            MarketCode::De => 3,
            MarketCode::Fr => 4,
            MarketCode::It => 5,
            MarketCode::Es => 6,
        }
    }
}

impl std::fmt::Display for MarketCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            MarketCode::Us => "US",
            MarketCode::Uk => "UK",
            MarketCode::De => "DE",
            MarketCode::Fr => "FR",
            MarketCode::It => "IT",
            MarketCode::Es => "ES",
        };
        write!(f, "{s}")
    }
}

impl FromStr for MarketCode {
    type Err = ();

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "US" => Ok(MarketCode::Us),
            "UK" => Ok(MarketCode::Uk),
            "DE" => Ok(MarketCode::De),
            "FR" => Ok(MarketCode::Fr),
            "IT" => Ok(MarketCode::It),
            "ES" => Ok(MarketCode::Es),
            _ => Err(()),
        }
    }
}

// ---------------------------------------------------------------------------
// Scan jobs
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum JobMode {
    Manual,
    CategorySweep,
}

impl std::fmt::Display for JobMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobMode::Manual => write!(f, "manual"),
            JobMode::CategorySweep => write!(f, "category-sweep"),
        }
    }
}

/// One unit of scan work. Owned by the queue until claimed by a worker;
/// removed on terminal success or moved to the dead-letter list after the
/// retry ceiling.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanJob {
    pub product_key: String,
    pub target_market: MarketCode,
    pub category: Option<String>,
    pub mode: JobMode,
    /// Fetch attempts consumed so far.
    pub attempt: u32,
    /// Unix milliseconds before which the next attempt must not start.
    pub next_attempt_at: Option<u64>,
}

impl ScanJob {
    pub fn new(
        product_key: impl Into<String>,
        target_market: MarketCode,
        category: Option<String>,
        mode: JobMode,
    ) -> Self {
        Self {
            product_key: product_key.into(),
            target_market,
            category,
            mode,
            attempt: 0,
            next_attempt_at: None,
        }
    }

    /// Queue dedup identity: one in-flight job per (key, market) pair.
    pub fn identity(&self) -> String {
        format!("{}:{}", self.product_key, self.target_market)
    }
}

// ---------------------------------------------------------------------------
// Raw product records
// ---------------------------------------------------------------------------

/// The provider's normalized view of one product in one market. Built once at
/// the ingestion boundary (provider::normalize_product resolves every
/// fallback); read-only input to the filter chain and scoring engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawProductRecord {
    pub upc: Option<String>,
    pub asin: Option<String>,
    pub market: MarketCode,
    pub title: Option<String>,
    pub brand: Option<String>,
    /// Current buy-box price in currency units (provider sends cents).
    pub buy_box_price: Option<f64>,
    pub buy_box_seller_id: Option<String>,
    /// Referral fee as a fraction of the sale price.
    pub referral_fee_rate: Option<f64>,
    pub fulfillment_fee: Option<f64>,
    pub package_weight_g: Option<f64>,
    pub package_volume: Option<f64>,
    pub sales_rank: Option<i64>,
    pub hazmat: bool,
    pub variation_hash: Option<String>,
    pub fba_offer_count: Option<i64>,
    pub buy_box_winner_count: Option<i64>,
    /// seller id -> percentage of the statistics window that seller held the
    /// buy box. Empty when the provider sent no buy-box statistics.
    pub buy_box_stats: HashMap<String, f64>,
    pub price_history: Vec<f64>,
    pub rank_history: Vec<f64>,
    pub category: Option<String>,
}

impl RawProductRecord {
    /// Key the record is cached and persisted under; UPC preferred over ASIN.
    pub fn product_key(&self) -> Option<&str> {
        self.upc.as_deref().or(self.asin.as_deref())
    }
}

// ---------------------------------------------------------------------------
// Opportunity records
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OpportunityStatus {
    /// Passed every filter with a non-negative finite score.
    Shown,
    /// Passed every filter but the score came out negative.
    Skipped,
    /// Rejected by a filter predicate; `filter_reason` names it.
    Filtered,
}

impl std::fmt::Display for OpportunityStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            OpportunityStatus::Shown => "shown",
            OpportunityStatus::Skipped => "skipped",
            OpportunityStatus::Filtered => "filtered",
        };
        write!(f, "{s}")
    }
}

// ---------------------------------------------------------------------------
// Alerts
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    HighProfit,
    HighCrashRisk,
    AmazonBuyBoxDominant,
}

impl std::fmt::Display for AlertKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            AlertKind::HighProfit => "high_profit",
            AlertKind::HighCrashRisk => "high_crash_risk",
            AlertKind::AmazonBuyBoxDominant => "amazon_buy_box_dominant",
        };
        write!(f, "{s}")
    }
}

// ---------------------------------------------------------------------------
// Cache keys
// ---------------------------------------------------------------------------

/// Intake-level marker: the pair was scanned within the dedup window.
pub fn scanned_key(product_key: &str, market: MarketCode) -> String {
    format!("scanned:{product_key}:{market}")
}

/// Result-level cache of a freshly fetched record.
pub fn record_key(product_key: &str, market: MarketCode) -> String {
    format!("{product_key}:{market}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn market_code_round_trips() {
        for (s, m) in [
            ("US", MarketCode::Us),
            ("de", MarketCode::De),
            ("Uk", MarketCode::Uk),
        ] {
            assert_eq!(s.parse::<MarketCode>().unwrap(), m);
        }
        assert!("XX".parse::<MarketCode>().is_err());
        assert_eq!(MarketCode::De.to_string(), "DE");
    }

    #[test]
    fn domain_ids_match_provider_mapping() {
        assert_eq!(MarketCode::Us.domain_id(), 1);
        assert_eq!(MarketCode::De.domain_id(), 3);
        assert_eq!(MarketCode::Es.domain_id(), 6);
    }

    #[test]
    fn job_identity_is_key_and_market() {
        let job = ScanJob::new("012345678905", MarketCode::De, None, JobMode::Manual);
        assert_eq!(job.identity(), "012345678905:DE");
    }

    #[test]
    fn product_key_prefers_upc() {
        let mut record = RawProductRecord {
            upc: Some("u".to_string()),
            asin: Some("a".to_string()),
            market: MarketCode::Us,
            title: None,
            brand: None,
            buy_box_price: None,
            buy_box_seller_id: None,
            referral_fee_rate: None,
            fulfillment_fee: None,
            package_weight_g: None,
            package_volume: None,
            sales_rank: None,
            hazmat: false,
            variation_hash: None,
            fba_offer_count: None,
            buy_box_winner_count: None,
            buy_box_stats: HashMap::new(),
            price_history: Vec::new(),
            rank_history: Vec::new(),
            category: None,
        };
        assert_eq!(record.product_key(), Some("u"));
        record.upc = None;
        assert_eq!(record.product_key(), Some("a"));
    }
}
