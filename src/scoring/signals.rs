use serde::{Deserialize, Serialize};

use crate::config::AMAZON_SELLER_IDS;
use crate::types::RawProductRecord;

// Competition-moat point awards.
const FBA_VERY_LOW_POINTS: u32 = 30; // <= 2 FBA sellers
const FBA_LOW_POINTS: u32 = 20; // <= 5
const FBA_MODERATE_POINTS: u32 = 10; // <= 10
const AMAZON_ABSENT_POINTS: u32 = 30;
const AMAZON_MINOR_POINTS: u32 = 10;
const AMAZON_MINOR_SHARE_MAX: f64 = 25.0;
const NON_HAZMAT_POINTS: u32 = 5;
const HEAVY_PACKAGE_POINTS: u32 = 5;
const HEAVY_PACKAGE_MIN_G: f64 = 2000.0;
const BULKY_PACKAGE_POINTS: u32 = 5;
const BULKY_PACKAGE_MIN_VOLUME: f64 = 30_000.0;
const STABLE_BUY_BOX_POINTS: u32 = 15; // <= 2 distinct winners
const SEMI_STABLE_BUY_BOX_POINTS: u32 = 8; // <= 4

// Price-crash component weights and flat impacts.
const DROP_WEIGHT: f64 = 0.4;
const VOLATILITY_WEIGHT: f64 = 0.3;
const AMAZON_WEIGHT: f64 = 0.2;
const SEASONAL_WEIGHT: f64 = 0.1;
const AMAZON_IMPACT: f64 = 30.0;
const SEASONAL_IMPACT: f64 = 10.0;
const VOLATILITY_SCALE: f64 = 1000.0;
const HIGH_SEASON_MONTHS: &[u32] = &[11, 12];
const SEASONAL_CATEGORIES: &[&str] = &["toys"];

// Sales-velocity heuristic values.
const VELOCITY_IMPROVING: f64 = 1.0;
const VELOCITY_DEFAULT: f64 = 0.5;

// ---------------------------------------------------------------------------
// Competition moat
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MoatLevel {
    WeakMoat,
    MediumMoat,
    StrongMoat,
}

impl std::fmt::Display for MoatLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            MoatLevel::WeakMoat => "weak_moat",
            MoatLevel::MediumMoat => "medium_moat",
            MoatLevel::StrongMoat => "strong_moat",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MoatScore {
    pub score: u32,
    pub level: MoatLevel,
}

/// Additive 0-100 estimate of how defensible a listing is against new
/// sellers: few FBA competitors, no first-party presence on the buy box,
/// physical-distribution barriers, and a stable buy-box winner set all add
/// points.
pub fn competition_moat(record: &RawProductRecord) -> MoatScore {
    let mut score: u32 = 0;

    let fba = record.fba_offer_count.unwrap_or(0);
    if fba <= 2 {
        score += FBA_VERY_LOW_POINTS;
    } else if fba <= 5 {
        score += FBA_LOW_POINTS;
    } else if fba <= 10 {
        score += FBA_MODERATE_POINTS;
    }

    let share = amazon_buy_box_share(record);
    if share == 0.0 && !amazon_holds_buy_box(record) {
        score += AMAZON_ABSENT_POINTS;
    } else if share < AMAZON_MINOR_SHARE_MAX {
        score += AMAZON_MINOR_POINTS;
    }

    if !record.hazmat {
        score += NON_HAZMAT_POINTS;
    }
    if record.package_weight_g.unwrap_or(0.0) > HEAVY_PACKAGE_MIN_G {
        score += HEAVY_PACKAGE_POINTS;
    }
    if record.package_volume.unwrap_or(0.0) > BULKY_PACKAGE_MIN_VOLUME {
        score += BULKY_PACKAGE_POINTS;
    }

    let winners = record.buy_box_winner_count.unwrap_or(0);
    if winners <= 2 {
        score += STABLE_BUY_BOX_POINTS;
    } else if winners <= 4 {
        score += SEMI_STABLE_BUY_BOX_POINTS;
    }

    let score = score.min(100);
    let level = if score >= 70 {
        MoatLevel::StrongMoat
    } else if score >= 50 {
        MoatLevel::MediumMoat
    } else {
        MoatLevel::WeakMoat
    };

    MoatScore { score, level }
}

// ---------------------------------------------------------------------------
// Price-crash risk
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CrashLevel {
    Low,
    Medium,
    High,
    Unknown,
}

impl std::fmt::Display for CrashLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            CrashLevel::Low => "low",
            CrashLevel::Medium => "medium",
            CrashLevel::High => "high",
            CrashLevel::Unknown => "unknown",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CrashRisk {
    pub score: u32,
    pub level: CrashLevel,
}

/// Weighted 0-100 estimate of near-term price/rank deterioration:
/// 40% recent fractional price drop, 30% sales-rank volatility, 20% flat
/// first-party buy-box impact, 10% seasonal flag. `month` is a calendar
/// month (1-12) supplied by the caller so the function stays deterministic.
///
/// Fewer than two price-history points means there is nothing to measure:
/// the result is exactly `{score: 0, level: unknown}`.
pub fn price_crash_risk(record: &RawProductRecord, month: u32) -> CrashRisk {
    let prices = &record.price_history;
    if prices.len() < 2 {
        return CrashRisk {
            score: 0,
            level: CrashLevel::Unknown,
        };
    }

    let first = prices[0];
    let last = prices[prices.len() - 1];
    let drop_score = if first > 0.0 {
        ((first - last) / first * 100.0).clamp(0.0, 100.0)
    } else {
        0.0
    };

    let volatility_score = (rank_variance(&record.rank_history) / VOLATILITY_SCALE).min(100.0);

    let amazon_impact = if amazon_holds_buy_box(record) {
        AMAZON_IMPACT
    } else {
        0.0
    };

    let seasonal = if HIGH_SEASON_MONTHS.contains(&month) && is_seasonal_category(record) {
        SEASONAL_IMPACT
    } else {
        0.0
    };

    let total = DROP_WEIGHT * drop_score
        + VOLATILITY_WEIGHT * volatility_score
        + AMAZON_WEIGHT * amazon_impact
        + SEASONAL_WEIGHT * seasonal;
    let score = total.round() as u32;

    let level = if score > 70 {
        CrashLevel::High
    } else if score > 40 {
        CrashLevel::Medium
    } else {
        CrashLevel::Low
    };

    CrashRisk { score, level }
}

/// Population variance of the rank history; 0 for an empty history.
fn rank_variance(ranks: &[f64]) -> f64 {
    if ranks.is_empty() {
        return 0.0;
    }
    let n = ranks.len() as f64;
    let mean = ranks.iter().sum::<f64>() / n;
    ranks.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / n
}

fn is_seasonal_category(record: &RawProductRecord) -> bool {
    record
        .category
        .as_deref()
        .map(|c| {
            let c = c.to_lowercase();
            SEASONAL_CATEGORIES.iter().any(|s| *s == c)
        })
        .unwrap_or(false)
}

// ---------------------------------------------------------------------------
// Sales velocity
// ---------------------------------------------------------------------------

/// Heuristic 0-1 velocity from the observed rank window: an improving
/// (decreasing) rank reads as high velocity, anything else as the medium
/// default, including histories too short to compare.
pub fn sales_velocity(record: &RawProductRecord) -> f64 {
    let ranks = &record.rank_history;
    if ranks.len() < 2 {
        return VELOCITY_DEFAULT;
    }
    if ranks[ranks.len() - 1] < ranks[0] {
        VELOCITY_IMPROVING
    } else {
        VELOCITY_DEFAULT
    }
}

// ---------------------------------------------------------------------------
// Buy-box dominance
// ---------------------------------------------------------------------------

/// Percentage of the statistics window a first-party seller held the buy
/// box, summed across the known first-party identities, clamped to [0, 100]
/// and rounded to two decimals. 0 when no statistics are available.
pub fn amazon_buy_box_share(record: &RawProductRecord) -> f64 {
    let total: f64 = AMAZON_SELLER_IDS
        .iter()
        .filter_map(|id| record.buy_box_stats.get(*id))
        .sum();
    (total.clamp(0.0, 100.0) * 100.0).round() / 100.0
}

pub fn amazon_holds_buy_box(record: &RawProductRecord) -> bool {
    record
        .buy_box_seller_id
        .as_deref()
        .map(|id| AMAZON_SELLER_IDS.contains(&id))
        .unwrap_or(false)
}
