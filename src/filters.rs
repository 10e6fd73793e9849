use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::config::{self, BRAND_BLACKLIST, DEFAULT_MAX_RANK, MISSING_RANK};
use crate::types::RawProductRecord;

// ---------------------------------------------------------------------------
// Reason codes
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterReason {
    MissingIdentifier,
    Hazmat,
    RankExceeded,
    BrandBlacklisted,
    BrandNotWhitelisted,
    MissingPrice,
    Overweight,
    Oversize,
}

impl FilterReason {
    /// Data-absence rejections complete the job with no persistence write;
    /// substantive rejections persist a `filtered` opportunity.
    pub fn is_data_absence(self) -> bool {
        matches!(self, FilterReason::MissingIdentifier | FilterReason::MissingPrice)
    }
}

impl std::fmt::Display for FilterReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            FilterReason::MissingIdentifier => "missing_identifier",
            FilterReason::Hazmat => "hazmat",
            FilterReason::RankExceeded => "rank_exceeded",
            FilterReason::BrandBlacklisted => "brand_blacklisted",
            FilterReason::BrandNotWhitelisted => "brand_not_whitelisted",
            FilterReason::MissingPrice => "missing_price",
            FilterReason::Overweight => "overweight",
            FilterReason::Oversize => "oversize",
        };
        write!(f, "{s}")
    }
}

/// Result of running the chain: pass, or the first failing predicate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterDecision {
    Pass,
    Reject(FilterReason),
}

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Tunable predicate inputs. `Default` carries the stock limits; category
/// sweeps may override any field per request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilterConfig {
    pub default_rank_ceiling: i64,
    /// Per-category rank ceilings, keyed lowercase.
    pub rank_ceilings: HashMap<String, i64>,
    /// Lowercase brand names; non-empty means membership is required.
    pub brand_whitelist: Vec<String>,
    /// Lowercase brand names; always takes precedence over the whitelist.
    pub brand_blacklist: Vec<String>,
    pub max_weight_g: Option<f64>,
    pub max_volume: Option<f64>,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            default_rank_ceiling: DEFAULT_MAX_RANK,
            rank_ceilings: config::CATEGORY_RANK_CEILINGS
                .iter()
                .map(|(name, ceiling)| (name.to_string(), *ceiling))
                .collect(),
            brand_whitelist: Vec::new(),
            brand_blacklist: BRAND_BLACKLIST.iter().map(|b| b.to_string()).collect(),
            max_weight_g: None,
            max_volume: None,
        }
    }
}

impl FilterConfig {
    pub fn rank_ceiling(&self, category: Option<&str>) -> i64 {
        category
            .and_then(|c| self.rank_ceilings.get(&c.to_lowercase()).copied())
            .unwrap_or(self.default_rank_ceiling)
    }
}

// ---------------------------------------------------------------------------
// The chain
// ---------------------------------------------------------------------------

/// Ordered short-circuit predicate chain. The first failing predicate decides
/// the rejection; later predicates are never evaluated.
///
/// Order: identifier -> hazmat -> rank ceiling -> brand gate -> price
/// availability -> physical limits.
pub fn evaluate(record: &RawProductRecord, cfg: &FilterConfig) -> FilterDecision {
    if record.product_key().is_none() {
        return FilterDecision::Reject(FilterReason::MissingIdentifier);
    }

    if record.hazmat {
        return FilterDecision::Reject(FilterReason::Hazmat);
    }

    // Popularity proxy: lower is better, and the boundary value is accepted.
    let rank = record.sales_rank.unwrap_or(MISSING_RANK);
    if rank > cfg.rank_ceiling(record.category.as_deref()) {
        return FilterDecision::Reject(FilterReason::RankExceeded);
    }

    if let Some(reason) = brand_gate(record.brand.as_deref(), cfg) {
        return FilterDecision::Reject(reason);
    }

    match record.buy_box_price {
        Some(price) if price > 0.0 => {}
        _ => return FilterDecision::Reject(FilterReason::MissingPrice),
    }

    if let (Some(limit), Some(weight)) = (cfg.max_weight_g, record.package_weight_g) {
        if weight > limit {
            return FilterDecision::Reject(FilterReason::Overweight);
        }
    }
    if let (Some(limit), Some(volume)) = (cfg.max_volume, record.package_volume) {
        if volume > limit {
            return FilterDecision::Reject(FilterReason::Oversize);
        }
    }

    FilterDecision::Pass
}

/// Blacklist beats whitelist; a missing brand only fails when a whitelist is
/// configured (it cannot prove membership).
fn brand_gate(brand: Option<&str>, cfg: &FilterConfig) -> Option<FilterReason> {
    let brand = brand.map(|b| b.to_lowercase());

    if let Some(ref b) = brand {
        if cfg.brand_blacklist.iter().any(|x| x == b) {
            return Some(FilterReason::BrandBlacklisted);
        }
    }

    if !cfg.brand_whitelist.is_empty() {
        match brand {
            Some(ref b) if cfg.brand_whitelist.iter().any(|x| x == b) => {}
            _ => return Some(FilterReason::BrandNotWhitelisted),
        }
    }

    None
}
