use crate::config::{fee_defaults, risk_penalties};
use crate::types::RawProductRecord;

/// Marketplace fees on the target-side sale: referral percentage of the sale
/// price plus a fixed fulfillment fee. Falls back to stock rates when the
/// record carries no explicit figures.
pub fn estimate_fees(
    target_price: f64,
    referral_rate: Option<f64>,
    fulfillment_fee: Option<f64>,
) -> f64 {
    let rate = referral_rate.unwrap_or(fee_defaults::REFERRAL_RATE);
    let fixed = fulfillment_fee.unwrap_or(fee_defaults::FULFILLMENT_FEE);
    rate * target_price + fixed
}

/// Cross-market shipping estimate: base cost plus a per-kilogram component.
/// A record without a package weight pays the base cost only.
pub fn estimate_shipping(weight_g: Option<f64>) -> f64 {
    let weight_cost = weight_g
        .map(|w| (w / 1000.0) * fee_defaults::SHIPPING_PER_KG)
        .unwrap_or(0.0);
    fee_defaults::SHIPPING_BASE + weight_cost
}

/// Listing-identity mismatches between the source and target records.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RiskSignals {
    pub upc_mismatch: bool,
    pub title_mismatch: bool,
    pub variation_mismatch: bool,
    pub hazmat: bool,
}

impl RiskSignals {
    pub fn between(source: &RawProductRecord, target: &RawProductRecord) -> Self {
        Self {
            upc_mismatch: source.upc != target.upc,
            title_mismatch: source.title != target.title,
            variation_mismatch: source.variation_hash != target.variation_hash,
            hazmat: source.hazmat || target.hazmat,
        }
    }
}

/// Composes the penalty factors multiplicatively from 1.0. Order-independent;
/// the result is always in (0, 1] and non-increasing as signals are added.
pub fn risk_multiplier(signals: RiskSignals) -> f64 {
    let mut risk = 1.0;
    if signals.upc_mismatch {
        risk *= risk_penalties::UPC_MISMATCH;
    }
    if signals.title_mismatch {
        risk *= risk_penalties::TITLE_MISMATCH;
    }
    if signals.variation_mismatch {
        risk *= risk_penalties::VARIATION_MISMATCH;
    }
    if signals.hazmat {
        risk *= risk_penalties::HAZMAT;
    }
    risk
}

/// Risk-adjusted cross-market margin. Negative results are valid - a loss is
/// still a data point and is persisted, never silently discarded.
pub fn opportunity_score(
    source_price: f64,
    target_price: f64,
    fees: f64,
    shipping: f64,
    risk: f64,
) -> f64 {
    (target_price - source_price - fees - shipping) * risk
}

#[derive(Debug, Clone, Copy)]
pub struct ProfitBreakdown {
    pub fees: f64,
    pub shipping: f64,
    pub risk_multiplier: f64,
    pub score: f64,
}

/// Full profit computation for a source/target record pair. Fee inputs come
/// from the target (where the sale happens), weight from the source (what
/// ships). Callers run the filter chain first, so both prices are present;
/// an absent price degrades to 0 rather than panicking.
pub fn assess_profit(source: &RawProductRecord, target: &RawProductRecord) -> ProfitBreakdown {
    let source_price = source.buy_box_price.unwrap_or(0.0);
    let target_price = target.buy_box_price.unwrap_or(0.0);

    let fees = estimate_fees(target_price, target.referral_fee_rate, target.fulfillment_fee);
    let shipping = estimate_shipping(source.package_weight_g);
    let risk = risk_multiplier(RiskSignals::between(source, target));

    ProfitBreakdown {
        fees,
        shipping,
        risk_multiplier: risk,
        score: opportunity_score(source_price, target_price, fees, shipping, risk),
    }
}
