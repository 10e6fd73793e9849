//! Pure scoring engine: given identical inputs every function returns
//! identical outputs. No I/O, no clock reads - calendar-dependent inputs are
//! passed in by the caller.

mod profit;
mod signals;

pub use profit::{
    assess_profit, estimate_fees, estimate_shipping, opportunity_score, risk_multiplier,
    ProfitBreakdown, RiskSignals,
};
pub use signals::{
    amazon_buy_box_share, amazon_holds_buy_box, competition_moat, price_crash_risk, sales_velocity,
    CrashLevel, CrashRisk, MoatLevel, MoatScore,
};
