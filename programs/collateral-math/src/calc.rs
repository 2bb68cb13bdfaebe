//! Collateralization formulas.
//!
//! Every function takes display units (whole tokens, USD prices) and is
//! total over non-negative inputs: zero denominators are guarded rather
//! than reported as errors.

use crate::constants::{CCR, MAX_LTV, MCR};

/// Largest LTV a borrower may select, as a percentage.
pub const MAX_LTV_PERCENT: f64 = MAX_LTV * 100.0;

/// USD value of `collateral` BTC.
pub fn collateral_value(collateral: f64, btc_price: f64) -> f64 {
    collateral * btc_price
}

/// Debt ceiling shown to the user: collateral value over the critical ratio.
pub fn debt_limit(collateral: f64, btc_price: f64) -> f64 {
    collateral_value(collateral, btc_price) / CCR
}

/// BTC price at which the trove reaches the minimum collateral ratio.
///
/// Returns 0 for an empty trove.
pub fn liquidation_price(collateral: f64, debt: f64, stable_price: f64) -> f64 {
    if collateral <= 0.0 {
        return 0.0;
    }
    debt * MCR * stable_price / collateral
}

/// Collateral value relative to the debt at the minimum collateral ratio.
///
/// Values below 1.0 mean the trove can be liquidated. A trove without debt
/// is infinitely healthy.
pub fn health_factor(collateral: f64, debt: f64, btc_price: f64) -> f64 {
    if debt <= 0.0 {
        return f64::INFINITY;
    }
    collateral_value(collateral, btc_price) / (debt * MCR)
}

/// LTV percentage implied by borrowing `borrow` bitUSD against `collateral` BTC.
///
/// Clipped to [`MAX_LTV_PERCENT`]; 0 when there is no collateral value.
pub fn ltv_from_borrow_amount(borrow: f64, collateral: f64, btc_price: f64) -> f64 {
    let value = collateral_value(collateral, btc_price);
    if value <= 0.0 || borrow <= 0.0 {
        return 0.0;
    }
    (borrow / value * 100.0).min(MAX_LTV_PERCENT)
}

/// bitUSD amount that puts the trove at `ltv_percent`.
pub fn borrow_amount_from_ltv(ltv_percent: f64, collateral: f64, btc_price: f64) -> f64 {
    let ltv = ltv_percent.clamp(0.0, MAX_LTV_PERCENT);
    ltv / 100.0 * collateral_value(collateral, btc_price)
}

/// Headroom left under the debt limit, never negative.
pub fn amount_borrowable(debt_limit: f64, borrowed: f64) -> f64 {
    (debt_limit - borrowed).max(0.0)
}
