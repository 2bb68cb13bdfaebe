//! Conversions between on-chain fixed-point integers and display amounts.

use crate::constants::INTEREST_RATE_SCALE;
use crate::error::MathError;

/// u128 holds at most 38 decimal digits
const MAX_DECIMALS: u32 = 38;

fn scale(decimals: u32) -> Result<f64, MathError> {
    if decimals > MAX_DECIMALS {
        return Err(MathError::UnsupportedDecimals(decimals));
    }
    Ok(10f64.powi(decimals as i32))
}

/// Raw token units to a display amount. Precision loss beyond f64 is accepted.
pub fn to_display(raw: u128, decimals: u32) -> f64 {
    if decimals == 0 {
        return raw as f64;
    }
    raw as f64 / 10f64.powi(decimals.min(MAX_DECIMALS) as i32)
}

/// Display amount to raw token units, rounding down.
pub fn from_display(amount: f64, decimals: u32) -> Result<u128, MathError> {
    if !amount.is_finite() {
        return Err(MathError::NonFinite);
    }
    if amount < 0.0 {
        return Err(MathError::NegativeAmount(amount));
    }
    let scaled = (amount * scale(decimals)?).floor();
    if scaled >= u128::MAX as f64 {
        return Err(MathError::ArithmeticOverflow);
    }
    Ok(scaled as u128)
}

/// On-chain annual rate to a percentage (5% is stored as `5 * 10^16`).
pub fn interest_rate_percent(raw: u128) -> f64 {
    raw as f64 / INTEREST_RATE_SCALE as f64
}

/// Percentage to the on-chain annual rate encoding.
pub fn interest_rate_raw(percent: f64) -> Result<u128, MathError> {
    if !percent.is_finite() {
        return Err(MathError::NonFinite);
    }
    if percent < 0.0 {
        return Err(MathError::NegativeAmount(percent));
    }
    let scaled = (percent * INTEREST_RATE_SCALE as f64).round();
    if scaled >= u128::MAX as f64 {
        return Err(MathError::ArithmeticOverflow);
    }
    Ok(scaled as u128)
}
