// Collateralization math for bitUSD troves
// Pure functions only - no I/O, no async

pub mod calc;
pub mod constants;
pub mod error;
pub mod metrics;
pub mod units;

pub use calc::{
    amount_borrowable, borrow_amount_from_ltv, collateral_value, debt_limit, health_factor,
    liquidation_price, ltv_from_borrow_amount,
};
pub use constants::*;
pub use error::MathError;
pub use metrics::{HealthBand, LtvRisk, Prices, TroveMetrics};
