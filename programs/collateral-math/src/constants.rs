/// Minimum collateral ratio (110%). A trove below this is liquidatable.
pub const MCR: f64 = 1.1;

/// Critical collateral ratio (150%) used for the user-facing debt ceiling.
pub const CCR: f64 = 1.5;

/// Maximum loan-to-value a borrower may select (80%).
pub const MAX_LTV: f64 = 0.8;

/// Smallest debt a new trove may open with, in USD.
pub const MIN_BORROW_USD: f64 = 100.0;

/// Upper bound accepted for any amount typed into a form.
pub const MAX_LIMIT: f64 = 1_000_000_000_000.0;

/// TBTC and bitUSD both use 18 decimals
pub const TOKEN_DECIMALS: u32 = 18;
pub const TBTC_DECIMALS: u32 = TOKEN_DECIMALS;
pub const BITUSD_DECIMALS: u32 = TOKEN_DECIMALS;

/// Annual interest rates are stored on-chain as `percent * 10^16`
pub const INTEREST_RATE_SCALE: u128 = 10_000_000_000_000_000;
