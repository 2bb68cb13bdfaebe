use thiserror::Error;

#[derive(Error, Debug, Clone, Copy, PartialEq)]
pub enum MathError {
    #[error("Amount must not be negative: {0}")]
    NegativeAmount(f64),

    #[error("Amount is not a finite number")]
    NonFinite,

    #[error("Arithmetic overflow")]
    ArithmeticOverflow,

    #[error("Unsupported decimal count: {0}")]
    UnsupportedDecimals(u32),
}
