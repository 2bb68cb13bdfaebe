//! Borrow and stake form rules. Validation never panics: every problem is
//! returned as a [`FormIssue`] and the submit button text is derived from
//! the issues.

use collateral_math::{
    borrow_amount_from_ltv, debt_limit, ltv_from_borrow_amount, LtvRisk, MAX_LIMIT, MIN_BORROW_USD,
};
use ethereum_types::U256;
use serde::{Deserialize, Serialize};

use crate::felt::Felt;
use crate::transaction_composer::{BorrowRequest, StakeRequest};

pub const FIXED_RATE_PERCENT: f64 = 5.0;
pub const VARIABLE_RATE_PERCENT: f64 = 4.5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RateMode {
    #[default]
    Fixed,
    Variable,
    Managed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum FormField {
    CollateralAmount,
    BorrowAmount,
    StakeAmount,
    InterestRate,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "issue", rename_all = "camelCase")]
pub enum FormIssue {
    NotPositive { field: FormField },
    AboveMaxLimit { field: FormField },
    InsufficientBalance,
    BalanceUnavailable { field: FormField },
    CollateralRequired,
    BelowMinimumBorrow,
    ExceedsDebtLimit { debt_limit: f64 },
    StakeExceedsBalance,
    InvalidInterestRate,
}

impl FormIssue {
    pub fn field(&self) -> FormField {
        match self {
            FormIssue::NotPositive { field }
            | FormIssue::AboveMaxLimit { field }
            | FormIssue::BalanceUnavailable { field } => *field,
            FormIssue::InsufficientBalance => FormField::CollateralAmount,
            FormIssue::CollateralRequired
            | FormIssue::BelowMinimumBorrow
            | FormIssue::ExceedsDebtLimit { .. } => FormField::BorrowAmount,
            FormIssue::StakeExceedsBalance => FormField::StakeAmount,
            FormIssue::InvalidInterestRate => FormField::InterestRate,
        }
    }

    pub fn message(&self) -> String {
        match self {
            FormIssue::NotPositive { field: FormField::StakeAmount } => {
                "Stake amount must be greater than 0.".to_string()
            }
            FormIssue::NotPositive { .. } => "Amount must be greater than 0.".to_string(),
            FormIssue::AboveMaxLimit { .. } => format!("Amount must be less than {}.", MAX_LIMIT),
            FormIssue::InsufficientBalance => "Insufficient balance.".to_string(),
            FormIssue::BalanceUnavailable { .. } => {
                "Could not load your wallet balance. Try again shortly.".to_string()
            }
            FormIssue::CollateralRequired => {
                "Please enter a valid collateral amount before specifying a borrow amount.".to_string()
            }
            FormIssue::BelowMinimumBorrow => format!("Minimum borrow amount is ${}.", MIN_BORROW_USD),
            FormIssue::ExceedsDebtLimit { .. } => "Not enough collateral to borrow this amount.".to_string(),
            FormIssue::StakeExceedsBalance => "Stake amount cannot exceed your balance.".to_string(),
            FormIssue::InvalidInterestRate => "Enter a valid interest rate.".to_string(),
        }
    }
}

fn check_amount(amount: f64, field: FormField, issues: &mut Vec<FormIssue>) -> bool {
    if !(amount.is_finite() && amount > 0.0) {
        issues.push(FormIssue::NotPositive { field });
        return false;
    }
    if amount >= MAX_LIMIT {
        issues.push(FormIssue::AboveMaxLimit { field });
        return false;
    }
    true
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BorrowForm {
    pub collateral_amount: Option<f64>,
    pub borrow_amount: Option<f64>,
    #[serde(default)]
    pub rate_mode: RateMode,
    /// Used with [`RateMode::Managed`]
    #[serde(default)]
    pub managed_rate_percent: Option<f64>,
}

impl BorrowForm {
    /// Check the form against the wallet's TBTC balance and the BTC price.
    /// An empty list means the form can be submitted.
    pub fn validate(&self, collateral_balance: Option<f64>, btc_price: f64) -> Vec<FormIssue> {
        let mut issues = Vec::new();

        let collateral = match self.collateral_amount {
            Some(c) if check_amount(c, FormField::CollateralAmount, &mut issues) => {
                if collateral_balance.map_or(false, |balance| c > balance) {
                    issues.push(FormIssue::InsufficientBalance);
                }
                Some(c)
            }
            Some(_) => None,
            None => {
                issues.push(FormIssue::NotPositive {
                    field: FormField::CollateralAmount,
                });
                None
            }
        };

        match (self.borrow_amount, collateral) {
            (Some(b), _) if !check_amount(b, FormField::BorrowAmount, &mut issues) => {}
            (Some(_), None) => issues.push(FormIssue::CollateralRequired),
            (Some(b), Some(c)) => {
                if b < MIN_BORROW_USD {
                    issues.push(FormIssue::BelowMinimumBorrow);
                }
                let limit = debt_limit(c, btc_price);
                if b > limit {
                    issues.push(FormIssue::ExceedsDebtLimit { debt_limit: limit });
                }
            }
            (None, _) => issues.push(FormIssue::NotPositive {
                field: FormField::BorrowAmount,
            }),
        }

        if self.annual_interest_rate_percent().is_none() {
            issues.push(FormIssue::InvalidInterestRate);
        }

        issues
    }

    pub fn annual_interest_rate_percent(&self) -> Option<f64> {
        match self.rate_mode {
            RateMode::Fixed => Some(FIXED_RATE_PERCENT),
            RateMode::Variable => Some(VARIABLE_RATE_PERCENT),
            RateMode::Managed => self
                .managed_rate_percent
                .filter(|rate| rate.is_finite() && *rate > 0.0 && *rate <= 100.0),
        }
    }

    /// Current LTV in percent, clipped to the maximum
    pub fn ltv_percent(&self, btc_price: f64) -> f64 {
        match (self.borrow_amount, self.collateral_amount) {
            (Some(b), Some(c)) => ltv_from_borrow_amount(b, c, btc_price),
            _ => 0.0,
        }
    }

    pub fn ltv_risk(&self, btc_price: f64) -> LtvRisk {
        LtvRisk::from_percent(self.ltv_percent(btc_price))
    }

    /// Set the borrow amount from an LTV slider position
    pub fn set_ltv(&mut self, ltv_percent: f64, btc_price: f64) {
        if let Some(c) = self.collateral_amount {
            self.borrow_amount = Some(borrow_amount_from_ltv(ltv_percent, c, btc_price));
        }
    }

    /// Composer input for a valid form; `None` while any issue remains
    pub fn to_request(
        &self,
        owner: Option<Felt>,
        owner_index: Option<U256>,
        collateral_balance: Option<f64>,
        btc_price: f64,
    ) -> Option<BorrowRequest> {
        if !self.validate(collateral_balance, btc_price).is_empty() {
            return None;
        }
        Some(BorrowRequest {
            owner,
            owner_index,
            collateral_amount: self.collateral_amount,
            borrow_amount: self.borrow_amount,
            annual_interest_rate_percent: self.annual_interest_rate_percent()?,
        })
    }
}

pub fn borrow_button_text(issues: &[FormIssue]) -> &'static str {
    if issues.is_empty() {
        return "Borrow";
    }
    let has = |wanted: fn(&FormIssue) -> bool| issues.iter().any(wanted);

    if has(|i| matches!(i, FormIssue::InsufficientBalance)) {
        "Insufficient balance"
    } else if has(|i| matches!(i, FormIssue::BalanceUnavailable { .. })) {
        "Balance unavailable"
    } else if has(|i| matches!(i, FormIssue::ExceedsDebtLimit { .. })) {
        "Not enough collateral"
    } else if has(|i| matches!(i, FormIssue::BelowMinimumBorrow)) {
        "Minimum $100 borrow"
    } else if has(|i| matches!(i, FormIssue::CollateralRequired)) {
        "Enter collateral first"
    } else {
        "Check inputs"
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StakeForm {
    pub amount: Option<f64>,
}

impl StakeForm {
    pub fn validate(&self, bitusd_balance: Option<f64>) -> Vec<FormIssue> {
        let mut issues = Vec::new();
        let amount = self.amount.unwrap_or(0.0);
        if check_amount(amount, FormField::StakeAmount, &mut issues)
            && bitusd_balance.map_or(false, |balance| amount > balance)
        {
            issues.push(FormIssue::StakeExceedsBalance);
        }
        issues
    }

    pub fn to_request(&self, owner: Option<Felt>, bitusd_balance: Option<f64>) -> Option<StakeRequest> {
        self.validate(bitusd_balance).is_empty().then(|| StakeRequest {
            owner,
            amount: self.amount,
        })
    }
}

pub fn stake_button_text(issues: &[FormIssue]) -> &'static str {
    if issues.is_empty() {
        "Stake bitUSD"
    } else {
        "Check Input"
    }
}
