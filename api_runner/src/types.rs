//! Shared types for calls, receipts and positions

use collateral_math::HealthBand;
use serde::{Deserialize, Deserializer, Serialize};

use crate::felt::{felt_to_hex, Felt};

/// One contract invocation: target, entry point and serialized arguments
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Call {
    pub to: Felt,
    pub entry_point: &'static str,
    pub selector: Felt,
    pub calldata: Vec<Felt>,
}

impl Call {
    pub fn new(to: Felt, entry_point: &'static str, calldata: Vec<Felt>) -> Self {
        Self {
            to,
            entry_point,
            selector: crate::felt::selector(entry_point),
            calldata,
        }
    }

    /// JSON shape of a `FUNCTION_CALL` request object
    pub fn to_rpc_request(&self) -> serde_json::Value {
        serde_json::json!({
            "contract_address": felt_to_hex(&self.to),
            "entry_point_selector": felt_to_hex(&self.selector),
            "calldata": self.calldata.iter().map(felt_to_hex).collect::<Vec<_>>(),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionStatus {
    Succeeded,
    Reverted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FinalityStatus {
    Received,
    Rejected,
    AcceptedOnL2,
    AcceptedOnL1,
}

/// The subset of a transaction receipt the client acts on
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionReceipt {
    pub transaction_hash: String,
    pub execution_status: ExecutionStatus,
    pub finality_status: FinalityStatus,
    #[serde(default)]
    pub revert_reason: Option<String>,
    #[serde(default)]
    pub block_number: Option<u64>,
}

impl TransactionReceipt {
    pub fn is_success(&self) -> bool {
        self.execution_status == ExecutionStatus::Succeeded
            && self.finality_status != FinalityStatus::Rejected
    }
}

/// A trove as shown to the user
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Position {
    pub id: String,
    pub collateral_asset: String,
    pub collateral_amount: f64,
    pub collateral_value: f64,
    pub borrowed_asset: String,
    pub borrowed_amount: f64,
    /// Infinite when nothing is borrowed; JSON carries that as `null`
    #[serde(deserialize_with = "null_as_infinity")]
    pub health_factor: f64,
    pub health_status: HealthBand,
    pub liquidation_price: f64,
    pub debt_limit: f64,
    pub interest_rate: f64,
}

fn null_as_infinity<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<f64>::deserialize(deserializer)?.unwrap_or(f64::INFINITY))
}

impl Position {
    pub fn amount_borrowable(&self) -> f64 {
        collateral_math::amount_borrowable(self.debt_limit, self.borrowed_amount)
    }
}

/// Aggregates across all of an owner's positions
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PositionTotals {
    pub borrowed_amount: f64,
    pub collateral_value: f64,
    pub amount_borrowable: f64,
    pub weighted_average_interest: f64,
}

impl PositionTotals {
    pub fn from_positions(positions: &[Position]) -> Self {
        let mut totals = PositionTotals::default();
        let mut weighted_interest = 0.0;

        for p in positions {
            totals.borrowed_amount += p.borrowed_amount;
            totals.collateral_value += p.collateral_value;
            totals.amount_borrowable += p.amount_borrowable();
            weighted_interest += p.borrowed_amount * p.interest_rate;
        }

        if totals.borrowed_amount > 0.0 {
            totals.weighted_average_interest = weighted_interest / totals.borrowed_amount;
        }
        totals
    }
}
