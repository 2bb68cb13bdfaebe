//! HTTP handlers

use axum::{
    extract::{Path, Query, State},
    Json,
};
use collateral_math::{units, LtvRisk, BITUSD_DECIMALS, TBTC_DECIMALS};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{info, warn};

use crate::contracts::{ContractError, Erc20};
use crate::error::{AppError, Result};
use crate::deposit_reader::StakeView;
use crate::felt::{self, felt_to_hex, felt_to_u128, Felt};
use crate::form::{borrow_button_text, stake_button_text, BorrowForm, FormField, FormIssue, StakeForm};
use crate::position_reader::{sort_positions, PositionsView, SortDirection, SortKey};
use crate::query_cache::QueryKey;
use crate::types::Call;
use crate::AppState;

/// Health check endpoint
pub async fn health_check(State(state): State<AppState>) -> Json<Value> {
    let node = match state.provider.chain_id().await {
        Ok(chain_id) => json!({ "status": "ok", "chain_id": chain_id }),
        Err(e) => {
            warn!(error = %e, "Node health check failed");
            json!({ "status": "unreachable", "error": e.to_string() })
        }
    };
    let cache = state.cache.stats().await;

    Json(json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().timestamp(),
        "version": env!("CARGO_PKG_VERSION"),
        "node": node,
        "cache": cache,
    }))
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PriceResponse {
    pub price: f64,
}

pub async fn bitcoin_price(State(state): State<AppState>) -> Result<Json<PriceResponse>> {
    let price = state
        .prices
        .bitcoin_price()
        .await
        .map_err(|e| AppError::PriceUnavailable(e.to_string()))?;
    Ok(Json(PriceResponse { price }))
}

pub async fn bitusd_price(State(state): State<AppState>) -> Result<Json<PriceResponse>> {
    let price = state
        .prices
        .bitusd_price()
        .await
        .map_err(|e| AppError::PriceUnavailable(e.to_string()))?;
    Ok(Json(PriceResponse { price }))
}

fn parse_address(address: &str) -> Result<Felt> {
    let parsed = felt::parse_address(address).map_err(|_| AppError::InvalidAddress {
        address: address.to_string(),
    })?;
    if parsed.is_zero() {
        return Err(AppError::InvalidAddress {
            address: address.to_string(),
        });
    }
    Ok(parsed)
}

#[derive(Debug, Default, Deserialize)]
pub struct PositionsQuery {
    pub sort: Option<SortKey>,
    #[serde(default)]
    pub direction: SortDirection,
}

pub async fn user_positions(
    State(state): State<AppState>,
    Path(address): Path<String>,
    Query(query): Query<PositionsQuery>,
) -> Result<Json<PositionsView>> {
    let owner = parse_address(&address)?;

    let mut view = state
        .positions
        .positions_view(owner)
        .await
        .map_err(|e| AppError::ExternalServiceError {
            service: "starknet".to_string(),
            error: format!("Failed to fetch on-chain positions: {}", e),
        })?;

    if let Some(key) = query.sort {
        sort_positions(&mut view.positions, key, query.direction);
    }

    info!(owner = %felt_to_hex(&owner), count = view.positions.len(), "Served positions");
    Ok(Json(view))
}

/// Wallet balance of `token`, or `None` when it could not be read
async fn token_balance(state: &AppState, token: Felt, owner: Felt, decimals: u32) -> Option<f64> {
    let chain_id = match state.chain_id().await {
        Ok(chain_id) => chain_id,
        Err(e) => {
            warn!(owner = %felt_to_hex(&owner), error = %e, "Chain id unavailable, skipping balance lookup");
            return None;
        }
    };
    let key = QueryKey::token_balance(&chain_id, token, owner);
    let result = state
        .cache
        .get_or_fetch(key, None, || async {
            let raw = Erc20::new(token).balance_of(state.provider.as_ref(), owner).await?;
            let raw = felt_to_u128(raw).map_err(|source| ContractError::Decode {
                entry_point: "balance_of",
                source,
            })?;
            Ok::<_, ContractError>(units::to_display(raw, decimals))
        })
        .await;

    match result {
        Ok(balance) => Some(balance),
        Err(e) => {
            warn!(owner = %felt_to_hex(&owner), error = %e, "Balance lookup failed");
            None
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BorrowPreviewRequest {
    pub owner: String,
    #[serde(flatten)]
    pub form: BorrowForm,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CallView {
    pub contract_address: String,
    pub entrypoint: &'static str,
    pub calldata: Vec<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionPreview {
    pub ready: bool,
    pub button_text: &'static str,
    pub issues: Vec<IssueView>,
    pub calls: Vec<CallView>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ltv_percent: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ltv_risk: Option<LtvRisk>,
}

#[derive(Debug, Serialize)]
pub struct IssueView {
    #[serde(flatten)]
    pub issue: FormIssue,
    pub message: String,
}

fn issue_views(issues: &[FormIssue]) -> Vec<IssueView> {
    issues
        .iter()
        .map(|issue| IssueView {
            issue: *issue,
            message: issue.message(),
        })
        .collect()
}

fn call_views(calls: Option<Vec<Call>>) -> Vec<CallView> {
    calls
        .unwrap_or_default()
        .into_iter()
        .map(|call| CallView {
            contract_address: felt_to_hex(&call.to),
            entrypoint: call.entry_point,
            calldata: call.calldata.iter().map(felt_to_hex).collect(),
        })
        .collect()
}

/// Validate a borrow form and return the calls a wallet would sign
pub async fn borrow_preview(
    State(state): State<AppState>,
    Json(request): Json<BorrowPreviewRequest>,
) -> Result<Json<TransactionPreview>> {
    let owner = parse_address(&request.owner)?;
    let btc_price = state
        .prices
        .bitcoin_price()
        .await
        .map_err(|e| AppError::PriceUnavailable(e.to_string()))?;

    let (balance, owner_index) = tokio::join!(
        token_balance(&state, state.contracts.tbtc, owner, TBTC_DECIMALS),
        state.positions.owner_index(owner),
    );

    let mut issues = request.form.validate(balance, btc_price);
    if balance.is_none() {
        issues.push(FormIssue::BalanceUnavailable {
            field: FormField::CollateralAmount,
        });
    }
    let calls = balance
        .and_then(|b| request.form.to_request(Some(owner), Some(owner_index), Some(b), btc_price))
        .and_then(|r| state.composer.borrow(&r));

    Ok(Json(TransactionPreview {
        ready: calls.is_some(),
        button_text: borrow_button_text(&issues),
        issues: issue_views(&issues),
        calls: call_views(calls),
        ltv_percent: Some(request.form.ltv_percent(btc_price)),
        ltv_risk: Some(request.form.ltv_risk(btc_price)),
    }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StakePreviewRequest {
    pub owner: String,
    #[serde(flatten)]
    pub form: StakeForm,
}

/// Validate a stake form and return the calls a wallet would sign
pub async fn stake_preview(
    State(state): State<AppState>,
    Json(request): Json<StakePreviewRequest>,
) -> Result<Json<TransactionPreview>> {
    let owner = parse_address(&request.owner)?;
    let balance = token_balance(&state, state.contracts.bitusd, owner, BITUSD_DECIMALS).await;

    let mut issues = request.form.validate(balance);
    if balance.is_none() {
        issues.push(FormIssue::BalanceUnavailable {
            field: FormField::StakeAmount,
        });
    }
    let calls = balance
        .and_then(|b| request.form.to_request(Some(owner), Some(b)))
        .and_then(|r| state.composer.stake(&r));

    Ok(Json(TransactionPreview {
        ready: calls.is_some(),
        button_text: stake_button_text(&issues),
        issues: issue_views(&issues),
        calls: call_views(calls),
        ltv_percent: None,
        ltv_risk: None,
    }))
}

/// Stability pool deposit, claimable rewards and pool share of an address
pub async fn stake_position(
    State(state): State<AppState>,
    Path(address): Path<String>,
) -> Result<Json<StakeView>> {
    let owner = parse_address(&address)?;
    let deposits = state
        .deposits
        .as_ref()
        .ok_or_else(|| AppError::NotFound("No stability pool is configured".to_string()))?;

    let view = deposits
        .stake_view(owner)
        .await
        .map_err(|e| AppError::ExternalServiceError {
            service: "starknet".to_string(),
            error: format!("Failed to read stability pool deposit: {}", e),
        })?;
    Ok(Json(view))
}
