//! Builds the approve-then-act call lists for borrowing and staking,
//! submits them through a wallet, and follows the receipt until the
//! affected queries can be invalidated.
//!
//! Builders never fail: when an input is missing or out of range they
//! return `None`, meaning the transaction is not ready to send.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use collateral_math::{units, BITUSD_DECIMALS, TBTC_DECIMALS};
use ethereum_types::U256;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::time::{sleep, Instant};
use tracing::{debug, error, info, warn};

use crate::contracts::{BorrowerOperations, ContractAddresses, Erc20, OpenTroveParams, StabilityPool};
use crate::felt::{felt_to_hex, Felt};
use crate::query_cache::{QueryCache, QueryKey};
use crate::rpc_client::{RpcError, StarknetProvider};
use crate::types::{Call, FinalityStatus, TransactionReceipt};

/// 1 test BTC in raw units
const TEST_BTC_MINT_AMOUNT: u128 = 1_000_000_000_000_000_000;

/// The connected account that signs and sends calls
#[async_trait]
pub trait WalletAccount: Send + Sync {
    fn address(&self) -> Felt;

    fn chain_id(&self) -> String;

    /// Sign and broadcast `calls` as one multicall; returns the transaction hash
    async fn execute(&self, calls: Vec<Call>) -> Result<String, TransactionError>;
}

#[derive(Error, Debug)]
pub enum TransactionError {
    #[error("Wallet error: {0}")]
    Wallet(String),

    #[error("Transaction {hash} reverted: {reason}")]
    Reverted { hash: String, reason: String },

    #[error("Transaction {hash} was not accepted by the sequencer")]
    Rejected { hash: String },

    #[error("No receipt for {hash} after {waited:?}")]
    Timeout { hash: String, waited: Duration },

    #[error(transparent)]
    Rpc(#[from] RpcError),
}

impl TransactionError {
    pub fn notice(&self) -> TransactionNotice {
        TransactionNotice::from_message(&self.to_string())
    }
}

/// Whether a failure came from the user backing out or from the chain
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FailureKind {
    Cancelled,
    Failed,
}

const CANCELLATION_MARKERS: [&str; 4] = ["reject", "cancel", "denied", "abort"];

pub fn classify_failure(message: &str) -> FailureKind {
    let lower = message.to_lowercase();
    if CANCELLATION_MARKERS.iter().any(|m| lower.contains(m)) {
        FailureKind::Cancelled
    } else {
        FailureKind::Failed
    }
}

/// What to show the user after a failed transaction
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TransactionNotice {
    pub kind: FailureKind,
    pub title: &'static str,
    pub message: String,
    pub dismissible: bool,
}

impl TransactionNotice {
    pub fn from_message(message: &str) -> Self {
        match classify_failure(message) {
            FailureKind::Cancelled => Self {
                kind: FailureKind::Cancelled,
                title: "Transaction cancelled",
                message: "The transaction was cancelled in the wallet.".to_string(),
                dismissible: true,
            },
            FailureKind::Failed => Self {
                kind: FailureKind::Failed,
                title: "Transaction failed",
                message: message.to_string(),
                dismissible: false,
            },
        }
    }
}

/// Which user action a transaction performs; decides what gets invalidated
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionKind {
    Borrow,
    Stake,
    MintTestBtc,
    AdjustTrove,
    StabilityPoolExit,
}

impl TransactionKind {
    /// Cached queries made stale by a successful transaction of this kind
    pub fn invalidation_targets(
        &self,
        owner: Felt,
        chain_id: &str,
        contracts: &ContractAddresses,
    ) -> Vec<QueryKey> {
        let tbtc_balance = QueryKey::token_balance(chain_id, contracts.tbtc, owner);
        let bitusd_balance = QueryKey::token_balance(chain_id, contracts.bitusd, owner);
        let owner_positions = QueryKey::owner_positions(owner, contracts.trove_manager);
        let user_positions = QueryKey::user_positions(owner);

        let pool_keys = || -> Vec<QueryKey> {
            contracts
                .stability_pool
                .map(|pool| {
                    vec![
                        QueryKey::staked_amount(owner, pool),
                        QueryKey::claimable_rewards(owner, pool),
                    ]
                })
                .unwrap_or_default()
        };

        match self {
            TransactionKind::Borrow => vec![owner_positions, tbtc_balance, user_positions],
            TransactionKind::Stake => {
                let mut keys = vec![bitusd_balance];
                keys.extend(pool_keys());
                keys
            }
            TransactionKind::MintTestBtc => vec![tbtc_balance],
            TransactionKind::AdjustTrove => {
                vec![owner_positions, user_positions, tbtc_balance, bitusd_balance]
            }
            TransactionKind::StabilityPoolExit => {
                let mut keys = vec![bitusd_balance, tbtc_balance];
                keys.extend(pool_keys());
                keys
            }
        }
    }
}

/// Inputs to open a trove
#[derive(Debug, Clone, Default)]
pub struct BorrowRequest {
    pub owner: Option<Felt>,
    /// Count of the owner's existing troves; `None` until loaded
    pub owner_index: Option<U256>,
    pub collateral_amount: Option<f64>,
    pub borrow_amount: Option<f64>,
    pub annual_interest_rate_percent: f64,
}

/// Inputs to deposit bitUSD into the stability pool
#[derive(Debug, Clone, Default)]
pub struct StakeRequest {
    pub owner: Option<Felt>,
    pub amount: Option<f64>,
}

/// Signed changes to an open trove: positive adds, negative removes
#[derive(Debug, Clone, Default)]
pub struct AdjustTroveRequest {
    pub owner: Option<Felt>,
    pub trove_id: U256,
    pub collateral_change: Option<f64>,
    pub debt_change: Option<f64>,
}

/// Raw magnitude and direction of a signed change. Zero or absent is no change.
fn signed_raw(change: Option<f64>, decimals: u32) -> Option<(U256, bool)> {
    match change {
        None => Some((U256::zero(), false)),
        Some(c) if !c.is_finite() => None,
        Some(c) => {
            let raw = units::from_display(c.abs(), decimals).ok()?;
            Some((U256::from(raw), c > 0.0))
        }
    }
}

fn positive_raw(amount: Option<f64>, decimals: u32) -> Option<U256> {
    let amount = amount?;
    if amount <= 0.0 {
        return None;
    }
    let raw = units::from_display(amount, decimals).ok()?;
    (raw > 0).then_some(U256::from(raw))
}

pub struct TransactionComposer {
    tbtc: Erc20,
    bitusd: Erc20,
    borrower_operations: BorrowerOperations,
    stability_pool: Option<StabilityPool>,
}

impl TransactionComposer {
    pub fn new(contracts: &ContractAddresses) -> Self {
        Self {
            tbtc: Erc20::new(contracts.tbtc),
            bitusd: Erc20::new(contracts.bitusd),
            borrower_operations: BorrowerOperations::new(contracts.borrower_operations),
            stability_pool: contracts.stability_pool.map(StabilityPool::new),
        }
    }

    /// `[TBTC.approve, BorrowerOperations.open_trove]`
    pub fn borrow(&self, request: &BorrowRequest) -> Option<Vec<Call>> {
        let owner = request.owner?;
        let owner_index = request.owner_index?;
        let coll = positive_raw(request.collateral_amount, TBTC_DECIMALS)?;
        let debt = positive_raw(request.borrow_amount, BITUSD_DECIMALS)?;
        let rate = units::interest_rate_raw(request.annual_interest_rate_percent).ok()?;

        let params = OpenTroveParams::simple(owner, owner_index, coll, debt, U256::from(rate));
        Some(vec![
            self.tbtc.approve(self.borrower_operations.address, coll),
            self.borrower_operations.open_trove(&params),
        ])
    }

    /// `[bitUSD.approve, StabilityPool.provide_to_sp]`
    pub fn stake(&self, request: &StakeRequest) -> Option<Vec<Call>> {
        request.owner?;
        let pool = self.stability_pool?;
        let amount = positive_raw(request.amount, BITUSD_DECIMALS)?;

        Some(vec![
            self.bitusd.approve(pool.address, amount),
            pool.provide_to_sp(amount, false),
        ])
    }

    pub fn mint_test_btc(&self, owner: Option<Felt>) -> Option<Vec<Call>> {
        let owner = owner?;
        Some(vec![self.tbtc.mint(owner, U256::from(TEST_BTC_MINT_AMOUNT))])
    }

    pub fn add_collateral(&self, owner: Option<Felt>, trove_id: U256, amount: Option<f64>) -> Option<Vec<Call>> {
        owner?;
        let coll = positive_raw(amount, TBTC_DECIMALS)?;
        Some(vec![
            self.tbtc.approve(self.borrower_operations.address, coll),
            self.borrower_operations.add_coll(trove_id, coll),
        ])
    }

    pub fn withdraw_collateral(&self, owner: Option<Felt>, trove_id: U256, amount: Option<f64>) -> Option<Vec<Call>> {
        owner?;
        let coll = positive_raw(amount, TBTC_DECIMALS)?;
        Some(vec![self.borrower_operations.withdraw_coll(trove_id, coll)])
    }

    pub fn repay(&self, owner: Option<Felt>, trove_id: U256, amount: Option<f64>) -> Option<Vec<Call>> {
        owner?;
        let debt = positive_raw(amount, BITUSD_DECIMALS)?;
        Some(vec![
            self.bitusd.approve(self.borrower_operations.address, debt),
            self.borrower_operations.repay_bitusd(trove_id, debt),
        ])
    }

    pub fn withdraw_bitusd(&self, owner: Option<Felt>, trove_id: U256, amount: Option<f64>) -> Option<Vec<Call>> {
        owner?;
        let debt = positive_raw(amount, BITUSD_DECIMALS)?;
        Some(vec![self.borrower_operations.withdraw_bitusd(trove_id, debt, U256::MAX)])
    }

    pub fn close_trove(&self, owner: Option<Felt>, trove_id: U256) -> Option<Vec<Call>> {
        owner?;
        Some(vec![self.borrower_operations.close_trove(trove_id)])
    }

    /// Change collateral and debt in one call. Adding collateral approves
    /// TBTC first and repaying debt approves bitUSD first.
    pub fn adjust_trove(&self, request: &AdjustTroveRequest) -> Option<Vec<Call>> {
        request.owner?;
        let (coll, coll_increase) = signed_raw(request.collateral_change, TBTC_DECIMALS)?;
        let (debt, debt_increase) = signed_raw(request.debt_change, BITUSD_DECIMALS)?;
        if coll.is_zero() && debt.is_zero() {
            return None;
        }

        let spender = self.borrower_operations.address;
        let mut calls = Vec::with_capacity(3);
        if coll_increase {
            calls.push(self.tbtc.approve(spender, coll));
        }
        if !debt.is_zero() && !debt_increase {
            calls.push(self.bitusd.approve(spender, debt));
        }
        calls.push(self.borrower_operations.adjust_trove(
            request.trove_id,
            coll,
            coll_increase,
            debt,
            debt_increase,
            U256::MAX,
        ));
        Some(calls)
    }

    pub fn adjust_interest_rate(
        &self,
        owner: Option<Felt>,
        trove_id: U256,
        annual_interest_rate_percent: f64,
    ) -> Option<Vec<Call>> {
        owner?;
        if annual_interest_rate_percent <= 0.0 {
            return None;
        }
        let rate = units::interest_rate_raw(annual_interest_rate_percent).ok()?;
        Some(vec![self.borrower_operations.adjust_trove_interest_rate(
            trove_id,
            U256::from(rate),
            U256::MAX,
        )])
    }

    pub fn withdraw_from_pool(&self, owner: Option<Felt>, amount: Option<f64>) -> Option<Vec<Call>> {
        owner?;
        let pool = self.stability_pool?;
        let amount = positive_raw(amount, BITUSD_DECIMALS)?;
        Some(vec![pool.withdraw_from_sp(amount, true)])
    }

    pub fn claim_collateral_gains(&self, owner: Option<Felt>) -> Option<Vec<Call>> {
        owner?;
        let pool = self.stability_pool?;
        Some(vec![pool.claim_all_coll_gains()])
    }
}

/// Follows submitted transactions and invalidates the queries they touch
pub struct TransactionTracker {
    provider: Arc<dyn StarknetProvider>,
    cache: QueryCache,
    contracts: ContractAddresses,
    poll_interval: Duration,
    timeout: Duration,
    last_invalidated: Mutex<Option<String>>,
}

impl TransactionTracker {
    pub fn new(
        provider: Arc<dyn StarknetProvider>,
        cache: QueryCache,
        contracts: ContractAddresses,
        poll_interval: Duration,
        timeout: Duration,
    ) -> Self {
        Self {
            provider,
            cache,
            contracts,
            poll_interval,
            timeout,
            last_invalidated: Mutex::new(None),
        }
    }

    /// Poll until the node returns a receipt or the timeout elapses.
    /// Transport errors while polling are logged and retried.
    pub async fn wait_for_receipt(&self, hash: &str) -> Result<TransactionReceipt, TransactionError> {
        let started = Instant::now();

        loop {
            match self.provider.get_transaction_receipt(hash).await {
                Ok(Some(receipt)) => {
                    debug!(transaction_hash = hash, "Receipt received");
                    return Ok(receipt);
                }
                Ok(None) => debug!(transaction_hash = hash, "Receipt not available yet"),
                Err(e) => warn!(transaction_hash = hash, error = %e, "Receipt poll failed"),
            }

            if started.elapsed() >= self.timeout {
                return Err(TransactionError::Timeout {
                    hash: hash.to_string(),
                    waited: started.elapsed(),
                });
            }
            sleep(self.poll_interval).await;
        }
    }

    /// Invalidate `targets` unless `hash` was already handled.
    /// Returns whether this call did the invalidation.
    pub async fn invalidate_once(&self, hash: &str, targets: &[QueryKey]) -> bool {
        let mut last = self.last_invalidated.lock().await;
        if last.as_deref() == Some(hash) {
            return false;
        }
        *last = Some(hash.to_string());

        for key in targets {
            self.cache.invalidate(key).await;
        }
        info!(transaction_hash = hash, count = targets.len(), "Invalidated stale queries");
        true
    }

    /// Wait for `hash` to land; on success invalidate what `kind` touched
    pub async fn track(
        &self,
        hash: &str,
        kind: TransactionKind,
        owner: Felt,
        chain_id: &str,
    ) -> Result<TransactionReceipt, TransactionError> {
        let receipt = self.wait_for_receipt(hash).await?;

        if !receipt.is_success() {
            let err = if receipt.finality_status == FinalityStatus::Rejected {
                TransactionError::Rejected { hash: hash.to_string() }
            } else {
                TransactionError::Reverted {
                    hash: hash.to_string(),
                    reason: receipt.revert_reason.clone().unwrap_or_default(),
                }
            };
            error!(transaction_hash = hash, error = %err, "Transaction failed");
            return Err(err);
        }

        let targets = kind.invalidation_targets(owner, chain_id, &self.contracts);
        self.invalidate_once(hash, &targets).await;
        Ok(receipt)
    }

    /// Execute `calls` through the wallet and track the result
    pub async fn submit(
        &self,
        wallet: &dyn WalletAccount,
        calls: Vec<Call>,
        kind: TransactionKind,
    ) -> Result<TransactionReceipt, TransactionError> {
        let owner = wallet.address();
        let chain_id = wallet.chain_id();
        info!(
            owner = %felt_to_hex(&owner),
            ?kind,
            calls = calls.len(),
            "Submitting transaction"
        );

        let hash = wallet.execute(calls).await.map_err(|e| {
            let notice = e.notice();
            warn!(kind = ?notice.kind, error = %e, "Wallet did not send transaction");
            e
        })?;
        info!(transaction_hash = %hash, "Transaction sent");

        self.track(&hash, kind, owner, &chain_id).await
    }
}
