//! Router-level tests against an in-memory chain

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use ethereum_types::U256;
use serde_json::{json, Value};
use tower::ServiceExt;

use bitusd_api::felt::{felt_to_hex, parse_felt, u256_from_felts, u256_to_felts};
use bitusd_api::transaction_composer::{
    FailureKind, StakeRequest, TransactionError, TransactionKind, WalletAccount,
};
use bitusd_api::{
    build_router, AppState, Call, Config, ExecutionStatus, Felt, FinalityStatus, RpcError,
    StarknetProvider, TransactionReceipt,
};

const OWNER: &str = "0xabc123";
const WAD: u128 = 1_000_000_000_000_000_000;

fn wad(amount: u128) -> U256 {
    U256::from(amount) * U256::from(WAD)
}

/// `LatestTroveData` felts for the given collateral, debt and rate
fn trove_felts(coll: U256, debt: U256, rate: U256) -> Vec<Felt> {
    let mut felts = Vec::new();
    felts.extend(u256_to_felts(debt));
    felts.extend(u256_to_felts(coll));
    for _ in 0..4 {
        felts.extend(u256_to_felts(U256::zero()));
    }
    felts.extend(u256_to_felts(rate));
    for _ in 0..2 {
        felts.extend(u256_to_felts(U256::zero()));
    }
    felts.push(Felt::from(1_700_000_000u64));
    felts
}

#[derive(Default)]
struct ChainState {
    owner_troves: Vec<U256>,
    troves: HashMap<U256, Vec<Felt>>,
    balances: HashMap<Felt, U256>,
    btc_price: U256,
    staked: U256,
    total_deposits: U256,
    fail_positions: bool,
    fail_chain_id: bool,
    receipts: VecDeque<Option<TransactionReceipt>>,
}

#[derive(Default)]
struct MockChain {
    state: Mutex<ChainState>,
    position_reads: AtomicUsize,
}

impl MockChain {
    fn with<R>(&self, f: impl FnOnce(&mut ChainState) -> R) -> R {
        f(&mut self.state.lock().unwrap())
    }
}

#[async_trait]
impl StarknetProvider for MockChain {
    async fn call(&self, call: &Call) -> Result<Vec<Felt>, RpcError> {
        let state = self.state.lock().unwrap();
        match call.entry_point {
            "get_owner_to_positions" => {
                self.position_reads.fetch_add(1, Ordering::SeqCst);
                if state.fail_positions {
                    return Err(RpcError::Node {
                        code: 40,
                        message: "Contract error".to_string(),
                    });
                }
                let mut felts = vec![Felt::from(state.owner_troves.len())];
                for id in &state.owner_troves {
                    felts.extend(u256_to_felts(*id));
                }
                Ok(felts)
            }
            "get_latest_trove_data" => {
                let id = u256_from_felts(call.calldata[0], call.calldata[1])?;
                Ok(state.troves.get(&id).cloned().unwrap_or_default())
            }
            "fetch_price" => Ok(u256_to_felts(state.btc_price).to_vec()),
            "get_compounded_bitusd_deposit" => Ok(u256_to_felts(state.staked).to_vec()),
            "get_depositor_yield_gain" | "get_depositor_coll_gain" => Ok(u256_to_felts(U256::zero()).to_vec()),
            "get_total_bitusd_deposits" => Ok(u256_to_felts(state.total_deposits).to_vec()),
            "balance_of" => {
                let balance = state.balances.get(&call.to).copied().unwrap_or_default();
                Ok(u256_to_felts(balance).to_vec())
            }
            other => Err(RpcError::Malformed(format!("unexpected call {}", other))),
        }
    }

    async fn get_transaction_receipt(&self, _hash: &str) -> Result<Option<TransactionReceipt>, RpcError> {
        Ok(self.state.lock().unwrap().receipts.pop_front().flatten())
    }

    async fn chain_id(&self) -> Result<String, RpcError> {
        if self.state.lock().unwrap().fail_chain_id {
            return Err(RpcError::Status(503));
        }
        Ok("0x534e5f5345504f4c4941".to_string())
    }
}

struct MockWallet {
    address: Felt,
    response: Result<String, String>,
    sent: Mutex<Vec<Vec<Call>>>,
    chain: Arc<MockChain>,
    /// Applied to the chain when the wallet sends
    effect: fn(&mut ChainState),
}

fn no_effect(_: &mut ChainState) {}

fn open_third_trove(s: &mut ChainState) {
    s.owner_troves.push(U256::from(3u64));
    s.troves.insert(
        U256::from(3u64),
        trove_felts(wad(1), wad(500), U256::from(5u64) * U256::exp10(16)),
    );
}

#[async_trait]
impl WalletAccount for MockWallet {
    fn address(&self) -> Felt {
        self.address
    }

    fn chain_id(&self) -> String {
        "0x534e5f5345504f4c4941".to_string()
    }

    async fn execute(&self, calls: Vec<Call>) -> Result<String, TransactionError> {
        self.sent.lock().unwrap().push(calls);
        let hash = self.response.clone().map_err(TransactionError::Wallet)?;
        self.chain.with(self.effect);
        Ok(hash)
    }
}

fn test_config() -> Config {
    let mut config = Config::default();
    config.contracts.price_feed = Some("0xfeed".to_string());
    config.contracts.stability_pool = Some("0x5000".to_string());
    config.transactions.receipt_poll_interval = Duration::from_millis(1);
    config.transactions.receipt_timeout = Duration::from_millis(500);
    config
}

fn seeded_chain() -> Arc<MockChain> {
    let config = test_config();
    let contracts = config.contract_addresses().unwrap();
    let chain = Arc::new(MockChain::default());
    chain.with(|s| {
        s.btc_price = wad(60_000);
        s.owner_troves = vec![U256::from(1u64), U256::from(2u64)];
        s.troves.insert(
            U256::from(1u64),
            trove_felts(wad(2), wad(100), U256::from(5u64) * U256::exp10(16)),
        );
        // trove 2 returns truncated data
        s.troves.insert(U256::from(2u64), vec![Felt::from(1u64); 4]);
        s.balances.insert(contracts.tbtc, wad(2));
        s.balances.insert(contracts.bitusd, wad(300));
        s.total_deposits = wad(1_000);
    });
    chain
}

fn app(chain: Arc<MockChain>) -> (Router, AppState) {
    let state = AppState::new(test_config(), chain).unwrap();
    (build_router(state.clone()), state)
}

async fn send(app: Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = hyper::body::to_bytes(response.into_body()).await.unwrap();
    (status, serde_json::from_slice(&bytes).unwrap())
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn post(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

#[tokio::test]
async fn test_health_reports_chain() {
    let (app, _) = app(seeded_chain());
    let (status, body) = send(app, get("/health")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["node"]["status"], "ok");
}

#[tokio::test]
async fn test_price_endpoints() {
    let (router, _) = app(seeded_chain());
    let (status, body) = send(router.clone(), get("/api/prices/bitcoin")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["price"], 60_000.0);

    let (_, body) = send(router, get("/api/prices/bitusd")).await;
    assert_eq!(body["price"], 1.0);
}

#[tokio::test]
async fn test_positions_skip_incomplete_troves() {
    let (router, _) = app(seeded_chain());
    let (status, body) = send(router, get(&format!("/api/positions/{}", OWNER))).await;
    assert_eq!(status, StatusCode::OK);

    let positions = body["positions"].as_array().unwrap();
    assert_eq!(positions.len(), 1);

    let p = &positions[0];
    assert_eq!(p["id"], "1");
    assert_eq!(p["collateralAsset"], "TBTC");
    assert_eq!(p["borrowedAsset"], "bitUSD");
    assert_eq!(p["collateralAmount"], 2.0);
    assert_eq!(p["collateralValue"], 120_000.0);
    assert!((p["liquidationPrice"].as_f64().unwrap() - 55.0).abs() < 1e-9);
    assert!((p["interestRate"].as_f64().unwrap() - 5.0).abs() < 1e-9);
    assert_eq!(p["healthStatus"], "excellent");

    assert_eq!(body["totals"]["borrowedAmount"], 100.0);
    assert!((body["totals"]["amountBorrowable"].as_f64().unwrap() - 79_900.0).abs() < 1e-6);
}

#[tokio::test]
async fn test_positions_are_cached_per_owner() {
    let chain = seeded_chain();
    let (router, _) = app(chain.clone());
    let uri = format!("/api/positions/{}", OWNER);

    send(router.clone(), get(&uri)).await;
    send(router, get(&uri)).await;
    assert_eq!(chain.position_reads.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_positions_upstream_failure() {
    let chain = seeded_chain();
    chain.with(|s| s.fail_positions = true);
    let (router, _) = app(chain);

    let (status, body) = send(router, get(&format!("/api/positions/{}", OWNER))).await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert_eq!(body["error"]["code"], "EXTERNAL_SERVICE_ERROR");
    assert!(body["request_id"].is_string());
}

#[tokio::test]
async fn test_positions_rejects_bad_addresses() {
    let (router, _) = app(seeded_chain());
    let (status, body) = send(router.clone(), get("/api/positions/not-an-address")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "INVALID_ADDRESS");

    // above the field prime
    let (status, _) = send(router, get(&format!("/api/positions/0x{}", "f".repeat(64)))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_positions_sorting() {
    let chain = seeded_chain();
    chain.with(|s| {
        s.troves.insert(
            U256::from(2u64),
            trove_felts(wad(1), wad(30_000), U256::from(7u64) * U256::exp10(16)),
        );
    });
    let (router, _) = app(chain);

    let (_, body) = send(
        router,
        get(&format!("/api/positions/{}?sort=borrowedAmount&direction=desc", OWNER)),
    )
    .await;
    let ids: Vec<&str> = body["positions"]
        .as_array()
        .unwrap()
        .iter()
        .map(|p| p["id"].as_str().unwrap())
        .collect();
    assert_eq!(ids, ["2", "1"]);
}

#[tokio::test]
async fn test_borrow_preview_builds_calls_with_owner_index() {
    let (router, state) = app(seeded_chain());
    let (status, body) = send(
        router,
        post(
            "/api/borrow/preview",
            json!({ "owner": OWNER, "collateralAmount": 1.0, "borrowAmount": 1000.0 }),
        ),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["ready"], true);
    assert_eq!(body["buttonText"], "Borrow");

    let calls = body["calls"].as_array().unwrap();
    assert_eq!(calls.len(), 2);
    assert_eq!(calls[0]["entrypoint"], "approve");
    assert_eq!(calls[0]["contractAddress"], felt_to_hex(&state.contracts.tbtc));
    assert_eq!(calls[1]["entrypoint"], "open_trove");
    // two existing troves
    assert_eq!(calls[1]["calldata"][1], "0x2");
}

#[tokio::test]
async fn test_borrow_preview_insufficient_balance() {
    let (router, _) = app(seeded_chain());
    let (_, body) = send(
        router,
        post(
            "/api/borrow/preview",
            json!({ "owner": OWNER, "collateralAmount": 5.0, "borrowAmount": 1000.0 }),
        ),
    )
    .await;

    assert_eq!(body["ready"], false);
    assert_eq!(body["buttonText"], "Insufficient balance");
    assert_eq!(body["issues"][0]["message"], "Insufficient balance.");
    assert!(body["calls"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_stake_preview() {
    let (router, _) = app(seeded_chain());
    let (_, body) = send(
        router.clone(),
        post("/api/stake/preview", json!({ "owner": OWNER, "amount": 100.0 })),
    )
    .await;
    assert_eq!(body["ready"], true);
    assert_eq!(body["buttonText"], "Stake bitUSD");
    assert_eq!(body["calls"][1]["entrypoint"], "provide_to_sp");

    let (_, body) = send(
        router,
        post("/api/stake/preview", json!({ "owner": OWNER, "amount": 1000.0 })),
    )
    .await;
    assert_eq!(body["buttonText"], "Check Input");
}

fn success_receipt() -> TransactionReceipt {
    TransactionReceipt {
        transaction_hash: "0x77".to_string(),
        execution_status: ExecutionStatus::Succeeded,
        finality_status: FinalityStatus::AcceptedOnL2,
        revert_reason: None,
        block_number: Some(10),
    }
}

#[tokio::test]
async fn test_borrow_submission_refreshes_positions() {
    let chain = seeded_chain();
    chain.with(|s| s.receipts = vec![None, Some(success_receipt())].into());
    let (router, state) = app(chain.clone());
    let owner = parse_felt(OWNER).unwrap();

    assert_eq!(state.positions.owner_index(owner).await, U256::from(2u64));

    let wallet = MockWallet {
        address: owner,
        response: Ok("0x77".to_string()),
        sent: Mutex::new(Vec::new()),
        chain: chain.clone(),
        effect: open_third_trove,
    };
    let request = bitusd_api::form::BorrowForm {
        collateral_amount: Some(1.0),
        borrow_amount: Some(500.0),
        ..Default::default()
    }
    .to_request(Some(owner), Some(state.positions.owner_index(owner).await), Some(2.0), 60_000.0)
    .unwrap();
    let calls = state.composer.borrow(&request).unwrap();

    let receipt = state
        .tracker
        .submit(&wallet, calls, TransactionKind::Borrow)
        .await
        .unwrap();
    assert!(receipt.is_success());
    assert_eq!(wallet.sent.lock().unwrap()[0].len(), 2);

    assert_eq!(state.positions.owner_index(owner).await, U256::from(3u64));
    let (_, body) = send(router, get(&format!("/api/positions/{}", OWNER))).await;
    assert_eq!(body["positions"].as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn test_rejected_wallet_request_is_cancellation() {
    let chain = seeded_chain();
    let (_, state) = app(chain.clone());

    let wallet = MockWallet {
        address: parse_felt(OWNER).unwrap(),
        response: Err("User rejected the request".to_string()),
        sent: Mutex::new(Vec::new()),
        chain,
        effect: no_effect,
    };
    let calls = state
        .composer
        .stake(&StakeRequest {
            owner: Some(wallet.address),
            amount: Some(10.0),
        })
        .unwrap();

    let err = state
        .tracker
        .submit(&wallet, calls, TransactionKind::Stake)
        .await
        .unwrap_err();
    let notice = err.notice();
    assert_eq!(notice.kind, FailureKind::Cancelled);
    assert!(notice.dismissible);
}

#[tokio::test]
async fn test_preview_needs_a_known_balance() {
    let chain = seeded_chain();
    chain.with(|s| s.fail_chain_id = true);
    let (router, _) = app(chain);

    let (status, body) = send(
        router.clone(),
        post("/api/stake/preview", json!({ "owner": OWNER, "amount": 100.0 })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["ready"], false);
    assert_eq!(body["issues"][0]["issue"], "balanceUnavailable");
    assert!(body["calls"].as_array().unwrap().is_empty());

    let (_, body) = send(
        router,
        post(
            "/api/borrow/preview",
            json!({ "owner": OWNER, "collateralAmount": 1.0, "borrowAmount": 1000.0 }),
        ),
    )
    .await;
    assert_eq!(body["ready"], false);
    assert_eq!(body["buttonText"], "Balance unavailable");
}

#[tokio::test]
async fn test_deposit_endpoint() {
    let chain = seeded_chain();
    chain.with(|s| s.staked = wad(250));
    let (router, _) = app(chain);

    let (status, body) = send(router, get(&format!("/api/deposits/{}", OWNER))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["stakedAmount"], 250.0);
    assert_eq!(body["totalDeposits"], 1_000.0);
    assert_eq!(body["poolSharePercent"], 25.0);
    assert_eq!(body["rewards"]["bitusd"], 0.0);
}

#[tokio::test]
async fn test_deposit_endpoint_without_pool() {
    let mut config = test_config();
    config.contracts.stability_pool = None;
    let state = AppState::new(config, seeded_chain()).unwrap();

    let (status, body) = send(build_router(state), get(&format!("/api/deposits/{}", OWNER))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["code"], "NOT_FOUND");
}

fn stake_250(s: &mut ChainState) {
    s.staked = s.staked + wad(250);
    s.total_deposits = s.total_deposits + wad(250);
}

#[tokio::test]
async fn test_stake_submission_refreshes_balance_and_deposit() {
    let chain = seeded_chain();
    chain.with(|s| s.receipts = vec![Some(success_receipt())].into());
    let (router, state) = app(chain.clone());
    let owner = parse_felt(OWNER).unwrap();
    let stake = || post("/api/stake/preview", json!({ "owner": OWNER, "amount": 250.0 }));

    let (_, body) = send(router.clone(), stake()).await;
    assert_eq!(body["ready"], true);
    let (_, body) = send(router.clone(), get(&format!("/api/deposits/{}", OWNER))).await;
    assert_eq!(body["stakedAmount"], 0.0);

    let wallet = MockWallet {
        address: owner,
        response: Ok("0x77".to_string()),
        sent: Mutex::new(Vec::new()),
        chain: chain.clone(),
        effect: stake_250,
    };
    let calls = state
        .composer
        .stake(&StakeRequest {
            owner: Some(owner),
            amount: Some(250.0),
        })
        .unwrap();
    state
        .tracker
        .submit(&wallet, calls, TransactionKind::Stake)
        .await
        .unwrap();

    // the wallet spent its bitUSD
    let bitusd = state.contracts.bitusd;
    chain.with(|s| {
        s.balances.insert(bitusd, wad(50));
    });

    let (_, body) = send(router.clone(), stake()).await;
    assert_eq!(body["ready"], false);
    assert_eq!(body["buttonText"], "Check Input");

    let (_, body) = send(router, get(&format!("/api/deposits/{}", OWNER))).await;
    assert_eq!(body["stakedAmount"], 250.0);
}

#[tokio::test]
async fn test_invalidation_targets_are_keys_the_readers_fill() {
    let chain = seeded_chain();
    let (router, state) = app(chain);
    let owner = parse_felt(OWNER).unwrap();

    send(router.clone(), get(&format!("/api/positions/{}", OWNER))).await;
    send(router.clone(), get(&format!("/api/deposits/{}", OWNER))).await;
    send(
        router.clone(),
        post(
            "/api/borrow/preview",
            json!({ "owner": OWNER, "collateralAmount": 1.0, "borrowAmount": 1000.0 }),
        ),
    )
    .await;
    send(
        router,
        post("/api/stake/preview", json!({ "owner": OWNER, "amount": 100.0 })),
    )
    .await;

    let chain_id = state.chain_id().await.unwrap();
    for kind in [
        TransactionKind::Borrow,
        TransactionKind::Stake,
        TransactionKind::MintTestBtc,
        TransactionKind::AdjustTrove,
        TransactionKind::StabilityPoolExit,
    ] {
        for key in kind.invalidation_targets(owner, &chain_id, &state.contracts) {
            assert!(state.cache.contains(&key).await, "{:?} never filled {:?}", kind, key);
        }
    }
}
