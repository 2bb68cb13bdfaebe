//! bitUSD API library
//!
//! Exposes modules for testing and integration

use std::sync::Arc;

use axum::{
    http::HeaderValue,
    routing::{get, post},
    Router,
};
use tokio::sync::OnceCell;
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};

pub mod config;
pub mod contracts;
pub mod deposit_reader;
pub mod error;
pub mod felt;
pub mod form;
pub mod handlers;
pub mod position_reader;
pub mod price_feed;
pub mod query_cache;
pub mod rpc_client;
pub mod tracing_logger;
pub mod transaction_composer;
pub mod types;

pub use config::Config;
pub use contracts::ContractAddresses;
pub use error::AppError;
pub use felt::Felt;
pub use rpc_client::{RpcError, StarknetProvider, StarknetRpcClient};
pub use transaction_composer::{TransactionComposer, TransactionTracker, WalletAccount};
pub use types::*;

use config::PriceSourceKind;
use contracts::PriceFeedContract;
use deposit_reader::DepositReader;
use position_reader::PositionReader;
use price_feed::{FixedPrice, HttpPriceOracle, OnChainPriceFeed, PriceService, PriceSource};
use query_cache::QueryCache;

/// bitUSD is valued at its peg
pub const BITUSD_PEG_USD: f64 = 1.0;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub provider: Arc<dyn StarknetProvider>,
    pub contracts: ContractAddresses,
    pub cache: QueryCache,
    pub prices: Arc<PriceService>,
    pub positions: Arc<PositionReader>,
    /// `None` without a stability pool address
    pub deposits: Option<Arc<DepositReader>>,
    pub composer: Arc<TransactionComposer>,
    pub tracker: Arc<TransactionTracker>,
    chain_id: Arc<OnceCell<String>>,
}

impl AppState {
    /// Wire services around `provider`, picking the BTC price source from config
    pub fn new(config: Config, provider: Arc<dyn StarknetProvider>) -> anyhow::Result<Self> {
        let contracts = config.contract_addresses()?;

        let bitcoin: Arc<dyn PriceSource> = match (config.effective_price_source(), contracts.price_feed) {
            (PriceSourceKind::OnChain, Some(feed)) => {
                Arc::new(OnChainPriceFeed::new(provider.clone(), PriceFeedContract::new(feed)))
            }
            (source, _) => {
                if source != config.prices.source {
                    warn!("No price feed address configured, using HTTP price oracle");
                }
                Arc::new(HttpPriceOracle::new(
                    config.prices.oracle_url.clone(),
                    config.starknet.request_timeout,
                )?)
            }
        };

        Ok(Self::with_price_source(config, provider, bitcoin)?)
    }

    /// Same as [`AppState::new`] with an explicit BTC price source
    pub fn with_price_source(
        config: Config,
        provider: Arc<dyn StarknetProvider>,
        bitcoin: Arc<dyn PriceSource>,
    ) -> Result<Self, config::ConfigError> {
        let contracts = config.contract_addresses()?;
        let cache = QueryCache::new(config.cache.query_ttl);

        let prices = Arc::new(PriceService::new(
            bitcoin,
            Arc::new(FixedPrice(BITUSD_PEG_USD)),
            cache.clone(),
            config.prices.ttl,
        ));
        let positions = Arc::new(PositionReader::new(
            provider.clone(),
            contracts.trove_manager,
            prices.clone(),
            cache.clone(),
            config.cache.query_ttl,
        ));
        let deposits = contracts.stability_pool.map(|pool| {
            Arc::new(DepositReader::new(
                provider.clone(),
                pool,
                cache.clone(),
                config.cache.query_ttl,
            ))
        });
        let composer = Arc::new(TransactionComposer::new(&contracts));
        let tracker = Arc::new(TransactionTracker::new(
            provider.clone(),
            cache.clone(),
            contracts.clone(),
            config.transactions.receipt_poll_interval,
            config.transactions.receipt_timeout,
        ));

        Ok(Self {
            config: Arc::new(config),
            provider,
            contracts,
            cache,
            prices,
            positions,
            deposits,
            composer,
            tracker,
            chain_id: Arc::new(OnceCell::new()),
        })
    }

    /// Chain id of the connected node, fetched once
    pub async fn chain_id(&self) -> Result<String, RpcError> {
        self.chain_id
            .get_or_try_init(|| self.provider.chain_id())
            .await
            .cloned()
    }
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    if origins.is_empty() || origins.iter().any(|o| o == "*") {
        return CorsLayer::permissive();
    }

    let allowed: Vec<HeaderValue> = origins.iter().filter_map(|o| o.parse().ok()).collect();
    info!(count = allowed.len(), "CORS origins configured");
    CorsLayer::new()
        .allow_origin(allowed)
        .allow_methods(Any)
        .allow_headers(Any)
}

pub fn build_router(state: AppState) -> Router {
    let cors = cors_layer(&state.config.server.cors_origins);

    Router::new()
        .route("/health", get(handlers::health_check))
        .route("/api/prices/bitcoin", get(handlers::bitcoin_price))
        .route("/api/prices/bitusd", get(handlers::bitusd_price))
        .route("/api/positions/:address", get(handlers::user_positions))
        .route("/api/borrow/preview", post(handlers::borrow_preview))
        .route("/api/stake/preview", post(handlers::stake_preview))
        .route("/api/deposits/:address", get(handlers::stake_position))
        .layer(cors)
        .with_state(state)
}
