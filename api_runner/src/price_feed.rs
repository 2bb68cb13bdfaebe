//! USD price sources for BTC and bitUSD, with a TTL cache in front

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use collateral_math::{units, Prices, TOKEN_DECIMALS};
use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, info};

use crate::contracts::PriceFeedContract;
use crate::felt::felt_to_u128;
use crate::query_cache::{PriceAsset, QueryCache, QueryKey};
use crate::rpc_client::StarknetProvider;
use crate::tracing_logger::log_external_call;

const COINGECKO_SIMPLE_PRICE: &str =
    "https://api.coingecko.com/api/v3/simple/price?ids=bitcoin&vs_currencies=usd";

/// Anything that can quote one asset in USD
#[async_trait]
pub trait PriceSource: Send + Sync {
    async fn usd_price(&self) -> Result<f64>;

    fn name(&self) -> &'static str;
}

/// Reads `fetch_price` from the protocol price feed contract
pub struct OnChainPriceFeed {
    provider: Arc<dyn StarknetProvider>,
    feed: PriceFeedContract,
}

impl OnChainPriceFeed {
    pub fn new(provider: Arc<dyn StarknetProvider>, feed: PriceFeedContract) -> Self {
        Self { provider, feed }
    }
}

#[async_trait]
impl PriceSource for OnChainPriceFeed {
    async fn usd_price(&self) -> Result<f64> {
        let raw = self.feed.fetch_price(self.provider.as_ref()).await?;
        let raw = felt_to_u128(raw)?;
        Ok(units::to_display(raw, TOKEN_DECIMALS))
    }

    fn name(&self) -> &'static str {
        "onchain"
    }
}

#[derive(Debug, Deserialize)]
struct SimplePriceResponse {
    bitcoin: UsdQuote,
}

#[derive(Debug, Deserialize)]
struct UsdQuote {
    usd: f64,
}

/// CoinGecko-compatible `simple/price` endpoint
pub struct HttpPriceOracle {
    client: Client,
    url: String,
}

impl HttpPriceOracle {
    pub fn new(url: Option<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent("bitusd-api/0.1")
            .build()?;

        Ok(Self {
            client,
            url: url.unwrap_or_else(|| COINGECKO_SIMPLE_PRICE.to_string()),
        })
    }

    async fn fetch(&self) -> Result<f64> {
        let response = self.client.get(&self.url).send().await?;
        if !response.status().is_success() {
            return Err(anyhow!("Price oracle returned {}", response.status()));
        }

        let body: SimplePriceResponse = response
            .json()
            .await
            .map_err(|e| anyhow!("Failed to parse price oracle response: {}", e))?;
        Ok(body.bitcoin.usd)
    }
}

#[async_trait]
impl PriceSource for HttpPriceOracle {
    async fn usd_price(&self) -> Result<f64> {
        debug!("Fetching BTC price from: {}", self.url);

        let started = Instant::now();
        let result = self.fetch().await;
        let error = result.as_ref().err().map(|e| e.to_string());
        log_external_call("price_oracle", "simple/price", started.elapsed(), error.as_deref());
        result
    }

    fn name(&self) -> &'static str {
        "http"
    }
}

/// A constant quote, used for the bitUSD peg
pub struct FixedPrice(pub f64);

#[async_trait]
impl PriceSource for FixedPrice {
    async fn usd_price(&self) -> Result<f64> {
        Ok(self.0)
    }

    fn name(&self) -> &'static str {
        "fixed"
    }
}

/// Cached BTC and bitUSD quotes
pub struct PriceService {
    bitcoin: Arc<dyn PriceSource>,
    bitusd: Arc<dyn PriceSource>,
    cache: QueryCache,
    ttl: Duration,
}

impl PriceService {
    pub fn new(
        bitcoin: Arc<dyn PriceSource>,
        bitusd: Arc<dyn PriceSource>,
        cache: QueryCache,
        ttl: Duration,
    ) -> Self {
        info!(
            bitcoin_source = bitcoin.name(),
            bitusd_source = bitusd.name(),
            ttl_secs = ttl.as_secs(),
            "Price service configured"
        );
        Self {
            bitcoin,
            bitusd,
            cache,
            ttl,
        }
    }

    async fn quote(&self, asset: PriceAsset, source: &dyn PriceSource) -> Result<f64> {
        self.cache
            .get_or_fetch(QueryKey::Price { asset }, Some(self.ttl), || async {
                let price = source.usd_price().await?;
                if !price.is_finite() || price < 0.0 {
                    return Err(anyhow!("{} source quoted an invalid price: {}", source.name(), price));
                }
                Ok(price)
            })
            .await
    }

    pub async fn bitcoin_price(&self) -> Result<f64> {
        self.quote(PriceAsset::Bitcoin, self.bitcoin.as_ref()).await
    }

    pub async fn bitusd_price(&self) -> Result<f64> {
        self.quote(PriceAsset::BitUsd, self.bitusd.as_ref()).await
    }

    /// Both quotes, fetched concurrently
    pub async fn prices(&self) -> Result<Prices> {
        let (btc_usd, bitusd_usd) = futures::try_join!(self.bitcoin_price(), self.bitusd_price())?;
        Ok(Prices::new(btc_usd, bitusd_usd))
    }
}
