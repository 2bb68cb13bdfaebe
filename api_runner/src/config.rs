//! Service configuration from the environment or a TOML file

use std::env;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::contracts::ContractAddresses;
use crate::felt::{parse_address, parse_felt, Felt};

pub const DEFAULT_NODE_URL: &str = "https://starknet-sepolia.public.blastapi.io/rpc/v0_7";
pub const DEFAULT_TBTC_ADDRESS: &str = "0x01bf229c1217853883088ac3be9230f93688e5d64617bf439a480a4241a205da";
pub const DEFAULT_BITUSD_ADDRESS: &str = "0x3a4f7d95d4f5ad3c4bad8f0db881b91910b8fa74c60358e2a5337d251c4c248";
pub const DEFAULT_BORROWER_OPERATIONS_ADDRESS: &str =
    "0x541433b595c390ea1b9878676889dcdc8d8d9ea593a5933b2a5c795e68a0d73";
pub const DEFAULT_TROVE_MANAGER_ADDRESS: &str =
    "0x267a0b64078156347fefc7e20c5446457a948d36affce2bfbdbf07a4dee7f83";

/// Application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub starknet: StarknetConfig,
    pub contracts: ContractsConfig,
    pub prices: PriceConfig,
    pub transactions: TransactionConfig,
    pub cache: CacheConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub cors_origins: Vec<String>,
    pub log_level: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8081,
            cors_origins: vec!["*".to_string()],
            log_level: "info".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StarknetConfig {
    pub node_url: String,
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,
}

impl Default for StarknetConfig {
    fn default() -> Self {
        Self {
            node_url: DEFAULT_NODE_URL.to_string(),
            request_timeout: Duration::from_secs(30),
        }
    }
}

/// Contract addresses as hex strings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ContractsConfig {
    pub tbtc: String,
    pub bitusd: String,
    pub borrower_operations: String,
    pub trove_manager: String,
    pub stability_pool: Option<String>,
    pub price_feed: Option<String>,
}

impl Default for ContractsConfig {
    fn default() -> Self {
        Self {
            tbtc: DEFAULT_TBTC_ADDRESS.to_string(),
            bitusd: DEFAULT_BITUSD_ADDRESS.to_string(),
            borrower_operations: DEFAULT_BORROWER_OPERATIONS_ADDRESS.to_string(),
            trove_manager: DEFAULT_TROVE_MANAGER_ADDRESS.to_string(),
            stability_pool: None,
            price_feed: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PriceSourceKind {
    #[default]
    OnChain,
    Http,
}

impl std::str::FromStr for PriceSourceKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "onchain" => Ok(PriceSourceKind::OnChain),
            "http" => Ok(PriceSourceKind::Http),
            other => Err(ConfigError::InvalidConfig(format!("unknown PRICE_SOURCE '{}'", other))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PriceConfig {
    pub source: PriceSourceKind,
    pub oracle_url: Option<String>,
    #[serde(with = "humantime_serde")]
    pub ttl: Duration,
}

impl Default for PriceConfig {
    fn default() -> Self {
        Self {
            source: PriceSourceKind::OnChain,
            oracle_url: None,
            ttl: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransactionConfig {
    #[serde(with = "humantime_serde")]
    pub receipt_poll_interval: Duration,
    #[serde(with = "humantime_serde")]
    pub receipt_timeout: Duration,
}

impl Default for TransactionConfig {
    fn default() -> Self {
        Self {
            receipt_poll_interval: Duration::from_millis(2_000),
            receipt_timeout: Duration::from_secs(300),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    #[serde(with = "humantime_serde")]
    pub query_ttl: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            query_ttl: Duration::from_secs(30),
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

fn env_optional(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

impl Config {
    /// Load configuration from environment
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Config::default();

        let config = Config {
            server: ServerConfig {
                host: env::var("SERVER_HOST").unwrap_or(defaults.server.host),
                port: env::var("SERVER_PORT")
                    .unwrap_or_else(|_| defaults.server.port.to_string())
                    .parse()
                    .map_err(|_| ConfigError::InvalidPort)?,
                cors_origins: env::var("CORS_ORIGINS")
                    .unwrap_or_else(|_| "*".to_string())
                    .split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect(),
                log_level: env::var("LOG_LEVEL").unwrap_or(defaults.server.log_level),
            },

            starknet: StarknetConfig {
                node_url: env::var("NODE_URL").unwrap_or(defaults.starknet.node_url),
                request_timeout: Duration::from_secs(env_parse(
                    "RPC_TIMEOUT_SECS",
                    defaults.starknet.request_timeout.as_secs(),
                )),
            },

            contracts: ContractsConfig {
                tbtc: env::var("TBTC_ADDRESS").unwrap_or(defaults.contracts.tbtc),
                bitusd: env::var("BITUSD_ADDRESS").unwrap_or(defaults.contracts.bitusd),
                borrower_operations: env::var("BORROWER_OPERATIONS_ADDRESS")
                    .unwrap_or(defaults.contracts.borrower_operations),
                trove_manager: env::var("TROVE_MANAGER_ADDRESS").unwrap_or(defaults.contracts.trove_manager),
                stability_pool: env_optional("STABILITY_POOL_ADDRESS"),
                price_feed: env_optional("PRICE_FEED_ADDRESS"),
            },

            prices: PriceConfig {
                source: match env_optional("PRICE_SOURCE") {
                    Some(source) => source.parse()?,
                    None => defaults.prices.source,
                },
                oracle_url: env_optional("PRICE_ORACLE_URL"),
                ttl: Duration::from_secs(env_parse("PRICE_TTL_SECS", defaults.prices.ttl.as_secs())),
            },

            transactions: TransactionConfig {
                receipt_poll_interval: Duration::from_millis(env_parse(
                    "RECEIPT_POLL_INTERVAL_MS",
                    defaults.transactions.receipt_poll_interval.as_millis() as u64,
                )),
                receipt_timeout: Duration::from_secs(env_parse(
                    "RECEIPT_TIMEOUT_SECS",
                    defaults.transactions.receipt_timeout.as_secs(),
                )),
            },

            cache: CacheConfig {
                query_ttl: Duration::from_secs(env_parse("QUERY_CACHE_TTL_SECS", defaults.cache.query_ttl.as_secs())),
            },
        };

        config.validate()?;
        Ok(config)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Io(format!("{}: {}", path.display(), e)))?;
        Self::from_toml_str(&content)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.port == 0 {
            return Err(ConfigError::InvalidPort);
        }

        Url::parse(&self.starknet.node_url)
            .map_err(|e| ConfigError::InvalidUrl(format!("NODE_URL: {}", e)))?;
        if let Some(oracle) = &self.prices.oracle_url {
            Url::parse(oracle).map_err(|e| ConfigError::InvalidUrl(format!("PRICE_ORACLE_URL: {}", e)))?;
        }

        if self.transactions.receipt_poll_interval.is_zero() {
            return Err(ConfigError::InvalidConfig(
                "receipt poll interval must be greater than 0".to_string(),
            ));
        }
        if self.transactions.receipt_timeout < self.transactions.receipt_poll_interval {
            return Err(ConfigError::InvalidConfig(
                "receipt timeout must be at least one poll interval".to_string(),
            ));
        }

        self.contract_addresses().map(|_| ())
    }

    pub fn contract_addresses(&self) -> Result<ContractAddresses, ConfigError> {
        let parse = |name: &str, value: &str| -> Result<Felt, ConfigError> {
            parse_address(value).map_err(|_| ConfigError::InvalidAddress {
                name: name.to_string(),
                value: value.to_string(),
            })
        };
        let c = &self.contracts;

        Ok(ContractAddresses {
            tbtc: parse("tbtc", &c.tbtc)?,
            bitusd: parse("bitusd", &c.bitusd)?,
            borrower_operations: parse("borrower_operations", &c.borrower_operations)?,
            trove_manager: parse("trove_manager", &c.trove_manager)?,
            stability_pool: c.stability_pool.as_deref().map(|v| parse("stability_pool", v)).transpose()?,
            price_feed: c.price_feed.as_deref().map(|v| parse("price_feed", v)).transpose()?,
        })
    }

    /// The price source actually usable: on-chain needs a feed address
    pub fn effective_price_source(&self) -> PriceSourceKind {
        match (self.prices.source, &self.contracts.price_feed) {
            (PriceSourceKind::OnChain, None) => PriceSourceKind::Http,
            (source, _) => source,
        }
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid port number")]
    InvalidPort,

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Invalid {name} address: {value}")]
    InvalidAddress { name: String, value: String },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Failed to parse config: {0}")]
    Parse(String),

    #[error("Failed to read config file: {0}")]
    Io(String),
}

/// Example `.env` file
pub fn create_env_example() -> String {
    r#"# Server Configuration
SERVER_HOST=127.0.0.1
SERVER_PORT=8081
CORS_ORIGINS=http://localhost:5173,http://localhost:3000
LOG_LEVEL=info

# Starknet
NODE_URL=https://starknet-sepolia.public.blastapi.io/rpc/v0_7
RPC_TIMEOUT_SECS=30

# Contracts
TBTC_ADDRESS=0x01bf229c1217853883088ac3be9230f93688e5d64617bf439a480a4241a205da
BITUSD_ADDRESS=0x3a4f7d95d4f5ad3c4bad8f0db881b91910b8fa74c60358e2a5337d251c4c248
BORROWER_OPERATIONS_ADDRESS=0x541433b595c390ea1b9878676889dcdc8d8d9ea593a5933b2a5c795e68a0d73
TROVE_MANAGER_ADDRESS=0x267a0b64078156347fefc7e20c5446457a948d36affce2bfbdbf07a4dee7f83
# STABILITY_POOL_ADDRESS=
# PRICE_FEED_ADDRESS=

# Prices
PRICE_SOURCE=onchain
# PRICE_ORACLE_URL=https://api.coingecko.com/api/v3/simple/price?ids=bitcoin&vs_currencies=usd
PRICE_TTL_SECS=30

# Transactions
RECEIPT_POLL_INTERVAL_MS=2000
RECEIPT_TIMEOUT_SECS=300
QUERY_CACHE_TTL_SECS=30
"#
    .to_string()
}
