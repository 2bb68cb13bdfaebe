//! A depositor's standing in the stability pool

use std::sync::Arc;
use std::time::Duration;

use collateral_math::{units, BITUSD_DECIMALS, TBTC_DECIMALS};
use ethereum_types::U256;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::contracts::{ContractError, StabilityPool};
use crate::felt::{felt_to_hex, felt_to_u128, Felt};
use crate::query_cache::{QueryCache, QueryKey};
use crate::rpc_client::StarknetProvider;

/// Gains waiting to be claimed, in display units
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClaimableRewards {
    pub bitusd: f64,
    pub tbtc: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StakeView {
    pub staked_amount: f64,
    pub rewards: ClaimableRewards,
    pub total_deposits: f64,
    pub pool_share_percent: f64,
}

fn display(raw: U256, decimals: u32, entry_point: &'static str) -> Result<f64, ContractError> {
    let raw = felt_to_u128(raw).map_err(|source| ContractError::Decode { entry_point, source })?;
    Ok(units::to_display(raw, decimals))
}

pub struct DepositReader {
    provider: Arc<dyn StarknetProvider>,
    pool: StabilityPool,
    cache: QueryCache,
    cache_ttl: Duration,
}

impl DepositReader {
    pub fn new(
        provider: Arc<dyn StarknetProvider>,
        stability_pool: Felt,
        cache: QueryCache,
        cache_ttl: Duration,
    ) -> Self {
        Self {
            provider,
            pool: StabilityPool::new(stability_pool),
            cache,
            cache_ttl,
        }
    }

    /// Compounded bitUSD deposit of `owner`
    pub async fn staked_amount(&self, owner: Felt) -> Result<f64, ContractError> {
        let key = QueryKey::staked_amount(owner, self.pool.address);
        self.cache
            .get_or_fetch(key, Some(self.cache_ttl), || async {
                let raw = self.pool.compounded_deposit(self.provider.as_ref(), owner).await?;
                display(raw, BITUSD_DECIMALS, "get_compounded_bitusd_deposit")
            })
            .await
    }

    pub async fn claimable_rewards(&self, owner: Felt) -> Result<ClaimableRewards, ContractError> {
        let key = QueryKey::claimable_rewards(owner, self.pool.address);
        self.cache
            .get_or_fetch(key, Some(self.cache_ttl), || async {
                let gains = self.pool.depositor_gains(self.provider.as_ref(), owner).await?;
                Ok(ClaimableRewards {
                    bitusd: display(gains.yield_gain, BITUSD_DECIMALS, "get_depositor_yield_gain")?,
                    tbtc: display(gains.coll_gain, TBTC_DECIMALS, "get_depositor_coll_gain")?,
                })
            })
            .await
    }

    pub async fn total_deposits(&self) -> Result<f64, ContractError> {
        let raw = self.pool.total_deposits(self.provider.as_ref()).await?;
        display(raw, BITUSD_DECIMALS, "get_total_bitusd_deposits")
    }

    pub async fn stake_view(&self, owner: Felt) -> Result<StakeView, ContractError> {
        let (staked_amount, rewards, total_deposits) = futures::try_join!(
            self.staked_amount(owner),
            self.claimable_rewards(owner),
            self.total_deposits(),
        )?;

        let pool_share_percent = if total_deposits > 0.0 {
            staked_amount / total_deposits * 100.0
        } else {
            0.0
        };
        debug!(owner = %felt_to_hex(&owner), staked_amount, total_deposits, "Stake view loaded");

        Ok(StakeView {
            staked_amount,
            rewards,
            total_deposits,
            pool_share_percent,
        })
    }
}
