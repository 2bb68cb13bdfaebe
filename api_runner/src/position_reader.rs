//! Reads an owner's troves from the trove manager and derives the
//! display fields for each one.

use std::cmp::Ordering;
use std::sync::Arc;
use std::time::Duration;

use collateral_math::{units, HealthBand, Prices, TroveMetrics, BITUSD_DECIMALS, TBTC_DECIMALS};
use ethereum_types::U256;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::contracts::{ContractError, LatestTroveData, TroveManager};
use crate::felt::{felt_to_hex, felt_to_u128, parse_felt, Felt};
use crate::price_feed::PriceService;
use crate::query_cache::{QueryCache, QueryKey};
use crate::rpc_client::StarknetProvider;
use crate::types::{Position, PositionTotals};

pub const COLLATERAL_SYMBOL: &str = "TBTC";
pub const BORROWED_SYMBOL: &str = "bitUSD";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SortKey {
    CollateralAmount,
    CollateralValue,
    BorrowedAmount,
    HealthFactor,
    LiquidationPrice,
    DebtLimit,
    InterestRate,
    AmountBorrowable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

impl SortKey {
    fn value(&self, p: &Position) -> f64 {
        match self {
            SortKey::CollateralAmount => p.collateral_amount,
            SortKey::CollateralValue => p.collateral_value,
            SortKey::BorrowedAmount => p.borrowed_amount,
            SortKey::HealthFactor => p.health_factor,
            SortKey::LiquidationPrice => p.liquidation_price,
            SortKey::DebtLimit => p.debt_limit,
            SortKey::InterestRate => p.interest_rate,
            SortKey::AmountBorrowable => p.amount_borrowable(),
        }
    }
}

pub fn sort_positions(positions: &mut [Position], key: SortKey, direction: SortDirection) {
    positions.sort_by(|a, b| {
        let ord = key
            .value(a)
            .partial_cmp(&key.value(b))
            .unwrap_or(Ordering::Equal);
        match direction {
            SortDirection::Asc => ord,
            SortDirection::Desc => ord.reverse(),
        }
    });
}

/// Positions plus their aggregates, as served over HTTP
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionsView {
    pub positions: Vec<Position>,
    pub totals: PositionTotals,
}

/// Build the display view of one trove.
/// `None` when the raw amounts do not fit the display conversion.
pub fn position_from_trove(id: U256, data: &LatestTroveData, prices: Prices) -> Option<Position> {
    let coll = felt_to_u128(data.entire_coll).ok()?;
    let debt = felt_to_u128(data.entire_debt).ok()?;
    let rate = felt_to_u128(data.annual_interest_rate).ok()?;

    let collateral_amount = units::to_display(coll, TBTC_DECIMALS);
    let borrowed_amount = units::to_display(debt, BITUSD_DECIMALS);
    let metrics = TroveMetrics::compute(collateral_amount, borrowed_amount, prices);

    Some(Position {
        id: id.to_string(),
        collateral_asset: COLLATERAL_SYMBOL.to_string(),
        collateral_amount,
        collateral_value: metrics.collateral_value,
        borrowed_asset: BORROWED_SYMBOL.to_string(),
        borrowed_amount,
        health_factor: metrics.health_factor,
        health_status: HealthBand::from_factor(metrics.health_factor),
        liquidation_price: metrics.liquidation_price,
        debt_limit: metrics.debt_limit,
        interest_rate: units::interest_rate_percent(rate),
    })
}

pub struct PositionReader {
    provider: Arc<dyn StarknetProvider>,
    trove_manager: TroveManager,
    prices: Arc<PriceService>,
    cache: QueryCache,
    cache_ttl: Duration,
}

impl PositionReader {
    pub fn new(
        provider: Arc<dyn StarknetProvider>,
        trove_manager: Felt,
        prices: Arc<PriceService>,
        cache: QueryCache,
        cache_ttl: Duration,
    ) -> Self {
        Self {
            provider,
            trove_manager: TroveManager::new(trove_manager),
            prices,
            cache,
            cache_ttl,
        }
    }

    /// Trove ids owned by `owner`, cached per (owner, trove manager)
    pub async fn owner_positions(&self, owner: Felt) -> Result<Vec<U256>, ContractError> {
        let key = QueryKey::owner_positions(owner, self.trove_manager.address);
        let ids: Vec<String> = self
            .cache
            .get_or_fetch(key, Some(self.cache_ttl), || async {
                let ids = self
                    .trove_manager
                    .get_owner_to_positions(self.provider.as_ref(), owner)
                    .await?;
                Ok::<_, ContractError>(ids.iter().map(felt_to_hex).collect())
            })
            .await?;

        ids.iter()
            .map(|id| parse_felt(id))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|source| ContractError::Decode {
                entry_point: "get_owner_to_positions",
                source,
            })
    }

    /// Index for the owner's next trove: the count of existing ones.
    /// A failed lookup counts as no positions.
    pub async fn owner_index(&self, owner: Felt) -> U256 {
        match self.owner_positions(owner).await {
            Ok(ids) => U256::from(ids.len()),
            Err(e) => {
                warn!(owner = %felt_to_hex(&owner), error = %e, "Error fetching owner positions");
                U256::zero()
            }
        }
    }

    /// All readable troves of `owner`, valued at one BTC price
    pub async fn fetch_positions(&self, owner: Felt) -> anyhow::Result<Vec<Position>> {
        let address = felt_to_hex(&owner);
        info!(owner = %address, "Fetching owner positions");

        let ids = self.owner_positions(owner).await?;
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let prices = self.prices.prices().await?;
        let provider = self.provider.as_ref();

        let reads = ids.iter().map(|id| async move {
            let result = self.trove_manager.get_latest_trove_data(provider, *id).await;
            (*id, result)
        });

        let positions: Vec<Position> = join_all(reads)
            .await
            .into_iter()
            .filter_map(|(id, result)| match result {
                Ok(data) => {
                    let position = position_from_trove(id, &data, prices);
                    if position.is_none() {
                        warn!(trove_id = %id, "Trove amounts out of range, skipping");
                    }
                    position
                }
                Err(e) => {
                    warn!(trove_id = %id, error = %e, "Incomplete trove data, skipping");
                    None
                }
            })
            .collect();

        debug!(owner = %address, found = ids.len(), kept = positions.len(), "Positions loaded");
        Ok(positions)
    }

    /// Positions with totals, cached per owner
    pub async fn positions_view(&self, owner: Felt) -> anyhow::Result<PositionsView> {
        let key = QueryKey::user_positions(owner);
        self.cache
            .get_or_fetch(key, Some(self.cache_ttl), || async {
                let positions = self.fetch_positions(owner).await?;
                let totals = PositionTotals::from_positions(&positions);
                Ok(PositionsView { positions, totals })
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn position(id: &str, borrowed: f64, health: f64, debt_limit: f64) -> Position {
        Position {
            id: id.to_string(),
            collateral_asset: COLLATERAL_SYMBOL.to_string(),
            collateral_amount: 1.0,
            collateral_value: 60_000.0,
            borrowed_asset: BORROWED_SYMBOL.to_string(),
            borrowed_amount: borrowed,
            health_factor: health,
            health_status: HealthBand::from_factor(health),
            liquidation_price: 0.0,
            debt_limit,
            interest_rate: 5.0,
        }
    }

    #[test]
    fn test_position_from_trove() {
        let data = LatestTroveData {
            entire_debt: U256::from(100u64) * U256::exp10(18),
            entire_coll: U256::from(2u64) * U256::exp10(18),
            redist_bitusd_debt_gain: U256::zero(),
            redist_coll_gain: U256::zero(),
            accrued_interest: U256::zero(),
            recorded_debt: U256::zero(),
            annual_interest_rate: U256::from(5u64) * U256::exp10(16),
            weighted_recorded_debt: U256::zero(),
            accrued_batch_management_fee: U256::zero(),
            last_interest_rate_adj_time: 0,
        };

        let p = position_from_trove(U256::from(42u64), &data, Prices::new(60_000.0, 1.0)).unwrap();
        assert_eq!(p.id, "42");
        assert_eq!(p.collateral_amount, 2.0);
        assert_eq!(p.borrowed_amount, 100.0);
        assert_eq!(p.collateral_value, 120_000.0);
        assert!((p.liquidation_price - 55.0).abs() < 1e-9);
        assert!((p.debt_limit - 80_000.0).abs() < 1e-6);
        assert!((p.interest_rate - 5.0).abs() < 1e-12);
        // 120000 / (100 * 1.1)
        assert_eq!(p.health_status, HealthBand::Excellent);
    }

    #[test]
    fn test_sort_positions() {
        let mut positions = vec![
            position("a", 500.0, 3.0, 1_000.0),
            position("b", 100.0, f64::INFINITY, 2_000.0),
            position("c", 900.0, 1.2, 950.0),
        ];

        sort_positions(&mut positions, SortKey::BorrowedAmount, SortDirection::Desc);
        assert_eq!(positions.iter().map(|p| p.id.as_str()).collect::<Vec<_>>(), ["c", "a", "b"]);

        sort_positions(&mut positions, SortKey::HealthFactor, SortDirection::Asc);
        assert_eq!(positions[2].id, "b");

        // borrowable: a=500, b=1900, c=50
        sort_positions(&mut positions, SortKey::AmountBorrowable, SortDirection::Asc);
        assert_eq!(positions.iter().map(|p| p.id.as_str()).collect::<Vec<_>>(), ["c", "a", "b"]);
    }

    #[test]
    fn test_totals() {
        let positions = vec![position("a", 100.0, 2.0, 400.0), position("b", 300.0, 2.0, 200.0)];
        let totals = PositionTotals::from_positions(&positions);
        assert_eq!(totals.borrowed_amount, 400.0);
        assert_eq!(totals.collateral_value, 120_000.0);
        // b is over its limit and contributes nothing
        assert_eq!(totals.amount_borrowable, 300.0);
        assert_eq!(totals.weighted_average_interest, 5.0);
    }
}
