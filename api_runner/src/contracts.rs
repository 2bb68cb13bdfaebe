//! Typed bindings for the bitUSD protocol contracts.
//!
//! Each handle knows one contract address. Mutating entry points return a
//! [`Call`] ready for a wallet to execute; view entry points run through a
//! [`StarknetProvider`] and decode the returned felts.

use ethereum_types::U256;
use thiserror::Error;

use crate::felt::{u256_to_felts, Felt, FeltError, FeltReader};
use crate::rpc_client::{RpcError, StarknetProvider};
use crate::types::Call;

#[derive(Error, Debug)]
pub enum ContractError {
    #[error(transparent)]
    Rpc(#[from] RpcError),

    #[error("Failed to decode {entry_point} result: {source}")]
    Decode {
        entry_point: &'static str,
        #[source]
        source: FeltError,
    },
}

fn decode_err(entry_point: &'static str) -> impl FnOnce(FeltError) -> ContractError {
    move |source| ContractError::Decode { entry_point, source }
}

/// Calldata builder for Cairo argument types
#[derive(Default)]
struct Calldata(Vec<Felt>);

impl Calldata {
    fn address(mut self, address: Felt) -> Self {
        self.0.push(address);
        self
    }

    fn u256(mut self, value: U256) -> Self {
        self.0.extend(u256_to_felts(value));
        self
    }

    fn bool(mut self, value: bool) -> Self {
        self.0.push(if value { Felt::one() } else { Felt::zero() });
        self
    }

    fn build(self) -> Vec<Felt> {
        self.0
    }
}

/// Deployed addresses of the protocol contracts
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContractAddresses {
    pub tbtc: Felt,
    pub bitusd: Felt,
    pub borrower_operations: Felt,
    pub trove_manager: Felt,
    pub stability_pool: Option<Felt>,
    pub price_feed: Option<Felt>,
}

/// ERC20 token (TBTC collateral or bitUSD)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Erc20 {
    pub address: Felt,
}

impl Erc20 {
    pub fn new(address: Felt) -> Self {
        Self { address }
    }

    pub fn approve(&self, spender: Felt, amount: U256) -> Call {
        let calldata = Calldata::default().address(spender).u256(amount).build();
        Call::new(self.address, "approve", calldata)
    }

    /// Testnet faucet entry point on TBTC
    pub fn mint(&self, recipient: Felt, amount: U256) -> Call {
        let calldata = Calldata::default().address(recipient).u256(amount).build();
        Call::new(self.address, "mint", calldata)
    }

    pub async fn balance_of(
        &self,
        provider: &dyn StarknetProvider,
        account: Felt,
    ) -> Result<U256, ContractError> {
        let call = Call::new(self.address, "balance_of", vec![account]);
        let felts = provider.call(&call).await?;
        FeltReader::new(&felts)
            .read_u256()
            .map_err(decode_err("balance_of"))
    }
}

/// Arguments to `open_trove`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenTroveParams {
    pub owner: Felt,
    pub owner_index: U256,
    pub coll_amount: U256,
    pub bitusd_amount: U256,
    pub upper_hint: U256,
    pub lower_hint: U256,
    pub annual_interest_rate: U256,
    pub max_upfront_fee: U256,
    pub add_manager: Felt,
    pub remove_manager: Felt,
    pub receiver: Felt,
}

impl OpenTroveParams {
    /// No hints, no managers, and an unbounded upfront fee
    pub fn simple(
        owner: Felt,
        owner_index: U256,
        coll_amount: U256,
        bitusd_amount: U256,
        annual_interest_rate: U256,
    ) -> Self {
        Self {
            owner,
            owner_index,
            coll_amount,
            bitusd_amount,
            upper_hint: U256::zero(),
            lower_hint: U256::zero(),
            annual_interest_rate,
            max_upfront_fee: U256::MAX,
            add_manager: Felt::zero(),
            remove_manager: Felt::zero(),
            receiver: Felt::zero(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BorrowerOperations {
    pub address: Felt,
}

impl BorrowerOperations {
    pub fn new(address: Felt) -> Self {
        Self { address }
    }

    pub fn open_trove(&self, params: &OpenTroveParams) -> Call {
        let calldata = Calldata::default()
            .address(params.owner)
            .u256(params.owner_index)
            .u256(params.coll_amount)
            .u256(params.bitusd_amount)
            .u256(params.upper_hint)
            .u256(params.lower_hint)
            .u256(params.annual_interest_rate)
            .u256(params.max_upfront_fee)
            .address(params.add_manager)
            .address(params.remove_manager)
            .address(params.receiver)
            .build();
        Call::new(self.address, "open_trove", calldata)
    }

    pub fn add_coll(&self, trove_id: U256, coll_amount: U256) -> Call {
        let calldata = Calldata::default().u256(trove_id).u256(coll_amount).build();
        Call::new(self.address, "add_coll", calldata)
    }

    pub fn withdraw_coll(&self, trove_id: U256, coll_withdrawal: U256) -> Call {
        let calldata = Calldata::default().u256(trove_id).u256(coll_withdrawal).build();
        Call::new(self.address, "withdraw_coll", calldata)
    }

    pub fn withdraw_bitusd(&self, trove_id: U256, bitusd_amount: U256, max_upfront_fee: U256) -> Call {
        let calldata = Calldata::default()
            .u256(trove_id)
            .u256(bitusd_amount)
            .u256(max_upfront_fee)
            .build();
        Call::new(self.address, "withdraw_bitusd", calldata)
    }

    pub fn repay_bitusd(&self, trove_id: U256, bitusd_amount: U256) -> Call {
        let calldata = Calldata::default().u256(trove_id).u256(bitusd_amount).build();
        Call::new(self.address, "repay_bitusd", calldata)
    }

    pub fn close_trove(&self, trove_id: U256) -> Call {
        Call::new(self.address, "close_trove", Calldata::default().u256(trove_id).build())
    }

    pub fn adjust_trove(
        &self,
        trove_id: U256,
        coll_change: U256,
        is_coll_increase: bool,
        debt_change: U256,
        is_debt_increase: bool,
        max_upfront_fee: U256,
    ) -> Call {
        let calldata = Calldata::default()
            .u256(trove_id)
            .u256(coll_change)
            .bool(is_coll_increase)
            .u256(debt_change)
            .bool(is_debt_increase)
            .u256(max_upfront_fee)
            .build();
        Call::new(self.address, "adjust_trove", calldata)
    }

    pub fn adjust_trove_interest_rate(
        &self,
        trove_id: U256,
        new_annual_interest_rate: U256,
        max_upfront_fee: U256,
    ) -> Call {
        let calldata = Calldata::default()
            .u256(trove_id)
            .u256(new_annual_interest_rate)
            .u256(U256::zero())
            .u256(U256::zero())
            .u256(max_upfront_fee)
            .build();
        Call::new(self.address, "adjust_trove_interest_rate", calldata)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StabilityPool {
    pub address: Felt,
}

/// Rewards a depositor can claim, in raw units
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DepositorGains {
    /// bitUSD from interest
    pub yield_gain: U256,
    /// TBTC from liquidations
    pub coll_gain: U256,
}

impl StabilityPool {
    pub fn new(address: Felt) -> Self {
        Self { address }
    }

    pub fn provide_to_sp(&self, top_up: U256, do_claim: bool) -> Call {
        let calldata = Calldata::default().u256(top_up).bool(do_claim).build();
        Call::new(self.address, "provide_to_sp", calldata)
    }

    pub fn withdraw_from_sp(&self, amount: U256, do_claim: bool) -> Call {
        let calldata = Calldata::default().u256(amount).bool(do_claim).build();
        Call::new(self.address, "withdraw_from_sp", calldata)
    }

    pub fn claim_all_coll_gains(&self) -> Call {
        Call::new(self.address, "claim_all_coll_gains", Vec::new())
    }

    async fn read_depositor_u256(
        &self,
        provider: &dyn StarknetProvider,
        entry_point: &'static str,
        depositor: Felt,
    ) -> Result<U256, ContractError> {
        let felts = provider.call(&Call::new(self.address, entry_point, vec![depositor])).await?;
        FeltReader::new(&felts).read_u256().map_err(decode_err(entry_point))
    }

    pub async fn compounded_deposit(
        &self,
        provider: &dyn StarknetProvider,
        depositor: Felt,
    ) -> Result<U256, ContractError> {
        self.read_depositor_u256(provider, "get_compounded_bitusd_deposit", depositor)
            .await
    }

    pub async fn depositor_gains(
        &self,
        provider: &dyn StarknetProvider,
        depositor: Felt,
    ) -> Result<DepositorGains, ContractError> {
        let (yield_gain, coll_gain) = futures::try_join!(
            self.read_depositor_u256(provider, "get_depositor_yield_gain", depositor),
            self.read_depositor_u256(provider, "get_depositor_coll_gain", depositor),
        )?;
        Ok(DepositorGains { yield_gain, coll_gain })
    }

    pub async fn total_deposits(&self, provider: &dyn StarknetProvider) -> Result<U256, ContractError> {
        let felts = provider
            .call(&Call::new(self.address, "get_total_bitusd_deposits", Vec::new()))
            .await?;
        FeltReader::new(&felts)
            .read_u256()
            .map_err(decode_err("get_total_bitusd_deposits"))
    }
}

/// `LatestTroveData` as returned by the trove manager
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LatestTroveData {
    pub entire_debt: U256,
    pub entire_coll: U256,
    pub redist_bitusd_debt_gain: U256,
    pub redist_coll_gain: U256,
    pub accrued_interest: U256,
    pub recorded_debt: U256,
    pub annual_interest_rate: U256,
    pub weighted_recorded_debt: U256,
    pub accrued_batch_management_fee: U256,
    pub last_interest_rate_adj_time: u64,
}

impl LatestTroveData {
    /// Decode from call output. Fails on truncated output.
    pub fn decode(felts: &[Felt]) -> Result<Self, FeltError> {
        let mut r = FeltReader::new(felts);
        Ok(Self {
            entire_debt: r.read_u256()?,
            entire_coll: r.read_u256()?,
            redist_bitusd_debt_gain: r.read_u256()?,
            redist_coll_gain: r.read_u256()?,
            accrued_interest: r.read_u256()?,
            recorded_debt: r.read_u256()?,
            annual_interest_rate: r.read_u256()?,
            weighted_recorded_debt: r.read_u256()?,
            accrued_batch_management_fee: r.read_u256()?,
            last_interest_rate_adj_time: r.read_u128()? as u64,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TroveManager {
    pub address: Felt,
}

impl TroveManager {
    pub fn new(address: Felt) -> Self {
        Self { address }
    }

    pub async fn get_owner_to_positions(
        &self,
        provider: &dyn StarknetProvider,
        owner: Felt,
    ) -> Result<Vec<U256>, ContractError> {
        let felts = provider
            .call(&Call::new(self.address, "get_owner_to_positions", vec![owner]))
            .await?;
        FeltReader::new(&felts)
            .read_u256_array()
            .map_err(decode_err("get_owner_to_positions"))
    }

    pub async fn get_latest_trove_data(
        &self,
        provider: &dyn StarknetProvider,
        trove_id: U256,
    ) -> Result<LatestTroveData, ContractError> {
        let call = Call::new(self.address, "get_latest_trove_data", u256_to_felts(trove_id).to_vec());
        let felts = provider.call(&call).await?;
        LatestTroveData::decode(&felts).map_err(decode_err("get_latest_trove_data"))
    }
}

/// Protocol price feed; `fetch_price` returns an 18-decimal USD price
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PriceFeedContract {
    pub address: Felt,
}

impl PriceFeedContract {
    pub fn new(address: Felt) -> Self {
        Self { address }
    }

    pub async fn fetch_price(&self, provider: &dyn StarknetProvider) -> Result<U256, ContractError> {
        let felts = provider
            .call(&Call::new(self.address, "fetch_price", Vec::new()))
            .await?;
        FeltReader::new(&felts).read_u256().map_err(decode_err("fetch_price"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::felt::selector;

    #[test]
    fn test_approve_calldata() {
        let token = Erc20::new(Felt::from(0x1234u64));
        let call = token.approve(Felt::from(0xbeefu64), U256::from(10u64));
        assert_eq!(call.to, Felt::from(0x1234u64));
        assert_eq!(call.selector, selector("approve"));
        assert_eq!(
            call.calldata,
            vec![Felt::from(0xbeefu64), Felt::from(10u64), Felt::zero()]
        );
    }

    #[test]
    fn test_open_trove_calldata_layout() {
        let ops = BorrowerOperations::new(Felt::from(1u64));
        let params = OpenTroveParams::simple(
            Felt::from(0xabcu64),
            U256::from(2u64),
            U256::from(3u64),
            U256::from(4u64),
            U256::from(5u64),
        );
        let call = ops.open_trove(&params);

        // owner + 7 u256 (two felts each) + 3 addresses
        assert_eq!(call.calldata.len(), 1 + 7 * 2 + 3);
        assert_eq!(call.calldata[0], Felt::from(0xabcu64));
        assert_eq!(call.calldata[1], Felt::from(2u64));
        assert_eq!(call.calldata[11], Felt::from(5u64));
        // max_upfront_fee is u256::MAX
        assert_eq!(call.calldata[13], Felt::from(u128::MAX));
        assert_eq!(call.calldata[14], Felt::from(u128::MAX));
        assert!(call.calldata[15..].iter().all(|f| f.is_zero()));
    }

    #[test]
    fn test_provide_to_sp_calldata() {
        let pool = StabilityPool::new(Felt::from(7u64));
        let call = pool.provide_to_sp(U256::from(100u64), false);
        assert_eq!(call.entry_point, "provide_to_sp");
        assert_eq!(call.calldata, vec![Felt::from(100u64), Felt::zero(), Felt::zero()]);
    }

    #[test]
    fn test_latest_trove_data_decode() {
        let mut felts = vec![Felt::zero(); 19];
        felts[0] = Felt::from(500u64); // entire_debt.low
        felts[2] = Felt::from(2u64); // entire_coll.low
        felts[12] = Felt::from(7u64); // annual_interest_rate.low
        felts[18] = Felt::from(1_700_000_000u64);

        let data = LatestTroveData::decode(&felts).unwrap();
        assert_eq!(data.entire_debt, U256::from(500u64));
        assert_eq!(data.entire_coll, U256::from(2u64));
        assert_eq!(data.annual_interest_rate, U256::from(7u64));
        assert_eq!(data.last_interest_rate_adj_time, 1_700_000_000);

        assert!(LatestTroveData::decode(&felts[..4]).is_err());
    }
}
