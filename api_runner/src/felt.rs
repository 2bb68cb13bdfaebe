//! Starknet field elements, Cairo u256 encoding and entry point selectors

use ethereum_types::U256;
use sha3::{Digest, Keccak256};
use thiserror::Error;

/// A Starknet field element. Every felt fits in 252 bits, so a U256 carries it.
pub type Felt = U256;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum FeltError {
    #[error("Invalid felt hex string: {0}")]
    InvalidHex(String),

    #[error("Value is not below the field prime: {0}")]
    OutOfField(String),

    #[error("Value does not fit in u128: {0}")]
    Overflow(String),

    #[error("Calldata truncated: expected {expected} felts at offset {offset}, got {available}")]
    Truncated {
        offset: usize,
        expected: usize,
        available: usize,
    },
}

/// Parse a `0x`-prefixed (or bare) hex felt
pub fn parse_felt(s: &str) -> Result<Felt, FeltError> {
    let digits = s.trim().trim_start_matches("0x").trim_start_matches("0X");
    if digits.is_empty() {
        return Ok(Felt::zero());
    }
    if digits.len() > 64 {
        return Err(FeltError::InvalidHex(s.to_string()));
    }
    U256::from_str_radix(digits, 16).map_err(|_| FeltError::InvalidHex(s.to_string()))
}

/// The Starknet field prime, 2^251 + 17 * 2^192 + 1
pub fn field_prime() -> U256 {
    (U256::one() << 251) + (U256::from(17u64) << 192) + U256::one()
}

/// Parse a contract or account address. Unlike [`parse_felt`] the value
/// must be a field element, so anything at or above the prime is rejected.
pub fn parse_address(s: &str) -> Result<Felt, FeltError> {
    let felt = parse_felt(s)?;
    if felt >= field_prime() {
        return Err(FeltError::OutOfField(s.to_string()));
    }
    Ok(felt)
}

/// Render a felt the way the JSON-RPC expects it
pub fn felt_to_hex(felt: &Felt) -> String {
    format!("{:#x}", felt)
}

/// Split a u256 into its Cairo `(low, high)` felts
pub fn u256_to_felts(value: U256) -> [Felt; 2] {
    let low = value & U256::from(u128::MAX);
    let high = value >> 128;
    [low, high]
}

/// Join Cairo `(low, high)` felts back into a u256
pub fn u256_from_felts(low: Felt, high: Felt) -> Result<U256, FeltError> {
    let low = felt_to_u128(low)?;
    let high = felt_to_u128(high)?;
    Ok((U256::from(high) << 128) | U256::from(low))
}

pub fn felt_to_u128(felt: Felt) -> Result<u128, FeltError> {
    if felt > U256::from(u128::MAX) {
        return Err(FeltError::Overflow(felt_to_hex(&felt)));
    }
    Ok(felt.low_u128())
}

/// `starknet_keccak`: keccak-256 of the name, masked to 250 bits
pub fn selector(name: &str) -> Felt {
    let mut digest: [u8; 32] = Keccak256::digest(name.as_bytes()).into();
    digest[0] &= 0x03;
    U256::from_big_endian(&digest)
}

/// Cursor over a felt slice returned by `starknet_call`
pub struct FeltReader<'a> {
    felts: &'a [Felt],
    offset: usize,
}

impl<'a> FeltReader<'a> {
    pub fn new(felts: &'a [Felt]) -> Self {
        Self { felts, offset: 0 }
    }

    fn take(&mut self, count: usize) -> Result<&'a [Felt], FeltError> {
        let available = self.felts.len().saturating_sub(self.offset);
        if available < count {
            return Err(FeltError::Truncated {
                offset: self.offset,
                expected: count,
                available,
            });
        }
        let slice = &self.felts[self.offset..self.offset + count];
        self.offset += count;
        Ok(slice)
    }

    pub fn read_felt(&mut self) -> Result<Felt, FeltError> {
        Ok(self.take(1)?[0])
    }

    pub fn read_u128(&mut self) -> Result<u128, FeltError> {
        felt_to_u128(self.read_felt()?)
    }

    pub fn read_u256(&mut self) -> Result<U256, FeltError> {
        let pair = self.take(2)?;
        u256_from_felts(pair[0], pair[1])
    }

    pub fn read_bool(&mut self) -> Result<bool, FeltError> {
        Ok(!self.read_felt()?.is_zero())
    }

    /// `Array<u256>`: a length felt followed by that many `(low, high)` pairs
    pub fn read_u256_array(&mut self) -> Result<Vec<U256>, FeltError> {
        let len = self.read_u128()? as usize;
        (0..len).map(|_| self.read_u256()).collect()
    }

    pub fn remaining(&self) -> usize {
        self.felts.len().saturating_sub(self.offset)
    }
}
