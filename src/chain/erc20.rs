//! ERC20 call encoding

use crate::error::{EngineError, EngineResult};

use alloy_sol_types::{sol, SolCall};
use ethers::types::{Address, Bytes, U256};

sol! {
    interface IERC20 {
        function decimals() external view returns (uint8);
        function transfer(address to, uint256 amount) external returns (bool);
        function approve(address spender, uint256 amount) external returns (bool);
        function transferFrom(address from, address to, uint256 amount) external returns (bool);
    }
}

pub(crate) fn to_alloy_address(address: Address) -> alloy_primitives::Address {
    alloy_primitives::Address::from(address.0)
}

pub(crate) fn to_alloy_u256(value: U256) -> alloy_primitives::U256 {
    let mut bytes = [0u8; 32];
    value.to_big_endian(&mut bytes);
    alloy_primitives::U256::from_be_bytes(bytes)
}

/// Calldata for `transfer(to, amount)`
pub fn transfer_calldata(to: Address, amount: U256) -> Bytes {
    let call = IERC20::transferCall {
        to: to_alloy_address(to),
        amount: to_alloy_u256(amount),
    };
    Bytes::from(call.abi_encode())
}

/// Calldata for `decimals()`
pub fn decimals_calldata() -> Bytes {
    Bytes::from(IERC20::decimalsCall {}.abi_encode())
}

pub fn decode_decimals(chain_id: u64, output: &[u8]) -> EngineResult<u8> {
    IERC20::decimalsCall::abi_decode_returns(output, true)
        .map(|ret| ret._0)
        .map_err(|e| EngineError::ChainProvider {
            chain_id,
            message: format!("Invalid decimals() response: {}", e),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transfer_calldata_layout() {
        let to = Address::repeat_byte(0x11);
        let data = transfer_calldata(to, U256::from(1_000_000u64));

        assert_eq!(&data[..4], &[0xa9, 0x05, 0x9c, 0xbb]);
        assert_eq!(data.len(), 4 + 32 * 2);
        assert_eq!(&data[16..36], to.as_bytes());
        assert_eq!(U256::from_big_endian(&data[36..68]), U256::from(1_000_000u64));
    }

    #[test]
    fn test_decode_decimals() {
        let mut word = [0u8; 32];
        word[31] = 6;
        assert_eq!(decode_decimals(1, &word).unwrap(), 6);
        assert!(decode_decimals(1, &[]).is_err());
    }
}
