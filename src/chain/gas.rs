//! Gas limit and price buffers for user transactions

use super::provider::{ChainProvider, GasPrice};
use crate::error::EngineResult;

use ethers::types::U256;
use tracing::debug;

/// Gas estimator for transactions
#[derive(Debug, Clone)]
pub struct GasEstimator {
    /// Buffer percentage for gas limit (e.g., 20 = 20% buffer)
    gas_limit_buffer_percent: u64,
    /// Buffer percentage for gas price
    gas_price_buffer_percent: u64,
}

impl GasEstimator {
    pub fn new(gas_limit_buffer_percent: u64, gas_price_buffer_percent: u64) -> Self {
        Self {
            gas_limit_buffer_percent,
            gas_price_buffer_percent,
        }
    }

    /// Estimated gas limit plus buffer
    pub fn buffered_limit(&self, estimate: U256) -> U256 {
        estimate + estimate * self.gas_limit_buffer_percent / 100
    }

    /// Get buffered gas price for a chain, never above the chain's ceiling
    pub async fn get_gas_price(&self, provider: &ChainProvider) -> EngineResult<GasPrice> {
        let gas_price = provider.get_gas_price().await?;
        let buffered = self.apply_price_buffer(gas_price, provider.max_gas_price());

        debug!("Gas price for chain {}: {:?}", provider.chain_id(), buffered);
        Ok(buffered)
    }

    fn apply_price_buffer(&self, gas_price: GasPrice, ceiling: U256) -> GasPrice {
        match gas_price {
            GasPrice::Legacy(price) => {
                let buffer = price * self.gas_price_buffer_percent / 100;
                GasPrice::Legacy((price + buffer).min(ceiling))
            }
            GasPrice::Eip1559 {
                max_fee_per_gas,
                max_priority_fee_per_gas,
            } => {
                let fee_buffer = max_fee_per_gas * self.gas_price_buffer_percent / 100;
                let priority_buffer =
                    max_priority_fee_per_gas * self.gas_price_buffer_percent / 100;
                let max_fee_per_gas = (max_fee_per_gas + fee_buffer).min(ceiling);
                GasPrice::Eip1559 {
                    max_fee_per_gas,
                    max_priority_fee_per_gas: (max_priority_fee_per_gas + priority_buffer)
                        .min(max_fee_per_gas),
                }
            }
        }
    }
}

impl Default for GasEstimator {
    fn default() -> Self {
        Self::new(20, 10)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gas_limit_buffer() {
        let estimator = GasEstimator::default();
        assert_eq!(estimator.buffered_limit(U256::from(100_000)), U256::from(120_000));
    }

    #[test]
    fn test_price_buffer_respects_ceiling() {
        let estimator = GasEstimator::default();
        let gwei = U256::from(1_000_000_000u64);

        let legacy = estimator.apply_price_buffer(GasPrice::Legacy(gwei * 10), gwei * 500);
        assert_eq!(legacy, GasPrice::Legacy(gwei * 11));

        let capped = estimator.apply_price_buffer(
            GasPrice::Eip1559 {
                max_fee_per_gas: gwei * 100,
                max_priority_fee_per_gas: gwei * 2,
            },
            gwei * 50,
        );
        assert_eq!(
            capped,
            GasPrice::Eip1559 {
                max_fee_per_gas: gwei * 50,
                max_priority_fee_per_gas: gwei * 2 + gwei * 2 / 10,
            }
        );
    }
}
