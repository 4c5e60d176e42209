//! Chain provider with multi-RPC support and automatic failover

use crate::config::{ChainConfig, GasPriceStrategy};
use crate::error::{EngineError, EngineResult};

use ethers::prelude::*;
use ethers::providers::{Http, Provider};
use ethers::types::transaction::eip2718::TypedTransaction;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tracing::{debug, error, warn};

/// Multi-provider wrapper with automatic failover
pub struct ChainProvider {
    chain_id: u64,
    /// Chain configuration
    config: ChainConfig,
    /// HTTP providers (multiple for failover)
    http_providers: Vec<Provider<Http>>,
    /// Current active provider index
    current_provider: AtomicUsize,
}

impl ChainProvider {
    /// Create a new chain provider
    pub fn new(chain_id: u64, config: ChainConfig) -> EngineResult<Self> {
        let mut http_providers = Vec::new();

        for url in &config.rpc_urls {
            match Provider::<Http>::try_from(url.as_str()) {
                Ok(provider) => {
                    http_providers.push(provider.interval(Duration::from_millis(100)));
                    debug!("Added HTTP provider for chain {}: {}", chain_id, url);
                }
                Err(e) => {
                    warn!("Failed to create provider for {}: {}", url, e);
                }
            }
        }

        if http_providers.is_empty() {
            return Err(EngineError::ChainProvider {
                chain_id,
                message: "No valid RPC providers".to_string(),
            });
        }

        Ok(Self {
            chain_id,
            config,
            http_providers,
            current_provider: AtomicUsize::new(0),
        })
    }

    /// Get the active HTTP provider
    pub fn http(&self) -> &Provider<Http> {
        let idx = self.current_provider.load(Ordering::Relaxed);
        &self.http_providers[idx % self.http_providers.len()]
    }

    /// Switch to next available provider
    pub fn failover(&self) {
        let current = self.current_provider.load(Ordering::Relaxed);
        let next = (current + 1) % self.http_providers.len();
        self.current_provider.store(next, Ordering::Relaxed);
        warn!("Chain {} failover to provider {}", self.chain_id, next);
    }

    fn provider_error(&self, e: impl std::fmt::Display) -> EngineError {
        EngineError::ChainProvider {
            chain_id: self.chain_id,
            message: e.to_string(),
        }
    }

    /// Get current block number with failover
    pub async fn get_block_number(&self) -> EngineResult<u64> {
        for _ in 0..self.http_providers.len() {
            match self.http().get_block_number().await {
                Ok(block) => return Ok(block.as_u64()),
                Err(e) => {
                    warn!("Failed to get block number from chain {}: {}", self.chain_id, e);
                    self.failover();
                }
            }
        }

        Err(self.provider_error("All providers failed"))
    }

    /// Read-only contract call with failover
    pub async fn call(&self, tx: &TypedTransaction) -> EngineResult<Bytes> {
        let mut last_error = None;
        for _ in 0..self.http_providers.len() {
            match self.http().call(tx, None).await {
                Ok(output) => return Ok(output),
                Err(e) => {
                    warn!("eth_call failed on chain {}: {}", self.chain_id, e);
                    last_error = Some(e.to_string());
                    self.failover();
                }
            }
        }

        Err(self.provider_error(last_error.unwrap_or_else(|| "All providers failed".to_string())))
    }

    /// Pending-state nonce of an account
    pub async fn get_transaction_count(&self, address: Address) -> EngineResult<U256> {
        self.http()
            .get_transaction_count(address, Some(BlockNumber::Pending.into()))
            .await
            .map_err(|e| self.provider_error(e))
    }

    /// Estimate gas for a transaction
    pub async fn estimate_gas(&self, tx: &TypedTransaction) -> EngineResult<U256> {
        self.http()
            .estimate_gas(tx, None)
            .await
            .map_err(|e| self.provider_error(format!("gas estimation failed: {}", e)))
    }

    /// Broadcast a signed transaction; the node's error text is preserved
    pub async fn send_raw_transaction(&self, raw: Bytes) -> EngineResult<H256> {
        let pending = self
            .http()
            .send_raw_transaction(raw)
            .await
            .map_err(|e| self.provider_error(e))?;
        Ok(pending.tx_hash())
    }

    /// Resolve an ENS-style name
    pub async fn resolve_name(&self, name: &str) -> EngineResult<Address> {
        self.http()
            .resolve_name(name)
            .await
            .map_err(|e| self.provider_error(e))
    }

    /// Get current gas price based on chain strategy
    pub async fn get_gas_price(&self) -> EngineResult<GasPrice> {
        match self.config.gas_price_strategy {
            // Arbitrum prices L1 data into the L2 gas price
            GasPriceStrategy::Legacy | GasPriceStrategy::Arbitrum => {
                let price = self
                    .http()
                    .get_gas_price()
                    .await
                    .map_err(|e| self.provider_error(e))?;
                Ok(GasPrice::Legacy(price))
            }
            GasPriceStrategy::Eip1559 | GasPriceStrategy::Optimism => {
                let (max_fee, priority_fee) = self.estimate_eip1559_fees().await?;
                Ok(GasPrice::Eip1559 {
                    max_fee_per_gas: max_fee,
                    max_priority_fee_per_gas: priority_fee,
                })
            }
        }
    }

    /// Estimate EIP-1559 fees
    async fn estimate_eip1559_fees(&self) -> EngineResult<(U256, U256)> {
        let block = self
            .http()
            .get_block(BlockNumber::Latest)
            .await
            .map_err(|e| self.provider_error(e))?
            .ok_or_else(|| self.provider_error("No latest block"))?;

        let base_fee = block
            .base_fee_per_gas
            .ok_or_else(|| self.provider_error("No base fee in block"))?;

        let priority_fee = U256::from(2_000_000_000u64); // 2 gwei

        // Max fee = 2 * base_fee + priority_fee
        let max_fee: U256 = base_fee * 2 + priority_fee;

        Ok((max_fee.min(self.max_gas_price()), priority_fee))
    }

    /// Configured gas price ceiling in wei
    pub fn max_gas_price(&self) -> U256 {
        U256::from(self.config.max_gas_price_gwei) * U256::from(1_000_000_000u64)
    }

    /// Health check
    pub async fn health_check(&self) -> bool {
        match self.get_block_number().await {
            Ok(_) => true,
            Err(e) => {
                error!("Health check failed for chain {}: {}", self.chain_id, e);
                false
            }
        }
    }

    pub fn chain_id(&self) -> u64 {
        self.chain_id
    }
}

/// Gas price types
#[derive(Debug, Clone, PartialEq)]
pub enum GasPrice {
    Legacy(U256),
    Eip1559 {
        max_fee_per_gas: U256,
        max_priority_fee_per_gas: U256,
    },
}
