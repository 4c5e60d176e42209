//! Chain module - RPC access for the engine's own chain reads and the wallet signer
//!
//! This module provides:
//! - Multi-RPC provider management with automatic failover
//! - Gas price strategies and buffers
//! - ERC20 call encoding and token metadata reads

pub mod erc20;
pub mod gas;
pub mod provider;

pub use gas::GasEstimator;
pub use provider::{ChainProvider, GasPrice};

use crate::chains::ChainRegistry;
use crate::config::Settings;
use crate::error::{EngineError, EngineResult};

use async_trait::async_trait;
use dashmap::DashMap;
use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::{Address, TransactionRequest};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Reads token metadata from chain
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TokenReader: Send + Sync {
    async fn token_decimals(&self, chain_id: u64, token: Address) -> EngineResult<u8>;
}

/// Providers for all configured chains
pub struct ChainProviders {
    /// Chain providers indexed by chain ID
    providers: DashMap<u64, Arc<ChainProvider>>,
    /// Decimals never change, so reads are cached
    decimals: DashMap<(u64, Address), u8>,
}

impl ChainProviders {
    /// Create providers for every enabled chain in the configuration
    pub fn new(settings: &Settings, registry: &ChainRegistry) -> EngineResult<Self> {
        let providers = DashMap::new();

        for (name, chain_config) in settings.enabled_chains() {
            let Some(chain) = registry.by_name(name) else {
                warn!("Skipping chain {} - not in the chain registry", name);
                continue;
            };

            let provider = ChainProvider::new(chain.chain_id, chain_config.clone())?;
            providers.insert(chain.chain_id, Arc::new(provider));
            info!("Chain {} (ID: {}) initialized", name, chain.chain_id);
        }

        Ok(Self {
            providers,
            decimals: DashMap::new(),
        })
    }

    /// Get provider for a specific chain
    pub fn get(&self, chain_id: u64) -> EngineResult<Arc<ChainProvider>> {
        self.providers
            .get(&chain_id)
            .map(|p| p.clone())
            .ok_or_else(|| EngineError::ChainProvider {
                chain_id,
                message: "No RPC provider configured".to_string(),
            })
    }

    /// Health check for all chains
    pub async fn health_check(&self) -> Vec<(u64, bool)> {
        let providers: Vec<_> = self.providers.iter().map(|e| e.value().clone()).collect();
        let mut results = Vec::new();

        for provider in providers {
            let healthy = provider.health_check().await;
            crate::metrics::record_chain_health(provider.chain_id(), healthy);
            results.push((provider.chain_id(), healthy));
        }

        results
    }

    /// Get all connected chain IDs
    pub fn connected_chains(&self) -> Vec<u64> {
        self.providers.iter().map(|e| *e.key()).collect()
    }
}

#[async_trait]
impl TokenReader for ChainProviders {
    async fn token_decimals(&self, chain_id: u64, token: Address) -> EngineResult<u8> {
        if let Some(decimals) = self.decimals.get(&(chain_id, token)) {
            return Ok(*decimals);
        }

        let provider = self.get(chain_id)?;
        let call: TypedTransaction = TransactionRequest::new()
            .to(token)
            .data(erc20::decimals_calldata())
            .into();
        let output = provider.call(&call).await?;
        let decimals = erc20::decode_decimals(chain_id, &output)?;

        debug!("Token {:?} on chain {} has {} decimals", token, chain_id, decimals);
        self.decimals.insert((chain_id, token), decimals);
        Ok(decimals)
    }
}
