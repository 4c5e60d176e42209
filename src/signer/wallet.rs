//! Local-key signer that submits through the configured chain providers

use super::{Signer, TxRequest};
use crate::chain::{ChainProvider, ChainProviders, GasEstimator, GasPrice};
use crate::error::{EngineError, EngineResult, SignerError};

use async_trait::async_trait;
use ethers::signers::{LocalWallet, Signer as _};
use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::{Address, Eip1559TransactionRequest, TransactionRequest, H256, U256};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// Chain used for name-service lookups
const NAME_SERVICE_CHAIN_ID: u64 = 1;

/// Signs with a private key and broadcasts raw transactions
pub struct WalletSigner {
    wallet: LocalWallet,
    providers: Arc<ChainProviders>,
    gas_estimator: GasEstimator,
    send_timeout: Duration,
}

impl WalletSigner {
    pub fn new(wallet: LocalWallet, providers: Arc<ChainProviders>) -> Self {
        info!("Wallet signer initialized with address {:?}", wallet.address());
        Self {
            wallet,
            providers,
            gas_estimator: GasEstimator::default(),
            send_timeout: Duration::from_secs(30),
        }
    }

    /// Load the private key from the named environment variable
    pub fn from_env(var: &str, providers: Arc<ChainProviders>) -> EngineResult<Self> {
        let key = std::env::var(var)
            .map_err(|_| EngineError::Config(format!("Wallet key variable {} is not set", var)))?;
        let wallet = key
            .trim()
            .parse::<LocalWallet>()
            .map_err(|e| EngineError::Config(format!("Invalid private key: {}", e)))?;
        Ok(Self::new(wallet, providers))
    }

    fn build_tx(
        &self,
        tx: &TxRequest,
        nonce: U256,
        gas_price: &GasPrice,
    ) -> TypedTransaction {
        let from = self.wallet.address();
        match gas_price {
            GasPrice::Legacy(price) => TransactionRequest::new()
                .from(from)
                .to(tx.to)
                .data(tx.data.clone())
                .value(tx.value)
                .nonce(nonce)
                .chain_id(tx.chain_id)
                .gas_price(*price)
                .into(),
            GasPrice::Eip1559 {
                max_fee_per_gas,
                max_priority_fee_per_gas,
            } => Eip1559TransactionRequest::new()
                .from(from)
                .to(tx.to)
                .data(tx.data.clone())
                .value(tx.value)
                .nonce(nonce)
                .chain_id(tx.chain_id)
                .max_fee_per_gas(*max_fee_per_gas)
                .max_priority_fee_per_gas(*max_priority_fee_per_gas)
                .into(),
        }
    }

    async fn submit(&self, provider: &ChainProvider, tx: TxRequest) -> EngineResult<H256> {
        let chain_id = tx.chain_id;
        let nonce = provider.get_transaction_count(self.wallet.address()).await?;
        let gas_price = self.gas_estimator.get_gas_price(provider).await?;
        let mut typed = self.build_tx(&tx, nonce, &gas_price);

        let gas_limit = match tx.gas_limit {
            Some(limit) => limit,
            None => self
                .gas_estimator
                .buffered_limit(provider.estimate_gas(&typed).await?),
        };
        typed.set_gas(gas_limit);
        debug!(
            "Signing transaction on chain {} to {:?} (nonce {}, gas {})",
            chain_id, tx.to, nonce, gas_limit
        );

        let wallet = self.wallet.clone().with_chain_id(chain_id);
        let signature = wallet
            .sign_transaction(&typed)
            .await
            .map_err(|e| EngineError::Internal(format!("Failed to sign transaction: {}", e)))?;
        let raw = typed.rlp_signed(&signature);

        match timeout(self.send_timeout, provider.send_raw_transaction(raw)).await {
            Ok(result) => result,
            Err(_) => Err(EngineError::Timeout {
                operation: format!("transaction broadcast on chain {}", chain_id),
            }),
        }
    }
}

#[async_trait]
impl Signer for WalletSigner {
    async fn address(&self) -> Result<Address, SignerError> {
        Ok(self.wallet.address())
    }

    async fn send_transaction(&self, tx: TxRequest) -> Result<H256, SignerError> {
        let chain_id = tx.chain_id;
        let provider = self
            .providers
            .get(chain_id)
            .map_err(|e| SignerError::new(e.to_string()))?;

        match self.submit(&provider, tx).await {
            Ok(tx_hash) => {
                info!("Transaction sent on chain {}: {:?}", chain_id, tx_hash);
                Ok(tx_hash)
            }
            Err(e) => {
                warn!("Transaction on chain {} failed: {}", chain_id, e);
                Err(SignerError::new(e.to_string()))
            }
        }
    }

    async fn resolve_name(&self, name: &str) -> Result<Option<Address>, SignerError> {
        let provider = self
            .providers
            .get(NAME_SERVICE_CHAIN_ID)
            .map_err(|e| SignerError::new(e.to_string()))?;

        match provider.resolve_name(name).await {
            Ok(address) if address != Address::zero() => Ok(Some(address)),
            Ok(_) => Ok(None),
            Err(e) => {
                warn!("Failed to resolve {}: {}", name, e);
                Ok(None)
            }
        }
    }
}
