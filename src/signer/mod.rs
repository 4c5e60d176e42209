//! Signing capability the engine needs from a wallet

mod wallet;

pub use wallet::WalletSigner;

use crate::error::SignerError;

use async_trait::async_trait;
use ethers::types::{Address, Bytes, H256, U256};
use serde::{Deserialize, Serialize};

/// Unsigned transaction handed to a signer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TxRequest {
    pub to: Address,
    #[serde(default)]
    pub data: Bytes,
    #[serde(default)]
    pub value: U256,
    pub chain_id: u64,
    /// Estimated by the signer when absent
    #[serde(default)]
    pub gas_limit: Option<U256>,
}

/// Wallet abstraction: the engine never holds keys itself
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Signer: Send + Sync {
    async fn address(&self) -> Result<Address, SignerError>;

    /// Sign and broadcast, returning the transaction hash
    async fn send_transaction(&self, tx: TxRequest) -> Result<H256, SignerError>;

    /// Resolve a name-service name to an address
    async fn resolve_name(&self, name: &str) -> Result<Option<Address>, SignerError> {
        let _ = name;
        Ok(None)
    }
}
