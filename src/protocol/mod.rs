//! Bridging protocol client abstraction
//!
//! The engine talks to the message-passing network through [`BridgeProtocol`]. Chains are
//! identified by the protocol's own chain names (see [`crate::chains::ChainInfo::protocol_name`]).

pub(crate) mod http;

pub use http::HttpProtocolClient;

use crate::error::ProtocolError;

use async_trait::async_trait;
use ethers::types::{Address, H256};
use serde::{Deserialize, Serialize};

/// A priced route between two chains
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteRequest {
    pub source_chain: String,
    pub destination_chain: String,
    pub asset: String,
    pub amount: String,
}

/// Fee charged by the protocol for moving an asset, in asset units
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferFee {
    /// Full protocol fee, relayer share included
    pub bridge_fee: f64,
    #[serde(default)]
    pub relayer_fee: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DepositAddressRequest {
    pub source_chain: String,
    pub destination_chain: String,
    pub recipient: Address,
    pub asset: String,
}

/// Stage of a cross-chain message as reported by the protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageStage {
    NotFound,
    Called,
    GasPaid,
    Confirmed,
    Approved,
    Executing,
    Executed,
    Error,
    InsufficientFee,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageStatus {
    pub stage: MessageStage,
    #[serde(default)]
    pub destination_tx_hash: Option<H256>,
    #[serde(default)]
    pub error: Option<String>,
}

impl MessageStatus {
    pub fn not_found() -> Self {
        Self {
            stage: MessageStage::NotFound,
            destination_tx_hash: None,
            error: None,
        }
    }
}

/// Protocol answer to a recovery request
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecoveryTicket {
    pub accepted: bool,
    #[serde(default)]
    pub recovery_ref: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecoveryStatus {
    Pending,
    Completed,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecoveryProgress {
    pub status: RecoveryStatus,
    #[serde(default)]
    pub destination_tx_hash: Option<H256>,
    #[serde(default)]
    pub message: Option<String>,
}

/// Operations the engine needs from the bridging protocol
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait BridgeProtocol: Send + Sync {
    /// Protocol fee for moving `amount` of `asset` along the route
    async fn transfer_fee(&self, route: &RouteRequest) -> Result<TransferFee, ProtocolError>;

    /// Destination execution gas, denominated in the transferred asset
    async fn estimate_gas_fee(&self, route: &RouteRequest) -> Result<f64, ProtocolError>;

    /// One-time address on the source chain that forwards funds to the recipient
    async fn deposit_address(
        &self,
        request: &DepositAddressRequest,
    ) -> Result<Address, ProtocolError>;

    async fn transaction_status(&self, tx_hash: H256) -> Result<MessageStatus, ProtocolError>;

    async fn is_chain_active(&self, chain: &str) -> Result<bool, ProtocolError>;

    /// Ask the protocol to re-execute a stuck or errored message
    async fn recover(
        &self,
        tx_hash: H256,
        source_chain: &str,
        destination_chain: &str,
    ) -> Result<RecoveryTicket, ProtocolError>;

    async fn recovery_status(&self, recovery_ref: &str) -> Result<RecoveryProgress, ProtocolError>;
}
