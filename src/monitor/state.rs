//! Transfer records and their status state machine

use crate::protocol::{MessageStage, RecoveryStatus};

use chrono::{DateTime, Utc};
use ethers::types::{Address, H256};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Status of a cross-chain transfer
///
/// ```text
/// pending -> approved -> executed
/// pending | approved -> error -> recovering -> executed | failed
/// error -> failed
/// any non-terminal -> unknown
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferStatus {
    Pending,
    Approved,
    Error,
    Recovering,
    Executed,
    Failed,
    Unknown,
}

impl TransferStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TransferStatus::Executed | TransferStatus::Failed | TransferStatus::Unknown
        )
    }

    /// Whether moving to `next` is a forward transition
    pub fn can_transition_to(self, next: TransferStatus) -> bool {
        use TransferStatus::*;
        matches!(
            (self, next),
            (Pending, Approved | Executed | Error | Unknown)
                | (Approved, Executed | Error | Unknown)
                | (Error, Recovering | Failed | Unknown)
                | (Recovering, Executed | Failed | Unknown)
        )
    }

    /// Status implied by a protocol message stage
    pub fn from_stage(stage: MessageStage) -> TransferStatus {
        match stage {
            MessageStage::NotFound
            | MessageStage::Called
            | MessageStage::GasPaid
            | MessageStage::Unknown => TransferStatus::Pending,
            MessageStage::Confirmed | MessageStage::Approved | MessageStage::Executing => {
                TransferStatus::Approved
            }
            MessageStage::Executed => TransferStatus::Executed,
            MessageStage::Error | MessageStage::InsufficientFee => TransferStatus::Error,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TransferStatus::Pending => "pending",
            TransferStatus::Approved => "approved",
            TransferStatus::Error => "error",
            TransferStatus::Recovering => "recovering",
            TransferStatus::Executed => "executed",
            TransferStatus::Failed => "failed",
            TransferStatus::Unknown => "unknown",
        }
    }
}

impl fmt::Display for TransferStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransferStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(TransferStatus::Pending),
            "approved" => Ok(TransferStatus::Approved),
            "error" => Ok(TransferStatus::Error),
            "recovering" => Ok(TransferStatus::Recovering),
            "executed" => Ok(TransferStatus::Executed),
            "failed" => Ok(TransferStatus::Failed),
            "unknown" => Ok(TransferStatus::Unknown),
            other => Err(format!("unknown transfer status: {}", other)),
        }
    }
}

/// Recovery requested for a transfer whose destination leg errored
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecoveryAttempt {
    pub id: Uuid,
    pub parent_tx_hash: H256,
    pub recovery_ref: String,
    pub status: RecoveryStatus,
    pub created_at: DateTime<Utc>,
}

impl RecoveryAttempt {
    pub fn new(parent_tx_hash: H256, recovery_ref: String) -> Self {
        Self {
            id: Uuid::new_v4(),
            parent_tx_hash,
            recovery_ref,
            status: RecoveryStatus::Pending,
            created_at: Utc::now(),
        }
    }
}

/// Inputs for a new transfer record
#[derive(Debug, Clone)]
pub struct NewTransfer {
    pub source_tx_hash: H256,
    pub source_chain: u64,
    pub destination_chain: u64,
    pub asset: String,
    pub amount: String,
    pub deposit_address: Option<Address>,
    pub estimated_minutes: u64,
}

/// A cross-chain transfer being tracked. Never deleted, only marked terminal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferRecord {
    pub id: Uuid,
    pub source_tx_hash: H256,
    pub destination_tx_hash: Option<H256>,
    pub source_chain: u64,
    pub destination_chain: u64,
    pub asset: String,
    pub amount: String,
    pub deposit_address: Option<Address>,
    pub status: TransferStatus,
    pub created_at: DateTime<Utc>,
    pub estimated_completion_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub poll_attempts: u32,
    pub last_error: Option<String>,
    pub recovery: Option<RecoveryAttempt>,
}

impl TransferRecord {
    pub fn new(transfer: NewTransfer) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            source_tx_hash: transfer.source_tx_hash,
            destination_tx_hash: None,
            source_chain: transfer.source_chain,
            destination_chain: transfer.destination_chain,
            asset: transfer.asset,
            amount: transfer.amount,
            deposit_address: transfer.deposit_address,
            status: TransferStatus::Pending,
            created_at: now,
            estimated_completion_at: now
                + chrono::Duration::minutes(transfer.estimated_minutes as i64),
            updated_at: now,
            poll_attempts: 0,
            last_error: None,
            recovery: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

/// Accepted status change, broadcast to engine subscribers
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferUpdate {
    pub tx_hash: H256,
    pub previous: TransferStatus,
    pub status: TransferStatus,
    pub record: TransferRecord,
}
