//! Transfer intents parsed from natural-language commands

mod parser;

pub use parser::{parse, IntentParser};

use ethers::types::Address;
use serde::{Deserialize, Serialize};

/// What the user asked the engine to do
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationKind {
    Swap,
    Bridge,
    Send,
    Balance,
}

/// Who receives the funds on the destination chain
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum Recipient {
    Address(Address),
    /// Name-service name such as `vitalik.eth`, resolved at execution time
    Name(String),
}

/// Structured representation of a parsed user command. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferIntent {
    pub kind: OperationKind,
    pub source_chain_id: Option<u64>,
    pub destination_chain_id: Option<u64>,
    pub source_token: Option<String>,
    pub destination_token: Option<String>,
    /// Decimal string exactly as written by the user
    pub amount: Option<String>,
    /// `None` means the sender receives the funds
    pub recipient: Option<Recipient>,
    pub is_cross_chain: bool,
    pub command: String,
}

impl TransferIntent {
    /// Intent for a command nothing could be extracted from
    pub fn empty(command: &str) -> Self {
        Self {
            kind: OperationKind::Swap,
            source_chain_id: None,
            destination_chain_id: None,
            source_token: None,
            destination_token: None,
            amount: None,
            recipient: None,
            is_cross_chain: false,
            command: command.to_string(),
        }
    }

    /// Asset moved by the transfer
    pub fn asset(&self) -> Option<&str> {
        self.source_token.as_deref()
    }
}
