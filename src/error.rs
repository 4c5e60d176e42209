//! Error types for the Tesseract bridge engine

use crate::classify::{classify_message, FailureKind};
use thiserror::Error;

/// Main error type for the engine
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Missing parameters: {0}")]
    MissingParameters(String),

    #[error("Invalid intent: {0}")]
    InvalidIntent(String),

    #[error("Chain {chain} is not supported by the bridging protocol")]
    UnsupportedChain { chain: String },

    #[error("Unsupported operation: {0}")]
    UnsupportedOperation(String),

    #[error("No quote available for {route}: {source}")]
    QuoteUnavailable {
        route: String,
        #[source]
        source: ProtocolError,
    },

    #[error("Funding transaction submission failed: {0}")]
    SubmissionFailed(#[source] SignerError),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error(transparent)]
    Signer(#[from] SignerError),

    #[error("Chain provider error for chain {chain_id}: {message}")]
    ChainProvider { chain_id: u64, message: String },

    #[error("Transfer {tx_hash} not found")]
    TransferNotFound { tx_hash: String },

    #[error("Timeout waiting for {operation}")]
    Timeout { operation: String },

    #[error("Internal error: {0}")]
    Internal(String),
}

impl EngineError {
    /// Check if error is retryable
    pub fn is_retryable(&self) -> bool {
        match self {
            EngineError::Protocol(e) => e.is_transient(),
            EngineError::ChainProvider { .. } | EngineError::Timeout { .. } => true,
            _ => false,
        }
    }

    /// Validation errors are surfaced immediately and never retried
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            EngineError::MissingParameters(_)
                | EngineError::InvalidIntent(_)
                | EngineError::UnsupportedChain { .. }
                | EngineError::UnsupportedOperation(_)
        )
    }

    /// Whether the user declined to sign
    pub fn is_cancellation(&self) -> bool {
        match self {
            EngineError::SubmissionFailed(e) | EngineError::Signer(e) => e.is_user_rejection(),
            _ => false,
        }
    }
}

/// Errors reported by the bridging protocol client.
///
/// Cloneable so a single failed fetch can be handed to every waiter of a shared request.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// Network failures, timeouts, 5xx and rate limiting
    #[error("Transient protocol error: {0}")]
    Transient(String),

    #[error("Unsupported route: {0}")]
    UnsupportedRoute(String),

    /// Any other 4xx-equivalent
    #[error("Protocol rejected request: {0}")]
    Rejected(String),

    #[error("Invalid protocol response: {0}")]
    InvalidResponse(String),
}

impl ProtocolError {
    pub fn is_transient(&self) -> bool {
        matches!(self, ProtocolError::Transient(_))
    }
}

/// Error raised by a signer, classified from its message
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct SignerError {
    pub kind: FailureKind,
    pub message: String,
}

impl SignerError {
    pub fn new(message: impl Into<String>) -> Self {
        let message = message.into();
        Self {
            kind: classify_message(&message),
            message,
        }
    }

    pub fn is_user_rejection(&self) -> bool {
        self.kind == FailureKind::UserRejected
    }

    /// Human-readable description for the UI layer
    pub fn user_message(&self) -> &'static str {
        self.kind.user_message()
    }
}

/// Result type for engine operations
pub type EngineResult<T> = Result<T, EngineError>;
