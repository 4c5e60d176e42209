//! Classification of signer and on-chain error messages
//!
//! Wallet providers do not agree on error codes, so failures are classified by an ordered
//! list of message patterns. The first matching rule wins; user rejection is checked first
//! so that a declined prompt is never reported as a generic failure.

use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Category of a failed signing or on-chain operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    UserRejected,
    InsufficientFunds,
    Nonce,
    GasEstimation,
    Reverted,
    Network,
    Unknown,
}

impl FailureKind {
    pub fn user_message(&self) -> &'static str {
        match self {
            FailureKind::UserRejected => "Transaction was cancelled in the wallet",
            FailureKind::InsufficientFunds => "Insufficient balance to cover amount and gas",
            FailureKind::Nonce => "Wallet nonce is out of sync, please retry",
            FailureKind::GasEstimation => "Transaction is likely to fail: gas estimation failed",
            FailureKind::Reverted => "Transaction reverted on-chain",
            FailureKind::Network => "Network error while submitting the transaction",
            FailureKind::Unknown => "Transaction failed",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::UserRejected => "user_rejected",
            FailureKind::InsufficientFunds => "insufficient_funds",
            FailureKind::Nonce => "nonce",
            FailureKind::GasEstimation => "gas_estimation",
            FailureKind::Reverted => "reverted",
            FailureKind::Network => "network",
            FailureKind::Unknown => "unknown",
        }
    }
}

lazy_static! {
    static ref RULES: Vec<(Regex, FailureKind)> = vec![
        (
            Regex::new(
                r"(?i)user (rejected|denied|cancell?ed)|rejected by (the )?user|request rejected|denied transaction signature|action_rejected|\b4001\b|cancell?ed by user|user canceled|signature request (was )?(rejected|cancell?ed)"
            )
            .unwrap(),
            FailureKind::UserRejected,
        ),
        (
            Regex::new(r"(?i)insufficient (funds|balance)|exceeds balance").unwrap(),
            FailureKind::InsufficientFunds,
        ),
        (
            Regex::new(r"(?i)nonce (too low|too high|has already been used)|replacement transaction underpriced|invalid nonce").unwrap(),
            FailureKind::Nonce,
        ),
        (
            Regex::new(r"(?i)gas required exceeds|cannot estimate gas|gas estimation failed|unpredictable_gas_limit|out of gas|intrinsic gas too low").unwrap(),
            FailureKind::GasEstimation,
        ),
        (
            Regex::new(r"(?i)execution reverted|revert|call_exception").unwrap(),
            FailureKind::Reverted,
        ),
        (
            Regex::new(r"(?i)timeout|timed out|network|connection|econnrefused|rate limit|503|502").unwrap(),
            FailureKind::Network,
        ),
    ];
}

/// Classify an error message; unmatched messages are `Unknown`
pub fn classify_message(message: &str) -> FailureKind {
    RULES
        .iter()
        .find(|(pattern, _)| pattern.is_match(message))
        .map(|(_, kind)| *kind)
        .unwrap_or(FailureKind::Unknown)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejection_phrases_across_wallets() {
        for msg in [
            "MetaMask Tx Signature: User denied transaction signature.",
            "User rejected the request.",
            "ACTION_REJECTED",
            "code=4001, message=rejected",
            "Request rejected",
            "The user canceled the signature request",
        ] {
            assert_eq!(classify_message(msg), FailureKind::UserRejected, "{}", msg);
        }
    }

    #[test]
    fn test_rejection_wins_over_later_rules() {
        // mentions both a network condition and a user rejection
        let msg = "network request failed: user rejected transaction";
        assert_eq!(classify_message(msg), FailureKind::UserRejected);
    }

    #[test]
    fn test_on_chain_categories() {
        assert_eq!(
            classify_message("insufficient funds for gas * price + value"),
            FailureKind::InsufficientFunds
        );
        assert_eq!(classify_message("nonce too low"), FailureKind::Nonce);
        assert_eq!(
            classify_message("gas required exceeds allowance (30000000)"),
            FailureKind::GasEstimation
        );
        assert_eq!(
            classify_message("execution reverted: STF"),
            FailureKind::Reverted
        );
        assert_eq!(classify_message("request timed out"), FailureKind::Network);
        assert_eq!(classify_message("something odd"), FailureKind::Unknown);
    }
}
