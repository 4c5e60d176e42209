//! Transfer quotes: cost and time estimates for a cross-chain route

mod cache;
mod manager;

pub use cache::TtlCache;
pub use manager::{QuoteKey, QuoteManager};
pub(crate) use manager::estimate_time;

use chrono::{DateTime, Utc};
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FeeBreakdown {
    /// Destination execution gas
    pub network: f64,
    /// Protocol fee, relayer share included
    pub bridge: f64,
    pub relayer: f64,
}

/// Inclusive range of minutes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeRange {
    pub min_minutes: u64,
    pub max_minutes: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SecurityLevel {
    High,
    Medium,
    Low,
}

/// A way of moving the asset. Only the recommended route is executable.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteOption {
    pub protocol: String,
    pub estimated_time: TimeRange,
    pub cost: f64,
    pub security: SecurityLevel,
    pub recommended: bool,
}

/// Cost and time estimate for a route, replaced rather than mutated
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferQuote {
    pub source_chain: String,
    pub destination_chain: String,
    pub asset: String,
    pub amount: String,
    pub total_fee: f64,
    pub fees: FeeBreakdown,
    pub estimated_time: TimeRange,
    pub estimated_confirmations: u64,
    pub routes: Vec<RouteOption>,
    pub fetched_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl TransferQuote {
    pub fn recommended_route(&self) -> Option<&RouteOption> {
        self.routes.iter().find(|r| r.recommended)
    }

    pub fn is_expired(&self) -> bool {
        Utc::now() >= self.expires_at
    }
}
