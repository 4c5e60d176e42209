//! Quote manager: prices routes through the bridging protocol and caches the result

use super::{FeeBreakdown, RouteOption, SecurityLevel, TimeRange, TransferQuote, TtlCache};
use crate::chains::{ChainInfo, ChainRegistry};
use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult, ProtocolError};
use crate::protocol::{BridgeProtocol, RouteRequest};
use crate::retry::RetryPolicy;

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Floor of the quoted time range, in minutes
const MIN_TRANSFER_MINUTES: u64 = 5;

// Informational alternatives: (protocol, cost multiplier, time multiplier, security)
const ALTERNATIVE_ROUTES: &[(&str, f64, f64, SecurityLevel)] = &[
    ("LayerZero", 0.85, 0.6, SecurityLevel::Medium),
    ("Wormhole", 1.1, 1.2, SecurityLevel::High),
    ("Canonical bridge", 0.5, 6.0, SecurityLevel::High),
];

/// Cache key: chains, upper-cased asset and amount rounded to 6 decimals
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QuoteKey {
    pub source_chain: u64,
    pub destination_chain: u64,
    pub asset: String,
    pub amount: String,
}

impl QuoteKey {
    pub fn new(source_chain: u64, destination_chain: u64, asset: &str, amount: f64) -> Self {
        Self {
            source_chain,
            destination_chain,
            asset: asset.trim().to_ascii_uppercase(),
            amount: format!("{:.6}", amount),
        }
    }
}

pub struct QuoteManager {
    protocol: Arc<dyn BridgeProtocol>,
    registry: Arc<ChainRegistry>,
    retry: RetryPolicy,
    protocol_name: String,
    cache: TtlCache<QuoteKey, TransferQuote>,
}

impl QuoteManager {
    pub fn new(
        protocol: Arc<dyn BridgeProtocol>,
        registry: Arc<ChainRegistry>,
        config: &EngineConfig,
        protocol_name: impl Into<String>,
    ) -> Self {
        Self {
            protocol,
            registry,
            retry: RetryPolicy::from(&config.quote_retry),
            protocol_name: protocol_name.into(),
            cache: TtlCache::new("quote", config.quote_ttl(), config.quote_cache_capacity),
        }
    }

    /// Quote for moving `amount` of `asset` between two chains.
    ///
    /// Served from cache while fresh; concurrent identical requests share one fetch.
    pub async fn get_quote(
        &self,
        source_chain: u64,
        destination_chain: u64,
        asset: &str,
        amount: &str,
    ) -> EngineResult<Arc<TransferQuote>> {
        let source = self.chain(source_chain)?;
        let destination = self.chain(destination_chain)?;
        if source_chain == destination_chain {
            return Err(EngineError::InvalidIntent(format!(
                "Source and destination are both {}",
                source.name
            )));
        }

        let value = parse_amount(amount)?;
        let key = QuoteKey::new(source_chain, destination_chain, asset, value);
        let route_label = format!("{} -> {} ({})", source.name, destination.name, key.asset);

        let request = QuoteRequest {
            route: RouteRequest {
                source_chain: source.protocol_name.clone(),
                destination_chain: destination.protocol_name.clone(),
                asset: key.asset.clone(),
                amount: key.amount.clone(),
            },
            source: source.clone(),
            destination: destination.clone(),
            protocol_name: self.protocol_name.clone(),
            ttl: self.cache.ttl(),
        };
        let protocol = self.protocol.clone();
        let retry = self.retry.clone();

        self.cache
            .get_or_fetch(key, move || fetch_quote(protocol, retry, request))
            .await
            .map_err(|source| {
                warn!("Quote unavailable for {}: {}", route_label, source);
                EngineError::QuoteUnavailable {
                    route: route_label,
                    source,
                }
            })
    }

    pub async fn invalidate(&self, key: &QuoteKey) {
        self.cache.invalidate(key).await;
    }

    pub async fn purge_expired(&self) -> usize {
        let purged = self.cache.purge_expired().await;
        if purged > 0 {
            debug!("Purged {} expired quotes", purged);
        }
        purged
    }

    fn chain(&self, chain_id: u64) -> EngineResult<&ChainInfo> {
        self.registry
            .by_id(chain_id)
            .ok_or_else(|| EngineError::UnsupportedChain {
                chain: chain_id.to_string(),
            })
    }
}

struct QuoteRequest {
    route: RouteRequest,
    source: ChainInfo,
    destination: ChainInfo,
    protocol_name: String,
    ttl: Duration,
}

async fn fetch_quote(
    protocol: Arc<dyn BridgeProtocol>,
    retry: RetryPolicy,
    request: QuoteRequest,
) -> Result<TransferQuote, ProtocolError> {
    let route = &request.route;
    info!(
        "Fetching quote for {} {} from {} to {}",
        route.amount, route.asset, route.source_chain, route.destination_chain
    );
    crate::metrics::record_quote_fetch(&request.source.name, &request.destination.name);
    let started = std::time::Instant::now();

    let fee = retry
        .run("transfer_fee", || protocol.transfer_fee(route))
        .await?;
    let gas = retry
        .run("estimate_gas_fee", || protocol.estimate_gas_fee(route))
        .await?;
    crate::metrics::record_quote_latency(started.elapsed().as_secs_f64());

    Ok(build_quote(&request, fee.bridge_fee, fee.relayer_fee, gas))
}

fn build_quote(request: &QuoteRequest, bridge_fee: f64, relayer_fee: f64, gas_fee: f64) -> TransferQuote {
    let total_fee = gas_fee + bridge_fee;
    let estimated_time = estimate_time(&request.source, &request.destination);

    let mut routes = vec![RouteOption {
        protocol: request.protocol_name.clone(),
        estimated_time,
        cost: total_fee,
        security: SecurityLevel::High,
        recommended: true,
    }];
    routes.extend(
        ALTERNATIVE_ROUTES
            .iter()
            .map(|(protocol, cost, time, security)| RouteOption {
                protocol: protocol.to_string(),
                estimated_time: TimeRange {
                    min_minutes: scale_minutes(estimated_time.min_minutes, *time),
                    max_minutes: scale_minutes(estimated_time.max_minutes, *time),
                },
                cost: total_fee * cost,
                security: *security,
                recommended: false,
            }),
    );

    let fetched_at = Utc::now();
    let ttl = chrono::Duration::from_std(request.ttl).unwrap_or_else(|_| chrono::Duration::seconds(30));

    TransferQuote {
        source_chain: request.source.name.clone(),
        destination_chain: request.destination.name.clone(),
        asset: request.route.asset.clone(),
        amount: request.route.amount.clone(),
        total_fee,
        fees: FeeBreakdown {
            network: gas_fee,
            bridge: bridge_fee,
            relayer: relayer_fee,
        },
        estimated_time,
        estimated_confirmations: request.source.recommended_confirmations(),
        routes,
        fetched_at,
        expires_at: fetched_at + ttl,
    }
}

/// Minutes until the destination leg settles: `[max(5, src), src + dst]`
pub(crate) fn estimate_time(source: &ChainInfo, destination: &ChainInfo) -> TimeRange {
    let min_minutes = source.base_latency_minutes.max(MIN_TRANSFER_MINUTES);
    let max_minutes = (source.base_latency_minutes + destination.base_latency_minutes).max(min_minutes);
    TimeRange {
        min_minutes,
        max_minutes,
    }
}

fn scale_minutes(minutes: u64, factor: f64) -> u64 {
    ((minutes as f64 * factor).round() as u64).max(1)
}

fn parse_amount(amount: &str) -> EngineResult<f64> {
    amount
        .trim()
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite() && *v > 0.0)
        .ok_or_else(|| EngineError::InvalidIntent(format!("Invalid amount: {}", amount)))
}
