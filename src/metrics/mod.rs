//! Prometheus metrics for monitoring
//!
//! Exposes metrics for:
//! - Quote fetches, cache hits and protocol retries
//! - Funding submissions and sequence steps
//! - Transfer status transitions, recoveries and active monitor loops
//! - Chain RPC health

use crate::error::{EngineError, EngineResult};
use crate::monitor::TransferStatus;
use crate::sequencer::{StepKind, StepResult};

use axum::{http::StatusCode, routing::get, Router};
use lazy_static::lazy_static;
use prometheus::{
    register_counter_vec, register_gauge_vec, register_histogram_vec, register_int_gauge,
    CounterVec, Encoder, GaugeVec, HistogramVec, IntGauge, TextEncoder,
};
use std::net::SocketAddr;
use tracing::{error, info};

lazy_static! {
    // Quote metrics
    pub static ref QUOTE_FETCHES: CounterVec = register_counter_vec!(
        "tesseract_bridge_quote_fetches_total",
        "Upstream quote fetches by route",
        &["source_chain", "destination_chain"]
    ).unwrap();

    pub static ref QUOTE_LATENCY: HistogramVec = register_histogram_vec!(
        "tesseract_bridge_quote_fetch_seconds",
        "Quote fetch latency including retries",
        &[],
        vec![0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0]
    ).unwrap();

    pub static ref CACHE_HITS: CounterVec = register_counter_vec!(
        "tesseract_bridge_cache_hits_total",
        "Cache hits by cache name",
        &["cache"]
    ).unwrap();

    pub static ref PROTOCOL_RETRIES: CounterVec = register_counter_vec!(
        "tesseract_bridge_protocol_retries_total",
        "Retried protocol calls by operation",
        &["operation"]
    ).unwrap();

    // Transfer metrics
    pub static ref TRANSFERS_SUBMITTED: CounterVec = register_counter_vec!(
        "tesseract_bridge_transfers_submitted_total",
        "Funding transactions submitted",
        &["source_chain", "destination_chain"]
    ).unwrap();

    pub static ref STATUS_TRANSITIONS: CounterVec = register_counter_vec!(
        "tesseract_bridge_status_transitions_total",
        "Accepted transfer status transitions by new status",
        &["status"]
    ).unwrap();

    pub static ref RECOVERIES: CounterVec = register_counter_vec!(
        "tesseract_bridge_recoveries_total",
        "Recovery sub-flow events by outcome",
        &["outcome"]
    ).unwrap();

    pub static ref MONITORS_ACTIVE: IntGauge = register_int_gauge!(
        "tesseract_bridge_monitors_active",
        "Running status and recovery loops"
    ).unwrap();

    // Sequence metrics
    pub static ref SEQUENCE_STEPS: CounterVec = register_counter_vec!(
        "tesseract_bridge_sequence_steps_total",
        "Executed sequence steps by kind and outcome",
        &["kind", "outcome"]
    ).unwrap();

    // Chain metrics
    pub static ref CHAIN_CONNECTED: GaugeVec = register_gauge_vec!(
        "tesseract_bridge_chain_connected",
        "Chain RPC status (1=connected, 0=disconnected)",
        &["chain_id"]
    ).unwrap();
}

/// Prometheus metrics server
pub struct MetricsServer {
    port: u16,
}

impl MetricsServer {
    pub fn new(port: u16) -> Self {
        Self { port }
    }

    pub async fn run(&self) -> EngineResult<()> {
        let app = Router::new().route("/metrics", get(metrics_handler));

        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        info!("Starting metrics server on {}", addr);

        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .map_err(|e| EngineError::Internal(format!("Failed to bind metrics server: {}", e)))?;
        axum::serve(listener, app)
            .await
            .map_err(|e| EngineError::Internal(format!("Metrics server error: {}", e)))?;

        Ok(())
    }
}

async fn metrics_handler() -> Result<String, StatusCode> {
    encode().map_err(|e| {
        error!("Failed to encode metrics: {}", e);
        StatusCode::INTERNAL_SERVER_ERROR
    })
}

/// Text exposition of every registered metric
pub fn encode() -> EngineResult<String> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|e| EngineError::Internal(e.to_string()))?;
    String::from_utf8(buffer).map_err(|e| EngineError::Internal(e.to_string()))
}

// Helper functions to record metrics

pub fn record_quote_fetch(source_chain: &str, destination_chain: &str) {
    QUOTE_FETCHES
        .with_label_values(&[source_chain, destination_chain])
        .inc();
}

pub fn record_quote_latency(latency_secs: f64) {
    QUOTE_LATENCY.with_label_values(&[]).observe(latency_secs);
}

pub fn record_cache_hit(cache: &str) {
    CACHE_HITS.with_label_values(&[cache]).inc();
}

pub fn record_protocol_retry(operation: &str) {
    PROTOCOL_RETRIES.with_label_values(&[operation]).inc();
}

pub fn record_transfer_submitted(source_chain: u64, destination_chain: u64) {
    TRANSFERS_SUBMITTED
        .with_label_values(&[&source_chain.to_string(), &destination_chain.to_string()])
        .inc();
}

pub fn record_status_transition(status: TransferStatus) {
    STATUS_TRANSITIONS
        .with_label_values(&[status.as_str()])
        .inc();
}

pub fn record_recovery(outcome: &str) {
    RECOVERIES.with_label_values(&[outcome]).inc();
}

pub fn record_sequence_step(kind: StepKind, result: &StepResult) {
    let outcome = if result.success {
        "success"
    } else if result.is_rejection() {
        "cancelled"
    } else {
        "failed"
    };
    SEQUENCE_STEPS
        .with_label_values(&[kind.as_str(), outcome])
        .inc();
}

pub fn record_chain_health(chain_id: u64, healthy: bool) {
    CHAIN_CONNECTED
        .with_label_values(&[&chain_id.to_string()])
        .set(if healthy { 1.0 } else { 0.0 });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_includes_recorded_metrics() {
        record_recovery("completed");
        record_status_transition(TransferStatus::Executed);

        let text = encode().unwrap();
        assert!(text.contains("tesseract_bridge_recoveries_total"));
        assert!(text.contains("status=\"executed\""));
    }
}
