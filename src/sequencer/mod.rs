//! Multi-step transaction sequencer
//!
//! Steps run strictly in input order, one at a time, with a fixed delay between them so the
//! wallet sees nonces in order. The first failure halts the sequence. Steps already mined are
//! reported as completed and never rolled back. A signer rejection ends the sequence as
//! cancelled rather than failed.

mod selector;
mod step_service;

pub use selector::{function_name, StepKind};
pub use step_service::{
    HttpStepService, StepContinuation, StepReport, StepService, StepTransaction,
};
#[cfg(test)]
pub use step_service::MockStepService;

use crate::classify::FailureKind;
use crate::config::EngineConfig;
use crate::progress::ProgressReporter;
use crate::signer::{Signer, TxRequest};

use ethers::types::{Address, Bytes, H256, U256};
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, info, warn};

/// One on-chain call of a sequence
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionStep {
    pub to: Address,
    pub data: Bytes,
    pub value: U256,
    pub gas_limit: Option<U256>,
    pub chain_id: u64,
    pub kind: StepKind,
}

impl TransactionStep {
    /// Step with its kind detected from the calldata
    pub fn new(to: Address, data: Bytes, value: U256, chain_id: u64) -> Self {
        let kind = StepKind::from_calldata(&data);
        Self {
            to,
            data,
            value,
            gas_limit: None,
            chain_id,
            kind,
        }
    }

    fn to_request(&self) -> TxRequest {
        TxRequest {
            to: self.to,
            data: self.data.clone(),
            value: self.value,
            chain_id: self.chain_id,
            gas_limit: self.gas_limit,
        }
    }
}

impl From<TxRequest> for TransactionStep {
    fn from(tx: TxRequest) -> Self {
        let mut step = TransactionStep::new(tx.to, tx.data, tx.value, tx.chain_id);
        step.gas_limit = tx.gas_limit;
        step
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StepResult {
    pub index: usize,
    pub kind: StepKind,
    pub success: bool,
    pub tx_hash: Option<H256>,
    pub error: Option<String>,
    pub failure: Option<FailureKind>,
}

impl StepResult {
    pub fn is_rejection(&self) -> bool {
        self.failure == Some(FailureKind::UserRejected)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SequenceResult {
    pub success: bool,
    /// The user declined a signature; distinct from a failed step
    pub cancelled: bool,
    pub completed_steps: usize,
    pub total_steps: usize,
    pub step_results: Vec<StepResult>,
    /// Hash of the last successful step
    pub final_hash: Option<H256>,
    pub error: Option<String>,
}

impl SequenceResult {
    fn from_results(total_steps: usize, step_results: Vec<StepResult>) -> Self {
        let completed_steps = step_results.iter().filter(|r| r.success).count();
        let failed = step_results.iter().find(|r| !r.success);
        let final_hash = step_results
            .iter()
            .rev()
            .find(|r| r.success)
            .and_then(|r| r.tx_hash);

        Self {
            success: failed.is_none() && completed_steps == total_steps,
            cancelled: failed.map(|r| r.is_rejection()).unwrap_or(false),
            error: failed.and_then(|r| r.error.clone()),
            completed_steps,
            total_steps,
            step_results,
            final_hash,
        }
    }
}

/// Callbacks invoked around each step
pub trait SequenceObserver: Send + Sync {
    fn on_step_start(&self, _index: usize, _step: &TransactionStep) {}

    fn on_step_complete(&self, _result: &StepResult) {}
}

/// Observer that ignores everything
pub struct NoopObserver;

impl SequenceObserver for NoopObserver {}

/// Maps step completion onto a progress range
pub struct StepProgress {
    reporter: ProgressReporter,
    total: usize,
}

impl StepProgress {
    pub fn new(reporter: ProgressReporter, total: usize) -> Self {
        Self { reporter, total }
    }
}

impl SequenceObserver for StepProgress {
    fn on_step_start(&self, index: usize, step: &TransactionStep) {
        let percent = (index * 100 / self.total.max(1)) as u8;
        self.reporter
            .report(percent, &format!("Signing {} step {}/{}", step.kind, index + 1, self.total));
    }

    fn on_step_complete(&self, result: &StepResult) {
        if result.success {
            let percent = ((result.index + 1) * 100 / self.total.max(1)) as u8;
            self.reporter
                .report(percent, &format!("Step {}/{} confirmed", result.index + 1, self.total));
        }
    }
}

/// Who a server-driven chain runs for
#[derive(Debug, Clone)]
pub struct StepContext {
    pub agent_kind: String,
    pub wallet_address: Address,
}

pub struct Sequencer {
    step_delay: Duration,
    max_server_steps: usize,
}

impl Sequencer {
    pub fn new(step_delay: Duration, max_server_steps: usize) -> Self {
        Self {
            step_delay,
            max_server_steps,
        }
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(config.step_delay(), config.max_server_steps)
    }

    /// Run `steps` in order, halting at the first failure
    pub async fn execute_sequence(
        &self,
        steps: &[TransactionStep],
        signer: &dyn Signer,
        observer: &dyn SequenceObserver,
    ) -> SequenceResult {
        let total = steps.len();
        info!("Executing sequence of {} steps", total);
        let mut results = Vec::with_capacity(total);

        for (index, step) in steps.iter().enumerate() {
            if index > 0 {
                tokio::time::sleep(self.step_delay).await;
            }
            observer.on_step_start(index, step);
            let result = run_step(index, step, signer).await;
            observer.on_step_complete(&result);

            let success = result.success;
            results.push(result);
            if !success {
                break;
            }
        }

        let outcome = SequenceResult::from_results(total, results);
        log_outcome(&outcome);
        outcome
    }

    /// Run `first`, then keep asking the step service for the next transaction until it has
    /// none or the step ceiling is reached
    pub async fn execute_server_driven(
        &self,
        first: TransactionStep,
        context: &StepContext,
        signer: &dyn Signer,
        service: &dyn StepService,
        observer: &dyn SequenceObserver,
    ) -> SequenceResult {
        let mut results: Vec<StepResult> = Vec::new();
        let mut next = Some(first);
        let mut error = None;

        while let Some(step) = next.take() {
            let index = results.len();
            if index >= self.max_server_steps {
                warn!(
                    "Server-driven sequence reached {} steps with more pending, stopping",
                    self.max_server_steps
                );
                error = Some(format!(
                    "Stopped after {} steps; the step service still had a next transaction",
                    self.max_server_steps
                ));
                break;
            }
            if index > 0 {
                tokio::time::sleep(self.step_delay).await;
            }

            observer.on_step_start(index, &step);
            let result = run_step(index, &step, signer).await;
            observer.on_step_complete(&result);

            let report = StepReport {
                agent_kind: context.agent_kind.clone(),
                wallet_address: context.wallet_address,
                chain_id: step.chain_id,
                tx_hash: result.tx_hash,
                success: result.success,
            };
            let step_ok = result.success;
            results.push(result);

            // Failed and declined steps are still reported so the service can clean up
            match service.complete_step(&report).await {
                Ok(continuation) if step_ok => {
                    if !continuation.success {
                        error = Some("Step service did not accept the step".to_string());
                        break;
                    }
                    next = continuation.next_step();
                }
                Ok(_) => break,
                Err(e) => {
                    warn!("Step completion report failed: {}", e);
                    if step_ok {
                        error = Some(format!("Step completion report failed: {}", e));
                    }
                    break;
                }
            }
        }

        let total = results.len();
        let mut outcome = SequenceResult::from_results(total, results);
        if let Some(error) = error {
            outcome.success = false;
            outcome.error.get_or_insert(error);
        }
        log_outcome(&outcome);
        outcome
    }
}

impl Default for Sequencer {
    fn default() -> Self {
        Self::from_config(&EngineConfig::default())
    }
}

async fn run_step(index: usize, step: &TransactionStep, signer: &dyn Signer) -> StepResult {
    let function = function_name(&step.data)
        .map(str::to_string)
        .unwrap_or_else(|| format!("0x{}", hex::encode(step.data.get(..4).unwrap_or_default())));
    debug!(
        "Step {} ({}, {}) on chain {} to {:?}",
        index + 1,
        step.kind,
        function,
        step.chain_id,
        step.to
    );

    let result = match signer.send_transaction(step.to_request()).await {
        Ok(tx_hash) => {
            info!("Step {} submitted: {:?}", index + 1, tx_hash);
            StepResult {
                index,
                kind: step.kind,
                success: true,
                tx_hash: Some(tx_hash),
                error: None,
                failure: None,
            }
        }
        Err(e) => {
            if e.is_user_rejection() {
                info!("Step {} declined in wallet", index + 1);
            } else {
                warn!("Step {} failed ({}): {}", index + 1, e.kind.as_str(), e.message);
            }
            StepResult {
                index,
                kind: step.kind,
                success: false,
                tx_hash: None,
                error: Some(e.message),
                failure: Some(e.kind),
            }
        }
    };
    crate::metrics::record_sequence_step(step.kind, &result);
    result
}

fn log_outcome(outcome: &SequenceResult) {
    if outcome.success {
        info!("Sequence complete: {} steps", outcome.completed_steps);
    } else if outcome.cancelled {
        info!(
            "Sequence cancelled by user after {}/{} steps",
            outcome.completed_steps, outcome.total_steps
        );
    } else {
        warn!(
            "Sequence failed after {}/{} steps: {}",
            outcome.completed_steps,
            outcome.total_steps,
            outcome.error.as_deref().unwrap_or("unknown error")
        );
    }
}
