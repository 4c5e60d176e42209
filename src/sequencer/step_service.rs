//! Step service client: plans same-chain steps and drives server-driven step chains

use super::TransactionStep;
use crate::config::StepServiceConfig;
use crate::error::{EngineError, EngineResult, ProtocolError};
use crate::intent::TransferIntent;
use crate::protocol::http::{decode, transport_error};

use async_trait::async_trait;
use ethers::types::{Address, Bytes, H256, U256};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

/// Outcome of one step, reported back to the step service
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StepReport {
    pub agent_kind: String,
    pub wallet_address: Address,
    pub chain_id: u64,
    pub tx_hash: Option<H256>,
    pub success: bool,
}

/// Transaction as the step service describes it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepTransaction {
    pub to: Address,
    #[serde(default)]
    pub data: Bytes,
    #[serde(default)]
    pub value: U256,
    pub chain_id: u64,
    #[serde(default)]
    pub gas_limit: Option<U256>,
}

impl From<StepTransaction> for TransactionStep {
    fn from(tx: StepTransaction) -> Self {
        let mut step = TransactionStep::new(tx.to, tx.data, tx.value, tx.chain_id);
        step.gas_limit = tx.gas_limit;
        step
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepContinuation {
    pub success: bool,
    #[serde(default)]
    pub has_next_step: bool,
    #[serde(default)]
    pub next_transaction: Option<StepTransaction>,
}

impl StepContinuation {
    /// Next step to run, if the service returned one
    pub fn next_step(self) -> Option<TransactionStep> {
        if !self.has_next_step {
            return None;
        }
        self.next_transaction.map(TransactionStep::from)
    }
}

/// Remote planner for same-chain flows and step-chain continuation
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait StepService: Send + Sync {
    /// Ordered steps that carry out a same-chain intent for `wallet`
    async fn plan_steps(
        &self,
        intent: &TransferIntent,
        wallet: Address,
    ) -> EngineResult<Vec<TransactionStep>>;

    /// Report a finished step and ask for the next one
    async fn complete_step(&self, report: &StepReport) -> EngineResult<StepContinuation>;

    fn agent_kind(&self) -> String {
        "swap".to_string()
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PlanRequest<'a> {
    intent: &'a TransferIntent,
    wallet_address: Address,
}

#[derive(Deserialize)]
struct PlanResponse {
    steps: Vec<StepTransaction>,
}

pub struct HttpStepService {
    client: reqwest::Client,
    base_url: String,
    agent_kind: String,
}

impl HttpStepService {
    pub fn new(config: &StepServiceConfig, timeout: Duration) -> EngineResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| EngineError::Config(format!("Failed to build step service client: {}", e)))?;

        Ok(Self {
            client,
            base_url: config.url.trim_end_matches('/').to_string(),
            agent_kind: config.agent_kind.clone(),
        })
    }

    async fn post<B: Serialize + ?Sized, T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, ProtocolError> {
        debug!("POST {}{}", self.base_url, path);
        let response = self
            .client
            .post(format!("{}{}", self.base_url, path))
            .json(body)
            .send()
            .await
            .map_err(transport_error)?;
        decode(response).await
    }
}

#[async_trait]
impl StepService for HttpStepService {
    async fn plan_steps(
        &self,
        intent: &TransferIntent,
        wallet: Address,
    ) -> EngineResult<Vec<TransactionStep>> {
        let request = PlanRequest {
            intent,
            wallet_address: wallet,
        };
        let plan: PlanResponse = self.post("/v1/steps/plan", &request).await?;
        Ok(plan.steps.into_iter().map(TransactionStep::from).collect())
    }

    async fn complete_step(&self, report: &StepReport) -> EngineResult<StepContinuation> {
        Ok(self.post("/v1/steps/complete", report).await?)
    }

    fn agent_kind(&self) -> String {
        self.agent_kind.clone()
    }
}
