//! Intent router - the engine's composition root
//!
//! Cross-chain intents go to the transfer executor and the status monitor. Same-chain sends
//! become a single locally built step; same-chain swaps are planned by the step service.
//! Both run through the sequencer.

use crate::chain::{ChainProviders, TokenReader};
use crate::chains::{ChainInfo, ChainRegistry};
use crate::config::Settings;
use crate::error::{EngineError, EngineResult};
use crate::executor::{build_asset_transfer, resolve_recipient, FundedTransfer, TransferExecutor};
use crate::intent::{IntentParser, OperationKind, TransferIntent};
use crate::monitor::{NewTransfer, StatusMonitor, TransferHandle, TransferRecord, TransferUpdate};
use crate::progress::ProgressReporter;
use crate::protocol::{BridgeProtocol, HttpProtocolClient};
use crate::quote::{estimate_time, QuoteManager, TransferQuote};
use crate::sequencer::{
    HttpStepService, SequenceObserver, SequenceResult, Sequencer, StepContext, StepProgress,
    StepService, TransactionStep,
};
use crate::signer::Signer;
use crate::store::{MemoryTransferStore, PgTransferStore, TransferStore};

use ethers::types::{Address, H256};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::info;

/// Result of executing an intent
pub enum IntentOutcome {
    /// Cross-chain transfer funded and under monitoring
    Transfer(FundedTransfer),
    /// Same-chain steps run through the sequencer
    Sequence(SequenceResult),
}

/// Collaborators the engine is built from
pub struct EngineComponents {
    pub protocol: Arc<dyn BridgeProtocol>,
    pub tokens: Arc<dyn TokenReader>,
    pub store: Arc<dyn TransferStore>,
    pub step_service: Option<Arc<dyn StepService>>,
}

/// Request to monitor a transfer funded outside the engine
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackRequest {
    pub tx_hash: H256,
    pub source_chain_id: u64,
    pub destination_chain_id: u64,
    pub asset: String,
    pub amount: String,
    #[serde(default)]
    pub deposit_address: Option<Address>,
}

pub struct IntentEngine {
    registry: Arc<ChainRegistry>,
    parser: IntentParser,
    quotes: QuoteManager,
    executor: TransferExecutor,
    monitor: Arc<StatusMonitor>,
    store: Arc<dyn TransferStore>,
    tokens: Arc<dyn TokenReader>,
    sequencer: Sequencer,
    step_service: Option<Arc<dyn StepService>>,
}

impl IntentEngine {
    pub fn new(
        settings: &Settings,
        registry: Arc<ChainRegistry>,
        components: EngineComponents,
    ) -> Self {
        let EngineComponents {
            protocol,
            tokens,
            store,
            step_service,
        } = components;

        let monitor = Arc::new(StatusMonitor::new(
            protocol.clone(),
            registry.clone(),
            store.clone(),
            settings.monitor.clone(),
            settings.engine.recovery_enabled,
        ));
        let quotes = QuoteManager::new(
            protocol.clone(),
            registry.clone(),
            &settings.engine,
            settings.protocol.name.clone(),
        );
        let executor =
            TransferExecutor::new(protocol, registry.clone(), tokens.clone(), monitor.clone());

        Self {
            parser: IntentParser::new(&registry),
            registry,
            quotes,
            executor,
            monitor,
            store,
            tokens,
            sequencer: Sequencer::from_config(&settings.engine),
            step_service,
        }
    }

    /// Build the engine with its HTTP clients and the configured transfer store
    pub async fn connect(
        settings: &Settings,
        registry: Arc<ChainRegistry>,
        providers: Arc<ChainProviders>,
    ) -> EngineResult<Self> {
        let protocol: Arc<dyn BridgeProtocol> =
            Arc::new(HttpProtocolClient::new(&settings.protocol)?);

        let store: Arc<dyn TransferStore> = match &settings.database {
            Some(database) => {
                let store = PgTransferStore::new(database).await?;
                store.run_migrations().await?;
                info!("Transfer store: postgres");
                Arc::new(store)
            }
            None => {
                info!("Transfer store: in-memory");
                Arc::new(MemoryTransferStore::new())
            }
        };

        let step_service = match &settings.step_service {
            Some(config) => {
                let timeout = Duration::from_millis(settings.protocol.timeout_ms);
                let service: Arc<dyn StepService> = Arc::new(HttpStepService::new(config, timeout)?);
                Some(service)
            }
            None => None,
        };

        Ok(Self::new(
            settings,
            registry,
            EngineComponents {
                protocol,
                tokens: providers,
                store,
                step_service,
            },
        ))
    }

    pub fn registry(&self) -> &ChainRegistry {
        &self.registry
    }

    pub fn parse_intent(&self, command: &str, current_chain_id: Option<u64>) -> TransferIntent {
        self.parser.parse(command, current_chain_id)
    }

    /// Execute a parsed intent with the caller's wallet
    pub async fn execute_intent(
        &self,
        intent: &TransferIntent,
        signer: &dyn Signer,
        progress: ProgressReporter,
    ) -> EngineResult<IntentOutcome> {
        if intent.kind == OperationKind::Balance {
            return Err(EngineError::UnsupportedOperation(
                "Balance queries are answered by the wallet".to_string(),
            ));
        }

        if intent.is_cross_chain || intent.kind == OperationKind::Bridge {
            let funded = self.executor.execute(intent, signer, &progress).await?;
            funded.handle.report_progress(progress);
            return Ok(IntentOutcome::Transfer(funded));
        }

        let result = match intent.kind {
            OperationKind::Send => self.execute_local_send(intent, signer, progress).await?,
            _ => self.execute_planned(intent, signer, progress).await?,
        };
        Ok(IntentOutcome::Sequence(result))
    }

    async fn execute_local_send(
        &self,
        intent: &TransferIntent,
        signer: &dyn Signer,
        progress: ProgressReporter,
    ) -> EngineResult<SequenceResult> {
        let chain_id = intent
            .source_chain_id
            .ok_or_else(|| EngineError::MissingParameters("chain".to_string()))?;
        let chain = self.chain(chain_id)?;
        let amount = intent
            .amount
            .as_deref()
            .ok_or_else(|| EngineError::MissingParameters("amount".to_string()))?;
        let asset = intent
            .asset()
            .ok_or_else(|| EngineError::MissingParameters("token".to_string()))?
            .to_ascii_uppercase();
        if intent.recipient.is_none() {
            return Err(EngineError::MissingParameters("recipient".to_string()));
        }

        progress.report(10, "Preparing transfer");
        let recipient = resolve_recipient(intent.recipient.as_ref(), signer).await?;
        let tx = build_asset_transfer(chain, &asset, amount, recipient, self.tokens.as_ref()).await?;

        let steps = [TransactionStep::from(tx)];
        let observer = StepProgress::new(progress, steps.len());
        Ok(self.sequencer.execute_sequence(&steps, signer, &observer).await)
    }

    async fn execute_planned(
        &self,
        intent: &TransferIntent,
        signer: &dyn Signer,
        progress: ProgressReporter,
    ) -> EngineResult<SequenceResult> {
        let service = self.step_service()?;

        progress.report(10, "Planning steps");
        let wallet = signer.address().await?;
        let steps = service.plan_steps(intent, wallet).await?;
        if steps.is_empty() {
            return Err(EngineError::InvalidIntent(format!(
                "No steps available for: {}",
                intent.command
            )));
        }
        info!("Planned {} steps for {:?} intent", steps.len(), intent.kind);

        let observer = StepProgress::new(progress, steps.len());
        Ok(self.sequencer.execute_sequence(&steps, signer, &observer).await)
    }

    pub async fn get_transfer_quote(
        &self,
        source_chain_id: u64,
        destination_chain_id: u64,
        asset: &str,
        amount: &str,
    ) -> EngineResult<Arc<TransferQuote>> {
        self.quotes
            .get_quote(source_chain_id, destination_chain_id, asset, amount)
            .await
    }

    /// Start monitoring a transfer funded elsewhere. A transfer known to the store continues
    /// from its persisted state.
    pub async fn track_transfer(&self, request: TrackRequest) -> EngineResult<TransferHandle> {
        let source = self.chain(request.source_chain_id)?;
        let destination = self.chain(request.destination_chain_id)?;
        if source.chain_id == destination.chain_id {
            return Err(EngineError::InvalidIntent(format!(
                "Source and destination are both {}",
                source.name
            )));
        }

        let record = match self.store.get(request.tx_hash).await? {
            Some(existing) => existing,
            None => TransferRecord::new(NewTransfer {
                source_tx_hash: request.tx_hash,
                source_chain: source.chain_id,
                destination_chain: destination.chain_id,
                asset: request.asset.to_ascii_uppercase(),
                amount: request.amount,
                deposit_address: request.deposit_address,
                estimated_minutes: estimate_time(source, destination).max_minutes,
            }),
        };
        Ok(self.monitor.track(record))
    }

    pub async fn execute_multi_step_transaction(
        &self,
        steps: &[TransactionStep],
        signer: &dyn Signer,
        observer: &dyn SequenceObserver,
    ) -> SequenceResult {
        self.sequencer.execute_sequence(steps, signer, observer).await
    }

    /// Run `first`, then whatever the step service hands back, up to the step ceiling
    pub async fn execute_server_driven(
        &self,
        first: TransactionStep,
        signer: &dyn Signer,
        observer: &dyn SequenceObserver,
    ) -> EngineResult<SequenceResult> {
        let service = self.step_service()?;
        let context = StepContext {
            agent_kind: service.agent_kind(),
            wallet_address: signer.address().await?,
        };
        Ok(self
            .sequencer
            .execute_server_driven(first, &context, signer, service.as_ref(), observer)
            .await)
    }

    /// Drop quotes past their TTL, returning how many were removed
    pub async fn purge_expired_quotes(&self) -> usize {
        self.quotes.purge_expired().await
    }

    /// Every accepted status transition of every tracked transfer
    pub fn subscribe(&self) -> broadcast::Receiver<TransferUpdate> {
        self.monitor.subscribe()
    }

    /// Latest known state of a transfer, from the monitor or the store
    pub async fn transfer(&self, tx_hash: H256) -> EngineResult<Option<TransferRecord>> {
        match self.monitor.get(tx_hash) {
            Some(record) => Ok(Some(record)),
            None => self.store.get(tx_hash).await,
        }
    }

    /// Transfers whose monitoring is still running
    pub fn active_transfers(&self) -> Vec<TransferRecord> {
        self.monitor.active()
    }

    /// Restart monitoring of persisted non-terminal transfers
    pub async fn resume(&self) -> EngineResult<usize> {
        self.monitor.resume().await
    }

    pub fn shutdown(&self) {
        self.monitor.shutdown();
    }

    fn step_service(&self) -> EngineResult<&Arc<dyn StepService>> {
        self.step_service.as_ref().ok_or_else(|| {
            EngineError::UnsupportedOperation("No step service is configured".to_string())
        })
    }

    fn chain(&self, chain_id: u64) -> EngineResult<&ChainInfo> {
        self.registry
            .by_id(chain_id)
            .ok_or_else(|| EngineError::UnsupportedChain {
                chain: chain_id.to_string(),
            })
    }
}
