//! Transfer executor - funds a cross-chain transfer and hands it to the status monitor
//!
//! Exactly one funding transaction is submitted per successful call. Submission is never
//! retried: a failed or declined signature is returned to the caller as-is.

use crate::chain::{erc20, TokenReader};
use crate::chains::{ChainInfo, ChainRegistry};
use crate::error::{EngineError, EngineResult};
use crate::intent::{Recipient, TransferIntent};
use crate::monitor::{NewTransfer, StatusMonitor, TransferHandle, TransferRecord};
use crate::progress::ProgressReporter;
use crate::protocol::{BridgeProtocol, DepositAddressRequest};
use crate::quote::estimate_time;
use crate::signer::{Signer, TxRequest};

use ethers::types::{Address, Bytes, H256, U256};
use ethers::utils::parse_units;
use std::sync::Arc;
use tracing::{info, warn};

const NATIVE_DECIMALS: u32 = 18;

/// Result of a funded transfer; the handle observes the monitor loop
pub struct FundedTransfer {
    pub deposit_address: Address,
    pub source_tx_hash: H256,
    pub handle: TransferHandle,
}

impl FundedTransfer {
    pub fn record(&self) -> TransferRecord {
        self.handle.current()
    }
}

pub struct TransferExecutor {
    protocol: Arc<dyn BridgeProtocol>,
    registry: Arc<ChainRegistry>,
    tokens: Arc<dyn TokenReader>,
    monitor: Arc<StatusMonitor>,
}

impl TransferExecutor {
    pub fn new(
        protocol: Arc<dyn BridgeProtocol>,
        registry: Arc<ChainRegistry>,
        tokens: Arc<dyn TokenReader>,
        monitor: Arc<StatusMonitor>,
    ) -> Self {
        Self {
            protocol,
            registry,
            tokens,
            monitor,
        }
    }

    /// Fund a cross-chain transfer described by `intent`
    pub async fn execute(
        &self,
        intent: &TransferIntent,
        signer: &dyn Signer,
        progress: &ProgressReporter,
    ) -> EngineResult<FundedTransfer> {
        progress.report(5, "Validating transfer");
        let amount = intent
            .amount
            .as_deref()
            .ok_or_else(|| EngineError::MissingParameters("amount".to_string()))?;
        let asset = intent
            .asset()
            .ok_or_else(|| EngineError::MissingParameters("token".to_string()))?
            .to_ascii_uppercase();
        let source = self.resolve_chain(intent.source_chain_id, "source chain")?;
        let destination = self.resolve_chain(intent.destination_chain_id, "destination chain")?;

        if source.chain_id == destination.chain_id {
            return Err(EngineError::InvalidIntent(format!(
                "Source and destination are both {}",
                source.name
            )));
        }
        // Fail on a bad amount before anything reaches the wallet
        parse_amount(amount, NATIVE_DECIMALS)?;

        progress.report(15, "Checking chain availability");
        for chain in [source, destination] {
            if !self.protocol.is_chain_active(&chain.protocol_name).await? {
                warn!("Chain {} is not active on the bridge", chain.name);
                return Err(EngineError::UnsupportedChain {
                    chain: chain.name.clone(),
                });
            }
        }

        let recipient = resolve_recipient(intent.recipient.as_ref(), signer).await?;

        progress.report(25, "Requesting deposit address");
        let deposit_address = self
            .protocol
            .deposit_address(&DepositAddressRequest {
                source_chain: source.protocol_name.clone(),
                destination_chain: destination.protocol_name.clone(),
                recipient,
                asset: asset.clone(),
            })
            .await?;
        info!(
            "Deposit address for {} {} {} -> {}: {:?}",
            amount, asset, source.name, destination.name, deposit_address
        );

        let tx = build_asset_transfer(source, &asset, amount, deposit_address, self.tokens.as_ref())
            .await?;

        progress.report(40, "Waiting for wallet signature");
        let source_tx_hash = match signer.send_transaction(tx).await {
            Ok(hash) => hash,
            Err(e) => {
                if e.is_user_rejection() {
                    progress.report(100, "Cancelled in wallet");
                } else {
                    warn!("Funding transaction on chain {} failed: {}", source.chain_id, e);
                    progress.report(100, "Funding transaction failed");
                }
                return Err(EngineError::SubmissionFailed(e));
            }
        };
        info!(
            "Funding transaction submitted on chain {}: {:?}",
            source.chain_id, source_tx_hash
        );
        crate::metrics::record_transfer_submitted(source.chain_id, destination.chain_id);
        progress.report(60, "Funding transaction submitted");

        let record = TransferRecord::new(NewTransfer {
            source_tx_hash,
            source_chain: source.chain_id,
            destination_chain: destination.chain_id,
            asset,
            amount: amount.to_string(),
            deposit_address: Some(deposit_address),
            estimated_minutes: estimate_time(source, destination).max_minutes,
        });
        let handle = self.monitor.track(record);

        Ok(FundedTransfer {
            deposit_address,
            source_tx_hash,
            handle,
        })
    }

    fn resolve_chain(&self, chain_id: Option<u64>, role: &str) -> EngineResult<&ChainInfo> {
        let chain_id = chain_id.ok_or_else(|| EngineError::MissingParameters(role.to_string()))?;
        self.registry
            .by_id(chain_id)
            .ok_or_else(|| EngineError::UnsupportedChain {
                chain: chain_id.to_string(),
            })
    }
}

/// Recipient address, defaulting to the signer
pub(crate) async fn resolve_recipient(
    recipient: Option<&Recipient>,
    signer: &dyn Signer,
) -> EngineResult<Address> {
    match recipient {
        None => Ok(signer.address().await?),
        Some(Recipient::Address(address)) => Ok(*address),
        Some(Recipient::Name(name)) => signer.resolve_name(name).await?.ok_or_else(|| {
            EngineError::MissingParameters(format!("recipient {} could not be resolved", name))
        }),
    }
}

/// Transaction moving `amount` of `asset` to `to` on `chain`: a value transfer for the
/// native asset, an ERC20 `transfer` otherwise
pub(crate) async fn build_asset_transfer(
    chain: &ChainInfo,
    asset: &str,
    amount: &str,
    to: Address,
    tokens: &dyn TokenReader,
) -> EngineResult<TxRequest> {
    if chain.is_native(asset) {
        return Ok(TxRequest {
            to,
            data: Bytes::new(),
            value: parse_amount(amount, NATIVE_DECIMALS)?,
            chain_id: chain.chain_id,
            gas_limit: None,
        });
    }

    let token = chain.token_address(asset).ok_or_else(|| {
        EngineError::InvalidIntent(format!("Token {} is not supported on {}", asset, chain.name))
    })?;
    let decimals = tokens.token_decimals(chain.chain_id, token).await?;
    let atomic = parse_amount(amount, decimals as u32)?;

    Ok(TxRequest {
        to: token,
        data: erc20::transfer_calldata(to, atomic),
        value: U256::zero(),
        chain_id: chain.chain_id,
        gas_limit: None,
    })
}

/// Decimal string to atomic units; rejects zero, negative and malformed amounts
fn parse_amount(amount: &str, decimals: u32) -> EngineResult<U256> {
    let trimmed = amount.trim();
    let invalid = || EngineError::InvalidIntent(format!("Invalid amount: {}", amount));
    if trimmed.starts_with('-') {
        return Err(invalid());
    }
    let atomic: U256 = parse_units(trimmed, decimals)
        .map_err(|_| invalid())?
        .into();
    // Zero after scaling means the amount is zero or finer than the token allows
    if atomic.is_zero() {
        return Err(invalid());
    }
    Ok(atomic)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::MockTokenReader;
    use crate::config::MonitorConfig;
    use crate::error::SignerError;
    use crate::intent;
    use crate::monitor::TransferStatus;
    use crate::protocol::MockBridgeProtocol;
    use crate::signer::MockSigner;
    use crate::store::MemoryTransferStore;
    use std::str::FromStr;
    use std::sync::Mutex;

    fn usdc_on_ethereum() -> Address {
        Address::from_str("0xA0b86991c6218b36c1d19D4a2e9Eb0cE3606eB48").unwrap()
    }

    fn deposit() -> Address {
        Address::repeat_byte(0xde)
    }

    fn active_protocol() -> MockBridgeProtocol {
        let mut protocol = MockBridgeProtocol::new();
        protocol.expect_is_chain_active().returning(|_| Ok(true));
        protocol
            .expect_deposit_address()
            .returning(|_| Ok(Address::repeat_byte(0xde)));
        protocol
    }

    fn executor(protocol: MockBridgeProtocol, tokens: MockTokenReader) -> TransferExecutor {
        let protocol: Arc<dyn BridgeProtocol> = Arc::new(protocol);
        let registry = Arc::new(ChainRegistry::builtin().clone());
        // Long first delay so no status poll happens inside a test
        let monitor = Arc::new(StatusMonitor::new(
            protocol.clone(),
            registry.clone(),
            Arc::new(MemoryTransferStore::new()),
            MonitorConfig {
                initial_delay_ms: 60_000,
                ..MonitorConfig::default()
            },
            true,
        ));
        TransferExecutor::new(protocol, registry, Arc::new(tokens), monitor)
    }

    fn signer_returning(result: Result<H256, SignerError>) -> MockSigner {
        let mut signer = MockSigner::new();
        signer
            .expect_address()
            .returning(|| Ok(Address::repeat_byte(0x44)));
        signer
            .expect_send_transaction()
            .times(1)
            .return_once(move |_| result);
        signer
    }

    #[tokio::test]
    async fn test_token_transfer_funds_deposit_address() {
        let mut tokens = MockTokenReader::new();
        tokens
            .expect_token_decimals()
            .withf(|chain_id, token| *chain_id == 1 && *token == usdc_on_ethereum())
            .returning(|_, _| Ok(6));

        let mut signer = MockSigner::new();
        signer
            .expect_address()
            .returning(|| Ok(Address::repeat_byte(0x44)));
        signer
            .expect_send_transaction()
            .withf(|tx| {
                tx.to == usdc_on_ethereum()
                    && tx.chain_id == 1
                    && tx.value.is_zero()
                    && tx.data[..4] == [0xa9, 0x05, 0x9c, 0xbb]
                    && U256::from_big_endian(&tx.data[36..68]) == U256::from(100_000_000u64)
            })
            .times(1)
            .returning(|_| Ok(H256::repeat_byte(0x77)));

        let intent = intent::parse("bridge 100 USDC from ethereum to arbitrum", None);
        let funded = executor(active_protocol(), tokens)
            .execute(&intent, &signer, &ProgressReporter::noop())
            .await
            .unwrap();

        assert_eq!(funded.deposit_address, deposit());
        assert_eq!(funded.source_tx_hash, H256::repeat_byte(0x77));
        let record = funded.record();
        assert_eq!(record.status, TransferStatus::Pending);
        assert_eq!(record.source_chain, 1);
        assert_eq!(record.destination_chain, 42161);
        assert_eq!(record.deposit_address, Some(deposit()));
        let eta = (record.estimated_completion_at - record.created_at).num_minutes();
        assert_eq!(eta, 19);
    }

    #[tokio::test]
    async fn test_native_transfer_sends_value() {
        let mut tokens = MockTokenReader::new();
        tokens.expect_token_decimals().never();

        let mut signer = MockSigner::new();
        signer
            .expect_address()
            .returning(|| Ok(Address::repeat_byte(0x44)));
        signer
            .expect_send_transaction()
            .withf(|tx| {
                tx.to == Address::repeat_byte(0xde)
                    && tx.data.is_empty()
                    && tx.value == U256::from(500_000_000_000_000_000u64)
            })
            .times(1)
            .returning(|_| Ok(H256::repeat_byte(0x78)));

        let intent = intent::parse("bridge 0.5 ETH from ethereum to arbitrum", None);
        let funded = executor(active_protocol(), tokens)
            .execute(&intent, &signer, &ProgressReporter::noop())
            .await
            .unwrap();
        assert_eq!(funded.source_tx_hash, H256::repeat_byte(0x78));
    }

    #[tokio::test]
    async fn test_rejection_is_distinguishable() {
        let mut tokens = MockTokenReader::new();
        tokens.expect_token_decimals().returning(|_, _| Ok(6));
        let signer = signer_returning(Err(SignerError::new(
            "MetaMask Tx Signature: User denied transaction signature.",
        )));

        let stages = Arc::new(Mutex::new(Vec::new()));
        let sink = stages.clone();
        let progress = ProgressReporter::new(move |p| sink.lock().unwrap().push(p));

        let intent = intent::parse("bridge 100 USDC from ethereum to arbitrum", None);
        let err = executor(active_protocol(), tokens)
            .execute(&intent, &signer, &progress)
            .await
            .err()
            .unwrap();
        assert!(matches!(err, EngineError::SubmissionFailed(_)));
        assert!(err.is_cancellation());

        let last = stages.lock().unwrap().last().cloned().unwrap();
        assert_eq!(last.percent, 100);
        assert_eq!(last.stage, "Cancelled in wallet");
    }

    #[tokio::test]
    async fn test_failed_submission_reports_final_stage() {
        let mut tokens = MockTokenReader::new();
        tokens.expect_token_decimals().returning(|_, _| Ok(6));
        let signer = signer_returning(Err(SignerError::new(
            "insufficient funds for gas * price + value",
        )));

        let stages = Arc::new(Mutex::new(Vec::new()));
        let sink = stages.clone();
        let progress = ProgressReporter::new(move |p| sink.lock().unwrap().push(p.stage));

        let intent = intent::parse("bridge 100 USDC from ethereum to arbitrum", None);
        let err = executor(active_protocol(), tokens)
            .execute(&intent, &signer, &progress)
            .await
            .err()
            .unwrap();
        assert!(matches!(err, EngineError::SubmissionFailed(_)));
        assert!(!err.is_cancellation());
        assert_eq!(
            stages.lock().unwrap().last().map(String::as_str),
            Some("Funding transaction failed")
        );
        assert_eq!(progress.percent(), 100);
    }

    #[tokio::test]
    async fn test_validation_errors() {
        let signer = MockSigner::new();
        let exec = executor(MockBridgeProtocol::new(), MockTokenReader::new());
        let progress = ProgressReporter::noop();

        let mut same_chain = intent::parse("bridge 100 USDC from ethereum to arbitrum", None);
        same_chain.destination_chain_id = Some(1);
        assert!(matches!(
            exec.execute(&same_chain, &signer, &progress).await.err().unwrap(),
            EngineError::InvalidIntent(_)
        ));

        let mut no_amount = intent::parse("bridge 100 USDC from ethereum to arbitrum", None);
        no_amount.amount = None;
        assert!(matches!(
            exec.execute(&no_amount, &signer, &progress).await.err().unwrap(),
            EngineError::MissingParameters(_)
        ));

        let mut no_destination = intent::parse("bridge 100 USDC from ethereum to arbitrum", None);
        no_destination.destination_chain_id = None;
        assert!(matches!(
            exec.execute(&no_destination, &signer, &progress).await.err().unwrap(),
            EngineError::MissingParameters(_)
        ));
    }

    #[tokio::test]
    async fn test_inactive_chain_rejected() {
        let mut protocol = MockBridgeProtocol::new();
        protocol
            .expect_is_chain_active()
            .returning(|chain| Ok(chain != "arbitrum"));
        protocol.expect_deposit_address().never();

        let intent = intent::parse("bridge 100 USDC from ethereum to arbitrum", None);
        let err = executor(protocol, MockTokenReader::new())
            .execute(&intent, &MockSigner::new(), &ProgressReporter::noop())
            .await
            .err()
            .unwrap();
        assert!(matches!(err, EngineError::UnsupportedChain { ref chain } if chain == "arbitrum"));
    }

    #[tokio::test]
    async fn test_unresolvable_recipient() {
        let mut signer = MockSigner::new();
        signer.expect_resolve_name().returning(|_| Ok(None));
        signer.expect_send_transaction().never();

        let intent = intent::parse(
            "bridge 100 USDC from ethereum to arbitrum for nobody.eth",
            None,
        );
        let err = executor(active_protocol(), MockTokenReader::new())
            .execute(&intent, &signer, &ProgressReporter::noop())
            .await
            .err()
            .unwrap();
        assert!(matches!(err, EngineError::MissingParameters(ref m) if m.contains("nobody.eth")));
    }

    #[test]
    fn test_parse_amount() {
        assert_eq!(parse_amount("1.5", 6).unwrap(), U256::from(1_500_000u64));
        assert!(parse_amount("0", 6).is_err());
        assert!(parse_amount("-1", 6).is_err());
        assert!(parse_amount("abc", 6).is_err());
    }
}
