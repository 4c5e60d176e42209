//! Status monitor - tracks cross-chain messages until they reach a terminal state
//!
//! Each tracked transfer gets its own tokio task that polls the bridging protocol on an
//! increasing-delay schedule. The task owns a cancellation token (a child of the monitor's
//! shutdown token); a recovery loop, when needed, runs on a child of the record's token.
//! Accepted transitions are published on the record's `watch` channel, broadcast as
//! [`TransferUpdate`]s and persisted to the transfer store.

mod recovery;
mod state;

pub use state::{NewTransfer, RecoveryAttempt, TransferRecord, TransferStatus, TransferUpdate};

use crate::chains::ChainRegistry;
use crate::config::MonitorConfig;
use crate::error::EngineResult;
use crate::progress::ProgressReporter;
use crate::protocol::BridgeProtocol;
use crate::retry::{Backoff, RetryPolicy};
use crate::store::TransferStore;

use chrono::Utc;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use ethers::types::H256;
use std::sync::Arc;
use tokio::sync::{broadcast, watch};
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{debug, info, warn};

/// Registry entry for a tracked transfer
struct TrackedTransfer {
    tx_hash: H256,
    state: watch::Sender<TransferRecord>,
    cancel: CancellationToken,
}

impl TrackedTransfer {
    fn snapshot(&self) -> TransferRecord {
        self.state.borrow().clone()
    }

    fn is_running(&self) -> bool {
        !self.cancel.is_cancelled() && !self.state.borrow().is_terminal()
    }
}

/// Everything a monitor loop needs, cloned into each task
#[derive(Clone)]
struct MonitorContext {
    protocol: Arc<dyn BridgeProtocol>,
    registry: Arc<ChainRegistry>,
    store: Arc<dyn TransferStore>,
    config: MonitorConfig,
    recovery_enabled: bool,
    retry: RetryPolicy,
    updates: broadcast::Sender<TransferUpdate>,
}

impl MonitorContext {
    /// Apply a status change if it is a forward transition; `update` fills in details
    async fn transition<F>(&self, tracked: &TrackedTransfer, next: TransferStatus, update: F) -> bool
    where
        F: FnOnce(&mut TransferRecord),
    {
        let mut previous = next;
        let accepted = tracked.state.send_if_modified(|record| {
            if !record.status.can_transition_to(next) {
                return false;
            }
            previous = record.status;
            record.status = next;
            record.updated_at = Utc::now();
            update(record);
            true
        });

        if !accepted {
            let current = tracked.state.borrow().status;
            if current != next {
                warn!(
                    "Ignoring {} -> {} for transfer {:?}",
                    current, next, tracked.tx_hash
                );
            }
            return false;
        }

        let record = tracked.snapshot();
        info!(
            "Transfer {:?}: {} -> {}",
            tracked.tx_hash, previous, record.status
        );
        crate::metrics::record_status_transition(record.status);

        self.persist(&record).await;
        // No subscribers is fine
        let _ = self.updates.send(TransferUpdate {
            tx_hash: tracked.tx_hash,
            previous,
            status: record.status,
            record,
        });
        true
    }

    /// Record bookkeeping that does not change the status
    async fn note(&self, tracked: &TrackedTransfer, update: impl FnOnce(&mut TransferRecord)) {
        tracked.state.send_modify(|record| {
            update(record);
            record.updated_at = Utc::now();
        });
        self.persist(&tracked.snapshot()).await;
    }

    async fn persist(&self, record: &TransferRecord) {
        if let Err(e) = self.store.save(record).await {
            warn!(
                "Failed to persist transfer {:?}: {}",
                record.source_tx_hash, e
            );
        }
    }

    fn protocol_chain_name(&self, chain_id: u64) -> String {
        self.registry
            .by_id(chain_id)
            .map(|c| c.protocol_name.clone())
            .unwrap_or_else(|| chain_id.to_string())
    }
}

/// Caller's view of a tracked transfer. Dropping it stops the monitor loop unless
/// the handle was detached.
pub struct TransferHandle {
    tx_hash: H256,
    updates: watch::Receiver<TransferRecord>,
    cancel: CancellationToken,
    guard: Option<DropGuard>,
}

impl TransferHandle {
    pub fn tx_hash(&self) -> H256 {
        self.tx_hash
    }

    /// Latest snapshot
    pub fn current(&self) -> TransferRecord {
        self.updates.borrow().clone()
    }

    /// Receiver that observes every accepted change of this record
    pub fn subscribe(&self) -> watch::Receiver<TransferRecord> {
        self.updates.clone()
    }

    /// Stop monitoring this transfer
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    /// Keep the loop running after this handle is dropped
    pub fn detach(mut self) {
        if let Some(guard) = self.guard.take() {
            guard.disarm();
        }
    }

    /// Wait until the record is terminal or monitoring stops, returning the last snapshot
    pub async fn wait(&mut self) -> TransferRecord {
        loop {
            let record = self.updates.borrow_and_update().clone();
            if record.is_terminal() {
                return record;
            }
            let still_running = tokio::select! {
                changed = self.updates.changed() => changed.is_ok(),
                _ = self.cancel.cancelled() => false,
            };
            if !still_running {
                return self.current();
            }
        }
    }

    /// Forward status changes to a progress reporter until terminal or cancelled
    pub fn report_progress(&self, reporter: ProgressReporter) {
        let mut updates = self.updates.clone();
        let cancel = self.cancel.clone();
        tokio::spawn(async move {
            loop {
                let record = updates.borrow_and_update().clone();
                let (percent, stage) = progress_for(record.status);
                reporter.report(percent, stage);
                if record.is_terminal() {
                    break;
                }
                tokio::select! {
                    changed = updates.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                    _ = cancel.cancelled() => break,
                }
            }
        });
    }
}

fn progress_for(status: TransferStatus) -> (u8, &'static str) {
    match status {
        TransferStatus::Pending => (60, "Waiting for source chain confirmation"),
        TransferStatus::Approved => (80, "Approved by the bridge network"),
        TransferStatus::Error => (85, "Destination execution failed"),
        TransferStatus::Recovering => (90, "Recovering transfer"),
        TransferStatus::Executed => (100, "Transfer complete"),
        TransferStatus::Failed => (100, "Transfer failed"),
        TransferStatus::Unknown => (100, "Transfer status unknown"),
    }
}

/// Owns the monitor loops of all tracked transfers
pub struct StatusMonitor {
    context: MonitorContext,
    records: DashMap<H256, Arc<TrackedTransfer>>,
    shutdown: CancellationToken,
}

impl StatusMonitor {
    pub fn new(
        protocol: Arc<dyn BridgeProtocol>,
        registry: Arc<ChainRegistry>,
        store: Arc<dyn TransferStore>,
        config: MonitorConfig,
        recovery_enabled: bool,
    ) -> Self {
        let (updates, _) = broadcast::channel(1024);
        let retry = RetryPolicy::from(&config.recovery_retry);
        Self {
            context: MonitorContext {
                protocol,
                registry,
                store,
                config,
                recovery_enabled,
                retry,
                updates,
            },
            records: DashMap::new(),
            shutdown: CancellationToken::new(),
        }
    }

    /// Start monitoring a record. A transfer already being monitored is observed,
    /// not restarted, and the returned handle does not own its loop.
    pub fn track(&self, record: TransferRecord) -> TransferHandle {
        let tx_hash = record.source_tx_hash;
        let cancel = self.shutdown.child_token();
        let (state, updates) = watch::channel(record.clone());
        let tracked = Arc::new(TrackedTransfer {
            tx_hash,
            state,
            cancel: cancel.clone(),
        });

        // Check and insert under one shard lock so a hash never gets two loops
        match self.records.entry(tx_hash) {
            Entry::Occupied(mut occupied) => {
                let existing = occupied.get();
                if existing.is_running() || existing.state.borrow().is_terminal() {
                    debug!("Transfer {:?} is already known, observing", tx_hash);
                    return TransferHandle {
                        tx_hash,
                        updates: existing.state.subscribe(),
                        cancel: existing.cancel.clone(),
                        guard: None,
                    };
                }
                occupied.insert(tracked.clone());
            }
            Entry::Vacant(vacant) => {
                vacant.insert(tracked.clone());
            }
        }

        info!(
            "Tracking transfer {:?} from chain {} to chain {} ({})",
            tx_hash, record.source_chain, record.destination_chain, record.status
        );

        if record.is_terminal() {
            return TransferHandle {
                tx_hash,
                updates,
                cancel: cancel.clone(),
                guard: None,
            };
        }

        let context = self.context.clone();
        let loop_cancel = cancel.clone();
        tokio::spawn(async move {
            crate::metrics::MONITORS_ACTIVE.inc();
            let record = tracked.snapshot();
            context.persist(&record).await;
            match record.status {
                TransferStatus::Recovering => {
                    let recovery_ref = record.recovery.map(|r| r.recovery_ref).unwrap_or_default();
                    let child = loop_cancel.child_token();
                    recovery::poll_recovery(context, tracked, recovery_ref, child).await
                }
                TransferStatus::Error => recovery::handle_error(context, tracked, loop_cancel).await,
                _ => poll_status(context, tracked, loop_cancel).await,
            }
            crate::metrics::MONITORS_ACTIVE.dec();
        });

        TransferHandle {
            tx_hash,
            updates,
            guard: Some(cancel.clone().drop_guard()),
            cancel,
        }
    }

    /// Latest snapshot of a record known to this monitor
    pub fn get(&self, tx_hash: H256) -> Option<TransferRecord> {
        self.records.get(&tx_hash).map(|t| t.snapshot())
    }

    /// Observe a record without taking ownership of its loop
    pub fn observe(&self, tx_hash: H256) -> Option<watch::Receiver<TransferRecord>> {
        self.records.get(&tx_hash).map(|t| t.state.subscribe())
    }

    /// Snapshots of all records whose monitoring is still running
    pub fn active(&self) -> Vec<TransferRecord> {
        self.records
            .iter()
            .filter(|t| t.is_running())
            .map(|t| t.snapshot())
            .collect()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TransferUpdate> {
        self.context.updates.subscribe()
    }

    /// Stop monitoring a transfer; its record keeps the last status
    pub fn stop(&self, tx_hash: H256) -> bool {
        match self.records.get(&tx_hash) {
            Some(tracked) => {
                tracked.cancel.cancel();
                true
            }
            None => false,
        }
    }

    /// Restart loops for non-terminal records found in the store
    pub async fn resume(&self) -> EngineResult<usize> {
        let records = self.context.store.list_active().await?;
        let mut resumed = 0;
        for record in records {
            let already_running = self
                .records
                .get(&record.source_tx_hash)
                .map_or(false, |t| t.is_running());
            if already_running {
                continue;
            }
            self.track(record).detach();
            resumed += 1;
        }
        info!("Resumed monitoring of {} transfers", resumed);
        Ok(resumed)
    }

    /// Cancel every loop
    pub fn shutdown(&self) {
        self.shutdown.cancel();
        info!("Status monitor stopped");
    }
}

/// Main poll loop: pending/approved until executed, error or attempt exhaustion
async fn poll_status(
    context: MonitorContext,
    tracked: Arc<TrackedTransfer>,
    cancel: CancellationToken,
) {
    let tx_hash = tracked.tx_hash;
    let max_attempts = context.config.max_attempts;
    let mut schedule = Backoff::status_polls(&context.config);
    let first_attempt = tracked.snapshot().poll_attempts + 1;

    for attempt in first_attempt..=max_attempts {
        let delay = schedule.next_delay();
        tokio::select! {
            _ = cancel.cancelled() => {
                debug!("Monitoring of {:?} cancelled", tx_hash);
                return;
            }
            _ = tokio::time::sleep(delay) => {}
        }

        let result = tokio::select! {
            _ = cancel.cancelled() => {
                debug!("Monitoring of {:?} cancelled", tx_hash);
                return;
            }
            result = context.protocol.transaction_status(tx_hash) => result,
        };

        match result {
            Ok(status) => {
                context.note(&tracked, |r| r.poll_attempts = attempt).await;
                debug!(
                    "Transfer {:?} poll {}/{}: {:?}",
                    tx_hash, attempt, max_attempts, status.stage
                );
                match TransferStatus::from_stage(status.stage) {
                    TransferStatus::Executed => {
                        let destination = status.destination_tx_hash;
                        context
                            .transition(&tracked, TransferStatus::Executed, |r| {
                                r.destination_tx_hash = destination;
                                r.last_error = None;
                            })
                            .await;
                        return;
                    }
                    TransferStatus::Error => {
                        let message = status
                            .error
                            .unwrap_or_else(|| format!("Protocol reported {:?}", status.stage));
                        if context
                            .transition(&tracked, TransferStatus::Error, |r| {
                                r.last_error = Some(message)
                            })
                            .await
                        {
                            recovery::handle_error(context, tracked, cancel).await;
                            return;
                        }
                    }
                    TransferStatus::Approved => {
                        context
                            .transition(&tracked, TransferStatus::Approved, |_| {})
                            .await;
                    }
                    _ => {}
                }
            }
            Err(e) => {
                warn!(
                    "Status poll {}/{} for {:?} failed: {}",
                    attempt, max_attempts, tx_hash, e
                );
                let message = e.to_string();
                context
                    .note(&tracked, |r| {
                        r.poll_attempts = attempt;
                        r.last_error = Some(message);
                    })
                    .await;
            }
        }
    }

    if cancel.is_cancelled() {
        return;
    }

    let last = tracked.snapshot();
    let message = match last.last_error {
        Some(error) => format!(
            "No final status after {} polls; last error: {}",
            max_attempts, error
        ),
        None => format!(
            "No final status after {} polls; last status: {}",
            max_attempts, last.status
        ),
    };
    warn!("Transfer {:?}: {}", tx_hash, message);
    context
        .transition(&tracked, TransferStatus::Unknown, |r| {
            r.last_error = Some(message)
        })
        .await;
}

#[cfg(test)]
mod tests;
