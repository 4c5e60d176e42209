//! Recovery sub-flow for transfers whose destination leg errored

use super::{MonitorContext, RecoveryAttempt, TrackedTransfer, TransferStatus};
use crate::protocol::RecoveryStatus;
use crate::retry::Backoff;

use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Decide what happens to a record that just entered `error`
pub(super) async fn handle_error(
    context: MonitorContext,
    tracked: Arc<TrackedTransfer>,
    cancel: CancellationToken,
) {
    let tx_hash = tracked.tx_hash;
    let record = tracked.snapshot();
    let reason = record
        .last_error
        .clone()
        .unwrap_or_else(|| "Destination execution failed".to_string());

    if !context.recovery_enabled {
        context
            .transition(&tracked, TransferStatus::Failed, |r| {
                r.last_error = Some(format!("{} (recovery disabled)", reason))
            })
            .await;
        return;
    }

    let source = context.protocol_chain_name(record.source_chain);
    let destination = context.protocol_chain_name(record.destination_chain);
    info!(
        "Requesting recovery of {:?} ({} -> {})",
        tx_hash, source, destination
    );
    crate::metrics::record_recovery("requested");

    let protocol = context.protocol.clone();
    let request = context
        .retry
        .run("recover", || protocol.recover(tx_hash, &source, &destination));
    let result = tokio::select! {
        _ = cancel.cancelled() => {
            debug!("Recovery request for {:?} cancelled", tx_hash);
            return;
        }
        result = request => result,
    };

    match result {
        Ok(ticket) if ticket.accepted => {
            let recovery_ref = ticket
                .recovery_ref
                .unwrap_or_else(|| format!("{:?}", tx_hash));
            let attempt = RecoveryAttempt::new(tx_hash, recovery_ref.clone());
            let started = context
                .transition(&tracked, TransferStatus::Recovering, |r| {
                    r.recovery = Some(attempt)
                })
                .await;

            if started {
                let child = cancel.child_token();
                tokio::spawn(async move {
                    crate::metrics::MONITORS_ACTIVE.inc();
                    poll_recovery(context, tracked, recovery_ref, child).await;
                    crate::metrics::MONITORS_ACTIVE.dec();
                });
            }
        }
        Ok(ticket) => {
            let message = ticket
                .message
                .unwrap_or_else(|| "Recovery was refused".to_string());
            warn!("Recovery of {:?} refused: {}", tx_hash, message);
            crate::metrics::record_recovery("refused");
            context
                .transition(&tracked, TransferStatus::Failed, |r| {
                    r.last_error = Some(message)
                })
                .await;
        }
        Err(e) => {
            warn!("Recovery request for {:?} failed: {}", tx_hash, e);
            crate::metrics::record_recovery("request_failed");
            context
                .transition(&tracked, TransferStatus::Failed, |r| {
                    r.last_error = Some(format!("Recovery request failed: {}", e))
                })
                .await;
        }
    }
}

/// Poll the recovery until it completes, fails or runs out of attempts
pub(super) async fn poll_recovery(
    context: MonitorContext,
    tracked: Arc<TrackedTransfer>,
    recovery_ref: String,
    cancel: CancellationToken,
) {
    let tx_hash = tracked.tx_hash;
    let max_attempts = context.config.recovery_max_attempts;
    let mut schedule = Backoff::recovery_polls(&context.config);

    for attempt in 1..=max_attempts {
        let delay = schedule.next_delay();
        tokio::select! {
            _ = cancel.cancelled() => {
                debug!("Recovery monitoring of {:?} cancelled", tx_hash);
                return;
            }
            _ = tokio::time::sleep(delay) => {}
        }

        let result = tokio::select! {
            _ = cancel.cancelled() => {
                debug!("Recovery monitoring of {:?} cancelled", tx_hash);
                return;
            }
            result = context.protocol.recovery_status(&recovery_ref) => result,
        };

        match result {
            Ok(progress) => match progress.status {
                RecoveryStatus::Completed => {
                    crate::metrics::record_recovery("completed");
                    let destination = progress.destination_tx_hash;
                    context
                        .transition(&tracked, TransferStatus::Executed, |r| {
                            if let Some(recovery) = r.recovery.as_mut() {
                                recovery.status = RecoveryStatus::Completed;
                            }
                            if destination.is_some() {
                                r.destination_tx_hash = destination;
                            }
                            r.last_error = None;
                        })
                        .await;
                    return;
                }
                RecoveryStatus::Failed => {
                    crate::metrics::record_recovery("failed");
                    let message = progress
                        .message
                        .unwrap_or_else(|| format!("Recovery {} failed", recovery_ref));
                    context
                        .transition(&tracked, TransferStatus::Failed, |r| {
                            if let Some(recovery) = r.recovery.as_mut() {
                                recovery.status = RecoveryStatus::Failed;
                            }
                            r.last_error = Some(message);
                        })
                        .await;
                    return;
                }
                RecoveryStatus::Pending => {
                    debug!(
                        "Recovery {} for {:?} still pending ({}/{})",
                        recovery_ref, tx_hash, attempt, max_attempts
                    );
                }
            },
            Err(e) => {
                warn!(
                    "Recovery poll {}/{} for {:?} failed: {}",
                    attempt, max_attempts, tx_hash, e
                );
                let message = e.to_string();
                context
                    .note(&tracked, |r| r.last_error = Some(message))
                    .await;
            }
        }
    }

    if cancel.is_cancelled() {
        return;
    }

    let message = format!(
        "Recovery {} did not complete after {} polls",
        recovery_ref, max_attempts
    );
    warn!("Transfer {:?}: {}", tx_hash, message);
    context
        .transition(&tracked, TransferStatus::Unknown, |r| {
            r.last_error = Some(message)
        })
        .await;
}
