use super::*;
use crate::config::RetryConfig;
use crate::error::ProtocolError;
use crate::protocol::{
    MessageStage, MessageStatus, MockBridgeProtocol, RecoveryProgress, RecoveryStatus,
    RecoveryTicket,
};
use crate::store::MemoryTransferStore;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

fn fast_config() -> MonitorConfig {
    MonitorConfig {
        initial_delay_ms: 2,
        backoff_factor: 1.5,
        max_delay_ms: 10,
        max_attempts: 5,
        recovery_initial_delay_ms: 2,
        recovery_max_attempts: 4,
        recovery_retry: RetryConfig {
            max_attempts: 3,
            base_delay_ms: 1,
            backoff_factor: 2.0,
            max_delay_ms: 5,
        },
    }
}

fn monitor_with(
    protocol: MockBridgeProtocol,
    store: Arc<MemoryTransferStore>,
    config: MonitorConfig,
    recovery_enabled: bool,
) -> StatusMonitor {
    StatusMonitor::new(
        Arc::new(protocol),
        Arc::new(ChainRegistry::builtin().clone()),
        store,
        config,
        recovery_enabled,
    )
}

fn monitor(protocol: MockBridgeProtocol, recovery_enabled: bool) -> StatusMonitor {
    monitor_with(
        protocol,
        Arc::new(MemoryTransferStore::new()),
        fast_config(),
        recovery_enabled,
    )
}

fn record() -> TransferRecord {
    TransferRecord::new(record_inputs())
}

fn stage(stage: MessageStage) -> MessageStatus {
    MessageStatus {
        stage,
        destination_tx_hash: None,
        error: None,
    }
}

fn drain(rx: &mut broadcast::Receiver<TransferUpdate>) -> Vec<TransferStatus> {
    let mut statuses = Vec::new();
    while let Ok(update) = rx.try_recv() {
        statuses.push(update.status);
    }
    statuses
}

#[tokio::test]
async fn test_pending_to_executed() {
    let mut protocol = MockBridgeProtocol::new();
    let mut polls = 0;
    protocol.expect_transaction_status().returning(move |_| {
        polls += 1;
        Ok(match polls {
            1 => stage(MessageStage::GasPaid),
            2 => stage(MessageStage::Approved),
            _ => MessageStatus {
                stage: MessageStage::Executed,
                destination_tx_hash: Some(H256::repeat_byte(0xbb)),
                error: None,
            },
        })
    });

    let monitor = monitor(protocol, true);
    let mut updates = monitor.subscribe();
    let mut handle = monitor.track(record());

    let done = handle.wait().await;
    assert_eq!(done.status, TransferStatus::Executed);
    assert_eq!(done.destination_tx_hash, Some(H256::repeat_byte(0xbb)));
    assert_eq!(done.poll_attempts, 3);

    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(
        drain(&mut updates),
        vec![TransferStatus::Approved, TransferStatus::Executed]
    );
}

#[tokio::test]
async fn test_backward_stage_is_ignored() {
    let mut protocol = MockBridgeProtocol::new();
    let mut polls = 0;
    protocol.expect_transaction_status().returning(move |_| {
        polls += 1;
        Ok(match polls {
            1 => stage(MessageStage::Approved),
            2 => stage(MessageStage::Called),
            3 => stage(MessageStage::GasPaid),
            _ => stage(MessageStage::Executed),
        })
    });

    let monitor = monitor(protocol, true);
    let handle = monitor.track(record());
    let mut observed = handle.subscribe();

    let mut seen = vec![observed.borrow_and_update().status];
    while !seen.last().map_or(false, |s| s.is_terminal()) {
        observed.changed().await.unwrap();
        let status = observed.borrow_and_update().status;
        if seen.last() != Some(&status) {
            seen.push(status);
        }
    }

    assert_eq!(
        seen,
        vec![
            TransferStatus::Pending,
            TransferStatus::Approved,
            TransferStatus::Executed
        ]
    );
}

#[tokio::test]
async fn test_error_recovered_to_executed() {
    let mut protocol = MockBridgeProtocol::new();
    protocol.expect_transaction_status().times(1).returning(|_| {
        Ok(MessageStatus {
            stage: MessageStage::Error,
            destination_tx_hash: None,
            error: Some("execution reverted".to_string()),
        })
    });
    protocol
        .expect_recover()
        .withf(|_, src, dst| src.to_string() == "Ethereum" && dst.to_string() == "arbitrum")
        .times(1)
        .returning(|_, _, _| {
            Ok(RecoveryTicket {
                accepted: true,
                recovery_ref: Some("rec-1".to_string()),
                message: None,
            })
        });
    let mut polls = 0;
    protocol
        .expect_recovery_status()
        .withf(|r| r.to_string() == "rec-1")
        .returning(move |_| {
            polls += 1;
            Ok(RecoveryProgress {
                status: if polls < 2 {
                    RecoveryStatus::Pending
                } else {
                    RecoveryStatus::Completed
                },
                destination_tx_hash: Some(H256::repeat_byte(0xcc)),
                message: None,
            })
        });

    let store = Arc::new(MemoryTransferStore::new());
    let monitor = monitor_with(protocol, store.clone(), fast_config(), true);
    let mut updates = monitor.subscribe();
    let mut handle = monitor.track(record());

    let done = handle.wait().await;
    assert_eq!(done.status, TransferStatus::Executed);
    let recovery = done.recovery.expect("recovery attempt recorded");
    assert_eq!(recovery.recovery_ref, "rec-1");
    assert_eq!(recovery.status, RecoveryStatus::Completed);
    assert_eq!(recovery.parent_tx_hash, H256::repeat_byte(0xaa));

    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(
        drain(&mut updates),
        vec![
            TransferStatus::Error,
            TransferStatus::Recovering,
            TransferStatus::Executed
        ]
    );
    let stored = store.get(H256::repeat_byte(0xaa)).await.unwrap().unwrap();
    assert_eq!(stored.status, TransferStatus::Executed);
}

#[tokio::test]
async fn test_failed_recovery() {
    let mut protocol = MockBridgeProtocol::new();
    protocol
        .expect_transaction_status()
        .returning(|_| Ok(stage(MessageStage::InsufficientFee)));
    protocol.expect_recover().returning(|_, _, _| {
        Ok(RecoveryTicket {
            accepted: true,
            recovery_ref: Some("rec-2".to_string()),
            message: None,
        })
    });
    protocol.expect_recovery_status().returning(|_| {
        Ok(RecoveryProgress {
            status: RecoveryStatus::Failed,
            destination_tx_hash: None,
            message: Some("gas price too low".to_string()),
        })
    });

    let mut handle = monitor(protocol, true).track(record());
    let done = handle.wait().await;
    assert_eq!(done.status, TransferStatus::Failed);
    assert_eq!(done.last_error.as_deref(), Some("gas price too low"));
    assert_eq!(done.recovery.unwrap().status, RecoveryStatus::Failed);
}

#[tokio::test]
async fn test_recovery_disabled_fails_directly() {
    let mut protocol = MockBridgeProtocol::new();
    protocol
        .expect_transaction_status()
        .returning(|_| Ok(stage(MessageStage::Error)));
    protocol.expect_recover().never();

    let mut handle = monitor(protocol, false).track(record());
    let done = handle.wait().await;
    assert_eq!(done.status, TransferStatus::Failed);
    assert!(done.last_error.unwrap().contains("recovery disabled"));
    assert!(done.recovery.is_none());
}

#[tokio::test]
async fn test_recovery_refused() {
    let mut protocol = MockBridgeProtocol::new();
    protocol
        .expect_transaction_status()
        .returning(|_| Ok(stage(MessageStage::Error)));
    protocol.expect_recover().times(1).returning(|_, _, _| {
        Ok(RecoveryTicket {
            accepted: false,
            recovery_ref: None,
            message: Some("message already executed".to_string()),
        })
    });

    let mut handle = monitor(protocol, true).track(record());
    let done = handle.wait().await;
    assert_eq!(done.status, TransferStatus::Failed);
    assert_eq!(done.last_error.as_deref(), Some("message already executed"));
}

#[tokio::test]
async fn test_unknown_after_attempt_ceiling() {
    let mut protocol = MockBridgeProtocol::new();
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    protocol.expect_transaction_status().returning(move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
        Err(ProtocolError::Transient("connection reset".to_string()))
    });

    let mut handle = monitor(protocol, true).track(record());
    let done = handle.wait().await;

    assert_eq!(done.status, TransferStatus::Unknown);
    assert_eq!(done.poll_attempts, 5);
    assert_eq!(calls.load(Ordering::SeqCst), 5);
    let message = done.last_error.unwrap();
    assert!(message.contains("5 polls"));
    assert!(message.contains("connection reset"));
}

#[tokio::test]
async fn test_recovery_exhaustion_is_unknown() {
    let mut protocol = MockBridgeProtocol::new();
    protocol
        .expect_transaction_status()
        .returning(|_| Ok(stage(MessageStage::Error)));
    protocol.expect_recover().returning(|_, _, _| {
        Ok(RecoveryTicket {
            accepted: true,
            recovery_ref: Some("rec-3".to_string()),
            message: None,
        })
    });
    protocol
        .expect_recovery_status()
        .times(4)
        .returning(|_| {
            Ok(RecoveryProgress {
                status: RecoveryStatus::Pending,
                destination_tx_hash: None,
                message: None,
            })
        });

    let mut handle = monitor(protocol, true).track(record());
    let done = handle.wait().await;
    assert_eq!(done.status, TransferStatus::Unknown);
    assert!(done.last_error.unwrap().contains("rec-3"));
}

#[tokio::test]
async fn test_dropping_handle_stops_polling() {
    let mut protocol = MockBridgeProtocol::new();
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    protocol.expect_transaction_status().returning(move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(stage(MessageStage::GasPaid))
    });

    let config = MonitorConfig {
        initial_delay_ms: 30,
        ..fast_config()
    };
    let monitor = monitor_with(protocol, Arc::new(MemoryTransferStore::new()), config, true);
    let handle = monitor.track(record());
    drop(handle);

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    let snapshot = monitor.get(H256::repeat_byte(0xaa)).unwrap();
    assert_eq!(snapshot.status, TransferStatus::Pending);
    assert!(monitor.active().is_empty());
}

#[tokio::test]
async fn test_shutdown_cancels_detached_loops() {
    let mut protocol = MockBridgeProtocol::new();
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    protocol.expect_transaction_status().returning(move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(stage(MessageStage::GasPaid))
    });

    let config = MonitorConfig {
        initial_delay_ms: 30,
        ..fast_config()
    };
    let monitor = monitor_with(protocol, Arc::new(MemoryTransferStore::new()), config, true);
    monitor.track(record()).detach();
    assert_eq!(monitor.active().len(), 1);

    monitor.shutdown();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_duplicate_track_observes_existing_loop() {
    let mut protocol = MockBridgeProtocol::new();
    protocol
        .expect_transaction_status()
        .returning(|_| Ok(stage(MessageStage::GasPaid)));

    let config = MonitorConfig {
        initial_delay_ms: 1_000,
        ..fast_config()
    };
    let monitor = monitor_with(protocol, Arc::new(MemoryTransferStore::new()), config, true);
    let owner = monitor.track(record());
    let observer = monitor.track(record());
    drop(observer);

    assert_eq!(monitor.active().len(), 1);
    owner.stop();
    assert!(monitor.active().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_track_starts_one_loop() {
    let mut protocol = MockBridgeProtocol::new();
    protocol
        .expect_transaction_status()
        .returning(|_| Ok(stage(MessageStage::GasPaid)));

    let config = MonitorConfig {
        initial_delay_ms: 1_000,
        ..fast_config()
    };
    let monitor = Arc::new(monitor_with(
        protocol,
        Arc::new(MemoryTransferStore::new()),
        config,
        true,
    ));

    for _ in 0..50 {
        let barrier = Arc::new(tokio::sync::Barrier::new(8));
        let tasks = (0..8).map(|_| {
            let monitor = monitor.clone();
            let barrier = barrier.clone();
            tokio::spawn(async move {
                barrier.wait().await;
                monitor.track(record())
            })
        });
        let handles: Vec<TransferHandle> = futures::future::join_all(tasks)
            .await
            .into_iter()
            .map(|joined| joined.unwrap())
            .collect();

        assert_eq!(handles.iter().filter(|h| h.guard.is_some()).count(), 1);
        assert_eq!(monitor.active().len(), 1);

        // Dropping the owner stops the loop so the next round starts fresh
        drop(handles);
        assert!(monitor.active().is_empty());
    }
}

#[tokio::test]
async fn test_recovery_request_retried_with_configured_policy() {
    let mut protocol = MockBridgeProtocol::new();
    protocol
        .expect_transaction_status()
        .returning(|_| Ok(stage(MessageStage::Error)));
    let mut requests = 0;
    protocol.expect_recover().times(2).returning(move |_, _, _| {
        requests += 1;
        if requests == 1 {
            return Err(ProtocolError::Transient("502 Bad Gateway".to_string()));
        }
        Ok(RecoveryTicket {
            accepted: true,
            recovery_ref: Some("rec-4".to_string()),
            message: None,
        })
    });
    protocol.expect_recovery_status().returning(|_| {
        Ok(RecoveryProgress {
            status: RecoveryStatus::Completed,
            destination_tx_hash: Some(H256::repeat_byte(0xdd)),
            message: None,
        })
    });

    let config = MonitorConfig {
        recovery_retry: RetryConfig {
            max_attempts: 2,
            base_delay_ms: 1,
            backoff_factor: 1.0,
            max_delay_ms: 1,
        },
        ..fast_config()
    };
    let monitor = monitor_with(protocol, Arc::new(MemoryTransferStore::new()), config, true);
    let mut handle = monitor.track(record());

    let done = handle.wait().await;
    assert_eq!(done.status, TransferStatus::Executed);
    assert_eq!(done.recovery.unwrap().recovery_ref, "rec-4");
}

#[tokio::test]
async fn test_recovery_request_gives_up_after_configured_attempts() {
    let mut protocol = MockBridgeProtocol::new();
    protocol
        .expect_transaction_status()
        .returning(|_| Ok(stage(MessageStage::Error)));
    protocol
        .expect_recover()
        .times(2)
        .returning(|_, _, _| Err(ProtocolError::Transient("502 Bad Gateway".to_string())));

    let config = MonitorConfig {
        recovery_retry: RetryConfig {
            max_attempts: 2,
            base_delay_ms: 1,
            backoff_factor: 1.0,
            max_delay_ms: 1,
        },
        ..fast_config()
    };
    let monitor = monitor_with(protocol, Arc::new(MemoryTransferStore::new()), config, true);
    let mut handle = monitor.track(record());

    let done = handle.wait().await;
    assert_eq!(done.status, TransferStatus::Failed);
    assert!(done.last_error.unwrap().contains("Recovery request failed"));
}

#[tokio::test]
async fn test_resume_restarts_active_records() {
    let mut protocol = MockBridgeProtocol::new();
    protocol
        .expect_transaction_status()
        .returning(|_| Ok(stage(MessageStage::Executed)));

    let store = Arc::new(MemoryTransferStore::new());
    store.save(&record()).await.unwrap();
    let mut finished = TransferRecord::new(NewTransfer {
        source_tx_hash: H256::repeat_byte(0x01),
        ..record_inputs()
    });
    finished.status = TransferStatus::Failed;
    store.save(&finished).await.unwrap();

    let monitor = monitor_with(protocol, store.clone(), fast_config(), true);
    let mut updates = monitor.subscribe();
    assert_eq!(monitor.resume().await.unwrap(), 1);

    let update = tokio::time::timeout(Duration::from_secs(2), updates.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(update.tx_hash, H256::repeat_byte(0xaa));
    assert_eq!(update.status, TransferStatus::Executed);
}

fn record_inputs() -> NewTransfer {
    NewTransfer {
        source_tx_hash: H256::repeat_byte(0xaa),
        source_chain: 1,
        destination_chain: 42161,
        asset: "USDC".to_string(),
        amount: "100".to_string(),
        deposit_address: None,
        estimated_minutes: 19,
    }
}
