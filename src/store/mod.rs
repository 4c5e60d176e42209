//! Persistence for transfer records, so tracking survives a restart

mod postgres;

pub use postgres::PgTransferStore;

use crate::error::EngineResult;
use crate::monitor::TransferRecord;

use async_trait::async_trait;
use dashmap::DashMap;
use ethers::types::H256;

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TransferStore: Send + Sync {
    /// Insert or replace the record keyed by its source transaction hash
    async fn save(&self, record: &TransferRecord) -> EngineResult<()>;

    async fn get(&self, tx_hash: H256) -> EngineResult<Option<TransferRecord>>;

    /// Records not yet in a terminal state
    async fn list_active(&self) -> EngineResult<Vec<TransferRecord>>;
}

/// In-process store used when no database is configured
#[derive(Default)]
pub struct MemoryTransferStore {
    records: DashMap<H256, TransferRecord>,
}

impl MemoryTransferStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TransferStore for MemoryTransferStore {
    async fn save(&self, record: &TransferRecord) -> EngineResult<()> {
        self.records.insert(record.source_tx_hash, record.clone());
        Ok(())
    }

    async fn get(&self, tx_hash: H256) -> EngineResult<Option<TransferRecord>> {
        Ok(self.records.get(&tx_hash).map(|r| r.clone()))
    }

    async fn list_active(&self) -> EngineResult<Vec<TransferRecord>> {
        let mut active: Vec<TransferRecord> = self
            .records
            .iter()
            .filter(|r| !r.is_terminal())
            .map(|r| r.clone())
            .collect();
        active.sort_by_key(|r| r.created_at);
        Ok(active)
    }
}
