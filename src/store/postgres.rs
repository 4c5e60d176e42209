//! PostgreSQL transfer store

use super::TransferStore;
use crate::config::DatabaseConfig;
use crate::error::{EngineError, EngineResult};
use crate::monitor::{RecoveryAttempt, TransferRecord, TransferStatus};
use crate::protocol::RecoveryStatus;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ethers::types::{Address, H256};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::Row;
use std::str::FromStr;
use tracing::{debug, info};
use uuid::Uuid;

const SELECT_COLUMNS: &str = r#"
    SELECT id, source_tx_hash, destination_tx_hash, source_chain, destination_chain,
           asset, amount, deposit_address, status, created_at, estimated_completion_at,
           updated_at, poll_attempts, last_error, recovery_id, recovery_ref,
           recovery_status, recovery_created_at
    FROM transfer_records
"#;

/// Transfer store backed by PostgreSQL
pub struct PgTransferStore {
    pool: PgPool,
}

impl PgTransferStore {
    pub async fn new(config: &DatabaseConfig) -> EngineResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .connect(&config.url)
            .await?;

        Ok(Self { pool })
    }

    /// Run database migrations
    pub async fn run_migrations(&self) -> EngineResult<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS transfer_records (
                source_tx_hash VARCHAR(66) PRIMARY KEY,
                id UUID NOT NULL,
                destination_tx_hash VARCHAR(66),
                source_chain BIGINT NOT NULL,
                destination_chain BIGINT NOT NULL,
                asset VARCHAR(32) NOT NULL,
                amount VARCHAR(78) NOT NULL,
                deposit_address VARCHAR(42),
                status VARCHAR(20) NOT NULL,
                created_at TIMESTAMPTZ NOT NULL,
                estimated_completion_at TIMESTAMPTZ NOT NULL,
                updated_at TIMESTAMPTZ NOT NULL,
                poll_attempts INTEGER NOT NULL DEFAULT 0,
                last_error TEXT,
                recovery_id UUID,
                recovery_ref TEXT,
                recovery_status VARCHAR(20),
                recovery_created_at TIMESTAMPTZ
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_transfer_records_status
            ON transfer_records (status)
            "#,
        )
        .execute(&self.pool)
        .await?;

        info!("Database migrations complete");
        Ok(())
    }

    /// Health check
    pub async fn health_check(&self) -> EngineResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

#[async_trait]
impl TransferStore for PgTransferStore {
    async fn save(&self, record: &TransferRecord) -> EngineResult<()> {
        let recovery = record.recovery.as_ref();

        sqlx::query(
            r#"
            INSERT INTO transfer_records (
                source_tx_hash, id, destination_tx_hash, source_chain, destination_chain,
                asset, amount, deposit_address, status, created_at, estimated_completion_at,
                updated_at, poll_attempts, last_error, recovery_id, recovery_ref,
                recovery_status, recovery_created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18)
            ON CONFLICT (source_tx_hash) DO UPDATE SET
                destination_tx_hash = EXCLUDED.destination_tx_hash,
                status = EXCLUDED.status,
                updated_at = EXCLUDED.updated_at,
                poll_attempts = EXCLUDED.poll_attempts,
                last_error = EXCLUDED.last_error,
                recovery_id = EXCLUDED.recovery_id,
                recovery_ref = EXCLUDED.recovery_ref,
                recovery_status = EXCLUDED.recovery_status,
                recovery_created_at = EXCLUDED.recovery_created_at
            "#,
        )
        .bind(format!("{:?}", record.source_tx_hash))
        .bind(record.id)
        .bind(record.destination_tx_hash.map(|h| format!("{:?}", h)))
        .bind(record.source_chain as i64)
        .bind(record.destination_chain as i64)
        .bind(&record.asset)
        .bind(&record.amount)
        .bind(record.deposit_address.map(|a| format!("{:?}", a)))
        .bind(record.status.as_str())
        .bind(record.created_at)
        .bind(record.estimated_completion_at)
        .bind(record.updated_at)
        .bind(record.poll_attempts as i32)
        .bind(&record.last_error)
        .bind(recovery.map(|r| r.id))
        .bind(recovery.map(|r| r.recovery_ref.clone()))
        .bind(recovery.map(|r| recovery_status_str(r.status)))
        .bind(recovery.map(|r| r.created_at))
        .execute(&self.pool)
        .await?;

        debug!(
            "Saved transfer {:?} with status {}",
            record.source_tx_hash, record.status
        );
        Ok(())
    }

    async fn get(&self, tx_hash: H256) -> EngineResult<Option<TransferRecord>> {
        let query = format!("{} WHERE source_tx_hash = $1", SELECT_COLUMNS);
        let row = sqlx::query(&query)
            .bind(format!("{:?}", tx_hash))
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(row_to_record).transpose()
    }

    async fn list_active(&self) -> EngineResult<Vec<TransferRecord>> {
        let query = format!(
            "{} WHERE status NOT IN ('executed', 'failed', 'unknown') ORDER BY created_at",
            SELECT_COLUMNS
        );
        let rows = sqlx::query(&query).fetch_all(&self.pool).await?;

        rows.iter().map(row_to_record).collect()
    }
}

fn recovery_status_str(status: RecoveryStatus) -> &'static str {
    match status {
        RecoveryStatus::Pending => "pending",
        RecoveryStatus::Completed => "completed",
        RecoveryStatus::Failed => "failed",
    }
}

fn parse_recovery_status(s: &str) -> EngineResult<RecoveryStatus> {
    match s {
        "pending" => Ok(RecoveryStatus::Pending),
        "completed" => Ok(RecoveryStatus::Completed),
        "failed" => Ok(RecoveryStatus::Failed),
        other => Err(EngineError::Internal(format!(
            "Stored recovery status is invalid: {}",
            other
        ))),
    }
}

fn parse_hash(s: &str) -> EngineResult<H256> {
    H256::from_str(s).map_err(|e| EngineError::Internal(format!("Stored hash {} is invalid: {}", s, e)))
}

fn row_to_record(row: &PgRow) -> EngineResult<TransferRecord> {
    let source_tx_hash = parse_hash(&row.try_get::<String, _>("source_tx_hash")?)?;

    let destination_tx_hash = row
        .try_get::<Option<String>, _>("destination_tx_hash")?
        .map(|h| parse_hash(&h))
        .transpose()?;

    let deposit_address = row
        .try_get::<Option<String>, _>("deposit_address")?
        .map(|a| {
            Address::from_str(&a)
                .map_err(|e| EngineError::Internal(format!("Stored address {} is invalid: {}", a, e)))
        })
        .transpose()?;

    let status = row
        .try_get::<String, _>("status")?
        .parse::<TransferStatus>()
        .map_err(EngineError::Internal)?;

    let recovery = match row.try_get::<Option<Uuid>, _>("recovery_id")? {
        Some(id) => Some(RecoveryAttempt {
            id,
            parent_tx_hash: source_tx_hash,
            recovery_ref: row
                .try_get::<Option<String>, _>("recovery_ref")?
                .unwrap_or_default(),
            status: parse_recovery_status(
                &row.try_get::<Option<String>, _>("recovery_status")?
                    .unwrap_or_else(|| "pending".to_string()),
            )?,
            created_at: row
                .try_get::<Option<DateTime<Utc>>, _>("recovery_created_at")?
                .unwrap_or_else(Utc::now),
        }),
        None => None,
    };

    Ok(TransferRecord {
        id: row.try_get("id")?,
        source_tx_hash,
        destination_tx_hash,
        source_chain: row.try_get::<i64, _>("source_chain")? as u64,
        destination_chain: row.try_get::<i64, _>("destination_chain")? as u64,
        asset: row.try_get("asset")?,
        amount: row.try_get("amount")?,
        deposit_address,
        status,
        created_at: row.try_get("created_at")?,
        estimated_completion_at: row.try_get("estimated_completion_at")?,
        updated_at: row.try_get("updated_at")?,
        poll_attempts: row.try_get::<i32, _>("poll_attempts")? as u32,
        last_error: row.try_get("last_error")?,
        recovery,
    })
}
