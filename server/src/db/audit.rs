//! Database operations for the sync_records table.

use async_trait::async_trait;
use sqlx::PgPool;

use crate::store::{AuditLog, StoreError, SyncRecord};

/// Append-only audit log.
#[derive(Debug, Clone)]
pub struct PgAuditLog {
    pool: PgPool,
}

impl PgAuditLog {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AuditLog for PgAuditLog {
    async fn record_sync(&self, record: &SyncRecord) -> Result<(), StoreError> {
        let outcome = serde_json::to_value(&record.outcome)
            .map_err(|e| StoreError::Corrupt(format!("sync {}: {}", record.sync_id, e)))?;

        sqlx::query(
            r#"
            INSERT INTO sync_records (
                sync_id, user_id, cart_id, device_id, sync_type,
                phase, strategy, conflict_count, outcome, recorded_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(&record.sync_id)
        .bind(&record.user_id)
        .bind(&record.cart_id)
        .bind(&record.device_id)
        .bind(record.sync_type.as_str())
        .bind(record.phase.as_str())
        .bind(record.strategy.map(|s| s.as_str()))
        .bind(record.conflict_count as i32)
        .bind(&outcome)
        .bind(record.recorded_at as i64)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
