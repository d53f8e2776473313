//! Database operations for the carts table.

use std::time::Duration;

use async_trait::async_trait;
use cartsync_engine::CartSnapshot;
use sqlx::{PgPool, Row};

use crate::store::{CartStateStore, StoreError};

/// Carts stored as one JSONB snapshot per (user, cart).
#[derive(Debug, Clone)]
pub struct PgCartStore {
    pool: PgPool,
    statement_timeout: Option<Duration>,
}

impl PgCartStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            statement_timeout: None,
        }
    }

    /// Have the server cancel and roll back writes that run past `timeout`.
    pub fn with_statement_timeout(mut self, timeout: Duration) -> Self {
        self.statement_timeout = Some(timeout);
        self
    }
}

#[async_trait]
impl CartStateStore for PgCartStore {
    async fn get_cart(
        &self,
        user_id: &str,
        cart_id: &str,
    ) -> Result<Option<CartSnapshot>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT snapshot
            FROM carts
            WHERE user_id = $1 AND cart_id = $2
            "#,
        )
        .bind(user_id)
        .bind(cart_id)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => {
                let value: serde_json::Value = row.try_get("snapshot")?;
                let snapshot = serde_json::from_value(value)
                    .map_err(|e| StoreError::Corrupt(format!("cart {}: {}", cart_id, e)))?;
                Ok(Some(snapshot))
            }
            None => Ok(None),
        }
    }

    async fn replace_cart(
        &self,
        user_id: &str,
        cart_id: &str,
        snapshot: &CartSnapshot,
    ) -> Result<CartSnapshot, StoreError> {
        let value = serde_json::to_value(snapshot)
            .map_err(|e| StoreError::Corrupt(format!("cart {}: {}", cart_id, e)))?;

        let mut tx = self.pool.begin().await?;

        if let Some(timeout) = self.statement_timeout {
            sqlx::query(&format!(
                "SET LOCAL statement_timeout = {}",
                timeout.as_millis().max(1)
            ))
            .execute(&mut *tx)
            .await?;
        }

        sqlx::query(
            r#"
            INSERT INTO carts (user_id, cart_id, snapshot, updated_at)
            VALUES ($1, $2, $3, NOW())
            ON CONFLICT (user_id, cart_id) DO UPDATE SET
                snapshot = EXCLUDED.snapshot,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(user_id)
        .bind(cart_id)
        .bind(&value)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(snapshot.clone())
    }
}
