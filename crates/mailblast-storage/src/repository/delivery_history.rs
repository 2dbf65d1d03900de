//! Delivery history repository
//!
//! Rows are append-only: there is no update path, a delivery is
//! recorded exactly once when its job reaches a terminal state.

use crate::db::DatabasePool;
use crate::models::{DeliveryHistory, NewDeliveryHistory};
use async_trait::async_trait;
use mailblast_common::types::UserId;
use mailblast_common::{Error, Result};
use uuid::Uuid;

/// Delivery history repository trait
#[async_trait]
pub trait DeliveryHistoryRepository: Send + Sync {
    /// Insert rows in a single transaction, returning the number written
    async fn insert_batch(&self, rows: &[NewDeliveryHistory]) -> Result<u64>;
    async fn list(&self, user_id: UserId, limit: i64, offset: i64) -> Result<Vec<DeliveryHistory>>;
    async fn count(&self, user_id: UserId) -> Result<i64>;
}

/// Database delivery history repository
pub struct DbDeliveryHistoryRepository {
    pool: DatabasePool,
}

impl DbDeliveryHistoryRepository {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl DeliveryHistoryRepository for DbDeliveryHistoryRepository {
    async fn insert_batch(&self, rows: &[NewDeliveryHistory]) -> Result<u64> {
        if rows.is_empty() {
            return Ok(0);
        }

        let mut count = 0u64;
        let mut tx = self
            .pool
            .pool()
            .begin()
            .await
            .map_err(|e| Error::Database(e.to_string()))?;

        for row in rows {
            let result = sqlx::query(
                r#"
                INSERT INTO delivery_history (
                    id, user_id, run_id, template_id, recipient_id,
                    sender_name, sender_email, recipient_name, recipient_email,
                    status, error_message, dispatch_mode, attempt_count,
                    provider_message_id, sent_at
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
                "#,
            )
            .bind(Uuid::now_v7())
            .bind(row.user_id)
            .bind(row.run_id)
            .bind(row.template_id)
            .bind(row.recipient_id)
            .bind(&row.sender_name)
            .bind(&row.sender_email)
            .bind(&row.recipient_name)
            .bind(&row.recipient_email)
            .bind(row.status.as_str())
            .bind(&row.error_message)
            .bind(row.dispatch_mode.as_str())
            .bind(row.attempt_count)
            .bind(&row.provider_message_id)
            .bind(row.sent_at)
            .execute(&mut *tx)
            .await
            .map_err(|e| Error::Database(e.to_string()))?;

            count += result.rows_affected();
        }

        tx.commit()
            .await
            .map_err(|e| Error::Database(e.to_string()))?;

        Ok(count)
    }

    async fn list(&self, user_id: UserId, limit: i64, offset: i64) -> Result<Vec<DeliveryHistory>> {
        sqlx::query_as::<_, DeliveryHistory>(
            r#"
            SELECT * FROM delivery_history
            WHERE user_id = $1
            ORDER BY sent_at DESC
            LIMIT $2 OFFSET $3
            "#,
        )
        .bind(user_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(self.pool.pool())
        .await
        .map_err(|e| Error::Database(e.to_string()))
    }

    async fn count(&self, user_id: UserId) -> Result<i64> {
        let row: (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM delivery_history WHERE user_id = $1")
                .bind(user_id)
                .fetch_one(self.pool.pool())
                .await
                .map_err(|e| Error::Database(e.to_string()))?;

        Ok(row.0)
    }
}
