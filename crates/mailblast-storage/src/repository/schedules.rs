//! Schedule repository

use crate::db::DatabasePool;
use crate::models::{NewSchedule, Schedule, ScheduleStatus};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mailblast_common::types::RunId;
use mailblast_common::{Error, Result};
use uuid::Uuid;

/// Schedule repository trait
#[async_trait]
pub trait ScheduleRepository: Send + Sync {
    async fn create(&self, input: NewSchedule) -> Result<Schedule>;

    /// Atomically claim due pending schedules, marking them running
    async fn claim_due(&self, now: DateTime<Utc>, limit: i64) -> Result<Vec<Schedule>>;

    async fn update_status(
        &self,
        id: Uuid,
        status: ScheduleStatus,
        run_id: Option<RunId>,
        error: Option<&str>,
    ) -> Result<()>;
}

/// Database schedule repository
pub struct DbScheduleRepository {
    pool: DatabasePool,
}

impl DbScheduleRepository {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ScheduleRepository for DbScheduleRepository {
    async fn create(&self, input: NewSchedule) -> Result<Schedule> {
        sqlx::query_as::<_, Schedule>(
            r#"
            INSERT INTO schedules (id, user_id, template_id, contact_ids, tag, scheduled_at, status)
            VALUES ($1, $2, $3, $4, $5, $6, 'pending')
            RETURNING *
            "#,
        )
        .bind(Uuid::now_v7())
        .bind(input.user_id)
        .bind(input.template_id)
        .bind(&input.contact_ids)
        .bind(&input.tag)
        .bind(input.scheduled_at)
        .fetch_one(self.pool.pool())
        .await
        .map_err(|e| Error::Database(e.to_string()))
    }

    async fn claim_due(&self, now: DateTime<Utc>, limit: i64) -> Result<Vec<Schedule>> {
        sqlx::query_as::<_, Schedule>(
            r#"
            UPDATE schedules
            SET status = 'running', updated_at = NOW()
            WHERE id IN (
                SELECT id FROM schedules
                WHERE status = 'pending' AND scheduled_at <= $1
                ORDER BY scheduled_at ASC
                LIMIT $2
                FOR UPDATE SKIP LOCKED
            )
            RETURNING *
            "#,
        )
        .bind(now)
        .bind(limit)
        .fetch_all(self.pool.pool())
        .await
        .map_err(|e| Error::Database(e.to_string()))
    }

    async fn update_status(
        &self,
        id: Uuid,
        status: ScheduleStatus,
        run_id: Option<RunId>,
        error: Option<&str>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE schedules
            SET status = $2, run_id = COALESCE($3, run_id), last_error = $4, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(status.to_string())
        .bind(run_id)
        .bind(error)
        .execute(self.pool.pool())
        .await
        .map_err(|e| Error::Database(e.to_string()))?;

        Ok(())
    }
}
