//! Account settings repository

use crate::db::DatabasePool;
use crate::models::SmtpSettings;
use async_trait::async_trait;
use mailblast_common::types::UserId;
use mailblast_common::{Error, Result};

/// Settings repository trait
#[async_trait]
pub trait SettingsRepository: Send + Sync {
    /// Get the SMTP settings of an account
    async fn get_smtp(&self, user_id: UserId) -> Result<Option<SmtpSettings>>;
}

/// Database settings repository
pub struct DbSettingsRepository {
    pool: DatabasePool,
}

impl DbSettingsRepository {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SettingsRepository for DbSettingsRepository {
    async fn get_smtp(&self, user_id: UserId) -> Result<Option<SmtpSettings>> {
        sqlx::query_as::<_, SmtpSettings>(
            r#"
            SELECT user_id, smtp_host, smtp_port, smtp_security, smtp_username,
                   smtp_password, from_name, from_email, updated_at
            FROM settings
            WHERE user_id = $1
            "#,
        )
        .bind(user_id)
        .fetch_optional(self.pool.pool())
        .await
        .map_err(|e| Error::Database(e.to_string()))
    }
}
