//! Contact repository

use crate::db::DatabasePool;
use crate::models::Contact;
use async_trait::async_trait;
use mailblast_common::types::{RecipientId, UserId};
use mailblast_common::{Error, Result};

/// Contact repository trait
#[async_trait]
pub trait ContactRepository: Send + Sync {
    async fn get(&self, user_id: UserId, id: RecipientId) -> Result<Option<Contact>>;
    async fn get_many(&self, user_id: UserId, ids: &[RecipientId]) -> Result<Vec<Contact>>;
    async fn list(&self, user_id: UserId) -> Result<Vec<Contact>>;
    async fn list_by_tag(&self, user_id: UserId, tag: &str) -> Result<Vec<Contact>>;
}

/// Database contact repository
pub struct DbContactRepository {
    pool: DatabasePool,
}

impl DbContactRepository {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ContactRepository for DbContactRepository {
    async fn get(&self, user_id: UserId, id: RecipientId) -> Result<Option<Contact>> {
        sqlx::query_as::<_, Contact>("SELECT * FROM contacts WHERE user_id = $1 AND id = $2")
            .bind(user_id)
            .bind(id)
            .fetch_optional(self.pool.pool())
            .await
            .map_err(|e| Error::Database(e.to_string()))
    }

    async fn get_many(&self, user_id: UserId, ids: &[RecipientId]) -> Result<Vec<Contact>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        sqlx::query_as::<_, Contact>(
            "SELECT * FROM contacts WHERE user_id = $1 AND id = ANY($2) ORDER BY created_at ASC",
        )
        .bind(user_id)
        .bind(ids)
        .fetch_all(self.pool.pool())
        .await
        .map_err(|e| Error::Database(e.to_string()))
    }

    async fn list(&self, user_id: UserId) -> Result<Vec<Contact>> {
        sqlx::query_as::<_, Contact>(
            "SELECT * FROM contacts WHERE user_id = $1 ORDER BY created_at ASC",
        )
        .bind(user_id)
        .fetch_all(self.pool.pool())
        .await
        .map_err(|e| Error::Database(e.to_string()))
    }

    async fn list_by_tag(&self, user_id: UserId, tag: &str) -> Result<Vec<Contact>> {
        sqlx::query_as::<_, Contact>(
            r#"
            SELECT * FROM contacts
            WHERE user_id = $1
            AND EXISTS (SELECT 1 FROM unnest(tags) AS t WHERE lower(t) = lower($2))
            ORDER BY created_at ASC
            "#,
        )
        .bind(user_id)
        .bind(tag)
        .fetch_all(self.pool.pool())
        .await
        .map_err(|e| Error::Database(e.to_string()))
    }
}
