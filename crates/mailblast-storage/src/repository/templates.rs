//! Template repository

use crate::db::DatabasePool;
use crate::models::TemplateRecord;
use async_trait::async_trait;
use mailblast_common::types::{TemplateId, UserId};
use mailblast_common::{Error, Result};

/// Template repository trait
#[async_trait]
pub trait TemplateRepository: Send + Sync {
    async fn get(&self, user_id: UserId, id: TemplateId) -> Result<Option<TemplateRecord>>;
}

/// Database template repository
pub struct DbTemplateRepository {
    pool: DatabasePool,
}

impl DbTemplateRepository {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TemplateRepository for DbTemplateRepository {
    async fn get(&self, user_id: UserId, id: TemplateId) -> Result<Option<TemplateRecord>> {
        sqlx::query_as::<_, TemplateRecord>(
            "SELECT * FROM templates WHERE user_id = $1 AND id = $2",
        )
        .bind(user_id)
        .bind(id)
        .fetch_optional(self.pool.pool())
        .await
        .map_err(|e| Error::Database(e.to_string()))
    }
}
