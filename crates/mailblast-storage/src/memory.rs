//! In-memory table store.
//!
//! Implements every repository trait over process memory. Used for local
//! development without a database and as the backing store in tests.

use crate::models::{
    Contact, DeliveryHistory, NewDeliveryHistory, NewSchedule, Schedule, ScheduleStatus,
    SmtpSettings, TemplateRecord,
};
use crate::repository::{
    ContactRepository, DeliveryHistoryRepository, ScheduleRepository, SettingsRepository,
    TemplateRepository,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mailblast_common::types::{RecipientId, RunId, TemplateId, UserId};
use mailblast_common::{Error, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::RwLock;
use uuid::Uuid;

/// Table store held in memory
#[derive(Default)]
pub struct MemoryStore {
    contacts: RwLock<Vec<Contact>>,
    templates: RwLock<Vec<TemplateRecord>>,
    settings: RwLock<Vec<SmtpSettings>>,
    history: RwLock<Vec<DeliveryHistory>>,
    schedules: RwLock<Vec<Schedule>>,
    history_unavailable: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add_contact(&self, contact: Contact) {
        self.contacts.write().await.push(contact);
    }

    pub async fn add_template(&self, template: TemplateRecord) {
        self.templates.write().await.push(template);
    }

    pub async fn set_smtp(&self, settings: SmtpSettings) {
        let mut all = self.settings.write().await;
        all.retain(|s| s.user_id != settings.user_id);
        all.push(settings);
    }

    /// Snapshot of all history rows in insertion order
    pub async fn history(&self) -> Vec<DeliveryHistory> {
        self.history.read().await.clone()
    }

    /// Simulate an unavailable history table
    pub fn set_history_unavailable(&self, unavailable: bool) {
        self.history_unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub async fn schedule(&self, id: Uuid) -> Option<Schedule> {
        self.schedules.read().await.iter().find(|s| s.id == id).cloned()
    }
}

#[async_trait]
impl ContactRepository for MemoryStore {
    async fn get(&self, user_id: UserId, id: RecipientId) -> Result<Option<Contact>> {
        Ok(self
            .contacts
            .read()
            .await
            .iter()
            .find(|c| c.user_id == user_id && c.id == id)
            .cloned())
    }

    async fn get_many(&self, user_id: UserId, ids: &[RecipientId]) -> Result<Vec<Contact>> {
        Ok(self
            .contacts
            .read()
            .await
            .iter()
            .filter(|c| c.user_id == user_id && ids.contains(&c.id))
            .cloned()
            .collect())
    }

    async fn list(&self, user_id: UserId) -> Result<Vec<Contact>> {
        Ok(self
            .contacts
            .read()
            .await
            .iter()
            .filter(|c| c.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn list_by_tag(&self, user_id: UserId, tag: &str) -> Result<Vec<Contact>> {
        Ok(self
            .contacts
            .read()
            .await
            .iter()
            .filter(|c| c.user_id == user_id && c.tags.iter().any(|t| t.eq_ignore_ascii_case(tag)))
            .cloned()
            .collect())
    }
}

#[async_trait]
impl TemplateRepository for MemoryStore {
    async fn get(&self, user_id: UserId, id: TemplateId) -> Result<Option<TemplateRecord>> {
        Ok(self
            .templates
            .read()
            .await
            .iter()
            .find(|t| t.user_id == user_id && t.id == id)
            .cloned())
    }
}

#[async_trait]
impl SettingsRepository for MemoryStore {
    async fn get_smtp(&self, user_id: UserId) -> Result<Option<SmtpSettings>> {
        Ok(self
            .settings
            .read()
            .await
            .iter()
            .find(|s| s.user_id == user_id)
            .cloned())
    }
}

#[async_trait]
impl DeliveryHistoryRepository for MemoryStore {
    async fn insert_batch(&self, rows: &[NewDeliveryHistory]) -> Result<u64> {
        if self.history_unavailable.load(Ordering::SeqCst) {
            return Err(Error::Database("delivery_history is unavailable".to_string()));
        }

        let now = Utc::now();
        let mut history = self.history.write().await;
        for row in rows {
            history.push(DeliveryHistory {
                id: Uuid::now_v7(),
                user_id: row.user_id,
                run_id: row.run_id,
                template_id: row.template_id,
                recipient_id: row.recipient_id,
                sender_name: row.sender_name.clone(),
                sender_email: row.sender_email.clone(),
                recipient_name: row.recipient_name.clone(),
                recipient_email: row.recipient_email.clone(),
                status: row.status.to_string(),
                error_message: row.error_message.clone(),
                dispatch_mode: row.dispatch_mode.to_string(),
                attempt_count: row.attempt_count,
                provider_message_id: row.provider_message_id.clone(),
                sent_at: row.sent_at,
                created_at: now,
            });
        }
        Ok(rows.len() as u64)
    }

    async fn list(&self, user_id: UserId, limit: i64, offset: i64) -> Result<Vec<DeliveryHistory>> {
        let mut rows: Vec<DeliveryHistory> = self
            .history
            .read()
            .await
            .iter()
            .filter(|h| h.user_id == user_id)
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.sent_at.cmp(&a.sent_at));

        Ok(rows
            .into_iter()
            .skip(offset.max(0) as usize)
            .take(limit.max(0) as usize)
            .collect())
    }

    async fn count(&self, user_id: UserId) -> Result<i64> {
        Ok(self
            .history
            .read()
            .await
            .iter()
            .filter(|h| h.user_id == user_id)
            .count() as i64)
    }
}

#[async_trait]
impl ScheduleRepository for MemoryStore {
    async fn create(&self, input: NewSchedule) -> Result<Schedule> {
        let now = Utc::now();
        let schedule = Schedule {
            id: Uuid::now_v7(),
            user_id: input.user_id,
            template_id: input.template_id,
            contact_ids: input.contact_ids,
            tag: input.tag,
            scheduled_at: input.scheduled_at,
            status: ScheduleStatus::Pending.to_string(),
            run_id: None,
            last_error: None,
            created_at: now,
            updated_at: now,
        };
        self.schedules.write().await.push(schedule.clone());
        Ok(schedule)
    }

    async fn claim_due(&self, now: DateTime<Utc>, limit: i64) -> Result<Vec<Schedule>> {
        let mut schedules = self.schedules.write().await;
        let mut claimed = Vec::new();

        for schedule in schedules.iter_mut() {
            if claimed.len() as i64 >= limit {
                break;
            }
            if schedule.status_enum() == Some(ScheduleStatus::Pending) && schedule.scheduled_at <= now {
                schedule.status = ScheduleStatus::Running.to_string();
                schedule.updated_at = now;
                claimed.push(schedule.clone());
            }
        }

        Ok(claimed)
    }

    async fn update_status(
        &self,
        id: Uuid,
        status: ScheduleStatus,
        run_id: Option<RunId>,
        error: Option<&str>,
    ) -> Result<()> {
        let mut schedules = self.schedules.write().await;
        let schedule = schedules
            .iter_mut()
            .find(|s| s.id == id)
            .ok_or_else(|| Error::NotFound(format!("schedule {}", id)))?;

        schedule.status = status.to_string();
        if run_id.is_some() {
            schedule.run_id = run_id;
        }
        schedule.last_error = error.map(str::to_string);
        schedule.updated_at = Utc::now();
        Ok(())
    }
}
