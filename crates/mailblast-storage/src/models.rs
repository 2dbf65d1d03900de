//! Database models

use chrono::{DateTime, Utc};
use mailblast_common::types::{
    AttachmentRef, Recipient, RecipientId, RunId, SecurityMode, SmtpCredential, Template,
    TemplateId, UserId,
};
use mailblast_common::{Error, Result};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::collections::BTreeMap;

/// Contact model
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Contact {
    pub id: RecipientId,
    pub user_id: UserId,
    pub name: String,
    pub email: String,
    pub phone: Option<String>,
    pub legal_name: Option<String>,
    pub tags: Vec<String>,
    pub fields: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Contact {
    /// Convert into the engine's recipient type.
    ///
    /// Non-string custom field values are stringified; nulls are dropped.
    pub fn into_recipient(self) -> Recipient {
        let mut fields = BTreeMap::new();
        if let Some(object) = self.fields.as_object() {
            for (key, value) in object {
                let value = match value {
                    serde_json::Value::Null => continue,
                    serde_json::Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                fields.insert(key.clone(), value);
            }
        }

        Recipient {
            id: self.id,
            name: self.name,
            email: self.email,
            phone: self.phone,
            legal_name: self.legal_name,
            tags: self.tags,
            fields,
        }
    }
}

/// Template model
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct TemplateRecord {
    pub id: TemplateId,
    pub user_id: UserId,
    pub name: String,
    pub subject: Option<String>,
    pub body: String,
    pub signature: Option<String>,
    pub signature_image_url: Option<String>,
    pub attachments: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TemplateRecord {
    /// Convert into the engine's template type
    pub fn into_template(self) -> Result<Template> {
        let attachments: Vec<AttachmentRef> = if self.attachments.is_null() {
            Vec::new()
        } else {
            serde_json::from_value(self.attachments).map_err(|e| {
                Error::Validation(format!(
                    "Template {} has malformed attachments: {}",
                    self.id, e
                ))
            })?
        };

        Ok(Template {
            id: self.id,
            name: self.name,
            subject: self.subject.filter(|s| !s.trim().is_empty()),
            body: self.body,
            signature: self.signature.filter(|s| !s.trim().is_empty()),
            signature_image_url: self.signature_image_url.filter(|s| !s.trim().is_empty()),
            attachments,
        })
    }
}

/// SMTP settings model
#[derive(Debug, Clone, FromRow)]
pub struct SmtpSettings {
    pub user_id: UserId,
    pub smtp_host: String,
    pub smtp_port: i32,
    pub smtp_security: Option<String>,
    pub smtp_username: String,
    pub smtp_password: String,
    pub from_name: String,
    pub from_email: String,
    pub updated_at: DateTime<Utc>,
}

impl SmtpSettings {
    /// Convert into a credential.
    ///
    /// Out-of-range ports map to 0 so that credential validation rejects them.
    pub fn into_credential(self) -> SmtpCredential {
        let port = u16::try_from(self.smtp_port).unwrap_or(0);
        SmtpCredential {
            security: SecurityMode::from_setting(self.smtp_security.as_deref(), port),
            host: self.smtp_host.trim().to_string(),
            port,
            username: self.smtp_username,
            password: self.smtp_password,
            from_name: self.from_name,
            from_email: self.from_email.trim().to_string(),
        }
    }
}

/// Outcome of a delivery as stored in the history table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    Delivered,
    Error,
}

impl DeliveryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryStatus::Delivered => "delivered",
            DeliveryStatus::Error => "error",
        }
    }
}

impl std::fmt::Display for DeliveryStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for DeliveryStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "delivered" => Ok(DeliveryStatus::Delivered),
            "error" => Ok(DeliveryStatus::Error),
            _ => Err(format!("Invalid delivery status: {}", s)),
        }
    }
}

/// How a dispatch was triggered
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DispatchMode {
    Individual,
    #[default]
    Batch,
    Scheduled,
}

impl DispatchMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            DispatchMode::Individual => "individual",
            DispatchMode::Batch => "batch",
            DispatchMode::Scheduled => "scheduled",
        }
    }

    /// Normalize a free-form mode tag.
    ///
    /// Unrecognized values become [`DispatchMode::Batch`].
    pub fn coerce(value: &str) -> Self {
        match value.trim().to_lowercase().as_str() {
            "individual" | "single" | "unico" | "único" | "individual_send" => {
                DispatchMode::Individual
            }
            "scheduled" | "schedule" | "agendado" | "agendamento" => DispatchMode::Scheduled,
            "batch" | "bulk" | "lote" | "massa" | "em_massa" => DispatchMode::Batch,
            _ => DispatchMode::default(),
        }
    }
}

impl std::fmt::Display for DispatchMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Delivery history row
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct DeliveryHistory {
    pub id: uuid::Uuid,
    pub user_id: UserId,
    pub run_id: Option<RunId>,
    pub template_id: Option<TemplateId>,
    pub recipient_id: Option<RecipientId>,
    pub sender_name: String,
    pub sender_email: String,
    pub recipient_name: String,
    pub recipient_email: String,
    pub status: String,
    pub error_message: Option<String>,
    pub dispatch_mode: String,
    pub attempt_count: i32,
    pub provider_message_id: Option<String>,
    pub sent_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl DeliveryHistory {
    /// Get status enum
    pub fn status_enum(&self) -> Option<DeliveryStatus> {
        self.status.parse().ok()
    }
}

/// Create delivery history input
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewDeliveryHistory {
    pub user_id: UserId,
    pub run_id: Option<RunId>,
    pub template_id: Option<TemplateId>,
    pub recipient_id: Option<RecipientId>,
    pub sender_name: String,
    pub sender_email: String,
    pub recipient_name: String,
    pub recipient_email: String,
    pub status: DeliveryStatus,
    pub error_message: Option<String>,
    pub dispatch_mode: DispatchMode,
    pub attempt_count: i32,
    pub provider_message_id: Option<String>,
    pub sent_at: DateTime<Utc>,
}

/// Schedule status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScheduleStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl std::fmt::Display for ScheduleStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ScheduleStatus::Pending => write!(f, "pending"),
            ScheduleStatus::Running => write!(f, "running"),
            ScheduleStatus::Completed => write!(f, "completed"),
            ScheduleStatus::Failed => write!(f, "failed"),
            ScheduleStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

impl std::str::FromStr for ScheduleStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "pending" => Ok(ScheduleStatus::Pending),
            "running" => Ok(ScheduleStatus::Running),
            "completed" => Ok(ScheduleStatus::Completed),
            "failed" => Ok(ScheduleStatus::Failed),
            "cancelled" => Ok(ScheduleStatus::Cancelled),
            _ => Err(format!("Invalid schedule status: {}", s)),
        }
    }
}

/// Deferred dispatch model
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Schedule {
    pub id: uuid::Uuid,
    pub user_id: UserId,
    pub template_id: TemplateId,
    pub contact_ids: Vec<RecipientId>,
    pub tag: Option<String>,
    pub scheduled_at: DateTime<Utc>,
    pub status: String,
    pub run_id: Option<RunId>,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Schedule {
    /// Get status enum
    pub fn status_enum(&self) -> Option<ScheduleStatus> {
        self.status.parse().ok()
    }
}

/// Create schedule input
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewSchedule {
    pub user_id: UserId,
    pub template_id: TemplateId,
    #[serde(default)]
    pub contact_ids: Vec<RecipientId>,
    pub tag: Option<String>,
    pub scheduled_at: DateTime<Utc>,
}
