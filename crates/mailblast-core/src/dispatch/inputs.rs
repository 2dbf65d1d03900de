//! Loads what a run needs from the table store

use mailblast_common::types::{Recipient, RecipientId, SmtpCredential, Template, TemplateId, UserId};
use mailblast_common::{Error, Result};
use mailblast_storage::{ContactRepository, SettingsRepository, TemplateRepository};
use std::sync::Arc;
use tracing::debug;

/// Which contacts a run targets
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecipientSelection {
    Ids(Vec<RecipientId>),
    Tag(String),
}

impl RecipientSelection {
    /// Explicit ids win over a tag; neither is a validation error
    pub fn from_parts(contact_ids: Vec<RecipientId>, tag: Option<String>) -> Result<Self> {
        if !contact_ids.is_empty() {
            return Ok(RecipientSelection::Ids(contact_ids));
        }
        match tag.map(|t| t.trim().to_string()).filter(|t| !t.is_empty()) {
            Some(tag) => Ok(RecipientSelection::Tag(tag)),
            None => Err(Error::Validation(
                "Select at least one contact or a tag".to_string(),
            )),
        }
    }
}

/// Template, recipients and sender credential of one run
#[derive(Debug, Clone)]
pub struct RunInputs {
    pub template: Template,
    pub recipients: Vec<Recipient>,
    pub credential: SmtpCredential,
}

/// Reads run inputs for an owner
pub struct InputLoader {
    contacts: Arc<dyn ContactRepository>,
    templates: Arc<dyn TemplateRepository>,
    settings: Arc<dyn SettingsRepository>,
}

impl InputLoader {
    pub fn new(
        contacts: Arc<dyn ContactRepository>,
        templates: Arc<dyn TemplateRepository>,
        settings: Arc<dyn SettingsRepository>,
    ) -> Self {
        Self {
            contacts,
            templates,
            settings,
        }
    }

    pub async fn template(&self, owner_id: UserId, template_id: TemplateId) -> Result<Template> {
        self.templates
            .get(owner_id, template_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("Template {} not found", template_id)))?
            .into_template()
    }

    pub async fn recipient(&self, owner_id: UserId, contact_id: RecipientId) -> Result<Recipient> {
        self.contacts
            .get(owner_id, contact_id)
            .await?
            .map(|c| c.into_recipient())
            .ok_or_else(|| Error::NotFound(format!("Contact {} not found", contact_id)))
    }

    pub async fn recipients(&self, owner_id: UserId, selection: &RecipientSelection) -> Result<Vec<Recipient>> {
        let contacts = match selection {
            RecipientSelection::Ids(ids) => self.contacts.get_many(owner_id, ids).await?,
            RecipientSelection::Tag(tag) => self.contacts.list_by_tag(owner_id, tag).await?,
        };
        Ok(contacts.into_iter().map(|c| c.into_recipient()).collect())
    }

    pub async fn credential(&self, owner_id: UserId) -> Result<SmtpCredential> {
        self.settings
            .get_smtp(owner_id)
            .await?
            .map(|s| s.into_credential())
            .ok_or_else(|| Error::Config("SMTP settings are not configured".to_string()))
    }

    /// Load everything a run needs; an empty selection is a validation error
    pub async fn load(
        &self,
        owner_id: UserId,
        template_id: TemplateId,
        selection: &RecipientSelection,
    ) -> Result<RunInputs> {
        let template = self.template(owner_id, template_id).await?;
        let credential = self.credential(owner_id).await?;
        let recipients = self.recipients(owner_id, selection).await?;
        if recipients.is_empty() {
            return Err(Error::Validation("No contacts match the selection".to_string()));
        }

        debug!(
            owner_id = %owner_id,
            template_id = %template_id,
            recipients = recipients.len(),
            "Loaded run inputs"
        );

        Ok(RunInputs {
            template,
            recipients,
            credential,
        })
    }
}
