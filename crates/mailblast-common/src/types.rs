//! Common types for MailBlast

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

/// Unique identifier for account owners
pub type UserId = Uuid;

/// Unique identifier for contacts
pub type RecipientId = Uuid;

/// Unique identifier for templates
pub type TemplateId = Uuid;

/// Unique identifier for dispatch runs
pub type RunId = Uuid;

/// Email address
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EmailAddress {
    pub local: String,
    pub domain: String,
}

impl EmailAddress {
    /// Create a new email address
    pub fn new(local: impl Into<String>, domain: impl Into<String>) -> Self {
        Self {
            local: local.into(),
            domain: domain.into(),
        }
    }

    /// Parse an email address from a string
    pub fn parse(s: &str) -> Option<Self> {
        let (local, domain) = s.trim().rsplit_once('@')?;
        if local.is_empty() || domain.is_empty() || !domain.contains('.') {
            return None;
        }
        if local.contains(char::is_whitespace) || domain.contains(char::is_whitespace) {
            return None;
        }
        Some(Self::new(local, domain))
    }
}

impl fmt::Display for EmailAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.local, self.domain)
    }
}

impl std::str::FromStr for EmailAddress {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s).ok_or_else(|| crate::Error::Validation(format!("Invalid email address: {}", s)))
    }
}

/// Authenticated account as reported by the identity provider
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CurrentUser {
    pub id: UserId,
    pub email: String,
}

/// A contact that receives a message.
///
/// Immutable for the lifetime of a dispatch run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recipient {
    pub id: RecipientId,
    /// Display name
    pub name: String,
    pub email: String,
    #[serde(default)]
    pub phone: Option<String>,
    /// Registered company name ("razão social")
    #[serde(default)]
    pub legal_name: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    /// Free-form fields used for placeholder substitution
    #[serde(default)]
    pub fields: BTreeMap<String, String>,
}

impl Recipient {
    /// Create a recipient with only the mandatory attributes set
    pub fn new(id: RecipientId, name: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            email: email.into(),
            phone: None,
            legal_name: None,
            tags: Vec::new(),
            fields: BTreeMap::new(),
        }
    }

    /// Look up a custom field, ignoring blank values
    pub fn field(&self, key: &str) -> Option<&str> {
        self.fields
            .get(key)
            .map(String::as_str)
            .filter(|v| !v.trim().is_empty())
    }

    /// Check whether the contact carries a tag (case-insensitive)
    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| t.eq_ignore_ascii_case(tag))
    }
}

/// Reference to a stored attachment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttachmentRef {
    /// File name presented to the recipient
    pub name: String,
    /// Size in bytes as recorded at upload time
    pub size: u64,
    /// MIME type; inferred from the file name when absent
    #[serde(default)]
    pub content_type: Option<String>,
    /// Public URL or blob-store path
    pub url: String,
}

/// Message template
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Template {
    pub id: TemplateId,
    pub name: String,
    /// Subject override; the template name is used when absent
    #[serde(default)]
    pub subject: Option<String>,
    /// Text or HTML body with placeholder tokens
    pub body: String,
    #[serde(default)]
    pub signature: Option<String>,
    #[serde(default)]
    pub signature_image_url: Option<String>,
    #[serde(default)]
    pub attachments: Vec<AttachmentRef>,
}

/// Transport security for an SMTP connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SecurityMode {
    /// No encryption
    Plain,
    /// Upgrade a plain connection with STARTTLS
    #[default]
    StartTls,
    /// Implicit TLS from the first byte
    Tls,
}

impl SecurityMode {
    /// Parse a stored security setting, falling back on the port convention
    pub fn from_setting(value: Option<&str>, port: u16) -> Self {
        match value.map(|v| v.trim().to_ascii_lowercase()).as_deref() {
            Some("plain") | Some("none") => SecurityMode::Plain,
            Some("starttls") => SecurityMode::StartTls,
            Some("tls") | Some("ssl") | Some("smtps") => SecurityMode::Tls,
            _ if port == 465 => SecurityMode::Tls,
            _ => SecurityMode::StartTls,
        }
    }
}

/// SMTP connection parameters used for one dispatch run.
///
/// Read-only for the engine; shared between all jobs of a run.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SmtpCredential {
    pub host: String,
    pub port: u16,
    #[serde(default)]
    pub security: SecurityMode,
    pub username: String,
    pub password: String,
    pub from_name: String,
    pub from_email: String,
}

impl SmtpCredential {
    /// Check the structural preconditions for connecting
    pub fn validate(&self) -> crate::Result<()> {
        if self.host.trim().is_empty() {
            return Err(crate::Error::Config("SMTP host is missing".to_string()));
        }
        if self.port == 0 {
            return Err(crate::Error::Config("SMTP port is missing".to_string()));
        }
        if self.username.trim().is_empty() {
            return Err(crate::Error::Config("SMTP username is missing".to_string()));
        }
        if EmailAddress::parse(&self.from_email).is_none() {
            return Err(crate::Error::Config(format!(
                "Sender address is invalid: {:?}",
                self.from_email
            )));
        }
        Ok(())
    }
}

impl fmt::Debug for SmtpCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SmtpCredential")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("security", &self.security)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("from_name", &self.from_name)
            .field("from_email", &self.from_email)
            .finish()
    }
}
