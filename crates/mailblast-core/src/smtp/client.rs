//! SMTP Delivery Client - Sends one message to one recipient

use super::message::{build_message, generate_message_id};
use super::reply::{classify_reply, parse_retry_after};
use crate::attachments::LoadedAttachment;
use crate::error::{DeliveryError, ErrorKind};
use crate::template::RenderedMessage;
use async_trait::async_trait;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Tokio1Executor};
use mailblast_common::config::DispatchConfig;
use mailblast_common::types::{Recipient, SecurityMode, SmtpCredential};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use tracing::{debug, warn};

/// Cached transports above this count are dropped wholesale
const MAX_CACHED_TRANSPORTS: usize = 64;

/// Successful hand-off to the SMTP server
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentReceipt {
    /// Message-ID header of the sent message
    pub message_id: String,
}

/// Async email sending trait.
///
/// Failures come back as a [`DeliveryError`] tagged with an [`ErrorKind`]
/// so callers can tell retriable transport errors from fatal ones.
#[async_trait]
pub trait DeliveryClient: Send + Sync {
    async fn send(
        &self,
        credential: &SmtpCredential,
        message: &RenderedMessage,
        recipient: &Recipient,
        attachments: &[LoadedAttachment],
    ) -> Result<SentReceipt, DeliveryError>;
}

/// SMTP delivery client backed by lettre's pooled async transport
pub struct LettreDeliveryClient {
    /// Domain used in Message-IDs when the sender address has none
    hostname: String,
    connect_timeout: Duration,
    send_timeout: Duration,
    transports: Mutex<HashMap<SmtpCredential, AsyncSmtpTransport<Tokio1Executor>>>,
}

impl LettreDeliveryClient {
    /// Create a new client
    pub fn new(config: &DispatchConfig, hostname: &str) -> Self {
        Self {
            hostname: hostname.to_string(),
            connect_timeout: Duration::from_secs(config.connect_timeout_secs.max(1)),
            send_timeout: Duration::from_secs(config.send_timeout_secs.max(1)),
            transports: Mutex::new(HashMap::new()),
        }
    }

    /// Get or build the transport for a credential
    fn transport(&self, credential: &SmtpCredential) -> Result<AsyncSmtpTransport<Tokio1Executor>, DeliveryError> {
        let mut transports = self.transports.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(transport) = transports.get(credential) {
            return Ok(transport.clone());
        }

        let host = credential.host.trim();
        let builder = match credential.security {
            SecurityMode::Tls => AsyncSmtpTransport::<Tokio1Executor>::relay(host).map_err(|e| {
                DeliveryError::new(
                    ErrorKind::Configuration,
                    format!("Failed to create SMTP transport: {}", e),
                )
            })?,
            SecurityMode::StartTls => AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(host).map_err(|e| {
                DeliveryError::new(
                    ErrorKind::Configuration,
                    format!("Failed to create SMTP transport: {}", e),
                )
            })?,
            SecurityMode::Plain => AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(host),
        };

        let transport = builder
            .port(credential.port)
            .credentials(Credentials::new(
                credential.username.clone(),
                credential.password.clone(),
            ))
            .timeout(Some(self.connect_timeout))
            .build();

        if transports.len() >= MAX_CACHED_TRANSPORTS {
            transports.clear();
        }
        transports.insert(credential.clone(), transport.clone());

        debug!(host, port = credential.port, security = ?credential.security, "Created SMTP transport");

        Ok(transport)
    }

    /// Drop the cached transport of a credential
    fn forget(&self, credential: &SmtpCredential) {
        let mut transports = self.transports.lock().unwrap_or_else(|e| e.into_inner());
        transports.remove(credential);
    }
}

#[async_trait]
impl DeliveryClient for LettreDeliveryClient {
    async fn send(
        &self,
        credential: &SmtpCredential,
        message: &RenderedMessage,
        recipient: &Recipient,
        attachments: &[LoadedAttachment],
    ) -> Result<SentReceipt, DeliveryError> {
        let message_id = generate_message_id(&credential.from_email, &self.hostname);
        let email = build_message(credential, message, recipient, attachments, &message_id)?;
        let transport = self.transport(credential)?;

        match tokio::time::timeout(self.send_timeout, transport.send(email)).await {
            Ok(Ok(response)) => {
                debug!(
                    recipient = %recipient.email,
                    code = %response.code(),
                    "Email accepted by SMTP server"
                );
                Ok(SentReceipt { message_id })
            }
            Ok(Err(e)) => {
                let error = delivery_error(&e);
                if error.kind == ErrorKind::Authentication {
                    self.forget(credential);
                }
                Err(error)
            }
            Err(_) => {
                warn!(
                    recipient = %recipient.email,
                    timeout_secs = self.send_timeout.as_secs(),
                    "SMTP send timed out"
                );
                Err(DeliveryError::new(
                    ErrorKind::TransientTransport,
                    format!("SMTP send timed out after {}s", self.send_timeout.as_secs()),
                ))
            }
        }
    }
}

/// Convert a lettre SMTP error into a classified delivery error
fn delivery_error(err: &lettre::transport::smtp::Error) -> DeliveryError {
    let text = err.to_string();
    let code = err.status().and_then(|code| code.to_string().parse::<u16>().ok());

    let kind = if err.is_timeout() {
        ErrorKind::TransientTransport
    } else if err.is_tls() {
        ErrorKind::Configuration
    } else {
        classify_reply(code, &text)
    };

    DeliveryError::new(kind, text.clone()).with_retry_after(parse_retry_after(&text))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn credential(security: SecurityMode) -> SmtpCredential {
        SmtpCredential {
            host: "smtp.example.com".to_string(),
            port: 2525,
            security,
            username: "news@acme.com".to_string(),
            password: "secret".to_string(),
            from_name: "Acme".to_string(),
            from_email: "news@acme.com".to_string(),
        }
    }

    #[tokio::test]
    async fn test_transport_is_cached_per_credential() {
        let client = LettreDeliveryClient::new(&DispatchConfig::default(), "localhost");

        client.transport(&credential(SecurityMode::StartTls)).unwrap();
        client.transport(&credential(SecurityMode::StartTls)).unwrap();
        client.transport(&credential(SecurityMode::Plain)).unwrap();
        assert_eq!(client.transports.lock().unwrap().len(), 2);

        client.forget(&credential(SecurityMode::Plain));
        assert_eq!(client.transports.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_invalid_recipient_fails_before_connecting() {
        let client = LettreDeliveryClient::new(&DispatchConfig::default(), "localhost");
        let message = RenderedMessage {
            subject: "Oi".to_string(),
            body: "Olá".to_string(),
            is_html: false,
        };
        let recipient = Recipient::new(uuid::Uuid::nil(), "Ana", "ana(at)example");

        let err = client
            .send(&credential(SecurityMode::Plain), &message, &recipient, &[])
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::PermanentRejection);
        assert!(client.transports.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unreachable_server_is_transient() {
        let mut config = DispatchConfig::default();
        config.connect_timeout_secs = 1;
        config.send_timeout_secs = 2;
        let client = LettreDeliveryClient::new(&config, "localhost");

        let mut credential = credential(SecurityMode::Plain);
        credential.host = "127.0.0.1".to_string();
        credential.port = 1;

        let message = RenderedMessage {
            subject: "Oi".to_string(),
            body: "Olá".to_string(),
            is_html: false,
        };
        let recipient = Recipient::new(uuid::Uuid::nil(), "Ana", "ana@example.com");

        let err = client
            .send(&credential, &message, &recipient, &[])
            .await
            .unwrap_err();
        assert!(err.kind.is_retriable(), "unexpected kind {:?}", err.kind);
    }
}
