//! Outgoing message construction

use crate::attachments::LoadedAttachment;
use crate::error::{DeliveryError, ErrorKind};
use crate::template::RenderedMessage;
use chrono::Utc;
use lettre::message::header::ContentType;
use lettre::message::{Attachment, Mailbox, MultiPart, SinglePart};
use lettre::{Address, Message};
use mailblast_common::types::{Recipient, SmtpCredential};
use uuid::Uuid;

/// Infer a MIME type from a file name, falling back to `application/octet-stream`
pub fn infer_content_type(filename: &str) -> String {
    mime_guess::from_path(filename)
        .first_or_octet_stream()
        .essence_str()
        .to_string()
}

/// Generate a Message-ID in the sender's domain
pub fn generate_message_id(from_email: &str, fallback_domain: &str) -> String {
    let domain = from_email
        .rsplit_once('@')
        .map(|(_, domain)| domain.trim())
        .filter(|domain| !domain.is_empty())
        .unwrap_or(fallback_domain);
    format!("<{}.{}@{}>", Uuid::now_v7().simple(), Utc::now().timestamp(), domain)
}

/// Build the MIME message for one recipient
pub fn build_message(
    credential: &SmtpCredential,
    message: &RenderedMessage,
    recipient: &Recipient,
    attachments: &[LoadedAttachment],
    message_id: &str,
) -> Result<Message, DeliveryError> {
    let from_address: Address = credential.from_email.trim().parse().map_err(|e| {
        DeliveryError::new(
            ErrorKind::Configuration,
            format!("Invalid sender address {:?}: {}", credential.from_email, e),
        )
    })?;
    let from_name = credential.from_name.trim();
    let from = Mailbox::new(
        (!from_name.is_empty()).then(|| from_name.to_string()),
        from_address,
    );

    let to_address: Address = recipient.email.trim().parse().map_err(|e| {
        DeliveryError::new(
            ErrorKind::PermanentRejection,
            format!("Invalid recipient address {:?}: {}", recipient.email, e),
        )
    })?;
    let to_name = recipient.name.trim();
    let to = Mailbox::new(
        (!to_name.is_empty()).then(|| to_name.to_string()),
        to_address,
    );

    let builder = Message::builder()
        .from(from)
        .to(to)
        .subject(message.subject.clone())
        .message_id(Some(message_id.to_string()))
        .date_now();

    let body = if message.is_html {
        SinglePart::html(message.body.clone())
    } else {
        SinglePart::plain(message.body.clone())
    };

    let built = if attachments.is_empty() {
        builder.singlepart(body)
    } else {
        let mut mixed = MultiPart::mixed().singlepart(body);
        for attachment in attachments {
            let content_type = ContentType::parse(&attachment.content_type).map_err(|e| {
                DeliveryError::new(
                    ErrorKind::Attachment,
                    format!(
                        "Attachment {} has an invalid content type {:?}: {}",
                        attachment.filename, attachment.content_type, e
                    ),
                )
            })?;
            mixed = mixed.singlepart(
                Attachment::new(attachment.filename.clone())
                    .body(attachment.content.as_ref().clone(), content_type),
            );
        }
        builder.multipart(mixed)
    };

    built.map_err(|e| {
        DeliveryError::new(
            ErrorKind::Configuration,
            format!("Failed to build email: {}", e),
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use mailblast_common::types::SecurityMode;
    use std::sync::Arc;

    fn credential() -> SmtpCredential {
        SmtpCredential {
            host: "smtp.example.com".to_string(),
            port: 587,
            security: SecurityMode::StartTls,
            username: "news@acme.com".to_string(),
            password: "secret".to_string(),
            from_name: "Acme".to_string(),
            from_email: "news@acme.com".to_string(),
        }
    }

    fn rendered(is_html: bool) -> RenderedMessage {
        RenderedMessage {
            subject: "Proposta".to_string(),
            body: if is_html { "<p>Olá</p>" } else { "Olá" }.to_string(),
            is_html,
        }
    }

    #[test]
    fn test_infer_content_type() {
        assert_eq!(infer_content_type("proposta.pdf"), "application/pdf");
        assert_eq!(infer_content_type("foto.png"), "image/png");
        assert_eq!(infer_content_type("foto.JPG"), "image/jpeg");
        assert_eq!(infer_content_type("pacote.zip"), "application/zip");
        assert_eq!(infer_content_type("arquivo.desconhecido"), "application/octet-stream");
        assert_eq!(infer_content_type("sem_extensao"), "application/octet-stream");
    }

    #[test]
    fn test_message_id_uses_sender_domain() {
        let id = generate_message_id("news@acme.com", "localhost");
        assert!(id.starts_with('<'));
        assert!(id.ends_with("@acme.com>"));

        let id = generate_message_id("broken", "mail.example.com");
        assert!(id.ends_with("@mail.example.com>"));
    }

    #[test]
    fn test_build_plain_message() {
        let recipient = Recipient::new(uuid::Uuid::nil(), "Ana", "ana@example.com");
        let message = build_message(&credential(), &rendered(false), &recipient, &[], "<id@acme.com>").unwrap();

        let raw = String::from_utf8(message.formatted()).unwrap();
        assert!(raw.contains("news@acme.com"));
        assert!(raw.contains("ana@example.com"));
        assert!(raw.contains("<id@acme.com>"));
        assert!(raw.contains("text/plain"));
    }

    #[test]
    fn test_build_message_with_attachment() {
        let recipient = Recipient::new(uuid::Uuid::nil(), "Ana", "ana@example.com");
        let attachments = vec![LoadedAttachment {
            filename: "proposta.pdf".to_string(),
            content_type: "application/pdf".to_string(),
            content: Arc::new(b"%PDF-1.4".to_vec()),
        }];

        let message =
            build_message(&credential(), &rendered(true), &recipient, &attachments, "<id@acme.com>").unwrap();
        let raw = String::from_utf8(message.formatted()).unwrap();
        assert!(raw.contains("multipart/mixed"));
        assert!(raw.contains("text/html"));
        assert!(raw.contains("application/pdf"));
        assert!(raw.contains("proposta.pdf"));
    }

    #[test]
    fn test_invalid_recipient_is_permanent() {
        let recipient = Recipient::new(uuid::Uuid::nil(), "Ana", "not-an-address");
        let err = build_message(&credential(), &rendered(false), &recipient, &[], "<id@acme.com>")
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::PermanentRejection);
    }
}
