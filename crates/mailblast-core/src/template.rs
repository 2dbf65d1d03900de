//! Template Renderer - Personalizes a template for one recipient
//!
//! Rendering is a pure function of `(template, recipient, now)`: no I/O,
//! no randomness, so the same inputs always produce the same message.

use chrono::NaiveDateTime;
use mailblast_common::types::{Recipient, Template};
use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

/// Personalized subject and body for one recipient
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenderedMessage {
    pub subject: String,
    pub body: String,
    /// Body contains markup and is sent as `text/html`
    pub is_html: bool,
}

fn token_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"\{\{\s*([a-z_]+)\s*\}\}|\{([a-z_]+)\}").expect("valid token pattern")
    })
}

fn markup_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"</?[a-zA-Z][a-zA-Z0-9]*[^<>]*>").expect("valid markup pattern"))
}

/// Generic business tokens: the two accepted spellings and the placeholder
/// shown when the recipient has no such field.
const BUSINESS_TOKENS: &[(&str, &str, &str)] = &[
    ("empresa", "company", "Empresa"),
    ("cargo", "role", "Cargo"),
    ("produto", "product", "Produto"),
    ("valor", "amount", "Valor"),
    ("vencimento", "due_date", "Vencimento"),
];

/// Template renderer for personalizing email content
#[derive(Debug, Clone)]
pub struct TemplateRenderer {
    date_format: String,
    time_format: String,
}

impl Default for TemplateRenderer {
    fn default() -> Self {
        Self::new()
    }
}

impl TemplateRenderer {
    /// Create a renderer using Brazilian date and time formats
    pub fn new() -> Self {
        Self {
            date_format: "%d/%m/%Y".to_string(),
            time_format: "%H:%M".to_string(),
        }
    }

    /// Override the `strftime` formats used for the date and time tokens
    pub fn with_formats(mut self, date_format: &str, time_format: &str) -> Self {
        self.date_format = date_format.to_string();
        self.time_format = time_format.to_string();
        self
    }

    /// Render the message that is actually sent.
    ///
    /// Attachments are not mentioned in the body; the delivery client
    /// carries them as MIME parts.
    pub fn render(&self, template: &Template, recipient: &Recipient, now: NaiveDateTime) -> RenderedMessage {
        let is_html = is_html(&template.body);

        let subject_source = template
            .subject
            .as_deref()
            .filter(|s| !s.trim().is_empty())
            .unwrap_or(&template.name);
        let subject = self.substitute(subject_source, recipient, now, false);

        let mut body = self.substitute(&template.body, recipient, now, is_html);
        self.append_signature(&mut body, template, recipient, now, is_html);

        RenderedMessage {
            subject,
            body,
            is_html,
        }
    }

    /// Render the preview shown before sending, with an attachment manifest
    pub fn render_preview(&self, template: &Template, recipient: &Recipient, now: NaiveDateTime) -> RenderedMessage {
        let mut message = self.render(template, recipient, now);

        if template.attachments.is_empty() {
            return message;
        }

        let count = template.attachments.len();
        if message.is_html {
            message.body.push_str(&format!(
                "<hr><p><strong>Anexos ({}):</strong></p><ul>",
                count
            ));
            for attachment in &template.attachments {
                message.body.push_str(&format!(
                    "<li>{} ({})</li>",
                    escape_html(&attachment.name),
                    human_size(attachment.size)
                ));
            }
            message.body.push_str("</ul>");
        } else {
            message.body.push_str(&format!("\n\nAnexos ({}):", count));
            for attachment in &template.attachments {
                message
                    .body
                    .push_str(&format!("\n- {} ({})", attachment.name, human_size(attachment.size)));
            }
        }

        message
    }

    fn append_signature(
        &self,
        body: &mut String,
        template: &Template,
        recipient: &Recipient,
        now: NaiveDateTime,
        is_html: bool,
    ) {
        let signature = template
            .signature
            .as_deref()
            .filter(|s| !s.trim().is_empty())
            .map(|s| self.substitute(s, recipient, now, is_html));
        let image = template
            .signature_image_url
            .as_deref()
            .filter(|url| !url.trim().is_empty());

        if is_html {
            if let Some(signature) = signature {
                let signature = if self::is_html(&signature) {
                    signature
                } else {
                    signature.replace('\n', "<br>")
                };
                body.push_str("<br><br>");
                body.push_str(&signature);
            }
            if let Some(url) = image {
                body.push_str(&format!(
                    "<br><img src=\"{}\" alt=\"Assinatura\" style=\"max-width: 300px;\">",
                    escape_html(url)
                ));
            }
        } else if let Some(signature) = signature {
            body.push_str("\n\n-- \n");
            body.push_str(&signature);
        }
    }

    fn substitute(&self, text: &str, recipient: &Recipient, now: NaiveDateTime, escape: bool) -> String {
        token_pattern()
            .replace_all(text, |caps: &Captures| {
                let token = caps
                    .get(1)
                    .or_else(|| caps.get(2))
                    .map(|m| m.as_str())
                    .unwrap_or_default();
                match self.resolve(token, recipient, now) {
                    Some(value) if escape => escape_html(&value),
                    Some(value) => value,
                    // Unknown tokens are left exactly as written
                    None => caps[0].to_string(),
                }
            })
            .into_owned()
    }

    fn resolve(&self, token: &str, recipient: &Recipient, now: NaiveDateTime) -> Option<String> {
        let value = match token {
            "nome" | "name" => recipient.name.clone(),
            "email" => recipient.email.clone(),
            "telefone" | "phone" => recipient.phone.clone().unwrap_or_default(),
            "razao_social" | "legal_name" => recipient.legal_name.clone().unwrap_or_default(),
            "cliente" | "client" => recipient
                .legal_name
                .clone()
                .filter(|n| !n.trim().is_empty())
                .unwrap_or_else(|| recipient.name.clone()),
            "data" | "date" => now.format(&self.date_format).to_string(),
            "hora" | "time" => now.format(&self.time_format).to_string(),
            other => {
                let (pt, en, placeholder) = BUSINESS_TOKENS
                    .iter()
                    .find(|(pt, en, _)| *pt == other || *en == other)?;
                recipient
                    .field(pt)
                    .or_else(|| recipient.field(en))
                    .unwrap_or(placeholder)
                    .to_string()
            }
        };
        Some(value)
    }
}

/// Whether a body contains HTML markup
pub fn is_html(body: &str) -> bool {
    markup_pattern().is_match(body)
}

fn escape_html(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            _ => escaped.push(c),
        }
    }
    escaped
}

/// Human-readable byte size
pub fn human_size(bytes: u64) -> String {
    const KB: f64 = 1024.0;
    const MB: f64 = KB * 1024.0;

    let size = bytes as f64;
    if size < KB {
        format!("{} B", bytes)
    } else if size < MB {
        format!("{:.1} KB", size / KB)
    } else {
        format!("{:.1} MB", size / MB)
    }
}
