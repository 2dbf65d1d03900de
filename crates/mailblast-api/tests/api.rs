//! Router tests over the in-memory table store

use async_trait::async_trait;
use axum::http::{HeaderName, HeaderValue, StatusCode};
use axum_test::TestServer;
use chrono::{Duration as ChronoDuration, Utc};
use mailblast_api::handlers::dispatch::{RunStatusResponse, StartDispatchResponse};
use mailblast_api::handlers::history::ListHistoryResponse;
use mailblast_api::{create_router, AppState, IdentityProvider};
use mailblast_common::config::{DispatchConfig, StorageConfig};
use mailblast_common::types::{CurrentUser, Recipient, SmtpCredential};
use mailblast_common::{Error, Result};
use mailblast_core::{
    DeliveryClient, DeliveryError, DispatchEngine, DispatchMetrics, DispatchScheduler, ErrorKind,
    InputLoader, LoadedAttachment, ProviderKind, RenderedMessage, SentReceipt,
    StorageAttachmentSource, TemplateRenderer,
};
use mailblast_storage::memory::MemoryStore;
use mailblast_storage::{Contact, DispatchMode, SmtpSettings, TemplateRecord};
use pretty_assertions::assert_eq;
use serde_json::json;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use uuid::Uuid;

const TOKEN: &str = "session-token";

/// Accepts every token equal to `TOKEN`
struct StaticIdentity {
    user: CurrentUser,
}

#[async_trait]
impl IdentityProvider for StaticIdentity {
    async fn current_user(&self, token: &str) -> Result<CurrentUser> {
        if token == TOKEN {
            Ok(self.user.clone())
        } else {
            Err(Error::Auth("Invalid or expired session".to_string()))
        }
    }
}

/// Rejects `bounce@…` recipients, accepts everyone else
#[derive(Default)]
struct RecordingClient {
    sent: Mutex<Vec<(String, String)>>,
}

#[async_trait]
impl DeliveryClient for RecordingClient {
    async fn send(
        &self,
        _credential: &SmtpCredential,
        message: &RenderedMessage,
        recipient: &Recipient,
        _attachments: &[LoadedAttachment],
    ) -> std::result::Result<SentReceipt, DeliveryError> {
        if recipient.email.starts_with("bounce@") {
            return Err(DeliveryError::new(
                ErrorKind::PermanentRejection,
                "550 5.1.1 mailbox unavailable",
            ));
        }
        self.sent
            .lock()
            .unwrap()
            .push((recipient.email.clone(), message.subject.clone()));
        Ok(SentReceipt {
            message_id: format!("<{}@acme.com>", Uuid::new_v4().simple()),
        })
    }
}

struct Harness {
    server: TestServer,
    store: Arc<MemoryStore>,
    client: Arc<RecordingClient>,
    owner: Uuid,
}

impl Harness {
    fn new() -> Self {
        let store = Arc::new(MemoryStore::new());
        let client = Arc::new(RecordingClient::default());
        let metrics = Arc::new(DispatchMetrics::new().unwrap());
        let owner = Uuid::new_v4();

        let scheduler = Arc::new(DispatchScheduler::new(client.clone(), 100).with_metrics(metrics.clone()));
        let attachments = Arc::new(StorageAttachmentSource::new(&StorageConfig::default(), None).unwrap());
        let engine = Arc::new(
            DispatchEngine::new(scheduler, attachments, DispatchConfig::default())
                .with_history(store.clone())
                .with_metrics(metrics.clone()),
        );

        let state = AppState {
            engine,
            inputs: Arc::new(InputLoader::new(store.clone(), store.clone(), store.clone())),
            history: store.clone(),
            schedules: store.clone(),
            identity: Arc::new(StaticIdentity {
                user: CurrentUser {
                    id: owner,
                    email: "owner@acme.com".to_string(),
                },
            }),
            renderer: TemplateRenderer::new(),
            metrics: Some(metrics),
            db_pool: None,
        };

        let server = TestServer::new(create_router(state, &[])).unwrap();
        Self {
            server,
            store,
            client,
            owner,
        }
    }

    async fn seed(&self, emails: &[&str]) -> (Uuid, Vec<Uuid>) {
        let now = Utc::now();
        let mut ids = Vec::new();
        for email in emails {
            let id = Uuid::new_v4();
            self.store
                .add_contact(Contact {
                    id,
                    user_id: self.owner,
                    name: "Cliente".to_string(),
                    email: email.to_string(),
                    phone: None,
                    legal_name: None,
                    tags: vec!["clientes".to_string()],
                    fields: json!({ "empresa": "Acme" }),
                    created_at: now,
                    updated_at: now,
                })
                .await;
            ids.push(id);
        }

        let template_id = Uuid::new_v4();
        self.store
            .add_template(TemplateRecord {
                id: template_id,
                user_id: self.owner,
                name: "Novidades".to_string(),
                subject: Some("Novidades para {nome}".to_string()),
                body: "Olá {nome}, da {empresa}.".to_string(),
                signature: Some("Equipe Acme".to_string()),
                signature_image_url: None,
                attachments: json!([]),
                created_at: now,
                updated_at: now,
            })
            .await;

        self.store
            .set_smtp(SmtpSettings {
                user_id: self.owner,
                smtp_host: "smtp.gmail.com".to_string(),
                smtp_port: 587,
                smtp_security: Some("starttls".to_string()),
                smtp_username: "news@acme.com".to_string(),
                smtp_password: "app-password".to_string(),
                from_name: "Acme".to_string(),
                from_email: "news@acme.com".to_string(),
                updated_at: now,
            })
            .await;

        (template_id, ids)
    }

    fn bearer(&self) -> (HeaderName, HeaderValue) {
        (
            HeaderName::from_static("authorization"),
            HeaderValue::from_str(&format!("Bearer {}", TOKEN)).unwrap(),
        )
    }

    async fn wait_finished(&self, run_id: Uuid) -> RunStatusResponse {
        for _ in 0..500 {
            let (name, value) = self.bearer();
            let status: RunStatusResponse = self
                .server
                .get(&format!("/api/v1/dispatch/{}", run_id))
                .add_header(name, value)
                .await
                .json();
            if status.finished {
                return status;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("run {} did not finish", run_id);
    }
}

#[tokio::test]
async fn test_health_is_public() {
    let harness = Harness::new();
    harness.server.get("/health").await.assert_status_ok();
    harness.server.get("/health/ready").await.assert_status_ok();
}

#[tokio::test]
async fn test_api_requires_bearer_token() {
    let harness = Harness::new();

    harness
        .server
        .get("/api/v1/history")
        .await
        .assert_status(StatusCode::UNAUTHORIZED);

    harness
        .server
        .get("/api/v1/history")
        .add_header(
            HeaderName::from_static("authorization"),
            HeaderValue::from_static("Bearer someone-else"),
        )
        .await
        .assert_status(StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_dispatch_run_end_to_end() {
    let harness = Harness::new();
    let (template_id, ids) = harness
        .seed(&["ana@example.com", "bounce@example.com", "bruno@example.com"])
        .await;

    let (name, value) = harness.bearer();
    let response = harness
        .server
        .post("/api/v1/dispatch")
        .add_header(name, value)
        .json(&json!({
            "template_id": template_id,
            "contact_ids": ids,
            "mode": "lote",
        }))
        .await;
    response.assert_status(StatusCode::ACCEPTED);
    let accepted: StartDispatchResponse = response.json();
    assert_eq!(accepted.total, 3);
    assert_eq!(accepted.provider, ProviderKind::Gmail);
    assert_eq!(accepted.mode, DispatchMode::Batch);

    let status = harness.wait_finished(accepted.run_id).await;
    let report = status.report.unwrap();
    assert_eq!(report.summary.total, 3);
    assert_eq!(report.summary.succeeded, 2);
    assert_eq!(report.summary.failed, 1);
    assert_eq!(report.distinct_errors, vec!["550 5.1.1 mailbox unavailable".to_string()]);
    assert!(status.progress.finished);

    let sent = harness.client.sent.lock().unwrap().clone();
    assert_eq!(sent.len(), 2);
    assert!(sent.iter().all(|(_, subject)| subject == "Novidades para Cliente"));

    let (name, value) = harness.bearer();
    let history: ListHistoryResponse = harness
        .server
        .get("/api/v1/history")
        .add_header(name, value)
        .add_query_param("limit", 10)
        .await
        .json();
    assert_eq!(history.total, 3);
    assert_eq!(history.items.len(), 3);
    assert_eq!(history.items.iter().filter(|h| h.status == "error").count(), 1);

    let metrics = harness.server.get("/metrics").await.text();
    assert!(metrics.contains("mailblast_outcomes_total"));
}

#[tokio::test]
async fn test_dispatch_without_smtp_settings_is_rejected() {
    let harness = Harness::new();
    let template_id = Uuid::new_v4();
    harness
        .store
        .add_template(TemplateRecord {
            id: template_id,
            user_id: harness.owner,
            name: "Sem SMTP".to_string(),
            subject: None,
            body: "Olá".to_string(),
            signature: None,
            signature_image_url: None,
            attachments: json!([]),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        })
        .await;

    let (name, value) = harness.bearer();
    let response = harness
        .server
        .post("/api/v1/dispatch")
        .add_header(name, value)
        .json(&json!({ "template_id": template_id, "tag": "clientes" }))
        .await;

    response.assert_status(StatusCode::UNPROCESSABLE_ENTITY);
    assert!(harness.client.sent.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_unknown_run_is_not_found() {
    let harness = Harness::new();
    let (name, value) = harness.bearer();
    harness
        .server
        .post(&format!("/api/v1/dispatch/{}/cancel", Uuid::new_v4()))
        .add_header(name, value)
        .await
        .assert_status(StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_preview_with_sample_recipient() {
    let harness = Harness::new();
    let (template_id, _) = harness.seed(&["ana@example.com"]).await;

    let (name, value) = harness.bearer();
    let preview: RenderedMessage = harness
        .server
        .post("/api/v1/preview")
        .add_header(name, value)
        .json(&json!({ "template_id": template_id }))
        .await
        .json();

    assert_eq!(preview.subject, "Novidades para Maria Silva");
    assert!(preview.body.starts_with("Olá Maria Silva, da Empresa."));
    assert!(!preview.is_html);
}

#[tokio::test]
async fn test_schedule_creation() {
    let harness = Harness::new();
    let (template_id, _) = harness.seed(&["ana@example.com"]).await;

    let (name, value) = harness.bearer();
    harness
        .server
        .post("/api/v1/schedules")
        .add_header(name, value)
        .json(&json!({
            "template_id": template_id,
            "tag": "clientes",
            "scheduled_at": Utc::now() + ChronoDuration::hours(2),
        }))
        .await
        .assert_status(StatusCode::CREATED);

    let (name, value) = harness.bearer();
    harness
        .server
        .post("/api/v1/schedules")
        .add_header(name, value)
        .json(&json!({
            "template_id": template_id,
            "tag": "clientes",
            "scheduled_at": Utc::now() - ChronoDuration::hours(2),
        }))
        .await
        .assert_status(StatusCode::UNPROCESSABLE_ENTITY);
}
